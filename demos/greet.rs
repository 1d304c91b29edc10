//! Greet client and server in one process.
use std::time::Duration;

use duplex_rpc::{
    services::greet::{self, GreetApi, GreetConfig, GreetService, Greeting},
    DuplexSession,
};
use futures_lite::{stream, StreamExt};
use quic_rpc::flume_channel;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let config = GreetConfig {
        repetitions: 5,
        interval: Duration::from_millis(200),
        ..Default::default()
    };
    let (server, client) = flume_channel::<GreetService>(1);
    let server = tokio::task::spawn(greet::serve(server, GreetService::new(config)));
    let api = GreetApi::new(client);
    let people = vec![
        Greeting::new("Stephane", "Maarek"),
        Greeting::new("John", "Doe"),
        Greeting::new("Lucy", "Smith"),
        Greeting::new("Mark", "Twain"),
    ];

    println!("{}", api.greet(people[0].clone()).await?);

    let mut greetings = api.greet_many_times(people[0].clone()).await?;
    while let Some(greeting) = greetings.next().await {
        println!("{}", greeting?);
    }

    println!("{}", api.long_greet(people.clone()).await?);

    let handle = api
        .greet_everyone(
            stream::iter(people.clone()),
            |greeting| println!("{greeting}"),
            DuplexSession::new(),
        )
        .await?;
    handle.join().await?;

    for deadline in [Duration::from_secs(5), Duration::from_secs(1)] {
        match api.greet_with_deadline(people[1].clone(), deadline).await {
            Ok(greeting) => println!("{greeting}"),
            Err(cause) => println!("greet with a deadline of {deadline:?} failed: {cause}"),
        }
    }

    drop(api);
    server.await?.ok();
    Ok(())
}
