//! Calculator client and server in one process.
//!
//! Run with `--stdin` to feed the running maximum from standard input, one
//! number per line. An empty line or end of input finishes the stream.
use std::time::Duration;

use async_stream::stream;
use duplex_rpc::{
    services::calculator::{self, CalculatorApi, CalculatorService},
    DuplexSession,
};
use futures_lite::{stream, Stream, StreamExt};
use quic_rpc::flume_channel;
use tokio::io::{AsyncBufReadExt, BufReader};

fn stdin_numbers() -> impl Stream<Item = i32> + Send + 'static {
    stream! {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            match line.parse::<i32>() {
                Ok(n) => yield n,
                Err(cause) => eprintln!("ignoring {line:?}: {cause}"),
            }
        }
    }
}

fn ticking_numbers() -> impl Stream<Item = i32> + Send + 'static {
    stream::iter(vec![4, 7, 2, 19, 4, 6, 32]).then(|n| async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        n
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let from_stdin = std::env::args().any(|arg| arg == "--stdin");
    let (server, client) = flume_channel::<CalculatorService>(1);
    let server = tokio::task::spawn(calculator::serve(server));
    let api = CalculatorApi::new(client);

    println!("3 + 10 = {}", api.sum(3, 10).await?);
    println!("sqrt(10) = {}", api.square_root(10).await?);
    match api.square_root(-2).await {
        Ok(root) => println!("sqrt(-2) = {root}"),
        Err(cause) => println!("sqrt(-2) failed: {cause}"),
    }

    let mut factors = api.prime_decomposition(12390392).await?;
    print!("prime factors of 12390392:");
    while let Some(factor) = factors.next().await {
        print!(" {}", factor?);
    }
    println!();

    let average = api.compute_average([1, 2, 3, 4]).await?;
    println!("average of 1, 2, 3, 4 = {average}");

    let numbers: stream::Boxed<i32> = if from_stdin {
        println!("enter numbers, one per line");
        stdin_numbers().boxed()
    } else {
        ticking_numbers().boxed()
    };
    let handle = api
        .find_maximum(
            numbers,
            |max| println!("new maximum: {max}"),
            DuplexSession::new(),
        )
        .await?;
    let summary = handle.join().await?;
    println!(
        "sent {} numbers, got {} maxima",
        summary.sent, summary.received
    );

    drop(api);
    server.await?.ok();
    Ok(())
}
