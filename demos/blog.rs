//! Blog client and server in one process.
use duplex_rpc::services::blog::{self, Blog, BlogApi, BlogService, BlogStore};
use futures_lite::StreamExt;
use quic_rpc::flume_channel;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let store = BlogStore::new();
    let (server, client) = flume_channel::<BlogService>(1);
    let server = tokio::task::spawn(blog::serve(server, BlogService::new(store)));
    let api = BlogApi::new(client);

    println!("Creating the blog");
    let blog = api
        .create(Blog {
            author_id: "Stephane".into(),
            title: "My First Blog".into(),
            content: "Content of the first blog".into(),
            ..Default::default()
        })
        .await?;
    println!("Blog has been created: {blog:?}");

    println!("Reading the blog");
    if let Err(cause) = api.read("5bdc29e661b75adcac496cf4").await {
        println!("Error happened while reading: {cause}");
    }
    println!("Blog was read: {:?}", api.read(&blog.id).await?);

    let updated = api
        .update(Blog {
            id: blog.id.clone(),
            author_id: "Changed Author".into(),
            title: "My First Blog (edited)".into(),
            content: "Content of the first blog, with some awesome additions!".into(),
        })
        .await?;
    println!("Blog was updated: {updated:?}");

    api.create(Blog {
        author_id: "Lucy".into(),
        title: "Another Blog".into(),
        content: "More content".into(),
        ..Default::default()
    })
    .await?;
    let mut blogs = api.list().await?;
    while let Some(blog) = blogs.next().await {
        println!("{:?}", blog?);
    }

    println!("Blog was deleted: {}", api.delete(&blog.id).await?);

    drop(api);
    server.await?.ok();
    Ok(())
}
