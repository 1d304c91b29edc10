//! Blog service
//!
//! Create, read, update and delete blog entries, and list all of them. Entries
//! live in a [BlogStore] that is created by the caller and handed to
//! [BlogService::new], so several services can share one store.
use std::{
    collections::{btree_map::Entry, BTreeMap},
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, OnceLock,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use async_stream::stream;
use derive_more::{From, TryInto};
use futures_lite::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use quic_rpc::{
    message::{Msg, RpcMsg, ServerStreaming, ServerStreamingMsg},
    server::{RpcChannel, RpcServerError},
    Connector, Listener, RpcClient, RpcServer, Service,
};

use super::RpcStatus;
use crate::rpc::run_server_loop;

/// Identifier of a blog entry.
///
/// 12 bytes: seconds since the epoch, 5 random bytes chosen once per process
/// and a 3 byte counter. The text form is 24 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlogId([u8; 12]);

impl BlogId {
    /// Generate a new id.
    pub fn generate() -> Self {
        static PROCESS: OnceLock<[u8; 5]> = OnceLock::new();
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or_default();
        let process = PROCESS.get_or_init(rand::random);
        let count = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(process);
        bytes[9..].copy_from_slice(&count.to_be_bytes()[1..]);
        Self(bytes)
    }
}

impl fmt::Display for BlogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for BlogId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

/// A blog entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blog {
    /// Text form of the [BlogId], empty for entries that were not created yet
    pub id: String,
    /// Author of the entry
    pub author_id: String,
    /// Title of the entry
    pub title: String,
    /// Text of the entry
    pub content: String,
}

#[derive(Debug, Clone)]
struct BlogItem {
    author_id: String,
    title: String,
    content: String,
}

impl BlogItem {
    fn into_blog(self, id: BlogId) -> Blog {
        Blog {
            id: id.to_string(),
            author_id: self.author_id,
            title: self.title,
            content: self.content,
        }
    }
}

impl From<Blog> for BlogItem {
    fn from(blog: Blog) -> Self {
        Self {
            author_id: blog.author_id,
            title: blog.title,
            content: blog.content,
        }
    }
}

fn parse_id(id: &str) -> Result<BlogId, RpcStatus> {
    id.parse().map_err(|cause| {
        tracing::debug!("invalid blog id {id:?}: {cause}");
        RpcStatus::invalid_argument("Cannot parse ID")
    })
}

fn not_found(id: BlogId) -> RpcStatus {
    RpcStatus::not_found(format!("Cannot find blog with specified ID: {id}"))
}

/// In memory storage for blog entries, ordered by id.
#[derive(Debug, Clone, Default)]
pub struct BlogStore {
    blogs: Arc<RwLock<BTreeMap<BlogId, BlogItem>>>,
}

impl BlogStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new entry under a fresh id. The id of `blog` is ignored.
    pub async fn create(&self, blog: Blog) -> Blog {
        self.create_with(blog, BlogId::generate).await
    }

    /// Store `blog` under the first id from `next_id` that is not taken yet.
    async fn create_with(&self, blog: Blog, mut next_id: impl FnMut() -> BlogId) -> Blog {
        let item = BlogItem::from(blog);
        let mut blogs = self.blogs.write().await;
        loop {
            let id = next_id();
            match blogs.entry(id) {
                Entry::Occupied(_) => tracing::debug!("blog id {id} is taken"),
                Entry::Vacant(entry) => {
                    entry.insert(item.clone());
                    return item.into_blog(id);
                }
            }
        }
    }

    /// The entry with the given id.
    pub async fn read(&self, id: &str) -> Result<Blog, RpcStatus> {
        let id = parse_id(id)?;
        let blogs = self.blogs.read().await;
        let item = blogs.get(&id).ok_or_else(|| not_found(id))?;
        Ok(item.clone().into_blog(id))
    }

    /// Replace author, title and content of an existing entry.
    pub async fn update(&self, blog: Blog) -> Result<Blog, RpcStatus> {
        let id = parse_id(&blog.id)?;
        let mut blogs = self.blogs.write().await;
        let item = blogs.get_mut(&id).ok_or_else(|| not_found(id))?;
        *item = BlogItem::from(blog);
        Ok(item.clone().into_blog(id))
    }

    /// Remove an entry, returning its id.
    pub async fn delete(&self, id: &str) -> Result<String, RpcStatus> {
        let id = parse_id(id)?;
        self.blogs
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| not_found(id))?;
        Ok(id.to_string())
    }

    /// Snapshot of all entries in id order.
    pub async fn list(&self) -> Vec<Blog> {
        self.blogs
            .read()
            .await
            .iter()
            .map(|(id, item)| item.clone().into_blog(*id))
            .collect()
    }
}

/// Create a new entry
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateBlog(pub Blog);

/// The created entry, with its id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBlogResponse(pub Blog);

/// Read the entry with the given id
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadBlog(pub String);

/// The entry that was read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadBlogResponse(pub Blog);

/// Update an entry, identified by its id
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateBlog(pub Blog);

/// The updated entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBlogResponse(pub Blog);

/// Delete the entry with the given id
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteBlog(pub String);

/// Id of the deleted entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteBlogResponse(pub String);

/// List all entries
#[derive(Debug, Serialize, Deserialize)]
pub struct ListBlog;

/// One entry of a [ListBlog] call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListBlogResponse(pub Blog);

/// Request enum
#[allow(missing_docs)]
#[derive(Debug, Serialize, Deserialize, From, TryInto)]
pub enum BlogRequest {
    CreateBlog(CreateBlog),
    ReadBlog(ReadBlog),
    UpdateBlog(UpdateBlog),
    DeleteBlog(DeleteBlog),
    ListBlog(ListBlog),
}

/// Response enum
#[allow(missing_docs)]
#[derive(Debug, Serialize, Deserialize, From, TryInto)]
pub enum BlogResponse {
    CreateBlog(Result<CreateBlogResponse, RpcStatus>),
    ReadBlog(Result<ReadBlogResponse, RpcStatus>),
    UpdateBlog(Result<UpdateBlogResponse, RpcStatus>),
    DeleteBlog(Result<DeleteBlogResponse, RpcStatus>),
    ListBlog(ListBlogResponse),
}

/// The blog service
#[derive(Debug, Clone, Default)]
pub struct BlogService {
    store: BlogStore,
}

impl Service for BlogService {
    type Req = BlogRequest;
    type Res = BlogResponse;
}

impl RpcMsg<BlogService> for CreateBlog {
    type Response = Result<CreateBlogResponse, RpcStatus>;
}

impl RpcMsg<BlogService> for ReadBlog {
    type Response = Result<ReadBlogResponse, RpcStatus>;
}

impl RpcMsg<BlogService> for UpdateBlog {
    type Response = Result<UpdateBlogResponse, RpcStatus>;
}

impl RpcMsg<BlogService> for DeleteBlog {
    type Response = Result<DeleteBlogResponse, RpcStatus>;
}

impl Msg<BlogService> for ListBlog {
    type Pattern = ServerStreaming;
}

impl ServerStreamingMsg<BlogService> for ListBlog {
    type Response = ListBlogResponse;
}

impl BlogService {
    /// Create a blog service backed by `store`.
    pub fn new(store: BlogStore) -> Self {
        Self { store }
    }

    /// The store of this service.
    pub fn store(&self) -> &BlogStore {
        &self.store
    }

    async fn create_blog(
        self,
        CreateBlog(blog): CreateBlog,
    ) -> Result<CreateBlogResponse, RpcStatus> {
        let blog = self.store.create(blog).await;
        tracing::debug!("created blog {}", blog.id);
        Ok(CreateBlogResponse(blog))
    }

    async fn read_blog(self, ReadBlog(id): ReadBlog) -> Result<ReadBlogResponse, RpcStatus> {
        self.store.read(&id).await.map(ReadBlogResponse)
    }

    async fn update_blog(
        self,
        UpdateBlog(blog): UpdateBlog,
    ) -> Result<UpdateBlogResponse, RpcStatus> {
        self.store.update(blog).await.map(UpdateBlogResponse)
    }

    async fn delete_blog(
        self,
        DeleteBlog(id): DeleteBlog,
    ) -> Result<DeleteBlogResponse, RpcStatus> {
        self.store.delete(&id).await.map(DeleteBlogResponse)
    }

    fn list_blog(self, _req: ListBlog) -> impl Stream<Item = ListBlogResponse> {
        stream! {
            for blog in self.store.list().await {
                yield ListBlogResponse(blog);
            }
        }
    }
}

async fn dispatch<C: Listener<BlogService>>(
    chan: RpcChannel<BlogService, C>,
    req: BlogRequest,
    service: BlogService,
) -> Result<(), RpcServerError<C>> {
    use BlogRequest::*;
    match req {
        CreateBlog(msg) => chan.rpc(msg, service, BlogService::create_blog).await,
        ReadBlog(msg) => chan.rpc(msg, service, BlogService::read_blog).await,
        UpdateBlog(msg) => chan.rpc(msg, service, BlogService::update_blog).await,
        DeleteBlog(msg) => chan.rpc(msg, service, BlogService::delete_blog).await,
        ListBlog(msg) => {
            chan.server_streaming(msg, service, BlogService::list_blog)
                .await
        }
    }
}

/// Serve blog requests until the listener fails.
pub async fn serve<C: Listener<BlogService>>(
    server: RpcServer<BlogService, C>,
    service: BlogService,
) -> Result<(), RpcServerError<C>> {
    run_server_loop(server, service, dispatch::<C>).await
}

/// Typed client for the [BlogService].
#[derive(Debug, Clone)]
pub struct BlogApi<C> {
    client: RpcClient<BlogService, C>,
}

impl<C: Connector<BlogService>> BlogApi<C> {
    /// Wrap a client.
    pub fn new(client: RpcClient<BlogService, C>) -> Self {
        Self { client }
    }

    /// Create a new entry and return it with its assigned id.
    pub async fn create(&self, blog: Blog) -> anyhow::Result<Blog> {
        let CreateBlogResponse(blog) = self.client.rpc(CreateBlog(blog)).await??;
        Ok(blog)
    }

    /// Read an entry.
    pub async fn read(&self, id: impl Into<String>) -> anyhow::Result<Blog> {
        let ReadBlogResponse(blog) = self.client.rpc(ReadBlog(id.into())).await??;
        Ok(blog)
    }

    /// Update the entry identified by `blog.id`.
    pub async fn update(&self, blog: Blog) -> anyhow::Result<Blog> {
        let UpdateBlogResponse(blog) = self.client.rpc(UpdateBlog(blog)).await??;
        Ok(blog)
    }

    /// Delete an entry, returning its id.
    pub async fn delete(&self, id: impl Into<String>) -> anyhow::Result<String> {
        let DeleteBlogResponse(id) = self.client.rpc(DeleteBlog(id.into())).await??;
        Ok(id)
    }

    /// All entries in id order.
    pub async fn list(
        &self,
    ) -> anyhow::Result<impl Stream<Item = anyhow::Result<Blog>> + Send + 'static> {
        let blogs = self.client.server_streaming(ListBlog).await?;
        Ok(blogs.map(|item| -> anyhow::Result<Blog> { Ok(item?.0) }))
    }
}
