//! In-memory indexer double for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::cursor::Cursor;
use crate::error::{FeedError, FeedResult};
use crate::fetcher::{ConnectionFetcher, ConnectionKind, PageFetcher, PageQuery, QuerySource};
use crate::models::{Page, Post, PostMeta};
use crate::utils::lock;

pub(crate) fn post(hash: &str) -> Post {
    Post {
        hash: hash.to_string(),
        creator: "alice@nomad".to_string(),
        parent: None,
        topic: String::new(),
        title: String::new(),
        content: format!("body of {hash}"),
        tags: Vec::new(),
        kind: None,
        timestamp: Default::default(),
        meta: PostMeta::default(),
        moderation_setting: None,
    }
}

pub(crate) fn reply(hash: &str, parent: &str) -> Post {
    Post {
        parent: Some(parent.to_string()),
        ..post(hash)
    }
}

pub(crate) fn posts(prefix: &str, count: usize) -> Vec<Post> {
    (0..count).map(|i| post(&format!("{prefix}{i}"))).collect()
}

pub(crate) fn page(items: Vec<Post>, next: Cursor) -> Page<Post> {
    Page { items, next }
}

type PageFn = dyn Fn(&PageQuery, Cursor) -> FeedResult<Page<Post>> + Send + Sync;
type ConnectionFn = dyn Fn(&str, ConnectionKind, Cursor) -> FeedResult<Page<String>> + Send + Sync;

pub(crate) struct ScriptedFetcher {
    pages: Box<PageFn>,
    connections: Box<ConnectionFn>,
    posts: HashMap<String, Post>,
    failing_posts: HashSet<String>,
    calls: Mutex<Vec<(PageQuery, Cursor)>>,
    post_calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedFetcher {
    pub(crate) fn new(
        pages: impl Fn(&PageQuery, Cursor) -> FeedResult<Page<Post>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            pages: Box::new(pages),
            connections: Box::new(|_, _, _| Err(FeedError::Indexer("no connections scripted".into()))),
            posts: HashMap::new(),
            failing_posts: HashSet::new(),
            calls: Mutex::new(Vec::new()),
            post_calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// Serves pages by cursor regardless of the query.
    pub(crate) fn by_cursor(script: Vec<(Cursor, Page<Post>)>) -> Self {
        let script: HashMap<Cursor, Page<Post>> = script.into_iter().collect();
        Self::new(move |_, cursor| {
            script
                .get(&cursor)
                .cloned()
                .ok_or_else(|| FeedError::Indexer(format!("no page scripted for {cursor:?}")))
        })
    }

    /// Serves reply pages keyed by the single parent hash in the filter.
    pub(crate) fn by_parent(script: Vec<(&str, Cursor, Page<Post>)>) -> Self {
        let script: HashMap<(String, Cursor), Page<Post>> = script
            .into_iter()
            .map(|(parent, cursor, page)| ((parent.to_string(), cursor), page))
            .collect();
        Self::new(move |query, cursor| {
            let QuerySource::Filter(filter) = &query.source else {
                return Err(FeedError::Indexer("expected a filter query".into()));
            };
            let parent = filter.parent_hashes.first().cloned().unwrap_or_default();
            Ok(script
                .get(&(parent, cursor))
                .cloned()
                .unwrap_or_else(Page::empty))
        })
    }

    pub(crate) fn with_posts(mut self, posts: impl IntoIterator<Item = Post>) -> Self {
        self.posts
            .extend(posts.into_iter().map(|post| (post.hash.clone(), post)));
        self
    }

    pub(crate) fn failing_post(mut self, hash: &str) -> Self {
        self.failing_posts.insert(hash.to_string());
        self
    }

    pub(crate) fn with_connections(
        mut self,
        connections: impl Fn(&str, ConnectionKind, Cursor) -> FeedResult<Page<String>> + Send + Sync + 'static,
    ) -> Self {
        self.connections = Box::new(connections);
        self
    }

    /// Holds every page fetch until a permit is added to `gate`.
    pub(crate) fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn page_calls(&self) -> usize {
        lock(&self.calls).len()
    }

    pub(crate) fn calls(&self) -> Vec<(PageQuery, Cursor)> {
        lock(&self.calls).clone()
    }

    pub(crate) fn post_calls(&self) -> usize {
        self.post_calls.load(Ordering::SeqCst)
    }

    async fn wait_for_gate(&self) {
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch_page(&self, query: &PageQuery, cursor: Cursor) -> FeedResult<Page<Post>> {
        lock(&self.calls).push((query.clone(), cursor));
        self.wait_for_gate().await;
        (self.pages)(query, cursor)
    }

    async fn fetch_post(&self, hash: &str) -> FeedResult<Option<Post>> {
        self.post_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_posts.contains(hash) {
            return Err(FeedError::Indexer(format!("lookup of {hash} failed")));
        }
        Ok(self.posts.get(hash).cloned())
    }
}

#[async_trait]
impl ConnectionFetcher for ScriptedFetcher {
    async fn fetch_connections(
        &self,
        username: &str,
        kind: ConnectionKind,
        cursor: Cursor,
    ) -> FeedResult<Page<String>> {
        lock(&self.calls).push((PageQuery::posts(), cursor));
        self.wait_for_gate().await;
        (self.connections)(username, kind, cursor)
    }
}
