use async_trait::async_trait;

use crate::cursor::Cursor;
use crate::error::FeedResult;
use crate::filter::Filter;
use crate::models::{Page, Post};

/// Which indexer listing a query reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QuerySource {
    /// `GET /posts`, the global newest-first listing.
    Posts,
    /// `POST /filter` with the given filter body.
    Filter(Filter),
}

/// One page request minus its cursor. The `extend_*` lists are passed through
/// to the indexer, which does the domain-aware block/follow expansion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageQuery {
    pub source: QuerySource,
    pub extend_block_src: Vec<String>,
    pub extend_follow_src: Vec<String>,
}

impl PageQuery {
    pub fn posts() -> Self {
        Self {
            source: QuerySource::Posts,
            extend_block_src: Vec::new(),
            extend_follow_src: Vec::new(),
        }
    }

    pub fn filter(filter: Filter) -> Self {
        Self {
            source: QuerySource::Filter(filter),
            extend_block_src: Vec::new(),
            extend_follow_src: Vec::new(),
        }
    }

    pub fn with_block_src<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extend_block_src.extend(sources.into_iter().map(Into::into));
        self
    }

    pub fn with_follow_src<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extend_follow_src.extend(sources.into_iter().map(Into::into));
        self
    }

    /// True when the query could only be answered by an unconstrained
    /// "everything" filter.
    pub fn is_unconstrained_filter(&self) -> bool {
        matches!(&self.source, QuerySource::Filter(filter) if filter.is_empty())
    }
}

/// Single network round trip per call; implementations never retry and never
/// cache.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, query: &PageQuery, cursor: Cursor) -> FeedResult<Page<Post>>;

    /// `GET /posts/:hash`; `Ok(None)` when the indexer has no such post.
    async fn fetch_post(&self, hash: &str) -> FeedResult<Option<Post>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    Followers,
    Followees,
    Blockees,
}

impl ConnectionKind {
    pub fn path_segment(self) -> &'static str {
        match self {
            ConnectionKind::Followers => "followers",
            ConnectionKind::Followees => "followees",
            ConnectionKind::Blockees => "blockees",
        }
    }
}

impl std::str::FromStr for ConnectionKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "followers" => Ok(ConnectionKind::Followers),
            "followees" | "following" => Ok(ConnectionKind::Followees),
            "blockees" | "blocks" => Ok(ConnectionKind::Blockees),
            other => Err(format!("unknown connection kind '{other}'")),
        }
    }
}

#[async_trait]
pub trait ConnectionFetcher: Send + Sync {
    /// Usernames on one page of `/users/:name/<kind>`.
    async fn fetch_connections(
        &self,
        username: &str,
        kind: ConnectionKind,
        cursor: Cursor,
    ) -> FeedResult<Page<String>>;
}
