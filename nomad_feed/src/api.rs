use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::FeedConfig;
use crate::cursor::Cursor;
use crate::error::{FeedError, FeedResult};
use crate::fetcher::{ConnectionFetcher, ConnectionKind, PageFetcher, PageQuery, QuerySource};
use crate::filter::Filter;
use crate::models::{ApiResponse, ConnectionEntry, Page, Pageable, Post, PostEnvelope};

/// HTTP client for the indexer API.
#[derive(Clone)]
pub struct IndexerClient {
    base_url: String,
    page_size: usize,
    client: Client,
}

#[derive(Serialize)]
struct FilterBody<'a> {
    filter: &'a Filter,
}

impl IndexerClient {
    pub fn new(base_url: impl Into<String>, page_size: usize, timeout: Duration) -> FeedResult<Self> {
        let base_url = sanitize_base_url(base_url.into())?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            page_size,
            client,
        })
    }

    pub fn from_config(config: &FeedConfig) -> FeedResult<Self> {
        Self::new(
            config.indexer_api.clone(),
            config.page_size,
            config.request_timeout(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> FeedResult<Url> {
        let joined = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Url::parse(&joined).map_err(|err| FeedError::InvalidUrl(format!("{joined}: {err}")))
    }

    /// Appends `segments` to the base path, percent-encoding each one so a
    /// hash or username cannot add segments, a query or a fragment.
    fn segment_url(&self, segments: &[&str]) -> FeedResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| FeedError::InvalidUrl(format!("{}: {err}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| FeedError::InvalidUrl(format!("{} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Sends the request and unwraps the `{id, payload, error}` envelope.
    /// Returns `Ok(None)` for a successful response with a null payload.
    async fn send<T: DeserializeOwned>(&self, path: &str, request: RequestBuilder) -> FeedResult<Option<T>> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        let body: ApiResponse = response.json().await?;
        if let Some(message) = body.reported_error() {
            return Err(FeedError::Indexer(message));
        }
        if body.payload.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(body.payload)?))
    }
}

#[async_trait]
impl PageFetcher for IndexerClient {
    async fn fetch_page(&self, query: &PageQuery, cursor: Cursor) -> FeedResult<Page<Post>> {
        let mut params: Vec<(&str, String)> = vec![("order", "DESC".to_string())];
        let (path, request) = match &query.source {
            QuerySource::Posts => {
                params.push(("limit", self.page_size.to_string()));
                ("/posts", self.client.get(self.url("/posts")?))
            }
            QuerySource::Filter(filter) => (
                "/filter",
                self.client
                    .post(self.url("/filter")?)
                    .json(&FilterBody { filter }),
            ),
        };
        if let Some(offset) = cursor.query_offset() {
            params.push(("offset", offset.to_string()));
        }
        params.extend(
            query
                .extend_follow_src
                .iter()
                .map(|src| ("extendFollowSrc", src.clone())),
        );
        params.extend(
            query
                .extend_block_src
                .iter()
                .map(|src| ("extendBlockSrc", src.clone())),
        );
        tracing::debug!(path, ?cursor, "fetching page");

        let page: Option<Pageable<PostEnvelope>> = self.send(path, request.query(&params)).await?;
        Ok(page.map(Page::from).unwrap_or_else(Page::empty).map(Post::from))
    }

    async fn fetch_post(&self, hash: &str) -> FeedResult<Option<Post>> {
        let path = format!("/posts/{hash}");
        tracing::debug!(hash, "fetching post");
        let url = self.segment_url(&["posts", hash])?;
        let envelope: Option<PostEnvelope> = self.send(&path, self.client.get(url)).await?;
        Ok(envelope.map(Post::from))
    }
}

#[async_trait]
impl ConnectionFetcher for IndexerClient {
    async fn fetch_connections(
        &self,
        username: &str,
        kind: ConnectionKind,
        cursor: Cursor,
    ) -> FeedResult<Page<String>> {
        let path = format!("/users/{username}/{}", kind.path_segment());
        let mut params: Vec<(&str, String)> = vec![
            ("order", "ASC".to_string()),
            ("limit", self.page_size.to_string()),
        ];
        if let Some(offset) = cursor.query_offset() {
            params.push(("offset", offset.to_string()));
        }
        tracing::debug!(path = %path, ?cursor, "fetching connections");

        let url = self.segment_url(&["users", username, kind.path_segment()])?;
        let request = self.client.get(url).query(&params);
        let page: Option<Pageable<ConnectionEntry>> = self.send(&path, request).await?;
        Ok(page
            .map(Page::from)
            .unwrap_or_else(Page::empty)
            .map(|entry| entry.username()))
    }
}

fn sanitize_base_url(mut base: String) -> FeedResult<String> {
    if !base.starts_with("http://") && !base.starts_with("https://") {
        base = format!("http://{base}");
    }
    while base.ends_with('/') {
        base.pop();
    }
    Url::parse(&base).map_err(|err| FeedError::InvalidUrl(format!("{base}: {err}")))?;
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_scheme_and_loses_trailing_slash() {
        assert_eq!(
            sanitize_base_url("localhost:8082/".into()).unwrap(),
            "http://localhost:8082"
        );
        assert_eq!(
            sanitize_base_url("https://indexer.example/api//".into()).unwrap(),
            "https://indexer.example/api"
        );
    }

    #[test]
    fn url_keeps_base_path_prefix() {
        let client =
            IndexerClient::new("https://indexer.example/api", 20, Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.url("/posts/abc").unwrap().as_str(),
            "https://indexer.example/api/posts/abc"
        );
    }

    #[test]
    fn path_segments_are_percent_encoded() {
        let client =
            IndexerClient::new("https://indexer.example/api", 20, Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.segment_url(&["posts", "a/b?c#d"]).unwrap().as_str(),
            "https://indexer.example/api/posts/a%2Fb%3Fc%23d"
        );
        assert_eq!(
            client
                .segment_url(&["users", "bob nomad", "followers"])
                .unwrap()
                .as_str(),
            "https://indexer.example/api/users/bob%20nomad/followers"
        );

        let bare = IndexerClient::new("localhost:8082", 20, Duration::from_secs(1)).unwrap();
        assert_eq!(
            bare.segment_url(&["posts", "abc"]).unwrap().as_str(),
            "http://localhost:8082/posts/abc"
        );
    }
}
