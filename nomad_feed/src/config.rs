use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const DEFAULT_ANCESTOR_DEPTH: usize = 25;
pub const DEFAULT_AUTO_EXPAND_DEPTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Indexer API base URL
    #[serde(default = "default_indexer_api")]
    pub indexer_api: String,

    /// Minimum visible items per backfilled page; also the `limit` sent to the indexer
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Maximum number of ancestors walked above a selected post
    #[serde(default = "default_ancestor_depth")]
    pub ancestor_depth: usize,

    /// Reply levels below the selected post that start expanded
    #[serde(default = "default_auto_expand_depth")]
    pub auto_expand_depth: usize,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            indexer_api: default_indexer_api(),
            page_size: DEFAULT_PAGE_SIZE,
            ancestor_depth: DEFAULT_ANCESTOR_DEPTH,
            auto_expand_depth: DEFAULT_AUTO_EXPAND_DEPTH,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl FeedConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Reads a TOML file; environment variables still take precedence.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config: FeedConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.apply_env();
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn apply_env(&mut self) {
        if let Some(api) = env::var("NOMAD_INDEXER_API")
            .ok()
            .filter(|raw| !raw.trim().is_empty())
        {
            self.indexer_api = api;
        }
        // A zero page size would never satisfy the backfill target check.
        if let Some(size) = parse_env::<usize>("NOMAD_PAGE_SIZE").filter(|size| *size > 0) {
            self.page_size = size;
        }
        if let Some(depth) = parse_env("NOMAD_ANCESTOR_DEPTH") {
            self.ancestor_depth = depth;
        }
        if let Some(depth) = parse_env("NOMAD_AUTO_EXPAND_DEPTH") {
            self.auto_expand_depth = depth;
        }
        if let Some(secs) = parse_env("NOMAD_HTTP_TIMEOUT_SECS") {
            self.request_timeout_secs = secs;
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|raw| raw.trim().parse().ok())
}

fn default_indexer_api() -> String {
    "http://127.0.0.1:8082".to_string()
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_ancestor_depth() -> usize {
    DEFAULT_ANCESTOR_DEPTH
}

fn default_auto_expand_depth() -> usize {
    DEFAULT_AUTO_EXPAND_DEPTH
}

fn default_request_timeout() -> u64 {
    15
}
