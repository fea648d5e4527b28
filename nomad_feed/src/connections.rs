use std::sync::{Arc, Mutex};

use crate::feed::{ApplyOutcome, FeedSnapshot, FeedViewState, FetchTicket, ViewKey};
use crate::fetcher::{ConnectionFetcher, ConnectionKind};
use crate::utils::lock;

struct ConnectionInner {
    target: Option<(String, ConnectionKind)>,
    state: FeedViewState,
}

/// Paginated followers/followees/blockees of one user. Shares the feed
/// state machine, so switching users drops in-flight pages from the old one.
pub struct ConnectionList {
    fetcher: Arc<dyn ConnectionFetcher>,
    inner: Mutex<ConnectionInner>,
}

impl ConnectionList {
    pub fn new(fetcher: Arc<dyn ConnectionFetcher>) -> Self {
        Self {
            fetcher,
            inner: Mutex::new(ConnectionInner {
                target: None,
                state: FeedViewState::new(),
            }),
        }
    }

    /// Points the list at `username`'s `kind` list and loads its first page.
    /// Returns `None` when it already shows that list.
    pub async fn show(&self, username: &str, kind: ConnectionKind) -> Option<ApplyOutcome> {
        let ticket = {
            let mut inner = lock(&self.inner);
            let ticket = inner.state.retarget(ViewKey::Connections {
                username: username.to_string(),
                kind,
            })?;
            inner.target = Some((username.to_string(), kind));
            ticket
        };
        Some(self.run(ticket, username.to_string(), kind).await)
    }

    pub async fn load_more(&self) -> Option<ApplyOutcome> {
        let (ticket, username, kind) = {
            let mut inner = lock(&self.inner);
            let (username, kind) = inner.target.clone()?;
            (inner.state.begin_load_more()?, username, kind)
        };
        Some(self.run(ticket, username, kind).await)
    }

    /// Keeps loading pages until the list is exhausted or a page fails.
    /// Returns the last outcome, or `None` when nothing was left to load.
    pub async fn load_remaining(&self) -> Option<ApplyOutcome> {
        let mut last = None;
        while let Some(outcome) = self.load_more().await {
            last = Some(outcome);
            if !matches!(outcome, ApplyOutcome::Merged { .. }) {
                break;
            }
        }
        last
    }

    async fn run(&self, ticket: FetchTicket, username: String, kind: ConnectionKind) -> ApplyOutcome {
        let result = self
            .fetcher
            .fetch_connections(&username, kind, ticket.cursor())
            .await;
        lock(&self.inner).state.apply(ticket, result)
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        lock(&self.inner).state.snapshot()
    }
}
