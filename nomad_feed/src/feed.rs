use std::collections::HashSet;
use std::sync::Mutex;

use crate::backfill::BackfillAggregator;
use crate::content_filter::ViewContext;
use crate::cursor::Cursor;
use crate::error::FeedResult;
use crate::fetcher::{ConnectionKind, PageQuery};
use crate::filter::{FeedControls, Filter, SavedView};
use crate::generation::{GenerationTag, TaskGeneration};
use crate::models::{Page, Post};
use crate::session::ViewerSession;
use crate::store::PostStore;
use crate::utils::lock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadPhase {
    #[default]
    Idle,
    Loading,
    Ready,
}

/// Handed out when a fetch starts; the result must come back with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    tag: GenerationTag,
    cursor: Cursor,
}

impl FetchTicket {
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Merged { added: usize },
    /// The view was reset after this fetch started; the result was dropped.
    Stale,
    Failed,
}

/// What a view's list was built from. A different key means the list is
/// reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewKey {
    /// `None` when the view is answered locally without asking the indexer.
    Query(Option<PageQuery>),
    Connections { username: String, kind: ConnectionKind },
}

/// List, cursor and loading state of one paginated view.
///
/// The list is append-only between resets and never holds a hash twice.
#[derive(Debug, Default)]
pub struct FeedViewState {
    phase: LoadPhase,
    key: Option<ViewKey>,
    list: Vec<String>,
    seen: HashSet<String>,
    cursor: Cursor,
    generation: TaskGeneration,
    in_flight: bool,
    error: Option<String>,
}

impl FeedViewState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the list and starts over from the first page. Any fetch still in
    /// flight becomes stale.
    pub fn reset(&mut self) -> FetchTicket {
        self.list.clear();
        self.seen.clear();
        self.cursor = Cursor::Start;
        self.error = None;
        self.phase = LoadPhase::Loading;
        self.in_flight = true;
        FetchTicket {
            tag: self.generation.advance(),
            cursor: Cursor::Start,
        }
    }

    /// Resets when `key` differs from the one the list was built for.
    pub fn retarget(&mut self, key: ViewKey) -> Option<FetchTicket> {
        if self.key.as_ref() == Some(&key) {
            return None;
        }
        self.key = Some(key);
        Some(self.reset())
    }

    /// Starts a "load more", or `None` when one is already running or the
    /// cursor is not a resumable offset.
    pub fn begin_load_more(&mut self) -> Option<FetchTicket> {
        if self.in_flight || !self.cursor.can_load_more() {
            return None;
        }
        self.in_flight = true;
        self.phase = LoadPhase::Loading;
        Some(FetchTicket {
            tag: self.generation.current(),
            cursor: self.cursor,
        })
    }

    pub fn is_current(&self, ticket: &FetchTicket) -> bool {
        self.generation.is_current(ticket.tag)
    }

    pub fn apply(&mut self, ticket: FetchTicket, result: FeedResult<Page<String>>) -> ApplyOutcome {
        if !self.is_current(&ticket) {
            tracing::debug!(cursor = ?ticket.cursor, "dropping result from a superseded fetch");
            return ApplyOutcome::Stale;
        }
        self.in_flight = false;
        self.phase = LoadPhase::Ready;
        match result {
            Ok(page) => {
                let before = self.list.len();
                for hash in page.items {
                    if self.seen.insert(hash.clone()) {
                        self.list.push(hash);
                    }
                }
                self.cursor = page.next;
                self.error = None;
                ApplyOutcome::Merged {
                    added: self.list.len() - before,
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, cursor = ?ticket.cursor, "page load failed");
                self.error = Some(err.to_string());
                ApplyOutcome::Failed
            }
        }
    }

    pub fn list(&self) -> &[String] {
        &self.list
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn can_load_more(&self) -> bool {
        !self.in_flight && self.cursor.can_load_more()
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            phase: self.phase,
            list: self.list.clone(),
            cursor: self.cursor,
            loading: self.in_flight,
            error: self.error.clone(),
        }
    }
}

/// Copy of a view's state for rendering outside the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSnapshot {
    pub phase: LoadPhase,
    pub list: Vec<String>,
    pub cursor: Cursor,
    pub loading: bool,
    pub error: Option<String>,
}

/// The screens that show a paginated top-level feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSource {
    /// Posts from the viewer's follow graph.
    Home { controls: FeedControls },
    /// Everything, newest first.
    Discover,
    Tag(String),
    Custom { filter: Filter, controls: FeedControls },
    Saved(SavedView),
}

impl FeedSource {
    pub fn title(&self) -> String {
        match self {
            FeedSource::Home { .. } => "Home".to_string(),
            FeedSource::Discover => "Discover".to_string(),
            FeedSource::Tag(tag) => format!("#{tag}"),
            FeedSource::Custom { .. } => "Custom filter".to_string(),
            FeedSource::Saved(view) => view.title.clone(),
        }
    }

    /// Builds the indexer query, or `None` when the answer is known to be
    /// empty without asking.
    pub fn query(&self, session: &ViewerSession) -> Option<PageQuery> {
        let blocks = session.block_sources();
        let query = match self {
            FeedSource::Home { controls } => {
                if session.followings.is_empty() || !controls.shows_anything() {
                    return None;
                }
                let follow_src: Vec<String> = match &session.username {
                    Some(name) => vec![name.clone()],
                    None => session.followings.iter().cloned().collect(),
                };
                PageQuery::posts().with_follow_src(follow_src)
            }
            FeedSource::Discover => PageQuery::posts(),
            FeedSource::Tag(tag) => PageQuery::filter(Filter::tagged(tag.clone())),
            FeedSource::Custom { filter, controls } => PageQuery::filter(controls.apply(filter)),
            FeedSource::Saved(view) => PageQuery::filter(view.effective_filter()),
        };
        if query.is_unconstrained_filter() {
            return None;
        }
        Some(query.with_block_src(blocks))
    }
}

struct FeedInner {
    source: FeedSource,
    query: Option<PageQuery>,
    state: FeedViewState,
}

/// One mounted feed screen: its source, its state and the machinery to fill
/// it. Methods take `&self` so independent triggers may overlap; results are
/// reconciled through the generation guard.
pub struct FeedView {
    aggregator: BackfillAggregator,
    store: PostStore,
    inner: Mutex<FeedInner>,
}

impl FeedView {
    pub fn new(source: FeedSource, aggregator: BackfillAggregator, store: PostStore) -> Self {
        Self {
            aggregator,
            store,
            inner: Mutex::new(FeedInner {
                source,
                query: None,
                state: FeedViewState::new(),
            }),
        }
    }

    /// Loads the first page if the effective query changed since the list
    /// was built (first mount, blocklist edits, toggled controls).
    pub async fn sync(&self, session: &ViewerSession) -> Option<ApplyOutcome> {
        let (ticket, query) = {
            let mut inner = lock(&self.inner);
            let query = inner.source.query(session);
            let ticket = inner.state.retarget(ViewKey::Query(query.clone()))?;
            tracing::info!(view = %inner.source.title(), "feed reset");
            inner.query = query.clone();
            (ticket, query)
        };
        Some(self.run(ticket, query).await)
    }

    /// Pull-to-refresh: always starts over.
    pub async fn refresh(&self, session: &ViewerSession) -> ApplyOutcome {
        let (ticket, query) = {
            let mut inner = lock(&self.inner);
            let query = inner.source.query(session);
            inner.query = query.clone();
            (inner.state.reset(), query)
        };
        self.run(ticket, query).await
    }

    /// Switches the view to another source and reloads if that changes the
    /// query.
    pub async fn set_source(&self, source: FeedSource, session: &ViewerSession) -> Option<ApplyOutcome> {
        lock(&self.inner).source = source;
        self.sync(session).await
    }

    pub async fn update_controls(
        &self,
        session: &ViewerSession,
        edit: impl FnOnce(&mut FeedControls),
    ) -> Option<ApplyOutcome> {
        {
            let mut inner = lock(&self.inner);
            match &mut inner.source {
                FeedSource::Home { controls } | FeedSource::Custom { controls, .. } => edit(controls),
                _ => return None,
            }
        }
        self.sync(session).await
    }

    /// No-op unless the cursor is a live offset and nothing is in flight.
    pub async fn load_more(&self) -> Option<ApplyOutcome> {
        let (ticket, query) = {
            let mut inner = lock(&self.inner);
            let ticket = inner.state.begin_load_more()?;
            (ticket, inner.query.clone())
        };
        Some(self.run(ticket, query).await)
    }

    async fn run(&self, ticket: FetchTicket, query: Option<PageQuery>) -> ApplyOutcome {
        let result = match &query {
            Some(query) => {
                self.aggregator
                    .backfill(query, ViewContext::TopLevelFeed, ticket.cursor(), Vec::new())
                    .await
            }
            None => Ok(Page::empty()),
        };

        let mut inner = lock(&self.inner);
        if !inner.state.is_current(&ticket) {
            return ApplyOutcome::Stale;
        }
        let result = result.map(|page| {
            self.store.merge_all(&page.items);
            page.map(|post| post.hash)
        });
        inner.state.apply(ticket, result)
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        lock(&self.inner).state.snapshot()
    }

    pub fn source(&self) -> FeedSource {
        lock(&self.inner).source.clone()
    }

    /// Posts of the list in display order, resolved through the store.
    pub fn posts(&self) -> Vec<Post> {
        let inner = lock(&self.inner);
        inner
            .state
            .list()
            .iter()
            .filter_map(|hash| self.store.get(hash))
            .collect()
    }
}
