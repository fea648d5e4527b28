use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;

use crate::backfill::BackfillAggregator;
use crate::config::FeedConfig;
use crate::content_filter::ViewContext;
use crate::cursor::Cursor;
use crate::error::{FeedError, FeedResult};
use crate::feed::{ApplyOutcome, FeedViewState, FetchTicket, LoadPhase};
use crate::fetcher::{PageFetcher, PageQuery};
use crate::filter::Filter;
use crate::models::{ModerationSetting, Page, Post};
use crate::moderation::ModerationInvalidator;
use crate::session::ViewerSession;
use crate::store::PostStore;
use crate::utils::lock;

static NODE_INSTANCES: AtomicU64 = AtomicU64::new(0);

/// Resolves posts by hash and walks parent pointers above a selected post.
pub struct ThreadAssembler {
    fetcher: Arc<dyn PageFetcher>,
    store: PostStore,
    max_depth: usize,
}

impl ThreadAssembler {
    pub fn new(fetcher: Arc<dyn PageFetcher>, store: PostStore, max_depth: usize) -> Self {
        Self {
            fetcher,
            store,
            max_depth,
        }
    }

    /// Store first, then `GET /posts/:hash`. Fetched posts are merged.
    pub async fn resolve(&self, hash: &str) -> FeedResult<Option<Post>> {
        if let Some(post) = self.store.get(hash) {
            return Ok(Some(post));
        }
        let post = self.fetcher.fetch_post(hash).await?;
        if let Some(post) = &post {
            self.store.merge(post);
        }
        Ok(post)
    }

    /// Ancestors of `hash`, oldest first, at most `max_depth` of them.
    ///
    /// Never fails: a hop that errors or cannot be found ends the walk and the
    /// chain collected so far is returned.
    pub async fn query_parents(&self, hash: &str) -> Vec<String> {
        let mut chain = VecDeque::new();
        let mut visited = HashSet::from([hash.to_string()]);
        let mut current = match self.resolve(hash).await {
            Ok(Some(post)) => post,
            Ok(None) => return Vec::new(),
            Err(err) => {
                tracing::warn!(%hash, error = %err, "could not resolve post for ancestor walk");
                return Vec::new();
            }
        };

        while let Some(parent) = current.parent.take() {
            if chain.len() >= self.max_depth {
                tracing::debug!(%hash, depth = chain.len(), "ancestor walk reached depth cap");
                break;
            }
            if !visited.insert(parent.clone()) {
                tracing::warn!(%hash, %parent, "parent chain loops back on itself");
                break;
            }
            match self.resolve(&parent).await {
                Ok(Some(post)) => {
                    chain.push_front(post.hash.clone());
                    current = post;
                }
                Ok(None) => {
                    tracing::debug!(%hash, %parent, "ancestor not known to the indexer");
                    break;
                }
                Err(err) => {
                    tracing::warn!(%hash, %parent, error = %err, "ancestor walk truncated");
                    break;
                }
            }
        }
        chain.into()
    }
}

/// Ticket for one child fetch of one node instance. A node removed and later
/// recreated under the same hash does not accept the old node's results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeTicket {
    instance: u64,
    fetch: FetchTicket,
}

#[derive(Debug)]
pub struct ThreadNode {
    instance: u64,
    hash: String,
    creator: String,
    moderation: Option<ModerationSetting>,
    depth: usize,
    expanded: bool,
    remove_moderation: bool,
    children: FeedViewState,
}

impl ThreadNode {
    fn new(post: &Post, depth: usize, expanded: bool, remove_moderation: bool) -> Self {
        Self {
            instance: NODE_INSTANCES.fetch_add(1, Ordering::Relaxed),
            hash: post.hash.clone(),
            creator: post.creator.clone(),
            moderation: post.moderation_setting,
            depth,
            expanded,
            remove_moderation,
            children: FeedViewState::new(),
        }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn remove_moderation(&self) -> bool {
        self.remove_moderation
    }

    /// Direct replies fetched so far, in server order.
    pub fn children(&self) -> &[String] {
        self.children.list()
    }

    pub fn cursor(&self) -> Cursor {
        self.children.cursor()
    }

    pub fn can_load_more(&self) -> bool {
        self.children.can_load_more()
    }

    pub fn error(&self) -> Option<&str> {
        self.children.error()
    }

    /// Replies to this node, with the author's moderation setting pushed to
    /// the indexer unless the viewer removed it.
    fn child_query(&self, block_src: &[String]) -> PageQuery {
        let query = PageQuery::filter(Filter::replies_to(self.hash.clone()))
            .with_block_src(block_src.iter().cloned());
        if self.remove_moderation {
            return query;
        }
        match self.moderation {
            Some(ModerationSetting::NoBlocks) => query.with_block_src([self.creator.clone()]),
            Some(ModerationSetting::FollowsOnly) => query.with_follow_src([self.creator.clone()]),
            _ => query,
        }
    }
}

/// One rendered line of a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRow {
    pub hash: String,
    pub depth: usize,
    pub expanded: bool,
    pub replies: usize,
    pub can_load_more: bool,
    pub loading: bool,
    pub error: Option<String>,
}

/// Reply tree under a selected post. Each node owns its children list,
/// cursor and generation; nothing is shared between siblings.
pub struct ThreadTree {
    root: String,
    nodes: HashMap<String, ThreadNode>,
    auto_expand_depth: usize,
    block_src: Vec<String>,
    moderation: ModerationInvalidator,
}

impl ThreadTree {
    pub fn new(root: &Post, auto_expand_depth: usize, block_src: Vec<String>) -> Self {
        let mut moderation = ModerationInvalidator::new();
        moderation.record(&root.hash, false);
        let mut nodes = HashMap::new();
        nodes.insert(root.hash.clone(), ThreadNode::new(root, 0, true, false));
        Self {
            root: root.hash.clone(),
            nodes,
            auto_expand_depth,
            block_src,
            moderation,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn node(&self, hash: &str) -> Option<&ThreadNode> {
        self.nodes.get(hash)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Starts the first children fetch of a node that has never loaded.
    pub fn begin_load(&mut self, hash: &str) -> Option<(NodeTicket, PageQuery)> {
        let node = self.nodes.get_mut(hash)?;
        if node.children.phase() != LoadPhase::Idle {
            return None;
        }
        let fetch = node.children.reset();
        Some((
            NodeTicket {
                instance: node.instance,
                fetch,
            },
            node.child_query(&self.block_src),
        ))
    }

    pub fn begin_load_more(&mut self, hash: &str) -> Option<(NodeTicket, PageQuery)> {
        let node = self.nodes.get_mut(hash)?;
        let fetch = node.children.begin_load_more()?;
        Some((
            NodeTicket {
                instance: node.instance,
                fetch,
            },
            node.child_query(&self.block_src),
        ))
    }

    pub fn is_current(&self, hash: &str, ticket: &NodeTicket) -> bool {
        self.nodes
            .get(hash)
            .is_some_and(|node| node.instance == ticket.instance && node.children.is_current(&ticket.fetch))
    }

    /// Applies a children page. New replies become nodes one level deeper,
    /// expanded while within the auto-expand depth, inheriting the parent's
    /// moderation choice.
    pub fn apply(&mut self, hash: &str, ticket: NodeTicket, result: FeedResult<Page<Post>>) -> ApplyOutcome {
        if !self.is_current(hash, &ticket) {
            return ApplyOutcome::Stale;
        }
        let Some(parent) = self.nodes.get(hash) else {
            return ApplyOutcome::Stale;
        };
        let depth = parent.depth + 1;
        let inherited = parent.remove_moderation;

        let result = result.map(|page| {
            for post in &page.items {
                if self.nodes.contains_key(&post.hash) {
                    continue;
                }
                let expanded = depth <= self.auto_expand_depth;
                self.nodes
                    .insert(post.hash.clone(), ThreadNode::new(post, depth, expanded, inherited));
                self.moderation.record(&post.hash, inherited);
            }
            page.map(|post| post.hash)
        });

        match self.nodes.get_mut(hash) {
            Some(node) => node.children.apply(ticket.fetch, result),
            None => ApplyOutcome::Stale,
        }
    }

    /// Pure view flag; fetched children are kept.
    pub fn toggle(&mut self, hash: &str) -> Option<bool> {
        let node = self.nodes.get_mut(hash)?;
        node.expanded = !node.expanded;
        Some(node.expanded)
    }

    pub fn set_expanded(&mut self, hash: &str, expanded: bool) -> bool {
        match self.nodes.get_mut(hash) {
            Some(node) => {
                node.expanded = expanded;
                true
            }
            None => false,
        }
    }

    /// Records the viewer's moderation choice for a node. Returns `true` when
    /// an invalidation is due.
    pub fn request_moderation(&mut self, hash: &str, remove_moderation: bool) -> bool {
        self.nodes.contains_key(hash) && self.moderation.request(hash, remove_moderation)
    }

    /// Clears a node's children and cursor, drops its descendant nodes and
    /// starts a fresh first page under the new moderation flag. Siblings and
    /// ancestors are untouched.
    pub fn begin_invalidation(&mut self, hash: &str) -> Option<(NodeTicket, PageQuery)> {
        if !self.nodes.contains_key(hash) {
            return None;
        }
        let remove_moderation = self.moderation.begin(hash)?;
        let removed = self.descendants(hash);
        for descendant in &removed {
            self.nodes.remove(descendant);
        }
        self.moderation.forget(&removed);

        let node = self.nodes.get_mut(hash)?;
        node.remove_moderation = remove_moderation;
        let fetch = node.children.reset();
        tracing::info!(%hash, remove_moderation, dropped = removed.len(), "thread node invalidated");
        Some((
            NodeTicket {
                instance: node.instance,
                fetch,
            },
            node.child_query(&self.block_src),
        ))
    }

    /// Switches the viewer's block sources. Every reply query depends on
    /// them, so the tree falls back to the root and restarts its first page;
    /// loads still in flight become stale. `None` when nothing changed.
    pub fn retarget_blocks(&mut self, block_src: Vec<String>) -> Option<(NodeTicket, PageQuery)> {
        if self.block_src == block_src {
            return None;
        }
        self.block_src = block_src;
        let removed = self.descendants(&self.root);
        for descendant in &removed {
            self.nodes.remove(descendant);
        }
        self.moderation.forget(&removed);

        let node = self.nodes.get_mut(&self.root)?;
        let fetch = node.children.reset();
        tracing::info!(root = %self.root, dropped = removed.len(), "thread reset after blocklist change");
        Some((
            NodeTicket {
                instance: node.instance,
                fetch,
            },
            node.child_query(&self.block_src),
        ))
    }

    pub fn finish_invalidation(&mut self, hash: &str) {
        self.moderation.complete(hash);
    }

    fn descendants(&self, hash: &str) -> Vec<String> {
        let mut found = Vec::new();
        let mut visited = HashSet::from([hash.to_string()]);
        let mut queue = VecDeque::from([hash.to_string()]);
        while let Some(current) = queue.pop_front() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            for child in node.children() {
                if visited.insert(child.clone()) {
                    found.push(child.clone());
                    queue.push_back(child.clone());
                }
            }
        }
        found
    }

    /// Rows in display order: each node followed by its subtree when
    /// expanded.
    pub fn rows(&self) -> Vec<ThreadRow> {
        let mut rows = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![self.root.clone()];
        while let Some(hash) = stack.pop() {
            if !visited.insert(hash.clone()) {
                continue;
            }
            let Some(node) = self.nodes.get(&hash) else {
                continue;
            };
            rows.push(ThreadRow {
                hash: node.hash.clone(),
                depth: node.depth,
                expanded: node.expanded,
                replies: node.children().len(),
                can_load_more: node.can_load_more(),
                loading: node.children.is_loading(),
                error: node.error().map(str::to_string),
            });
            if node.expanded {
                stack.extend(node.children().iter().rev().cloned());
            }
        }
        rows
    }
}

/// Async driver for the thread of the currently selected post.
pub struct ThreadController {
    aggregator: BackfillAggregator,
    assembler: ThreadAssembler,
    store: PostStore,
    auto_expand_depth: usize,
    tree: Mutex<Option<ThreadTree>>,
    ancestors: Mutex<Vec<String>>,
}

impl ThreadController {
    pub fn new(fetcher: Arc<dyn PageFetcher>, store: PostStore, config: &FeedConfig) -> Self {
        Self {
            aggregator: BackfillAggregator::new(fetcher.clone(), config.page_size),
            assembler: ThreadAssembler::new(fetcher, store.clone(), config.ancestor_depth),
            store,
            auto_expand_depth: config.auto_expand_depth,
            tree: Mutex::new(None),
            ancestors: Mutex::new(Vec::new()),
        }
    }

    pub fn assembler(&self) -> &ThreadAssembler {
        &self.assembler
    }

    /// Selects `hash`: walks its ancestors while loading every reply level
    /// that starts expanded. Fails only if the post itself cannot be
    /// resolved.
    pub async fn open(&self, hash: &str, session: &ViewerSession) -> FeedResult<Vec<ApplyOutcome>> {
        let root = self
            .assembler
            .resolve(hash)
            .await?
            .ok_or_else(|| FeedError::NotFound(hash.to_string()))?;
        *lock(&self.tree) = Some(ThreadTree::new(
            &root,
            self.auto_expand_depth,
            session.block_sources(),
        ));
        lock(&self.ancestors).clear();
        tracing::info!(%hash, "thread opened");

        let (ancestors, outcomes) = tokio::join!(self.assembler.query_parents(hash), self.load_visible());
        if self.root().as_deref() == Some(hash) {
            *lock(&self.ancestors) = ancestors;
        }
        Ok(outcomes)
    }

    /// Reloads the open thread when the viewer's blocklist or mutes changed
    /// since it was built. `None` when there is no thread or nothing changed.
    pub async fn sync(&self, session: &ViewerSession) -> Option<Vec<ApplyOutcome>> {
        let (root, ticket, query) = {
            let mut guard = lock(&self.tree);
            let tree = guard.as_mut()?;
            let (ticket, query) = tree.retarget_blocks(session.block_sources())?;
            (tree.root().to_string(), ticket, query)
        };
        let mut outcomes = vec![self.run(&root, ticket, query).await];
        outcomes.extend(self.load_visible().await);
        Some(outcomes)
    }

    pub fn root(&self) -> Option<String> {
        lock(&self.tree).as_ref().map(|tree| tree.root().to_string())
    }

    pub fn ancestors(&self) -> Vec<String> {
        lock(&self.ancestors).clone()
    }

    pub fn rows(&self) -> Vec<ThreadRow> {
        lock(&self.tree)
            .as_ref()
            .map(ThreadTree::rows)
            .unwrap_or_default()
    }

    pub fn children(&self, hash: &str) -> Option<Vec<String>> {
        let tree = lock(&self.tree);
        tree.as_ref()?.node(hash).map(|node| node.children().to_vec())
    }

    /// Loads children of every visible node that has never loaded, level by
    /// level, until a wave starts nothing new.
    pub async fn load_visible(&self) -> Vec<ApplyOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let wave: Vec<(String, NodeTicket, PageQuery)> = {
                let mut guard = lock(&self.tree);
                let Some(tree) = guard.as_mut() else {
                    break;
                };
                tree.rows()
                    .into_iter()
                    .filter_map(|row| {
                        tree.begin_load(&row.hash)
                            .map(|(ticket, query)| (row.hash, ticket, query))
                    })
                    .collect()
            };
            if wave.is_empty() {
                break;
            }
            let results = join_all(
                wave.into_iter()
                    .map(|(hash, ticket, query)| async move { self.run(&hash, ticket, query).await }),
            )
            .await;
            outcomes.extend(results);
        }
        outcomes
    }

    /// Next page of one node's replies; no-op while that node is loading or
    /// once its cursor is exhausted.
    pub async fn load_more(&self, hash: &str) -> Option<ApplyOutcome> {
        let (ticket, query) = lock(&self.tree).as_mut()?.begin_load_more(hash)?;
        Some(self.run(hash, ticket, query).await)
    }

    pub fn toggle(&self, hash: &str) -> Option<bool> {
        lock(&self.tree).as_mut()?.toggle(hash)
    }

    pub fn set_expanded(&self, hash: &str, expanded: bool) -> bool {
        lock(&self.tree)
            .as_mut()
            .is_some_and(|tree| tree.set_expanded(hash, expanded))
    }

    /// Shows (or hides again) replies the author's moderation setting would
    /// filter out. Refetches only `hash`'s subtree, and only when the flag
    /// actually changes. A call made while that node is already refetching
    /// returns `None` at once; its flag is applied by the running call, which
    /// refetches once more after finishing if the latest flag differs.
    /// Returns the outcome of the last refetch of that node.
    pub async fn set_remove_moderation(&self, hash: &str, remove_moderation: bool) -> Option<ApplyOutcome> {
        if !lock(&self.tree).as_mut()?.request_moderation(hash, remove_moderation) {
            return None;
        }

        let mut last = None;
        loop {
            let claimed = lock(&self.tree)
                .as_mut()
                .and_then(|tree| tree.begin_invalidation(hash));
            let Some((ticket, query)) = claimed else {
                break;
            };
            let outcome = self.run(hash, ticket, query).await;
            if let Some(tree) = lock(&self.tree).as_mut() {
                tree.finish_invalidation(hash);
            }
            last = Some(outcome);
        }
        if last.is_some() {
            self.load_visible().await;
        }
        last
    }

    async fn run(&self, hash: &str, ticket: NodeTicket, query: PageQuery) -> ApplyOutcome {
        let result = self
            .aggregator
            .backfill(&query, ViewContext::Thread, ticket.fetch.cursor(), Vec::new())
            .await;

        let mut guard = lock(&self.tree);
        let Some(tree) = guard.as_mut() else {
            return ApplyOutcome::Stale;
        };
        if !tree.is_current(hash, &ticket) {
            tracing::debug!(%hash, "dropping replies from a superseded fetch");
            return ApplyOutcome::Stale;
        }
        if let Ok(page) = &result {
            self.store.merge_all(&page.items);
        }
        tree.apply(hash, ticket, result)
    }
}
