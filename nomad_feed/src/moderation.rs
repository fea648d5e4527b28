use std::collections::{HashMap, HashSet};

/// Tracks, per thread node, which "remove moderation" flag its children were
/// last fetched under and which one the viewer currently wants.
///
/// A node is invalidated only on an actual transition of that flag, and at
/// most one invalidation per node runs at a time. Requests made while one is
/// pending only overwrite the desired flag, so any number of them coalesce
/// into the latest value. Once the pending invalidation completes, the owner
/// calls [`begin`](Self::begin) again, which starts one more invalidation if
/// that latest value differs from the applied one.
#[derive(Debug, Default)]
pub struct ModerationInvalidator {
    last_applied: HashMap<String, bool>,
    desired: HashMap<String, bool>,
    pending: HashSet<String>,
}

impl ModerationInvalidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag the node's children currently reflect. Unknown nodes are moderated.
    pub fn last_applied(&self, hash: &str) -> bool {
        self.last_applied.get(hash).copied().unwrap_or(false)
    }

    pub fn desired(&self, hash: &str) -> bool {
        self.desired
            .get(hash)
            .copied()
            .unwrap_or_else(|| self.last_applied(hash))
    }

    /// Registers a node whose children were first fetched under `flag`.
    pub fn record(&mut self, hash: &str, flag: bool) {
        self.last_applied.insert(hash.to_string(), flag);
        self.desired.insert(hash.to_string(), flag);
    }

    /// Stores the viewer's choice. Returns `true` if it differs from what the
    /// node's children reflect.
    pub fn request(&mut self, hash: &str, remove_moderation: bool) -> bool {
        self.desired.insert(hash.to_string(), remove_moderation);
        self.last_applied(hash) != remove_moderation
    }

    /// Claims an invalidation of `hash`, returning the flag to refetch under.
    /// `None` when nothing changed or one is already running for that node.
    pub fn begin(&mut self, hash: &str) -> Option<bool> {
        if self.pending.contains(hash) {
            return None;
        }
        let desired = self.desired(hash);
        if self.last_applied(hash) == desired {
            return None;
        }
        self.pending.insert(hash.to_string());
        self.last_applied.insert(hash.to_string(), desired);
        Some(desired)
    }

    pub fn complete(&mut self, hash: &str) {
        self.pending.remove(hash);
    }

    pub fn is_pending(&self, hash: &str) -> bool {
        self.pending.contains(hash)
    }

    /// Drops state for nodes removed from the tree.
    pub fn forget<'a>(&mut self, hashes: impl IntoIterator<Item = &'a String>) {
        for hash in hashes {
            self.last_applied.remove(hash);
            self.desired.remove(hash);
            self.pending.remove(hash);
        }
    }
}
