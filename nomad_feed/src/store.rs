use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::models::Post;

/// Process-wide post cache keyed by hash.
///
/// Entries are never evicted, so the store grows for the lifetime of the
/// process. Posts are immutable apart from their server-reported counters;
/// merging an already-known hash only refreshes `meta`, which makes merges
/// idempotent and safe from any task.
#[derive(Clone, Default)]
pub struct PostStore {
    posts: Arc<RwLock<HashMap<String, Post>>>,
}

impl PostStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the hash was not known before.
    pub fn merge(&self, post: &Post) -> bool {
        let mut posts = self.posts.write().unwrap_or_else(PoisonError::into_inner);
        match posts.get_mut(&post.hash) {
            Some(existing) => {
                existing.meta = post.meta;
                false
            }
            None => {
                posts.insert(post.hash.clone(), post.clone());
                true
            }
        }
    }

    pub fn merge_all<'a>(&self, posts: impl IntoIterator<Item = &'a Post>) -> usize {
        posts.into_iter().filter(|post| self.merge(post)).count()
    }

    pub fn get(&self, hash: &str) -> Option<Post> {
        self.posts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hash)
            .cloned()
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.posts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.posts.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::post;

    #[test]
    fn merge_refreshes_counts_only() {
        let store = PostStore::new();
        let original = post("abc");
        assert!(store.merge(&original));

        let mut later = original.clone();
        later.content = "edited elsewhere".into();
        later.meta.reply_count = 7;
        assert!(!store.merge(&later));

        let stored = store.get("abc").expect("stored");
        assert_eq!(stored.content, original.content);
        assert_eq!(stored.meta.reply_count, 7);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn clones_share_entries() {
        let store = PostStore::new();
        let handle = store.clone();
        handle.merge(&post("abc"));
        assert!(store.contains("abc"));
    }
}
