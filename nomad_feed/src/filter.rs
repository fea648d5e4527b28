use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Declarative query posted to `/filter`. Field order follows the wire body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(default)]
    pub posted_by: Vec<String>,
    #[serde(default)]
    pub replied_by: Vec<String>,
    #[serde(default)]
    pub liked_by: Vec<String>,
    #[serde(default)]
    pub post_hashes: Vec<String>,
    #[serde(default)]
    pub parent_hashes: Vec<String>,
    #[serde(default)]
    pub allowed_tags: Vec<String>,
}

impl Filter {
    /// Filter matching the direct replies of one post.
    pub fn replies_to(hash: impl Into<String>) -> Self {
        Self {
            parent_hashes: vec![hash.into()],
            ..Self::default()
        }
    }

    /// Everyone's posts, replies and likes carrying `tag`.
    pub fn tagged(tag: impl Into<String>) -> Self {
        Self {
            posted_by: vec!["*".into()],
            replied_by: vec!["*".into()],
            liked_by: vec!["*".into()],
            allowed_tags: vec![tag.into()],
            ..Self::default()
        }
    }

    /// An all-empty filter would ask the indexer for everything; callers must
    /// answer it locally with an empty list.
    pub fn is_empty(&self) -> bool {
        self.posted_by.is_empty()
            && self.replied_by.is_empty()
            && self.liked_by.is_empty()
            && self.post_hashes.is_empty()
            && self.parent_hashes.is_empty()
            && self.allowed_tags.is_empty()
    }
}

/// Feed control panel: what kinds of activity to show plus per-user and
/// per-tag switches. An override of `false` removes that entry; absent
/// entries are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedControls {
    pub show_posts: bool,
    pub show_likes: bool,
    pub show_replies: bool,
    pub user_overrides: BTreeMap<String, bool>,
    pub tag_overrides: BTreeMap<String, bool>,
}

impl Default for FeedControls {
    fn default() -> Self {
        Self {
            show_posts: true,
            show_likes: true,
            show_replies: true,
            user_overrides: BTreeMap::new(),
            tag_overrides: BTreeMap::new(),
        }
    }
}

impl FeedControls {
    pub fn shows_anything(&self) -> bool {
        self.show_posts || self.show_likes || self.show_replies
    }

    pub fn apply(&self, filter: &Filter) -> Filter {
        let users = |names: &[String]| -> Vec<String> {
            names
                .iter()
                .filter(|name| self.user_overrides.get(*name).copied().unwrap_or(true))
                .cloned()
                .collect()
        };
        Filter {
            posted_by: if self.show_posts { users(&filter.posted_by) } else { Vec::new() },
            replied_by: if self.show_replies { users(&filter.replied_by) } else { Vec::new() },
            liked_by: if self.show_likes { users(&filter.liked_by) } else { Vec::new() },
            post_hashes: if self.show_posts { filter.post_hashes.clone() } else { Vec::new() },
            parent_hashes: if self.show_replies { filter.parent_hashes.clone() } else { Vec::new() },
            allowed_tags: filter
                .allowed_tags
                .iter()
                .filter(|tag| self.tag_overrides.get(*tag).copied().unwrap_or(true))
                .cloned()
                .collect(),
        }
    }
}

/// A user-saved filter plus the ad-hoc users/tags added to or removed from it
/// while browsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedView {
    pub title: String,
    pub filter: Filter,
    #[serde(default)]
    pub override_users: BTreeSet<String>,
    #[serde(default)]
    pub override_tags: BTreeSet<String>,
    #[serde(default)]
    pub subtract_users: BTreeSet<String>,
    #[serde(default)]
    pub subtract_tags: BTreeSet<String>,
}

impl SavedView {
    pub fn effective_filter(&self) -> Filter {
        let mut users = self.override_users.clone();
        let mut tags = self.override_tags.clone();
        users.extend(self.filter.posted_by.iter().cloned());
        tags.extend(self.filter.allowed_tags.iter().cloned());
        users.retain(|user| !self.subtract_users.contains(user));
        tags.retain(|tag| !self.subtract_tags.contains(tag));

        let posted_by = if !users.is_empty() {
            users.into_iter().collect()
        } else if !tags.is_empty() {
            vec!["*".to_string()]
        } else {
            Vec::new()
        };
        Filter {
            posted_by,
            allowed_tags: tags.into_iter().collect(),
            ..Filter::default()
        }
    }
}
