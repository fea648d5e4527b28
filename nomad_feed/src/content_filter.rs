//! Local visibility rules. Block and mute lists are not checked here: the
//! indexer resolves them through `extendBlockSrc`, since domain hierarchy
//! makes plain set membership wrong.

use crate::models::Post;

/// Where a batch of posts is going to be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewContext {
    /// Home, discover, tag, custom and saved feeds. Replies never appear as
    /// top-level entries here.
    TopLevelFeed,
    /// Reply lists under a thread node.
    Thread,
}

pub fn keep(post: &Post, context: ViewContext) -> bool {
    if context == ViewContext::TopLevelFeed && post.is_reply() {
        return false;
    }
    !post.has_hidden_topic()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{post, reply};

    #[test]
    fn feeds_drop_replies_but_threads_keep_them() {
        let reply = reply("r1", "root");
        assert!(!keep(&reply, ViewContext::TopLevelFeed));
        assert!(keep(&reply, ViewContext::Thread));
        assert!(keep(&post("p1"), ViewContext::TopLevelFeed));
    }

    #[test]
    fn hidden_topics_are_dropped_everywhere() {
        let mut hidden = post("p1");
        hidden.topic = ".display_name".into();
        assert!(!keep(&hidden, ViewContext::TopLevelFeed));
        assert!(!keep(&hidden, ViewContext::Thread));

        let mut visible = post("p2");
        visible.topic = "rust".into();
        assert!(keep(&visible, ViewContext::TopLevelFeed));
    }
}
