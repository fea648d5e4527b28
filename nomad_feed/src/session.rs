use std::collections::BTreeSet;

/// Viewer-scoped lists that shape feed queries. Nothing here is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewerSession {
    pub username: Option<String>,
    pub followings: BTreeSet<String>,
    pub blocklist: BTreeSet<String>,
    pub muted: BTreeSet<String>,
}

impl ViewerSession {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Self::default()
        }
    }

    /// Sources sent as `extendBlockSrc`: blocked domains, then muted names.
    pub fn block_sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.blocklist.iter().cloned().collect();
        sources.extend(
            self.muted
                .iter()
                .filter(|name| !self.blocklist.contains(*name))
                .cloned(),
        );
        sources
    }

    pub fn block(&mut self, domain: impl Into<String>) -> bool {
        self.blocklist.insert(domain.into())
    }

    pub fn unblock(&mut self, domain: &str) -> bool {
        self.blocklist.remove(domain)
    }

    pub fn mute(&mut self, name: impl Into<String>) -> bool {
        self.muted.insert(name.into())
    }

    pub fn unmute(&mut self, name: &str) -> bool {
        self.muted.remove(name)
    }

    pub fn follow(&mut self, name: impl Into<String>) -> bool {
        self.followings.insert(name.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_sources_merge_blocklist_and_mutes_once() {
        let mut session = ViewerSession::new("me");
        session.block("spam");
        session.mute("noisy@nomad");
        session.mute("spam");
        assert_eq!(session.block_sources(), vec!["spam", "noisy@nomad"]);
        assert!(session.unmute("noisy@nomad"));
        assert_eq!(session.block_sources(), vec!["spam"]);
    }
}
