/// Identity of one fetch relative to the state that launched it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenerationTag(u64);

/// Counter bumped on every reset of a view or thread node. In-flight requests
/// cannot be aborted, so each result carries the tag it was started under and
/// is dropped if the counter has moved on since.
#[derive(Debug, Default)]
pub struct TaskGeneration {
    current: u64,
}

impl TaskGeneration {
    pub fn current(&self) -> GenerationTag {
        GenerationTag(self.current)
    }

    /// Invalidates every tag handed out so far.
    pub fn advance(&mut self) -> GenerationTag {
        self.current += 1;
        GenerationTag(self.current)
    }

    pub fn is_current(&self, tag: GenerationTag) -> bool {
        tag.0 == self.current
    }
}
