use serde::{Deserialize, Serialize};

/// Pagination position of a view or thread node.
///
/// `Start` has not fetched yet, `Offset(n)` resumes at `n`, and `Exhausted`
/// means the server has nothing further; no fetch may be issued from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Cursor {
    #[default]
    Start,
    Offset(u64),
    Exhausted,
}

impl Cursor {
    /// Normalises a wire `next` value. Missing, negative and zero offsets all
    /// end pagination: a "next page" at offset zero would restart the listing.
    pub fn from_wire(next: Option<i64>) -> Self {
        match next {
            Some(offset) if offset > 0 => Cursor::Offset(offset as u64),
            _ => Cursor::Exhausted,
        }
    }

    /// The value of the `-1`/`null`/offset wire convention.
    pub fn to_wire(self) -> Option<i64> {
        match self {
            Cursor::Start => None,
            Cursor::Offset(offset) => Some(offset as i64),
            Cursor::Exhausted => Some(-1),
        }
    }

    /// Offset to put in the query string, if any. The first page carries none.
    pub fn query_offset(self) -> Option<u64> {
        match self {
            Cursor::Offset(offset) if offset > 0 => Some(offset),
            _ => None,
        }
    }

    pub fn is_exhausted(self) -> bool {
        matches!(self, Cursor::Exhausted)
    }

    /// Whether a "load more" may be issued from here.
    pub fn can_load_more(self) -> bool {
        matches!(self, Cursor::Offset(_))
    }
}
