//! Page index change messages.
//!
//! Every structural page mutation is described by one [`IndexChange`]. Any
//! state keyed by page index (render cache entries, bookmark targets,
//! annotation owners) can be brought up to date by mapping its old index
//! through the change.

/// A single structural change to a document's page order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexChange {
    /// `count` pages were inserted starting at `at`.
    Inserted { at: usize, count: usize },
    /// The pages at these (pre-change) indices were removed. Sorted, unique.
    Removed { indices: Vec<usize> },
    /// One page moved from `from` to `to`.
    Moved { from: usize, to: usize },
    /// The page's pixels changed; its index did not.
    ContentChanged { index: usize },
    /// Everything index-keyed must be dropped (close, reopen).
    Reset,
}

impl IndexChange {
    /// Builds a `Removed` change, sorting and deduplicating `indices`.
    pub fn removed(indices: impl IntoIterator<Item = usize>) -> Self {
        let mut indices: Vec<usize> = indices.into_iter().collect();
        indices.sort_unstable();
        indices.dedup();
        Self::Removed { indices }
    }

    /// Maps a pre-change page index to its post-change index.
    ///
    /// Returns `None` when the page no longer exists.
    pub fn map(&self, old: usize) -> Option<usize> {
        match self {
            Self::Inserted { at, count } => Some(if old >= *at { old + count } else { old }),
            Self::Removed { indices } => match indices.binary_search(&old) {
                Ok(_) => None,
                Err(below) => Some(old - below),
            },
            Self::Moved { from, to } => Some(match (*from, *to) {
                (from, to) if old == from => to,
                (from, to) if from < to && old > from && old <= to => old - 1,
                (from, to) if to < from && old >= to && old < from => old + 1,
                _ => old,
            }),
            Self::ContentChanged { .. } => Some(old),
            Self::Reset => None,
        }
    }

    /// True when rendered output for page `old` is no longer valid, even if
    /// the page itself survives.
    pub fn invalidates_content(&self, old: usize) -> bool {
        match self {
            Self::ContentChanged { index } => *index == old,
            Self::Reset => true,
            _ => self.map(old).is_none(),
        }
    }

    /// True when no index changes position.
    pub fn is_identity(&self) -> bool {
        match self {
            Self::Inserted { count, .. } => *count == 0,
            Self::Removed { indices } => indices.is_empty(),
            Self::Moved { from, to } => from == to,
            Self::ContentChanged { .. } => true,
            Self::Reset => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inserted_shifts_following_pages() {
        let change = IndexChange::Inserted { at: 2, count: 3 };
        assert_eq!(change.map(0), Some(0));
        assert_eq!(change.map(1), Some(1));
        assert_eq!(change.map(2), Some(5));
        assert_eq!(change.map(9), Some(12));
    }

    #[test]
    fn test_removed_drops_and_compacts() {
        let change = IndexChange::removed([8, 2, 5, 5]);
        assert_eq!(change, IndexChange::Removed { indices: vec![2, 5, 8] });
        assert_eq!(change.map(0), Some(0));
        assert_eq!(change.map(2), None);
        assert_eq!(change.map(3), Some(2));
        assert_eq!(change.map(7), Some(5));
        assert_eq!(change.map(9), Some(6));
    }

    #[test]
    fn test_moved_forward() {
        let change = IndexChange::Moved { from: 1, to: 4 };
        let mapped: Vec<_> = (0..6).map(|i| change.map(i).unwrap()).collect();
        assert_eq!(mapped, vec![0, 4, 1, 2, 3, 5]);
    }

    #[test]
    fn test_moved_backward() {
        let change = IndexChange::Moved { from: 4, to: 1 };
        let mapped: Vec<_> = (0..6).map(|i| change.map(i).unwrap()).collect();
        assert_eq!(mapped, vec![0, 2, 3, 4, 1, 5]);
    }

    #[test]
    fn test_content_change_keeps_index() {
        let change = IndexChange::ContentChanged { index: 3 };
        assert_eq!(change.map(3), Some(3));
        assert!(change.invalidates_content(3));
        assert!(!change.invalidates_content(2));
        assert!(change.is_identity());
    }

    #[test]
    fn test_reset_drops_everything() {
        assert_eq!(IndexChange::Reset.map(0), None);
        assert!(IndexChange::Reset.invalidates_content(7));
    }
}
