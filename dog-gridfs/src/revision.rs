//! Picking one file among several uploads sharing a filename.
//!
//! Revisions count from the oldest upload (`0`, `1`, ...) or back from the
//! newest (`-1`, `-2`, ...). Uploads are ordered by upload date, ties broken
//! by id allocation order. A catalog answers a revision with a single sorted,
//! skipped, limit-1 query, which is what [`RevisionQuery`] describes.

use serde::{Deserialize, Serialize};

/// Which upload of a filename to select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision(i64);

impl Revision {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The most recent upload
    pub fn latest() -> Self {
        Self(-1)
    }

    /// The first upload
    pub fn oldest() -> Self {
        Self(0)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// Sorted query that selects this revision
    pub fn query(&self) -> RevisionQuery {
        if self.0 >= 0 {
            RevisionQuery {
                order: SortOrder::OldestFirst,
                skip: self.0 as u64,
            }
        } else {
            RevisionQuery {
                order: SortOrder::NewestFirst,
                skip: self.0.unsigned_abs() - 1,
            }
        }
    }
}

impl Default for Revision {
    fn default() -> Self {
        Self::latest()
    }
}

impl From<i64> for Revision {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    OldestFirst,
    NewestFirst,
}

/// `sort(upload date, insertion) + skip(n) + limit(1)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionQuery {
    pub order: SortOrder,
    pub skip: u64,
}

impl RevisionQuery {
    /// Apply the query to candidates already in oldest-to-newest order
    pub fn select<T>(&self, mut ordered: Vec<T>) -> Option<T> {
        let skip = usize::try_from(self.skip).ok()?;
        if skip >= ordered.len() {
            return None;
        }
        let index = match self.order {
            SortOrder::OldestFirst => skip,
            SortOrder::NewestFirst => ordered.len() - 1 - skip,
        };
        Some(ordered.swap_remove(index))
    }
}

/// Select `revision` among `candidates`, ordering them by `key` (oldest first)
pub fn resolve<T, K, F>(mut candidates: Vec<T>, revision: Revision, key: F) -> Option<T>
where
    K: Ord,
    F: FnMut(&T) -> K,
{
    candidates.sort_by_key(key);
    revision.query().select(candidates)
}
