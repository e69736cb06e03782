//! Half-open token ranges on the 64-bit partitioner ring.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A `(start, end]` interval on the token ring.
///
/// A range with `start >= end` wraps past the end of the ring; `start == end`
/// is the whole ring. Ranges order by start, then end. All ranges share the
/// single i64 ring of the partitioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenRange {
    pub start: i64,
    pub end: i64,
}

impl TokenRange {
    pub const fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn is_full_ring(&self) -> bool {
        self.start == self.end
    }

    /// True when the range passes the highest token and continues from the lowest.
    pub fn wraps_around(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains_token(&self, token: i64) -> bool {
        if self.is_full_ring() {
            true
        } else if self.wraps_around() {
            token > self.start || token <= self.end
        } else {
            token > self.start && token <= self.end
        }
    }

    pub fn overlaps(&self, other: &TokenRange) -> bool {
        if self.is_full_ring() || other.is_full_ring() {
            return true;
        }

        self.segments()
            .into_iter()
            .flatten()
            .any(|(lo, hi)| {
                other
                    .segments()
                    .into_iter()
                    .flatten()
                    .any(|(other_lo, other_hi)| lo.max(other_lo) < hi.min(other_hi))
            })
    }

    /// Number of tokens covered by the range.
    pub fn size(&self) -> u128 {
        if self.is_full_ring() {
            return 1u128 << 64;
        }
        self.segments()
            .into_iter()
            .flatten()
            .map(|(lo, hi)| (hi - lo) as u128)
            .sum()
    }

    /// The range split into at most two non-wrapping `(lo, hi]` pieces,
    /// widened to i128 so the lowest token is representable as an exclusive bound.
    fn segments(&self) -> [Option<(i128, i128)>; 2] {
        let start = i128::from(self.start);
        let end = i128::from(self.end);
        if self.wraps_around() {
            [
                Some((start, i128::from(i64::MAX))),
                Some((i128::from(i64::MIN) - 1, end)),
            ]
        } else {
            [Some((start, end)), None]
        }
    }
}

impl fmt::Display for TokenRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{}]", self.start, self.end)
    }
}

/// Formats ranges the way the storage service prints them in repair messages,
/// e.g. `[(0,100], (100,200]]`.
pub fn format_range_list<'a>(ranges: impl IntoIterator<Item = &'a TokenRange>) -> String {
    let parts: Vec<String> = ranges.into_iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}
