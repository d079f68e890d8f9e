//! Subset partitioner.
//!
//! The historian becomes unstable when one request names too many instruments,
//! so each request carries at most `subset_size` of them. Subsets follow registry
//! order; only the last one may be shorter.

use std::fmt;
use std::num::NonZeroUsize;
use std::slice::Chunks;

use crate::domain::InstrumentId;

/// A group of instruments submitted together in one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subset<'a> {
    pub index: usize,
    pub ids: &'a [InstrumentId],
}

impl Subset<'_> {
    /// Comma-joined id list, as the historian expects it in the request path.
    pub fn query_param(&self) -> String {
        self.ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl fmt::Display for Subset<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} [{}]", self.index, self.query_param())
    }
}

/// Lazily yields the subsets of `ids`.
#[derive(Debug, Clone)]
pub struct Subsets<'a> {
    chunks: Chunks<'a, InstrumentId>,
    next_index: usize,
}

impl<'a> Iterator for Subsets<'a> {
    type Item = Subset<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let ids = self.chunks.next()?;
        let index = self.next_index;
        self.next_index += 1;
        Some(Subset { index, ids })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for Subsets<'_> {}

pub fn partition(ids: &[InstrumentId], subset_size: NonZeroUsize) -> Subsets<'_> {
    Subsets {
        chunks: ids.chunks(subset_size.get()),
        next_index: 0,
    }
}

/// `ceil(n / subset_size)`.
pub fn subset_count(n: usize, subset_size: NonZeroUsize) -> usize {
    let k = subset_size.get();
    n / k + usize::from(n % k != 0)
}
