//! Hash slot ranges
//!
//! The key space is split into [`TOTAL_SLOTS`] hash slots. Ranges here are
//! half-open (`start..end`); the cluster protocol prints them inclusive
//! (`0-5461`), which [`SlotRange::parse`] and the `Display` impl translate.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed number of hash slots in a cluster.
pub const TOTAL_SLOTS: u16 = 16384;

/// A contiguous, non-empty run of slots `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
}

impl SlotRange {
    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start >= end || end > TOTAL_SLOTS {
            return Err(Error::InvalidTopology(format!(
                "invalid slot range [{}, {})",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Number of slots in the range.
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn overlaps(&self, other: &SlotRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn slots(&self) -> impl Iterator<Item = u16> {
        self.start..self.end
    }

    /// Parse one slot entry of a `CLUSTER NODES` line: `5461` or `0-5460`.
    ///
    /// Returns `None` for migrating/importing markers (`[42->-id]`), which
    /// do not denote ownership.
    pub fn parse(token: &str) -> Result<Option<Self>> {
        if token.starts_with('[') {
            return Ok(None);
        }
        let bad = || Error::MalformedNodeLine(format!("bad slot entry {:?}", token));
        let (first, last) = match token.split_once('-') {
            Some((a, b)) => (a, b),
            None => (token, token),
        };
        let first: u16 = first.parse().map_err(|_| bad())?;
        let last: u16 = last.parse().map_err(|_| bad())?;
        if last < first || last >= TOTAL_SLOTS {
            return Err(bad());
        }
        Ok(Some(Self {
            start: first,
            end: last + 1,
        }))
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len() == 1 {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end - 1)
        }
    }
}

/// Split the slot space into `parts` contiguous ranges as evenly as possible.
///
/// The first `TOTAL_SLOTS % parts` ranges get one extra slot.
pub fn split_evenly(parts: usize) -> Result<Vec<SlotRange>> {
    if parts == 0 || parts > TOTAL_SLOTS as usize {
        return Err(Error::InvalidTopology(format!(
            "cannot split {} slots into {} ranges",
            TOTAL_SLOTS, parts
        )));
    }
    let base = TOTAL_SLOTS as usize / parts;
    let remainder = TOTAL_SLOTS as usize % parts;

    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0usize;
    for i in 0..parts {
        let size = if i < remainder { base + 1 } else { base };
        ranges.push(SlotRange {
            start: start as u16,
            end: (start + size) as u16,
        });
        start += size;
    }
    Ok(ranges)
}

/// Check that `ranges` are pairwise disjoint and cover every slot.
pub fn check_full_partition<'a>(ranges: impl IntoIterator<Item = &'a SlotRange>) -> Result<()> {
    let mut sorted: Vec<SlotRange> = ranges.into_iter().copied().collect();
    sorted.sort();

    let mut next = 0u16;
    for range in &sorted {
        if range.start < next {
            return Err(Error::InvalidTopology(format!(
                "slot range {} overlaps a previous range",
                range
            )));
        }
        if range.start > next {
            return Err(Error::InvalidTopology(format!(
                "slots {}-{} are unassigned",
                next,
                range.start - 1
            )));
        }
        next = range.end;
    }
    if next != TOTAL_SLOTS {
        return Err(Error::InvalidTopology(format!(
            "slots {}-{} are unassigned",
            next,
            TOTAL_SLOTS - 1
        )));
    }
    Ok(())
}
