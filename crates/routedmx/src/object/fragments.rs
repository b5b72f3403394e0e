// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Received byte ranges of an object.
//!
//! Ranges are kept sorted, non-overlapping and non-adjacent: a new range
//! touching or overlapping existing ones is coalesced with them, so an
//! object is complete exactly when a single range `[0, total)` remains.

/// A contiguous run of received bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentRange {
    pub offset: u64,
    pub size: u64,
}

impl FragmentRange {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Effect of merging a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// New disjoint range.
    Inserted,
    /// One existing range grew.
    Extended,
    /// Several existing ranges were joined into one.
    Bridged { merged: usize },
    /// Every byte was already present.
    Duplicate,
}

impl MergeOutcome {
    pub fn added_bytes(&self) -> bool {
        !matches!(self, MergeOutcome::Duplicate)
    }
}

/// Sorted set of received ranges.
#[derive(Debug, Clone, Default)]
pub struct FragmentList {
    ranges: Vec<FragmentRange>,
    nb_bytes: u64,
}

impl FragmentList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `size` bytes at `offset`.
    pub fn merge(&mut self, offset: u64, size: u64) -> MergeOutcome {
        if size == 0 {
            return MergeOutcome::Duplicate;
        }
        let end = offset + size;

        // First range that ends at or after the new start, and first range
        // starting strictly after the new end: [first, last) touch the new one.
        let first = self.ranges.partition_point(|r| r.end() < offset);
        let last = self.ranges.partition_point(|r| r.offset <= end);

        if first == last {
            self.ranges.insert(first, FragmentRange { offset, size });
            self.nb_bytes += size;
            return MergeOutcome::Inserted;
        }

        let head = self.ranges[first];
        if last - first == 1 && head.offset <= offset && head.end() >= end {
            return MergeOutcome::Duplicate;
        }

        let start = head.offset.min(offset);
        let stop = self.ranges[last - 1].end().max(end);
        let replaced: u64 = self.ranges[first..last].iter().map(|r| r.size).sum();
        let merged = FragmentRange {
            offset: start,
            size: stop - start,
        };
        self.ranges.splice(first..last, std::iter::once(merged));
        self.nb_bytes = self.nb_bytes - replaced + merged.size;

        if last - first == 1 {
            MergeOutcome::Extended
        } else {
            MergeOutcome::Bridged {
                merged: last - first,
            }
        }
    }

    /// True when `[offset, offset + size)` is fully received.
    pub fn covers(&self, offset: u64, size: u64) -> bool {
        let idx = self.ranges.partition_point(|r| r.end() <= offset);
        self.ranges
            .get(idx)
            .map(|r| r.offset <= offset && r.end() >= offset + size)
            .unwrap_or(size == 0)
    }

    /// True when the list is the single range `[0, total)`.
    pub fn is_complete(&self, total: u64) -> bool {
        total > 0
            && self.ranges.len() == 1
            && self.ranges[0].offset == 0
            && self.ranges[0].size >= total
    }

    /// Bytes available contiguously from offset 0.
    pub fn contiguous_prefix(&self) -> u64 {
        match self.ranges.first() {
            Some(r) if r.offset == 0 => r.size,
            _ => 0,
        }
    }

    /// Total distinct bytes received.
    pub fn nb_bytes(&self) -> u64 {
        self.nb_bytes
    }

    /// Highest received byte offset (exclusive).
    pub fn high_water(&self) -> u64 {
        self.ranges.last().map(|r| r.end()).unwrap_or(0)
    }

    pub fn ranges(&self) -> &[FragmentRange] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
        self.nb_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans(list: &FragmentList) -> Vec<(u64, u64)> {
        list.ranges().iter().map(|r| (r.offset, r.size)).collect()
    }

    #[test]
    fn test_insert_disjoint() {
        let mut list = FragmentList::new();
        assert_eq!(list.merge(100, 10), MergeOutcome::Inserted);
        assert_eq!(list.merge(0, 10), MergeOutcome::Inserted);
        assert_eq!(list.merge(50, 10), MergeOutcome::Inserted);
        assert_eq!(spans(&list), vec![(0, 10), (50, 10), (100, 10)]);
        assert_eq!(list.nb_bytes(), 30);
    }

    #[test]
    fn test_extend_adjacent() {
        let mut list = FragmentList::new();
        list.merge(0, 1000);
        assert_eq!(list.merge(1000, 1000), MergeOutcome::Extended);
        assert_eq!(spans(&list), vec![(0, 2000)]);

        // Prepend
        let mut list = FragmentList::new();
        list.merge(1000, 1000);
        assert_eq!(list.merge(0, 1000), MergeOutcome::Extended);
        assert_eq!(spans(&list), vec![(0, 2000)]);
    }

    #[test]
    fn test_bridge_gap() {
        let mut list = FragmentList::new();
        list.merge(0, 1000);
        list.merge(2000, 1000);
        assert_eq!(list.merge(1000, 1000), MergeOutcome::Bridged { merged: 2 });
        assert_eq!(spans(&list), vec![(0, 3000)]);
        assert!(list.is_complete(3000));
        assert_eq!(list.nb_bytes(), 3000);
    }

    #[test]
    fn test_overlap_counts_distinct_bytes() {
        let mut list = FragmentList::new();
        list.merge(0, 100);
        list.merge(50, 100);
        assert_eq!(spans(&list), vec![(0, 150)]);
        assert_eq!(list.nb_bytes(), 150);

        list.merge(140, 10);
        assert_eq!(list.merge(10, 20), MergeOutcome::Duplicate);
        assert_eq!(list.nb_bytes(), 150);
    }

    #[test]
    fn test_covering_range_swallows_many() {
        let mut list = FragmentList::new();
        for i in 0..5 {
            list.merge(i * 20 + 5, 5);
        }
        assert_eq!(list.len(), 5);
        assert_eq!(list.merge(0, 200), MergeOutcome::Bridged { merged: 5 });
        assert_eq!(spans(&list), vec![(0, 200)]);
        assert_eq!(list.nb_bytes(), 200);
    }

    #[test]
    fn test_covers_and_prefix() {
        let mut list = FragmentList::new();
        list.merge(0, 10);
        list.merge(20, 10);
        assert!(list.covers(0, 10));
        assert!(list.covers(22, 5));
        assert!(!list.covers(5, 10));
        assert!(!list.covers(15, 1));
        assert_eq!(list.contiguous_prefix(), 10);
        assert_eq!(list.high_water(), 30);
        assert!(!list.is_complete(30));
    }

    #[test]
    fn test_random_order_always_completes() {
        let mut rng = fastrand::Rng::with_seed(7);
        for _ in 0..50 {
            let mut chunks: Vec<u64> = (0..40).collect();
            rng.shuffle(&mut chunks);
            let mut list = FragmentList::new();
            for c in chunks {
                list.merge(c * 100, 100);
                // Invariant: sorted, disjoint, non-adjacent.
                for w in list.ranges().windows(2) {
                    assert!(w[0].end() < w[1].offset);
                }
            }
            assert!(list.is_complete(4000));
            assert_eq!(list.nb_bytes(), 4000);
        }
    }
}
