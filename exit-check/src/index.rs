//! Closed-interval stabbing index over the 16-bit port space
//!
//! This module provides [`IntervalIndex`], a centered interval tree that
//! answers "which intervals cover point P?" for a fixed set of closed
//! intervals `[min, max]`. It is built once per dataset and is read-only
//! afterwards, so it can be shared freely between threads.
//!
//! # Architecture
//!
//! Each node owns a center point and the intervals that contain it, stored
//! twice: ascending by lower bound and descending by upper bound. Intervals
//! entirely below the center go to the left subtree, intervals entirely above
//! it to the right.
//!
//! ```text
//!                 center = 443
//!          [80-443] [1-65535] [443-443]
//!            /                     \
//!     center = 22               center = 8080
//!      [22-22]                  [8000-9000]
//! ```
//!
//! A query walks a single root-to-leaf path. At each node it scans one of the
//! two sorted lists and stops at the first interval that cannot cover the
//! point, so a query costs `O(log n + k)` for `k` covering intervals.
//!
//! Centers are chosen as the median endpoint of the intervals reaching a
//! node, which bounds the depth to `O(log n)` and the build to `O(n log n)`.
//!
//! # Example
//!
//! ```
//! use exit_check::index::{Interval, IntervalIndex};
//!
//! let index = IntervalIndex::new(vec![
//!     Interval::new(80, 443, "web"),
//!     Interval::new(1, 65535, "all"),
//!     Interval::new(22, 22, "ssh"),
//! ])
//! .unwrap();
//!
//! let mut hits = index.query(443);
//! hits.sort();
//! assert_eq!(hits, vec![&"all", &"web"]);
//! assert!(index.query(0).is_empty());
//! ```

use std::cmp::Ordering;

use crate::error::BuildError;

/// Default construction limit on the number of intervals
///
/// A full exit-policy dataset holds a few tens of thousands of rules; the
/// limit only guards against a runaway dataset.
pub const DEFAULT_MAX_INTERVALS: usize = 1 << 20;

/// A closed interval `[min, max]` tagged with a caller-supplied value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval<T> {
    /// Lower bound (inclusive)
    pub min: u16,
    /// Upper bound (inclusive)
    pub max: u16,
    /// Opaque tag returned by queries
    pub tag: T,
}

impl<T> Interval<T> {
    /// Create a new interval
    #[must_use]
    pub const fn new(min: u16, max: u16, tag: T) -> Self {
        Self { min, max, tag }
    }

    /// Check if `point` lies within this interval
    #[must_use]
    pub const fn contains(&self, point: u16) -> bool {
        point >= self.min && point <= self.max
    }
}

#[derive(Debug)]
struct Node {
    center: u16,
    /// Interval ids containing `center`, ascending by `min`
    by_min: Vec<u32>,
    /// Same ids, descending by `max`
    by_max: Vec<u32>,
    left: Option<usize>,
    right: Option<usize>,
}

/// Immutable stabbing index over closed `u16` intervals
pub struct IntervalIndex<T> {
    intervals: Vec<Interval<T>>,
    nodes: Vec<Node>,
    root: Option<usize>,
}

impl<T> IntervalIndex<T> {
    /// Build an index with the default construction limit
    ///
    /// # Errors
    ///
    /// Returns `BuildError::InvalidInterval` if any interval has `min > max`.
    /// Returns `BuildError::TooManyIntervals` if more than
    /// [`DEFAULT_MAX_INTERVALS`] intervals are supplied.
    pub fn new(intervals: Vec<Interval<T>>) -> Result<Self, BuildError> {
        Self::with_limit(intervals, DEFAULT_MAX_INTERVALS)
    }

    /// Build an index, failing if more than `limit` intervals are supplied
    ///
    /// # Errors
    ///
    /// Returns `BuildError::InvalidInterval` if any interval has `min > max`.
    /// Returns `BuildError::TooManyIntervals` if `intervals.len() > limit`
    /// (the limit is additionally capped at `u32::MAX`).
    pub fn with_limit(intervals: Vec<Interval<T>>, limit: usize) -> Result<Self, BuildError> {
        let limit = limit.min(u32::MAX as usize);
        if intervals.len() > limit {
            return Err(BuildError::TooManyIntervals {
                count: intervals.len(),
                limit,
            });
        }

        if let Some(bad) = intervals.iter().find(|iv| iv.min > iv.max) {
            return Err(BuildError::InvalidInterval {
                min: bad.min,
                max: bad.max,
            });
        }

        // Bounded by `limit`, which is capped at u32::MAX above.
        #[allow(clippy::cast_possible_truncation)]
        let ids: Vec<u32> = (0..intervals.len() as u32).collect();

        let mut nodes = Vec::new();
        let root = build_node(&intervals, ids, &mut nodes);

        Ok(Self {
            intervals,
            nodes,
            root,
        })
    }

    /// Return the tags of every interval covering `point`
    ///
    /// The order of the returned tags is unspecified; callers that need a
    /// canonical order must sort.
    #[must_use]
    pub fn query(&self, point: u16) -> Vec<&T> {
        let mut out = Vec::new();
        self.for_each_covering(point, |tag| out.push(tag));
        out
    }

    /// Invoke `f` on the tag of every interval covering `point`
    pub fn for_each_covering<'a>(&'a self, point: u16, mut f: impl FnMut(&'a T)) {
        let mut cursor = self.root;

        while let Some(idx) = cursor {
            let node = &self.nodes[idx];
            match point.cmp(&node.center) {
                Ordering::Less => {
                    for &id in &node.by_min {
                        let iv = &self.intervals[id as usize];
                        if iv.min > point {
                            break;
                        }
                        f(&iv.tag);
                    }
                    cursor = node.left;
                }
                Ordering::Greater => {
                    for &id in &node.by_max {
                        let iv = &self.intervals[id as usize];
                        if iv.max < point {
                            break;
                        }
                        f(&iv.tag);
                    }
                    cursor = node.right;
                }
                Ordering::Equal => {
                    for &id in &node.by_min {
                        f(&self.intervals[id as usize].tag);
                    }
                    cursor = None;
                }
            }
        }
    }

    /// Number of intervals in the index
    #[must_use]
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// Check if the index holds no intervals
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Iterate over all intervals in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Interval<T>> {
        self.intervals.iter()
    }

    /// Depth of the tree (0 for an empty index)
    #[must_use]
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: Option<usize>) -> usize {
            idx.map_or(0, |i| {
                1 + walk(nodes, nodes[i].left).max(walk(nodes, nodes[i].right))
            })
        }
        walk(&self.nodes, self.root)
    }
}

impl<T> Default for IntervalIndex<T> {
    fn default() -> Self {
        Self {
            intervals: Vec::new(),
            nodes: Vec::new(),
            root: None,
        }
    }
}

impl<T> std::fmt::Debug for IntervalIndex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalIndex")
            .field("intervals", &self.intervals.len())
            .field("nodes", &self.nodes.len())
            .field("depth", &self.depth())
            .finish()
    }
}

fn build_node<T>(intervals: &[Interval<T>], ids: Vec<u32>, nodes: &mut Vec<Node>) -> Option<usize> {
    if ids.is_empty() {
        return None;
    }

    let mut endpoints: Vec<u16> = ids
        .iter()
        .flat_map(|&id| {
            let iv = &intervals[id as usize];
            [iv.min, iv.max]
        })
        .collect();
    let mid = endpoints.len() / 2;
    let (_, &mut center, _) = endpoints.select_nth_unstable(mid);

    // `center` is an endpoint of some interval, so `here` is never empty and
    // both halves strictly shrink.
    let mut left = Vec::new();
    let mut right = Vec::new();
    let mut here = Vec::new();
    for id in ids {
        let iv = &intervals[id as usize];
        if iv.max < center {
            left.push(id);
        } else if iv.min > center {
            right.push(id);
        } else {
            here.push(id);
        }
    }

    let mut by_min = here.clone();
    by_min.sort_unstable_by_key(|&id| (intervals[id as usize].min, id));
    let mut by_max = here;
    by_max.sort_unstable_by_key(|&id| (std::cmp::Reverse(intervals[id as usize].max), id));

    let idx = nodes.len();
    nodes.push(Node {
        center,
        by_min,
        by_max,
        left: None,
        right: None,
    });

    let left = build_node(intervals, left, nodes);
    let right = build_node(intervals, right, nodes);
    nodes[idx].left = left;
    nodes[idx].right = right;

    Some(idx)
}
