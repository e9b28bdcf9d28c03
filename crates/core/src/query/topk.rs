//! Bounded nearest-candidate pool.

use ordered_float::OrderedFloat;
use std::collections::BinaryHeap;

/// A row considered during search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub row_id: u64,
    pub approx_distance: f32,
    /// Filled by the refine step.
    pub exact_distance: Option<f32>,
}

impl Candidate {
    /// The distance results are ranked and reported by.
    pub fn distance(&self) -> f32 {
        self.exact_distance.unwrap_or(self.approx_distance)
    }
}

/// Heap entry ordered by `(distance, row_id)`, so the heap top is the worst
/// retained candidate and equal distances prefer the lower row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    distance: OrderedFloat<f32>,
    row_id: u64,
}

/// Keeps the `capacity` smallest `(distance, row_id)` pairs seen.
#[derive(Debug)]
pub struct TopK {
    capacity: usize,
    heap: BinaryHeap<Entry>,
}

impl TopK {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity.saturating_add(1).min(1 << 16)),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[inline]
    pub fn push(&mut self, row_id: u64, distance: f32) {
        if self.capacity == 0 {
            return;
        }
        let entry = Entry {
            distance: OrderedFloat(distance),
            row_id,
        };
        if self.heap.len() < self.capacity {
            self.heap.push(entry);
        } else if let Some(mut worst) = self.heap.peek_mut() {
            if entry < *worst {
                *worst = entry;
            }
        }
    }

    /// Retained candidates, nearest first.
    pub fn into_sorted(self) -> Vec<Candidate> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|e| Candidate {
                row_id: e.row_id,
                approx_distance: e.distance.0,
                exact_distance: None,
            })
            .collect()
    }
}

/// Sort candidates by `(distance, row_id)` ascending.
pub fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        a.distance()
            .total_cmp(&b.distance())
            .then(a.row_id.cmp(&b.row_id))
    });
}
