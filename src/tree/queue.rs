//! Priority queues for tree search: a min-heap of subtree candidates and a
//! bounded accumulator of the k smallest distances.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::distance::{Distance, ObjectId};
use crate::page::PageId;
use crate::tree::query::QueryResult;

/// A subtree awaiting expansion during a kNN search, keyed by a lower bound
/// on the distance from the query to anything inside it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate<D: Distance> {
    pub lower_bound: D,
    pub node_id: PageId,
    /// The candidate node's routing object and its distance to the query;
    /// `None` for the root.
    pub routing: Option<(ObjectId, D)>,
}

impl<D: Distance> PartialEq for Candidate<D> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<D: Distance> Eq for Candidate<D> {}

impl<D: Distance> PartialOrd for Candidate<D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<D: Distance> Ord for Candidate<D> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lower_bound
            .partial_cmp(&other.lower_bound)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

/// Reverses candidate ordering so a `BinaryHeap` pops the minimum.
#[derive(Debug, Clone, Copy)]
struct Reversed<D: Distance>(Candidate<D>);

impl<D: Distance> PartialEq for Reversed<D> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<D: Distance> Eq for Reversed<D> {}

impl<D: Distance> PartialOrd for Reversed<D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<D: Distance> Ord for Reversed<D> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp(&self.0)
    }
}

/// Min-heap of subtree candidates, smallest lower bound on top.
pub(crate) struct CandidateHeap<D: Distance> {
    heap: BinaryHeap<Reversed<D>>,
}

impl<D: Distance> CandidateHeap<D> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub fn push(&mut self, candidate: Candidate<D>) {
        self.heap.push(Reversed(candidate));
    }

    pub fn pop(&mut self) -> Option<Candidate<D>> {
        self.heap.pop().map(|reversed| reversed.0)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct KnnEntry<D: Distance> {
    distance: D,
    /// Admission sequence; breaks distance ties in favor of the earlier
    /// discovery.
    seq: u64,
    object_id: ObjectId,
}

impl<D: Distance> PartialEq for KnnEntry<D> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<D: Distance> Eq for KnnEntry<D> {}

impl<D: Distance> PartialOrd for KnnEntry<D> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<D: Distance> Ord for KnnEntry<D> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Accumulates the k smallest distances seen so far: a max-heap capped at
/// k. `add` is O(log k) and [`KnnList::k_distance`] is O(1).
pub struct KnnList<D: Distance> {
    heap: BinaryHeap<KnnEntry<D>>,
    k: usize,
    seq: u64,
}

impl<D: Distance> KnnList<D> {
    pub fn new(k: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(k + 1),
            k,
            seq: 0,
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// The current kth-smallest distance: the pruning bound. Infinite until
    /// k values have been admitted.
    pub fn k_distance(&self) -> D {
        if self.heap.len() < self.k {
            return D::infinite();
        }
        self.heap
            .peek()
            .map(|entry| entry.distance)
            .unwrap_or_else(D::infinite)
    }

    /// Offer a result; it is kept if it improves on the current kth
    /// distance or the list is not full yet.
    pub fn add(&mut self, object_id: ObjectId, distance: D) {
        let entry = KnnEntry {
            distance,
            seq: self.seq,
            object_id,
        };
        self.seq += 1;

        if self.heap.len() < self.k {
            self.heap.push(entry);
        } else if self
            .heap
            .peek()
            .map(|worst| distance < worst.distance)
            .unwrap_or(false)
        {
            self.heap.pop();
            self.heap.push(entry);
        }
    }

    /// Drain into a Vec sorted ascending by distance, equal distances in
    /// discovery order.
    pub fn into_sorted_vec(self) -> Vec<QueryResult<D>> {
        let mut entries: Vec<KnnEntry<D>> = self.heap.into_vec();
        entries.sort();
        entries
            .into_iter()
            .map(|entry| QueryResult {
                object_id: entry.object_id,
                distance: entry.distance,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(lower_bound: f32, node_id: PageId) -> Candidate<f32> {
        Candidate {
            lower_bound,
            node_id,
            routing: None,
        }
    }

    #[test]
    fn test_candidate_heap_pops_minimum() {
        let mut heap = CandidateHeap::new();
        heap.push(candidate(3.0, 1));
        heap.push(candidate(1.0, 2));
        heap.push(candidate(2.0, 3));

        assert_eq!(heap.pop().unwrap().node_id, 2);
        assert_eq!(heap.pop().unwrap().node_id, 3);
        assert_eq!(heap.pop().unwrap().node_id, 1);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_candidate_ties_break_by_node_id() {
        let mut heap = CandidateHeap::new();
        heap.push(candidate(1.0, 9));
        heap.push(candidate(1.0, 4));
        assert_eq!(heap.pop().unwrap().node_id, 4);
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn test_knn_list_k_distance_infinite_until_full() {
        let mut knn: KnnList<f32> = KnnList::new(3);
        assert_eq!(knn.k_distance(), f32::INFINITY);
        knn.add(1, 1.0);
        knn.add(2, 2.0);
        assert_eq!(knn.k_distance(), f32::INFINITY);
        knn.add(3, 3.0);
        assert_eq!(knn.k_distance(), 3.0);
    }

    #[test]
    fn test_knn_list_keeps_k_smallest() {
        let mut knn: KnnList<f32> = KnnList::new(2);
        knn.add(1, 5.0);
        knn.add(2, 1.0);
        knn.add(3, 3.0);
        knn.add(4, 0.5);

        let sorted = knn.into_sorted_vec();
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0].object_id, 4);
        assert_eq!(sorted[1].object_id, 2);
    }

    #[test]
    fn test_knn_list_equal_distances_keep_discovery_order() {
        let mut knn: KnnList<u32> = KnnList::new(3);
        knn.add(7, 2);
        knn.add(8, 2);
        knn.add(9, 1);

        let sorted = knn.into_sorted_vec();
        assert_eq!(sorted[0].object_id, 9);
        assert_eq!(sorted[1].object_id, 7);
        assert_eq!(sorted[2].object_id, 8);
    }

    #[test]
    fn test_knn_list_rejects_equal_kth_distance() {
        let mut knn: KnnList<u32> = KnnList::new(1);
        knn.add(1, 4);
        knn.add(2, 4);

        let sorted = knn.into_sorted_vec();
        assert_eq!(sorted.len(), 1);
        assert_eq!(sorted[0].object_id, 1);
    }
}
