use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// One query answer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchResult {
    pub id: usize,
    pub similarity: f32,
}

/// One pair of a global join. `pair.0 < pair.1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairResult {
    pub pair: (usize, usize),
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy)]
struct HeapEntry<I> {
    similarity: f32,
    item: I,
}

impl<I: Ord> PartialEq for HeapEntry<I> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<I: Ord> Eq for HeapEntry<I> {}

impl<I: Ord> PartialOrd for HeapEntry<I> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Greater means worse: lower similarity, then the larger item.
impl<I: Ord> Ord for HeapEntry<I> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .similarity
            .total_cmp(&self.similarity)
            .then_with(|| self.item.cmp(&other.item))
    }
}

/// The `k` best items seen so far, ties going to the smaller item.
#[derive(Debug, Clone)]
pub struct TopK<I> {
    k: usize,
    heap: BinaryHeap<HeapEntry<I>>,
}

impl<I: Ord + Copy> TopK<I> {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.k
    }

    /// Similarity of the k-th best item, once `k` items are held.
    pub fn threshold(&self) -> Option<f32> {
        if self.k == 0 || !self.is_full() {
            return None;
        }
        self.heap.peek().map(|worst| worst.similarity)
    }

    /// Offer an item. Returns whether it was kept.
    pub fn insert(&mut self, item: I, similarity: f32) -> bool {
        if self.k == 0 {
            return false;
        }
        let entry = HeapEntry { similarity, item };
        if self.heap.len() < self.k {
            self.heap.push(entry);
            return true;
        }
        match self.heap.peek() {
            Some(worst) if entry < *worst => {
                self.heap.pop();
                self.heap.push(entry);
                true
            }
            _ => false,
        }
    }

    pub fn merge(&mut self, other: TopK<I>) {
        for entry in other.heap {
            self.insert(entry.item, entry.similarity);
        }
    }

    /// Items by descending similarity, ties by ascending item.
    pub fn into_sorted_vec(self) -> Vec<(I, f32)> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|entry| (entry.item, entry.similarity))
            .collect()
    }
}

impl TopK<usize> {
    pub fn into_results(self) -> Vec<SearchResult> {
        self.into_sorted_vec()
            .into_iter()
            .map(|(id, similarity)| SearchResult { id, similarity })
            .collect()
    }
}

impl TopK<(usize, usize)> {
    pub fn into_results(self) -> Vec<PairResult> {
        self.into_sorted_vec()
            .into_iter()
            .map(|(pair, similarity)| PairResult { pair, similarity })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_best_and_breaks_ties_by_id() {
        let mut top = TopK::new(3);
        for (id, sim) in [(5, 0.5), (1, 0.9), (7, 0.5), (2, 0.5), (9, 0.1)] {
            top.insert(id, sim);
        }
        assert_eq!(top.threshold(), Some(0.5));
        let ids: Vec<usize> = top.into_results().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 5]);
    }

    #[test]
    fn threshold_needs_a_full_buffer() {
        let mut top = TopK::new(2);
        assert_eq!(top.threshold(), None);
        top.insert(0usize, 0.3);
        assert_eq!(top.threshold(), None);
        top.insert(1, 0.4);
        assert_eq!(top.threshold(), Some(0.3));
        assert!(!TopK::<usize>::new(0).insert(1, 1.0));
    }

    #[test]
    fn merge_order_does_not_change_result() {
        let entries = [(3usize, 0.2f32), (4, 0.8), (1, 0.8), (8, 0.6), (6, 0.6)];
        let mut forward = TopK::new(3);
        let mut left = TopK::new(3);
        let mut right = TopK::new(3);
        for (i, &(id, sim)) in entries.iter().enumerate() {
            forward.insert(id, sim);
            if i % 2 == 0 {
                left.insert(id, sim);
            } else {
                right.insert(id, sim);
            }
        }
        right.merge(left);
        assert_eq!(forward.into_sorted_vec(), right.into_sorted_vec());
    }
}
