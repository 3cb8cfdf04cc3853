use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A discovered URL waiting to be fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierEntry {
    /// Normalized URL
    pub url: String,
    /// Link distance from the seed (seeds are 0)
    pub depth: u32,
    pub priority: f64,
    /// Page the link was found on; `None` for seeds
    pub discovered_from: Option<String>,
}

impl FrontierEntry {
    pub fn seed(url: impl Into<String>, priority: f64) -> Self {
        Self {
            url: url.into(),
            depth: 0,
            priority,
            discovered_from: None,
        }
    }
}

/// Heap slot ordering entries by priority, then by insertion order
#[derive(Debug)]
struct Queued {
    entry: FrontierEntry,
    seq: u64,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.entry
            .priority
            .total_cmp(&other.entry.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Max-heap of frontier entries with FIFO tie-breaking
#[derive(Debug, Default)]
pub(crate) struct Frontier {
    heap: BinaryHeap<Queued>,
    next_seq: u64,
}

impl Frontier {
    pub fn push(&mut self, entry: FrontierEntry) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Queued { entry, seq });
    }

    pub fn pop(&mut self) -> Option<FrontierEntry> {
        self.heap.pop().map(|queued| queued.entry)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Re-scores matching entries in place, keeping their insertion order
    pub fn rescore<F>(&mut self, mut score: F) -> usize
    where
        F: FnMut(&FrontierEntry) -> Option<f64>,
    {
        let mut changed = 0;
        let mut slots = std::mem::take(&mut self.heap).into_vec();
        for slot in &mut slots {
            if let Some(priority) = score(&slot.entry) {
                slot.entry.priority = priority;
                changed += 1;
            }
        }
        self.heap = BinaryHeap::from(slots);
        changed
    }

    /// Entries in dispatch order
    pub fn ordered(&self) -> Vec<FrontierEntry> {
        let mut slots: Vec<&Queued> = self.heap.iter().collect();
        slots.sort_by(|a, b| b.cmp(a));
        slots.into_iter().map(|q| q.entry.clone()).collect()
    }
}
