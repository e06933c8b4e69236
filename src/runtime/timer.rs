//! Timer heap for deadline management.
//!
//! A small min-heap of `(deadline, generation)` entries with the armed
//! callbacks keyed by generation. Cancellation is lazy: it drops the
//! callback and leaves the heap entry to be skipped later, so cancel is
//! O(1) and never reshuffles the heap.

use crate::types::Time;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// Identifies an armed timer so it can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct TimerEntry {
    deadline: Time,
    generation: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first, then
        // insertion order).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of one-shot timers ordered by deadline.
#[derive(Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<TimerEntry>,
    armed: HashMap<u64, Box<dyn FnOnce()>>,
    next_generation: u64,
}

impl TimerHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of armed (not cancelled) timers.
    pub(crate) fn len(&self) -> usize {
        self.armed.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    /// Arms a timer firing `callback` at `deadline`.
    pub(crate) fn insert(&mut self, deadline: Time, callback: Box<dyn FnOnce()>) -> TimerId {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.armed.insert(generation, callback);
        self.heap.push(TimerEntry {
            deadline,
            generation,
        });
        TimerId(generation)
    }

    /// Disarms a timer. No-op if it already fired or was cancelled.
    pub(crate) fn cancel(&mut self, id: TimerId) {
        self.armed.remove(&id.0);
    }

    /// The earliest armed deadline, if any. Skips cancelled entries.
    pub(crate) fn peek_deadline(&mut self) -> Option<Time> {
        while let Some(entry) = self.heap.peek() {
            if self.armed.contains_key(&entry.generation) {
                return Some(entry.deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Pops the callbacks of every timer with `deadline <= now`, in
    /// deadline-then-insertion order.
    pub(crate) fn pop_expired(&mut self, now: Time) -> Vec<Box<dyn FnOnce()>> {
        let mut expired = Vec::new();
        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                break;
            }
            let entry = *entry;
            self.heap.pop();
            if let Some(callback) = self.armed.remove(&entry.generation) {
                expired.push(callback);
            }
        }
        expired
    }
}
