//! A work queue which never admits the same element twice.

use fxhash::FxHashSet;
use std::collections::VecDeque;
use std::hash::Hash;

/// A FIFO work queue that remembers everything ever pushed.
///
/// Unlike a plain de-duplicating queue, popping an element does not make it eligible again,
/// so worklist algorithms over a finite key space terminate.
pub struct OnceQueue<T> {
    queue: VecDeque<T>,
    seen: FxHashSet<T>,
}

impl<T: Eq + Hash + Clone> Default for OnceQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash + Clone> OnceQueue<T> {
    /// Make an empty queue.
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            seen: FxHashSet::default(),
        }
    }
    /// Enqueue `t` unless it was ever enqueued before. Returns whether it was enqueued.
    pub fn push(&mut self, t: T) -> bool {
        let fresh = self.seen.insert(t.clone());
        if fresh {
            self.queue.push_back(t);
        }
        fresh
    }
    /// Remove the oldest pending element.
    pub fn pop(&mut self) -> Option<T> {
        self.queue.pop_front()
    }
    /// Has `t` ever been enqueued?
    pub fn seen(&self, t: &T) -> bool {
        self.seen.contains(t)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn popped_elements_stay_seen() {
        let mut q = OnceQueue::new();
        assert!(q.push("f"));
        assert!(q.push("g"));
        assert!(!q.push("f"));
        assert_eq!(q.pop(), Some("f"));
        assert!(!q.push("f"));
        assert!(q.seen(&"f"));
        assert_eq!(q.pop(), Some("g"));
        assert_eq!(q.pop(), None);
    }
}
