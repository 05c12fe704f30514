//! One-shot timers for the connection event loop
//!
//! Timers are identified by a [`TimerId`] that is never reused, so stopping a timer
//! that already fired (or was already stopped) is a harmless no-op rather than
//! cancelling someone else's timer.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Handle to a started timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Set of pending one-shot timers, each tagged with its owner
#[derive(Debug)]
pub struct Timers<O> {
    next_id: u64,
    by_deadline: BTreeMap<(Instant, TimerId), O>,
    deadlines: HashMap<TimerId, Instant>,
}

impl<O> Default for Timers<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> Timers<O> {
    /// Create an empty timer set
    pub fn new() -> Self {
        Self {
            next_id: 0,
            by_deadline: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    /// Start a timer that expires `duration` after `now`
    pub fn start(&mut self, now: Instant, duration: Duration, owner: O) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        let deadline = now + duration;
        self.by_deadline.insert((deadline, id), owner);
        self.deadlines.insert(id, deadline);
        id
    }

    /// Stop a timer
    ///
    /// Returns `false` if it had already fired or been stopped.
    pub fn stop(&mut self, id: TimerId) -> bool {
        match self.deadlines.remove(&id) {
            Some(deadline) => {
                self.by_deadline.remove(&(deadline, id));
                true
            }
            None => false,
        }
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.by_deadline.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Remove and return one timer whose deadline is at or before `now`
    pub fn poll_expired(&mut self, now: Instant) -> Option<(TimerId, O)> {
        let (deadline, id) = *self.by_deadline.keys().next()?;
        if deadline > now {
            return None;
        }
        let owner = self.by_deadline.remove(&(deadline, id))?;
        self.deadlines.remove(&id);
        Some((id, owner))
    }

    /// Whether the timer is still pending
    pub fn is_pending(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    /// Number of pending timers
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Whether no timers are pending
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Stop every pending timer
    pub fn clear(&mut self) {
        self.by_deadline.clear();
        self.deadlines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_order() {
        let now = Instant::now();
        let mut timers = Timers::new();
        timers.start(now, Duration::from_secs(3), "c");
        timers.start(now, Duration::from_secs(1), "a");
        timers.start(now, Duration::from_secs(2), "b");

        assert_eq!(timers.next_deadline(), Some(now + Duration::from_secs(1)));
        assert!(timers.poll_expired(now).is_none());

        let later = now + Duration::from_secs(5);
        let fired: Vec<&str> = std::iter::from_fn(|| timers.poll_expired(later))
            .map(|(_, owner)| owner)
            .collect();
        assert_eq!(fired, vec!["a", "b", "c"]);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let now = Instant::now();
        let mut timers = Timers::new();
        let id = timers.start(now, Duration::from_secs(1), ());

        assert!(timers.is_pending(id));
        assert!(timers.stop(id));
        assert!(!timers.stop(id));
        assert!(timers.poll_expired(now + Duration::from_secs(10)).is_none());
    }

    #[test]
    fn test_stop_after_fire_does_not_touch_new_timers() {
        let now = Instant::now();
        let mut timers = Timers::new();
        let first = timers.start(now, Duration::from_millis(10), 1);
        let (fired, owner) = timers.poll_expired(now + Duration::from_millis(10)).unwrap();
        assert_eq!((fired, owner), (first, 1));

        let second = timers.start(now, Duration::from_millis(10), 2);
        assert_ne!(first, second);
        assert!(!timers.stop(first));
        assert!(timers.is_pending(second));
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn test_same_deadline_fires_in_start_order() {
        let now = Instant::now();
        let mut timers = Timers::new();
        timers.start(now, Duration::from_secs(1), 'x');
        timers.start(now, Duration::from_secs(1), 'y');

        let at = now + Duration::from_secs(1);
        assert_eq!(timers.poll_expired(at).map(|(_, o)| o), Some('x'));
        assert_eq!(timers.poll_expired(at).map(|(_, o)| o), Some('y'));
    }
}
