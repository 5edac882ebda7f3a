//! Sequential delay queue.
//!
//! Items run one at a time, spaced by a default inter-item delay; an item can
//! also carry its own earliest-run time. The connection core uses one queue
//! to throttle JOIN bursts after the handshake and another to re-enqueue the
//! tails of split outgoing messages.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct DelayQueue<T> {
    items: VecDeque<(T, Option<Instant>)>,
    default_delay: Duration,
    next_ready: Instant,
}

impl<T> DelayQueue<T> {
    pub fn new(default_delay: Duration) -> Self {
        Self {
            items: VecDeque::new(),
            default_delay,
            next_ready: Instant::now(),
        }
    }

    /// Queue an item behind the existing ones.
    pub fn push(&mut self, item: T) {
        self.items.push_back((item, None));
    }

    /// Queue an item that must additionally wait `delay` from now before it
    /// may run.
    pub fn push_after(&mut self, item: T, delay: Duration) {
        self.items.push_back((item, Some(Instant::now() + delay)));
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// When the head item becomes runnable, if any item is queued.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.items.front().map(|(_, earliest)| match earliest {
            Some(at) => (*at).max(self.next_ready),
            None => self.next_ready,
        })
    }

    /// Pop the head item if its deadline has passed, arming the default
    /// delay before the next one.
    pub fn pop_ready(&mut self, now: Instant) -> Option<T> {
        if now < self.next_deadline()? {
            return None;
        }
        let (item, _) = self.items.pop_front()?;
        self.next_ready = now + self.default_delay;
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spaces_items_by_default_delay() {
        let mut queue = DelayQueue::new(Duration::from_secs(2));
        queue.push("a");
        queue.push("b");

        let now = Instant::now();
        assert_eq!(queue.pop_ready(now), Some("a"));
        assert_eq!(queue.pop_ready(now), None);
        assert_eq!(queue.pop_ready(now + Duration::from_secs(1)), None);
        assert_eq!(queue.pop_ready(now + Duration::from_secs(2)), Some("b"));
        assert!(queue.is_empty());
    }

    #[test]
    fn per_item_delay_holds_head() {
        let mut queue = DelayQueue::new(Duration::ZERO);
        queue.push_after("late", Duration::from_millis(350));

        let now = Instant::now();
        assert_eq!(queue.pop_ready(now), None);
        assert!(queue.next_deadline().is_some());
        assert_eq!(queue.pop_ready(now + Duration::from_millis(350)), Some("late"));
    }

    #[test]
    fn empty_queue_has_no_deadline() {
        let queue = DelayQueue::<()>::new(Duration::from_secs(1));
        assert!(queue.next_deadline().is_none());
    }
}
