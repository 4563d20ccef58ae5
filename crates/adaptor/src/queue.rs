//! Two-tier action queue shared by the lifecycle and the control server.
//!
//! Normal actions are served in insertion order. Urgent actions (the
//! shutdown `close`) jump ahead of every pending normal action; urgent
//! actions are also served among themselves in insertion order.

use std::collections::VecDeque;
use std::sync::Mutex;

use arnold_core::action::Action;
use tokio::sync::Notify;

#[derive(Default)]
struct Tiers {
    urgent: VecDeque<Action>,
    normal: VecDeque<Action>,
}

impl Tiers {
    fn pop(&mut self) -> Option<Action> {
        self.urgent.pop_front().or_else(|| self.normal.pop_front())
    }

    fn len(&self) -> usize {
        self.urgent.len() + self.normal.len()
    }
}

/// Unbounded, thread-safe queue of pending worker actions.
#[derive(Default)]
pub struct ActionQueue {
    tiers: Mutex<Tiers>,
    available: Notify,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action behind everything already pending.
    pub fn enqueue(&self, action: Action) {
        tracing::debug!(action = action.name(), "Enqueuing action");
        self.lock().normal.push_back(action);
        self.available.notify_one();
    }

    /// Queue an action ahead of all pending normal actions.
    pub fn enqueue_front(&self, action: Action) {
        tracing::debug!(action = action.name(), "Enqueuing priority action");
        self.lock().urgent.push_back(action);
        self.available.notify_one();
    }

    /// Put back an action that was dequeued but never delivered, so it is
    /// the next one served.
    pub fn requeue(&self, action: Action) {
        tracing::debug!(action = action.name(), "Requeuing undelivered action");
        self.lock().urgent.push_front(action);
        self.available.notify_one();
    }

    /// Remove the highest-priority action, if any, without waiting.
    pub fn try_dequeue(&self) -> Option<Action> {
        self.lock().pop()
    }

    /// Wait for an action and remove it.
    ///
    /// Cancel-safe: an action is only removed in the same poll that
    /// returns it, so dropping this future never loses one.
    pub async fn dequeue(&self) -> Action {
        loop {
            let notified = self.available.notified();
            if let Some(action) = self.try_dequeue() {
                return action;
            }
            notified.await;
        }
    }

    /// Number of pending actions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tiers> {
        // Tiers holds plain collections; a poisoned lock still has
        // consistent contents.
        self.tiers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn named(name: &str) -> Action {
        Action::keyed(name, json!(true))
    }

    fn drain(queue: &ActionQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.try_dequeue())
            .map(|a| a.name().to_string())
            .collect()
    }

    #[test]
    fn fifo_order() {
        let queue = ActionQueue::new();
        queue.enqueue(named("a"));
        queue.enqueue(named("b"));
        queue.enqueue(named("c"));
        assert_eq!(drain(&queue), ["a", "b", "c"]);
    }

    #[test]
    fn front_insert_takes_priority() {
        let queue = ActionQueue::new();
        queue.enqueue(named("a"));
        queue.enqueue(named("b"));
        queue.enqueue_front(Action::close());
        queue.enqueue(named("c"));
        assert_eq!(drain(&queue), ["close", "a", "b", "c"]);
    }

    #[test]
    fn urgent_tier_keeps_insertion_order() {
        let queue = ActionQueue::new();
        queue.enqueue(named("a"));
        queue.enqueue_front(named("x"));
        queue.enqueue_front(named("y"));
        assert_eq!(drain(&queue), ["x", "y", "a"]);
    }

    #[test]
    fn requeued_action_is_served_next() {
        let queue = ActionQueue::new();
        queue.enqueue(named("a"));
        queue.enqueue(named("b"));

        let first = queue.try_dequeue().unwrap();
        queue.enqueue_front(Action::close());
        queue.requeue(first);
        assert_eq!(drain(&queue), ["a", "close", "b"]);
    }

    #[test]
    fn length_tracks_enqueues_minus_dequeues() {
        let queue = ActionQueue::new();
        for i in 0..5 {
            queue.enqueue(named(&format!("a{i}")));
        }
        queue.enqueue_front(Action::close());
        assert_eq!(queue.len(), 6);

        for expected in (3..6).rev() {
            queue.try_dequeue().expect("pending action");
            assert_eq!(queue.len(), expected);
        }
        assert!(!queue.is_empty());
    }

    #[test]
    fn empty_queue_yields_nothing() {
        let queue = ActionQueue::new();
        assert!(queue.try_dequeue().is_none());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn dequeue_waits_for_enqueue() {
        let queue = Arc::new(ActionQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.enqueue(named("late"));
        let action = tokio::time::timeout(Duration::from_secs(2), consumer)
            .await
            .expect("dequeue should complete")
            .expect("task should not panic");
        assert_eq!(action.name(), "late");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn dropped_dequeue_loses_nothing() {
        let queue = ActionQueue::new();
        let pending = tokio::time::timeout(Duration::from_millis(10), queue.dequeue()).await;
        assert!(pending.is_err());

        queue.enqueue(named("kept"));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dequeue().await.name(), "kept");
    }

    mod proptest_order {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Urgent actions drain first, then normal ones, each tier in
            /// insertion order, for any interleaving of the two.
            #[test]
            fn tiers_drain_in_insertion_order(
                urgent in proptest::collection::vec(any::<bool>(), 0..40),
            ) {
                let queue = ActionQueue::new();
                let mut expected_urgent = Vec::new();
                let mut expected_normal = Vec::new();
                for (i, is_urgent) in urgent.iter().enumerate() {
                    let name = format!("a{i}");
                    if *is_urgent {
                        queue.enqueue_front(named(&name));
                        expected_urgent.push(name);
                    } else {
                        queue.enqueue(named(&name));
                        expected_normal.push(name);
                    }
                }
                prop_assert_eq!(queue.len(), urgent.len());

                expected_urgent.extend(expected_normal);
                prop_assert_eq!(drain(&queue), expected_urgent);
                prop_assert!(queue.is_empty());
            }
        }
    }
}
