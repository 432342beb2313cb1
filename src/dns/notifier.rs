//! Topic-keyed one-shot wakeups.
//!
//! Waiters [`subscribe`](Notifier::subscribe) to a topic and get a
//! [`Subscription`] whose [`wait`](Subscription::wait) completes once, the
//! next time the topic is published. Publishing wakes every waiter that is
//! registered at that moment; later subscribers are not woken (no replay).
//! A wakeup carries no payload: waiters must re-check the state they care
//! about.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

type Waiters = HashMap<u64, oneshot::Sender<()>>;

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    topics: DashMap<String, Waiters>,
}

/// Publish/subscribe hub keyed by opaque topic strings.
#[derive(Clone, Default)]
pub struct Notifier {
    inner: Arc<Inner>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter on `topic`.
    pub fn subscribe(&self, topic: impl Into<String>) -> Subscription {
        let topic = topic.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner
            .topics
            .entry(topic.clone())
            .or_default()
            .insert(id, tx);

        Subscription {
            inner: Arc::clone(&self.inner),
            topic,
            id,
            rx: Some(rx),
            fired: false,
        }
    }

    /// Wake every waiter currently registered on `topic`.
    ///
    /// Returns the number of waiters woken.
    pub fn publish(&self, topic: &str) -> usize {
        let Some((_, waiters)) = self.inner.topics.remove(topic) else {
            return 0;
        };
        let count = waiters.len();
        for (_, tx) in waiters {
            let _ = tx.send(());
        }
        count
    }

    /// Number of waiters registered on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.topics.get(topic).map_or(0, |w| w.len())
    }

    /// Number of topics with at least one waiter.
    pub fn topic_count(&self) -> usize {
        self.inner.topics.len()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("topics", &self.inner.topics.len())
            .finish()
    }
}

/// A registered waiter. Unregisters itself on drop.
pub struct Subscription {
    inner: Arc<Inner>,
    topic: String,
    id: u64,
    rx: Option<oneshot::Receiver<()>>,
    fired: bool,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next publish on this topic.
    ///
    /// Completes at most once; after that, or after [`close`](Self::close),
    /// it returns immediately. Dropping the future before completion keeps
    /// the subscription registered.
    pub async fn wait(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            // A dropped sender means the hub went away; treat it as a wakeup.
            let _ = rx.await;
            self.rx = None;
            self.fired = true;
        }
    }

    /// Whether a publish has been delivered to this waiter.
    pub fn has_fired(&mut self) -> bool {
        if !self.fired {
            if let Some(rx) = self.rx.as_mut() {
                if rx.try_recv().is_ok() {
                    self.rx = None;
                    self.fired = true;
                }
            }
        }
        self.fired
    }

    /// Unregister from the topic. Calling it again is a no-op.
    pub fn close(&mut self) {
        if self.rx.take().is_none() {
            return;
        }
        if let Some(mut waiters) = self.inner.topics.get_mut(&self.topic) {
            waiters.remove(&self.id);
        }
        self.inner.topics.remove_if(&self.topic, |_, w| w.is_empty());
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("fired", &self.fired)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_wakes_all_current_waiters() {
        let notifier = Notifier::new();
        let mut first = notifier.subscribe("example.com.4");
        let mut second = notifier.subscribe("example.com.4");

        assert_eq!(notifier.publish("example.com.4"), 2);

        first.wait().await;
        second.wait().await;
        assert!(first.has_fired());
        assert!(second.has_fired());
    }

    #[tokio::test]
    async fn test_no_replay_for_late_subscribers() {
        let notifier = Notifier::new();
        notifier.publish("example.com.4");

        let mut late = notifier.subscribe("example.com.4");
        let waited = tokio::time::timeout(Duration::from_millis(20), late.wait()).await;
        assert!(waited.is_err());
        assert!(!late.has_fired());
    }

    #[tokio::test]
    async fn test_topics_are_independent() {
        let notifier = Notifier::new();
        let mut v4 = notifier.subscribe("example.com.4");
        let mut v6 = notifier.subscribe("example.com.6");

        notifier.publish("example.com.6");

        v6.wait().await;
        assert!(!v4.has_fired());
        assert_eq!(notifier.subscriber_count("example.com.4"), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let notifier = Notifier::new();
        let mut sub = notifier.subscribe("a.");
        let _other = notifier.subscribe("a.");
        assert_eq!(notifier.subscriber_count("a."), 2);

        sub.close();
        sub.close();
        assert_eq!(notifier.subscriber_count("a."), 1);
    }

    #[test]
    fn test_drop_removes_empty_topic() {
        let notifier = Notifier::new();
        {
            let _sub = notifier.subscribe("gone.");
            assert_eq!(notifier.topic_count(), 1);
        }
        assert_eq!(notifier.topic_count(), 0);
        assert_eq!(notifier.publish("gone."), 0);
    }

    #[tokio::test]
    async fn test_wait_after_close_returns_immediately() {
        let notifier = Notifier::new();
        let mut sub = notifier.subscribe("closed.");
        sub.close();
        sub.wait().await;
        assert!(!sub.has_fired());
    }

    #[tokio::test]
    async fn test_wakes_waiter_blocked_in_another_task() {
        let notifier = Notifier::new();
        let mut sub = notifier.subscribe("spawned.4");

        let waiter = tokio::spawn(async move {
            sub.wait().await;
            sub.has_fired()
        });

        tokio::task::yield_now().await;
        notifier.publish("spawned.4");
        assert!(waiter.await.unwrap());
    }
}
