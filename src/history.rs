//! The most recent messages received by this instance.
use std::{collections::VecDeque, sync::Arc};

use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, info, Instrument};

use crate::{broker::Message, config::BrokerConfig, subscription::Subscription};

/// Bounded log of the last `capacity` messages, oldest first.
///
/// Each process keeps its own log; nothing is shared between instances.
pub struct RecentMessages<T>
where
    T: Message,
{
    capacity: usize,
    messages: Arc<Mutex<VecDeque<T>>>,
}

impl<T> Clone for RecentMessages<T>
where
    T: Message,
{
    fn clone(&self) -> Self {
        Self {
            capacity: self.capacity,
            messages: self.messages.clone(),
        }
    }
}

impl<T> Default for RecentMessages<T>
where
    T: Message,
{
    fn default() -> Self {
        Self::new(BrokerConfig::DEFAULT_HISTORY_CAPACITY)
    }
}

impl<T> RecentMessages<T>
where
    T: Message,
{
    /// An empty log keeping at most `capacity` messages. A zero capacity records nothing.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            messages: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
        }
    }

    /// Maximum number of messages retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record `message`, evicting the oldest entries beyond capacity.
    pub async fn push(&self, message: T) {
        let mut messages = self.messages.lock().await;
        messages.push_back(message);
        while messages.len() > self.capacity {
            messages.pop_front();
        }
    }

    /// Copy of the retained messages, oldest first.
    pub async fn snapshot(&self) -> Vec<T> {
        self.messages.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.lock().await.is_empty()
    }

    /// Record every message of `subscription` in the background.
    ///
    /// The task ends together with the subscription and yields the number of messages it recorded.
    #[tracing::instrument(skip(self, subscription), fields(topic = ?subscription.topic()))]
    pub fn follow(&self, mut subscription: Subscription<T>) -> JoinHandle<usize> {
        let history = self.clone();
        tokio::spawn(async move {
            let mut recorded = 0;
            while let Some(message) = subscription.recv().await {
                history.push(message).await;
                recorded += 1;
                debug!(recorded, "recorded message");
            }
            info!(recorded, "subscription ended, stop recording");
            recorded
        }
        .in_current_span())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use crate::{broker::Broker, test_util::initialize_logger};

    use super::*;

    #[tokio::test]
    async fn test_keeps_last_ten_oldest_first() {
        initialize_logger();
        let history = RecentMessages::<String>::default();
        assert_eq!(history.capacity(), 10);
        assert!(history.is_empty().await);

        for i in 0..25 {
            history.push(format!("message {}", i)).await;
        }
        assert_eq!(history.len().await, 10);
        assert_eq!(
            history.snapshot().await,
            (15..25).map(|i| format!("message {}", i)).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_below_capacity_keeps_everything() {
        let history = RecentMessages::new(3);
        history.push(1u32).await;
        history.push(2u32).await;
        assert_eq!(history.snapshot().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_zero_capacity_keeps_nothing() {
        let history = RecentMessages::new(0);
        history.push("dropped".to_string()).await;
        assert!(history.is_empty().await);
    }

    #[tokio::test]
    async fn test_follow_records_until_close() {
        initialize_logger();
        let broker = Broker::<String>::new();
        let history = RecentMessages::new(2);
        let follower = history.follow(broker.subscribe("push").await);

        for payload in ["a", "b", "c"] {
            broker.publish("push", payload.to_string()).await;
        }
        broker.close().await;

        let recorded = timeout(Duration::from_secs(5), follower)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(recorded, 3);
        assert_eq!(history.snapshot().await, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_follow_ended_subscription_records_nothing() {
        let history = RecentMessages::<String>::default();
        let recorded = history.follow(Subscription::Ended).await.unwrap();
        assert_eq!(recorded, 0);
        assert!(history.is_empty().await);
    }
}
