//! Module containing the fan-out broker.
use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use debug_ignore::DebugIgnore;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::subscription::Subscription;

/// Requirements for messages
pub trait Message: Clone + Send + 'static {}
impl<T> Message for T where T: Clone + Send + 'static {}

#[derive(Debug)]
struct Subscriber<T>
where
    T: Message,
{
    id: Uuid,
    sender: DebugIgnore<mpsc::Sender<T>>,
}

type Topics<T> = HashMap<String, Vec<Subscriber<T>>>;

struct Shared<T>
where
    T: Message,
{
    topics: Mutex<Topics<T>>,
    /// Only written while `topics` is locked.
    closed: AtomicBool,
    shutdown: CancellationToken,
}

/// A topic-scoped fan-out broker.
///
/// The broker is a cheap handle: clones share the same topics. Subscribing,
/// publishing and closing serialize on one lock that covers the subscriber map
/// and the closed flag, so a publish never observes a half-closed broker.
///
/// Delivery is a hand-off: a publish holds that lock until every subscriber of
/// the topic has taken the message. A subscriber that stops reading therefore
/// stalls publishes (to every topic) until it reads again or the broker is
/// closed. Closing first raises a shutdown signal that aborts any pending
/// hand-off, then takes the lock.
pub struct Broker<T>
where
    T: Message,
{
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Broker<T>
where
    T: Message,
{
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Display for Broker<T>
where
    T: Message,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Broker")
    }
}

impl<T> Default for Broker<T>
where
    T: Message,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Forget subscribers whose [Subscription] was dropped, and topics left without subscribers.
fn prune<T: Message>(topics: &mut Topics<T>) {
    topics.retain(|topic, subscribers| {
        subscribers.retain(|subscriber| {
            let dropped = subscriber.sender.0.is_closed();
            if dropped {
                debug!(topic = %topic, subscriber_id = %subscriber.id, "subscription dropped, unsubscribed");
            }
            !dropped
        });
        !subscribers.is_empty()
    });
}

impl<T> Broker<T>
where
    T: Message,
{
    /// Create a broker with no topics.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                topics: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Subscribe to `topic`. Any string, including the empty one, names a topic.
    ///
    /// Returns [Subscription::Ended] if the broker is closed. Subscribers that
    /// dropped their [Subscription] since the last sweep are forgotten here.
    #[tracing::instrument(skip(self))]
    pub async fn subscribe(&self, topic: &str) -> Subscription<T> {
        if self.shared.shutdown.is_cancelled() {
            debug!("broker closed, subscription ended");
            return Subscription::Ended;
        }
        let mut topics = self.shared.topics.lock().await;
        if self.shared.closed.load(Ordering::Acquire) {
            debug!("broker closed, subscription ended");
            return Subscription::Ended;
        }
        prune(&mut topics);
        // one slot: a message sits there only until the subscriber takes it
        let (sender, receiver) = mpsc::channel(1);
        let id = Uuid::new_v4();
        topics.entry(topic.to_string()).or_default().push(Subscriber {
            id,
            sender: DebugIgnore(sender),
        });
        info!(subscriber_id = %id, "subscribed");
        Subscription::live(id, topic.to_string(), receiver, self.shared.shutdown.clone())
    }

    /// Hand `message` to every current subscriber of `topic` and wait until each has taken it.
    ///
    /// Returns the number of subscribers that took the message. Publishing to a
    /// topic without subscribers, or to a closed broker, delivers nothing and
    /// returns immediately. Subscribers that dropped their [Subscription] are
    /// removed along the way. If the broker is closed mid-publish, the publish
    /// returns the subscribers reached so far.
    #[tracing::instrument(skip(self, message))]
    pub async fn publish(&self, topic: &str, message: T) -> usize {
        if self.shared.shutdown.is_cancelled() {
            debug!("broker closed, message dropped");
            return 0;
        }
        let mut topics = self.shared.topics.lock().await;
        if self.shared.closed.load(Ordering::Acquire) {
            debug!("broker closed, message dropped");
            return 0;
        }
        let Some(subscribers) = topics.get_mut(topic) else {
            debug!("no subscribers");
            return 0;
        };

        let mut offered = vec![];
        let mut gone = vec![];
        for subscriber in subscribers.iter() {
            let permit = tokio::select! {
                biased;
                _ = self.shared.shutdown.cancelled() => {
                    info!(delivered = 0, "shutdown during delivery");
                    return 0;
                }
                permit = subscriber.sender.0.reserve() => permit,
            };
            match permit {
                Ok(permit) => {
                    permit.send(message.clone());
                    offered.push(subscriber);
                }
                Err(_) => gone.push(subscriber.id),
            }
        }

        // the slot frees up once the subscriber has taken the message
        let mut delivered = 0;
        for subscriber in offered {
            let taken = tokio::select! {
                biased;
                _ = self.shared.shutdown.cancelled() => {
                    info!(delivered, "shutdown during delivery");
                    return delivered;
                }
                permit = subscriber.sender.0.reserve() => permit.is_ok(),
            };
            if taken {
                delivered += 1;
            } else {
                gone.push(subscriber.id);
            }
        }

        if !gone.is_empty() {
            subscribers.retain(|subscriber| !gone.contains(&subscriber.id));
            for id in gone.iter() {
                warn!(subscriber_id = %id, "subscription dropped, unsubscribed");
            }
            if subscribers.is_empty() {
                info!("remove empty topic");
                topics.remove(topic);
            }
        }
        debug!(delivered, "published");
        delivered
    }

    /// Close the broker and every subscription it handed out.
    ///
    /// Publishes stalled on a slow subscriber return, a message not yet taken
    /// by its subscriber is discarded, and every later publish or subscribe is
    /// a no-op. Closing twice is harmless.
    #[tracing::instrument(skip(self))]
    pub async fn close(&self) {
        self.shared.shutdown.cancel();
        let mut topics = self.shared.topics.lock().await;
        if self.shared.closed.load(Ordering::Acquire) {
            debug!("already closed");
            return;
        }
        self.shared.closed.store(true, Ordering::Release);
        let subscriber_count: usize = topics.values().map(Vec::len).sum();
        // dropping the senders closes the channels
        topics.clear();
        info!(subscriber_count, "broker closed");
    }

    /// Whether [Broker::close] has finished closing the broker.
    ///
    /// Turns true once close has ended every subscription, so it may still be
    /// false while a concurrent close waits for the lock.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Resolves as soon as [Broker::close] has been called on any clone.
    ///
    /// This is the shutdown signal itself: it fires when close begins, before
    /// [Broker::is_closed] turns true.
    pub async fn closed(&self) {
        self.shared.shutdown.cancelled().await
    }

    /// Number of subscribers currently registered for `topic`.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        let mut topics = self.shared.topics.lock().await;
        prune(&mut topics);
        topics.get(topic).map_or(0, Vec::len)
    }

    /// Topics that currently have at least one subscriber, sorted.
    pub async fn topics(&self) -> Vec<String> {
        let mut topics = self.shared.topics.lock().await;
        prune(&mut topics);
        let mut names: Vec<String> = topics.keys().cloned().collect();
        names.sort();
        names
    }
}
