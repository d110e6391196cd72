//! The handle a subscriber reads messages from.
use std::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
};

use debug_ignore::DebugIgnore;
use futures::{future::poll_fn, Stream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broker::Message;

/// Result of subscribing to a topic.
///
/// A live subscription yields every message published to its topic from the
/// moment it was registered until the broker is closed. Once the broker
/// closes, reads return `None`, even if a publish was interrupted halfway
/// through handing a message over.
///
/// Dropping a subscription is always safe. The broker forgets about the
/// subscriber the next time it touches the subscriber map.
pub enum Subscription<T>
where
    T: Message,
{
    /// A registered subscriber channel.
    Live {
        id: Uuid,
        topic: String,
        receiver: DebugIgnore<mpsc::Receiver<T>>,
        shutdown: CancellationToken,
    },
    /// The broker was already closed. No message will ever arrive.
    Ended,
}

impl<T> fmt::Debug for Subscription<T>
where
    T: Message,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live { id, topic, .. } => f
                .debug_struct("Live")
                .field("id", id)
                .field("topic", topic)
                .finish(),
            Self::Ended => write!(f, "Ended"),
        }
    }
}

impl<T> Subscription<T>
where
    T: Message,
{
    pub(crate) fn live(
        id: Uuid,
        topic: String,
        receiver: mpsc::Receiver<T>,
        shutdown: CancellationToken,
    ) -> Self {
        Self::Live {
            id,
            topic,
            receiver: DebugIgnore(receiver),
            shutdown,
        }
    }

    fn poll_message(&mut self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        match self {
            Self::Live {
                receiver, shutdown, ..
            } => {
                // a message still in the channel at close was never handed over
                if shutdown.is_cancelled() {
                    return Poll::Ready(None);
                }
                receiver.0.poll_recv(cx)
            }
            Self::Ended => Poll::Ready(None),
        }
    }

    /// Wait for the next message. Returns `None` once no more messages can arrive.
    pub async fn recv(&mut self) -> Option<T> {
        poll_fn(|cx| self.poll_message(cx)).await
    }

    /// Take the next message if a publish is currently handing one over.
    pub fn try_recv(&mut self) -> Option<T> {
        match self {
            Self::Live {
                receiver, shutdown, ..
            } if !shutdown.is_cancelled() => receiver.0.try_recv().ok(),
            _ => None,
        }
    }

    /// Whether this is the [Subscription::Ended] sentinel handed out by a closed broker.
    ///
    /// A live subscription whose broker closed later is not ended in this sense;
    /// it reports closure by returning `None` from [Subscription::recv].
    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Ended)
    }

    /// Subscriber id used in the broker's log fields, `None` for [Subscription::Ended].
    pub fn id(&self) -> Option<Uuid> {
        match self {
            Self::Live { id, .. } => Some(*id),
            Self::Ended => None,
        }
    }

    /// Topic this subscription was registered under, `None` for [Subscription::Ended].
    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::Live { topic, .. } => Some(topic),
            Self::Ended => None,
        }
    }
}

impl<T> Stream for Subscription<T>
where
    T: Message,
{
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().poll_message(cx)
    }
}
