//! Forwarding a subscription to a streaming consumer.
use anyhow::Context;
use futures::{Sink, SinkExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{broker::Message, subscription::Subscription};

/// How a relay finished.
#[derive(Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The subscription ended because the broker was closed.
    Ended { forwarded: usize },
    /// The consumer went away.
    Cancelled { forwarded: usize },
}

impl RelayOutcome {
    pub fn forwarded(&self) -> usize {
        match self {
            Self::Ended { forwarded } | Self::Cancelled { forwarded } => *forwarded,
        }
    }
}

/// Forward every message of `subscription` into `sink`, flushing after each one.
///
/// Runs until the broker closes the subscription, the sink fails, or `cancel`
/// is triggered by whoever owns the consumer (e.g. when a streaming client
/// disconnects). The sink is closed when the subscription ends; on
/// cancellation it is left to the caller.
#[tracing::instrument(skip_all, fields(topic = ?subscription.topic(), subscriber_id = ?subscription.id()))]
pub async fn relay<T, S>(
    mut subscription: Subscription<T>,
    mut sink: S,
    cancel: CancellationToken,
) -> Result<RelayOutcome, anyhow::Error>
where
    T: Message,
    S: Sink<T> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let mut forwarded = 0;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(forwarded, "relay cancelled");
                return Ok(RelayOutcome::Cancelled { forwarded });
            }
            next = subscription.recv() => next,
        };
        match next {
            Some(message) => {
                sink.send(message)
                    .await
                    .with_context(|| format!("could not forward message {}", forwarded + 1))?;
                forwarded += 1;
                debug!(forwarded, "forwarded message");
            }
            None => {
                sink.close().await.context("could not close sink")?;
                info!(forwarded, "subscription ended");
                return Ok(RelayOutcome::Ended { forwarded });
            }
        }
    }
}
