//! The managed message broker a service republishes to.
use std::collections::HashSet;

use anyhow::{anyhow, Context};
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::Mutex;
use tracing::info;

use crate::broker::Broker;

/// Client of a managed publish/subscribe service.
///
/// Failures are transport errors for the caller to surface; nothing here retries.
pub trait Upstream: Send + Sync {
    fn topic_exists<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<bool, anyhow::Error>>;

    fn create_topic<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<(), anyhow::Error>>;

    fn publish<'a>(
        &'a self,
        topic: &'a str,
        payload: String,
    ) -> BoxFuture<'a, Result<(), anyhow::Error>>;
}

/// Make sure `topic` exists upstream, creating it if necessary. Returns whether it was created.
#[tracing::instrument(skip(upstream))]
pub async fn ensure_topic(upstream: &dyn Upstream, topic: &str) -> Result<bool, anyhow::Error> {
    let exists = upstream
        .topic_exists(topic)
        .await
        .with_context(|| format!("could not check whether topic {} exists", topic))?;
    if exists {
        info!("topic exists");
        return Ok(false);
    }
    info!("topic doesn't exist, creating it");
    upstream
        .create_topic(topic)
        .await
        .with_context(|| format!("could not create topic {}", topic))?;
    Ok(true)
}

/// An [Upstream] that delivers into an in-process [Broker].
///
/// Topics must be created before publishing to them, like on a managed service.
pub struct LoopbackUpstream {
    broker: Broker<String>,
    topics: Mutex<HashSet<String>>,
}

impl LoopbackUpstream {
    pub fn new(broker: Broker<String>) -> Self {
        Self {
            broker,
            topics: Mutex::new(HashSet::new()),
        }
    }

    pub fn broker(&self) -> &Broker<String> {
        &self.broker
    }
}

impl Upstream for LoopbackUpstream {
    fn topic_exists<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<bool, anyhow::Error>> {
        async move { Ok(self.topics.lock().await.contains(topic)) }.boxed()
    }

    fn create_topic<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<(), anyhow::Error>> {
        async move {
            if !self.topics.lock().await.insert(topic.to_string()) {
                return Err(anyhow!("topic {} already exists", topic));
            }
            Ok(())
        }
        .boxed()
    }

    fn publish<'a>(
        &'a self,
        topic: &'a str,
        payload: String,
    ) -> BoxFuture<'a, Result<(), anyhow::Error>> {
        async move {
            if !self.topics.lock().await.contains(topic) {
                return Err(anyhow!("topic {} does not exist", topic));
            }
            if self.broker.is_closed() {
                return Err(anyhow!("broker is closed"));
            }
            self.broker.publish(topic, payload).await;
            Ok(())
        }
        .boxed()
    }
}
