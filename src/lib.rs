//! An in-process publish/subscribe fan-out broker.
//!
//! A [Broker](broker::Broker) maps topic names to subscriber channels. Every
//! message published to a topic is handed to each current subscriber of that
//! topic, in registration order, and the publish waits until all of them took it. Closing the broker ends every subscription and
//! turns further publishes and subscriptions into no-ops.
//!
//! ```no_run
//! # async fn example() {
//! use fanpost::broker::Broker;
//!
//! let broker = Broker::<String>::new();
//! let mut subscription = broker.subscribe("messages").await;
//! let (delivered, received) = tokio::join!(
//!     broker.publish("messages", "hello".to_string()),
//!     subscription.recv(),
//! );
//! assert_eq!(delivered, 1);
//! assert_eq!(received, Some("hello".to_string()));
//! broker.close().await;
//! assert_eq!(subscription.recv().await, None);
//! # }
//! ```
//!
//! The remaining modules are the seams an outer service plugs into: streaming
//! a subscription to a client ([relay]), keeping the most recent messages
//! ([history]), talking to a managed message broker ([upstream]) and running
//! bounded batches of work ([pool]).
pub mod broker;
pub mod config;
pub mod history;
pub mod pool;
pub mod relay;
pub mod subscription;
pub mod upstream;

pub use broker::{Broker, Message};
pub use config::BrokerConfig;
pub use subscription::Subscription;

#[cfg(test)]
pub(crate) mod test_util {
    use std::{env, sync::Once};

    use tracing_subscriber::fmt::format::FmtSpan;

    static INITIALIZE_LOGGER: Once = Once::new();

    pub(crate) fn initialize_logger() {
        if let Ok(val) = env::var("TRACE_TESTS") {
            if val == "1" {
                INITIALIZE_LOGGER.call_once(|| {
                    tracing_subscriber::fmt()
                        .with_span_events(FmtSpan::ACTIVE)
                        .init();
                });
            }
        }
    }
}
