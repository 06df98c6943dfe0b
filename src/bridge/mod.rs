//! Progress delivery bridge.
//!
//! Subscribes to every per-task progress channel on the pub/sub broker and
//! pushes each payload, wrapped in an envelope, onto the local [`ProgressHub`].
//!
//! Lifecycle: connect (with backoff) → subscribed (receive loop + keepalive
//! loop) → terminal as soon as either loop ends. There is no reconnect; the
//! owning process decides whether to start a new bridge.

pub mod backoff;
pub mod envelope;
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::BrokerError;
use crate::hub::ProgressHub;

pub use self::redis::RedisConnector;
pub use backoff::backoff_delay;
pub use envelope::wrap_progress;

/// One inbound pub/sub message.
#[derive(Debug, Clone, PartialEq)]
pub struct PubSubMessage {
    pub channel: String,
    /// The subscription pattern that matched, for pattern deliveries.
    pub pattern: Option<String>,
    pub payload: Vec<u8>,
}

/// Liveness check on an established subscription.
#[async_trait]
pub trait Keepalive: Send {
    async fn ping(&mut self) -> Result<(), BrokerError>;
}

/// An active pattern subscription.
pub struct Subscription {
    /// Ends, or yields an error, when the connection breaks.
    pub messages: BoxStream<'static, Result<PubSubMessage, BrokerError>>,
    pub keepalive: Box<dyn Keepalive>,
}

/// Opens a connection and pattern-subscribes on it.
#[async_trait]
pub trait PubSubConnector: Send + Sync {
    async fn subscribe(&self, pattern: &str) -> Result<Subscription, BrokerError>;
}

pub struct ProgressBridge {
    connector: Arc<dyn PubSubConnector>,
    hub: Arc<ProgressHub>,
    config: BridgeConfig,
    cancel: CancellationToken,
}

impl ProgressBridge {
    pub fn new(
        connector: Arc<dyn PubSubConnector>,
        hub: Arc<ProgressHub>,
        config: BridgeConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connector,
            hub,
            config,
            cancel,
        }
    }

    /// Bridge backed by the configured Redis broker.
    pub fn from_config(
        config: BridgeConfig,
        hub: Arc<ProgressHub>,
        cancel: CancellationToken,
    ) -> Result<Self, BrokerError> {
        let url = config.redis_url.as_deref().ok_or(BrokerError::Config)?;
        let connector = RedisConnector::new(url)?;
        Ok(Self::new(Arc::new(connector), hub, config, cancel))
    }

    /// Connect, then serve until the subscription ends or the bridge is cancelled.
    pub async fn run(&self) -> Result<(), BrokerError> {
        let subscription = self.connect().await?;
        self.serve(subscription).await
    }

    /// Subscribe, retrying with backoff up to the attempt ceiling.
    pub async fn connect(&self) -> Result<Subscription, BrokerError> {
        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(BrokerError::Cancelled);
            }
            attempt += 1;

            match self.connector.subscribe(&self.config.pattern).await {
                Ok(subscription) => {
                    info!(pattern = %self.config.pattern, attempt, "Subscribed to progress channels");
                    return Ok(subscription);
                }
                Err(e) if attempt >= self.config.max_attempts => {
                    return Err(BrokerError::Connect {
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    let delay =
                        backoff_delay(attempt, self.config.base_delay, self.config.max_delay);
                    warn!(
                        attempt,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Pub/sub connect failed, retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(BrokerError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Run the receive and keepalive loops until either ends.
    ///
    /// Cancellation ends the bridge cleanly with `Ok(())`.
    pub async fn serve(&self, subscription: Subscription) -> Result<(), BrokerError> {
        let Subscription {
            mut messages,
            mut keepalive,
        } = subscription;

        let receive = async {
            while let Some(item) = messages.next().await {
                self.forward(&item?);
            }
            Err::<(), _>(BrokerError::Protocol("subscription closed by broker".into()))
        };

        let interval = self.config.keepalive_interval;
        let ping = async {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = keepalive.ping().await {
                    return Err::<(), _>(e);
                }
                debug!("Pub/sub keepalive ok");
            }
        };

        let result = tokio::select! {
            r = receive => r,
            r = ping => r,
            _ = self.cancel.cancelled() => Ok(()),
        };

        match &result {
            Ok(()) => info!("Progress bridge stopped"),
            Err(e) => warn!(error = %e, "Progress bridge terminated"),
        }
        result
    }

    fn forward(&self, message: &PubSubMessage) {
        match wrap_progress(&message.payload) {
            Ok(envelope) => {
                debug!(channel = %message.channel, "Forwarding task progress");
                self.hub.publish(envelope);
            }
            Err(e) => {
                warn!(channel = %message.channel, error = %e, "Dropping malformed progress payload");
            }
        }
    }
}
