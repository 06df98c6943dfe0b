//! Redis pub/sub connector.

use async_trait::async_trait;
use futures::StreamExt;
use ::redis::aio::PubSubSink;
use tracing::debug;

use super::{Keepalive, PubSubConnector, PubSubMessage, Subscription};
use crate::error::BrokerError;

pub struct RedisConnector {
    client: ::redis::Client,
}

impl RedisConnector {
    /// Parses the address only; nothing connects until `subscribe`.
    pub fn new(url: &str) -> Result<Self, BrokerError> {
        let client = ::redis::Client::open(url).map_err(|e| BrokerError::Connect {
            attempts: 0,
            reason: format!("invalid broker address: {e}"),
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PubSubConnector for RedisConnector {
    async fn subscribe(&self, pattern: &str) -> Result<Subscription, BrokerError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BrokerError::Protocol(e.to_string()))?;

        pubsub
            .psubscribe(pattern)
            .await
            .map_err(|e| BrokerError::Subscribe {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        debug!(pattern = %pattern, "Redis pattern subscription active");

        let (sink, stream) = pubsub.split();
        let messages = stream
            .map(|msg| {
                let pattern = if msg.from_pattern() {
                    msg.get_pattern::<String>().ok()
                } else {
                    None
                };
                Ok(PubSubMessage {
                    channel: msg.get_channel_name().to_string(),
                    pattern,
                    payload: msg.get_payload_bytes().to_vec(),
                })
            })
            .boxed();

        Ok(Subscription {
            messages,
            keepalive: Box::new(RedisKeepalive { sink }),
        })
    }
}

struct RedisKeepalive {
    sink: PubSubSink,
}

#[async_trait]
impl Keepalive for RedisKeepalive {
    async fn ping(&mut self) -> Result<(), BrokerError> {
        // RESP2 answers PING in subscribe mode with ["pong", ""], not a status line.
        self.sink
            .ping::<::redis::Value>()
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::Protocol(format!("keepalive failed: {e}")))
    }
}
