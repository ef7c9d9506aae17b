// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Consumer handles with push-based delivery.
//!
//! A consumer is a passive registration: the client pushes records into the
//! subscription channel and a dedicated task hands each one to the callback.
//! Callbacks run on runtime worker threads, never on the caller's task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::client::{BrokerConnection, Subscription};
use crate::error::{ClientError, DriverError, DriverResult};
use crate::types::AckMode;

/// Receives every delivered message.
///
/// Must be cheap: a callback that blocks stalls its own consumer's delivery
/// (and, through the bounded channel, that subscription at the broker).
pub trait ConsumerCallback: Send + Sync + 'static {
    fn message_received(&self, payload: &[u8], publish_timestamp_ms: i64);
}

impl<F> ConsumerCallback for F
where
    F: Fn(&[u8], i64) + Send + Sync + 'static,
{
    fn message_received(&self, payload: &[u8], publish_timestamp_ms: i64) {
        self(payload, publish_timestamp_ms)
    }
}

/// A subscription handle created by a driver.
#[async_trait]
pub trait BenchmarkConsumer: Send + Sync {
    fn topic(&self) -> &str;

    fn subscription(&self) -> &str;

    /// Stop delivery and release the connection. Closing an already closed
    /// consumer succeeds.
    async fn close(&self) -> DriverResult<()>;
}

/// Consumer owning a dedicated connection and its delivery task.
pub struct DeliveryConsumer {
    topic: String,
    subscription: String,
    connection: Arc<dyn BrokerConnection>,
    delivery: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl DeliveryConsumer {
    /// Start delivering `subscription` to `callback`. Must be called inside
    /// a tokio runtime.
    pub fn start(
        topic: impl Into<String>,
        subscription_name: impl Into<String>,
        connection: Arc<dyn BrokerConnection>,
        subscription: Subscription,
        callback: Arc<dyn ConsumerCallback>,
        ack_mode: AckMode,
    ) -> Self {
        let topic = topic.into();
        let subscription_name = subscription_name.into();

        let delivery = tokio::spawn(delivery_loop(
            topic.clone(),
            Arc::clone(&connection),
            subscription,
            callback,
            ack_mode,
        ));

        Self {
            topic,
            subscription: subscription_name,
            connection,
            delivery: Mutex::new(Some(delivery)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl BenchmarkConsumer for DeliveryConsumer {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn subscription(&self) -> &str {
        &self.subscription
    }

    async fn close(&self) -> DriverResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let delivery = self
            .delivery
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(delivery) = delivery {
            delivery.abort();
        }

        match self.connection.close().await {
            Ok(()) => Ok(()),
            Err(ClientError::AlreadyClosed) => {
                tracing::warn!(
                    topic = %self.topic,
                    subscription = %self.subscription,
                    connection = %self.connection.id(),
                    "Consumer connection already closed"
                );
                Ok(())
            }
            Err(source) => Err(DriverError::Close {
                resource: format!("consumer '{}' on '{}'", self.subscription, self.topic),
                source,
            }),
        }
    }
}

async fn delivery_loop(
    topic: String,
    connection: Arc<dyn BrokerConnection>,
    mut subscription: Subscription,
    callback: Arc<dyn ConsumerCallback>,
    ack_mode: AckMode,
) {
    while let Some(message) = subscription.messages.recv().await {
        callback.message_received(&message.payload, message.timestamp_ms);

        if ack_mode == AckMode::Explicit {
            match connection.acknowledge(&message.tag).await {
                Ok(()) => {}
                Err(ClientError::AlreadyClosed) => break,
                Err(e) => {
                    tracing::warn!(
                        topic = %topic,
                        partition = message.partition,
                        offset = message.offset,
                        error = %e,
                        "Acknowledge failed"
                    );
                }
            }
        }
    }

    tracing::debug!(topic = %topic, subscription = subscription.id, "Delivery loop finished");
}
