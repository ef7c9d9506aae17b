// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Producer handles.

use std::sync::Arc;

use async_trait::async_trait;

use crate::client::{BrokerConnection, OutboundRecord};
use crate::error::{DriverError, DriverResult};
use crate::types::epoch_millis;

/// Sends opaque payloads to one destination.
#[async_trait]
pub trait BenchmarkProducer: Send + Sync {
    fn topic(&self) -> &str;

    /// Send with an optional routing key. Failures surface on this future
    /// only; the shared connection stays usable.
    async fn send_keyed(&self, key: Option<&str>, payload: &[u8]) -> DriverResult<()>;

    async fn send(&self, payload: &[u8]) -> DriverResult<()> {
        self.send_keyed(None, payload).await
    }

    /// Release producer-local resources. The shared connection belongs to
    /// the driver and is left open.
    async fn close(&self) -> DriverResult<()> {
        Ok(())
    }
}

/// Producer over the driver's shared connection.
pub struct TopicProducer {
    topic: String,
    connection: Arc<dyn BrokerConnection>,
    persistent: bool,
}

impl TopicProducer {
    pub fn new(topic: impl Into<String>, connection: Arc<dyn BrokerConnection>, persistent: bool) -> Self {
        Self {
            topic: topic.into(),
            connection,
            persistent,
        }
    }
}

#[async_trait]
impl BenchmarkProducer for TopicProducer {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn send_keyed(&self, key: Option<&str>, payload: &[u8]) -> DriverResult<()> {
        let record = OutboundRecord {
            topic: &self.topic,
            key,
            payload,
            timestamp_ms: epoch_millis(),
            persistent: self.persistent,
        };

        self.connection
            .send(record)
            .await
            .map_err(|source| DriverError::Send {
                topic: self.topic.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::MemoryBroker;
    use crate::client::{BrokerConnector, TopicSpec};
    use crate::config::Properties;

    #[tokio::test]
    async fn test_send_appends_to_topic() {
        let broker = MemoryBroker::new(["memory:9092"]);
        let conn = broker
            .connector()
            .connect(&["memory:9092".to_string()], &Properties::new())
            .await
            .unwrap();
        conn.create_topic(&TopicSpec {
            name: "bench-0".to_string(),
            partitions: 1,
            replication_factor: 1,
            durable: false,
            properties: Properties::new(),
        })
        .await
        .unwrap();

        let producer = TopicProducer::new("bench-0", conn, false);
        producer.send(b"payload").await.unwrap();
        producer.send_keyed(Some("k"), b"payload").await.unwrap();

        assert_eq!(broker.log_len("bench-0"), Some(2));
    }

    #[tokio::test]
    async fn test_send_failure_is_per_message() {
        let broker = MemoryBroker::new(["memory:9092"]);
        let conn = broker
            .connector()
            .connect(&["memory:9092".to_string()], &Properties::new())
            .await
            .unwrap();

        let producer = TopicProducer::new("missing", conn, false);
        let err = producer.send(b"payload").await.unwrap_err();
        assert!(matches!(err, DriverError::Send { .. }));
        assert_eq!(producer.topic(), "missing");
    }
}
