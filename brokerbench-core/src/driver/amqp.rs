// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Driver for exchange/queue brokers.
//!
//! Destinations are fanout exchanges with a single shard. Every subscription
//! owns a queue named `{topic}-{subscription}`; consumers of the same
//! subscription compete on that queue. One connection serves both topic
//! administration and producers. Consumer connections rotate over the
//! configured endpoints.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::{
    connect, open_consumer, provision, release, release_consumers, BenchmarkDriver,
    ConsumerRequest,
};
use crate::client::{BrokerConnection, BrokerConnector, TopicSpec};
use crate::config::DriverConfig;
use crate::consumer::{BenchmarkConsumer, ConsumerCallback};
use crate::error::{DriverError, DriverResult};
use crate::producer::{BenchmarkProducer, TopicProducer};
use crate::registry::ConsumerRegistry;
use crate::types::DriverKind;

pub const TOPIC_NAME_PREFIX: &str = "test-exchange";

/// Topic property carrying the queue flavour.
pub const QUEUE_TYPE_PROPERTY: &str = "x-queue-type";

/// Queue backing `subscription` on `topic`.
pub fn queue_name(topic: &str, subscription: &str) -> String {
    format!("{}-{}", topic, subscription)
}

pub struct AmqpDriver {
    config: Arc<DriverConfig>,
    endpoints: Vec<String>,
    connector: Arc<dyn BrokerConnector>,
    connection: Arc<dyn BrokerConnection>,
    consumers: ConsumerRegistry,
    next_endpoint: AtomicUsize,
    closed: AtomicBool,
}

impl AmqpDriver {
    pub async fn connect(
        config: DriverConfig,
        connector: Arc<dyn BrokerConnector>,
    ) -> DriverResult<Self> {
        let endpoints = config.endpoint_strings();

        let connection = connect(
            connector.as_ref(),
            &endpoints,
            &config.properties.producer,
            "producer",
        )
        .await?;

        tracing::info!(
            endpoints = %endpoints.join(","),
            queue_type = config.queue_type.as_str(),
            persistence = config.persistence,
            "AMQP driver ready"
        );

        Ok(Self {
            config: Arc::new(config),
            endpoints,
            connector,
            connection,
            consumers: ConsumerRegistry::new(),
            next_endpoint: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DriverError::Closed);
        }
        Ok(())
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Endpoints starting at the next one in rotation.
    fn rotated_endpoints(&self) -> Vec<String> {
        let mut endpoints = self.endpoints.clone();
        let turn = self.next_endpoint.fetch_add(1, Ordering::Relaxed);
        if let Some(start) = turn.checked_rem(endpoints.len()) {
            endpoints.rotate_left(start);
        }
        endpoints
    }
}

#[async_trait]
impl BenchmarkDriver for AmqpDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Amqp
    }

    fn topic_name_prefix(&self) -> &'static str {
        TOPIC_NAME_PREFIX
    }

    async fn create_topic(&self, topic: &str, partitions: u32) -> DriverResult<()> {
        self.ensure_open()?;

        if partitions > 1 {
            tracing::warn!(
                topic = %topic,
                partitions,
                "Exchanges are not partitioned, creating a single shard"
            );
        }

        let mut properties = self.config.properties.topic.clone();
        properties.insert(
            QUEUE_TYPE_PROPERTY.to_string(),
            self.config.queue_type.as_str().to_string(),
        );

        let spec = TopicSpec {
            name: topic.to_string(),
            partitions: 1,
            replication_factor: 1,
            durable: self.config.persistence,
            properties,
        };

        provision(self.connection.as_ref(), spec, self.config.topic_create_timeout).await
    }

    fn create_producer(&self, topic: &str) -> DriverResult<Box<dyn BenchmarkProducer>> {
        self.ensure_open()?;
        Ok(Box::new(TopicProducer::new(
            topic,
            Arc::clone(&self.connection),
            self.config.persistence,
        )))
    }

    async fn create_consumer(
        &self,
        topic: &str,
        subscription: &str,
        callback: Arc<dyn ConsumerCallback>,
    ) -> DriverResult<Arc<dyn BenchmarkConsumer>> {
        self.ensure_open()?;

        let endpoints = self.rotated_endpoints();
        let request = ConsumerRequest {
            endpoints: &endpoints,
            properties: &self.config.properties.consumer,
            topic,
            subscription,
            group: queue_name(topic, subscription),
            ack_mode: self.config.ack_mode,
            buffer: self.config.delivery_buffer,
        };

        open_consumer(self.connector.as_ref(), &self.consumers, request, callback).await
    }

    async fn close(&self) -> DriverResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        release(self.connection.as_ref(), "producer").await;
        release_consumers(&self.consumers).await;

        tracing::info!("AMQP driver closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::client::memory::MemoryBroker;
    use crate::config::ConfigLoader;
    use crate::error::ConfigError;

    async fn driver(broker: &Arc<MemoryBroker>, yaml: &str) -> AmqpDriver {
        AmqpDriver::connect(
            ConfigLoader::load_str(yaml).unwrap(),
            Arc::new(broker.connector()),
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_queue_name() {
        assert_eq!(queue_name("test-exchange-1", "sub"), "test-exchange-1-sub");
    }

    #[tokio::test]
    async fn test_create_topic_is_single_shard() {
        let broker = MemoryBroker::new(["amqp://a:5672"]);
        let driver = driver(&broker, "driver: amqp\nendpoints: [\"amqp://a:5672\"]\npersistence: true\n").await;

        driver.create_topic("orders", 8).await.unwrap();

        assert_eq!(broker.partition_count("orders"), Some(1));
        assert_eq!(broker.is_durable("orders"), Some(true));
        assert_eq!(driver.topic_name_prefix(), "test-exchange");
        driver.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_each_subscription_gets_every_message() {
        let broker = MemoryBroker::new(["amqp://a:5672", "amqp://b:5672"]);
        let driver = driver(
            &broker,
            "driver: amqp\nendpoints: [\"amqp://a:5672\", \"amqp://b:5672\"]\n",
        )
        .await;
        driver.create_topic("orders", 1).await.unwrap();

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        for (name, counter) in [("s1", &first), ("s2", &second)] {
            let counter = Arc::clone(counter);
            driver
                .create_consumer(
                    "orders",
                    name,
                    Arc::new(move |_: &[u8], _: i64| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .await
                .unwrap();
        }
        assert_eq!(broker.group_members("orders", "orders-s1"), 1);
        assert_eq!(broker.group_members("orders", "orders-s2"), 1);

        let producer = driver.create_producer("orders").unwrap();
        for _ in 0..3 {
            producer.send(b"order").await.unwrap();
        }

        for _ in 0..200 {
            if first.load(Ordering::SeqCst) == 3 && second.load(Ordering::SeqCst) == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(first.load(Ordering::SeqCst), 3);
        assert_eq!(second.load(Ordering::SeqCst), 3);

        driver.close().await.unwrap();
        assert_eq!(driver.consumer_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_without_endpoints() {
        let broker = MemoryBroker::new(["a:5672"]);
        let mut config = ConfigLoader::load_str("driver: amqp\nendpoints: [\"a:5672\"]\n").unwrap();
        config.endpoints.clear();

        let result = AmqpDriver::connect(config, Arc::new(broker.connector())).await;
        assert!(matches!(
            result,
            Err(DriverError::Config(ConfigError::MissingRequiredField { field: "endpoints" }))
        ));
    }

    #[tokio::test]
    async fn test_consumer_endpoints_rotate() {
        let broker = MemoryBroker::new(["a:5672"]);
        let driver = driver(&broker, "driver: amqp\nendpoints: [\"a:5672\", \"b:5672\", \"c:5672\"]\n").await;

        assert_eq!(driver.rotated_endpoints()[0], "a:5672");
        assert_eq!(driver.rotated_endpoints()[0], "b:5672");
        assert_eq!(driver.rotated_endpoints()[0], "c:5672");
        assert_eq!(driver.rotated_endpoints()[0], "a:5672");
    }
}
