// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Driver for partitioned-log brokers.
//!
//! Keeps a separate admin connection (`common` properties) and producer
//! connection (`common` + `producer`). Each consumer joins the consumer group
//! named after its subscription on its own connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::{
    connect, open_consumer, provision, release, release_consumers, BenchmarkDriver,
    ConsumerRequest,
};
use crate::client::{BrokerConnection, BrokerConnector, TopicSpec};
use crate::config::{DriverConfig, Properties};
use crate::consumer::{BenchmarkConsumer, ConsumerCallback};
use crate::error::{DriverError, DriverResult};
use crate::producer::{BenchmarkProducer, TopicProducer};
use crate::registry::ConsumerRegistry;
use crate::types::DriverKind;

pub const TOPIC_NAME_PREFIX: &str = "test-topic";

pub struct KafkaDriver {
    config: Arc<DriverConfig>,
    endpoints: Vec<String>,
    connector: Arc<dyn BrokerConnector>,
    admin: Arc<dyn BrokerConnection>,
    producer: Arc<dyn BrokerConnection>,
    consumers: ConsumerRegistry,
    closed: AtomicBool,
}

impl KafkaDriver {
    pub async fn connect(
        config: DriverConfig,
        connector: Arc<dyn BrokerConnector>,
    ) -> DriverResult<Self> {
        let endpoints = config.endpoint_strings();

        let admin = connect(
            connector.as_ref(),
            &endpoints,
            &config.properties.admin,
            "admin",
        )
        .await?;

        let producer = match connect(
            connector.as_ref(),
            &endpoints,
            &config.properties.producer,
            "producer",
        )
        .await
        {
            Ok(producer) => producer,
            Err(e) => {
                release(admin.as_ref(), "admin").await;
                return Err(e);
            }
        };

        tracing::info!(endpoints = %endpoints.join(","), "Kafka driver ready");

        Ok(Self {
            config: Arc::new(config),
            endpoints,
            connector,
            admin,
            producer,
            consumers: ConsumerRegistry::new(),
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

    fn consumer_properties(&self, subscription: &str) -> Properties {
        let mut properties = self.config.properties.consumer.clone();
        properties.insert("group.id".to_string(), subscription.to_string());
        properties
    }
}

#[async_trait]
impl BenchmarkDriver for KafkaDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Kafka
    }

    fn topic_name_prefix(&self) -> &'static str {
        TOPIC_NAME_PREFIX
    }

    async fn create_topic(&self, topic: &str, partitions: u32) -> DriverResult<()> {
        self.ensure_open()?;

        let spec = TopicSpec {
            name: topic.to_string(),
            partitions,
            replication_factor: self.config.replication_factor.value(),
            durable: true,
            properties: self.config.properties.topic.clone(),
        };

        provision(self.admin.as_ref(), spec, self.config.topic_create_timeout).await
    }

    fn create_producer(&self, topic: &str) -> DriverResult<Box<dyn BenchmarkProducer>> {
        self.ensure_open()?;
        Ok(Box::new(TopicProducer::new(
            topic,
            Arc::clone(&self.producer),
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

        let properties = self.consumer_properties(subscription);
        let request = ConsumerRequest {
            endpoints: &self.endpoints,
            properties: &properties,
            topic,
            subscription,
            group: subscription.to_string(),
            ack_mode: self.config.ack_mode,
            buffer: self.config.delivery_buffer,
        };

        open_consumer(self.connector.as_ref(), &self.consumers, request, callback).await
    }

    async fn close(&self) -> DriverResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        release(self.producer.as_ref(), "producer").await;
        release(self.admin.as_ref(), "admin").await;
        release_consumers(&self.consumers).await;

        tracing::info!("Kafka driver closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::MemoryBroker;
    use crate::config::ConfigLoader;

    fn config(yaml: &str) -> DriverConfig {
        ConfigLoader::load_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn test_create_topic_uses_configured_replication() {
        let broker = MemoryBroker::new(["b1:9092", "b2:9092", "b3:9092"]);
        let driver = KafkaDriver::connect(
            config("endpoints: [\"b1:9092\"]\nreplicationFactor: 3\n"),
            Arc::new(broker.connector()),
        )
        .await
        .unwrap();

        driver.create_topic("bench-0", 4).await.unwrap();
        driver.create_topic("bench-0", 4).await.unwrap();

        assert_eq!(broker.partition_count("bench-0"), Some(4));
        assert_eq!(broker.replication_factor("bench-0"), Some(3));
        driver.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_consumer_joins_group_named_after_subscription() {
        let broker = MemoryBroker::new(["b1:9092"]);
        let driver = KafkaDriver::connect(
            config("endpoints: [\"b1:9092\"]\n"),
            Arc::new(broker.connector()),
        )
        .await
        .unwrap();

        driver.create_topic("bench-0", 2).await.unwrap();
        driver
            .create_consumer("bench-0", "sub-a", Arc::new(|_: &[u8], _: i64| {}))
            .await
            .unwrap();

        assert_eq!(broker.group_members("bench-0", "sub-a"), 1);
        assert_eq!(driver.consumer_count(), 1);

        driver.close().await.unwrap();
        assert_eq!(broker.group_members("bench-0", "sub-a"), 0);
        assert_eq!(driver.consumer_count(), 0);
    }

    #[tokio::test]
    async fn test_operations_after_close_fail() {
        let broker = MemoryBroker::new(["b1:9092"]);
        let driver = KafkaDriver::connect(
            config("endpoints: [\"b1:9092\"]\n"),
            Arc::new(broker.connector()),
        )
        .await
        .unwrap();

        driver.close().await.unwrap();
        driver.close().await.unwrap();

        assert!(matches!(driver.create_producer("bench-0"), Err(DriverError::Closed)));
        assert!(matches!(
            driver.create_topic("bench-0", 1).await,
            Err(DriverError::Closed)
        ));
        assert_eq!(driver.topic_name_prefix(), "test-topic");
    }

    #[tokio::test]
    async fn test_unreachable_endpoints() {
        let broker = MemoryBroker::new(["b1:9092"]);
        let result = KafkaDriver::connect(
            config("endpoints: [\"other:9092\"]\n"),
            Arc::new(broker.connector()),
        )
        .await;

        assert!(matches!(
            result,
            Err(DriverError::Connection { role: "admin", .. })
        ));
    }
}
