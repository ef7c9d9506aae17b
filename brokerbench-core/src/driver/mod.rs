// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Benchmark drivers.
//!
//! A driver adapts one broker family to the uniform lifecycle used by the
//! harness: provision destinations, hand out producers and consumers, and
//! tear everything down. Drivers only exist initialized; [`initialize`]
//! connects and returns the driver picked by [`DriverConfig::driver`].

pub mod amqp;
pub mod kafka;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

pub use amqp::AmqpDriver;
pub use kafka::KafkaDriver;

use crate::client::{BrokerConnection, BrokerConnector, SubscribeSpec, TopicSpec};
use crate::config::{ConfigLoader, DriverConfig, Properties};
use crate::consumer::{BenchmarkConsumer, ConsumerCallback, DeliveryConsumer};
use crate::error::{ClientError, ConfigError, DriverError, DriverResult};
use crate::producer::BenchmarkProducer;
use crate::registry::ConsumerRegistry;
use crate::types::{AckMode, DriverKind};

/// Uniform lifecycle over one broker.
#[async_trait]
pub trait BenchmarkDriver: Send + Sync {
    fn kind(&self) -> DriverKind;

    /// Prefix the harness puts in front of generated destination names.
    fn topic_name_prefix(&self) -> &'static str;

    /// Provision `topic` with `partitions` shards. Succeeds if the topic
    /// already exists.
    async fn create_topic(&self, topic: &str, partitions: u32) -> DriverResult<()>;

    /// Producer bound to `topic` over the driver's shared connection.
    fn create_producer(&self, topic: &str) -> DriverResult<Box<dyn BenchmarkProducer>>;

    /// Subscribe `subscription` to `topic` and push every delivery into
    /// `callback`. The consumer is tracked and closed with the driver.
    async fn create_consumer(
        &self,
        topic: &str,
        subscription: &str,
        callback: Arc<dyn ConsumerCallback>,
    ) -> DriverResult<Arc<dyn BenchmarkConsumer>>;

    /// Release every connection and consumer. Calling it again is a no-op.
    async fn close(&self) -> DriverResult<()>;
}

/// Connect the driver selected by `config`.
pub async fn initialize(
    config: DriverConfig,
    connector: Arc<dyn BrokerConnector>,
) -> DriverResult<Box<dyn BenchmarkDriver>> {
    tracing::info!(
        driver = config.driver.name(),
        endpoints = %config.endpoint_strings().join(","),
        "Initializing driver"
    );

    let driver: Box<dyn BenchmarkDriver> = match config.driver {
        DriverKind::Kafka => Box::new(KafkaDriver::connect(config, connector).await?),
        DriverKind::Amqp => Box::new(AmqpDriver::connect(config, connector).await?),
    };

    Ok(driver)
}

/// Load a configuration file and connect the driver it selects.
pub async fn initialize_from_file(
    path: impl AsRef<Path>,
    connector: Arc<dyn BrokerConnector>,
) -> DriverResult<Box<dyn BenchmarkDriver>> {
    let config = ConfigLoader::load_file(path)?;
    initialize(config, connector).await
}

pub(crate) async fn connect(
    connector: &dyn BrokerConnector,
    endpoints: &[String],
    properties: &Properties,
    role: &'static str,
) -> DriverResult<Arc<dyn BrokerConnection>> {
    if endpoints.is_empty() {
        return Err(ConfigError::MissingRequiredField { field: "endpoints" }.into());
    }

    let connection = connector
        .connect(endpoints, properties)
        .await
        .map_err(|source| DriverError::Connection {
            endpoints: endpoints.join(","),
            role,
            source,
        })?;

    tracing::debug!(role, connection = %connection.id(), "Connection established");
    Ok(connection)
}

/// Run topic creation under the configured deadline.
pub(crate) async fn provision(
    connection: &dyn BrokerConnection,
    spec: TopicSpec,
    timeout: std::time::Duration,
) -> DriverResult<()> {
    let result = match tokio::time::timeout(timeout, connection.create_topic(&spec)).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::Timeout {
            operation: "create_topic",
            timeout_ms: timeout.as_millis() as u64,
        }),
    };

    match result {
        Ok(()) => {
            tracing::info!(
                topic = %spec.name,
                partitions = spec.partitions,
                replication_factor = spec.replication_factor,
                "Topic created"
            );
            Ok(())
        }
        Err(ClientError::TopicAlreadyExists { .. }) => {
            tracing::info!(topic = %spec.name, "Topic already exists");
            Ok(())
        }
        Err(source) => Err(DriverError::Admin {
            topic: spec.name,
            source,
        }),
    }
}

/// Everything needed to open one consumer connection.
pub(crate) struct ConsumerRequest<'a> {
    pub endpoints: &'a [String],
    pub properties: &'a Properties,
    pub topic: &'a str,
    pub subscription: &'a str,
    pub group: String,
    pub ack_mode: AckMode,
    pub buffer: usize,
}

/// Open a dedicated connection, subscribe, start delivery and register the
/// handle. A connection whose subscription fails is closed before returning.
pub(crate) async fn open_consumer(
    connector: &dyn BrokerConnector,
    registry: &ConsumerRegistry,
    request: ConsumerRequest<'_>,
    callback: Arc<dyn ConsumerCallback>,
) -> DriverResult<Arc<dyn BenchmarkConsumer>> {
    let connection = connect(connector, request.endpoints, request.properties, "consumer").await?;

    let spec = SubscribeSpec {
        topic: request.topic.to_string(),
        group: request.group,
        ack_mode: request.ack_mode,
        buffer: request.buffer,
    };

    let subscription = match connection.subscribe(&spec).await {
        Ok(subscription) => subscription,
        Err(source) => {
            if let Err(e) = connection.close().await {
                tracing::warn!(
                    connection = %connection.id(),
                    error = %e,
                    "Failed to close consumer connection after subscribe error"
                );
            }
            return Err(DriverError::Subscription {
                topic: request.topic.to_string(),
                subscription: request.subscription.to_string(),
                source,
            });
        }
    };

    let consumer: Arc<dyn BenchmarkConsumer> = Arc::new(DeliveryConsumer::start(
        request.topic,
        request.subscription,
        connection,
        subscription,
        callback,
        request.ack_mode,
    ));
    // The driver may have closed while this consumer was subscribing.
    if let Err(e) = registry.register(Arc::clone(&consumer)) {
        if let Err(close_error) = consumer.close().await {
            tracing::warn!(
                topic = %request.topic,
                subscription = %request.subscription,
                error = %close_error,
                "Failed to close consumer created during driver close"
            );
        }
        return Err(e);
    }

    tracing::info!(
        topic = %request.topic,
        subscription = %request.subscription,
        group = %spec.group,
        "Consumer created"
    );

    Ok(consumer)
}

/// Close a driver-owned connection, logging instead of failing.
pub(crate) async fn release(connection: &dyn BrokerConnection, role: &'static str) {
    match connection.close().await {
        Ok(()) => tracing::debug!(role, connection = %connection.id(), "Connection closed"),
        Err(ClientError::AlreadyClosed) => {
            tracing::warn!(role, connection = %connection.id(), "Connection already closed");
        }
        Err(e) => {
            tracing::warn!(role, connection = %connection.id(), error = %e, "Failed to close connection");
        }
    }
}

/// Close every registered consumer, logging the outcome.
pub(crate) async fn release_consumers(registry: &ConsumerRegistry) {
    let report = registry.close_all().await;
    if report.failed > 0 {
        tracing::warn!(
            closed = report.closed,
            failed = report.failed,
            "Some consumers failed to close"
        );
    } else if report.closed > 0 {
        tracing::debug!(closed = report.closed, "Consumers closed");
    }
}
