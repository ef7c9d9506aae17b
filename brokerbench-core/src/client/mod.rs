// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Capability surface of a broker client library.
//!
//! Drivers never talk to a broker directly. They go through
//! [`BrokerConnector`] and [`BrokerConnection`], which a client binding
//! implements: connect, create-topic, send, subscribe, acknowledge, close.

pub mod memory;

#[cfg(feature = "rdkafka")]
pub mod kafka;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::Properties;
use crate::error::ClientResult;
use crate::types::AckMode;

/// Request to provision a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u16,
    /// Survives a broker restart.
    pub durable: bool,
    pub properties: Properties,
}

/// A record handed to [`BrokerConnection::send`].
#[derive(Debug, Clone, Copy)]
pub struct OutboundRecord<'a> {
    pub topic: &'a str,
    pub key: Option<&'a str>,
    pub payload: &'a [u8],
    /// Send time in epoch milliseconds.
    pub timestamp_ms: i64,
    /// Ask the broker to persist the record before acknowledging it.
    pub persistent: bool,
}

/// Request to join a subscription group on a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeSpec {
    pub topic: String,
    /// Consumer group (log brokers) or queue name (AMQP brokers).
    pub group: String,
    pub ack_mode: AckMode,
    /// Capacity of the delivery channel.
    pub buffer: usize,
}

/// Identifies one delivery for [`BrokerConnection::acknowledge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryTag {
    pub subscription: u64,
    pub partition: u32,
    pub offset: u64,
}

/// A received record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub payload: Vec<u8>,
    /// Send timestamp carried by the record, in epoch milliseconds.
    pub timestamp_ms: i64,
    pub partition: u32,
    pub offset: u64,
    pub tag: DeliveryTag,
}

/// A live subscription. The client pushes deliveries into `messages` from
/// its own task; the channel is bounded, so a slow reader stalls only this
/// subscription.
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub messages: mpsc::Receiver<InboundMessage>,
}

/// Opens connections to a broker.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Connect to the first reachable endpoint.
    async fn connect(
        &self,
        endpoints: &[String],
        properties: &Properties,
    ) -> ClientResult<Arc<dyn BrokerConnection>>;
}

/// One client connection to a broker.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Identifier used in logs.
    fn id(&self) -> &str;

    async fn create_topic(&self, spec: &TopicSpec) -> ClientResult<()>;

    async fn send(&self, record: OutboundRecord<'_>) -> ClientResult<()>;

    async fn subscribe(&self, spec: &SubscribeSpec) -> ClientResult<Subscription>;

    async fn acknowledge(&self, tag: &DeliveryTag) -> ClientResult<()>;

    /// Release the connection. A second call returns
    /// [`ClientError::AlreadyClosed`](crate::error::ClientError::AlreadyClosed).
    async fn close(&self) -> ClientResult<()>;
}
