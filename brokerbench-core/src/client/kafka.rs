// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! librdkafka binding of the capability surface.
//!
//! Enabled with the `rdkafka` cargo feature. Every connection owns an admin
//! client; the producer is created on first send and each subscription gets
//! its own `StreamConsumer` drained by a pump task.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::BorrowedMessage;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{Message, Offset, TopicPartitionList};
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;

use super::{
    BrokerConnection, BrokerConnector, DeliveryTag, InboundMessage, OutboundRecord,
    SubscribeSpec, Subscription, TopicSpec,
};
use crate::config::Properties;
use crate::error::{ClientError, ClientResult};
use crate::types::AckMode;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const QUEUE_TIMEOUT: Duration = Duration::from_secs(30);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn backend(err: KafkaError) -> ClientError {
    ClientError::Backend {
        message: err.to_string(),
    }
}

/// Opens [`RdKafkaConnection`]s. Properties are passed to librdkafka as-is.
#[derive(Debug, Clone, Default)]
pub struct RdKafkaConnector;

#[async_trait]
impl BrokerConnector for RdKafkaConnector {
    async fn connect(
        &self,
        endpoints: &[String],
        properties: &Properties,
    ) -> ClientResult<Arc<dyn BrokerConnection>> {
        let bootstrap = endpoints.join(",");

        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &bootstrap);
        for (key, value) in properties {
            config.set(key, value);
        }

        let admin: AdminClient<DefaultClientContext> =
            admin_config(&config).create().map_err(backend)?;
        let admin = Arc::new(admin);

        // librdkafka connects lazily; a metadata round trip proves reachability.
        let probe = Arc::clone(&admin);
        let reachable = tokio::task::spawn_blocking(move || {
            probe
                .inner()
                .fetch_metadata(None, METADATA_TIMEOUT)
                .map(|_| ())
        })
        .await
        .map_err(|e| ClientError::Backend {
            message: e.to_string(),
        })?;

        if let Err(e) = reachable {
            tracing::debug!(endpoints = %bootstrap, error = %e, "Metadata probe failed");
            return Err(ClientError::Unreachable {
                endpoints: bootstrap,
            });
        }

        let connection = RdKafkaConnection {
            id: format!("rdkafka-{}", uuid::Uuid::new_v4()),
            config,
            admin,
            producer: OnceCell::new(),
            subscriptions: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        };

        tracing::debug!(connection = %connection.id, endpoints = %bootstrap, "Connected");
        Ok(Arc::new(connection))
    }
}

struct KafkaSubscription {
    id: u64,
    topic: String,
    consumer: Arc<StreamConsumer>,
    pump: JoinHandle<()>,
}

/// One logical connection to a Kafka cluster.
pub struct RdKafkaConnection {
    id: String,
    config: ClientConfig,
    admin: Arc<AdminClient<DefaultClientContext>>,
    producer: OnceCell<FutureProducer>,
    subscriptions: Mutex<Vec<KafkaSubscription>>,
    next_subscription: AtomicU64,
    closed: AtomicBool,
}

impl RdKafkaConnection {
    fn ensure_open(&self) -> ClientResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::AlreadyClosed);
        }
        Ok(())
    }

    async fn producer(&self) -> ClientResult<&FutureProducer> {
        self.producer
            .get_or_try_init(|| async { self.config.create::<FutureProducer>().map_err(backend) })
            .await
    }

    async fn topic_exists(&self, topic: &str) -> ClientResult<bool> {
        let admin = Arc::clone(&self.admin);
        let name = topic.to_string();
        tokio::task::spawn_blocking(move || {
            admin
                .inner()
                .fetch_metadata(Some(&name), METADATA_TIMEOUT)
                .map(|metadata| {
                    metadata
                        .topics()
                        .first()
                        .map(|t| t.error().is_none() && !t.partitions().is_empty())
                        .unwrap_or(false)
                })
        })
        .await
        .map_err(|e| ClientError::Backend {
            message: e.to_string(),
        })?
        .map_err(backend)
    }
}

/// Metadata lookups from the admin handle must never create the topic they
/// ask about.
fn admin_config(config: &ClientConfig) -> ClientConfig {
    let mut admin = config.clone();
    admin.set("allow.auto.create.topics", "false");
    admin
}

/// librdkafka takes partition counts as `i32`.
fn partition_count(spec: &TopicSpec) -> ClientResult<i32> {
    i32::try_from(spec.partitions).map_err(|_| ClientError::Rejected {
        reason: format!(
            "Topic '{}' asks for {} partitions, more than {}",
            spec.name,
            spec.partitions,
            i32::MAX
        ),
    })
}

fn inbound_message(message: &BorrowedMessage<'_>, subscription: u64) -> InboundMessage {
    let partition = message.partition().max(0) as u32;
    let offset = message.offset().max(0) as u64;
    InboundMessage {
        payload: message.payload().unwrap_or_default().to_vec(),
        timestamp_ms: message.timestamp().to_millis().unwrap_or_default(),
        partition,
        offset,
        tag: DeliveryTag {
            subscription,
            partition,
            offset,
        },
    }
}

#[async_trait]
impl BrokerConnection for RdKafkaConnection {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_topic(&self, spec: &TopicSpec) -> ClientResult<()> {
        self.ensure_open()?;

        let partitions = partition_count(spec)?;
        let mut topic = NewTopic::new(
            &spec.name,
            partitions,
            TopicReplication::Fixed(i32::from(spec.replication_factor)),
        );
        for (key, value) in &spec.properties {
            topic = topic.set(key, value);
        }

        let results = self
            .admin
            .create_topics(&[topic], &AdminOptions::new())
            .await
            .map_err(backend)?;

        for result in results {
            match result {
                Ok(_) => {}
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    return Err(ClientError::TopicAlreadyExists { topic: name });
                }
                Err((name, code)) => {
                    return Err(ClientError::Rejected {
                        reason: format!("{}: {}", name, code),
                    });
                }
            }
        }

        Ok(())
    }

    async fn send(&self, record: OutboundRecord<'_>) -> ClientResult<()> {
        self.ensure_open()?;
        let producer = self.producer().await?;

        let mut future_record = FutureRecord::<str, [u8]>::to(record.topic)
            .payload(record.payload)
            .timestamp(record.timestamp_ms);
        if let Some(key) = record.key {
            future_record = future_record.key(key);
        }

        producer
            .send(future_record, QUEUE_TIMEOUT)
            .await
            .map(|_| ())
            .map_err(|(e, _)| backend(e))
    }

    async fn subscribe(&self, spec: &SubscribeSpec) -> ClientResult<Subscription> {
        self.ensure_open()?;

        if !self.topic_exists(&spec.topic).await? {
            return Err(ClientError::UnknownTopic {
                topic: spec.topic.clone(),
            });
        }

        let mut config = self.config.clone();
        config.set("group.id", &spec.group);
        if spec.ack_mode == AckMode::Explicit {
            config.set("enable.auto.commit", "false");
        }

        let consumer: StreamConsumer = config.create().map_err(backend)?;
        consumer
            .subscribe(&[spec.topic.as_str()])
            .map_err(backend)?;
        let consumer = Arc::new(consumer);

        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(spec.buffer.max(1));
        let reader = Arc::clone(&consumer);
        let topic = spec.topic.clone();
        let pump = tokio::spawn(async move {
            loop {
                let inbound = match reader.recv().await {
                    Ok(message) => inbound_message(&message, id),
                    Err(e) => {
                        tracing::warn!(topic = %topic, error = %e, "Kafka receive failed");
                        continue;
                    }
                };
                if tx.send(inbound).await.is_err() {
                    return;
                }
            }
        });

        lock(&self.subscriptions).push(KafkaSubscription {
            id,
            topic: spec.topic.clone(),
            consumer,
            pump,
        });

        Ok(Subscription { id, messages: rx })
    }

    async fn acknowledge(&self, tag: &DeliveryTag) -> ClientResult<()> {
        self.ensure_open()?;
        let subscriptions = lock(&self.subscriptions);
        let subscription = subscriptions
            .iter()
            .find(|s| s.id == tag.subscription)
            .ok_or_else(|| ClientError::Rejected {
                reason: format!("Unknown subscription {}", tag.subscription),
            })?;

        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &subscription.topic,
                tag.partition as i32,
                Offset::Offset(tag.offset as i64 + 1),
            )
            .map_err(backend)?;

        subscription
            .consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(backend)
    }

    async fn close(&self) -> ClientResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(ClientError::AlreadyClosed);
        }

        let subscriptions: Vec<KafkaSubscription> = lock(&self.subscriptions).drain(..).collect();
        for subscription in subscriptions {
            subscription.pump.abort();
            subscription.consumer.unsubscribe();
        }

        if let Some(producer) = self.producer.get() {
            let producer = producer.clone();
            let flushed = tokio::task::spawn_blocking(move || producer.flush(FLUSH_TIMEOUT))
                .await
                .map_err(|e| ClientError::Backend {
                    message: e.to_string(),
                })?;
            flushed.map_err(backend)?;
        }

        tracing::debug!(connection = %self.id, "Connection closed");
        Ok(())
    }
}
