// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! In-process broker client.
//!
//! A partitioned, append-only log with consumer groups, reachable through
//! the same capability surface as a networked client. Each subscription is
//! fed by its own pump task, so delivery is push-based and a slow consumer
//! only backs up its own channel.
//!
//! Semantics:
//! - keyed records land on `crc32(key) % partitions`, unkeyed ones round robin
//! - members of a group split partitions by `partition % members == index`
//! - every group sees every record (fanout across groups)
//! - a new group starts at the log end unless `auto.offset.reset=earliest`

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use super::{
    BrokerConnection, BrokerConnector, DeliveryTag, InboundMessage, OutboundRecord,
    SubscribeSpec, Subscription, TopicSpec,
};
use crate::config::Properties;
use crate::error::{ClientError, ClientResult};
use crate::types::AckMode;

/// Longest legal topic name.
const MAX_TOPIC_NAME_LEN: usize = 249;

/// Records claimed from one partition per pump iteration.
const CLAIM_BATCH: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Check a destination name: 1..=249 characters of `[A-Za-z0-9._-]`.
pub fn validate_topic_name(name: &str) -> ClientResult<()> {
    let invalid = |reason: String| ClientError::InvalidTopicName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("Topic name cannot be empty".to_string()));
    }

    if name.len() > MAX_TOPIC_NAME_LEN {
        return Err(invalid(format!(
            "Topic name too long: {} chars (max {})",
            name.len(),
            MAX_TOPIC_NAME_LEN
        )));
    }

    if name == "." || name == ".." {
        return Err(invalid("Topic name cannot be '.' or '..'".to_string()));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
    {
        return Err(invalid(
            "Topic name must contain only ASCII alphanumerics, '.', '_' and '-'".to_string(),
        ));
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OffsetReset {
    Earliest,
    Latest,
}

impl OffsetReset {
    fn from_properties(properties: &Properties) -> Self {
        match properties.get("auto.offset.reset").map(String::as_str) {
            Some("earliest") | Some("smallest") | Some("beginning") => Self::Earliest,
            _ => Self::Latest,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredRecord {
    payload: Arc<[u8]>,
    timestamp_ms: i64,
}

/// Delivery state of one group on one topic.
#[derive(Debug)]
struct GroupState {
    /// Member ids in join order.
    members: Vec<u64>,
    /// Next offset to hand out, per partition.
    cursor: Vec<u64>,
    /// First offset not yet consumed, per partition.
    committed: Vec<u64>,
}

impl GroupState {
    /// Every partition restarts at its committed offset, so records handed
    /// out but not yet acknowledged go to whoever owns the partition next.
    fn rewind(&mut self) {
        self.cursor.clone_from(&self.committed);
    }

    fn assigned(&self, member: u64) -> Vec<usize> {
        let Some(index) = self.members.iter().position(|m| *m == member) else {
            return Vec::new();
        };
        let count = self.members.len();
        (0..self.cursor.len()).filter(|p| p % count == index).collect()
    }
}

#[derive(Debug)]
struct ConsumerGroup {
    state: Mutex<GroupState>,
}

impl ConsumerGroup {
    fn new(start: Vec<u64>) -> Self {
        Self {
            state: Mutex::new(GroupState {
                members: Vec::new(),
                cursor: start.clone(),
                committed: start,
            }),
        }
    }

    /// Add a member and rebalance.
    fn join(&self, member: u64) {
        let mut state = lock(&self.state);
        state.members.push(member);
        state.rewind();
    }

    /// Remove a member and rebalance.
    fn leave(&self, member: u64) {
        let mut state = lock(&self.state);
        state.members.retain(|m| *m != member);
        state.rewind();
    }

    fn claim(&self, member: u64, topic: &TopicLog) -> Vec<(u32, u64, StoredRecord)> {
        let mut state = lock(&self.state);
        let mut batch = Vec::new();

        for partition in state.assigned(member) {
            let log = lock(&topic.partitions[partition]);
            let start = state.cursor[partition] as usize;
            let end = (start + CLAIM_BATCH).min(log.len());
            for offset in start..end {
                batch.push((partition as u32, offset as u64, log[offset].clone()));
            }
            state.cursor[partition] = end as u64;
        }

        batch
    }

    fn commit(&self, partition: u32, next_offset: u64) {
        let mut state = lock(&self.state);
        if let Some(slot) = state.committed.get_mut(partition as usize) {
            if next_offset > *slot {
                *slot = next_offset;
            }
        }
    }

    fn committed(&self, partition: u32) -> Option<u64> {
        lock(&self.state).committed.get(partition as usize).copied()
    }

    fn member_count(&self) -> usize {
        lock(&self.state).members.len()
    }
}

#[derive(Debug)]
struct TopicLog {
    name: String,
    durable: bool,
    replication_factor: u16,
    partitions: Vec<Mutex<Vec<StoredRecord>>>,
    round_robin: AtomicU64,
    appended: Notify,
    groups: Mutex<HashMap<String, Arc<ConsumerGroup>>>,
}

impl TopicLog {
    fn new(spec: &TopicSpec) -> Self {
        Self {
            name: spec.name.clone(),
            durable: spec.durable,
            replication_factor: spec.replication_factor,
            partitions: (0..spec.partitions).map(|_| Mutex::new(Vec::new())).collect(),
            round_robin: AtomicU64::new(0),
            appended: Notify::new(),
            groups: Mutex::new(HashMap::new()),
        }
    }

    fn partition_for(&self, key: Option<&str>) -> usize {
        let count = self.partitions.len() as u64;
        let slot = match key {
            Some(key) => crc32fast::hash(key.as_bytes()) as u64,
            None => self.round_robin.fetch_add(1, Ordering::Relaxed),
        };
        (slot % count) as usize
    }

    fn append(&self, record: &OutboundRecord<'_>) -> (u32, u64) {
        let partition = self.partition_for(record.key);
        let offset = {
            let mut log = lock(&self.partitions[partition]);
            log.push(StoredRecord {
                payload: Arc::from(record.payload),
                timestamp_ms: record.timestamp_ms,
            });
            (log.len() - 1) as u64
        };
        self.appended.notify_waiters();
        (partition as u32, offset)
    }

    fn end_offsets(&self) -> Vec<u64> {
        self.partitions
            .iter()
            .map(|p| lock(p).len() as u64)
            .collect()
    }

    fn group(&self, name: &str, reset: OffsetReset) -> Arc<ConsumerGroup> {
        let mut groups = lock(&self.groups);
        let group = groups.entry(name.to_string()).or_insert_with(|| {
            let start = match reset {
                OffsetReset::Earliest => vec![0; self.partitions.len()],
                OffsetReset::Latest => self.end_offsets(),
            };
            Arc::new(ConsumerGroup::new(start))
        });
        Arc::clone(group)
    }

    fn existing_group(&self, name: &str) -> Option<Arc<ConsumerGroup>> {
        lock(&self.groups).get(name).cloned()
    }
}

/// The in-process broker. Share it between connectors with `Arc`.
#[derive(Debug)]
pub struct MemoryBroker {
    listeners: Vec<String>,
    topics: DashMap<String, Arc<TopicLog>>,
    next_id: AtomicU64,
}

impl MemoryBroker {
    /// Create a broker answering on the given listener addresses. The number
    /// of listeners bounds the replication factor a topic may request.
    pub fn new<I, S>(listeners: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            listeners: listeners.into_iter().map(Into::into).collect(),
            topics: DashMap::new(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Connector that opens connections to this broker.
    pub fn connector(self: &Arc<Self>) -> MemoryConnector {
        MemoryConnector {
            broker: Arc::clone(self),
        }
    }

    pub fn partition_count(&self, topic: &str) -> Option<u32> {
        self.topics.get(topic).map(|t| t.partitions.len() as u32)
    }

    pub fn replication_factor(&self, topic: &str) -> Option<u16> {
        self.topics.get(topic).map(|t| t.replication_factor)
    }

    pub fn is_durable(&self, topic: &str) -> Option<bool> {
        self.topics.get(topic).map(|t| t.durable)
    }

    /// Total records across all partitions of a topic.
    pub fn log_len(&self, topic: &str) -> Option<u64> {
        self.topics
            .get(topic)
            .map(|t| t.end_offsets().iter().sum())
    }

    /// Records stored in one partition.
    pub fn partition_len(&self, topic: &str, partition: u32) -> Option<u64> {
        self.topics
            .get(topic)
            .and_then(|t| t.end_offsets().get(partition as usize).copied())
    }

    /// First unconsumed offset of `group` on one partition.
    pub fn committed_offset(&self, topic: &str, group: &str, partition: u32) -> Option<u64> {
        self.topics
            .get(topic)
            .and_then(|t| t.existing_group(group))
            .and_then(|g| g.committed(partition))
    }

    /// Live members of `group` on `topic`.
    pub fn group_members(&self, topic: &str, group: &str) -> usize {
        self.topics
            .get(topic)
            .and_then(|t| t.existing_group(group))
            .map(|g| g.member_count())
            .unwrap_or(0)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn is_listening(&self, endpoints: &[String]) -> bool {
        endpoints.iter().any(|e| self.listeners.contains(e))
    }

    fn topic(&self, name: &str) -> Option<Arc<TopicLog>> {
        self.topics.get(name).map(|t| Arc::clone(t.value()))
    }

    fn create_topic(&self, spec: &TopicSpec) -> ClientResult<()> {
        validate_topic_name(&spec.name)?;

        if spec.partitions == 0 {
            return Err(ClientError::Rejected {
                reason: format!("Topic '{}' needs at least one partition", spec.name),
            });
        }

        if usize::from(spec.replication_factor) > self.listeners.len() {
            return Err(ClientError::Rejected {
                reason: format!(
                    "Replication factor {} exceeds {} available brokers",
                    spec.replication_factor,
                    self.listeners.len()
                ),
            });
        }

        match self.topics.entry(spec.name.clone()) {
            Entry::Occupied(_) => Err(ClientError::TopicAlreadyExists {
                topic: spec.name.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(TopicLog::new(spec)));
                tracing::debug!(
                    topic = %spec.name,
                    partitions = spec.partitions,
                    replication_factor = spec.replication_factor,
                    "Topic created"
                );
                Ok(())
            }
        }
    }
}

/// Opens [`MemoryConnection`]s to a shared [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    broker: Arc<MemoryBroker>,
}

#[async_trait]
impl BrokerConnector for MemoryConnector {
    async fn connect(
        &self,
        endpoints: &[String],
        properties: &Properties,
    ) -> ClientResult<Arc<dyn BrokerConnection>> {
        if !self.broker.is_listening(endpoints) {
            return Err(ClientError::Unreachable {
                endpoints: endpoints.join(","),
            });
        }

        let connection = MemoryConnection {
            id: format!("memory-{}", uuid::Uuid::new_v4()),
            broker: Arc::clone(&self.broker),
            offset_reset: OffsetReset::from_properties(properties),
            closed: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
        };

        tracing::debug!(connection = %connection.id, "Connection opened");
        Ok(Arc::new(connection))
    }
}

struct ActiveSubscription {
    id: u64,
    topic: Arc<TopicLog>,
    group: Arc<ConsumerGroup>,
    member: u64,
    pump: JoinHandle<()>,
}

/// One connection to a [`MemoryBroker`].
pub struct MemoryConnection {
    id: String,
    broker: Arc<MemoryBroker>,
    offset_reset: OffsetReset,
    closed: AtomicBool,
    subscriptions: Mutex<Vec<ActiveSubscription>>,
}

impl MemoryConnection {
    fn ensure_open(&self) -> ClientResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::AlreadyClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_topic(&self, spec: &TopicSpec) -> ClientResult<()> {
        self.ensure_open()?;
        self.broker.create_topic(spec)
    }

    async fn send(&self, record: OutboundRecord<'_>) -> ClientResult<()> {
        self.ensure_open()?;
        let topic = self
            .broker
            .topic(record.topic)
            .ok_or_else(|| ClientError::UnknownTopic {
                topic: record.topic.to_string(),
            })?;
        topic.append(&record);
        Ok(())
    }

    async fn subscribe(&self, spec: &SubscribeSpec) -> ClientResult<Subscription> {
        self.ensure_open()?;
        validate_topic_name(&spec.topic)?;

        let topic = self
            .broker
            .topic(&spec.topic)
            .ok_or_else(|| ClientError::UnknownTopic {
                topic: spec.topic.clone(),
            })?;

        let group = topic.group(&spec.group, self.offset_reset);
        let member = self.broker.next_id();
        let id = self.broker.next_id();
        group.join(member);
        // Existing members re-read their assignment.
        topic.appended.notify_waiters();

        let (tx, rx) = mpsc::channel(spec.buffer.max(1));
        let pump = tokio::spawn(pump(
            Arc::clone(&topic),
            Arc::clone(&group),
            member,
            id,
            spec.ack_mode,
            tx,
        ));

        lock(&self.subscriptions).push(ActiveSubscription {
            id,
            topic,
            group,
            member,
            pump,
        });

        tracing::debug!(
            connection = %self.id,
            topic = %spec.topic,
            group = %spec.group,
            subscription = id,
            "Subscribed"
        );

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
        subscription.group.commit(tag.partition, tag.offset + 1);
        Ok(())
    }

    async fn close(&self) -> ClientResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(ClientError::AlreadyClosed);
        }

        let subscriptions: Vec<ActiveSubscription> = lock(&self.subscriptions).drain(..).collect();
        for subscription in subscriptions {
            subscription.pump.abort();
            subscription.group.leave(subscription.member);
            subscription.topic.appended.notify_waiters();
            tracing::debug!(
                connection = %self.id,
                topic = %subscription.topic.name,
                subscription = subscription.id,
                "Left consumer group"
            );
        }

        tracing::debug!(connection = %self.id, "Connection closed");
        Ok(())
    }
}

/// Moves records from the assigned partitions into the subscription channel.
async fn pump(
    topic: Arc<TopicLog>,
    group: Arc<ConsumerGroup>,
    member: u64,
    subscription: u64,
    ack_mode: AckMode,
    tx: mpsc::Sender<InboundMessage>,
) {
    loop {
        // Registered before claiming so an append in between is not missed.
        let appended = topic.appended.notified();
        tokio::pin!(appended);
        appended.as_mut().enable();

        let batch = group.claim(member, &topic);
        if batch.is_empty() {
            tokio::select! {
                _ = appended => {}
                _ = tx.closed() => return,
            }
            continue;
        }

        for (partition, offset, record) in batch {
            let message = InboundMessage {
                payload: record.payload.to_vec(),
                timestamp_ms: record.timestamp_ms,
                partition,
                offset,
                tag: DeliveryTag {
                    subscription,
                    partition,
                    offset,
                },
            };

            if tx.send(message).await.is_err() {
                return;
            }

            if ack_mode == AckMode::Auto {
                group.commit(partition, offset + 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const LISTENER: &str = "memory:9092";

    fn topic_spec(name: &str, partitions: u32) -> TopicSpec {
        TopicSpec {
            name: name.to_string(),
            partitions,
            replication_factor: 1,
            durable: false,
            properties: Properties::new(),
        }
    }

    fn subscribe_spec(topic: &str, group: &str, ack_mode: AckMode) -> SubscribeSpec {
        SubscribeSpec {
            topic: topic.to_string(),
            group: group.to_string(),
            ack_mode,
            buffer: 64,
        }
    }

    fn record<'a>(topic: &'a str, key: Option<&'a str>, payload: &'a [u8]) -> OutboundRecord<'a> {
        OutboundRecord {
            topic,
            key,
            payload,
            timestamp_ms: 42,
            persistent: false,
        }
    }

    async fn connect(broker: &Arc<MemoryBroker>) -> Arc<dyn BrokerConnection> {
        broker
            .connector()
            .connect(&[LISTENER.to_string()], &Properties::new())
            .await
            .unwrap()
    }

    async fn next(sub: &mut Subscription) -> InboundMessage {
        tokio::time::timeout(Duration::from_secs(2), sub.messages.recv())
            .await
            .expect("delivery timed out")
            .expect("subscription closed")
    }

    #[test]
    fn test_topic_name_validation() {
        assert!(validate_topic_name("bench-0").is_ok());
        assert!(validate_topic_name("test_topic.v1").is_ok());
        assert!(validate_topic_name("").is_err());
        assert!(validate_topic_name("..").is_err());
        assert!(validate_topic_name("has space").is_err());
        assert!(validate_topic_name("slash/topic").is_err());
        assert!(validate_topic_name(&"t".repeat(250)).is_err());
    }

    #[tokio::test]
    async fn test_connect_unreachable() {
        let broker = MemoryBroker::new([LISTENER]);
        let result = broker
            .connector()
            .connect(&["elsewhere:9092".to_string()], &Properties::new())
            .await;
        assert!(matches!(result, Err(ClientError::Unreachable { .. })));
    }

    #[tokio::test]
    async fn test_create_topic_twice() {
        let broker = MemoryBroker::new([LISTENER]);
        let conn = connect(&broker).await;

        conn.create_topic(&topic_spec("bench-0", 4)).await.unwrap();
        let again = conn.create_topic(&topic_spec("bench-0", 4)).await;

        assert!(matches!(again, Err(ClientError::TopicAlreadyExists { .. })));
        assert_eq!(broker.partition_count("bench-0"), Some(4));
    }

    #[tokio::test]
    async fn test_replication_factor_limited_by_listeners() {
        let broker = MemoryBroker::new([LISTENER]);
        let conn = connect(&broker).await;

        let mut spec = topic_spec("bench-0", 1);
        spec.replication_factor = 3;
        let result = conn.create_topic(&spec).await;
        assert!(matches!(result, Err(ClientError::Rejected { .. })));
    }

    #[tokio::test]
    async fn test_keyed_records_stick_to_one_partition() {
        let broker = MemoryBroker::new([LISTENER]);
        let conn = connect(&broker).await;
        conn.create_topic(&topic_spec("keyed", 8)).await.unwrap();

        for _ in 0..10 {
            conn.send(record("keyed", Some("account-7"), b"x")).await.unwrap();
        }

        let partition = (crc32fast::hash(b"account-7") % 8) as u32;
        assert_eq!(broker.partition_len("keyed", partition), Some(10));
        assert_eq!(broker.log_len("keyed"), Some(10));
    }

    #[tokio::test]
    async fn test_unkeyed_records_round_robin() {
        let broker = MemoryBroker::new([LISTENER]);
        let conn = connect(&broker).await;
        conn.create_topic(&topic_spec("spread", 4)).await.unwrap();

        for _ in 0..8 {
            conn.send(record("spread", None, b"x")).await.unwrap();
        }

        for partition in 0..4 {
            assert_eq!(broker.partition_len("spread", partition), Some(2));
        }
    }

    #[tokio::test]
    async fn test_send_to_unknown_topic() {
        let broker = MemoryBroker::new([LISTENER]);
        let conn = connect(&broker).await;
        let result = conn.send(record("missing", None, b"x")).await;
        assert!(matches!(result, Err(ClientError::UnknownTopic { .. })));
    }

    #[tokio::test]
    async fn test_partition_order_is_fifo() {
        let broker = MemoryBroker::new([LISTENER]);
        let conn = connect(&broker).await;
        conn.create_topic(&topic_spec("ordered", 1)).await.unwrap();

        let mut sub = conn
            .subscribe(&subscribe_spec("ordered", "g", AckMode::Auto))
            .await
            .unwrap();

        for i in 0u8..20 {
            conn.send(record("ordered", None, &[i])).await.unwrap();
        }

        for i in 0u8..20 {
            let message = next(&mut sub).await;
            assert_eq!(message.payload, vec![i]);
            assert_eq!(message.offset, u64::from(i));
            assert_eq!(message.timestamp_ms, 42);
        }
    }

    #[tokio::test]
    async fn test_every_group_sees_every_record() {
        let broker = MemoryBroker::new([LISTENER]);
        let conn = connect(&broker).await;
        conn.create_topic(&topic_spec("fanout", 1)).await.unwrap();

        let mut first = conn
            .subscribe(&subscribe_spec("fanout", "a", AckMode::Auto))
            .await
            .unwrap();
        let mut second = conn
            .subscribe(&subscribe_spec("fanout", "b", AckMode::Auto))
            .await
            .unwrap();

        conn.send(record("fanout", None, b"hello")).await.unwrap();

        assert_eq!(next(&mut first).await.payload, b"hello".to_vec());
        assert_eq!(next(&mut second).await.payload, b"hello".to_vec());
    }

    #[tokio::test]
    async fn test_group_members_split_partitions() {
        let broker = MemoryBroker::new([LISTENER]);
        let producer = connect(&broker).await;
        producer.create_topic(&topic_spec("shared", 2)).await.unwrap();

        let c1 = connect(&broker).await;
        let c2 = connect(&broker).await;
        let mut s1 = c1
            .subscribe(&subscribe_spec("shared", "g", AckMode::Auto))
            .await
            .unwrap();
        let mut s2 = c2
            .subscribe(&subscribe_spec("shared", "g", AckMode::Auto))
            .await
            .unwrap();
        assert_eq!(broker.group_members("shared", "g"), 2);

        for _ in 0..4 {
            producer.send(record("shared", None, b"x")).await.unwrap();
        }

        let mut partitions_1 = Vec::new();
        let mut partitions_2 = Vec::new();
        for _ in 0..2 {
            partitions_1.push(next(&mut s1).await.partition);
            partitions_2.push(next(&mut s2).await.partition);
        }

        assert!(partitions_1.iter().all(|p| *p == 0));
        assert!(partitions_2.iter().all(|p| *p == 1));
    }

    #[tokio::test]
    async fn test_latest_reset_skips_backlog() {
        let broker = MemoryBroker::new([LISTENER]);
        let conn = connect(&broker).await;
        conn.create_topic(&topic_spec("backlog", 1)).await.unwrap();
        conn.send(record("backlog", None, b"old")).await.unwrap();

        let mut sub = conn
            .subscribe(&subscribe_spec("backlog", "late", AckMode::Auto))
            .await
            .unwrap();
        conn.send(record("backlog", None, b"new")).await.unwrap();

        assert_eq!(next(&mut sub).await.payload, b"new".to_vec());
    }

    #[tokio::test]
    async fn test_earliest_reset_replays_backlog() {
        let broker = MemoryBroker::new([LISTENER]);
        let producer = connect(&broker).await;
        producer.create_topic(&topic_spec("backlog", 1)).await.unwrap();
        producer.send(record("backlog", None, b"old")).await.unwrap();

        let mut properties = Properties::new();
        properties.insert("auto.offset.reset".to_string(), "earliest".to_string());
        let consumer = broker
            .connector()
            .connect(&[LISTENER.to_string()], &properties)
            .await
            .unwrap();

        let mut sub = consumer
            .subscribe(&subscribe_spec("backlog", "replay", AckMode::Auto))
            .await
            .unwrap();
        assert_eq!(next(&mut sub).await.payload, b"old".to_vec());
    }

    #[tokio::test]
    async fn test_unacknowledged_records_are_redelivered() {
        let broker = MemoryBroker::new([LISTENER]);
        let producer = connect(&broker).await;
        producer.create_topic(&topic_spec("acks", 1)).await.unwrap();

        let first = connect(&broker).await;
        let mut sub = first
            .subscribe(&subscribe_spec("acks", "g", AckMode::Explicit))
            .await
            .unwrap();

        for i in 0u8..3 {
            producer.send(record("acks", None, &[i])).await.unwrap();
        }

        let delivered = next(&mut sub).await;
        first.acknowledge(&delivered.tag).await.unwrap();
        next(&mut sub).await;
        next(&mut sub).await;
        assert_eq!(broker.committed_offset("acks", "g", 0), Some(1));

        first.close().await.unwrap();
        assert_eq!(broker.group_members("acks", "g"), 0);

        let second = connect(&broker).await;
        let mut sub = second
            .subscribe(&subscribe_spec("acks", "g", AckMode::Explicit))
            .await
            .unwrap();
        assert_eq!(next(&mut sub).await.payload, vec![1]);
        assert_eq!(next(&mut sub).await.payload, vec![2]);
    }

    #[tokio::test]
    async fn test_unacknowledged_records_survive_rebalance() {
        let broker = MemoryBroker::new([LISTENER]);
        let producer = connect(&broker).await;
        producer.create_topic(&topic_spec("rebalance", 2)).await.unwrap();

        let first = connect(&broker).await;
        let mut sub_a = first
            .subscribe(&subscribe_spec("rebalance", "g", AckMode::Explicit))
            .await
            .unwrap();

        producer.send(record("rebalance", None, &[0])).await.unwrap();
        producer.send(record("rebalance", None, &[1])).await.unwrap();
        next(&mut sub_a).await;
        next(&mut sub_a).await;

        // The second member takes over partition 1 while its record is unacked.
        let second = connect(&broker).await;
        let mut sub_b = second
            .subscribe(&subscribe_spec("rebalance", "g", AckMode::Explicit))
            .await
            .unwrap();
        assert_eq!(broker.group_members("rebalance", "g"), 2);

        first.close().await.unwrap();

        let mut seen = std::collections::BTreeSet::new();
        while seen.len() < 2 {
            seen.insert(next(&mut sub_b).await.payload[0]);
        }
        assert_eq!(seen.into_iter().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(broker.committed_offset("rebalance", "g", 0), Some(0));
        assert_eq!(broker.committed_offset("rebalance", "g", 1), Some(0));
    }

    #[tokio::test]
    async fn test_auto_ack_commits_on_delivery() {
        let broker = MemoryBroker::new([LISTENER]);
        let conn = connect(&broker).await;
        conn.create_topic(&topic_spec("auto", 1)).await.unwrap();
        let mut sub = conn
            .subscribe(&subscribe_spec("auto", "g", AckMode::Auto))
            .await
            .unwrap();

        conn.send(record("auto", None, b"x")).await.unwrap();
        next(&mut sub).await;

        assert_eq!(broker.committed_offset("auto", "g", 0), Some(1));
    }

    #[tokio::test]
    async fn test_subscribe_unknown_topic() {
        let broker = MemoryBroker::new([LISTENER]);
        let conn = connect(&broker).await;
        let result = conn
            .subscribe(&subscribe_spec("missing", "g", AckMode::Auto))
            .await;
        assert!(matches!(result, Err(ClientError::UnknownTopic { .. })));
    }

    #[tokio::test]
    async fn test_close_twice() {
        let broker = MemoryBroker::new([LISTENER]);
        let conn = connect(&broker).await;

        conn.close().await.unwrap();
        assert_eq!(conn.close().await, Err(ClientError::AlreadyClosed));
        assert_eq!(
            conn.send(record("any", None, b"x")).await,
            Err(ClientError::AlreadyClosed)
        );
    }
}
