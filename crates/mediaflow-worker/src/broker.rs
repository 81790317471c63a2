//! Message broker contract and in-process implementation
//!
//! Topics are split into a fixed number of partitions. A message's key picks
//! its partition, so all messages sharing a key are delivered in publish order
//! to a single consumer. Every consumer group receives every message
//! (at-least-once); within a group each partition has exactly one reader.
//! Only the most recent messages of each partition are retained for groups
//! that subscribe after they were published.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use mediaflow_core::BrokerMessage;

/// Broker errors
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Broker is closed")]
    Closed,

    #[error("Failed to serialize message: {0}")]
    Serialization(String),

    #[error("Consumer group '{group}' is already subscribed to '{topic}'")]
    GroupActive { topic: String, group: String },
}

/// One message as handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
}

/// A consumer group's claim on a topic: one receiver per partition.
#[derive(Debug)]
pub struct Subscription {
    pub topic: String,
    pub group: String,
    pub partitions: Vec<mpsc::UnboundedReceiver<Delivery>>,
}

#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Append `payload` to the partition selected by `key`.
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Join `group` on `topic`. A group that joins late still receives the
    /// topic's backlog.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Subscription, BrokerError>;
}

/// Encode `message` and publish it under its own partition key.
pub async fn publish_message<M: BrokerMessage>(
    broker: &dyn MessageBroker,
    topic: &str,
    message: &M,
) -> Result<(), BrokerError> {
    let payload = message
        .encode()
        .map_err(|e| BrokerError::Serialization(e.to_string()))?;
    broker.publish(topic, &message.partition_key(), payload).await
}

/// Partition for `key`: 64-bit FNV-1a modulo the partition count.
pub fn partition_for(key: &str, partitions: usize) -> usize {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let hash = key.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    });
    (hash % partitions.max(1) as u64) as usize
}

/// Messages retained per partition when no limit is configured.
pub const DEFAULT_BACKLOG_LIMIT: usize = 1024;

struct TopicState {
    /// Most recent messages per partition, replayed to late joiners.
    log: Vec<VecDeque<Delivery>>,
    next_offset: Vec<u64>,
    groups: HashMap<String, Vec<mpsc::UnboundedSender<Delivery>>>,
}

impl TopicState {
    fn new(partitions: usize) -> Self {
        Self {
            log: vec![VecDeque::new(); partitions],
            next_offset: vec![0; partitions],
            groups: HashMap::new(),
        }
    }
}

/// Partitioned broker living inside one process.
///
/// Topics must be declared with [`InMemoryBroker::with_topic`] or
/// [`InMemoryBroker::create_topic`] before use.
pub struct InMemoryBroker {
    partitions: usize,
    backlog_limit: usize,
    topics: Mutex<HashMap<String, TopicState>>,
    closed: AtomicBool,
}

impl InMemoryBroker {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
            backlog_limit: DEFAULT_BACKLOG_LIMIT,
            topics: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Keep at most `limit` messages per partition for late joiners.
    /// Groups already subscribed are unaffected.
    pub fn with_backlog_limit(mut self, limit: usize) -> Self {
        self.backlog_limit = limit;
        self
    }

    pub fn with_topic(self, topic: &str) -> Self {
        self.create_topic(topic);
        self
    }

    pub fn create_topic(&self, topic: &str) {
        self.lock()
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::new(self.partitions));
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    /// Refuse further publishes and end every subscription.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for state in self.lock().values_mut() {
            state.groups.clear();
        }
    }

    /// Messages of `topic` still retained, across all partitions.
    pub fn published(&self, topic: &str) -> Vec<Delivery> {
        let topics = self.lock();
        let mut all: Vec<Delivery> = topics
            .get(topic)
            .map(|state| state.log.iter().flatten().cloned().collect())
            .unwrap_or_default();
        all.sort_by_key(|d| (d.partition, d.offset));
        all
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TopicState>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }

        let mut topics = self.lock();
        let state = topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;

        let partition = partition_for(key, state.log.len());
        let offset = state.next_offset[partition];
        state.next_offset[partition] += 1;
        let delivery = Delivery {
            topic: topic.to_string(),
            partition,
            offset,
            key: key.to_string(),
            payload,
        };

        for (group, senders) in &state.groups {
            if senders[partition].send(delivery.clone()).is_err() {
                tracing::debug!(topic = %topic, group = %group, partition, "Consumer dropped its partition");
            }
        }
        let backlog = &mut state.log[partition];
        backlog.push_back(delivery);
        while backlog.len() > self.backlog_limit {
            backlog.pop_front();
        }

        tracing::trace!(topic = %topic, key = %key, partition, "Message published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Subscription, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }

        let mut topics = self.lock();
        let state = topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;

        if let Some(senders) = state.groups.get(group) {
            if senders.iter().any(|s| !s.is_closed()) {
                return Err(BrokerError::GroupActive {
                    topic: topic.to_string(),
                    group: group.to_string(),
                });
            }
        }

        let mut senders = Vec::with_capacity(state.log.len());
        let mut receivers = Vec::with_capacity(state.log.len());
        for backlog in &state.log {
            let (tx, rx) = mpsc::unbounded_channel();
            for delivery in backlog {
                // The receiver is alive; this cannot fail.
                let _ = tx.send(delivery.clone());
            }
            senders.push(tx);
            receivers.push(rx);
        }
        state.groups.insert(group.to_string(), senders);

        tracing::info!(topic = %topic, group = %group, partitions = receivers.len(), "Consumer group subscribed");

        Ok(Subscription {
            topic: topic.to_string(),
            group: group.to_string(),
            partitions: receivers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_is_stable_and_in_range() {
        for key in ["1", "42", "7036874417766400", ""] {
            let p = partition_for(key, 8);
            assert!(p < 8);
            assert_eq!(p, partition_for(key, 8));
        }
        assert_eq!(partition_for("anything", 1), 0);
    }

    #[tokio::test]
    async fn same_key_is_delivered_in_order_on_one_partition() {
        let broker = InMemoryBroker::new(4).with_topic("ingest");
        let mut sub = broker.subscribe("ingest", "g").await.unwrap();

        for i in 0..5u8 {
            broker.publish("ingest", "42", vec![i]).await.unwrap();
        }

        let partition = partition_for("42", 4);
        let rx = &mut sub.partitions[partition];
        for i in 0..5u8 {
            let delivery = rx.recv().await.unwrap();
            assert_eq!(delivery.payload, vec![i]);
            assert_eq!(delivery.offset, u64::from(i));
        }
        for (idx, other) in sub.partitions.iter_mut().enumerate() {
            if idx != partition {
                assert!(other.try_recv().is_err());
            }
        }
    }

    #[tokio::test]
    async fn late_group_receives_backlog() {
        let broker = InMemoryBroker::new(2).with_topic("completion");
        broker.publish("completion", "1", b"a".to_vec()).await.unwrap();
        broker.publish("completion", "1", b"b".to_vec()).await.unwrap();

        let mut sub = broker.subscribe("completion", "late").await.unwrap();
        let rx = &mut sub.partitions[partition_for("1", 2)];
        assert_eq!(rx.recv().await.unwrap().payload, b"a".to_vec());
        assert_eq!(rx.recv().await.unwrap().payload, b"b".to_vec());
    }

    #[tokio::test]
    async fn every_group_sees_every_message() {
        let broker = InMemoryBroker::new(1).with_topic("ingest");
        let mut a = broker.subscribe("ingest", "a").await.unwrap();
        let mut b = broker.subscribe("ingest", "b").await.unwrap();
        broker.publish("ingest", "k", b"x".to_vec()).await.unwrap();

        assert_eq!(a.partitions[0].recv().await.unwrap().payload, b"x".to_vec());
        assert_eq!(b.partitions[0].recv().await.unwrap().payload, b"x".to_vec());
    }

    #[tokio::test]
    async fn unknown_topic_and_closed_broker_are_errors() {
        let broker = InMemoryBroker::new(1).with_topic("ingest");
        assert!(matches!(
            broker.publish("nope", "k", vec![]).await,
            Err(BrokerError::UnknownTopic(_))
        ));

        let _sub = broker.subscribe("ingest", "g").await.unwrap();
        assert!(matches!(
            broker.subscribe("ingest", "g").await,
            Err(BrokerError::GroupActive { .. })
        ));

        broker.close();
        assert!(matches!(
            broker.publish("ingest", "k", vec![]).await,
            Err(BrokerError::Closed)
        ));
    }

    #[tokio::test]
    async fn backlog_is_bounded_but_live_groups_see_everything() {
        let broker = InMemoryBroker::new(1)
            .with_backlog_limit(3)
            .with_topic("ingest");
        let mut live = broker.subscribe("ingest", "live").await.unwrap();

        for i in 0..10u8 {
            broker.publish("ingest", "k", vec![i]).await.unwrap();
        }

        for i in 0..10u8 {
            let delivery = live.partitions[0].recv().await.unwrap();
            assert_eq!(delivery.payload, vec![i]);
            assert_eq!(delivery.offset, u64::from(i));
        }

        let retained: Vec<u64> = broker.published("ingest").iter().map(|d| d.offset).collect();
        assert_eq!(retained, vec![7, 8, 9]);

        let mut late = broker.subscribe("ingest", "late").await.unwrap();
        assert_eq!(late.partitions[0].recv().await.unwrap().offset, 7);
        assert_eq!(late.partitions[0].recv().await.unwrap().offset, 8);
        assert_eq!(late.partitions[0].recv().await.unwrap().offset, 9);
        assert!(late.partitions[0].try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_subscription_frees_the_group() {
        let broker = InMemoryBroker::new(1).with_topic("ingest");
        let sub = broker.subscribe("ingest", "g").await.unwrap();
        drop(sub);
        broker.publish("ingest", "k", b"x".to_vec()).await.unwrap();

        let mut again = broker.subscribe("ingest", "g").await.unwrap();
        assert_eq!(again.partitions[0].recv().await.unwrap().payload, b"x".to_vec());
        assert_eq!(broker.published("ingest").len(), 1);
    }
}
