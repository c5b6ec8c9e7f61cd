use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::{Ack, Delivery, EventBus, EventBusError, EventMessage, Result, Subscription};

/// Partition count used by [`InMemoryEventBus::new`].
pub const DEFAULT_PARTITIONS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupPartition {
    topic: String,
    group: String,
    partition: i32,
}

impl GroupPartition {
    fn new(topic: &str, group: &str, partition: i32) -> Self {
        Self {
            topic: topic.to_string(),
            group: group.to_string(),
            partition,
        }
    }
}

#[derive(Default)]
struct BusState {
    /// topic -> partition -> log
    topics: HashMap<String, Vec<Vec<EventMessage>>>,
    /// Next offset to read for a group; absent means "from the start".
    committed: HashMap<GroupPartition, i64>,
    /// Which group member owns a partition.
    claims: HashMap<GroupPartition, u64>,
}

struct Shared {
    state: Mutex<BusState>,
    published: Notify,
    available: AtomicBool,
    partitions: usize,
    next_member: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EventBusError::Unavailable(
                "in-memory bus switched off".to_string(),
            ))
        }
    }

    fn release(&self, member: u64) {
        self.lock().claims.retain(|_, owner| *owner != member);
    }
}

/// Process-local bus with Kafka-like semantics.
///
/// Messages are hashed by key onto a fixed number of partitions. Each
/// consumer group keeps its own committed offset per partition, and a
/// partition is read by at most one member of a group at a time. There is
/// no rebalancing: a member that joins while every partition is claimed
/// stays idle until the owners close.
#[derive(Clone)]
pub struct InMemoryEventBus {
    shared: Arc<Shared>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    pub fn with_partitions(partitions: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BusState::default()),
                published: Notify::new(),
                available: AtomicBool::new(true),
                partitions: partitions.max(1),
                next_member: AtomicU64::new(1),
            }),
        }
    }

    /// Simulates a broker outage. Publish, subscribe and commit fail while
    /// the bus is unavailable.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.shared.available.load(Ordering::SeqCst)
    }

    /// The partition a key is routed to.
    pub fn partition_for(&self, key: &str) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shared.partitions as u64) as i32
    }

    /// Every message on `topic`, partition by partition.
    pub fn messages(&self, topic: &str) -> Vec<EventMessage> {
        self.shared
            .lock()
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages published with `key`, in publish order.
    pub fn messages_for_key(&self, topic: &str, key: &str) -> Vec<EventMessage> {
        let partition = self.partition_for(key) as usize;
        self.shared
            .lock()
            .topics
            .get(topic)
            .and_then(|partitions| partitions.get(partition))
            .map(|log| log.iter().filter(|m| m.key == key).cloned().collect())
            .unwrap_or_default()
    }

    /// The next offset `group` will read on `partition`, once committed.
    pub fn committed_offset(&self, topic: &str, group: &str, partition: i32) -> Option<i64> {
        self.shared
            .lock()
            .committed
            .get(&GroupPartition::new(topic, group, partition))
            .copied()
    }

    /// Messages on `topic` not yet committed by `group`.
    pub fn lag(&self, topic: &str, group: &str) -> u64 {
        let state = self.shared.lock();
        let Some(partitions) = state.topics.get(topic) else {
            return 0;
        };
        partitions
            .iter()
            .enumerate()
            .map(|(partition, log)| {
                let committed = state
                    .committed
                    .get(&GroupPartition::new(topic, group, partition as i32))
                    .copied()
                    .unwrap_or(0);
                (log.len() as i64 - committed).max(0) as u64
            })
            .sum()
    }

    fn ensure_topic<'a>(
        state: &'a mut BusState,
        topic: &str,
        partitions: usize,
    ) -> &'a mut Vec<Vec<EventMessage>> {
        state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions])
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, message: EventMessage) -> Result<Ack> {
        self.shared
            .check_available()
            .map_err(|e| EventBusError::PublishFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        let partition = self.partition_for(&message.key);
        let offset = {
            let mut state = self.shared.lock();
            let log = &mut Self::ensure_topic(&mut state, topic, self.shared.partitions)
                [partition as usize];
            log.push(message);
            (log.len() - 1) as i64
        };
        self.shared.published.notify_waiters();

        tracing::debug!(topic, partition, offset, "Message published");
        Ok(Ack {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>> {
        self.shared.check_available()?;

        let member = self.shared.next_member.fetch_add(1, Ordering::SeqCst);
        let mut positions = Vec::new();
        {
            let mut state = self.shared.lock();
            Self::ensure_topic(&mut state, topic, self.shared.partitions);
            for partition in 0..self.shared.partitions as i32 {
                let key = GroupPartition::new(topic, group, partition);
                if state.claims.contains_key(&key) {
                    continue;
                }
                let start = state.committed.get(&key).copied().unwrap_or(0);
                state.claims.insert(key, member);
                positions.push((partition, start));
            }
        }

        if positions.is_empty() {
            tracing::warn!(topic, group, "All partitions already claimed, member will idle");
        } else {
            tracing::info!(topic, group, partitions = positions.len(), "Subscribed");
        }

        Ok(Box::new(InMemorySubscription {
            shared: Arc::clone(&self.shared),
            topic: topic.to_string(),
            group: group.to_string(),
            member,
            positions,
            cursor: 0,
            closed: false,
        }))
    }
}

/// A group member reading from an [`InMemoryEventBus`].
pub struct InMemorySubscription {
    shared: Arc<Shared>,
    topic: String,
    group: String,
    member: u64,
    /// (partition, next offset to hand out)
    positions: Vec<(i32, i64)>,
    cursor: usize,
    closed: bool,
}

impl InMemorySubscription {
    fn poll_next(&mut self) -> Option<Delivery> {
        let state = self.shared.lock();
        let partitions = state.topics.get(&self.topic)?;
        let count = self.positions.len();

        for step in 0..count {
            let index = (self.cursor + step) % count;
            let (partition, offset) = self.positions[index];
            let Some(message) = partitions
                .get(partition as usize)
                .and_then(|log| log.get(offset as usize))
            else {
                continue;
            };

            let delivery = Delivery {
                topic: self.topic.clone(),
                partition,
                offset,
                message: message.clone(),
            };
            self.positions[index].1 += 1;
            self.cursor = (index + 1) % count;
            return Some(delivery);
        }
        None
    }
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> Result<Delivery> {
        if self.closed {
            return Err(EventBusError::SubscriptionFailed {
                topic: self.topic.clone(),
                reason: "subscription closed".to_string(),
            });
        }

        let shared = Arc::clone(&self.shared);
        loop {
            let notified = shared.published.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.poll_next() {
                return Ok(delivery);
            }
            notified.await;
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<()> {
        self.shared
            .check_available()
            .map_err(|e| EventBusError::CommitFailed(e.to_string()))?;

        let key = GroupPartition::new(&delivery.topic, &self.group, delivery.partition);
        let mut state = self.shared.lock();
        if state.claims.get(&key) != Some(&self.member) {
            return Err(EventBusError::CommitFailed(format!(
                "partition {} of '{}' is not owned by this member",
                delivery.partition, delivery.topic
            )));
        }
        state.committed.insert(key, delivery.offset + 1);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.shared.release(self.member);
            self.closed = true;
            tracing::info!(topic = %self.topic, group = %self.group, "Subscription closed");
        }
        Ok(())
    }
}

impl Drop for InMemorySubscription {
    fn drop(&mut self) {
        if !self.closed {
            self.shared.release(self.member);
        }
    }
}
