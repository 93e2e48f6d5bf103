//! In-process partitioned log with consumer groups.
//!
//! Each topic has a fixed number of partitions; a record's partition is
//! chosen by hashing its key. Consumer groups split a topic's partitions
//! among their members. Membership changes trigger a rebalance that bumps
//! the group generation and rewinds every member to the last committed
//! offset, so uncommitted work is delivered again (at-least-once).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::BusError;
use crate::message::{partition_for, Delivery, Message, Record};
use crate::traits::{EventPublisher, GroupConsumer};

type PartitionId = (String, u32);

#[derive(Debug, Default)]
struct MemberState {
    topics: Vec<String>,
    assigned: Vec<PartitionId>,
    positions: HashMap<PartitionId, u64>,
    cursor: usize,
}

#[derive(Debug, Default)]
struct GroupState {
    generation: u64,
    members: BTreeMap<u64, MemberState>,
    committed: HashMap<PartitionId, u64>,
}

impl GroupState {
    /// Reassign partitions round-robin over subscribed members and rewind
    /// everyone to the committed offsets.
    fn rebalance(&mut self, partitions: u32) {
        self.generation += 1;

        let mut subscribers: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        for (id, member) in &mut self.members {
            member.assigned.clear();
            member.positions.clear();
            member.cursor = 0;
            for topic in &member.topics {
                subscribers.entry(topic.clone()).or_default().push(*id);
            }
        }

        for (topic, ids) in subscribers {
            for partition in 0..partitions {
                let owner = ids[partition as usize % ids.len()];
                let pid = (topic.clone(), partition);
                let start = self.committed.get(&pid).copied().unwrap_or(0);
                if let Some(member) = self.members.get_mut(&owner) {
                    member.positions.insert(pid.clone(), start);
                    member.assigned.push(pid);
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct BusState {
    topics: HashMap<String, Vec<Vec<Message>>>,
    groups: HashMap<String, GroupState>,
    next_member: u64,
}

#[derive(Debug)]
struct Shared {
    partitions: u32,
    state: Mutex<BusState>,
    /// Bumped on every append and rebalance to wake blocked consumers.
    version: watch::Sender<u64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().expect("bus state lock poisoned")
    }

    fn wake(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }
}

/// Partitioned in-memory bus. Cheap to clone; clones share the same log.
#[derive(Debug, Clone)]
pub struct InMemoryBus {
    shared: Arc<Shared>,
}

impl InMemoryBus {
    pub fn new(partitions: u32) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                partitions: partitions.max(1),
                state: Mutex::new(BusState::default()),
                version,
            }),
        }
    }

    pub fn partitions(&self) -> u32 {
        self.shared.partitions
    }

    /// Join `group` as a new member consuming `topics`.
    ///
    /// Joining rebalances the group. The member leaves when dropped.
    pub fn subscribe(&self, topics: &[&str], group: &str) -> MemoryConsumer {
        let member_id = {
            let mut state = self.shared.lock();
            state.next_member += 1;
            let id = state.next_member;
            let group_state = state.groups.entry(group.to_string()).or_default();
            group_state.members.insert(
                id,
                MemberState {
                    topics: topics.iter().map(|t| t.to_string()).collect(),
                    ..Default::default()
                },
            );
            group_state.rebalance(self.shared.partitions);
            info!(
                group,
                member = id,
                generation = group_state.generation,
                members = group_state.members.len(),
                "member joined, group rebalanced"
            );
            id
        };
        self.shared.wake();

        MemoryConsumer {
            shared: self.shared.clone(),
            group: group.to_string(),
            member_id,
        }
    }

    /// Every message on `topic`, ordered by partition then offset.
    pub fn messages(&self, topic: &str) -> Vec<Message> {
        let state = self.shared.lock();
        state
            .topics
            .get(topic)
            .map(|parts| parts.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of messages on `topic` across all partitions.
    pub fn topic_len(&self, topic: &str) -> usize {
        let state = self.shared.lock();
        state
            .topics
            .get(topic)
            .map(|parts| parts.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Next offset `group` will resume from on `topic`/`partition`.
    pub fn committed(&self, group: &str, topic: &str, partition: u32) -> Option<u64> {
        let state = self.shared.lock();
        state
            .groups
            .get(group)?
            .committed
            .get(&(topic.to_string(), partition))
            .copied()
    }

    pub fn generation(&self, group: &str) -> u64 {
        let state = self.shared.lock();
        state.groups.get(group).map(|g| g.generation).unwrap_or(0)
    }
}

#[async_trait]
impl EventPublisher for InMemoryBus {
    async fn publish(&self, message: Message) -> Result<Delivery, BusError> {
        let partition = partition_for(&message.key, self.shared.partitions);
        let delivery = {
            let mut state = self.shared.lock();
            let parts = state
                .topics
                .entry(message.topic.clone())
                .or_insert_with(|| vec![Vec::new(); self.shared.partitions as usize]);
            let log = &mut parts[partition as usize];
            log.push(message);
            Delivery {
                partition,
                offset: (log.len() - 1) as u64,
            }
        };
        self.shared.wake();
        debug!(partition = delivery.partition, offset = delivery.offset, "appended record");
        Ok(delivery)
    }
}

/// One member of a consumer group on an [`InMemoryBus`].
#[derive(Debug)]
pub struct MemoryConsumer {
    shared: Arc<Shared>,
    group: String,
    member_id: u64,
}

impl MemoryConsumer {
    pub fn member_id(&self) -> u64 {
        self.member_id
    }

    /// Partitions currently owned by this member.
    pub fn assignment(&self) -> Vec<(String, u32)> {
        let state = self.shared.lock();
        state
            .groups
            .get(&self.group)
            .and_then(|g| g.members.get(&self.member_id))
            .map(|m| m.assigned.clone())
            .unwrap_or_default()
    }

    /// Fetch the next available record without waiting.
    ///
    /// Assigned partitions are visited round-robin so one busy partition
    /// cannot starve the others.
    pub fn try_recv(&self) -> Result<Option<Record>, BusError> {
        let mut guard = self.shared.lock();
        let BusState { topics, groups, .. } = &mut *guard;

        let group = groups.get_mut(&self.group).ok_or(BusError::Closed)?;
        let generation = group.generation;
        let member = group.members.get_mut(&self.member_id).ok_or(BusError::Closed)?;

        let n = member.assigned.len();
        for step in 0..n {
            let idx = (member.cursor + step) % n;
            let pid = &member.assigned[idx];
            let Some(log) = topics.get(&pid.0).map(|parts| &parts[pid.1 as usize]) else {
                continue;
            };
            let position = member.positions.get(pid).copied().unwrap_or(0);
            if let Some(message) = log.get(position as usize) {
                let record = Record {
                    message: message.clone(),
                    partition: pid.1,
                    offset: position,
                    generation,
                };
                member.positions.insert(pid.clone(), position + 1);
                member.cursor = (idx + 1) % n;
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl GroupConsumer for MemoryConsumer {
    async fn recv(&self) -> Result<Record, BusError> {
        let mut rx = self.shared.version.subscribe();
        loop {
            rx.borrow_and_update();
            if let Some(record) = self.try_recv()? {
                return Ok(record);
            }
            rx.changed().await.map_err(|_| BusError::Closed)?;
        }
    }

    async fn commit(&self, record: &Record) -> Result<(), BusError> {
        let mut state = self.shared.lock();
        let group = state.groups.get_mut(&self.group).ok_or(BusError::Closed)?;

        if record.generation != group.generation {
            return Err(BusError::StaleGeneration {
                group: self.group.clone(),
                seen: record.generation,
                current: group.generation,
            });
        }

        let pid = (record.message.topic.clone(), record.partition);
        let owned = group
            .members
            .get(&self.member_id)
            .is_some_and(|m| m.assigned.contains(&pid));
        if !owned {
            return Err(BusError::NotAssigned {
                topic: pid.0,
                partition: pid.1,
            });
        }

        let next = record.offset + 1;
        let committed = group.committed.entry(pid).or_insert(0);
        *committed = (*committed).max(next);
        Ok(())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.state.lock() {
            if let Some(group) = state.groups.get_mut(&self.group) {
                group.members.remove(&self.member_id);
                group.rebalance(self.shared.partitions);
                info!(
                    group = %self.group,
                    member = self.member_id,
                    generation = group.generation,
                    "member left, group rebalanced"
                );
            }
        }
        self.shared.wake();
    }
}
