// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer-side change history.
//!
//! Stores the changes produced by one local writer in sequence-number order
//! and enforces KEEP_LAST / KEEP_ALL retention plus resource limits.
//!
//! The history itself never blocks and knows nothing about matched readers.
//! Before every insert the owning writer asks [`WriterHistory::reserve`] what
//! has to happen first:
//!
//! - [`Capacity::Ready`]: insert right away
//! - [`Capacity::Evict`]: KEEP_LAST, drop the named change unconditionally
//! - [`Capacity::WaitFor`]: KEEP_ALL, the named change must be acknowledged
//!   by every reader (or the deadline expires) before it can be dropped
//!
//! The writer loops on `reserve` under its lock, so the history is never
//! mutated when a blocking insert times out.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Instant;

use crate::core::pool::SerializedPayload;
use crate::core::time::Time;
use crate::dds::{Error, Result};
use crate::qos::{limit, History, QosProfile};
use crate::reliability::{CacheChange, InstanceHandle, SequenceNumber};

/// What must happen before the next change can be inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    Ready,
    /// KEEP_LAST: remove this change, then ask again.
    Evict(SequenceNumber),
    /// KEEP_ALL: this change must be removable (acknowledged) first.
    WaitFor(SequenceNumber),
}

/// Per-key bookkeeping of a keyed writer history.
#[derive(Debug, Default)]
pub struct WriterInstance {
    /// Serialized key, kept for re-registration and unregister messages.
    pub key_payload: Option<SerializedPayload>,
    /// Sequence numbers of this instance, ascending.
    pub changes: VecDeque<SequenceNumber>,
    pub registered: bool,
    pub next_deadline: Option<Instant>,
}

#[derive(Debug)]
pub struct WriterHistory {
    history: History,
    keyed: bool,
    max_samples: Option<usize>,
    max_instances: Option<usize>,
    max_samples_per_instance: Option<usize>,
    changes: VecDeque<CacheChange>,
    instances: BTreeMap<InstanceHandle, WriterInstance>,
    last_sequence_number: SequenceNumber,
}

impl WriterHistory {
    /// Build from the writer's QoS. Limits `<= 0` are unlimited; a keyed
    /// KEEP_LAST history holds at most `depth * max_instances` changes.
    pub fn new(qos: &QosProfile, keyed: bool) -> Result<Self> {
        qos.validate()?;
        let rl = &qos.resource_limits;
        let max_instances = if keyed { limit(rl.max_instances) } else { Some(1) };
        let (max_samples, max_samples_per_instance) = match qos.history {
            History::KeepLast(depth) => {
                let depth = depth as usize;
                let total = match max_instances {
                    Some(n) => Some(depth.saturating_mul(n)),
                    None => limit(rl.max_samples),
                };
                (total, Some(depth))
            }
            History::KeepAll => (limit(rl.max_samples), limit(rl.max_samples_per_instance)),
        };

        Ok(Self {
            history: qos.history,
            keyed,
            max_samples,
            max_instances,
            max_samples_per_instance,
            changes: VecDeque::new(),
            instances: BTreeMap::new(),
            last_sequence_number: SequenceNumber::ZERO,
        })
    }

    pub fn history_kind(&self) -> History {
        self.history
    }

    pub fn is_keyed(&self) -> bool {
        self.keyed
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.max_samples.is_some_and(|max| self.changes.len() >= max)
    }

    pub fn max_samples(&self) -> Option<usize> {
        self.max_samples
    }

    /// Highest sequence number ever assigned (ZERO before the first add).
    pub fn last_sequence_number(&self) -> SequenceNumber {
        self.last_sequence_number
    }

    pub fn next_sequence_number(&self) -> SequenceNumber {
        self.last_sequence_number.next()
    }

    fn instance_key(&self, handle: InstanceHandle) -> InstanceHandle {
        if self.keyed {
            handle
        } else {
            InstanceHandle::NIL
        }
    }

    /// Find the instance for `handle`, creating it when allowed. When
    /// `max_instances` is reached, an instance holding no changes and no
    /// registration is reclaimed.
    fn find_or_add_instance(&mut self, handle: InstanceHandle) -> Result<&mut WriterInstance> {
        let key = self.instance_key(handle);
        if !self.instances.contains_key(&key) {
            if self.max_instances.is_some_and(|max| self.instances.len() >= max) {
                let reclaim = self
                    .instances
                    .iter()
                    .find(|(_, inst)| inst.changes.is_empty() && !inst.registered)
                    .map(|(h, _)| *h);
                match reclaim {
                    Some(old) => {
                        log::debug!("[WriterHistory] reclaiming empty instance {:?}", old);
                        self.instances.remove(&old);
                    }
                    None => {
                        log::warn!("[WriterHistory] max_instances reached, rejecting {:?}", key);
                        return Err(Error::OutOfResources("max_instances reached".to_string()));
                    }
                }
            }
            self.instances.insert(key, WriterInstance::default());
        }
        self.instances
            .get_mut(&key)
            .ok_or_else(|| Error::InvalidState("instance vanished".to_string()))
    }

    /// Decide whether a change for `handle` can be inserted now.
    ///
    /// Leaves the history untouched; fails with `OutOfResources` when the
    /// change would need a new instance and `max_instances` is exhausted.
    pub fn reserve(&self, handle: InstanceHandle) -> Result<Capacity> {
        let key = self.instance_key(handle);
        let instance_oldest = match self.instances.get(&key) {
            Some(instance) => instance
                .changes
                .front()
                .map(|oldest| (instance.changes.len(), *oldest)),
            None => {
                if !self.has_instance_room() {
                    log::warn!("[WriterHistory] max_instances reached, rejecting {:?}", key);
                    return Err(Error::OutOfResources("max_instances reached".to_string()));
                }
                None
            }
        };

        if let (Some(max), Some((len, oldest))) = (self.max_samples_per_instance, instance_oldest) {
            if len >= max {
                return Ok(self.capacity_for(oldest));
            }
        }

        if self.is_full() {
            if let Some(oldest) = self.changes.front().map(|c| c.sequence_number) {
                return Ok(self.capacity_for(oldest));
            }
        }
        Ok(Capacity::Ready)
    }

    fn capacity_for(&self, oldest: SequenceNumber) -> Capacity {
        match self.history {
            History::KeepLast(_) => Capacity::Evict(oldest),
            History::KeepAll => Capacity::WaitFor(oldest),
        }
    }

    /// A new instance fits, possibly by reclaiming an empty unregistered one.
    fn has_instance_room(&self) -> bool {
        self.max_instances.map_or(true, |max| {
            self.instances.len() < max
                || self
                    .instances
                    .values()
                    .any(|inst| inst.changes.is_empty() && !inst.registered)
        })
    }

    /// Insert a change after a successful [`reserve`](Self::reserve).
    ///
    /// Assigns the next sequence number and stamps the source timestamp when
    /// the caller left it at zero.
    pub fn add_change(&mut self, mut change: CacheChange) -> Result<SequenceNumber> {
        let seq = self.last_sequence_number.next();
        change.sequence_number = seq;
        if change.source_timestamp == Time::ZERO {
            change.source_timestamp = Time::now();
        }
        let handle = self.instance_key(change.instance_handle);
        let instance = self.find_or_add_instance(handle)?;
        instance.changes.push_back(seq);

        self.last_sequence_number = seq;
        log::trace!(
            "[WriterHistory] added {} ({:?}, {} bytes)",
            seq,
            change.kind,
            change.payload.len()
        );
        self.changes.push_back(change);
        Ok(seq)
    }

    /// Remove a specific change. Returns `None` when it is not present, so
    /// removing twice is harmless.
    pub fn remove_change(&mut self, seq: SequenceNumber) -> Option<CacheChange> {
        let idx = self
            .changes
            .binary_search_by(|c| c.sequence_number.cmp(&seq))
            .ok()?;
        let change = self.changes.remove(idx)?;
        let key = self.instance_key(change.instance_handle);
        if let Some(instance) = self.instances.get_mut(&key) {
            instance.changes.retain(|s| *s != seq);
        }
        Some(change)
    }

    pub fn remove_min_change(&mut self) -> Option<CacheChange> {
        let seq = self.changes.front()?.sequence_number;
        self.remove_change(seq)
    }

    pub fn remove_all_changes(&mut self) -> Vec<CacheChange> {
        for instance in self.instances.values_mut() {
            instance.changes.clear();
        }
        self.changes.drain(..).collect()
    }

    /// Remove the changes of one instance with sequence number `<= up_to`.
    pub fn remove_instance_changes(
        &mut self,
        handle: InstanceHandle,
        up_to: SequenceNumber,
    ) -> Vec<CacheChange> {
        let key = self.instance_key(handle);
        let Some(instance) = self.instances.get(&key) else {
            return Vec::new();
        };
        let doomed: Vec<SequenceNumber> = instance
            .changes
            .iter()
            .copied()
            .take_while(|s| *s <= up_to)
            .collect();
        doomed
            .into_iter()
            .filter_map(|seq| self.remove_change(seq))
            .collect()
    }

    pub fn get_min_change(&self) -> Option<&CacheChange> {
        self.changes.front()
    }

    pub fn get_max_change(&self) -> Option<&CacheChange> {
        self.changes.back()
    }

    pub fn get_change(&self, seq: SequenceNumber) -> Option<&CacheChange> {
        self.changes
            .binary_search_by(|c| c.sequence_number.cmp(&seq))
            .ok()
            .and_then(|idx| self.changes.get(idx))
    }

    /// Changes in ascending sequence order.
    pub fn changes(&self) -> impl Iterator<Item = &CacheChange> {
        self.changes.iter()
    }

    /// Changes with sequence number in `[from, to]`.
    pub fn changes_in_range(
        &self,
        from: SequenceNumber,
        to: SequenceNumber,
    ) -> impl Iterator<Item = &CacheChange> {
        let start = self.changes.partition_point(|c| c.sequence_number < from);
        self.changes
            .range(start..)
            .take_while(move |c| c.sequence_number <= to)
    }

    /// Register a key so that it survives instance reclamation.
    pub fn register_instance(
        &mut self,
        handle: InstanceHandle,
        key_payload: Option<SerializedPayload>,
    ) -> Result<()> {
        if !self.keyed {
            return Err(Error::PreconditionNotMet(
                "register_instance on a keyless topic".to_string(),
            ));
        }
        let instance = self.find_or_add_instance(handle)?;
        instance.registered = true;
        if key_payload.is_some() {
            instance.key_payload = key_payload;
        }
        Ok(())
    }

    /// Mark an instance unregistered; its entry is reclaimed once empty.
    pub fn unregister_instance(&mut self, handle: InstanceHandle) -> bool {
        let key = self.instance_key(handle);
        match self.instances.get_mut(&key) {
            Some(instance) => {
                instance.registered = false;
                true
            }
            None => false,
        }
    }

    pub fn is_key_registered(&self, handle: InstanceHandle) -> bool {
        self.instances
            .get(&self.instance_key(handle))
            .is_some_and(|inst| inst.registered || !inst.changes.is_empty())
    }

    pub fn instance(&self, handle: InstanceHandle) -> Option<&WriterInstance> {
        self.instances.get(&self.instance_key(handle))
    }

    /// Most recent change of an instance still in history.
    pub fn instance_last_change(&self, handle: InstanceHandle) -> Option<SequenceNumber> {
        self.instance(handle)
            .and_then(|inst| inst.changes.back().copied())
    }

    /// Changes followed by at least `depth` newer changes of the same
    /// instance; a KEEP_LAST reader of that depth would never keep them.
    pub fn superseded_changes(&self, depth: usize) -> BTreeSet<SequenceNumber> {
        self.instances
            .values()
            .flat_map(|inst| {
                let stale = inst.changes.len().saturating_sub(depth);
                inst.changes.iter().take(stale).copied()
            })
            .collect()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn set_next_deadline(&mut self, handle: InstanceHandle, at: Instant) {
        let key = self.instance_key(handle);
        if let Some(instance) = self.instances.get_mut(&key) {
            instance.next_deadline = Some(at);
        }
    }

    /// Earliest pending instance deadline.
    pub fn next_deadline(&self) -> Option<(InstanceHandle, Instant)> {
        self.instances
            .iter()
            .filter_map(|(h, inst)| inst.next_deadline.map(|at| (*h, at)))
            .min_by_key(|(_, at)| *at)
    }
}
