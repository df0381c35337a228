// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader-side change history.
//!
//! Received changes are grouped per instance. Inside an instance, changes of
//! a given writer stay in sequence order; changes of different writers keep
//! their reception order.
//!
//! Visibility is decided at read time by the caller-supplied availability
//! predicate (the writer proxy's contiguous watermark) and, under EXCLUSIVE
//! ownership, by the `authoritative` flag computed on reception.

use std::collections::BTreeMap;

use crate::core::guid::Guid;
use crate::core::pool::SerializedPayload;
use crate::dds::{Result, SampleRejectedReason};
use crate::qos::{limit, History, OwnershipKind, QosProfile};
use crate::reliability::{
    CacheChange, InstanceHandle, InstanceState, SampleInfo, SampleState, SequenceNumber, ViewState,
};

use super::instance::ReaderInstance;

pub use super::instance::Owner;

/// Result of [`ReaderHistory::received_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Stored and (eventually) visible.
    Added,
    /// Same writer GUID and sequence number already stored.
    Duplicate,
    /// Processed but not stored (older than everything a KEEP_LAST instance retains).
    Discarded,
    /// Refused by resource limits; the writer will have to resend it.
    Rejected(SampleRejectedReason),
}

impl ReceiveOutcome {
    /// Whether the writer proxy may count the change as received.
    pub fn is_processed(self) -> bool {
        matches!(self, ReceiveOutcome::Added | ReceiveOutcome::Discarded)
    }
}

#[derive(Debug)]
struct StoredSample {
    change: CacheChange,
    sample_state: SampleState,
    /// Sent by the instance owner at reception time (always true for SHARED).
    authoritative: bool,
}

#[derive(Debug, Default)]
struct InstanceEntry {
    state: ReaderInstance,
    samples: Vec<StoredSample>,
}

#[derive(Debug)]
pub struct ReaderHistory {
    history: History,
    ownership: OwnershipKind,
    keyed: bool,
    max_samples: Option<usize>,
    max_instances: Option<usize>,
    max_samples_per_instance: Option<usize>,
    instances: BTreeMap<InstanceHandle, InstanceEntry>,
    total: usize,
    /// Payloads of changes that were not stored, awaiting pool release.
    released: Vec<SerializedPayload>,
}

impl ReaderHistory {
    pub fn new(qos: &QosProfile, keyed: bool) -> Result<Self> {
        qos.validate()?;
        let rl = &qos.resource_limits;
        let max_samples_per_instance = match qos.history {
            History::KeepLast(depth) => Some(depth as usize),
            History::KeepAll => limit(rl.max_samples_per_instance),
        };
        Ok(Self {
            history: qos.history,
            ownership: qos.ownership,
            keyed,
            max_samples: limit(rl.max_samples),
            max_instances: if keyed { limit(rl.max_instances) } else { Some(1) },
            max_samples_per_instance,
            instances: BTreeMap::new(),
            total: 0,
            released: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn exclusive(&self) -> bool {
        self.ownership == OwnershipKind::Exclusive
    }

    fn instance_key(&self, handle: InstanceHandle) -> InstanceHandle {
        if self.keyed {
            handle
        } else {
            InstanceHandle::NIL
        }
    }

    /// Cheap pre-check before a payload is allocated.
    pub fn can_change_be_added(
        &self,
        writer: &Guid,
        payload_len: usize,
        unknown_missing_changes_up_to: usize,
    ) -> bool {
        if let (History::KeepAll, Some(max)) = (self.history, self.max_samples) {
            if self.total + unknown_missing_changes_up_to >= max {
                log::debug!(
                    "[ReaderHistory] no room for {} bytes from {} ({} stored, {} pending)",
                    payload_len,
                    writer,
                    self.total,
                    unknown_missing_changes_up_to
                );
                return false;
            }
        }
        true
    }

    /// Instance key of a change plus, when a new instance needs room, the
    /// empty instance to reclaim once the change is admitted.
    fn locate(&self, handle: InstanceHandle) -> Option<(InstanceHandle, Option<InstanceHandle>)> {
        let key = self.instance_key(handle);
        if self.instances.contains_key(&key)
            || !self.max_instances.is_some_and(|max| self.instances.len() >= max)
        {
            return Some((key, None));
        }
        let empty = self
            .instances
            .iter()
            .find(|(_, entry)| entry.samples.is_empty())
            .map(|(h, _)| *h)?;
        Some((key, Some(empty)))
    }

    fn contains(&self, key: &InstanceHandle, writer: &Guid, seq: SequenceNumber) -> bool {
        self.instances.get(key).is_some_and(|entry| {
            entry
                .samples
                .iter()
                .any(|s| s.change.writer_guid == *writer && s.change.sequence_number == seq)
        })
    }

    /// Decide whether `change` may be stored; `Ok` carries its instance key
    /// and the empty instance to reclaim for it. No instance is created here.
    fn admit(
        &mut self,
        change: &CacheChange,
        unknown_missing_changes_up_to: usize,
    ) -> core::result::Result<(InstanceHandle, Option<InstanceHandle>), ReceiveOutcome> {
        let Some((key, reclaim)) = self.locate(change.instance_handle) else {
            log::warn!(
                "[ReaderHistory] max_instances reached, rejecting {} from {}",
                change.sequence_number,
                change.writer_guid
            );
            return Err(ReceiveOutcome::Rejected(SampleRejectedReason::InstanceLimit));
        };
        if self.contains(&key, &change.writer_guid, change.sequence_number) {
            return Err(ReceiveOutcome::Duplicate);
        }
        let outcome = match self.history {
            History::KeepAll => self.admit_keep_all(&key, unknown_missing_changes_up_to),
            History::KeepLast(_) => self.admit_keep_last(&key, change),
        };
        match outcome {
            ReceiveOutcome::Added => Ok((key, reclaim)),
            other => Err(other),
        }
    }

    /// Store a change received from a matched writer of ownership `strength`.
    ///
    /// `unknown_missing_changes_up_to` is the number of changes from the same
    /// writer still expected below this one; KEEP_ALL keeps room for them.
    /// The payload of a change that is not stored goes to
    /// [`drain_released`](Self::drain_released).
    pub fn received_change(
        &mut self,
        change: CacheChange,
        strength: i32,
        unknown_missing_changes_up_to: usize,
    ) -> ReceiveOutcome {
        let (key, reclaim) = match self.admit(&change, unknown_missing_changes_up_to) {
            Ok(slot) => slot,
            Err(outcome) => {
                self.released.push(change.payload);
                return outcome;
            }
        };
        if let Some(empty) = reclaim {
            log::debug!("[ReaderHistory] reclaiming empty instance {:?}", empty);
            self.instances.remove(&empty);
        }

        let exclusive = self.exclusive();
        let entry = self.instances.entry(key).or_default();
        let authoritative =
            entry
                .state
                .update_state(change.kind, change.writer_guid, strength, exclusive);
        log::trace!(
            "[ReaderHistory] {} from {} stored (authoritative={})",
            change.sequence_number,
            change.writer_guid,
            authoritative
        );

        let pos = entry
            .samples
            .iter()
            .position(|s| {
                s.change.writer_guid == change.writer_guid
                    && s.change.sequence_number > change.sequence_number
            })
            .unwrap_or(entry.samples.len());
        entry.samples.insert(
            pos,
            StoredSample {
                change,
                sample_state: SampleState::NotRead,
                authoritative,
            },
        );
        self.total += 1;
        ReceiveOutcome::Added
    }

    fn admit_keep_all(&self, key: &InstanceHandle, unknown_missing: usize) -> ReceiveOutcome {
        if self.max_samples.is_some_and(|max| self.total >= max) {
            return ReceiveOutcome::Rejected(SampleRejectedReason::ResourceLimit);
        }
        let in_instance = self.instances.get(key).map_or(0, |e| e.samples.len());
        if let Some(max) = self.max_samples_per_instance {
            if in_instance + unknown_missing >= max {
                return ReceiveOutcome::Rejected(SampleRejectedReason::SamplesPerInstanceLimit);
            }
        }
        ReceiveOutcome::Added
    }

    /// KEEP_LAST: replace the oldest sample of a full instance. A change
    /// older than every retained one is dropped but counts as processed.
    fn admit_keep_last(&mut self, key: &InstanceHandle, change: &CacheChange) -> ReceiveOutcome {
        let depth = self.max_samples_per_instance.unwrap_or(usize::MAX);
        let global_full = self.max_samples.is_some_and(|max| self.total >= max);
        let Some(entry) = self.instances.get_mut(key) else {
            if global_full {
                return ReceiveOutcome::Rejected(SampleRejectedReason::ResourceLimit);
            }
            return ReceiveOutcome::Added;
        };
        if entry.samples.len() < depth {
            if global_full {
                return ReceiveOutcome::Rejected(SampleRejectedReason::ResourceLimit);
            }
            return ReceiveOutcome::Added;
        }

        let oldest = entry
            .samples
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.change.source_timestamp)
            .map(|(idx, s)| (idx, s.change.source_timestamp));
        match oldest {
            Some((_, ts)) if change.source_timestamp < ts => {
                log::debug!(
                    "[ReaderHistory] {} from {} older than retained samples, discarded",
                    change.sequence_number,
                    change.writer_guid
                );
                ReceiveOutcome::Discarded
            }
            Some((idx, _)) => {
                let replaced = entry.samples.remove(idx);
                self.released.push(replaced.change.payload);
                self.total -= 1;
                ReceiveOutcome::Added
            }
            None => ReceiveOutcome::Added,
        }
    }

    /// Drop everything from a writer the application could not see yet
    /// (`seq > last_notified_seq`) plus its non-authoritative samples, and
    /// remove it from every instance's alive set.
    pub fn writer_unmatched(
        &mut self,
        writer: &Guid,
        last_notified_seq: SequenceNumber,
    ) -> Vec<SerializedPayload> {
        let mut released = Vec::new();
        for entry in self.instances.values_mut() {
            let mut kept = Vec::with_capacity(entry.samples.len());
            for sample in entry.samples.drain(..) {
                let purge = sample.change.writer_guid == *writer
                    && (sample.change.sequence_number > last_notified_seq || !sample.authoritative);
                if purge {
                    released.push(sample.change.payload);
                } else {
                    kept.push(sample);
                }
            }
            entry.samples = kept;
            entry.state.writer_removed(*writer);
        }
        self.total -= released.len();
        if !released.is_empty() {
            log::debug!(
                "[ReaderHistory] writer {} unmatched, purged {} changes",
                writer,
                released.len()
            );
        }
        released
    }

    /// Record a strength change announced by a writer on every instance.
    pub fn writer_update_its_ownership_strength(&mut self, writer: &Guid, strength: i32) {
        for entry in self.instances.values_mut() {
            entry
                .state
                .writer_update_its_ownership_strength(*writer, strength);
        }
    }

    /// The owner of `handle` missed its deadline.
    pub fn deadline_missed(&mut self, handle: InstanceHandle) -> bool {
        let key = self.instance_key(handle);
        self.instances
            .get_mut(&key)
            .is_some_and(|entry| entry.state.deadline_missed())
    }

    pub fn instance_state(&self, handle: InstanceHandle) -> Option<InstanceState> {
        self.instances
            .get(&self.instance_key(handle))
            .map(|e| e.state.instance_state)
    }

    pub fn current_owner(&self, handle: InstanceHandle) -> Option<Owner> {
        self.instances
            .get(&self.instance_key(handle))
            .map(|e| e.state.current_owner())
    }

    /// Number of stored changes from `writer`.
    pub fn changes_from_writer(&self, writer: &Guid) -> usize {
        self.instances
            .values()
            .flat_map(|e| e.samples.iter())
            .filter(|s| s.change.writer_guid == *writer)
            .count()
    }

    /// Locate the next visible, unread sample.
    fn next_visible<F>(&self, is_available: &F) -> Option<(InstanceHandle, usize)>
    where
        F: Fn(&Guid, SequenceNumber) -> bool,
    {
        self.instances.iter().find_map(|(handle, entry)| {
            entry
                .samples
                .iter()
                .position(|s| {
                    s.sample_state == SampleState::NotRead
                        && s.authoritative
                        && is_available(&s.change.writer_guid, s.change.sequence_number)
                })
                .map(|idx| (*handle, idx))
        })
    }

    fn sample_info(entry: &InstanceEntry, sample: &StoredSample) -> SampleInfo {
        SampleInfo {
            sample_state: sample.sample_state,
            view_state: entry.state.view_state,
            instance_state: entry.state.instance_state,
            disposed_generation_count: entry.state.disposed_generation_count,
            no_writers_generation_count: entry.state.no_writers_generation_count,
            source_timestamp: sample.change.source_timestamp,
            reception_timestamp: sample.change.reception_timestamp,
            instance_handle: sample.change.instance_handle,
            publication_handle: sample.change.writer_guid,
            sample_identity: sample.change.identity(),
            valid_data: sample.change.kind.is_alive(),
        }
    }

    /// Non-destructive read of the next unread visible sample.
    pub fn read_next_sample<F>(&mut self, is_available: F) -> Option<(SerializedPayload, SampleInfo)>
    where
        F: Fn(&Guid, SequenceNumber) -> bool,
    {
        let (handle, idx) = self.next_visible(&is_available)?;
        let entry = self.instances.get_mut(&handle)?;
        let info = {
            let view: &InstanceEntry = entry;
            Self::sample_info(view, view.samples.get(idx)?)
        };
        let sample = entry.samples.get_mut(idx)?;
        sample.sample_state = SampleState::Read;
        entry.state.view_state = ViewState::NotNew;
        Some((sample.change.payload.clone(), info))
    }

    /// Destructive read of the next unread visible sample.
    pub fn take_next_sample<F>(&mut self, is_available: F) -> Option<(SerializedPayload, SampleInfo)>
    where
        F: Fn(&Guid, SequenceNumber) -> bool,
    {
        let (handle, idx) = self.next_visible(&is_available)?;
        let entry = self.instances.get_mut(&handle)?;
        let info = {
            let view: &InstanceEntry = entry;
            Self::sample_info(view, view.samples.get(idx)?)
        };
        let sample = entry.samples.remove(idx);
        entry.state.view_state = ViewState::NotNew;
        self.total -= 1;
        Some((sample.change.payload, info))
    }

    /// Payloads of refused, duplicate or discarded changes.
    pub fn drain_released(&mut self) -> Vec<SerializedPayload> {
        std::mem::take(&mut self.released)
    }

    /// Remove samples already read; returns their payloads for release.
    pub fn remove_read_samples(&mut self) -> Vec<SerializedPayload> {
        let mut released = Vec::new();
        for entry in self.instances.values_mut() {
            let (read, unread): (Vec<_>, Vec<_>) = entry
                .samples
                .drain(..)
                .partition(|s| s.sample_state == SampleState::Read);
            entry.samples = unread;
            released.extend(read.into_iter().map(|s| s.change.payload));
        }
        self.total -= released.len();
        released
    }
}
