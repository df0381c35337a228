// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable reader keeping one [`WriterProxy`] per matched writer.
//!
//! Inbound submessages are handed over by the participant's receive path.
//! The reader lock covers the history and every proxy; ACKNACKs are built
//! under it and sent after it is released, listener handlers run last.
//!
//! Samples become visible to `read`/`take` only up to each writer's
//! contiguous watermark (`available_changes_max`), so out-of-order
//! delivery is never exposed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use super::fragments::FragmentLimits;
use super::writer_proxy::WriterProxy;
use crate::core::endpoint::{EndpointContext, Outbound, OutboundBatch};
use crate::core::guid::{Guid, GuidPrefix};
use crate::core::pool::SerializedPayload;
use crate::core::time::Time;
use crate::dds::{
    Error, LivelinessChangedStatus, ReaderListener, Result, SampleLostStatus, SampleRejectedReason,
    SampleRejectedStatus, SubscriptionMatchedStatus,
};
use crate::history::{ReaderHistory, ReceiveOutcome};
use crate::protocol::discovery::{ReaderProxyData, WriterProxyData};
use crate::protocol::rtps::{
    AckNackSubmessage, DataFragSubmessage, DataSubmessage, GapSubmessage, HeartbeatSubmessage,
    NackFragSubmessage, Submessage,
};
use crate::qos::ReliabilityKind;
use crate::reliability::{
    CacheChange, ChangeKind, FragmentNumberSet, InstanceHandle, SampleInfo, SequenceNumber,
};
use crate::runtime::{EventId, EventOutcome};

/// Longest `[gap_start, gap_list.base)` run applied one number at a time.
const MAX_GAP_RUN: u64 = 4096;

enum ReaderEvent {
    DataAvailable,
    Matched(SubscriptionMatchedStatus),
    Lost(SampleLostStatus),
    Rejected(SampleRejectedStatus),
    Liveliness(LivelinessChangedStatus),
}

#[derive(Default)]
struct Counters {
    total_matched: u32,
    lost: u32,
    rejected: u32,
    alive: u32,
    not_alive: u32,
}

struct ReaderState {
    history: ReaderHistory,
    writers: BTreeMap<Guid, WriterProxy>,
    counters: Counters,
    /// Writers owed an ACKNACK once the response delay elapses.
    acknack_due: BTreeSet<Guid>,
    acknack_timer: bool,
    /// Last reception per instance, for the requested deadline.
    last_sample: HashMap<InstanceHandle, Instant>,
    timers: Vec<EventId>,
    enabled: bool,
}

/// Sample metadata gathered from DATA or a reassembled DATA_FRAG.
struct Incoming<'a> {
    writer: Guid,
    seq: SequenceNumber,
    kind: ChangeKind,
    handle: InstanceHandle,
    source_timestamp: Time,
    bytes: &'a [u8],
}

pub struct StatefulReader {
    guid: Guid,
    data: ReaderProxyData,
    ctx: EndpointContext,
    listener: ReaderListener,
    state: Mutex<ReaderState>,
    self_ref: Weak<StatefulReader>,
}

impl StatefulReader {
    pub fn new(
        data: ReaderProxyData,
        keyed: bool,
        ctx: EndpointContext,
        listener: ReaderListener,
    ) -> Result<Arc<Self>> {
        ctx.config.validate()?;
        let history = ReaderHistory::new(&data.qos, keyed)?;
        let reader = Arc::new_cyclic(|self_ref| Self {
            guid: data.guid,
            data,
            ctx,
            listener,
            state: Mutex::new(ReaderState {
                history,
                writers: BTreeMap::new(),
                counters: Counters::default(),
                acknack_due: BTreeSet::new(),
                acknack_timer: false,
                last_sample: HashMap::new(),
                timers: Vec::new(),
                enabled: true,
            }),
            self_ref: self_ref.clone(),
        });
        reader.start_timers()?;
        log::debug!(
            "[StatefulReader] {} created on topic '{}'",
            reader.guid,
            reader.data.topic_name
        );
        Ok(reader)
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn data(&self) -> &ReaderProxyData {
        &self.data
    }

    fn is_reliable(&self) -> bool {
        self.data.qos.reliability.kind == ReliabilityKind::Reliable
    }

    fn schedule<F>(&self, after: Duration, f: F) -> Result<EventId>
    where
        F: Fn(&StatefulReader) -> EventOutcome + Send + 'static,
    {
        let timers = self.ctx.timers()?;
        let weak = self.self_ref.clone();
        Ok(timers.schedule(after, move || match weak.upgrade() {
            Some(reader) => f(&reader),
            None => EventOutcome::Done,
        }))
    }

    fn start_timers(&self) -> Result<()> {
        let mut ids = Vec::new();
        let lease = self.data.qos.liveliness.lease_duration;
        if lease != Duration::MAX {
            ids.push(self.schedule(lease, move |r| r.on_liveliness_timer(lease))?);
        }
        if let Some(period) = self.data.qos.deadline {
            ids.push(self.schedule(period, move |r| r.on_deadline_timer(period))?);
        }
        self.state.lock().timers = ids;
        Ok(())
    }

    // ========================================================================
    // Discovery side
    // ========================================================================

    /// Match a remote writer. Re-adding a known writer refreshes its data
    /// and ownership strength.
    pub fn matched_writer_add(&self, data: WriterProxyData) -> Result<()> {
        if data.topic_name != self.data.topic_name {
            return Err(Error::PreconditionNotMet(format!(
                "writer topic '{}' does not match '{}'",
                data.topic_name, self.data.topic_name
            )));
        }
        if self.is_reliable() && data.qos.reliability.kind != ReliabilityKind::Reliable {
            log::warn!(
                "[StatefulReader] {} requests reliable, writer {} offers best effort",
                self.guid,
                data.guid
            );
            return Err(Error::PreconditionNotMet("incompatible reliability".to_string()));
        }

        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            if !state.enabled {
                return Err(Error::PreconditionNotMet("reader is shut down".to_string()));
            }
            let ReaderState {
                history, writers, ..
            } = &mut *state;
            if let Some(proxy) = writers.get_mut(&data.guid) {
                let strength = data.qos.ownership_strength;
                if strength != proxy.ownership_strength() {
                    proxy.update_ownership_strength(strength);
                    history.writer_update_its_ownership_strength(&data.guid, strength);
                }
                proxy.update(data);
                return Ok(());
            }

            let writer_guid = data.guid;
            writers.insert(writer_guid, WriterProxy::new(data, SequenceNumber::ZERO));
            let current = state.writers.len() as u32;
            let c = &mut state.counters;
            c.total_matched += 1;
            c.alive += 1;
            events.push(ReaderEvent::Matched(SubscriptionMatchedStatus {
                total_count: c.total_matched,
                total_count_change: 1,
                current_count: current,
                current_count_change: 1,
                last_publication_handle: Some(writer_guid),
            }));
            events.push(self.liveliness_event(&state.counters, writer_guid, 1, 0));
            log::debug!("[StatefulReader] {} matched writer {}", self.guid, writer_guid);
        }
        self.fire(events);
        Ok(())
    }

    /// Unmatch a writer, dropping whatever the application has not been
    /// notified of yet.
    pub fn matched_writer_remove(&self, writer: &Guid) -> bool {
        let mut events = Vec::new();
        let released = {
            let mut state = self.state.lock();
            let Some(proxy) = state.writers.remove(writer) else {
                return false;
            };
            state.acknack_due.remove(writer);
            let released = state.history.writer_unmatched(writer, proxy.last_notified());
            let current = state.writers.len() as u32;
            let c = &mut state.counters;
            let (alive_change, not_alive_change) = if proxy.is_alive() {
                c.alive = c.alive.saturating_sub(1);
                (-1, 0)
            } else {
                c.not_alive = c.not_alive.saturating_sub(1);
                (0, -1)
            };
            events.push(ReaderEvent::Matched(SubscriptionMatchedStatus {
                total_count: c.total_matched,
                total_count_change: 0,
                current_count: current,
                current_count_change: -1,
                last_publication_handle: Some(*writer),
            }));
            events.push(self.liveliness_event(&state.counters, *writer, alive_change, not_alive_change));
            released
        };
        for payload in released {
            self.ctx.pool.release(payload);
        }
        log::debug!("[StatefulReader] {} unmatched writer {}", self.guid, writer);
        self.fire(events);
        true
    }

    pub fn matched_writer_is_matched(&self, writer: &Guid) -> bool {
        self.state.lock().writers.contains_key(writer)
    }

    pub fn matched_writer_count(&self) -> usize {
        self.state.lock().writers.len()
    }

    /// A matched writer announced a new ownership strength.
    pub fn update_writer_ownership_strength(&self, writer: &Guid, strength: i32) -> bool {
        let mut state = self.state.lock();
        let ReaderState {
            history, writers, ..
        } = &mut *state;
        match writers.get_mut(writer) {
            Some(proxy) => {
                proxy.update_ownership_strength(strength);
                history.writer_update_its_ownership_strength(writer, strength);
                true
            }
            None => false,
        }
    }

    /// Highest number from `writer` the application may see.
    pub fn available_changes_max(&self, writer: &Guid) -> Option<SequenceNumber> {
        self.state
            .lock()
            .writers
            .get(writer)
            .map(WriterProxy::available_changes_max)
    }

    // ========================================================================
    // Application side
    // ========================================================================

    /// Copy of the next unread visible sample, marked read.
    pub fn read_next_sample(&self) -> Result<(Vec<u8>, SampleInfo)> {
        let mut state = self.state.lock();
        let ReaderState {
            history, writers, ..
        } = &mut *state;
        let (payload, info) = history
            .read_next_sample(|w, seq| available(writers, w, seq))
            .ok_or(Error::NoData)?;
        Ok((payload.into_vec(), info))
    }

    /// Remove and return the next unread visible sample.
    pub fn take_next_sample(&self) -> Result<(Vec<u8>, SampleInfo)> {
        let (payload, info) = {
            let mut state = self.state.lock();
            let ReaderState {
                history, writers, ..
            } = &mut *state;
            history
                .take_next_sample(|w, seq| available(writers, w, seq))
                .ok_or(Error::NoData)?
        };
        let bytes = payload.as_slice().to_vec();
        self.ctx.pool.release(payload);
        Ok((bytes, info))
    }

    /// Drop samples the application already read.
    pub fn remove_read_samples(&self) -> usize {
        let released = self.state.lock().history.remove_read_samples();
        let count = released.len();
        for payload in released {
            self.ctx.pool.release(payload);
        }
        count
    }

    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    pub fn instance_state(&self, handle: InstanceHandle) -> Option<crate::reliability::InstanceState> {
        self.state.lock().history.instance_state(handle)
    }

    /// Current EXCLUSIVE owner of an instance.
    pub fn current_owner(&self, handle: InstanceHandle) -> Option<Guid> {
        self.state
            .lock()
            .history
            .current_owner(handle)
            .filter(|o| !o.is_none())
            .map(|o| o.writer)
    }

    // ========================================================================
    // Wire side
    // ========================================================================

    pub fn on_data(&self, source: GuidPrefix, timestamp: Option<Time>, data: &DataSubmessage) {
        let (kind, handle) = match &data.inline_qos {
            Some(qos) => (
                qos.status_info.map_or(ChangeKind::Alive, ChangeKind::from_status_info),
                qos.key_hash.unwrap_or(InstanceHandle::NIL),
            ),
            None => (ChangeKind::Alive, InstanceHandle::NIL),
        };
        let bytes = if kind.is_alive() && !data.key_only {
            data.payload.as_deref().unwrap_or(&[])
        } else {
            &[]
        };
        let incoming = Incoming {
            writer: Guid::new(source, data.writer_id),
            seq: data.writer_sn,
            kind,
            handle,
            source_timestamp: timestamp.unwrap_or_else(Time::now),
            bytes,
        };
        self.receive(incoming);
    }

    /// One DATA_FRAG; the sample is delivered once every fragment arrived.
    pub fn on_data_frag(&self, source: GuidPrefix, timestamp: Option<Time>, frag: &DataFragSubmessage) {
        let writer = Guid::new(source, frag.writer_id);
        let assembled = {
            let mut state = self.state.lock();
            let Some(proxy) = state.writers.get_mut(&writer) else {
                log::debug!("[StatefulReader] {} DATA_FRAG from unmatched {}", self.guid, writer);
                return;
            };
            let limits = FragmentLimits::from(&self.ctx.config);
            let Some(slot) =
                proxy.fragment_assembly(frag.writer_sn, frag.sample_size, frag.fragment_size, limits)
            else {
                return;
            };
            if let Some(qos) = &frag.inline_qos {
                if let Some(status) = qos.status_info {
                    slot.kind = ChangeKind::from_status_info(status);
                }
                if let Some(key) = qos.key_hash {
                    slot.instance_handle = key;
                }
            }
            if let Some(ts) = timestamp {
                slot.source_timestamp = ts;
            }
            match slot.add_fragments(frag.fragment_starting_num, frag.fragments_in_submessage, &frag.payload) {
                Ok(true) => proxy.take_complete(frag.writer_sn),
                Ok(false) => None,
                Err(e) => {
                    log::debug!(
                        "[StatefulReader] {} dropping fragment of {}: {}",
                        self.guid,
                        frag.writer_sn,
                        e
                    );
                    None
                }
            }
        };
        let Some(assembly) = assembled else {
            return;
        };
        let (kind, handle, ts) = (assembly.kind, assembly.instance_handle, assembly.source_timestamp);
        let Some(bytes) = assembly.into_payload() else {
            return;
        };
        self.receive(Incoming {
            writer,
            seq: frag.writer_sn,
            kind,
            handle,
            source_timestamp: if ts == Time::ZERO { Time::now() } else { ts },
            bytes: &bytes,
        });
    }

    fn receive(&self, incoming: Incoming<'_>) {
        let mut events = Vec::new();
        let released = {
            let mut state = self.state.lock();
            if !state.enabled {
                return;
            }
            let reliable = self.is_reliable();
            let ReaderState {
                history,
                writers,
                counters,
                last_sample,
                ..
            } = &mut *state;
            let Some(proxy) = writers.get_mut(&incoming.writer) else {
                log::debug!(
                    "[StatefulReader] {} DATA from unmatched {}",
                    self.guid,
                    incoming.writer
                );
                return;
            };
            if !proxy.is_alive() {
                counters.alive += 1;
                counters.not_alive = counters.not_alive.saturating_sub(1);
                events.push(self.liveliness_event(counters, incoming.writer, 1, -1));
            }
            proxy.assert_liveliness();

            let seq = incoming.seq;
            if !reliable {
                // Best effort: anything older than the newest sample is gone.
                let skipped = proxy.lost_changes_update(seq);
                if skipped > 0 {
                    counters.lost = counters.lost.saturating_add(skipped);
                    events.push(ReaderEvent::Lost(SampleLostStatus {
                        total_count: counters.lost,
                        total_count_change: skipped as i32,
                    }));
                }
            }
            if seq <= proxy.available_changes_max() || proxy.change_was_received(seq) {
                log::trace!("[StatefulReader] {} duplicate {} from {}", self.guid, seq, incoming.writer);
                return;
            }

            let unknown = proxy.unknown_missing_changes_up_to(seq) as usize;
            if !history.can_change_be_added(&incoming.writer, incoming.bytes.len(), unknown) {
                counters.rejected += 1;
                events.push(ReaderEvent::Rejected(SampleRejectedStatus {
                    total_count: counters.rejected,
                    total_count_change: 1,
                    last_reason: SampleRejectedReason::ResourceLimit,
                    last_instance_handle: incoming.handle,
                }));
                drop(state);
                self.fire(events);
                return;
            }
            let pool = match self.ctx.pool() {
                Ok(pool) => pool,
                Err(e) => {
                    log::debug!("[StatefulReader] {} cannot store {}: {}", self.guid, seq, e);
                    return;
                }
            };
            let mut change = CacheChange::new(
                incoming.kind,
                incoming.writer,
                incoming.handle,
                pool.get_payload(incoming.bytes),
            );
            change.sequence_number = seq;
            change.source_timestamp = incoming.source_timestamp;
            change.reception_timestamp = Time::now();

            match history.received_change(change, proxy.ownership_strength(), unknown) {
                ReceiveOutcome::Rejected(reason) => {
                    counters.rejected += 1;
                    events.push(ReaderEvent::Rejected(SampleRejectedStatus {
                        total_count: counters.rejected,
                        total_count_change: 1,
                        last_reason: reason,
                        last_instance_handle: incoming.handle,
                    }));
                }
                outcome => {
                    if outcome == ReceiveOutcome::Added {
                        last_sample.insert(incoming.handle, Instant::now());
                    }
                    proxy.received_change_set(seq);
                    log::trace!(
                        "[StatefulReader] {} received {} from {} ({:?})",
                        self.guid,
                        seq,
                        incoming.writer,
                        outcome
                    );
                }
            }
            if Self::notify_pending(proxy) {
                events.push(ReaderEvent::DataAvailable);
            }
            history.drain_released()
        };
        for payload in released {
            self.ctx.pool.release(payload);
        }
        self.fire(events);
    }

    /// Advance the notification cursor; `true` when something new became
    /// visible.
    fn notify_pending(proxy: &mut WriterProxy) -> bool {
        let mut any = false;
        while proxy.next_cache_change_to_be_notified().is_some() {
            any = true;
        }
        proxy.remove_changes_from_writer_up_to(proxy.last_notified());
        any
    }

    pub fn on_heartbeat(&self, source: GuidPrefix, heartbeat: &HeartbeatSubmessage) {
        let writer = Guid::new(source, heartbeat.writer_id);
        let mut events = Vec::new();
        let outbound = {
            let mut state = self.state.lock();
            if !state.enabled {
                return;
            }
            let ReaderState {
                writers, counters, ..
            } = &mut *state;
            let Some(proxy) = writers.get_mut(&writer) else {
                log::debug!("[StatefulReader] {} HEARTBEAT from unmatched {}", self.guid, writer);
                return;
            };
            let was_alive = proxy.is_alive();
            let Some(outcome) = proxy.process_heartbeat(
                heartbeat.count,
                heartbeat.first_sn,
                heartbeat.last_sn,
                heartbeat.final_flag,
                heartbeat.liveliness_flag,
            ) else {
                return;
            };
            if outcome.assert_liveliness && !was_alive {
                counters.alive += 1;
                counters.not_alive = counters.not_alive.saturating_sub(1);
                events.push(self.liveliness_event(counters, writer, 1, -1));
            }
            if outcome.lost > 0 {
                counters.lost = counters.lost.saturating_add(outcome.lost);
                events.push(ReaderEvent::Lost(SampleLostStatus {
                    total_count: counters.lost,
                    total_count_change: i32::try_from(outcome.lost).unwrap_or(i32::MAX),
                }));
                log::debug!(
                    "[StatefulReader] {} lost {} changes from {}",
                    self.guid,
                    outcome.lost,
                    writer
                );
            }
            if Self::notify_pending(proxy) {
                events.push(ReaderEvent::DataAvailable);
            }
            if outcome.send_acknack && self.is_reliable() {
                self.acknack_later(&mut state, writer)
            } else {
                Vec::new()
            }
        };
        self.ctx.send_all(outbound);
        self.fire(events);
    }

    /// Queue an ACKNACK for `writer`; sent now when there is no response delay.
    fn acknack_later(&self, state: &mut MutexGuard<'_, ReaderState>, writer: Guid) -> Vec<Outbound> {
        let delay = self.ctx.config.heartbeat_response_delay();
        if delay.is_zero() {
            return self
                .acknack_for(state, &writer)
                .into_iter()
                .collect();
        }
        state.acknack_due.insert(writer);
        if !state.acknack_timer {
            match self.schedule(delay, |r| r.on_acknack_timer()) {
                Ok(_) => state.acknack_timer = true,
                Err(e) => {
                    log::debug!("[StatefulReader] {} ACKNACK inline: {}", self.guid, e);
                    state.acknack_due.remove(&writer);
                    return self.acknack_for(state, &writer).into_iter().collect();
                }
            }
        }
        Vec::new()
    }

    pub fn on_gap(&self, source: GuidPrefix, gap: &GapSubmessage) {
        let writer = Guid::new(source, gap.writer_id);
        let data_available = {
            let mut state = self.state.lock();
            let Some(proxy) = state.writers.get_mut(&writer) else {
                return;
            };
            let run_end = gap.gap_list.base();
            if gap.gap_start <= proxy.available_changes_max().next() {
                // Contiguous with what we have: jump the watermark.
                proxy.lost_changes_update(run_end);
            } else {
                let run = run_end.distance_from(gap.gap_start).unwrap_or(0);
                if run > MAX_GAP_RUN {
                    log::debug!(
                        "[StatefulReader] {} GAP run of {} from {} truncated",
                        self.guid,
                        run,
                        writer
                    );
                }
                for offset in 0..run.min(MAX_GAP_RUN) {
                    proxy.irrelevant_change_set(gap.gap_start + offset);
                }
            }
            for seq in gap.gap_list.iter() {
                proxy.irrelevant_change_set(seq);
            }
            log::trace!(
                "[StatefulReader] {} GAP [{}, {}) from {}",
                self.guid,
                gap.gap_start,
                run_end,
                writer
            );
            Self::notify_pending(proxy)
        };
        if data_available {
            self.fire(vec![ReaderEvent::DataAvailable]);
        }
    }

    /// ACKNACK (and NACK_FRAG for partial samples) to every matched writer.
    pub fn send_acknacks(&self) {
        let outbound = {
            let mut state = self.state.lock();
            let writers: Vec<Guid> = state.writers.keys().copied().collect();
            writers
                .iter()
                .filter_map(|w| self.acknack_for(&mut state, w))
                .collect::<Vec<_>>()
        };
        self.ctx.send_all(outbound);
    }

    fn acknack_for(&self, state: &mut ReaderState, writer: &Guid) -> Option<Outbound> {
        let proxy = state.writers.get_mut(writer)?;
        let mut missing = proxy.missing_changes();
        let partial: Vec<(SequenceNumber, FragmentNumberSet)> = proxy
            .partial_changes()
            .filter_map(|(seq, asm)| asm.missing_fragments().map(|set| (seq, set)))
            .collect();
        for (seq, _) in &partial {
            missing.remove(*seq);
        }

        let mut batch = OutboundBatch::new(
            self.ctx.guid_prefix,
            writer.prefix,
            self.ctx.config.max_message_size,
        );
        let acknack = Submessage::AckNack(AckNackSubmessage {
            reader_id: self.guid.entity_id,
            writer_id: writer.entity_id,
            final_flag: missing.is_empty(),
            reader_sn_state: missing,
            count: proxy.next_acknack_count(),
        });
        if let Err(e) = batch.push(&acknack) {
            log::warn!("[StatefulReader] {} cannot build ACKNACK: {}", self.guid, e);
            return None;
        }
        for (seq, fragments) in partial {
            let nack_frag = Submessage::NackFrag(NackFragSubmessage {
                reader_id: self.guid.entity_id,
                writer_id: writer.entity_id,
                writer_sn: seq,
                fragment_number_state: fragments,
                count: proxy.next_nackfrag_count(),
            });
            if let Err(e) = batch.push(&nack_frag) {
                log::warn!("[StatefulReader] {} cannot build NACK_FRAG: {}", self.guid, e);
            }
        }
        log::trace!(
            "[StatefulReader] {} ACKNACK to {} base {}",
            self.guid,
            writer,
            proxy.available_changes_max().next()
        );
        batch.into_outbound(proxy.locators())
    }

    // ========================================================================
    // Timers
    // ========================================================================

    fn on_acknack_timer(&self) -> EventOutcome {
        let outbound = {
            let mut state = self.state.lock();
            state.acknack_timer = false;
            if !state.enabled {
                return EventOutcome::Done;
            }
            let due = std::mem::take(&mut state.acknack_due);
            due.iter()
                .filter_map(|w| self.acknack_for(&mut state, w))
                .collect::<Vec<_>>()
        };
        self.ctx.send_all(outbound);
        EventOutcome::Done
    }

    /// Writers silent for longer than their offered lease become not alive.
    fn on_liveliness_timer(&self, period: Duration) -> EventOutcome {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            if !state.enabled {
                return EventOutcome::Done;
            }
            let ReaderState {
                writers, counters, ..
            } = &mut *state;
            for (guid, proxy) in writers.iter_mut() {
                let lease = proxy.data().qos.liveliness.lease_duration;
                if proxy.is_alive() && lease != Duration::MAX && proxy.last_liveliness().elapsed() > lease {
                    proxy.set_not_alive();
                    counters.alive = counters.alive.saturating_sub(1);
                    counters.not_alive += 1;
                    events.push(self.liveliness_event(counters, *guid, -1, 1));
                    log::debug!("[StatefulReader] {} writer {} lost liveliness", self.guid, guid);
                }
            }
        }
        self.fire(events);
        EventOutcome::Restart(period)
    }

    fn on_deadline_timer(&self, period: Duration) -> EventOutcome {
        let mut state = self.state.lock();
        if !state.enabled {
            return EventOutcome::Done;
        }
        let ReaderState {
            history,
            last_sample,
            ..
        } = &mut *state;
        for (handle, at) in last_sample.iter_mut() {
            if at.elapsed() > period && history.deadline_missed(*handle) {
                log::debug!("[StatefulReader] {} deadline missed on {:?}", self.guid, handle);
                *at = Instant::now();
            }
        }
        EventOutcome::Restart(period)
    }

    fn liveliness_event(
        &self,
        counters: &Counters,
        writer: Guid,
        alive_change: i32,
        not_alive_change: i32,
    ) -> ReaderEvent {
        ReaderEvent::Liveliness(LivelinessChangedStatus {
            alive_count: counters.alive,
            alive_count_change: alive_change,
            not_alive_count: counters.not_alive,
            not_alive_count_change: not_alive_change,
            last_publication_handle: Some(writer),
        })
    }

    fn fire(&self, events: Vec<ReaderEvent>) {
        for event in events {
            match event {
                ReaderEvent::DataAvailable => self.listener.data_available(),
                ReaderEvent::Matched(status) => self.listener.subscription_matched(status),
                ReaderEvent::Lost(status) => self.listener.sample_lost(status),
                ReaderEvent::Rejected(status) => self.listener.sample_rejected(status),
                ReaderEvent::Liveliness(status) => self.listener.liveliness_changed(status),
            }
        }
    }

    /// Cancel timers and return every stored payload to the pool. Idempotent.
    pub fn shutdown(&self) {
        let (timers, released) = {
            let mut state = self.state.lock();
            if !state.enabled {
                return;
            }
            state.enabled = false;
            let writers = std::mem::take(&mut state.writers);
            let mut released = Vec::new();
            for guid in writers.keys() {
                released.extend(state.history.writer_unmatched(guid, SequenceNumber::ZERO));
            }
            released.extend(state.history.remove_read_samples());
            (std::mem::take(&mut state.timers), released)
        };
        if let Ok(service) = self.ctx.timers() {
            for id in timers {
                service.cancel(id);
            }
        }
        for payload in released {
            self.ctx.pool.release(payload);
        }
        log::debug!("[StatefulReader] {} shut down", self.guid);
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }
}

/// Visibility watermark; samples of unmatched writers stay readable.
fn available(writers: &BTreeMap<Guid, WriterProxy>, writer: &Guid, seq: SequenceNumber) -> bool {
    writers
        .get(writer)
        .map_or(true, |p| seq <= p.available_changes_max())
}

impl std::fmt::Debug for StatefulReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatefulReader")
            .field("guid", &self.guid)
            .field("topic", &self.data.topic_name)
            .finish_non_exhaustive()
    }
}
