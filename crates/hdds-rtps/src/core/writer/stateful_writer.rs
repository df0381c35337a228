// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable writer keeping one [`ReaderProxy`] per matched reader.
//!
//! # Locking
//!
//! History and proxies live behind a single `parking_lot::Mutex`. Messages
//! are built under the lock and handed to the transport after it is
//! released; listener handlers run last, also without the lock.
//!
//! ```text
//! write() ──▶ make_room ──▶ history.add_change ──▶ proxies.add_change
//!                │                                     │
//!                │ KEEP_ALL full:                      ▼ push mode
//!                └── Condvar wait (ack progress) ── send DATA + HEARTBEAT
//! ```
//!
//! # Timers
//!
//! - periodic HEARTBEAT while some reliable reader has unacknowledged changes
//! - nack-response delay: one retransmission pass per NACK burst
//! - nack suppression: UNDERWAY -> UNACKNOWLEDGED after the window
//! - offered deadline, when the QoS sets one

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::reader_proxy::ReaderProxy;
use crate::config::{RTPS_MESSAGE_HEADER_SIZE, SUBMESSAGE_OVERHEAD};
use crate::core::endpoint::{EndpointContext, Outbound, OutboundBatch};
use crate::core::guid::Guid;
use crate::core::pool::SerializedPayload;
use crate::core::reader::fragment_count;
use crate::dds::{Error, PublicationMatchedStatus, Result, WriterListener};
use crate::history::{Capacity, WriterHistory};
use crate::protocol::discovery::{InlineQos, ReaderProxyData, WriterProxyData};
use crate::protocol::rtps::{
    AckNackSubmessage, DataFragSubmessage, DataSubmessage, GapSubmessage, HeartbeatSubmessage,
    InfoTsSubmessage, NackFragSubmessage, Submessage,
};
use crate::qos::{Durability, History, ReliabilityKind};
use crate::reliability::{
    CacheChange, ChangeKind, InstanceHandle, SampleIdentity, SequenceNumber, WriteParams,
};
use crate::runtime::{EventId, EventOutcome};

/// Listener calls collected under the lock, fired after it.
enum WriterEvent {
    Matched(PublicationMatchedStatus),
    UnackedRemoved(SampleIdentity),
    DeadlineMissed(InstanceHandle),
}

struct WriterState {
    history: WriterHistory,
    readers: BTreeMap<Guid, ReaderProxy>,
    heartbeat_count: u32,
    timers: Vec<EventId>,
    nack_response_pending: bool,
    suppression_pending: bool,
    total_matched: u32,
    enabled: bool,
}

impl WriterState {
    fn acked_by_all(&self, seq: SequenceNumber) -> bool {
        self.readers.values().all(|p| p.change_is_acked(seq))
    }

    /// HEARTBEAT range: oldest change still held, last number assigned.
    fn heartbeat_range(&self) -> (SequenceNumber, SequenceNumber) {
        let last = self.history.last_sequence_number();
        let first = self
            .history
            .get_min_change()
            .map_or(last.next(), |c| c.sequence_number);
        (first, last)
    }
}

pub struct StatefulWriter {
    guid: Guid,
    data: WriterProxyData,
    ctx: EndpointContext,
    listener: WriterListener,
    state: Mutex<WriterState>,
    /// Signalled on acknowledgement progress, change removal and shutdown.
    acked: Condvar,
    self_ref: Weak<StatefulWriter>,
}

impl StatefulWriter {
    /// Build a writer and arm its timers. `data` describes this writer as
    /// announced through discovery; its QoS drives the history.
    pub fn new(
        data: WriterProxyData,
        keyed: bool,
        ctx: EndpointContext,
        listener: WriterListener,
    ) -> Result<Arc<Self>> {
        ctx.config.validate()?;
        let history = WriterHistory::new(&data.qos, keyed)?;
        let writer = Arc::new_cyclic(|self_ref| Self {
            guid: data.guid,
            data,
            ctx,
            listener,
            state: Mutex::new(WriterState {
                history,
                readers: BTreeMap::new(),
                heartbeat_count: 0,
                timers: Vec::new(),
                nack_response_pending: false,
                suppression_pending: false,
                total_matched: 0,
                enabled: true,
            }),
            acked: Condvar::new(),
            self_ref: self_ref.clone(),
        });
        writer.start_timers()?;
        log::debug!(
            "[StatefulWriter] {} created on topic '{}'",
            writer.guid,
            writer.data.topic_name
        );
        Ok(writer)
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn data(&self) -> &WriterProxyData {
        &self.data
    }

    fn is_reliable(&self) -> bool {
        self.data.qos.reliability.kind == ReliabilityKind::Reliable
    }

    fn is_keyed(&self) -> bool {
        self.state.lock().history.is_keyed()
    }

    /// Schedule a repeating timer bound to this writer.
    fn schedule<F>(&self, after: Duration, f: F) -> Result<EventId>
    where
        F: Fn(&StatefulWriter) -> EventOutcome + Send + 'static,
    {
        let timers = self.ctx.timers()?;
        let weak = self.self_ref.clone();
        Ok(timers.schedule(after, move || match weak.upgrade() {
            Some(writer) => f(&writer),
            None => EventOutcome::Done,
        }))
    }

    fn start_timers(&self) -> Result<()> {
        let mut ids = Vec::new();
        if self.is_reliable() {
            ids.push(self.schedule(self.ctx.config.heartbeat_period(), |w| {
                w.on_heartbeat_timer()
            })?);
        }
        if let Some(period) = self.data.qos.deadline {
            ids.push(self.schedule(period, move |w| w.on_deadline_timer(period))?);
        }
        self.state.lock().timers = ids;
        Ok(())
    }

    // ========================================================================
    // Application side
    // ========================================================================

    /// Allocate a change from the participant's pool.
    pub fn new_change(
        &self,
        kind: ChangeKind,
        data: &[u8],
        handle: InstanceHandle,
    ) -> Result<CacheChange> {
        let pool = self.ctx.pool()?;
        Ok(CacheChange::new(kind, self.guid, handle, pool.get_payload(data)))
    }

    fn blocking_deadline(&self) -> Instant {
        Instant::now() + self.data.qos.reliability.max_blocking_time
    }

    pub fn write(&self, data: &[u8], handle: InstanceHandle) -> Result<SequenceNumber> {
        self.write_with_params(data, handle, &mut WriteParams::default())
    }

    /// Write with an explicit source timestamp; the assigned identity is
    /// returned in `params.sample_identity`.
    pub fn write_with_params(
        &self,
        data: &[u8],
        handle: InstanceHandle,
        params: &mut WriteParams,
    ) -> Result<SequenceNumber> {
        let mut change = self.new_change(ChangeKind::Alive, data, handle)?;
        if let Some(ts) = params.source_timestamp {
            change.source_timestamp = ts;
        }
        let seq = self.add_change(change, self.blocking_deadline())?;
        params.sample_identity = Some(SampleIdentity {
            writer_guid: self.guid,
            sequence_number: seq,
        });
        Ok(seq)
    }

    pub fn register_instance(&self, handle: InstanceHandle, key: &[u8]) -> Result<()> {
        let key_payload = (!key.is_empty()).then(|| SerializedPayload::from_vec(key.to_vec()));
        self.state.lock().history.register_instance(handle, key_payload)
    }

    pub fn dispose(&self, handle: InstanceHandle) -> Result<SequenceNumber> {
        self.lifecycle_change(ChangeKind::NotAliveDisposed, handle)
    }

    pub fn unregister_instance(&self, handle: InstanceHandle) -> Result<SequenceNumber> {
        self.lifecycle_change(ChangeKind::NotAliveUnregistered, handle)
    }

    fn lifecycle_change(&self, kind: ChangeKind, handle: InstanceHandle) -> Result<SequenceNumber> {
        {
            let state = self.state.lock();
            if !state.history.is_keyed() {
                return Err(Error::PreconditionNotMet(format!(
                    "{:?} on a keyless topic",
                    kind
                )));
            }
            if !state.history.is_key_registered(handle) {
                return Err(Error::PreconditionNotMet(format!(
                    "instance {:?} is not registered",
                    handle
                )));
            }
        }
        let change = self.new_change(kind, &[], handle)?;
        self.add_change(change, self.blocking_deadline())
    }

    /// Insert a change, blocking until `deadline` when a KEEP_ALL history is
    /// full. On failure the history is left as it was.
    pub fn add_change(&self, change: CacheChange, deadline: Instant) -> Result<SequenceNumber> {
        let mut events = Vec::new();
        let mut released = Vec::new();
        let result = {
            let mut state = self.state.lock();
            self.insert_locked(&mut state, change, deadline, &mut events, &mut released)
        };
        for payload in released {
            self.ctx.pool.release(payload);
        }
        let result = result.map(|(seq, outbound)| {
            log::trace!("[StatefulWriter] {} added {}", self.guid, seq);
            self.ctx.send_all(outbound);
            seq
        });
        self.fire(events);
        result
    }

    /// Body of [`add_change`](Self::add_change) under the lock. A refused
    /// change has its payload pushed to `released`.
    fn insert_locked(
        &self,
        state: &mut MutexGuard<'_, WriterState>,
        mut change: CacheChange,
        deadline: Instant,
        events: &mut Vec<WriterEvent>,
        released: &mut Vec<SerializedPayload>,
    ) -> Result<(SequenceNumber, Vec<Outbound>)> {
        let room = if state.enabled {
            self.make_room(state, change.instance_handle, deadline, events, released)
        } else {
            Err(Error::PreconditionNotMet("writer is shut down".to_string()))
        };
        if let Err(e) = room {
            released.push(change.payload);
            return Err(e);
        }

        change.writer_guid = self.guid;
        let handle = change.instance_handle;
        let kind = change.kind;
        let seq = state.history.add_change(change)?;
        let push_mode = self.ctx.config.push_mode;
        for proxy in state.readers.values_mut() {
            proxy.add_change(seq, true, push_mode);
        }
        if kind.is_alive() {
            if let Some(period) = self.data.qos.deadline {
                state.history.set_next_deadline(handle, Instant::now() + period);
            }
        }
        if kind.is_unregistered() {
            state.history.unregister_instance(handle);
        }
        let outbound = if push_mode {
            self.collect_unsent(state)
        } else {
            Vec::new()
        };
        Ok((seq, outbound))
    }

    /// Loop on `reserve` until the history can take one more change.
    fn make_room(
        &self,
        state: &mut MutexGuard<'_, WriterState>,
        handle: InstanceHandle,
        deadline: Instant,
        events: &mut Vec<WriterEvent>,
        released: &mut Vec<SerializedPayload>,
    ) -> Result<()> {
        loop {
            let victim = match state.history.reserve(handle)? {
                Capacity::Ready => return Ok(()),
                Capacity::Evict(seq) => seq,
                Capacity::WaitFor(seq) => {
                    if !state.acked_by_all(seq) {
                        let timed_out = self.acked.wait_until(state, deadline).timed_out();
                        if !state.enabled {
                            return Err(Error::PreconditionNotMet("writer is shut down".to_string()));
                        }
                        if timed_out && !state.acked_by_all(seq) {
                            log::debug!(
                                "[StatefulWriter] {} history full, {} still unacknowledged at deadline",
                                self.guid,
                                seq
                            );
                            return Err(Error::Timeout);
                        }
                        continue;
                    }
                    seq
                }
            };
            match Self::remove_change_locked(state, victim, events) {
                Some(change) => released.push(change.payload),
                None => {
                    return Err(Error::InvalidState(format!(
                        "history named {} for removal but does not hold it",
                        victim
                    )))
                }
            }
        }
    }

    fn remove_change_locked(
        state: &mut WriterState,
        seq: SequenceNumber,
        events: &mut Vec<WriterEvent>,
    ) -> Option<CacheChange> {
        let acked = state.acked_by_all(seq);
        let change = state.history.remove_change(seq)?;
        for proxy in state.readers.values_mut() {
            proxy.change_has_been_removed(seq);
        }
        if !acked {
            log::debug!(
                "[StatefulWriter] removed {} before every reader acknowledged it",
                seq
            );
            events.push(WriterEvent::UnackedRemoved(change.identity()));
        }
        Some(change)
    }

    /// KEEP_ALL: remove the oldest change once every reader acknowledged
    /// it. `Ok(false)` when the history is empty.
    pub fn try_remove_change(&self, deadline: Instant) -> Result<bool> {
        let mut events = Vec::new();
        let removed = {
            let mut state = self.state.lock();
            let Some(oldest) = state.history.get_min_change().map(|c| c.sequence_number) else {
                return Ok(false);
            };
            while !state.acked_by_all(oldest) {
                if self.acked.wait_until(&mut state, deadline).timed_out() && !state.acked_by_all(oldest) {
                    return Err(Error::Timeout);
                }
                if state.history.get_change(oldest).is_none() {
                    return Ok(true);
                }
            }
            Self::remove_change_locked(&mut state, oldest, &mut events)
        };
        if let Some(change) = removed {
            self.ctx.pool.release(change.payload);
        }
        self.acked.notify_all();
        self.fire(events);
        Ok(true)
    }

    pub fn is_acked_by_all(&self, seq: SequenceNumber) -> bool {
        self.state.lock().acked_by_all(seq)
    }

    /// Block until every matched reader acknowledged everything.
    pub fn wait_for_all_acked(&self, deadline: Instant) -> Result<()> {
        let mut state = self.state.lock();
        while state.readers.values().any(ReaderProxy::has_unacknowledged) {
            if self.acked.wait_until(&mut state, deadline).timed_out()
                && state.readers.values().any(ReaderProxy::has_unacknowledged)
            {
                return Err(Error::Timeout);
            }
        }
        Ok(())
    }

    /// Block until the latest change of `handle` is acknowledged by all.
    pub fn wait_for_acknowledgement_last_change(
        &self,
        handle: InstanceHandle,
        deadline: Instant,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let Some(seq) = state.history.instance_last_change(handle) else {
            return Ok(());
        };
        while !state.acked_by_all(seq) {
            if self.acked.wait_until(&mut state, deadline).timed_out() && !state.acked_by_all(seq) {
                return Err(Error::Timeout);
            }
        }
        Ok(())
    }

    /// Send a HEARTBEAT with the liveliness flag to every reliable reader.
    pub fn assert_liveliness(&self) {
        let outbound = {
            let mut state = self.state.lock();
            self.heartbeats(&mut state, false, true)
        };
        self.ctx.send_all(outbound);
    }

    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    /// Sequence numbers currently held, ascending.
    pub fn history_sequence_numbers(&self) -> Vec<SequenceNumber> {
        self.state
            .lock()
            .history
            .changes()
            .map(|c| c.sequence_number)
            .collect()
    }

    // ========================================================================
    // Discovery side
    // ========================================================================

    /// Match a remote reader. Re-adding a known reader refreshes its data.
    pub fn matched_reader_add(&self, data: ReaderProxyData) -> Result<()> {
        if data.topic_name != self.data.topic_name {
            return Err(Error::PreconditionNotMet(format!(
                "reader topic '{}' does not match '{}'",
                data.topic_name, self.data.topic_name
            )));
        }
        if data.qos.reliability.kind == ReliabilityKind::Reliable && !self.is_reliable() {
            log::warn!(
                "[StatefulWriter] {} offers best effort, reader {} requests reliable",
                self.guid,
                data.guid
            );
            return Err(Error::PreconditionNotMet("incompatible reliability".to_string()));
        }
        if data.qos.durability != Durability::Volatile && self.data.qos.durability == Durability::Volatile {
            return Err(Error::PreconditionNotMet("incompatible durability".to_string()));
        }

        let mut events = Vec::new();
        let outbound = {
            let mut state = self.state.lock();
            if !state.enabled {
                return Err(Error::PreconditionNotMet("writer is shut down".to_string()));
            }
            if let Some(proxy) = state.readers.get_mut(&data.guid) {
                log::debug!("[StatefulWriter] {} refreshed reader {}", self.guid, data.guid);
                proxy.update_data(data);
                return Ok(());
            }

            let reader_guid = data.guid;
            let reader_history = data.qos.history;
            let late_joiner_replay = data.qos.durability != Durability::Volatile;
            let low_mark = if late_joiner_replay {
                state.history.get_min_change().map_or(
                    state.history.last_sequence_number(),
                    |c| c.sequence_number.prev(),
                )
            } else {
                state.history.last_sequence_number()
            };
            let mut proxy = ReaderProxy::new(data, low_mark);
            if late_joiner_replay {
                let push_mode = self.ctx.config.push_mode;
                // Samples the reader's own KEEP_LAST depth would drop go out as GAP.
                let superseded = match reader_history {
                    History::KeepLast(depth) => state.history.superseded_changes(depth as usize),
                    History::KeepAll => BTreeSet::new(),
                };
                let held: Vec<SequenceNumber> =
                    state.history.changes().map(|c| c.sequence_number).collect();
                for seq in held {
                    proxy.add_change(seq, !superseded.contains(&seq), push_mode);
                }
            }
            state.readers.insert(reader_guid, proxy);
            state.total_matched += 1;
            events.push(WriterEvent::Matched(PublicationMatchedStatus {
                total_count: state.total_matched,
                total_count_change: 1,
                current_count: state.readers.len() as u32,
                current_count_change: 1,
                last_subscription_handle: Some(reader_guid),
            }));
            log::debug!(
                "[StatefulWriter] {} matched reader {} (low mark {})",
                self.guid,
                reader_guid,
                low_mark
            );

            let mut outbound = self.collect_unsent(&mut state);
            outbound.extend(self.heartbeats(&mut state, false, false));
            outbound
        };
        self.ctx.send_all(outbound);
        self.fire(events);
        Ok(())
    }

    /// Unmatch a reader; anything pending only for it is abandoned.
    pub fn matched_reader_remove(&self, reader: &Guid) -> bool {
        let event = {
            let mut state = self.state.lock();
            if state.readers.remove(reader).is_none() {
                return false;
            }
            WriterEvent::Matched(PublicationMatchedStatus {
                total_count: state.total_matched,
                total_count_change: 0,
                current_count: state.readers.len() as u32,
                current_count_change: -1,
                last_subscription_handle: Some(*reader),
            })
        };
        log::debug!("[StatefulWriter] {} unmatched reader {}", self.guid, reader);
        self.acked.notify_all();
        self.fire(vec![event]);
        true
    }

    pub fn matched_reader_is_matched(&self, reader: &Guid) -> bool {
        self.state.lock().readers.contains_key(reader)
    }

    pub fn matched_reader_count(&self) -> usize {
        self.state.lock().readers.len()
    }

    /// Whether `seq` is acknowledged by one reader (`None` when unmatched).
    pub fn is_acked_by_reader(&self, reader: &Guid, seq: SequenceNumber) -> Option<bool> {
        self.state
            .lock()
            .readers
            .get(reader)
            .map(|p| p.change_is_acked(seq))
    }

    // ========================================================================
    // Wire side
    // ========================================================================

    /// ACKNACK from `reader`.
    pub fn on_acknack(&self, reader: Guid, acknack: &AckNackSubmessage) {
        let outbound = {
            let mut state = self.state.lock();
            let WriterState {
                history, readers, ..
            } = &mut *state;
            let Some(proxy) = readers.get_mut(&reader) else {
                log::debug!("[StatefulWriter] {} ACKNACK from unmatched {}", self.guid, reader);
                return;
            };
            if acknack.reader_sn_state.base() > history.next_sequence_number() {
                log::warn!(
                    "[StatefulWriter] {} ACKNACK from {} references unknown {} (last written {}), dropped",
                    self.guid,
                    reader,
                    acknack.reader_sn_state.base(),
                    history.last_sequence_number()
                );
                return;
            }
            if !proxy.check_and_set_acknack_count(acknack.count) {
                log::trace!(
                    "[StatefulWriter] {} stale ACKNACK count {} from {}",
                    self.guid,
                    acknack.count,
                    reader
                );
                return;
            }
            let acked = proxy.acked_changes_set(acknack.reader_sn_state.base(), history);
            let mut gaps = Vec::new();
            let requested = proxy.requested_changes_set(&acknack.reader_sn_state, &mut gaps);

            let mut outbound = Vec::new();
            if !gaps.is_empty() {
                log::debug!(
                    "[StatefulWriter] {} answering {} NACKed numbers of {} with GAP",
                    self.guid,
                    gaps.len(),
                    reader
                );
                outbound.extend(self.gap_message(proxy, &gaps));
            }
            if acked {
                self.acked.notify_all();
            }
            if requested {
                outbound.extend(self.nack_response(&mut state));
            }
            outbound
        };
        self.ctx.send_all(outbound);
    }

    /// NACK_FRAG from `reader`.
    pub fn on_nack_frag(&self, reader: Guid, nack_frag: &NackFragSubmessage) {
        let outbound = {
            let mut state = self.state.lock();
            let Some(proxy) = state.readers.get_mut(&reader) else {
                return;
            };
            if !proxy.process_nack_frag(
                nack_frag.count,
                nack_frag.writer_sn,
                &nack_frag.fragment_number_state,
            ) {
                return;
            }
            self.nack_response(&mut state)
        };
        self.ctx.send_all(outbound);
    }

    /// Send now, or arm the nack-response timer once per burst.
    fn nack_response(&self, state: &mut MutexGuard<'_, WriterState>) -> Vec<Outbound> {
        let delay = self.ctx.config.nack_response_delay();
        if delay.is_zero() {
            return self.collect_unsent(state);
        }
        if !state.nack_response_pending {
            match self.schedule(delay, |w| w.on_nack_response_timer()) {
                Ok(_) => state.nack_response_pending = true,
                Err(e) => {
                    log::debug!("[StatefulWriter] {} nack response inline: {}", self.guid, e);
                    return self.collect_unsent(state);
                }
            }
        }
        Vec::new()
    }

    /// Send every UNSENT change to every reader.
    pub fn send_any_unsent_changes(&self) {
        let outbound = {
            let mut state = self.state.lock();
            self.collect_unsent(&mut state)
        };
        self.ctx.send_all(outbound);
    }

    /// HEARTBEAT to every reliable reader.
    pub fn send_heartbeat(&self, final_flag: bool) {
        let outbound = {
            let mut state = self.state.lock();
            self.heartbeats(&mut state, final_flag, false)
        };
        self.ctx.send_all(outbound);
    }

    fn heartbeats(&self, state: &mut WriterState, final_flag: bool, liveliness: bool) -> Vec<Outbound> {
        if !state.readers.values().any(ReaderProxy::is_reliable) {
            return Vec::new();
        }
        state.heartbeat_count = state.heartbeat_count.wrapping_add(1);
        let count = state.heartbeat_count;
        let (first, last) = state.heartbeat_range();
        let mut outbound = Vec::new();
        for proxy in state.readers.values().filter(|p| p.is_reliable()) {
            let mut batch = self.batch_for(proxy);
            let hb = Submessage::Heartbeat(HeartbeatSubmessage {
                reader_id: proxy.guid().entity_id,
                writer_id: self.guid.entity_id,
                first_sn: first,
                last_sn: last,
                count,
                final_flag,
                liveliness_flag: liveliness,
            });
            if let Err(e) = batch.push(&hb) {
                log::warn!("[StatefulWriter] {} cannot build HEARTBEAT: {}", self.guid, e);
                continue;
            }
            outbound.extend(batch.into_outbound(proxy.locators()));
        }
        log::trace!(
            "[StatefulWriter] {} HEARTBEAT [{}, {}] count={}",
            self.guid,
            first,
            last,
            count
        );
        outbound
    }

    fn batch_for(&self, proxy: &ReaderProxy) -> OutboundBatch {
        OutboundBatch::new(
            self.ctx.guid_prefix,
            proxy.guid().prefix,
            self.ctx.config.max_message_size,
        )
    }

    fn gap_message(&self, proxy: &ReaderProxy, gaps: &[SequenceNumber]) -> Option<Outbound> {
        let mut batch = self.batch_for(proxy);
        for gap in GapSubmessage::from_sequences(proxy.guid().entity_id, self.guid.entity_id, gaps) {
            if let Err(e) = batch.push(&Submessage::Gap(gap)) {
                log::warn!("[StatefulWriter] {} cannot build GAP: {}", self.guid, e);
                return None;
            }
        }
        batch.into_outbound(proxy.locators())
    }

    /// Build DATA/DATA_FRAG/GAP (+ piggybacked HEARTBEAT) for every UNSENT
    /// entry of every proxy.
    fn collect_unsent(&self, state: &mut WriterState) -> Vec<Outbound> {
        let (first, last) = state.heartbeat_range();
        let WriterState {
            history,
            readers,
            heartbeat_count,
            ..
        } = &mut *state;
        let mut outbound = Vec::new();
        let mut sent_any = false;

        for proxy in readers.values_mut() {
            let unsent = proxy.unsent_changes();
            if unsent.is_empty() {
                continue;
            }
            sent_any = true;
            let mut batch = self.batch_for(proxy);
            let mut irrelevant = Vec::new();
            for entry in &unsent {
                let change = history
                    .get_change(entry.sequence_number)
                    .filter(|_| entry.is_relevant);
                match change {
                    Some(change) => {
                        if let Err(e) = self.push_change(&mut batch, proxy, change, &entry.fragments) {
                            log::warn!(
                                "[StatefulWriter] {} cannot send {}: {}",
                                self.guid,
                                entry.sequence_number,
                                e
                            );
                        }
                    }
                    None => irrelevant.push(entry.sequence_number),
                }
            }
            for gap in
                GapSubmessage::from_sequences(proxy.guid().entity_id, self.guid.entity_id, &irrelevant)
            {
                if let Err(e) = batch.push(&Submessage::Gap(gap)) {
                    log::warn!("[StatefulWriter] {} cannot build GAP: {}", self.guid, e);
                }
            }
            if proxy.is_reliable() {
                *heartbeat_count = heartbeat_count.wrapping_add(1);
                let hb = Submessage::Heartbeat(HeartbeatSubmessage {
                    reader_id: proxy.guid().entity_id,
                    writer_id: self.guid.entity_id,
                    first_sn: first,
                    last_sn: last,
                    count: *heartbeat_count,
                    final_flag: false,
                    liveliness_flag: false,
                });
                if let Err(e) = batch.push(&hb) {
                    log::warn!("[StatefulWriter] {} cannot piggyback HEARTBEAT: {}", self.guid, e);
                }
            }
            match batch.into_outbound(proxy.locators()) {
                Some(out) => outbound.push(out),
                None => log::debug!(
                    "[StatefulWriter] {} reader {} has no locator",
                    self.guid,
                    proxy.guid()
                ),
            }
        }

        if sent_any {
            self.after_send(state);
        }
        outbound
    }

    /// Start the nack-suppression window for what was just sent.
    fn after_send(&self, state: &mut WriterState) {
        let window = self.ctx.config.nack_suppression();
        if window.is_zero() {
            for proxy in state.readers.values_mut() {
                proxy.perform_nack_supression();
            }
            return;
        }
        if !state.suppression_pending {
            match self.schedule(window, |w| w.on_nack_suppression_timer()) {
                Ok(_) => state.suppression_pending = true,
                Err(e) => {
                    log::debug!("[StatefulWriter] {} no suppression timer: {}", self.guid, e);
                    for proxy in state.readers.values_mut() {
                        proxy.perform_nack_supression();
                    }
                }
            }
        }
    }

    fn push_change(
        &self,
        batch: &mut OutboundBatch,
        proxy: &ReaderProxy,
        change: &CacheChange,
        fragments: &[u32],
    ) -> Result<()> {
        let reader_id = proxy.guid().entity_id;
        let writer_id = self.guid.entity_id;
        let keyed = change.instance_handle.is_defined();
        let inline_qos = InlineQos {
            key_hash: keyed.then_some(change.instance_handle),
            status_info: (!change.kind.is_alive()).then(|| change.kind.status_info()),
        };
        let inline_qos = (!inline_qos.is_empty()).then_some(inline_qos);

        batch.push(&Submessage::InfoTs(InfoTsSubmessage {
            timestamp: Some(change.source_timestamp),
        }))?;

        let payload = change.payload.as_slice();
        let fits = payload.len() + RTPS_MESSAGE_HEADER_SIZE + SUBMESSAGE_OVERHEAD
            <= self.ctx.config.max_message_size;
        if !change.kind.is_alive() || fits {
            let payload = change.kind.is_alive().then(|| payload.to_vec());
            return batch.push(&Submessage::Data(DataSubmessage {
                reader_id,
                writer_id,
                writer_sn: change.sequence_number,
                inline_qos,
                payload,
                key_only: false,
            }));
        }

        let sample_size = u32::try_from(payload.len())
            .map_err(|_| Error::OutOfResources("sample larger than 4 GiB".to_string()))?;
        let fragment_size = self.ctx.config.fragment_size;
        let total = fragment_count(sample_size, fragment_size);
        let numbers: Vec<u32> = if fragments.is_empty() {
            (1..=total).collect()
        } else {
            fragments.iter().copied().filter(|n| (1..=total).contains(n)).collect()
        };
        for number in numbers {
            let start = (number as usize - 1) * usize::from(fragment_size);
            let end = (start + usize::from(fragment_size)).min(payload.len());
            batch.push(&Submessage::DataFrag(DataFragSubmessage {
                reader_id,
                writer_id,
                writer_sn: change.sequence_number,
                fragment_starting_num: number,
                fragments_in_submessage: 1,
                fragment_size,
                sample_size,
                inline_qos,
                payload: payload[start..end].to_vec(),
            }))?;
        }
        Ok(())
    }

    // ========================================================================
    // Timers
    // ========================================================================

    fn on_heartbeat_timer(&self) -> EventOutcome {
        let period = self.ctx.config.heartbeat_period();
        let outbound = {
            let mut state = self.state.lock();
            if !state.enabled {
                return EventOutcome::Done;
            }
            let pending = state
                .readers
                .values()
                .any(|p| p.is_reliable() && p.has_unacknowledged());
            if !pending {
                return EventOutcome::Restart(period);
            }
            self.heartbeats(&mut state, false, false)
        };
        self.ctx.send_all(outbound);
        EventOutcome::Restart(period)
    }

    fn on_nack_response_timer(&self) -> EventOutcome {
        let outbound = {
            let mut state = self.state.lock();
            state.nack_response_pending = false;
            if !state.enabled {
                return EventOutcome::Done;
            }
            self.collect_unsent(&mut state)
        };
        self.ctx.send_all(outbound);
        EventOutcome::Done
    }

    fn on_nack_suppression_timer(&self) -> EventOutcome {
        let mut state = self.state.lock();
        state.suppression_pending = false;
        for proxy in state.readers.values_mut() {
            proxy.perform_nack_supression();
        }
        EventOutcome::Done
    }

    fn on_deadline_timer(&self, period: Duration) -> EventOutcome {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            if !state.enabled {
                return EventOutcome::Done;
            }
            let now = Instant::now();
            while let Some((handle, at)) = state.history.next_deadline() {
                if at > now {
                    break;
                }
                events.push(WriterEvent::DeadlineMissed(handle));
                state.history.set_next_deadline(handle, at + period);
            }
        }
        self.fire(events);
        EventOutcome::Restart(period)
    }

    fn fire(&self, events: Vec<WriterEvent>) {
        for event in events {
            match event {
                WriterEvent::Matched(status) => self.listener.publication_matched(status),
                WriterEvent::UnackedRemoved(identity) => {
                    self.listener.unacknowledged_sample_removed(identity)
                }
                WriterEvent::DeadlineMissed(handle) => self.listener.offered_deadline_missed(handle),
            }
        }
    }

    /// Cancel timers, wake blocked writers and return every payload to the
    /// pool. Idempotent.
    pub fn shutdown(&self) {
        let (timers, changes) = {
            let mut state = self.state.lock();
            if !state.enabled {
                return;
            }
            state.enabled = false;
            state.readers.clear();
            (std::mem::take(&mut state.timers), state.history.remove_all_changes())
        };
        if let Ok(service) = self.ctx.timers() {
            for id in timers {
                service.cancel(id);
            }
        }
        for change in changes {
            self.ctx.pool.release(change.payload);
        }
        self.acked.notify_all();
        log::debug!("[StatefulWriter] {} shut down", self.guid);
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }
}

impl std::fmt::Debug for StatefulWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatefulWriter")
            .field("guid", &self.guid)
            .field("topic", &self.data.topic_name)
            .field("keyed", &self.is_keyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReliabilityConfig;
    use crate::core::guid::{EntityId, GuidPrefix};
    use crate::core::locator::Locator;
    use crate::core::pool::{PayloadPool, PoolHandle};
    use crate::protocol::rtps::parse_message;
    use crate::qos::{History, QosProfile, ResourceLimits};
    use crate::reliability::SequenceNumberSet;
    use crate::runtime::TimedEventService;
    use crate::transport::LoopbackTransport;
    use std::sync::atomic::{AtomicU32, Ordering};

    const LOCAL: GuidPrefix = GuidPrefix([1; 12]);
    const REMOTE: GuidPrefix = GuidPrefix([2; 12]);

    struct Fixture {
        transport: Arc<LoopbackTransport>,
        pool: Arc<PayloadPool>,
        _timers: Arc<TimedEventService>,
        ctx: EndpointContext,
    }

    fn fixture(config: ReliabilityConfig) -> Fixture {
        let transport = Arc::new(LoopbackTransport::new());
        let pool = Arc::new(PayloadPool::new(16));
        let timers = Arc::new(TimedEventService::start().expect("timer thread should start"));
        let ctx = EndpointContext {
            guid_prefix: LOCAL,
            config,
            transport: transport.clone(),
            pool: PoolHandle::new(&pool),
            timers: Arc::downgrade(&timers),
        };
        Fixture {
            transport,
            pool,
            _timers: timers,
            ctx,
        }
    }

    fn quiet_config() -> ReliabilityConfig {
        ReliabilityConfig {
            heartbeat_period_ms: 3_600_000,
            nack_response_delay_ms: 0,
            ..Default::default()
        }
    }

    fn writer_data(qos: QosProfile) -> WriterProxyData {
        WriterProxyData {
            guid: Guid::new(LOCAL, EntityId::user_writer(1)),
            topic_name: "Square".into(),
            type_name: "ShapeType".into(),
            qos,
            ..Default::default()
        }
    }

    fn reader_data(n: u32) -> ReaderProxyData {
        ReaderProxyData {
            guid: Guid::new(REMOTE, EntityId::user_reader(n)),
            topic_name: "Square".into(),
            type_name: "ShapeType".into(),
            unicast_locators: vec![Locator::udpv4([127, 0, 0, 1], 7410 + n)],
            ..Default::default()
        }
    }

    fn acknack(n: u32, base: i64, missing: &[i64], count: u32) -> AckNackSubmessage {
        AckNackSubmessage {
            reader_id: EntityId::user_reader(n),
            writer_id: EntityId::user_writer(1),
            reader_sn_state: SequenceNumberSet::from_sequences(
                SequenceNumber::from(base),
                missing.iter().map(|s| SequenceNumber::from(*s)),
            )
            .expect("set"),
            count,
            final_flag: false,
        }
    }

    fn sent_submessages(transport: &LoopbackTransport) -> Vec<Submessage> {
        transport
            .drain()
            .into_iter()
            .flat_map(|d| parse_message(&d.bytes, REMOTE).expect("parse").submessages)
            .map(|r| r.submessage)
            .collect()
    }

    fn data_numbers(subs: &[Submessage]) -> Vec<i64> {
        subs.iter()
            .filter_map(|s| match s {
                Submessage::Data(d) => Some(d.writer_sn.value()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_keep_last_depth_three_keeps_last_three() {
        let fx = fixture(quiet_config());
        let writer = StatefulWriter::new(
            writer_data(QosProfile::reliable_keep_last(3)),
            false,
            fx.ctx.clone(),
            WriterListener::new(),
        )
        .expect("writer");
        for i in 1..=5u8 {
            writer.write(&[i], InstanceHandle::NIL).expect("write");
        }
        let held: Vec<i64> = writer
            .history_sequence_numbers()
            .into_iter()
            .map(SequenceNumber::value)
            .collect();
        assert_eq!(held, vec![3, 4, 5]);
        assert_eq!(fx.pool.in_use(), 3, "evicted payloads go back to the pool");
    }

    #[test]
    fn test_push_mode_sends_data_and_heartbeat() {
        let fx = fixture(quiet_config());
        let writer = StatefulWriter::new(
            writer_data(QosProfile::reliable_keep_last(10)),
            false,
            fx.ctx.clone(),
            WriterListener::new(),
        )
        .expect("writer");
        writer.matched_reader_add(reader_data(1)).expect("match");
        fx.transport.drain();

        writer.write(b"hello", InstanceHandle::NIL).expect("write");
        let subs = sent_submessages(&fx.transport);
        assert_eq!(data_numbers(&subs), vec![1]);
        assert!(subs.iter().any(|s| matches!(s, Submessage::Heartbeat(hb) if hb.last_sn.value() == 1)));
    }

    #[test]
    fn test_acknack_acknowledges_and_retransmits() {
        let fx = fixture(quiet_config());
        let writer = StatefulWriter::new(
            writer_data(QosProfile::reliable_keep_last(10)),
            false,
            fx.ctx.clone(),
            WriterListener::new(),
        )
        .expect("writer");
        let reader = reader_data(1);
        let reader_guid = reader.guid;
        writer.matched_reader_add(reader).expect("match");
        for i in 1..=3u8 {
            writer.write(&[i], InstanceHandle::NIL).expect("write");
        }
        fx.transport.drain();

        // Reader got 1 and 3, lost 2.
        writer.on_acknack(reader_guid, &acknack(1, 2, &[2], 1));
        assert_eq!(writer.is_acked_by_reader(&reader_guid, SequenceNumber::from(1)), Some(true));
        assert_eq!(data_numbers(&sent_submessages(&fx.transport)), vec![2]);

        // Same count again is ignored.
        writer.on_acknack(reader_guid, &acknack(1, 2, &[2], 1));
        assert!(fx.transport.drain().is_empty());

        writer.on_acknack(reader_guid, &acknack(1, 4, &[], 2));
        assert!(writer.is_acked_by_all(SequenceNumber::from(3)));
        writer
            .wait_for_all_acked(Instant::now() + Duration::from_millis(10))
            .expect("everything acknowledged");
    }

    #[test]
    fn test_acknack_for_unwritten_numbers_is_dropped() {
        let fx = fixture(quiet_config());
        let writer = StatefulWriter::new(
            writer_data(QosProfile::reliable_keep_last(10)),
            false,
            fx.ctx.clone(),
            WriterListener::new(),
        )
        .expect("writer");
        let reader = reader_data(1);
        let reader_guid = reader.guid;
        writer.matched_reader_add(reader).expect("match");
        for i in 1..=2u8 {
            writer.write(&[i], InstanceHandle::NIL).expect("write");
        }
        fx.transport.drain();

        writer.on_acknack(reader_guid, &acknack(1, 100, &[], 1));
        assert_eq!(writer.is_acked_by_reader(&reader_guid, SequenceNumber::from(1)), Some(false));

        for i in 3..=5u8 {
            writer.write(&[i], InstanceHandle::NIL).expect("write");
        }
        assert_eq!(data_numbers(&sent_submessages(&fx.transport)), vec![3, 4, 5]);
        assert_eq!(writer.is_acked_by_reader(&reader_guid, SequenceNumber::from(3)), Some(false));

        // The dropped ACKNACK did not consume its count.
        writer.on_acknack(reader_guid, &acknack(1, 6, &[], 1));
        assert!(writer.is_acked_by_all(SequenceNumber::from(5)));
    }

    #[test]
    fn test_nack_for_removed_change_gets_gap() {
        let fx = fixture(quiet_config());
        let writer = StatefulWriter::new(
            writer_data(QosProfile::reliable_keep_last(1)),
            true,
            fx.ctx.clone(),
            WriterListener::new(),
        )
        .expect("writer");
        let reader = reader_data(1);
        let reader_guid = reader.guid;
        writer.matched_reader_add(reader).expect("match");
        let (a, b) = (InstanceHandle::from_u32(1), InstanceHandle::from_u32(2));
        writer.write(b"a1", a).expect("write");
        writer.write(b"b1", b).expect("write");
        writer.write(b"b2", b).expect("evicts b1");
        fx.transport.drain();

        writer.on_acknack(reader_guid, &acknack(1, 1, &[1, 2], 1));
        let subs = sent_submessages(&fx.transport);
        assert!(subs.iter().any(|s| matches!(s, Submessage::Gap(g) if g.gap_start.value() == 2)));
        assert_eq!(data_numbers(&subs), vec![1]);
    }

    #[test]
    fn test_keep_all_full_times_out_without_mutation() {
        let fx = fixture(quiet_config());
        let qos = QosProfile::reliable_keep_all(ResourceLimits {
            max_samples: 2,
            max_instances: 1,
            max_samples_per_instance: 2,
        });
        let writer = StatefulWriter::new(writer_data(qos), false, fx.ctx.clone(), WriterListener::new())
            .expect("writer");
        writer.matched_reader_add(reader_data(1)).expect("match");
        writer.write(b"1", InstanceHandle::NIL).expect("write");
        writer.write(b"2", InstanceHandle::NIL).expect("write");

        let change = writer
            .new_change(ChangeKind::Alive, b"3", InstanceHandle::NIL)
            .expect("change");
        let started = Instant::now();
        let result = writer.add_change(change, Instant::now() + Duration::from_millis(100));
        assert_eq!(result, Err(Error::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(writer.history_len(), 2);
        assert_eq!(fx.pool.in_use(), 2, "refused payload is released");
    }

    #[test]
    fn test_keep_all_unblocks_on_acknowledgement() {
        let fx = fixture(quiet_config());
        let qos = QosProfile::reliable_keep_all(ResourceLimits {
            max_samples: 1,
            max_instances: 1,
            max_samples_per_instance: 1,
        });
        let writer = StatefulWriter::new(writer_data(qos), false, fx.ctx.clone(), WriterListener::new())
            .expect("writer");
        let reader = reader_data(1);
        let reader_guid = reader.guid;
        writer.matched_reader_add(reader).expect("match");
        writer.write(b"1", InstanceHandle::NIL).expect("write");

        let acker = {
            let writer = Arc::clone(&writer);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                writer.on_acknack(reader_guid, &acknack(1, 2, &[], 1));
            })
        };
        let change = writer
            .new_change(ChangeKind::Alive, b"2", InstanceHandle::NIL)
            .expect("change");
        let seq = writer
            .add_change(change, Instant::now() + Duration::from_secs(2))
            .expect("ack frees room");
        acker.join().expect("acker thread");
        assert_eq!(seq.value(), 2);
        assert_eq!(writer.history_sequence_numbers(), vec![SequenceNumber::from(2)]);
    }

    #[test]
    fn test_keep_last_eviction_reports_unacknowledged() {
        let fx = fixture(quiet_config());
        let removed = Arc::new(AtomicU32::new(0));
        let r = Arc::clone(&removed);
        let listener = WriterListener::new().on_unacknowledged_sample_removed(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });
        let writer = StatefulWriter::new(
            writer_data(QosProfile::reliable_keep_last(1)),
            false,
            fx.ctx.clone(),
            listener,
        )
        .expect("writer");
        writer.matched_reader_add(reader_data(1)).expect("match");
        writer.write(b"1", InstanceHandle::NIL).expect("write");
        writer.write(b"2", InstanceHandle::NIL).expect("write");
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_matching_rules_and_listener_counts() {
        let fx = fixture(quiet_config());
        let matched = Arc::new(Mutex::new(Vec::new()));
        let m = Arc::clone(&matched);
        let listener = WriterListener::new().on_publication_matched(move |status| {
            m.lock().push(status.current_count);
        });
        let mut qos = QosProfile::reliable_keep_last(1);
        qos.reliability = crate::qos::Reliability::best_effort();
        let writer =
            StatefulWriter::new(writer_data(qos), false, fx.ctx.clone(), listener).expect("writer");

        assert!(writer.matched_reader_add(reader_data(1)).is_err(), "reliable reader refused");
        let mut best_effort = reader_data(2);
        best_effort.qos.reliability = crate::qos::Reliability::best_effort();
        let guid = best_effort.guid;
        writer.matched_reader_add(best_effort.clone()).expect("match");
        writer.matched_reader_add(best_effort).expect("refresh");
        assert!(writer.matched_reader_is_matched(&guid));
        assert!(writer.matched_reader_remove(&guid));
        assert!(!writer.matched_reader_remove(&guid));
        assert_eq!(*matched.lock(), vec![1, 0]);

        let mut other_topic = reader_data(3);
        other_topic.topic_name = "Circle".into();
        assert!(writer.matched_reader_add(other_topic).is_err());
    }

    #[test]
    fn test_transient_local_reader_gets_history() {
        let fx = fixture(quiet_config());
        let mut qos = QosProfile::reliable_keep_last(5);
        qos.durability = Durability::TransientLocal;
        let writer = StatefulWriter::new(writer_data(qos.clone()), false, fx.ctx.clone(), WriterListener::new())
            .expect("writer");
        for i in 1..=3u8 {
            writer.write(&[i], InstanceHandle::NIL).expect("write");
        }
        let mut late = reader_data(1);
        late.qos.durability = Durability::TransientLocal;
        writer.matched_reader_add(late).expect("match");
        assert_eq!(data_numbers(&sent_submessages(&fx.transport)), vec![1, 2, 3]);

        let volatile = reader_data(2);
        writer.matched_reader_add(volatile).expect("match");
        assert!(data_numbers(&sent_submessages(&fx.transport)).is_empty());
    }

    #[test]
    fn test_late_joiner_gets_gap_for_superseded_samples() {
        let fx = fixture(quiet_config());
        let mut qos = QosProfile::reliable_keep_last(10);
        qos.durability = Durability::TransientLocal;
        let writer = StatefulWriter::new(writer_data(qos), true, fx.ctx.clone(), WriterListener::new())
            .expect("writer");
        let (a, b) = (InstanceHandle::from_u32(1), InstanceHandle::from_u32(2));
        writer.write(b"a1", a).expect("write"); // 1
        writer.write(b"a2", a).expect("write"); // 2
        writer.write(b"b1", b).expect("write"); // 3
        writer.write(b"a3", a).expect("write"); // 4

        let mut late = reader_data(1);
        late.qos.durability = Durability::TransientLocal;
        late.qos.history = History::KeepLast(1);
        let late_guid = late.guid;
        writer.matched_reader_add(late).expect("match");

        let subs = sent_submessages(&fx.transport);
        assert_eq!(data_numbers(&subs), vec![3, 4]);
        let gapped: Vec<i64> = subs
            .iter()
            .filter_map(|s| match s {
                Submessage::Gap(g) => Some(g.sequences().map(SequenceNumber::value).collect::<Vec<_>>()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(gapped, vec![1, 2]);

        // A KEEP_ALL late joiner still gets everything.
        let mut keep_all = reader_data(2);
        keep_all.qos.durability = Durability::TransientLocal;
        keep_all.qos.history = History::KeepAll;
        writer.matched_reader_add(keep_all).expect("match");
        assert_eq!(data_numbers(&sent_submessages(&fx.transport)), vec![1, 2, 3, 4]);

        writer.on_acknack(late_guid, &acknack(1, 5, &[], 1));
        assert_eq!(writer.is_acked_by_reader(&late_guid, SequenceNumber::from(2)), Some(true));
    }

    #[test]
    fn test_large_sample_is_fragmented_and_nack_frag_resends() {
        let config = ReliabilityConfig {
            max_message_size: 1500,
            fragment_size: 1000,
            ..quiet_config()
        };
        let fx = fixture(config);
        let writer = StatefulWriter::new(
            writer_data(QosProfile::reliable_keep_last(2)),
            false,
            fx.ctx.clone(),
            WriterListener::new(),
        )
        .expect("writer");
        let reader = reader_data(1);
        let reader_guid = reader.guid;
        writer.matched_reader_add(reader).expect("match");
        fx.transport.drain();

        writer.write(&vec![7u8; 2500], InstanceHandle::NIL).expect("write");
        let frags: Vec<(u32, usize)> = sent_submessages(&fx.transport)
            .iter()
            .filter_map(|s| match s {
                Submessage::DataFrag(f) => Some((f.fragment_starting_num, f.payload.len())),
                _ => None,
            })
            .collect();
        assert_eq!(frags, vec![(1, 1000), (2, 1000), (3, 500)]);

        let mut missing = crate::reliability::FragmentNumberSet::new(2);
        missing.add(2);
        writer.on_nack_frag(
            reader_guid,
            &NackFragSubmessage {
                reader_id: EntityId::user_reader(1),
                writer_id: EntityId::user_writer(1),
                writer_sn: SequenceNumber::from(1),
                fragment_number_state: missing,
                count: 1,
            },
        );
        let resent: Vec<u32> = sent_submessages(&fx.transport)
            .iter()
            .filter_map(|s| match s {
                Submessage::DataFrag(f) => Some(f.fragment_starting_num),
                _ => None,
            })
            .collect();
        assert_eq!(resent, vec![2]);
    }

    #[test]
    fn test_dispose_requires_registered_keyed_instance() {
        let fx = fixture(quiet_config());
        let keyless = StatefulWriter::new(
            writer_data(QosProfile::reliable_keep_last(1)),
            false,
            fx.ctx.clone(),
            WriterListener::new(),
        )
        .expect("writer");
        assert!(matches!(
            keyless.dispose(InstanceHandle::NIL),
            Err(Error::PreconditionNotMet(_))
        ));

        let mut data = writer_data(QosProfile {
            history: History::KeepLast(2),
            ..Default::default()
        });
        data.guid = Guid::new(LOCAL, EntityId::user_writer(2));
        let keyed = StatefulWriter::new(data, true, fx.ctx.clone(), WriterListener::new()).expect("writer");
        let handle = InstanceHandle::from_u32(7);
        assert!(keyed.dispose(handle).is_err());
        keyed.write(b"x", handle).expect("write registers");
        keyed.matched_reader_add(reader_data(1)).expect("match");
        fx.transport.drain();
        keyed.dispose(handle).expect("dispose");
        let subs = sent_submessages(&fx.transport);
        let disposed = subs.iter().find_map(|s| match s {
            Submessage::Data(d) => Some(d.clone()),
            _ => None,
        });
        let disposed = disposed.expect("DATA for dispose");
        assert_eq!(disposed.payload, None);
        let qos = disposed.inline_qos.expect("inline qos");
        assert_eq!(qos.key_hash, Some(handle));
        assert_eq!(qos.status_info, Some(ChangeKind::STATUS_DISPOSED));
    }

    #[test]
    fn test_shutdown_and_dropped_participant_resources() {
        let fx = fixture(quiet_config());
        let writer = StatefulWriter::new(
            writer_data(QosProfile::reliable_keep_last(4)),
            false,
            fx.ctx.clone(),
            WriterListener::new(),
        )
        .expect("writer");
        writer.write(b"1", InstanceHandle::NIL).expect("write");
        writer.shutdown();
        writer.shutdown();
        assert!(!writer.is_enabled());
        assert_eq!(fx.pool.in_use(), 0);
        assert!(writer.write(b"2", InstanceHandle::NIL).is_err());

        let fx = fixture(quiet_config());
        let orphan = StatefulWriter::new(
            writer_data(QosProfile::reliable_keep_last(4)),
            false,
            fx.ctx.clone(),
            WriterListener::new(),
        )
        .expect("writer");
        drop(fx.pool);
        assert_eq!(orphan.write(b"x", InstanceHandle::NIL), Err(Error::AlreadyDeleted));
    }
}
