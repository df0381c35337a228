// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-matched-reader state kept inside a reliable writer.
//!
//! Every change the reader still has to receive or acknowledge has one
//! [`ChangeForReader`] entry. Everything at or below `changes_low_mark` is
//! acknowledged and no longer tracked.
//!
//! ```text
//!            send pass             nack suppression
//!   UNSENT ------------> UNDERWAY ------------------> UNACKNOWLEDGED
//!     ^                     |                               |
//!     +------ NACK ---------+---------------NACK------------+
//!                           |                               |
//!                           +------- ACKNACK(base > seq) ---+--> ACKNOWLEDGED
//! ```
//!
//! The proxy does no locking: it lives inside the writer's mutex.

use std::collections::{BTreeSet, VecDeque};

use crate::core::guid::Guid;
use crate::core::locator::Locator;
use crate::history::WriterHistory;
use crate::protocol::discovery::ReaderProxyData;
use crate::qos::ReliabilityKind;
use crate::reliability::{FragmentNumberSet, SequenceNumber, SequenceNumberSet};

/// Delivery status of one change towards one reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeForReaderStatus {
    Unsent,
    Underway,
    Unacknowledged,
    Acknowledged,
}

impl ChangeForReaderStatus {
    /// Handed to the transport.
    #[must_use]
    pub fn sent(self) -> Self {
        match self {
            ChangeForReaderStatus::Unsent => ChangeForReaderStatus::Underway,
            other => other,
        }
    }

    /// Nack-suppression window elapsed.
    #[must_use]
    pub fn suppression_elapsed(self) -> Self {
        match self {
            ChangeForReaderStatus::Underway => ChangeForReaderStatus::Unacknowledged,
            other => other,
        }
    }

    /// Explicitly requested by the reader.
    #[must_use]
    pub fn nacked(self) -> Self {
        ChangeForReaderStatus::Unsent
    }

    #[must_use]
    pub fn acked(self) -> Self {
        ChangeForReaderStatus::Acknowledged
    }
}

#[derive(Debug, Clone)]
pub struct ChangeForReader {
    pub sequence_number: SequenceNumber,
    pub status: ChangeForReaderStatus,
    /// `false`: the reader gets a GAP instead of DATA.
    pub is_relevant: bool,
    /// Fragments requested through NACK_FRAG; empty means the whole change.
    pub requested_fragments: BTreeSet<u32>,
}

impl ChangeForReader {
    fn new(sequence_number: SequenceNumber, status: ChangeForReaderStatus, is_relevant: bool) -> Self {
        Self {
            sequence_number,
            status,
            is_relevant,
            requested_fragments: BTreeSet::new(),
        }
    }
}

/// One entry handed to the sender by [`ReaderProxy::unsent_changes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsentChange {
    pub sequence_number: SequenceNumber,
    pub is_relevant: bool,
    /// Only these fragments must go out (empty: whole change).
    pub fragments: Vec<u32>,
}

#[derive(Debug)]
pub struct ReaderProxy {
    data: ReaderProxyData,
    changes: VecDeque<ChangeForReader>,
    changes_low_mark: SequenceNumber,
    last_acknack_count: u32,
    last_nackfrag_count: u32,
}

impl ReaderProxy {
    /// Proxy whose first relevant change is `changes_low_mark + 1`.
    pub fn new(data: ReaderProxyData, changes_low_mark: SequenceNumber) -> Self {
        Self {
            data,
            changes: VecDeque::new(),
            changes_low_mark,
            last_acknack_count: 0,
            last_nackfrag_count: 0,
        }
    }

    pub fn guid(&self) -> Guid {
        self.data.guid
    }

    pub fn data(&self) -> &ReaderProxyData {
        &self.data
    }

    pub fn update_data(&mut self, data: ReaderProxyData) {
        self.data = data;
    }

    pub fn is_reliable(&self) -> bool {
        self.data.qos.reliability.kind == ReliabilityKind::Reliable
    }

    pub fn expects_inline_qos(&self) -> bool {
        self.data.expects_inline_qos
    }

    /// Unicast locators when announced, multicast otherwise.
    pub fn locators(&self) -> &[Locator] {
        self.data.locators()
    }

    pub fn changes_low_mark(&self) -> SequenceNumber {
        self.changes_low_mark
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    fn find(&self, seq: SequenceNumber) -> Option<usize> {
        self.changes
            .binary_search_by(|c| c.sequence_number.cmp(&seq))
            .ok()
    }

    pub fn status_of(&self, seq: SequenceNumber) -> Option<ChangeForReaderStatus> {
        if seq <= self.changes_low_mark {
            return Some(ChangeForReaderStatus::Acknowledged);
        }
        self.find(seq).map(|idx| self.changes[idx].status)
    }

    /// Track a new change. Push mode starts it UNSENT, pull mode
    /// UNACKNOWLEDGED (sent only when NACKed).
    pub fn add_change(&mut self, seq: SequenceNumber, is_relevant: bool, push_mode: bool) {
        if seq <= self.changes_low_mark
            || self.changes.back().is_some_and(|c| c.sequence_number >= seq)
        {
            log::debug!(
                "[ReaderProxy] {} ignoring out-of-order change {}",
                self.data.guid,
                seq
            );
            return;
        }
        let status = if push_mode {
            ChangeForReaderStatus::Unsent
        } else {
            ChangeForReaderStatus::Unacknowledged
        };
        self.changes
            .push_back(ChangeForReader::new(seq, status, is_relevant));
    }

    /// UNSENT entries in ascending order; they become UNDERWAY (best-effort
    /// readers: ACKNOWLEDGED, nothing comes back).
    pub fn unsent_changes(&mut self) -> Vec<UnsentChange> {
        let reliable = self.is_reliable();
        let mut out = Vec::new();
        for change in self
            .changes
            .iter_mut()
            .filter(|c| c.status == ChangeForReaderStatus::Unsent)
        {
            out.push(UnsentChange {
                sequence_number: change.sequence_number,
                is_relevant: change.is_relevant,
                fragments: std::mem::take(&mut change.requested_fragments)
                    .into_iter()
                    .collect(),
            });
            change.status = if reliable {
                change.status.sent()
            } else {
                change.status.acked()
            };
        }
        if !reliable {
            if let Some(last) = out.last() {
                let last = last.sequence_number;
                self.advance_low_mark(last.next());
            }
        }
        out
    }

    pub fn has_unsent_changes(&self) -> bool {
        self.changes
            .iter()
            .any(|c| c.status == ChangeForReaderStatus::Unsent)
    }

    /// First relevant change still to send.
    pub fn first_relevant_sample_to_send(&self) -> Option<SequenceNumber> {
        self.changes
            .iter()
            .find(|c| c.status == ChangeForReaderStatus::Unsent && c.is_relevant)
            .map(|c| c.sequence_number)
    }

    fn advance_low_mark(&mut self, seq: SequenceNumber) -> bool {
        let mut future = seq;
        while let Some(front) = self.changes.front() {
            if front.sequence_number < seq {
                self.changes.pop_front();
            } else if front.sequence_number == future
                && front.status == ChangeForReaderStatus::Acknowledged
            {
                self.changes.pop_front();
                future = future.next();
            } else {
                break;
            }
        }
        let new_low_mark = future.prev();
        if new_low_mark > self.changes_low_mark {
            self.changes_low_mark = new_low_mark;
            true
        } else {
            false
        }
    }

    /// ACKNACK base: every change `< seq` is acknowledged.
    ///
    /// A base at or below the low mark means the reader lost what it had
    /// acknowledged before; those changes still in `history` are tracked
    /// again as UNACKNOWLEDGED and the low mark moves back.
    ///
    /// A base past the next number the writer will assign acknowledges
    /// changes that do not exist yet and is ignored.
    pub fn acked_changes_set(&mut self, seq: SequenceNumber, history: &WriterHistory) -> bool {
        if seq > history.next_sequence_number() {
            log::warn!(
                "[ReaderProxy] {} acknowledged up to {} but only {} was written, ignored",
                self.data.guid,
                seq,
                history.last_sequence_number()
            );
            return false;
        }
        if seq > self.changes_low_mark {
            return self.advance_low_mark(seq);
        }
        if !seq.is_valid() || seq == self.changes_low_mark.next() {
            return false;
        }

        let previous = self.changes_low_mark;
        let readded: Vec<ChangeForReader> = history
            .changes_in_range(seq, previous)
            .map(|c| {
                ChangeForReader::new(
                    c.sequence_number,
                    ChangeForReaderStatus::Unacknowledged,
                    true,
                )
            })
            .collect();
        log::debug!(
            "[ReaderProxy] {} moved ack base back to {} (re-tracking {} changes)",
            self.data.guid,
            seq,
            readded.len()
        );
        for change in readded.into_iter().rev() {
            self.changes.push_front(change);
        }
        self.changes_low_mark = seq.prev();
        true
    }

    /// Mark NACKed changes UNSENT. Returns whether anything was requested;
    /// `gaps` receives requested numbers this proxy no longer tracks.
    pub fn requested_changes_set(
        &mut self,
        set: &SequenceNumberSet,
        gaps: &mut Vec<SequenceNumber>,
    ) -> bool {
        let mut any = false;
        for seq in set.iter() {
            if seq <= self.changes_low_mark {
                continue;
            }
            match self.find(seq) {
                Some(idx) => {
                    let change = &mut self.changes[idx];
                    change.status = change.status.nacked();
                    change.requested_fragments.clear();
                    any = true;
                }
                None => gaps.push(seq),
            }
        }
        if any {
            log::trace!(
                "[ReaderProxy] {} requested {:?}",
                self.data.guid,
                set.iter().collect::<Vec<_>>()
            );
        }
        any
    }

    /// UNDERWAY -> UNACKNOWLEDGED for every entry.
    pub fn perform_nack_supression(&mut self) -> bool {
        let mut any = false;
        for change in self.changes.iter_mut() {
            let next = change.status.suppression_elapsed();
            any |= next != change.status;
            change.status = next;
        }
        any
    }

    /// A change left the writer history.
    ///
    /// Removing the next change to acknowledge acknowledges it implicitly.
    pub fn change_has_been_removed(&mut self, seq: SequenceNumber) {
        if seq <= self.changes_low_mark {
            return;
        }
        if let Some(idx) = self.find(seq) {
            self.changes.remove(idx);
        }
        if seq == self.changes_low_mark.next() {
            self.advance_low_mark(seq.next());
        }
    }

    /// A change is acknowledged when at or below the low mark, or when this
    /// reader never had to receive it.
    pub fn change_is_acked(&self, seq: SequenceNumber) -> bool {
        match self.status_of(seq) {
            Some(status) => status == ChangeForReaderStatus::Acknowledged,
            None => true,
        }
    }

    pub fn change_is_unsent(&self, seq: SequenceNumber) -> bool {
        self.status_of(seq) == Some(ChangeForReaderStatus::Unsent)
    }

    pub fn has_unacknowledged(&self) -> bool {
        self.changes
            .iter()
            .any(|c| c.status != ChangeForReaderStatus::Acknowledged)
    }

    /// Whether anything up to `seq` is still unacknowledged.
    pub fn has_unacknowledged_up_to(&self, seq: SequenceNumber) -> bool {
        self.changes
            .iter()
            .take_while(|c| c.sequence_number <= seq)
            .any(|c| c.status != ChangeForReaderStatus::Acknowledged)
    }

    /// Accept an ACKNACK count only if it is newer than the last one.
    pub fn check_and_set_acknack_count(&mut self, count: u32) -> bool {
        if count > self.last_acknack_count {
            self.last_acknack_count = count;
            true
        } else {
            false
        }
    }

    /// NACK_FRAG for `seq`. Ignored for stale counts and while the change
    /// has not been fully sent once.
    pub fn process_nack_frag(
        &mut self,
        count: u32,
        seq: SequenceNumber,
        fragments: &FragmentNumberSet,
    ) -> bool {
        if count <= self.last_nackfrag_count {
            return false;
        }
        self.last_nackfrag_count = count;
        let Some(idx) = self.find(seq) else {
            return false;
        };
        let change = &mut self.changes[idx];
        match change.status {
            ChangeForReaderStatus::Unsent | ChangeForReaderStatus::Acknowledged => false,
            ChangeForReaderStatus::Underway | ChangeForReaderStatus::Unacknowledged => {
                change.requested_fragments.extend(fragments.iter());
                change.status = change.status.nacked();
                true
            }
        }
    }

    /// Fragments currently requested for `seq`.
    pub fn requested_fragments(&self, seq: SequenceNumber) -> Vec<u32> {
        self.find(seq)
            .map(|idx| self.changes[idx].requested_fragments.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guid::{EntityId, GuidPrefix};
    use crate::core::pool::SerializedPayload;
    use crate::qos::{QosProfile, Reliability};
    use crate::reliability::{CacheChange, ChangeKind, InstanceHandle};

    fn sn(v: i64) -> SequenceNumber {
        SequenceNumber::from(v)
    }

    fn proxy() -> ReaderProxy {
        let data = ReaderProxyData {
            guid: Guid::new(GuidPrefix([3; 12]), EntityId::user_reader(1)),
            ..Default::default()
        };
        ReaderProxy::new(data, SequenceNumber::ZERO)
    }

    fn history_with(n: u8) -> WriterHistory {
        let mut history =
            WriterHistory::new(&QosProfile::reliable_keep_last(100), false).expect("valid qos");
        for i in 0..n {
            history.reserve(InstanceHandle::NIL).expect("room");
            history
                .add_change(CacheChange::new(
                    ChangeKind::Alive,
                    Guid::UNKNOWN,
                    InstanceHandle::NIL,
                    SerializedPayload::from_vec(vec![i]),
                ))
                .expect("add");
        }
        history
    }

    #[test]
    fn test_unsent_to_underway_then_acknowledged() {
        let history = history_with(3);
        let mut rp = proxy();
        for i in 1..=3 {
            rp.add_change(sn(i), true, true);
        }
        let sent: Vec<i64> = rp
            .unsent_changes()
            .iter()
            .map(|c| c.sequence_number.value())
            .collect();
        assert_eq!(sent, vec![1, 2, 3]);
        for i in 1..=3 {
            assert_eq!(rp.status_of(sn(i)), Some(ChangeForReaderStatus::Underway));
        }
        assert!(rp.unsent_changes().is_empty());

        assert!(rp.acked_changes_set(sn(4), &history));
        for i in 1..=3 {
            assert_eq!(rp.status_of(sn(i)), Some(ChangeForReaderStatus::Acknowledged));
        }
        assert_eq!(rp.changes_low_mark(), sn(3));
        assert!(!rp.has_unacknowledged());
    }

    #[test]
    fn test_ack_beyond_written_changes_is_ignored() {
        let mut history = history_with(2);
        let mut rp = proxy();
        rp.add_change(sn(1), true, true);
        rp.add_change(sn(2), true, true);
        rp.unsent_changes();

        assert!(!rp.acked_changes_set(sn(100), &history));
        assert_eq!(rp.changes_low_mark(), SequenceNumber::ZERO);
        assert!(rp.has_unacknowledged());

        for i in 3..=5u8 {
            history.reserve(InstanceHandle::NIL).expect("room");
            let seq = history
                .add_change(CacheChange::new(
                    ChangeKind::Alive,
                    Guid::UNKNOWN,
                    InstanceHandle::NIL,
                    SerializedPayload::from_vec(vec![i]),
                ))
                .expect("add");
            rp.add_change(seq, true, true);
        }
        let sent: Vec<i64> = rp
            .unsent_changes()
            .iter()
            .map(|c| c.sequence_number.value())
            .collect();
        assert_eq!(sent, vec![3, 4, 5]);
        assert!(!rp.change_is_acked(sn(3)));

        assert!(rp.acked_changes_set(sn(6), &history));
        assert!(rp.change_is_acked(sn(5)));
    }

    #[test]
    fn test_change_is_acked_with_gaps() {
        let history = history_with(7);
        let mut rp = proxy();
        for i in [1, 2, 3, 6, 7] {
            rp.add_change(sn(i), true, false);
        }
        assert!(!rp.change_is_acked(sn(1)));
        assert!(rp.change_is_acked(sn(4)), "never tracked for this reader");

        rp.acked_changes_set(sn(3), &history);
        assert!(rp.change_is_acked(sn(2)));
        assert!(!rp.change_is_acked(sn(3)));
        assert!(!rp.acked_changes_set(sn(3), &history), "repeated ack is a no-op");
        assert!(!rp.change_is_acked(sn(3)));

        rp.acked_changes_set(sn(5), &history);
        assert!(rp.change_is_acked(sn(3)));
        assert!(!rp.change_is_acked(sn(6)));

        rp.acked_changes_set(sn(8), &history);
        assert!(rp.change_is_acked(sn(7)));
    }

    #[test]
    fn test_removed_next_change_is_implicitly_acked() {
        let mut rp = proxy();
        rp.add_change(sn(1), true, true);
        rp.add_change(sn(2), true, true);
        rp.change_has_been_removed(sn(1));
        rp.add_change(sn(3), true, true);
        rp.change_has_been_removed(sn(2));
        rp.add_change(sn(4), true, true);

        assert!(rp.change_is_acked(sn(1)));
        assert!(rp.change_is_acked(sn(2)));
        assert!(!rp.change_is_acked(sn(3)));
        assert!(!rp.change_is_acked(sn(4)));
        assert_eq!(rp.changes_low_mark(), sn(2));
    }

    #[test]
    fn test_nack_resets_to_unsent_and_reports_gaps() {
        let history = history_with(5);
        let mut rp = proxy();
        for i in 1..=3 {
            rp.add_change(sn(i), true, true);
        }
        rp.unsent_changes();
        rp.acked_changes_set(sn(2), &history);

        let set = SequenceNumberSet::from_sequences(sn(2), [sn(2), sn(3), sn(9)]).expect("set");
        let mut gaps = Vec::new();
        assert!(rp.requested_changes_set(&set, &mut gaps));
        assert_eq!(gaps, vec![sn(9)]);
        assert!(rp.change_is_unsent(sn(2)));
        assert!(rp.change_is_unsent(sn(3)));
        assert_eq!(rp.first_relevant_sample_to_send(), Some(sn(2)));
    }

    #[test]
    fn test_ack_base_moving_back_retracks_changes() {
        let history = history_with(5);
        let mut rp = proxy();
        for i in 1..=5 {
            rp.add_change(sn(i), true, true);
        }
        rp.unsent_changes();
        rp.acked_changes_set(sn(6), &history);
        assert!(rp.is_empty());

        assert!(rp.acked_changes_set(sn(3), &history));
        assert_eq!(rp.changes_low_mark(), sn(2));
        assert_eq!(rp.status_of(sn(3)), Some(ChangeForReaderStatus::Unacknowledged));
        assert_eq!(rp.status_of(sn(5)), Some(ChangeForReaderStatus::Unacknowledged));
        assert!(!rp.change_is_unsent(sn(3)), "no resend without a NACK");
    }

    #[test]
    fn test_nack_suppression_moves_underway_to_unacknowledged() {
        let mut rp = proxy();
        rp.add_change(sn(1), true, true);
        assert!(!rp.perform_nack_supression());
        rp.unsent_changes();
        assert!(rp.perform_nack_supression());
        assert_eq!(rp.status_of(sn(1)), Some(ChangeForReaderStatus::Unacknowledged));
    }

    #[test]
    fn test_irrelevant_changes_are_reported_for_gap() {
        let mut rp = proxy();
        rp.add_change(sn(1), false, true);
        rp.add_change(sn(2), true, true);
        let out = rp.unsent_changes();
        assert!(!out[0].is_relevant);
        assert!(out[1].is_relevant);
    }

    #[test]
    fn test_nack_frag_count_filter_and_unsent_guard() {
        let mut rp = proxy();
        rp.add_change(sn(1), true, true);
        let mut frags = FragmentNumberSet::new(3);
        frags.add(3);
        frags.add(7);

        assert!(!rp.process_nack_frag(1, sn(1), &frags), "still unsent");
        rp.unsent_changes();
        assert!(!rp.process_nack_frag(1, sn(1), &frags), "stale count");
        assert!(rp.process_nack_frag(2, sn(1), &frags));
        assert_eq!(rp.requested_fragments(sn(1)), vec![3, 7]);

        let out = rp.unsent_changes();
        assert_eq!(out[0].fragments, vec![3, 7]);
        assert!(rp.requested_fragments(sn(1)).is_empty());
    }

    #[test]
    fn test_acknack_count_must_increase() {
        let mut rp = proxy();
        assert!(rp.check_and_set_acknack_count(1));
        assert!(!rp.check_and_set_acknack_count(1));
        assert!(rp.check_and_set_acknack_count(5));
        assert!(!rp.check_and_set_acknack_count(4));
    }

    #[test]
    fn test_best_effort_reader_acks_on_send() {
        let data = ReaderProxyData {
            qos: QosProfile {
                reliability: Reliability::best_effort(),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut rp = ReaderProxy::new(data, SequenceNumber::ZERO);
        rp.add_change(sn(1), true, true);
        rp.add_change(sn(2), true, true);
        assert_eq!(rp.unsent_changes().len(), 2);
        assert!(rp.change_is_acked(sn(2)));
        assert_eq!(rp.changes_low_mark(), sn(2));
    }

    #[test]
    fn test_ack_never_regresses_without_nack() {
        let history = history_with(20);
        let mut rng = fastrand::Rng::with_seed(7);
        let mut rp = proxy();
        for i in 1..=20 {
            rp.add_change(sn(i), true, true);
        }
        let mut acked_up_to = 0i64;
        for _ in 0..200 {
            match rng.u8(0..3) {
                0 => {
                    rp.unsent_changes();
                }
                1 if acked_up_to < 20 => {
                    let base = rng.i64((acked_up_to + 1)..=21);
                    rp.acked_changes_set(sn(base), &history);
                    acked_up_to = acked_up_to.max(base - 1);
                }
                _ => {
                    rp.perform_nack_supression();
                }
            }
            for i in 1..=acked_up_to {
                assert_eq!(rp.status_of(sn(i)), Some(ChangeForReaderStatus::Acknowledged));
            }
        }
    }
}
