// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader-side instance state and EXCLUSIVE ownership arbitration.
//!
//! Every instance tracks the writers currently alive for it together with
//! their ownership strength. The owner is the strongest alive writer; ties
//! go to the lowest GUID. Strength updates from the owner take effect
//! immediately, so an owner that weakens itself below another alive writer
//! loses the instance at once.

use crate::core::guid::Guid;
use crate::reliability::{ChangeKind, InstanceState, ViewState};

/// `(writer, strength)` of the current owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub writer: Guid,
    pub strength: i32,
}

impl Owner {
    pub const NONE: Owner = Owner {
        writer: Guid::UNKNOWN,
        strength: 0,
    };

    pub fn is_none(&self) -> bool {
        self.writer.is_unknown()
    }

    /// `true` when `(strength, writer)` beats this owner.
    fn is_beaten_by(&self, writer: Guid, strength: i32) -> bool {
        strength > self.strength || (strength == self.strength && writer < self.writer)
    }
}

#[derive(Debug, Clone)]
pub struct ReaderInstance {
    pub instance_state: InstanceState,
    pub view_state: ViewState,
    pub disposed_generation_count: u32,
    pub no_writers_generation_count: u32,
    alive_writers: Vec<(Guid, i32)>,
    current_owner: Owner,
}

impl Default for ReaderInstance {
    fn default() -> Self {
        Self {
            instance_state: InstanceState::Alive,
            view_state: ViewState::New,
            disposed_generation_count: 0,
            no_writers_generation_count: 0,
            alive_writers: Vec::new(),
            current_owner: Owner::NONE,
        }
    }
}

impl ReaderInstance {
    pub fn current_owner(&self) -> Owner {
        self.current_owner
    }

    pub fn alive_writers(&self) -> &[(Guid, i32)] {
        &self.alive_writers
    }

    pub fn has_alive_writers(&self) -> bool {
        !self.alive_writers.is_empty()
    }

    /// Apply a change received from `writer`.
    ///
    /// Returns `true` when the change is authoritative: always under SHARED
    /// ownership (`exclusive == false`), and only from the owner under
    /// EXCLUSIVE ownership.
    pub fn update_state(
        &mut self,
        kind: ChangeKind,
        writer: Guid,
        strength: i32,
        exclusive: bool,
    ) -> bool {
        match kind {
            ChangeKind::Alive => {
                self.writer_alive(writer, strength);
                self.revive();
            }
            ChangeKind::NotAliveDisposed => {
                self.writer_alive(writer, strength);
                self.dispose(writer, exclusive);
            }
            ChangeKind::NotAliveDisposedUnregistered => {
                self.dispose(writer, exclusive);
                self.writer_removed(writer);
            }
            ChangeKind::NotAliveUnregistered => {
                self.writer_removed(writer);
            }
        }
        !exclusive || self.current_owner.writer == writer || kind.is_unregistered()
    }

    fn revive(&mut self) {
        match self.instance_state {
            InstanceState::Alive => {}
            InstanceState::NotAliveDisposed => {
                self.disposed_generation_count += 1;
                self.instance_state = InstanceState::Alive;
                self.view_state = ViewState::New;
            }
            InstanceState::NotAliveNoWriters => {
                self.no_writers_generation_count += 1;
                self.instance_state = InstanceState::Alive;
                self.view_state = ViewState::New;
            }
        }
    }

    fn dispose(&mut self, writer: Guid, exclusive: bool) {
        if exclusive && self.current_owner.writer != writer {
            log::debug!(
                "[ReaderInstance] dispose from non-owner {} ignored (owner {})",
                writer,
                self.current_owner.writer
            );
            return;
        }
        self.instance_state = InstanceState::NotAliveDisposed;
    }

    /// Add `writer` to the alive set (or refresh its strength) and arbitrate.
    fn writer_alive(&mut self, writer: Guid, strength: i32) {
        match self.alive_writers.iter_mut().find(|(w, _)| *w == writer) {
            Some(entry) => entry.1 = strength,
            None => self.alive_writers.push((writer, strength)),
        }

        if self.current_owner.is_none() {
            self.current_owner = Owner { writer, strength };
        } else if self.current_owner.writer == writer {
            self.current_owner.strength = strength;
            self.elect_owner();
        } else if self.current_owner.is_beaten_by(writer, strength) {
            log::debug!(
                "[ReaderInstance] ownership {} ({}) -> {} ({})",
                self.current_owner.writer,
                self.current_owner.strength,
                writer,
                strength
            );
            self.current_owner = Owner { writer, strength };
        }
    }

    /// Remove `writer` from the alive set; re-elects when it owned the instance.
    ///
    /// The instance becomes NOT_ALIVE_NO_WRITERS when no writer remains
    /// (a disposed instance stays disposed).
    pub fn writer_removed(&mut self, writer: Guid) -> bool {
        let before = self.alive_writers.len();
        self.alive_writers.retain(|(w, _)| *w != writer);
        if self.alive_writers.len() == before {
            return false;
        }
        if self.current_owner.writer == writer {
            self.elect_owner();
        }
        if self.alive_writers.is_empty() && self.instance_state == InstanceState::Alive {
            self.instance_state = InstanceState::NotAliveNoWriters;
        }
        true
    }

    /// A writer announced a new strength through discovery.
    ///
    /// Non-owners are only recorded; their new strength is considered on
    /// their next sample.
    pub fn writer_update_its_ownership_strength(&mut self, writer: Guid, strength: i32) {
        if let Some(entry) = self.alive_writers.iter_mut().find(|(w, _)| *w == writer) {
            entry.1 = strength;
        }
        if self.current_owner.writer == writer {
            self.current_owner.strength = strength;
            self.elect_owner();
        }
    }

    /// The owner missed its offered deadline: drop it and elect the next one.
    pub fn deadline_missed(&mut self) -> bool {
        if self.current_owner.is_none() {
            return false;
        }
        let owner = self.current_owner.writer;
        self.alive_writers.retain(|(w, _)| *w != owner);
        self.elect_owner();
        true
    }

    /// Strongest alive writer, lowest GUID on ties.
    fn elect_owner(&mut self) {
        self.current_owner = self
            .alive_writers
            .iter()
            .copied()
            .max_by(|(wa, sa), (wb, sb)| sa.cmp(sb).then_with(|| wb.cmp(wa)))
            .map(|(writer, strength)| Owner { writer, strength })
            .unwrap_or(Owner::NONE);
    }
}
