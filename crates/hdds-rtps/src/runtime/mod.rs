// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Background execution shared by all endpoints of a participant.

pub mod timed_event;

pub use timed_event::{EventId, EventOutcome, TimedEventService};
