// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader side of the reliable protocol.

mod fragments;
mod stateful_reader;
mod writer_proxy;

pub use fragments::{fragment_count, FragmentAssembly, FragmentError, FragmentLimits};
pub use stateful_reader::StatefulReader;
pub use writer_proxy::{ChangeFromWriterStatus, HeartbeatOutcome, WriterProxy};
