// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Change histories of the two endpoint kinds.
//!
//! | Side | Type | Retention |
//! |------|------|-----------|
//! | writer | [`WriterHistory`] | KEEP_LAST evicts, KEEP_ALL waits for acknowledgement |
//! | reader | [`ReaderHistory`] | KEEP_LAST replaces, KEEP_ALL rejects (writer resends) |
//!
//! Neither history locks anything; both live inside their endpoint's mutex.

mod instance;
pub mod reader;
pub mod writer;

pub use instance::{Owner, ReaderInstance};
pub use reader::{ReaderHistory, ReceiveOutcome};
pub use writer::{Capacity, WriterHistory, WriterInstance};
