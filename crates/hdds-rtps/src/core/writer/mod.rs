// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer side of the reliable protocol.

mod reader_proxy;
mod stateful_writer;

pub use reader_proxy::{ChangeForReaderStatus, ReaderProxy, UnsentChange};
pub use stateful_writer::StatefulWriter;
