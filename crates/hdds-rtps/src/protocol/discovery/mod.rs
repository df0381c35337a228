// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery-facing data: parameter list codec and the proxy data the
//! discovery layer hands to `matched_reader_add` / `matched_writer_add`.

pub mod constants;
mod parameter_list;
mod proxy_data;

pub use parameter_list::{
    read_encapsulation, read_parameters, write_encapsulation, write_parameter, write_sentinel,
    InlineQos,
};
pub use proxy_data::{ReaderProxyData, WriterProxyData};
