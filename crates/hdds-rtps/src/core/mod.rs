// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core building blocks: identifiers, wire primitives, payload storage and
//! the two stateful endpoints.

pub mod endpoint;
pub mod guid;
pub mod locator;
pub mod pool;
pub mod reader;
pub mod ser;
pub mod time;
pub mod writer;

pub use endpoint::EndpointContext;
pub use guid::{EntityId, Guid, GuidPrefix};
pub use locator::Locator;
pub use pool::{PayloadPool, PoolHandle, SerializedPayload};
pub use time::Time;
