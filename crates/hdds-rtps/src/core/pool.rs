// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload arena shared by the endpoints of one participant.
//!
//! The participant owns the only strong reference to the [`PayloadPool`].
//! Writers and readers keep a [`PoolHandle`] (a `Weak`) and upgrade it on
//! every use, so an endpoint that outlives its participant fails with
//! [`Error::AlreadyDeleted`] instead of touching a torn-down pool.
//!
//! Buffers are recycled: releasing a payload returns its allocation to a free
//! list (bounded by `max_cached`) for the next `get_payload`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::dds::{Error, Result};

/// Owned serialized sample bytes (encapsulation header included).
#[derive(Clone, PartialEq, Eq, Default)]
pub struct SerializedPayload {
    data: Vec<u8>,
}

impl SerializedPayload {
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl std::fmt::Debug for SerializedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SerializedPayload({} bytes)", self.data.len())
    }
}

/// Recycling allocator for [`SerializedPayload`] buffers.
#[derive(Debug)]
pub struct PayloadPool {
    free: Mutex<Vec<Vec<u8>>>,
    max_cached: usize,
    in_use: AtomicUsize,
}

impl PayloadPool {
    pub fn new(max_cached: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_cached)),
            max_cached,
            in_use: AtomicUsize::new(0),
        }
    }

    /// Copy `data` into a recycled (or fresh) buffer.
    pub fn get_payload(&self, data: &[u8]) -> SerializedPayload {
        let mut buf = self.free.lock().pop().unwrap_or_default();
        buf.clear();
        buf.extend_from_slice(data);
        self.in_use.fetch_add(1, Ordering::Relaxed);
        SerializedPayload { data: buf }
    }

    /// Return a payload's buffer to the free list.
    pub fn release_payload(&self, payload: SerializedPayload) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        let mut free = self.free.lock();
        if free.len() < self.max_cached {
            free.push(payload.data);
        }
    }

    /// Payloads handed out and not yet released.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    pub fn cached(&self) -> usize {
        self.free.lock().len()
    }
}

/// Non-owning reference to the participant's [`PayloadPool`].
#[derive(Debug, Clone)]
pub struct PoolHandle(Weak<PayloadPool>);

impl PoolHandle {
    pub fn new(pool: &Arc<PayloadPool>) -> Self {
        Self(Arc::downgrade(pool))
    }

    /// Detached handle, for endpoints built outside a participant.
    pub fn detached() -> Self {
        Self(Weak::new())
    }

    pub fn get(&self) -> Result<Arc<PayloadPool>> {
        self.0.upgrade().ok_or(Error::AlreadyDeleted)
    }

    /// Release through the pool when it still exists; otherwise just drop.
    pub fn release(&self, payload: SerializedPayload) {
        if let Some(pool) = self.0.upgrade() {
            pool.release_payload(payload);
        }
    }
}
