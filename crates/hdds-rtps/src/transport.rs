// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport boundary.
//!
//! The reliability core never owns sockets. It hands complete RTPS messages
//! to a [`Transport`] together with the destination locators, and receives
//! datagrams through `Participant::on_data_received`.
//!
//! # Implementations
//!
//! - [`LoopbackTransport`]: in-memory queue with an optional drop filter,
//!   used to wire participants together without a network

use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::core::locator::Locator;

/// Outbound datagram sink.
pub trait Transport: Send + Sync {
    /// Send one message to every locator. Returns `false` when nothing
    /// could be sent before `timeout`.
    fn send(&self, bytes: &[u8], locators: &[Locator], timeout: Duration) -> bool;
}

/// Datagram captured by a [`LoopbackTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub bytes: Vec<u8>,
    pub destination: Locator,
}

type DropFilter = Box<dyn Fn(&Datagram) -> bool + Send + Sync>;

/// In-memory transport: every send becomes one [`Datagram`] per locator
/// on a crossbeam channel.
pub struct LoopbackTransport {
    tx: Sender<Datagram>,
    rx: Receiver<Datagram>,
    drop_filter: Option<DropFilter>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            drop_filter: None,
        }
    }

    /// Drop every datagram for which `filter` returns `true` (simulated loss).
    #[must_use]
    pub fn with_drop_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Datagram) -> bool + Send + Sync + 'static,
    {
        self.drop_filter = Some(Box::new(filter));
        self
    }

    /// Receiving side of the queue.
    pub fn receiver(&self) -> Receiver<Datagram> {
        self.rx.clone()
    }

    /// Pop everything queued so far.
    pub fn drain(&self) -> Vec<Datagram> {
        self.rx.try_iter().collect()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, bytes: &[u8], locators: &[Locator], _timeout: Duration) -> bool {
        let mut delivered = false;
        for locator in locators {
            let datagram = Datagram {
                bytes: bytes.to_vec(),
                destination: *locator,
            };
            if self.drop_filter.as_ref().is_some_and(|drop| drop(&datagram)) {
                log::trace!("[Loopback] dropped {} bytes to {:?}", bytes.len(), locator);
                continue;
            }
            delivered |= self.tx.send(datagram).is_ok();
        }
        delivered
    }
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("queued", &self.rx.len())
            .field("lossy", &self.drop_filter.is_some())
            .finish()
    }
}
