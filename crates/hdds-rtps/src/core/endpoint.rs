// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! What every endpoint borrows from its participant, and outbound batching.

use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::config::ReliabilityConfig;
use crate::core::guid::GuidPrefix;
use crate::core::locator::Locator;
use crate::core::pool::{PayloadPool, PoolHandle};
use crate::dds::{Error, Result};
use crate::protocol::rtps::{InfoDstSubmessage, MessageBuilder, Submessage};
use crate::runtime::TimedEventService;
use crate::transport::Transport;

/// Send timeout handed to the transport.
const SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Participant resources shared with an endpoint.
///
/// Pool and timer service are held weakly: the participant owns them and
/// an endpoint that outlives it gets [`Error::AlreadyDeleted`].
#[derive(Clone)]
pub struct EndpointContext {
    pub guid_prefix: GuidPrefix,
    pub config: ReliabilityConfig,
    pub transport: Arc<dyn Transport>,
    pub pool: PoolHandle,
    pub timers: Weak<TimedEventService>,
}

impl EndpointContext {
    pub fn pool(&self) -> Result<Arc<PayloadPool>> {
        self.pool.get()
    }

    pub fn timers(&self) -> Result<Arc<TimedEventService>> {
        self.timers.upgrade().ok_or(Error::AlreadyDeleted)
    }

    /// Hand finished messages to the transport.
    pub(crate) fn send_all(&self, outbound: Vec<Outbound>) {
        for out in outbound {
            for bytes in &out.messages {
                if !self.transport.send(bytes, &out.locators, SEND_TIMEOUT) {
                    log::debug!(
                        "[Endpoint] transport refused {} bytes for {} locators",
                        bytes.len(),
                        out.locators.len()
                    );
                }
            }
        }
    }
}

impl std::fmt::Debug for EndpointContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointContext")
            .field("guid_prefix", &self.guid_prefix)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Messages for one remote endpoint, built under the endpoint lock and sent
/// after it is released.
#[derive(Debug)]
pub(crate) struct Outbound {
    pub locators: Vec<Locator>,
    pub messages: Vec<Vec<u8>>,
}

/// Fills messages addressed to one remote participant, starting a new
/// message (with a fresh INFO_DST) whenever the current one is full.
pub(crate) struct OutboundBatch {
    source: GuidPrefix,
    destination: GuidPrefix,
    max_size: usize,
    builder: Option<MessageBuilder>,
    finished: Vec<Vec<u8>>,
}

impl OutboundBatch {
    pub fn new(source: GuidPrefix, destination: GuidPrefix, max_size: usize) -> Self {
        Self {
            source,
            destination,
            max_size,
            builder: None,
            finished: Vec::new(),
        }
    }

    fn fresh_builder(&self) -> Result<MessageBuilder> {
        let mut builder = MessageBuilder::new(self.source, self.max_size)?;
        builder.add(&Submessage::InfoDst(InfoDstSubmessage {
            guid_prefix: self.destination,
        }))?;
        Ok(builder)
    }

    pub fn push(&mut self, submessage: &Submessage) -> Result<()> {
        let mut builder = match self.builder.take() {
            Some(b) => b,
            None => self.fresh_builder()?,
        };
        if !builder.add(submessage)? {
            self.finished.push(builder.finish());
            builder = self.fresh_builder()?;
            if !builder.add(submessage)? {
                return Err(Error::OutOfResources(format!(
                    "submessage does not fit in {} bytes",
                    self.max_size
                )));
            }
        }
        self.builder = Some(builder);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.finished.is_empty() && self.builder.is_none()
    }

    pub fn into_outbound(mut self, locators: &[Locator]) -> Option<Outbound> {
        if let Some(builder) = self.builder.take() {
            self.finished.push(builder.finish());
        }
        if self.finished.is_empty() || locators.is_empty() {
            return None;
        }
        Some(Outbound {
            locators: locators.to_vec(),
            messages: self.finished,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guid::EntityId;
    use crate::protocol::rtps::{parse_message, HeartbeatSubmessage};
    use crate::reliability::SequenceNumber;

    fn hb(count: u32) -> Submessage {
        Submessage::Heartbeat(HeartbeatSubmessage {
            reader_id: EntityId::user_reader(1),
            writer_id: EntityId::user_writer(1),
            first_sn: SequenceNumber::from(1),
            last_sn: SequenceNumber::from(1),
            count,
            final_flag: true,
            liveliness_flag: false,
        })
    }

    #[test]
    fn test_batch_splits_full_messages() {
        // header (20) + INFO_DST (16) + two heartbeats (32 each)
        let mut batch = OutboundBatch::new(GuidPrefix([1; 12]), GuidPrefix([2; 12]), 100);
        for count in 1..=5 {
            batch.push(&hb(count)).expect("heartbeat fits in an empty message");
        }
        let out = batch
            .into_outbound(&[Locator::udpv4([127, 0, 0, 1], 7411)])
            .expect("messages");
        assert_eq!(out.messages.len(), 3);
        let total: usize = out
            .messages
            .iter()
            .map(|m| {
                parse_message(m, GuidPrefix([2; 12]))
                    .expect("parse")
                    .submessages
                    .len()
            })
            .sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_empty_batch_or_no_locator_yields_nothing() {
        let batch = OutboundBatch::new(GuidPrefix([1; 12]), GuidPrefix([2; 12]), 100);
        assert!(batch.is_empty());
        assert!(batch.into_outbound(&[Locator::udpv4([127, 0, 0, 1], 1)]).is_none());

        let mut batch = OutboundBatch::new(GuidPrefix([1; 12]), GuidPrefix([2; 12]), 100);
        batch.push(&hb(1)).expect("push");
        assert!(batch.into_outbound(&[]).is_none());
    }

    #[test]
    fn test_oversized_submessage_is_an_error() {
        let mut batch = OutboundBatch::new(GuidPrefix([1; 12]), GuidPrefix([2; 12]), 50);
        assert!(matches!(batch.push(&hb(1)), Err(Error::OutOfResources(_))));
    }
}
