// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant: owner of the shared resources and inbound dispatcher.
//!
//! The participant holds the only strong references to the payload pool and
//! the timed-event service. Writers and readers get an [`EndpointContext`]
//! carrying `Weak` handles, so once [`Participant::shutdown`] ran every
//! endpoint operation that needs them fails with `Error::AlreadyDeleted`
//! instead of touching freed state.
//!
//! ```text
//! transport ──bytes──▶ on_data_received ──parse──▶ ACKNACK / NACK_FRAG ──▶ StatefulWriter
//!                                               └─▶ DATA / DATA_FRAG / HB / GAP ──▶ StatefulReader
//! ```
//!
//! # Lifecycle
//!
//! 1. [`Participant::create`] starts the timer thread.
//! 2. `create_writer` / `create_reader` register endpoints by entity id.
//! 3. [`Participant::shutdown`] shuts every endpoint down, stops the timer
//!    thread and releases the pool. It is idempotent and also runs on drop.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::ReliabilityConfig;
use crate::core::endpoint::EndpointContext;
use crate::core::guid::{EntityId, Guid, GuidPrefix};
use crate::core::locator::Locator;
use crate::core::pool::{PayloadPool, PoolHandle};
use crate::core::reader::StatefulReader;
use crate::core::writer::StatefulWriter;
use crate::dds::{Error, ReaderListener, Result, WriterListener};
use crate::protocol::discovery::{ReaderProxyData, WriterProxyData};
use crate::protocol::rtps::{parse_message, Submessage};
use crate::qos::QosProfile;
use crate::runtime::TimedEventService;
use crate::transport::Transport;

/// Payload buffers kept for reuse by the participant pool.
const POOL_CACHE: usize = 256;

/// Name and key-ness of the topic an endpoint is created on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicInfo {
    pub name: String,
    pub type_name: String,
    pub keyed: bool,
}

impl TopicInfo {
    pub fn new(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            keyed: false,
        }
    }

    #[must_use]
    pub fn keyed(mut self) -> Self {
        self.keyed = true;
        self
    }
}

pub struct Participant {
    guid_prefix: GuidPrefix,
    config: ReliabilityConfig,
    transport: Arc<dyn Transport>,
    pool: Mutex<Option<Arc<PayloadPool>>>,
    timers: Mutex<Option<Arc<TimedEventService>>>,
    writers: DashMap<EntityId, Arc<StatefulWriter>>,
    readers: DashMap<EntityId, Arc<StatefulReader>>,
    unicast_locators: Mutex<Vec<Locator>>,
    next_entity_key: AtomicU32,
    running: AtomicBool,
}

impl Participant {
    /// Validate `config`, start the timer thread and allocate the pool.
    pub fn create(
        guid_prefix: GuidPrefix,
        config: ReliabilityConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let timers = TimedEventService::start()?;
        log::debug!("[Participant] {:?} created", guid_prefix);
        Ok(Arc::new(Self {
            guid_prefix,
            config,
            transport,
            pool: Mutex::new(Some(Arc::new(PayloadPool::new(POOL_CACHE)))),
            timers: Mutex::new(Some(Arc::new(timers))),
            writers: DashMap::new(),
            readers: DashMap::new(),
            unicast_locators: Mutex::new(Vec::new()),
            next_entity_key: AtomicU32::new(1),
            running: AtomicBool::new(true),
        }))
    }

    pub fn guid_prefix(&self) -> GuidPrefix {
        self.guid_prefix
    }

    pub fn guid(&self) -> Guid {
        Guid::new(self.guid_prefix, EntityId::PARTICIPANT)
    }

    pub fn config(&self) -> &ReliabilityConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Locators advertised in the proxy data of endpoints created afterwards.
    pub fn set_unicast_locators(&self, locators: Vec<Locator>) {
        *self.unicast_locators.lock() = locators;
    }

    /// Pool shared by every endpoint, while the participant runs.
    pub fn pool(&self) -> Option<Arc<PayloadPool>> {
        self.pool.lock().clone()
    }

    fn endpoint_context(&self) -> Result<EndpointContext> {
        if !self.is_running() {
            return Err(Error::AlreadyDeleted);
        }
        let pool = self.pool.lock().clone().ok_or(Error::AlreadyDeleted)?;
        let timers = self.timers.lock().clone().ok_or(Error::AlreadyDeleted)?;
        Ok(EndpointContext {
            guid_prefix: self.guid_prefix,
            config: self.config.clone(),
            transport: Arc::clone(&self.transport),
            pool: PoolHandle::new(&pool),
            timers: Arc::downgrade(&timers),
        })
    }

    fn allocate_key(&self) -> u32 {
        self.next_entity_key.fetch_add(1, Ordering::Relaxed)
    }

    // ========================================================================
    // Endpoint factory
    // ========================================================================

    pub fn create_writer(
        &self,
        topic: &TopicInfo,
        qos: QosProfile,
        listener: WriterListener,
    ) -> Result<Arc<StatefulWriter>> {
        let ctx = self.endpoint_context()?;
        let entity_id = EntityId::user_writer(self.allocate_key());
        let data = WriterProxyData {
            guid: Guid::new(self.guid_prefix, entity_id),
            participant_guid: self.guid(),
            topic_name: topic.name.clone(),
            type_name: topic.type_name.clone(),
            unicast_locators: self.unicast_locators.lock().clone(),
            qos,
            ..Default::default()
        };
        let writer = StatefulWriter::new(data, topic.keyed, ctx, listener)?;
        self.writers.insert(entity_id, Arc::clone(&writer));
        log::debug!(
            "[Participant] writer {} on '{}' registered",
            writer.guid(),
            topic.name
        );
        Ok(writer)
    }

    pub fn create_reader(
        &self,
        topic: &TopicInfo,
        qos: QosProfile,
        listener: ReaderListener,
    ) -> Result<Arc<StatefulReader>> {
        let ctx = self.endpoint_context()?;
        let entity_id = EntityId::user_reader(self.allocate_key());
        let data = ReaderProxyData {
            guid: Guid::new(self.guid_prefix, entity_id),
            participant_guid: self.guid(),
            topic_name: topic.name.clone(),
            type_name: topic.type_name.clone(),
            unicast_locators: self.unicast_locators.lock().clone(),
            qos,
            ..Default::default()
        };
        let reader = StatefulReader::new(data, topic.keyed, ctx, listener)?;
        self.readers.insert(entity_id, Arc::clone(&reader));
        log::debug!(
            "[Participant] reader {} on '{}' registered",
            reader.guid(),
            topic.name
        );
        Ok(reader)
    }

    pub fn writer(&self, entity_id: EntityId) -> Option<Arc<StatefulWriter>> {
        self.writers.get(&entity_id).map(|w| Arc::clone(w.value()))
    }

    pub fn reader(&self, entity_id: EntityId) -> Option<Arc<StatefulReader>> {
        self.readers.get(&entity_id).map(|r| Arc::clone(r.value()))
    }

    /// Unregister and shut down a writer. `false` when it is unknown.
    pub fn delete_writer(&self, guid: &Guid) -> bool {
        match self.writers.remove(&guid.entity_id) {
            Some((_, writer)) => {
                writer.shutdown();
                true
            }
            None => false,
        }
    }

    pub fn delete_reader(&self, guid: &Guid) -> bool {
        match self.readers.remove(&guid.entity_id) {
            Some((_, reader)) => {
                reader.shutdown();
                true
            }
            None => false,
        }
    }

    // ========================================================================
    // Inbound dispatch
    // ========================================================================

    /// Parse one RTPS message and hand each submessage to its endpoint.
    /// Returns how many submessages reached an endpoint.
    pub fn on_data_received(&self, bytes: &[u8]) -> Result<usize> {
        if !self.is_running() {
            return Err(Error::AlreadyDeleted);
        }
        let message = parse_message(bytes, self.guid_prefix)?;
        let source = message.header.guid_prefix;
        if source == self.guid_prefix {
            log::trace!("[Participant] ignoring own message");
            return Ok(0);
        }

        let mut delivered = 0;
        for received in message.submessages {
            let prefix = received.source_prefix;
            match &received.submessage {
                Submessage::AckNack(acknack) => {
                    if let Some(writer) = self.writer(acknack.writer_id) {
                        writer.on_acknack(Guid::new(prefix, acknack.reader_id), acknack);
                        delivered += 1;
                    }
                }
                Submessage::NackFrag(nack_frag) => {
                    if let Some(writer) = self.writer(nack_frag.writer_id) {
                        writer.on_nack_frag(Guid::new(prefix, nack_frag.reader_id), nack_frag);
                        delivered += 1;
                    }
                }
                Submessage::Data(data) => {
                    for reader in self.readers_for(data.reader_id, Guid::new(prefix, data.writer_id)) {
                        reader.on_data(prefix, received.timestamp, data);
                        delivered += 1;
                    }
                }
                Submessage::DataFrag(frag) => {
                    for reader in self.readers_for(frag.reader_id, Guid::new(prefix, frag.writer_id)) {
                        reader.on_data_frag(prefix, received.timestamp, frag);
                        delivered += 1;
                    }
                }
                Submessage::Heartbeat(heartbeat) => {
                    let writer = Guid::new(prefix, heartbeat.writer_id);
                    for reader in self.readers_for(heartbeat.reader_id, writer) {
                        reader.on_heartbeat(prefix, heartbeat);
                        delivered += 1;
                    }
                }
                Submessage::Gap(gap) => {
                    for reader in self.readers_for(gap.reader_id, Guid::new(prefix, gap.writer_id)) {
                        reader.on_gap(prefix, gap);
                        delivered += 1;
                    }
                }
                Submessage::InfoTs(_) | Submessage::InfoDst(_) => {}
            }
        }
        Ok(delivered)
    }

    /// Readers a writer-originated submessage is meant for. An unknown
    /// reader id addresses every local reader matched with `writer`.
    fn readers_for(&self, reader_id: EntityId, writer: Guid) -> Vec<Arc<StatefulReader>> {
        if reader_id.is_unknown() {
            return self
                .readers
                .iter()
                .filter(|r| r.value().matched_writer_is_matched(&writer))
                .map(|r| Arc::clone(r.value()))
                .collect();
        }
        match self.reader(reader_id) {
            Some(reader) if reader.matched_writer_is_matched(&writer) => vec![reader],
            Some(_) => {
                log::trace!(
                    "[Participant] {:?} not matched with {}, dropping",
                    reader_id,
                    writer
                );
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Shut down every endpoint, stop the timer thread and release the pool.
    /// Idempotent.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let writers: Vec<Arc<StatefulWriter>> =
            self.writers.iter().map(|w| Arc::clone(w.value())).collect();
        let readers: Vec<Arc<StatefulReader>> =
            self.readers.iter().map(|r| Arc::clone(r.value())).collect();
        self.writers.clear();
        self.readers.clear();
        for writer in writers {
            writer.shutdown();
        }
        for reader in readers {
            reader.shutdown();
        }
        if let Some(timers) = self.timers.lock().take() {
            timers.shutdown();
        }
        self.pool.lock().take();
        log::debug!("[Participant] {:?} shut down", self.guid_prefix);
    }
}

impl Drop for Participant {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("guid_prefix", &self.guid_prefix)
            .field("writers", &self.writers.len())
            .field("readers", &self.readers.len())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Match a local writer and reader with each other's proxy data.
pub fn match_endpoints(writer: &StatefulWriter, reader: &StatefulReader) -> Result<()> {
    writer.matched_reader_add(reader.data().clone())?;
    reader.matched_writer_add(writer.data().clone())
}
