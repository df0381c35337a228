// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Listener handler slots for writer and reader events.
//!
//! A listener is a set of optional closures, one per event kind. Unset slots
//! are no-ops, so there is no separate "NoOp" listener type.
//!
//! Endpoints invoke handlers after releasing their internal lock; a handler
//! may call back into the endpoint that fired it.
//!
//! ```rust
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//! use hdds_rtps::dds::ReaderListener;
//!
//! let hits = Arc::new(AtomicU32::new(0));
//! let hits_clone = Arc::clone(&hits);
//! let listener = ReaderListener::new().on_data_available(move || {
//!     hits_clone.fetch_add(1, Ordering::SeqCst);
//! });
//! listener.data_available();
//! assert_eq!(hits.load(Ordering::SeqCst), 1);
//! ```

use crate::core::guid::Guid;
use crate::reliability::{InstanceHandle, SampleIdentity};

/// Status information for subscription matching events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionMatchedStatus {
    pub total_count: u32,
    pub total_count_change: i32,
    pub current_count: u32,
    pub current_count_change: i32,
    /// GUID of the last matched/unmatched publication.
    pub last_publication_handle: Option<Guid>,
}

/// Status information for publication matching events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicationMatchedStatus {
    pub total_count: u32,
    pub total_count_change: i32,
    pub current_count: u32,
    pub current_count_change: i32,
    /// GUID of the last matched/unmatched subscription.
    pub last_subscription_handle: Option<Guid>,
}

/// Status information for liveliness changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivelinessChangedStatus {
    pub alive_count: u32,
    pub alive_count_change: i32,
    pub not_alive_count: u32,
    pub not_alive_count_change: i32,
    pub last_publication_handle: Option<Guid>,
}

/// Status information for sample lost events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleLostStatus {
    pub total_count: u32,
    pub total_count_change: i32,
}

/// Reason why a sample was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleRejectedReason {
    #[default]
    NotRejected,
    /// Rejected due to max_samples.
    ResourceLimit,
    /// Rejected due to max_instances.
    InstanceLimit,
    /// Rejected due to max_samples_per_instance.
    SamplesPerInstanceLimit,
}

/// Status information for sample rejected events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleRejectedStatus {
    pub total_count: u32,
    pub total_count_change: i32,
    pub last_reason: SampleRejectedReason,
    pub last_instance_handle: InstanceHandle,
}

type Slot<A> = Option<Box<dyn Fn(A) + Send + Sync>>;
type Slot0 = Option<Box<dyn Fn() + Send + Sync>>;

/// Optional handlers for writer-side events.
#[derive(Default)]
pub struct WriterListener {
    publication_matched: Slot<PublicationMatchedStatus>,
    unacknowledged_sample_removed: Slot<SampleIdentity>,
    offered_deadline_missed: Slot<InstanceHandle>,
}

impl WriterListener {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_publication_matched<F>(mut self, f: F) -> Self
    where
        F: Fn(PublicationMatchedStatus) + Send + Sync + 'static,
    {
        self.publication_matched = Some(Box::new(f));
        self
    }

    /// Fired when history limits evict a change some reader has not acknowledged.
    #[must_use]
    pub fn on_unacknowledged_sample_removed<F>(mut self, f: F) -> Self
    where
        F: Fn(SampleIdentity) + Send + Sync + 'static,
    {
        self.unacknowledged_sample_removed = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_offered_deadline_missed<F>(mut self, f: F) -> Self
    where
        F: Fn(InstanceHandle) + Send + Sync + 'static,
    {
        self.offered_deadline_missed = Some(Box::new(f));
        self
    }

    pub fn publication_matched(&self, status: PublicationMatchedStatus) {
        if let Some(f) = &self.publication_matched {
            f(status);
        }
    }

    pub fn unacknowledged_sample_removed(&self, identity: SampleIdentity) {
        if let Some(f) = &self.unacknowledged_sample_removed {
            f(identity);
        }
    }

    pub fn offered_deadline_missed(&self, handle: InstanceHandle) {
        if let Some(f) = &self.offered_deadline_missed {
            f(handle);
        }
    }
}

impl std::fmt::Debug for WriterListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterListener")
            .field("publication_matched", &self.publication_matched.is_some())
            .field(
                "unacknowledged_sample_removed",
                &self.unacknowledged_sample_removed.is_some(),
            )
            .field("offered_deadline_missed", &self.offered_deadline_missed.is_some())
            .finish()
    }
}

/// Optional handlers for reader-side events.
#[derive(Default)]
pub struct ReaderListener {
    data_available: Slot0,
    subscription_matched: Slot<SubscriptionMatchedStatus>,
    sample_lost: Slot<SampleLostStatus>,
    sample_rejected: Slot<SampleRejectedStatus>,
    liveliness_changed: Slot<LivelinessChangedStatus>,
}

impl ReaderListener {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_data_available<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.data_available = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_subscription_matched<F>(mut self, f: F) -> Self
    where
        F: Fn(SubscriptionMatchedStatus) + Send + Sync + 'static,
    {
        self.subscription_matched = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_sample_lost<F>(mut self, f: F) -> Self
    where
        F: Fn(SampleLostStatus) + Send + Sync + 'static,
    {
        self.sample_lost = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_sample_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(SampleRejectedStatus) + Send + Sync + 'static,
    {
        self.sample_rejected = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_liveliness_changed<F>(mut self, f: F) -> Self
    where
        F: Fn(LivelinessChangedStatus) + Send + Sync + 'static,
    {
        self.liveliness_changed = Some(Box::new(f));
        self
    }

    pub fn data_available(&self) {
        if let Some(f) = &self.data_available {
            f();
        }
    }

    pub fn subscription_matched(&self, status: SubscriptionMatchedStatus) {
        if let Some(f) = &self.subscription_matched {
            f(status);
        }
    }

    pub fn sample_lost(&self, status: SampleLostStatus) {
        if let Some(f) = &self.sample_lost {
            f(status);
        }
    }

    pub fn sample_rejected(&self, status: SampleRejectedStatus) {
        if let Some(f) = &self.sample_rejected {
            f(status);
        }
    }

    pub fn liveliness_changed(&self, status: LivelinessChangedStatus) {
        if let Some(f) = &self.liveliness_changed {
            f(status);
        }
    }
}

impl std::fmt::Debug for ReaderListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderListener")
            .field("data_available", &self.data_available.is_some())
            .field("subscription_matched", &self.subscription_matched.is_some())
            .field("sample_lost", &self.sample_lost.is_some())
            .field("sample_rejected", &self.sample_rejected.is_some())
            .field("liveliness_changed", &self.liveliness_changed.is_some())
            .finish()
    }
}
