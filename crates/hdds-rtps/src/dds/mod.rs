// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Application-facing result types and listeners
//!
//! Every fallible operation of the reliability core returns [`Result`].
//! Applications that want the closed DDS result-code set convert with
//! [`ReturnCode::from`].
//!
//! ```rust
//! use hdds_rtps::dds::{Error, ReturnCode};
//!
//! let err = Error::Timeout;
//! assert_eq!(ReturnCode::from(&err), ReturnCode::Timeout);
//! ```

/// Listener handler slots and status structs.
pub mod listener;

pub use listener::{
    LivelinessChangedStatus, PublicationMatchedStatus, ReaderListener, SampleLostStatus,
    SampleRejectedReason, SampleRejectedStatus, SubscriptionMatchedStatus, WriterListener,
};

use crate::core::ser::SerError;

/// Errors returned by the reliability core.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    // ========================================================================
    // Blocking / resource errors
    // ========================================================================
    /// A blocking call hit its deadline.
    Timeout,
    /// History, instance or sample limits reached.
    OutOfResources(String),

    // ========================================================================
    // Call errors
    // ========================================================================
    /// Operation not allowed in the entity's current state.
    PreconditionNotMet(String),
    /// Nothing to read or take.
    NoData,
    /// Internal state is inconsistent with the request.
    InvalidState(String),
    /// Argument rejected.
    BadParameter(String),
    /// The owning participant (or pool) is gone.
    AlreadyDeleted,

    // ========================================================================
    // Wire errors
    // ========================================================================
    /// CDR encode/decode failure.
    Serialization(SerError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Timeout => write!(f, "Operation timed out"),
            Error::OutOfResources(msg) => write!(f, "Out of resources: {}", msg),
            Error::PreconditionNotMet(msg) => write!(f, "Precondition not met: {}", msg),
            Error::NoData => write!(f, "No data"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::BadParameter(msg) => write!(f, "Bad parameter: {}", msg),
            Error::AlreadyDeleted => write!(f, "Entity already deleted"),
            Error::Serialization(e) => write!(f, "Serialization failed: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

/// Convenient alias for results using the crate [`Error`].
pub type Result<T> = core::result::Result<T, Error>;

/// Closed result-code set exposed at the application boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Ok,
    NoData,
    Timeout,
    Error,
    OutOfResources,
    PreconditionNotMet,
}

impl From<&Error> for ReturnCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::Timeout => ReturnCode::Timeout,
            Error::NoData => ReturnCode::NoData,
            Error::OutOfResources(_) => ReturnCode::OutOfResources,
            Error::PreconditionNotMet(_) | Error::AlreadyDeleted => ReturnCode::PreconditionNotMet,
            Error::InvalidState(_) | Error::BadParameter(_) | Error::Serialization(_) => {
                ReturnCode::Error
            }
        }
    }
}

impl<T> From<&Result<T>> for ReturnCode {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => ReturnCode::Ok,
            Err(e) => ReturnCode::from(e),
        }
    }
}
