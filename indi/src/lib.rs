//! INDI protocol client
//!
//! Implements the client side of the INDI protocol: a persistent TCP session
//! over which a server pushes XML property vectors for the devices it hosts.
//! The client keeps a shadow copy of every defined property (type, state,
//! permission, elements, values) and broadcasts change events to subscribers.
//!
//! ## Features
//!
//! - Structured error handling with IndiError types
//! - Property min/max extraction for number elements
//! - Permission checking before property writes
//! - BLOB reception with base64 decode
//! - Per-device subscription via `getProperties`

mod client;
mod error;
mod protocol;

pub use client::*;
pub use error::{IndiError, IndiResult};
pub use protocol::{standard_properties, INDI_PROTOCOL_VERSION};

/// Default INDI server port
pub const INDI_DEFAULT_PORT: u16 = 7624;

/// INDI device information
#[derive(Debug, Clone)]
pub struct IndiDevice {
    pub name: String,
    pub driver: String,
}

/// INDI property types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndiPropertyType {
    Text,
    Number,
    Switch,
    Light,
    Blob,
}

/// INDI property state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndiPropertyState {
    Idle,
    Ok,
    Busy,
    Alert,
}

/// An INDI property
#[derive(Debug, Clone)]
pub struct IndiProperty {
    pub device: String,
    pub name: String,
    pub label: String,
    pub group: String,
    pub property_type: IndiPropertyType,
    pub state: IndiPropertyState,
    pub perm: IndiPermission,
    pub elements: Vec<String>,
}

/// INDI property permission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndiPermission {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Timeout configuration for INDI operations
///
/// Every timeout fails the operation and leaves retry to the caller.
#[derive(Debug, Clone)]
pub struct IndiTimeoutConfig {
    /// Connection timeout for initial TCP connection (default: 10 seconds)
    pub connection_timeout_secs: u64,
    /// Timeout for completing partial XML messages (default: 60 seconds)
    /// If a partial XML message is not completed within this time, the parser resets
    pub message_timeout_secs: u64,
    /// Timeout for receiving BLOB data (default: 300 seconds for large images)
    pub blob_timeout_secs: u64,
}

impl Default for IndiTimeoutConfig {
    fn default() -> Self {
        Self {
            connection_timeout_secs: 10,
            message_timeout_secs: 60,
            blob_timeout_secs: 300,
        }
    }
}

impl IndiTimeoutConfig {
    /// Get the connection timeout as a Duration
    pub fn connection_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connection_timeout_secs)
    }

    /// Get the message timeout as a Duration
    pub fn message_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.message_timeout_secs)
    }

    /// Get the BLOB timeout as a Duration
    pub fn blob_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.blob_timeout_secs)
    }
}
