//! Error types for fieldpatch
//!
//! This module defines all error types used throughout the library.
//! A [`PatchError`] is fatal to the engine loop. Ingress, device and
//! configuration errors are logged and absorbed where they occur.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, PatchError>;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum PatchError {
    /// The data sink rejected or failed a request
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// A document could not be serialized
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors returned by a [`Sink`](crate::dispatch::Sink) implementation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    /// Non-success HTTP status, with the response body
    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// Transport failure before a response was received
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response body could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors while accepting raw ingress payloads
#[derive(Error, Debug)]
pub enum IngressError {
    /// Payload is not a `{address, value}` object
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Ingress has been shut down
    #[error("Ingress closed")]
    Closed,
}

/// Errors in device write-back addressing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AddressError {
    /// Address list does not split into 4-tuples
    #[error("Invalid address format {0:?}: expected Type,Number,ProcessWidth,RegisterCount")]
    InvalidFormat(String),

    /// A numeric address field failed to parse
    #[error("Invalid number in field {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    /// Number of addresses does not match number of values
    #[error("Address count mismatch: {addresses} addresses for {values} values")]
    CountMismatch { addresses: usize, values: usize },

    /// Value cannot be written to a register
    #[error("Unsupported value for register write: {0}")]
    UnsupportedValue(String),
}

/// Errors returned by a [`DeviceWriter`](crate::dispatch::DeviceWriter)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// Target address could not be used
    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    /// The device rejected or failed the write
    #[error("Write to {address} failed: {reason}")]
    Write { address: String, reason: String },
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Unknown dispatch mode
    #[error("Unknown insert mode: {0}")]
    UnknownMode(String),

    /// A value could not be parsed
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}
