// Fieldpatch Bridge - Error types
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Bridge error types

use fieldpatch::{ConfigError, PatchError};
use thiserror::Error;

/// Errors that stop the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Engine failure, usually a rejected or unreachable sink
    #[error("Engine error: {0}")]
    Engine(#[from] PatchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Request verb is not a valid HTTP method
    #[error("Invalid sink method: {0}")]
    InvalidMethod(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A worker thread panicked
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}
