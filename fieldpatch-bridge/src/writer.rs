// Fieldpatch Bridge - Device write-back adapter
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Device write-back that encodes register words and records them.
//!
//! The PLC link itself lives outside the bridge; this adapter produces the
//! exact words that would be written and logs them.

use fieldpatch::{DeviceAddress, DeviceError, DeviceWriter, Value};
use std::sync::Mutex;
use tracing::info;

/// One encoded register write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterWrite {
    pub device: String,
    pub words: Vec<u16>,
}

/// Encodes writes and keeps the most recent one
#[derive(Debug, Default)]
pub struct LoggingDeviceWriter {
    last: Mutex<Option<RegisterWrite>>,
}

impl LoggingDeviceWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent successful write
    pub fn last_write(&self) -> Option<RegisterWrite> {
        self.last.lock().ok().and_then(|last| last.clone())
    }
}

impl DeviceWriter for LoggingDeviceWriter {
    fn write(&self, address: &DeviceAddress, value: &Value) -> Result<(), DeviceError> {
        let words = address.encode(value)?;
        info!("Write-back {} <- {} {:?}", address, value, words);

        if let Ok(mut last) = self.last.lock() {
            *last = Some(RegisterWrite {
                device: address.to_string(),
                words,
            });
        }
        Ok(())
    }
}
