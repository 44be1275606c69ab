// Fieldpatch Bridge - HTTP sink client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! REST sink backed by a blocking `reqwest` client.
//!
//! Runs on the engine thread, never on the async runtime.

use crate::error::BridgeError;
use fieldpatch::{Sink, SinkError, SinkMode, SinkResponse};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;

/// Sends documents to a REST endpoint
pub struct HttpSink {
    client: Client,
    url: String,
    method: Method,
    api_key: String,
}

impl HttpSink {
    /// Create a sink for `url` using the `method` verb
    pub fn new(url: &str, method: &str, api_key: &str) -> Result<Self, BridgeError> {
        let method = Method::from_bytes(method.trim().to_uppercase().as_bytes())
            .map_err(|_| BridgeError::InvalidMethod(method.to_string()))?;
        Ok(Self {
            client: Client::builder().build()?,
            url: url.to_string(),
            method,
            api_key: api_key.to_string(),
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }
}

impl Sink for HttpSink {
    fn send(&self, mode: SinkMode, body: &str) -> Result<SinkResponse, SinkError> {
        let mut request = self
            .client
            .request(self.method.clone(), &self.url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json");
        if mode == SinkMode::Upsert {
            request = request.header("Prefer", "return=representation");
        }

        let response = request
            .body(body.to_string())
            .send()
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| SinkError::InvalidResponse(e.to_string()))?;

        check_status(status, body)
    }
}

/// 200, 201 and 204 are success; everything else carries status and body
pub fn check_status(status: u16, body: String) -> Result<SinkResponse, SinkError> {
    match status {
        200 | 201 | 204 => Ok(SinkResponse { status, body }),
        _ => Err(SinkError::Status { status, body }),
    }
}
