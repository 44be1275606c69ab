//! Patch dispatcher
//!
//! Merges named session buckets into one document, refuses documents
//! carrying too many nulls, hands the rest to the [`Sink`] and resets the
//! session. After a successful send the configured device write-back runs.
//! Sink failures are returned to the caller and are fatal to the engine;
//! write-back failures are logged only.

use crate::config::{SinkMode, WriteBackConfig};
use crate::device::{zip_values, DeviceAddress};
use crate::error::{DeviceError, Result, SinkError};
use crate::ingress::Drain;
use crate::message::{Document, Value};
use crate::metrics::EngineStats;
use crate::session::Session;
use std::sync::Arc;
use std::time::Instant;

/// A flush aborts when the merged document has more top-level nulls than this
pub const NULL_ABORT_THRESHOLD: usize = 3;

/// Response returned by a sink
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkResponse {
    pub status: u16,
    pub body: String,
}

/// Remote data sink
pub trait Sink: Send + Sync {
    /// Deliver one serialized document
    fn send(&self, mode: SinkMode, body: &str) -> std::result::Result<SinkResponse, SinkError>;
}

/// Device register writer used for acknowledgements
pub trait DeviceWriter: Send + Sync {
    fn write(&self, address: &DeviceAddress, value: &Value) -> std::result::Result<(), DeviceError>;
}

/// Outcome of [`Dispatcher::flush`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Document delivered
    Sent { fields: usize, nulls: usize },
    /// Too many nulls; nothing delivered
    Aborted { nulls: usize },
}

/// Merge documents in order; later keys win
pub fn merge<'a>(docs: impl IntoIterator<Item = &'a Document>) -> Document {
    let mut merged = Document::new();
    for doc in docs {
        merged.extend(doc.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}

/// Merge the named session buckets in order
pub fn merge_buckets(session: &Session, names: &[&str]) -> Document {
    merge(names.iter().filter_map(|name| session.bucket(name)))
}

/// Count top-level null values
pub fn count_nulls(doc: &Document) -> usize {
    doc.values().filter(|v| v.is_null()).count()
}

/// Delivers documents to the sink
pub struct Dispatcher {
    sink: Arc<dyn Sink>,
    writer: Option<Arc<dyn DeviceWriter>>,
    mode: SinkMode,
    write_back: WriteBackConfig,
    stats: Arc<EngineStats>,
}

impl Dispatcher {
    /// Create a dispatcher without device write-back
    pub fn new(sink: Arc<dyn Sink>, mode: SinkMode, stats: Arc<EngineStats>) -> Self {
        Self {
            sink,
            writer: None,
            mode,
            write_back: WriteBackConfig::default(),
            stats,
        }
    }

    /// Enable device write-back
    pub fn with_writer(mut self, writer: Arc<dyn DeviceWriter>, config: WriteBackConfig) -> Self {
        self.writer = Some(writer);
        self.write_back = config;
        self
    }

    pub fn mode(&self) -> SinkMode {
        self.mode
    }

    /// Send a document directly, bypassing session buckets
    pub fn send(&self, doc: &Document) -> Result<SinkResponse> {
        let started = Instant::now();
        let body = serde_json::to_string(doc)?;
        let response = self.sink.send(SinkMode::Patch, &body)?;
        self.stats.record_sent();
        log::info!(
            "Sent {} fields in {:.2} s: {}",
            doc.len(),
            started.elapsed().as_secs_f64(),
            body
        );
        Ok(response)
    }

    /// Merge `buckets`, deliver the result and reset the session.
    ///
    /// The caller holds the session lock for the whole call. On abort the
    /// buckets are kept but the weight state is reset and `inbox` drained.
    /// On success every bucket is cleared as well.
    pub fn flush(
        &self,
        session: &mut Session,
        buckets: &[&str],
        inbox: &dyn Drain,
    ) -> Result<FlushOutcome> {
        let merged = merge_buckets(session, buckets);
        let nulls = count_nulls(&merged);

        if nulls > NULL_ABORT_THRESHOLD {
            log::warn!(
                "Aborting flush of {:?}: {} null fields (max {})",
                buckets,
                nulls,
                NULL_ABORT_THRESHOLD
            );
            session.reset_weights();
            self.drain(inbox);
            self.stats.record_abort();
            return Ok(FlushOutcome::Aborted { nulls });
        }

        let started = Instant::now();
        let body = serde_json::to_string(&merged)?;
        let response = self.sink.send(self.mode, &body)?;
        self.stats.record_sent();
        log::info!(
            "Flushed {} fields in {:.2} s: {}",
            merged.len(),
            started.elapsed().as_secs_f64(),
            body
        );

        session.clear_buckets();
        session.reset_weights();
        self.drain(inbox);
        self.write_back(&merged, &response);

        Ok(FlushOutcome::Sent {
            fields: merged.len(),
            nulls,
        })
    }

    fn drain(&self, inbox: &dyn Drain) {
        let drained = inbox.drain();
        if drained > 0 {
            log::debug!("Discarded {} stale batches", drained);
            self.stats.record_drained(drained);
        }
    }

    fn write_back(&self, merged: &Document, response: &SinkResponse) {
        let Some(writer) = &self.writer else {
            return;
        };

        if self.mode == SinkMode::Upsert {
            if let Some(devices) = &self.write_back.upsert_devices {
                self.write_response(writer.as_ref(), devices, response);
            }
        }

        if let Some(device) = &self.write_back.device {
            let value = self
                .write_back
                .field
                .as_ref()
                .and_then(|field| merged.get(field))
                .or(self.write_back.value.as_ref());
            match value {
                Some(value) => self.write_one(writer.as_ref(), device, value),
                None => log::debug!("No write-back value for {}", device),
            }
        }
    }

    fn write_one(&self, writer: &dyn DeviceWriter, device: &str, value: &Value) {
        let result = DeviceAddress::parse(device)
            .map_err(DeviceError::from)
            .and_then(|address| writer.write(&address, value));
        if let Err(e) = &result {
            log::error!("Write-back to {} failed: {}", device, e);
        }
        self.stats.record_write_back(result.is_ok());
    }

    fn write_response(&self, writer: &dyn DeviceWriter, devices: &str, response: &SinkResponse) {
        let row = match response_row(&response.body) {
            Some(row) => row,
            None => {
                log::warn!("Upsert response has no row to write back: {:?}", response.body);
                return;
            }
        };

        let values: Vec<Value> = self
            .write_back
            .response_fields
            .iter()
            .map(|field| {
                row.get(field)
                    .and_then(Value::from_json)
                    .unwrap_or(Value::Null)
            })
            .collect();

        let pairs = match zip_values(devices, values) {
            Ok(pairs) => pairs,
            Err(e) => {
                log::error!("Upsert write-back skipped: {}", e);
                self.stats.record_write_back(false);
                return;
            }
        };

        for (address, value) in pairs {
            let result = writer.write(&address, &value);
            if let Err(e) = &result {
                log::error!("Write-back to {} failed: {}", address, e);
            }
            self.stats.record_write_back(result.is_ok());
        }
    }
}

/// First row of an upsert response; a bare object counts as one row
fn response_row(body: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    match serde_json::from_str::<serde_json::Value>(body).ok()? {
        serde_json::Value::Array(rows) => rows.into_iter().find_map(|row| match row {
            serde_json::Value::Object(map) => Some(map),
            _ => None,
        }),
        serde_json::Value::Object(map) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PatchError;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        bodies: Mutex<Vec<(SinkMode, String)>>,
        response: String,
        fail: bool,
    }

    impl Sink for RecordingSink {
        fn send(&self, mode: SinkMode, body: &str) -> std::result::Result<SinkResponse, SinkError> {
            if self.fail {
                return Err(SinkError::Status {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            self.bodies.lock().push((mode, body.to_string()));
            Ok(SinkResponse {
                status: 200,
                body: self.response.clone(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingWriter {
        writes: Mutex<Vec<(String, Value)>>,
        fail: bool,
    }

    impl DeviceWriter for RecordingWriter {
        fn write(&self, address: &DeviceAddress, value: &Value) -> std::result::Result<(), DeviceError> {
            if self.fail {
                return Err(DeviceError::Write {
                    address: address.to_string(),
                    reason: "offline".to_string(),
                });
            }
            self.writes.lock().push((address.to_string(), value.clone()));
            Ok(())
        }
    }

    struct NoInbox;

    impl Drain for NoInbox {
        fn drain(&self) -> usize {
            0
        }
    }

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn dispatcher(sink: Arc<RecordingSink>, mode: SinkMode) -> Dispatcher {
        Dispatcher::new(sink, mode, Arc::new(EngineStats::new()))
    }

    #[test]
    fn test_merge_later_wins() {
        let a = doc(&[("x", 1.0.into()), ("y", 1.0.into())]);
        let b = doc(&[("y", 2.0.into())]);
        let merged = merge([&a, &b]);
        assert_eq!(merged.get("x"), Some(&Value::Number(1.0)));
        assert_eq!(merged.get("y"), Some(&Value::Number(2.0)));
    }

    #[test]
    fn test_merge_empty() {
        let empty = Document::new();
        assert!(merge([&empty, &empty, &empty]).is_empty());
        assert!(merge(std::iter::empty()).is_empty());
    }

    #[test]
    fn test_flush_clears_session() {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(sink.clone(), SinkMode::Patch);
        let mut session = Session::new();
        session.set_bucket("ch1_", doc(&[("fill", 1.0.into())]));
        session.set_bucket("vacuum", doc(&[("pa", 20.0.into())]));
        session.weights[0].sticky = true;
        session.weights[0].high_water = 9.0;

        let outcome = dispatcher
            .flush(&mut session, &["ch1_", "ch2_", "vacuum"], &NoInbox)
            .unwrap();
        assert_eq!(outcome, FlushOutcome::Sent { fields: 2, nulls: 0 });
        assert!(session.buckets_empty());
        assert!(!session.weights[0].sticky);
        assert_eq!(session.weights[0].high_water, 0.0);

        let bodies = sink.bodies.lock();
        assert_eq!(bodies[0], (SinkMode::Patch, r#"{"fill":1,"pa":20}"#.to_string()));
    }

    #[test]
    fn test_abort_keeps_buckets() {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher(sink.clone(), SinkMode::Patch);
        let mut session = Session::new();
        session.set_bucket(
            "healthcheck",
            doc(&[
                ("a", Value::Null),
                ("b", Value::Null),
                ("c", Value::Null),
                ("d", Value::Null),
            ]),
        );
        session.is_processing = true;

        let outcome = dispatcher
            .flush(&mut session, &["healthcheck"], &NoInbox)
            .unwrap();
        assert_eq!(outcome, FlushOutcome::Aborted { nulls: 4 });
        assert!(sink.bodies.lock().is_empty());
        assert!(!session.buckets_empty());
        assert!(!session.is_processing);
    }

    #[test]
    fn test_sink_error_is_fatal() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let dispatcher = dispatcher(sink, SinkMode::Patch);
        let mut session = Session::new();
        session.set_bucket("do", doc(&[("x", 1.0.into())]));

        let err = dispatcher.flush(&mut session, &["do"], &NoInbox).unwrap_err();
        assert!(matches!(err, PatchError::Sink(SinkError::Status { status: 500, .. })));
        assert!(!session.buckets_empty());
    }

    #[test]
    fn test_patch_write_back_field_or_constant() {
        let sink = Arc::new(RecordingSink::default());
        let writer = Arc::new(RecordingWriter::default());
        let config = WriteBackConfig {
            field: Some("status".to_string()),
            ..WriteBackConfig::constant("D,500,1,1", 1.0)
        };
        let dispatcher = dispatcher(sink, SinkMode::Patch).with_writer(writer.clone(), config);

        let mut session = Session::new();
        session.set_bucket("do", doc(&[("status", 7.0.into())]));
        dispatcher.flush(&mut session, &["do"], &NoInbox).unwrap();
        session.set_bucket("do", doc(&[("other", 1.0.into())]));
        dispatcher.flush(&mut session, &["do"], &NoInbox).unwrap();

        let writes = writer.writes.lock();
        assert_eq!(writes[0], ("D500".to_string(), Value::Number(7.0)));
        assert_eq!(writes[1], ("D500".to_string(), Value::Number(1.0)));
    }

    #[test]
    fn test_write_back_failure_not_fatal() {
        let sink = Arc::new(RecordingSink::default());
        let writer = Arc::new(RecordingWriter {
            fail: true,
            ..Default::default()
        });
        let stats = Arc::new(EngineStats::new());
        let dispatcher = Dispatcher::new(sink, SinkMode::Patch, stats.clone())
            .with_writer(writer, WriteBackConfig::constant("D,500,1,1", 1.0));

        let mut session = Session::new();
        session.set_bucket("do", doc(&[("x", 1.0.into())]));
        let outcome = dispatcher.flush(&mut session, &["do"], &NoInbox).unwrap();
        assert!(matches!(outcome, FlushOutcome::Sent { .. }));
        assert_eq!(stats.snapshot().write_back_failures, 1);
    }

    #[test]
    fn test_upsert_write_back_zips_response() {
        let sink = Arc::new(RecordingSink {
            response: r#"[{"id":"a1","y_status":"OK","x_status":"NG","vacuum_status":true}]"#
                .to_string(),
            ..Default::default()
        });
        let writer = Arc::new(RecordingWriter::default());
        let config = WriteBackConfig {
            upsert_devices: Some("D,600,1,2,D,602,1,2,M,10,1,1".to_string()),
            ..Default::default()
        };
        let dispatcher = dispatcher(sink.clone(), SinkMode::Upsert).with_writer(writer.clone(), config);

        let mut session = Session::new();
        session.set_bucket("healthcheck", doc(&[("vacuum_start", 1.0.into())]));
        dispatcher
            .flush(&mut session, &["healthcheck"], &NoInbox)
            .unwrap();

        assert_eq!(sink.bodies.lock()[0].0, SinkMode::Upsert);
        let writes = writer.writes.lock();
        assert_eq!(
            *writes,
            vec![
                ("D600".to_string(), Value::Text("OK".into())),
                ("D602".to_string(), Value::Text("NG".into())),
                ("M10".to_string(), Value::Bool(true)),
            ]
        );
    }

    #[test]
    fn test_upsert_count_mismatch_writes_nothing() {
        let sink = Arc::new(RecordingSink {
            response: r#"{"y_status":"OK","x_status":"OK","vacuum_status":false}"#.to_string(),
            ..Default::default()
        });
        let writer = Arc::new(RecordingWriter::default());
        let config = WriteBackConfig {
            upsert_devices: Some("D,600,1,2".to_string()),
            ..Default::default()
        };
        let dispatcher = dispatcher(sink, SinkMode::Upsert).with_writer(writer.clone(), config);

        let mut session = Session::new();
        session.set_bucket("healthcheck", doc(&[("vacuum_start", 1.0.into())]));
        dispatcher
            .flush(&mut session, &["healthcheck"], &NoInbox)
            .unwrap();
        assert!(writer.writes.lock().is_empty());
    }

    #[test]
    fn test_response_row() {
        assert!(response_row("[]").is_none());
        assert!(response_row("").is_none());
        assert!(response_row(r#"{"a":1}"#).is_some());
        assert!(response_row(r#"[1, {"a":1}]"#).is_some());
    }
}
