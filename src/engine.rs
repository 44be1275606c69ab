//! Case engine
//!
//! Consumes batches from the ingress channel, applies them to the payload
//! store and runs every configured case in trigger order. The store is
//! cleared after each batch. Sink failures stop the engine.

use crate::cases::{self, CaseContext, EdgeTracker};
use crate::config::{CaseSettings, EngineConfig};
use crate::dispatch::{DeviceWriter, Dispatcher, Sink};
use crate::error::Result;
use crate::ingress::{BatchReceiver, Drain};
use crate::message::{parse_batch, Message};
use crate::metrics::EngineStats;
use crate::session::{SessionHandle, SessionStore};
use crate::store::PayloadStore;
use crate::trigger::{parse_triggers, TriggerKey};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

/// How long `run` waits for a batch before re-checking the stop flag
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Batch-driven case engine
pub struct Engine {
    config: EngineConfig,
    settings: CaseSettings,
    triggers: Vec<TriggerKey>,
    store: PayloadStore,
    sessions: SessionStore,
    edges: Mutex<EdgeTracker>,
    dispatcher: Dispatcher,
    stats: Arc<EngineStats>,
}

impl Engine {
    /// Create an engine delivering to `sink`
    pub fn new(config: EngineConfig, settings: CaseSettings, sink: Arc<dyn Sink>) -> Self {
        let triggers = parse_triggers(&config.trigger);
        for trigger in &triggers {
            if !trigger.case_kind.is_known() {
                log::warn!(
                    "Unknown case {:?} for {}, it will be ignored",
                    trigger.case_kind.as_str(),
                    trigger.device_key
                );
            }
        }
        log::info!("Engine configured with {} triggers", triggers.len());

        let stats = Arc::new(EngineStats::new());
        let dispatcher = Dispatcher::new(sink, config.mode, Arc::clone(&stats));

        Self {
            config,
            settings,
            triggers,
            store: PayloadStore::new(),
            sessions: SessionStore::new(),
            edges: Mutex::new(EdgeTracker::new()),
            dispatcher,
            stats,
        }
    }

    /// Enable device write-back after successful flushes
    pub fn with_writer(mut self, writer: Arc<dyn DeviceWriter>) -> Self {
        self.dispatcher = self
            .dispatcher
            .with_writer(writer, self.config.write_back.clone());
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn triggers(&self) -> &[TriggerKey] {
        &self.triggers
    }

    pub fn store(&self) -> &PayloadStore {
        &self.store
    }

    /// This pipeline's session
    pub fn session(&self) -> SessionHandle {
        self.sessions.get_or_create(&self.config.session_key())
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    /// Process one raw JSON-array batch.
    ///
    /// Empty and malformed batches are logged and skipped.
    pub fn process_batch(&self, raw: &str, inbox: &dyn Drain) -> Result<()> {
        if raw.trim().is_empty() {
            log::warn!("Skipping empty batch");
            self.stats.record_malformed();
            return Ok(());
        }
        match parse_batch(raw) {
            Ok(batch) => self.process_messages(&batch, inbox),
            Err(e) => {
                log::warn!("Skipping malformed batch: {}", e);
                self.stats.record_malformed();
                Ok(())
            }
        }
    }

    /// Apply a parsed batch and run every case against it
    pub fn process_messages(&self, batch: &[Message], inbox: &dyn Drain) -> Result<()> {
        self.stats.record_batch();
        self.store.apply(batch);

        let session = self.session();
        let result = self.triggers.iter().try_for_each(|trigger| {
            let ctx = CaseContext {
                trigger,
                batch,
                store: &self.store,
                session: &session,
                settings: &self.settings,
                config: &self.config,
                dispatcher: &self.dispatcher,
                inbox,
                stats: &self.stats,
                edges: &self.edges,
            };
            cases::run(&ctx)
        });

        self.store.clear();
        result
    }

    /// Consume batches until `stop` is set or the channel closes.
    ///
    /// Batches queued when `stop` is observed are still processed. The
    /// first batch error ends the loop and is returned.
    pub fn run(&self, batches: &BatchReceiver, stop: &AtomicBool) -> Result<()> {
        log::info!("Engine started (session {})", self.config.session_key());
        loop {
            match batches.recv_timeout(RECV_TIMEOUT) {
                Ok(raw) => {
                    if let Err(e) = self.process_batch(&raw, batches) {
                        log::error!("Engine stopped: {}", e);
                        return Err(e);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::info!("Engine stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SinkMode;
    use crate::dispatch::SinkResponse;
    use crate::error::SinkError;

    struct NullSink;

    impl Sink for NullSink {
        fn send(&self, _mode: SinkMode, _body: &str) -> std::result::Result<SinkResponse, SinkError> {
            Ok(SinkResponse {
                status: 204,
                body: String::new(),
            })
        }
    }

    struct NoInbox;

    impl Drain for NoInbox {
        fn drain(&self) -> usize {
            0
        }
    }

    fn engine(trigger: &str) -> Engine {
        Engine::new(
            EngineConfig::with_trigger(trigger),
            CaseSettings::default(),
            Arc::new(NullSink),
        )
    }

    #[test]
    fn test_engine_parses_triggers() {
        let engine = engine("d1,hold,d2,holdmcs");
        assert_eq!(engine.triggers().len(), 2);
        assert!(!engine.triggers()[1].case_kind.is_known());
    }

    #[test]
    fn test_store_cleared_after_batch() {
        let engine = engine("");
        engine
            .process_batch(r#"[{"address":"D1","value":3}]"#, &NoInbox)
            .unwrap();
        assert!(engine.store().is_empty());
        assert_eq!(engine.stats().snapshot().batches_processed, 1);
    }

    #[test]
    fn test_malformed_batch_skipped() {
        let engine = engine("");
        assert!(engine.process_batch("not json", &NoInbox).is_ok());
        assert!(engine.process_batch("   ", &NoInbox).is_ok());
        assert_eq!(engine.stats().snapshot().batches_malformed, 2);
        assert_eq!(engine.stats().snapshot().batches_processed, 0);
    }

    #[test]
    fn test_session_namespaced_by_method() {
        let engine = engine("d1,hold");
        engine.session().lock().is_processing = true;
        assert!(engine.session().lock().is_processing);
        assert_eq!(engine.config().session_key(), "PATCH_d1,hold");
    }
}
