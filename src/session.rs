//! Session store
//!
//! A session holds the accumulation state of one pipeline across
//! ingestion cycles: named buckets staging partial documents, processing
//! flags, the sealing edge and the per-channel weight state. Sessions are
//! created lazily and live for the process lifetime.

use crate::config::CHANNELS;
use crate::message::Document;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Weight state of one channel
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelWeight {
    /// Trigger level seen on the latest batch
    pub active: bool,
    /// Set on activation, cleared only by a reset
    pub sticky: bool,
    /// Largest reading since the last reset
    pub high_water: f64,
}

impl ChannelWeight {
    /// Raise the mark when `reading` is strictly above it.
    /// Returns true when raised.
    pub fn raise(&mut self, reading: f64) -> bool {
        if reading > self.high_water {
            self.high_water = reading;
            true
        } else {
            false
        }
    }
}

/// Accumulation state of one pipeline
#[derive(Debug, Default)]
pub struct Session {
    buckets: BTreeMap<String, Document>,
    pub is_processing: bool,
    pub all_zero: bool,
    pub prev_sealing: bool,
    /// Samples collected by the special case
    pub series: Vec<f64>,
    pub weights: [ChannelWeight; CHANNELS],
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bucket contents, if the bucket exists
    pub fn bucket(&self, name: &str) -> Option<&Document> {
        self.buckets.get(name)
    }

    /// Bucket for writing, created empty when missing
    pub fn bucket_mut(&mut self, name: &str) -> &mut Document {
        self.buckets.entry(name.to_string()).or_default()
    }

    /// Replace a bucket wholesale
    pub fn set_bucket(&mut self, name: &str, doc: Document) {
        self.buckets.insert(name.to_string(), doc);
    }

    /// Names of existing buckets
    pub fn bucket_names(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }

    /// Whether every bucket is empty
    pub fn buckets_empty(&self) -> bool {
        self.buckets.values().all(Document::is_empty)
    }

    /// Empty all buckets at once
    pub fn clear_buckets(&mut self) {
        self.buckets.clear();
    }

    /// Reset the weight sub-state-machine and cycle flags.
    /// Activity levels are left as observed.
    pub fn reset_weights(&mut self) {
        self.all_zero = false;
        self.is_processing = false;
        for weight in &mut self.weights {
            weight.sticky = false;
            weight.high_water = 0.0;
        }
    }

    /// All channels inactive after each having been active
    pub fn weights_settled(&self) -> bool {
        self.weights.iter().all(|w| !w.active && w.sticky)
    }
}

/// Shared handle to a session
pub type SessionHandle = Arc<Mutex<Session>>;

/// Lazily populated session registry
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session for a key, created on first use
    pub fn get_or_create(&self, key: &str) -> SessionHandle {
        let mut sessions = self.sessions.lock();
        sessions
            .entry(key.to_string())
            .or_insert_with(|| {
                log::debug!("Created session {}", key);
                Arc::new(Mutex::new(Session::new()))
            })
            .clone()
    }

    /// Session for a key, if created
    pub fn get(&self, key: &str) -> Option<SessionHandle> {
        self.sessions.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
