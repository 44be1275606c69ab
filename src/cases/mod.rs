//! Case handlers
//!
//! Every parsed trigger runs one handler per batch against the payload
//! store, the raw batch and the pipeline session:
//!
//! - [`timing`]: `time_duration`, `standard` and `trigger`, which send the
//!   whole store directly on a change of the trigger device
//! - [`hold`]: `hold`, `holdfilling`, `holdfillingweight` and `weight`,
//!   which stage buckets in the session and flush them together
//! - [`special`]: max/mean summary of a sampled series
//! - [`vacuum`]: vacuum check readings

pub mod hold;
pub mod special;
pub mod timing;
pub mod vacuum;

use crate::config::{CaseSettings, EngineConfig, KeyTable};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::ingress::Drain;
use crate::message::{Document, Message, Truthy};
use crate::metrics::EngineStats;
use crate::session::SessionHandle;
use crate::store::PayloadStore;
use crate::transform::{derive_identifiers, extract, IdentifierRule};
use crate::trigger::{CaseKind, TriggerKey};
use parking_lot::Mutex;
use std::thread;
use std::time::{Duration, Instant};

pub use timing::EdgeTracker;

/// Per-channel hold buckets
pub const HOLD_BUCKETS: [&str; 3] = ["ch1_", "ch2_", "ch3_"];
/// Per-channel fill buckets
pub const FILL_BUCKETS: [&str; 3] = ["ch1", "ch2", "ch3"];
/// Per-channel weight buckets
pub const WEIGHT_BUCKETS: [&str; 3] = ["weightch1_", "weightch2_", "weightch3_"];
pub const VACUUM_BUCKET: &str = "vacuum";
pub const COUNTER_BUCKET: &str = "counterch_";
pub const DEGAS_BUCKET: &str = "degas";
pub const DO_BUCKET: &str = "do";
pub const HEALTHCHECK_BUCKET: &str = "healthcheck";

/// Everything a handler may touch during one batch
pub struct CaseContext<'a> {
    pub trigger: &'a TriggerKey,
    pub batch: &'a [Message],
    pub store: &'a PayloadStore,
    pub session: &'a SessionHandle,
    pub settings: &'a CaseSettings,
    pub config: &'a EngineConfig,
    pub dispatcher: &'a Dispatcher,
    pub inbox: &'a dyn Drain,
    pub stats: &'a EngineStats,
    pub edges: &'a Mutex<EdgeTracker>,
}

impl CaseContext<'_> {
    /// Trigger level of a device; see [`trigger_level`]
    pub fn level(&self, device: &str) -> Option<bool> {
        trigger_level(self.store, self.stats, device)
    }

    /// Trigger level of an optional configured device
    pub fn configured_level(&self, device: Option<&str>) -> Option<bool> {
        device.and_then(|d| self.level(d))
    }

    /// Fresh extraction of a key table
    pub fn capture(&self, table: &KeyTable) -> Document {
        capture(self.store, self.batch, &self.settings.identifiers, table)
    }

    /// Keep re-applying the batch for `window`, at least once
    pub fn accumulate(&self, window: Duration) {
        accumulate(self.store, self.batch, window, self.config.poll_interval);
    }
}

/// Run the handler for the context's trigger
pub fn run(ctx: &CaseContext<'_>) -> Result<()> {
    match &ctx.trigger.case_kind {
        CaseKind::TimeDuration => timing::time_duration(ctx),
        CaseKind::Standard => timing::standard(ctx),
        CaseKind::Trigger => timing::trigger(ctx),
        CaseKind::Hold => hold::hold(ctx),
        CaseKind::HoldFilling => hold::holdfilling(ctx),
        CaseKind::HoldFillingWeight => hold::holdfillingweight(ctx),
        CaseKind::Weight => hold::weight(ctx),
        CaseKind::Special => special::special(ctx),
        CaseKind::Vacuum => vacuum::vacuum(ctx),
        CaseKind::Other(kind) => {
            log::debug!("No handler for case {:?} on {}", kind, ctx.trigger.device_key);
            Ok(())
        }
    }
}

/// Read a device as a trigger level.
///
/// `None` when the device is absent or its value does not coerce; the
/// latter is logged and counted.
pub fn trigger_level(store: &PayloadStore, stats: &EngineStats, device: &str) -> Option<bool> {
    let value = store.get(device)?;
    match value.truthy() {
        Truthy::High => Some(true),
        Truthy::Low => Some(false),
        Truthy::Unsupported => {
            log::warn!("Unsupported trigger value for {}: {}", device, value);
            stats.record_unsupported();
            None
        }
    }
}

/// Re-apply the batch, derive identifiers and project a key table
pub fn capture(
    store: &PayloadStore,
    batch: &[Message],
    rules: &[IdentifierRule],
    table: &KeyTable,
) -> Document {
    store.apply(batch);
    store.update(|doc| {
        derive_identifiers(doc, rules);
        extract(doc, table)
    })
}

/// Re-apply the batch every `poll` until `window` has elapsed
pub fn accumulate(store: &PayloadStore, batch: &[Message], window: Duration, poll: Duration) {
    let started = Instant::now();
    loop {
        store.apply(batch);
        thread::sleep(poll);
        if started.elapsed() >= window {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Value;

    #[test]
    fn test_trigger_level() {
        let store = PayloadStore::new();
        let stats = EngineStats::new();
        store.apply(&[
            Message::new("a", 1.0),
            Message::new("b", "0"),
            Message::new("c", "yes"),
        ]);
        assert_eq!(trigger_level(&store, &stats, "a"), Some(true));
        assert_eq!(trigger_level(&store, &stats, "b"), Some(false));
        assert_eq!(trigger_level(&store, &stats, "c"), None);
        assert_eq!(trigger_level(&store, &stats, "missing"), None);
        assert_eq!(stats.snapshot().unsupported_values, 1);
    }

    #[test]
    fn test_capture_restores_transformed_keys() {
        let store = PayloadStore::new();
        let batch = vec![
            Message::new("d171", "abc"),
            Message::new("d172", "12"),
            Message::new("d173", "xy"),
            Message::new("d5", 3.0),
        ];
        store.apply(&batch);
        store.update(|doc| doc.remove("d5"));

        let table = KeyTable::from([("lot", "ink_lot"), ("level", "d5")]);
        let out = capture(&store, &batch, &[IdentifierRule::ink_lot()], &table);
        assert_eq!(out.get("lot"), Some(&Value::Text("cba21yx".into())));
        assert_eq!(out.get("level"), Some(&Value::Number(3.0)));
    }

    #[test]
    fn test_accumulate_runs_at_least_once() {
        let store = PayloadStore::new();
        let batch = vec![Message::new("d1", 1.0)];
        accumulate(&store, &batch, Duration::ZERO, Duration::from_millis(1));
        assert_eq!(store.get_f64("d1"), Some(1.0));
    }
}
