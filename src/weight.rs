//! Weight-trigger sub-state-machine
//!
//! One worker per channel runs per batch. Workers lock the session on
//! their own and all of them are joined before the owning case goes on,
//! so the flush condition is always evaluated on a settled state.
//!
//! A channel whose trigger is high is marked active and sticky. Its
//! bucket is replaced only when the scale reading beats the channel's
//! high-water mark, so the bucket keeps the peak snapshot of the window.
//! A low trigger clears `active` and leaves `sticky` alone.

use crate::cases::{capture, trigger_level, WEIGHT_BUCKETS};
use crate::config::{CaseSettings, CHANNELS};
use crate::message::{Message, Value};
use crate::metrics::EngineStats;
use crate::session::SessionHandle;
use crate::store::PayloadStore;
use std::thread;

/// Inputs shared by the workers of one evaluation
#[derive(Clone, Copy)]
pub struct WeightInputs<'a> {
    pub store: &'a PayloadStore,
    pub batch: &'a [Message],
    pub settings: &'a CaseSettings,
    pub stats: &'a EngineStats,
}

/// Run the three channel workers and wait for all of them
pub fn evaluate(session: &SessionHandle, inputs: WeightInputs<'_>) {
    thread::scope(|s| {
        for channel in 0..CHANNELS {
            s.spawn(move || observe_channel(channel, session, inputs));
        }
    });
}

fn observe_channel(channel: usize, session: &SessionHandle, inputs: WeightInputs<'_>) {
    let weight = &inputs.settings.weight;
    let Some(device) = weight.triggers[channel].as_deref() else {
        log::debug!("No weight trigger configured for channel {}", channel + 1);
        return;
    };

    match trigger_level(inputs.store, inputs.stats, device) {
        Some(true) => {
            let mut session = session.lock();
            let extraction = capture(
                inputs.store,
                inputs.batch,
                &inputs.settings.identifiers,
                &weight.tables[channel],
            );
            let reading = extraction
                .get(&weight.readings[channel])
                .and_then(Value::as_f64);

            let state = &mut session.weights[channel];
            state.active = true;
            state.sticky = true;

            match reading {
                Some(reading) => {
                    if state.raise(reading) {
                        log::debug!("Channel {} high-water mark {}", channel + 1, reading);
                        session.set_bucket(WEIGHT_BUCKETS[channel], extraction);
                    }
                }
                None => session
                    .bucket_mut(WEIGHT_BUCKETS[channel])
                    .extend(extraction),
            }
        }
        Some(false) => {
            session.lock().weights[channel].active = false;
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn settings() -> CaseSettings {
        CaseSettings::from_vars([
            ("WEIGHT_TRIGGER_CH1", "d1"),
            ("WEIGHT_TRIGGER_CH2", "d2"),
            ("WEIGHT_TRIGGER_CH3", "d3"),
            ("WEIGHT_MAP_CH1_ch1_weighing", "d11"),
            ("WEIGHT_MAP_CH2_ch2_weighing", "d12"),
            ("WEIGHT_MAP_CH3_ch3_weighing", "d13"),
            ("WEIGHT_MAP_CH1_ch1_lot", "d21"),
        ])
    }

    fn run(session: &SessionHandle, settings: &CaseSettings, batch: &[Message]) {
        let store = PayloadStore::new();
        let stats = EngineStats::new();
        store.apply(batch);
        evaluate(
            session,
            WeightInputs {
                store: &store,
                batch,
                settings,
                stats: &stats,
            },
        );
    }

    #[test]
    fn test_high_sets_active_and_sticky() {
        let settings = settings();
        let session: SessionHandle = Arc::new(Mutex::new(Session::new()));
        run(
            &session,
            &settings,
            &[Message::new("d1", 1.0), Message::new("d11", 4.0)],
        );

        let s = session.lock();
        assert!(s.weights[0].active);
        assert!(s.weights[0].sticky);
        assert_eq!(s.weights[0].high_water, 4.0);
        assert!(!s.weights[1].sticky);
        assert_eq!(
            s.bucket("weightch1_").and_then(|b| b.get("ch1_weighing")),
            Some(&Value::Number(4.0))
        );
    }

    #[test]
    fn test_lower_reading_keeps_peak() {
        let settings = settings();
        let session: SessionHandle = Arc::new(Mutex::new(Session::new()));
        run(&session, &settings, &[Message::new("d1", 1.0), Message::new("d11", 9.0)]);
        run(&session, &settings, &[Message::new("d1", "1"), Message::new("d11", 6.0)]);

        let s = session.lock();
        assert_eq!(s.weights[0].high_water, 9.0);
        assert_eq!(
            s.bucket("weightch1_").and_then(|b| b.get("ch1_weighing")),
            Some(&Value::Number(9.0))
        );
    }

    #[test]
    fn test_low_keeps_sticky() {
        let settings = settings();
        let session: SessionHandle = Arc::new(Mutex::new(Session::new()));
        run(&session, &settings, &[Message::new("d1", 1.0), Message::new("d11", 2.0)]);
        run(&session, &settings, &[Message::new("d1", 0.0)]);

        let s = session.lock();
        assert!(!s.weights[0].active);
        assert!(s.weights[0].sticky);
        assert_eq!(s.weights[0].high_water, 2.0);
    }

    #[test]
    fn test_missing_reading_merges() {
        let settings = settings();
        let session: SessionHandle = Arc::new(Mutex::new(Session::new()));
        run(&session, &settings, &[Message::new("d1", 1.0), Message::new("d21", "L7")]);

        let s = session.lock();
        assert!(s.weights[0].sticky);
        assert_eq!(s.weights[0].high_water, 0.0);
        assert_eq!(
            s.bucket("weightch1_").and_then(|b| b.get("ch1_lot")),
            Some(&Value::Text("L7".into()))
        );
    }

    #[test]
    fn test_unsupported_value_ignored() {
        let settings = settings();
        let session: SessionHandle = Arc::new(Mutex::new(Session::new()));
        run(&session, &settings, &[Message::new("d1", true), Message::new("d2", 3.0)]);

        let s = session.lock();
        assert!(s.weights.iter().all(|w| !w.active && !w.sticky));
    }
}
