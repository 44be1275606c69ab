//! Change-gated cases that send the whole store directly
//!
//! `time_duration`, `standard` and `trigger` only act when the trigger
//! device's value differs from the one seen on the previous batch. They
//! block for the accumulation window, then derive identifiers, rename and
//! send the store contents without touching session buckets.

use super::CaseContext;
use crate::error::Result;
use crate::message::{Document, Truthy, Value};
use crate::transform::{derive_identifiers, rename};
use std::collections::HashMap;
use std::time::Instant;

/// Previous trigger values and start timestamps, per device key
#[derive(Debug, Default)]
pub struct EdgeTracker {
    previous: HashMap<String, Value>,
    started: HashMap<String, Instant>,
}

impl EdgeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` for `key`; true when it differs from the last one.
    /// `1` and `"1"` (and `0` and `"0"`) count as the same value.
    pub fn observe(&mut self, key: &str, value: &Value) -> bool {
        if let Some(previous) = self.previous.get(key) {
            let level = value.truthy();
            if previous == value || (level != Truthy::Unsupported && previous.truthy() == level) {
                return false;
            }
        }
        self.previous.insert(key.to_string(), value.clone());
        true
    }

    /// Mark the start of an active period
    pub fn start(&mut self, key: &str, at: Instant) {
        self.started.insert(key.to_string(), at);
    }

    /// Remove and return the start of the active period
    pub fn take_start(&mut self, key: &str) -> Option<Instant> {
        self.started.remove(key)
    }

    #[cfg(test)]
    fn is_started(&self, key: &str) -> bool {
        self.started.contains_key(key)
    }
}

/// Observe the trigger device. Returns its level when it changed.
fn edge(ctx: &CaseContext<'_>) -> Option<bool> {
    let key = &ctx.trigger.device_key;
    let value = ctx.store.get(key)?;
    if !ctx.edges.lock().observe(key, &value) {
        return None;
    }
    ctx.level(key)
}

/// Rename and snapshot the store
fn renamed_snapshot(ctx: &CaseContext<'_>) -> Document {
    ctx.store.update(|doc| {
        rename(doc, &ctx.settings.rename);
        doc.clone()
    })
}

fn derive(ctx: &CaseContext<'_>) {
    ctx.store
        .update(|doc| derive_identifiers(doc, &ctx.settings.identifiers));
}

/// Measure how long the trigger stayed high and send it with the store.
pub fn time_duration(ctx: &CaseContext<'_>) -> Result<()> {
    let key = &ctx.trigger.device_key;
    match edge(ctx) {
        Some(true) => {
            ctx.edges.lock().start(key, Instant::now());
            log::debug!("{} went high", key);
        }
        Some(false) => {
            let Some(started) = ctx.edges.lock().take_start(key) else {
                return Ok(());
            };
            let elapsed = started.elapsed();

            ctx.accumulate(ctx.config.loop_window());
            derive(ctx);
            let mut doc = renamed_snapshot(ctx);
            doc.insert(
                format!("{}_duration", key),
                Value::Number(elapsed.as_secs_f64()),
            );
            ctx.dispatcher.send(&doc)?;
        }
        None => {}
    }
    Ok(())
}

/// Send the store once the trigger falls back to low.
///
/// The trigger is checked again after the accumulation window and the
/// send is skipped if it no longer reads low.
pub fn standard(ctx: &CaseContext<'_>) -> Result<()> {
    let key = &ctx.trigger.device_key;
    match edge(ctx) {
        Some(true) => ctx.edges.lock().start(key, Instant::now()),
        Some(false) => {
            if ctx.edges.lock().take_start(key).is_none() {
                return Ok(());
            }

            ctx.accumulate(ctx.config.loop_window());
            derive(ctx);
            if ctx.level(key) != Some(false) {
                log::debug!("{} no longer low after accumulation, skipping", key);
                return Ok(());
            }
            let doc = renamed_snapshot(ctx);
            ctx.dispatcher.send(&doc)?;
        }
        None => {}
    }
    Ok(())
}

/// Send the store after the trigger rises, if the filter device is nonzero.
pub fn trigger(ctx: &CaseContext<'_>) -> Result<()> {
    if edge(ctx) != Some(true) {
        return Ok(());
    }

    ctx.accumulate(ctx.config.loop_window());

    let filter = &ctx.config.filter_key;
    match ctx.store.get_f64(filter) {
        Some(v) if v != 0.0 => {
            derive(ctx);
            let doc = renamed_snapshot(ctx);
            ctx.dispatcher.send(&doc)?;
        }
        _ => log::debug!("Filter {} not set, nothing sent", filter),
    }
    Ok(())
}
