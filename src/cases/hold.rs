//! Bucket-staging cases
//!
//! `hold` stages per-channel snapshots and flushes them when sealing
//! finishes. `holdfilling` tracks fill states until every channel reports
//! zero. `weight` and `holdfillingweight` add the weight workers and only
//! flush once every channel has been active and gone quiet again.

use super::{
    CaseContext, COUNTER_BUCKET, DO_BUCKET, FILL_BUCKETS, HOLD_BUCKETS, VACUUM_BUCKET,
    WEIGHT_BUCKETS,
};
use crate::config::CHANNELS;
use crate::error::Result;
use crate::message::Value;
use crate::session::Session;
use crate::weight::{self, WeightInputs};

/// True when the accumulation-rate device reads zero
fn rate_is_zero(ctx: &CaseContext<'_>) -> bool {
    ctx.settings
        .hold
        .rate_gate
        .as_deref()
        .and_then(|device| ctx.store.get_f64(device))
        == Some(0.0)
}

/// Snapshot each channel whose hold trigger is high into its bucket
fn stage_channels(ctx: &CaseContext<'_>, session: &mut Session) {
    let hold = &ctx.settings.hold;
    for channel in 0..CHANNELS {
        match hold.triggers[channel].as_deref() {
            Some(device) => {
                if ctx.level(device) == Some(true) {
                    let snapshot = ctx.capture(&hold.channel_tables[channel]);
                    session.set_bucket(HOLD_BUCKETS[channel], snapshot);
                }
            }
            None => log::debug!("No hold trigger configured for channel {}", channel + 1),
        }
    }
}

/// Refresh the vacuum bucket while the vacuum-reached device reports
fn stage_vacuum(ctx: &CaseContext<'_>, session: &mut Session) {
    let hold = &ctx.settings.hold;
    let reached = hold
        .vacuum_reached
        .as_deref()
        .and_then(|device| ctx.store.get(device))
        .is_some_and(|value| !value.is_null());
    if reached {
        let snapshot = ctx.capture(&hold.vacuum_table);
        session.set_bucket(VACUUM_BUCKET, snapshot);
    }
}

/// Stage channel snapshots and flush them when sealing goes high to low.
pub fn hold(ctx: &CaseContext<'_>) -> Result<()> {
    if rate_is_zero(ctx) {
        log::debug!("Accumulation rate is zero, hold skipped");
        return Ok(());
    }

    let mut session = ctx.session.lock();
    stage_channels(ctx, &mut session);
    stage_vacuum(ctx, &mut session);

    match ctx.configured_level(ctx.settings.hold.sealing.as_deref()) {
        Some(true) => session.prev_sealing = true,
        Some(false) if session.prev_sealing => {
            let mut buckets = HOLD_BUCKETS.to_vec();
            buckets.push(VACUUM_BUCKET);
            ctx.dispatcher.flush(&mut session, &buckets, ctx.inbox)?;
            session.prev_sealing = false;
        }
        _ => {}
    }
    Ok(())
}

/// Fill bookkeeping shared by the holdfilling family.
///
/// Returns true when every channel reports zero while a fill is open.
fn track_fill(ctx: &CaseContext<'_>, session: &mut Session) -> bool {
    let filling = &ctx.settings.filling;
    let Some(raw) = filling.state.as_deref() else {
        log::debug!("No fill state configured");
        return false;
    };
    let state: f64 = match raw.parse() {
        Ok(state) => state,
        Err(e) => {
            log::warn!("Invalid fill state {:?}: {}", raw, e);
            return false;
        }
    };

    let readings: Vec<Option<f64>> = filling
        .triggers
        .iter()
        .map(|device| device.as_deref().and_then(|d| ctx.store.get_f64(d)))
        .collect();

    for (channel, reading) in readings.iter().enumerate() {
        if *reading == Some(state) {
            session
                .bucket_mut(FILL_BUCKETS[channel])
                .insert(format!("ch{}_fill", channel + 1), Value::Number(1.0));
            session.is_processing = true;
        }
    }

    session.all_zero = readings.iter().all(|r| *r == Some(0.0));
    session.all_zero && session.is_processing
}

/// Track fills and flush once every channel reports zero.
pub fn holdfilling(ctx: &CaseContext<'_>) -> Result<()> {
    let mut session = ctx.session.lock();
    if !track_fill(ctx, &mut session) {
        return Ok(());
    }

    let snapshot = ctx.capture(&ctx.settings.filling.do_table);
    session.set_bucket(DO_BUCKET, snapshot);

    let mut buckets = FILL_BUCKETS.to_vec();
    buckets.push(DO_BUCKET);
    ctx.dispatcher.flush(&mut session, &buckets, ctx.inbox)?;
    Ok(())
}

/// As [`holdfilling`], also waiting for the weight workers to settle.
pub fn holdfillingweight(ctx: &CaseContext<'_>) -> Result<()> {
    {
        let mut session = ctx.session.lock();
        if !track_fill(ctx, &mut session) {
            return Ok(());
        }
        let snapshot = ctx.capture(&ctx.settings.filling.do_table);
        session.set_bucket(DO_BUCKET, snapshot);
    }

    run_weight_workers(ctx);

    let mut session = ctx.session.lock();
    if session.weights_settled() {
        let mut buckets = FILL_BUCKETS.to_vec();
        buckets.push(DO_BUCKET);
        buckets.extend(WEIGHT_BUCKETS);
        ctx.dispatcher.flush(&mut session, &buckets, ctx.inbox)?;
    }
    Ok(())
}

/// Stage hold, counter and vacuum buckets, run the weight workers and
/// flush once all channels went quiet and the rate gate allows it.
///
/// The gate holds when the accumulation-rate device reads zero, or when
/// no such device is configured.
pub fn weight(ctx: &CaseContext<'_>) -> Result<()> {
    let gate = ctx.settings.hold.rate_gate.is_none() || rate_is_zero(ctx);

    {
        let mut session = ctx.session.lock();
        let hold = &ctx.settings.hold;
        if ctx.configured_level(hold.triggers[0].as_deref()) == Some(true) {
            let snapshot = ctx.capture(&hold.counter_table);
            session.set_bucket(COUNTER_BUCKET, snapshot);
        }
        stage_channels(ctx, &mut session);
        stage_vacuum(ctx, &mut session);
    }

    run_weight_workers(ctx);

    let mut session = ctx.session.lock();
    if session.weights_settled() {
        if !gate {
            log::debug!("Weights settled, waiting for accumulation rate to reach zero");
            return Ok(());
        }
        let mut buckets = HOLD_BUCKETS.to_vec();
        buckets.push(VACUUM_BUCKET);
        buckets.extend(WEIGHT_BUCKETS);
        buckets.push(COUNTER_BUCKET);
        ctx.dispatcher.flush(&mut session, &buckets, ctx.inbox)?;
    }
    Ok(())
}

fn run_weight_workers(ctx: &CaseContext<'_>) {
    weight::evaluate(
        ctx.session,
        WeightInputs {
            store: ctx.store,
            batch: ctx.batch,
            settings: ctx.settings,
            stats: ctx.stats,
        },
    );
}
