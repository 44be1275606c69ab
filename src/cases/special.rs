//! Sampled-series summary case

use super::{CaseContext, DEGAS_BUCKET};
use crate::error::Result;
use crate::message::Value;

/// Maximum and arithmetic mean of a series; `None` when it is empty
pub fn summarize(series: &[f64]) -> Option<(f64, f64)> {
    if series.is_empty() {
        return None;
    }
    let max = series.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = series.iter().sum::<f64>() / series.len() as f64;
    Some((max, mean))
}

/// Sample the series field while the trigger is high; on the falling edge
/// store its max and mean in the `degas` bucket and flush it.
pub fn special(ctx: &CaseContext<'_>) -> Result<()> {
    let special = &ctx.settings.special;
    match ctx.level(&ctx.trigger.device_key) {
        Some(true) => {
            ctx.session.lock().is_processing = true;
            ctx.accumulate(ctx.config.poll_interval);

            let extraction = ctx.capture(&special.table);
            match extraction.get(&special.series_field).and_then(Value::as_f64) {
                Some(sample) => ctx.session.lock().series.push(sample),
                None => log::debug!("No {} sample in this batch", special.series_field),
            }
        }
        Some(false) => {
            let mut session = ctx.session.lock();
            if !session.is_processing {
                return Ok(());
            }
            session.is_processing = false;

            let field = &special.series_field;
            match summarize(&session.series) {
                Some((max, mean)) => {
                    let degas = session.bucket_mut(DEGAS_BUCKET);
                    degas.insert(format!("{}_max", field), Value::Number(max));
                    degas.insert(format!("{}_average", field), Value::Number(mean));
                }
                None => log::info!("No values sampled for {}", field),
            }
            session.series.clear();

            ctx.dispatcher.flush(&mut session, &[DEGAS_BUCKET], ctx.inbox)?;
        }
        None => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_summarize() {
        let (max, mean) = summarize(&[10.0, 20.0, 15.0]).unwrap();
        assert_relative_eq!(max, 20.0);
        assert_relative_eq!(mean, 15.0);
    }

    #[test]
    fn test_summarize_single_sample() {
        let (max, mean) = summarize(&[7.5]).unwrap();
        assert_relative_eq!(max, 7.5);
        assert_relative_eq!(mean, 7.5);
    }

    #[test]
    fn test_summarize_empty() {
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn test_summarize_negative_values() {
        let (max, mean) = summarize(&[-3.0, -1.0]).unwrap();
        assert_relative_eq!(max, -1.0);
        assert_relative_eq!(mean, -2.0);
    }
}
