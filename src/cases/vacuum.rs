//! Vacuum check case

use super::{CaseContext, HEALTHCHECK_BUCKET};
use crate::error::Result;

const LEAVE_FIELDS: [&str; 3] = ["vacuum_leave_1min", "vacuum_leave_2min", "vacuum_leave_3min"];

/// Collect the vacuum check readings while the upload trigger is high and
/// flush the `healthcheck` bucket while a check is open.
///
/// Without a configured upload trigger the case's own device is used.
pub fn vacuum(ctx: &CaseContext<'_>) -> Result<()> {
    let settings = &ctx.settings.vacuum;
    let upload = settings
        .upload_trigger
        .as_deref()
        .unwrap_or(ctx.trigger.device_key.as_str());

    let mut session = ctx.session.lock();
    if ctx.level(upload) == Some(true) {
        let readings: Vec<_> = LEAVE_FIELDS
            .iter()
            .zip(&settings.leave)
            .map(|(field, device)| (*field, device.as_deref()))
            .chain([("vacuum_start", settings.start.as_deref())])
            .filter_map(|(field, device)| Some((field, ctx.store.get(device?)?)))
            .collect();

        let bucket = session.bucket_mut(HEALTHCHECK_BUCKET);
        for (field, value) in readings {
            bucket.insert(field.to_string(), value);
        }
        session.is_processing = true;
    }

    if session.is_processing {
        ctx.dispatcher
            .flush(&mut session, &[HEALTHCHECK_BUCKET], ctx.inbox)?;
    }
    Ok(())
}
