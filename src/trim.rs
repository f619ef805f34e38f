//! Sample-level trimming of single records.
//!
//! Trimming removes whole samples from the front and/or back of a record so
//! that its coverage fits new bounds, then repacks it with the original
//! header. Samples are never interpolated.

use std::fmt;

use tracing::{debug, trace};

use crate::decode;
use crate::encode;
use crate::error::{FilterError, FilterResult};
use crate::record::{MseedRecord, TIME_CORRECTION_APPLIED};
use crate::time::HpTime;

/// New bounds for a record; `None` leaves that side alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrimBoundary {
    pub new_start: Option<HpTime>,
    pub new_end: Option<HpTime>,
}

impl TrimBoundary {
    pub fn new(new_start: Option<HpTime>, new_end: Option<HpTime>) -> Self {
        Self { new_start, new_end }
    }

    /// Whether neither side is bounded.
    pub fn is_unbounded(&self) -> bool {
        self.new_start.is_none() && self.new_end.is_none()
    }
}

impl fmt::Display for TrimBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = |t: Option<HpTime>| t.map_or_else(|| "NONE".to_string(), HpTime::seed_string);
        write!(f, "{} to {}", side(self.new_start), side(self.new_end))
    }
}

/// Result of [`trim_record`].
#[derive(Debug, Clone, PartialEq)]
pub enum TrimOutcome {
    /// The record was repacked; `record` describes the new coverage.
    Trimmed { record: MseedRecord, bytes: Vec<u8> },
    /// The encoding cannot be repacked; write the original bytes.
    PassThrough,
    /// Every sample falls outside the bounds; drop the record.
    Skip,
}

/// Trim `record` (decoded header of `raw`) to `boundary`.
///
/// The bounds must lie within the record's coverage, from its start time
/// to the time of its last sample. Decode failures come back as
/// [`FilterError::Unpack`], repack failures as [`FilterError::Encode`].
pub fn trim_record(
    record: &MseedRecord,
    raw: &[u8],
    boundary: TrimBoundary,
) -> FilterResult<TrimOutcome> {
    let start = record.start_time;
    let end = record.end_time();
    let TrimBoundary { new_start, new_end } = boundary;

    let reversed = matches!((new_start, new_end), (Some(s), Some(e)) if s > e);
    let start_outside = new_start.is_some_and(|s| s < start || s > end);
    let end_outside = new_end.is_some_and(|e| e > end || e < start);
    if reversed || start_outside || end_outside {
        let show = |t: Option<HpTime>| t.map_or_else(|| "NONE".into(), HpTime::seed_string);
        return Err(FilterError::TrimBounds {
            srcname: record.srcname(),
            start: start.seed_string(),
            end: end.seed_string(),
            new_start: show(new_start),
            new_end: show(new_end),
        });
    }

    if !record.encoding.is_repackable() {
        debug!(
            "Skipping trim of {} ({}), {} encoded data",
            record.identity().srcname_without_quality(),
            start,
            record.encoding
        );
        return Ok(TrimOutcome::PassThrough);
    }

    let mut trimmed = decode::decode(raw).map_err(|source| FilterError::Unpack {
        srcname: record.srcname(),
        source,
    })?;

    debug!(
        "Trimming record: {} ({}), {} to {}, bounds {}",
        record.identity().srcname_without_quality(),
        record.quality,
        start,
        end,
        boundary
    );

    // A zero sample rate leaves nothing to step over.
    if let Some(period) = trimmed.sample_period().filter(|&p| p > 0) {
        if let Some(bound) = new_start {
            let mut cursor = trimmed.start_time;
            let mut count = 0usize;
            while cursor < bound && count < trimmed.samples.len() {
                cursor = cursor.offset(period);
                count += 1;
            }
            if count >= trimmed.samples.len() {
                debug!("All samples would be trimmed from record, skipping");
                return Ok(TrimOutcome::Skip);
            }
            trace!("Removing {count} samples from the start, new start time: {cursor}");
            trimmed.samples.drop_front(count);
            trimmed.start_time = cursor;
        }

        if let Some(bound) = new_end {
            let mut cursor = end;
            let mut count = 0usize;
            while cursor > bound && count < trimmed.samples.len() {
                cursor = cursor.offset(-period);
                count += 1;
            }
            if count >= trimmed.samples.len() {
                debug!("All samples would be trimmed from record, skipping");
                return Ok(TrimOutcome::Skip);
            }
            trace!("Removing {count} samples from the end, new end time: {cursor}");
            trimmed.samples.drop_back(count);
        }
        trimmed.sample_count = trimmed.samples.len() as u32;
    }

    // The start time now carries any pending correction.
    if trimmed.time_correction_pending() {
        trimmed.activity_flags |= TIME_CORRECTION_APPLIED;
    }

    let bytes = encode::encode(&trimmed).map_err(|source| FilterError::Encode {
        srcname: trimmed.srcname(),
        start: record.start_time.seed_string(),
        source,
    })?;
    Ok(TrimOutcome::Trimmed {
        record: trimmed,
        bytes,
    })
}
