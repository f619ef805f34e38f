//! Record acceptance: global time bounds, source-name regexes and
//! selection criteria, and the trim bounds they imply.

use std::fmt;
use std::fs;
use std::path::Path;

use regex::Regex;

use crate::error::{FilterError, FilterResult};
use crate::identity::Identity;
use crate::selection::{Selections, WindowLimits};
use crate::time::HpTime;
use crate::trim::TrimBoundary;

/// Why a record was not written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    StartTime,
    EndTime,
    Match,
    Reject,
    Selection,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SkipReason::StartTime => "starttime",
            SkipReason::EndTime => "endtime",
            SkipReason::Match => "match",
            SkipReason::Reject => "reject",
            SkipReason::Selection => "selection",
        };
        f.write_str(name)
    }
}

/// What to do with one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Skip(SkipReason),
    /// Write the record as read.
    Write,
    /// Trim to the boundary, then write.
    Trim(TrimBoundary),
    /// Matched windows cannot be combined; write the record as read.
    Conflict,
}

/// Everything that decides whether a record is written and how it is cut.
#[derive(Debug, Clone, Default)]
pub struct Criteria {
    /// Keep records that start at or after, or contain, this time.
    pub start: Option<HpTime>,
    /// Keep records that end at or before, or contain, this time.
    pub end: Option<HpTime>,
    /// Source names must match this pattern.
    pub match_regex: Option<Regex>,
    /// Source names matching this pattern are dropped.
    pub reject_regex: Option<Regex>,
    /// `None` selects every identity.
    pub selections: Option<Selections>,
    /// Trim records at the sample level to the effective bounds.
    pub prune_samples: bool,
}

impl Criteria {
    /// Decide the fate of a record with identity `id` covering `[start, end]`.
    pub fn evaluate(&self, id: &Identity, start: HpTime, end: HpTime) -> Verdict {
        // Records that contain the bound are kept on both sides.
        if self.start.is_some_and(|ts| end < ts) {
            return Verdict::Skip(SkipReason::StartTime);
        }
        if self.end.is_some_and(|te| start > te) {
            return Verdict::Skip(SkipReason::EndTime);
        }

        let needs_srcname = self.match_regex.is_some() || self.reject_regex.is_some();
        let srcname = if needs_srcname { id.srcname() } else { String::new() };
        if self.match_regex.as_ref().is_some_and(|re| !re.is_match(&srcname)) {
            return Verdict::Skip(SkipReason::Match);
        }
        if self.reject_regex.as_ref().is_some_and(|re| re.is_match(&srcname)) {
            return Verdict::Skip(SkipReason::Reject);
        }

        let matched = match &self.selections {
            Some(selections) => match selections.matching(id, start, end) {
                Some(result) => Some(result),
                None => return Verdict::Skip(SkipReason::Selection),
            },
            None => None,
        };

        if !self.prune_samples {
            return Verdict::Write;
        }

        let limits = match matched {
            Some(result) if !result.covers(start, end) => match result.combine_windows(start, end) {
                WindowLimits::Limits(limits) => limits,
                WindowLimits::Conflict => return Verdict::Conflict,
            },
            _ => TrimBoundary::default(),
        };

        let boundary = effective_boundary(self.start, self.end, limits, start, end);
        if boundary.is_unbounded() {
            Verdict::Write
        } else {
            Verdict::Trim(boundary)
        }
    }
}

/// Tightest bounds from the global range and the selection limits, kept
/// only on sides where they fall strictly inside the record.
fn effective_boundary(
    global_start: Option<HpTime>,
    global_end: Option<HpTime>,
    limits: TrimBoundary,
    start: HpTime,
    end: HpTime,
) -> TrimBoundary {
    let start_limit = match (global_start, limits.new_start) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    let end_limit = match (global_end, limits.new_end) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    TrimBoundary {
        new_start: start_limit.filter(|&limit| start < limit && limit <= end),
        new_end: end_limit.filter(|&limit| start <= limit && limit < end),
    }
}

/// Compile a `--match`/`--reject` value; `@path` reads a regex list file.
pub fn compile_pattern(value: &str) -> FilterResult<Regex> {
    let (origin, pattern) = match value.strip_prefix('@') {
        Some(path) => (path.to_string(), read_regex_file(Path::new(path))?),
        None => ("regex".to_string(), value.to_string()),
    };
    Regex::new(&pattern)
        .map_err(|e| FilterError::parse(origin, format!("cannot compile '{pattern}': {e}")))
}

/// Read a regex list file and join its patterns as `(p1)|(p2)|...`.
///
/// Each non-blank line contributes its first whitespace-delimited token;
/// lines starting with `#` are comments.
pub fn read_regex_file(path: &Path) -> FilterResult<String> {
    let origin = path.display().to_string();
    let text = fs::read_to_string(path).map_err(|e| FilterError::parse(&origin, e.to_string()))?;
    let patterns: Vec<String> = text
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|token| !token.starts_with('#'))
        .map(|token| format!("({token})"))
        .collect();
    if patterns.is_empty() {
        return Err(FilterError::parse(origin, "no patterns found"));
    }
    Ok(patterns.join("|"))
}
