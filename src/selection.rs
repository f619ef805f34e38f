//! Selection criteria: identity globs with optional time windows.
//!
//! A selection file has one criterion per line:
//!
//! ```text
//! # NET STA  LOC CHAN [QUAL [START [END]]]
//! IU   ANMO  *   BH?
//! IU   COLA  --  LHZ  D    2010,001  2010,002
//! GE   *     *   *    *    *         2011-03-11T06:00:00
//! ```
//!
//! `--` stands for an empty location code and `*` for an open time bound.
//! The identity fields of a line are joined into one `NET_STA_LOC_CHAN_QUAL`
//! glob matched against the record source name. Lines with identical
//! patterns are merged into one criterion whose windows are kept in file
//! order.

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use crate::error::{FilterError, FilterResult};
use crate::glob::Glob;
use crate::identity::Identity;
use crate::time::HpTime;
use crate::trim::TrimBoundary;

/// Time window with optional (open) sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeWindow {
    pub start: Option<HpTime>,
    pub end: Option<HpTime>,
}

impl TimeWindow {
    /// Window unbounded on both sides.
    pub const OPEN: TimeWindow = TimeWindow {
        start: None,
        end: None,
    };

    pub fn new(start: Option<HpTime>, end: Option<HpTime>) -> Self {
        Self { start, end }
    }

    /// Whether the window shares at least one instant with `[start, end]`.
    pub fn intersects(&self, start: HpTime, end: HpTime) -> bool {
        self.start.is_none_or(|s| s <= end) && self.end.is_none_or(|e| e >= start)
    }

    fn overlaps(&self, other: &TimeWindow) -> bool {
        let starts_before_other_ends = match (self.start, other.end) {
            (Some(s), Some(e)) => s <= e,
            _ => true,
        };
        let ends_after_other_starts = match (self.end, other.start) {
            (Some(e), Some(s)) => e >= s,
            _ => true,
        };
        starts_before_other_ends && ends_after_other_starts
    }

    fn covers(&self, start: HpTime, end: HpTime) -> bool {
        self.start.is_none_or(|s| s <= start) && self.end.is_none_or(|e| e >= end)
    }

    /// Smallest window containing both `self` and `other`.
    fn union(&self, other: &TimeWindow) -> TimeWindow {
        TimeWindow {
            start: self.start.zip(other.start).map(|(a, b)| a.min(b)),
            end: self.end.zip(other.end).map(|(a, b)| a.max(b)),
        }
    }
}

/// One selection criterion: a source-name glob and its time windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pattern: Glob,
    /// No windows means any time is selected.
    pub windows: Vec<TimeWindow>,
}

impl Selection {
    /// Criterion from identity field globs; a `None` quality accepts any.
    pub fn new(
        network: &str,
        station: &str,
        location: &str,
        channel: &str,
        quality: Option<&str>,
    ) -> FilterResult<Self> {
        let quality = quality.unwrap_or("*");
        Self::from_srcname(&format!(
            "{network}_{station}_{location}_{channel}_{quality}"
        ))
    }

    /// Criterion from a glob over the whole `NET_STA_LOC_CHAN_QUAL` source name.
    pub fn from_srcname(pattern: &str) -> FilterResult<Self> {
        Ok(Self {
            pattern: Glob::new(pattern)?,
            windows: Vec::new(),
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.windows.push(window);
        self
    }

    /// Whether the glob accepts the source name of `id`.
    pub fn matches_identity(&self, id: &Identity) -> bool {
        self.pattern.is_match(&id.srcname())
    }

    /// Windows intersecting `[start, end]`; a criterion without windows
    /// yields one open window.
    fn windows_for(&self, start: HpTime, end: HpTime) -> Vec<TimeWindow> {
        if self.windows.is_empty() {
            return vec![TimeWindow::OPEN];
        }
        self.windows
            .iter()
            .copied()
            .filter(|w| w.intersects(start, end))
            .collect()
    }
}

/// Ordered list of selection criteria.
#[derive(Debug, Clone, Default)]
pub struct Selections {
    entries: Vec<Selection>,
}

impl Selections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Selection> {
        self.entries.iter()
    }

    /// Add a criterion, merging its windows into an existing criterion with
    /// the same identity patterns.
    pub fn add(&mut self, selection: Selection) {
        match self
            .entries
            .iter_mut()
            .find(|s| s.pattern == selection.pattern)
        {
            Some(existing) => existing.windows.extend(selection.windows),
            None => self.entries.push(selection),
        }
    }

    /// Add a glob over the whole `NET_STA_LOC_CHAN_QUAL` source name with no
    /// time window.
    pub fn add_srcname(&mut self, pattern: &str) -> FilterResult<()> {
        self.add(Selection::from_srcname(pattern)?);
        Ok(())
    }

    /// Load criteria from a selection file, `-` reads standard input.
    pub fn read_file(&mut self, path: &Path) -> FilterResult<()> {
        let origin = path.display().to_string();
        let text = if path == Path::new("-") {
            let mut text = String::new();
            io::stdin()
                .lock()
                .read_to_string(&mut text)
                .map_err(|e| FilterError::parse(&origin, e.to_string()))?;
            text
        } else {
            fs::read_to_string(path).map_err(|e| FilterError::parse(&origin, e.to_string()))?
        };
        self.parse_str(&text, &origin)
    }

    /// Parse selection lines; `origin` names the source in error messages.
    pub fn parse_str(&mut self, text: &str, origin: &str) -> FilterResult<()> {
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or_default();
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            let lineno = idx + 1;
            let fail = |message: String| FilterError::parse(format!("{origin}:{lineno}"), message);

            if fields.len() < 4 {
                return Err(fail(format!(
                    "expected at least 4 fields (NET STA LOC CHAN), found {}",
                    fields.len()
                )));
            }
            if fields.len() > 7 {
                return Err(fail(format!(
                    "expected at most 7 fields, found {}",
                    fields.len()
                )));
            }

            let location = if fields[2] == "--" { "" } else { fields[2] };
            let quality = fields.get(4).copied().filter(|q| *q != "*");
            let bound = |idx: usize| -> FilterResult<Option<HpTime>> {
                match fields.get(idx) {
                    None | Some(&"*") => Ok(None),
                    Some(text) => HpTime::parse(text)
                        .map(Some)
                        .map_err(|e| fail(e.to_string())),
                }
            };
            let start = bound(5)?;
            let end = bound(6)?;
            if let (Some(s), Some(e)) = (start, end) {
                if s > e {
                    return Err(fail(format!("start time {s} is after end time {e}")));
                }
            }

            let mut selection = Selection::new(fields[0], fields[1], location, fields[3], quality)
                .map_err(|e| fail(e.to_string()))?;
            if start.is_some() || end.is_some() {
                selection = selection.with_window(TimeWindow::new(start, end));
            }
            self.add(selection);
        }
        Ok(())
    }

    /// Criteria accepting the record identity and time span, or `None` when
    /// nothing selects the record.
    pub fn matching(&self, id: &Identity, start: HpTime, end: HpTime) -> Option<MatchResult> {
        let srcname = id.srcname();
        let windows: Vec<TimeWindow> = self
            .entries
            .iter()
            .filter(|s| s.pattern.is_match(&srcname))
            .flat_map(|s| s.windows_for(start, end))
            .collect();
        if windows.is_empty() {
            None
        } else {
            Some(MatchResult { windows })
        }
    }
}

/// The windows of every matching criterion that intersect a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub windows: Vec<TimeWindow>,
}

/// Outcome of combining the matched windows of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowLimits {
    /// Joint selection limits; open sides are `None`.
    Limits(TrimBoundary),
    /// Two matched windows do not overlap, so no single range covers them.
    Conflict,
}

impl MatchResult {
    /// Whether some matched window covers the whole record.
    pub fn covers(&self, start: HpTime, end: HpTime) -> bool {
        self.windows.iter().any(|w| w.covers(start, end))
    }

    /// Combine the matched windows for a record spanning `[start, end]`.
    ///
    /// Windows are folded in order into a running interval that each new
    /// window must overlap. Folding stops once the interval covers the
    /// record.
    pub fn combine_windows(&self, start: HpTime, end: HpTime) -> WindowLimits {
        let mut combined: Option<TimeWindow> = None;
        for window in self.windows.iter().filter(|w| w.intersects(start, end)) {
            let next = match combined {
                Some(current) if !current.overlaps(window) => return WindowLimits::Conflict,
                Some(current) => current.union(window),
                None => *window,
            };
            combined = Some(next);
            if next.covers(start, end) {
                break;
            }
        }
        let combined = combined.unwrap_or(TimeWindow::OPEN);
        WindowLimits::Limits(TrimBoundary::new(combined.start, combined.end))
    }
}
