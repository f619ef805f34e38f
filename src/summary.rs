//! Accounting of written data as contiguous trace segments.
//!
//! Every written record is folded into a [`TraceList`]. Records of the same
//! identity that follow on from each other (within half a sample period)
//! extend one [`TraceSegment`]; gaps and overlaps start new segments.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::error::{FilterError, FilterResult};
use crate::identity::Identity;
use crate::time::{HpTime, NANOS_PER_SEC};

/// Relative difference below which two sample rates are the same.
const RATE_TOLERANCE: f64 = 0.0001;

/// Contiguous coverage of one identity.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceSegment {
    pub start: HpTime,
    /// Time of the last sample.
    pub end: HpTime,
    pub sample_rate: f64,
    /// Bytes of packed records written for this segment.
    pub bytes: u64,
    pub samples: u64,
}

impl TraceSegment {
    fn period_nanos(&self) -> f64 {
        if self.sample_rate > 0.0 {
            NANOS_PER_SEC as f64 / self.sample_rate
        } else {
            0.0
        }
    }

    fn rate_matches(&self, rate: f64) -> bool {
        if self.sample_rate == rate {
            return true;
        }
        rate != 0.0 && (1.0 - self.sample_rate / rate).abs() < RATE_TOLERANCE
    }
}

/// Written trace segments grouped by identity.
#[derive(Debug, Clone, Default)]
pub struct TraceList {
    traces: BTreeMap<Identity, Vec<TraceSegment>>,
}

impl TraceList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    pub fn segments(&self, id: &Identity) -> &[TraceSegment] {
        self.traces.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Fold one written record into the list and return its segment.
    pub fn add_record(
        &mut self,
        id: &Identity,
        start: HpTime,
        end: HpTime,
        sample_rate: f64,
        bytes: u64,
        samples: u64,
    ) -> &mut TraceSegment {
        let segments = self.traces.entry(id.clone()).or_default();

        let mut joined = None;
        for (idx, seg) in segments.iter_mut().enumerate().rev() {
            if !seg.rate_matches(sample_rate) {
                continue;
            }
            let period = seg.period_nanos();
            let tolerance = period / 2.0;
            let after = (start.nanos() as f64 - (seg.end.nanos() as f64 + period)).abs();
            let before = (seg.start.nanos() as f64 - (end.nanos() as f64 + period)).abs();
            if after <= tolerance {
                seg.end = end;
            } else if before <= tolerance {
                seg.start = start;
            } else {
                continue;
            }
            seg.bytes += bytes;
            seg.samples += samples;
            joined = Some(idx);
            break;
        }

        let idx = match joined {
            Some(idx) => idx,
            None => {
                segments.push(TraceSegment {
                    start,
                    end,
                    sample_rate,
                    bytes,
                    samples,
                });
                segments.len() - 1
            }
        };
        &mut segments[idx]
    }

    /// Write one summary line per segment, by identity then start time.
    pub fn write_summary<W: Write>(&self, writer: &mut W, prefix: &str) -> io::Result<()> {
        for (id, segments) in &self.traces {
            let mut ordered: Vec<&TraceSegment> = segments.iter().collect();
            ordered.sort_by_key(|seg| (seg.start, seg.end));
            for seg in ordered {
                writeln!(
                    writer,
                    "{prefix}{}|{}|{}|{}|{}|{:<24}|{:<24}|{}|{}",
                    id.network,
                    id.station,
                    id.location,
                    id.channel,
                    id.quality,
                    seg.start.seed_string(),
                    seg.end.seed_string(),
                    seg.bytes,
                    seg.samples
                )?;
            }
        }
        Ok(())
    }
}

/// Destination of the summary listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryTarget {
    Stdout,
    Stderr,
    /// Appended to.
    File(PathBuf),
}

impl SummaryTarget {
    /// `-` is standard output, `--` standard error, anything else a file.
    pub fn from_arg(arg: &str) -> Self {
        match arg {
            "-" => SummaryTarget::Stdout,
            "--" => SummaryTarget::Stderr,
            path => SummaryTarget::File(PathBuf::from(path)),
        }
    }

    /// Print `list` to this target.
    pub fn write(&self, list: &TraceList, prefix: &str) -> FilterResult<()> {
        match self {
            SummaryTarget::Stdout => {
                let mut out = io::stdout().lock();
                list.write_summary(&mut out, prefix)
                    .and_then(|()| out.flush())
                    .map_err(|e| FilterError::resource("<stdout>", e))
            }
            SummaryTarget::Stderr => list
                .write_summary(&mut io::stderr().lock(), prefix)
                .map_err(|e| FilterError::resource("<stderr>", e)),
            SummaryTarget::File(path) => {
                let mut file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| FilterError::resource(path, e))?;
                list.write_summary(&mut file, prefix)
                    .map_err(|e| FilterError::resource(path, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anmo() -> Identity {
        Identity::new("IU", "ANMO", "00", "BHZ", 'D')
    }

    fn secs(s: f64) -> HpTime {
        HpTime::from_nanos((s * NANOS_PER_SEC as f64).round() as i64)
    }

    #[test]
    fn test_contiguous_records_join() {
        let mut list = TraceList::new();
        // 10 Hz, 10 samples each: 0.0-0.9 then 1.0-1.9
        list.add_record(&anmo(), secs(0.0), secs(0.9), 10.0, 512, 10);
        let seg = list.add_record(&anmo(), secs(1.0), secs(1.9), 10.0, 512, 10);
        assert_eq!(seg.bytes, 1024);
        assert_eq!(seg.samples, 20);
        assert_eq!(list.segments(&anmo()).len(), 1);
        assert_eq!(list.segments(&anmo())[0].end, secs(1.9));
    }

    #[test]
    fn test_jitter_within_half_period_joins() {
        let mut list = TraceList::new();
        list.add_record(&anmo(), secs(0.0), secs(0.9), 10.0, 512, 10);
        list.add_record(&anmo(), secs(1.04), secs(1.94), 10.0, 512, 10);
        assert_eq!(list.segments(&anmo()).len(), 1);
    }

    #[test]
    fn test_gap_starts_new_segment() {
        let mut list = TraceList::new();
        list.add_record(&anmo(), secs(0.0), secs(0.9), 10.0, 512, 10);
        list.add_record(&anmo(), secs(5.0), secs(5.9), 10.0, 512, 10);
        assert_eq!(list.segments(&anmo()).len(), 2);
    }

    #[test]
    fn test_record_before_segment_prepends() {
        let mut list = TraceList::new();
        list.add_record(&anmo(), secs(1.0), secs(1.9), 10.0, 512, 10);
        list.add_record(&anmo(), secs(0.0), secs(0.9), 10.0, 256, 10);
        let segs = list.segments(&anmo());
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].start, secs(0.0));
        assert_eq!(segs[0].bytes, 768);
    }

    #[test]
    fn test_rate_change_starts_new_segment() {
        let mut list = TraceList::new();
        list.add_record(&anmo(), secs(0.0), secs(0.9), 10.0, 512, 10);
        list.add_record(&anmo(), secs(1.0), secs(1.95), 20.0, 512, 20);
        assert_eq!(list.segments(&anmo()).len(), 2);
    }

    #[test]
    fn test_summary_line_format() {
        let mut list = TraceList::new();
        let start = HpTime::parse("2010,001,00:00:00").unwrap();
        let end = HpTime::parse("2010,001,00:00:00.9").unwrap();
        list.add_record(&Identity::new("IU", "ANMO", "", "BHZ", 'D'), start, end, 10.0, 512, 10);

        let mut out = Vec::new();
        list.write_summary(&mut out, "W: ").unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "W: IU|ANMO||BHZ|D|2010,001,00:00:00.000000|2010,001,00:00:00.900000|512|10\n"
        );
    }

    #[test]
    fn test_summary_ordering() {
        let mut list = TraceList::new();
        let b = Identity::new("IU", "COLA", "", "BHZ", 'D');
        let a = Identity::new("IU", "ANMO", "", "BHZ", 'D');
        list.add_record(&b, secs(0.0), secs(0.9), 10.0, 1, 10);
        list.add_record(&a, secs(10.0), secs(10.9), 10.0, 1, 10);
        list.add_record(&a, secs(0.0), secs(0.9), 10.0, 1, 10);

        let mut out = Vec::new();
        list.write_summary(&mut out, "").unwrap();
        let text = String::from_utf8(out).unwrap();
        let stations: Vec<&str> = text.lines().map(|l| l.split('|').nth(1).unwrap()).collect();
        assert_eq!(stations, ["ANMO", "ANMO", "COLA"]);
        assert!(text.lines().next().unwrap().contains("1970,001,00:00:00.000000"));
    }

    #[test]
    fn test_summary_target_from_arg() {
        assert_eq!(SummaryTarget::from_arg("-"), SummaryTarget::Stdout);
        assert_eq!(SummaryTarget::from_arg("--"), SummaryTarget::Stderr);
        assert_eq!(
            SummaryTarget::from_arg("out.txt"),
            SummaryTarget::File(PathBuf::from("out.txt"))
        );
    }
}
