//! Command-line parsing and run configuration.
//!
//! [`parse_args`] turns an argument list into a fully validated [`Config`]:
//! selection files, regex lists, times and archive templates are all loaded
//! here, before any record is read. It never exits the process; help and
//! version requests come back as [`Command::Exit`].

use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::{ArgAction, Parser};
use tracing::debug;

use crate::archive::{ArchiveTemplate, Layout};
use crate::criteria::{self, Criteria};
use crate::error::{FilterError, FilterResult};
use crate::selection::Selections;
use crate::summary::SummaryTarget;
use crate::time::HpTime;

const TEMPLATE_HELP: &str = "\
Archive format flags, each led by a modifier:
  n s l c   network, station, location, channel (white space removed)
  Y y       year, 4 digits / 2 digits zero padded
  j         day of year, 3 digits zero padded
  H M S     hour, minute, second, 2 digits zero padded
  F         fractional seconds, 4 digits zero padded
  q         record quality indicator (D, R, Q, M)
  L         data record length in bytes
  r R       sample rate as a rounded integer / with 6 decimals
  %% ##     a literal '%' / '#'

The '%' modifier marks a defining flag and '#' a non-defining flag. Records
with the same defining values go to the same file; non-defining flags take
their values from the first record of that file.

Times: YYYY[,DDD,HH,MM,SS.FFFFFF] with ',', ':' or '.' delimiters, or
YYYY-MM-DD[THH:MM:SS[.FFFFFF]]. Regular expressions are applied to
NET_STA_LOC_CHAN_QUAL.

Inputs: 'file', 'file@start:end' to read a byte range, '@listfile' to read
input names from a file, '-' for standard input.";

/// Filter, trim and reorganize miniSEED records.
#[derive(Parser, Debug)]
#[command(name = "mseedfilter", version, about, long_about = None)]
#[command(after_long_help = TEMPLATE_HELP)]
pub struct Cli {
    /// Be more verbose, repeat for more detail
    #[arg(short, action = ArgAction::Count)]
    pub verbose: u8,

    /// File of selection criteria, '-' for standard input
    #[arg(short = 's', long = "selection", value_name = "FILE")]
    pub selection: Option<PathBuf>,

    /// Limit to records that contain or start after TIME
    #[arg(long = "ts", value_name = "TIME")]
    pub start_time: Option<String>,

    /// Limit to records that contain or end before TIME
    #[arg(long = "te", value_name = "TIME")]
    pub end_time: Option<String>,

    /// Limit to source names matching a regex, '@file' for a regex list
    #[arg(short = 'M', long = "match", value_name = "REGEX")]
    pub match_pattern: Option<String>,

    /// Drop source names matching a regex, '@file' for a regex list
    #[arg(short = 'R', long = "reject", value_name = "REGEX")]
    pub reject_pattern: Option<String>,

    /// Select records whose NET_STA_LOC_CHAN_QUAL source name matches a glob
    #[arg(short = 'm', long = "select", value_name = "SRCNAME")]
    pub select: Vec<String>,

    /// Single output file, '-' for standard output
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<String>,

    /// Append to the output file instead of overwriting it
    #[arg(long)]
    pub append: bool,

    /// Write records into an archive laid out by FORMAT
    #[arg(short = 'A', long = "archive", value_name = "FORMAT")]
    pub archive: Vec<String>,

    /// Archive of NET.STA.LOC.CHAN files under DIR
    #[arg(long = "chan", value_name = "DIR")]
    pub chan: Vec<String>,

    /// Archive of NET.STA.LOC.CHAN.QUAL files under DIR
    #[arg(long = "qchan", value_name = "DIR")]
    pub qchan: Vec<String>,

    /// Archive of NET.STA.LOC.CHAN.YEAR:DAY:TIME files under DIR
    #[arg(long = "cday", value_name = "DIR")]
    pub cday: Vec<String>,

    /// Archive of NET.STA.YEAR:DAY files under DIR
    #[arg(long = "sday", value_name = "DIR")]
    pub sday: Vec<String>,

    /// BUD archive under DIR
    #[arg(long = "bud", value_name = "DIR")]
    pub bud: Vec<String>,

    /// SDS archive under DIR
    #[arg(long = "sds", value_name = "DIR")]
    pub sds: Vec<String>,

    /// CSS-like archive under DIR
    #[arg(long = "css", value_name = "DIR")]
    pub css: Vec<String>,

    /// Trim records at the sample level to the selected time range
    #[arg(short = 'P', long = "prune-samples")]
    pub prune_samples: bool,

    /// Summary of written data, '-' for stdout, '--' for stderr
    #[arg(long = "summary", value_name = "FILE", allow_hyphen_values = true)]
    pub summary: Option<String>,

    /// Prefix for every summary line
    #[arg(long = "summary-prefix", value_name = "PREFIX", default_value = "")]
    pub summary_prefix: String,

    /// Seconds before an idle archive file is closed
    #[arg(long = "idle-timeout", value_name = "SECONDS", default_value_t = 60)]
    pub idle_timeout: u64,

    /// Input files
    #[arg(value_name = "INPUT")]
    pub inputs: Vec<String>,
}

/// One input and the byte range to read from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    /// `-` is standard input.
    pub path: PathBuf,
    pub start_offset: u64,
    /// Stop at this byte offset.
    pub end_offset: Option<u64>,
}

impl InputFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            start_offset: 0,
            end_offset: None,
        }
    }

    /// Parse `path` or `path@start:end`; both offsets are optional.
    ///
    /// A suffix after the last `@` that is not a byte range stays part of
    /// the path.
    pub fn parse(spec: &str) -> Self {
        let Some((path, range)) = spec.rsplit_once('@') else {
            return Self::new(spec);
        };
        let (start, end) = range.split_once(':').unwrap_or((range, ""));
        let offset = |s: &str| -> Option<Option<u64>> {
            if s.is_empty() {
                Some(None)
            } else {
                s.parse().ok().map(Some)
            }
        };
        match (offset(start), offset(end)) {
            (Some(start), Some(end)) if !path.is_empty() => Self {
                path: PathBuf::from(path),
                start_offset: start.unwrap_or(0),
                end_offset: end.filter(|&e| e > 0),
            },
            _ => Self::new(spec),
        }
    }
}

/// Single output file settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pub path: String,
    pub append: bool,
}

/// Validated configuration for one run.
#[derive(Debug)]
pub struct Config {
    pub verbosity: u8,
    pub inputs: Vec<InputFile>,
    pub criteria: Criteria,
    pub output: Option<OutputSpec>,
    pub archives: Vec<ArchiveTemplate>,
    pub idle_timeout: Duration,
    pub summary: Option<SummaryTarget>,
    pub summary_prefix: String,
}

/// What the caller should do after parsing.
#[derive(Debug)]
pub enum Command {
    Run(Box<Config>),
    /// Print `message` to standard output and exit with `code`.
    Exit { code: u8, message: String },
}

/// Parse and validate a full argument list, program name first.
pub fn parse_args<I, T>(args: I) -> FilterResult<Command>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            return Ok(Command::Exit {
                code: 0,
                message: e.render().to_string(),
            });
        }
        Err(e) => return Err(FilterError::Usage(e.render().to_string())),
    };
    Ok(Command::Run(Box::new(cli.into_config()?)))
}

impl Cli {
    /// Load and check everything the options refer to.
    pub fn into_config(self) -> FilterResult<Config> {
        let mut inputs = Vec::new();
        for spec in &self.inputs {
            match spec.strip_prefix('@') {
                Some(list) => inputs.extend(read_list_file(list)?),
                None => inputs.push(InputFile::parse(spec)),
            }
        }
        if inputs.is_empty() {
            return Err(FilterError::Usage(
                "No input files were specified, try --help".into(),
            ));
        }

        let mut archives = Vec::new();
        for format in &self.archive {
            archives.push(ArchiveTemplate::parse(format)?);
        }
        let presets = [
            (Layout::Chan, &self.chan),
            (Layout::QChan, &self.qchan),
            (Layout::CDay, &self.cday),
            (Layout::SDay, &self.sday),
            (Layout::Bud, &self.bud),
            (Layout::Sds, &self.sds),
            (Layout::Css, &self.css),
        ];
        for (layout, dirs) in presets {
            for dir in dirs {
                archives.push(ArchiveTemplate::parse(&layout.under(dir))?);
            }
        }
        if archives.is_empty() && self.output.is_none() {
            return Err(FilterError::Usage(
                "No output files were specified, try --help".into(),
            ));
        }

        let start = self.start_time.as_deref().map(HpTime::parse).transpose()?;
        let end = self.end_time.as_deref().map(HpTime::parse).transpose()?;
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(FilterError::Usage(format!(
                    "start time {s} is after end time {e}"
                )));
            }
        }

        let mut selections = Selections::new();
        for pattern in &self.select {
            selections.add_srcname(pattern)?;
        }
        if let Some(path) = &self.selection {
            debug!("Reading selections from {}", path.display());
            selections.read_file(path)?;
        }

        let criteria = Criteria {
            start,
            end,
            match_regex: self
                .match_pattern
                .as_deref()
                .map(criteria::compile_pattern)
                .transpose()?,
            reject_regex: self
                .reject_pattern
                .as_deref()
                .map(criteria::compile_pattern)
                .transpose()?,
            selections: (!selections.is_empty()).then_some(selections),
            prune_samples: self.prune_samples,
        };

        Ok(Config {
            verbosity: self.verbose,
            inputs,
            criteria,
            output: self.output.map(|path| OutputSpec {
                path,
                append: self.append,
            }),
            archives,
            idle_timeout: Duration::from_secs(self.idle_timeout),
            summary: self.summary.as_deref().map(SummaryTarget::from_arg),
            summary_prefix: self.summary_prefix,
        })
    }
}

/// Inputs named in a list file, one per line; blank and `#` lines skipped.
fn read_list_file(path: &str) -> FilterResult<Vec<InputFile>> {
    debug!("Reading list file '{path}'");
    let text = fs::read_to_string(path).map_err(|e| FilterError::parse(path, e.to_string()))?;
    Ok(text
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(InputFile::parse)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn run(args: &[&str]) -> Config {
        let argv = std::iter::once("mseedfilter").chain(args.iter().copied());
        match parse_args(argv).unwrap() {
            Command::Run(config) => *config,
            Command::Exit { message, .. } => panic!("unexpected exit: {message}"),
        }
    }

    fn usage_error(args: &[&str]) -> String {
        let argv = std::iter::once("mseedfilter").chain(args.iter().copied());
        match parse_args(argv) {
            Err(FilterError::Usage(message)) => message,
            other => panic!("expected usage error, got {other:?}"),
        }
    }

    #[test]
    fn test_minimal_run() {
        let config = run(&["-o", "out.mseed", "in.mseed"]);
        assert_eq!(config.inputs, vec![InputFile::new("in.mseed")]);
        assert_eq!(
            config.output,
            Some(OutputSpec {
                path: "out.mseed".into(),
                append: false
            })
        );
        assert!(config.criteria.selections.is_none());
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.verbosity, 0);
    }

    #[test]
    fn test_missing_inputs_or_outputs() {
        assert!(usage_error(&["-o", "out.mseed"]).contains("No input files"));
        assert!(usage_error(&["in.mseed"]).contains("No output files"));
    }

    #[test]
    fn test_unknown_option_is_usage_error() {
        usage_error(&["--bogus", "-o", "x", "in"]);
    }

    #[test]
    fn test_help_requests_exit() {
        let argv = ["mseedfilter", "--help"];
        match parse_args(argv).unwrap() {
            Command::Exit { code, message } => {
                assert_eq!(code, 0);
                assert!(message.contains("--prune-samples"));
            }
            Command::Run(_) => panic!("expected exit"),
        }
    }

    #[test]
    fn test_verbosity_and_flags() {
        let config = run(&[
            "-vvv",
            "-P",
            "--ts",
            "2010,001",
            "--te",
            "2010-01-02",
            "-m",
            "IU_ANMO_*",
            "-M",
            "^IU_",
            "-R",
            "_LH._",
            "--summary=--",
            "--summary-prefix",
            "W:",
            "--idle-timeout",
            "5",
            "-o",
            "-",
            "--append",
            "in.mseed",
        ]);
        assert_eq!(config.verbosity, 3);
        assert!(config.criteria.prune_samples);
        assert_eq!(config.criteria.start, Some(HpTime::parse("2010,001").unwrap()));
        assert_eq!(config.criteria.end, Some(HpTime::parse("2010,002").unwrap()));
        assert_eq!(config.criteria.selections.as_ref().unwrap().len(), 1);
        assert!(config.criteria.match_regex.is_some());
        assert!(config.criteria.reject_regex.is_some());
        assert_eq!(config.summary, Some(SummaryTarget::Stderr));
        assert_eq!(config.summary_prefix, "W:");
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
        assert!(config.output.unwrap().append);
    }

    #[test]
    fn test_preset_layouts() {
        let config = run(&["--bud", "/data/bud", "-A", "/x/%n.%s", "--sds", "/data/sds", "in"]);
        let patterns: Vec<&str> = config.archives.iter().map(|a| a.pattern()).collect();
        assert_eq!(
            patterns,
            vec![
                "/x/%n.%s",
                "/data/bud/%n/%s/%s.%n.%l.%c.%Y.%j",
                "/data/sds/%Y/%n/%s/%c.D/%n.%s.%l.%c.D.%Y.%j",
            ]
        );
    }

    #[test]
    fn test_bad_values_are_parse_errors() {
        let argv = ["mseedfilter", "--ts", "nope", "-o", "x", "in"];
        assert!(matches!(parse_args(argv), Err(FilterError::Parse { .. })));
        let argv = ["mseedfilter", "-A", "%n/%Z", "in"];
        assert!(matches!(parse_args(argv), Err(FilterError::Parse { .. })));
        let argv = ["mseedfilter", "-M", "IU_(", "-o", "x", "in"];
        assert!(matches!(parse_args(argv), Err(FilterError::Parse { .. })));
    }

    #[test]
    fn test_input_ranges() {
        assert_eq!(
            InputFile::parse("data.mseed@512:4096"),
            InputFile {
                path: "data.mseed".into(),
                start_offset: 512,
                end_offset: Some(4096),
            }
        );
        assert_eq!(
            InputFile::parse("data.mseed@1024"),
            InputFile {
                path: "data.mseed".into(),
                start_offset: 1024,
                end_offset: None,
            }
        );
        assert_eq!(
            InputFile::parse("data.mseed@:2048").end_offset,
            Some(2048)
        );
        assert_eq!(
            InputFile::parse("user@host/data.mseed"),
            InputFile::new("user@host/data.mseed")
        );
    }

    #[test]
    fn test_list_file_inputs() {
        let mut list = tempfile::NamedTempFile::new().unwrap();
        writeln!(list, "# inputs").unwrap();
        writeln!(list, "a.mseed").unwrap();
        writeln!(list).unwrap();
        writeln!(list, "b.mseed@0:512").unwrap();

        let at_list = format!("@{}", list.path().display());
        let config = run(&["-o", "out", "first.mseed", &at_list]);
        let paths: Vec<_> = config.inputs.iter().map(|i| i.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("first.mseed"),
                PathBuf::from("a.mseed"),
                PathBuf::from("b.mseed")
            ]
        );
        assert_eq!(config.inputs[2].end_offset, Some(512));
    }

    #[test]
    fn test_selection_file_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "IU ANMO * BH?").unwrap();
        writeln!(file, "IU COLA * BH?").unwrap();
        let path = file.path().display().to_string();
        let config = run(&["-s", &path, "-o", "out", "in"]);
        assert_eq!(config.criteria.selections.unwrap().len(), 2);
    }
}
