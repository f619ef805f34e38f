//! Archive path templates and the per-archive stream table.
//!
//! A template mixes literal text with substitution tokens. Tokens led by
//! `%` are *defining*: records whose defining expansions agree share one
//! output stream. Tokens led by `#` are *non-defining*: they only shape the
//! file name, which is fixed by the first record of each stream.
//!
//! | Flag | Expansion |
//! |------|-----------|
//! | `n` `s` `l` `c` | network, station, location, channel (whitespace removed) |
//! | `Y` `y` | 4-digit and 2-digit year |
//! | `j` | 3-digit day of year |
//! | `H` `M` `S` | 2-digit hour, minute, second |
//! | `F` | 4-digit fractional seconds (0.0001 s units) |
//! | `q` | quality indicator |
//! | `L` | record length |
//! | `r` `R` | sample rate, rounded integer and with 6 decimals |
//!
//! `%%` and `##` produce a literal `%` and `#`.
//!
//! Archive files are always opened for appending, so data already at a path
//! from an earlier run or an earlier idle close is kept.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{FilterError, FilterResult};
use crate::record::MseedRecord;

/// Default idle time after which a stream's file handle is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default cap on concurrently open handles per archive.
pub const DEFAULT_MAX_OPEN_FILES: usize = 50;

/// Preset archive layouts, joined to a base directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `NET.STA.LOC.CHAN`
    Chan,
    /// `NET.STA.LOC.CHAN.QUAL`
    QChan,
    /// `NET.STA.LOC.CHAN.YEAR:DAY:HOUR:MIN:SEC`
    CDay,
    /// `NET.STA.YEAR:DAY`
    SDay,
    /// Buffer of Uniform Data: `NET/STA/STA.NET.LOC.CHAN.YEAR.DAY`
    Bud,
    /// SeisComP Data Structure: `YEAR/NET/STA/CHAN.D/NET.STA.LOC.CHAN.D.YEAR.DAY`
    Sds,
    /// CSS-like: `YEAR/DAY/STA.CHAN.YEAR:DAY:HOUR:MIN:SEC`
    Css,
}

impl Layout {
    pub fn pattern(self) -> &'static str {
        match self {
            Layout::Chan => "%n.%s.%l.%c",
            Layout::QChan => "%n.%s.%l.%c.%q",
            Layout::CDay => "%n.%s.%l.%c.%Y:%j:#H:#M:#S",
            Layout::SDay => "%n.%s.%Y:%j",
            Layout::Bud => "%n/%s/%s.%n.%l.%c.%Y.%j",
            Layout::Sds => "%Y/%n/%s/%c.D/%n.%s.%l.%c.D.%Y.%j",
            Layout::Css => "%Y/%j/%s.%c.%Y:%j:#H:#M:#S",
        }
    }

    /// Full template for an archive rooted at `base`.
    pub fn under(self, base: &str) -> String {
        format!("{base}/{}", self.pattern())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Network,
    Station,
    Location,
    Channel,
    Year,
    ShortYear,
    DayOfYear,
    Hour,
    Minute,
    Second,
    Fraction,
    Quality,
    RecordLength,
    RateRounded,
    Rate,
}

impl Field {
    fn from_flag(flag: char) -> Option<Self> {
        Some(match flag {
            'n' => Field::Network,
            's' => Field::Station,
            'l' => Field::Location,
            'c' => Field::Channel,
            'Y' => Field::Year,
            'y' => Field::ShortYear,
            'j' => Field::DayOfYear,
            'H' => Field::Hour,
            'M' => Field::Minute,
            'S' => Field::Second,
            'F' => Field::Fraction,
            'q' => Field::Quality,
            'L' => Field::RecordLength,
            'r' => Field::RateRounded,
            'R' => Field::Rate,
            _ => return None,
        })
    }

    fn expand(self, record: &MseedRecord) -> String {
        let strip = |code: &str| -> String {
            code.chars().filter(|c| !c.is_whitespace()).collect()
        };
        let time = record.start_time.to_nanotime();
        match self {
            Field::Network => strip(&record.network),
            Field::Station => strip(&record.station),
            Field::Location => strip(&record.location),
            Field::Channel => strip(&record.channel),
            Field::Year => format!("{:04}", time.year),
            Field::ShortYear => format!("{:02}", time.year % 100),
            Field::DayOfYear => format!("{:03}", time.day),
            Field::Hour => format!("{:02}", time.hour),
            Field::Minute => format!("{:02}", time.minute),
            Field::Second => format!("{:02}", time.second),
            Field::Fraction => format!("{:04}", time.nanosecond / 100_000),
            Field::Quality => record.quality.to_string(),
            Field::RecordLength => record.record_length.to_string(),
            Field::RateRounded => format!("{}", record.sample_rate.round() as i64),
            Field::Rate => format!("{:.6}", record.sample_rate),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Field { field: Field, defining: bool },
}

/// A parsed archive path template.
///
/// ```
/// use mseed_filter::archive::ArchiveTemplate;
/// use mseed_filter::{HpTime, MseedRecord};
///
/// let template = ArchiveTemplate::parse("%n/%s/%s.%n.%l.%c.%Y.%j").unwrap();
/// let record = MseedRecord::new()
///     .with_nslc("NL", "HGN", "", "BHE")
///     .with_start_time(HpTime::parse("2003-02-24").unwrap());
/// assert_eq!(template.expand(&record), "NL/HGN/HGN.NL..BHE.2003.055");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTemplate {
    pattern: String,
    tokens: Vec<Token>,
}

impl ArchiveTemplate {
    /// Parse a template, rejecting unknown flags.
    pub fn parse(pattern: &str) -> FilterResult<Self> {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut chars = pattern.chars();

        while let Some(c) = chars.next() {
            if c != '%' && c != '#' {
                literal.push(c);
                continue;
            }
            let flag = chars.next().ok_or_else(|| {
                FilterError::parse(pattern, format!("template ends with a bare '{c}'"))
            })?;
            if flag == c {
                literal.push(c);
                continue;
            }
            let field = Field::from_flag(flag).ok_or_else(|| {
                FilterError::parse(pattern, format!("unknown template flag '{c}{flag}'"))
            })?;
            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(Token::Field {
                field,
                defining: c == '%',
            });
        }
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }

        Ok(Self {
            pattern: pattern.to_string(),
            tokens,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Key shared by every record that belongs to the same stream.
    pub fn defining_key(&self, record: &MseedRecord) -> String {
        let mut key = String::new();
        for token in &self.tokens {
            if let Token::Field {
                field,
                defining: true,
            } = token
            {
                key.push_str(&field.expand(record));
                key.push('\u{1f}');
            }
        }
        key
    }

    /// Expand every token with the values of `record`.
    pub fn expand(&self, record: &MseedRecord) -> String {
        self.tokens
            .iter()
            .map(|token| match token {
                Token::Literal(text) => text.clone(),
                Token::Field { field, .. } => field.expand(record),
            })
            .collect()
    }
}

/// One output file of an archive.
#[derive(Debug)]
pub struct DataStream {
    pub path: PathBuf,
    file: Option<BufWriter<File>>,
    pub last_write: Instant,
    pub bytes: u64,
    pub records: u64,
}

impl DataStream {
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn close(&mut self) -> FilterResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .map_err(|e| FilterError::resource(&self.path, e))?;
            trace!("Closed {}", self.path.display());
        }
        Ok(())
    }
}

/// Records routed into files named by an [`ArchiveTemplate`].
#[derive(Debug)]
pub struct Archive {
    template: ArchiveTemplate,
    idle_timeout: Duration,
    max_open: usize,
    streams: HashMap<String, DataStream>,
}

impl Archive {
    pub fn new(template: ArchiveTemplate) -> Self {
        Self {
            template,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_open: DEFAULT_MAX_OPEN_FILES,
            streams: HashMap::new(),
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_open(mut self, max_open: usize) -> Self {
        self.max_open = max_open.max(1);
        self
    }

    pub fn template(&self) -> &ArchiveTemplate {
        &self.template
    }

    pub fn streams(&self) -> impl Iterator<Item = &DataStream> {
        self.streams.values()
    }

    pub fn open_count(&self) -> usize {
        self.streams.values().filter(|s| s.is_open()).count()
    }

    /// Append `bytes`, the packed form of `record`, to its stream.
    pub fn write(&mut self, record: &MseedRecord, bytes: &[u8], now: Instant) -> FilterResult<()> {
        let key = self.template.defining_key(record);

        let needs_open = self.streams.get(&key).is_none_or(|s| !s.is_open());
        if needs_open && self.open_count() >= self.max_open {
            self.close_oldest()?;
        }

        let template = &self.template;
        let stream = self.streams.entry(key).or_insert_with(|| {
            let path = PathBuf::from(template.expand(record));
            debug!("New archive stream {}", path.display());
            DataStream {
                path,
                file: None,
                last_write: now,
                bytes: 0,
                records: 0,
            }
        });
        if stream.file.is_none() {
            stream.file = Some(open_stream(&stream.path)?);
        }
        if let Some(file) = stream.file.as_mut() {
            file.write_all(bytes)
                .map_err(|e| FilterError::resource(&stream.path, e))?;
        }
        stream.last_write = now;
        stream.bytes += bytes.len() as u64;
        stream.records += 1;
        Ok(())
    }

    /// Close every handle idle for longer than the timeout.
    pub fn close_idle(&mut self, now: Instant) -> FilterResult<()> {
        let timeout = self.idle_timeout;
        for stream in self.streams.values_mut() {
            if stream.is_open() && now.saturating_duration_since(stream.last_write) > timeout {
                debug!("Closing idle stream {}", stream.path.display());
                stream.close()?;
            }
        }
        Ok(())
    }

    /// Flush and close every handle.
    pub fn finish(&mut self) -> FilterResult<()> {
        for stream in self.streams.values_mut() {
            stream.close()?;
        }
        Ok(())
    }

    fn close_oldest(&mut self) -> FilterResult<()> {
        let oldest = self
            .streams
            .values_mut()
            .filter(|s| s.is_open())
            .min_by_key(|s| s.last_write);
        if let Some(stream) = oldest {
            debug!("Open file limit reached, closing {}", stream.path.display());
            stream.close()?;
        }
        Ok(())
    }
}

fn open_stream(path: &Path) -> FilterResult<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| FilterError::resource(parent, e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| FilterError::resource(path, e))?;
    trace!("Opened {} for append", path.display());
    Ok(BufWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::HpTime;

    fn record(net: &str, sta: &str, loc: &str, chan: &str, time: &str) -> MseedRecord {
        MseedRecord::new()
            .with_nslc(net, sta, loc, chan)
            .with_start_time(HpTime::parse(time).unwrap())
            .with_sample_rate(40.0)
    }

    #[test]
    fn test_bud_layout() {
        let template = ArchiveTemplate::parse(Layout::Bud.pattern()).unwrap();
        let rec = record("NL", "HGN", "", "BHE", "2003,055");
        assert_eq!(template.expand(&rec), "NL/HGN/HGN.NL..BHE.2003.055");
    }

    #[test]
    fn test_all_flags() {
        let template =
            ArchiveTemplate::parse("%n %s %l %c %Y %y %j %H %M %S %F %q %L %r %R %% ##").unwrap();
        let rec = record("IU", "ANMO", "00", "BHZ", "2010,032,05:06:07.123456");
        assert_eq!(
            template.expand(&rec),
            "IU ANMO 00 BHZ 2010 10 032 05 06 07 1234 D 512 40 40.000000 % #"
        );
    }

    #[test]
    fn test_whitespace_removed_from_codes() {
        let template = ArchiveTemplate::parse("%n.%s").unwrap();
        let rec = record("I U", " AN MO", "", "BHZ", "2010,001");
        assert_eq!(template.expand(&rec), "IU.ANMO");
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(matches!(
            ArchiveTemplate::parse("%n/%x"),
            Err(FilterError::Parse { .. })
        ));
        assert!(ArchiveTemplate::parse("%n/#Q").is_err());
        assert!(ArchiveTemplate::parse("trailing%").is_err());
    }

    #[test]
    fn test_non_defining_fields_do_not_split_streams() {
        let template = ArchiveTemplate::parse("%n.%s.%Y:%j:#H:#M").unwrap();
        let first = record("IU", "ANMO", "", "BHZ", "2010,001,01:00:00");
        let later = record("IU", "ANMO", "", "BHZ", "2010,001,05:30:00");
        let next_day = record("IU", "ANMO", "", "BHZ", "2010,002,00:00:00");
        assert_eq!(template.defining_key(&first), template.defining_key(&later));
        assert_ne!(template.defining_key(&first), template.defining_key(&next_day));
    }

    #[test]
    fn test_stream_path_fixed_by_first_record() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/%n.%s.#H", dir.path().display());
        let mut archive = Archive::new(ArchiveTemplate::parse(&pattern).unwrap());
        let now = Instant::now();

        let first = record("IU", "ANMO", "", "BHZ", "2010,001,01:00:00");
        let later = record("IU", "ANMO", "", "BHZ", "2010,001,02:00:00");
        archive.write(&first, b"first", now).unwrap();
        archive.write(&later, b"second", now).unwrap();
        archive.finish().unwrap();

        let streams: Vec<_> = archive.streams().collect();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].records, 2);
        let contents = fs::read(dir.path().join("IU.ANMO.01")).unwrap();
        assert_eq!(contents, b"firstsecond");
        assert!(!dir.path().join("IU.ANMO.02").exists());
    }

    #[test]
    fn test_idle_close_then_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("IU.ANMO"), b"stale").unwrap();

        let pattern = format!("{}/%n.%s", dir.path().display());
        let mut archive = Archive::new(ArchiveTemplate::parse(&pattern).unwrap())
            .with_idle_timeout(Duration::from_secs(10));
        let rec = record("IU", "ANMO", "", "BHZ", "2010,001");
        let t0 = Instant::now();

        archive.write(&rec, b"one", t0).unwrap();
        archive.close_idle(t0 + Duration::from_secs(5)).unwrap();
        assert_eq!(archive.open_count(), 1);
        archive.close_idle(t0 + Duration::from_secs(11)).unwrap();
        assert_eq!(archive.open_count(), 0);

        archive.write(&rec, b"two", t0 + Duration::from_secs(12)).unwrap();
        archive.finish().unwrap();

        // Existing content is kept and the reopen appends.
        let contents = fs::read(dir.path().join("IU.ANMO")).unwrap();
        assert_eq!(contents, b"staleonetwo");
    }

    #[test]
    fn test_later_run_appends_to_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/%n.%s", dir.path().display());
        let rec = record("IU", "ANMO", "", "BHZ", "2010,001");

        for data in [b"RUN1", b"RUN2"] {
            let mut archive = Archive::new(ArchiveTemplate::parse(&pattern).unwrap());
            archive.write(&rec, data, Instant::now()).unwrap();
            archive.finish().unwrap();
        }

        let contents = fs::read(dir.path().join("IU.ANMO")).unwrap();
        assert_eq!(contents, b"RUN1RUN2");
    }

    #[test]
    fn test_open_handle_cap() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/%s", dir.path().display());
        let mut archive = Archive::new(ArchiveTemplate::parse(&pattern).unwrap()).with_max_open(2);
        let t0 = Instant::now();
        for (i, sta) in ["A", "B", "C"].iter().enumerate() {
            let rec = record("XX", sta, "", "BHZ", "2010,001");
            archive
                .write(&rec, sta.as_bytes(), t0 + Duration::from_secs(i as u64))
                .unwrap();
        }
        assert_eq!(archive.open_count(), 2);
        archive.finish().unwrap();
        assert_eq!(fs::read(dir.path().join("A")).unwrap(), b"A");
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = Layout::Sds.under(&dir.path().display().to_string());
        let mut archive = Archive::new(ArchiveTemplate::parse(&pattern).unwrap());
        let rec = record("IU", "ANMO", "00", "BHZ", "2010,001");
        archive.write(&rec, b"data", Instant::now()).unwrap();
        archive.finish().unwrap();
        assert!(
            dir.path()
                .join("2010/IU/ANMO/BHZ.D/IU.ANMO.00.BHZ.D.2010.001")
                .exists()
        );
    }
}
