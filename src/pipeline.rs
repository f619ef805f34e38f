//! The read, select, trim and write loop over all inputs.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Instant;

use tracing::{error, info, trace, warn};

use crate::MseedError;
use crate::archive::{Archive, DEFAULT_MAX_OPEN_FILES};
use crate::cli::{Config, InputFile};
use crate::criteria::{Criteria, Verdict};
use crate::decode;
use crate::dispatch::Dispatcher;
use crate::error::{FilterError, FilterResult};
use crate::limits::{self, OPEN_FILE_SLACK};
use crate::reader::{MseedReader, RawRecord};
use crate::record::MseedRecord;
use crate::trim::{self, TrimOutcome};

/// Totals for a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunTotals {
    pub records: u64,
    pub bytes: u64,
    /// Records dropped because their trimmed form could not be packed.
    pub failed: u64,
}

impl RunTotals {
    /// Whether every selected record made it to the outputs.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Applies [`Criteria`] to records and hands survivors to a [`Dispatcher`].
pub struct Filter {
    criteria: Criteria,
    dispatcher: Dispatcher,
    failed: u64,
}

impl Filter {
    pub fn new(criteria: Criteria, dispatcher: Dispatcher) -> Self {
        Self {
            criteria,
            dispatcher,
            failed: 0,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Number of records dropped so far.
    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Open one input, position it at its start offset and process it.
    pub fn process_input(&mut self, input: &InputFile) -> FilterResult<()> {
        let path = input.path.as_path();
        match input.end_offset {
            Some(end) => info!("Reading: {} [range {}:{}]", path.display(), input.start_offset, end),
            None if input.start_offset > 0 => {
                info!("Reading: {} [range {}:]", path.display(), input.start_offset)
            }
            None => info!("Reading: {}", path.display()),
        }

        let open_error = |e: io::Error| FilterError::Decode {
            path: path.to_path_buf(),
            offset: input.start_offset,
            source: MseedError::Io(e),
        };

        if path == Path::new("-") {
            let mut stdin = io::stdin().lock();
            io::copy(&mut (&mut stdin).take(input.start_offset), &mut io::sink())
                .map_err(open_error)?;
            self.process_reader(stdin, path, input.start_offset, input.end_offset)
        } else {
            let mut file = File::open(path).map_err(open_error)?;
            if input.start_offset > 0 {
                file.seek(SeekFrom::Start(input.start_offset))
                    .map_err(open_error)?;
            }
            self.process_reader(
                BufReader::new(file),
                path,
                input.start_offset,
                input.end_offset,
            )
        }
    }

    /// Process records from `reader`, which is positioned at `start_offset`
    /// of the input named `path`.
    pub fn process_reader<R: Read>(
        &mut self,
        reader: R,
        path: &Path,
        start_offset: u64,
        end_offset: Option<u64>,
    ) -> FilterResult<()> {
        let mut records = MseedReader::with_offset(reader, start_offset);
        while let Some(item) = records.next() {
            let raw = item.map_err(|source| FilterError::Decode {
                path: path.to_path_buf(),
                offset: records.offset(),
                source,
            })?;
            if end_offset.is_some_and(|end| raw.offset >= end) {
                break;
            }

            self.process_record(&raw, path)?;
            self.dispatcher.close_idle(Instant::now())?;

            if end_offset.is_some_and(|end| raw.offset + raw.bytes.len() as u64 >= end) {
                break;
            }
        }
        Ok(())
    }

    fn process_record(&mut self, raw: &RawRecord, path: &Path) -> FilterResult<()> {
        let decode_error = |source| FilterError::Decode {
            path: path.to_path_buf(),
            offset: raw.offset,
            source,
        };
        let record = decode::decode_header(&raw.bytes).map_err(decode_error)?;
        let id = record.identity();
        let start = record.start_time;
        let end = record.end_time();

        let boundary = match self.criteria.evaluate(&id, start, end) {
            Verdict::Skip(reason) => {
                trace!("Skipping ({reason}) {id}, {start}");
                return Ok(());
            }
            Verdict::Write => {
                trace!("{record}");
                return self.dispatcher.write(&record, &raw.bytes);
            }
            Verdict::Conflict => {
                warn!("impossible combination of selections for record ({id}, {start}), not pruning");
                return self.dispatcher.write(&record, &raw.bytes);
            }
            Verdict::Trim(boundary) => boundary,
        };

        trace!("{record}");
        let outcome = trim::trim_record(&record, &raw.bytes, boundary);
        self.write_trimmed(&record, raw, path, outcome)
    }

    /// Route the result of trimming `record`. A record that cannot be
    /// repacked is dropped and counted; other errors stop the run.
    fn write_trimmed(
        &mut self,
        record: &MseedRecord,
        raw: &RawRecord,
        path: &Path,
        outcome: FilterResult<TrimOutcome>,
    ) -> FilterResult<()> {
        match outcome {
            Ok(TrimOutcome::Trimmed { record, bytes }) => self.dispatcher.write(&record, &bytes),
            Ok(TrimOutcome::PassThrough) => self.dispatcher.write(record, &raw.bytes),
            Ok(TrimOutcome::Skip) => Ok(()),
            Err(e @ FilterError::Encode { .. }) => {
                error!("{e}");
                self.failed += 1;
                Ok(())
            }
            Err(FilterError::Unpack { source, .. }) => Err(FilterError::Decode {
                path: path.to_path_buf(),
                offset: raw.offset,
                source,
            }),
            Err(e) => Err(e),
        }
    }

    /// Close every output and return the dispatcher for reporting.
    pub fn finish(mut self) -> FilterResult<Dispatcher> {
        self.dispatcher.finish()?;
        Ok(self.dispatcher)
    }
}

/// Execute a full run described by `config`.
pub fn run(config: Config) -> FilterResult<RunTotals> {
    if !config.archives.is_empty() {
        let wanted = DEFAULT_MAX_OPEN_FILES as u64 + OPEN_FILE_SLACK;
        if let Err(e) = limits::raise_open_file_limit(wanted) {
            warn!("cannot raise open file limit to {wanted}: {e}");
        }
    }

    let mut dispatcher = Dispatcher::new();
    if let Some(output) = &config.output {
        dispatcher = dispatcher.with_output(&output.path, output.append)?;
    }
    for template in config.archives {
        dispatcher = dispatcher
            .with_archive(Archive::new(template).with_idle_timeout(config.idle_timeout));
    }
    if config.summary.is_some() {
        dispatcher = dispatcher.with_summary();
    }

    let mut filter = Filter::new(config.criteria, dispatcher);
    for input in &config.inputs {
        filter.process_input(input)?;
    }
    let failed = filter.failed();
    let dispatcher = filter.finish()?;

    if let (Some(target), Some(list)) = (&config.summary, dispatcher.summary()) {
        target.write(list, &config.summary_prefix)?;
    }

    if failed > 0 {
        warn!("{failed} record(s) could not be written");
    }

    Ok(RunTotals {
        records: dispatcher.records_written(),
        bytes: dispatcher.bytes_written(),
        failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode;
    use crate::record::{MseedRecord, Samples};
    use crate::time::HpTime;

    const T0: i64 = 1_262_304_000;

    fn record_bytes(sta: &str, start_secs: i64) -> Vec<u8> {
        let record = MseedRecord::new()
            .with_nslc("XX", sta, "", "BHZ")
            .with_start_time(HpTime::from_secs(start_secs))
            .with_sample_rate(1.0)
            .with_samples(Samples::Int((0..10).collect()));
        encode::encode(&record).unwrap()
    }

    fn output_filter(dir: &Path, criteria: Criteria) -> (Filter, std::path::PathBuf) {
        let out = dir.join("out.mseed");
        let dispatcher = Dispatcher::new()
            .with_output(out.to_str().unwrap(), false)
            .unwrap();
        (Filter::new(criteria, dispatcher), out)
    }

    #[test]
    fn test_untouched_records_copied_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = record_bytes("A", T0);
        data.extend(record_bytes("B", T0));

        let (mut filter, out) = output_filter(dir.path(), Criteria::default());
        filter
            .process_reader(&data[..], Path::new("mem"), 0, None)
            .unwrap();
        let dispatcher = filter.finish().unwrap();
        assert_eq!(dispatcher.records_written(), 2);
        assert_eq!(std::fs::read(out).unwrap(), data);
    }

    #[test]
    fn test_end_offset_stops_reading() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = record_bytes("A", T0);
        data.extend(record_bytes("B", T0));
        data.extend(record_bytes("C", T0));

        let (mut filter, _) = output_filter(dir.path(), Criteria::default());
        filter
            .process_reader(&data[..], Path::new("mem"), 0, Some(1024))
            .unwrap();
        assert_eq!(filter.dispatcher().records_written(), 2);
    }

    #[test]
    fn test_trim_to_global_start() {
        let dir = tempfile::tempdir().unwrap();
        let data = record_bytes("A", T0);
        let criteria = Criteria {
            start: Some(HpTime::from_secs(T0 + 4)),
            prune_samples: true,
            ..Default::default()
        };

        let (mut filter, out) = output_filter(dir.path(), criteria);
        filter
            .process_reader(&data[..], Path::new("mem"), 0, None)
            .unwrap();
        filter.finish().unwrap();

        let written = std::fs::read(out).unwrap();
        let record = decode::decode(&written).unwrap();
        assert_eq!(record.start_time, HpTime::from_secs(T0 + 4));
        assert_eq!(record.samples, Samples::Int((4..10).collect()));
    }

    #[test]
    fn test_truncated_input_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = record_bytes("A", T0);
        data.extend(&record_bytes("B", T0)[..100]);

        let (mut filter, _) = output_filter(dir.path(), Criteria::default());
        let err = filter
            .process_reader(&data[..], Path::new("mem"), 0, None)
            .unwrap_err();
        match err {
            FilterError::Decode { offset, .. } => assert_eq!(offset, 512),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(filter.dispatcher().records_written(), 1);
    }

    #[test]
    fn test_repack_failure_drops_record_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let first = record_bytes("A", T0);
        let second = record_bytes("B", T0);
        let (mut filter, out) = output_filter(dir.path(), Criteria::default());

        let raw = RawRecord {
            offset: 0,
            bytes: first.clone(),
        };
        let header = decode::decode_header(&first).unwrap();
        let failure = Err(FilterError::Encode {
            srcname: header.srcname(),
            start: header.start_time.seed_string(),
            source: MseedError::EncodeError("no room".into()),
        });
        filter
            .write_trimmed(&header, &raw, Path::new("mem"), failure)
            .unwrap();
        assert_eq!(filter.failed(), 1);

        filter
            .process_reader(&second[..], Path::new("mem"), 512, None)
            .unwrap();
        let dispatcher = filter.finish().unwrap();
        assert_eq!(dispatcher.records_written(), 1);
        assert_eq!(std::fs::read(out).unwrap(), second);
    }

    #[test]
    fn test_unpack_failure_is_fatal_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let data = record_bytes("A", T0);
        let (mut filter, _) = output_filter(dir.path(), Criteria::default());

        let raw = RawRecord {
            offset: 1024,
            bytes: data.clone(),
        };
        let header = decode::decode_header(&data).unwrap();
        let failure = Err(FilterError::Unpack {
            srcname: header.srcname(),
            source: MseedError::UnsupportedEncoding(11),
        });
        match filter.write_trimmed(&header, &raw, Path::new("in.mseed"), failure) {
            Err(FilterError::Decode { offset, .. }) => assert_eq!(offset, 1024),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(filter.failed(), 0);
    }

    #[test]
    fn test_missing_input_file() {
        let dir = tempfile::tempdir().unwrap();
        let (mut filter, _) = output_filter(dir.path(), Criteria::default());
        let input = InputFile::new(dir.path().join("absent.mseed"));
        assert!(matches!(
            filter.process_input(&input),
            Err(FilterError::Decode { .. })
        ));
    }

    #[test]
    fn test_start_offset_seeks() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("in.mseed");
        let mut data = record_bytes("A", T0);
        data.extend(record_bytes("B", T0));
        std::fs::write(&input_path, &data).unwrap();

        let (mut filter, out) = output_filter(dir.path(), Criteria::default());
        let input = InputFile {
            path: input_path,
            start_offset: 512,
            end_offset: None,
        };
        filter.process_input(&input).unwrap();
        filter.finish().unwrap();
        assert_eq!(std::fs::read(out).unwrap(), &data[512..]);
    }
}
