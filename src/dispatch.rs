//! Delivery of accepted records to their destinations.
//!
//! A [`Dispatcher`] owns every output of a run: the optional single output
//! file, the archives and the summary trace list, plus the run totals.

use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, info};

use crate::archive::Archive;
use crate::error::{FilterError, FilterResult};
use crate::record::MseedRecord;
use crate::summary::TraceList;

/// The single output file; `-` selects standard output.
struct Output {
    path: PathBuf,
    writer: BufWriter<Box<dyn Write>>,
}

/// Writes records to the output file and archives and keeps the tally.
#[derive(Default)]
pub struct Dispatcher {
    output: Option<Output>,
    archives: Vec<Archive>,
    summary: Option<TraceList>,
    records: u64,
    bytes: u64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the single output file, truncating it unless `append` is set.
    pub fn with_output(mut self, path: &str, append: bool) -> FilterResult<Self> {
        let writer: Box<dyn Write> = if path == "-" {
            Box::new(io::stdout())
        } else {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .append(append)
                .truncate(!append)
                .open(path)
                .map_err(|e| FilterError::resource(path, e))?;
            Box::new(file)
        };
        debug!("Opened output {path}{}", if append { " (append)" } else { "" });
        self.output = Some(Output {
            path: PathBuf::from(path),
            writer: BufWriter::new(writer),
        });
        Ok(self)
    }

    pub fn with_archive(mut self, archive: Archive) -> Self {
        self.archives.push(archive);
        self
    }

    /// Track written coverage for a summary listing.
    pub fn with_summary(mut self) -> Self {
        self.summary = Some(TraceList::new());
        self
    }

    pub fn archives(&self) -> &[Archive] {
        &self.archives
    }

    pub fn summary(&self) -> Option<&TraceList> {
        self.summary.as_ref()
    }

    pub fn records_written(&self) -> u64 {
        self.records
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    /// Write `bytes`, the packed form of `record`, everywhere it belongs.
    pub fn write(&mut self, record: &MseedRecord, bytes: &[u8]) -> FilterResult<()> {
        self.write_at(record, bytes, Instant::now())
    }

    /// Like [`write`](Self::write) with an explicit clock reading for the
    /// archive idle bookkeeping.
    pub fn write_at(&mut self, record: &MseedRecord, bytes: &[u8], now: Instant) -> FilterResult<()> {
        if let Some(output) = self.output.as_mut() {
            output
                .writer
                .write_all(bytes)
                .map_err(|e| FilterError::resource(&output.path, e))?;
        }

        for archive in &mut self.archives {
            archive.write(record, bytes, now)?;
        }

        if let Some(summary) = self.summary.as_mut() {
            summary.add_record(
                &record.identity(),
                record.start_time,
                record.end_time(),
                record.sample_rate,
                bytes.len() as u64,
                record.sample_count as u64,
            );
        }

        self.records += 1;
        self.bytes += bytes.len() as u64;
        Ok(())
    }

    /// Close archive handles idle for longer than their timeout.
    pub fn close_idle(&mut self, now: Instant) -> FilterResult<()> {
        for archive in &mut self.archives {
            archive.close_idle(now)?;
        }
        Ok(())
    }

    /// Flush and close every output.
    pub fn finish(&mut self) -> FilterResult<()> {
        if let Some(mut output) = self.output.take() {
            output
                .writer
                .flush()
                .map_err(|e| FilterError::resource(&output.path, e))?;
        }
        for archive in &mut self.archives {
            archive.finish()?;
        }
        info!(
            "Wrote {} bytes of {} records to output file(s)",
            self.bytes, self.records
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveTemplate;
    use crate::encode;
    use crate::identity::Identity;
    use crate::record::Samples;
    use crate::time::HpTime;
    use std::fs;

    fn record(sta: &str, start_secs: i64) -> (MseedRecord, Vec<u8>) {
        let record = MseedRecord::new()
            .with_nslc("XX", sta, "", "BHZ")
            .with_start_time(HpTime::from_secs(start_secs))
            .with_sample_rate(1.0)
            .with_samples(Samples::Int(vec![0; 10]));
        let bytes = encode::encode(&record).unwrap();
        (record, bytes)
    }

    #[test]
    fn test_output_file_and_totals() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mseed");
        let mut dispatcher = Dispatcher::new()
            .with_output(out.to_str().unwrap(), false)
            .unwrap();

        let (a, a_bytes) = record("A", 0);
        let (b, b_bytes) = record("B", 0);
        dispatcher.write(&a, &a_bytes).unwrap();
        dispatcher.write(&b, &b_bytes).unwrap();
        dispatcher.finish().unwrap();

        assert_eq!(dispatcher.records_written(), 2);
        assert_eq!(dispatcher.bytes_written(), 1024);
        let contents = fs::read(&out).unwrap();
        assert_eq!(&contents[..512], &a_bytes[..]);
        assert_eq!(&contents[512..], &b_bytes[..]);
    }

    #[test]
    fn test_output_append_mode() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mseed");
        fs::write(&out, b"existing").unwrap();

        let (a, a_bytes) = record("A", 0);
        let mut dispatcher = Dispatcher::new()
            .with_output(out.to_str().unwrap(), true)
            .unwrap();
        dispatcher.write(&a, &a_bytes).unwrap();
        dispatcher.finish().unwrap();

        let contents = fs::read(&out).unwrap();
        assert_eq!(contents.len(), 8 + 512);
        assert!(contents.starts_with(b"existing"));
    }

    #[test]
    fn test_archives_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = format!("{}/%n.%s", dir.path().display());
        let mut dispatcher = Dispatcher::new()
            .with_archive(Archive::new(ArchiveTemplate::parse(&pattern).unwrap()))
            .with_summary();

        let (first, first_bytes) = record("A", 0);
        let (second, second_bytes) = record("A", 10);
        dispatcher.write(&first, &first_bytes).unwrap();
        dispatcher.write(&second, &second_bytes).unwrap();
        dispatcher.finish().unwrap();

        assert_eq!(fs::read(dir.path().join("XX.A")).unwrap().len(), 1024);
        let summary = dispatcher.summary().unwrap();
        let segments = summary.segments(&Identity::new("XX", "A", "", "BHZ", 'D'));
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].bytes, 1024);
        assert_eq!(segments[0].samples, 20);
        assert_eq!(segments[0].end, HpTime::from_secs(19));
    }

    #[test]
    fn test_unwritable_output_is_resource_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("missing").join("out.mseed");
        assert!(matches!(
            Dispatcher::new().with_output(out.to_str().unwrap(), false),
            Err(FilterError::Resource { .. })
        ));
    }
}
