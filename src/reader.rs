//! Iterator-based reader for multi-record miniSEED data.
//!
//! Use [`MseedReader`] to walk concatenated records from any [`Read`]
//! source. Each item is the raw record bytes together with the byte offset
//! the record started at; decoding is left to the caller.

use std::io::{ErrorKind, Read};

use crate::decode::{self, FIXED_HEADER_SIZE};
use crate::{MseedError, Result};

/// Smallest record length a Blockette 1000 can declare.
const MIN_RECORD_LENGTH: usize = 128;

/// One undecoded record and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Byte offset of the record within the source.
    pub offset: u64,
    pub bytes: Vec<u8>,
}

/// Iterator over miniSEED v2 records in a byte stream.
///
/// Iteration ends cleanly when the source is exhausted exactly on a record
/// boundary. A truncated or unrecognizable record yields one error and then
/// stops the iteration.
///
/// # Example
///
/// ```
/// use mseed_filter::{encode, MseedRecord, MseedReader, Samples};
///
/// let record = MseedRecord::new()
///     .with_nslc("XX", "TEST", "00", "BHZ")
///     .with_samples(Samples::Int(vec![1, 2, 3]));
/// let data = encode(&record).unwrap();
///
/// let records: Vec<_> = MseedReader::new(&data[..])
///     .collect::<Result<Vec<_>, _>>()
///     .unwrap();
/// assert_eq!(records.len(), 1);
/// assert_eq!(records[0].offset, 0);
/// ```
pub struct MseedReader<R> {
    inner: R,
    offset: u64,
    done: bool,
}

impl<R: Read> MseedReader<R> {
    /// Create a new reader positioned at the start of `inner`.
    pub fn new(inner: R) -> Self {
        Self::with_offset(inner, 0)
    }

    /// Create a reader whose source has already been advanced to `offset`.
    pub fn with_offset(inner: R, offset: u64) -> Self {
        Self {
            inner,
            offset,
            done: false,
        }
    }

    /// Byte offset of the next record.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_record(&mut self) -> Result<Option<RawRecord>> {
        let mut bytes = vec![0u8; MIN_RECORD_LENGTH];
        let got = read_full(&mut self.inner, &mut bytes)?;
        if got == 0 {
            return Ok(None);
        }
        if got < FIXED_HEADER_SIZE {
            return Err(MseedError::RecordTooShort {
                expected: FIXED_HEADER_SIZE,
                actual: got,
            });
        }

        let record_length = decode::record_length(&bytes[..got])?;
        if got < MIN_RECORD_LENGTH {
            return Err(MseedError::RecordTooShort {
                expected: record_length,
                actual: got,
            });
        }

        bytes.resize(record_length, 0);
        let rest = read_full(&mut self.inner, &mut bytes[MIN_RECORD_LENGTH..])?;
        if MIN_RECORD_LENGTH + rest < record_length {
            return Err(MseedError::RecordTooShort {
                expected: record_length,
                actual: MIN_RECORD_LENGTH + rest,
            });
        }

        let offset = self.offset;
        self.offset += record_length as u64;
        Ok(Some(RawRecord { offset, bytes }))
    }
}

impl<R: Read> Iterator for MseedReader<R> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Fill `buf` as far as the source allows; returns the number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
