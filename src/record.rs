//! miniSEED v2 record model.
//!
//! [`MseedRecord`] holds one record's identity, timing and payload plus the
//! header fields needed to repack it faithfully after trimming.

use std::fmt;

use crate::identity::Identity;
use crate::time::{HpTime, NANOS_PER_SEC};
use crate::types::{ByteOrder, EncodingFormat};

/// Activity flag bit set once the header time correction is applied.
pub const TIME_CORRECTION_APPLIED: u8 = 0x02;

/// A miniSEED v2 record.
///
/// `start_time` is the true time of the first sample: any unapplied header
/// time correction and the Blockette 1001 microsecond offset are already
/// folded in. `samples` is empty unless the payload was unpacked.
#[derive(Debug, Clone, PartialEq)]
pub struct MseedRecord {
    // --- Identification ---
    pub sequence_number: String,
    pub quality: char,
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,

    // --- Time + Data ---
    pub start_time: HpTime,
    pub sample_rate: f64,
    /// Number of samples declared by the header.
    pub sample_count: u32,
    pub encoding: EncodingFormat,
    pub samples: Samples,

    // --- Raw header state, preserved for repacking ---
    pub sample_rate_factor: i16,
    pub sample_rate_multiplier: i16,
    pub activity_flags: u8,
    pub io_flags: u8,
    pub dq_flags: u8,
    /// Time correction in 0.0001 second units.
    pub time_correction: i32,
    pub byte_order: ByteOrder,
    pub record_length: u32,
    /// Offset of the data section, 0 lets the encoder choose.
    pub data_offset: u16,
    pub blockette_count: u8,
    /// Offset of the first blockette, 0 when `blockettes` is empty.
    pub first_blockette: u16,
    /// Raw blockette bytes between the fixed header and the data section.
    pub blockettes: Vec<u8>,
}

impl MseedRecord {
    /// Create a new `MseedRecord` with sensible defaults.
    ///
    /// Defaults: sequence "000001", quality 'D', empty NSLC, 1 Hz,
    /// big-endian, 512-byte records, INT32, no samples.
    pub fn new() -> Self {
        Self {
            sequence_number: "000001".into(),
            quality: 'D',
            network: String::new(),
            station: String::new(),
            location: String::new(),
            channel: String::new(),
            start_time: HpTime::from_nanos(0),
            sample_rate: 1.0,
            sample_count: 0,
            encoding: EncodingFormat::Int32,
            samples: Samples::Int(vec![]),
            sample_rate_factor: 1,
            sample_rate_multiplier: 1,
            activity_flags: 0,
            io_flags: 0,
            dq_flags: 0,
            time_correction: 0,
            byte_order: ByteOrder::Big,
            record_length: 512,
            data_offset: 0,
            blockette_count: 0,
            first_blockette: 0,
            blockettes: Vec::new(),
        }
    }

    /// Set network, station, location, and channel codes.
    pub fn with_nslc(
        mut self,
        network: &str,
        station: &str,
        location: &str,
        channel: &str,
    ) -> Self {
        self.network = network.into();
        self.station = station.into();
        self.location = location.into();
        self.channel = channel.into();
        self
    }

    pub fn with_quality(mut self, quality: char) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_start_time(mut self, time: HpTime) -> Self {
        self.start_time = time;
        self
    }

    /// Set the sample rate in Hz.
    ///
    /// The header factor/multiplier pair is derived when the record is
    /// encoded.
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate;
        self.sample_rate_factor = 0;
        self.sample_rate_multiplier = 0;
        self
    }

    pub fn with_encoding(mut self, enc: EncodingFormat) -> Self {
        self.encoding = enc;
        self
    }

    /// Set the sample data and the declared sample count.
    pub fn with_samples(mut self, samples: Samples) -> Self {
        self.sample_count = samples.len() as u32;
        self.samples = samples;
        self
    }

    /// Set the record length (power of 2).
    pub fn with_record_length(mut self, len: u32) -> Self {
        self.record_length = len;
        self
    }

    pub fn with_time_correction(mut self, correction: i32, applied: bool) -> Self {
        self.time_correction = correction;
        if applied {
            self.activity_flags |= TIME_CORRECTION_APPLIED;
        } else {
            self.activity_flags &= !TIME_CORRECTION_APPLIED;
        }
        self
    }

    /// Return the NSLC identifier: `"NET.STA.LOC.CHA"`.
    pub fn nslc(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }

    pub fn identity(&self) -> Identity {
        Identity::new(
            &self.network,
            &self.station,
            &self.location,
            &self.channel,
            self.quality,
        )
    }

    /// Source name including quality, e.g. `IU_ANMO_00_BHZ_D`.
    pub fn srcname(&self) -> String {
        self.identity().srcname()
    }

    /// Whether the header time correction still has to be applied by readers.
    pub fn time_correction_pending(&self) -> bool {
        self.time_correction != 0 && self.activity_flags & TIME_CORRECTION_APPLIED == 0
    }

    /// Time of the last sample.
    pub fn end_time(&self) -> HpTime {
        if self.sample_rate <= 0.0 || self.sample_count == 0 {
            return self.start_time;
        }
        let span = (self.sample_count - 1) as f64 / self.sample_rate * NANOS_PER_SEC as f64;
        self.start_time.offset(span.round() as i64)
    }

    /// Sample period in nanoseconds, truncated; `None` for a zero rate.
    pub fn sample_period(&self) -> Option<i64> {
        if self.sample_rate > 0.0 {
            Some((NANOS_PER_SEC as f64 / self.sample_rate) as i64)
        } else {
            None
        }
    }
}

impl Default for MseedRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MseedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {} | {} Hz | {} samples ({}) | {} bytes",
            self.srcname(),
            self.start_time,
            self.sample_rate,
            self.sample_count,
            self.encoding,
            self.record_length,
        )
    }
}

/// Decoded sample data.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    Int(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Samples::Int(v) => v.len(),
            Samples::Float(v) => v.len(),
            Samples::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove the first `count` samples.
    pub fn drop_front(&mut self, count: usize) {
        match self {
            Samples::Int(v) => drop(v.drain(..count.min(v.len()))),
            Samples::Float(v) => drop(v.drain(..count.min(v.len()))),
            Samples::Double(v) => drop(v.drain(..count.min(v.len()))),
        }
    }

    /// Remove the last `count` samples.
    pub fn drop_back(&mut self, count: usize) {
        let keep = self.len().saturating_sub(count);
        match self {
            Samples::Int(v) => v.truncate(keep),
            Samples::Float(v) => v.truncate(keep),
            Samples::Double(v) => v.truncate(keep),
        }
    }
}
