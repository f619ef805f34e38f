//! Decode miniSEED v2 records from raw bytes.
//!
//! [`decode_header()`] parses the fixed header and blockettes only, which is
//! all selection and dispatch need. [`decode()`] also unpacks the samples,
//! which only trimming needs. For multi-record input, see
//! [`MseedReader`](crate::MseedReader).

use crate::record::{MseedRecord, Samples};
use crate::time::{BTime, NanoTime};
use crate::types::{ByteOrder, EncodingFormat};
use crate::{MseedError, Result};

/// Size of the fixed section of a data header.
pub const FIXED_HEADER_SIZE: usize = 48;

const BLOCKETTE_1000: u16 = 1000;
const BLOCKETTE_1001: u16 = 1001;

/// Location of a blockette in the record, as absolute byte offsets.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlocketteOffsets {
    pub b1000: usize,
    pub b1001: Option<usize>,
    /// End of the furthest blockette seen while walking the chain.
    pub end: usize,
}

/// Decode a record header without unpacking the samples.
pub fn decode_header(data: &[u8]) -> Result<MseedRecord> {
    if data.len() < FIXED_HEADER_SIZE {
        return Err(MseedError::RecordTooShort {
            expected: FIXED_HEADER_SIZE,
            actual: data.len(),
        });
    }
    validate_fixed_header(data)?;

    let sequence_number = ascii_field(&data[0..6], "sequence number")?.to_string();
    let quality = data[6] as char;
    let station = ascii_field(&data[8..13], "station")?.trim().to_string();
    let location = ascii_field(&data[13..15], "location")?.trim().to_string();
    let channel = ascii_field(&data[15..18], "channel")?.trim().to_string();
    let network = ascii_field(&data[18..20], "network")?.trim().to_string();

    // BTIME (bytes 20-29), byte 27 is unused
    let btime = BTime {
        year: be_u16(data, 20),
        day: be_u16(data, 22),
        hour: data[24],
        minute: data[25],
        second: data[26],
        fract: be_u16(data, 28),
    };

    let sample_count = be_u16(data, 30) as u32;
    let sample_rate_factor = be_u16(data, 32) as i16;
    let sample_rate_multiplier = be_u16(data, 34) as i16;
    let activity_flags = data[36];
    let io_flags = data[37];
    let dq_flags = data[38];
    let blockette_count = data[39];
    let time_correction = i32::from_be_bytes([data[40], data[41], data[42], data[43]]);
    let data_offset = be_u16(data, 44);
    let first_blockette = be_u16(data, 46);

    let offsets = find_blockettes(data, first_blockette as usize)?;
    let b1000 = offsets.b1000;
    let encoding = EncodingFormat::from_code(data[b1000 + 4]);
    let byte_order = if data[b1000 + 5] == 0 {
        ByteOrder::Little
    } else {
        ByteOrder::Big
    };
    let record_length_power = data[b1000 + 6];
    if !(7..=16).contains(&record_length_power) {
        return Err(MseedError::InvalidHeader(format!(
            "record length exponent {record_length_power} out of range"
        )));
    }
    let record_length = 1u32 << record_length_power;

    let mut start_time = NanoTime::from_btime(&btime)
        .to_hptime()
        .ok_or_else(|| MseedError::InvalidHeader(format!("invalid start time {btime}")))?;
    if let Some(b1001) = offsets.b1001 {
        let usec = data[b1001 + 5] as i8;
        start_time = start_time.offset(usec as i64 * 1_000);
    }

    let blockettes_end = if data_offset as usize >= FIXED_HEADER_SIZE {
        data_offset as usize
    } else {
        offsets.end
    };
    if blockettes_end > data.len() || blockettes_end > record_length as usize {
        return Err(MseedError::InvalidHeader(format!(
            "data offset {blockettes_end} beyond record end"
        )));
    }
    let blockettes = data[FIXED_HEADER_SIZE..blockettes_end].to_vec();

    let mut record = MseedRecord {
        sequence_number,
        quality,
        network,
        station,
        location,
        channel,
        start_time,
        sample_rate: compute_sample_rate(sample_rate_factor, sample_rate_multiplier),
        sample_count,
        encoding,
        samples: Samples::Int(vec![]),
        sample_rate_factor,
        sample_rate_multiplier,
        activity_flags,
        io_flags,
        dq_flags,
        time_correction,
        byte_order,
        record_length,
        data_offset,
        blockette_count,
        first_blockette,
        blockettes,
    };

    if record.time_correction_pending() {
        record.start_time = record
            .start_time
            .offset(record.time_correction as i64 * 100_000);
    }

    Ok(record)
}

/// Decode a single miniSEED v2 record, unpacking its samples.
///
/// Fails with [`MseedError::UnsupportedEncoding`] for payloads that are not
/// fixed-width integers or floats.
pub fn decode(data: &[u8]) -> Result<MseedRecord> {
    let mut record = decode_header(data)?;
    let rec_len = record.record_length as usize;
    if data.len() < rec_len {
        return Err(MseedError::RecordTooShort {
            expected: rec_len,
            actual: data.len(),
        });
    }

    let num_samples = record.sample_count as usize;
    if num_samples > 0 {
        let offset = record.data_offset as usize;
        if offset < FIXED_HEADER_SIZE {
            return Err(MseedError::InvalidHeader(format!(
                "data offset {offset} inside fixed header"
            )));
        }
        record.samples = decode_data(
            &data[offset..rec_len],
            record.encoding,
            num_samples,
            record.byte_order,
        )?;
    } else {
        record.samples = empty_samples(record.encoding);
    }

    Ok(record)
}

/// Determine a record's total length from its Blockette 1000.
pub fn record_length(data: &[u8]) -> Result<usize> {
    if data.len() < FIXED_HEADER_SIZE {
        return Err(MseedError::RecordTooShort {
            expected: FIXED_HEADER_SIZE,
            actual: data.len(),
        });
    }
    validate_fixed_header(data)?;
    let offsets = find_blockettes(data, be_u16(data, 46) as usize)?;
    let power = data[offsets.b1000 + 6];
    if !(7..=16).contains(&power) {
        return Err(MseedError::InvalidHeader(format!(
            "record length exponent {power} out of range"
        )));
    }
    Ok(1usize << power)
}

fn validate_fixed_header(data: &[u8]) -> Result<()> {
    if !data[0..6].iter().all(|&b| b.is_ascii_digit() || b == b' ' || b == 0) {
        return Err(MseedError::InvalidHeader("bad sequence number".into()));
    }
    if !matches!(data[6], b'D' | b'R' | b'Q' | b'M') {
        return Err(MseedError::InvalidHeader(format!(
            "bad quality indicator {:?}",
            data[6] as char
        )));
    }
    if !matches!(data[7], b' ' | 0) {
        return Err(MseedError::InvalidHeader("bad reserved byte".into()));
    }
    if data[24] > 23 || data[25] > 59 || data[26] > 60 {
        return Err(MseedError::InvalidHeader("bad start time".into()));
    }
    Ok(())
}

fn ascii_field<'a>(bytes: &'a [u8], name: &str) -> Result<&'a str> {
    std::str::from_utf8(bytes)
        .map(|s| s.trim_end_matches('\0'))
        .map_err(|_| MseedError::InvalidHeader(format!("non-ASCII {name}")))
}

fn be_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

pub(crate) fn compute_sample_rate(factor: i16, multiplier: i16) -> f64 {
    if factor == 0 || multiplier == 0 {
        return 0.0;
    }
    let f = factor as f64;
    let m = multiplier as f64;
    match (factor > 0, multiplier > 0) {
        (true, true) => f * m,
        (true, false) => -f / m,
        (false, true) => -m / f,
        (false, false) => 1.0 / (f * m),
    }
}

/// Walk the blockette chain, locating Blockettes 1000 and 1001.
pub(crate) fn find_blockettes(data: &[u8], first: usize) -> Result<BlocketteOffsets> {
    let mut offset = first;
    let mut b1000 = None;
    let mut b1001 = None;
    let mut end = FIXED_HEADER_SIZE;

    // Offsets must increase, so corrupt chains cannot loop.
    while offset >= FIXED_HEADER_SIZE && offset + 4 <= data.len() {
        let blockette_type = be_u16(data, offset);
        let next = be_u16(data, offset + 2) as usize;
        match blockette_type {
            BLOCKETTE_1000 if offset + 8 <= data.len() => b1000 = Some(offset),
            BLOCKETTE_1001 if offset + 8 <= data.len() => b1001 = Some(offset),
            _ => {}
        }
        if matches!(blockette_type, BLOCKETTE_1000 | BLOCKETTE_1001) {
            end = end.max(offset + 8);
        }
        if next == 0 || next <= offset {
            break;
        }
        end = end.max(next);
        offset = next;
    }

    let b1000 = b1000.ok_or(MseedError::MissingBlockette1000)?;
    Ok(BlocketteOffsets { b1000, b1001, end })
}

fn empty_samples(encoding: EncodingFormat) -> Samples {
    match encoding {
        EncodingFormat::Float32 => Samples::Float(vec![]),
        EncodingFormat::Float64 => Samples::Double(vec![]),
        _ => Samples::Int(vec![]),
    }
}

pub(crate) fn decode_data(
    data: &[u8],
    encoding: EncodingFormat,
    num_samples: usize,
    byte_order: ByteOrder,
) -> Result<Samples> {
    let size = match encoding.sample_size() {
        Some(size) if encoding.is_repackable() => size,
        _ => return Err(MseedError::UnsupportedEncoding(encoding.to_code())),
    };
    let needed = num_samples * size;
    if data.len() < needed {
        return Err(MseedError::RecordTooShort {
            expected: needed,
            actual: data.len(),
        });
    }
    let words = data[..needed].chunks_exact(size);

    let samples = match encoding {
        EncodingFormat::Int16 => Samples::Int(
            words
                .map(|w| {
                    let bytes = [w[0], w[1]];
                    let value = match byte_order {
                        ByteOrder::Big => i16::from_be_bytes(bytes),
                        ByteOrder::Little => i16::from_le_bytes(bytes),
                    };
                    value as i32
                })
                .collect(),
        ),
        EncodingFormat::Int32 => Samples::Int(
            words
                .map(|w| {
                    let bytes = [w[0], w[1], w[2], w[3]];
                    match byte_order {
                        ByteOrder::Big => i32::from_be_bytes(bytes),
                        ByteOrder::Little => i32::from_le_bytes(bytes),
                    }
                })
                .collect(),
        ),
        EncodingFormat::Float32 => Samples::Float(
            words
                .map(|w| {
                    let bytes = [w[0], w[1], w[2], w[3]];
                    match byte_order {
                        ByteOrder::Big => f32::from_be_bytes(bytes),
                        ByteOrder::Little => f32::from_le_bytes(bytes),
                    }
                })
                .collect(),
        ),
        EncodingFormat::Float64 => Samples::Double(
            words
                .map(|w| {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(w);
                    match byte_order {
                        ByteOrder::Big => f64::from_be_bytes(bytes),
                        ByteOrder::Little => f64::from_le_bytes(bytes),
                    }
                })
                .collect(),
        ),
        other => return Err(MseedError::UnsupportedEncoding(other.to_code())),
    };

    if samples.len() != num_samples {
        return Err(MseedError::SampleCountMismatch {
            expected: num_samples,
            actual: samples.len(),
        });
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode;
    use crate::time::HpTime;

    fn sample_record() -> MseedRecord {
        MseedRecord::new()
            .with_nslc("XX", "TEST", "00", "BHZ")
            .with_start_time(HpTime::parse("2025,100,12:30:45.1234").unwrap())
            .with_sample_rate(20.0)
            .with_samples(Samples::Int(vec![1, -2, 3, -4, 100_000, -100_000]))
    }

    #[test]
    fn test_header_fields() {
        let bytes = encode(&sample_record()).unwrap();
        let rec = decode_header(&bytes).unwrap();

        assert_eq!(rec.network, "XX");
        assert_eq!(rec.station, "TEST");
        assert_eq!(rec.location, "00");
        assert_eq!(rec.channel, "BHZ");
        assert_eq!(rec.quality, 'D');
        assert_eq!(rec.sample_rate, 20.0);
        assert_eq!(rec.sample_count, 6);
        assert_eq!(rec.record_length, 512);
        assert_eq!(rec.encoding, EncodingFormat::Int32);
        assert_eq!(rec.start_time.seed_string(), "2025,100,12:30:45.123400");
        assert!(rec.samples.is_empty());
    }

    #[test]
    fn test_decode_samples() {
        let bytes = encode(&sample_record()).unwrap();
        let rec = decode(&bytes).unwrap();
        assert_eq!(
            rec.samples,
            Samples::Int(vec![1, -2, 3, -4, 100_000, -100_000])
        );
    }

    #[test]
    fn test_pending_time_correction_applied_on_read() {
        let start = HpTime::parse("2025,100,00:00:00").unwrap();
        let rec = sample_record()
            .with_start_time(start)
            .with_time_correction(5_000, false);
        let bytes = encode(&rec).unwrap();

        // Header BTIME carries the uncorrected time.
        assert_eq!(&bytes[24..27], &[23, 59, 59]);

        let decoded = decode_header(&bytes).unwrap();
        assert_eq!(decoded.start_time, start);
    }

    #[test]
    fn test_rejects_bad_quality() {
        let mut bytes = encode(&sample_record()).unwrap();
        bytes[6] = b'X';
        assert!(matches!(
            decode_header(&bytes),
            Err(MseedError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_missing_blockette_1000() {
        let mut bytes = encode(&sample_record()).unwrap();
        bytes[48..50].copy_from_slice(&500u16.to_be_bytes());
        assert!(matches!(
            decode_header(&bytes),
            Err(MseedError::MissingBlockette1000)
        ));
    }

    #[test]
    fn test_opaque_payload_header_only() {
        let mut bytes = encode(&sample_record()).unwrap();
        // Relabel the payload as Steim2.
        bytes[52] = 11;
        let rec = decode_header(&bytes).unwrap();
        assert_eq!(rec.encoding, EncodingFormat::Steim2);
        assert!(matches!(
            decode(&bytes),
            Err(MseedError::UnsupportedEncoding(11))
        ));
    }

    #[test]
    fn test_sample_rate_factors() {
        assert_eq!(compute_sample_rate(20, 1), 20.0);
        assert_eq!(compute_sample_rate(-10, 1), 0.1);
        assert_eq!(compute_sample_rate(25, -10), 2.5);
        assert_eq!(compute_sample_rate(0, 0), 0.0);
    }

    #[test]
    fn test_record_length_peek() {
        let bytes = encode(&sample_record().with_record_length(4096)).unwrap();
        assert_eq!(record_length(&bytes).unwrap(), 4096);
    }
}
