//! Encode an [`MseedRecord`] into miniSEED v2 record bytes.
//!
//! The main entry point is [`encode()`], which serializes a record into a
//! single `Vec<u8>` of the configured record length. Records that came from
//! [`decode()`](crate::decode) keep their blockettes and raw header state, so
//! an untouched record encodes back to the same bytes.

use crate::decode::{FIXED_HEADER_SIZE, find_blockettes};
use crate::record::{MseedRecord, Samples};
use crate::types::{ByteOrder, EncodingFormat};
use crate::{MseedError, Result};

/// Encode a [`MseedRecord`] into exactly one miniSEED v2 record.
pub fn encode(record: &MseedRecord) -> Result<Vec<u8>> {
    let rec_len = record.record_length as usize;
    if !record.record_length.is_power_of_two() || !(128..=65536).contains(&rec_len) {
        return Err(MseedError::EncodeError(format!(
            "record length {rec_len} is not a power of 2 between 128 and 65536"
        )));
    }
    let rec_len_power = record.record_length.ilog2() as u8;

    let mut buf = vec![0u8; rec_len];

    // --- Fixed header (48 bytes) ---

    write_padded(&mut buf[0..6], &record.sequence_number, b' ');
    buf[6] = record.quality as u8;
    buf[7] = b' ';
    write_padded(&mut buf[8..13], &record.station, b' ');
    write_padded(&mut buf[13..15], &record.location, b' ');
    write_padded(&mut buf[15..18], &record.channel, b' ');
    write_padded(&mut buf[18..20], &record.network, b' ');

    // The header carries the time before any pending correction.
    let header_start = if record.time_correction_pending() {
        record
            .start_time
            .offset(-(record.time_correction as i64) * 100_000)
    } else {
        record.start_time
    };
    let nt = header_start.to_nanotime();
    let bt = nt.to_btime();
    let usec = ((nt.nanosecond % 100_000) / 1_000) as i8;

    buf[20..22].copy_from_slice(&bt.year.to_be_bytes());
    buf[22..24].copy_from_slice(&bt.day.to_be_bytes());
    buf[24] = bt.hour;
    buf[25] = bt.minute;
    buf[26] = bt.second;
    buf[28..30].copy_from_slice(&bt.fract.to_be_bytes());

    let num_samples = u16::try_from(record.samples.len()).map_err(|_| {
        MseedError::EncodeError(format!(
            "{} samples exceed the v2 header limit",
            record.samples.len()
        ))
    })?;
    buf[30..32].copy_from_slice(&num_samples.to_be_bytes());

    let (factor, multiplier) =
        if record.sample_rate_factor != 0 || record.sample_rate_multiplier != 0 {
            (record.sample_rate_factor, record.sample_rate_multiplier)
        } else {
            decompose_sample_rate(record.sample_rate)?
        };
    buf[32..34].copy_from_slice(&factor.to_be_bytes());
    buf[34..36].copy_from_slice(&multiplier.to_be_bytes());

    buf[36] = record.activity_flags;
    buf[37] = record.io_flags;
    buf[38] = record.dq_flags;
    buf[40..44].copy_from_slice(&record.time_correction.to_be_bytes());

    // --- Blockettes ---

    let (blockette_count, first_blockette, blockettes_end) = if record.blockettes.is_empty() {
        // Lone Blockette 1000 at offset 48
        buf[48..50].copy_from_slice(&1000u16.to_be_bytes());
        buf[50..52].copy_from_slice(&0u16.to_be_bytes());
        (1u8, FIXED_HEADER_SIZE as u16, FIXED_HEADER_SIZE + 8)
    } else {
        let end = FIXED_HEADER_SIZE + record.blockettes.len();
        if end > rec_len {
            return Err(MseedError::EncodeError(format!(
                "blockettes ({} bytes) exceed record length {rec_len}",
                record.blockettes.len()
            )));
        }
        buf[FIXED_HEADER_SIZE..end].copy_from_slice(&record.blockettes);
        (record.blockette_count, record.first_blockette, end)
    };
    buf[39] = blockette_count;
    buf[46..48].copy_from_slice(&first_blockette.to_be_bytes());

    let offsets = find_blockettes(&buf[..blockettes_end], first_blockette as usize)?;
    let b1000 = offsets.b1000;
    buf[b1000 + 4] = record.encoding.to_code();
    buf[b1000 + 5] = match record.byte_order {
        ByteOrder::Big => 1,
        ByteOrder::Little => 0,
    };
    buf[b1000 + 6] = rec_len_power;
    if let Some(b1001) = offsets.b1001 {
        buf[b1001 + 5] = usec as u8;
    }

    // --- Data section ---

    let encoded_data = if record.samples.is_empty() {
        Vec::new()
    } else {
        encode_data(&record.samples, record.encoding, record.byte_order)?
    };

    let data_offset = if record.data_offset as usize >= blockettes_end {
        record.data_offset as usize
    } else if encoded_data.is_empty() && record.data_offset == 0 && !record.blockettes.is_empty()
    {
        0
    } else {
        blockettes_end
    };
    buf[44..46].copy_from_slice(&(data_offset as u16).to_be_bytes());

    if data_offset + encoded_data.len() > rec_len {
        return Err(MseedError::EncodeError(format!(
            "encoded data ({} bytes) exceeds record capacity ({} bytes from offset {})",
            encoded_data.len(),
            rec_len.saturating_sub(data_offset),
            data_offset,
        )));
    }
    buf[data_offset..data_offset + encoded_data.len()].copy_from_slice(&encoded_data);

    Ok(buf)
}

fn write_padded(dest: &mut [u8], src: &str, pad: u8) {
    let bytes = src.as_bytes();
    for (i, slot) in dest.iter_mut().enumerate() {
        *slot = bytes.get(i).copied().unwrap_or(pad);
    }
}

/// Decompose a sample rate (Hz) into a header (factor, multiplier) pair.
pub(crate) fn decompose_sample_rate(rate: f64) -> Result<(i16, i16)> {
    if rate == 0.0 {
        return Ok((0, 0));
    }
    if !rate.is_finite() || rate < 0.0 {
        return Err(MseedError::EncodeError(format!(
            "sample rate {rate} cannot be represented"
        )));
    }

    if rate >= 1.0 && rate.fract() == 0.0 && rate <= i16::MAX as f64 {
        return Ok((rate as i16, 1));
    }
    let period = 1.0 / rate;
    if rate < 1.0 && period.fract() == 0.0 && period <= i16::MAX as f64 {
        // factor < 0: rate = 1 / -factor
        return Ok((-(period as i16), 1));
    }

    // rate = factor / -multiplier, searched for an exact integer ratio
    for divisor in 1..=10_000i32 {
        let scaled = rate * divisor as f64;
        if (scaled - scaled.round()).abs() < 1e-9 && scaled.round() <= i16::MAX as f64 {
            return Ok((scaled.round() as i16, -(divisor as i16)));
        }
    }
    Err(MseedError::EncodeError(format!(
        "sample rate {rate} cannot be represented"
    )))
}

pub(crate) fn encode_data(
    samples: &Samples,
    encoding: EncodingFormat,
    byte_order: ByteOrder,
) -> Result<Vec<u8>> {
    let mismatch = |kind: &str| {
        MseedError::EncodeError(format!("{encoding} encoding requires {kind} samples"))
    };

    let mut data = Vec::with_capacity(samples.len() * encoding.sample_size().unwrap_or(4));
    match (encoding, samples) {
        (EncodingFormat::Int16, Samples::Int(ints)) => {
            for &val in ints {
                let s = i16::try_from(val).map_err(|_| {
                    MseedError::EncodeError(format!("sample {val} does not fit INT16"))
                })?;
                match byte_order {
                    ByteOrder::Big => data.extend_from_slice(&s.to_be_bytes()),
                    ByteOrder::Little => data.extend_from_slice(&s.to_le_bytes()),
                }
            }
        }
        (EncodingFormat::Int32, Samples::Int(ints)) => {
            for &val in ints {
                match byte_order {
                    ByteOrder::Big => data.extend_from_slice(&val.to_be_bytes()),
                    ByteOrder::Little => data.extend_from_slice(&val.to_le_bytes()),
                }
            }
        }
        (EncodingFormat::Float32, Samples::Float(floats)) => {
            for &val in floats {
                match byte_order {
                    ByteOrder::Big => data.extend_from_slice(&val.to_be_bytes()),
                    ByteOrder::Little => data.extend_from_slice(&val.to_le_bytes()),
                }
            }
        }
        (EncodingFormat::Float64, Samples::Double(doubles)) => {
            for &val in doubles {
                match byte_order {
                    ByteOrder::Big => data.extend_from_slice(&val.to_be_bytes()),
                    ByteOrder::Little => data.extend_from_slice(&val.to_le_bytes()),
                }
            }
        }
        (EncodingFormat::Int16 | EncodingFormat::Int32, _) => return Err(mismatch("integer")),
        (EncodingFormat::Float32, _) => return Err(mismatch("float")),
        (EncodingFormat::Float64, _) => return Err(mismatch("double")),
        (other, _) => {
            return Err(MseedError::EncodeError(format!(
                "cannot pack {other} samples"
            )));
        }
    }
    Ok(data)
}
