//! Timestamps for miniSEED records and selection criteria.
//!
//! [`NanoTime`] mirrors the calendar layout of a record header (year +
//! day-of-year + time of day). [`HpTime`] is the linear form used for all
//! comparisons and arithmetic: signed nanoseconds since 1970-01-01 UTC.
//! The legacy [`BTime`] is the 10-byte on-disk layout with 0.0001 s
//! resolution.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::error::{FilterError, FilterResult};

/// Nanoseconds per second.
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Nanosecond-precision calendar timestamp (year + day-of-year + time).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NanoTime {
    pub year: u16,
    pub day: u16,        // 1-366
    pub hour: u8,        // 0-23
    pub minute: u8,      // 0-59
    pub second: u8,      // 0-60 (60 for leap second)
    pub nanosecond: u32, // 0-999_999_999
}

impl NanoTime {
    /// Create a NanoTime with default epoch (1970-001 00:00:00.000000000).
    pub fn epoch() -> Self {
        Self {
            year: 1970,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
            nanosecond: 0,
        }
    }

    /// Create a NanoTime from a legacy [`BTime`] value.
    pub fn from_btime(bt: &BTime) -> Self {
        Self {
            year: bt.year,
            day: bt.day,
            hour: bt.hour,
            minute: bt.minute,
            second: bt.second,
            nanosecond: bt.fract as u32 * 100_000,
        }
    }

    /// Convert to a legacy [`BTime`] value, truncating to 0.0001 s.
    pub fn to_btime(self) -> BTime {
        BTime {
            year: self.year,
            day: self.day,
            hour: self.hour,
            minute: self.minute,
            second: self.second,
            fract: (self.nanosecond / 100_000) as u16,
        }
    }

    /// Linear time, or `None` when the calendar fields are out of range.
    pub fn to_hptime(self) -> Option<HpTime> {
        if self.hour > 23 || self.minute > 59 || self.second > 60 || self.nanosecond >= 1_000_000_000
        {
            return None;
        }
        let date = NaiveDate::from_yo_opt(self.year as i32, self.day as u32)?;
        // A leap second is counted as one second past :59.
        let (second, leap) = if self.second == 60 {
            (59, NANOS_PER_SEC)
        } else {
            (self.second as u32, 0)
        };
        let base = date
            .and_hms_opt(self.hour as u32, self.minute as u32, second)?
            .and_utc()
            .timestamp_nanos_opt()?;
        Some(HpTime(base + leap + self.nanosecond as i64))
    }
}

impl Default for NanoTime {
    fn default() -> Self {
        Self::epoch()
    }
}

impl fmt::Display for NanoTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:03} {:02}:{:02}:{:02}.{:09}",
            self.year, self.day, self.hour, self.minute, self.second, self.nanosecond
        )
    }
}

impl From<BTime> for NanoTime {
    fn from(bt: BTime) -> Self {
        Self::from_btime(&bt)
    }
}

/// Legacy BTIME timestamp (10 bytes in the miniSEED v2 fixed header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTime {
    pub year: u16,
    pub day: u16,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub fract: u16, // 0.0001 second units
}

impl fmt::Display for BTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:03} {:02}:{:02}:{:02}.{:04}",
            self.year, self.day, self.hour, self.minute, self.second, self.fract
        )
    }
}

/// High-precision linear time: nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HpTime(i64);

impl HpTime {
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * NANOS_PER_SEC)
    }

    pub const fn nanos(self) -> i64 {
        self.0
    }

    /// Shift by a signed number of nanoseconds.
    pub const fn offset(self, nanos: i64) -> Self {
        Self(self.0 + nanos)
    }

    /// Calendar form in year + day-of-year layout.
    pub fn to_nanotime(self) -> NanoTime {
        let dt = DateTime::from_timestamp_nanos(self.0);
        NanoTime {
            year: dt.year() as u16,
            day: dt.ordinal() as u16,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
            nanosecond: dt.nanosecond(),
        }
    }

    /// Render as `YYYY,DDD,HH:MM:SS.FFFFFF`.
    pub fn seed_string(self) -> String {
        let nt = self.to_nanotime();
        format!(
            "{:04},{:03},{:02}:{:02}:{:02}.{:06}",
            nt.year,
            nt.day,
            nt.hour,
            nt.minute,
            nt.second,
            nt.nanosecond / 1_000
        )
    }

    /// Parse a time string.
    ///
    /// Accepts the SEED form `YYYY[,DDD,HH,MM,SS.FFFFFF]`, where fields may be
    /// separated by `,`, `:` or `.` and the fraction, if any, follows a `.`.
    /// Calendar forms `YYYY-MM-DD[THH:MM:SS[.FFFFFF]]` are accepted as well.
    pub fn parse(text: &str) -> FilterResult<Self> {
        let text = text.trim();
        let invalid = |why: &str| FilterError::parse("time", format!("'{text}': {why}"));

        if text.len() > 4 && text.as_bytes()[4] == b'-' {
            return parse_calendar(text).ok_or_else(|| invalid("unrecognized calendar time"));
        }

        let mut fields: Vec<&str> = Vec::with_capacity(6);
        let mut rest = text;
        while let Some(pos) = rest.find([',', ':', '.']) {
            fields.push(&rest[..pos]);
            // Everything after the fifth delimiter is the fraction.
            if fields.len() == 5 {
                if rest.as_bytes()[pos] != b'.' {
                    return Err(invalid("fractional seconds must follow '.'"));
                }
                rest = &rest[pos + 1..];
                break;
            }
            rest = &rest[pos + 1..];
        }
        fields.push(rest);

        if fields.len() > 6 || fields.iter().any(|f| f.is_empty()) {
            return Err(invalid("expected YYYY[,DDD,HH,MM,SS.FFFFFF]"));
        }
        if fields
            .iter()
            .any(|f| !f.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(invalid("non-numeric field"));
        }

        let num = |idx: usize, default: u32| -> FilterResult<u32> {
            match fields.get(idx) {
                Some(f) => f.parse::<u32>().map_err(|_| invalid("field out of range")),
                None => Ok(default),
            }
        };

        let year = num(0, 1970)?;
        let day = num(1, 1)?;
        let hour = num(2, 0)?;
        let minute = num(3, 0)?;
        let second = num(4, 0)?;
        let nanosecond = match fields.get(5) {
            Some(fract) if fract.len() > 9 => {
                return Err(invalid("more than 9 fractional digits"));
            }
            Some(fract) => {
                let digits: u32 = fract.parse().map_err(|_| invalid("bad fraction"))?;
                digits * 10u32.pow(9 - fract.len() as u32)
            }
            None => 0,
        };

        if !(1678..=2261).contains(&year) {
            return Err(invalid("year out of range"));
        }
        if day > 366 || hour > 23 || minute > 59 || second > 60 {
            return Err(invalid("field out of range"));
        }

        NanoTime {
            year: year as u16,
            day: day as u16,
            hour: hour as u8,
            minute: minute as u8,
            second: second as u8,
            nanosecond,
        }
        .to_hptime()
        .ok_or_else(|| invalid("day out of range for year"))
    }
}

impl fmt::Display for HpTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.seed_string())
    }
}

fn parse_calendar(text: &str) -> Option<HpTime> {
    const FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    let dt = FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    dt.and_utc().timestamp_nanos_opt().map(HpTime)
}
