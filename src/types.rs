//! Shared types: [`ByteOrder`] and [`EncodingFormat`].

use std::fmt;

/// Byte order for multi-byte fields in a miniSEED record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

/// Encoding format for sample data in a miniSEED v2 record.
///
/// Every code found in Blockette 1000 maps to a variant so that records with
/// payloads this crate cannot unpack still flow through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingFormat {
    /// ASCII text (code 0).
    Ascii,
    /// 16-bit signed integer (code 1).
    Int16,
    /// 32-bit signed integer (code 3).
    Int32,
    /// 32-bit IEEE float (code 4).
    Float32,
    /// 64-bit IEEE double (code 5).
    Float64,
    /// Steim-1 compressed integers (code 10).
    Steim1,
    /// Steim-2 compressed integers (code 11).
    Steim2,
    /// Any other code.
    Other(u8),
}

impl EncodingFormat {
    /// Convert a raw encoding code (from Blockette 1000) to an `EncodingFormat`.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Ascii,
            1 => Self::Int16,
            3 => Self::Int32,
            4 => Self::Float32,
            5 => Self::Float64,
            10 => Self::Steim1,
            11 => Self::Steim2,
            other => Self::Other(other),
        }
    }

    /// Convert to the raw encoding code for Blockette 1000.
    pub fn to_code(self) -> u8 {
        match self {
            Self::Ascii => 0,
            Self::Int16 => 1,
            Self::Int32 => 3,
            Self::Float32 => 4,
            Self::Float64 => 5,
            Self::Steim1 => 10,
            Self::Steim2 => 11,
            Self::Other(code) => code,
        }
    }

    /// Whether samples in this encoding can be unpacked and packed again
    /// without loss.
    pub fn is_repackable(self) -> bool {
        matches!(
            self,
            Self::Int16 | Self::Int32 | Self::Float32 | Self::Float64
        )
    }

    /// Size in bytes of one encoded sample, for fixed-width encodings.
    pub fn sample_size(self) -> Option<usize> {
        match self {
            Self::Int16 => Some(2),
            Self::Int32 | Self::Float32 => Some(4),
            Self::Float64 => Some(8),
            _ => None,
        }
    }
}

impl fmt::Display for EncodingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascii => write!(f, "ASCII"),
            Self::Int16 => write!(f, "INT16"),
            Self::Int32 => write!(f, "INT32"),
            Self::Float32 => write!(f, "FLOAT32"),
            Self::Float64 => write!(f, "FLOAT64"),
            Self::Steim1 => write!(f, "Steim1"),
            Self::Steim2 => write!(f, "Steim2"),
            Self::Other(code) => write!(f, "unknown ({code})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_roundtrip() {
        for code in [0u8, 1, 3, 4, 5, 10, 11, 19] {
            assert_eq!(EncodingFormat::from_code(code).to_code(), code);
        }
        assert_eq!(EncodingFormat::from_code(19), EncodingFormat::Other(19));
    }

    #[test]
    fn test_repackable() {
        assert!(EncodingFormat::Int16.is_repackable());
        assert!(EncodingFormat::Float64.is_repackable());
        assert!(!EncodingFormat::Ascii.is_repackable());
        assert!(!EncodingFormat::Steim2.is_repackable());
        assert!(!EncodingFormat::Other(30).is_repackable());
    }
}
