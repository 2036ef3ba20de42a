//! Error types for the mesh-core crate.

use core::fmt;

/// Failure to decode a Lower Transport or provisioning PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PduError {
    Empty,
    TooShort { min: usize, actual: usize },
    TooLong { max: usize, actual: usize },
    InvalidLength { expected: usize, actual: usize },
    /// Segment offset greater than the last segment number.
    SegmentOffsetOutOfRange { seg_o: u8, seg_n: u8 },
    UnknownPduType(u8),
    InvalidValue { field: &'static str, value: u8 },
}

impl fmt::Display for PduError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PduError::Empty => write!(f, "empty PDU"),
            PduError::TooShort { min, actual } => {
                write!(f, "PDU too short: need at least {min} bytes, got {actual}")
            }
            PduError::TooLong { max, actual } => {
                write!(f, "PDU too long: at most {max} bytes, got {actual}")
            }
            PduError::InvalidLength { expected, actual } => {
                write!(f, "invalid PDU length: expected {expected}, got {actual}")
            }
            PduError::SegmentOffsetOutOfRange { seg_o, seg_n } => {
                write!(f, "segment offset {seg_o} exceeds last segment number {seg_n}")
            }
            PduError::UnknownPduType(v) => write!(f, "unknown PDU type: 0x{v:02x}"),
            PduError::InvalidValue { field, value } => {
                write!(f, "invalid {field}: 0x{value:02x}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PduError {}

/// A byte slice had the wrong length for a fixed-size field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidLength {
    pub expected: usize,
    pub actual: usize,
}

impl fmt::Display for InvalidLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid length: expected {} bytes, got {}",
            self.expected, self.actual
        )
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InvalidLength {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            PduError::TooShort { min: 5, actual: 2 }.to_string(),
            "PDU too short: need at least 5 bytes, got 2"
        );
        assert_eq!(
            PduError::SegmentOffsetOutOfRange { seg_o: 3, seg_n: 1 }.to_string(),
            "segment offset 3 exceeds last segment number 1"
        );
        assert_eq!(
            PduError::UnknownPduType(0x0A).to_string(),
            "unknown PDU type: 0x0a"
        );
        assert_eq!(
            InvalidLength {
                expected: 16,
                actual: 3
            }
            .to_string(),
            "invalid length: expected 16 bytes, got 3"
        );
    }
}
