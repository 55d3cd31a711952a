//! Sample records and the ASCII line format they arrive in
//!
//! The device emits one comma separated line per sample period. Two schemas
//! are accepted and told apart purely by field count:
//!
//! - 4 fields: `pcg,red,ir,ecg`
//! - 5 fields: `timestamp,pcg,red,ir,ecg`
//!
//! The timestamp unit depends on the source (device microsecond counter or
//! host millisecond clock); see [`TimestampUnit`].

use crate::error::{VsmError, VsmResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest token echoed back in an [`VsmError::InvalidToken`]
const MAX_TOKEN_ECHO: usize = 16;

/// Acquisition channels carried by every sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Phonocardiogram (microphone)
    Pcg,
    /// Photoplethysmogram, red LED
    Red,
    /// Photoplethysmogram, infra-red LED
    Ir,
    /// Electrocardiogram
    Ecg,
}

impl Channel {
    /// All channels in wire order
    pub const ALL: [Channel; 4] = [Channel::Pcg, Channel::Red, Channel::Ir, Channel::Ecg];

    /// Position of this channel in per-channel arrays
    pub fn index(self) -> usize {
        match self {
            Channel::Pcg => 0,
            Channel::Red => 1,
            Channel::Ir => 2,
            Channel::Ecg => 3,
        }
    }

    /// Lowercase channel label
    pub fn label(self) -> &'static str {
        match self {
            Channel::Pcg => "pcg",
            Channel::Red => "red",
            Channel::Ir => "ir",
            Channel::Ecg => "ecg",
        }
    }

    /// Whether this is one of the optical channels
    pub fn is_ppg(self) -> bool {
        matches!(self, Channel::Red | Channel::Ir)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Unit of the optional timestamp field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampUnit {
    /// Device-side microsecond counter
    Microseconds,
    /// Host-side millisecond clock
    Milliseconds,
    /// Source does not say
    #[default]
    Unspecified,
}

/// One decoded record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Source timestamp, present only in the 5-field schema
    pub timestamp: Option<i64>,
    /// Phonocardiogram value
    pub pcg: i32,
    /// Red PPG value
    pub red: i32,
    /// Infra-red PPG value
    pub ir: i32,
    /// ECG value
    pub ecg: i32,
}

impl Sample {
    /// Create a sample without a timestamp
    pub fn new(pcg: i32, red: i32, ir: i32, ecg: i32) -> Self {
        Sample {
            timestamp: None,
            pcg,
            red,
            ir,
            ecg,
        }
    }

    /// Attach a source timestamp
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Value carried for one channel
    pub fn value(&self, channel: Channel) -> i32 {
        match channel {
            Channel::Pcg => self.pcg,
            Channel::Red => self.red,
            Channel::Ir => self.ir,
            Channel::Ecg => self.ecg,
        }
    }

    /// Format as a wire line (without the trailing newline)
    pub fn to_line(&self) -> String {
        match self.timestamp {
            Some(ts) => format!("{},{},{},{},{}", ts, self.pcg, self.red, self.ir, self.ecg),
            None => format!("{},{},{},{}", self.pcg, self.red, self.ir, self.ecg),
        }
    }
}

/// Parse one decoded line.
///
/// Leading/trailing whitespace (including `\r`) is ignored, as is whitespace
/// around each token. Callers are expected to filter blank lines beforehand;
/// a blank line here is reported as a one-field line.
pub fn parse_line(line: &str) -> VsmResult<Sample> {
    let line = line.trim();
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();

    match fields.len() {
        4 => Ok(Sample::new(
            parse_field(&fields, 0)?,
            parse_field(&fields, 1)?,
            parse_field(&fields, 2)?,
            parse_field(&fields, 3)?,
        )),
        5 => {
            let timestamp = parse_field::<i64>(&fields, 0)?;
            Ok(Sample::new(
                parse_field(&fields, 1)?,
                parse_field(&fields, 2)?,
                parse_field(&fields, 3)?,
                parse_field(&fields, 4)?,
            )
            .with_timestamp(timestamp))
        }
        found => Err(VsmError::FieldCount { found }),
    }
}

/// Parse one raw line as received from a byte transport
pub fn parse_bytes(bytes: &[u8]) -> VsmResult<Sample> {
    let line = std::str::from_utf8(bytes).map_err(|_| VsmError::InvalidEncoding)?;
    parse_line(line)
}

fn parse_field<T: std::str::FromStr>(fields: &[&str], position: usize) -> VsmResult<T> {
    let token = fields[position];
    token.parse::<T>().map_err(|_| VsmError::InvalidToken {
        position,
        token: token.chars().take(MAX_TOKEN_ECHO).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_four_fields() {
        let sample = parse_line("100,2000,2100,300").unwrap();
        assert_eq!(sample, Sample::new(100, 2000, 2100, 300));
        assert_eq!(sample.timestamp, None);
    }

    #[test]
    fn test_parse_five_fields() {
        let sample = parse_line("12345,100,2000,2100,300\r\n").unwrap();
        assert_eq!(sample.timestamp, Some(12345));
        assert_eq!(sample.value(Channel::Pcg), 100);
        assert_eq!(sample.value(Channel::Red), 2000);
        assert_eq!(sample.value(Channel::Ir), 2100);
        assert_eq!(sample.value(Channel::Ecg), 300);
    }

    #[test]
    fn test_parse_negative_and_padded() {
        let sample = parse_line(" -5 , -120000, 98000 ,97000,2048").unwrap();
        assert_eq!(sample.timestamp, Some(-5));
        assert_eq!(sample.red, 98000);
        assert_eq!(sample.pcg, -120000);
    }

    #[test]
    fn test_wrong_field_count() {
        assert_eq!(parse_line("x,y"), Err(VsmError::FieldCount { found: 2 }));
        assert_eq!(
            parse_line("1,2,3,4,5,6"),
            Err(VsmError::FieldCount { found: 6 })
        );
    }

    #[test]
    fn test_non_integer_token() {
        let err = parse_line("1,2,abc,4").unwrap_err();
        assert_eq!(
            err,
            VsmError::InvalidToken {
                position: 2,
                token: "abc".to_string()
            }
        );

        // Floats are not accepted either
        assert!(parse_line("1,2,3,4.5").is_err());
        // Empty tokens
        assert!(parse_line("1,,3,4").is_err());
    }

    #[test]
    fn test_parse_bytes_rejects_invalid_utf8() {
        assert_eq!(
            parse_bytes(&[0xff, b',', b'1']),
            Err(VsmError::InvalidEncoding)
        );
        assert!(parse_bytes(b"1,2,3,4\n").is_ok());
    }

    #[test]
    fn test_line_formatting_matches_parser() {
        let sample = Sample::new(1, 2, 3, 4).with_timestamp(99);
        assert_eq!(sample.to_line(), "99,1,2,3,4");
        assert_eq!(parse_line(&sample.to_line()).unwrap(), sample);
    }

    #[test]
    fn test_channel_indices_are_dense() {
        for (i, channel) in Channel::ALL.iter().enumerate() {
            assert_eq!(channel.index(), i);
        }
        assert!(Channel::Red.is_ppg());
        assert!(!Channel::Ecg.is_ppg());
    }
}
