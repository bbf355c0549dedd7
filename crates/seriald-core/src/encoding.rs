//! Text encodings for socket data and serial payloads.
//!
//! Requests are decoded from socket bytes before framing, payloads are
//! encoded back to bytes before they reach the serial device, and replies
//! are decoded to measure their length in strict reply mode.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Encoding applied to data read from and sent to the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataEncoding {
    #[default]
    Utf8,
    Ascii,
    /// ISO-8859-1: every byte maps to the code point of the same value.
    Latin1,
}

impl DataEncoding {
    /// Canonical name, as accepted by [`DataEncoding::from_str`].
    pub fn name(&self) -> &'static str {
        match self {
            DataEncoding::Utf8 => "utf-8",
            DataEncoding::Ascii => "ascii",
            DataEncoding::Latin1 => "latin-1",
        }
    }

    /// Decodes `bytes` into text.
    pub fn decode(&self, bytes: &[u8]) -> Result<String, EncodingError> {
        match self {
            DataEncoding::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|e| {
                EncodingError::Decode {
                    encoding: self.name(),
                    position: e.utf8_error().valid_up_to(),
                }
            }),
            DataEncoding::Ascii => match bytes.iter().position(|b| !b.is_ascii()) {
                Some(position) => Err(EncodingError::Decode {
                    encoding: self.name(),
                    position,
                }),
                None => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            },
            DataEncoding::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }

    /// Encodes `text` into bytes.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>, EncodingError> {
        match self {
            DataEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            DataEncoding::Ascii => narrow(text, 0x7F, self.name()),
            DataEncoding::Latin1 => narrow(text, 0xFF, self.name()),
        }
    }
}

fn narrow(text: &str, max: u32, encoding: &'static str) -> Result<Vec<u8>, EncodingError> {
    text.chars()
        .enumerate()
        .map(|(position, c)| {
            u8::try_from(u32::from(c))
                .ok()
                .filter(|&b| u32::from(b) <= max)
                .ok_or(EncodingError::Encode {
                    encoding,
                    position,
                    character: c,
                })
        })
        .collect()
}

impl fmt::Display for DataEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataEncoding {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match normalized.as_str() {
            "utf8" => Ok(DataEncoding::Utf8),
            "ascii" | "usascii" => Ok(DataEncoding::Ascii),
            "latin1" | "l1" | "iso88591" => Ok(DataEncoding::Latin1),
            _ => Err(EncodingError::Unknown(s.to_string())),
        }
    }
}

/// Errors raised by [`DataEncoding`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Unknown encoding: {0}")]
    Unknown(String),

    #[error("Cannot decode data as {encoding}: invalid byte at position {position}")]
    Decode {
        encoding: &'static str,
        position: usize,
    },

    #[error("Cannot encode {character:?} at position {position} as {encoding}")]
    Encode {
        encoding: &'static str,
        position: usize,
        character: char,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("UTF-8".parse::<DataEncoding>().unwrap(), DataEncoding::Utf8);
        assert_eq!("utf_8".parse::<DataEncoding>().unwrap(), DataEncoding::Utf8);
        assert_eq!("US-ASCII".parse::<DataEncoding>().unwrap(), DataEncoding::Ascii);
        assert_eq!("iso-8859-1".parse::<DataEncoding>().unwrap(), DataEncoding::Latin1);
        assert!("ebcdic".parse::<DataEncoding>().is_err());
    }

    #[test]
    fn test_utf8_decode_rejects_invalid() {
        let err = DataEncoding::Utf8.decode(&[b'2', 0xFF, b'1']).unwrap_err();
        assert_eq!(
            err,
            EncodingError::Decode {
                encoding: "utf-8",
                position: 1
            }
        );
    }

    #[test]
    fn test_ascii_rejects_high_bytes() {
        assert!(DataEncoding::Ascii.decode(&[0x41, 0x80]).is_err());
        assert!(DataEncoding::Ascii.encode("caf\u{e9}").is_err());
        assert_eq!(DataEncoding::Ascii.encode("8921").unwrap(), b"8921".to_vec());
    }

    #[test]
    fn test_latin1_maps_every_byte() {
        let bytes: Vec<u8> = (0..=255).collect();
        let text = DataEncoding::Latin1.decode(&bytes).unwrap();
        assert_eq!(text.chars().count(), 256);
        assert_eq!(DataEncoding::Latin1.encode(&text).unwrap(), bytes);
        assert!(DataEncoding::Latin1.encode("\u{20ac}").is_err());
    }

    #[test]
    fn test_display_roundtrips_through_from_str() {
        for enc in [DataEncoding::Utf8, DataEncoding::Ascii, DataEncoding::Latin1] {
            assert_eq!(enc.to_string().parse::<DataEncoding>().unwrap(), enc);
        }
    }
}
