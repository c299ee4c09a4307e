//! Decoding of `application/x-www-form-urlencoded` query components.
//!
//! - `+` decodes to a space
//! - `%XX` decodes to one byte
//! - a multi-byte UTF-8 character is consumed as a whole run of `%XX`
//!   triplets, its length taken from the leading byte
//! - everything else passes through unchanged

use std::fmt;

/// Percent-decoding errors. Offsets index into the encoded input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// `%` not followed by two more characters
    IncompleteEscape { offset: usize },
    /// `%` followed by a non-hex character
    InvalidHexDigit { offset: usize },
    /// Input ended before the UTF-8 sequence was complete
    TruncatedSequence { offset: usize },
    /// A continuation is not a well-formed `%XX` triplet, or the bytes
    /// do not form valid UTF-8
    InvalidSequence { offset: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::IncompleteEscape { offset } => {
                write!(f, "Incomplete percent encoding at offset {}", offset)
            }
            DecodeError::InvalidHexDigit { offset } => {
                write!(f, "Invalid hex digit in percent encoding at offset {}", offset)
            }
            DecodeError::TruncatedSequence { offset } => {
                write!(f, "Not enough bytes to read full UTF-8 sequence at offset {}", offset)
            }
            DecodeError::InvalidSequence { offset } => {
                write!(f, "Invalid percent-encoded UTF-8 sequence at offset {}", offset)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decode a percent/plus encoded string.
pub fn decode(input: &str) -> Result<String, DecodeError> {
    let bytes = input.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                output.push(b' ');
                i += 1;
            }
            b'%' => {
                let lead = escaped_byte(bytes, i)?;
                let len =
                    sequence_length(lead).ok_or(DecodeError::InvalidSequence { offset: i })?;
                let start = i;
                let mut sequence = [lead, 0, 0, 0];
                i += 3;

                for slot in sequence.iter_mut().take(len).skip(1) {
                    if i >= bytes.len() {
                        return Err(DecodeError::TruncatedSequence { offset: start });
                    }
                    if bytes[i] != b'%' {
                        return Err(DecodeError::InvalidSequence { offset: i });
                    }
                    *slot = escaped_byte(bytes, i).map_err(|e| match e {
                        DecodeError::IncompleteEscape { .. } => {
                            DecodeError::TruncatedSequence { offset: start }
                        }
                        _ => DecodeError::InvalidSequence { offset: i },
                    })?;
                    i += 3;
                }

                let decoded = std::str::from_utf8(&sequence[..len])
                    .map_err(|_| DecodeError::InvalidSequence { offset: start })?;
                output.extend_from_slice(decoded.as_bytes());
            }
            b => {
                output.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8(output).map_err(|e| DecodeError::InvalidSequence {
        offset: e.utf8_error().valid_up_to(),
    })
}

/// Read the byte encoded by the `%XX` triplet starting at `pos`.
fn escaped_byte(bytes: &[u8], pos: usize) -> Result<u8, DecodeError> {
    if pos + 2 >= bytes.len() {
        return Err(DecodeError::IncompleteEscape { offset: pos });
    }
    let hi = hex_digit(bytes[pos + 1]).ok_or(DecodeError::InvalidHexDigit { offset: pos + 1 })?;
    let lo = hex_digit(bytes[pos + 2]).ok_or(DecodeError::InvalidHexDigit { offset: pos + 2 })?;
    Ok(hi << 4 | lo)
}

/// UTF-8 sequence length announced by a leading byte.
fn sequence_length(lead: u8) -> Option<usize> {
    match lead {
        0x00..=0x7F => Some(1), // 0xxxxxxx
        b if b & 0xE0 == 0xC0 => Some(2), // 110xxxxx
        b if b & 0xF0 == 0xE0 => Some(3), // 1110xxxx
        b if b & 0xF8 == 0xF0 => Some(4), // 11110xxx
        _ => None,
    }
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plus_is_space() {
        assert_eq!(decode("Hello+World").unwrap(), "Hello World");
    }

    #[test]
    fn test_percent_ascii() {
        assert_eq!(decode("Hello%20World%21").unwrap(), "Hello World!");
        assert_eq!(decode("%2f%2F").unwrap(), "//");
    }

    #[test]
    fn test_passthrough() {
        assert_eq!(decode("plain-text_123").unwrap(), "plain-text_123");
        assert_eq!(decode("").unwrap(), "");
    }

    #[test]
    fn test_multibyte_utf8() {
        assert_eq!(decode("%E6%97%A5%E6%9C%AC").unwrap(), "日本");
        assert_eq!(decode("caf%C3%A9").unwrap(), "café");
        assert_eq!(decode("%F0%9F%98%80").unwrap(), "😀");
    }

    #[test]
    fn test_raw_utf8_passthrough() {
        assert_eq!(decode("日本+語").unwrap(), "日本 語");
    }

    #[test]
    fn test_incomplete_escape() {
        assert_eq!(
            decode("abc%4"),
            Err(DecodeError::IncompleteEscape { offset: 3 })
        );
        assert!(decode("%").is_err());
    }

    #[test]
    fn test_invalid_hex_digit() {
        assert_eq!(
            decode("Hello%2World"),
            Err(DecodeError::InvalidHexDigit { offset: 7 })
        );
    }

    #[test]
    fn test_truncated_utf8() {
        assert_eq!(
            decode("%E6%97"),
            Err(DecodeError::TruncatedSequence { offset: 0 })
        );
    }

    #[test]
    fn test_malformed_continuation() {
        assert_eq!(
            decode("%E6%97xyz"),
            Err(DecodeError::InvalidSequence { offset: 6 })
        );
        assert_eq!(
            decode("%C3%ZZ"),
            Err(DecodeError::InvalidSequence { offset: 3 })
        );
    }

    #[test]
    fn test_invalid_leading_byte() {
        assert_eq!(decode("%FF"), Err(DecodeError::InvalidSequence { offset: 0 }));
        assert_eq!(decode("%80"), Err(DecodeError::InvalidSequence { offset: 0 }));
    }

    #[test]
    fn test_non_continuation_bytes_rejected() {
        assert!(decode("%C3%41").is_err());
    }
}
