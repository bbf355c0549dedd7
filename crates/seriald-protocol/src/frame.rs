//! Parsing of client requests into frames.
//!
//! The first character is a single hex digit `N` giving how many hex
//! digits of reply length follow. `1 + N` characters are always discarded
//! from the front of the request, even when the length digits turn out to
//! be invalid, and whatever remains is the payload:
//!
//! ```text
//! "22F8921"   -> N = 2, reply length 0x2F = 47, payload "8921"
//! "X78192"    -> N = 0 (invalid digit), reply length 0, payload "78192"
//! "3A2G9130"  -> N = 3, "A2G" is not hex, reply length 0, payload "9130"
//! ```
//!
//! Parsing never fails on malformed input; ambiguity degrades to a reply
//! length of zero. The only non-frame outcome is an empty request, which
//! means the peer closed the connection.

use thiserror::Error;

/// Largest digit count expressible by the single leading hex digit.
pub const MAX_REPLY_LENGTH_DIGITS: u8 = 15;

/// One parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Value of the leading digit (characters discarded = this + 1)
    pub reply_length_digits: u8,

    /// Number of bytes to read back from the serial device
    pub reply_length: u64,

    /// Text written verbatim to the serial device
    pub payload: String,
}

impl Frame {
    /// Number of leading characters stripped before the payload.
    pub fn discarded(&self) -> usize {
        1 + usize::from(self.reply_length_digits)
    }

    /// Whether a serial read follows the write.
    pub fn expects_reply(&self) -> bool {
        self.reply_length > 0
    }

    /// Whether a reply of `reply_chars` decoded characters may be forwarded.
    ///
    /// Outside strict mode any reply is forwarded; in strict mode its length
    /// must match the requested reply length exactly.
    pub fn accepts_reply(&self, reply_chars: usize, strict: bool) -> bool {
        !strict || u64::try_from(reply_chars).map_or(false, |n| n == self.reply_length)
    }

    /// Renders a request asking for `reply_length` bytes after `payload`.
    ///
    /// Uses the shortest digit count able to hold the length; a zero
    /// length is written as `"0"`.
    pub fn encode(reply_length: u64, payload: &str) -> String {
        if reply_length == 0 {
            return format!("0{payload}");
        }
        let digits = format!("{reply_length:X}");
        format!("{:X}{digits}{payload}", digits.len())
    }
}

/// The peer closed the connection: the request carried no data.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Connection closed by peer")]
pub struct ConnectionClosed;

/// Parses decoded request text into a [`Frame`].
pub fn parse(text: &str) -> Result<Frame, ConnectionClosed> {
    let mut chars = text.chars();
    let first = chars.next().ok_or(ConnectionClosed)?;

    let digits = first
        .to_digit(16)
        .and_then(|d| u8::try_from(d).ok())
        .unwrap_or(0);

    let length_field: String = chars.by_ref().take(usize::from(digits)).collect();
    let reply_length = parse_reply_length(&length_field, digits);

    Ok(Frame {
        reply_length_digits: digits,
        reply_length,
        payload: chars.collect(),
    })
}

fn parse_reply_length(field: &str, digits: u8) -> u64 {
    if digits == 0 || field.chars().count() != usize::from(digits) {
        return 0;
    }
    if !field.chars().all(|c| c.is_ascii_hexdigit()) {
        return 0;
    }
    u64::from_str_radix(field, 16).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_documented_examples() {
        let frame = parse("22F8921").unwrap();
        assert_eq!(frame.reply_length_digits, 2);
        assert_eq!(frame.reply_length, 47);
        assert_eq!(frame.payload, "8921");

        let frame = parse("X78192").unwrap();
        assert_eq!(frame.reply_length_digits, 0);
        assert_eq!(frame.reply_length, 0);
        assert_eq!(frame.payload, "78192");

        let frame = parse("3A2G9130").unwrap();
        assert_eq!(frame.reply_length_digits, 3);
        assert_eq!(frame.reply_length, 0);
        assert_eq!(frame.payload, "9130");
        assert_eq!(frame.discarded(), 4);
    }

    #[test]
    fn test_parse_empty_is_connection_closed() {
        assert_eq!(parse(""), Err(ConnectionClosed));
    }

    #[test]
    fn test_every_valid_leading_digit() {
        for (value, digit) in "0123456789abcdefABCDEF".chars().enumerate() {
            let expected = if value < 16 { value } else { value - 6 };
            let text = format!("{digit}{}", "z".repeat(20));
            let frame = parse(&text).unwrap();
            assert_eq!(usize::from(frame.reply_length_digits), expected, "digit {digit}");
            assert_eq!(frame.payload.len(), 20 - expected);
        }
    }

    #[test]
    fn test_invalid_leading_digit_discards_one() {
        for digit in ['g', 'X', ' ', '-', '\u{e9}'] {
            let frame = parse(&format!("{digit}abc")).unwrap();
            assert_eq!(frame.reply_length_digits, 0);
            assert_eq!(frame.reply_length, 0);
            assert_eq!(frame.payload, "abc");
        }
    }

    #[test]
    fn test_zero_digits_reads_nothing() {
        let frame = parse("0ATZ").unwrap();
        assert!(!frame.expects_reply());
        assert_eq!(frame.payload, "ATZ");
    }

    #[test]
    fn test_short_length_field() {
        let frame = parse("3A").unwrap();
        assert_eq!(frame.reply_length, 0);
        assert_eq!(frame.payload, "");

        let frame = parse("4").unwrap();
        assert_eq!(frame.reply_length, 0);
        assert_eq!(frame.payload, "");
    }

    #[test]
    fn test_signs_are_not_hex() {
        assert_eq!(parse("2+F12").unwrap().reply_length, 0);
        assert_eq!(parse("2-112").unwrap().reply_length, 0);
    }

    #[test]
    fn test_fifteen_digit_length() {
        let frame = parse("F00000000000001Fdata").unwrap();
        assert_eq!(frame.reply_length, 0x1F);
        assert_eq!(frame.payload, "data");
    }

    #[test]
    fn test_payload_counts_characters_not_bytes() {
        let frame = parse("1A\u{e9}t\u{e9}").unwrap();
        assert_eq!(frame.reply_length, 10);
        assert_eq!(frame.payload, "\u{e9}t\u{e9}");
    }

    #[test]
    fn test_accepts_reply() {
        let frame = parse("22F8921").unwrap();
        assert!(frame.accepts_reply(47, true));
        assert!(!frame.accepts_reply(46, true));
        assert!(frame.accepts_reply(46, false));
        assert!(frame.accepts_reply(0, false));
    }

    #[test]
    fn test_encode() {
        assert_eq!(Frame::encode(47, "8921"), "22F8921");
        assert_eq!(Frame::encode(0, "78192"), "078192");
        assert_eq!(Frame::encode(5, "x"), "15x");
        assert_eq!(parse(&Frame::encode(0x1234, "p")).unwrap().reply_length, 0x1234);
    }
}
