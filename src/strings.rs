//! Helpers for pulling numbers out of raw payloads and building response buffers
//!
//! Payloads handed over by the hub are byte slices with an explicit length and no terminator,
//! so nothing here assumes a trailing nul or valid UTF-8.

use std::collections::TryReserveError;
use std::fmt::{self, Write};

use thiserror::Error;

/// Longest run of digits [`extract_number`] will accept.
///
/// Fifteen decimal digits always fit in an `i64`, so parsing can never overflow.
pub const MAX_DIGITS: usize = 15;

/// Reasons a number could not be extracted from a buffer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// The buffer holds no ASCII digit
    #[error("no digits found in buffer")]
    NotFound,
    /// The key searched for by [`extract_number_after`] does not occur in the buffer
    #[error("key not found in buffer")]
    KeyNotFound,
    /// The first digit run is longer than [`MAX_DIGITS`]
    #[error("digit run of {len} characters exceeds the maximum of {}", MAX_DIGITS)]
    TooManyDigits {
        /// Length of the offending run
        len: usize,
    },
}

/// Parse the first run of ASCII decimal digits in `text`
///
/// Anything in front of the run, a sign included, is skipped. The run ends at the first
/// non-digit byte or at the end of the buffer.
///
/// # Example
/// ```
/// use remote_monitoring::strings::extract_number;
///
/// assert_eq!(extract_number(b"{\"onoff\": 1}"), Ok(1));
/// ```
pub fn extract_number(text: &[u8]) -> Result<i64, ExtractError> {
    let start = text
        .iter()
        .position(u8::is_ascii_digit)
        .ok_or(ExtractError::NotFound)?;

    let digits = &text[start..];
    let len = digits.iter().take_while(|b| b.is_ascii_digit()).count();
    if len > MAX_DIGITS {
        return Err(ExtractError::TooManyDigits { len });
    }

    Ok(digits[..len]
        .iter()
        .fold(0i64, |value, digit| value * 10 + i64::from(digit - b'0')))
}

/// Find `key` in `text` and parse the first digit run that follows it
///
/// Used to read a single field out of a JSON fragment without parsing the whole document.
pub fn extract_number_after(text: &[u8], key: &[u8]) -> Result<i64, ExtractError> {
    let offset = find(text, key).ok_or(ExtractError::KeyNotFound)?;
    extract_number(&text[offset + key.len()..])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Reasons a [`FormattedBuffer`] could not be built
#[derive(Debug, Error)]
pub enum FormatError {
    /// The output allocation could not be reserved
    #[error("failed to allocate formatted buffer: {0}")]
    Allocation(#[from] TryReserveError),
    /// One of the arguments failed to format itself
    #[error("formatting argument failed")]
    Fmt(#[from] fmt::Error),
}

/// An owned, exactly sized rendering of a format string and its arguments
///
/// Built through [`FormattedBuffer::format`] or the [`formatted!`](crate::formatted) macro. The
/// allocation carries one spare byte past the content; [`len`](Self::len) never counts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedBuffer {
    content: String,
}

impl FormattedBuffer {
    /// Render `args` into a freshly allocated buffer
    ///
    /// The arguments are measured in a first pass, the allocation is reserved in one step, and
    /// the second pass writes into it.
    pub fn format(args: fmt::Arguments<'_>) -> Result<Self, FormatError> {
        let mut counter = LengthCounter(0);
        counter.write_fmt(args)?;

        let mut content = String::new();
        content.try_reserve_exact(counter.0 + 1)?;
        content.write_fmt(args)?;

        Ok(Self { content })
    }

    /// Number of rendered bytes
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// Whether nothing was rendered
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Rendered content as bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.content.as_bytes()
    }

    /// Rendered content as text
    pub fn as_str(&self) -> &str {
        &self.content
    }

    /// Take ownership of the rendered bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.content.into_bytes()
    }
}

impl AsRef<[u8]> for FormattedBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Display for FormattedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.content)
    }
}

impl From<FormattedBuffer> for String {
    fn from(buffer: FormattedBuffer) -> Self {
        buffer.content
    }
}

struct LengthCounter(usize);

impl Write for LengthCounter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0 += s.len();
        Ok(())
    }
}

/// Build a [`FormattedBuffer`] with `format!` syntax
///
/// Evaluates to `Result<FormattedBuffer, FormatError>`.
///
/// # Example
/// ```
/// use remote_monitoring::formatted;
///
/// let buffer = formatted!("{}={}", "count", 42).unwrap();
/// assert_eq!(buffer.as_str(), "count=42");
/// assert_eq!(buffer.len(), 8);
/// ```
#[macro_export]
macro_rules! formatted {
    ($($arg:tt)*) => {
        $crate::strings::FormattedBuffer::format(format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_in_middle_of_text() {
        assert_eq!(extract_number(b"abc123def"), Ok(123));
    }

    #[test]
    fn no_digits() {
        assert_eq!(extract_number(b"no digits here"), Err(ExtractError::NotFound));
    }

    #[test]
    fn empty_buffer() {
        assert_eq!(extract_number(b""), Err(ExtractError::NotFound));
    }

    #[test]
    fn digit_run_ends_buffer() {
        assert_eq!(extract_number(b"x=9"), Ok(9));
        assert_eq!(extract_number(b"7"), Ok(7));
    }

    #[test]
    fn only_first_run_is_used() {
        assert_eq!(extract_number(b"a1b22c333"), Ok(1));
    }

    #[test]
    fn respects_slice_length() {
        let payload = b"on: 12345";
        assert_eq!(extract_number(&payload[..6]), Ok(12));
        assert_eq!(extract_number(&payload[..3]), Err(ExtractError::NotFound));
    }

    #[test]
    fn sign_is_not_part_of_run() {
        assert_eq!(extract_number(b"-42"), Ok(42));
    }

    #[test]
    fn leading_zeros() {
        assert_eq!(extract_number(b"007"), Ok(7));
    }

    #[test]
    fn longest_accepted_run() {
        assert_eq!(
            extract_number(b"v=999999999999999;"),
            Ok(999_999_999_999_999)
        );
    }

    #[test]
    fn overlong_run_is_rejected() {
        assert_eq!(
            extract_number(b"value:123456789012345678"),
            Err(ExtractError::TooManyDigits { len: 18 })
        );
        assert_eq!(
            extract_number(b"1234567890123456"),
            Err(ExtractError::TooManyDigits { len: 16 })
        );
    }

    #[test]
    fn non_utf8_bytes_are_skipped() {
        assert_eq!(extract_number(&[0xff, 0xfe, b'4', b'2', 0x80]), Ok(42));
    }

    #[test]
    fn extraction_is_repeatable() {
        let input = b"{\"TelemetryInterval\": 30}";
        assert_eq!(extract_number(input), extract_number(input));
    }

    #[test]
    fn number_after_key() {
        let payload = br#"{"Version":2,"Config":{"TelemetryInterval":30}}"#;
        assert_eq!(
            extract_number_after(payload, b"\"TelemetryInterval\":"),
            Ok(30)
        );
    }

    #[test]
    fn missing_key() {
        assert_eq!(
            extract_number_after(b"{\"$version\":4}", b"\"TelemetryInterval\":"),
            Err(ExtractError::KeyNotFound)
        );
    }

    #[test]
    fn key_without_number() {
        assert_eq!(
            extract_number_after(b"{\"TelemetryInterval\": null}", b"\"TelemetryInterval\":"),
            Err(ExtractError::NotFound)
        );
    }

    #[test]
    fn formatted_content_and_length() {
        let buffer = formatted!("{{count}}={}", 42).unwrap();
        assert_eq!(buffer.as_str(), "{count}=42");
        assert_eq!(buffer.len(), "{count}=42".len());
        assert_eq!(buffer.as_bytes(), b"{count}=42");
    }

    #[test]
    fn formatted_reserves_slack_byte() {
        let buffer = FormattedBuffer::format(format_args!("led status: {}", 1)).unwrap();
        assert_eq!(buffer.len(), 13);
        assert!(buffer.content.capacity() >= buffer.len() + 1);
    }

    #[test]
    fn formatted_multibyte_length_is_in_bytes() {
        let buffer = formatted!("{}°C", 21).unwrap();
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn formatted_empty() {
        let buffer = formatted!("").unwrap();
        assert!(buffer.is_empty());
        assert_eq!(buffer.into_bytes(), Vec::<u8>::new());
    }

    #[test]
    fn failing_argument_is_reported() {
        struct Broken;
        impl fmt::Display for Broken {
            fn fmt(&self, _: &mut fmt::Formatter<'_>) -> fmt::Result {
                Err(fmt::Error)
            }
        }

        assert!(matches!(formatted!("{}", Broken), Err(FormatError::Fmt(_))));
    }
}
