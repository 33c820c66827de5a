//! Argument parsing and reply helpers shared by the command families.

use bytes::Bytes;

use crate::error::{CommandError, CommandResult};
use crate::protocol::RespValue;

/// Parses a base-10 signed integer argument.
pub fn parse_i64(arg: &[u8]) -> CommandResult<i64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(CommandError::NotInteger)
}

/// Parses a float argument. `inf`, `+inf` and `-inf` are accepted, NaN is not.
pub fn parse_f64(arg: &[u8]) -> CommandResult<f64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|f| !f.is_nan())
        .ok_or(CommandError::NotFloat)
}

/// Case-insensitive comparison against an option keyword.
#[inline]
pub fn is_opt(arg: &[u8], keyword: &str) -> bool {
    arg.eq_ignore_ascii_case(keyword.as_bytes())
}

pub fn lossy(arg: &[u8]) -> String {
    String::from_utf8_lossy(arg).into_owned()
}

/// Formats a float the way replies and stored strings expect
/// (`1`, `1.5`, `inf`, `-inf`).
pub fn format_float(value: f64) -> String {
    if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        format!("{}", value)
    }
}

/// Resolves Redis-style `start..=stop` indices (negative counts from the
/// end) against a sequence of `len` elements. `None` means an empty range.
pub fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Resolves a single index (negative counts from the end).
pub fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { len + index } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

pub fn bulk(data: Bytes) -> RespValue {
    RespValue::BulkString(data)
}

pub fn bulk_or_null(data: Option<Bytes>) -> RespValue {
    data.map(RespValue::BulkString).unwrap_or(RespValue::NullBulk)
}

pub fn bulk_array<I: IntoIterator<Item = Bytes>>(items: I) -> RespValue {
    RespValue::Array(items.into_iter().map(RespValue::BulkString).collect())
}

pub fn int(n: usize) -> RespValue {
    RespValue::Integer(n as i64)
}

pub fn bool_int(b: bool) -> RespValue {
    RespValue::Integer(b as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_i64(b"-42"), Ok(-42));
        assert_eq!(parse_i64(b"4.2"), Err(CommandError::NotInteger));
        assert_eq!(parse_i64(b"99999999999999999999"), Err(CommandError::NotInteger));
        assert_eq!(parse_f64(b"1.5"), Ok(1.5));
        assert_eq!(parse_f64(b"-inf"), Ok(f64::NEG_INFINITY));
        assert_eq!(parse_f64(b"+inf"), Ok(f64::INFINITY));
        assert_eq!(parse_f64(b"nan"), Err(CommandError::NotFloat));
        assert_eq!(parse_f64(b"abc"), Err(CommandError::NotFloat));
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(1.0), "1");
        assert_eq!(format_float(1.5), "1.5");
        assert_eq!(format_float(-0.25), "-0.25");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn test_normalize_range() {
        assert_eq!(normalize_range(0, -1, 5), Some((0, 4)));
        assert_eq!(normalize_range(-2, -1, 5), Some((3, 4)));
        assert_eq!(normalize_range(1, 100, 5), Some((1, 4)));
        assert_eq!(normalize_range(-100, 1, 5), Some((0, 1)));
        assert_eq!(normalize_range(3, 1, 5), None);
        assert_eq!(normalize_range(5, 10, 5), None);
        assert_eq!(normalize_range(0, -1, 0), None);
    }

    #[test]
    fn test_normalize_index() {
        assert_eq!(normalize_index(0, 3), Some(0));
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(3, 3), None);
        assert_eq!(normalize_index(-4, 3), None);
    }
}
