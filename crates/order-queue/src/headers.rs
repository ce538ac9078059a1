//! `x-retry-count` header encoding.
//!
//! Other producers may write the counter as any AMQP integer width or as a
//! decimal string. Anything that does not read as a non-negative integer
//! counts as zero.

use lapin::types::{AMQPValue, FieldTable};
use tracing::warn;

/// Header carrying the number of times a message was resubmitted.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Header table carrying `retry_count`.
pub fn retry_headers(retry_count: u32) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert(
        RETRY_COUNT_HEADER.into(),
        AMQPValue::LongLongInt(i64::from(retry_count)),
    );
    headers
}

/// Read the retry counter from message headers. Absent means 0.
pub fn retry_count(headers: Option<&FieldTable>) -> u32 {
    let Some(value) = headers.and_then(|headers| {
        headers
            .inner()
            .iter()
            .find(|(key, _)| key.as_str() == RETRY_COUNT_HEADER)
            .map(|(_, value)| value)
    }) else {
        return 0;
    };

    match as_integer(value) {
        Some(count) if count >= 0 => u32::try_from(count).unwrap_or(u32::MAX),
        Some(count) => {
            warn!(value = count, "Negative x-retry-count, treating as 0");
            0
        }
        None => {
            warn!(value = ?value, "Unreadable x-retry-count, treating as 0");
            0
        }
    }
}

fn as_integer(value: &AMQPValue) -> Option<i64> {
    match value {
        AMQPValue::ShortShortInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortShortUInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortUInt(v) => Some(i64::from(*v)),
        AMQPValue::LongInt(v) => Some(i64::from(*v)),
        AMQPValue::LongUInt(v) => Some(i64::from(*v)),
        AMQPValue::LongLongInt(v) => Some(*v),
        // JSON-minded clients send whole numbers as doubles
        AMQPValue::Double(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
        AMQPValue::Float(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
        AMQPValue::ShortString(s) => s.as_str().trim().parse().ok(),
        AMQPValue::LongString(s) => String::from_utf8_lossy(s.as_bytes()).trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(value: AMQPValue) -> FieldTable {
        let mut headers = FieldTable::default();
        headers.insert(RETRY_COUNT_HEADER.into(), value);
        headers
    }

    #[test]
    fn test_missing_header_is_zero() {
        assert_eq!(retry_count(None), 0);
        assert_eq!(retry_count(Some(&FieldTable::default())), 0);
    }

    #[test]
    fn test_written_counter_reads_back() {
        assert_eq!(retry_count(Some(&retry_headers(2))), 2);
    }

    #[test]
    fn test_any_integer_width_is_accepted() {
        assert_eq!(retry_count(Some(&table(AMQPValue::ShortShortUInt(1)))), 1);
        assert_eq!(retry_count(Some(&table(AMQPValue::ShortInt(2)))), 2);
        assert_eq!(retry_count(Some(&table(AMQPValue::LongInt(3)))), 3);
        assert_eq!(retry_count(Some(&table(AMQPValue::LongUInt(4)))), 4);
        assert_eq!(retry_count(Some(&table(AMQPValue::Double(2.0)))), 2);
    }

    #[test]
    fn test_decimal_string_is_accepted() {
        assert_eq!(retry_count(Some(&table(AMQPValue::LongString("2".into())))), 2);
        assert_eq!(retry_count(Some(&table(AMQPValue::ShortString(" 1 ".into())))), 1);
    }

    #[test]
    fn test_garbage_and_negative_are_zero() {
        assert_eq!(retry_count(Some(&table(AMQPValue::LongString("three".into())))), 0);
        assert_eq!(retry_count(Some(&table(AMQPValue::LongInt(-2)))), 0);
        assert_eq!(retry_count(Some(&table(AMQPValue::Double(1.5)))), 0);
        assert_eq!(retry_count(Some(&table(AMQPValue::Boolean(true)))), 0);
    }
}
