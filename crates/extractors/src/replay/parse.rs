use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use seriesflow_core::records::FieldValue;
use seriesflow_core::schema::FieldType;

/// Parses a replay timestamp.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC), a bare date (midnight UTC)
/// or integer nanoseconds since the epoch.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(ts.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(ts) = date.and_hms_opt(0, 0, 0) {
            return Ok(ts.and_utc());
        }
    }
    if let Ok(nanos) = raw.parse::<i64>() {
        return Ok(Utc.timestamp_nanos(nanos));
    }
    Err(format!("'{raw}' is not a timestamp"))
}

/// Parses one cell as `field_type`. An empty cell is `Null`.
pub fn parse_value(field_type: FieldType, raw: &str) -> Result<FieldValue, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(FieldValue::Null);
    }
    match field_type {
        FieldType::Int => raw
            .parse::<i64>()
            .map(FieldValue::Int)
            .map_err(|_| format!("'{raw}' is not an integer")),
        FieldType::Float => raw
            .parse::<f64>()
            .map(FieldValue::Float)
            .map_err(|_| format!("'{raw}' is not a number")),
        FieldType::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(FieldValue::Bool(true)),
            "false" | "0" => Ok(FieldValue::Bool(false)),
            _ => Err(format!("'{raw}' is not a boolean")),
        },
        FieldType::Text => Ok(FieldValue::Text(raw.to_string())),
        FieldType::Timestamp => parse_timestamp(raw).map(FieldValue::Timestamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-01T14:30:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-03-01T16:30:00+02:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-03-01 14:30:00").unwrap(), expected);
        assert_eq!(
            parse_timestamp(&expected.timestamp_nanos_opt().unwrap().to_string()).unwrap(),
            expected
        );
        assert_eq!(
            parse_timestamp("2024-03-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_values() {
        assert_eq!(parse_value(FieldType::Float, "1.5"), Ok(FieldValue::Float(1.5)));
        assert_eq!(parse_value(FieldType::Int, " 42 "), Ok(FieldValue::Int(42)));
        assert_eq!(parse_value(FieldType::Bool, "TRUE"), Ok(FieldValue::Bool(true)));
        assert_eq!(parse_value(FieldType::Text, ""), Ok(FieldValue::Null));
        assert!(parse_value(FieldType::Float, "abc").is_err());
        assert!(parse_value(FieldType::Int, "1.5").is_err());
    }
}
