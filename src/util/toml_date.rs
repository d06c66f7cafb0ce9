use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use toml::value::Datetime;

/// Converts a front matter datetime into a chrono one.
///
/// TOML allows local datetimes and plain dates; those are placed in
/// `default_offset`.
pub fn from_toml(value: &Datetime, default_offset: FixedOffset) -> Result<DateTime<FixedOffset>, String> {
    let text = value.to_string();

    if value.offset.is_some() {
        return DateTime::parse_from_rfc3339(&text)
            .map_err(|e| format!("Unable to parse date time {}: {}", text, e));
    }

    let naive = match (value.date.is_some(), value.time.is_some()) {
        (true, true) => NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f"))
            .map_err(|e| format!("Unable to parse date time {}: {}", text, e))?,
        (true, false) => NaiveDate::from_str(&text)
            .map(|d| NaiveDateTime::new(d, NaiveTime::MIN))
            .map_err(|e| format!("Unable to parse date {}: {}", text, e))?,
        _ => return Err(format!("A time without a date is not a valid post date: {}", text)),
    };

    default_offset.from_local_datetime(&naive)
        .single()
        .ok_or_else(|| format!("Ambiguous date time {}", text))
}

pub fn to_toml(date_time: &DateTime<FixedOffset>) -> Datetime {
    // Seconds precision with an explicit offset always yields valid TOML
    let text = date_time.format("%Y-%m-%dT%H:%M:%S%:z").to_string();
    Datetime::from_str(&text).unwrap_or_else(|_| unreachable!("formatted datetime is valid TOML: {}", text))
}
