//! Timestamp helpers.
//!
//! Every timestamp inside the system is a `DateTime<Utc>` truncated to microseconds,
//! which is the precision of the wire representation (`%Y-%m-%dT%H:%M:%S.ffffffZ`).

use crate::error::{RecordError, Result};
use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeZone, Utc};

/// Format used on the wire and in JSON. Always UTC, microsecond precision, literal `Z`.
pub const WIRE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Returns the current time, truncated to wire precision.
pub fn utc_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Parses a timestamp string.
///
/// Accepts RFC 3339 (any offset, converted to UTC) and naive
/// `YYYY-MM-DD[T ]HH:MM:SS[.ffffff]` strings, which are assumed to be UTC.
pub fn parse_datetime(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.into_utc());
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(dt.into_utc());
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.into_utc());
        }
    }
    Err(RecordError::InvalidTimestamp(text.to_string()))
}

/// Renders a timestamp in the wire format.
pub fn datetime_str(dt: &DateTime<Utc>) -> String {
    dt.format(WIRE_FORMAT).to_string()
}

/// Normalises anything time-like into a wire-precision UTC timestamp.
///
/// Naive values carry no offset and are taken to be UTC.
pub trait IntoUtc {
    fn into_utc(self) -> DateTime<Utc>;
}

impl<Tz: TimeZone> IntoUtc for DateTime<Tz> {
    fn into_utc(self) -> DateTime<Utc> {
        self.with_timezone(&Utc).trunc_subsecs(6)
    }
}

impl IntoUtc for NaiveDateTime {
    fn into_utc(self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self).trunc_subsecs(6)
    }
}

/// Serde adapter writing timestamps in [`WIRE_FORMAT`].
pub mod serde_utc {
    use super::{datetime_str, parse_datetime};
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&datetime_str(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_datetime(&text).map_err(de::Error::custom)
    }

    /// Same as the parent module, for optional fields.
    pub mod option {
        use super::super::parse_datetime;
        use chrono::{DateTime, Utc};
        use serde::{de, Deserialize, Deserializer};

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let text: Option<String> = Option::deserialize(deserializer)?;
            text.map(|t| parse_datetime(&t).map_err(de::Error::custom))
                .transpose()
        }
    }
}
