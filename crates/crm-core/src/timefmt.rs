//! Serde adapters for the wire formats used by every record: RFC3339 UTC for
//! timestamps and `YYYY-MM-DD` for calendar dates.

use serde::{Deserialize, Deserializer, Serializer};
use serde_json::Value;
use time::{Date, OffsetDateTime};

use crate::{format_iso_date, format_rfc3339, parse_iso_date, parse_rfc3339_utc};

pub mod rfc3339 {
    use super::{
        format_rfc3339, parse_rfc3339_utc, Deserialize, Deserializer, OffsetDateTime, Serializer,
    };
    use serde::de::Error as _;
    use serde::ser::Error as _;

    pub fn serialize<S: Serializer>(
        value: &OffsetDateTime,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let text = format_rfc3339(*value).map_err(S::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<OffsetDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_rfc3339_utc(&raw).map_err(D::Error::custom)
    }

    pub mod option {
        use super::{
            format_rfc3339, parse_rfc3339_utc, Deserialize, Deserializer, OffsetDateTime,
            Serializer,
        };
        use serde::de::Error as _;
        use serde::ser::Error as _;

        pub fn serialize<S: Serializer>(
            value: &Option<OffsetDateTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => {
                    let text = format_rfc3339(*value).map_err(S::Error::custom)?;
                    serializer.serialize_some(&text)
                }
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<OffsetDateTime>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| parse_rfc3339_utc(&raw).map_err(D::Error::custom))
                .transpose()
        }
    }
}

pub mod iso_date {
    use super::{format_iso_date, parse_iso_date, Date, Deserialize, Deserializer, Serializer};
    use serde::de::Error as _;
    use serde::ser::Error as _;

    pub fn serialize<S: Serializer>(value: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        let text = format_iso_date(*value).map_err(S::Error::custom)?;
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_iso_date(&raw).ok_or_else(|| D::Error::custom(format!("invalid date: {raw}")))
    }

    pub mod option {
        use super::{format_iso_date, parse_iso_date, Date, Deserialize, Deserializer, Serializer};
        use serde::de::Error as _;
        use serde::ser::Error as _;

        pub fn serialize<S: Serializer>(
            value: &Option<Date>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => {
                    let text = format_iso_date(*value).map_err(S::Error::custom)?;
                    serializer.serialize_some(&text)
                }
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Date>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| {
                    parse_iso_date(&raw)
                        .ok_or_else(|| D::Error::custom(format!("invalid date: {raw}")))
                })
                .transpose()
        }
    }
}

/// Reads a date from a write payload. Malformed or non-string values are
/// treated as absent instead of rejecting the payload.
pub fn lenient_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Date>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(Value::as_str).and_then(parse_iso_date))
}

/// Like [`lenient_date`] for patches: a present key always yields `Some`, so a
/// malformed or null value clears the stored date.
#[allow(clippy::option_option)]
pub fn present_lenient_date<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Option<Date>>, D::Error> {
    lenient_date(deserializer).map(Some)
}

/// Keeps "key present with null" distinct from "key absent" when paired with
/// `#[serde(default)]`.
#[allow(clippy::option_option)]
pub fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
