//! Durations as millisecond integers in config files and env overrides.
//!
//! Reading also accepts numeric strings, which is what environment
//! variables arrive as.

use std::fmt;
use std::time::Duration;

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(MillisVisitor)
}

struct MillisVisitor;

impl Visitor<'_> for MillisVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-negative number of milliseconds")
    }

    fn visit_u64<E: de::Error>(self, millis: u64) -> Result<Duration, E> {
        Ok(Duration::from_millis(millis))
    }

    fn visit_i64<E: de::Error>(self, millis: i64) -> Result<Duration, E> {
        u64::try_from(millis)
            .map(Duration::from_millis)
            .map_err(|_| E::custom(format!("negative duration: {millis} ms")))
    }

    fn visit_str<E: de::Error>(self, raw: &str) -> Result<Duration, E> {
        raw.trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| E::invalid_value(de::Unexpected::Str(raw), &self))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "super")]
        wait: Duration,
    }

    #[test]
    fn duration_is_written_as_millis() {
        let json = serde_json::to_string(&Holder {
            wait: Duration::from_secs(2),
        })
        .unwrap();
        assert_eq!(json, r#"{"wait":2000}"#);
    }

    #[test]
    fn reads_integers_and_numeric_strings() {
        let holder: Holder = serde_json::from_str(r#"{"wait":250}"#).unwrap();
        assert_eq!(holder.wait, Duration::from_millis(250));

        let holder: Holder = serde_json::from_str(r#"{"wait":" 1500 "}"#).unwrap();
        assert_eq!(holder.wait, Duration::from_millis(1500));
    }

    #[test]
    fn rejects_negative_and_garbage() {
        assert!(serde_json::from_str::<Holder>(r#"{"wait":-5}"#).is_err());
        assert!(serde_json::from_str::<Holder>(r#"{"wait":"soon"}"#).is_err());
    }
}
