//! Microsecond-precision timestamps.

use std::{
    fmt,
    fmt::{
        Debug,
        Display,
    },
    str::FromStr,
    time::SystemTime,
};

use chrono::{
    DateTime,
    Utc,
};
use errors::ErrorMetadata;

/// A point in time. All constructors truncate to microsecond precision, so
/// two timestamps derived from the same microsecond always compare equal.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    seconds: i64,
    nanos: u32,
}

impl Timestamp {
    pub const UNIX_EPOCH: Timestamp = Timestamp {
        seconds: 0,
        nanos: 0,
    };

    pub fn new(seconds: i64, nanos: u32) -> anyhow::Result<Self> {
        anyhow::ensure!(
            nanos < 1_000_000_000,
            ErrorMetadata::invalid_argument(
                "InvalidTimestamp",
                format!("Timestamp nanos out of range: {nanos}"),
            )
        );
        Ok(Timestamp {
            seconds,
            nanos: nanos - nanos % 1_000,
        })
    }

    pub fn from_unix_micros(micros: i64) -> Self {
        Timestamp {
            seconds: micros.div_euclid(1_000_000),
            nanos: (micros.rem_euclid(1_000_000) as u32) * 1_000,
        }
    }

    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("system clock before 1970");
        Self::from_unix_micros(since_epoch.as_micros() as i64)
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn nanos(&self) -> u32 {
        self.nanos
    }

    pub fn as_unix_micros(&self) -> i64 {
        self.seconds * 1_000_000 + (self.nanos / 1_000) as i64
    }

    /// The smallest representable timestamp strictly after this one.
    pub fn succ(&self) -> Self {
        Self::from_unix_micros(self.as_unix_micros() + 1)
    }
}

impl FromStr for Timestamp {
    type Err = anyhow::Error;

    /// Parse the RFC 3339 wire form.
    fn from_str(s: &str) -> anyhow::Result<Self> {
        let dt = DateTime::parse_from_rfc3339(s).map_err(|e| {
            anyhow::anyhow!(ErrorMetadata::invalid_argument(
                "InvalidTimestamp",
                format!("Failed to parse timestamp {s:?}: {e}"),
            ))
        })?;
        Timestamp::new(dt.timestamp(), dt.timestamp_subsec_nanos())
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dt = DateTime::<Utc>::from_timestamp(self.seconds, self.nanos)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.6fZ"))
    }
}

impl Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}

#[cfg(any(test, feature = "testing"))]
impl proptest::arbitrary::Arbitrary for Timestamp {
    type Parameters = ();

    type Strategy = proptest::strategy::BoxedStrategy<Timestamp>;

    fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
        use proptest::prelude::*;
        (0i64..4_102_444_800_000_000i64)
            .prop_map(Timestamp::from_unix_micros)
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncates_to_micros() {
        let ts = Timestamp::new(100, 123_456_789).unwrap();
        assert_eq!(ts.nanos(), 123_456_000);
    }

    #[test]
    fn test_micros_round_trip() {
        let ts = Timestamp::from_unix_micros(1_659_481_438_151_257);
        assert_eq!(ts.as_unix_micros(), 1_659_481_438_151_257);
        assert!(ts.succ() > ts);
    }

    #[test]
    fn test_rfc3339_round_trip() {
        let ts = Timestamp::from_unix_micros(1_659_481_438_151_257);
        let parsed: Timestamp = ts.to_string().parse().unwrap();
        assert_eq!(parsed, ts);
    }

    #[test]
    fn test_pre_epoch() {
        let ts = Timestamp::from_unix_micros(-1);
        assert_eq!(ts.seconds(), -1);
        assert_eq!(ts.nanos(), 999_999_000);
        assert_eq!(ts.as_unix_micros(), -1);
    }
}
