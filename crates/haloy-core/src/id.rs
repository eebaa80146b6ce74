//! Deployment identifiers.
//!
//! A deployment id is the local wall-clock time of the launch attempt,
//! formatted as 14 decimal digits (`YYYYMMDDHHMMSS`). Lexicographic order on
//! ids is chronological order, which the store relies on for history queries
//! and pruning.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{NaiveDateTime, TimeDelta, Timelike};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{Error, Result};

const ID_FORMAT: &str = "%Y%m%d%H%M%S";
const ID_LEN: usize = 14;

/// A 14-digit decimal deployment identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeploymentId(String);

impl DeploymentId {
    /// Parse and validate an id received from the outside.
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != ID_LEN || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Validation(format!(
                "deployment id must be {ID_LEN} decimal digits, got {s:?}"
            )));
        }
        // The digits must also form a real timestamp.
        NaiveDateTime::parse_from_str(s, ID_FORMAT)
            .map_err(|_| Error::Validation(format!("deployment id {s:?} is not a timestamp")))?;
        Ok(Self(s.to_string()))
    }

    fn from_datetime(dt: NaiveDateTime) -> Self {
        Self(dt.format(ID_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DeploymentId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<DeploymentId> for String {
    fn from(id: DeploymentId) -> Self {
        id.0
    }
}

/// Generates strictly increasing deployment ids from the clock.
///
/// If the clock has not advanced past the previously issued id (rapid calls,
/// or a clock step backwards), the factory advances one second beyond the
/// last id instead. Calls serialize through a mutex.
pub struct IdFactory {
    clock: Arc<dyn Clock>,
    last: Mutex<Option<NaiveDateTime>>,
}

impl IdFactory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last: Mutex::new(None),
        }
    }

    /// Return an id strictly greater than every id previously returned by
    /// this factory.
    pub fn next(&self) -> DeploymentId {
        let mut last = self.last.lock().expect("id factory mutex poisoned");
        let now = self.clock.now().naive_local();
        let now = now.with_nanosecond(0).unwrap_or(now);
        let next = match *last {
            Some(prev) if now <= prev => prev + TimeDelta::seconds(1),
            _ => now,
        };
        *last = Some(next);
        DeploymentId::from_datetime(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Local, TimeZone};
    use std::sync::Mutex as StdMutex;

    /// A clock pinned to a settable instant.
    struct ManualClock {
        now: StdMutex<DateTime<Local>>,
    }

    impl ManualClock {
        fn at(now: DateTime<Local>) -> Self {
            Self {
                now: StdMutex::new(now),
            }
        }

        fn set(&self, now: DateTime<Local>) {
            *self.now.lock().unwrap() = now;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Local> {
            *self.now.lock().unwrap()
        }
    }

    fn local(s: &str) -> DateTime<Local> {
        let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap();
        Local.from_local_datetime(&naive).unwrap()
    }

    #[test]
    fn formats_fourteen_digits() {
        let clock = Arc::new(ManualClock::at(local("2025-03-09 14:30:05")));
        let factory = IdFactory::new(clock);
        let id = factory.next();
        assert_eq!(id.as_str(), "20250309143005");
        assert_eq!(id.as_str().len(), 14);
        assert!(id.as_str().bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn rapid_calls_stay_strictly_monotonic() {
        let clock = Arc::new(ManualClock::at(local("2025-03-09 14:30:05")));
        let factory = IdFactory::new(clock);
        let mut prev = factory.next();
        for _ in 0..10 {
            let next = factory.next();
            assert!(next > prev, "{next} must exceed {prev}");
            prev = next;
        }
        // Ten spins from a frozen clock land ten seconds ahead.
        assert_eq!(prev.as_str(), "20250309143015");
    }

    #[test]
    fn clock_step_backwards_does_not_regress() {
        let clock = Arc::new(ManualClock::at(local("2025-03-09 14:30:05")));
        let factory = IdFactory::new(Arc::clone(&clock) as Arc<dyn Clock>);
        let first = factory.next();
        clock.set(local("2025-03-09 14:29:00"));
        let second = factory.next();
        assert!(second > first);
    }

    #[test]
    fn clock_advance_is_used_directly() {
        let clock = Arc::new(ManualClock::at(local("2025-03-09 14:30:05")));
        let factory = IdFactory::new(Arc::clone(&clock) as Arc<dyn Clock>);
        factory.next();
        clock.set(local("2025-03-09 14:31:00"));
        assert_eq!(factory.next().as_str(), "20250309143100");
    }

    #[test]
    fn parse_rejects_bad_ids() {
        assert!(DeploymentId::parse("20250309143005").is_ok());
        assert!(DeploymentId::parse("2025030914300").is_err()); // 13 digits
        assert!(DeploymentId::parse("20250309 43005").is_err()); // non-digit
        assert!(DeploymentId::parse("20251399143005").is_err()); // month 13
        assert!(DeploymentId::parse("").is_err());
    }

    #[test]
    fn lexicographic_order_is_chronological() {
        let a = DeploymentId::parse("20250309143005").unwrap();
        let b = DeploymentId::parse("20250310000000").unwrap();
        assert!(a < b);
    }

    #[test]
    fn serde_round_trip_validates() {
        let id: DeploymentId = serde_json::from_str("\"20250309143005\"").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"20250309143005\"");
        assert!(serde_json::from_str::<DeploymentId>("\"not-an-id\"").is_err());
    }
}
