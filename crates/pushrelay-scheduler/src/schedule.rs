use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::{
    error::{Result, SchedulerError},
    registry::{require_str, require_u64, Loadable, Record, Saveable},
};

/// Literal stored for a one-time schedule that has already fired.
const ZERO_TIME: &str = "zero";

/// Strategy producing the next fire time given the current time.
///
/// `None` means the schedule is exhausted and its entry must be removed. Once a
/// schedule has returned `None` it must keep doing so, and successive results
/// must never move backwards in time.
pub trait Schedule: Send + Sync {
    fn next(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>>;

    /// Persistent form of this schedule, if it has one.
    fn persist(&self) -> Option<&dyn Saveable> {
        None
    }
}

/// Fires exactly once at a fixed instant.
///
/// The instant is handed out by the first call to [`Schedule::next`]; every
/// later call returns `None`, whatever `now` is.
#[derive(Debug)]
pub struct OneTime {
    at: Mutex<Option<DateTime<Utc>>>,
}

impl OneTime {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            at: Mutex::new(Some(at)),
        }
    }

    /// The instant not yet handed out, if any.
    pub fn pending(&self) -> Option<DateTime<Utc>> {
        *self.at.lock().expect("one-time schedule poisoned")
    }
}

impl Schedule for OneTime {
    fn next(&self, _now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.at.lock().expect("one-time schedule poisoned").take()
    }

    fn persist(&self) -> Option<&dyn Saveable> {
        Some(self)
    }
}

impl Saveable for OneTime {
    fn type_tag(&self) -> &'static str {
        Self::TYPE_TAG
    }

    fn save(&self) -> Result<Record> {
        let time = match self.pending() {
            None => ZERO_TIME.to_string(),
            Some(at) => encode_nanos(at)?,
        };
        let mut record = Record::new();
        record.insert("time".to_string(), Value::String(time));
        Ok(record)
    }
}

impl Loadable for OneTime {
    const TYPE_TAG: &'static str = "one_time";

    fn load(record: &Record) -> Result<Self> {
        let time = require_str(record, "time")?;
        let at = if time == ZERO_TIME {
            None
        } else {
            Some(decode_nanos(time)?)
        };
        Ok(Self { at: Mutex::new(at) })
    }
}

/// Signed hexadecimal Unix nanoseconds, e.g. `17f0c1a2b3c4d5e6` or `-3b9aca00`.
fn encode_nanos(at: DateTime<Utc>) -> Result<String> {
    let nanos = at.timestamp_nanos_opt().ok_or_else(|| {
        SchedulerError::InvalidRecord(format!("'time' out of range: {at}"))
    })?;
    Ok(if nanos < 0 {
        format!("-{:x}", nanos.unsigned_abs())
    } else {
        format!("{nanos:x}")
    })
}

fn decode_nanos(s: &str) -> Result<DateTime<Utc>> {
    let nanos = i64::from_str_radix(s, 16)
        .map_err(|e| SchedulerError::InvalidRecord(format!("invalid 'time': {e}")))?;
    Ok(Utc.timestamp_nanos(nanos))
}

/// Fires repeatedly, `every` after the wake that fired it.
///
/// With a run budget the schedule is exhausted after that many occurrences.
#[derive(Debug)]
pub struct Every {
    every: Duration,
    remaining: Mutex<Option<u64>>,
}

impl Every {
    /// Unbounded repetition. A zero interval is raised to one millisecond.
    pub fn new(every: Duration) -> Self {
        Self {
            every: every.max(Duration::from_millis(1)),
            remaining: Mutex::new(None),
        }
    }

    /// Repeat exactly `times` occurrences.
    pub fn times(every: Duration, times: u64) -> Self {
        let schedule = Self::new(every);
        *schedule.remaining.lock().expect("every schedule poisoned") = Some(times);
        schedule
    }

    pub fn interval(&self) -> Duration {
        self.every
    }
}

impl Schedule for Every {
    fn next(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut remaining = self.remaining.lock().expect("every schedule poisoned");
        match *remaining {
            Some(0) => return None,
            Some(n) => *remaining = Some(n - 1),
            None => {}
        }
        let step = chrono::Duration::from_std(self.every).ok()?;
        now.checked_add_signed(step)
    }

    fn persist(&self) -> Option<&dyn Saveable> {
        Some(self)
    }
}

impl Saveable for Every {
    fn type_tag(&self) -> &'static str {
        Self::TYPE_TAG
    }

    fn save(&self) -> Result<Record> {
        let every_ns = u64::try_from(self.every.as_nanos()).map_err(|_| {
            SchedulerError::InvalidRecord(format!("interval out of range: {:?}", self.every))
        })?;
        let remaining = *self.remaining.lock().expect("every schedule poisoned");
        let mut record = Record::new();
        record.insert("every_ns".to_string(), Value::from(every_ns));
        record.insert(
            "remaining".to_string(),
            remaining.map_or(Value::Null, Value::from),
        );
        Ok(record)
    }
}

impl Loadable for Every {
    const TYPE_TAG: &'static str = "every";

    fn load(record: &Record) -> Result<Self> {
        let every_ns = require_u64(record, "every_ns")?;
        if every_ns == 0 {
            return Err(SchedulerError::InvalidRecord(
                "'every_ns' must be positive".to_string(),
            ));
        }
        let remaining = match record.get("remaining") {
            None | Some(Value::Null) => None,
            Some(_) => Some(require_u64(record, "remaining")?),
        };
        Ok(Self {
            every: Duration::from_nanos(every_ns),
            remaining: Mutex::new(remaining),
        })
    }
}
