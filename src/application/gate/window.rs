use crate::domain::errors::ConfigurationError;
use chrono::{
    DateTime, Duration as ChronoDuration, FixedOffset, Local, NaiveDateTime, NaiveTime,
    TimeZone, Utc,
};

/// Wall-clock bounds of a gate, both ends carrying the same UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateWindow {
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
}

impl GateWindow {
    pub fn new(
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<Self, ConfigurationError> {
        if start.offset() != end.offset() {
            return Err(ConfigurationError::InvalidWindow {
                reason: format!(
                    "start offset {} does not match end offset {}",
                    start.offset(),
                    end.offset()
                ),
            });
        }
        Self::ordered(start, end)
    }

    /// Parses ISO-8601 bounds.
    ///
    /// Either both carry an explicit offset (which must match) or both are naive and are read
    /// in the local timezone. Mixing the two forms is rejected.
    pub fn parse(start: &str, end: &str) -> Result<Self, ConfigurationError> {
        match (parse_instant(start)?, parse_instant(end)?) {
            (Instant::Offset(s), Instant::Offset(e)) => Self::new(s, e),
            (Instant::Naive(s), Instant::Naive(e)) => {
                Self::ordered(localize(s, "start")?, localize(e, "end")?)
            }
            _ => Err(ConfigurationError::InvalidWindow {
                reason: format!(
                    "start '{}' and end '{}' must both be timezone-aware or both naive",
                    start, end
                ),
            }),
        }
    }

    /// Window opening now and closing after `duration`
    pub fn starting_now(duration: std::time::Duration) -> Result<Self, ConfigurationError> {
        let start = Utc::now().fixed_offset();
        let span = ChronoDuration::from_std(duration).map_err(|e| {
            ConfigurationError::InvalidWindow {
                reason: e.to_string(),
            }
        })?;
        Self::new(start, start + span)
    }

    fn ordered(
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<Self, ConfigurationError> {
        if end < start {
            return Err(ConfigurationError::InvalidWindow {
                reason: format!("end {} is before start {}", end, start),
            });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<FixedOffset> {
        self.start
    }

    pub fn end(&self) -> DateTime<FixedOffset> {
        self.end
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        now >= self.start.with_timezone(&Utc)
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now >= self.end.with_timezone(&Utc)
    }

    pub fn until_start(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.start.with_timezone(&Utc) - now)
            .to_std()
            .unwrap_or_default()
    }

    pub fn until_end(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.end.with_timezone(&Utc) - now)
            .to_std()
            .unwrap_or_default()
    }
}

enum Instant {
    Offset(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

fn parse_instant(value: &str) -> Result<Instant, ConfigurationError> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(Instant::Offset(dt));
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%:z") {
        return Ok(Instant::Offset(dt));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(Instant::Naive(dt));
        }
    }
    Err(ConfigurationError::InvalidValue {
        field: "datetime".to_string(),
        reason: format!("'{}' is not an ISO-8601 datetime", value),
    })
}

fn localize(naive: NaiveDateTime, which: &str) -> Result<DateTime<FixedOffset>, ConfigurationError> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.fixed_offset())
        .ok_or_else(|| ConfigurationError::InvalidWindow {
            reason: format!("{} {} does not exist in the local timezone", which, naive),
        })
}

/// Parses either an ISO-8601 datetime or `HH:MM:SS [delta_days]` relative to today (local).
///
/// `05:30:00 1` means 05:30 tomorrow.
pub fn parse_clock_time(value: &str) -> Result<String, ConfigurationError> {
    let value = value.trim();
    if parse_instant(value).is_ok() {
        return Ok(value.to_string());
    }

    let mut parts = value.split_whitespace();
    let invalid = || ConfigurationError::InvalidValue {
        field: "time".to_string(),
        reason: format!("'{}' is neither ISO-8601 nor 'HH:MM:SS [delta_days]'", value),
    };
    let time = parts
        .next()
        .and_then(|t| NaiveTime::parse_from_str(t, "%H:%M:%S").ok())
        .ok_or_else(invalid)?;
    let delta_days: i64 = match parts.next() {
        Some(d) => d.parse().map_err(|_| invalid())?,
        None => 0,
    };
    if parts.next().is_some() {
        return Err(invalid());
    }

    let date = Local::now().date_naive() + ChronoDuration::days(delta_days);
    Ok(date.and_time(time).format("%Y-%m-%dT%H:%M:%S").to_string())
}
