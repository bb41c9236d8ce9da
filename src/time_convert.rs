//! Time Converter (spec §4.C): convert local "HH:MM"/"HH:MM±HH:MM" and
//! ISO instants into 5-field UTC cron expressions, encoding exactly the
//! minute and hour (and, for one-off jobs, day-of-month and month).

use crate::error::{Result, SchedulerError};
use chrono::{DateTime, Datelike, FixedOffset, LocalResult, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// A 5-field POSIX cron expression, always expressed in UTC (host cron is
/// assumed UTC per spec §4.C).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr(pub String);

impl std::fmt::Display for CronExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl CronExpr {
    /// Parse the expression with the `cron` crate to catch a malformed
    /// field before it is ever installed in the host crontab or handed to
    /// the liveness API as a `schedule`. The crate expects a leading
    /// seconds field we don't otherwise carry, so one is prepended here.
    fn validate(self) -> Result<Self> {
        format!("0 {}", self.0).parse::<cron::Schedule>().map_err(|error| {
            crate::error::Error::Scheduler(SchedulerError::InvalidInput(format!(
                "generated cron '{}' is invalid: {error}",
                self.0
            )))
        })?;
        Ok(self)
    }
}

/// Parse a recurring daily schedule input ("HH:MM" or "HH:MM±HH:MM") and
/// return the UTC cron for "every day at that wall-clock time".
/// Never rejected for being in the past — the next occurrence is implicit.
pub fn daily_to_utc_cron(input: &str, system_tz: &str) -> Result<CronExpr> {
    let (hour, minute) = parse_daily_time(input, system_tz)?;
    CronExpr(format!("{minute} {hour} * * *")).validate()
}

/// Parse a one-off ISO instant and return the UTC cron encoding its
/// exact minute, hour, day-of-month and month (day-of-week is `*`).
/// Rejects instants that are not strictly in the future relative to `now`.
pub fn one_off_to_utc_cron(input: &str, now: DateTime<Utc>) -> Result<(CronExpr, DateTime<Utc>)> {
    let instant = parse_one_off_instant(input)?;
    if instant <= now {
        return Err(SchedulerError::InvalidInput(format!(
            "scheduledTime '{input}' is in the past"
        ))
        .into());
    }
    let cron = CronExpr(format!(
        "{} {} {} {} *",
        instant.minute(),
        instant.hour(),
        instant.day(),
        instant.month()
    ))
    .validate()?;
    Ok((cron, instant))
}

/// Parse "HH:MM" (interpreted in `system_tz`) or "HH:MM±HH:MM"
/// (interpreted in the explicit offset) into a UTC (hour, minute) pair.
fn parse_daily_time(input: &str, system_tz: &str) -> Result<(u32, u32)> {
    if let Some((hm, offset)) = split_offset(input) {
        let naive_time = parse_hh_mm(hm)?;
        let offset = parse_offset(offset)?;
        let today = Utc::now().with_timezone(&offset).date_naive();
        let naive_dt = today.and_time(naive_time);
        let local_dt = offset
            .from_local_datetime(&naive_dt)
            .single()
            .unwrap_or_else(|| offset.from_utc_datetime(&naive_dt));
        let utc = local_dt.with_timezone(&Utc);
        return Ok((utc.hour(), utc.minute()));
    }

    let naive_time = parse_hh_mm(input)?;
    let tz: Tz = system_tz
        .parse()
        .map_err(|_| SchedulerError::InvalidInput(format!("invalid system timezone '{system_tz}'")))?;

    let today = Utc::now().with_timezone(&tz).date_naive();
    let naive_dt = today.and_time(naive_time);

    // DST gaps/overlaps: prefer the post-transition interpretation —
    // for a `Single` result use it; for `Ambiguous` take the later of
    // the two (the interpretation after the clocks moved); for `None`
    // (a gap) roll forward minute-by-minute until a valid local time is
    // found, which lands just after the transition.
    let local_dt = match tz.from_local_datetime(&naive_dt) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(_earlier, later) => later,
        LocalResult::None => {
            let mut probe = naive_dt;
            loop {
                probe += chrono::Duration::minutes(1);
                if let LocalResult::Single(dt) = tz.from_local_datetime(&probe) {
                    break dt;
                }
            }
        }
    };

    let utc = local_dt.with_timezone(&Utc);
    Ok((utc.hour(), utc.minute()))
}

fn parse_one_off_instant(input: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(input)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| SchedulerError::InvalidInput(format!("'{input}' is not a valid ISO instant")).into())
}

fn parse_hh_mm(input: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(input, "%H:%M")
        .map_err(|_| SchedulerError::InvalidInput(format!("'{input}' is not a valid HH:MM time")).into())
}

fn parse_offset(offset: &str) -> Result<FixedOffset> {
    let (sign, rest) = match offset.as_bytes().first() {
        Some(b'+') => (1, &offset[1..]),
        Some(b'-') => (-1, &offset[1..]),
        _ => return Err(SchedulerError::InvalidInput(format!("invalid offset '{offset}'")).into()),
    };
    let naive = parse_hh_mm(rest)?;
    let seconds = sign * (naive.hour() as i32 * 3600 + naive.minute() as i32 * 60);
    FixedOffset::east_opt(seconds)
        .ok_or_else(|| SchedulerError::InvalidInput(format!("offset '{offset}' out of range")).into())
}

/// Split "HH:MM+HH:MM" / "HH:MM-HH:MM" into its time and offset parts.
/// Returns `None` for a bare "HH:MM" with no offset.
fn split_offset(input: &str) -> Option<(&str, &str)> {
    let bytes = input.as_bytes();
    for (i, b) in bytes.iter().enumerate().skip(1) {
        if *b == b'+' || *b == b'-' {
            return Some((&input[..i], &input[i..]));
        }
    }
    None
}

/// Read back the UTC (hour, minute) a recurring cron expression encodes,
/// for the round-trip idempotence property in spec §8.
pub fn cron_to_hm(cron: &CronExpr) -> Option<(u32, u32)> {
    let mut fields = cron.0.split_whitespace();
    let minute: u32 = fields.next()?.parse().ok()?;
    let hour: u32 = fields.next()?.parse().ok()?;
    Some((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_utc_offset_time_converts_directly() {
        let cron = daily_to_utc_cron("06:30-08:00", "UTC").unwrap();
        assert_eq!(cron.0, "30 14 * * *");
    }

    #[test]
    fn daily_positive_offset_wraps_hour() {
        let cron = daily_to_utc_cron("23:30+05:00", "UTC").unwrap();
        assert_eq!(cron.0, "30 18 * * *");
    }

    #[test]
    fn one_off_past_instant_is_rejected() {
        let now: DateTime<Utc> = "2026-07-28T10:00:00Z".parse().unwrap();
        let error = one_off_to_utc_cron("2020-01-01T00:00:00Z", now).unwrap_err();
        assert!(error.to_string().contains("past"));
    }

    #[test]
    fn one_off_future_instant_encodes_minute_hour_dom_month() {
        let now: DateTime<Utc> = "2026-07-28T10:00:00Z".parse().unwrap();
        let (cron, instant) = one_off_to_utc_cron("2030-01-15T06:30:00Z", now).unwrap();
        assert_eq!(cron.0, "30 6 15 1 *");
        assert_eq!(instant.year(), 2030);
    }

    #[test]
    fn round_trip_is_idempotent_for_utc_input() {
        let first = daily_to_utc_cron("06:30+00:00", "UTC").unwrap();
        let (hour, minute) = cron_to_hm(&first).unwrap();
        let round_tripped_input = format!("{hour:02}:{minute:02}+00:00");
        let second = daily_to_utc_cron(&round_tripped_input, "UTC").unwrap();
        assert_eq!(first, second);
    }
}
