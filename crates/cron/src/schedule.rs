//! Trigger selection and next-fire computation for channel job slots.

use {
    chrono::DateTime,
    chrono_tz::Tz,
    cron::Schedule,
    marketsync_channels::types::{SlotSchedule, StartMode},
};

use crate::{Error, Result};

/// When a job slot fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Minutes `0, N, 2N, ...` below 60 of every hour.
    Interval { minutes: u32 },
    /// Once a day at `hour:minute`.
    Daily { hour: u32, minute: u32 },
    /// User cron expression (5, 6 or 7 fields).
    Cron { expr: String },
}

impl Trigger {
    /// Trigger for a slot. `Ok(None)` means the slot is manual.
    pub fn from_slot(slot: &SlotSchedule<'_>) -> Result<Option<Self>> {
        let trigger = match slot.start {
            StartMode::Manual => return Ok(None),
            StartMode::Interval => {
                let minutes = slot
                    .interval
                    .ok_or_else(|| Error::invalid_trigger("interval is not set"))?;
                if minutes == 0 {
                    return Err(Error::invalid_trigger("interval must be positive"));
                }
                Self::Interval { minutes }
            },
            StartMode::Cron => {
                let expr = slot
                    .cron
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .ok_or_else(|| Error::invalid_trigger("cron expression is not set"))?;
                parse_cron(expr)?;
                Self::Cron {
                    expr: expr.to_string(),
                }
            },
            StartMode::Daily => {
                let time = slot
                    .time
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| Error::invalid_trigger("time is not set"))?;
                let (hour, minute) = parse_time(time)?;
                Self::Daily { hour, minute }
            },
        };
        Ok(Some(trigger))
    }

    /// Seven-field cron expression equivalent to this trigger.
    pub fn cron_expression(&self) -> String {
        match self {
            Self::Interval { minutes } => {
                let step = usize::try_from(*minutes).unwrap_or(60).max(1);
                let list: Vec<String> = (0..60).step_by(step).map(|m| m.to_string()).collect();
                format!("0 {} * * * * *", list.join(","))
            },
            Self::Daily { hour, minute } => format!("0 {minute} {hour} * * * *"),
            Self::Cron { expr } => expr.clone(),
        }
    }

    pub fn schedule(&self) -> Result<Schedule> {
        parse_cron(&self.cron_expression())
    }
}

/// Parse a cron expression. Five-field expressions follow Unix rules
/// (weekday 0 and 7 are Sunday) and get seconds and year fields added.
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    let invalid = |reason: String| {
        Error::invalid_trigger(format!("invalid cron expression '{expr}': {reason}"))
    };
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let normalized = match fields.as_slice() {
        [minute, hour, dom, month, dow] => {
            let dow = unix_weekdays(dow)
                .ok_or_else(|| invalid(format!("bad weekday field '{dow}'")))?;
            format!("0 {minute} {hour} {dom} {month} {dow} *")
        },
        _ => expr.to_string(),
    };
    normalized.parse::<Schedule>().map_err(|e| invalid(e.to_string()))
}

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Rewrite a Unix weekday field (0-7, Sunday = 0 or 7) as day names.
fn unix_weekdays(field: &str) -> Option<String> {
    if field == "*" || field == "?" {
        return Some(field.to_string());
    }
    let mut days = [false; 7];
    let mut named = Vec::new();
    for part in field.split(',') {
        if part.chars().any(|c| c.is_ascii_alphabetic()) {
            named.push(part);
            continue;
        }
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(step.parse::<usize>().ok().filter(|s| *s > 0)?)),
            None => (part, None),
        };
        let (lo, hi) = match range {
            "*" => (0, 6),
            _ => match range.split_once('-') {
                Some((lo, hi)) => (lo.parse::<usize>().ok()?, hi.parse::<usize>().ok()?),
                None => {
                    let day = range.parse::<usize>().ok()?;
                    (day, if step.is_some() { 6 } else { day })
                },
            },
        };
        if lo > hi || hi > 7 {
            return None;
        }
        for day in (lo..=hi).step_by(step.unwrap_or(1)) {
            days[day % 7] = true;
        }
    }
    let mut out: Vec<&str> = WEEKDAYS
        .iter()
        .zip(days)
        .filter_map(|(name, set)| set.then_some(*name))
        .collect();
    out.extend(named);
    Some(out.join(","))
}

fn parse_time(time: &str) -> Result<(u32, u32)> {
    let invalid = || Error::invalid_trigger(format!("invalid time '{time}', expected HH:MM"));
    let (h, m) = time.split_once(':').ok_or_else(invalid)?;
    let hour: u32 = h.trim().parse().map_err(|_| invalid())?;
    let minute: u32 = m.trim().parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

/// Next fire time (epoch millis) strictly after `now_ms`, evaluated in `tz`
/// (UTC when `None`).
pub fn next_fire(trigger: &Trigger, now_ms: u64, tz: Option<Tz>) -> Result<Option<u64>> {
    let schedule = trigger.schedule()?;
    let now = DateTime::from_timestamp_millis(now_ms as i64).unwrap_or_default();
    let next = match tz {
        Some(tz) => schedule
            .after(&now.with_timezone(&tz))
            .next()
            .map(|dt| dt.timestamp_millis() as u64),
        None => schedule
            .after(&now)
            .next()
            .map(|dt| dt.timestamp_millis() as u64),
    };
    Ok(next)
}
