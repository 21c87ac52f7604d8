//! Cron trigger evaluation
//!
//! A [`CronTrigger`] is built from a [`CronSchedule`] and answers one
//! question: when does it fire next? Each of the eight fields accepts
//! `*`, `*/n`, `a`, `a-b`, `a-b/n`, `a/n` and comma-separated lists of
//! those. Months and weekdays may be given by name (`jan`, `mon`; Monday
//! is 0).
//!
//! Fields less significant than the least significant explicit field take
//! their minimum value, so `{"hour": 3}` fires at 03:00:00 every day rather
//! than every second of that hour. All times are UTC.

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc,
};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::domain::schedule::CronSchedule;

/// Errors produced while building a trigger
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    #[error("invalid schedule: {0}")]
    Invalid(String),

    #[error("invalid value {expr:?} for field '{field}': {reason}")]
    InvalidField {
        field: &'static str,
        expr: String,
        reason: String,
    },

    #[error("schedule never fires")]
    NeverFires,
}

/// Days scanned before concluding a schedule has no further match.
/// Weekday and leap-day alignment repeats every 28 years.
const SEARCH_HORIZON_DAYS: u32 = 28 * 366;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

#[derive(Debug, Clone, Copy)]
struct FieldKind {
    name: &'static str,
    min: u32,
    max: u32,
    default: &'static str,
}

const FIELD_KINDS: [FieldKind; 8] = [
    FieldKind { name: "year", min: 1970, max: 9999, default: "*" },
    FieldKind { name: "month", min: 1, max: 12, default: "1" },
    FieldKind { name: "day", min: 1, max: 31, default: "1" },
    FieldKind { name: "week", min: 1, max: 53, default: "*" },
    FieldKind { name: "day_of_week", min: 0, max: 6, default: "*" },
    FieldKind { name: "hour", min: 0, max: 23, default: "0" },
    FieldKind { name: "minute", min: 0, max: 59, default: "0" },
    FieldKind { name: "second", min: 0, max: 59, default: "0" },
];

const YEAR: usize = 0;
const MONTH: usize = 1;
const DAY: usize = 2;
const WEEK: usize = 3;
const DAY_OF_WEEK: usize = 4;
const HOUR: usize = 5;
const MINUTE: usize = 6;
const SECOND: usize = 7;

/// Set of values one field matches
#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldSet {
    expr: String,
    any: bool,
    values: BTreeSet<u32>,
    min: u32,
    max: u32,
}

impl FieldSet {
    fn parse(kind: &FieldKind, expr: &str) -> Result<Self, TriggerError> {
        let normalized = expr.trim().to_lowercase();
        let invalid = |reason: &str| TriggerError::InvalidField {
            field: kind.name,
            expr: expr.to_string(),
            reason: reason.to_string(),
        };

        if normalized.is_empty() {
            return Err(invalid("empty expression"));
        }

        let mut any = false;
        let mut values = BTreeSet::new();

        for part in normalized.split(',') {
            let part = part.trim();
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step = step
                        .trim()
                        .parse::<u32>()
                        .map_err(|_| invalid("step is not a number"))?;
                    if step == 0 {
                        return Err(invalid("step must be greater than 0"));
                    }
                    (range.trim(), Some(step))
                }
                None => (part, None),
            };

            let (low, high) = if range == "*" {
                if step.is_none() {
                    any = true;
                    continue;
                }
                (kind.min, kind.max)
            } else if let Some((low, high)) = range.split_once('-') {
                (parse_value(kind, low, &invalid)?, parse_value(kind, high, &invalid)?)
            } else {
                let value = parse_value(kind, range, &invalid)?;
                // `a/n` runs from a to the end of the range
                match step {
                    Some(_) => (value, kind.max),
                    None => (value, value),
                }
            };

            if low > high {
                return Err(invalid("range start is after range end"));
            }

            values.extend((low..=high).step_by(step.unwrap_or(1) as usize));
        }

        if any {
            values.clear();
        }

        Ok(Self {
            expr: normalized,
            any,
            values,
            min: kind.min,
            max: kind.max,
        })
    }

    fn contains(&self, value: u32) -> bool {
        self.any || self.values.contains(&value)
    }

    fn iter_from(&self, start: u32) -> Box<dyn Iterator<Item = u32> + '_> {
        if self.any {
            Box::new(start.max(self.min)..=self.max)
        } else {
            Box::new(self.values.range(start..).copied())
        }
    }

    fn first_from(&self, start: u32) -> Option<u32> {
        self.iter_from(start).next()
    }
}

fn parse_value(
    kind: &FieldKind,
    text: &str,
    invalid: &dyn Fn(&str) -> TriggerError,
) -> Result<u32, TriggerError> {
    let text = text.trim();

    let names: &[&str] = match kind.name {
        "month" => &MONTH_NAMES,
        "day_of_week" => &WEEKDAY_NAMES,
        _ => &[],
    };
    if let Some(position) = names.iter().position(|name| *name == text) {
        // Months are 1-based, weekdays 0-based
        let offset = if kind.name == "month" { 1 } else { 0 };
        return Ok(position as u32 + offset);
    }

    let value = text
        .parse::<u32>()
        .map_err(|_| invalid("not a number or known name"))?;

    if value < kind.min || value > kind.max {
        return Err(invalid(&format!(
            "must be between {} and {}",
            kind.min, kind.max
        )));
    }

    Ok(value)
}

fn parse_date(field: &'static str, text: &str) -> Result<DateTime<Utc>, TriggerError> {
    let text = text.trim();

    if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
        return Ok(datetime.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
    }

    Err(TriggerError::InvalidField {
        field,
        expr: text.to_string(),
        reason: "expected an RFC 3339 timestamp or YYYY-MM-DD[ HH:MM:SS]".to_string(),
    })
}

fn ceil_to_second(time: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = time.with_nanosecond(0).unwrap_or(time);
    if truncated < time {
        truncated + Duration::seconds(1)
    } else {
        truncated
    }
}

/// Evaluates a cron schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronTrigger {
    fields: Vec<FieldSet>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
}

impl CronTrigger {
    /// Builds a trigger, validating every field and date
    pub fn new(schedule: CronSchedule) -> Result<Self, TriggerError> {
        let explicit = schedule.fields();
        let least_significant = explicit
            .iter()
            .rposition(|(_, value)| value.is_some())
            .ok_or_else(|| TriggerError::Invalid("schedule has no cron fields".to_string()))?;

        let mut fields = Vec::with_capacity(FIELD_KINDS.len());
        for (index, (kind, (_, value))) in FIELD_KINDS.iter().zip(explicit.iter()).enumerate() {
            let expr = match value {
                Some(value) => value.to_string(),
                None if index > least_significant => kind.default.to_string(),
                None => "*".to_string(),
            };
            fields.push(FieldSet::parse(kind, &expr)?);
        }

        let start_date = schedule
            .start_date
            .as_deref()
            .map(|text| parse_date("start_date", text))
            .transpose()?;
        let end_date = schedule
            .end_date
            .as_deref()
            .map(|text| parse_date("end_date", text))
            .transpose()?;

        if let (Some(start), Some(end)) = (start_date, end_date) {
            if start > end {
                return Err(TriggerError::Invalid(
                    "start_date is after end_date".to_string(),
                ));
            }
        }

        Ok(Self {
            fields,
            start_date,
            end_date,
        })
    }

    /// Next fire time strictly after `previous`, or at/after `now` when
    /// there is no previous firing
    ///
    /// Returns `None` once the schedule is exhausted (past its end date or
    /// no matching calendar time remains).
    pub fn next_fire_time(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let mut start = match previous {
            Some(previous) => previous + Duration::seconds(1),
            None => now,
        };
        if let Some(start_date) = self.start_date {
            start = start.max(start_date);
        }
        let start = ceil_to_second(start);

        let candidate = Utc.from_utc_datetime(&self.first_match_from(start.naive_utc())?);

        match self.end_date {
            Some(end) if candidate > end => None,
            _ => Some(candidate),
        }
    }

    /// Up to `count` consecutive fire times starting from `now`
    pub fn upcoming(&self, now: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut previous = None;

        while times.len() < count {
            match self.next_fire_time(previous, now) {
                Some(next) => {
                    times.push(next);
                    previous = Some(next);
                }
                None => break,
            }
        }

        times
    }

    /// Resolved expression of every field, plus the date bounds if set
    pub fn describe(&self) -> BTreeMap<String, String> {
        let mut fields: BTreeMap<String, String> = FIELD_KINDS
            .iter()
            .zip(self.fields.iter())
            .map(|(kind, field)| (kind.name.to_string(), field.expr.clone()))
            .collect();

        if let Some(start) = self.start_date {
            fields.insert("start_date".to_string(), start.to_rfc3339());
        }
        if let Some(end) = self.end_date {
            fields.insert("end_date".to_string(), end.to_rfc3339());
        }

        fields
    }

    fn first_match_from(&self, start: NaiveDateTime) -> Option<NaiveDateTime> {
        let year = &self.fields[YEAR];
        let end_date = self.end_date.map(|end| end.date_naive());

        let mut date = start.date();
        let mut from_time = Some(start.time());
        let mut scanned = 0;

        while scanned <= SEARCH_HORIZON_DAYS {
            if end_date.is_some_and(|end| date > end) {
                return None;
            }

            let current_year = date.year() as u32;
            if !year.contains(current_year) {
                let next_year = year.first_from(current_year + 1)?;
                date = NaiveDate::from_ymd_opt(next_year as i32, 1, 1)?;
                from_time = None;
                continue;
            }

            if self.matches_date(date) {
                let (hour, minute, second) = from_time
                    .map(|time| (time.hour(), time.minute(), time.second()))
                    .unwrap_or((0, 0, 0));

                if let Some(time) = self.first_time_from(hour, minute, second) {
                    return Some(date.and_time(time));
                }
            }

            from_time = None;
            date = date.succ_opt()?;
            scanned += 1;
        }

        None
    }

    fn matches_date(&self, date: NaiveDate) -> bool {
        self.fields[MONTH].contains(date.month())
            && self.fields[DAY].contains(date.day())
            && self.fields[WEEK].contains(date.iso_week().week())
            && self.fields[DAY_OF_WEEK].contains(date.weekday().num_days_from_monday())
    }

    fn first_time_from(&self, hour: u32, minute: u32, second: u32) -> Option<NaiveTime> {
        for h in self.fields[HOUR].iter_from(hour) {
            let minute_start = if h == hour { minute } else { 0 };

            for m in self.fields[MINUTE].iter_from(minute_start) {
                let second_start = if h == hour && m == minute { second } else { 0 };

                if let Some(s) = self.fields[SECOND].first_from(second_start) {
                    return NaiveTime::from_hms_opt(h, m, s);
                }
            }
        }

        None
    }
}
