//! Date functions.
//!
//! Durations are ISO 8601 (`P1Y2M3DT4H5M6S`, optionally negated with a
//! leading `-`). Timestamps are always UTC.

use chrono::{DateTime, Months, NaiveDate, NaiveDateTime, TimeDelta, Utc};

use crate::error::{ExpressionError, FunctionErrorKind, Result};
use crate::eval::builtins::{expect_args, expect_int, expect_string};
use crate::eval::context::Context;
use crate::eval::format;
use crate::eval::registry::FunctionDescriptor;
use crate::eval::value::Value;

pub(super) const FUNCTIONS: &[FunctionDescriptor] = &[
    FunctionDescriptor::eager("dateTimeAdd", eval_date_time_add),
    FunctionDescriptor::eager("dateTimeFromEpoch", eval_date_time_from_epoch),
    FunctionDescriptor::eager("dateTimeToEpoch", eval_date_time_to_epoch),
    FunctionDescriptor::eager("utcNow", eval_utc_now),
];

const DEFAULT_NOW_FORMAT: &str = "yyyyMMddTHHmmssZ";
const ISO_FORMAT: &str = "yyyy'-'MM'-'dd'T'HH':'mm':'ss'Z'";

/// A parsed ISO 8601 duration.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct IsoDuration {
    negative: bool,
    months: u32,
    seconds: f64,
}

impl IsoDuration {
    fn parse(source: &str) -> Option<Self> {
        let (negative, rest) = match source.trim().strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, source.trim()),
        };
        let rest = rest.strip_prefix(['P', 'p'])?;
        if rest.is_empty() {
            return None;
        }
        let mut duration = IsoDuration {
            negative,
            ..Self::default()
        };
        let mut in_time = false;
        let mut number = String::new();
        for c in rest.chars() {
            match c.to_ascii_uppercase() {
                'T' if !in_time && number.is_empty() => in_time = true,
                '0'..='9' | '.' => number.push(c),
                unit => {
                    let n: f64 = number.parse().ok()?;
                    number.clear();
                    match (in_time, unit) {
                        (false, 'Y') => {
                            duration.months =
                                duration.months.checked_add((n as u32).checked_mul(12)?)?
                        }
                        (false, 'M') => duration.months = duration.months.checked_add(n as u32)?,
                        (false, 'W') => duration.seconds += n * 7.0 * 86_400.0,
                        (false, 'D') => duration.seconds += n * 86_400.0,
                        (true, 'H') => duration.seconds += n * 3_600.0,
                        (true, 'M') => duration.seconds += n * 60.0,
                        (true, 'S') => duration.seconds += n,
                        _ => return None,
                    }
                }
            }
        }
        if !number.is_empty() {
            return None;
        }
        Some(duration)
    }

    fn apply(&self, base: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let months = Months::new(self.months);
        let delta = TimeDelta::try_milliseconds((self.seconds * 1_000.0).round() as i64)?;
        if self.negative {
            base.checked_sub_months(months)?.checked_sub_signed(delta)
        } else {
            base.checked_add_months(months)?.checked_add_signed(delta)
        }
    }
}

/// Parses a timestamp in the forms templates commonly produce.
pub(crate) fn parse_date_time(source: &str) -> Option<DateTime<Utc>> {
    let source = source.trim();
    if let Ok(value) = DateTime::parse_from_rfc3339(source) {
        return Some(value.with_timezone(&Utc));
    }
    for pattern in [
        "%Y-%m-%d %H:%M:%SZ",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y%m%dT%H%M%SZ",
        "%m/%d/%Y %I:%M:%S %p",
    ] {
        if let Ok(value) = NaiveDateTime::parse_from_str(source, pattern) {
            return Some(value.and_utc());
        }
    }
    NaiveDate::parse_from_str(source, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

fn format_date(function: &str, value: &DateTime<Utc>, pattern: &str) -> Result<Value> {
    format::date_time(value, pattern)
        .map(Value::String)
        .map_err(|reason| ExpressionError::function(function, FunctionErrorKind::InvalidFormat, reason))
}

fn eval_date_time_add(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("dateTimeAdd", args, 2, 3)?;
    let base = expect_string("dateTimeAdd", args, 0)?;
    let duration = expect_string("dateTimeAdd", args, 1)?;
    let base = parse_date_time(&base).ok_or_else(|| {
        ExpressionError::argument("dateTimeAdd", "base", "a valid date and time")
    })?;
    let duration = IsoDuration::parse(&duration).ok_or_else(|| {
        ExpressionError::argument("dateTimeAdd", "duration", "an ISO 8601 duration")
    })?;
    let result = duration.apply(base).ok_or_else(|| {
        ExpressionError::function(
            "dateTimeAdd",
            FunctionErrorKind::OutOfRange,
            "the result is not a representable date",
        )
    })?;
    let pattern = match args.get(2) {
        Some(_) => expect_string("dateTimeAdd", args, 2)?,
        None => ISO_FORMAT.to_string(),
    };
    format_date("dateTimeAdd", &result, &pattern)
}

fn eval_date_time_from_epoch(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("dateTimeFromEpoch", args, 1, 1)?;
    let seconds = expect_int("dateTimeFromEpoch", args, 0)?;
    let value = DateTime::from_timestamp(seconds, 0).ok_or_else(|| {
        ExpressionError::function(
            "dateTimeFromEpoch",
            FunctionErrorKind::OutOfRange,
            format!("{} is not a representable epoch time", seconds),
        )
    })?;
    format_date("dateTimeFromEpoch", &value, ISO_FORMAT)
}

fn eval_date_time_to_epoch(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("dateTimeToEpoch", args, 1, 1)?;
    let source = expect_string("dateTimeToEpoch", args, 0)?;
    let value = parse_date_time(&source).ok_or_else(|| {
        ExpressionError::argument("dateTimeToEpoch", "argument 1", "a valid date and time")
    })?;
    Ok(Value::Int(value.timestamp()))
}

fn eval_utc_now(_ctx: &dyn Context, args: &[Value]) -> Result<Value> {
    expect_args("utcNow", args, 0, 1)?;
    let pattern = match args.first() {
        Some(_) => expect_string("utcNow", args, 0)?,
        None => DEFAULT_NOW_FORMAT.to_string(),
    };
    format_date("utcNow", &Utc::now(), &pattern)
}
