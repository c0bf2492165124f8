//! ISO-8601 time-only duration parsing and formatting.
//!
//! Wire durations (`estimated_duration`, `actual_duration`, `due_offset`) use the
//! `PT#H#M#S` time-designator form. A date portion (`Y`/`M`/`W`/`D` before `T`) may be
//! present on input but is not honored — presence of a date portion without a `T` time
//! marker is rejected outright, since such a string carries no time component at all.

use std::fmt;

use chrono::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("duration must start with 'P'")]
    MissingPrefix,
    #[error("duration has a date component but no 'T' time marker")]
    DateWithoutTimeMarker,
    #[error("duration has no time component after 'T'")]
    EmptyTimeComponent,
    #[error("invalid numeric component in duration")]
    InvalidNumber,
    #[error("unrecognized duration component designator '{0}'")]
    UnknownDesignator(char),
}

/// Parses an ISO-8601 duration string, honoring only the time portion.
pub fn parse(input: &str) -> Result<Duration, DurationParseError> {
    let rest = input
        .strip_prefix('P')
        .ok_or(DurationParseError::MissingPrefix)?;

    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (rest, None),
    };

    match time_part {
        None => {
            if date_part.is_empty() {
                // "P" alone: degenerate but zero-length, treat as zero time duration.
                Ok(Duration::zero())
            } else {
                Err(DurationParseError::DateWithoutTimeMarker)
            }
        }
        Some(t) => {
            if t.is_empty() {
                return Err(DurationParseError::EmptyTimeComponent);
            }
            parse_time_component(t)
        }
    }
}

fn parse_time_component(time: &str) -> Result<Duration, DurationParseError> {
    let mut total = Duration::zero();
    let mut number = String::new();

    for ch in time.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            number.push(ch);
            continue;
        }

        let value: f64 = number
            .parse()
            .map_err(|_| DurationParseError::InvalidNumber)?;
        number.clear();

        let component = match ch {
            'H' => Duration::milliseconds((value * 3_600_000.0).round() as i64),
            'M' => Duration::milliseconds((value * 60_000.0).round() as i64),
            'S' => Duration::milliseconds((value * 1_000.0).round() as i64),
            other => return Err(DurationParseError::UnknownDesignator(other)),
        };

        total += component;
    }

    if !number.is_empty() {
        return Err(DurationParseError::InvalidNumber);
    }

    Ok(total)
}

/// Formats a duration back into its canonical `PT#H#M#S` form.
///
/// Canonicalization normalizes to whole hours/minutes/seconds and always emits
/// at least one component (`PT0S` for a zero duration).
pub fn format(duration: Duration) -> String {
    let total_seconds = duration.num_seconds();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    let mut out = String::from("PT");
    if hours != 0 {
        fmt::Write::write_fmt(&mut out, format_args!("{}H", hours)).ok();
    }
    if minutes != 0 {
        fmt::Write::write_fmt(&mut out, format_args!("{}M", minutes)).ok();
    }
    if seconds != 0 || (hours == 0 && minutes == 0) {
        fmt::Write::write_fmt(&mut out, format_args!("{}S", seconds)).ok();
    }
    out
}

/// `canonical(s)` for the round-trip law `format(parse(s)) == canonical(s)`.
pub fn canonical(input: &str) -> Result<String, DurationParseError> {
    parse(input).map(format)
}
