//! The recurrence expander: a pure function from `(template, window,
//! exceptions)` to the ordered set of occurrence candidates.
//!
//! No I/O happens here. The coordinator and worker pool own everything that
//! touches the store; this module only does date arithmetic.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use super::models::{DayOfMonth, RecurrenceConfig, RecurringTemplate, RecurringTemplateException};
use crate::common::TodoItemId;
use crate::domains::recurrence::models::ExceptionType;

/// One occurrence the expander proposes for insertion. `no_op` is set when an
/// `edited` exception covers this slot: the occurrence still "exists" for
/// uniqueness purposes but nothing should be inserted for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub occurs_at: DateTime<Utc>,
    pub no_op: bool,
}

/// An occurrence already materialized as an item, keyed by its template and
/// anchor time, whose `recurring_template_id` has since been cleared by a
/// user edit. The expander must not re-propose these.
#[derive(Debug, Clone)]
pub struct DetachedOccurrence {
    pub occurs_at: DateTime<Utc>,
    pub item_id: TodoItemId,
}

/// Expands `template` over the half-open window `[from, until)`.
///
/// `exceptions` must already be filtered to `occurs_at ∈ [from, until)`;
/// `detached` likewise. Output is strictly ascending by `occurs_at`.
pub fn expand(
    template: &RecurringTemplate,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
    exceptions: &[RecurringTemplateException],
    detached: &[DetachedOccurrence],
) -> Vec<Candidate> {
    let raw = raw_occurrences(template, from, until);

    raw.into_iter()
        .filter(|occurs_at| {
            !detached
                .iter()
                .any(|d| d.occurs_at == *occurs_at)
        })
        .filter_map(|occurs_at| {
            let exception = exceptions.iter().find(|e| e.occurs_at == occurs_at);
            match exception.map(|e| e.exception_type) {
                Some(ExceptionType::Deleted) | Some(ExceptionType::Rescheduled) => None,
                Some(ExceptionType::Edited) => Some(Candidate {
                    occurs_at,
                    no_op: true,
                }),
                None => Some(Candidate {
                    occurs_at,
                    no_op: false,
                }),
            }
        })
        .collect()
}

/// Produces the raw occurrence sequence before exceptions/detachment are
/// applied, strictly ascending, anchored on the template's time-of-day and
/// timezone.
fn raw_occurrences(
    template: &RecurringTemplate,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    let tz: Option<Tz> = template
        .timezone
        .as_deref()
        .and_then(|name| name.parse().ok());
    let time_of_day = anchor_time_of_day(template);

    let local_dates = match &template.recurrence_config.0 {
        RecurrenceConfig::Daily { interval } => {
            daily_dates(template, from, until, tz, time_of_day, *interval)
        }
        RecurrenceConfig::Weekly { interval, days_of_week } => weekly_dates(
            from,
            until,
            tz,
            time_of_day,
            *interval,
            days_of_week,
            template_anchor_date(template, tz),
        ),
        RecurrenceConfig::Biweekly { days_of_week } => weekly_dates(
            from,
            until,
            tz,
            time_of_day,
            2,
            days_of_week,
            template_anchor_date(template, tz),
        ),
        RecurrenceConfig::Monthly { interval, day_of_month } => {
            monthly_dates(from, until, *interval, *day_of_month)
        }
        RecurrenceConfig::Yearly { month, day } => yearly_dates(from, until, *month, *day),
        RecurrenceConfig::Quarterly { month_offset, day } => {
            quarterly_dates(from, until, *month_offset, *day)
        }
        RecurrenceConfig::Weekdays {} => weekday_range(from, until, tz, time_of_day),
    };

    let mut instants: Vec<DateTime<Utc>> = local_dates
        .into_iter()
        .map(|date| to_instant(date, time_of_day, tz))
        .filter(|dt| *dt >= from && *dt < until)
        .collect();

    instants.sort();
    instants.dedup();
    instants
}

fn anchor_time_of_day(template: &RecurringTemplate) -> NaiveTime {
    // `due_offset` stores the anchor time of day as seconds since midnight
    // when no explicit schedule field overrides it.
    let seconds = template.due_offset.unwrap_or(0).rem_euclid(86_400);
    NaiveTime::from_num_seconds_from_midnight_opt(seconds as u32, 0)
        .unwrap_or_else(|| NaiveTime::from_hms_opt(0, 0, 0).unwrap())
}

fn template_anchor_date(template: &RecurringTemplate, tz: Option<Tz>) -> NaiveDate {
    match tz {
        Some(tz) => template.created_at.with_timezone(&tz).date_naive(),
        None => template.created_at.date_naive(),
    }
}

/// Converts a floating/fixed-zone local date + time-of-day to a UTC instant.
fn to_instant(date: NaiveDate, time: NaiveTime, tz: Option<Tz>) -> DateTime<Utc> {
    let naive = date.and_time(time);
    match tz {
        Some(tz) => tz
            .from_local_datetime(&naive)
            .single()
            .unwrap_or_else(|| tz.from_utc_datetime(&naive))
            .with_timezone(&Utc),
        None => Utc.from_utc_datetime(&naive),
    }
}

fn window_dates(from: DateTime<Utc>, until: DateTime<Utc>, tz: Option<Tz>) -> (NaiveDate, NaiveDate) {
    let start = match tz {
        Some(tz) => from.with_timezone(&tz).date_naive(),
        None => from.date_naive(),
    };
    let end = match tz {
        Some(tz) => until.with_timezone(&tz).date_naive(),
        None => until.date_naive(),
    };
    (start, end)
}

fn daily_dates(
    template: &RecurringTemplate,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
    tz: Option<Tz>,
    _time_of_day: NaiveTime,
    interval: u32,
) -> Vec<NaiveDate> {
    let interval = interval.max(1) as i64;
    let anchor = template_anchor_date(template, tz);
    let (start, end) = window_dates(from, until, tz);

    let mut dates = Vec::new();
    let mut cursor = anchor;
    // Fast-forward to the first candidate at/after `start` on the interval cadence.
    if cursor < start {
        let days_behind = (start - cursor).num_days();
        let steps = (days_behind + interval - 1) / interval;
        cursor += Duration::days(steps * interval);
    }
    while cursor <= end {
        dates.push(cursor);
        cursor += Duration::days(interval);
    }
    dates
}

fn weekly_dates(
    from: DateTime<Utc>,
    until: DateTime<Utc>,
    tz: Option<Tz>,
    _time_of_day: NaiveTime,
    interval_weeks: u32,
    days_of_week: &[super::models::Weekday],
    anchor: NaiveDate,
) -> Vec<NaiveDate> {
    let interval_weeks = interval_weeks.max(1) as i64;
    let (start, end) = window_dates(from, until, tz);

    // Anchor week starts on the Monday on/before `anchor`.
    let anchor_monday = anchor - Duration::days(anchor.weekday().num_days_from_monday() as i64);

    let mut dates = Vec::new();
    let mut week_start = anchor_monday;
    // Back up week_start to at or before `start`, aligned to the interval.
    if week_start > start {
        week_start -= Duration::weeks(
            ((week_start - start).num_days() + interval_weeks * 7 - 1) / (interval_weeks * 7)
                * interval_weeks,
        );
    }
    while week_start < start {
        week_start += Duration::weeks(interval_weeks);
    }
    if week_start > anchor_monday {
        // Realign in case the loop above overshot due to interval spacing.
        let weeks_since_anchor = (week_start - anchor_monday).num_days() / 7;
        let aligned_weeks = (weeks_since_anchor / interval_weeks) * interval_weeks;
        week_start = anchor_monday + Duration::weeks(aligned_weeks);
        while week_start < start {
            week_start += Duration::weeks(interval_weeks);
        }
    }

    while week_start <= end {
        for dow in days_of_week {
            let date = week_start + Duration::days((dow.get() - 1) as i64);
            if date >= start && date <= end {
                dates.push(date);
            }
        }
        week_start += Duration::weeks(interval_weeks);
    }
    dates
}

fn weekday_range(
    from: DateTime<Utc>,
    until: DateTime<Utc>,
    tz: Option<Tz>,
    _time_of_day: NaiveTime,
) -> Vec<NaiveDate> {
    let (start, end) = window_dates(from, until, tz);
    let mut dates = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        if !matches!(cursor.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) {
            dates.push(cursor);
        }
        cursor += Duration::days(1);
    }
    dates
}

/// Clamps `day` into the valid range for `year`/`month`, mapping
/// `DayOfMonth::Last` and any overflow (e.g. 31 in February) to the month's
/// actual last day.
fn clamp_day(year: i32, month: u32, day: DayOfMonth) -> u32 {
    let last_day = last_day_of_month(year, month);
    match day {
        DayOfMonth::Last => last_day,
        DayOfMonth::Day(d) => (d as u32).min(last_day),
    }
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .unwrap()
        .pred_opt()
        .unwrap()
        .day()
}

fn monthly_dates(
    from: DateTime<Utc>,
    until: DateTime<Utc>,
    interval: u32,
    day_of_month: DayOfMonth,
) -> Vec<NaiveDate> {
    let interval = interval.max(1) as i32;
    let start = from.date_naive();
    let end = until.date_naive();

    let mut dates = Vec::new();
    let mut year = start.year();
    let mut month = start.month() as i32;

    loop {
        let day = clamp_day(year, month as u32, day_of_month);
        let date = NaiveDate::from_ymd_opt(year, month as u32, day).unwrap();
        if date > end {
            break;
        }
        if date >= start {
            dates.push(date);
        }
        month += interval;
        while month > 12 {
            month -= 12;
            year += 1;
        }
    }
    dates
}

fn yearly_dates(from: DateTime<Utc>, until: DateTime<Utc>, month: u8, day: u8) -> Vec<NaiveDate> {
    let start = from.date_naive();
    let end = until.date_naive();
    let mut dates = Vec::new();

    for year in start.year()..=end.year() {
        let clamped_day = clamp_day(year, month as u32, DayOfMonth::Day(day));
        let date = NaiveDate::from_ymd_opt(year, month as u32, clamped_day).unwrap();
        if date >= start && date < end {
            dates.push(date);
        }
    }
    dates
}

fn quarterly_dates(
    from: DateTime<Utc>,
    until: DateTime<Utc>,
    month_offset: u8,
    day: u8,
) -> Vec<NaiveDate> {
    let start = from.date_naive();
    let end = until.date_naive();
    let mut dates = Vec::new();

    for year in start.year()..=end.year() {
        for quarter_start_month in [1u32, 4, 7, 10] {
            let month = quarter_start_month + month_offset as u32;
            let (year, month) = if month > 12 { (year + 1, month - 12) } else { (year, month) };
            let clamped_day = clamp_day(year, month, DayOfMonth::Day(day));
            let date = NaiveDate::from_ymd_opt(year, month, clamped_day).unwrap();
            if date >= start && date < end {
                dates.push(date);
            }
        }
    }
    dates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::TodoListId;
    use crate::domains::recurrence::models::{RecurrenceConfig, RecurringTemplate, Weekday};

    fn template_with(config: RecurrenceConfig, timezone: Option<&str>, due_offset: Option<i64>) -> RecurringTemplate {
        RecurringTemplate {
            id: crate::common::TemplateId::new(),
            list_id: TodoListId::new(),
            title: "t".into(),
            tags: vec![],
            priority: None,
            estimated_duration: None,
            recurrence_config: sqlx::types::Json(config),
            due_offset,
            timezone: timezone.map(String::from),
            is_active: true,
            created_at: Utc.with_ymd_and_hms(2025, 2, 1, 10, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2025, 2, 1, 10, 0, 0).unwrap(),
            generated_through: Utc.with_ymd_and_hms(2025, 2, 1, 10, 0, 0).unwrap(),
            sync_horizon_days: 14,
            generation_horizon_days: 365,
            version: 1,
        }
    }

    // S1: daily, fixed TZ, 09:00 Europe/Stockholm.
    #[test]
    fn s1_daily_fixed_timezone() {
        let tpl = template_with(
            RecurrenceConfig::Daily { interval: 1 },
            Some("Europe/Stockholm"),
            Some(9 * 3600),
        );
        let from = Utc.with_ymd_and_hms(2025, 2, 1, 10, 0, 0).unwrap();
        let until = from + Duration::days(3);
        let occurrences = raw_occurrences(&tpl, from, until);

        let expected = vec![
            Utc.with_ymd_and_hms(2025, 2, 2, 8, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 2, 3, 8, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 2, 4, 8, 0, 0).unwrap(),
        ];
        assert_eq!(occurrences, expected);
    }

    // S2: weekly Mon/Wed/Fri, floating TZ.
    #[test]
    fn s2_weekly_floating_timezone() {
        let tpl = template_with(
            RecurrenceConfig::Weekly {
                interval: 1,
                days_of_week: vec![Weekday::new(1).unwrap(), Weekday::new(3).unwrap(), Weekday::new(5).unwrap()],
            },
            None,
            None,
        );
        let from = Utc.with_ymd_and_hms(2025, 2, 3, 0, 0, 0).unwrap(); // Monday
        let until = from + Duration::days(7);
        let occurrences = raw_occurrences(&tpl, from, until);
        assert_eq!(occurrences.len(), 3);
        assert_eq!(occurrences[0].weekday(), chrono::Weekday::Mon);
        assert_eq!(occurrences[1].weekday(), chrono::Weekday::Wed);
        assert_eq!(occurrences[2].weekday(), chrono::Weekday::Fri);
    }

    #[test]
    fn monthly_31_in_february_clamps_to_28() {
        let tpl = template_with(
            RecurrenceConfig::Monthly {
                interval: 1,
                day_of_month: DayOfMonth::Day(31),
            },
            None,
            None,
        );
        let from = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let occurrences = raw_occurrences(&tpl, from, until);
        assert_eq!(occurrences.len(), 1);
        assert_eq!(occurrences[0].day(), 28);
    }

    #[test]
    fn yearly_feb_29_clamps_to_28_in_non_leap_year() {
        let tpl = template_with(RecurrenceConfig::Yearly { month: 2, day: 29 }, None, None);
        let from = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let occurrences = raw_occurrences(&tpl, from, until);
        assert_eq!(occurrences.len(), 1);
        assert_eq!(occurrences[0].month(), 2);
        assert_eq!(occurrences[0].day(), 28);
    }

    #[test]
    fn weekdays_skips_weekends() {
        let tpl = template_with(RecurrenceConfig::Weekdays {}, None, None);
        let from = Utc.with_ymd_and_hms(2025, 2, 3, 0, 0, 0).unwrap(); // Monday
        let until = from + Duration::days(7);
        let occurrences = raw_occurrences(&tpl, from, until);
        assert_eq!(occurrences.len(), 5);
    }

    #[test]
    fn deleted_exception_drops_occurrence() {
        let tpl = template_with(RecurrenceConfig::Daily { interval: 1 }, None, None);
        let from = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let until = from + Duration::days(2);
        let occurs_at = from + Duration::days(1);
        let exceptions = vec![RecurringTemplateException {
            id: crate::common::ExceptionId::new(),
            template_id: tpl.id,
            occurs_at,
            exception_type: ExceptionType::Deleted,
            item_id: None,
            created_at: Utc::now(),
        }];
        let candidates = expand(&tpl, from, until, &exceptions, &[]);
        assert!(candidates.iter().all(|c| c.occurs_at != occurs_at));
    }

    #[test]
    fn edited_exception_keeps_slot_as_no_op() {
        let tpl = template_with(RecurrenceConfig::Daily { interval: 1 }, None, None);
        let from = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let until = from + Duration::days(2);
        let occurs_at = from + Duration::days(1);
        let exceptions = vec![RecurringTemplateException {
            id: crate::common::ExceptionId::new(),
            template_id: tpl.id,
            occurs_at,
            exception_type: ExceptionType::Edited,
            item_id: Some(TodoItemId::new()),
            created_at: Utc::now(),
        }];
        let candidates = expand(&tpl, from, until, &exceptions, &[]);
        let slot = candidates.iter().find(|c| c.occurs_at == occurs_at).unwrap();
        assert!(slot.no_op);
    }

    #[test]
    fn detached_occurrence_is_not_reproposed() {
        let tpl = template_with(RecurrenceConfig::Daily { interval: 1 }, None, None);
        let from = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let until = from + Duration::days(2);
        let occurs_at = from + Duration::days(1);
        let detached = vec![DetachedOccurrence {
            occurs_at,
            item_id: TodoItemId::new(),
        }];
        let candidates = expand(&tpl, from, until, &[], &detached);
        assert!(candidates.iter().all(|c| c.occurs_at != occurs_at));
    }

    #[test]
    fn output_is_strictly_ascending() {
        let tpl = template_with(
            RecurrenceConfig::Weekly {
                interval: 1,
                days_of_week: vec![Weekday::new(5).unwrap(), Weekday::new(1).unwrap()],
            },
            None,
            None,
        );
        let from = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let until = from + Duration::days(14);
        let candidates = expand(&tpl, from, until, &[], &[]);
        let mut sorted = candidates.clone();
        sorted.sort_by_key(|c| c.occurs_at);
        assert_eq!(candidates, sorted);
    }
}
