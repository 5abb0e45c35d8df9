use crate::errors::ValidationError;
use crate::model::{Room, TemperatureException, TemperatureLimits};
use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use indexmap::IndexMap;

const DAYS_OF_WEEK: [(Weekday, &str); 7] = [
    (Weekday::Sun, "Sunday"),
    (Weekday::Mon, "Monday"),
    (Weekday::Tue, "Tuesday"),
    (Weekday::Wed, "Wednesday"),
    (Weekday::Thu, "Thursday"),
    (Weekday::Fri, "Friday"),
    (Weekday::Sat, "Saturday"),
];

pub fn weekday_name(weekday: Weekday) -> &'static str {
    DAYS_OF_WEEK
        .iter()
        .find(|(day, _)| *day == weekday)
        .map(|(_, name)| *name)
        .unwrap_or("Sunday")
}

pub fn parse_weekday(name: &str) -> Result<Weekday, ValidationError> {
    DAYS_OF_WEEK
        .iter()
        .find(|(_, day_name)| *day_name == name)
        .map(|(day, _)| *day)
        .ok_or_else(|| ValidationError::new(format!("unknown day of week '{}'", name)))
}

/// Parses a `HH:MM` wall-clock time.
pub fn parse_wall_clock(time: &str) -> Result<NaiveTime, ValidationError> {
    let malformed = || ValidationError::new(format!("malformed time of day '{}', expected HH:MM", time));
    let (hours, minutes) = time.split_once(':').ok_or_else(malformed)?;
    if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
        return Err(malformed());
    }
    if !hours.chars().chain(minutes.chars()).all(|c| c.is_ascii_digit()) {
        return Err(malformed());
    }
    let hours: u32 = hours.parse().map_err(|_| malformed())?;
    let minutes: u32 = minutes.parse().map_err(|_| malformed())?;
    NaiveTime::from_hms_opt(hours, minutes, 0).ok_or_else(malformed)
}

fn window_on(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> (NaiveDateTime, NaiveDateTime) {
    let window_start = date.and_time(start);
    let mut window_end = date.and_time(end);
    if window_end <= window_start {
        window_end = window_end + Days::new(1);
    }
    (window_start, window_end)
}

fn is_active(
    exception: &TemperatureException,
    now: NaiveDateTime,
    today: &str,
    yesterday: &str,
) -> Result<bool, ValidationError> {
    let applies_today = exception.days.iter().any(|day| day == today);
    let applies_yesterday = exception.days.iter().any(|day| day == yesterday);
    if !applies_today && !applies_yesterday {
        return Ok(false);
    }
    let start = parse_wall_clock(&exception.start_time)?;
    let end = parse_wall_clock(&exception.end_time)?;
    let date = now.date();
    if applies_today {
        let (window_start, window_end) = window_on(date, start, end);
        if window_start <= now && now < window_end {
            return Ok(true);
        }
    }
    // An overnight window opened yesterday may still be running.
    if applies_yesterday && end <= start {
        if let Some(previous_date) = date.checked_sub_days(Days::new(1)) {
            let (window_start, window_end) = window_on(previous_date, start, end);
            if window_start <= now && now < window_end {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Returns the temperature limits in force for `room` at `now`.
///
/// Exceptions are evaluated in list order against the wall-clock time of
/// `now`'s time zone and the last active one wins. Rooms without an active
/// exception fall back to their defaults.
pub fn resolve_active_limits<Tz: TimeZone>(
    room: &Room,
    now: &DateTime<Tz>,
) -> Result<TemperatureLimits, ValidationError> {
    let local_now = now.naive_local();
    let today = weekday_name(local_now.weekday());
    let yesterday = weekday_name(local_now.weekday().pred());
    let mut limits = room.default_limits();
    for exception in &room.exceptions {
        if is_active(exception, local_now, today, yesterday)? {
            limits = TemperatureLimits {
                max_temp: exception.max_temp,
                min_temp: exception.min_temp,
            };
        }
    }
    Ok(limits)
}

pub fn resolve_current_limits<Tz: TimeZone>(
    room: &Room,
    time_zone: &Tz,
) -> Result<TemperatureLimits, ValidationError> {
    resolve_active_limits(room, &Utc::now().with_timezone(time_zone))
}

/// Resolves every room independently so that one malformed room does not
/// hide the limits of the others.
pub fn resolve_all<Tz: TimeZone>(
    rooms: &[Room],
    now: &DateTime<Tz>,
) -> IndexMap<String, Result<TemperatureLimits, ValidationError>> {
    rooms
        .iter()
        .map(|room| (room.id.clone(), resolve_active_limits(room, now)))
        .collect()
}
