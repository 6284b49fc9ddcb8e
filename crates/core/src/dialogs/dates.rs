use std::fmt;

use chrono::{Datelike, Days, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

const EVENING_START_HOUR: u32 = 16;
const EVENING_END_HOUR: u32 = 20;

const FILLER_WORDS: &[&str] =
    &["on", "at", "the", "this", "for", "please", "of", "around", "by", "make", "it"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeOfDay {
    Evening,
    Clock(NaiveTime),
}

impl TimeOfDay {
    pub fn is_evening(&self) -> bool {
        match self {
            Self::Evening => true,
            Self::Clock(time) => {
                let start = NaiveTime::from_hms_opt(EVENING_START_HOUR, 0, 0);
                let end = NaiveTime::from_hms_opt(EVENING_END_HOUR, 0, 0);
                matches!((start, end), (Some(start), Some(end)) if *time >= start && *time <= end)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateExpression {
    pub date: NaiveDate,
    pub time: Option<TimeOfDay>,
}

/// Bounds a resolved date must fall in, measured from the turn's current date.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub days_ahead: u32,
    pub evening_only: bool,
}

impl DateWindow {
    pub fn evenings_within(days_ahead: u32) -> Self {
        Self { days_ahead, evening_only: true }
    }

    pub fn check(
        &self,
        expression: &DateExpression,
        today: NaiveDate,
    ) -> Result<NaiveDate, WindowViolation> {
        if expression.date < today {
            return Err(WindowViolation::InPast);
        }

        let limit = today.checked_add_days(Days::new(u64::from(self.days_ahead)));
        if limit.map_or(true, |limit| expression.date >= limit) {
            return Err(WindowViolation::TooFarAhead { days_ahead: self.days_ahead });
        }

        if self.evening_only && !expression.time.is_some_and(|time| time.is_evening()) {
            return Err(WindowViolation::NotEvening);
        }

        Ok(expression.date)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowViolation {
    InPast,
    TooFarAhead { days_ahead: u32 },
    NotEvening,
}

impl fmt::Display for WindowViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InPast => f.write_str("That date is in the past."),
            Self::TooFarAhead { days_ahead } => {
                write!(f, "Transfers can only be scheduled within the next {days_ahead} days.")
            }
            Self::NotEvening => {
                f.write_str("Transfers can only be scheduled for an evening (4pm to 8pm).")
            }
        }
    }
}

/// Interprets a date expression relative to `today`. Returns `None` when the text is not a date
/// at all; window constraints are checked separately by [`DateWindow::check`].
pub fn parse_date_expression(input: &str, today: NaiveDate) -> Option<DateExpression> {
    let normalized = input.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return None;
    }

    if let Some(expression) = parse_iso(&normalized) {
        return Some(expression);
    }

    let tokens = normalized
        .split(|ch: char| ch.is_whitespace() || ch == ',')
        .map(|token| token.trim_matches(|ch: char| matches!(ch, '.' | '!' | '?')))
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>();

    let mut date = None;
    let mut time = None;
    let mut next = false;
    let mut index = 0;

    while index < tokens.len() {
        let token = tokens[index];
        if token == "today" {
            date = Some(today);
        } else if token == "tonight" {
            date.get_or_insert(today);
            time = Some(TimeOfDay::Evening);
        } else if token == "evening" {
            time = Some(TimeOfDay::Evening);
        } else if token == "tomorrow" {
            date = today.checked_add_days(Days::new(1));
        } else if token == "day"
            && tokens.get(index + 1) == Some(&"after")
            && tokens.get(index + 2) == Some(&"tomorrow")
        {
            date = today.checked_add_days(Days::new(2));
            index += 2;
        } else if token == "next" {
            next = true;
        } else if token == "in" && tokens.get(index + 1).is_some() {
            let days = tokens.get(index + 1).and_then(|value| value.parse::<u64>().ok());
            let unit = tokens.get(index + 2);
            match (days, unit) {
                (Some(days), Some(&"day")) | (Some(days), Some(&"days")) => {
                    date = today.checked_add_days(Days::new(days));
                    index += 2;
                }
                _ => return None,
            }
        } else if let Some(weekday) = parse_weekday(token) {
            date = Some(resolve_weekday(today, weekday, next));
        } else if let Some((clock, consumed)) = parse_clock(token, tokens.get(index + 1).copied())
        {
            time = Some(TimeOfDay::Clock(clock));
            index += consumed;
        } else if token == "at" {
            if let Some(hour) = tokens.get(index + 1).and_then(|value| value.parse::<u32>().ok()) {
                let meridiem_follows = matches!(tokens.get(index + 2), Some(&"am") | Some(&"pm"));
                if !meridiem_follows {
                    let hour = if (1..12).contains(&hour) { hour + 12 } else { hour };
                    time = NaiveTime::from_hms_opt(hour, 0, 0).map(TimeOfDay::Clock);
                    index += 1;
                }
            }
        } else if !FILLER_WORDS.contains(&token) {
            return None;
        }
        index += 1;
    }

    match (date, time) {
        (Some(date), time) => Some(DateExpression { date, time }),
        (None, Some(time)) => Some(DateExpression { date: today, time: Some(time) }),
        (None, None) => None,
    }
}

fn parse_iso(normalized: &str) -> Option<DateExpression> {
    let date_part = normalized.get(..10)?;
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    let rest = normalized[10..].trim();
    if rest.is_empty() {
        return Some(DateExpression { date, time: None });
    }

    let rest = rest.strip_prefix('t').unwrap_or(rest).trim();
    if rest == "ev" {
        return Some(DateExpression { date, time: Some(TimeOfDay::Evening) });
    }

    let time = match rest.split_once(':') {
        Some((hour, minute)) => {
            let minute = minute.get(..2).unwrap_or(minute);
            NaiveTime::from_hms_opt(hour.parse().ok()?, minute.parse().ok()?, 0)?
        }
        None => NaiveTime::from_hms_opt(rest.parse().ok()?, 0, 0)?,
    };
    Some(DateExpression { date, time: Some(TimeOfDay::Clock(time)) })
}

fn parse_weekday(token: &str) -> Option<Weekday> {
    let weekday = match token {
        "monday" | "mon" => Weekday::Mon,
        "tuesday" | "tue" | "tues" => Weekday::Tue,
        "wednesday" | "wed" => Weekday::Wed,
        "thursday" | "thu" | "thurs" => Weekday::Thu,
        "friday" | "fri" => Weekday::Fri,
        "saturday" | "sat" => Weekday::Sat,
        "sunday" | "sun" => Weekday::Sun,
        _ => return None,
    };
    Some(weekday)
}

fn resolve_weekday(today: NaiveDate, weekday: Weekday, next: bool) -> NaiveDate {
    let current = today.weekday().num_days_from_monday();
    let target = weekday.num_days_from_monday();
    let mut delta = (target + 7 - current) % 7;
    if delta == 0 && next {
        delta = 7;
    }
    today.checked_add_days(Days::new(u64::from(delta))).unwrap_or(today)
}

/// Parses `7pm`, `7:30pm`, `19:00` or `7 pm`. Returns the time and how many extra tokens were
/// consumed.
fn parse_clock(token: &str, following: Option<&str>) -> Option<(NaiveTime, usize)> {
    let (body, meridiem, consumed) = if let Some(body) = token.strip_suffix("pm") {
        (body, Some(true), 0)
    } else if let Some(body) = token.strip_suffix("am") {
        (body, Some(false), 0)
    } else {
        match following {
            Some("pm") => (token, Some(true), 1),
            Some("am") => (token, Some(false), 1),
            _ => (token, None, 0),
        }
    };

    if body.is_empty() || !body.chars().all(|ch| ch.is_ascii_digit() || ch == ':') {
        return None;
    }

    let (hour, minute) = match body.split_once(':') {
        Some((hour, minute)) => (hour.parse::<u32>().ok()?, minute.parse::<u32>().ok()?),
        None if meridiem.is_some() => (body.parse::<u32>().ok()?, 0),
        None => return None,
    };

    let hour = match meridiem {
        Some(true) if hour < 12 => hour + 12,
        Some(false) if hour == 12 => 0,
        Some(_) if hour > 12 => return None,
        _ => hour,
    };

    NaiveTime::from_hms_opt(hour, minute, 0).map(|time| (time, consumed))
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use super::{parse_date_expression, DateExpression, DateWindow, TimeOfDay, WindowViolation};

    fn today() -> NaiveDate {
        // A Sunday.
        NaiveDate::from_ymd_opt(2026, 10, 18).expect("valid date")
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).expect("valid date")
    }

    #[test]
    fn relative_words_resolve_against_today() {
        let expression = parse_date_expression("tomorrow evening", today()).expect("parse");
        assert_eq!(expression, DateExpression { date: day(19), time: Some(TimeOfDay::Evening) });

        let expression = parse_date_expression("Tonight!", today()).expect("parse");
        assert_eq!(expression.date, today());
        assert_eq!(expression.time, Some(TimeOfDay::Evening));

        let expression = parse_date_expression("the day after tomorrow", today()).expect("parse");
        assert_eq!(expression.date, day(20));
        assert_eq!(expression.time, None);

        let expression = parse_date_expression("in 3 days at 7pm", today()).expect("parse");
        assert_eq!(expression.date, day(21));
        assert_eq!(
            expression.time,
            Some(TimeOfDay::Clock(NaiveTime::from_hms_opt(19, 0, 0).expect("time")))
        );
    }

    #[test]
    fn weekdays_resolve_to_next_occurrence() {
        assert_eq!(parse_date_expression("friday", today()).expect("parse").date, day(23));
        assert_eq!(parse_date_expression("sunday", today()).expect("parse").date, day(18));
        assert_eq!(parse_date_expression("next sunday", today()).expect("parse").date, day(25));
    }

    #[test]
    fn clock_forms_are_understood() {
        let at = |text: &str| parse_date_expression(text, today()).expect("parse").time;
        let clock = |h, m| Some(TimeOfDay::Clock(NaiveTime::from_hms_opt(h, m, 0).expect("time")));

        assert_eq!(at("tomorrow 6:30pm"), clock(18, 30));
        assert_eq!(at("tomorrow at 19:00"), clock(19, 0));
        assert_eq!(at("tomorrow at 7 pm"), clock(19, 0));
        assert_eq!(at("tomorrow at 7"), clock(19, 0));
    }

    #[test]
    fn timex_like_values_are_accepted() {
        let expression = parse_date_expression("2026-10-20T19", today()).expect("parse");
        assert_eq!(expression.date, day(20));
        assert!(expression.time.expect("time").is_evening());

        let expression = parse_date_expression("2026-10-21TEV", today()).expect("parse");
        assert_eq!(expression.time, Some(TimeOfDay::Evening));

        let expression = parse_date_expression("2026-10-22", today()).expect("parse");
        assert_eq!(expression.time, None);
    }

    #[test]
    fn non_dates_are_not_recognized() {
        assert_eq!(parse_date_expression("", today()), None);
        assert_eq!(parse_date_expression("banana", today()), None);
        assert_eq!(parse_date_expression("tomorrow banana", today()), None);
        assert_eq!(parse_date_expression("in a while", today()), None);
    }

    #[test]
    fn window_accepts_evenings_within_two_weeks() {
        let window = DateWindow::evenings_within(14);
        let accepted = parse_date_expression("tomorrow evening", today()).expect("parse");
        assert_eq!(window.check(&accepted, today()), Ok(day(19)));

        let morning = parse_date_expression("tomorrow 9am", today()).expect("parse");
        assert_eq!(window.check(&morning, today()), Err(WindowViolation::NotEvening));

        let date_only = parse_date_expression("tomorrow", today()).expect("parse");
        assert_eq!(window.check(&date_only, today()), Err(WindowViolation::NotEvening));

        let past = parse_date_expression("2026-10-17TEV", today()).expect("parse");
        assert_eq!(window.check(&past, today()), Err(WindowViolation::InPast));

        let far = parse_date_expression("2026-11-01TEV", today()).expect("parse");
        assert_eq!(
            window.check(&far, today()),
            Err(WindowViolation::TooFarAhead { days_ahead: 14 })
        );
    }
}
