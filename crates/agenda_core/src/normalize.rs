//! Stateless text and identity rules shared by every region adapter.

use chrono::{DateTime, FixedOffset};
use regex::Regex;
use std::sync::LazyLock;

use crate::calendar::{at_local_time, CalendarDate};
use crate::schema::Attendee;

/// Literal prefixes some sources put in front of the place name.
pub const LOCATION_PREFIXES: &[&str] = &["Lugar:", "Direccion:", "Dirección:"];

static PRESIDENTIAL_PREAMBLE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(^.*)((El|La) president[ae] del Gobierno de Extremadura, .*?,)(.*$)").ok()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Clock {
    pub hour: u32,
    pub minute: u32,
}

/// A heading of the form `"HH:MM[h] - text"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub clock: Clock,
    pub rest: String,
}

/// Collapse runs of whitespace into a single space and trim.
pub fn normalize_ws(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !prev_space {
                out.push(' ');
                prev_space = true;
            }
        } else {
            out.push(ch);
            prev_space = false;
        }
    }
    out.trim().to_string()
}

/// Reads `"HH:MM ..."`. Each component that does not parse becomes 0.
///
/// The minutes are cut at the first space or at an `h` suffix (`"10:30h"`).
pub fn parse_clock(s: &str) -> Clock {
    let mut parts = s.splitn(2, ':');
    let hour = parts
        .next()
        .and_then(|h| h.trim().parse::<u32>().ok())
        .unwrap_or(0);
    let minute = parts
        .next()
        .and_then(|m| m.trim_start().split([' ', 'h', 'H']).next())
        .and_then(|m| m.trim().parse::<u32>().ok())
        .unwrap_or(0);

    if hour > 23 || minute > 59 {
        return Clock::default();
    }
    Clock { hour, minute }
}

/// Splits a heading at its first `-`: the clock before it, the text after it.
/// Without a `-` the whole heading is text and the clock is midnight.
pub fn split_heading(heading: &str) -> Heading {
    let heading = normalize_ws(heading);
    match heading.split_once('-') {
        Some((time, rest)) => Heading {
            clock: parse_clock(time),
            rest: rest.trim().to_string(),
        },
        None => Heading {
            clock: Clock::default(),
            rest: heading,
        },
    }
}

pub fn strip_location_prefix(raw: &str) -> String {
    let trimmed = normalize_ws(raw);
    for prefix in LOCATION_PREFIXES {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return rest.trim().to_string();
        }
    }
    trimmed
}

/// One attendee per non-empty line, `"job - full name"`.
pub fn parse_attendance(block: &str) -> Vec<Attendee> {
    block
        .lines()
        .map(normalize_ws)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once(" - ") {
            Some((job, name)) => {
                let name = name.trim();
                Attendee::new(job.trim(), (!name.is_empty()).then(|| name.to_string()))
            }
            // "Consejero - " loses its trailing space when normalized
            None => Attendee::new(line.strip_suffix(" -").unwrap_or(line.as_str()), None),
        })
        .collect()
}

/// Drops the government-wide sentence ("El presidente del Gobierno de
/// Extremadura, <name>, ...") that precedes the actual description.
pub fn strip_presidential_preamble(text: &str) -> String {
    let text = normalize_ws(text);
    if !text.contains("del Gobierno de Extremadura,") {
        return text;
    }
    let Some(re) = PRESIDENTIAL_PREAMBLE.as_ref() else {
        return text;
    };
    match re.captures(&text).and_then(|caps| caps.get(4)) {
        Some(remainder) => remainder.as_str().trim().to_string(),
        None => text,
    }
}

pub fn event_timestamp(date: CalendarDate, clock: Clock) -> DateTime<FixedOffset> {
    at_local_time(date, clock.hour, clock.minute)
}

/// Stable identity of an event: region slug plus local timestamp with offset,
/// e.g. `clm-2019-07-01T10:30:00+0200`.
pub fn event_id(region_slug: &str, instant: &DateTime<FixedOffset>) -> String {
    format!("{region_slug}-{}", instant.format("%Y-%m-%dT%H:%M:%S%z"))
}

/// Identity of an agenda (one region, one day).
pub fn agenda_id(region_slug: &str, date: CalendarDate) -> String {
    format!("{region_slug}-{}", date.iso())
}
