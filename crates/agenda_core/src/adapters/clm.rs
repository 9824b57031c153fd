//! Castilla-La Mancha transparency portal.
//!
//! Each entry is a `<ul class="agenda evento">` whose `li` children are, in
//! order: the `cargo` heading, `"HH:MM - description"`, the location, and an
//! optional `ver-mas` block listing attendees one per `<br>` line.

use scraper::{ElementRef, Html};
use tracing::{debug, warn};

use super::{br_lines, class_of, css, text_of, Agenda, FetchRequest, RegionAdapter};
use crate::calendar::CalendarDate;
use crate::error::ParseError;
use crate::normalize::{event_timestamp, parse_attendance, split_heading, strip_location_prefix};
use crate::region::Region;
use crate::schema::AgendaEvent;

const CURRENT_EVENTS_URL: &str = "https://transparencia.castillalamancha.es/agenda/198";
const PAST_EVENTS_URL: &str = "https://transparencia.castillalamancha.es/agenda-historico/198";
const CURRENT_SELECTOR: &str = "div.agenda div div ul";
const PAST_SELECTOR: &str = "div.agenda-historico div div ul";

/// Last day served by the historical endpoint.
pub const HISTORICAL_END_DATE: CalendarDate = CalendarDate::from_ymd(2019, 7, 7);

const ENTRY_CLASS: &str = "agenda evento";

pub struct ClmAdapter;

impl RegionAdapter for ClmAdapter {
    fn agenda(&self, region: &Region, date: CalendarDate) -> Agenda {
        let (base, selector) = if date <= HISTORICAL_END_DATE {
            (PAST_EVENTS_URL, PAST_SELECTOR)
        } else {
            (CURRENT_EVENTS_URL, CURRENT_SELECTOR)
        };
        let url = format!("{base}?date_filter[value][date]={}", date.dmy());
        Agenda::new(region, date, FetchRequest::get(url), selector)
    }

    fn parse(&self, agenda: &mut Agenda, raw: &[u8]) -> Result<Vec<AgendaEvent>, ParseError> {
        let page = Html::parse_document(&super::body_text(raw));
        let lists = css(agenda.selector)?;
        let paragraphs = css("p")?;

        for ul in page.select(&lists) {
            if class_of(ul) != ENTRY_CLASS {
                continue;
            }
            match read_entry(agenda, ul, &paragraphs) {
                Some(event) => agenda.push(event),
                None => warn!(agenda = %agenda.id, "skipping agenda entry without a time/description line"),
            }
        }

        debug!(agenda = %agenda.id, events = agenda.events.len(), "parsed page");
        Ok(agenda.events.clone())
    }
}

fn read_entry(agenda: &Agenda, ul: ElementRef<'_>, paragraphs: &scraper::Selector) -> Option<AgendaEvent> {
    let mut event = agenda.blank_event();
    let mut has_heading = false;

    let items = ul
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "li");

    for (index, li) in items.enumerate() {
        let class = class_of(li);
        if class == "cargo" {
            continue;
        }
        if class == "ver-mas" {
            for p in li.select(paragraphs) {
                event.attendance.extend(parse_attendance(&br_lines(p)));
            }
            continue;
        }
        match index {
            1 => {
                let heading = split_heading(&text_of(li));
                event.date = event_timestamp(agenda.date, heading.clock);
                event.original_description = heading.rest.clone();
                event.description = heading.rest;
                has_heading = true;
            }
            2 => {
                let raw = text_of(li);
                event.location = strip_location_prefix(&raw);
                event.original_location = raw;
            }
            _ => {}
        }
    }

    has_heading.then_some(event)
}
