//! Junta de Extremadura presidency agenda.
//!
//! One `blockquote` per event. The heading reads `"HH:MM - place"`; it moved
//! from `div.eventHeading` to `p.eventHeading` in March 2020, so both are read.

use scraper::Html;
use tracing::{debug, warn};

use super::{css, text_of, Agenda, FetchRequest, RegionAdapter};
use crate::calendar::CalendarDate;
use crate::error::ParseError;
use crate::normalize::{event_timestamp, split_heading, strip_location_prefix, strip_presidential_preamble};
use crate::region::Region;
use crate::schema::AgendaEvent;

const EVENTS_URL: &str = "http://www.juntaex.es/web/agenda-presidencia";
const SELECTOR: &str = "#mainContent";

pub struct ExtremaduraAdapter;

impl RegionAdapter for ExtremaduraAdapter {
    fn agenda(&self, region: &Region, date: CalendarDate) -> Agenda {
        let url = format!(
            "{EVENTS_URL}?year={:04}&month={:02}&day={:02}",
            date.year(),
            date.month(),
            date.day()
        );
        Agenda::new(region, date, FetchRequest::get(url), SELECTOR)
    }

    fn parse(&self, agenda: &mut Agenda, raw: &[u8]) -> Result<Vec<AgendaEvent>, ParseError> {
        let page = Html::parse_document(&super::body_text(raw));
        let container = css(agenda.selector)?;
        let blocks = css("blockquote")?;
        let headings = css("div.eventHeading, p.eventHeading")?;
        let paragraphs = css("div.eventShortDescription p")?;

        for root in page.select(&container) {
            for block in root.select(&blocks) {
                let Some(heading) = block.select(&headings).next() else {
                    warn!(agenda = %agenda.id, "skipping event without heading");
                    continue;
                };

                let mut event = agenda.blank_event();
                let heading = split_heading(&text_of(heading));
                event.date = event_timestamp(agenda.date, heading.clock);
                event.location = strip_location_prefix(&heading.rest);
                event.original_location = heading.rest;

                // the last non-empty paragraph carries the description
                for p in block.select(&paragraphs) {
                    let text = text_of(p);
                    if text.is_empty() {
                        continue;
                    }
                    event.description = strip_presidential_preamble(&text);
                    event.original_description = text;
                }

                agenda.push(event);
            }
        }

        debug!(agenda = %agenda.id, events = agenda.events.len(), "parsed page");
        Ok(agenda.events.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionId;

    const PAGE: &str = r#"
<html><body><div id="mainContent"><div>
  <blockquote>
    <div class="eventHeading">
        11:00 - Mérida
    </div>
    <div class="eventShortDescription"><p>El presidente del Gobierno de Extremadura, Guillermo Fernández Vara, inaugura el nuevo centro de salud.</p></div>
  </blockquote>
  <blockquote>
    <p class="eventHeading">18:30 h - Badajoz</p>
    <div class="eventShortDescription"><p>Reunión con el sector agrario.</p><p></p></div>
  </blockquote>
  <blockquote><div class="eventShortDescription"><p>Sin cabecera</p></div></blockquote>
</div></div></body></html>"#;

    #[test]
    fn parses_both_heading_variants_and_strips_preamble() {
        let region = RegionId::Extremadura.descriptor();
        let mut agenda = ExtremaduraAdapter.agenda(&region, CalendarDate::from_ymd(2020, 3, 22));
        let events = ExtremaduraAdapter.parse(&mut agenda, PAGE.as_bytes()).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, "extremadura-2020-03-22T11:00:00+0100");
        assert_eq!(events[0].location, "Mérida");
        assert_eq!(events[0].description, "inaugura el nuevo centro de salud.");
        assert!(events[0].original_description.starts_with("El presidente del Gobierno"));
        assert_eq!(events[1].id, "extremadura-2020-03-22T18:30:00+0100");
        assert_eq!(events[1].location, "Badajoz");
        assert_eq!(events[1].description, "Reunión con el sector agrario.");
    }

    #[test]
    fn latin1_page_still_yields_its_events() {
        let page = b"<html><body><div id=\"mainContent\"><blockquote>\
            <div class=\"eventHeading\">10:00 - M\xe9rida</div>\
            <div class=\"eventShortDescription\"><p>Reuni\xf3n con alcaldes</p></div>\
            </blockquote></div></body></html>";
        let region = RegionId::Extremadura.descriptor();
        let mut agenda = ExtremaduraAdapter.agenda(&region, CalendarDate::from_ymd(2015, 5, 4));
        let events = ExtremaduraAdapter.parse(&mut agenda, page).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].location, "Mérida");
        assert_eq!(events[0].description, "Reunión con alcaldes");
    }

    #[test]
    fn url_carries_the_date() {
        let region = RegionId::Extremadura.descriptor();
        let request = ExtremaduraAdapter.build_request(&region, CalendarDate::from_ymd(2012, 3, 1));
        assert_eq!(request.url, "http://www.juntaex.es/web/agenda-presidencia?year=2012&month=03&day=01");
    }
}
