//! Comunidad de Madrid government agenda.
//!
//! The site answers a form POST with a Drupal AJAX envelope: a JSON array of
//! commands, one of which (`insert`) carries the agenda HTML. The response
//! lists every member of the government; only the president's entries are
//! kept.

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::{debug, warn};

use super::{css, first_text, text_of, Agenda, FetchRequest, RegionAdapter};
use crate::calendar::CalendarDate;
use crate::error::ParseError;
use crate::normalize::{event_timestamp, parse_clock, strip_location_prefix};
use crate::region::Region;
use crate::schema::AgendaEvent;

const EVENTS_URL: &str = "https://www.comunidad.madrid/views/ajax";
const ENTRY_SELECTOR: &str = "div[about]";
const NO_EVENTS_MARKER: &str = "no existen eventos programados en el día seleccionado";

/// Owner label of the head of government in the source markup.
pub const HEAD_OF_GOVERNMENT: &str = "La Presidenta";

pub struct MadridAdapter;

impl RegionAdapter for MadridAdapter {
    fn agenda(&self, region: &Region, date: CalendarDate) -> Agenda {
        let day = date.dmy();
        let payload = format!(
            "field_date_value[value][date]={day}&field_date_value2[value][date]={day}&view_name=goverment_agenda&view_display_id=goverment_agenda_block"
        );
        Agenda::new(region, date, FetchRequest::post_form(EVENTS_URL, payload), ENTRY_SELECTOR)
    }

    fn parse(&self, agenda: &mut Agenda, raw: &[u8]) -> Result<Vec<AgendaEvent>, ParseError> {
        let html = envelope_html(raw)?;
        if html.contains(NO_EVENTS_MARKER) {
            debug!(agenda = %agenda.id, "no events scheduled");
            return Ok(Vec::new());
        }

        let fragment = Html::parse_fragment(&html);
        let fields = Fields::new()?;
        let entries = css(agenda.selector)?;

        for entry in fragment.select(&entries) {
            let owner = first_text(entry, &fields.owner).unwrap_or_default();
            if owner != HEAD_OF_GOVERNMENT {
                continue;
            }
            match read_entry(agenda, entry, &fields, owner) {
                Some(event) => agenda.push(event),
                None => warn!(agenda = %agenda.id, "skipping entry without title"),
            }
        }

        debug!(agenda = %agenda.id, events = agenda.events.len(), "parsed page");
        Ok(agenda.events.clone())
    }
}

struct Fields {
    owner: Selector,
    date: Selector,
    title: Selector,
    description: Selector,
    place: Selector,
    address: Selector,
}

impl Fields {
    fn new() -> Result<Self, ParseError> {
        Ok(Self {
            owner: css("div[class*='field-name-field-counselings']")?,
            date: css("div[class*='field-type-date']")?,
            title: css("div[class*='field-name-title']")?,
            description: css("div[class*='field-name-field-short-description']")?,
            place: css("div[class*='field-name-field-place']")?,
            address: css("div[class*='field-name-field-location-address']")?,
        })
    }
}

fn read_entry(agenda: &Agenda, entry: ElementRef<'_>, fields: &Fields, owner: String) -> Option<AgendaEvent> {
    let title = first_text(entry, &fields.title)?;
    let mut event = agenda.blank_event();
    event.owner = owner;

    let clock = first_text(entry, &fields.date).map(|t| parse_clock(&t)).unwrap_or_default();
    event.date = event_timestamp(agenda.date, clock);

    let summary = first_text(entry, &fields.description).unwrap_or_default();
    event.description = if summary.is_empty() { title } else { format!("{title} - {summary}") };
    event.original_description = event.description.clone();

    let location = entry
        .select(&fields.place)
        .next()
        .or_else(|| entry.select(&fields.address).next())
        .map(text_of);
    if let Some(raw) = location {
        event.location = strip_location_prefix(&raw);
        event.original_location = raw;
    }

    Some(event)
}

/// Pulls the HTML out of the AJAX command list.
fn envelope_html(raw: &[u8]) -> Result<String, ParseError> {
    let commands: Vec<Value> =
        serde_json::from_slice(raw).map_err(|e| ParseError::Envelope(e.to_string()))?;

    let data = |command: &Value| command.get("data").and_then(Value::as_str).map(str::to_string);

    commands
        .iter()
        .find(|c| c.get("command").and_then(Value::as_str) == Some("insert"))
        .and_then(data)
        .or_else(|| commands.get(1).and_then(data))
        .ok_or_else(|| ParseError::Envelope("no insert command with HTML data".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionId;

    fn envelope(html: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!([
            { "command": "settings", "settings": { "basePath": "/" }, "merge": true },
            { "command": "insert", "method": "replaceWith", "selector": null, "data": html }
        ]))
        .unwrap()
    }

    fn entry(owner: &str, time: &str, title: &str, place: &str) -> String {
        format!(
            r#"<div about="/agenda/{title}">
                 <div class="field field-name-field-counselings"><div class="field-item">{owner}</div></div>
                 <div class="field field-type-datetime field-type-date"><span>{time}</span></div>
                 <div class="field field-name-title"><h2>{title}</h2></div>
                 <div class="field field-name-field-short-description"><p>Acto oficial</p></div>
                 {place}
               </div>"#
        )
    }

    #[test]
    fn builds_form_post() {
        let region = RegionId::Madrid.descriptor();
        let request = MadridAdapter.build_request(&region, CalendarDate::from_ymd(2019, 9, 3));
        assert_eq!(request.method, super::super::Method::Post);
        assert!(request.expect_json);
        assert_eq!(
            request.body.as_deref(),
            Some("field_date_value[value][date]=03/09/2019&field_date_value2[value][date]=03/09/2019&view_name=goverment_agenda&view_display_id=goverment_agenda_block")
        );
    }

    #[test]
    fn keeps_only_the_presidents_entries() {
        let html = format!(
            "<div class=\"view-agenda\">{}{}{}</div>",
            entry("La Presidenta", "09:30", "Pleno", r#"<div class="field-name-field-place">Lugar: Asamblea de Madrid</div>"#),
            entry("El Consejero de Sanidad", "11:00", "Visita", ""),
            entry("La Presidenta", "mediodía", "Entrevista", r#"<div class="field-name-field-location-address">Direccion: Calle Alcalá 1</div>"#),
        );
        let region = RegionId::Madrid.descriptor();
        let mut agenda = MadridAdapter.agenda(&region, CalendarDate::from_ymd(2019, 9, 3));
        let events = MadridAdapter.parse(&mut agenda, &envelope(&html)).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, "madrid-2019-09-03T09:30:00+0200");
        assert_eq!(events[0].owner, HEAD_OF_GOVERNMENT);
        assert_eq!(events[0].description, "Pleno - Acto oficial");
        assert_eq!(events[0].location, "Asamblea de Madrid");
        assert_eq!(events[1].id, "madrid-2019-09-03T00:00:00+0200");
        assert_eq!(events[1].location, "Calle Alcalá 1");
    }

    #[test]
    fn day_without_events_is_empty() {
        let html = "<div class=\"view-empty\">Lo sentimos, no existen eventos programados en el día seleccionado</div>";
        let region = RegionId::Madrid.descriptor();
        let mut agenda = MadridAdapter.agenda(&region, CalendarDate::from_ymd(2019, 9, 1));
        assert!(MadridAdapter.parse(&mut agenda, &envelope(html)).unwrap().is_empty());
    }

    #[test]
    fn non_json_body_is_a_page_error() {
        let region = RegionId::Madrid.descriptor();
        let mut agenda = MadridAdapter.agenda(&region, CalendarDate::from_ymd(2019, 9, 1));
        let err = MadridAdapter.parse(&mut agenda, b"<html>maintenance</html>").unwrap_err();
        assert!(matches!(err, ParseError::Envelope(_)));
    }
}
