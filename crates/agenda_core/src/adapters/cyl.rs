//! Junta de Castilla y León communication calendar.

use scraper::Html;
use tracing::debug;

use super::{class_of, css, first_text, text_of, Agenda, FetchRequest, RegionAdapter};
use crate::calendar::CalendarDate;
use crate::error::ParseError;
use crate::normalize::{event_timestamp, parse_clock, strip_location_prefix, Clock};
use crate::region::Region;
use crate::schema::AgendaEvent;

const EVENTS_URL: &str = "https://comunicacion.jcyl.es/web/jcyl/Comunicacion/es/PlantillaCalendarioBuscadorComponente/1284877983791/_/_/_";
const SELECTOR: &str = "#contenidos";

pub struct CylAdapter;

impl RegionAdapter for CylAdapter {
    fn agenda(&self, region: &Region, date: CalendarDate) -> Agenda {
        let url = format!(
            "{EVENTS_URL}?param[0]={:04}&param[1]={:02}&param[2]={:02}&parametro2=1281372093473&parametro3=1284233390583",
            date.year(),
            date.month(),
            date.day()
        );
        Agenda::new(region, date, FetchRequest::get(url), SELECTOR)
    }

    fn parse(&self, agenda: &mut Agenda, raw: &[u8]) -> Result<Vec<AgendaEvent>, ParseError> {
        let page = Html::parse_document(&super::body_text(raw));
        let container = css(agenda.selector)?;
        let entries = css("li.destacada a")?;
        let spans = css("span")?;
        let hour = css("span.hora")?;

        for root in page.select(&container) {
            for anchor in root.select(&entries) {
                let mut event = agenda.blank_event();
                let mut clock = Clock::default();

                for span in anchor.select(&spans) {
                    match class_of(span) {
                        "fecha" => {
                            if let Some(text) = first_text(span, &hour) {
                                clock = parse_clock(&text);
                            }
                        }
                        "subtitulo" => {
                            let owner = text_of(span);
                            if !owner.is_empty() {
                                event.owner = owner;
                            }
                        }
                        "lugar" => {
                            let raw = text_of(span);
                            event.location = strip_location_prefix(&raw);
                            event.original_location = raw;
                        }
                        // some entries repeat the description span; the first one wins
                        "descripcion" if event.original_description.is_empty() => {
                            event.original_description = text_of(span);
                            event.description = event.original_description.clone();
                        }
                        _ => {}
                    }
                }

                event.date = event_timestamp(agenda.date, clock);
                agenda.push(event);
            }
        }

        debug!(agenda = %agenda.id, events = agenda.events.len(), "parsed page");
        Ok(agenda.events.clone())
    }
}
