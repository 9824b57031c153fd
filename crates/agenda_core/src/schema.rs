use chrono::{DateTime, FixedOffset};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    pub job: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>, // absent when the source line carries no name
}

impl Attendee {
    pub fn new(job: impl Into<String>, full_name: Option<String>) -> Self {
        Self {
            job: job.into(),
            full_name,
        }
    }
}

/// One public event extracted from a regional agenda page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgendaEvent {
    pub id: String,                   // "{region-slug}-{local timestamp}", see normalize::event_id
    pub date: DateTime<FixedOffset>,  // local time in the reference timezone
    pub description: String,          // cleaned text, input to the analyzer
    pub original_description: String, // untouched extracted text
    pub location: String,
    pub original_location: String,
    pub attendance: Vec<Attendee>,
    pub owner: String,
    pub region: String,
}

/// Document shape sent to the index; upserted by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IndexedDocument {
    pub id: String,
    pub date: DateTime<FixedOffset>,
    pub description: String,
    pub original_description: String,
    pub location: String,
    pub original_location: String,
    pub attendance: Vec<Attendee>,
    pub owner: String,
    pub region: String,
}

impl From<&AgendaEvent> for IndexedDocument {
    fn from(event: &AgendaEvent) -> Self {
        Self {
            id: event.id.clone(),
            date: event.date,
            description: event.description.clone(),
            original_description: event.original_description.clone(),
            location: event.location.clone(),
            original_location: event.original_location.clone(),
            attendance: event.attendance.clone(),
            owner: event.owner.clone(),
            region: event.region.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{at_local_time, CalendarDate};

    #[test]
    fn document_uses_camel_case_fields_and_offset_dates() {
        let event = AgendaEvent {
            id: "clm-2019-07-01T10:30:00+0200".to_string(),
            date: at_local_time(CalendarDate::from_ymd(2019, 7, 1), 10, 30),
            description: "Reunión".to_string(),
            original_description: "Reunión".to_string(),
            location: "Toledo".to_string(),
            original_location: "Lugar: Toledo".to_string(),
            attendance: vec![
                Attendee::new("Consejero", Some("Ana Pérez".to_string())),
                Attendee::new("Alcaldes", None),
            ],
            owner: "Presidente".to_string(),
            region: "Castilla-La Mancha".to_string(),
        };

        let json = serde_json::to_value(IndexedDocument::from(&event)).unwrap();
        assert_eq!(json["date"], "2019-07-01T10:30:00+02:00");
        assert_eq!(json["originalLocation"], "Lugar: Toledo");
        assert_eq!(json["attendance"][0]["fullName"], "Ana Pérez");
        assert!(json["attendance"][1].get("fullName").is_none());
    }
}
