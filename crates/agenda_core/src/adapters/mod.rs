//! Region adapters: one per supported site.
//!
//! An adapter turns `(region, date)` into a fetch request and turns the raw
//! response back into events. Adapters hold no state, so the same adapter can
//! serve any number of dates concurrently.
//!
//! | Region | Module | Method | Entry markup |
//! |--------|--------|--------|--------------|
//! | Castilla-La Mancha | [`clm`] | GET | `ul.agenda evento` |
//! | Castilla-León | [`cyl`] | GET | `li.destacada a` |
//! | Extremadura | [`extremadura`] | GET | `blockquote` |
//! | Madrid | [`madrid`] | POST | JSON envelope, `div[about]` |
//!
//! Parsing is best-effort: an entry that cannot be read is logged and
//! skipped, the other entries of the page are still returned.

pub mod clm;
pub mod cyl;
pub mod extremadura;
pub mod madrid;

use scraper::node::Node;
use scraper::{ElementRef, Selector};
use std::fmt;

use crate::calendar::CalendarDate;
use crate::error::ParseError;
use crate::normalize::{self, normalize_ws};
use crate::region::Region;
use crate::schema::AgendaEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved request; its three parts are the cache identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<String>, // form-encoded payload for POST variants
    pub expect_json: bool,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
            expect_json: false,
        }
    }

    pub fn post_form(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: Some(body.into()),
            expect_json: true,
        }
    }
}

/// One unit of work: a region's agenda for a single day.
#[derive(Debug, Clone)]
pub struct Agenda {
    pub id: String,
    pub region: Region,
    pub date: CalendarDate,
    pub allowed_domains: Vec<String>,
    pub request: FetchRequest,
    pub selector: &'static str, // page container for HTML variants
    pub events: Vec<AgendaEvent>,
}

impl Agenda {
    pub fn new(region: &Region, date: CalendarDate, request: FetchRequest, selector: &'static str) -> Self {
        Self {
            id: normalize::agenda_id(region.slug, date),
            region: region.clone(),
            date,
            allowed_domains: region.allowed_domains.iter().map(|d| d.to_string()).collect(),
            request,
            selector,
            events: Vec::new(),
        }
    }

    /// Starts an event owned by the region's default owner, at local midnight.
    pub(crate) fn blank_event(&self) -> AgendaEvent {
        AgendaEvent {
            id: String::new(),
            date: self.date.midnight(),
            description: String::new(),
            original_description: String::new(),
            location: String::new(),
            original_location: String::new(),
            attendance: Vec::new(),
            owner: self.region.default_owner.to_string(),
            region: self.region.name.to_string(),
        }
    }

    /// Stamps the deterministic id and appends the event.
    pub(crate) fn push(&mut self, mut event: AgendaEvent) {
        event.id = normalize::event_id(self.region.slug, &event.date);
        self.events.push(event);
    }
}

pub trait RegionAdapter: Send + Sync {
    /// Creates the unit of work for one day. Template substitution only; never fails.
    fn agenda(&self, region: &Region, date: CalendarDate) -> Agenda;

    fn build_request(&self, region: &Region, date: CalendarDate) -> FetchRequest {
        self.agenda(region, date).request
    }

    /// Extracts the page's events into `agenda.events` and returns them.
    fn parse(&self, agenda: &mut Agenda, raw: &[u8]) -> Result<Vec<AgendaEvent>, ParseError>;
}

pub(crate) fn css(selector: &str) -> Result<Selector, ParseError> {
    Selector::parse(selector).map_err(|e| ParseError::Selector(format!("'{selector}': {e:?}")))
}

/// Decodes a page body. Anything that is not valid UTF-8 is read as
/// ISO-8859-1, the charset older regional portals still serve.
pub(crate) fn body_text(raw: &[u8]) -> String {
    match String::from_utf8(raw.to_vec()) {
        Ok(text) => text,
        Err(e) => e.into_bytes().into_iter().map(char::from).collect(),
    }
}

/// Whitespace-normalized text content of an element.
pub(crate) fn text_of(element: ElementRef<'_>) -> String {
    normalize_ws(&element.text().collect::<String>())
}

pub(crate) fn class_of<'a>(element: ElementRef<'a>) -> &'a str {
    element.value().attr("class").map(str::trim).unwrap_or("")
}

pub(crate) fn first_text(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element.select(selector).next().map(text_of)
}

/// Text of an element split at its `<br>` tags, one line per segment.
pub(crate) fn br_lines(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        match node.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) if el.name().eq_ignore_ascii_case("br") => out.push('\n'),
            _ => {}
        }
    }
    out
}
