//! Backfill orchestration.
//!
//! Every `(region, date)` pair is an independent unit that moves through
//! `Pending -> Fetching -> Parsing -> Indexing -> Done`, or ends in `Failed`.
//! This module is the single place that decides failure policy: a failed unit
//! is logged and the backfill moves on to the next date.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, error, info, warn};

use crate::calendar::{self, CalendarDate};
use crate::error::PageError;
use crate::fetch::{CachePolicy, Fetcher};
use crate::index::IndexingClient;
use crate::region::{Region, Registry};
use crate::schema::AgendaEvent;

/// Cooperative cancellation, checked between units.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything one invocation needs, built once and passed by reference.
pub struct Context {
    pub registry: Registry,
    pub fetcher: Fetcher,
    pub indexer: Option<IndexingClient>,
    pub stop: StopFlag,
}

impl Context {
    pub fn new(registry: Registry, fetcher: Fetcher, indexer: Option<IndexingClient>) -> Self {
        Self {
            registry,
            fetcher,
            indexer,
            stop: StopFlag::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitState {
    Pending,
    Fetching,
    Parsing,
    Indexing,
    Done,
    Failed(String),
}

impl UnitState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::Done | UnitState::Failed(_))
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitState::Pending => f.write_str("pending"),
            UnitState::Fetching => f.write_str("fetching"),
            UnitState::Parsing => f.write_str("parsing"),
            UnitState::Indexing => f.write_str("indexing"),
            UnitState::Done => f.write_str("done"),
            UnitState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnitReport {
    pub agenda_id: String,
    pub date: CalendarDate,
    pub state: UnitState,
    pub events: usize,
    pub indexed: usize,
    pub index_failures: usize,
}

impl UnitReport {
    fn new(agenda_id: String, date: CalendarDate) -> Self {
        Self {
            agenda_id,
            date,
            state: UnitState::Pending,
            events: 0,
            indexed: 0,
            index_failures: 0,
        }
    }

    fn enter(&mut self, state: UnitState) {
        debug!(agenda = %self.agenda_id, from = %self.state, to = %state, "unit transition");
        self.state = state;
    }

    fn fail(mut self, reason: impl fmt::Display) -> Self {
        let reason = reason.to_string();
        warn!(agenda = %self.agenda_id, step = %self.state, error = %reason, "unit failed");
        self.state = UnitState::Failed(reason);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct RangeReport {
    pub region: String,
    pub done: usize,
    pub failed: Vec<(CalendarDate, String)>,
    pub events: usize,
    pub indexed: usize,
    pub index_failures: usize,
    /// First date that was not attempted because of a stop request.
    pub stopped_at: Option<CalendarDate>,
}

impl RangeReport {
    fn record(&mut self, unit: UnitReport) {
        self.events += unit.events;
        self.indexed += unit.indexed;
        self.index_failures += unit.index_failures;
        match unit.state {
            UnitState::Done => self.done += 1,
            UnitState::Failed(reason) => self.failed.push((unit.date, reason)),
            _ => {}
        }
    }

    pub fn units(&self) -> usize {
        self.done + self.failed.len()
    }
}

type EventCallback<'a> = &'a (dyn Fn(&AgendaEvent) + Sync);

/// Drives units against a [`Context`].
pub struct Backfill<'a> {
    ctx: &'a Context,
    dry_run: Option<EventCallback<'a>>,
    today: CalendarDate,
}

impl<'a> Backfill<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self {
            ctx,
            dry_run: None,
            today: calendar::today(),
        }
    }

    /// Hands every parsed event to `callback` instead of the index.
    pub fn dry_run(mut self, callback: EventCallback<'a>) -> Self {
        self.dry_run = Some(callback);
        self
    }

    /// Overrides "today": the end of open ranges and the cache cut-off.
    pub fn with_today(mut self, today: CalendarDate) -> Self {
        self.today = today;
        self
    }

    /// Processes one `(region, date)` unit to a terminal state.
    pub fn run_unit(&self, region: &Region, date: CalendarDate) -> UnitReport {
        let adapter = region.adapter();
        let mut agenda = adapter.agenda(region, date);
        let mut report = UnitReport::new(agenda.id.clone(), date);

        report.enter(UnitState::Fetching);
        // Today's agenda may still grow.
        let policy = if date >= self.today { CachePolicy::Bypass } else { CachePolicy::Use };
        let request = agenda.request.clone();
        let domains = agenda.allowed_domains.clone();
        let parsed = self.ctx.fetcher.fetch_with(&request, &domains, policy, |raw| {
            report.enter(UnitState::Parsing);
            adapter.parse(&mut agenda, raw).map_err(PageError::from)
        });
        let events = match parsed {
            Ok(events) => events,
            Err(e) => return report.fail(e),
        };
        report.events = events.len();
        warn_duplicate_ids(&agenda.id, &events);

        report.enter(UnitState::Indexing);
        for event in &events {
            if let Some(emit) = self.dry_run {
                emit(event);
                continue;
            }
            let Some(indexer) = &self.ctx.indexer else {
                continue;
            };
            match indexer.index(event) {
                Ok(()) => report.indexed += 1,
                Err(e) => {
                    error!(event_id = %event.id, error = %e, "indexing failed");
                    report.index_failures += 1;
                }
            }
        }

        report.enter(UnitState::Done);
        info!(agenda = %report.agenda_id, events = report.events, indexed = report.indexed, "unit done");
        report
    }

    /// Runs every date from `start` through `end`, stopping early only on request.
    pub fn run_range(&self, region: &Region, start: CalendarDate, end: CalendarDate) -> RangeReport {
        let mut report = RangeReport {
            region: region.name.to_string(),
            ..RangeReport::default()
        };
        let dates = calendar::range(start, end);
        info!(region = %region.name, from = %start, to = %end, units = dates.len(), "starting backfill");

        for date in dates {
            if self.ctx.stop.is_stopped() {
                info!(region = %region.name, date = %date, "stop requested, leaving backfill");
                report.stopped_at = Some(date);
                break;
            }
            report.record(self.run_unit(region, date));
        }

        info!(
            region = %region.name,
            done = report.done,
            failed = report.failed.len(),
            events = report.events,
            "backfill finished"
        );
        report
    }

    /// Backfills each region on its own thread, from `since` (or the region's
    /// historical start) through today.
    pub fn run_regions(&self, regions: &[&Region], since: Option<CalendarDate>) -> Vec<RangeReport> {
        let end = self.today;
        thread::scope(|scope| {
            let handles: Vec<_> = regions
                .iter()
                .map(|region| {
                    let start = since.unwrap_or(region.historical_start_date);
                    (region.name, scope.spawn(move || self.run_range(region, start, end)))
                })
                .collect();

            handles
                .into_iter()
                .filter_map(|(name, handle)| match handle.join() {
                    Ok(report) => Some(report),
                    Err(_) => {
                        error!(region = %name, "backfill thread panicked");
                        None
                    }
                })
                .collect()
        })
    }
}

fn warn_duplicate_ids(agenda_id: &str, events: &[AgendaEvent]) {
    let mut seen = HashSet::new();
    for event in events {
        if !seen.insert(event.id.as_str()) {
            warn!(agenda = %agenda_id, event_id = %event.id, "two events share an id, the later one wins in the index");
        }
    }
}
