use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use agenda_core::adapters::FetchRequest;
use agenda_core::cache::PageCache;
use agenda_core::calendar::CalendarDate;
use agenda_core::error::{FetchError, IndexError};
use agenda_core::fetch::{CachePolicy, Fetcher, RetryPolicy, Transport};
use agenda_core::index::{DocumentIndex, IndexingClient, SqliteIndex};
use agenda_core::orchestrator::{Backfill, Context, UnitState};
use agenda_core::region::{Registry, RegionId};
use agenda_core::schema::IndexedDocument;

const CLM_PAGE: &str = r#"<!DOCTYPE html>
<html><body>
  <div class="agenda-historico"><div><div>
    <ul class="agenda evento">
      <li class="cargo">Presidente de Castilla-La Mancha</li>
      <li>10:30 - Reunión con los alcaldes de la provincia</li>
      <li>Lugar: Palacio de Fuensalida, Toledo</li>
      <li class="ver-mas"><p>Consejera de Hacienda - María Ruiz<br>Alcalde de Toledo - Pedro Gómez</p></li>
    </ul>
  </div></div></div>
</body></html>"#;

/// Serves the CLM fixture and counts network calls; dates in `failing` get a 500.
struct Counting {
    calls: Arc<AtomicUsize>,
    failing: Vec<&'static str>,
}

impl Counting {
    fn new() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (Self { calls: calls.clone(), failing: Vec::new() }, calls)
    }
}

impl Transport for Counting {
    fn execute(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.iter().any(|d| request.url.ends_with(d)) {
            return Err(FetchError::Status { url: request.url.clone(), status: 500 });
        }
        Ok(CLM_PAGE.as_bytes().to_vec())
    }
}

struct Shared(Arc<SqliteIndex>);

impl DocumentIndex for Shared {
    fn upsert(&self, document: &IndexedDocument) -> Result<(), IndexError> {
        self.0.upsert(document)
    }
}

fn fetcher(transport: Counting) -> Fetcher {
    Fetcher::new(Box::new(transport), Some(PageCache::in_memory().unwrap())).with_retry(RetryPolicy::NONE)
}

fn indexed_context(transport: Counting) -> (Context, Arc<SqliteIndex>) {
    let store = Arc::new(SqliteIndex::in_memory().unwrap());
    let indexer = IndexingClient::new(Box::new(Shared(store.clone())), None).with_retry(RetryPolicy::NONE);
    (Context::new(Registry::builtin(), fetcher(transport), Some(indexer)), store)
}

#[test]
fn clm_historical_day_end_to_end() {
    let (transport, _) = Counting::new();
    let (ctx, store) = indexed_context(transport);
    let region = ctx.registry.resolve("clm").unwrap().clone();
    let date = CalendarDate::from_ymd(2019, 7, 1);
    let backfill = Backfill::new(&ctx).with_today(CalendarDate::from_ymd(2024, 1, 1));

    let report = backfill.run_unit(&region, date);
    assert_eq!(report.state, UnitState::Done);
    assert_eq!((report.events, report.indexed), (1, 1));

    let id = "clm-2019-07-01T10:30:00+0200";
    let doc = store.get(id).unwrap().expect("event indexed");
    assert_eq!(doc.description, "Reunión con los alcaldes de la provincia");
    assert_eq!(doc.original_description, doc.description);
    assert_eq!(doc.location, "Palacio de Fuensalida, Toledo");
    assert_eq!(doc.original_location, "Lugar: Palacio de Fuensalida, Toledo");
    assert_eq!(doc.owner, "Presidente");
    assert_eq!(doc.region, "Castilla-La Mancha");
    assert_eq!(doc.attendance.len(), 2);
    assert_eq!(doc.attendance[0].job, "Consejera de Hacienda");
    assert_eq!(doc.attendance[0].full_name.as_deref(), Some("María Ruiz"));
    assert_eq!(doc.attendance[1].full_name.as_deref(), Some("Pedro Gómez"));
}

#[test]
fn same_request_twice_hits_the_network_once() {
    let (transport, calls) = Counting::new();
    let fetcher = fetcher(transport);
    let request = FetchRequest::get("https://transparencia.castillalamancha.es/agenda-historico/198?x=1");
    let allowed = vec!["transparencia.castillalamancha.es".to_string()];

    let first = fetcher.fetch(&request, &allowed, CachePolicy::Use).unwrap();
    let second = fetcher.fetch(&request, &allowed, CachePolicy::Use).unwrap();
    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn todays_agenda_is_never_served_from_cache() {
    let (transport, calls) = Counting::new();
    let ctx = Context::new(Registry::builtin(), fetcher(transport), None);
    let region = RegionId::CastillaLaMancha.descriptor();
    let today = CalendarDate::from_ymd(2019, 7, 1);
    let backfill = Backfill::new(&ctx).with_today(today);

    backfill.run_unit(&region, today);
    backfill.run_unit(&region, today);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn parsing_is_deterministic() {
    let region = RegionId::CastillaLaMancha.descriptor();
    let adapter = region.adapter();
    let date = CalendarDate::from_ymd(2019, 7, 1);

    let mut first = adapter.agenda(&region, date);
    let mut second = adapter.agenda(&region, date);
    let a = adapter.parse(&mut first, CLM_PAGE.as_bytes()).unwrap();
    let b = adapter.parse(&mut second, CLM_PAGE.as_bytes()).unwrap();
    assert_eq!(a, b);
    assert_eq!(a[0].id, b[0].id);
}

#[test]
fn one_failing_day_does_not_abort_the_backfill() {
    let (mut transport, calls) = Counting::new();
    transport.failing.push("=02/07/2019");
    let (ctx, store) = indexed_context(transport);
    let region = RegionId::CastillaLaMancha.descriptor();

    let report = Backfill::new(&ctx)
        .with_today(CalendarDate::from_ymd(2024, 1, 1))
        .run_range(&region, CalendarDate::from_ymd(2019, 7, 1), CalendarDate::from_ymd(2019, 7, 3));

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.done, 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, CalendarDate::from_ymd(2019, 7, 2));
    assert_eq!(store.count().unwrap(), 2);
}

#[test]
fn reindexing_a_unit_overwrites_instead_of_duplicating() {
    let (transport, _) = Counting::new();
    let (ctx, store) = indexed_context(transport);
    let region = RegionId::CastillaLaMancha.descriptor();
    let backfill = Backfill::new(&ctx).with_today(CalendarDate::from_ymd(2024, 1, 1));

    let date = CalendarDate::from_ymd(2019, 7, 1);
    backfill.run_unit(&region, date);
    backfill.run_unit(&region, date);
    assert_eq!(store.count().unwrap(), 1);
}

/// First answer lacks the `insert` command; later ones are a valid empty day.
struct MadridRecovering {
    calls: Arc<AtomicUsize>,
}

impl Transport for MadridRecovering {
    fn execute(&self, _: &FetchRequest) -> Result<Vec<u8>, FetchError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Ok(br#"[{"command":"settings"}]"#.to_vec());
        }
        let html = "<div class=\"view-empty\">no existen eventos programados en el día seleccionado</div>";
        Ok(serde_json::to_vec(&serde_json::json!([
            { "command": "settings" },
            { "command": "insert", "data": html }
        ]))
        .unwrap())
    }
}

#[test]
fn unparsable_page_is_refetched_on_the_next_run() {
    let calls = Arc::new(AtomicUsize::new(0));
    let fetcher = Fetcher::new(
        Box::new(MadridRecovering { calls: calls.clone() }),
        Some(PageCache::in_memory().unwrap()),
    )
    .with_retry(RetryPolicy::NONE);
    let ctx = Context::new(Registry::builtin(), fetcher, None);
    let region = RegionId::Madrid.descriptor();
    let date = CalendarDate::from_ymd(2019, 9, 3);
    let backfill = Backfill::new(&ctx).with_today(CalendarDate::from_ymd(2024, 1, 1));

    let first = backfill.run_unit(&region, date);
    assert!(matches!(first.state, UnitState::Failed(_)), "{:?}", first.state);

    let second = backfill.run_unit(&region, date);
    assert_eq!(second.state, UnitState::Done);
    assert_eq!(second.events, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // the good page is now cached
    backfill.run_unit(&region, date);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn unknown_region_lists_the_supported_names() {
    let err = Registry::builtin().resolve("Andalucía").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Andalucía"));
    for name in ["Castilla-La Mancha", "Castilla-León", "Extremadura", "Madrid"] {
        assert!(message.contains(name), "{message}");
    }
}
