//! Boundary with the document index.
//!
//! Events are upserted by id, so indexing the same page twice replaces the
//! previous documents instead of duplicating them. Before upserting,
//! `description` and `location` go through a stop-word [`Analyzer`]; the
//! `original*` fields are sent untouched.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::blocking::Client;
use reqwest::Url;
use rusqlite::{params, Connection};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ConfigError, IndexError};
use crate::fetch::RetryPolicy;
use crate::schema::{AgendaEvent, IndexedDocument};

pub trait Analyzer: Send + Sync {
    /// Splits `text` into tokens with stop-words removed.
    fn analyze(&self, text: &str) -> Result<Vec<String>, IndexError>;
}

pub trait DocumentIndex: Send + Sync {
    fn upsert(&self, document: &IndexedDocument) -> Result<(), IndexError>;
}

pub struct IndexingClient {
    index: Box<dyn DocumentIndex>,
    analyzer: Option<Box<dyn Analyzer>>,
    retry: RetryPolicy,
}

impl IndexingClient {
    pub fn new(index: Box<dyn DocumentIndex>, analyzer: Option<Box<dyn Analyzer>>) -> Self {
        Self {
            index,
            analyzer,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builds the document for `event`. A failing analyzer degrades to the
    /// un-analyzed text; the event is never dropped for it.
    pub fn prepare(&self, event: &AgendaEvent) -> IndexedDocument {
        let mut document = IndexedDocument::from(event);
        if let Some(analyzer) = &self.analyzer {
            document.description = self.analyzed(analyzer.as_ref(), &event.id, &event.description);
            document.location = self.analyzed(analyzer.as_ref(), &event.id, &event.location);
        }
        document
    }

    fn analyzed(&self, analyzer: &dyn Analyzer, event_id: &str, text: &str) -> String {
        if text.trim().is_empty() {
            return text.to_string();
        }
        match self.retry.run(|| analyzer.analyze(text), IndexError::is_retryable) {
            Ok(tokens) => tokens.join(" "),
            Err(error) => {
                warn!(event_id, error = %error, "analyzer failed, indexing original text");
                text.to_string()
            }
        }
    }

    pub fn index(&self, event: &AgendaEvent) -> Result<(), IndexError> {
        let document = self.prepare(event);
        self.retry
            .run(|| self.index.upsert(&document), IndexError::is_retryable)?;
        debug!(event_id = %event.id, "indexed");
        Ok(())
    }
}

/// Elasticsearch over its REST API: `_doc` upserts and `_analyze`.
#[derive(Clone)]
pub struct ElasticsearchClient {
    client: Client,
    base: Url,
    index: String,
    credentials: Option<(String, String)>,
    stopwords: String,
}

impl ElasticsearchClient {
    pub fn new(
        base: Url,
        index: impl Into<String>,
        credentials: Option<(String, String)>,
        timeout: Duration,
        stopwords: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            base,
            index: index.into(),
            credentials,
            stopwords: stopwords.into(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, IndexError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| self.transport_error(self.base.as_str(), "endpoint cannot be a base URL", false))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }

    fn transport_error(&self, url: &str, message: &str, retryable: bool) -> IndexError {
        IndexError::Transport {
            url: url.to_string(),
            message: message.to_string(),
            retryable,
        }
    }

    fn send_error(&self, url: &Url, error: reqwest::Error) -> IndexError {
        let retryable = error.is_timeout() || error.is_connect();
        self.transport_error(url.as_str(), &error.to_string(), retryable)
    }
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    tokens: Vec<AnalyzeToken>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeToken {
    token: String,
}

impl Analyzer for ElasticsearchClient {
    fn analyze(&self, text: &str) -> Result<Vec<String>, IndexError> {
        let url = self.url(&["_analyze"])?;
        let body = json!({
            "tokenizer": "standard",
            "filter": ["lowercase", { "type": "stop", "stopwords": self.stopwords }],
            "text": text,
        });
        let response = self
            .authorized(self.client.post(url.clone()).json(&body))
            .send()
            .map_err(|e| self.send_error(&url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(IndexError::Analyzer(format!("HTTP {status} from {url}")));
        }
        let parsed: AnalyzeResponse = response
            .json()
            .map_err(|e| IndexError::Analyzer(e.to_string()))?;
        Ok(parsed.tokens.into_iter().map(|t| t.token).collect())
    }
}

impl DocumentIndex for ElasticsearchClient {
    fn upsert(&self, document: &IndexedDocument) -> Result<(), IndexError> {
        let mut url = self.url(&[&self.index, "_doc", &document.id])?;
        url.query_pairs_mut().append_pair("refresh", "true");

        let response = self
            .authorized(self.client.put(url.clone()).json(document))
            .send()
            .map_err(|e| self.send_error(&url, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(IndexError::Rejected {
                id: document.id.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let reply: serde_json::Value = response.json().unwrap_or_default();
        debug!(
            id = %document.id,
            result = reply.get("result").and_then(|v| v.as_str()).unwrap_or("unknown"),
            version = reply.get("_version").and_then(|v| v.as_i64()).unwrap_or(0),
            "document upserted"
        );
        Ok(())
    }
}

/// Resolves an Elastic Cloud id (`name:base64(host$es_uuid$kibana_uuid)`) to
/// the cluster's HTTPS endpoint.
pub fn decode_cloud_id(cloud_id: &str) -> Result<Url, ConfigError> {
    let invalid = || ConfigError::InvalidCloudId(cloud_id.to_string());

    let (_, encoded) = cloud_id.split_once(':').ok_or_else(invalid)?;
    let decoded = STANDARD.decode(encoded.trim()).map_err(|_| invalid())?;
    let decoded = String::from_utf8(decoded).map_err(|_| invalid())?;

    let mut parts = decoded.split('$');
    let host = parts.next().filter(|h| !h.is_empty()).ok_or_else(invalid)?;
    let es_uuid = parts.next().filter(|u| !u.is_empty()).ok_or_else(invalid)?;

    let endpoint = match host.split_once(':') {
        Some((domain, port)) => format!("https://{es_uuid}.{domain}:{port}"),
        None => format!("https://{es_uuid}.{host}"),
    };
    Url::parse(&endpoint).map_err(|_| invalid())
}

/// Local SQLite index with the same upsert-by-id contract.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

impl SqliteIndex {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    pub fn in_memory() -> rusqlite::Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> rusqlite::Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
              id TEXT PRIMARY KEY,
              region TEXT NOT NULL,
              owner TEXT NOT NULL,
              date TEXT NOT NULL,
              description TEXT NOT NULL,
              location TEXT NOT NULL,
              attendance_json TEXT NOT NULL,
              raw_json TEXT NOT NULL,
              indexed_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );

            CREATE INDEX IF NOT EXISTS idx_events_region_date ON events(region, date);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn count(&self) -> rusqlite::Result<usize> {
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn get(&self, id: &str) -> Result<Option<IndexedDocument>, IndexError> {
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut stmt = conn.prepare("SELECT raw_json FROM events WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => {
                let raw: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }
}

impl DocumentIndex for SqliteIndex {
    fn upsert(&self, document: &IndexedDocument) -> Result<(), IndexError> {
        let attendance_json = serde_json::to_string(&document.attendance)?;
        let raw_json = serde_json::to_string(document)?;
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        conn.execute(
            r#"
            INSERT INTO events (
              id, region, owner, date, description, location, attendance_json, raw_json
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
              region=excluded.region,
              owner=excluded.owner,
              date=excluded.date,
              description=excluded.description,
              location=excluded.location,
              attendance_json=excluded.attendance_json,
              raw_json=excluded.raw_json,
              indexed_at=strftime('%Y-%m-%dT%H:%M:%fZ','now')
            "#,
            params![
                document.id,
                document.region,
                document.owner,
                document.date.to_rfc3339(),
                document.description,
                document.location,
                attendance_json,
                raw_json
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{at_local_time, CalendarDate};
    use crate::schema::Attendee;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn event() -> AgendaEvent {
        AgendaEvent {
            id: "clm-2019-07-01T10:30:00+0200".to_string(),
            date: at_local_time(CalendarDate::from_ymd(2019, 7, 1), 10, 30),
            description: "Reunión con los alcaldes de la provincia".to_string(),
            original_description: "Reunión con los alcaldes de la provincia".to_string(),
            location: "Palacio de Fuensalida".to_string(),
            original_location: "Lugar: Palacio de Fuensalida".to_string(),
            attendance: vec![Attendee::new("Consejero", Some("Ana".to_string()))],
            owner: "Presidente".to_string(),
            region: "Castilla-La Mancha".to_string(),
        }
    }

    struct StopWords;
    impl Analyzer for StopWords {
        fn analyze(&self, text: &str) -> Result<Vec<String>, IndexError> {
            Ok(text
                .split_whitespace()
                .map(str::to_lowercase)
                .filter(|t| !matches!(t.as_str(), "con" | "los" | "de" | "la"))
                .collect())
        }
    }

    struct Broken(Arc<AtomicUsize>);
    impl Analyzer for Broken {
        fn analyze(&self, _: &str) -> Result<Vec<String>, IndexError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(IndexError::Analyzer("unreachable".to_string()))
        }
    }

    #[test]
    fn analyzed_text_is_rejoined_and_originals_kept() {
        let client = IndexingClient::new(Box::new(SqliteIndex::in_memory().unwrap()), Some(Box::new(StopWords)));
        let doc = client.prepare(&event());
        assert_eq!(doc.description, "reunión alcaldes provincia");
        assert_eq!(doc.location, "palacio fuensalida");
        assert_eq!(doc.original_description, "Reunión con los alcaldes de la provincia");
        assert_eq!(doc.original_location, "Lugar: Palacio de Fuensalida");
    }

    #[test]
    fn analyzer_failure_degrades_to_original_text() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = IndexingClient::new(
            Box::new(SqliteIndex::in_memory().unwrap()),
            Some(Box::new(Broken(calls.clone()))),
        );
        let doc = client.prepare(&event());
        assert_eq!(doc.description, event().description);
        assert_eq!(doc.location, event().location);
        // not retryable: one call per field
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn sqlite_index_upserts_by_id() {
        let index = SqliteIndex::in_memory().unwrap();
        let mut doc = IndexedDocument::from(&event());
        index.upsert(&doc).unwrap();
        doc.description = "updated".to_string();
        index.upsert(&doc).unwrap();

        assert_eq!(index.count().unwrap(), 1);
        assert_eq!(index.get(&doc.id).unwrap().unwrap().description, "updated");
        assert!(index.get("missing").unwrap().is_none());
    }

    #[test]
    fn decodes_cloud_ids() {
        let encoded = STANDARD.encode("europe-west1.gcp.cloud.es.io$abc123$kib456");
        let url = decode_cloud_id(&format!("cansino:{encoded}")).unwrap();
        assert_eq!(url.as_str(), "https://abc123.europe-west1.gcp.cloud.es.io/");

        let encoded = STANDARD.encode("cloud.es.io:9243$abc123$kib456");
        let url = decode_cloud_id(&format!("cansino:{encoded}")).unwrap();
        assert_eq!(url.as_str(), "https://abc123.cloud.es.io:9243/");

        assert!(decode_cloud_id("no-separator").is_err());
        assert!(decode_cloud_id("name:!!!").is_err());
    }

    #[test]
    fn document_urls_escape_event_ids() {
        let es = ElasticsearchClient::new(
            Url::parse("https://localhost:9200").unwrap(),
            "cansino",
            None,
            Duration::from_secs(1),
            "_spanish_",
        )
        .unwrap();
        let url = es.url(&["cansino", "_doc", "clm-2019-07-01T10:30:00+0200"]).unwrap();
        assert_eq!(url.path(), "/cansino/_doc/clm-2019-07-01T10:30:00+0200");
        assert_eq!(es.url(&["_analyze"]).unwrap().path(), "/_analyze");
    }
}
