use reqwest::Url;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::cache::PageCache;
use crate::error::ConfigError;
use crate::fetch::{Fetcher, HttpTransport, RetryPolicy};
use crate::index::{decode_cloud_id, Analyzer, ElasticsearchClient, IndexingClient, SqliteIndex};
use crate::orchestrator::Context;
use crate::region::Registry;

pub const DEFAULT_CONFIG_FILE: &str = "cansino.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache: CacheSettings,
    pub http: HttpSettings,
    pub index: IndexSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from(".cansino_cache").join("pages.sqlite3"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub pause_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: concat!("cansino/", env!("CARGO_PKG_VERSION")).to_string(),
            max_retries: 2,
            retry_delay_ms: 500,
            pause_ms: 0,
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBackend {
    Elasticsearch,
    Sqlite,
    None,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub backend: String,
    pub name: String,
    pub url: Option<String>,
    pub cloud_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub sqlite_path: PathBuf,
    pub analyze: bool,
    pub stopwords: String,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            backend: "elasticsearch".to_string(),
            name: "cansino".to_string(),
            url: None,
            cloud_id: None,
            username: None,
            password: None,
            sqlite_path: PathBuf::from("cansino.sqlite3"),
            analyze: true,
            stopwords: "_spanish_".to_string(),
        }
    }
}

impl IndexSettings {
    pub fn backend(&self) -> Result<IndexBackend, ConfigError> {
        match self.backend.trim().to_ascii_lowercase().as_str() {
            "elasticsearch" | "es" => Ok(IndexBackend::Elasticsearch),
            "sqlite" => Ok(IndexBackend::Sqlite),
            "none" => Ok(IndexBackend::None),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }

    fn endpoint(&self) -> Result<Url, ConfigError> {
        if let Some(url) = self.url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Url::parse(url.trim()).map_err(|_| ConfigError::InvalidEndpoint(url.to_string()));
        }
        match self.cloud_id.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(cloud_id) => decode_cloud_id(cloud_id),
            None => Err(ConfigError::MissingEndpoint),
        }
    }
}

impl Settings {
    /// Reads `path` if given, else `cansino.toml` when present, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
        };
        let mut settings = match path {
            Some(path) => Self::from_file(&path)?,
            None => Settings::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Index credentials from the environment win over the file.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = non_empty("ELASTIC_URL") {
            self.index.url = Some(url);
        }
        if let Some(cloud_id) = non_empty("ELASTIC_CLOUD_ID") {
            self.index.cloud_id = Some(cloud_id);
        }
        if let Some(username) = non_empty("ELASTIC_CLOUD_USERNAME") {
            self.index.username = Some(username);
        }
        if let Some(password) = non_empty("ELASTIC_CLOUD_AUTH") {
            self.index.password = Some(password);
        }
    }

    /// Wires the registry, fetcher and indexer into one [`Context`].
    pub fn build_context(&self) -> Result<Context, ConfigError> {
        let indexer = self.build_indexer()?;
        let fetcher = self.build_fetcher()?;
        Ok(Context::new(Registry::builtin(), fetcher, indexer))
    }

    pub fn build_fetcher(&self) -> Result<Fetcher, ConfigError> {
        let transport = HttpTransport::new(self.http.timeout(), &self.http.user_agent)
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        let cache = if self.cache.enabled {
            if let Some(parent) = self.cache.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|e| self.store_error("page cache", &self.cache.path, e))?;
            }
            let cache = PageCache::open(&self.cache.path)
                .map_err(|e| self.store_error("page cache", &self.cache.path, e))?;
            info!(path = %self.cache.path.display(), "page cache ready");
            Some(cache)
        } else {
            None
        };

        Ok(Fetcher::new(Box::new(transport), cache)
            .with_retry(self.http.retry())
            .with_pause(Duration::from_millis(self.http.pause_ms)))
    }

    /// `None` when indexing is disabled.
    pub fn build_indexer(&self) -> Result<Option<IndexingClient>, ConfigError> {
        let client = match self.index.backend()? {
            IndexBackend::None => return Ok(None),
            IndexBackend::Sqlite => {
                let index = SqliteIndex::open(&self.index.sqlite_path)
                    .map_err(|e| self.store_error("sqlite index", &self.index.sqlite_path, e))?;
                IndexingClient::new(Box::new(index), None)
            }
            IndexBackend::Elasticsearch => {
                let endpoint = self.index.endpoint()?;
                let credentials = match (&self.index.username, &self.index.password) {
                    (Some(user), Some(password)) => Some((user.clone(), password.clone())),
                    _ => None,
                };
                let es = ElasticsearchClient::new(
                    endpoint.clone(),
                    self.index.name.clone(),
                    credentials,
                    self.http.timeout(),
                    self.index.stopwords.clone(),
                )?;
                let analyzer: Option<Box<dyn Analyzer>> = if self.index.analyze {
                    Some(Box::new(es.clone()))
                } else {
                    None
                };
                info!(endpoint = %endpoint, index = %self.index.name, "elasticsearch index ready");
                IndexingClient::new(Box::new(es), analyzer)
            }
        };
        Ok(Some(client.with_retry(self.http.retry())))
    }

    fn store_error(&self, what: &'static str, path: &Path, error: impl std::fmt::Display) -> ConfigError {
        ConfigError::Store {
            what,
            path: path.display().to_string(),
            message: error.to_string(),
        }
    }
}
