//! Network access for region adapters.
//!
//! [`Fetcher`] is the only path to the network. It checks the request against
//! the region's domain allow-list, serves repeated requests from the
//! [`PageCache`], and retries transient failures a bounded number of times.
//! Pages are fetched one hop deep: links inside a page are never followed.

use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use reqwest::Url;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::adapters::{FetchRequest, Method};
use crate::cache::{cache_key, PageCache};
use crate::error::FetchError;

const MAX_REDIRECTS: usize = 5;

/// Pluggable HTTP execution.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(same_host_redirects())
            .build()?;
        Ok(Self { client })
    }
}

/// Follows redirects only while they stay on the host first requested.
fn same_host_redirects() -> Policy {
    Policy::custom(|attempt| {
        let first_host = attempt
            .previous()
            .first()
            .and_then(|u| u.host_str())
            .map(str::to_string);
        if attempt.previous().len() > MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if first_host.as_deref() == attempt.url().host_str() {
            attempt.follow()
        } else {
            attempt.stop()
        }
    })
}

impl Transport for HttpTransport {
    fn execute(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError> {
        let builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self
                .client
                .post(&request.url)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(request.body.clone().unwrap_or_default()),
        };

        let response = builder.send().map_err(|e| network_error(&request.url, &e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().map_err(|e| network_error(&request.url, &e))?;
        Ok(bytes.to_vec())
    }
}

fn network_error(url: &str, error: &reqwest::Error) -> FetchError {
    FetchError::Network {
        url: url.to_string(),
        message: error.to_string(),
        retryable: error.is_timeout() || error.is_connect() || error.is_request(),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const NONE: RetryPolicy = RetryPolicy {
        max_retries: 0,
        base_delay: Duration::ZERO,
    };

    /// Exponential backoff: base, 2x base, 4x base ... capped at 256x.
    pub fn delay(&self, attempt: usize) -> Duration {
        let exponent = u32::try_from(attempt).unwrap_or(8).min(8);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Runs `op` until it succeeds, fails permanently, or the budget is spent.
    pub fn run<T, E>(&self, mut op: impl FnMut() -> Result<T, E>, retryable: impl Fn(&E) -> bool) -> Result<T, E> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(error) if attempt < self.max_retries && retryable(&error) => {
                    sleep(self.delay(attempt));
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    Use,
    /// Neither read nor write the cache (pages that may still change).
    Bypass,
}

pub struct Fetcher {
    transport: Box<dyn Transport>,
    cache: Option<PageCache>,
    retry: RetryPolicy,
    pause: Duration,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Fetcher {
    pub fn new(transport: Box<dyn Transport>, cache: Option<PageCache>) -> Self {
        Self {
            transport,
            cache,
            retry: RetryPolicy::default(),
            pause: Duration::ZERO,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Politeness delay after every request that actually hits the network.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Raw body of `request`, cached once downloaded.
    pub fn fetch(
        &self,
        request: &FetchRequest,
        allowed_domains: &[String],
        policy: CachePolicy,
    ) -> Result<Vec<u8>, FetchError> {
        self.fetch_with(request, allowed_domains, policy, |raw| Ok(raw.to_vec()))
    }

    /// Fetches `request` and hands the body to `accept`. The body is cached
    /// only after `accept` succeeds; a cached body it rejects is evicted, so
    /// a later run goes back to the network.
    pub fn fetch_with<T, E>(
        &self,
        request: &FetchRequest,
        allowed_domains: &[String],
        policy: CachePolicy,
        accept: impl FnOnce(&[u8]) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<FetchError>,
    {
        check_domain(&request.url, allowed_domains)?;

        let cache = match (&self.cache, policy) {
            (Some(cache), CachePolicy::Use) => cache,
            _ => return accept(&self.download(request)?),
        };

        let key = cache_key(request);
        let lock = self.key_lock(&key);
        let result = {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            self.fetch_cached(cache, &key, request, accept)
        };
        self.release_lock(&key, lock);
        result
    }

    fn fetch_cached<T, E>(
        &self,
        cache: &PageCache,
        key: &str,
        request: &FetchRequest,
        accept: impl FnOnce(&[u8]) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<FetchError>,
    {
        if let Some(content) = cache.get(key).map_err(FetchError::from)? {
            debug!(url = %request.url, "cache hit");
            let accepted = accept(&content);
            if accepted.is_err() {
                warn!(url = %request.url, "evicting cached page that no longer parses");
                cache.remove(key).map_err(FetchError::from)?;
            }
            return accepted;
        }

        let content = self.download(request)?;
        let value = accept(&content)?;
        cache.put(key, request, &content).map_err(FetchError::from)?;
        Ok(value)
    }

    fn download(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError> {
        info!(method = %request.method, url = %request.url, "Visiting");
        let result = self.retry.run(
            || -> Result<Vec<u8>, FetchError> {
                let content = self.transport.execute(request)?;
                if request.expect_json {
                    ensure_json(&request.url, &content)?;
                }
                Ok(content)
            },
            |e: &FetchError| {
                if e.is_retryable() {
                    warn!(url = %request.url, error = %e, "retrying request");
                    true
                } else {
                    false
                }
            },
        );
        if !self.pause.is_zero() {
            sleep(self.pause);
        }
        result
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(key.to_string()).or_default().clone()
    }

    /// Drops the key's lock once no other caller holds or waits on it.
    fn release_lock(&self, key: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        drop(lock);
        if locks.get(key).is_some_and(|entry| Arc::strong_count(entry) == 1) {
            locks.remove(key);
        }
    }
}

fn ensure_json(url: &str, content: &[u8]) -> Result<(), FetchError> {
    serde_json::from_slice::<serde_json::Value>(content)
        .map(|_| ())
        .map_err(|e| FetchError::NotJson {
            url: url.to_string(),
            message: e.to_string(),
        })
}

pub fn check_domain(url: &str, allowed_domains: &[String]) -> Result<(), FetchError> {
    let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?;
    if allowed_domains.iter().any(|d| d.eq_ignore_ascii_case(host)) {
        Ok(())
    } else {
        Err(FetchError::DisallowedDomain {
            url: url.to_string(),
            allowed: allowed_domains.join(", "),
        })
    }
}
