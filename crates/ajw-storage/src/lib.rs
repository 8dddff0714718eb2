//! Seen-set persistence, the append-only CSV sink and HTTP fetch utilities for AJW.

use std::collections::{BTreeSet, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ajw_core::{JobRow, SINK_HEADERS};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{RequestBuilder, StatusCode};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "ajw-storage";

/// Identity keys of every row already appended to the sink, kept sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenSet {
    keys: BTreeSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_new(&self, row: &JobRow) -> bool {
        !self.keys.contains(&row.identity_key())
    }

    /// Call only after the row is durably in the sink.
    pub fn mark(&mut self, row: &JobRow) {
        self.keys.insert(row.identity_key());
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

impl FromIterator<String> for SeenSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

/// JSON-array file holding the persisted [`SeenSet`].
#[derive(Debug, Clone)]
pub struct SeenStore {
    path: PathBuf,
}

impl SeenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing, unreadable or malformed state all load as an empty set.
    pub async fn load(&self) -> SeenSet {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return SeenSet::new(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "seen set unreadable; starting empty");
                return SeenSet::new();
            }
        };
        match serde_json::from_slice::<Vec<String>>(&bytes) {
            Ok(keys) => keys.into_iter().collect(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "seen set malformed; starting empty");
                SeenSet::new()
            }
        }
    }

    /// Rewrites the whole set, sorted, through a temp file renamed over the target.
    pub async fn save(&self, seen: &SeenSet) -> anyhow::Result<()> {
        let keys: Vec<&str> = seen.iter().collect();
        let mut bytes = serde_json::to_vec_pretty(&keys).context("serializing seen set")?;
        bytes.push(b'\n');
        write_atomically(&self.path, &bytes).await
    }
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "state".to_string());
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.sync_all()
        .await
        .with_context(|| format!("syncing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "renaming temp file {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

/// Append-only CSV log of accepted rows.
#[derive(Debug, Clone)]
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the header when the file is absent or empty.
    pub async fn ensure_initialized(&self) -> anyhow::Result<()> {
        let needs_header = match fs::metadata(&self.path).await {
            Ok(meta) => meta.len() == 0,
            Err(err) if err.kind() == ErrorKind::NotFound => true,
            Err(err) => {
                return Err(err).with_context(|| format!("inspecting {}", self.path.display()))
            }
        };
        if !needs_header {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        let header = encode_record(&SINK_HEADERS)?;
        fs::write(&self.path, header)
            .await
            .with_context(|| format!("writing header to {}", self.path.display()))
    }

    /// Appends exactly one record.
    pub async fn append(&self, row: &JobRow) -> anyhow::Result<()> {
        self.ensure_initialized().await?;
        let record = encode_record(&row.sink_record())?;
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening {} for append", self.path.display()))?;
        file.write_all(&record)
            .await
            .with_context(|| format!("appending to {}", self.path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing {}", self.path.display()))?;
        Ok(())
    }
}

fn encode_record<S: AsRef<[u8]>>(fields: &[S]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    writer
        .write_record(fields)
        .context("encoding csv record")?;
    writer
        .into_inner()
        .map_err(|err| anyhow::anyhow!("flushing csv record: {}", err.error()))
}

/// Throttling and transient upstream failures; everything else is final.
const RETRY_STATUSES: [StatusCode; 5] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

pub fn should_retry_status(status: StatusCode) -> bool {
    RETRY_STATUSES.contains(&status)
}

pub fn should_retry_transport(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Retry `n` (1-based) waits `factor * 2^(n-1)`, never more than `cap`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub factor: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            factor: Duration::from_millis(700),
            cap: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_before_retry(&self, retry: usize) -> Duration {
        let doublings = retry.saturating_sub(1).min(31) as u32;
        self.factor.saturating_mul(1u32 << doublings).min(self.cap)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_platform_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(35),
            user_agent: None,
            global_concurrency: 8,
            per_platform_concurrency: 2,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("http fetcher is shutting down")]
    Closed,
}

/// Shared HTTP client owned by one run; limits concurrency globally and per platform.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_platform_limit: usize,
    per_platform: Mutex<HashMap<String, Arc<Semaphore>>>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/html;q=0.9,*/*;q=0.8"),
        );
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .default_headers(headers);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_platform_limit: config.per_platform_concurrency.max(1),
            per_platform: Mutex::new(HashMap::new()),
            backoff: config.backoff,
        })
    }

    async fn per_platform_semaphore(&self, platform: &str) -> Arc<Semaphore> {
        let mut map = self.per_platform.lock().await;
        map.entry(platform.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_platform_limit)))
            .clone()
    }

    pub async fn get(
        &self,
        run_id: Uuid,
        platform: &str,
        url: &str,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", %run_id, platform, method = "GET", url);
        self.send_with_retry(platform, || self.client.get(url))
            .instrument(span)
            .await
    }

    pub async fn post_json(
        &self,
        run_id: Uuid,
        platform: &str,
        url: &str,
        body: &serde_json::Value,
        extra_headers: &[(&'static str, String)],
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", %run_id, platform, method = "POST", url);
        self.send_with_retry(platform, || {
            let mut req = self.client.post(url).json(body);
            for (name, value) in extra_headers {
                req = req.header(*name, value.as_str());
            }
            req
        })
        .instrument(span)
        .await
    }

    async fn send_with_retry<F>(
        &self,
        platform: &str,
        build: F,
    ) -> Result<FetchedResponse, FetchError>
    where
        F: Fn() -> RequestBuilder,
    {
        let _global = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;
        let per_platform = self.per_platform_semaphore(platform).await;
        let _platform = per_platform.acquire().await.map_err(|_| FetchError::Closed)?;

        let mut retries = 0usize;
        loop {
            let outcome = build().send().await;
            let retryable = match &outcome {
                Ok(resp) => should_retry_status(resp.status()),
                Err(err) => should_retry_transport(err),
            };
            if retryable && retries < self.backoff.max_retries {
                retries += 1;
                let delay = self.backoff.delay_before_retry(retries);
                debug!(platform, retries, ?delay, "retrying request");
                tokio::time::sleep(delay).await;
                continue;
            }

            let resp = outcome?;
            let status = resp.status();
            let final_url = resp.url().to_string();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }
            let body = resp.bytes().await?.to_vec();
            return Ok(FetchedResponse {
                status,
                final_url,
                body,
            });
        }
    }
}
