//! Run orchestration: watch list -> adapters -> dedup -> sink, one seen-set save per run.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::Duration;

use ajw_adapters::{adapter_for_platform, AdapterContext, AdapterError, JobAdapter, Target};
use ajw_core::{JobRow, KeywordMatcher, Platform, DEFAULT_KEYWORD};
use ajw_storage::{CsvSink, HttpClientConfig, HttpFetcher, SeenSet, SeenStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod watch_list;

pub use watch_list::{load_watch_list, parse_watch_list, ConfigError, WatchList};

pub const CRATE_NAME: &str = "ajw-sync";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    pub config_path: PathBuf,
    pub csv_path: PathBuf,
    pub seen_path: PathBuf,
    pub keywords: Vec<String>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub max_concurrent_targets: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("companies.yaml"),
            csv_path: PathBuf::from("music_jobs.csv"),
            seen_path: PathBuf::from("seen_music.json"),
            keywords: vec![DEFAULT_KEYWORD.to_string()],
            user_agent: "ajw-bot/0.1 (+music-jobs)".to_string(),
            http_timeout_secs: 35,
            max_concurrent_targets: 1,
        }
    }
}

impl WatchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            config_path: std::env::var("AJW_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.config_path),
            csv_path: std::env::var("AJW_CSV_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.csv_path),
            seen_path: std::env::var("AJW_SEEN_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.seen_path),
            keywords: std::env::var("AJW_KEYWORDS")
                .ok()
                .map(|v| split_keywords(&v))
                .filter(|k| !k.is_empty())
                .unwrap_or(defaults.keywords),
            user_agent: std::env::var("AJW_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: std::env::var("AJW_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            max_concurrent_targets: std::env::var("AJW_MAX_CONCURRENT_TARGETS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_targets),
        }
    }

    pub fn matcher(&self) -> Result<KeywordMatcher> {
        KeywordMatcher::new(&self.keywords)
            .with_context(|| format!("building keyword matcher for {:?}", self.keywords))
    }
}

pub fn split_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Optional pre-filters applied before any adapter is invoked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFilter {
    pub platform: Option<Platform>,
    pub target: Option<String>,
}

impl RunFilter {
    pub fn admits_platform(&self, platform: Platform) -> bool {
        self.platform.map_or(true, |p| p == platform)
    }

    pub fn admits(&self, platform: Platform, target: &Target) -> bool {
        self.admits_platform(platform)
            && self
                .target
                .as_deref()
                .map_or(true, |wanted| target.matches_filter(wanted))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetCount {
    pub platform: Platform,
    pub target: String,
    pub candidates: usize,
    pub new: usize,
    pub failed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub targets_attempted: usize,
    pub targets_failed: usize,
    pub per_target: Vec<TargetCount>,
    pub per_platform: BTreeMap<Platform, usize>,
    pub total_new: usize,
}

pub struct WatchPipeline {
    http: HttpFetcher,
    seen_store: SeenStore,
    sink: CsvSink,
    matcher: KeywordMatcher,
    adapters: BTreeMap<Platform, Box<dyn JobAdapter>>,
    max_concurrent_targets: usize,
}

impl WatchPipeline {
    pub fn new(config: &WatchConfig) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        let adapters = Platform::ALL
            .into_iter()
            .map(|p| (p, adapter_for_platform(p)))
            .collect();
        Ok(Self {
            http,
            seen_store: SeenStore::new(config.seen_path.clone()),
            sink: CsvSink::new(config.csv_path.clone()),
            matcher: config.matcher()?,
            adapters,
            max_concurrent_targets: config.max_concurrent_targets.max(1),
        })
    }

    /// Replaces the registered adapter for `adapter.platform()`.
    pub fn with_adapter(mut self, adapter: Box<dyn JobAdapter>) -> Self {
        self.adapters.insert(adapter.platform(), adapter);
        self
    }

    pub async fn run_once(&self, watch_list: &WatchList, filter: &RunFilter) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let ctx = AdapterContext::new(run_id, self.matcher.clone());

        let mut seen = self.seen_store.load().await;
        self.sink.ensure_initialized().await?;

        let mut per_platform: BTreeMap<Platform, usize> = BTreeMap::new();
        for platform in watch_list.platforms().filter(|p| filter.admits_platform(*p)) {
            per_platform.entry(platform).or_insert(0);
        }

        let selected: Vec<(Platform, &Target)> = watch_list
            .targets()
            .filter(|(platform, target)| filter.admits(*platform, target))
            .collect();
        let targets_attempted = selected.len();
        info!(%run_id, targets = targets_attempted, "starting watch run");

        let ctx = &ctx;
        let mut fetches = futures::stream::iter(selected.into_iter().map(|(platform, target)| {
            async move { (platform, target, self.fetch_target(ctx, platform, target).await) }
        }))
        .buffered(self.max_concurrent_targets);

        let mut per_target = Vec::new();
        let mut targets_failed = 0usize;
        let mut total_new = 0usize;
        let mut sink_error = None;

        while let Some((platform, target, outcome)) = fetches.next().await {
            let label = target.label();
            let rows = match outcome {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(%platform, target = %label, error = %err, "target failed");
                    targets_failed += 1;
                    per_target.push(TargetCount {
                        platform,
                        target: label,
                        candidates: 0,
                        new: 0,
                        failed: true,
                    });
                    continue;
                }
            };

            let candidates = rows.len();
            let mut new = 0usize;
            for row in &rows {
                match self.accept(row, &mut seen).await {
                    Ok(true) => new += 1,
                    Ok(false) => {}
                    Err(err) => {
                        sink_error = Some(err);
                        break;
                    }
                }
            }
            total_new += new;
            *per_platform.entry(platform).or_insert(0) += new;
            info!("{platform}:{label} -> {new} new");
            per_target.push(TargetCount {
                platform,
                target: label,
                candidates,
                new,
                failed: false,
            });
            if sink_error.is_some() {
                break;
            }
        }
        drop(fetches);

        let saved = self.seen_store.save(&seen).await;
        if let Some(err) = sink_error {
            if let Err(save_err) = saved {
                warn!(error = %save_err, "saving seen set after sink failure");
            }
            return Err(err);
        }
        saved?;

        for (platform, count) in &per_platform {
            info!(%platform, new = *count, "platform summary");
        }
        info!(%run_id, total_new, targets_failed, "watch run finished");

        Ok(RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            targets_attempted,
            targets_failed,
            per_target,
            per_platform,
            total_new,
        })
    }

    /// One target's adapter call. Errors and panics both count as the target failing.
    async fn fetch_target(
        &self,
        ctx: &AdapterContext,
        platform: Platform,
        target: &Target,
    ) -> Result<Vec<JobRow>, AdapterError> {
        let Some(adapter) = self.adapters.get(&platform) else {
            return Err(AdapterError::Message(format!("no adapter registered for {platform}")));
        };
        let span = info_span!("target", %platform, target = %target.label());
        AssertUnwindSafe(adapter.fetch(&self.http, ctx, target))
            .catch_unwind()
            .instrument(span)
            .await
            .unwrap_or_else(|panic| Err(AdapterError::Message(panic_message(panic.as_ref()))))
    }

    /// Appends and marks a row that is not yet in `seen`. Returns whether the row was new.
    async fn accept(&self, row: &JobRow, seen: &mut SeenSet) -> Result<bool> {
        if !seen.is_new(row) {
            return Ok(false);
        }
        self.sink
            .append(row)
            .await
            .with_context(|| format!("appending {} to sink", row.identity_key()))?;
        seen.mark(row);
        info!("[NEW] {} | {} | {}", row.company, row.title, row.url);
        Ok(true)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    format!("adapter panicked: {detail}")
}

/// Loads the watch list named by `config` and runs every target once.
pub async fn run_watch_once(config: &WatchConfig, filter: &RunFilter) -> Result<RunSummary> {
    let watch_list = load_watch_list(&config.config_path).await?;
    let pipeline = WatchPipeline::new(config)?;
    pipeline.run_once(&watch_list, filter).await
}
