//! Platform adapter contracts + per-ATS fetch/parse implementations.

use std::collections::BTreeMap;
use std::fmt;

use ajw_core::{JobRow, KeywordMatcher, Platform};
use ajw_storage::{FetchError, FetchedResponse, HttpFetcher};
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;
use url::Url;
use uuid::Uuid;

pub mod greenhouse;
pub mod html_crawl;
pub mod lever;
pub mod teamtailor;
pub mod workable;
pub mod workday;

pub const CRATE_NAME: &str = "ajw-adapters";

/// Longest page text fed to the keyword matcher.
pub const MAX_PAGE_TEXT_CHARS: usize = 20_000;

/// Run-scoped state handed to every adapter call.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub matcher: KeywordMatcher,
}

impl AdapterContext {
    pub fn new(run_id: Uuid, matcher: KeywordMatcher) -> Self {
        Self { run_id, matcher }
    }
}

/// Multi-field target for platforms that need more than a board slug.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub site: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl TargetDescriptor {
    pub fn host(&self) -> Option<String> {
        clean(self.host.as_deref()).map(|h| h.trim_end_matches('/').to_string())
    }

    pub fn tenant(&self) -> Option<String> {
        clean(self.tenant.as_deref()).map(ToString::to_string)
    }

    pub fn site(&self) -> Option<String> {
        clean(self.site.as_deref()).map(ToString::to_string)
    }

    pub fn account(&self) -> Option<String> {
        clean(self.account.as_deref()).map(ToString::to_string)
    }

    pub fn slug(&self) -> Option<String> {
        clean(self.slug.as_deref()).map(ToString::to_string)
    }
}

fn clean(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// One configured unit of work for a platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Slug(String),
    Descriptor(TargetDescriptor),
}

impl Target {
    /// Display name stamped into rows as `company`.
    pub fn label(&self) -> String {
        match self {
            Target::Slug(slug) => slug.clone(),
            Target::Descriptor(d) => clean(d.company.as_deref())
                .map(ToString::to_string)
                .or_else(|| d.tenant())
                .or_else(|| d.host())
                .or_else(|| d.account())
                .or_else(|| d.slug())
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }

    /// Exact match on the slug, or on a descriptor's label, host, tenant or account.
    pub fn matches_filter(&self, wanted: &str) -> bool {
        match self {
            Target::Slug(slug) => slug == wanted,
            Target::Descriptor(d) => {
                self.label() == wanted
                    || d.host().as_deref() == Some(wanted)
                    || d.tenant().as_deref() == Some(wanted)
                    || d.account().as_deref() == Some(wanted)
                    || d.slug().as_deref() == Some(wanted)
            }
        }
    }

    /// Board slug for slug platforms; descriptors may carry it as `slug` or `company`.
    pub fn board_slug(&self) -> Option<String> {
        match self {
            Target::Slug(slug) => clean(Some(slug)).map(ToString::to_string),
            Target::Descriptor(d) => d
                .slug()
                .or_else(|| clean(d.company.as_deref()).map(ToString::to_string)),
        }
    }

    /// Host for host-based platforms; a bare string is taken as the host.
    pub fn host(&self) -> Option<String> {
        match self {
            Target::Slug(s) => clean(Some(s)).map(|h| h.trim_end_matches('/').to_string()),
            Target::Descriptor(d) => d.host(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid {platform} target: {reason}")]
    InvalidTarget { platform: Platform, reason: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Message(String),
}

impl AdapterError {
    pub fn invalid_target(platform: Platform, reason: impl Into<String>) -> Self {
        AdapterError::InvalidTarget {
            platform,
            reason: reason.into(),
        }
    }
}

/// Fetches one target's postings and returns the keyword-matched rows.
///
/// Ordinary upstream failures (HTTP status, bad JSON) are logged and yield an empty or
/// partial list. An `Err` means the whole target failed.
#[async_trait]
pub trait JobAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        target: &Target,
    ) -> Result<Vec<JobRow>, AdapterError>;
}

pub fn adapter_for_platform(platform: Platform) -> Box<dyn JobAdapter> {
    match platform {
        Platform::Greenhouse => Box::new(greenhouse::GreenhouseAdapter),
        Platform::Lever => Box::new(lever::LeverAdapter),
        Platform::Workday => Box::new(workday::WorkdayAdapter),
        Platform::Workable => Box::new(workable::WorkableAdapter),
        Platform::Teamtailor => Box::new(teamtailor::TeamtailorAdapter),
        Platform::Icims => Box::new(html_crawl::HtmlCrawlAdapter::icims()),
        Platform::Adp => Box::new(html_crawl::HtmlCrawlAdapter::adp()),
        Platform::Successfactors => Box::new(html_crawl::HtmlCrawlAdapter::successfactors()),
        Platform::Jobvite => Box::new(html_crawl::HtmlCrawlAdapter::jobvite()),
        Platform::Pereless => Box::new(html_crawl::HtmlCrawlAdapter::pereless()),
    }
}

pub fn all_adapters() -> Vec<Box<dyn JobAdapter>> {
    Platform::ALL.into_iter().map(adapter_for_platform).collect()
}

/// GET that downgrades failures to a warning.
pub(crate) async fn get_or_warn(
    http: &HttpFetcher,
    ctx: &AdapterContext,
    platform: Platform,
    label: &str,
    url: &str,
) -> Option<FetchedResponse> {
    match http.get(ctx.run_id, platform.as_str(), url).await {
        Ok(resp) => Some(resp),
        Err(err) => {
            warn!(%platform, target = label, url, error = %err, "fetch failed");
            None
        }
    }
}

pub(crate) fn json_or_warn(
    resp: &FetchedResponse,
    platform: Platform,
    label: &str,
) -> Option<JsonValue> {
    match resp.json() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(%platform, target = label, url = %resp.final_url, error = %err, "invalid JSON body");
            None
        }
    }
}

pub(crate) fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

pub(crate) fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_at(value, path)?.as_str()
}

/// First non-empty string or number among the candidate paths, stringified.
pub(crate) fn first_text(value: &JsonValue, paths: &[&[&str]]) -> Option<String> {
    paths.iter().find_map(|path| match json_at(value, path)? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

pub(crate) fn join_nonempty<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn parse_selector(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::Message(format!("bad selector {selector}: {e}")))
}

fn text_or_none(value: String) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

pub(crate) fn select_first_text(document: &Html, selector: &str) -> Result<Option<String>, AdapterError> {
    let sel = parse_selector(selector)?;
    Ok(document
        .select(&sel)
        .find_map(|n| text_or_none(n.text().collect::<String>())))
}

/// Document text outside `script`/`style`, whitespace-collapsed and length-capped.
pub(crate) fn visible_text(document: &Html) -> String {
    let mut out = String::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name().to_string()))
            .is_some_and(|name| matches!(name.as_str(), "script" | "style" | "noscript"));
        if hidden {
            continue;
        }
        for word in text.split_whitespace() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(word);
        }
    }
    out.chars().take(MAX_PAGE_TEXT_CHARS).collect()
}

pub fn page_visible_text(html: &str) -> String {
    visible_text(&Html::parse_document(html))
}

/// Resolves an href against `https://{host}/`, keeping only http(s) results.
pub(crate) fn resolve_href(host: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let base = Url::parse(&format!("https://{host}/")).ok()?;
    let joined = base.join(href).ok()?;
    matches!(joined.scheme(), "http" | "https").then(|| joined.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(yaml_like: &[(&str, &str)]) -> Target {
        let mut d = TargetDescriptor::default();
        for (k, v) in yaml_like {
            let v = Some(v.to_string());
            match *k {
                "company" => d.company = v,
                "host" => d.host = v,
                "tenant" => d.tenant = v,
                "site" => d.site = v,
                "account" => d.account = v,
                _ => {}
            }
        }
        Target::Descriptor(d)
    }

    #[test]
    fn descriptor_label_falls_back_in_order() {
        assert_eq!(descriptor(&[("company", "Acme"), ("tenant", "acme")]).label(), "Acme");
        assert_eq!(descriptor(&[("tenant", "acme"), ("host", "h.example")]).label(), "acme");
        assert_eq!(descriptor(&[("host", "h.example/")]).label(), "h.example");
        assert_eq!(descriptor(&[]).label(), "unknown");
    }

    #[test]
    fn filter_matches_label_host_and_tenant() {
        let t = descriptor(&[("company", "Acme"), ("host", "careers.acme.com"), ("tenant", "acme1")]);
        assert!(t.matches_filter("Acme"));
        assert!(t.matches_filter("careers.acme.com"));
        assert!(t.matches_filter("acme1"));
        assert!(!t.matches_filter("acme"));
        assert!(Target::Slug("spotify".into()).matches_filter("spotify"));
    }

    #[test]
    fn hrefs_resolve_against_host() {
        assert_eq!(
            resolve_href("jobs.example.com", "/jobs/12/music-lead?x=1").as_deref(),
            Some("https://jobs.example.com/jobs/12/music-lead?x=1")
        );
        assert_eq!(
            resolve_href("jobs.example.com", "//cdn.example.com/job/3").as_deref(),
            Some("https://cdn.example.com/job/3")
        );
        assert_eq!(resolve_href("jobs.example.com", "mailto:hr@example.com"), None);
        assert_eq!(resolve_href("jobs.example.com", "#top"), None);
    }

    #[test]
    fn visible_text_skips_scripts() {
        let text = page_visible_text(
            "<html><head><script>var music = 1;</script></head><body><h1>Sound  Designer</h1><p>Games</p></body></html>",
        );
        assert_eq!(text, "Sound Designer Games");
    }

    #[test]
    fn first_text_stringifies_numbers_and_skips_blanks() {
        let v: JsonValue = serde_json::json!({"id": 42, "blank": " ", "name": "x"});
        assert_eq!(first_text(&v, &[&["blank"], &["id"]]).as_deref(), Some("42"));
        assert_eq!(first_text(&v, &[&["missing"], &["name"]]).as_deref(), Some("x"));
        assert_eq!(first_text(&v, &[&["missing"]]), None);
    }

    #[test]
    fn every_platform_has_an_adapter() {
        for adapter in all_adapters() {
            assert_eq!(adapter_for_platform(adapter.platform()).platform(), adapter.platform());
        }
        assert_eq!(all_adapters().len(), Platform::ALL.len());
    }

    #[tokio::test]
    async fn targets_missing_required_fields_fail_before_fetching() {
        let http = HttpFetcher::new(ajw_storage::HttpClientConfig::default()).unwrap();
        let ctx = AdapterContext::new(Uuid::new_v4(), KeywordMatcher::default());
        let empty = Target::Descriptor(TargetDescriptor::default());
        for adapter in all_adapters() {
            let err = adapter.fetch(&http, &ctx, &empty).await.unwrap_err();
            assert!(
                matches!(err, AdapterError::InvalidTarget { platform, .. } if platform == adapter.platform()),
                "{}",
                adapter.platform()
            );
        }
    }
}
