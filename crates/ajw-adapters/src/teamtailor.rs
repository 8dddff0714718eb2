//! Teamtailor career sites, read from embedded JSON-LD `JobPosting` blocks.

use ajw_core::{normalize_url, JobRow, JobRowDraft, KeywordMatcher, MatchedOn, Platform};
use ajw_storage::HttpFetcher;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{
    first_text, get_or_warn, join_nonempty, json_str, AdapterContext, AdapterError, JobAdapter,
    Target,
};

static LD_JSON: Lazy<Option<Selector>> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).ok());

#[derive(Debug, Clone, Copy, Default)]
pub struct TeamtailorAdapter;

pub fn jobs_url(host: &str) -> String {
    format!("https://{host}/jobs")
}

fn is_job_posting(value: &JsonValue) -> bool {
    match value.get("@type") {
        Some(JsonValue::String(t)) => t == "JobPosting",
        Some(JsonValue::Array(types)) => types.iter().any(|t| t.as_str() == Some("JobPosting")),
        _ => false,
    }
}

fn collect_postings(value: JsonValue, out: &mut Vec<JsonValue>) {
    match value {
        JsonValue::Array(items) => items.into_iter().for_each(|v| collect_postings(v, out)),
        JsonValue::Object(mut map) => {
            if let Some(graph) = map.remove("@graph") {
                collect_postings(graph, out);
            }
            let value = JsonValue::Object(map);
            if is_job_posting(&value) {
                out.push(value);
            }
        }
        _ => {}
    }
}

/// JSON-LD `JobPosting` objects found in the page, in document order.
pub fn job_postings(html: &str) -> Vec<JsonValue> {
    let Some(selector) = LD_JSON.as_ref() else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let mut out = Vec::new();
    for script in document.select(selector) {
        let raw = script.text().collect::<String>();
        match serde_json::from_str::<JsonValue>(raw.trim()) {
            Ok(value) => collect_postings(value, &mut out),
            Err(err) => debug!(error = %err, "skipping unparseable JSON-LD block"),
        }
    }
    out
}

fn address_text(posting: &JsonValue) -> String {
    let location = match posting.get("jobLocation") {
        Some(JsonValue::Array(items)) => items.first(),
        other => other,
    };
    let Some(address) = location.and_then(|l| l.get("address")) else {
        return String::new();
    };
    let country = json_str(address, &["addressCountry"])
        .or_else(|| json_str(address, &["addressCountry", "name"]));
    join_nonempty(
        [
            json_str(address, &["addressLocality"]),
            json_str(address, &["addressRegion"]),
            country,
        ]
        .into_iter()
        .flatten(),
    )
}

fn identifier(posting: &JsonValue) -> Option<String> {
    first_text(posting, &[&["identifier"], &["identifier", "value"]])
}

pub fn parse_jobs_page(html: &str, company: &str, matcher: &KeywordMatcher) -> Vec<JobRow> {
    job_postings(html)
        .iter()
        .filter_map(|posting| {
            let title = json_str(posting, &["title"]).unwrap_or_default();
            let location = address_text(posting);
            let description = json_str(posting, &["description"]).unwrap_or_default();

            if !matcher.matches_fields(&[title, location.as_str(), description]) {
                return None;
            }

            let url = first_text(posting, &[&["url"]]);
            let mut draft = JobRowDraft::new(company)
                .title(title)
                .location(location)
                .matched_on(MatchedOn::Jsonld);
            draft.job_id = identifier(posting).or_else(|| url.as_deref().map(normalize_url));
            draft.url = url;
            Some(draft.into_row(Platform::Teamtailor))
        })
        .collect()
}

#[async_trait]
impl JobAdapter for TeamtailorAdapter {
    fn platform(&self) -> Platform {
        Platform::Teamtailor
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        target: &Target,
    ) -> Result<Vec<JobRow>, AdapterError> {
        let host = target
            .host()
            .ok_or_else(|| AdapterError::invalid_target(Platform::Teamtailor, "missing host"))?;

        let Some(resp) = get_or_warn(http, ctx, Platform::Teamtailor, &host, &jobs_url(&host)).await
        else {
            return Ok(Vec::new());
        };
        Ok(parse_jobs_page(&resp.text(), &target.label(), &ctx.matcher))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head>
<script type="application/ld+json">
{"@context":"https://schema.org","@type":"JobPosting","title":"Music Curator",
 "url":"https://careers.example.com/jobs/123-music-curator?utm=x",
 "identifier":{"@type":"PropertyValue","value":"123"},
 "jobLocation":{"@type":"Place","address":{"addressLocality":"Stockholm","addressRegion":"","addressCountry":"SE"}},
 "description":"Shape playlists."}
</script>
<script type="application/ld+json">
[{"@type":"JobPosting","title":"Data Engineer","url":"https://careers.example.com/jobs/124",
  "description":"Pipelines for music royalties."},
 {"@type":"Organization","name":"Example"}]
</script>
<script type="application/ld+json">{not json</script>
</head><body></body></html>"#;

    #[test]
    fn finds_postings_in_objects_and_arrays() {
        let postings = job_postings(PAGE);
        assert_eq!(postings.len(), 2);
    }

    #[test]
    fn graph_blocks_are_walked() {
        let html = r#"<script type="application/ld+json">
{"@graph":[{"@type":"WebPage"},{"@type":"JobPosting","title":"Musician"}]}</script>"#;
        assert_eq!(job_postings(html).len(), 1);
    }

    #[test]
    fn parses_rows_with_identifier_or_url() {
        let rows = parse_jobs_page(PAGE, "Example", &KeywordMatcher::default());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].job_id, "123");
        assert_eq!(rows[0].location, "Stockholm, SE");
        assert_eq!(rows[0].url, "https://careers.example.com/jobs/123-music-curator");
        assert_eq!(rows[0].matched_on, MatchedOn::Jsonld);
        assert_eq!(rows[1].job_id, "https://careers.example.com/jobs/124");
        assert_eq!(rows[1].location, "");
    }

    #[test]
    fn url_fallback_ids_ignore_tracking_params() {
        let page = |source: &str| {
            format!(
                r#"<script type="application/ld+json">
{{"@type":"JobPosting","title":"Music Curator",
  "url":"https://c.example.com/jobs/5-curator?utm_source={source}"}}</script>"#
            )
        };
        let matcher = KeywordMatcher::default();
        let a = parse_jobs_page(&page("li"), "Ex", &matcher);
        let b = parse_jobs_page(&page("tw"), "Ex", &matcher);
        assert_eq!(a[0].job_id, "https://c.example.com/jobs/5-curator");
        assert_eq!(a[0].identity_key(), b[0].identity_key());
    }
}
