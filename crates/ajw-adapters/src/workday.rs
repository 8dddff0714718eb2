//! Workday CxS job search endpoint.

use ajw_core::{iso_from_upstream, normalize_url, JobRow, JobRowDraft, KeywordMatcher, MatchedOn, Platform};
use ajw_storage::HttpFetcher;
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

use crate::{
    first_text, json_at, json_or_warn, json_str, resolve_href, AdapterContext, AdapterError,
    JobAdapter, Target, TargetDescriptor,
};

/// Site tokens tried when the descriptor names none, or the named one yields nothing.
pub const FALLBACK_SITES: [&str; 3] = ["Careers", "External", "Jobs"];

pub const PAGE_LIMIT: u32 = 50;

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkdayAdapter;

pub fn jobs_url(host: &str, tenant: &str, site: &str) -> String {
    format!("https://{host}/wday/cxs/{tenant}/{site}/jobs")
}

pub fn search_payload(search_text: &str) -> JsonValue {
    json!({
        "appliedFacets": {},
        "limit": PAGE_LIMIT,
        "offset": 0,
        "searchText": search_text,
    })
}

/// Provided site first, then the fallbacks, without repeats.
pub fn candidate_sites(provided: Option<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for site in provided.into_iter().chain(FALLBACK_SITES) {
        if !out.iter().any(|s| s == site) {
            out.push(site.to_string());
        }
    }
    out
}

fn location_text(job: &JsonValue) -> String {
    if let Some(text) = json_str(job, &["locationsText"]).filter(|t| !t.trim().is_empty()) {
        return text.trim().to_string();
    }
    match job.get("locations") {
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
                JsonValue::Object(_) => json_str(v, &["descriptor"]).map(ToString::to_string),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(", "),
        Some(JsonValue::String(s)) => s.clone(),
        _ => String::new(),
    }
}

pub fn parse_search(
    body: &JsonValue,
    company: &str,
    host: &str,
    site: &str,
    matcher: &KeywordMatcher,
) -> Vec<JobRow> {
    let jobs = json_at(body, &["jobPostings"])
        .or_else(|| json_at(body, &["jobs"]))
        .and_then(JsonValue::as_array);
    let Some(jobs) = jobs else {
        return Vec::new();
    };

    jobs.iter()
        .filter_map(|job| {
            let title = json_str(job, &["title"]).unwrap_or_default().trim().to_string();
            let location = location_text(job);
            let description = [
                json_str(job, &["shortDescription"]).unwrap_or_default(),
                json_str(job, &["jobPostingInfo", "jobDescription"]).unwrap_or_default(),
            ]
            .join(" ");

            if !matcher.matches_fields(&[title.as_str(), location.as_str(), description.trim()]) {
                return None;
            }

            let url = first_text(job, &[&["externalPath"], &["externalUrl"], &["url"]]).map(|path| {
                if path.starts_with('/') {
                    // CxS paths omit the site segment the public job page lives under.
                    format!("https://{host}/{site}{path}")
                } else {
                    resolve_href(host, &path).unwrap_or(path)
                }
            });

            let mut draft = JobRowDraft::new(company)
                .title(title)
                .location(location)
                .matched_on(MatchedOn::TitleOrDescription);
            draft.job_id = first_text(job, &[&["id"], &["jobId"], &["externalId"]])
                .or_else(|| {
                    job.get("bulletFields")
                        .and_then(JsonValue::as_array)
                        .and_then(|f| f.first())
                        .and_then(JsonValue::as_str)
                        .map(ToString::to_string)
                })
                .or_else(|| url.as_deref().map(normalize_url));
            draft.url = url;
            draft.posted_at_iso = first_text(job, &[&["postedOn"], &["startDate"]])
                .map(|p| iso_from_upstream(&p))
                .filter(|p| !p.is_empty());
            Some(draft.into_row(Platform::Workday))
        })
        .collect()
}

fn require(descriptor: Option<&TargetDescriptor>) -> Result<(String, String, Option<String>), AdapterError> {
    let d = descriptor
        .ok_or_else(|| AdapterError::invalid_target(Platform::Workday, "expected a host/tenant map"))?;
    let host = d.host();
    let tenant = d.tenant();
    match (host, tenant) {
        (Some(host), Some(tenant)) => Ok((host, tenant, d.site())),
        _ => Err(AdapterError::invalid_target(
            Platform::Workday,
            "need both host and tenant",
        )),
    }
}

#[async_trait]
impl JobAdapter for WorkdayAdapter {
    fn platform(&self) -> Platform {
        Platform::Workday
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        target: &Target,
    ) -> Result<Vec<JobRow>, AdapterError> {
        let descriptor = match target {
            Target::Descriptor(d) => Some(d),
            Target::Slug(_) => None,
        };
        let (host, tenant, site) = require(descriptor)?;
        let company = target.label();
        let payload = search_payload(ctx.matcher.primary_term());

        for site in candidate_sites(site.as_deref()) {
            let url = jobs_url(&host, &tenant, &site);
            let headers = [
                ("Referer", format!("https://{host}/en-US/{site}")),
                ("Origin", format!("https://{host}")),
                ("Accept-Language", "en-US,en;q=0.9".to_string()),
            ];
            let label = format!("{tenant}/{site}");
            let resp = match http
                .post_json(ctx.run_id, Platform::Workday.as_str(), &url, &payload, &headers)
                .await
            {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(platform = "workday", target = %label, error = %err, "search failed");
                    continue;
                }
            };
            let Some(body) = json_or_warn(&resp, Platform::Workday, &label) else {
                continue;
            };
            let rows = parse_search(&body, &company, &host, &site, &ctx.matcher);
            if !rows.is_empty() {
                return Ok(rows);
            }
            debug!(platform = "workday", target = %label, "no matching postings on site");
        }
        Ok(Vec::new())
    }
}
