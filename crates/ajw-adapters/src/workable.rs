//! Workable public accounts API.

use ajw_core::{JobRow, JobRowDraft, KeywordMatcher, MatchedOn, Platform};
use ajw_storage::HttpFetcher;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::{
    first_text, get_or_warn, join_nonempty, json_or_warn, json_str, AdapterContext, AdapterError,
    JobAdapter, Target,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkableAdapter;

pub fn jobs_url(account: &str) -> String {
    format!("https://apply.workable.com/api/v3/accounts/{account}/jobs?state=published")
}

/// Accounts to try in order: as configured, then without hyphens.
pub fn account_variants(account: &str) -> Vec<String> {
    let mut out = vec![account.to_string()];
    if account.contains('-') {
        out.push(account.replace('-', ""));
    }
    out
}

pub fn parse_jobs(body: &JsonValue, company: &str, account: &str, matcher: &KeywordMatcher) -> Vec<JobRow> {
    let Some(results) = body.get("results").and_then(JsonValue::as_array) else {
        return Vec::new();
    };

    results
        .iter()
        .filter_map(|job| {
            let title = json_str(job, &["title"]).unwrap_or_default();
            let location = join_nonempty(
                ["city", "region", "country"]
                    .into_iter()
                    .filter_map(|k| json_str(job, &["location", k])),
            );
            let description = json_str(job, &["description"]).unwrap_or_default();

            if !matcher.matches_fields(&[title, location.as_str(), description]) {
                return None;
            }

            let shortcode = json_str(job, &["shortcode"]).map(ToString::to_string);
            let mut draft = JobRowDraft::new(company)
                .title(title)
                .location(location)
                .matched_on(MatchedOn::TitleOrDescription);
            draft.job_id = first_text(job, &[&["id"], &["shortcode"]]);
            draft.url = first_text(job, &[&["url"], &["shortlink"]]).or_else(|| {
                shortcode.map(|code| format!("https://apply.workable.com/{account}/j/{code}/"))
            });
            Some(draft.into_row(Platform::Workable))
        })
        .collect()
}

#[async_trait]
impl JobAdapter for WorkableAdapter {
    fn platform(&self) -> Platform {
        Platform::Workable
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        target: &Target,
    ) -> Result<Vec<JobRow>, AdapterError> {
        let account = match target {
            Target::Descriptor(d) => d.account(),
            Target::Slug(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        }
        .ok_or_else(|| AdapterError::invalid_target(Platform::Workable, "missing account"))?;
        let company = target.label();

        for variant in account_variants(&account) {
            let Some(resp) =
                get_or_warn(http, ctx, Platform::Workable, &variant, &jobs_url(&variant)).await
            else {
                continue;
            };
            let Some(body) = json_or_warn(&resp, Platform::Workable, &variant) else {
                continue;
            };
            let rows = parse_jobs(&body, &company, &variant, &ctx.matcher);
            if !rows.is_empty() {
                return Ok(rows);
            }
        }
        Ok(Vec::new())
    }
}
