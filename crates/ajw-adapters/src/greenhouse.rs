//! Greenhouse public Boards API.

use ajw_core::{iso_from_upstream, JobRow, JobRowDraft, KeywordMatcher, MatchedOn, Platform};
use ajw_storage::HttpFetcher;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::{
    first_text, get_or_warn, join_nonempty, json_or_warn, json_str, AdapterContext, AdapterError,
    JobAdapter, Target,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct GreenhouseAdapter;

pub fn board_url(slug: &str) -> String {
    format!("https://boards-api.greenhouse.io/v1/boards/{slug}/jobs?content=true")
}

/// Matched rows from a `/jobs?content=true` response body.
pub fn parse_board(body: &JsonValue, company: &str, matcher: &KeywordMatcher) -> Vec<JobRow> {
    let Some(jobs) = body.get("jobs").and_then(JsonValue::as_array) else {
        return Vec::new();
    };

    jobs.iter()
        .filter_map(|job| {
            let title = json_str(job, &["title"]).unwrap_or_default();
            let location = job
                .get("offices")
                .and_then(JsonValue::as_array)
                .map(|offices| {
                    join_nonempty(offices.iter().filter_map(|o| json_str(o, &["name"])))
                })
                .filter(|l| !l.is_empty())
                .or_else(|| json_str(job, &["location", "name"]).map(ToString::to_string))
                .unwrap_or_default();
            let content = json_str(job, &["content"]).unwrap_or_default();

            if !matcher.matches_fields(&[title, location.as_str(), content]) {
                return None;
            }

            let mut draft = JobRowDraft::new(company)
                .title(title)
                .location(location)
                .matched_on(MatchedOn::TitleOrDescription);
            draft.job_id = first_text(job, &[&["id"]]);
            draft.url = first_text(job, &[&["absolute_url"]]);
            draft.posted_at_iso = json_str(job, &["updated_at"]).map(iso_from_upstream);
            Some(draft.into_row(Platform::Greenhouse))
        })
        .collect()
}

#[async_trait]
impl JobAdapter for GreenhouseAdapter {
    fn platform(&self) -> Platform {
        Platform::Greenhouse
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        target: &Target,
    ) -> Result<Vec<JobRow>, AdapterError> {
        let slug = target
            .board_slug()
            .ok_or_else(|| AdapterError::invalid_target(Platform::Greenhouse, "missing board slug"))?;

        let Some(resp) = get_or_warn(http, ctx, Platform::Greenhouse, &slug, &board_url(&slug)).await
        else {
            return Ok(Vec::new());
        };
        let Some(body) = json_or_warn(&resp, Platform::Greenhouse, &slug) else {
            return Ok(Vec::new());
        };
        Ok(parse_board(&body, &target.label(), &ctx.matcher))
    }
}
