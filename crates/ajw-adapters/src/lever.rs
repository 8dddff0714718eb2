//! Lever postings API, with a posting-page fallback for descriptions the API omits.

use ajw_core::{iso_from_epoch_millis, JobRow, JobRowDraft, KeywordMatcher, MatchedOn, Platform};
use ajw_storage::HttpFetcher;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::{
    first_text, get_or_warn, json_at, json_or_warn, json_str, page_visible_text, AdapterContext,
    AdapterError, JobAdapter, Target,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct LeverAdapter;

pub fn postings_url(slug: &str) -> String {
    format!("https://api.lever.co/v0/postings/{slug}?mode=json")
}

/// A posting whose summary fields did not match but whose page might.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPosting {
    pub posting_url: String,
    pub draft: JobRowDraft,
}

#[derive(Debug, Default)]
pub struct ParsedPostings {
    pub matched: Vec<JobRow>,
    pub pending: Vec<PendingPosting>,
}

fn created_at_iso(posting: &JsonValue) -> Option<String> {
    let raw = json_at(posting, &["createdAt"]).or_else(|| json_at(posting, &["created_at"]))?;
    let millis = match raw {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        JsonValue::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    iso_from_epoch_millis(millis)
}

pub fn parse_postings(body: &JsonValue, company: &str, matcher: &KeywordMatcher) -> ParsedPostings {
    let mut out = ParsedPostings::default();
    let Some(postings) = body.as_array() else {
        return out;
    };

    for posting in postings.iter().filter(|p| p.is_object()) {
        let title = first_text(posting, &[&["text"], &["title"]]).unwrap_or_default();
        let location = json_str(posting, &["categories", "location"]).unwrap_or_default();
        let description = first_text(posting, &[&["descriptionPlain"], &["description"]])
            .unwrap_or_default();

        let mut draft = JobRowDraft::new(company).title(title.clone()).location(location);
        draft.job_id = first_text(posting, &[&["id"], &["leverId"], &["hostedJobId"]]);
        draft.url = first_text(posting, &[&["hostedUrl"], &["applyUrl"], &["urls", "apply"]]);
        draft.posted_at_iso = created_at_iso(posting);

        if matcher.matches_fields(&[title.as_str(), location, description.as_str()]) {
            out.matched.push(
                draft
                    .matched_on(MatchedOn::TitleOrDescription)
                    .into_row(Platform::Lever),
            );
        } else if let Some(posting_url) = draft.url.clone() {
            out.pending.push(PendingPosting { posting_url, draft });
        }
    }
    out
}

#[async_trait]
impl JobAdapter for LeverAdapter {
    fn platform(&self) -> Platform {
        Platform::Lever
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        target: &Target,
    ) -> Result<Vec<JobRow>, AdapterError> {
        let slug = target
            .board_slug()
            .ok_or_else(|| AdapterError::invalid_target(Platform::Lever, "missing board slug"))?;

        let Some(resp) = get_or_warn(http, ctx, Platform::Lever, &slug, &postings_url(&slug)).await
        else {
            return Ok(Vec::new());
        };
        let Some(body) = json_or_warn(&resp, Platform::Lever, &slug) else {
            return Ok(Vec::new());
        };
        if !body.is_array() {
            warn!(platform = "lever", target = %slug, "unexpected JSON shape (not a list)");
            return Ok(Vec::new());
        }

        let ParsedPostings { mut matched, pending } =
            parse_postings(&body, &target.label(), &ctx.matcher);
        for posting in pending {
            let Some(page) =
                get_or_warn(http, ctx, Platform::Lever, &slug, &posting.posting_url).await
            else {
                continue;
            };
            if ctx.matcher.matches(&page_visible_text(&page.text())) {
                matched.push(
                    posting
                        .draft
                        .matched_on(MatchedOn::DescriptionHtml)
                        .into_row(Platform::Lever),
                );
            }
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn splits_matched_and_pending_postings() {
        let body = json!([
            {
                "id": "5f1c-aa",
                "text": "Music Editor",
                "categories": {"location": "Los Angeles"},
                "hostedUrl": "https://jobs.lever.co/acme/5f1c-aa?lever-source=li",
                "descriptionPlain": "Cut trailers.",
                "createdAt": 1700000000000i64
            },
            {
                "id": "77bd-cc",
                "text": "Producer",
                "categories": {"location": "Remote"},
                "hostedUrl": "https://jobs.lever.co/acme/77bd-cc",
                "descriptionPlain": "Ship podcasts."
            },
            {
                "id": "99ee-dd",
                "text": "Office Manager",
                "descriptionPlain": "Keep things running."
            },
            "not-an-object"
        ]);
        let parsed = parse_postings(&body, "acme", &KeywordMatcher::default());

        assert_eq!(parsed.matched.len(), 1);
        let row = &parsed.matched[0];
        assert_eq!(row.job_id, "5f1c-aa");
        assert_eq!(row.url, "https://jobs.lever.co/acme/5f1c-aa");
        assert_eq!(row.posted_at_iso, "2023-11-14T22:13:20Z");
        assert_eq!(row.location, "Los Angeles");

        assert_eq!(parsed.pending.len(), 1);
        assert_eq!(parsed.pending[0].posting_url, "https://jobs.lever.co/acme/77bd-cc");
        let fallback = parsed.pending[0]
            .draft
            .clone()
            .matched_on(MatchedOn::DescriptionHtml)
            .into_row(Platform::Lever);
        assert_eq!(fallback.matched_on, MatchedOn::DescriptionHtml);
        assert_eq!(fallback.posted_at_iso, "");
    }

    #[test]
    fn non_list_body_yields_nothing() {
        let parsed = parse_postings(&json!({"ok": false}), "acme", &KeywordMatcher::default());
        assert!(parsed.matched.is_empty());
        assert!(parsed.pending.is_empty());
    }
}
