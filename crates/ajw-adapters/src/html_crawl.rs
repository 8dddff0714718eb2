//! Listing page -> detail links -> page text crawler shared by the HTML-only platforms.

use std::collections::HashSet;

use ajw_core::{JobRow, JobRowDraft, KeywordMatcher, MatchedOn, Platform};
use ajw_storage::HttpFetcher;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use tracing::debug;

use crate::{
    get_or_warn, parse_selector, resolve_href, select_first_text, visible_text, AdapterContext,
    AdapterError, JobAdapter, Target,
};

static ICIMS_JOB_ID: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"/jobs/(\d+)").ok());

pub const DEFAULT_MAX_LINKS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobIdRule {
    /// Numeric id from a `/jobs/<digits>` path segment, else the URL.
    IcimsPath,
    /// The detail URL as linked, query included: Jobvite (`?jvi=`) and Pereless (`?pos=`)
    /// carry the posting id in the query string.
    Url,
}

impl JobIdRule {
    pub fn job_id(&self, job_url: &str) -> String {
        match self {
            JobIdRule::IcimsPath => ICIMS_JOB_ID
                .as_ref()
                .and_then(|re| re.captures(job_url))
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| job_url.to_string()),
            JobIdRule::Url => job_url.to_string(),
        }
    }
}

/// Where to look on one platform's career site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlProfile {
    pub platform: Platform,
    pub listing_paths: &'static [&'static str],
    pub link_selector: &'static str,
    pub max_links: usize,
    pub title_selectors: &'static [&'static str],
    pub location_selectors: &'static [&'static str],
    pub job_id: JobIdRule,
}

const HEADINGS: &[&str] = &["h1", "h2"];

#[derive(Debug, Clone)]
pub struct HtmlCrawlAdapter {
    profile: CrawlProfile,
}

impl HtmlCrawlAdapter {
    pub fn new(profile: CrawlProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &CrawlProfile {
        &self.profile
    }

    pub fn icims() -> Self {
        Self::new(CrawlProfile {
            platform: Platform::Icims,
            listing_paths: &["/jobs/search"],
            link_selector: "a[href*='/jobs/']",
            max_links: DEFAULT_MAX_LINKS,
            title_selectors: &["h1", "h2", ".iCIMS_JobTitle"],
            location_selectors: &[".iCIMS_JobLocation", ".jobLocation"],
            job_id: JobIdRule::IcimsPath,
        })
    }

    pub fn adp() -> Self {
        Self::new(CrawlProfile {
            platform: Platform::Adp,
            listing_paths: &["/career-center/search", "/career-center"],
            link_selector: "a[href*='job?'], a[href*='/job/'], a[href*='positions']",
            max_links: DEFAULT_MAX_LINKS,
            title_selectors: HEADINGS,
            location_selectors: &[],
            job_id: JobIdRule::Url,
        })
    }

    pub fn successfactors() -> Self {
        Self::new(CrawlProfile {
            platform: Platform::Successfactors,
            listing_paths: &["/"],
            link_selector: "a[href*='job']",
            max_links: 80,
            title_selectors: HEADINGS,
            location_selectors: &[],
            job_id: JobIdRule::Url,
        })
    }

    pub fn jobvite() -> Self {
        Self::new(CrawlProfile {
            platform: Platform::Jobvite,
            listing_paths: &["/"],
            link_selector: "a[href*='jobs?'], a[href*='/job/'], a[href*='?jvi='], a[href*='/jobs/']",
            max_links: DEFAULT_MAX_LINKS,
            title_selectors: HEADINGS,
            location_selectors: &[],
            job_id: JobIdRule::Url,
        })
    }

    pub fn pereless() -> Self {
        Self::new(CrawlProfile {
            platform: Platform::Pereless,
            listing_paths: &["/"],
            link_selector: "a[href*='JobDetails'], a[href*='?fulldesc='], a[href*='/job/'], a[href*='?pos=']",
            max_links: DEFAULT_MAX_LINKS,
            title_selectors: &["h1", "h2", "title"],
            location_selectors: &[],
            job_id: JobIdRule::Url,
        })
    }
}

/// Absolute links matching `selector`, first occurrence wins, at most `max` overall.
///
/// `seen` carries links already collected from earlier listing pages of the same target.
pub fn extract_links(
    html: &str,
    host: &str,
    selector: &str,
    max: usize,
    seen: &mut HashSet<String>,
) -> Result<Vec<String>, AdapterError> {
    let sel = parse_selector(selector)?;
    let document = Html::parse_document(html);
    let mut out = Vec::new();
    for anchor in document.select(&sel) {
        if seen.len() >= max {
            break;
        }
        let Some(link) = anchor
            .value()
            .attr("href")
            .and_then(|href| resolve_href(host, href))
        else {
            continue;
        };
        if seen.insert(link.clone()) {
            out.push(link);
        }
    }
    Ok(out)
}

fn first_of(document: &Html, selectors: &[&str]) -> Result<String, AdapterError> {
    for selector in selectors {
        if let Some(text) = select_first_text(document, selector)? {
            return Ok(text);
        }
    }
    Ok(String::new())
}

/// Matched row for one detail page, or `None` when the page text does not match.
pub fn parse_detail_page(
    html: &str,
    job_url: &str,
    company: &str,
    profile: &CrawlProfile,
    matcher: &KeywordMatcher,
) -> Result<Option<JobRow>, AdapterError> {
    let document = Html::parse_document(html);
    let title = first_of(&document, profile.title_selectors)?;
    let location = first_of(&document, profile.location_selectors)?;
    let text = visible_text(&document);

    if !matcher.matches_fields(&[title.as_str(), location.as_str(), text.as_str()]) {
        return Ok(None);
    }

    Ok(Some(
        JobRowDraft::new(company)
            .title(title)
            .location(location)
            .job_id(profile.job_id.job_id(job_url))
            .url(job_url)
            .matched_on(MatchedOn::HtmlText)
            .into_row(profile.platform),
    ))
}

#[async_trait]
impl JobAdapter for HtmlCrawlAdapter {
    fn platform(&self) -> Platform {
        self.profile.platform
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        target: &Target,
    ) -> Result<Vec<JobRow>, AdapterError> {
        let platform = self.profile.platform;
        let host = target
            .host()
            .ok_or_else(|| AdapterError::invalid_target(platform, "missing host"))?;
        let company = target.label();

        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for path in self.profile.listing_paths {
            let listing_url = format!("https://{host}{path}");
            let Some(resp) = get_or_warn(http, ctx, platform, &host, &listing_url).await else {
                continue;
            };
            links.extend(extract_links(
                &resp.text(),
                &host,
                self.profile.link_selector,
                self.profile.max_links,
                &mut seen,
            )?);
        }
        debug!(%platform, target = %host, links = links.len(), "collected detail links");

        let mut rows = Vec::new();
        for job_url in links {
            let Some(page) = get_or_warn(http, ctx, platform, &host, &job_url).await else {
                continue;
            };
            if let Some(row) =
                parse_detail_page(&page.text(), &job_url, &company, &self.profile, &ctx.matcher)?
            {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r##"<html><body>
<a href="/jobs/1001/music-director/job">Music Director</a>
<a href="https://careers-acme.icims.com/jobs/1002/designer/job">Designer</a>
<a href="/jobs/1001/music-director/job">Music Director (again)</a>
<a href="#">Top</a>
<a href="/about">About</a>
</body></html>"##;

    #[test]
    fn links_are_resolved_and_deduplicated_in_order() {
        let profile = HtmlCrawlAdapter::icims().profile().clone();
        let mut seen = HashSet::new();
        let links = extract_links(
            LISTING,
            "careers-acme.icims.com",
            profile.link_selector,
            profile.max_links,
            &mut seen,
        )
        .unwrap();
        assert_eq!(
            links,
            vec![
                "https://careers-acme.icims.com/jobs/1001/music-director/job",
                "https://careers-acme.icims.com/jobs/1002/designer/job",
            ]
        );
    }

    #[test]
    fn link_cap_spans_listing_pages() {
        let mut seen = HashSet::new();
        let first = extract_links(LISTING, "h.example", "a[href*='/jobs/']", 1, &mut seen).unwrap();
        let second = extract_links(LISTING, "h.example", "a[href*='/jobs/']", 1, &mut seen).unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn icims_detail_page_yields_numeric_id() {
        let html = r#"<html><body><h1>Music Director</h1>
<ul><li class="iCIMS_JobLocation">Nashville, TN</li></ul><p>Lead the choir.</p></body></html>"#;
        let url = "https://careers-acme.icims.com/jobs/1001/music-director/job";
        let profile = HtmlCrawlAdapter::icims().profile().clone();
        let row = parse_detail_page(html, url, "Acme", &profile, &KeywordMatcher::default())
            .unwrap()
            .unwrap();
        assert_eq!(row.job_id, "1001");
        assert_eq!(row.title, "Music Director");
        assert_eq!(row.location, "Nashville, TN");
        assert_eq!(row.matched_on, MatchedOn::HtmlText);
        assert_eq!(row.platform, Platform::Icims);
    }

    #[test]
    fn generic_pages_use_url_as_id_and_may_not_match() {
        let profile = HtmlCrawlAdapter::pereless().profile().clone();
        let url = "https://jobs.example.org/JobDetails?pos=9";
        let matched = parse_detail_page(
            "<html><head><title>Church Music Assistant</title></head><body>Part time.</body></html>",
            url,
            "Parish",
            &profile,
            &KeywordMatcher::default(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(matched.title, "Church Music Assistant");
        assert_eq!(matched.job_id, url);
        assert_eq!(matched.url, "https://jobs.example.org/JobDetails");

        let unmatched = parse_detail_page(
            "<html><body><h1>Accountant</h1><script>music()</script></body></html>",
            url,
            "Parish",
            &profile,
            &KeywordMatcher::default(),
        )
        .unwrap();
        assert!(unmatched.is_none());
    }

    #[test]
    fn icims_id_falls_back_to_url() {
        assert_eq!(JobIdRule::IcimsPath.job_id("https://x.icims.com/jobs/search"), "https://x.icims.com/jobs/search");
    }
}
