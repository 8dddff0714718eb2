use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ajw_adapters::html_crawl::{extract_links, parse_detail_page, HtmlCrawlAdapter};
use ajw_adapters::{greenhouse, teamtailor, workable};
use ajw_core::{KeywordMatcher, MatchedOn, Platform};

fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn read_fixture(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name)).unwrap()
}

fn read_json(name: &str) -> serde_json::Value {
    serde_json::from_str(&read_fixture(name)).unwrap()
}

#[test]
fn greenhouse_board_fixture() {
    let rows = greenhouse::parse_board(
        &read_json("greenhouse_board.json"),
        "soundwave",
        &KeywordMatcher::default(),
    );
    let ids: Vec<_> = rows.iter().map(|r| r.job_id.as_str()).collect();
    assert_eq!(ids, ["7001", "7002"]);
    assert_eq!(rows[0].url, "https://boards.greenhouse.io/soundwave/jobs/7001");
    assert_eq!(rows[0].posted_at_iso, "2024-06-01T12:00:00Z");
    assert_eq!(rows[1].location, "New York");
    assert_eq!(
        rows[0].identity_key(),
        "greenhouse::soundwave::7001::https://boards.greenhouse.io/soundwave/jobs/7001"
    );
}

#[test]
fn workable_jobs_fixture() {
    let rows = workable::parse_jobs(
        &read_json("workable_jobs.json"),
        "Venue Group",
        "venue-group",
        &KeywordMatcher::default(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].title, "Live Music Booker");
    assert_eq!(rows[0].location, "Lisbon, Lisboa, Portugal");
    assert_eq!(rows[0].url, "https://apply.workable.com/venue-group/j/F00D12/");
}

#[test]
fn teamtailor_page_fixture() {
    let rows = teamtailor::parse_jobs_page(
        &read_fixture("teamtailor_jobs.html"),
        "Example Records",
        &KeywordMatcher::default(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].job_id, "881");
    assert_eq!(rows[0].location, "London, GB");
    assert_eq!(rows[0].matched_on, MatchedOn::Jsonld);
    assert_eq!(rows[0].platform, Platform::Teamtailor);
}

#[test]
fn icims_listing_and_detail_fixtures() {
    let adapter = HtmlCrawlAdapter::icims();
    let profile = adapter.profile();
    let host = "careers-clinic.icims.com";

    let mut seen = HashSet::new();
    let links = extract_links(
        &read_fixture("icims_listing.html"),
        host,
        profile.link_selector,
        profile.max_links,
        &mut seen,
    )
    .unwrap();
    assert_eq!(links.len(), 3);
    assert_eq!(
        links[0],
        "https://careers-clinic.icims.com/jobs/5150/music-therapist/job?in_iframe=1"
    );

    let row = parse_detail_page(
        &read_fixture("icims_detail.html"),
        &links[0],
        "Clinic",
        profile,
        &KeywordMatcher::default(),
    )
    .unwrap()
    .unwrap();
    assert_eq!(row.job_id, "5150");
    assert_eq!(row.location, "US-OH-Cleveland");
    assert_eq!(row.url, "https://careers-clinic.icims.com/jobs/5150/music-therapist/job");
}

#[test]
fn alternative_keywords_widen_matching() {
    let matcher = KeywordMatcher::new(["ledger"]).unwrap();
    let rows = teamtailor::parse_jobs_page(
        &read_fixture("teamtailor_jobs.html"),
        "Example Records",
        &matcher,
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].title, "Finance Lead");
}
