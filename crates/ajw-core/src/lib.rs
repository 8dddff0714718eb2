//! Core row model, URL normalization, keyword matching and identity keys for AJW.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

pub const CRATE_NAME: &str = "ajw-core";

/// Separator between the components of an identity key.
pub const IDENTITY_SEPARATOR: &str = "::";

pub const DEFAULT_KEYWORD: &str = "music";

/// Column order of the append-only sink.
pub const SINK_HEADERS: [&str; 9] = [
    "company",
    "platform",
    "title",
    "location",
    "job_id",
    "url",
    "posted_at_iso",
    "detected_on_iso",
    "matched_on",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Greenhouse,
    Lever,
    Workday,
    Workable,
    Icims,
    Teamtailor,
    Adp,
    Successfactors,
    Jobvite,
    Pereless,
}

impl Platform {
    pub const ALL: [Platform; 10] = [
        Platform::Greenhouse,
        Platform::Lever,
        Platform::Workday,
        Platform::Workable,
        Platform::Icims,
        Platform::Teamtailor,
        Platform::Adp,
        Platform::Successfactors,
        Platform::Jobvite,
        Platform::Pereless,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Greenhouse => "greenhouse",
            Platform::Lever => "lever",
            Platform::Workday => "workday",
            Platform::Workable => "workable",
            Platform::Icims => "icims",
            Platform::Teamtailor => "teamtailor",
            Platform::Adp => "adp",
            Platform::Successfactors => "successfactors",
            Platform::Jobvite => "jobvite",
            Platform::Pereless => "pereless",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPlatform(pub String);

impl fmt::Display for UnknownPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown platform `{}`", self.0)
    }
}

impl std::error::Error for UnknownPlatform {}

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| UnknownPlatform(s.to_string()))
    }
}

/// Which signal made a posting count as relevant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedOn {
    #[default]
    TitleOrDescription,
    DescriptionHtml,
    HtmlText,
    Jsonld,
}

impl MatchedOn {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchedOn::TitleOrDescription => "title_or_description",
            MatchedOn::DescriptionHtml => "description_html",
            MatchedOn::HtmlText => "html_text",
            MatchedOn::Jsonld => "jsonld",
        }
    }
}

impl fmt::Display for MatchedOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized job-posting observation, as appended to the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRow {
    pub company: String,
    pub platform: Platform,
    pub title: String,
    pub location: String,
    pub job_id: String,
    pub url: String,
    pub posted_at_iso: String,
    pub detected_on_iso: String,
    pub matched_on: MatchedOn,
}

impl JobRow {
    pub fn identity_key(&self) -> String {
        identity_key(self.platform, &self.company, &self.job_id, &self.url)
    }

    /// Fields in [`SINK_HEADERS`] order, with the URL normalized.
    pub fn sink_record(&self) -> [String; 9] {
        [
            self.company.clone(),
            self.platform.as_str().to_string(),
            self.title.clone(),
            self.location.clone(),
            self.job_id.clone(),
            normalize_url(&self.url),
            self.posted_at_iso.clone(),
            self.detected_on_iso.clone(),
            self.matched_on.as_str().to_string(),
        ]
    }
}

/// Adapter handoff shape; every optional field coerces to an empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobRowDraft {
    pub company: String,
    pub title: Option<String>,
    pub location: Option<String>,
    pub job_id: Option<String>,
    pub url: Option<String>,
    pub posted_at_iso: Option<String>,
    pub matched_on: Option<MatchedOn>,
}

impl JobRowDraft {
    pub fn new(company: impl Into<String>) -> Self {
        Self {
            company: company.into(),
            ..Default::default()
        }
    }

    pub fn title(mut self, value: impl Into<String>) -> Self {
        self.title = Some(value.into());
        self
    }

    pub fn location(mut self, value: impl Into<String>) -> Self {
        self.location = Some(value.into());
        self
    }

    pub fn job_id(mut self, value: impl Into<String>) -> Self {
        self.job_id = Some(value.into());
        self
    }

    pub fn url(mut self, value: impl Into<String>) -> Self {
        self.url = Some(value.into());
        self
    }

    pub fn posted_at(mut self, value: impl Into<String>) -> Self {
        self.posted_at_iso = Some(value.into());
        self
    }

    pub fn matched_on(mut self, value: MatchedOn) -> Self {
        self.matched_on = Some(value);
        self
    }

    pub fn into_row(self, platform: Platform) -> JobRow {
        self.into_row_at(platform, Utc::now())
    }

    pub fn into_row_at(self, platform: Platform, detected_on: DateTime<Utc>) -> JobRow {
        JobRow {
            company: self.company,
            platform,
            title: self.title.unwrap_or_default(),
            location: self.location.unwrap_or_default(),
            job_id: self.job_id.unwrap_or_default(),
            url: normalize_url(self.url.as_deref().unwrap_or_default()),
            posted_at_iso: self.posted_at_iso.unwrap_or_default(),
            detected_on_iso: format_iso_seconds(detected_on),
            matched_on: self.matched_on.unwrap_or_default(),
        }
    }
}

/// `platform::company::job_id::normalized_url`
pub fn identity_key(platform: Platform, company: &str, job_id: &str, url: &str) -> String {
    [platform.as_str(), company, job_id, &normalize_url(url)].join(IDENTITY_SEPARATOR)
}

/// Keeps scheme, authority and path. Never fails: unparseable input comes back as-is,
/// except relative references, which still lose their query and fragment.
///
/// Absolute URLs come back in `url::Url` serialization: lowercase host, percent-encoded,
/// and `/` for an empty path.
pub fn normalize_url(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }
    match Url::parse(input) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let end = input.find(['?', '#']).unwrap_or(input.len());
            input[..end].to_string()
        }
        Err(_) => input.to_string(),
    }
}

pub fn format_iso_seconds(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub fn iso_from_epoch_millis(millis: i64) -> Option<String> {
    Utc.timestamp_millis_opt(millis).single().map(format_iso_seconds)
}

/// Best-effort conversion of an upstream timestamp to `YYYY-MM-DDTHH:MM:SSZ`.
///
/// RFC 3339 values are converted to UTC; naive date-times (with or without seconds)
/// and bare dates are taken as UTC. Any other text that starts with a digit is passed
/// through with `T`/`Z` patched in and is not guaranteed to be in that form. Free text
/// such as "Posted 3 Days Ago" yields an empty string.
pub fn iso_from_upstream(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return format_iso_seconds(parsed.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return format_iso_seconds(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return format_iso_seconds(midnight.and_utc());
        }
    }
    if !raw.starts_with(|c: char| c.is_ascii_digit()) {
        return String::new();
    }
    let mut out = raw.replace(' ', "T");
    if !out.ends_with('Z') {
        out.push('Z');
    }
    out
}

/// Whole-word, case-insensitive relevance test against one or more alternative terms.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    terms: Vec<String>,
    pattern: Option<Regex>,
}

impl KeywordMatcher {
    pub fn new<I, S>(terms: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms: Vec<String> = terms
            .into_iter()
            .map(|t| t.as_ref().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() {
            return Ok(Self {
                terms,
                pattern: None,
            });
        }
        let alternation = terms
            .iter()
            .map(|t| whole_word(t))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!("(?i){alternation}"))?;
        Ok(Self {
            terms,
            pattern: Some(pattern),
        })
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// First configured term; adapters with server-side search send it upstream.
    pub fn primary_term(&self) -> &str {
        self.terms.first().map(String::as_str).unwrap_or(DEFAULT_KEYWORD)
    }

    pub fn matches(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        self.pattern.as_ref().is_some_and(|p| p.is_match(text))
    }

    /// Joins the fields with newlines before matching, so a term never spans two fields.
    pub fn matches_fields(&self, fields: &[&str]) -> bool {
        self.matches(&fields.join("\n"))
    }
}

/// `\b` only holds next to a word character, so terms such as `c++` or `.net` are
/// guarded on their symbol edge by start/end of text or a non-word character instead.
fn whole_word(term: &str) -> String {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let lead = if term.starts_with(is_word) { r"\b" } else { r"(?:^|\W)" };
    let trail = if term.ends_with(is_word) { r"\b" } else { r"(?:\W|$)" };
    format!("{lead}{}{trail}", regex::escape(term))
}

impl Default for KeywordMatcher {
    fn default() -> Self {
        let pattern = Regex::new(r"(?i)\bmusic\b").ok();
        Self {
            terms: vec![DEFAULT_KEYWORD.to_string()],
            pattern,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 24, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn normalize_strips_query_and_fragment() {
        assert_eq!(
            normalize_url("https://x.com/job/7?utm_source=a#frag"),
            "https://x.com/job/7"
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in [
            "https://x.com/job/7?utm_source=a#frag",
            "HTTPS://Boards.Example.com/a/b/?gh_jid=1",
            "/jobs/12?x=1",
            "not a url at all",
            "",
        ] {
            let once = normalize_url(raw);
            assert_eq!(normalize_url(&once), once, "input {raw:?}");
        }
    }

    #[test]
    fn normalize_serializes_absolute_urls_canonically() {
        assert_eq!(normalize_url("https://X.com?a=1"), "https://x.com/");
        assert_eq!(
            normalize_url("https://Jobs.Example.com/a b?utm=1"),
            "https://jobs.example.com/a%20b"
        );
    }

    #[test]
    fn normalize_falls_back_without_panicking() {
        assert_eq!(normalize_url("http://[::1"), "http://[::1");
        assert_eq!(normalize_url("/jobs/12?x=1#top"), "/jobs/12");
    }

    #[test]
    fn matcher_uses_word_boundaries() {
        let m = KeywordMatcher::default();
        assert!(m.matches("Music Director"));
        assert!(m.matches("head of MUSIC, licensing"));
        assert!(!m.matches("musically inclined"));
        assert!(!m.matches("musical theatre"));
        assert!(!m.matches(""));
    }

    #[test]
    fn matcher_supports_alternative_terms() {
        let m = KeywordMatcher::new(["music", "audio", "c++"]).unwrap();
        assert!(m.matches("Senior Audio Engineer"));
        assert!(m.matches_fields(&["Engineer", "Remote", "Knows c++ well"]));
        assert!(!m.matches("audiophile"));
        assert_eq!(m.primary_term(), "music");
    }

    #[test]
    fn matcher_handles_terms_with_symbol_edges() {
        let cpp = KeywordMatcher::new(["c++"]).unwrap();
        assert!(cpp.matches("Knows c++"));
        assert!(cpp.matches("C++ developer"));
        assert!(cpp.matches("(c++)"));
        assert!(!cpp.matches("abc++"));
        assert!(!cpp.matches("c++x"));

        let dotnet = KeywordMatcher::new([".net"]).unwrap();
        assert!(dotnet.matches("Uses .net daily"));
        assert!(dotnet.matches(".NET"));
        assert!(!dotnet.matches("asp.net"));
        assert!(!dotnet.matches(".network"));
    }

    #[test]
    fn empty_term_list_never_matches() {
        let m = KeywordMatcher::new(Vec::<String>::new()).unwrap();
        assert!(!m.matches("music"));
    }

    #[test]
    fn draft_defaults_to_empty_strings() {
        let row = JobRowDraft::new("acme").into_row_at(Platform::Lever, fixed_now());
        assert_eq!(row.job_id, "");
        assert_eq!(row.posted_at_iso, "");
        assert_eq!(row.title, "");
        assert_eq!(row.url, "");
        assert_eq!(row.detected_on_iso, "2026-02-24T12:00:00Z");
        assert_eq!(row.matched_on, MatchedOn::TitleOrDescription);
    }

    #[test]
    fn identity_ignores_title_and_tracking_params() {
        let a = JobRowDraft::new("acme")
            .title("Music Producer")
            .job_id("42")
            .url("https://jobs.example.com/42?utm_source=x")
            .into_row(Platform::Greenhouse);
        let b = JobRowDraft::new("acme")
            .title("Music Producer (Remote)")
            .job_id("42")
            .url("https://jobs.example.com/42#apply")
            .into_row(Platform::Greenhouse);
        assert_eq!(a.identity_key(), b.identity_key());
        assert_eq!(a.identity_key(), a.identity_key());
        assert_eq!(
            a.identity_key(),
            "greenhouse::acme::42::https://jobs.example.com/42"
        );
    }

    #[test]
    fn upstream_timestamps_normalize_to_utc_seconds() {
        assert_eq!(iso_from_upstream("2024-05-01 10:20:30"), "2024-05-01T10:20:30Z");
        assert_eq!(
            iso_from_upstream("2024-05-01T10:20:30.123-04:00"),
            "2024-05-01T14:20:30Z"
        );
        assert_eq!(iso_from_upstream("2024-05-01"), "2024-05-01T00:00:00Z");
        assert_eq!(iso_from_upstream("2024-05-01 10:20"), "2024-05-01T10:20:00Z");
        assert_eq!(iso_from_upstream("2024-05-01T10:20"), "2024-05-01T10:20:00Z");
        assert_eq!(iso_from_upstream("2024/05/01"), "2024/05/01Z");
        assert_eq!(iso_from_upstream("Posted 3 Days Ago"), "");
        assert_eq!(iso_from_upstream(""), "");
        assert_eq!(
            iso_from_epoch_millis(1_700_000_000_000).as_deref(),
            Some("2023-11-14T22:13:20Z")
        );
    }

    #[test]
    fn platform_round_trips_through_str() {
        for p in Platform::ALL {
            assert_eq!(p.as_str().parse::<Platform>().unwrap(), p);
        }
        assert!("bamboohr".parse::<Platform>().is_err());
    }
}
