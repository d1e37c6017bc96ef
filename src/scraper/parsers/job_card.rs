//! Job card parser for search result pages.
//!
//! Each listing fragment is parsed on its own: a missing field becomes an
//! empty string, and a fragment that cannot be identified at all is skipped
//! and reported rather than failing the page.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;
use url::Url;

use crate::error::ScrapeError;
use crate::types::JobRecord;

/// Selectors locating a listing and its fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRules {
    /// One match per listing
    pub fragment: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub link: String,
    pub date: String,
    /// Read from the date element when it has no text
    #[serde(default)]
    pub date_attribute: Option<String>,
    /// Screen-reader copies inside a title, left out of the title text
    #[serde(default)]
    pub screen_reader_text: Option<String>,
}

impl Default for ExtractionRules {
    fn default() -> Self {
        Self {
            fragment: "li.jobs-search-results__list-item, li[data-occludable-job-id]".to_string(),
            title: ".artdeco-entity-lockup__title, .job-card-list__title".to_string(),
            company: ".artdeco-entity-lockup__subtitle, .job-card-container__primary-description"
                .to_string(),
            location: ".artdeco-entity-lockup__caption, .job-card-container__metadata-item"
                .to_string(),
            link: "a[href*='/jobs/view/'], a[href]".to_string(),
            date: "time".to_string(),
            date_attribute: Some("datetime".to_string()),
            screen_reader_text: Some(".visually-hidden, .sr-only".to_string()),
        }
    }
}

impl ExtractionRules {
    /// Parse every selector once; a bad selector is a configuration error
    pub fn compile(&self) -> Result<CompiledRules, ScrapeError> {
        Ok(CompiledRules {
            fragment: parse_selector("fragment", &self.fragment)?,
            title: parse_selector("title", &self.title)?,
            company: parse_selector("company", &self.company)?,
            location: parse_selector("location", &self.location)?,
            link: parse_selector("link", &self.link)?,
            date: parse_selector("date", &self.date)?,
            date_attribute: self.date_attribute.clone(),
            screen_reader_text: self
                .screen_reader_text
                .as_deref()
                .map(|s| parse_selector("screen_reader_text", s))
                .transpose()?,
            fragment_source: self.fragment.clone(),
        })
    }
}

fn parse_selector(field: &str, source: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(source).map_err(|e| {
        ScrapeError::Config(format!("invalid {} selector '{}': {:?}", field, source, e))
    })
}

/// Extraction rules with parsed selectors
#[derive(Debug, Clone)]
pub struct CompiledRules {
    fragment: Selector,
    title: Selector,
    company: Selector,
    location: Selector,
    link: Selector,
    date: Selector,
    date_attribute: Option<String>,
    screen_reader_text: Option<Selector>,
    fragment_source: String,
}

impl CompiledRules {
    /// Selector string for listing fragments, used to wait for and count listings
    pub fn fragment_selector(&self) -> &str {
        &self.fragment_source
    }
}

/// Why a fragment produced no record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Neither a title nor a link
    NoIdentifyingField,
    /// A link but no title text
    MissingTitle,
}

/// Records of one page plus the fragments that were skipped
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    pub records: Vec<JobRecord>,
    /// `(fragment index, reason)`
    pub skipped: Vec<(usize, SkipReason)>,
}

impl ExtractionReport {
    pub fn fragments_seen(&self) -> usize {
        self.records.len() + self.skipped.len()
    }
}

/// Parser for job search result markup
pub struct JobCardParser;

impl JobCardParser {
    /// Parse all listing fragments in `html`
    ///
    /// Relative links are resolved against `base_url` when it is given.
    pub fn parse(html: &str, base_url: Option<&str>, rules: &CompiledRules) -> ExtractionReport {
        let document = Html::parse_document(html);
        let base = base_url.and_then(|b| Url::parse(b).ok());
        let mut report = ExtractionReport::default();

        for (index, fragment) in document.select(&rules.fragment).enumerate() {
            match Self::parse_fragment(fragment, base.as_ref(), rules) {
                Ok(record) => report.records.push(record),
                Err(reason) => {
                    debug!(fragment = index, ?reason, "Skipping listing fragment");
                    report.skipped.push((index, reason));
                }
            }
        }

        report
    }

    fn parse_fragment(
        fragment: ElementRef<'_>,
        base: Option<&Url>,
        rules: &CompiledRules,
    ) -> Result<JobRecord, SkipReason> {
        let title = fragment
            .select(&rules.title)
            .map(|el| visible_text(el, rules.screen_reader_text.as_ref()))
            .find(|text| !text.is_empty())
            .unwrap_or_default();
        let link = Self::parse_link(fragment, &rules.link, base);

        if title.is_empty() {
            return Err(if link.is_empty() {
                SkipReason::NoIdentifyingField
            } else {
                SkipReason::MissingTitle
            });
        }

        let company = Self::field_text(fragment, &rules.company).unwrap_or_default();
        let location = Self::field_text(fragment, &rules.location).unwrap_or_default();
        let date_posted = Self::parse_date(fragment, &rules.date, rules.date_attribute.as_deref());

        Ok(JobRecord {
            title,
            company,
            location,
            link,
            date_posted,
        })
    }

    /// Normalized text of the first match inside the fragment
    fn field_text(fragment: ElementRef<'_>, selector: &Selector) -> Option<String> {
        fragment
            .select(selector)
            .map(|el| normalize_text(&el.text().collect::<String>()))
            .find(|text| !text.is_empty())
    }

    fn parse_link(fragment: ElementRef<'_>, selector: &Selector, base: Option<&Url>) -> String {
        // The fragment may itself be the anchor
        let own_href = if selector.matches(&fragment) {
            fragment.value().attr("href")
        } else {
            None
        };

        own_href
            .into_iter()
            .chain(fragment.select(selector).filter_map(|el| el.value().attr("href")))
            .find_map(|href| resolve_link(href, base))
            .unwrap_or_default()
    }

    fn parse_date(
        fragment: ElementRef<'_>,
        selector: &Selector,
        attribute: Option<&str>,
    ) -> String {
        let Some(element) = fragment.select(selector).next() else {
            return String::new();
        };

        let text = normalize_text(&element.text().collect::<String>());
        if !text.is_empty() {
            return text;
        }

        attribute
            .and_then(|attr| element.value().attr(attr))
            .map(normalize_text)
            .unwrap_or_default()
    }
}

/// Absolute http(s) URL for `href`, `None` if it cannot be resolved
fn resolve_link(href: &str, base: Option<&Url>) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let url = match Url::parse(href) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(href).ok()?,
        Err(_) => return None,
    };

    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

fn whitespace() -> &'static Regex {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern is valid"))
}

/// Collapse runs of whitespace and trim
fn normalize_text(text: &str) -> String {
    whitespace().replace_all(text, " ").trim().to_string()
}

/// Normalized text of `element` without text under `hidden` matches.
///
/// Falls back to the full text when everything is hidden.
fn visible_text(element: ElementRef<'_>, hidden: Option<&Selector>) -> String {
    let full = || normalize_text(&element.text().collect::<String>());
    let Some(hidden) = hidden else {
        return full();
    };

    let mut text = String::new();
    for node in element.descendants() {
        let Some(chunk) = node.value().as_text() else {
            continue;
        };
        let in_hidden = node
            .ancestors()
            .take_while(|a| a.id() != element.id())
            .filter_map(ElementRef::wrap)
            .any(|a| hidden.matches(&a));
        if !in_hidden {
            text.push_str(chunk);
        }
    }

    let visible = normalize_text(&text);
    if visible.is_empty() {
        full()
    } else {
        visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://www.linkedin.com/jobs/search/?keywords=data";

    const SAMPLE_HTML: &str = r#"<!DOCTYPE html>
<html>
<body>
<ul class="jobs-search__results-list">
  <li class="jobs-search-results__list-item">
    <div class="artdeco-entity-lockup">
      <a href="/jobs/view/12345/?refId=abc">
        <div class="artdeco-entity-lockup__title">
          <strong>Software Engineer</strong>
        </div>
      </a>
      <div class="artdeco-entity-lockup__subtitle">Acme Corp</div>
      <div class="artdeco-entity-lockup__caption">Berlin, Germany (Hybrid)</div>
      <time datetime="2025-01-10">3 days ago</time>
    </div>
  </li>
  <li class="jobs-search-results__list-item">
    <div class="artdeco-entity-lockup">
      <a href="https://www.linkedin.com/jobs/view/67890">
        <div class="artdeco-entity-lockup__title">
          <span aria-hidden="true">Data Scientist</span>
          <span class="visually-hidden">Data Scientist</span>
        </div>
      </a>
      <div class="artdeco-entity-lockup__subtitle">Globex</div>
      <div class="artdeco-entity-lockup__caption">Remote</div>
      <time datetime="2025-01-12"></time>
    </div>
  </li>
  <li class="jobs-search-results__list-item">
    <div class="artdeco-entity-lockup">
      <div class="artdeco-entity-lockup__title">Senior Data Engineer</div>
      <div class="artdeco-entity-lockup__caption">London</div>
    </div>
  </li>
  <li class="jobs-search-results__list-item">
    <div class="artdeco-entity-lockup">
      <div class="artdeco-entity-lockup__caption">Paris, France</div>
    </div>
  </li>
</ul>
</body>
</html>"#;

    fn rules() -> CompiledRules {
        ExtractionRules::default().compile().unwrap()
    }

    #[test]
    fn test_three_records_and_one_skip() {
        let report = JobCardParser::parse(SAMPLE_HTML, Some(BASE), &rules());

        assert_eq!(report.records.len(), 3);
        assert_eq!(report.skipped, vec![(3, SkipReason::NoIdentifyingField)]);
        assert_eq!(report.fragments_seen(), 4);
    }

    #[test]
    fn test_fields_of_well_formed_fragment() {
        let report = JobCardParser::parse(SAMPLE_HTML, Some(BASE), &rules());
        let first = &report.records[0];

        assert_eq!(first.title, "Software Engineer");
        assert_eq!(first.company, "Acme Corp");
        assert_eq!(first.location, "Berlin, Germany (Hybrid)");
        assert_eq!(first.link, "https://www.linkedin.com/jobs/view/12345/?refId=abc");
        assert_eq!(first.date_posted, "3 days ago");
    }

    #[test]
    fn test_screen_reader_copy_and_date_attribute_fallback() {
        let report = JobCardParser::parse(SAMPLE_HTML, Some(BASE), &rules());
        let second = &report.records[1];

        assert_eq!(second.title, "Data Scientist");
        assert_eq!(second.link, "https://www.linkedin.com/jobs/view/67890");
        assert_eq!(second.date_posted, "2025-01-12");
    }

    #[test]
    fn test_missing_fields_are_empty_not_dropped() {
        let report = JobCardParser::parse(SAMPLE_HTML, Some(BASE), &rules());
        let third = &report.records[2];

        assert_eq!(third.title, "Senior Data Engineer");
        assert_eq!(third.company, "");
        assert_eq!(third.location, "London");
        assert_eq!(third.link, "");
        assert_eq!(third.date_posted, "");
    }

    #[test]
    fn test_link_without_title_is_skipped() {
        let html = r#"
        <li class="jobs-search-results__list-item">
          <a href="/jobs/view/1"></a>
          <div class="artdeco-entity-lockup__subtitle">Acme</div>
        </li>"#;
        let report = JobCardParser::parse(html, Some(BASE), &rules());
        assert!(report.records.is_empty());
        assert_eq!(report.skipped, vec![(0, SkipReason::MissingTitle)]);
    }

    #[test]
    fn test_unresolvable_links_become_empty() {
        let html = r#"
        <li class="jobs-search-results__list-item">
          <a href="javascript:void(0)"><span class="job-card-list__title">Analyst</span></a>
        </li>
        <li class="jobs-search-results__list-item">
          <a href="/jobs/view/2"><span class="job-card-list__title">Engineer</span></a>
        </li>"#;
        let report = JobCardParser::parse(html, None, &rules());
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[0].link, "");
        // No base URL to resolve against
        assert_eq!(report.records[1].link, "");
    }

    #[test]
    fn test_fragment_that_is_itself_the_link() {
        let custom = ExtractionRules {
            fragment: "a.card".to_string(),
            title: "h3".to_string(),
            company: "h4".to_string(),
            location: ".loc".to_string(),
            link: "a".to_string(),
            date: "time".to_string(),
            date_attribute: None,
            screen_reader_text: None,
        }
        .compile()
        .unwrap();
        let html = r#"<a class="card" href="/view/9"><h3>QA Lead</h3><h4>Initech</h4></a>"#;
        let report = JobCardParser::parse(html, Some("https://jobs.example.com/search"), &custom);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].link, "https://jobs.example.com/view/9");
        assert_eq!(report.records[0].company, "Initech");
    }

    #[test]
    fn test_malformed_markup_does_not_fail() {
        let html = r#"<li class="jobs-search-results__list-item"><div class="artdeco-entity-lockup__title">Broken <b>Title
            <li class="jobs-search-results__list-item"><<<>>>
            <li class="jobs-search-results__list-item"><a href="http://[::1"><div class="job-card-list__title">Ops</div></a>"#;
        let report = JobCardParser::parse(html, Some(BASE), &rules());
        assert!(report.records.iter().all(|r| !r.title.is_empty()));
        assert!(report.records.iter().any(|r| r.title == "Ops" && r.link.is_empty()));
    }

    #[test]
    fn test_empty_html() {
        let report = JobCardParser::parse("<html></html>", Some(BASE), &rules());
        assert!(report.records.is_empty());
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_invalid_selector_is_config_error() {
        let bad = ExtractionRules {
            title: "div[[".to_string(),
            ..Default::default()
        };
        let err = bad.compile().unwrap_err();
        assert!(matches!(err, ScrapeError::Config(_)));
        assert!(err.to_string().contains("title"));
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Data\n   Engineer \t"), "Data Engineer");
    }

    #[test]
    fn test_titles_with_repeated_words_are_kept() {
        let html = r#"
        <li class="jobs-search-results__list-item">
          <div class="artdeco-entity-lockup__title">Go Go</div>
        </li>
        <li class="jobs-search-results__list-item">
          <div class="artdeco-entity-lockup__title">Walla Walla Walla Walla</div>
        </li>
        <li class="jobs-search-results__list-item">
          <div class="artdeco-entity-lockup__title"><span class="sr-only">Hidden only</span></div>
        </li>"#;
        let report = JobCardParser::parse(html, Some(BASE), &rules());
        let titles: Vec<_> = report.records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Go Go", "Walla Walla Walla Walla", "Hidden only"]);
    }

    #[test]
    fn test_invalid_screen_reader_selector_is_config_error() {
        let bad = ExtractionRules {
            screen_reader_text: Some("span[[".to_string()),
            ..Default::default()
        };
        let err = bad.compile().unwrap_err();
        assert!(err.to_string().contains("screen_reader_text"));
    }
}
