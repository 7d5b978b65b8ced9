//! HTTP implementation of the engine's [`Session`] collaborator.
//!
//! Reuses the cookies of a browser session saved as a storage-state JSON file
//! (the `cookies` array written by Playwright's `storage_state()`), and reads
//! course cards, assignment rows and page links out of the server-rendered
//! HTML. Clicking script-driven buttons needs a real browser, so
//! [`Session::click_and_capture`] reports itself as unsupported.

use anyhow::{Context, Result};
use async_trait::async_trait;
use gradescope_archiver_core::config::ArchiveConfig;
use gradescope_archiver_core::contract::{
    AssignmentRow, CapturedDownload, CourseCard, FetchResponse, PageLink, Session, SessionError,
};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, USER_AGENT};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

const BROWSER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Deserialize)]
struct StorageState {
    #[serde(default)]
    cookies: Vec<StoredCookie>,
}

#[derive(Debug, Deserialize)]
struct StoredCookie {
    name: String,
    value: String,
    #[serde(default)]
    domain: String,
}

pub struct HttpSession {
    client: Client,
    base_url: Url,
}

impl HttpSession {
    /// Build a session from the storage-state file named in `config.auth_file`.
    pub fn from_storage_state(config: &ArchiveConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("invalid base_url '{}'", config.base_url))?;
        let cookie_header = load_cookie_header(&config.auth_file, &base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_AGENT));
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&cookie_header).context("stored cookies are not valid header text")?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build HTTP client")?;
        info!(base_url = %base_url, "Initialized HTTP session from stored browser state");
        Ok(Self { client, base_url })
    }

    fn absolute(&self, href: &str) -> Result<Url, SessionError> {
        Ok(self.base_url.join(href)?)
    }

    async fn get_html(&self, url: &str) -> Result<String, SessionError> {
        let url = self.absolute(url)?;
        debug!(url = %url, "Loading page");
        let resp = self.client.get(url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("{url} returned {status}").into());
        }
        // A redirect to the login form means the stored session has expired.
        if resp.url().path().starts_with("/login") {
            return Err("stored session is no longer logged in; refresh the auth file".into());
        }
        Ok(resp.text().await?)
    }
}

/// `name=value; ...` for every stored cookie that applies to `base_url`'s host.
pub fn load_cookie_header(auth_file: &Path, base_url: &Url) -> Result<String> {
    let content = std::fs::read_to_string(auth_file).with_context(|| {
        format!(
            "authentication file '{}' not found; log in with a browser and save its storage state first",
            auth_file.display()
        )
    })?;
    let state: StorageState = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse authentication file '{}'", auth_file.display()))?;
    let host = base_url.host_str().unwrap_or_default();
    let pairs: Vec<String> = state
        .cookies
        .iter()
        .filter(|c| {
            let domain = c.domain.trim_start_matches('.');
            domain.is_empty() || host == domain || host.ends_with(&format!(".{domain}"))
        })
        .map(|c| format!("{}={}", c.name, c.value))
        .collect();
    if pairs.is_empty() {
        anyhow::bail!("authentication file '{}' holds no cookies for {host}", auth_file.display());
    }
    Ok(pairs.join("; "))
}

#[async_trait]
impl Session for HttpSession {
    async fn list_course_cards(&self) -> Result<Vec<CourseCard>, SessionError> {
        let html = self.get_html("/account").await?;
        let mut cards = parse_course_cards(&html, &self.base_url);
        if cards.is_empty() {
            debug!("No course cards on account page, trying course index");
            cards = parse_course_cards(&self.get_html("/courses").await?, &self.base_url);
        }
        Ok(cards)
    }

    async fn list_assignment_rows(&self, course_url: &str) -> Result<Vec<AssignmentRow>, SessionError> {
        let html = self.get_html(course_url).await?;
        Ok(parse_assignment_rows(&html, &self.base_url))
    }

    async fn open_assignment(&self, assignment_url: &str) -> Result<Vec<PageLink>, SessionError> {
        let html = self.get_html(assignment_url).await?;
        Ok(parse_page_links(&html))
    }

    async fn fetch_authenticated(&self, url: &str) -> Result<FetchResponse, SessionError> {
        let resp = self.client.get(self.absolute(url)?).send().await?;
        let status = resp.status().as_u16();
        let headers: HashMap<String, String> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_ascii_lowercase(), v.to_string())))
            .collect();
        let body = resp.bytes().await?.to_vec();
        Ok(FetchResponse { status, headers, body })
    }

    async fn click_and_capture(&self, locator: &str) -> Result<CapturedDownload, SessionError> {
        warn!(locator, "Script-driven download needs a browser session");
        Err(format!("clicking '{locator}' is not supported by the HTTP session").into())
    }
}

fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static HTML pattern is a valid regex"))
}

fn tag_pattern() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    cached(&TAG, r"<[^>]+>")
}

/// Visible text of an HTML fragment, whitespace collapsed.
pub fn strip_tags(fragment: &str) -> String {
    let text = tag_pattern().replace_all(fragment, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Value of attribute `name` in an opening tag's attribute text.
pub fn attribute(tag: &str, name: &str) -> Option<String> {
    static ATTR: OnceLock<Regex> = OnceLock::new();
    let pattern = cached(
        &ATTR,
        r#"(?:^|\s)([A-Za-z_:][-\w:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#,
    );
    pattern
        .captures_iter(tag)
        .find(|caps| caps[1].eq_ignore_ascii_case(name))
        .and_then(|caps| caps.get(2).or_else(|| caps.get(3)).or_else(|| caps.get(4)))
        .map(|m| m.as_str().replace("&amp;", "&"))
}

fn has_class(tag: &str, class: &str) -> bool {
    attribute(tag, "class").is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
}

/// Text of the first element inside `fragment` carrying `class`, up to the
/// next closing tag.
fn class_text(fragment: &str, class: &str) -> Option<String> {
    static OPEN_TAG: OnceLock<Regex> = OnceLock::new();
    let open = cached(&OPEN_TAG, r"<\w+(\s[^>]*)>");
    let caps = open.captures_iter(fragment).find(|caps| has_class(&caps[1], class))?;
    let rest = &fragment[caps.get(0)?.end()..];
    let inner = rest.find("</").map_or(rest, |end| &rest[..end]);
    Some(strip_tags(inner)).filter(|t| !t.is_empty())
}

/// Dashboard course cards in document order, with absolute URLs.
pub fn parse_course_cards(html: &str, base_url: &Url) -> Vec<CourseCard> {
    static CARD_OR_TERM: OnceLock<Regex> = OnceLock::new();
    let pattern = cached(
        &CARD_OR_TERM,
        r#"(?s)<a(\s[^>]*)>(.*?)</a>|<(?:div|h2)(\s[^>]*class="[^"]*courseList--term[^"]*"[^>]*)>(.*?)</(?:div|h2)>"#,
    );
    let mut term = String::new();
    let mut cards = Vec::new();
    for caps in pattern.captures_iter(html) {
        if let Some(heading) = caps.get(4) {
            term = strip_tags(heading.as_str());
            continue;
        }
        let (Some(attrs), Some(inner)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        if !has_class(attrs.as_str(), "courseBox") {
            continue;
        }
        let Some(href) = attribute(attrs.as_str(), "href") else {
            continue;
        };
        if !href.contains("/courses/") || href.contains("/assignments/") || href.contains("/submissions/") {
            continue;
        }
        let Ok(url) = base_url.join(&href) else {
            continue;
        };
        let inner = inner.as_str();
        let display_name = class_text(inner, "courseBox--name").unwrap_or_default();
        cards.push(CourseCard {
            url: url.to_string(),
            short_name: class_text(inner, "courseBox--shortname").unwrap_or_default(),
            term: class_text(inner, "courseBox--term").unwrap_or_else(|| term.clone()),
            display_name,
        });
    }
    cards
}

/// Rows of the assignment table. The status is the row's second cell.
pub fn parse_assignment_rows(html: &str, base_url: &Url) -> Vec<AssignmentRow> {
    static TBODY: OnceLock<Regex> = OnceLock::new();
    static ROW: OnceLock<Regex> = OnceLock::new();
    static CELL: OnceLock<Regex> = OnceLock::new();
    static LINK: OnceLock<Regex> = OnceLock::new();

    let mut rows = Vec::new();
    for body in cached(&TBODY, r"(?s)<tbody[^>]*>(.*?)</tbody>").captures_iter(html) {
        for row in cached(&ROW, r"(?s)<tr[^>]*>(.*?)</tr>").captures_iter(&body[1]) {
            let row_html = &row[1];
            let cells: Vec<String> = cached(&CELL, r"(?s)<t[dh][^>]*>(.*?)</t[dh]>")
                .captures_iter(row_html)
                .map(|c| strip_tags(&c[1]))
                .collect();
            let Some(link) = cached(&LINK, r"(?s)<a(\s[^>]*)>(.*?)</a>")
                .captures_iter(row_html)
                .find(|c| attribute(&c[1], "href").is_some_and(|h| h.contains("/assignments/")))
            else {
                continue;
            };
            let (Some(href), name) = (attribute(&link[1], "href"), strip_tags(&link[2])) else {
                continue;
            };
            let Ok(url) = base_url.join(&href) else {
                continue;
            };
            rows.push(AssignmentRow {
                name,
                url: url.to_string(),
                status_text: cells.get(1).cloned().unwrap_or_default(),
            });
        }
    }
    rows
}

/// Every anchor on an assignment page, in document order.
pub fn parse_page_links(html: &str) -> Vec<PageLink> {
    static ANCHOR: OnceLock<Regex> = OnceLock::new();
    static DOWNLOAD_ATTR: OnceLock<Regex> = OnceLock::new();
    let download = cached(&DOWNLOAD_ATTR, r"(?i)(?:^|\s)download(?:\s|=|$)");
    cached(&ANCHOR, r"(?s)<a(\s[^>]*)?>(.*?)</a>")
        .captures_iter(html)
        .enumerate()
        .map(|(i, caps)| {
            let attrs = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            PageLink {
                href: attribute(attrs, "href"),
                text: strip_tags(&caps[2]),
                has_download_attr: download.is_match(attrs),
                locator: format!("a >> nth={i}"),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://www.gradescope.com").unwrap()
    }

    #[test]
    fn parses_course_cards_with_term_headings() {
        let html = r#"
            <div class="courseList--term">Fall 2024</div>
            <a class="courseBox" href="/courses/123">
              <h3 class="courseBox--shortname">CS 101</h3>
              <div class="courseBox--name">Intro &amp; Programming</div>
            </a>
            <a class="courseBox courseBox-new" href="/courses/456"><div class="courseBox--name">Other</div></a>
            <a href="/courses/123/assignments/1">not a card</a>
        "#;
        let cards = parse_course_cards(html, &base());
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].url, "https://www.gradescope.com/courses/123");
        assert_eq!(cards[0].display_name, "Intro & Programming");
        assert_eq!(cards[0].short_name, "CS 101");
        assert_eq!(cards[0].term, "Fall 2024");
        assert_eq!(cards[1].short_name, "");
    }

    #[test]
    fn attribute_and_class_lookups_share_one_pattern() {
        let tag = r#" data-href="/nope" HREF='/courses/7' class=courseBox title="a &amp; b""#;
        assert_eq!(attribute(tag, "href").as_deref(), Some("/courses/7"));
        assert_eq!(attribute(tag, "class").as_deref(), Some("courseBox"));
        assert_eq!(attribute(tag, "title").as_deref(), Some("a & b"));
        assert!(attribute(tag, "download").is_none());

        let inner = r#"<div class="outer"><span class="courseBox--name extra">Compilers</span></div>"#;
        assert_eq!(class_text(inner, "courseBox--name").as_deref(), Some("Compilers"));
        assert!(class_text(inner, "courseBox--term").is_none());
    }

    #[test]
    fn parses_assignment_rows_status_from_second_cell() {
        let html = r#"
            <table><thead><tr><th>Name</th><th>Status</th></tr></thead>
            <tbody>
              <tr><th><a href="/courses/1/assignments/2/submissions/3">HW 1</a></th><td><div>9.5 / 10.0</div></td></tr>
              <tr><th>Quiz (no link)</th><td>No Submission</td></tr>
            </tbody></table>
        "#;
        let rows = parse_assignment_rows(html, &base());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "HW 1");
        assert_eq!(rows[0].status_text, "9.5 / 10.0");
        assert_eq!(rows[0].url, "https://www.gradescope.com/courses/1/assignments/2/submissions/3");
    }

    #[test]
    fn parses_page_links_and_download_attribute() {
        let html = r#"<a href="/x.zip" download>Get</a><a class="btn" data-download="no">Download Graded Copy</a>"#;
        let links = parse_page_links(html);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].href.as_deref(), Some("/x.zip"));
        assert!(links[0].has_download_attr);
        assert!(links[1].href.is_none());
        assert!(!links[1].has_download_attr);
        assert_eq!(links[1].text, "Download Graded Copy");
        assert_ne!(links[0].locator, links[1].locator);
    }
}
