use std::{fmt, sync::LazyLock, time::Duration};

use async_trait::async_trait;
use enricher_model::{
    CaptureAttempt, ContentDetails, StageDetails, StageName, Subject,
};
use regex::Regex;
use reqwest::{header, redirect};
use tracing::debug;
use url::Url;

use crate::{
    config::ProviderSettings,
    error::Result,
    worker::{Artifact, Stage, StageError, StageLookup},
};

const PROTOCOLS: [&str; 2] = ["http", "https"];
const MAX_REDIRECTS: usize = 10;
const MAX_SCRIPTS: usize = 32;
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);
const BROWSER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_9_3) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/35.0.1916.47 Safari/537.36";

static SCRIPT_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script\b[^>]*?\bsrc\s*=\s*["']?([^"'\s>]+)"#)
        .expect("script src regex should compile")
});

static ANCHOR_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*?\bhref\s*=\s*["']?([^"'\s>]+)"#)
        .expect("anchor href regex should compile")
});

/// Captures the landing page over plain HTTP and HTTPS, following
/// redirects by hand so the hop history can be recorded, and downloads the
/// external scripts the page references.
pub struct ContentStage {
    client: reqwest::Client,
}

impl fmt::Debug for ContentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentStage").finish_non_exhaustive()
    }
}

struct Page {
    url: Url,
    status: u16,
    redirects: Vec<String>,
    headers: String,
    body: Vec<u8>,
}

impl ContentStage {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(CAPTURE_TIMEOUT.min(settings.request_timeout()))
            .user_agent(BROWSER_AGENT)
            .redirect(redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self { client })
    }

    async fn fetch(&self, start: Url) -> std::result::Result<Page, StageError> {
        let mut url = start;
        let mut redirects = Vec::new();
        loop {
            let response = self.client.get(url.clone()).send().await?;
            let status = response.status();
            if status.is_redirection() && redirects.len() < MAX_REDIRECTS {
                let next = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|location| url.join(location).ok());
                if let Some(next) = next {
                    redirects.push(next.to_string());
                    url = next;
                    continue;
                }
            }
            if !status.is_success() {
                return Err(StageError::from_status(status));
            }
            let headers = response
                .headers()
                .iter()
                .map(|(name, value)| {
                    format!("{}: {}\n", name, value.to_str().unwrap_or_default())
                })
                .collect::<String>();
            let body = response.bytes().await?.to_vec();
            return Ok(Page {
                url,
                status: status.as_u16(),
                redirects,
                headers,
                body,
            });
        }
    }

    async fn fetch_script(&self, link: &Url) -> Option<Vec<u8>> {
        let response = self.client.get(link.clone()).send().await.ok()?;
        if !response.status().is_success() {
            debug!(
                script = %link,
                status = %response.status(),
                "script fetch failed"
            );
            return None;
        }
        response.bytes().await.ok().map(|bytes| bytes.to_vec())
    }
}

/// Absolute, de-duplicated script links referenced by `html`.
pub fn script_links(base: &Url, html: &str) -> Vec<Url> {
    resolve_links(base, &SCRIPT_SRC, html, |_| true)
}

/// Absolute, de-duplicated anchors pointing at an `.apk` file, with or
/// without a query string.
pub fn apk_links(base: &Url, html: &str) -> Vec<Url> {
    resolve_links(base, &ANCHOR_HREF, html, |href| {
        href.split('?').next().is_some_and(|path| path.ends_with(".apk"))
    })
}

fn resolve_links(
    base: &Url,
    pattern: &Regex,
    html: &str,
    keep: impl Fn(&str) -> bool,
) -> Vec<Url> {
    let mut links: Vec<Url> = Vec::new();
    for capture in pattern.captures_iter(html) {
        let Some(raw) = capture.get(1) else { continue };
        let raw = raw.as_str().trim();
        if !keep(raw) {
            continue;
        }
        if let Ok(link) = base.join(raw)
            && matches!(link.scheme(), "http" | "https")
            && !links.contains(&link)
        {
            links.push(link);
        }
    }
    links
}

/// One link per line.
fn apk_listing(links: &[Url]) -> Vec<u8> {
    links
        .iter()
        .map(|link| format!("{link}\n"))
        .collect::<String>()
        .into_bytes()
}

#[async_trait]
impl Stage for ContentStage {
    fn name(&self) -> StageName {
        StageName::Content
    }

    fn supports(&self, subject: &Subject) -> bool {
        !subject.value().ends_with(".apk")
    }

    async fn lookup(
        &self,
        subject: &Subject,
    ) -> std::result::Result<StageLookup, StageError> {
        let mut captures = Vec::new();
        let mut artifacts = Vec::new();
        let mut last_error = None;

        for protocol in PROTOCOLS {
            let origin = format!("{protocol}://{subject}");
            let start = Url::parse(&origin)
                .map_err(|err| StageError::Rejected(format!("{origin}: {err}")))?;
            match self.fetch(start).await {
                Ok(page) => {
                    let html = String::from_utf8_lossy(&page.body);
                    let links = script_links(&page.url, &html);
                    let apks = apk_links(&page.url, &html);
                    let mut failed_scripts = Vec::new();
                    for link in links.iter().take(MAX_SCRIPTS) {
                        match self.fetch_script(link).await {
                            Some(bytes) => artifacts.push(Artifact {
                                slug_source: link.to_string(),
                                extension: "js",
                                bytes,
                            }),
                            None => failed_scripts.push(link.to_string()),
                        }
                    }
                    if !apks.is_empty() {
                        debug!(url = %origin, count = apks.len(), "apk links found");
                        artifacts.push(Artifact {
                            slug_source: origin.clone(),
                            extension: "txt",
                            bytes: apk_listing(&apks),
                        });
                    }
                    let mut document = page.headers.into_bytes();
                    document.push(b'\n');
                    document.extend_from_slice(&page.body);
                    artifacts.push(Artifact {
                        slug_source: origin.clone(),
                        extension: "html",
                        bytes: document,
                    });
                    captures.push(CaptureAttempt {
                        url: origin,
                        status: Some(page.status),
                        error: None,
                        redirects: page.redirects,
                        script_links: links
                            .iter()
                            .map(Url::to_string)
                            .collect(),
                        failed_scripts,
                        apk_links: apks.iter().map(Url::to_string).collect(),
                    });
                }
                Err(err) => {
                    captures.push(CaptureAttempt {
                        url: origin,
                        status: match &err {
                            StageError::HttpStatus(code) => Some(*code),
                            StageError::NotFound => Some(404),
                            _ => None,
                        },
                        error: Some(err.to_string()),
                        redirects: Vec::new(),
                        script_links: Vec::new(),
                        failed_scripts: Vec::new(),
                        apk_links: Vec::new(),
                    });
                    last_error = Some(err);
                }
            }
        }

        if captures.iter().all(|capture| capture.error.is_some()) {
            return Err(last_error.unwrap_or_else(|| {
                StageError::Other("no capture attempted".into())
            }));
        }
        Ok(StageLookup {
            details: StageDetails::Content(ContentDetails { captures }),
            artifacts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_links_are_resolved_against_the_page() {
        let base = Url::parse("http://example.com/app/").unwrap();
        let html = r#"
            <script src="https://cdn.example.net/lib.js"></script>
            <script type="text/javascript" src='//static.example.com/a.js'></script>
            <SCRIPT src="/root.js"></SCRIPT>
            <script src="rel.js"></script>
            <script src="rel.js"></script>
            <script>inline()</script>
        "#;
        let links: Vec<String> = script_links(&base, html)
            .iter()
            .map(Url::to_string)
            .collect();
        assert_eq!(
            links,
            vec![
                "https://cdn.example.net/lib.js",
                "http://static.example.com/a.js",
                "http://example.com/root.js",
                "http://example.com/app/rel.js",
            ]
        );
    }

    #[test]
    fn apk_downloads_are_found_with_and_without_query() {
        let base = Url::parse("https://example.com/download/").unwrap();
        let html = r#"
            <a href="app.apk">latest</a>
            <a class="btn" href="/files/app-v2.apk?token=abc&amp;v=2">v2</a>
            <A HREF='https://mirror.example.net/app.apk'>mirror</A>
            <a href="app.apk">again</a>
            <a href="notes.apk.html">release notes</a>
            <a href="setup.exe">windows</a>
            <link href="style.apk">
        "#;
        let links: Vec<String> = apk_links(&base, html)
            .iter()
            .map(Url::to_string)
            .collect();
        assert_eq!(
            links,
            vec![
                "https://example.com/download/app.apk",
                "https://example.com/files/app-v2.apk?token=abc&amp;v=2",
                "https://mirror.example.net/app.apk",
            ]
        );
        assert_eq!(
            apk_listing(&apk_links(&base, r#"<a href="a.apk">"#)),
            b"https://example.com/download/a.apk\n".to_vec()
        );
    }

    #[test]
    fn pages_without_apk_links_yield_nothing() {
        let base = Url::parse("http://example.com/").unwrap();
        assert!(apk_links(&base, "<a href=\"/index.html\">home</a>").is_empty());
    }

    #[test]
    fn apk_identifiers_are_rejected() {
        let stage = ContentStage::new(&ProviderSettings::default()).unwrap();
        assert!(!stage.supports(&Subject::domain("evil.example/app.apk").unwrap()));
        assert!(stage.supports(&Subject::domain("example.com").unwrap()));
        assert!(stage.supports(&Subject::ip_address("10.0.0.1").unwrap()));
    }
}
