//! Retrieval backend that downloads papers from a Sci-Hub mirror.
//!
//! A fetch asks the mirror for `<mirror>/<doi>`. Mirrors either answer with
//! the PDF itself or with a landing page embedding it; in the latter case the
//! embedded link is resolved against the mirror and downloaded. One attempt
//! is made per call.

use std::fmt::Display;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{StatusCode, Url};
use scihubator_core::{FetchError, FetchFuture, Identifier, RetrievalBackend};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

pub const DEFAULT_MIRROR: &str = "https://sci-hub.se";
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const PDF_MAGIC: &[u8] = b"%PDF";

/// Elements whose `src` points at the embedded document, in priority order.
const EMBED_SELECTORS: &[&str] = &[
    "embed#pdf",
    "iframe#pdf",
    "#pdf",
    "embed[type=\"application/pdf\"]",
];

static LOCATION_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"location\.href\s*=\s*['"]([^'"]+)['"]"#).unwrap());

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid mirror URL '{url}': {reason}")]
    InvalidMirror { url: String, reason: String },
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct SciHubClientBuilder {
    mirror_url: String,
    probe_timeout: Duration,
    fetch_timeout: Duration,
    user_agent: String,
}

impl Default for SciHubClientBuilder {
    fn default() -> Self {
        Self {
            mirror_url: DEFAULT_MIRROR.to_string(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl SciHubClientBuilder {
    pub fn mirror_url(mut self, url: impl Into<String>) -> Self {
        self.mirror_url = url.into();
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> Result<SciHubClient, ClientError> {
        let mirror = parse_mirror(&self.mirror_url)?;
        let client = reqwest::Client::builder()
            .user_agent(self.user_agent)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;
        Ok(SciHubClient {
            client,
            mirror,
            probe_timeout: self.probe_timeout,
            fetch_timeout: self.fetch_timeout,
        })
    }
}

pub struct SciHubClient {
    client: reqwest::Client,
    mirror: Url,
    probe_timeout: Duration,
    fetch_timeout: Duration,
}

impl SciHubClient {
    pub fn builder() -> SciHubClientBuilder {
        SciHubClientBuilder::default()
    }

    pub fn mirror(&self) -> &Url {
        &self.mirror
    }

    async fn download(&self, identifier: &Identifier, destination: &Path) -> Result<(), FetchError> {
        let landing = landing_url(&self.mirror, identifier)?;
        tracing::debug!(%identifier, url = %landing, "requesting document");

        let resp = self.get(landing).await?;
        if is_pdf_response(&resp) {
            return write_pdf(resp.bytes_stream(), destination).await;
        }

        let html = resp
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let mirror = self.mirror.clone();
        // Parse in spawn_blocking to avoid !Send scraper types
        let link = tokio::task::spawn_blocking(move || find_pdf_link(&html, &mirror))
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?
            .ok_or(FetchError::NotFound)?;
        tracing::debug!(%identifier, url = %link, "following embedded document link");

        let resp = self.get(link).await?;
        write_pdf(resp.bytes_stream(), destination).await
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, FetchError> {
        let resp = self
            .client
            .get(url)
            .timeout(self.fetch_timeout)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        match resp.status() {
            status if status.is_success() => Ok(resp),
            StatusCode::NOT_FOUND => Err(FetchError::NotFound),
            status => Err(FetchError::Status(status.as_u16())),
        }
    }
}

impl RetrievalBackend for SciHubClient {
    fn name(&self) -> &str {
        "Sci-Hub"
    }

    fn probe<'a>(&'a self) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            let result = self
                .client
                .get(self.mirror.clone())
                .timeout(self.probe_timeout)
                .send()
                .await;
            match result {
                Ok(resp) if resp.status() == StatusCode::OK => true,
                Ok(resp) => {
                    tracing::warn!(mirror = %self.mirror, status = %resp.status(), "mirror probe rejected");
                    false
                }
                Err(e) => {
                    tracing::warn!(mirror = %self.mirror, error = %e, "mirror unreachable");
                    false
                }
            }
        })
    }

    fn fetch<'a>(&'a self, identifier: &'a Identifier, destination: &'a Path) -> FetchFuture<'a> {
        Box::pin(self.download(identifier, destination))
    }
}

fn parse_mirror(raw: &str) -> Result<Url, ClientError> {
    let invalid = |reason: String| ClientError::InvalidMirror {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    Ok(url)
}

/// `<mirror>/<identifier>`, keeping any path prefix of the mirror.
fn landing_url(mirror: &Url, identifier: &Identifier) -> Result<Url, FetchError> {
    let raw = format!(
        "{}/{}",
        mirror.as_str().trim_end_matches('/'),
        identifier.as_str().trim_start_matches('/')
    );
    Url::parse(&raw).map_err(|e| FetchError::Network(format!("invalid request URL {raw}: {e}")))
}

fn is_pdf_response(resp: &reqwest::Response) -> bool {
    resp.headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("application/pdf"))
}

/// Locate the embedded PDF on a mirror landing page.
///
/// Returns `None` when the page embeds nothing, which is how mirrors report
/// an unknown identifier.
pub fn find_pdf_link(html: &str, mirror: &Url) -> Option<Url> {
    let document = scraper::Html::parse_document(html);

    for selector in EMBED_SELECTORS {
        let Ok(selector) = scraper::Selector::parse(selector) else {
            continue;
        };
        let found = document
            .select(&selector)
            .filter_map(|el| el.value().attr("src"))
            .find_map(|src| resolve_link(src, mirror));
        if found.is_some() {
            return found;
        }
    }

    // Some mirrors only offer a "save" button.
    let buttons = scraper::Selector::parse("[onclick]").ok()?;
    document
        .select(&buttons)
        .filter_map(|el| el.value().attr("onclick"))
        .filter_map(|onclick| LOCATION_HREF.captures(onclick))
        .find_map(|caps| resolve_link(&caps[1], mirror))
}

/// Resolve a possibly protocol- or root-relative link against the mirror,
/// dropping any `#fragment` (viewer options on most mirrors).
pub fn resolve_link(href: &str, mirror: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("about:") {
        return None;
    }
    let mut url = mirror.join(href).ok()?;
    url.set_fragment(None);
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// Stream a response body to `destination`, rejecting anything that is not
/// a PDF. A rejected body leaves no file behind.
async fn write_pdf<S, B, E>(mut stream: S, destination: &Path) -> Result<(), FetchError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut out = tokio::fs::File::create(destination).await?;
    let mut head: Vec<u8> = Vec::with_capacity(PDF_MAGIC.len());
    let mut bytes_written: u64 = 0;

    let written: Result<(), FetchError> = async {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::Network(e.to_string()))?;
            let chunk = chunk.as_ref();
            if head.len() < PDF_MAGIC.len() {
                let take = (PDF_MAGIC.len() - head.len()).min(chunk.len());
                head.extend_from_slice(&chunk[..take]);
                if !PDF_MAGIC.starts_with(&head) {
                    return Err(FetchError::NotPdf);
                }
            }
            out.write_all(chunk).await?;
            bytes_written += chunk.len() as u64;
        }
        if head != PDF_MAGIC {
            return Err(FetchError::NotPdf);
        }
        out.flush().await?;
        Ok(())
    }
    .await;

    if written.is_err() {
        drop(out);
        if let Err(e) = tokio::fs::remove_file(destination).await {
            tracing::debug!(path = %destination.display(), error = %e, "could not remove rejected download");
        }
    } else {
        tracing::debug!(path = %destination.display(), bytes_written, "document written");
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror() -> Url {
        Url::parse("https://sci-hub.example").unwrap()
    }

    #[test]
    fn finds_embed_with_protocol_relative_src() {
        let html = r#"<html><body><div id="article">
            <embed type="application/pdf" src="//cdn.sci-hub.example/downloads/paper.pdf#navpanes=0&view=FitH" id="pdf">
            </div></body></html>"#;
        let link = find_pdf_link(html, &mirror()).unwrap();
        assert_eq!(link.as_str(), "https://cdn.sci-hub.example/downloads/paper.pdf");
    }

    #[test]
    fn finds_iframe_with_root_relative_src() {
        let html = r#"<iframe id="pdf" src="/tree/ab/cd/paper.pdf"></iframe>"#;
        let link = find_pdf_link(html, &mirror()).unwrap();
        assert_eq!(link.as_str(), "https://sci-hub.example/tree/ab/cd/paper.pdf");
    }

    #[test]
    fn falls_back_to_save_button() {
        let html = r#"<div id="buttons">
            <button onclick="location.href='//dacemirror.example/paper.pdf?download=true'">save</button>
            </div>"#;
        let link = find_pdf_link(html, &mirror()).unwrap();
        assert_eq!(
            link.as_str(),
            "https://dacemirror.example/paper.pdf?download=true"
        );
    }

    #[test]
    fn page_without_embed_yields_none() {
        let html = "<html><body><p>article not found</p></body></html>";
        assert!(find_pdf_link(html, &mirror()).is_none());
    }

    #[test]
    fn blank_and_non_http_links_are_rejected() {
        assert!(resolve_link("  ", &mirror()).is_none());
        assert!(resolve_link("about:blank", &mirror()).is_none());
        assert!(resolve_link("javascript:void(0)", &mirror()).is_none());
    }

    #[test]
    fn landing_url_keeps_mirror_path_and_doi_slashes() {
        let mirror = Url::parse("https://mirror.example/scihub/").unwrap();
        let url = landing_url(&mirror, &Identifier::new("10.1000/xyz.123")).unwrap();
        assert_eq!(url.as_str(), "https://mirror.example/scihub/10.1000/xyz.123");
    }

    #[test]
    fn builder_rejects_bad_mirrors() {
        assert!(matches!(
            SciHubClient::builder().mirror_url("not a url").build(),
            Err(ClientError::InvalidMirror { .. })
        ));
        assert!(matches!(
            SciHubClient::builder().mirror_url("ftp://sci-hub.example").build(),
            Err(ClientError::InvalidMirror { .. })
        ));
    }

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Vec<u8>, std::io::Error>> + Unpin {
        let parts: Vec<_> = parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        futures_util::stream::iter(parts)
    }

    #[tokio::test]
    async fn pdf_body_split_across_chunks_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.pdf");
        write_pdf(chunks(&["%P", "DF-1.7\n", "rest"]), &path)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7\nrest");
    }

    #[tokio::test]
    async fn html_body_is_rejected_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.pdf");
        let err = write_pdf(chunks(&["<!DOCTYPE html>"]), &path)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::NotPdf));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn stream_error_after_header_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.pdf");
        let parts: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"%PDF-1.7\n".to_vec()),
            Err(std::io::Error::other("connection reset")),
        ];
        let err = write_pdf(futures_util::stream::iter(parts), &path)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network(ref msg) if msg.contains("connection reset")));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.pdf");
        let err = write_pdf(chunks(&[]), &path).await.unwrap_err();
        assert!(matches!(err, FetchError::NotPdf));
    }

    #[tokio::test]
    async fn probe_of_closed_port_is_false() {
        let client = SciHubClient::builder()
            .mirror_url("http://127.0.0.1:9")
            .probe_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        assert!(!client.probe().await);
    }
}
