use futures::future::{BoxFuture, FutureExt};
use image::DynamicImage;
use log::{debug, info};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;

use super::cache::{LoadError, PageImage, PageLoader};

const USER_AGENT: &str = "magazine-viewer/0.1.0";
const UNTITLED: &str = "Untitled issue";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// One digitized magazine issue, as handed to the viewer.
#[derive(Debug, Clone)]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub background: Option<PageImage>,
    pub pages: Arc<[PageImage]>,
}

impl Issue {
    /// An ad-hoc issue built from page URLs, without the REST service.
    pub fn from_urls(urls: Vec<String>) -> Self {
        Self {
            id: String::new(),
            title: format!("{} pages", urls.len()),
            background: None,
            pages: urls.into_iter().map(PageImage::from).collect::<Vec<_>>().into(),
        }
    }

    pub fn empty(title: &str) -> Self {
        Self {
            id: String::new(),
            title: title.to_string(),
            background: None,
            pages: Arc::from(Vec::new()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    data: IssueData,
}

#[derive(Debug, Deserialize)]
struct IssueData {
    id: String,
    #[serde(default)]
    title: HashMap<String, String>,
    background: Option<String>,
    #[serde(default)]
    pages: Vec<String>,
}

fn parse_issue(response: IssueResponse, language: &str) -> Issue {
    let data = response.data;

    let title = data
        .title
        .get(language)
        .or_else(|| data.title.values().next())
        .cloned()
        .unwrap_or_else(|| UNTITLED.to_string());

    let pages: Vec<PageImage> = data
        .pages
        .into_iter()
        .filter(|url| !url.is_empty())
        .map(PageImage::from)
        .collect();

    Issue {
        id: data.id,
        title,
        background: data.background.filter(|url| !url.is_empty()).map(PageImage::from),
        pages: pages.into(),
    }
}

pub fn build_client() -> Result<reqwest::Client, ApiError> {
    Ok(reqwest::Client::builder().user_agent(USER_AGENT).build()?)
}

/// Client for the magazine catalog REST service.
pub struct MagazineClient {
    client: reqwest::Client,
    base_url: String,
    language: String,
}

impl MagazineClient {
    pub fn new(client: reqwest::Client, base_url: &str, language: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            language: language.to_string(),
        }
    }

    pub async fn fetch_issue(&self, issue_id: &str) -> Result<Issue, ApiError> {
        let url = format!("{}/magazines/{}", self.base_url, issue_id);
        info!("Fetching issue {}", url);

        let response: IssueResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let issue = parse_issue(response, &self.language);
        info!("Issue '{}' has {} pages", issue.title, issue.pages.len());
        Ok(issue)
    }
}

/// Fetches page images over HTTP and decodes them off the async workers.
pub struct HttpPageLoader {
    client: reqwest::Client,
}

impl HttpPageLoader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl PageLoader for HttpPageLoader {
    type Handle = Arc<DynamicImage>;

    fn load(&self, page: PageImage) -> BoxFuture<'static, Result<Self::Handle, LoadError>> {
        let client = self.client.clone();
        async move {
            debug!("Fetching page image {}", page);
            let bytes = client
                .get(page.as_str())
                .send()
                .await
                .and_then(|response| response.error_for_status())
                .map_err(|e| LoadError::Fetch(e.to_string()))?
                .bytes()
                .await
                .map_err(|e| LoadError::Fetch(e.to_string()))?;

            let image = tokio::task::spawn_blocking(move || decode_image(&bytes))
                .await
                .map_err(|_| LoadError::Aborted)??;
            Ok::<_, LoadError>(Arc::new(image))
        }
        .boxed()
    }
}

fn decode_image(bytes: &[u8]) -> Result<DynamicImage, LoadError> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| LoadError::Decode(e.to_string()))?
        .decode()
        .map_err(|e| LoadError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str, language: &str) -> Issue {
        let response: IssueResponse = serde_json::from_str(body).unwrap();
        parse_issue(response, language)
    }

    #[test]
    fn parses_localized_issue() {
        let issue = parse(
            r#"{"data": {
                "id": "spring-2024",
                "title": {"en": "Spring Travel", "uz": "Bahorgi sayohat"},
                "background": "https://cdn.example/bg.jpg",
                "pages": ["https://cdn.example/1.jpg", "", "https://cdn.example/2.jpg"]
            }}"#,
            "uz",
        );

        assert_eq!(issue.id, "spring-2024");
        assert_eq!(issue.title, "Bahorgi sayohat");
        assert_eq!(issue.background, Some(PageImage::from("https://cdn.example/bg.jpg")));
        let pages: Vec<&str> = issue.pages.iter().map(PageImage::as_str).collect();
        assert_eq!(pages, vec!["https://cdn.example/1.jpg", "https://cdn.example/2.jpg"]);
    }

    #[test]
    fn title_falls_back_to_any_translation() {
        let issue = parse(r#"{"data": {"id": "x", "title": {"ru": "Весна"}}}"#, "en");
        assert_eq!(issue.title, "Весна");
        assert!(issue.pages.is_empty());

        let untitled = parse(r#"{"data": {"id": "y", "background": ""}}"#, "en");
        assert_eq!(untitled.title, UNTITLED);
        assert_eq!(untitled.background, None);
    }

    #[test]
    fn ad_hoc_issue_keeps_url_order() {
        let issue = Issue::from_urls(vec!["b.png".into(), "a.png".into()]);
        assert_eq!(issue.pages[0].as_str(), "b.png");
        assert_eq!(issue.pages[1].as_str(), "a.png");
        assert_eq!(issue.title, "2 pages");
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(LoadError::Decode(_))
        ));
    }
}
