//! Web page fetching and text extraction for the scrape pass.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::instrument;
use url::Url;

use super::{ProviderError, WebIngester};

/// A fetched page: raw HTML plus the extracted title and readable text.
#[derive(Debug, Clone)]
pub struct ScrapedPage {
    pub url: Url,
    pub title: Option<String>,
    /// Block-level text, paragraphs separated by blank lines, ready for
    /// paragraph chunking.
    pub text: String,
    pub html: String,
    pub fetched_at: DateTime<Utc>,
}

/// Fetches pages over HTTP and extracts their text with `scraper`.
#[derive(Debug, Clone)]
pub struct PageIngestor {
    client: reqwest::Client,
}

impl PageIngestor {
    pub fn new() -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("gleanforge/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an existing client, e.g. one with custom proxy settings.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WebIngester for PageIngestor {
    #[instrument(skip(self), fields(url = %url), err)]
    async fn ingest(&self, url: &Url) -> Result<ScrapedPage, ProviderError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?;
        let html = response.text().await?;
        let extracted = extract_page(&html);
        Ok(ScrapedPage {
            url: url.clone(),
            title: extracted.title,
            text: extracted.text,
            html,
            fetched_at: Utc::now(),
        })
    }
}

struct ExtractedPage {
    title: Option<String>,
    text: String,
}

/// Pulls the title and block-level text out of an HTML document.
///
/// Block elements are joined with blank lines so the result chunks cleanly
/// under the paragraph strategy. Navigation, scripts, and styles fall away
/// because only content-bearing blocks are selected. `Html` is not `Send`,
/// so parsing stays inside this synchronous helper.
fn extract_page(html: &str) -> ExtractedPage {
    let document = Html::parse_document(html);

    let title = Selector::parse("title").ok().and_then(|selector| {
        document
            .select(&selector)
            .next()
            .map(|element| normalize_whitespace(&element.text().collect::<String>()))
            .filter(|t| !t.is_empty())
    });

    let mut blocks = Vec::new();
    if let Ok(selector) = Selector::parse("h1, h2, h3, h4, h5, h6, p, pre, blockquote") {
        for element in document.select(&selector) {
            let block = normalize_whitespace(&element.text().collect::<Vec<_>>().join(" "));
            if !block.is_empty() {
                blocks.push(block);
            }
        }
    }

    let text = if blocks.is_empty() {
        // Pages without block markup still yield their bare text.
        normalize_whitespace(&document.root_element().text().collect::<Vec<_>>().join(" "))
    } else {
        blocks.join("\n\n")
    };

    ExtractedPage { title, text }
}

fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}
