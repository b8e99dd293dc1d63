//! Confluence/Jira content fetcher.
//!
//! Resolves a pasted page or issue URL to its REST resource, fetches the
//! stored body, and flattens the HTML to markdown-ish text. Conversion
//! fidelity is best-effort; the generation prompts only need readable text.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use serde_json::Value;

use super::{ContentFetcher, FetchedPage};
use crate::config::AtlassianConfig;
use crate::error::FetchError;

/// Request timeout for one Atlassian REST call.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Fetches Confluence pages and Jira issues over the Atlassian REST APIs.
pub struct ConfluenceFetcher {
    client: reqwest::Client,
    email: String,
    api_token: String,
    /// Site root, no trailing slash, no `/wiki` suffix.
    root_base: String,
    /// Site root with the `/wiki` suffix (Confluence REST lives here).
    wiki_base: String,
}

impl ConfluenceFetcher {
    pub fn new(config: &AtlassianConfig) -> Result<Self, FetchError> {
        let root_base = normalize_root_base(&config.base_url)?;
        let wiki_base = format!("{root_base}/wiki");
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FetchError::RequestFailed {
                url: config.base_url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            email: config.email.clone(),
            api_token: config.api_token.clone(),
            root_base,
            wiki_base,
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        let resp = self
            .client
            .get(url)
            .basic_auth(&self.email, Some(&self.api_token))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| FetchError::RequestFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::BadStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        resp.json().await.map_err(|e| FetchError::InvalidBody {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    async fn fetch_confluence_page(&self, source_url: &str, page_id: &str) -> Result<FetchedPage, FetchError> {
        // v2 pages API first, v1 content API as fallback for older sites.
        let v2_url = format!("{}/api/v2/pages/{}?body-format=storage", self.wiki_base, page_id);
        if let Ok(data) = self.get_json(&v2_url).await {
            let title = data["title"].as_str().unwrap_or("Untitled").to_string();
            let html = data["body"]["storage"]["value"].as_str().unwrap_or("");
            return Ok(FetchedPage {
                title,
                body_markdown: html_to_markdown(html),
            });
        }

        let v1_url = format!(
            "{}/rest/api/content/{}?expand=body.storage,version",
            self.wiki_base, page_id
        );
        let data = self.get_json(&v1_url).await.map_err(|e| match e {
            FetchError::BadStatus { status, .. } => FetchError::BadStatus {
                url: source_url.to_string(),
                status,
            },
            other => other,
        })?;
        let title = data["title"].as_str().unwrap_or("Untitled").to_string();
        let html = data["body"]["storage"]["value"].as_str().unwrap_or("");
        Ok(FetchedPage {
            title,
            body_markdown: html_to_markdown(html),
        })
    }

    async fn fetch_jira_issue(&self, source_url: &str, key: &str) -> Result<FetchedPage, FetchError> {
        let issue_url = format!(
            "{}/rest/api/3/issue/{}?expand=renderedFields,fields",
            self.root_base, key
        );
        let data = self.get_json(&issue_url).await.map_err(|e| match e {
            FetchError::BadStatus { status, .. } => FetchError::BadStatus {
                url: source_url.to_string(),
                status,
            },
            other => other,
        })?;

        let fields = &data["fields"];
        let summary = fields["summary"].as_str().unwrap_or(key).to_string();
        let html_desc = data["renderedFields"]["description"].as_str().unwrap_or("");
        let md_desc = html_to_markdown(html_desc);
        let issuetype = fields["issuetype"]["name"].as_str().unwrap_or("Issue");
        let status = fields["status"]["name"].as_str().unwrap_or("Unknown");
        let project = fields["project"]["key"].as_str().unwrap_or("");
        let labels: Vec<&str> = fields["labels"]
            .as_array()
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let labels_md = if labels.is_empty() {
            "(none)".to_string()
        } else {
            labels.join(", ")
        };

        let body_markdown = format!(
            "# Jira Issue\n\n\
             - Link: {source_url}\n\
             - Key: {key}\n\
             - Project: {project}\n\
             - Type: {issuetype}\n\
             - Status: {status}\n\
             - Labels: {labels_md}\n\n\
             ## Summary\n\n{summary}\n\n\
             ## Description\n\n{}\n",
            if md_desc.trim().is_empty() {
                "_No description_"
            } else {
                md_desc.trim()
            }
        );

        Ok(FetchedPage {
            title: summary,
            body_markdown,
        })
    }
}

#[async_trait]
impl ContentFetcher for ConfluenceFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        if let Some(key) = extract_jira_key(url) {
            return self.fetch_jira_issue(url, &key).await;
        }
        if let Some(page_id) = extract_page_id(url) {
            return self.fetch_confluence_page(url, &page_id).await;
        }
        Err(FetchError::UnrecognizedUrl {
            url: url.to_string(),
        })
    }
}

/// Strip a trailing `/wiki` and trailing slashes off the configured site URL.
pub fn normalize_root_base(raw: &str) -> Result<String, FetchError> {
    let parsed = Url::parse(raw).map_err(|e| FetchError::RequestFailed {
        url: raw.to_string(),
        reason: format!("ATLASSIAN_URL must be a full URL: {e}"),
    })?;
    if !parsed.has_host() {
        return Err(FetchError::RequestFailed {
            url: raw.to_string(),
            reason: "ATLASSIAN_URL must be a full URL".to_string(),
        });
    }
    let mut path = parsed.path().trim_end_matches('/').to_string();
    if path.ends_with("/wiki") {
        path.truncate(path.len() - "/wiki".len());
    }
    let host = parsed.host_str().unwrap_or_default();
    let port = parsed
        .port()
        .map(|p| format!(":{p}"))
        .unwrap_or_default();
    Ok(format!("{}://{host}{port}{path}", parsed.scheme())
        .trim_end_matches('/')
        .to_string())
}

/// Extract a Jira issue key from a `/browse/KEY-123` URL.
pub fn extract_jira_key(url: &str) -> Option<String> {
    let re = Regex::new(r"(?i)/browse/([A-Z][A-Z0-9]+-\d+)").unwrap();
    re.captures(url)
        .map(|c| c[1].to_uppercase())
}

/// Extract a Confluence page id from the URL forms users paste.
pub fn extract_page_id(url: &str) -> Option<String> {
    let patterns = [
        r"[?&]pageId=(\d+)",
        r"/pages/(\d+)(?:/|$)",
        r"/pages/viewpage\.action.*?[?&]pageId=(\d+)",
        r"/spaces/.+?/pages/(\d+)(?:/|$)",
    ];
    for pattern in patterns {
        let re = Regex::new(pattern).unwrap();
        if let Some(c) = re.captures(url) {
            return Some(c[1].to_string());
        }
    }
    None
}

/// Flatten storage-format HTML to readable markdown-ish text.
///
/// Tag-strip with minimal entity decoding. Style and script blocks are
/// removed wholesale.
pub fn html_to_markdown(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }

    let block_re = Regex::new(r"(?is)<(style|script)\b.*?</(style|script)>").unwrap();
    let without_blocks = block_re.replace_all(html, "");

    // Line breaks for the block-level tags that matter for readability.
    let break_re = Regex::new(r"(?i)</(p|div|h[1-6]|li|tr|table)>|<br\s*/?>").unwrap();
    let with_breaks = break_re.replace_all(&without_blocks, "\n");

    let tag_re = Regex::new(r"</?[^>]+>").unwrap();
    let text = tag_re.replace_all(&with_breaks, "");

    let decoded = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    // Collapse runs of blank lines left behind by stripped markup.
    let blank_re = Regex::new(r"\n{3,}").unwrap();
    blank_re.replace_all(decoded.trim(), "\n\n").to_string()
}
