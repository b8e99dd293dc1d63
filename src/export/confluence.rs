//! Confluence export sink — creates a child page under a parent page.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::ExportSink;
use crate::config::AtlassianConfig;
use crate::error::ExportError;
use crate::fetch::confluence::{extract_page_id, normalize_root_base};

/// Request timeout for one Atlassian REST call.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Publishes estimate pages via the Confluence content REST API.
pub struct ConfluenceExporter {
    client: reqwest::Client,
    email: String,
    api_token: String,
    wiki_base: String,
}

impl ConfluenceExporter {
    pub fn new(config: &AtlassianConfig) -> Result<Self, ExportError> {
        let root_base =
            normalize_root_base(&config.base_url).map_err(|e| ExportError::BadDestination {
                destination: config.base_url.clone(),
                reason: e.to_string(),
            })?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ExportError::RequestFailed {
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            email: config.email.clone(),
            api_token: config.api_token.clone(),
            wiki_base: format!("{root_base}/wiki"),
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value, ExportError> {
        let resp = self
            .client
            .get(url)
            .basic_auth(&self.email, Some(&self.api_token))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ExportError::RequestFailed {
                reason: e.to_string(),
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ExportError::RequestFailed {
                reason: format!("{url} returned status {status}"),
            });
        }
        resp.json().await.map_err(|e| ExportError::RequestFailed {
            reason: e.to_string(),
        })
    }

    /// Find an existing page with this title in the space, if any.
    async fn find_existing(&self, space_key: &str, title: &str) -> Result<Option<Value>, ExportError> {
        let url = format!(
            "{}/rest/api/content?spaceKey={}&title={}&expand=version",
            self.wiki_base,
            space_key,
            urlencode(title)
        );
        let data = self.get_json(&url).await?;
        Ok(data["results"].as_array().and_then(|r| r.first().cloned()))
    }

    fn page_url(&self, data: &Value) -> String {
        match data["_links"]["webui"].as_str() {
            Some(webui) => format!("{}{}", self.wiki_base, webui),
            None => format!(
                "{}/pages/{}",
                self.wiki_base,
                data["id"].as_str().unwrap_or_default()
            ),
        }
    }
}

#[async_trait]
impl ExportSink for ConfluenceExporter {
    async fn create(
        &self,
        destination: &str,
        title: &str,
        body_markdown: &str,
        overwrite: bool,
    ) -> Result<String, ExportError> {
        let parent_id = extract_page_id(destination).ok_or_else(|| ExportError::BadDestination {
            destination: destination.to_string(),
            reason: "could not extract a Confluence page id".to_string(),
        })?;

        // Resolve the parent's space; new pages land next to it.
        let parent_url = format!(
            "{}/rest/api/content/{}?expand=space",
            self.wiki_base, parent_id
        );
        let parent = self.get_json(&parent_url).await?;
        let space_key = parent["space"]["key"]
            .as_str()
            .ok_or_else(|| ExportError::BadDestination {
                destination: destination.to_string(),
                reason: "parent page has no space key".to_string(),
            })?
            .to_string();

        let storage_body = markdown_to_storage(body_markdown);
        let existing = self.find_existing(&space_key, title).await?;

        if let Some(page) = existing {
            if !overwrite {
                return Err(ExportError::Conflict {
                    title: title.to_string(),
                });
            }
            let id = page["id"].as_str().unwrap_or_default().to_string();
            let next_version = page["version"]["number"].as_i64().unwrap_or(1) + 1;
            let update = json!({
                "id": id,
                "type": "page",
                "title": title,
                "space": {"key": space_key},
                "version": {"number": next_version},
                "body": {"storage": {"value": storage_body, "representation": "storage"}},
            });
            let url = format!("{}/rest/api/content/{}", self.wiki_base, id);
            let resp = self
                .client
                .put(&url)
                .basic_auth(&self.email, Some(&self.api_token))
                .json(&update)
                .send()
                .await
                .map_err(|e| ExportError::RequestFailed {
                    reason: e.to_string(),
                })?;
            if !resp.status().is_success() {
                return Err(ExportError::RequestFailed {
                    reason: format!("update returned status {}", resp.status()),
                });
            }
            let data: Value = resp.json().await.map_err(|e| ExportError::RequestFailed {
                reason: e.to_string(),
            })?;
            return Ok(self.page_url(&data));
        }

        let create = json!({
            "type": "page",
            "title": title,
            "space": {"key": space_key},
            "ancestors": [{"id": parent_id}],
            "body": {"storage": {"value": storage_body, "representation": "storage"}},
        });
        let url = format!("{}/rest/api/content", self.wiki_base);
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.email, Some(&self.api_token))
            .json(&create)
            .send()
            .await
            .map_err(|e| ExportError::RequestFailed {
                reason: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(ExportError::RequestFailed {
                reason: format!("create returned status {}", resp.status()),
            });
        }
        let data: Value = resp.json().await.map_err(|e| ExportError::RequestFailed {
            reason: e.to_string(),
        })?;
        Ok(self.page_url(&data))
    }
}

/// Wrap the markdown in storage format.
///
/// The documents stay readable as preformatted text; rendering markdown to
/// rich Confluence markup is out of contract.
fn markdown_to_storage(markdown: &str) -> String {
    let escaped = markdown
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    format!("<pre>{escaped}</pre>")
}

fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            b' ' => out.push_str("%20"),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
