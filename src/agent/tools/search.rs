use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::agent::tool_registry::{input_text, Tool};

const CUSTOM_SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";
pub const NO_RESULTS: &str = "No good results found.";

pub struct GoogleSearchTool {
    client: Client,
    api_key: String,
    cse_id: String,
}

#[derive(Debug, Serialize, PartialEq)]
struct SearchResult {
    title: String,
    link: String,
    snippet: String,
}

impl GoogleSearchTool {
    pub fn new(api_key: &str, cse_id: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build search HTTP client")?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            cse_id: cse_id.to_string(),
        })
    }
}

#[async_trait]
impl Tool for GoogleSearchTool {
    fn name(&self) -> &str {
        "google-custom-search"
    }

    fn description(&self) -> &str {
        "a custom search engine. useful for when you need to answer questions about current events. input should be a search query. outputs a JSON array of results."
    }

    async fn execute(&self, args: &Value) -> Result<String> {
        let query = input_text(args);
        let url = Url::parse_with_params(
            CUSTOM_SEARCH_URL,
            &[
                ("key", self.api_key.as_str()),
                ("cx", self.cse_id.as_str()),
                ("q", query.as_str()),
            ],
        )?;

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            bail!("Got {} error from Google custom search", status);
        }
        let body: Value = resp.json().await?;
        format_results(&body)
    }
}

fn format_results(body: &Value) -> Result<String> {
    let results: Vec<SearchResult> = body
        .get("items")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    let field = |name: &str| {
                        item.get(name)
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string()
                    };
                    SearchResult {
                        title: field("title"),
                        link: field("link"),
                        snippet: field("snippet"),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    if results.is_empty() {
        return Ok(NO_RESULTS.to_string());
    }
    Ok(serde_json::to_string(&results)?)
}
