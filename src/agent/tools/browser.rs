use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::node::Node;
use scraper::{ElementRef, Html};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::agent::inference::{ChatMessage, ChatModel, ChatRequest, Embedder};
use crate::agent::splitter::TextSplitter;
use crate::agent::tool_registry::{input_text, Tool};

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36";
const CHUNK_SIZE: usize = 2000;
const CHUNK_OVERLAP: usize = 200;
const CONTEXT_CHUNKS: usize = 4;

const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "head", "svg", "iframe", "template"];
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "tr", "table",
    "section", "article", "header", "footer", "nav", "main", "aside", "blockquote", "pre",
];

pub struct WebBrowserTool {
    client: Client,
    model: Arc<dyn ChatModel>,
    embedder: Arc<dyn Embedder>,
    model_name: String,
    temperature: f32,
    splitter: TextSplitter,
}

impl WebBrowserTool {
    pub fn new(
        model: Arc<dyn ChatModel>,
        embedder: Arc<dyn Embedder>,
        model_name: &str,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build browser HTTP client")?;
        Ok(Self {
            client,
            model,
            embedder,
            model_name: model_name.to_string(),
            temperature,
            splitter: TextSplitter::new(CHUNK_SIZE, CHUNK_OVERLAP),
        })
    }

    async fn fetch(&self, url: &Url) -> Result<String> {
        let resp = self
            .client
            .get(url.as_str())
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml,*/*;q=0.8")
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.5")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("http response {}", status.as_u16()));
        }
        Ok(resp.text().await?)
    }

    /// Picks the context for `task` out of the page text and asks the browser model about it.
    async fn answer(&self, text: &str, task: &str) -> Result<String> {
        let chunks = self.splitter.split_text(text);
        let context = if task.is_empty() {
            chunks.into_iter().take(CONTEXT_CHUNKS).collect::<Vec<_>>()
        } else {
            self.most_relevant(chunks, task).await?
        };

        let prompt = build_prompt(&context.join("\n"), task);
        let messages = [ChatMessage::user(prompt)];
        let response = self
            .model
            .complete(ChatRequest {
                model: &self.model_name,
                messages: &messages,
                tools: &[],
                temperature: self.temperature,
            })
            .await?;
        Ok(response.content)
    }

    async fn most_relevant(&self, chunks: Vec<String>, task: &str) -> Result<Vec<String>> {
        if chunks.len() <= CONTEXT_CHUNKS {
            return Ok(chunks);
        }

        let mut inputs = Vec::with_capacity(chunks.len() + 1);
        inputs.push(task.to_string());
        inputs.extend(chunks.iter().cloned());
        let vectors = self.embedder.embed(&inputs).await?;
        let (query, candidates) = vectors
            .split_first()
            .ok_or_else(|| anyhow!("no embeddings returned"))?;

        let mut scored: Vec<(f32, String)> = candidates
            .iter()
            .map(|v| cosine_similarity(query, v))
            .zip(chunks)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(CONTEXT_CHUNKS)
            .map(|(_, chunk)| chunk)
            .collect())
    }
}

#[async_trait]
impl Tool for WebBrowserTool {
    fn name(&self) -> &str {
        "web-browser"
    }

    fn description(&self) -> &str {
        "useful for when you need to find something on or summarize a webpage. input should be a comma separated list of \"ONE valid http URL including protocol\",\"what you want to find on the page or empty string for a summary\"."
    }

    async fn execute(&self, args: &Value) -> Result<String> {
        let (raw_url, task) = parse_input(&input_text(args));
        let url = match Url::parse(&raw_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            Ok(url) => return Ok(format!("Unsupported URL scheme: {}", url.scheme())),
            Err(e) => return Ok(format!("Invalid URL \"{}\": {}", raw_url, e)),
        };

        info!(url = %url, summary = task.is_empty(), "Browsing page");
        let html = match self.fetch(&url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(url = %url, "Failed to fetch page: {}", e);
                return Ok(e.to_string());
            }
        };

        let text = extract_text(&html, &url);
        debug!(url = %url, chars = text.chars().count(), "Extracted page text");
        self.answer(&text, &task).await
    }
}

/// `"https://example.com/","find the price"` → (`https://example.com`, `find the price`).
pub fn parse_input(input: &str) -> (String, String) {
    let (url, task) = input.split_once(',').unwrap_or((input, ""));
    (clean_part(url), clean_part(task))
}

fn clean_part(part: &str) -> String {
    let part = part.trim();
    let part = part.strip_prefix('"').unwrap_or(part);
    let part = part.strip_suffix('"').unwrap_or(part);
    let part = part.strip_suffix('/').unwrap_or(part);
    part.trim().to_string()
}

pub fn build_prompt(context: &str, task: &str) -> String {
    let ask = if task.is_empty() { "a summary" } else { task };
    format!(
        "Text:{}\n\nI need {} from the above text, also provide up to 5 markdown links from within that would be of interest (always including URL and text). Links should be provided, if present, in markdown syntax as a list under the heading \"Relevant Links:\".",
        context, ask
    )
}

/// Readable page text. Anchors become `[text](absolute url)`.
pub fn extract_text(html: &str, base: &Url) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();
    walk(document.root_element(), base, &mut out);
    normalize_whitespace(&out)
}

fn walk(element: ElementRef<'_>, base: &Url, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                let Some(child) = ElementRef::wrap(child) else {
                    continue;
                };
                let tag = child.value().name();
                if SKIPPED_TAGS.contains(&tag) {
                    continue;
                }
                if tag == "a" {
                    if let Some(link) = render_link(child, base) {
                        out.push_str(&link);
                        continue;
                    }
                }

                let block = BLOCK_TAGS.contains(&tag);
                if block {
                    out.push('\n');
                }
                walk(child, base, out);
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

fn render_link(anchor: ElementRef<'_>, base: &Url) -> Option<String> {
    let href = anchor.value().attr("href")?;
    let text = anchor.text().collect::<Vec<_>>().join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return None;
    }
    let target = base.join(href).ok()?;
    Some(format!(" [{}]({}) ", text, target))
}

fn normalize_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() && lines.last().map_or(true, |l| l.is_empty()) {
            continue;
        }
        lines.push(line);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::agent::error::Result as AgentResult;
    use crate::agent::inference::ModelResponse;

    #[test]
    fn input_is_url_then_task() {
        assert_eq!(
            parse_input("\"https://example.com/\",\"find the price, in euros\""),
            ("https://example.com".to_string(), "find the price, in euros".to_string())
        );
        assert_eq!(
            parse_input("https://example.com/docs/"),
            ("https://example.com/docs".to_string(), String::new())
        );
        assert_eq!(
            parse_input("https://example.com,\"\""),
            ("https://example.com".to_string(), String::new())
        );
    }

    #[test]
    fn text_extraction_renders_links_and_skips_scripts() {
        let html = r#"<html><head><title>T</title><style>p{}</style></head>
            <body><h1>Heading</h1><script>var x = 1;</script>
            <p>Read the <a href="/docs/intro">intro   guide</a> now.</p>
            <ul><li>one</li><li>two</li></ul></body></html>"#;
        let base = Url::parse("https://example.com/start").unwrap();
        let text = extract_text(html, &base);

        assert!(text.contains("Heading"));
        assert!(text.contains("[intro guide](https://example.com/docs/intro)"));
        assert!(text.contains("one\n"));
        assert!(!text.contains("var x"));
        assert!(!text.contains("p{}"));
        assert!(!text.contains("\n\n\n"));
    }

    #[test]
    fn prompt_asks_for_summary_without_task() {
        let prompt = build_prompt("ctx", "");
        assert!(prompt.starts_with("Text:ctx\n\nI need a summary from the above text"));
        assert!(prompt.ends_with("under the heading \"Relevant Links:\"."));
        assert!(build_prompt("ctx", "the price").contains("I need the price from"));
    }

    #[test]
    fn cosine_similarity_handles_zero_vectors() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    struct RecordingModel {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatModel for RecordingModel {
        async fn stream_chat(
            &self,
            request: ChatRequest<'_>,
            _on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
        ) -> AgentResult<ModelResponse> {
            self.complete(request).await
        }

        async fn complete(&self, request: ChatRequest<'_>) -> AgentResult<ModelResponse> {
            let prompt = request.messages[0].content.clone().unwrap_or_default();
            self.prompts.lock().unwrap().push(prompt);
            Ok(ModelResponse {
                content: "answer".to_string(),
                ..ModelResponse::default()
            })
        }
    }

    /// Scores a chunk by how often it mentions "rust".
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, inputs: &[String]) -> AgentResult<Vec<Vec<f32>>> {
            Ok(inputs
                .iter()
                .map(|text| {
                    let hits = text.matches("rust").count() as f32;
                    vec![hits, 1.0]
                })
                .collect())
        }
    }

    fn tool(model: Arc<RecordingModel>) -> WebBrowserTool {
        WebBrowserTool::new(
            model,
            Arc::new(KeywordEmbedder),
            "browser-model",
            0.4,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn task_context_is_ranked_by_similarity() {
        let model = Arc::new(RecordingModel {
            prompts: Mutex::new(Vec::new()),
        });
        let browser = tool(model.clone());

        let filler = "lorem ipsum ".repeat(200);
        let page = format!(
            "{filler}\n\n{filler}\n\n{filler}\n\n{filler}\n\n{filler}\n\nrust rust rust rust rust"
        );
        assert_eq!(browser.answer(&page, "rust").await.unwrap(), "answer");

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].starts_with("Text:rust rust rust"));
        assert!(prompts[0].contains("I need rust from the above text"));
    }
}
