use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::error::{AgentError, Result};
use super::inference::Embedder;
use super::splitter::{LineRange, TextSplitter};

const API_KEY_HEADER: &str = "X-TYPESENSE-API-KEY";

/// Source tag written on every memory document.
pub const MEMORY_SOURCE: &str = "chat";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryDocument {
    pub vec: Vec<f32>,
    pub text: String,
    pub source: String,
    /// `{"lines":{"from":..,"to":..}}`, stored as a JSON string.
    pub loc: String,
    #[serde(rename = "userId")]
    pub user_id: String,
}

impl MemoryDocument {
    pub fn new(user_id: &str, text: String, lines: LineRange, vec: Vec<f32>) -> Self {
        Self {
            vec,
            text,
            source: MEMORY_SOURCE.to_string(),
            loc: json!({ "lines": lines }).to_string(),
            user_id: user_id.to_string(),
        }
    }
}

/// Minimal Typesense REST client for one vector collection.
pub struct TypesenseClient {
    client: Client,
    base_url: String,
    api_key: String,
    collection: String,
    ready: OnceCell<()>,
}

impl TypesenseClient {
    pub fn new(base_url: &str, api_key: &str, collection: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Tool(format!("Failed to create Typesense client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            collection: collection.to_string(),
            ready: OnceCell::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Creates the collection on first use; later calls are free.
    pub async fn ensure_collection(&self, dimensions: usize) -> Result<()> {
        self.ready
            .get_or_try_init(|| async {
                let resp = self
                    .client
                    .get(self.url(&format!("/collections/{}", self.collection)))
                    .header(API_KEY_HEADER, &self.api_key)
                    .send()
                    .await?;

                match resp.status() {
                    status if status.is_success() => Ok::<(), AgentError>(()),
                    StatusCode::NOT_FOUND => {
                        info!(collection = %self.collection, dimensions, "Creating memory collection");
                        let resp = self
                            .client
                            .post(self.url("/collections"))
                            .header(API_KEY_HEADER, &self.api_key)
                            .json(&collection_schema(&self.collection, dimensions))
                            .send()
                            .await?;
                        // 409 means another request created it first.
                        if resp.status().is_success() || resp.status() == StatusCode::CONFLICT {
                            Ok(())
                        } else {
                            Err(typesense_error("create collection", resp).await)
                        }
                    }
                    _ => Err(typesense_error("read collection", resp).await),
                }
            })
            .await
            .map(|_| ())
    }

    /// Upserts documents and returns how many were accepted.
    pub async fn import(&self, documents: &[MemoryDocument]) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }
        let body = documents_jsonl(documents)?;
        let resp = self
            .client
            .post(self.url(&format!(
                "/collections/{}/documents/import?action=upsert",
                self.collection
            )))
            .header(API_KEY_HEADER, &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(typesense_error("import documents", resp).await);
        }
        parse_import_response(&resp.text().await?)
    }

    pub async fn vector_search(&self, vector: &[f32], k: usize, filter_by: &str) -> Result<Vec<String>> {
        let body = json!({
            "searches": [{
                "collection": self.collection,
                "q": "*",
                "vector_query": vector_query(vector, k),
                "filter_by": filter_by,
                "exclude_fields": "vec",
            }]
        });
        let resp = self
            .client
            .post(self.url("/multi_search"))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(typesense_error("search", resp).await);
        }
        let value: Value = resp.json().await?;
        parse_search_hits(&value)
    }
}

async fn typesense_error(action: &str, resp: reqwest::Response) -> AgentError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    AgentError::Tool(format!("Typesense {} failed ({}): {}", action, status, text))
}

pub fn collection_schema(name: &str, dimensions: usize) -> Value {
    json!({
        "name": name,
        "fields": [
            {"name": "vec", "type": "float[]", "num_dim": dimensions},
            {"name": "text", "type": "string"},
            {"name": "source", "type": "string", "optional": true},
            {"name": "loc", "type": "string", "optional": true, "index": false},
            {"name": "userId", "type": "string", "facet": true},
        ]
    })
}

pub fn vector_query(vector: &[f32], k: usize) -> String {
    let values: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    format!("vec:([{}], k:{})", values.join(","), k)
}

pub fn user_filter(user_id: &str) -> String {
    format!("userId:=`{}`", user_id)
}

fn documents_jsonl(documents: &[MemoryDocument]) -> Result<String> {
    let mut body = String::new();
    for doc in documents {
        body.push_str(&serde_json::to_string(doc)?);
        body.push('\n');
    }
    Ok(body)
}

/// Import answers with one JSON object per document; any failure fails the batch.
fn parse_import_response(body: &str) -> Result<usize> {
    let mut imported = 0;
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let value: Value = serde_json::from_str(line)?;
        if value.get("success").and_then(|v| v.as_bool()) == Some(true) {
            imported += 1;
        } else {
            let reason = value
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            return Err(AgentError::Tool(format!("Typesense rejected a document: {}", reason)));
        }
    }
    Ok(imported)
}

fn parse_search_hits(body: &Value) -> Result<Vec<String>> {
    let result = body
        .get("results")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .ok_or_else(|| AgentError::Tool("Typesense search returned no results".to_string()))?;
    if let Some(error) = result.get("error").and_then(|v| v.as_str()) {
        return Err(AgentError::Tool(format!("Typesense search failed: {}", error)));
    }

    Ok(result
        .get("hits")
        .and_then(|v| v.as_array())
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| hit.pointer("/document/text").and_then(|v| v.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default())
}

/// Per-user long-term memory: chunks are embedded and kept in Typesense.
pub struct VectorMemory {
    typesense: TypesenseClient,
    embedder: Arc<dyn Embedder>,
    splitter: TextSplitter,
    search_k: usize,
}

impl VectorMemory {
    pub fn new(
        typesense: TypesenseClient,
        embedder: Arc<dyn Embedder>,
        splitter: TextSplitter,
        search_k: usize,
    ) -> Self {
        Self {
            typesense,
            embedder,
            splitter,
            search_k,
        }
    }

    /// Texts of the closest stored chunks that belong to `user_id`.
    pub async fn search(&self, user_id: &str, query: &str) -> Result<Vec<String>> {
        let vectors = self.embedder.embed(&[query.to_string()]).await?;
        let Some(vector) = vectors.into_iter().next() else {
            return Ok(Vec::new());
        };
        self.typesense.ensure_collection(vector.len()).await?;

        let hits = self
            .typesense
            .vector_search(&vector, self.search_k, &user_filter(user_id))
            .await?;
        debug!(user = %user_id, hits = hits.len(), "Memory search finished");
        Ok(hits)
    }

    /// Splits, embeds and stores `text`; returns the number of chunks saved.
    pub async fn save(&self, user_id: &str, text: &str) -> Result<usize> {
        let chunks = self.splitter.create_chunks(text);
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        let dimensions = vectors.first().map(Vec::len).unwrap_or_default();
        self.typesense.ensure_collection(dimensions).await?;

        let documents: Vec<MemoryDocument> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vec)| MemoryDocument::new(user_id, chunk.text, chunk.lines, vec))
            .collect();
        let saved = self.typesense.import(&documents).await?;
        info!(user = %user_id, chunks = saved, "Saved to memory");
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_serialize_as_jsonl() {
        let doc = MemoryDocument::new(
            "u1",
            "remember this".to_string(),
            LineRange { from: 1, to: 2 },
            vec![0.5, 1.0],
        );
        let body = documents_jsonl(&[doc.clone(), doc]).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["userId"], "u1");
        assert_eq!(parsed["source"], MEMORY_SOURCE);
        assert_eq!(parsed["vec"][1], 1.0);
        assert_eq!(parsed["loc"], r#"{"lines":{"from":1,"to":2}}"#);
    }

    #[test]
    fn query_helpers_match_typesense_syntax() {
        assert_eq!(vector_query(&[0.25, -1.0], 4), "vec:([0.25,-1], k:4)");
        assert_eq!(user_filter("abc"), "userId:=`abc`");

        let schema = collection_schema("personal_chat_memory", 1536);
        assert_eq!(schema["name"], "personal_chat_memory");
        assert_eq!(schema["fields"][0]["num_dim"], 1536);
    }

    #[test]
    fn import_response_counts_successes() {
        assert_eq!(
            parse_import_response("{\"success\":true}\n{\"success\":true}\n").unwrap(),
            2
        );
        let err = parse_import_response("{\"success\":true}\n{\"success\":false,\"error\":\"bad vec\"}")
            .unwrap_err();
        assert!(err.to_string().contains("bad vec"));
    }

    #[test]
    fn search_hits_yield_document_text() {
        let body = json!({
            "results": [{
                "hits": [
                    {"document": {"text": "first"}, "vector_distance": 0.1},
                    {"document": {"text": "second"}, "vector_distance": 0.2},
                    {"document": {}}
                ]
            }]
        });
        assert_eq!(parse_search_hits(&body).unwrap(), vec!["first", "second"]);

        let failed = json!({"results": [{"error": "Could not find a field named `vec`", "code": 404}]});
        assert!(parse_search_hits(&failed).is_err());
        assert!(parse_search_hits(&json!({"results": [{}]})).unwrap().is_empty());
    }
}
