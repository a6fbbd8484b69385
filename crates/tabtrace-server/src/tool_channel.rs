//! Retrieval tool channel
//!
//! Line-delimited JSON over stdio: each line in is `{"name":...,"arguments":{...}}`,
//! each line out is `{"result":...}` or `{"error":"..."}`. Deliberately not
//! JSON-RPC — there's no method dispatch table to version, just two read-only
//! operations external agents call directly.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabtrace_core::embeddings::Embedder;
use tabtrace_core::vectorstore::VectorStore;

#[derive(Deserialize)]
struct ToolRequest {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ToolResponse {
    Result { result: Value },
    Error { error: String },
}

#[derive(Deserialize)]
struct SemanticSearchArgs {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    10
}

#[derive(Deserialize)]
struct GetContentArgs {
    id: String,
}

pub struct ToolChannel {
    vectors: Arc<VectorStore>,
    embeddings: Arc<dyn Embedder>,
}

impl ToolChannel {
    pub fn new(vectors: Arc<VectorStore>, embeddings: Arc<dyn Embedder>) -> Self {
        Self { vectors, embeddings }
    }

    /// Read requests from `stdin` and write responses to `stdout`, one line
    /// at a time, until stdin closes.
    pub fn run(&self) -> io::Result<()> {
        let stdin = io::stdin();
        let stdout = io::stdout();
        let mut stdout = stdout.lock();

        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    tracing::error!(error = %e, "failed to read tool channel line");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let response = self.dispatch(&line);
            let json = serde_json::to_string(&response).unwrap_or_else(|e| {
                tracing::error!(error = %e, "failed to serialize tool response");
                r#"{"error":"internal error"}"#.to_string()
            });
            writeln!(stdout, "{json}")?;
            stdout.flush()?;
        }
        Ok(())
    }

    fn dispatch(&self, line: &str) -> ToolResponse {
        let request: ToolRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => return ToolResponse::Error { error: format!("invalid request: {e}") },
        };

        match request.name.as_str() {
            "semantic_search" => self.semantic_search(request.arguments),
            "get_content" => self.get_content(request.arguments),
            other => ToolResponse::Error { error: format!("unknown tool: {other}") },
        }
    }

    fn semantic_search(&self, arguments: Value) -> ToolResponse {
        let args: SemanticSearchArgs = match serde_json::from_value(arguments) {
            Ok(a) => a,
            Err(e) => return ToolResponse::Error { error: format!("invalid arguments: {e}") },
        };

        let embedding = match self.embeddings.embed(&args.query) {
            Ok(e) => e,
            Err(e) => return ToolResponse::Error { error: format!("embedding failed: {e}") },
        };

        match self.vectors.knn(&embedding, args.limit) {
            Ok(hits) => ToolResponse::Result {
                result: serde_json::to_value(hits).unwrap_or(Value::Null),
            },
            Err(e) => ToolResponse::Error { error: format!("search failed: {e}") },
        }
    }

    fn get_content(&self, arguments: Value) -> ToolResponse {
        let args: GetContentArgs = match serde_json::from_value(arguments) {
            Ok(a) => a,
            Err(e) => return ToolResponse::Error { error: format!("invalid arguments: {e}") },
        };

        match self.vectors.get(&args.id) {
            Ok(Some(doc)) => ToolResponse::Result {
                result: serde_json::json!({
                    "id": doc.key,
                    "url": doc.metadata.url,
                    "title": doc.metadata.title,
                    "content": doc.content,
                }),
            },
            Ok(None) => ToolResponse::Error { error: format!("unknown id: {}", args.id) },
            Err(e) => ToolResponse::Error { error: format!("lookup failed: {e}") },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabtrace_core::embeddings::EmbeddingError;
    use tabtrace_core::model::{VectorDocument, VectorMetadata};

    struct FixedEmbedder;

    impl Embedder for FixedEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![0.1, 0.2, 0.3])
        }
    }

    fn channel() -> ToolChannel {
        let dir = tempfile::tempdir().unwrap();
        let vectors = Arc::new(VectorStore::open(&dir.path().join("vectors.db")).unwrap());
        vectors
            .put(&VectorDocument {
                key: "v1".to_string(),
                content: "full page text".to_string(),
                embedding: vec![0.1, 0.2, 0.3],
                metadata: VectorMetadata {
                    url: "https://example.com".to_string(),
                    title: "Example".to_string(),
                    page_loaded_at: chrono::Utc::now(),
                },
            })
            .unwrap();
        // leak the tempdir for the duration of the test process
        std::mem::forget(dir);
        ToolChannel::new(vectors, Arc::new(FixedEmbedder))
    }

    #[test]
    fn get_content_returns_the_stored_document() {
        let channel = channel();
        let response = channel.dispatch(r#"{"name":"get_content","arguments":{"id":"v1"}}"#);
        match response {
            ToolResponse::Result { result } => assert_eq!(result["url"], "https://example.com"),
            ToolResponse::Error { error } => panic!("unexpected error: {error}"),
        }
    }

    #[test]
    fn get_content_reports_unknown_id() {
        let channel = channel();
        let response = channel.dispatch(r#"{"name":"get_content","arguments":{"id":"missing"}}"#);
        assert!(matches!(response, ToolResponse::Error { .. }));
    }

    #[test]
    fn semantic_search_finds_the_nearest_document() {
        let channel = channel();
        let response = channel.dispatch(r#"{"name":"semantic_search","arguments":{"query":"page"}}"#);
        match response {
            ToolResponse::Result { result } => assert_eq!(result[0]["id"], "v1"),
            ToolResponse::Error { error } => panic!("unexpected error: {error}"),
        }
    }

    #[test]
    fn unknown_tool_name_is_an_error() {
        let channel = channel();
        let response = channel.dispatch(r#"{"name":"delete_everything","arguments":{}}"#);
        assert!(matches!(response, ToolResponse::Error { .. }));
    }
}
