//! Dual-store write coordinator
//!
//! For a visit whose classifier decision is `should_process = true`, the
//! vector document must land before the structured row — if the structured
//! write then fails, the page id is logged so a restart can retry it
//! without re-embedding.

use std::sync::Arc;

use crate::embeddings::Embedder;
use crate::model::{PageSession, Visit, VectorDocument, VectorMetadata};
use crate::storage::Storage;
use crate::vectorstore::VectorStore;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
    #[error("vector store error: {0}")]
    VectorStore(#[from] crate::vectorstore::VectorStoreError),
    #[error("embedding error: {0}")]
    Embedding(#[from] crate::embeddings::EmbeddingError),
}

pub struct Coordinator {
    storage: Arc<Storage>,
    vectors: Arc<VectorStore>,
    embeddings: Arc<dyn Embedder>,
}

impl Coordinator {
    pub fn new(storage: Arc<Storage>, vectors: Arc<VectorStore>, embeddings: Arc<dyn Embedder>) -> Self {
        Self {
            storage,
            vectors,
            embeddings,
        }
    }

    /// Persist `page`. When `page.should_process`, writes the vector
    /// document first and logs the id as unreconciled if the structured
    /// write then fails. When not, writes only the lightweight structured
    /// row.
    pub async fn persist(&self, visit: &Visit, page: &PageSession) -> Result<(), CoordinatorError> {
        self.storage.insert_tree(&crate::model::Tree {
            tree_id: page.tree_id.clone(),
            root_page_id: page.tree_id.trim_start_matches("tree-").to_string(),
        })?;

        if !page.should_process {
            self.storage.insert_page_session(page)?;
            return Ok(());
        }

        let embedding = self.embeddings.embed(&visit.raw_content)?;
        let doc = VectorDocument {
            key: page.id.clone(),
            content: visit.raw_content.clone(),
            embedding,
            metadata: VectorMetadata {
                url: page.url.clone(),
                title: page.title.clone(),
                page_loaded_at: page.page_loaded_at,
            },
        };
        self.vectors.put(&doc)?;

        match self.storage.insert_page_session(page) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(page_id = %page.id, error = %e, "structured write failed after vector write; logging for retry");
                self.storage.record_unreconciled(&page.id)?;
                Err(CoordinatorError::Storage(e))
            }
        }
    }

    /// Overwrite a reconnected orphan's recorded `group_id` once its parent
    /// arrives and the reconciler resolves the correct tab group.
    pub fn overwrite_group(&self, page_id: &str, group_id: &str) -> Result<(), CoordinatorError> {
        self.storage.update_group_id(page_id, group_id)?;
        Ok(())
    }

    /// Replay ids logged by a prior, partially-failed `persist` call. Call
    /// once at startup before the consumer starts draining the queue.
    pub fn replay_unreconciled(&self) -> Result<Vec<String>, CoordinatorError> {
        let ids = self.storage.list_unreconciled()?;
        let mut retried = Vec::new();
        for id in ids {
            match self.storage.get_page_session(&id) {
                Ok(Some(_)) => {
                    // Already landed by some other path; just clear the log entry.
                    self.storage.remove_unreconciled(&id)?;
                }
                Ok(None) => {
                    tracing::warn!(page_id = %id, "unreconciled id has no page session; the vector document is orphaned until re-ingested");
                    retried.push(id);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(retried)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingError;
    use crate::ids::tree_id_for_root;
    use crate::model::{Classification, ClassifierDecision};
    use chrono::Utc;

    struct FixedEmbedder;

    impl Embedder for FixedEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![0.1; 384])
        }
    }

    fn coordinator() -> (Coordinator, Arc<Storage>, Arc<VectorStore>) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(&dir.path().join("structured.db")).unwrap());
        let vectors = Arc::new(VectorStore::open(&dir.path().join("vectors.db")).unwrap());
        let embeddings: Arc<dyn Embedder> = Arc::new(FixedEmbedder);
        (
            Coordinator::new(storage.clone(), vectors.clone(), embeddings),
            storage,
            vectors,
        )
    }

    fn visit() -> Visit {
        Visit {
            id: "v1".to_string(),
            url: "https://example.com".to_string(),
            page_loaded_at: Utc::now(),
            tab_id: "tab1".to_string(),
            opener_tab_id: None,
            group_id: "g1".to_string(),
            referrer_url: None,
            referrer_timestamp: None,
            raw_content: "full page text".to_string(),
            title: "Example".to_string(),
        }
    }

    #[tokio::test]
    async fn should_process_writes_both_stores() {
        let (coordinator, storage, vectors) = coordinator();
        let v = visit();
        let decision = ClassifierDecision {
            should_process: true,
            page_type: Classification::Knowledge,
            confidence: 0.9,
            reasoning: "x".to_string(),
        };
        let page = PageSession::new(&v, tree_id_for_root(&v.id), None, &decision, Utc::now());

        coordinator.persist(&v, &page).await.unwrap();

        assert!(storage.get_page_session("v1").unwrap().is_some());
        assert!(vectors.get("v1").unwrap().is_some());
    }

    #[tokio::test]
    async fn should_not_process_writes_only_structured_row() {
        let (coordinator, storage, vectors) = coordinator();
        let v = visit();
        let decision = ClassifierDecision {
            should_process: false,
            page_type: Classification::Leisure,
            confidence: 0.2,
            reasoning: "x".to_string(),
        };
        let page = PageSession::new(&v, tree_id_for_root(&v.id), None, &decision, Utc::now());

        coordinator.persist(&v, &page).await.unwrap();

        assert!(storage.get_page_session("v1").unwrap().is_some());
        assert!(vectors.get("v1").unwrap().is_none());
    }
}
