//! Memory-enhanced classifier pipeline
//!
//! Procedural rules, then the LM, then episodic adjustment, then
//! arbitration. Deterministic given the same rules, episodic snapshot and
//! LM response.

mod episodic;
pub mod lm;
mod rules;

use std::sync::Arc;

use crate::config::Config;
use crate::embeddings::Embedder;
use crate::model::{Classification, ClassifierDecision, Visit};
use crate::storage::Storage;

pub use lm::{LmClassifier, LmError, LmResponse, OpenAiClassifier, PooledLmClassifier, StaticClassifier};
pub use rules::{evaluate as evaluate_rules, ForcedDecision, RuleOutcome};

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
    #[error("embedding error: {0}")]
    Embedding(#[from] crate::embeddings::EmbeddingError),
}

/// Owns the pieces Stages 1-4 read from: the rule/correction store, the
/// embedding service and the pluggable LM client.
pub struct Pipeline {
    storage: Arc<Storage>,
    embeddings: Arc<dyn Embedder>,
    lm: Arc<dyn LmClassifier>,
    config: Config,
}

impl Pipeline {
    pub fn new(
        storage: Arc<Storage>,
        embeddings: Arc<dyn Embedder>,
        lm: Arc<dyn LmClassifier>,
        config: Config,
    ) -> Self {
        Self {
            storage,
            embeddings,
            lm,
            config,
        }
    }

    /// Run the full four-stage pipeline for `visit`, returning the decision
    /// the write coordinator acts on.
    pub async fn classify(&self, visit: &Visit, tab_group_size: usize) -> Result<ClassifierDecision, ClassifierError> {
        let rules = self.storage.list_procedural_rules()?;
        let stage1 = evaluate_rules(&rules, visit, tab_group_size);

        if let Some(forced) = stage1.forced {
            return Ok(match forced {
                ForcedDecision::AlwaysProcess => ClassifierDecision {
                    should_process: true,
                    page_type: Classification::Knowledge,
                    confidence: 1.0,
                    reasoning: "rule".to_string(),
                },
                ForcedDecision::NeverProcess => ClassifierDecision {
                    should_process: false,
                    page_type: Classification::Other,
                    confidence: 1.0,
                    reasoning: "rule".to_string(),
                },
            });
        }

        let content_first_2k: String = visit.raw_content.chars().take(2000).collect();
        let stage2 = self.lm.classify(&visit.url, &content_first_2k).await;

        let corrections = self.storage.list_episodic_corrections()?;
        let query_embedding = self.embeddings.embed(&visit.url)?;
        let stage3 = episodic::adjust(
            &corrections,
            &query_embedding,
            stage2.page_type,
            stage2.confidence,
            self.config.episodic_k,
            self.config.episodic_agreement_threshold,
        );

        let mut page_type = stage3.page_type;
        let mut confidence = stage3.confidence;

        if confidence < 0.5 {
            if let Some(prior) = stage1.prefer_type {
                page_type = prior;
            }
        }
        confidence = (confidence + stage1.confidence_boost).clamp(0.0, 1.0);

        let should_process =
            self.config.allowed_types.contains(&page_type) && confidence >= self.config.min_confidence;

        Ok(ClassifierDecision {
            should_process,
            page_type,
            confidence,
            reasoning: stage2.reasoning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingError;
    use chrono::Utc;

    struct FixedEmbedder(Vec<f32>);

    impl Embedder for FixedEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(self.0.clone())
        }
    }

    fn visit() -> Visit {
        Visit {
            id: "v1".to_string(),
            url: "https://docs.rs/tokio".to_string(),
            page_loaded_at: Utc::now(),
            tab_id: "tab1".to_string(),
            opener_tab_id: None,
            group_id: "g1".to_string(),
            referrer_url: None,
            referrer_timestamp: None,
            raw_content: "the tokio runtime docs".to_string(),
            title: "tokio - docs.rs".to_string(),
        }
    }

    fn storage() -> Arc<Storage> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(Storage::open(&dir.path().join("test.db")).unwrap())
    }

    #[tokio::test]
    async fn lm_accept_above_threshold_is_processed() {
        let lm = Arc::new(StaticClassifier(LmResponse {
            page_type: Classification::Knowledge,
            confidence: 0.9,
            reasoning: "solid docs".to_string(),
            should_process: true,
        }));
        let embedder = Arc::new(FixedEmbedder(vec![0.1, 0.2, 0.3]));
        let pipeline = Pipeline::new(storage(), embedder, lm, Config::default());
        let decision = pipeline.classify(&visit(), 1).await.unwrap();
        assert!(decision.should_process);
        assert_eq!(decision.page_type, Classification::Knowledge);
    }

    #[tokio::test]
    async fn low_confidence_leisure_is_rejected() {
        let lm = Arc::new(StaticClassifier(LmResponse {
            page_type: Classification::Leisure,
            confidence: 0.9,
            reasoning: "entertainment".to_string(),
            should_process: true,
        }));
        let embedder = Arc::new(FixedEmbedder(vec![0.1, 0.2, 0.3]));
        let pipeline = Pipeline::new(storage(), embedder, lm, Config::default());
        let decision = pipeline.classify(&visit(), 1).await.unwrap();
        assert!(!decision.should_process);
        assert_eq!(decision.page_type, Classification::Leisure);
    }
}
