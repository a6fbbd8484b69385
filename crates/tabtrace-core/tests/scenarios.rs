//! End-to-end scenario tests exercising the full engine: reconciler,
//! classifier pipeline and write coordinator together, against a temporary
//! on-disk structured store and vector store.

use std::sync::Arc;

use chrono::Utc;
use tabtrace_core::classifier::{LmResponse, Pipeline, StaticClassifier};
use tabtrace_core::config::Config;
use tabtrace_core::coordinator::Coordinator;
use tabtrace_core::embeddings::{EmbeddingError, Embedder};
use tabtrace_core::engine::Engine;
use tabtrace_core::model::{
    Classification, EpisodicCorrection, ProceduralRule, RuleAction, RuleCondition, RuleField, Visit,
};
use tabtrace_core::queue;
use tabtrace_core::reconciler::Reconciler;
use tabtrace_core::storage::Storage;
use tabtrace_core::vectorstore::VectorStore;

struct FixedEmbedder(Vec<f32>);

impl Embedder for FixedEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.0.clone())
    }
}

fn visit(id: &str, tab_id: &str, opener: Option<&str>, group_id: &str, url: &str) -> Visit {
    Visit {
        id: id.to_string(),
        url: url.to_string(),
        page_loaded_at: Utc::now(),
        tab_id: tab_id.to_string(),
        opener_tab_id: opener.map(str::to_string),
        group_id: group_id.to_string(),
        referrer_url: None,
        referrer_timestamp: None,
        raw_content: "page text".to_string(),
        title: "title".to_string(),
    }
}

fn harness(dir: &std::path::Path, lm: LmResponse) -> (Engine, Arc<Storage>, Arc<VectorStore>) {
    let storage = Arc::new(Storage::open(&dir.join("structured.db")).unwrap());
    let vectors = Arc::new(VectorStore::open(&dir.join("vectors.db")).unwrap());
    let embeddings: Arc<dyn Embedder> = Arc::new(FixedEmbedder(vec![0.1; 384]));
    let lm = Arc::new(StaticClassifier(lm));
    let reconciler = Reconciler::new(storage.clone());
    let pipeline = Pipeline::new(storage.clone(), embeddings.clone(), lm, Config::default());
    let coordinator = Coordinator::new(storage.clone(), vectors.clone(), embeddings);
    (Engine::new(reconciler, pipeline, coordinator), storage, vectors)
}

fn knowledge(confidence: f32) -> LmResponse {
    LmResponse {
        page_type: Classification::Knowledge,
        confidence,
        reasoning: "lm".to_string(),
        should_process: true,
    }
}

/// Scenario 1 — simple chain: three visits in the same tab, in order, all
/// classified knowledge. One tree, one root, two edges, three documents.
#[tokio::test]
async fn simple_chain() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, storage, vectors) = harness(dir.path(), knowledge(0.9));

    engine.process(visit("a", "tab1", None, "g1", "https://example.com/a")).await.unwrap();
    engine.process(visit("b", "tab1", None, "g1", "https://example.com/b")).await.unwrap();
    engine.process(visit("c", "tab1", None, "g1", "https://example.com/c")).await.unwrap();

    let a = storage.get_page_session("a").unwrap().unwrap();
    let b = storage.get_page_session("b").unwrap().unwrap();
    let c = storage.get_page_session("c").unwrap().unwrap();

    assert!(a.parent_page_id.is_none());
    assert_eq!(b.parent_page_id.as_deref(), Some("a"));
    assert_eq!(c.parent_page_id.as_deref(), Some("b"));
    assert_eq!(a.tree_id, b.tree_id);
    assert_eq!(b.tree_id, c.tree_id);

    for id in ["a", "b", "c"] {
        assert!(vectors.get(id).unwrap().is_some());
    }
}

/// Scenario 4 — rule override: a `never_process` rule on the URL host
/// short-circuits the LM, which would otherwise accept at high confidence.
#[tokio::test]
async fn rule_override_short_circuits_the_lm() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, storage, vectors) = harness(dir.path(), knowledge(0.9));

    storage
        .insert_procedural_rule(&ProceduralRule {
            id: "never-example".to_string(),
            priority: 100,
            condition: RuleCondition::Equals {
                field: RuleField::UrlHost,
                value: "example.com".to_string(),
            },
            action: RuleAction::NeverProcess,
        })
        .unwrap();

    engine
        .process(visit("v1", "tab1", None, "g1", "https://example.com/p"))
        .await
        .unwrap();

    let page = storage.get_page_session("v1").unwrap().unwrap();
    assert!(!page.should_process);
    assert_eq!(page.reasoning, "rule");
    assert!(vectors.get("v1").unwrap().is_none());
}

/// Scenario 5 — episodic override: three near-identical-embedding
/// corrections agree on `leisure`, overriding an LM `knowledge` call.
#[tokio::test]
async fn episodic_corrections_override_the_lm() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, storage, _vectors) = harness(dir.path(), knowledge(0.6));

    for i in 0..3 {
        storage
            .insert_episodic_correction(&EpisodicCorrection {
                id: format!("corr-{i}"),
                page_id: format!("old-{i}"),
                url: format!("https://leisure.example/{i}"),
                original_classification: Classification::Knowledge,
                corrected_classification: Classification::Leisure,
                embedding: vec![0.1; 384],
                created_at: Utc::now(),
            })
            .unwrap();
    }

    engine
        .process(visit("v1", "tab1", None, "g1", "https://leisure.example/new"))
        .await
        .unwrap();

    let page = storage.get_page_session("v1").unwrap().unwrap();
    assert_eq!(page.classification, Classification::Leisure);
    assert!(page.confidence >= 0.6);
}

/// Scenario 6 — queue backpressure: capacity 2, no consumer progress, a
/// third enqueue is rejected.
#[test]
fn queue_backpressure_rejects_the_third_visit() {
    let (tx, _rx) = queue::bounded(2);
    assert_eq!(tx.try_enqueue(visit("v1", "tab1", None, "g1", "https://example.com/1")).unwrap(), 1);
    assert_eq!(tx.try_enqueue(visit("v2", "tab1", None, "g1", "https://example.com/2")).unwrap(), 2);
    assert!(tx.try_enqueue(visit("v3", "tab1", None, "g1", "https://example.com/3")).is_err());
}
