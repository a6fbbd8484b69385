//! # tabtrace-core
//!
//! Reconstructs the causal navigation tree behind a stream of browsing
//! visits, classifies each page with a memory-enhanced pipeline (procedural
//! rules, episodic corrections, an LM), and persists accepted pages into
//! two coordinated stores: a structured relational store for metadata and
//! tree structure, and a vector store for content and its embedding.
//!
//! ## Module map
//!
//! - [`model`] — the types that flow through ingestion, reconciliation,
//!   classification and the two stores.
//! - [`ids`] — visit and tree id derivation.
//! - [`config`] — environment-driven runtime tunables.
//! - [`queue`] — the bounded single-consumer visit queue.
//! - [`reconciler`] — tree placement policy and the orphan deferral table.
//! - [`classifier`] — the four-stage classification pipeline.
//! - [`storage`] — the SQLite-backed structured store.
//! - [`vectorstore`] — the HNSW-indexed vector store.
//! - [`embeddings`] — local ONNX embedding inference.
//! - [`coordinator`] — the dual-store write ordering and recovery log.
//! - [`engine`] — glues the above into the per-visit processing sequence.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tabtrace_core::classifier::{LmResponse, Pipeline, StaticClassifier};
//! use tabtrace_core::config::Config;
//! use tabtrace_core::coordinator::Coordinator;
//! use tabtrace_core::embeddings::EmbeddingService;
//! use tabtrace_core::engine::Engine;
//! use tabtrace_core::model::Classification;
//! use tabtrace_core::reconciler::Reconciler;
//! use tabtrace_core::storage::Storage;
//! use tabtrace_core::vectorstore::VectorStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let storage = Arc::new(Storage::new(Some(config.storage_path.clone()))?);
//! let vectors = Arc::new(VectorStore::new(Some(config.storage_path.clone()))?);
//! let embeddings = Arc::new(EmbeddingService::new());
//! let lm = Arc::new(StaticClassifier(LmResponse {
//!     page_type: Classification::Knowledge,
//!     confidence: 1.0,
//!     reasoning: "placeholder".to_string(),
//!     should_process: true,
//! }));
//!
//! let reconciler = Reconciler::new(storage.clone());
//! let pipeline = Pipeline::new(storage.clone(), embeddings.clone(), lm, config);
//! let coordinator = Coordinator::new(storage, vectors, embeddings);
//! let _engine = Engine::new(reconciler, pipeline, coordinator);
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod embeddings;
pub mod engine;
pub mod ids;
pub mod model;
pub mod queue;
pub mod reconciler;
pub mod storage;
pub mod vectorstore;
pub mod wire;

/// Re-exports of the types most callers need, mirroring the module map
/// above rather than flattening everything into one namespace.
pub mod prelude {
    pub use crate::classifier::{ClassifierError, LmClassifier, LmResponse, Pipeline};
    pub use crate::config::Config;
    pub use crate::coordinator::{Coordinator, CoordinatorError};
    pub use crate::embeddings::{CachingEmbedder, EmbeddingService, Embedder};
    pub use crate::engine::{Engine, EngineError};
    pub use crate::ids::{tree_id_for_root, visit_id};
    pub use crate::model::{
        Classification, ClassifierDecision, EpisodicCorrection, OrphanEntry, PageSession,
        ProceduralRule, RuleAction, RuleCondition, RuleField, SearchHit, Tree, VectorDocument,
        VectorMetadata, Visit,
    };
    pub use crate::queue::{VisitQueueReceiver, VisitQueueSender};
    pub use crate::reconciler::{Placement, ReconcileError, Reconciler};
    pub use crate::storage::{Storage, StorageError};
    pub use crate::vectorstore::{VectorStore, VectorStoreError};
    pub use crate::wire::{ValidationIssue, VisitWire};
}
