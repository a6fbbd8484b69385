//! Embedding service
//!
//! Local ONNX inference via `fastembed`. The model loads lazily on first
//! use and is shared process-wide: initialization takes a few hundred
//! milliseconds and every caller wants the same model.

use std::num::NonZeroUsize;
use std::sync::{Mutex, OnceLock};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use lru::LruCache;

/// Dimensionality of the configured embedding model. Must match
/// `vectorstore::index::DEFAULT_DIMENSIONS`.
pub const EMBEDDING_DIMENSIONS: usize = 384;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("model not ready: {0}")]
    NotReady(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

type ModelCell = OnceLock<std::result::Result<Mutex<TextEmbedding>, String>>;

static MODEL: ModelCell = OnceLock::new();

fn get_or_init_model() -> &'static std::result::Result<Mutex<TextEmbedding>, String> {
    MODEL.get_or_init(|| {
        TextEmbedding::try_new(InitOptions::new(EmbeddingModel::AllMiniLML6V2))
            .map(Mutex::new)
            .map_err(|e| e.to_string())
    })
}

/// The embedding seam the classifier pipeline and write coordinator depend
/// on, so callers can substitute a fixed vector in tests instead of loading
/// the ONNX model.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Stateless handle to the process-wide embedding model.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddingService;

impl Embedder for EmbeddingService {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        EmbeddingService::embed(self, text)
    }
}

impl EmbeddingService {
    pub fn new() -> Self {
        Self
    }

    /// True once the model has been loaded successfully. Does not trigger
    /// loading; call `check_ready` to force initialization.
    pub fn is_ready(&self) -> bool {
        matches!(MODEL.get(), Some(Ok(_)))
    }

    /// Force model initialization and surface any failure.
    pub fn check_ready(&self) -> Result<(), EmbeddingError> {
        match get_or_init_model() {
            Ok(_) => Ok(()),
            Err(e) => Err(EmbeddingError::NotReady(e.clone())),
        }
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut batch = self.embed_batch(&[text.to_string()])?;
        Ok(batch.pop().unwrap_or_default())
    }

    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model = get_or_init_model()
            .as_ref()
            .map_err(|e| EmbeddingError::NotReady(e.clone()))?;
        let model = model
            .lock()
            .map_err(|_| EmbeddingError::Inference("model lock poisoned".to_string()))?;
        model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::Inference(e.to_string()))
    }
}

/// Wraps any `Embedder` with an LRU cache keyed by the input text: the
/// episodic stage re-embeds the same URLs across visits to the same page,
/// and `semantic_search` callers often repeat a query.
pub struct CachingEmbedder<E> {
    inner: E,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl<E: Embedder> CachingEmbedder<E> {
    pub fn new(inner: E, capacity: usize) -> Self {
        const ONE: NonZeroUsize = NonZeroUsize::new(1).unwrap();
        let capacity = NonZeroUsize::new(capacity).unwrap_or(ONE);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl<E: Embedder> Embedder for CachingEmbedder<E> {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(text) {
                return Ok(hit.clone());
            }
        }
        let embedding = self.inner.embed(text)?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(text.to_string(), embedding.clone());
        }
        Ok(embedding)
    }
}

/// Cosine similarity between two equal-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot = dot_product(a, b);
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
