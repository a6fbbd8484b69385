//! Data Model
//!
//! The types that flow through ingestion, reconciliation, classification and
//! the two stores. See the module docs in `lib.rs` for how they relate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification assigned to a page by the memory-enhanced classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Knowledge,
    InteractiveApp,
    Aggregator,
    Leisure,
    Navigation,
    Other,
}

impl Classification {
    /// Parse a classification from the LM's free-form `page_type` string,
    /// falling back to `None` for anything outside the documented domain.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "knowledge" => Some(Self::Knowledge),
            "interactive_app" => Some(Self::InteractiveApp),
            "aggregator" => Some(Self::Aggregator),
            "leisure" => Some(Self::Leisure),
            "navigation" => Some(Self::Navigation),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Knowledge => "knowledge",
            Self::InteractiveApp => "interactive_app",
            Self::Aggregator => "aggregator",
            Self::Leisure => "leisure",
            Self::Navigation => "navigation",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of input accepted at `POST /visit`, after decompression and
/// schema validation but before tree placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visit {
    /// Stable hash of `(url, page_loaded_at)`.
    pub id: String,
    pub url: String,
    pub page_loaded_at: DateTime<Utc>,
    pub tab_id: String,
    pub opener_tab_id: Option<String>,
    pub group_id: String,
    pub referrer_url: Option<String>,
    pub referrer_timestamp: Option<DateTime<Utc>>,
    /// Decompressed page text. Never persisted to the structured store.
    pub raw_content: String,
    pub title: String,
}

/// Outcome of the classifier pipeline for a single visit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierDecision {
    pub should_process: bool,
    pub page_type: Classification,
    /// Clamped to `[0, 1]`.
    pub confidence: f32,
    /// At most ten words, per the LM response schema.
    pub reasoning: String,
}

/// The persisted form of an accepted visit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSession {
    pub id: String,
    pub url: String,
    pub page_loaded_at: DateTime<Utc>,
    pub tab_id: String,
    pub opener_tab_id: Option<String>,
    pub group_id: String,
    pub referrer_url: Option<String>,
    pub referrer_timestamp: Option<DateTime<Utc>>,
    pub title: String,
    pub tree_id: String,
    pub parent_page_id: Option<String>,
    pub classification: Classification,
    pub confidence: f32,
    pub reasoning: String,
    pub should_process: bool,
    pub processed_at: DateTime<Utc>,
}

impl PageSession {
    /// Build a `PageSession` from a placed `Visit` and its classifier decision.
    pub fn new(
        visit: &Visit,
        tree_id: String,
        parent_page_id: Option<String>,
        decision: &ClassifierDecision,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: visit.id.clone(),
            url: visit.url.clone(),
            page_loaded_at: visit.page_loaded_at,
            tab_id: visit.tab_id.clone(),
            opener_tab_id: visit.opener_tab_id.clone(),
            group_id: visit.group_id.clone(),
            referrer_url: visit.referrer_url.clone(),
            referrer_timestamp: visit.referrer_timestamp,
            title: visit.title.clone(),
            tree_id,
            parent_page_id,
            classification: decision.page_type,
            confidence: decision.confidence,
            reasoning: decision.reasoning.clone(),
            should_process: decision.should_process,
            processed_at,
        }
    }
}

/// A navigation tree: a set of `PageSession`s linked by `parent_page_id`
/// edges, originating from a single root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub tree_id: String,
    pub root_page_id: String,
}

/// A visit deferred because its expected parent has not yet arrived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanEntry {
    pub visit: Visit,
    pub expected_parent_tab_id: String,
    pub first_seen_at: DateTime<Utc>,
    pub retry_count: u32,
}

/// The action a `ProceduralRule` takes when its condition matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleAction {
    AlwaysProcess,
    NeverProcess,
    PreferType { page_type: Classification },
    BoostConfidence { delta: f32 },
}

/// A boolean expression over visit-derived fields, built from the operators
/// `{equals, contains, matches_regex, in_set, and, or, not}`. Conditions are
/// pure: evaluating the same condition on the same input always yields the
/// same result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RuleCondition {
    Equals { field: RuleField, value: String },
    Contains { field: RuleField, value: String },
    MatchesRegex { field: RuleField, pattern: String },
    InSet { field: RuleField, values: Vec<String> },
    And { conditions: Vec<RuleCondition> },
    Or { conditions: Vec<RuleCondition> },
    Not { condition: Box<RuleCondition> },
}

/// Fields a `RuleCondition` may inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    UrlHost,
    UrlPath,
    UrlQuery,
    Title,
    ContentFirst2k,
    TabGroupSize,
}

/// A user- or system-declared decision, evaluated before the LM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProceduralRule {
    pub id: String,
    /// Higher evaluates first.
    pub priority: i64,
    pub condition: RuleCondition,
    pub action: RuleAction,
}

/// A prior classification that was later corrected, used to adjust
/// confidence (and, above a threshold of agreement, override the LM
/// classification) on semantically similar new pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicCorrection {
    pub id: String,
    pub page_id: String,
    pub url: String,
    pub original_classification: Classification,
    pub corrected_classification: Classification,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// Metadata carried alongside a `VectorDocument`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub url: String,
    pub title: String,
    pub page_loaded_at: DateTime<Utc>,
}

/// The stored unit in the vector store: `key` equals the owning
/// `PageSession.id`. Created by the write coordinator; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDocument {
    pub key: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: VectorMetadata,
}

/// A `semantic_search` hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub url: String,
    pub title: String,
    pub score: f32,
    pub preview: String,
}
