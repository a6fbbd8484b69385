//! Runtime configuration
//!
//! Populated from environment variables, each with a documented default;
//! every override is read once at startup.

use std::path::PathBuf;

use crate::model::Classification;

/// Tunables for the reconciler, classifier and ingestion pipeline.
///
/// Every field is overridable via environment variable at startup; see
/// `from_env` for the full list of names and defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage_path: PathBuf,
    pub http_port: u16,
    pub queue_capacity: usize,
    pub retry_interval_secs: u64,
    pub max_orphan_age_secs: i64,
    pub max_orphan_retries: u32,
    pub lm_pool_size: usize,
    pub lm_max_retries: u32,
    pub min_confidence: f32,
    pub allowed_types: Vec<Classification>,
    pub episodic_k: usize,
    pub episodic_agreement_threshold: usize,
    pub shutdown_drain_deadline_secs: u64,
    pub openai_api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            http_port: 5000,
            queue_capacity: 1024,
            retry_interval_secs: 5,
            max_orphan_age_secs: 60,
            max_orphan_retries: 5,
            lm_pool_size: 4,
            lm_max_retries: 3,
            min_confidence: 0.5,
            allowed_types: vec![Classification::Knowledge],
            episodic_k: 5,
            episodic_agreement_threshold: 3,
            shutdown_drain_deadline_secs: 30,
            openai_api_key: None,
        }
    }
}

impl Config {
    /// Build a `Config` from environment variables, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("STORAGE_PATH") {
            config.storage_path = PathBuf::from(path);
        }
        if let Some(v) = env_parsed("TABTRACE_PORT") {
            config.http_port = v;
        }
        if let Some(v) = env_parsed("TABTRACE_QUEUE_CAPACITY") {
            config.queue_capacity = v;
        }
        if let Some(v) = env_parsed("TABTRACE_RETRY_INTERVAL_SECS") {
            config.retry_interval_secs = v;
        }
        if let Some(v) = env_parsed("TABTRACE_MAX_ORPHAN_AGE_SECS") {
            config.max_orphan_age_secs = v;
        }
        if let Some(v) = env_parsed("TABTRACE_MAX_ORPHAN_RETRIES") {
            config.max_orphan_retries = v;
        }
        if let Some(v) = env_parsed("TABTRACE_LM_POOL_SIZE") {
            config.lm_pool_size = v;
        }
        if let Some(v) = env_parsed("TABTRACE_LM_MAX_RETRIES") {
            config.lm_max_retries = v;
        }
        if let Some(v) = env_parsed("TABTRACE_MIN_CONFIDENCE") {
            config.min_confidence = v;
        }
        if let Some(v) = env_parsed("TABTRACE_EPISODIC_K") {
            config.episodic_k = v;
        }
        if let Some(v) = env_parsed("TABTRACE_EPISODIC_AGREEMENT") {
            config.episodic_agreement_threshold = v;
        }
        if let Some(v) = env_parsed("TABTRACE_SHUTDOWN_DEADLINE_SECS") {
            config.shutdown_drain_deadline_secs = v;
        }
        if let Ok(list) = std::env::var("TABTRACE_ALLOWED_TYPES") {
            let parsed: Vec<Classification> = list
                .split(',')
                .filter_map(|s| Classification::parse(s.trim()))
                .collect();
            if !parsed.is_empty() {
                config.allowed_types = parsed;
            }
        }
        config.openai_api_key = std::env::var("OPENAI_API_KEY").ok();

        config
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn default_storage_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "tabtrace", "core") {
        return proj_dirs.data_dir().to_path_buf();
    }
    PathBuf::from(".tabtrace")
}
