//! TOML configuration parsing and validation.
//!
//! The file is parsed once at startup into an immutable [`Config`]. The
//! retrieval-related sections are turned into a core [`EngineConfig`] by
//! [`Config::engine_config`], which the orchestrator receives at
//! construction.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/lexmail.sqlite"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-large"
//! dims = 1536
//!
//! [retrieval]
//! top_k = 5
//! max_results = 20
//!
//! [retrieval.weights]
//! similarity = 0.6
//! recency = 0.15
//! origin = 0.25
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lexmail_core::rank::{OriginBoosts, RankingConfig, RankingWeights};
use lexmail_core::EngineConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Ollama base URL.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_branch_limit")]
    pub branch_limit: usize,
    #[serde(default = "default_search_retry_backoff_ms")]
    pub search_retry_backoff_ms: u64,
    #[serde(default)]
    pub weights: RankingWeights,
    #[serde(default)]
    pub recency: RecencyConfig,
    #[serde(default)]
    pub origin_boost: OriginBoosts,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            max_results: default_max_results(),
            branch_limit: default_branch_limit(),
            search_retry_backoff_ms: default_search_retry_backoff_ms(),
            weights: RankingWeights::default(),
            recency: RecencyConfig::default(),
            origin_boost: OriginBoosts::default(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_top_k() -> usize {
    50
}
fn default_max_results() -> usize {
    20
}
fn default_branch_limit() -> usize {
    3
}
fn default_search_retry_backoff_ms() -> u64 {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecencyConfig {
    #[serde(default = "default_window_days")]
    pub window_days: i64,
}

impl Default for RecencyConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
        }
    }
}

fn default_window_days() -> i64 {
    365
}

/// Upper bound on the recency window (a century).
const MAX_WINDOW_DAYS: i64 = 36_500;

impl Config {
    /// A config with every section at its default, for the given database.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }

    /// Build the immutable engine configuration.
    ///
    /// With embeddings disabled the dimension falls back to the engine
    /// default; retrieval will then fail at the embedding step instead.
    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        let r = &self.retrieval;
        EngineConfig {
            dims: self.embedding.dims.unwrap_or(defaults.dims),
            default_top_k: r.top_k,
            max_top_k: r.max_top_k,
            default_max_results: r.max_results,
            branch_limit: r.branch_limit,
            search_retry_backoff: Duration::from_millis(r.search_retry_backoff_ms),
            ranking: RankingConfig {
                weights: r.weights,
                origin_boost: r.origin_boost,
                recency_window: chrono::Duration::try_days(r.recency.window_days)
                    .unwrap_or(defaults.ranking.recency_window),
            },
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let r = &config.retrieval;

    // Validate retrieval limits
    if r.max_top_k < 1 {
        bail!("retrieval.max_top_k must be >= 1");
    }
    if r.top_k < 1 || r.top_k > r.max_top_k {
        bail!("retrieval.top_k must be in [1, retrieval.max_top_k]");
    }
    if r.max_results < 1 {
        bail!("retrieval.max_results must be >= 1");
    }
    if r.recency.window_days <= 0 || r.recency.window_days > MAX_WINDOW_DAYS {
        bail!(
            "retrieval.recency.window_days must be in [1, {}]",
            MAX_WINDOW_DAYS
        );
    }

    // Validate ranking weights and boosts
    for (name, w) in [
        ("similarity", r.weights.similarity),
        ("recency", r.weights.recency),
        ("origin", r.weights.origin),
    ] {
        if !w.is_finite() || w < 0.0 {
            bail!("retrieval.weights.{} must be a finite, non-negative number", name);
        }
    }
    let b = &r.origin_boost;
    for (name, v) in [
        ("direct_match", b.direct_match),
        ("thread_member", b.thread_member),
        ("same_case", b.same_case),
        ("same_people", b.same_people),
    ] {
        if !(0.0..=1.0).contains(&v) {
            bail!("retrieval.origin_boost.{} must be in [0.0, 1.0]", name);
        }
    }
    if b.direct_match <= b.thread_member.max(b.same_case).max(b.same_people) {
        bail!("retrieval.origin_boost.direct_match must be greater than every other boost");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"./data/lexmail.sqlite\"\n").unwrap();
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.max_results, 20);
        assert_eq!(config.retrieval.branch_limit, 3);

        let engine = config.engine_config();
        assert_eq!(engine.default_top_k, 5);
        assert_eq!(engine.max_top_k, 50);
        assert_eq!(engine.search_retry_backoff, Duration::from_millis(200));
        assert_eq!(engine.ranking.recency_window, chrono::Duration::days(365));
    }

    #[test]
    fn test_full_config_maps_into_engine() {
        let config = parse(
            r#"
[db]
path = "/tmp/lexmail.sqlite"

[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = 768

[retrieval]
top_k = 8
max_results = 12
branch_limit = 2

[retrieval.weights]
similarity = 0.7
recency = 0.1
origin = 0.2

[retrieval.recency]
window_days = 90
"#,
        )
        .unwrap();
        let engine = config.engine_config();
        assert_eq!(engine.dims, 768);
        assert_eq!(engine.default_top_k, 8);
        assert_eq!(engine.default_max_results, 12);
        assert_eq!(engine.branch_limit, 2);
        assert_eq!(engine.ranking.weights.similarity, 0.7);
        assert_eq!(engine.ranking.recency_window, chrono::Duration::days(90));
        assert_eq!(engine.ranking.origin_boost, OriginBoosts::default());
    }

    #[test]
    fn test_top_k_above_bound_rejected() {
        let err = parse("[db]\npath = \"x\"\n[retrieval]\ntop_k = 60\n").unwrap_err();
        assert!(err.to_string().contains("top_k"));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let err = parse(
            "[db]\npath = \"x\"\n[retrieval.weights]\nsimilarity = -1.0\nrecency = 0.1\norigin = 0.1\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("weights.similarity"));
    }

    #[test]
    fn test_direct_match_must_dominate_boosts() {
        let err = parse(
            "[db]\npath = \"x\"\n[retrieval.origin_boost]\ndirect_match = 0.5\nthread_member = 0.6\nsame_case = 0.4\nsame_people = 0.2\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("direct_match"));
    }

    #[test]
    fn test_enabled_provider_requires_dims_and_model() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"local\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_recency_window_bounded() {
        let err = parse("[db]\npath = \"x\"\n[retrieval.recency]\nwindow_days = 9000000000000\n");
        assert!(err.unwrap_err().to_string().contains("window_days"));
        let config =
            parse("[db]\npath = \"x\"\n[retrieval.recency]\nwindow_days = 36500\n").unwrap();
        assert_eq!(
            config.engine_config().ranking.recency_window,
            chrono::Duration::days(36_500)
        );
    }

    #[test]
    fn test_engine_config_never_panics_on_unvalidated_window() {
        let mut config = Config::with_db_path("x");
        config.retrieval.recency.window_days = i64::MAX;
        assert_eq!(
            config.engine_config().ranking.recency_window,
            chrono::Duration::days(365)
        );
    }

    #[test]
    fn test_load_config_reports_missing_file() {
        let err = load_config(Path::new("/nonexistent/lexmail.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
