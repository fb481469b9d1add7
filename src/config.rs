use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub kycgraph: KycgraphConfig,
    #[serde(default)]
    pub traversal: TraversalConfig,
    #[serde(default)]
    pub jurisdiction: JurisdictionConfig,
    #[serde(default)]
    pub complexity: ComplexityConfig,
    #[serde(default)]
    pub adverse_media: AdverseMediaConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub http_server: HttpServerConfig,
}

/// Engine-wide settings
#[derive(Debug, Clone, Deserialize)]
pub struct KycgraphConfig {
    /// SQLite file holding the populated ownership graph.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for KycgraphConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            migrations_dir: default_migrations_dir(),
            log_level: default_log_level(),
        }
    }
}

/// Ownership chain traversal bounds
#[derive(Debug, Clone, Deserialize)]
pub struct TraversalConfig {
    /// Minimum ownership percentage for an edge to count (0-100).
    #[serde(default = "default_threshold")]
    pub default_threshold: f64,
    /// Maximum hops from the start entity; also bounds complexity scoring.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Cap on materialised paths per traversal.
    #[serde(default = "default_max_paths")]
    pub max_paths: usize,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            default_threshold: default_threshold(),
            max_depth: default_max_depth(),
            top_k: default_top_k(),
            max_paths: default_max_paths(),
        }
    }
}

/// Jurisdiction risk scoring
#[derive(Debug, Clone, Deserialize)]
pub struct JurisdictionConfig {
    /// Hops (ignoring edge direction) gathered around the entity.
    #[serde(default = "default_neighbor_radius")]
    pub neighbor_radius: usize,
    /// Risk countries used when the caller does not supply a set.
    #[serde(default = "default_risk_countries")]
    pub risk_countries: Vec<String>,
}

impl Default for JurisdictionConfig {
    fn default() -> Self {
        Self {
            neighbor_radius: default_neighbor_radius(),
            risk_countries: default_risk_countries(),
        }
    }
}

/// Structural complexity tier thresholds.
///
/// HIGH requires both `related_count > high_related_count` and
/// `jurisdiction_count > high_jurisdiction_count`; MEDIUM requires either
/// medium bound to be exceeded.
#[derive(Debug, Clone, Deserialize)]
pub struct ComplexityConfig {
    #[serde(default = "default_high_related")]
    pub high_related_count: usize,
    #[serde(default = "default_high_jurisdictions")]
    pub high_jurisdiction_count: usize,
    #[serde(default = "default_medium_related")]
    pub medium_related_count: usize,
    #[serde(default = "default_medium_jurisdictions")]
    pub medium_jurisdiction_count: usize,
}

impl Default for ComplexityConfig {
    fn default() -> Self {
        Self {
            high_related_count: default_high_related(),
            high_jurisdiction_count: default_high_jurisdictions(),
            medium_related_count: default_medium_related(),
            medium_jurisdiction_count: default_medium_jurisdictions(),
        }
    }
}

/// Adverse media retrieval
#[derive(Debug, Clone, Deserialize)]
pub struct AdverseMediaConfig {
    #[serde(default = "default_media_limit")]
    pub default_limit: usize,
    /// Rows requested from the store per returned record, so deduplication
    /// does not starve the result.
    #[serde(default = "default_fetch_multiplier")]
    pub fetch_multiplier: usize,
}

impl Default for AdverseMediaConfig {
    fn default() -> Self {
        Self {
            default_limit: default_media_limit(),
            fetch_multiplier: default_fetch_multiplier(),
        }
    }
}

/// Per-query timeout and retry policy
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl QueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before retry number `attempt` (0-indexed), capped at `max_backoff_ms`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Batch review settings
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Entity reviews in flight at once.
    #[serde(default = "default_batch_concurrency")]
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_batch_concurrency(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default = "default_http_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_authless")]
    pub authless: bool,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
            api_key_env: default_http_api_key_env(),
            allowed_origins: default_allowed_origins(),
            authless: default_authless(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("kyc_graph.db")
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_threshold() -> f64 {
    25.0
}

fn default_max_depth() -> usize {
    10
}

fn default_top_k() -> usize {
    5
}

fn default_max_paths() -> usize {
    100
}

fn default_neighbor_radius() -> usize {
    1
}

fn default_risk_countries() -> Vec<String> {
    ["IR", "KP", "SY", "SD", "CU", "VE"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

fn default_high_related() -> usize {
    20
}

fn default_high_jurisdictions() -> usize {
    3
}

fn default_medium_related() -> usize {
    5
}

fn default_medium_jurisdictions() -> usize {
    1
}

fn default_media_limit() -> usize {
    20
}

fn default_fetch_multiplier() -> usize {
    4
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_batch_concurrency() -> usize {
    8
}

fn default_authless() -> bool {
    false
}

fn default_http_port() -> u16 {
    8080
}

fn default_http_api_key_env() -> String {
    "KYCGRAPH_API_KEY".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec![]
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in KYCGRAPH_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("KYCGRAPH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str).context("Failed to parse config.toml")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let t = &self.traversal;
        if !(0.0..=100.0).contains(&t.default_threshold) {
            anyhow::bail!("traversal.default_threshold must be between 0 and 100");
        }
        if t.top_k == 0 {
            anyhow::bail!("traversal.top_k must be greater than 0");
        }
        if t.max_paths == 0 {
            anyhow::bail!("traversal.max_paths must be greater than 0");
        }

        for code in &self.jurisdiction.risk_countries {
            if !crate::model::is_country_code(&code.trim().to_uppercase()) {
                anyhow::bail!(
                    "jurisdiction.risk_countries contains an invalid ISO-3166 alpha-2 code: {:?}",
                    code
                );
            }
        }

        let c = &self.complexity;
        if c.medium_related_count > c.high_related_count
            || c.medium_jurisdiction_count > c.high_jurisdiction_count
        {
            anyhow::bail!("complexity medium thresholds must not exceed the high thresholds");
        }

        if self.adverse_media.fetch_multiplier == 0 {
            anyhow::bail!("adverse_media.fetch_multiplier must be greater than 0");
        }

        let q = &self.query;
        if q.timeout_ms == 0 {
            anyhow::bail!("query.timeout_ms must be greater than 0");
        }
        if q.backoff_multiplier < 1.0 {
            anyhow::bail!("query.backoff_multiplier must be at least 1.0");
        }

        if self.batch.concurrency == 0 {
            anyhow::bail!("batch.concurrency must be greater than 0");
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.kycgraph.db_path
    }

    /// Get migrations directory
    pub fn migrations_dir(&self) -> &Path {
        &self.kycgraph.migrations_dir
    }
}
