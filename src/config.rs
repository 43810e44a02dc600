//! bindery configuration from bindery.toml. Every section and field falls
//! back to a sensible default, so an empty file is a valid config.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct BinderyConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    ".bindery/catalog.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SchedulerConfig {
    /// Backfill job: frequent, larger batches.
    #[serde(default = "default_enrich_interval")]
    pub enrich_interval_secs: u64,
    #[serde(default = "default_enrich_batch")]
    pub enrich_batch_size: i64,
    /// Tagging job: slower, smaller batches.
    #[serde(default = "default_tag_interval")]
    pub tag_interval_secs: u64,
    #[serde(default = "default_tag_batch")]
    pub tag_batch_size: i64,
    #[serde(default = "default_lock_min_hold")]
    pub lock_min_hold_secs: u64,
    #[serde(default = "default_lock_max_hold")]
    pub lock_max_hold_secs: u64,
}

fn default_enrich_interval() -> u64 {
    60
}
fn default_enrich_batch() -> i64 {
    50
}
fn default_tag_interval() -> u64 {
    600
}
fn default_tag_batch() -> i64 {
    20
}
fn default_lock_min_hold() -> u64 {
    5
}
fn default_lock_max_hold() -> u64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enrich_interval_secs: default_enrich_interval(),
            enrich_batch_size: default_enrich_batch(),
            tag_interval_secs: default_tag_interval(),
            tag_batch_size: default_tag_batch(),
            lock_min_hold_secs: default_lock_min_hold(),
            lock_max_hold_secs: default_lock_max_hold(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EnrichmentConfig {
    /// Bounded worker pool size; keep small to respect provider rate limits.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// All-providers-empty passes before a never-enriched book is marked
    /// unavailable.
    #[serde(default = "default_empty_pass_threshold")]
    pub empty_pass_threshold: i64,
}

fn default_workers() -> usize {
    5
}
fn default_empty_pass_threshold() -> i64 {
    3
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            empty_pass_threshold: default_empty_pass_threshold(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    #[serde(default = "default_lookup_url")]
    pub lookup_url: String,
    #[serde(default)]
    pub lookup_api_key: Option<String>,
    #[serde(default = "default_generator_url")]
    pub generator_url: String,
    #[serde(default = "default_generator_model")]
    pub generator_model: String,
    #[serde(default = "default_generator_max_tokens")]
    pub generator_max_tokens: usize,
    #[serde(default = "default_generator_temperature")]
    pub generator_temperature: f64,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_lookup_url() -> String {
    "http://localhost:8900/lookup".to_string()
}
fn default_generator_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_generator_model() -> String {
    "qwen2.5:3b".to_string()
}
fn default_generator_max_tokens() -> usize {
    200
}
fn default_generator_temperature() -> f64 {
    0.3
}
fn default_provider_timeout() -> u64 {
    10
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            lookup_url: default_lookup_url(),
            lookup_api_key: None,
            generator_url: default_generator_url(),
            generator_model: default_generator_model(),
            generator_max_tokens: default_generator_max_tokens(),
            generator_temperature: default_generator_temperature(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_url")]
    pub base_url: String,
    #[serde(default = "default_index_name")]
    pub index_name: String,
    #[serde(default = "default_index_timeout")]
    pub timeout_secs: u64,
}

fn default_index_url() -> String {
    "http://localhost:9200".to_string()
}
fn default_index_name() -> String {
    "books".to_string()
}
fn default_index_timeout() -> u64 {
    10
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            base_url: default_index_url(),
            index_name: default_index_name(),
            timeout_secs: default_index_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConsumerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    /// Redeliveries before a message is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    /// Visibility timeout for inflight messages whose consumer died.
    #[serde(default = "default_inflight_timeout")]
    pub inflight_timeout_secs: u64,
}

fn default_poll_interval() -> u64 {
    3
}
fn default_page_size() -> i64 {
    1000
}
fn default_max_attempts() -> i64 {
    5
}
fn default_inflight_timeout() -> u64 {
    300
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            page_size: default_page_size(),
            max_attempts: default_max_attempts(),
            inflight_timeout_secs: default_inflight_timeout(),
        }
    }
}

/// Load configuration from a TOML file. Missing file or parse errors fall
/// back to defaults with a warning — the daemon still comes up.
pub fn load_config(path: &Path) -> BinderyConfig {
    if !path.exists() {
        tracing::info!(?path, "no config file, using defaults");
        return BinderyConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(?path, error = %e, "failed to parse config, using defaults");
            BinderyConfig::default()
        }),
        Err(e) => {
            tracing::warn!(?path, error = %e, "failed to read config, using defaults");
            BinderyConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: BinderyConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.enrichment.workers, 5);
        assert_eq!(cfg.consumer.page_size, 1000);
        assert_eq!(cfg.scheduler.enrich_interval_secs, 60);
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let cfg: BinderyConfig = toml::from_str(
            r#"
            [enrichment]
            workers = 2

            [index]
            index_name = "books-staging"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.enrichment.workers, 2);
        assert_eq!(cfg.enrichment.empty_pass_threshold, 3);
        assert_eq!(cfg.index.index_name, "books-staging");
        assert_eq!(cfg.index.base_url, "http://localhost:9200");
    }
}
