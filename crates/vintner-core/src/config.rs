use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Root deduplication configuration, loaded from `~/.config/vintner/dedup.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub enabled: bool,
    /// Batches with fewer accepted records than this are skipped.
    #[serde(alias = "min_spirits_threshold")]
    pub min_records_threshold: usize,
    pub run_exact_match: bool,
    pub run_fuzzy_match: bool,
    pub auto_merge: bool,
    pub thresholds: Thresholds,
    pub performance: PerformanceConfig,
    pub blocking: BlockingConfig,
    pub price: PriceConfig,
    pub normalization: NormalizationConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub same_brand: f64,
    pub different_brand: f64,
    pub auto_merge_confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    /// Above this many records the fuzzy stage is skipped in favour of exact keys.
    pub fuzzy_match_limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockingConfig {
    pub max_block_size: usize,
    pub progressive_chunk_size: usize,
    pub memory_limit_mb: usize,
    pub enable_progressive_blocking: bool,
    pub enable_performance_monitoring: bool,
    /// Characters of the ultra-aggressive key used as a blocking key.
    pub ultra_prefix_len: usize,
    /// Characters of the aggressive key used to re-partition oversized blocks.
    pub secondary_prefix_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    pub max_coefficient_of_variation: f64,
    pub min_prices_for_stats: usize,
    pub outlier_threshold: f64,
    pub exclude_outliers: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    /// Generic category words dropped from the ultra-aggressive key.
    pub stopwords: Vec<String>,
    /// Extra brand spellings, keyed by canonical brand.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub brand_aliases: BTreeMap<String, Vec<String>>,
}

// ─── Defaults ──────────────────────────────────────────────

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_records_threshold: 10,
            run_exact_match: true,
            run_fuzzy_match: true,
            auto_merge: true,
            thresholds: Thresholds::default(),
            performance: PerformanceConfig::default(),
            blocking: BlockingConfig::default(),
            price: PriceConfig::default(),
            normalization: NormalizationConfig::default(),
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            same_brand: 0.7,
            different_brand: 0.85,
            auto_merge_confidence: 0.9,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_delay_ms: 1000,
            fuzzy_match_limit: 500,
        }
    }
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            max_block_size: 1000,
            progressive_chunk_size: 10_000,
            memory_limit_mb: 512,
            enable_progressive_blocking: true,
            enable_performance_monitoring: true,
            ultra_prefix_len: 12,
            secondary_prefix_len: 3,
        }
    }
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            max_coefficient_of_variation: 0.5,
            min_prices_for_stats: 2,
            outlier_threshold: 2.0,
            exclude_outliers: true,
        }
    }
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        let stopwords = [
            "the", "and", "of", "a", "whisky", "whiskey", "bourbon", "rye", "scotch", "vodka",
            "gin", "rum", "tequila", "mezcal", "cognac", "brandy", "liqueur", "spirit", "spirits",
            "straight", "kentucky", "ky", "year", "years", "yr", "old", "pf",
        ];
        Self {
            stopwords: stopwords.iter().map(|word| word.to_string()).collect(),
            brand_aliases: BTreeMap::new(),
        }
    }
}

impl PerformanceConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

// ─── Environment overrides ─────────────────────────────────

pub const ENV_ENABLED: &str = "AUTO_DEDUP_ENABLED";
pub const ENV_MIN_RECORDS: &str = "AUTO_DEDUP_MIN_SPIRITS";
pub const ENV_RUN_EXACT: &str = "AUTO_DEDUP_RUN_EXACT";
pub const ENV_RUN_FUZZY: &str = "AUTO_DEDUP_RUN_FUZZY";
pub const ENV_AUTO_MERGE: &str = "AUTO_DEDUP_AUTO_MERGE";
pub const ENV_SAME_BRAND: &str = "AUTO_DEDUP_SAME_BRAND_THRESHOLD";
pub const ENV_DIFFERENT_BRAND: &str = "AUTO_DEDUP_DIFFERENT_BRAND_THRESHOLD";
pub const ENV_AUTO_MERGE_CONFIDENCE: &str = "AUTO_DEDUP_AUTO_MERGE_CONFIDENCE";
pub const ENV_BATCH_SIZE: &str = "AUTO_DEDUP_BATCH_SIZE";
pub const ENV_BATCH_DELAY_MS: &str = "AUTO_DEDUP_BATCH_DELAY_MS";
pub const ENV_FUZZY_LIMIT: &str = "AUTO_DEDUP_FUZZY_MATCH_LIMIT";
pub const ENV_MAX_BLOCK_SIZE: &str = "BLOCKING_MAX_BLOCK_SIZE";
pub const ENV_CHUNK_SIZE: &str = "BLOCKING_PROGRESSIVE_CHUNK_SIZE";
pub const ENV_MEMORY_LIMIT_MB: &str = "BLOCKING_MEMORY_LIMIT_MB";
pub const ENV_PROGRESSIVE: &str = "BLOCKING_ENABLE_PROGRESSIVE";
pub const ENV_MONITORING: &str = "BLOCKING_ENABLE_MONITORING";

impl DedupConfig {
    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply string-typed overrides produced by `lookup`, one per config field.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_bool(&lookup, ENV_ENABLED, &mut self.enabled)?;
        override_parsed(&lookup, ENV_MIN_RECORDS, &mut self.min_records_threshold)?;
        override_bool(&lookup, ENV_RUN_EXACT, &mut self.run_exact_match)?;
        override_bool(&lookup, ENV_RUN_FUZZY, &mut self.run_fuzzy_match)?;
        override_bool(&lookup, ENV_AUTO_MERGE, &mut self.auto_merge)?;

        override_parsed(&lookup, ENV_SAME_BRAND, &mut self.thresholds.same_brand)?;
        override_parsed(
            &lookup,
            ENV_DIFFERENT_BRAND,
            &mut self.thresholds.different_brand,
        )?;
        override_parsed(
            &lookup,
            ENV_AUTO_MERGE_CONFIDENCE,
            &mut self.thresholds.auto_merge_confidence,
        )?;

        override_parsed(&lookup, ENV_BATCH_SIZE, &mut self.performance.batch_size)?;
        override_parsed(
            &lookup,
            ENV_BATCH_DELAY_MS,
            &mut self.performance.batch_delay_ms,
        )?;
        override_parsed(
            &lookup,
            ENV_FUZZY_LIMIT,
            &mut self.performance.fuzzy_match_limit,
        )?;

        override_parsed(&lookup, ENV_MAX_BLOCK_SIZE, &mut self.blocking.max_block_size)?;
        override_parsed(
            &lookup,
            ENV_CHUNK_SIZE,
            &mut self.blocking.progressive_chunk_size,
        )?;
        override_parsed(
            &lookup,
            ENV_MEMORY_LIMIT_MB,
            &mut self.blocking.memory_limit_mb,
        )?;
        override_bool(
            &lookup,
            ENV_PROGRESSIVE,
            &mut self.blocking.enable_progressive_blocking,
        )?;
        override_bool(
            &lookup,
            ENV_MONITORING,
            &mut self.blocking.enable_performance_monitoring,
        )?;
        Ok(())
    }
}

fn override_bool<F>(lookup: &F, key: &str, target: &mut bool) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *target = match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => {
                return Err(CoreError::Config(format!(
                    "{key}: expected a boolean, got {raw:?}"
                )));
            }
        };
    }
    Ok(())
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Config(format!("{key}: cannot parse {raw:?}")))?;
    }
    Ok(())
}

// ─── Validation ────────────────────────────────────────────

impl DedupConfig {
    /// Reject out-of-range values before any batch runs.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("thresholds.same_brand", self.thresholds.same_brand),
            ("thresholds.different_brand", self.thresholds.different_brand),
            (
                "thresholds.auto_merge_confidence",
                self.thresholds.auto_merge_confidence,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(CoreError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.performance.batch_size == 0 {
            return Err(CoreError::Config("performance.batch_size must be > 0".into()));
        }
        if self.blocking.max_block_size < 2 {
            return Err(CoreError::Config(
                "blocking.max_block_size must be at least 2".into(),
            ));
        }
        if self.blocking.progressive_chunk_size == 0 {
            return Err(CoreError::Config(
                "blocking.progressive_chunk_size must be > 0".into(),
            ));
        }
        if self.blocking.memory_limit_mb == 0 {
            return Err(CoreError::Config("blocking.memory_limit_mb must be > 0".into()));
        }
        if self.blocking.ultra_prefix_len == 0 || self.blocking.secondary_prefix_len == 0 {
            return Err(CoreError::Config(
                "blocking prefix lengths must be > 0".into(),
            ));
        }
        if !(self.price.max_coefficient_of_variation >= 0.0) {
            return Err(CoreError::Config(
                "price.max_coefficient_of_variation must be >= 0".into(),
            ));
        }
        if !(self.price.outlier_threshold > 1.0) {
            return Err(CoreError::Config(
                "price.outlier_threshold must be > 1".into(),
            ));
        }
        if self.price.min_prices_for_stats == 0 {
            return Err(CoreError::Config(
                "price.min_prices_for_stats must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Short human-readable description of the active settings.
    pub fn summary(&self) -> String {
        let yes_no = |flag: bool| if flag { "Yes" } else { "No" };
        [
            format!(
                "Auto-deduplication: {}",
                if self.enabled { "Enabled" } else { "Disabled" }
            ),
            format!("Threshold: {} records", self.min_records_threshold),
            format!("Exact match: {}", yes_no(self.run_exact_match)),
            format!("Fuzzy match: {}", yes_no(self.run_fuzzy_match)),
            format!("Auto-merge: {}", yes_no(self.auto_merge)),
            format!(
                "Same-brand threshold: {:.0}%",
                self.thresholds.same_brand * 100.0
            ),
        ]
        .join("\n")
    }
}

// ─── Load / Save ───────────────────────────────────────────

impl DedupConfig {
    /// Standard config file path: `~/.config/vintner/dedup.toml`
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("VINTNER_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("vintner")
            .join("dedup.toml")
    }

    /// Load from the standard path, apply environment overrides and validate.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a specific path, falling back to defaults if it doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }
}
