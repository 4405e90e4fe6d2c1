//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! section has defaults, so a file only needs the values it changes.
//! Secrets (API tokens) are referenced by env-var name in the config and
//! resolved at runtime.

use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;

use crate::platforms::WagerMode;
use crate::strategy::optimizer::OptimizerConfig;
use crate::strategy::presets::{builtin_presets, RiskPreset};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub wagering: WageringConfig,
    /// Overrides and additions to the built-in presets.
    #[serde(default)]
    pub presets: BTreeMap<String, RiskPreset>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Bet arity K.
    pub bet_arity: usize,
    pub top_n: usize,
    pub default_preset: String,
    /// Bank the preset's `bankroll_pct` applies to.
    pub tote_bank: f64,
    pub currency: String,
    /// Races/recommendations processed concurrently per stage.
    pub max_concurrency: usize,
    pub self_in_pool: bool,
    pub f_share_override: Option<f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bet_arity: 4,
            top_n: 10,
            default_preset: "balanced".to_string(),
            tote_bank: 1000.0,
            currency: "GBP".to_string(),
            max_concurrency: 8,
            self_in_pool: true,
            f_share_override: None,
        }
    }
}

/// Morning Scan pre-filters.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScanConfig {
    pub min_competitors: usize,
    pub max_competitors: usize,
    pub require_rollover: bool,
    /// Minimum operator-published pool ROI; ignored when not published.
    pub min_roi: f64,
    pub max_candidates: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            min_competitors: 6,
            max_competitors: 16,
            require_rollover: false,
            min_roi: 0.0,
            max_candidates: 200,
        }
    }
}

/// Live Monitor decision thresholds.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LiveConfig {
    pub min_expected_profit: f64,
    pub min_roi: f64,
    /// Only go ready within this many minutes of post.
    pub decision_window_minutes: f64,
    /// Skip once post time is this many minutes behind us.
    pub auto_cancel_minutes: f64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            min_expected_profit: 1.0,
            min_roi: 0.05,
            decision_window_minutes: 5.0,
            auto_cancel_minutes: 2.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ExecutionConfig {
    pub auto_place: bool,
    pub mode: WagerMode,
}

/// Timeouts, retries and the shared rate limit for external calls.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProvidersConfig {
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub requests_per_second: u32,
    pub burst: u32,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 15,
            max_retries: 2,
            base_backoff_ms: 500,
            requests_per_second: 5,
            burst: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 20,
            max_entries: 256,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://superfecta.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WageringConfig {
    /// GraphQL endpoint for non-committing audit bets.
    pub audit_url: String,
    /// GraphQL endpoint for committing live bets.
    pub live_url: String,
    /// Scheme prefix for the `Authorization` header.
    pub auth_scheme: String,
    /// Env var holding the API key. Without it, bets are paper-traded.
    pub token_env: String,
}

impl Default for WageringConfig {
    fn default() -> Self {
        Self {
            audit_url: String::new(),
            live_url: String::new(),
            auth_scheme: "Api-Key".to_string(),
            token_env: "TOTE_API_KEY".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Wagering token, if the referenced env var is set.
    pub fn wagering_token(&self) -> Option<SecretString> {
        Self::resolve_env(&self.wagering.token_env)
            .ok()
            .filter(|t| !t.is_empty())
            .map(SecretString::new)
    }

    /// Built-in presets with this file's overrides applied.
    pub fn presets(&self) -> BTreeMap<String, RiskPreset> {
        let mut presets = builtin_presets();
        presets.extend(self.presets.clone());
        presets
    }

    pub fn optimizer_config(&self) -> OptimizerConfig {
        OptimizerConfig {
            bet_arity: self.engine.bet_arity,
            top_n: self.engine.top_n,
            self_in_pool: self.engine.self_in_pool,
            f_share_override: self.engine.f_share_override,
        }
    }

    /// Reject settings no stage could run with. Reports every problem.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        let e = &self.engine;
        if e.bet_arity == 0 {
            problems.push("engine.bet_arity must be at least 1".to_string());
        }
        if e.top_n < e.bet_arity {
            problems.push(format!(
                "engine.top_n ({}) must be >= bet_arity ({})",
                e.top_n, e.bet_arity
            ));
        }
        if e.tote_bank <= 0.0 {
            problems.push("engine.tote_bank must be positive".to_string());
        }
        if e.max_concurrency == 0 {
            problems.push("engine.max_concurrency must be at least 1".to_string());
        }
        if let Some(f) = e.f_share_override {
            if !(0.0..=1.0).contains(&f) {
                problems.push("engine.f_share_override must be in [0, 1]".to_string());
            }
        }
        if self.scan.min_competitors > self.scan.max_competitors {
            problems.push("scan.min_competitors exceeds scan.max_competitors".to_string());
        }
        if self.live.decision_window_minutes < 0.0 || self.live.auto_cancel_minutes < 0.0 {
            problems.push("live window and cancel minutes must be >= 0".to_string());
        }
        if self.providers.requests_per_second == 0 {
            problems.push("providers.requests_per_second must be at least 1".to_string());
        }
        if self.cache.max_entries == 0 {
            problems.push("cache.max_entries must be at least 1".to_string());
        }

        let presets = self.presets();
        if !presets.contains_key(&e.default_preset) {
            problems.push(format!("unknown default preset: {}", e.default_preset));
        }
        for (name, preset) in &presets {
            problems.extend(preset.problems(name));
        }

        if !problems.is_empty() {
            bail!("Invalid configuration: {}", problems.join("; "));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config() {
        // Requires config.toml in the working directory (the crate root under cargo test).
        let result = AppConfig::load("config.toml");
        if let Ok(cfg) = result {
            assert_eq!(cfg.engine.bet_arity, 4);
            assert_eq!(cfg.engine.default_preset, "balanced");
            assert!(cfg.engine.tote_bank > 0.0);
            assert_eq!(cfg.execution.mode, WagerMode::Audit);
            assert!(!cfg.execution.auto_place);
        }
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let cfg = AppConfig::from_toml("").unwrap();
        assert_eq!(cfg.engine.top_n, 10);
        assert_eq!(cfg.providers.max_retries, 2);
        assert_eq!(cfg.presets().len(), 3);
    }

    #[test]
    fn test_preset_override_merges() {
        let cfg = AppConfig::from_toml(
            r#"
            [engine]
            default_preset = "house"

            [presets.house]
            bankroll_pct = 0.01
            target_profit_pct = 10.0
            concentration = 0.1
            market_inefficiency = 0.0
            "#,
        )
        .unwrap();
        let presets = cfg.presets();
        assert_eq!(presets.len(), 4);
        assert_eq!(presets["house"].bankroll_pct, 0.01);
        assert_eq!(cfg.optimizer_config().bet_arity, 4);
    }

    #[test]
    fn test_validation_reports_all_problems() {
        let err = AppConfig::from_toml(
            r#"
            [engine]
            bet_arity = 4
            top_n = 3
            default_preset = "missing"

            [providers]
            requests_per_second = 0
            "#,
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("top_n"));
        assert!(msg.contains("unknown default preset"));
        assert!(msg.contains("requests_per_second"));
    }

    #[test]
    fn test_mode_parses_live() {
        let cfg = AppConfig::from_toml("[execution]\nauto_place = true\nmode = \"live\"\n").unwrap();
        assert_eq!(cfg.execution.mode, WagerMode::Live);
        assert!(cfg.execution.auto_place);
    }
}
