// Configuration Management for the Flow Score Engine
// JSON file + environment overrides, validated before pipelines start

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::types::VolatilityRegime;

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

// ============================================================================
// Configuration Structures
// ============================================================================

/// Order book replica settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BookConfig {
    pub depth_levels: usize,
    pub order_lifetime_ms: i64,     // Levels younger than this are damped
    pub flash_damping: f64,         // Multiplier applied to young levels
    pub level_decay: f64,           // Geometric weight per rank from the touch
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            depth_levels: 20,
            order_lifetime_ms: 1500,
            flash_damping: 0.3,
            level_decay: 0.9,
        }
    }
}

/// Trade/flow window settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub window_ms: i64,
    pub max_trades: usize,
    pub max_flow_events: usize,
    pub volatility_window_ms: i64,
    pub max_mid_samples: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_ms: 30_000,
            max_trades: 50_000,
            max_flow_events: 100_000,
            volatility_window_ms: 60_000,
            max_mid_samples: 5_000,
        }
    }
}

/// Trend state settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    pub ema_short_half_life_ms: i64,
    pub ema_long_half_life_ms: i64,
    pub vwap_reset_ms: Option<i64>,     // None = accumulate since start
    pub mid_sma_len: usize,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            ema_short_half_life_ms: 60_000,
            ema_long_half_life_ms: 300_000,
            vwap_reset_ms: None,
            mid_sma_len: 10,
        }
    }
}

/// (trend, book, trade) weights for one volatility regime
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeWeights {
    pub trend: f64,
    pub book: f64,
    pub trade: f64,
}

impl RegimeWeights {
    pub fn new(trend: f64, book: f64, trade: f64) -> Self {
        Self { trend, book, trade }
    }

    pub fn sum(&self) -> f64 {
        self.trend + self.book + self.trade
    }

    /// Scale to unit sum; zero-sum weights fall back to equal thirds
    pub fn normalized(&self) -> Self {
        let total = self.sum();
        if total <= 0.0 {
            return Self::new(1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0);
        }
        Self::new(self.trend / total, self.book / total, self.trade / total)
    }
}

/// Score combiner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub depth_min: f64,
    pub book_discount_depth: f64,
    pub book_discount: f64,
    pub edge_floor_bps: f64,
    pub min_trade_samples: usize,
    pub spike_factor: f64,
    pub spike_lookback: usize,
    pub vol_low_bps: f64,
    pub vol_high_bps: f64,
    pub weights_low: RegimeWeights,
    pub weights_medium: RegimeWeights,
    pub weights_high: RegimeWeights,
    pub vwap_override_pct: f64,
    pub cancel_ratio_threshold: f64,
    pub conviction_damping: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            depth_min: 5.0,
            book_discount_depth: 10.0,
            book_discount: 0.3,
            edge_floor_bps: 1.0,
            min_trade_samples: 20,
            spike_factor: 2.0,
            spike_lookback: 20,
            vol_low_bps: 5.0,
            vol_high_bps: 20.0,
            weights_low: RegimeWeights::new(0.30, 0.50, 0.20),
            weights_medium: RegimeWeights::new(0.40, 0.40, 0.20),
            weights_high: RegimeWeights::new(0.50, 0.25, 0.25),
            vwap_override_pct: 0.01,
            cancel_ratio_threshold: 0.75,
            conviction_damping: 0.3,
        }
    }
}

impl ScoringConfig {
    pub fn regime_for(&self, volatility_bps: f64) -> VolatilityRegime {
        if volatility_bps < self.vol_low_bps {
            VolatilityRegime::Low
        } else if volatility_bps < self.vol_high_bps {
            VolatilityRegime::Medium
        } else {
            VolatilityRegime::High
        }
    }

    pub fn weights_for(&self, regime: VolatilityRegime) -> RegimeWeights {
        match regime {
            VolatilityRegime::Low => self.weights_low,
            VolatilityRegime::Medium => self.weights_medium,
            VolatilityRegime::High => self.weights_high,
        }
    }
}

/// Hysteresis thresholds and cooldown
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub enter_long: u8,
    pub exit_long: u8,
    pub enter_short: u8,
    pub exit_short: u8,
    pub cooldown_ms: i64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            enter_long: 82,
            exit_long: 68,
            enter_short: 18,
            exit_short: 32,
            cooldown_ms: 30_000,
        }
    }
}

impl SignalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enter_long <= self.exit_long {
            return Err(ConfigError::Validation(format!(
                "enter_long ({}) must be above exit_long ({})",
                self.enter_long, self.exit_long
            )));
        }
        if self.exit_short <= self.enter_short {
            return Err(ConfigError::Validation(format!(
                "exit_short ({}) must be above enter_short ({})",
                self.exit_short, self.enter_short
            )));
        }
        if self.enter_short >= self.enter_long {
            return Err(ConfigError::Validation(format!(
                "enter_short ({}) must be below enter_long ({})",
                self.enter_short, self.enter_long
            )));
        }
        if self.enter_long > 100 || self.exit_short > 100 {
            return Err(ConfigError::Validation("signal thresholds must be within 0..=100".into()));
        }
        if self.cooldown_ms < 0 {
            return Err(ConfigError::Validation("cooldown_ms must be non-negative".into()));
        }
        Ok(())
    }
}

/// Three-filter bias readout (OBI, buy-count ratio, mid vs SMA)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowBiasConfig {
    pub obi_long: f64,
    pub obi_short: f64,
    pub tfi_long: f64,
    pub tfi_short: f64,
    pub top_levels: usize,
    pub tfi_window_ms: i64,             // Short buy-ratio window, separate from the scoring window
    pub min_signal_interval_ms: i64,
}

impl Default for FlowBiasConfig {
    fn default() -> Self {
        Self {
            obi_long: 0.20,
            obi_short: -0.20,
            tfi_long: 0.60,
            tfi_short: 0.40,
            top_levels: 10,
            tfi_window_ms: 3_000,
            min_signal_interval_ms: 2_000,
        }
    }
}

/// Per-instrument runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub recompute_interval_ms: u64,
    pub feed_buffer: usize,
    pub emit_hold: bool,
    pub resync_interval_ms: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            recompute_interval_ms: 200,
            feed_buffer: 4096,
            emit_hold: false,
            resync_interval_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub json_logs: bool,
    pub console_output: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            json_logs: false,
            console_output: true,
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub instruments: Vec<String>,
    pub book: BookConfig,
    pub window: WindowConfig,
    pub trend: TrendConfig,
    pub scoring: ScoringConfig,
    pub signal: SignalConfig,
    pub flow_bias: FlowBiasConfig,
    pub pipeline: PipelineConfig,
    pub monitoring: MonitoringConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instruments: vec!["BTCUSDT".to_string()],
            book: BookConfig::default(),
            window: WindowConfig::default(),
            trend: TrendConfig::default(),
            scoring: ScoringConfig::default(),
            signal: SignalConfig::default(),
            flow_bias: FlowBiasConfig::default(),
            pipeline: PipelineConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Collect every validation problem; empty means valid
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.instruments.is_empty() {
            errors.push("at least one instrument is required".to_string());
        }
        errors.extend(self.pipeline_errors());
        errors
    }

    /// Whole-engine check, including the instrument list
    pub fn check(&self) -> Result<(), ConfigError> {
        into_result(self.validation_errors())
    }

    /// Check every section one pipeline is built from. The instrument list is not needed.
    pub fn check_pipeline(&self) -> Result<(), ConfigError> {
        into_result(self.pipeline_errors())
    }

    fn pipeline_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.book.depth_levels == 0 {
            errors.push("book.depth_levels must be positive".to_string());
        }
        if !(self.book.flash_damping > 0.0 && self.book.flash_damping <= 1.0) {
            errors.push("book.flash_damping must be in (0, 1]".to_string());
        }
        if !(self.book.level_decay > 0.0 && self.book.level_decay <= 1.0) {
            errors.push("book.level_decay must be in (0, 1]".to_string());
        }
        if self.book.order_lifetime_ms < 0 {
            errors.push("book.order_lifetime_ms must be non-negative".to_string());
        }

        if self.window.window_ms <= 0 || self.window.volatility_window_ms <= 0 {
            errors.push("window durations must be positive".to_string());
        }
        if self.window.max_trades == 0 || self.window.max_flow_events == 0 {
            errors.push("window capacities must be positive".to_string());
        }

        if self.trend.ema_short_half_life_ms <= 0
            || self.trend.ema_short_half_life_ms >= self.trend.ema_long_half_life_ms
        {
            errors.push("trend: short EMA half-life must be positive and below the long one".to_string());
        }

        let scoring = &self.scoring;
        if scoring.depth_min < 0.0 || scoring.book_discount_depth < scoring.depth_min {
            errors.push("scoring: book_discount_depth must be >= depth_min >= 0".to_string());
        }
        if scoring.vol_low_bps >= scoring.vol_high_bps {
            errors.push("scoring: vol_low_bps must be below vol_high_bps".to_string());
        }
        for (name, w) in [
            ("weights_low", scoring.weights_low),
            ("weights_medium", scoring.weights_medium),
            ("weights_high", scoring.weights_high),
        ] {
            if w.trend < 0.0 || w.book < 0.0 || w.trade < 0.0 || w.sum() <= 0.0 {
                errors.push(format!("scoring.{} must be non-negative with a positive sum", name));
            }
        }
        if scoring.spike_lookback == 0 || scoring.min_trade_samples < scoring.spike_lookback {
            errors.push("scoring: min_trade_samples must cover spike_lookback".to_string());
        }

        if let Err(e) = self.signal.validate() {
            errors.push(e.to_string());
        }

        if self.flow_bias.tfi_window_ms <= 0 || self.flow_bias.top_levels == 0 {
            errors.push("flow_bias: tfi_window_ms and top_levels must be positive".to_string());
        }

        if self.pipeline.recompute_interval_ms == 0 {
            errors.push("pipeline.recompute_interval_ms must be positive".to_string());
        }

        errors
    }
}

fn into_result(errors: Vec<String>) -> Result<(), ConfigError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors.join("; ")))
    }
}

// ============================================================================
// Configuration Summary
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub instruments: Vec<String>,
    pub depth_levels: usize,
    pub window_ms: i64,
    pub recompute_interval_ms: u64,
    pub enter_long: u8,
    pub exit_long: u8,
    pub enter_short: u8,
    pub exit_short: u8,
    pub log_level: String,
}

// ============================================================================
// Configuration Manager
// ============================================================================

pub struct ConfigManager {
    config: Arc<RwLock<EngineConfig>>,
}

impl ConfigManager {
    pub fn new(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut manager = Self {
            config: Arc::new(RwLock::new(EngineConfig::default())),
        };

        if let Some(path) = config_path {
            manager.load_from_file(path)?;
        }

        manager.load_from_env();

        info!("Configuration initialized");
        Ok(manager)
    }

    pub fn from_config(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
        }
    }

    /// Load configuration from JSON file; unknown or malformed sections keep defaults
    pub fn load_from_file(&mut self, config_path: &str) -> Result<(), ConfigError> {
        let path = Path::new(config_path);
        if !path.exists() {
            warn!(path = config_path, "Config file not found");
            return Ok(());
        }

        let content = fs::read_to_string(path)?;
        let sections: HashMap<String, serde_json::Value> = serde_json::from_str(&content)?;

        let mut config = self.config.write();

        if let Some(value) = sections.get("instruments") {
            match serde_json::from_value::<Vec<String>>(value.clone()) {
                Ok(instruments) => config.instruments = instruments,
                Err(e) => warn!(error = %e, "Ignoring malformed instruments list"),
            }
        }

        macro_rules! load_section {
            ($key:literal, $field:ident, $ty:ty) => {
                if let Some(value) = sections.get($key) {
                    match serde_json::from_value::<$ty>(value.clone()) {
                        Ok(section) => config.$field = section,
                        Err(e) => warn!(section = $key, error = %e, "Ignoring malformed config section"),
                    }
                }
            };
        }

        load_section!("book", book, BookConfig);
        load_section!("window", window, WindowConfig);
        load_section!("trend", trend, TrendConfig);
        load_section!("scoring", scoring, ScoringConfig);
        load_section!("signal", signal, SignalConfig);
        load_section!("flow_bias", flow_bias, FlowBiasConfig);
        load_section!("pipeline", pipeline, PipelineConfig);
        load_section!("monitoring", monitoring, MonitoringConfig);

        info!(path = config_path, "Configuration loaded");
        Ok(())
    }

    /// Environment overrides
    pub fn load_from_env(&mut self) {
        let mut config = self.config.write();

        if let Ok(level) = std::env::var("FLOWSCORE_LOG_LEVEL") {
            config.monitoring.log_level = level;
        }
        if let Ok(list) = std::env::var("FLOWSCORE_INSTRUMENTS") {
            let instruments: Vec<String> = list
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !instruments.is_empty() {
                config.instruments = instruments;
            }
        }
        if let Ok(interval) = std::env::var("FLOWSCORE_RECOMPUTE_MS") {
            match interval.parse::<u64>() {
                Ok(ms) => config.pipeline.recompute_interval_ms = ms,
                Err(_) => warn!(value = %interval, "Ignoring invalid FLOWSCORE_RECOMPUTE_MS"),
            }
        }
    }

    /// Save configuration to JSON file
    pub fn save_to_file(&self, config_path: &str) -> Result<(), ConfigError> {
        if let Some(parent) = Path::new(config_path).parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&*self.config.read())?;
        fs::write(config_path, json)?;

        info!(path = config_path, "Configuration saved");
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<bool, ConfigError> {
        let errors = self.config.read().validation_errors();

        if !errors.is_empty() {
            for error in &errors {
                warn!(error = %error, "Config validation error");
            }
            return Ok(false);
        }

        info!("Configuration validated successfully");
        Ok(true)
    }

    /// Get configuration summary
    pub fn get_summary(&self) -> ConfigSummary {
        let config = self.config.read();

        ConfigSummary {
            instruments: config.instruments.clone(),
            depth_levels: config.book.depth_levels,
            window_ms: config.window.window_ms,
            recompute_interval_ms: config.pipeline.recompute_interval_ms,
            enter_long: config.signal.enter_long,
            exit_long: config.signal.exit_long,
            enter_short: config.signal.enter_short,
            exit_short: config.signal.exit_short,
            log_level: config.monitoring.log_level.clone(),
        }
    }

    pub fn engine(&self) -> EngineConfig {
        self.config.read().clone()
    }

    pub fn scoring(&self) -> ScoringConfig {
        self.config.read().scoring.clone()
    }

    pub fn signal(&self) -> SignalConfig {
        self.config.read().signal.clone()
    }

    pub fn pipeline(&self) -> PipelineConfig {
        self.config.read().pipeline.clone()
    }

    pub fn monitoring(&self) -> MonitoringConfig {
        self.config.read().monitoring.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs() {
        let config = EngineConfig::default();
        assert_eq!(config.book.depth_levels, 20);
        assert_eq!(config.book.flash_damping, 0.3);
        assert_eq!(config.signal.enter_long, 82);
        assert_eq!(config.signal.exit_long, 68);
        assert_eq!(config.pipeline.recompute_interval_ms, 200);
        assert_eq!(config.trend.ema_short_half_life_ms, 60_000);
        assert!(config.validation_errors().is_empty());
    }

    #[test]
    fn test_config_manager() {
        let manager = ConfigManager::new(None).unwrap();
        let validation_result = manager.validate();
        assert!(validation_result.is_ok());
        assert!(validation_result.unwrap());
    }

    #[test]
    fn test_signal_hysteresis_validation() {
        let mut signal = SignalConfig::default();
        signal.exit_long = 90;
        assert!(signal.validate().is_err());

        let mut signal = SignalConfig::default();
        signal.enter_short = 40;
        assert!(signal.validate().is_err());
    }

    #[test]
    fn test_invalid_config_reports_errors() {
        let mut config = EngineConfig::default();
        config.scoring.vol_low_bps = 50.0;
        config.book.flash_damping = 0.0;
        let manager = ConfigManager::from_config(config);
        assert!(!manager.validate().unwrap());
    }

    #[test]
    fn test_check_joins_errors() {
        assert!(EngineConfig::default().check().is_ok());

        let mut config = EngineConfig::default();
        config.book.depth_levels = 0;
        config.window.window_ms = -5;
        match config.check_pipeline() {
            Err(ConfigError::Validation(msg)) => {
                assert!(msg.contains("book.depth_levels must be positive"));
                assert!(msg.contains("window durations must be positive"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        // A single pipeline does not need the instrument list
        let mut config = EngineConfig::default();
        config.instruments.clear();
        assert!(config.check_pipeline().is_ok());
        assert!(config.check().is_err());
    }

    #[test]
    fn test_regime_selection() {
        let scoring = ScoringConfig::default();
        assert_eq!(scoring.regime_for(1.0), VolatilityRegime::Low);
        assert_eq!(scoring.regime_for(10.0), VolatilityRegime::Medium);
        assert_eq!(scoring.regime_for(50.0), VolatilityRegime::High);
        let w = scoring.weights_for(VolatilityRegime::High);
        assert!((w.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_weights_normalized() {
        let w = RegimeWeights::new(0.3, 0.35, 0.2).normalized();
        assert!((w.sum() - 1.0).abs() < 1e-9);
        let zero = RegimeWeights::new(0.0, 0.0, 0.0).normalized();
        assert!((zero.trend - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("flowscore_cfg_{}", std::process::id()));
        let path = dir.join("engine.json");
        let path_str = path.to_str().unwrap();

        let mut config = EngineConfig::default();
        config.instruments = vec!["ETHUSDT".to_string(), "SOLUSDT".to_string()];
        config.signal.cooldown_ms = 5_000;
        ConfigManager::from_config(config).save_to_file(path_str).unwrap();

        let mut loaded = ConfigManager::from_config(EngineConfig::default());
        loaded.load_from_file(path_str).unwrap();
        assert_eq!(loaded.get_summary().instruments, vec!["ETHUSDT", "SOLUSDT"]);
        assert_eq!(loaded.signal().cooldown_ms, 5_000);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let dir = std::env::temp_dir().join(format!("flowscore_partial_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("partial.json");
        fs::write(&path, r#"{"signal": {"enter_long": 90}}"#).unwrap();

        let mut loaded = ConfigManager::from_config(EngineConfig::default());
        loaded.load_from_file(path.to_str().unwrap()).unwrap();
        let signal = loaded.signal();
        assert_eq!(signal.enter_long, 90);
        assert_eq!(signal.exit_long, 68);

        let _ = fs::remove_dir_all(dir);
    }
}
