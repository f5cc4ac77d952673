// Core Module - Foundational types, config, logging, signal delivery

pub mod types;
pub mod config;
pub mod logger;
pub mod events;

// Re-export commonly used items for convenience
pub use types::*;
pub use config::{
    BookConfig, WindowConfig, TrendConfig, ScoringConfig, SignalConfig, FlowBiasConfig,
    PipelineConfig, MonitoringConfig, EngineConfig, RegimeWeights,
    ConfigManager, ConfigSummary, ConfigError,
};
pub use logger::{setup_logging, setup_from_config, instrument_span};
pub use events::{SignalBus, SignalBusStatsSnapshot, SignalEvent, SignalSink};
