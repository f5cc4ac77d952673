// Layer 3 - Features and Signals
// Reads replica and window state, scores it, and drives the position bias

// Common utilities
pub mod common;

// Feature readers - OBI, TFI, OFI, refill, uptick, sweep, spike, trend
pub mod features;

// Scoring and signal state
pub mod signal;

// Feature re-exports
pub use features::{FeatureEngine, FeatureSet, TrendSnapshot, TrendTracker};

// Signal re-exports
pub use signal::{
    CompositeScore, FlowBias, FlowBiasDetector, InsufficientData, ScoreCombiner, ScoreNote,
    SignalStateMachine,
};
