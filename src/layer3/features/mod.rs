// Features - pure reads over the replica, event windows and trend state
// Feeds the score combiner once per throttled cycle

// Module structure:
// - imbalance_tracker.rs: OBI, TFI, buy-count ratio
// - orderflow_tracker.rs: OFI with cancellation dampening, refill score
// - trade_tracker.rs: uptick ratio, sweep flag, volume spike
// - trend_tracker.rs: EMA pair, VWAP, volatility, mid SMA
// - feature_engine.rs: FeatureEngine -> FeatureSet

pub mod imbalance_tracker;
pub mod orderflow_tracker;
pub mod trade_tracker;
pub mod trend_tracker;
pub mod feature_engine;

pub use feature_engine::{FeatureEngine, FeatureInputs, FeatureSet};
pub use imbalance_tracker::{order_book_imbalance, top_n_imbalance, TradeFlowReading};
pub use orderflow_tracker::{order_flow_imbalance, refill_score, FlowTotals, OfiReading};
pub use trade_tracker::{sweep_flag, uptick_ratio, volume_spike_ratio};
pub use trend_tracker::{TrendSnapshot, TrendTracker};
