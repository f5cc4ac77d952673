// Feature Engine - one read of every feature the score combiner needs
// Replica + window store + trend state -> FeatureInputs (capture) -> FeatureSet (derive)

use std::fmt;

use crate::core::config::{EngineConfig, ScoringConfig};
use crate::core::types::{Side, TradeEvent};
use crate::layer2::event_window::EventWindowStore;
use crate::layer2::orderbook::{OrderBookReplica, WeightedDepth};
use crate::layer2::parser::PriceLevel;
use crate::layer3::features::imbalance_tracker::{order_book_imbalance, top_n_imbalance, TradeFlowReading};
use crate::layer3::features::orderflow_tracker::{order_flow_imbalance, refill_score, FlowTotals, OfiReading};
use crate::layer3::features::trade_tracker::{sweep_flag, uptick_ratio, volume_spike_ratio};
use crate::layer3::features::trend_tracker::{TrendSnapshot, TrendTracker};

/// All features for one scoring cycle
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub timestamp_ms: i64,
    pub depth: WeightedDepth,
    pub obi: f64,
    pub top_n_obi: f64,
    pub trade_flow: TradeFlowReading,
    pub bias_flow: TradeFlowReading,    // Short window, flow bias only
    pub tfi: f64,
    pub flow: FlowTotals,
    pub ofi: OfiReading,
    pub refill: f64,
    pub uptick_ratio: f64,
    pub sweep: i8,
    pub spike_ratio: Option<f64>,
    pub trend: TrendSnapshot,
}

impl FeatureSet {
    pub fn trade_samples(&self) -> usize {
        self.trade_flow.trade_count()
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Features(depth={:.2}, obi={:.3}, tfi={:.3}, ofi={:.3}, refill={:.3}, uptick={:.2}, sweep={}, spike={:?})",
            self.depth.total, self.obi, self.tfi, self.ofi.value, self.refill,
            self.uptick_ratio, self.sweep, self.spike_ratio
        )
    }
}

/// What one cycle reads from the live state, detached from it.
///
/// Only the in-window trades are copied; flow events are reduced to totals and the
/// book to its top-level reads.
#[derive(Debug, Clone)]
pub struct FeatureInputs {
    pub timestamp_ms: i64,
    pub depth: WeightedDepth,
    pub top_bids: Vec<PriceLevel>,
    pub top_asks: Vec<PriceLevel>,
    pub bid_resting: f64,
    pub ask_resting: f64,
    pub trades: Vec<TradeEvent>,        // Scoring window, oldest first
    pub flow: FlowTotals,
    pub bias_flow: TradeFlowReading,
    pub trend: TrendSnapshot,
}

/// Reads features with fixed parameters for one instrument
#[derive(Debug, Clone)]
pub struct FeatureEngine {
    depth_levels: usize,
    window_ms: i64,
    flow_bias_levels: usize,
    flow_bias_window_ms: i64,
    scoring: ScoringConfig,
}

impl FeatureEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            depth_levels: config.book.depth_levels,
            window_ms: config.window.window_ms,
            flow_bias_levels: config.flow_bias.top_levels,
            flow_bias_window_ms: config.flow_bias.tfi_window_ms,
            scoring: config.scoring.clone(),
        }
    }

    pub fn compute(
        &self,
        book: &OrderBookReplica,
        window: &EventWindowStore,
        trend: &TrendTracker,
        now_ms: i64,
    ) -> FeatureSet {
        self.derive(self.capture(book, window, trend, now_ms))
    }

    pub fn capture(
        &self,
        book: &OrderBookReplica,
        window: &EventWindowStore,
        trend: &TrendTracker,
        now_ms: i64,
    ) -> FeatureInputs {
        FeatureInputs {
            timestamp_ms: now_ms,
            depth: book.top_weighted_depth(self.depth_levels, now_ms),
            top_bids: book.top_levels(Side::Bid, self.flow_bias_levels),
            top_asks: book.top_levels(Side::Ask, self.flow_bias_levels),
            bid_resting: book.resting_volume(Side::Bid),
            ask_resting: book.resting_volume(Side::Ask),
            trades: window.trades_in_window(self.window_ms, now_ms).copied().collect(),
            flow: FlowTotals::from_window(window, self.window_ms, now_ms),
            bias_flow: TradeFlowReading::from_window(window, self.flow_bias_window_ms, now_ms),
            trend: trend.snapshot(now_ms),
        }
    }

    pub fn derive(&self, inputs: FeatureInputs) -> FeatureSet {
        let trade_flow = TradeFlowReading::from_trades(&inputs.trades);
        let ofi = order_flow_imbalance(&inputs.flow, inputs.depth.total, self.scoring.cancel_ratio_threshold);

        FeatureSet {
            timestamp_ms: inputs.timestamp_ms,
            obi: order_book_imbalance(&inputs.depth),
            top_n_obi: top_n_imbalance(&inputs.top_bids, &inputs.top_asks),
            tfi: trade_flow.tfi(),
            trade_flow,
            bias_flow: inputs.bias_flow,
            refill: refill_score(&inputs.flow),
            flow: inputs.flow,
            ofi,
            uptick_ratio: uptick_ratio(&inputs.trades),
            sweep: sweep_flag(inputs.trades.last(), inputs.bid_resting, inputs.ask_resting),
            spike_ratio: volume_spike_ratio(&inputs.trades, self.scoring.spike_lookback),
            trend: inputs.trend,
            depth: inputs.depth,
        }
    }
}
