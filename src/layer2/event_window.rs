// Event Window Store - time-pruned trade and flow buffers for one instrument
// Append-only, capacity bounded, evicted from the front by age

use std::fmt;
use tracing::debug;

use crate::core::config::WindowConfig;
use crate::core::types::{FlowDelta, Side, TradeEvent};
use crate::layer3::common::time_windows::TimeWindow;

/// Statistics snapshot from the window store
#[derive(Debug, Clone)]
pub struct EventWindowStats {
    pub trades_in_buffer: usize,
    pub flows_in_buffer: usize,
    pub trades_recorded: u64,
    pub flows_recorded: u64,
    pub clamped_timestamps: u64,
    pub evicted_by_capacity: u64,
    pub last_trade_price: Option<f64>,
}

impl fmt::Display for EventWindowStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EventWindow(trades={}, flows={}, recorded={}/{}, clamped={})",
            self.trades_in_buffer, self.flows_in_buffer, self.trades_recorded,
            self.flows_recorded, self.clamped_timestamps
        )
    }
}

#[derive(Debug, Clone)]
pub struct EventWindowStore {
    pub symbol: String,
    window_ms: i64,

    trades: TimeWindow<TradeEvent>,
    flows: TimeWindow<FlowDelta>,

    trades_recorded: u64,
    flows_recorded: u64,
}

impl EventWindowStore {
    pub fn new(symbol: &str, config: &WindowConfig) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            window_ms: config.window_ms,
            trades: TimeWindow::new(config.window_ms, config.max_trades),
            flows: TimeWindow::new(config.window_ms, config.max_flow_events),
            trades_recorded: 0,
            flows_recorded: 0,
        }
    }

    /// Append a trade exactly once. A timestamp older than the last accepted one is
    /// clamped forward so the buffer stays ordered.
    pub fn record_trade(&mut self, trade: TradeEvent) {
        let ts = trade.timestamp_ms;
        if self.trades.push(trade) {
            debug!(ts = ts, "Out-of-order trade clamped");
        }
        self.trades_recorded += 1;
    }

    pub fn record_flow(&mut self, flow: FlowDelta) {
        self.flows.push(flow);
        self.flows_recorded += 1;
    }

    pub fn record_flows<I: IntoIterator<Item = FlowDelta>>(&mut self, flows: I) {
        for flow in flows {
            self.record_flow(flow);
        }
    }

    /// Evict everything older than `now - window_ms`
    pub fn prune(&mut self, now_ms: i64) -> usize {
        self.prune_window(self.window_ms, now_ms)
    }

    pub fn prune_window(&mut self, window_ms: i64, now_ms: i64) -> usize {
        let cutoff = now_ms - window_ms;
        self.trades.prune_before(cutoff) + self.flows.prune_before(cutoff)
    }

    // ========================================================================
    // Windowed reads
    // ========================================================================

    pub fn trades_in_window(&self, window_ms: i64, now_ms: i64) -> impl Iterator<Item = &TradeEvent> {
        self.trades.since(window_ms, now_ms)
    }

    pub fn flows_in_window(&self, window_ms: i64, now_ms: i64) -> impl Iterator<Item = &FlowDelta> {
        self.flows.since(window_ms, now_ms)
    }

    /// Sum of trade sizes matching `predicate` inside the window
    pub fn sum_trades_in_window<P>(&self, window_ms: i64, now_ms: i64, predicate: P) -> f64
    where
        P: Fn(&TradeEvent) -> bool,
    {
        self.trades_in_window(window_ms, now_ms)
            .filter(|t| predicate(*t))
            .map(|t| t.size)
            .sum()
    }

    pub fn count_trades_in_window<P>(&self, window_ms: i64, now_ms: i64, predicate: P) -> usize
    where
        P: Fn(&TradeEvent) -> bool,
    {
        self.trades_in_window(window_ms, now_ms).filter(|t| predicate(*t)).count()
    }

    /// Sum of `value` over flow events matching `predicate` inside the window
    pub fn sum_flow_in_window<P, V>(&self, window_ms: i64, now_ms: i64, predicate: P, value: V) -> f64
    where
        P: Fn(&FlowDelta) -> bool,
        V: Fn(&FlowDelta) -> f64,
    {
        self.flows_in_window(window_ms, now_ms)
            .filter(|f| predicate(*f))
            .map(|f| value(f))
            .sum()
    }

    /// Weighted (added, removed) for one side inside the window
    pub fn side_flow(&self, side: Side, window_ms: i64, now_ms: i64) -> (f64, f64) {
        let added = self.sum_flow_in_window(window_ms, now_ms, |f| f.side == side, |f| f.weighted_added());
        let removed = self.sum_flow_in_window(window_ms, now_ms, |f| f.side == side, |f| f.weighted_removed());
        (added, removed)
    }

    /// The `n` most recent trades, oldest first
    pub fn recent_trades(&self, n: usize) -> Vec<TradeEvent> {
        self.trades.tail(n).copied().collect()
    }

    pub fn last_trade(&self) -> Option<&TradeEvent> {
        self.trades.latest()
    }

    pub fn trade_count(&self) -> usize {
        self.trades.len()
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    pub fn get_stats(&self) -> EventWindowStats {
        EventWindowStats {
            trades_in_buffer: self.trades.len(),
            flows_in_buffer: self.flows.len(),
            trades_recorded: self.trades_recorded,
            flows_recorded: self.flows_recorded,
            clamped_timestamps: self.trades.clamped() + self.flows.clamped(),
            evicted_by_capacity: self.trades.evicted_by_capacity() + self.flows.evicted_by_capacity(),
            last_trade_price: self.last_trade().map(|t| t.price),
        }
    }
}
