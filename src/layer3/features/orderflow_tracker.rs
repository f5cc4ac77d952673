// Order Flow Tracker - net resting liquidity change and refill behaviour
// Weighted add/remove totals from the flow window -> OFI and refill score

use crate::core::types::Side;
use crate::layer2::event_window::EventWindowStore;

/// Guards the refill ratio denominators
pub const REFILL_EPSILON: f64 = 1e-6;

/// Weighted liquidity added and removed per side over one window
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FlowTotals {
    pub bid_added: f64,
    pub bid_removed: f64,
    pub ask_added: f64,
    pub ask_removed: f64,
}

impl FlowTotals {
    pub fn from_window(store: &EventWindowStore, window_ms: i64, now_ms: i64) -> Self {
        let (bid_added, bid_removed) = store.side_flow(Side::Bid, window_ms, now_ms);
        let (ask_added, ask_removed) = store.side_flow(Side::Ask, window_ms, now_ms);
        Self { bid_added, bid_removed, ask_added, ask_removed }
    }

    pub fn total_change(&self) -> f64 {
        self.bid_added + self.bid_removed + self.ask_added + self.ask_removed
    }

    /// Removed share of all change; 0 when nothing moved
    pub fn cancel_ratio(&self) -> f64 {
        let total = self.total_change();
        if total <= 0.0 {
            return 0.0;
        }
        (self.bid_removed + self.ask_removed) / total
    }

    /// Bid-side net minus ask-side net
    pub fn net(&self) -> f64 {
        (self.bid_added - self.bid_removed) - (self.ask_added - self.ask_removed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OfiReading {
    pub raw_net: f64,
    pub net: f64,           // After cancellation dampening
    pub cancel_ratio: f64,
    pub dampened: bool,
    pub value: f64,         // tanh(net / depth), in [-1, 1]
}

/// Order-flow imbalance. A cancel-dominated window halves the net before normalising.
pub fn order_flow_imbalance(totals: &FlowTotals, depth: f64, cancel_ratio_threshold: f64) -> OfiReading {
    let raw_net = totals.net();
    let cancel_ratio = totals.cancel_ratio();
    let dampened = cancel_ratio > cancel_ratio_threshold;
    let net = if dampened { raw_net * 0.5 } else { raw_net };

    OfiReading {
        raw_net,
        net,
        cancel_ratio,
        dampened,
        value: (net / depth.max(1.0)).tanh(),
    }
}

/// tanh(refillBid - refillAsk), where refill is added / removed per side
pub fn refill_score(totals: &FlowTotals) -> f64 {
    let refill_bid = totals.bid_added / (totals.bid_removed + REFILL_EPSILON);
    let refill_ask = totals.ask_added / (totals.ask_removed + REFILL_EPSILON);
    (refill_bid - refill_ask).tanh()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::WindowConfig;
    use crate::core::types::FlowDelta;

    #[test]
    fn test_cancel_dominated_net_is_halved() {
        let totals = FlowTotals { bid_removed: 100.0, ..FlowTotals::default() };
        let ofi = order_flow_imbalance(&totals, 500.0, 0.75);

        assert_eq!(ofi.raw_net, -100.0);
        assert_eq!(ofi.net, -50.0);
        assert!(ofi.dampened);
        assert!((ofi.value - (-50.0f64 / 500.0).tanh()).abs() < 1e-12);
    }

    #[test]
    fn test_balanced_flow_not_dampened() {
        let totals = FlowTotals { bid_added: 60.0, bid_removed: 20.0, ask_added: 10.0, ask_removed: 10.0 };
        let ofi = order_flow_imbalance(&totals, 0.2, 0.75);

        assert!(!ofi.dampened);
        assert_eq!(ofi.net, 40.0);
        // Depth below 1 is floored to 1
        assert!((ofi.value - 40.0f64.tanh()).abs() < 1e-12);
        assert!(ofi.value <= 1.0);
    }

    #[test]
    fn test_empty_flow() {
        let totals = FlowTotals::default();
        let ofi = order_flow_imbalance(&totals, 100.0, 0.75);
        assert_eq!(ofi.value, 0.0);
        assert_eq!(ofi.cancel_ratio, 0.0);
        assert_eq!(refill_score(&totals), 0.0);
    }

    #[test]
    fn test_refill_score_sign() {
        // Bids refilled as fast as removed, asks pulled without refill
        let totals = FlowTotals { bid_added: 10.0, bid_removed: 10.0, ask_added: 0.0, ask_removed: 10.0 };
        let score = refill_score(&totals);
        assert!((score - 1.0f64.tanh()).abs() < 1e-6);
    }

    #[test]
    fn test_totals_from_window() {
        let mut store = EventWindowStore::new("BTCUSDT", &WindowConfig::default());
        store.record_flow(FlowDelta { timestamp_ms: 100, side: Side::Bid, added_qty: 0.0, removed_qty: 100.0, level_weight: 1.0 });
        let totals = FlowTotals::from_window(&store, 30_000, 200);
        assert_eq!(totals.bid_removed, 100.0);
        assert_eq!(totals.cancel_ratio(), 1.0);
    }
}
