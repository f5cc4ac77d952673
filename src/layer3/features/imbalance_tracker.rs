// Imbalance Tracker - resting book imbalance and aggressor trade imbalance
// OBI over weighted depth, TFI and buy-count ratio over the trade window

use crate::core::types::TradeEvent;
use crate::layer2::event_window::EventWindowStore;
use crate::layer2::orderbook::WeightedDepth;
use crate::layer2::parser::PriceLevel;

/// Guards the OBI denominator
pub const OBI_EPSILON: f64 = 1e-9;

/// Order-book imbalance in [-1, 1]; 0 when both sides are empty
pub fn order_book_imbalance(depth: &WeightedDepth) -> f64 {
    let total = depth.bid + depth.ask;
    if total <= 0.0 {
        return 0.0;
    }
    (depth.bid - depth.ask) / (total + OBI_EPSILON)
}

/// Plain top-N imbalance over raw sizes, as used by the flow bias readout
pub fn top_n_imbalance(bids: &[PriceLevel], asks: &[PriceLevel]) -> f64 {
    if bids.is_empty() || asks.is_empty() {
        return 0.0;
    }
    let bid_vol: f64 = bids.iter().map(|l| l.size).sum();
    let ask_vol: f64 = asks.iter().map(|l| l.size).sum();
    let total = bid_vol + ask_vol;
    if total <= 0.0 {
        return 0.0;
    }
    (bid_vol - ask_vol) / total
}

/// Aggressor volume and counts over one window
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TradeFlowReading {
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub buy_count: usize,
    pub sell_count: usize,
}

impl TradeFlowReading {
    pub fn from_window(store: &EventWindowStore, window_ms: i64, now_ms: i64) -> Self {
        Self::from_trades(store.trades_in_window(window_ms, now_ms))
    }

    pub fn from_trades<'a, I>(trades: I) -> Self
    where
        I: IntoIterator<Item = &'a TradeEvent>,
    {
        let mut reading = Self::default();
        for trade in trades {
            if trade.is_buy() {
                reading.buy_volume += trade.size;
                reading.buy_count += 1;
            } else {
                reading.sell_volume += trade.size;
                reading.sell_count += 1;
            }
        }
        reading
    }

    pub fn trade_count(&self) -> usize {
        self.buy_count + self.sell_count
    }

    /// Trade-flow imbalance in [-1, 1]; 0 with no volume
    pub fn tfi(&self) -> f64 {
        let total = self.buy_volume + self.sell_volume;
        if total <= 0.0 {
            return 0.0;
        }
        (self.buy_volume - self.sell_volume) / total
    }

    /// Share of trades that were aggressive buys; 0.5 when empty
    pub fn buy_ratio(&self) -> f64 {
        let n = self.trade_count();
        if n == 0 {
            return 0.5;
        }
        self.buy_count as f64 / n as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::WindowConfig;
    use crate::core::types::{AggressorSide, TradeEvent};

    #[test]
    fn test_obi_bounds_and_empty() {
        let empty = WeightedDepth::default();
        assert_eq!(order_book_imbalance(&empty), 0.0);

        let depth = WeightedDepth { bid: 1000.0, ask: 400.0, total: 1400.0 };
        let obi = order_book_imbalance(&depth);
        assert!((obi - 0.428571).abs() < 1e-4);

        let one_sided = WeightedDepth { bid: 5.0, ask: 0.0, total: 5.0 };
        let obi = order_book_imbalance(&one_sided);
        assert!(obi <= 1.0 && obi > 0.99);
    }

    #[test]
    fn test_top_n_imbalance() {
        let bids = vec![PriceLevel::new(99.0, 3.0), PriceLevel::new(98.0, 3.0)];
        let asks = vec![PriceLevel::new(101.0, 2.0)];
        assert!((top_n_imbalance(&bids, &asks) - 0.5).abs() < 1e-12);
        assert_eq!(top_n_imbalance(&bids, &[]), 0.0);
    }

    #[test]
    fn test_trade_flow_reading() {
        let mut store = EventWindowStore::new("BTCUSDT", &WindowConfig::default());
        for i in 0..25 {
            store.record_trade(TradeEvent::new(i, 100.0, 10.0, AggressorSide::Buy));
        }
        for i in 25..30 {
            store.record_trade(TradeEvent::new(i, 100.0, 10.0, AggressorSide::Sell));
        }

        let reading = TradeFlowReading::from_window(&store, 30_000, 30);
        assert!((reading.tfi() - 0.6667).abs() < 1e-3);
        assert!((reading.buy_ratio() - 25.0 / 30.0).abs() < 1e-12);
        assert_eq!(reading.trade_count(), 30);

        let none = TradeFlowReading::default();
        assert_eq!(none.tfi(), 0.0);
        assert_eq!(none.buy_ratio(), 0.5);
    }
}
