// Trade Tracker - tick direction, sweeps and volume spikes
// Pure reads over recent trades and the opposite side's resting volume

use crate::core::types::{AggressorSide, TradeEvent};

/// Share of consecutive pairs where a buy printed above, or a sell below, the prior trade.
/// Neutral 0.5 with fewer than 3 trades.
pub fn uptick_ratio(trades: &[TradeEvent]) -> f64 {
    if trades.len() < 3 {
        return 0.5;
    }

    let pairs = trades.len() - 1;
    let directional = trades
        .windows(2)
        .filter(|pair| {
            let (prev, cur) = (&pair[0], &pair[1]);
            match cur.aggressor {
                AggressorSide::Buy => cur.price > prev.price,
                AggressorSide::Sell => cur.price < prev.price,
            }
        })
        .count();

    directional as f64 / pairs as f64
}

/// +1 when the latest buy took more than half the resting asks, -1 for a sell against bids
pub fn sweep_flag(last: Option<&TradeEvent>, bid_resting: f64, ask_resting: f64) -> i8 {
    let Some(trade) = last else {
        return 0;
    };

    match trade.aggressor {
        AggressorSide::Buy if ask_resting > 0.0 && trade.size > 0.5 * ask_resting => 1,
        AggressorSide::Sell if bid_resting > 0.0 && trade.size > 0.5 * bid_resting => -1,
        _ => 0,
    }
}

/// Latest size over the mean of the last `lookback` sizes (latest included).
/// None until `lookback` trades exist.
pub fn volume_spike_ratio(recent: &[TradeEvent], lookback: usize) -> Option<f64> {
    if lookback == 0 || recent.len() < lookback {
        return None;
    }

    let tail = &recent[recent.len() - lookback..];
    let mean = tail.iter().map(|t| t.size).sum::<f64>() / lookback as f64;
    let latest = tail.last()?.size;
    if mean <= 0.0 {
        return None;
    }
    Some(latest / mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buy(ts: i64, price: f64, size: f64) -> TradeEvent {
        TradeEvent::new(ts, price, size, AggressorSide::Buy)
    }

    fn sell(ts: i64, price: f64, size: f64) -> TradeEvent {
        TradeEvent::new(ts, price, size, AggressorSide::Sell)
    }

    #[test]
    fn test_uptick_ratio() {
        assert_eq!(uptick_ratio(&[buy(0, 100.0, 1.0), buy(1, 101.0, 1.0)]), 0.5);

        let trades = vec![
            buy(0, 100.0, 1.0),
            buy(1, 100.5, 1.0),  // up on a buy
            sell(2, 100.2, 1.0), // down on a sell
            buy(3, 100.1, 1.0),  // buy below prior, not directional
            buy(4, 100.1, 1.0),  // flat
        ];
        assert!((uptick_ratio(&trades) - 0.5).abs() < 1e-12);

        let rising: Vec<TradeEvent> = (0..10).map(|i| buy(i, 100.0 + i as f64, 1.0)).collect();
        assert_eq!(uptick_ratio(&rising), 1.0);
    }

    #[test]
    fn test_sweep_flag() {
        assert_eq!(sweep_flag(None, 10.0, 10.0), 0);
        assert_eq!(sweep_flag(Some(&buy(0, 100.0, 6.0)), 10.0, 10.0), 1);
        assert_eq!(sweep_flag(Some(&buy(0, 100.0, 5.0)), 10.0, 10.0), 0);
        assert_eq!(sweep_flag(Some(&sell(0, 100.0, 6.0)), 10.0, 100.0), -1);
        // Empty opposite side never counts as swept
        assert_eq!(sweep_flag(Some(&buy(0, 100.0, 6.0)), 10.0, 0.0), 0);
    }

    #[test]
    fn test_volume_spike_ratio() {
        let mut trades: Vec<TradeEvent> = (0..19).map(|i| buy(i, 100.0, 1.0)).collect();
        assert_eq!(volume_spike_ratio(&trades, 20), None);

        trades.push(buy(19, 100.0, 21.0));
        let ratio = volume_spike_ratio(&trades, 20).unwrap();
        // mean = (19 + 21) / 20 = 2.0
        assert!((ratio - 10.5).abs() < 1e-12);
    }
}
