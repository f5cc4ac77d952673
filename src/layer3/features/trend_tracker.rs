// Trend Tracker - mid-price EMA pair, running VWAP and volatility
// Stateful; fed from the ingestion path, read by the score computation

use std::collections::VecDeque;
use std::fmt;
use tracing::debug;

use crate::core::config::{TrendConfig, WindowConfig};
use crate::core::types::TradeEvent;
use crate::layer3::common::time_windows::{MidSample, TimeWindow};

/// Point-in-time trend readings
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrendSnapshot {
    pub mid: Option<f64>,
    pub ema_short: Option<f64>,
    pub ema_long: Option<f64>,
    pub vwap: Option<f64>,
    pub mid_sma: Option<f64>,     // Only once the SMA buffer is full
    pub volatility_bps: f64,
}

impl TrendSnapshot {
    /// sign(EMAshort - EMAlong); 0 until both exist
    pub fn ema_direction(&self) -> i8 {
        match (self.ema_short, self.ema_long) {
            (Some(s), Some(l)) if s > l => 1,
            (Some(s), Some(l)) if s < l => -1,
            _ => 0,
        }
    }

    /// (mid - VWAP) / VWAP
    pub fn vwap_deviation(&self) -> Option<f64> {
        match (self.mid, self.vwap) {
            (Some(mid), Some(vwap)) if vwap > 0.0 => Some((mid - vwap) / vwap),
            _ => None,
        }
    }
}

impl fmt::Display for TrendSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Trend(mid={:?}, ema={:?}/{:?}, vwap={:?}, vol={:.2}bps)",
            self.mid, self.ema_short, self.ema_long, self.vwap, self.volatility_bps
        )
    }
}

/// Half-life EMA with a time-aware smoothing factor
#[derive(Debug, Clone)]
struct HalfLifeEma {
    half_life_ms: i64,
    value: Option<f64>,
}

impl HalfLifeEma {
    fn new(half_life_ms: i64) -> Self {
        Self { half_life_ms: half_life_ms.max(1), value: None }
    }

    fn update(&mut self, sample: f64, dt_ms: i64) {
        self.value = Some(match self.value {
            None => sample,
            Some(prev) => {
                let alpha = 1.0 - 2f64.powf(-(dt_ms.max(0) as f64) / self.half_life_ms as f64);
                prev + alpha * (sample - prev)
            }
        });
    }
}

/// TrendTracker follows the mid-price and trade prints for one instrument
#[derive(Debug, Clone)]
pub struct TrendTracker {
    symbol: String,
    config: TrendConfig,
    volatility_window_ms: i64,

    ema_short: HalfLifeEma,
    ema_long: HalfLifeEma,
    last_mid: Option<f64>,
    last_mid_ts: Option<i64>,

    // VWAP accumulators since start or the last reset
    vwap_pv: f64,
    vwap_volume: f64,
    vwap_started_at: Option<i64>,

    mid_samples: TimeWindow<MidSample>,
    sma_buffer: VecDeque<f64>,

    // Statistics
    mid_updates: u64,
    vwap_resets: u64,
}

impl TrendTracker {
    pub fn new(symbol: &str, config: TrendConfig, window: &WindowConfig) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            ema_short: HalfLifeEma::new(config.ema_short_half_life_ms),
            ema_long: HalfLifeEma::new(config.ema_long_half_life_ms),
            sma_buffer: VecDeque::with_capacity(config.mid_sma_len.max(1)),
            config,
            volatility_window_ms: window.volatility_window_ms,
            last_mid: None,
            last_mid_ts: None,
            vwap_pv: 0.0,
            vwap_volume: 0.0,
            vwap_started_at: None,
            mid_samples: TimeWindow::new(window.volatility_window_ms, window.max_mid_samples),
            mid_updates: 0,
            vwap_resets: 0,
        }
    }

    /// Feed the current mid. Only a changed mid moves the EMAs and volatility samples.
    pub fn on_mid(&mut self, mid: f64, now_ms: i64) -> bool {
        if !mid.is_finite() || mid <= 0.0 || self.last_mid == Some(mid) {
            return false;
        }

        let dt = self.last_mid_ts.map(|t| now_ms - t).unwrap_or(0);
        self.ema_short.update(mid, dt);
        self.ema_long.update(mid, dt);

        self.last_mid = Some(mid);
        self.last_mid_ts = Some(now_ms.max(self.last_mid_ts.unwrap_or(now_ms)));

        self.mid_samples.push(MidSample { timestamp_ms: now_ms, mid });
        self.mid_samples.prune(now_ms);

        let sma_len = self.config.mid_sma_len.max(1);
        if self.sma_buffer.len() >= sma_len {
            self.sma_buffer.pop_front();
        }
        self.sma_buffer.push_back(mid);

        self.mid_updates += 1;
        true
    }

    /// Accumulate a trade into the running VWAP, resetting on the configured period
    pub fn on_trade(&mut self, trade: &TradeEvent) {
        match (self.config.vwap_reset_ms, self.vwap_started_at) {
            (Some(period), Some(started)) if trade.timestamp_ms - started >= period => {
                debug!(symbol = %self.symbol, "VWAP period reset");
                self.vwap_pv = 0.0;
                self.vwap_volume = 0.0;
                self.vwap_started_at = Some(trade.timestamp_ms);
                self.vwap_resets += 1;
            }
            (_, None) => self.vwap_started_at = Some(trade.timestamp_ms),
            _ => {}
        }

        self.vwap_pv += trade.price * trade.size;
        self.vwap_volume += trade.size;
    }

    pub fn vwap(&self) -> Option<f64> {
        if self.vwap_volume > 0.0 {
            Some(self.vwap_pv / self.vwap_volume)
        } else {
            None
        }
    }

    /// Population std / mean of mid samples in the volatility window, in bps
    pub fn volatility_bps(&self, now_ms: i64) -> f64 {
        let samples: Vec<f64> = self
            .mid_samples
            .since(self.volatility_window_ms, now_ms)
            .map(|s| s.mid)
            .collect();
        if samples.len() < 2 {
            return 0.0;
        }

        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        if mean <= 0.0 {
            return 0.0;
        }
        let variance = samples.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / n;
        variance.sqrt() / mean * 10_000.0
    }

    pub fn mid_sma(&self) -> Option<f64> {
        if self.sma_buffer.len() < self.config.mid_sma_len.max(1) {
            return None;
        }
        Some(self.sma_buffer.iter().sum::<f64>() / self.sma_buffer.len() as f64)
    }

    pub fn snapshot(&self, now_ms: i64) -> TrendSnapshot {
        TrendSnapshot {
            mid: self.last_mid,
            ema_short: self.ema_short.value,
            ema_long: self.ema_long.value,
            vwap: self.vwap(),
            mid_sma: self.mid_sma(),
            volatility_bps: self.volatility_bps(now_ms),
        }
    }

    pub fn mid_updates(&self) -> u64 {
        self.mid_updates
    }

    pub fn vwap_resets(&self) -> u64 {
        self.vwap_resets
    }
}
