// Score Combiner - features -> composite 0..100 score with a trend gate
// Regime-weighted blend of trend, book and trade components

use std::fmt;
use thiserror::Error;

use crate::core::config::{RegimeWeights, ScoringConfig};
use crate::core::types::VolatilityRegime;
use crate::layer3::features::FeatureSet;

/// Why a cycle produced no score. Not a failure; the cycle is skipped.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InsufficientData {
    #[error("Too few trades in window ({have} < {need})")]
    TooFewTrades { have: usize, need: usize },
    #[error("Volume spike baseline unavailable")]
    SpikeBaselineUnavailable,
    #[error("Order book not initialized or awaiting resync")]
    BookUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreNote {
    ShallowDepth,
    GateOverriddenByVwap,
    LowConviction,
}

impl fmt::Display for ScoreNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreNote::ShallowDepth => write!(f, "shallow_depth"),
            ScoreNote::GateOverriddenByVwap => write!(f, "vwap_override"),
            ScoreNote::LowConviction => write!(f, "low_conviction"),
        }
    }
}

/// One cycle's score and its components
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeScore {
    pub trend: f64,
    pub orderbook: f64,
    pub trade: f64,
    pub raw: f64,               // Blended, after conviction damping
    pub final_score: u8,        // 0..=100, 50 neutral
    pub gate: i8,
    pub edge_bps: f64,
    pub depth: f64,
    pub regime: VolatilityRegime,
    pub weights: RegimeWeights,
    pub notes: Vec<ScoreNote>,
    pub timestamp_ms: i64,
}

impl CompositeScore {
    fn shallow(depth: f64, timestamp_ms: i64, weights: RegimeWeights) -> Self {
        Self {
            trend: 0.0,
            orderbook: 0.0,
            trade: 0.0,
            raw: 0.0,
            final_score: 50,
            gate: 0,
            edge_bps: 0.0,
            depth,
            regime: VolatilityRegime::Low,
            weights,
            notes: vec![ScoreNote::ShallowDepth],
            timestamp_ms,
        }
    }

    pub fn has_note(&self, note: ScoreNote) -> bool {
        self.notes.contains(&note)
    }
}

impl fmt::Display for CompositeScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Score(final={}, gate={}, trend={:.3}, book={:.3}, trade={:.3}, edge={:.2}bps, regime={})",
            self.final_score, self.gate, self.trend, self.orderbook, self.trade, self.edge_bps, self.regime
        )
    }
}

fn clip(x: f64) -> f64 {
    x.clamp(-1.0, 1.0)
}

/// Maps a clipped raw score in [-1, 1] to 0..=100
pub fn to_final_score(raw: f64) -> u8 {
    let scaled = ((clip(raw) + 1.0) * 50.0).round();
    scaled.clamp(0.0, 100.0) as u8
}

#[derive(Debug, Clone)]
pub struct ScoreCombiner {
    config: ScoringConfig,
}

impl ScoreCombiner {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn combine(&self, features: &FeatureSet) -> Result<CompositeScore, InsufficientData> {
        let cfg = &self.config;
        let depth = features.depth.total;

        // Depth floor wins over everything else
        if depth < cfg.depth_min {
            return Ok(CompositeScore::shallow(depth, features.timestamp_ms, cfg.weights_low));
        }

        let have = features.trade_samples();
        if have < cfg.min_trade_samples {
            return Err(InsufficientData::TooFewTrades { have, need: cfg.min_trade_samples });
        }
        let spike_ratio = features.spike_ratio.ok_or(InsufficientData::SpikeBaselineUnavailable)?;

        // Components
        let trend = clip((features.tfi + 2.0 * (features.uptick_ratio - 0.5) + features.sweep as f64) / 3.0);
        let orderbook = clip((features.obi + features.ofi.value + features.refill) / 3.0);
        let trade = (spike_ratio - cfg.spike_factor).tanh();

        // Regime weights, book discounted when thin
        let volatility_bps = features.trend.volatility_bps;
        let regime = cfg.regime_for(volatility_bps);
        let mut weights = cfg.weights_for(regime);
        if depth < cfg.book_discount_depth {
            weights.book *= 1.0 - cfg.book_discount;
        }
        let weights = weights.normalized();

        let mut raw = weights.trend * trend + weights.book * orderbook + weights.trade * trade;
        let mut notes = Vec::new();

        // Trend gate with VWAP override
        let mut gate = features.trend.ema_direction();
        if let Some(deviation) = features.trend.vwap_deviation() {
            let disagrees = (gate > 0 && deviation < -cfg.vwap_override_pct)
                || (gate < 0 && deviation > cfg.vwap_override_pct);
            if disagrees {
                gate = 0;
                notes.push(ScoreNote::GateOverriddenByVwap);
            }
        }

        let edge_bps = raw.abs() * volatility_bps.max(1.0);
        if gate == 0 || edge_bps < cfg.edge_floor_bps {
            raw *= cfg.conviction_damping;
            notes.push(ScoreNote::LowConviction);
        }

        Ok(CompositeScore {
            trend,
            orderbook,
            trade,
            raw,
            final_score: to_final_score(raw),
            gate,
            edge_bps,
            depth,
            regime,
            weights,
            notes,
            timestamp_ms: features.timestamp_ms,
        })
    }
}
