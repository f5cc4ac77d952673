// Core Type Definitions for the Flow Score Engine
// Feed events, derived flow records, positions and emitted signals

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Enums
// ============================================================================

/// Book side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Bid => write!(f, "BID"),
            Side::Ask => write!(f, "ASK"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BID" | "BIDS" | "B" => Ok(Side::Bid),
            "ASK" | "ASKS" | "A" => Ok(Side::Ask),
            _ => Err(format!("Invalid Side: '{}'. Expected 'BID' or 'ASK'", s)),
        }
    }
}

/// Aggressor side of a trade print
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggressorSide {
    Buy,
    Sell,
}

impl AggressorSide {
    /// Binance-style `m` flag: buyer is maker means the seller was the aggressor
    pub fn from_buyer_maker(is_buyer_maker: bool) -> Self {
        if is_buyer_maker {
            AggressorSide::Sell
        } else {
            AggressorSide::Buy
        }
    }

    /// Book side this aggressor consumes
    pub fn consumes(&self) -> Side {
        match self {
            AggressorSide::Buy => Side::Ask,
            AggressorSide::Sell => Side::Bid,
        }
    }
}

impl fmt::Display for AggressorSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggressorSide::Buy => write!(f, "BUY"),
            AggressorSide::Sell => write!(f, "SELL"),
        }
    }
}

impl std::str::FromStr for AggressorSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(AggressorSide::Buy),
            "SELL" => Ok(AggressorSide::Sell),
            _ => Err(format!("Invalid AggressorSide: '{}'. Expected 'BUY' or 'SELL'", s)),
        }
    }
}

/// Per-instrument position bias held by the signal state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PositionBias {
    #[default]
    Flat,
    Long,
    Short,
}

impl fmt::Display for PositionBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionBias::Flat => write!(f, "FLAT"),
            PositionBias::Long => write!(f, "LONG"),
            PositionBias::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalAction {
    EnterLong,
    ExitLong,
    EnterShort,
    ExitShort,
    Hold,
}

impl SignalAction {
    pub fn is_hold(&self) -> bool {
        matches!(self, SignalAction::Hold)
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalAction::EnterLong => "ENTER_LONG",
            SignalAction::ExitLong => "EXIT_LONG",
            SignalAction::EnterShort => "ENTER_SHORT",
            SignalAction::ExitShort => "EXIT_SHORT",
            SignalAction::Hold => "HOLD",
        };
        write!(f, "{}", s)
    }
}

/// Volatility bucket selecting the score weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityRegime {
    Low,
    Medium,
    High,
}

impl fmt::Display for VolatilityRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// Feed Events
// ============================================================================

/// One trade print
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub timestamp_ms: i64,
    pub price: f64,
    pub size: f64,
    pub aggressor: AggressorSide,
}

impl TradeEvent {
    pub fn new(timestamp_ms: i64, price: f64, size: f64, aggressor: AggressorSide) -> Self {
        Self { timestamp_ms, price, size, aggressor }
    }

    pub fn notional(&self) -> f64 {
        self.price * self.size
    }

    pub fn is_buy(&self) -> bool {
        self.aggressor == AggressorSide::Buy
    }
}

impl fmt::Display for TradeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Trade({} {:.4} @ {:.2}, t={})",
            self.aggressor, self.size, self.price, self.timestamp_ms
        )
    }
}

/// Single-level book change; size 0 removes the level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeltaEvent {
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub observed_at_ms: i64,
}

impl DeltaEvent {
    pub fn new(side: Side, price: f64, size: f64, observed_at_ms: i64) -> Self {
        Self { side, price, size, observed_at_ms }
    }
}

/// Update identifiers carried by sequenced depth feeds (U / u / pu)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceInfo {
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub prev_final_update_id: Option<u64>,
}

impl SequenceInfo {
    pub fn new(first_update_id: u64, final_update_id: u64, prev_final_update_id: Option<u64>) -> Self {
        Self { first_update_id, final_update_id, prev_final_update_id }
    }
}

/// Add/remove quantity observed at one level, weighted by rank from the touch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowDelta {
    pub timestamp_ms: i64,
    pub side: Side,
    pub added_qty: f64,
    pub removed_qty: f64,
    pub level_weight: f64,
}

impl FlowDelta {
    pub fn weighted_added(&self) -> f64 {
        self.added_qty * self.level_weight
    }

    pub fn weighted_removed(&self) -> f64 {
        self.removed_qty * self.level_weight
    }
}

// ============================================================================
// Signal
// ============================================================================

/// Emitted once per evaluation cycle per instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub instrument: String,
    pub action: SignalAction,
    pub final_score: u8,
    pub gate: i8,
    pub edge_bps: f64,
    pub depth: f64,
    pub timestamp_ms: i64,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Signal({} {} score={} gate={:+} edge={:.2}bps depth={:.2})",
            self.instrument, self.action, self.final_score, self.gate, self.edge_bps, self.depth
        )
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Wall-clock milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_parsing() {
        assert_eq!("bid".parse::<Side>().unwrap(), Side::Bid);
        assert_eq!("ASKS".parse::<Side>().unwrap(), Side::Ask);
        assert!("mid".parse::<Side>().is_err());
        assert_eq!(Side::Bid.opposite(), Side::Ask);
    }

    #[test]
    fn test_aggressor_from_buyer_maker() {
        assert_eq!(AggressorSide::from_buyer_maker(true), AggressorSide::Sell);
        assert_eq!(AggressorSide::from_buyer_maker(false), AggressorSide::Buy);
        assert_eq!(AggressorSide::Buy.consumes(), Side::Ask);
    }

    #[test]
    fn test_signal_action_display_and_serde() {
        assert_eq!(SignalAction::EnterLong.to_string(), "ENTER_LONG");
        let json = serde_json::to_string(&SignalAction::ExitShort).unwrap();
        assert_eq!(json, "\"EXIT_SHORT\"");
        assert!(SignalAction::Hold.is_hold());
    }

    #[test]
    fn test_flow_delta_weighting() {
        let fd = FlowDelta {
            timestamp_ms: 0,
            side: Side::Bid,
            added_qty: 10.0,
            removed_qty: 0.0,
            level_weight: 0.81,
        };
        assert!((fd.weighted_added() - 8.1).abs() < 1e-9);
        assert_eq!(fd.weighted_removed(), 0.0);
    }
}
