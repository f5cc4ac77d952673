// Feed Message Parser - price levels and abstract feed events
// String price/size pairs -> typed levels; JSON feed messages -> FeedEvent

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::core::types::{AggressorSide, DeltaEvent, SequenceInfo, Side, TradeEvent};

// ============================================================================
// Price/Size Level
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Invalid {field}: '{value}'")]
    InvalidNumber { field: &'static str, value: String },
    #[error("Invalid level: {0}")]
    InvalidLevel(String),
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),
}

/// A price level (price, size); size 0 means the level is absent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

impl PriceLevel {
    pub fn new(price: f64, size: f64) -> Self {
        Self { price, size }
    }

    /// Finite positive price, finite non-negative size
    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price > 0.0 && self.size.is_finite() && self.size >= 0.0
    }

    /// Parse a [price_string, size_string] pair
    pub fn parse(price: &str, size: &str) -> Result<Self, ParseError> {
        let level = Self {
            price: parse_f64_field(price, "price")?,
            size: parse_f64_field(size, "size")?,
        };
        if !level.is_valid() {
            return Err(ParseError::InvalidLevel(format!("price={} size={}", price, size)));
        }
        Ok(level)
    }
}

/// Parse a string field as f64
fn parse_f64_field(value: &str, field: &'static str) -> Result<f64, ParseError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| ParseError::InvalidNumber { field, value: value.to_string() })
}

/// Parse a list of raw string pairs, failing on the first bad level
pub fn parse_levels(raw: &[[String; 2]]) -> Result<Vec<PriceLevel>, ParseError> {
    raw.iter().map(|l| PriceLevel::parse(&l[0], &l[1])).collect()
}

// ============================================================================
// Feed Events
// ============================================================================

/// Inbound event for one instrument pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Snapshot {
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        last_update_id: Option<u64>,
        timestamp_ms: i64,
    },
    /// Snapshot with unparsed string levels; validated by the replica
    RawSnapshot {
        bids: Vec<[String; 2]>,
        asks: Vec<[String; 2]>,
        last_update_id: Option<u64>,
        timestamp_ms: i64,
    },
    /// One or more level changes sharing a single sequence range
    Depth {
        deltas: Vec<DeltaEvent>,
        sequence: Option<SequenceInfo>,
    },
    Trade(TradeEvent),
}

impl FeedEvent {
    pub fn delta(delta: DeltaEvent, sequence: Option<SequenceInfo>) -> Self {
        FeedEvent::Depth { deltas: vec![delta], sequence }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FeedEvent::Snapshot { .. } => "snapshot",
            FeedEvent::RawSnapshot { .. } => "raw_snapshot",
            FeedEvent::Depth { .. } => "depth",
            FeedEvent::Trade(_) => "trade",
        }
    }
}

// ============================================================================
// Raw JSON shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawSnapshot {
    #[serde(rename = "lastUpdateId")]
    last_update_id: Option<u64>,
    #[serde(default)]
    ts: i64,
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct RawDepth {
    #[serde(rename = "U")]
    first_update_id: Option<u64>,
    #[serde(rename = "u")]
    final_update_id: Option<u64>,
    #[serde(rename = "pu")]
    prev_final_update_id: Option<u64>,
    ts: i64,
    #[serde(default)]
    bids: Vec<[String; 2]>,
    #[serde(default)]
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    ts: i64,
    price: String,
    size: String,
    side: String,
}

// ============================================================================
// Parser
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ParserStats {
    pub messages_parsed: u64,
    pub snapshot_count: u64,
    pub depth_count: u64,
    pub trade_count: u64,
    pub parse_errors: u64,
}

impl ParserStats {
    pub fn error_rate(&self) -> f64 {
        let total = self.messages_parsed + self.parse_errors;
        if total > 0 {
            self.parse_errors as f64 / total as f64
        } else {
            0.0
        }
    }
}

/// Decodes `{"type": "snapshot" | "depth" | "trade", ...}` messages
pub struct FeedParser {
    pub instrument: String,
    pub stats: ParserStats,
}

impl FeedParser {
    pub fn new(instrument: &str) -> Self {
        Self {
            instrument: instrument.to_uppercase(),
            stats: ParserStats::default(),
        }
    }

    pub fn parse(&mut self, raw_json: &str) -> Result<FeedEvent, ParseError> {
        let result = self.parse_inner(raw_json);
        match &result {
            Ok(event) => {
                self.stats.messages_parsed += 1;
                match event {
                    FeedEvent::Snapshot { .. } | FeedEvent::RawSnapshot { .. } => self.stats.snapshot_count += 1,
                    FeedEvent::Depth { .. } => self.stats.depth_count += 1,
                    FeedEvent::Trade(_) => self.stats.trade_count += 1,
                }
            }
            Err(e) => {
                self.stats.parse_errors += 1;
                warn!(instrument = %self.instrument, error = %e, "Dropping unparseable feed message");
            }
        }
        result
    }

    fn parse_inner(&self, raw_json: &str) -> Result<FeedEvent, ParseError> {
        let value: serde_json::Value = serde_json::from_str(raw_json)
            .map_err(|e| ParseError::InvalidJson(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ParseError::InvalidJson("Missing message type".into()))?
            .to_string();

        match kind.as_str() {
            "snapshot" => {
                let raw: RawSnapshot = serde_json::from_value(value)
                    .map_err(|e| ParseError::InvalidJson(e.to_string()))?;
                // Levels stay as strings; the replica rejects bad snapshots atomically
                Ok(FeedEvent::RawSnapshot {
                    bids: raw.bids,
                    asks: raw.asks,
                    last_update_id: raw.last_update_id,
                    timestamp_ms: raw.ts,
                })
            }
            "depth" => {
                let raw: RawDepth = serde_json::from_value(value)
                    .map_err(|e| ParseError::InvalidJson(e.to_string()))?;
                let mut deltas = Vec::with_capacity(raw.bids.len() + raw.asks.len());
                for (side, levels) in [(Side::Bid, &raw.bids), (Side::Ask, &raw.asks)] {
                    for level in parse_levels(levels)? {
                        deltas.push(DeltaEvent::new(side, level.price, level.size, raw.ts));
                    }
                }
                let sequence = match (raw.first_update_id, raw.final_update_id) {
                    (Some(first), Some(last)) => Some(SequenceInfo::new(first, last, raw.prev_final_update_id)),
                    _ => None,
                };
                Ok(FeedEvent::Depth { deltas, sequence })
            }
            "trade" => {
                let raw: RawTrade = serde_json::from_value(value)
                    .map_err(|e| ParseError::InvalidJson(e.to_string()))?;
                let price = parse_f64_field(&raw.price, "price")?;
                let size = parse_f64_field(&raw.size, "size")?;
                if !(price > 0.0 && size > 0.0 && price.is_finite() && size.is_finite()) {
                    return Err(ParseError::InvalidLevel(format!("trade price={} size={}", price, size)));
                }
                let aggressor = raw
                    .side
                    .parse::<AggressorSide>()
                    .map_err(ParseError::InvalidJson)?;
                Ok(FeedEvent::Trade(TradeEvent::new(raw.ts, price, size, aggressor)))
            }
            other => Err(ParseError::UnknownMessageType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_level_parse() {
        let level = PriceLevel::parse("50000.5", "1.25").unwrap();
        assert_eq!(level.price, 50000.5);
        assert_eq!(level.size, 1.25);

        assert!(PriceLevel::parse("abc", "1").is_err());
        assert!(PriceLevel::parse("100", "-1").is_err());
        assert!(PriceLevel::parse("0", "1").is_err());
        assert!(PriceLevel::parse("NaN", "1").is_err());
        assert!(PriceLevel::parse("100", "0").is_ok());
    }

    #[test]
    fn test_parse_snapshot_message() {
        let mut parser = FeedParser::new("btcusdt");
        let msg = r#"{"type":"snapshot","lastUpdateId":100,"ts":5,"bids":[["100.0","2"]],"asks":[["101.0","3"]]}"#;
        match parser.parse(msg).unwrap() {
            FeedEvent::RawSnapshot { bids, last_update_id, .. } => {
                assert_eq!(bids.len(), 1);
                assert_eq!(last_update_id, Some(100));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(parser.stats.snapshot_count, 1);
    }

    #[test]
    fn test_parse_depth_message() {
        let mut parser = FeedParser::new("BTCUSDT");
        let msg = r#"{"type":"depth","U":100,"u":101,"pu":99,"ts":10,"bids":[["100.0","0"]],"asks":[["101.0","4"]]}"#;
        match parser.parse(msg).unwrap() {
            FeedEvent::Depth { deltas, sequence } => {
                assert_eq!(deltas.len(), 2);
                assert_eq!(deltas[0].side, Side::Bid);
                assert_eq!(deltas[0].size, 0.0);
                assert_eq!(deltas[1].observed_at_ms, 10);
                let seq = sequence.unwrap();
                assert_eq!(seq.prev_final_update_id, Some(99));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_trade_message() {
        let mut parser = FeedParser::new("BTCUSDT");
        let msg = r#"{"type":"trade","ts":42,"price":"100.5","size":"0.3","side":"sell"}"#;
        match parser.parse(msg).unwrap() {
            FeedEvent::Trade(t) => {
                assert_eq!(t.aggressor, AggressorSide::Sell);
                assert_eq!(t.timestamp_ms, 42);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors_counted() {
        let mut parser = FeedParser::new("BTCUSDT");
        assert!(parser.parse("not json").is_err());
        assert!(matches!(
            parser.parse(r#"{"type":"kline"}"#),
            Err(ParseError::UnknownMessageType(_))
        ));
        assert!(parser.parse(r#"{"type":"depth","ts":1,"bids":[["x","1"]]}"#).is_err());
        assert_eq!(parser.stats.parse_errors, 3);
        assert_eq!(parser.stats.error_rate(), 1.0);
    }
}
