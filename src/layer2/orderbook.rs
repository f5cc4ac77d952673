// Order Book Replica - snapshot + incremental deltas for one instrument
// Bounded depth, flash-level damping, sequence gap detection

use ordered_float::OrderedFloat;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Bound::{Excluded, Unbounded};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::config::BookConfig;
use crate::core::types::{DeltaEvent, FlowDelta, SequenceInfo, Side};
use crate::layer2::parser::{parse_levels, PriceLevel};
use crate::layer2::synchronizer::{SequenceCheck, SequenceStats, SequenceTracker};

type Price = OrderedFloat<f64>;
type Quantity = f64;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReplicaError {
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
    #[error("Invalid delta: {0}")]
    InvalidDelta(String),
    #[error("Sequence gap (expected {expected}, got {got}): resync required")]
    NeedsResync { expected: u64, got: u64 },
    #[error("Order book not initialized")]
    NotInitialized,
}

/// Rank-weighted, flash-damped volume of the top levels
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WeightedDepth {
    pub bid: f64,
    pub ask: f64,
    pub total: f64,
}

/// Replica summary
#[derive(Debug, Clone)]
pub struct ReplicaSummary {
    pub symbol: String,
    pub is_initialized: bool,
    pub snapshot_count: u64,
    pub deltas_applied: u64,
    pub deltas_rejected: u64,
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub flash_levels: usize,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub spread_bps: Option<f64>,
    pub last_update_id: Option<u64>,
}

impl fmt::Display for ReplicaSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Replica({}, bids={}, asks={}, best_bid={:?}, best_ask={:?}, snapshots={}, deltas={})",
            self.symbol, self.bid_levels, self.ask_levels, self.best_bid, self.best_ask,
            self.snapshot_count, self.deltas_applied
        )
    }
}

/// Local bid/ask view for one instrument. Owned by a single pipeline task.
#[derive(Debug, Clone)]
pub struct OrderBookReplica {
    pub symbol: String,
    config: BookConfig,

    // BTreeMap keeps entries sorted automatically
    bids: BTreeMap<Price, Quantity>,
    asks: BTreeMap<Price, Quantity>,

    // (side, price) -> first observation; absent for levels of unknown age
    first_seen: HashMap<(Side, Price), i64>,

    sequence: SequenceTracker,
    is_initialized: bool,
    last_update_ms: i64,

    snapshot_count: u64,
    deltas_applied: u64,
    deltas_rejected: u64,
}

impl OrderBookReplica {
    pub fn new(symbol: &str, config: BookConfig) -> Self {
        info!(symbol = symbol, depth_levels = config.depth_levels, "OrderBookReplica created");

        Self {
            symbol: symbol.to_uppercase(),
            config,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            first_seen: HashMap::new(),
            sequence: SequenceTracker::new(),
            is_initialized: false,
            last_update_ms: 0,
            snapshot_count: 0,
            deltas_applied: 0,
            deltas_rejected: 0,
        }
    }

    // ========================================================================
    // Snapshot
    // ========================================================================

    /// Replace both sides wholesale. Validation happens before any mutation.
    ///
    /// Returns the flow implied by diffing the previous top-N view against the new one
    /// (empty for the first snapshot).
    pub fn load_snapshot(
        &mut self,
        bids: &[PriceLevel],
        asks: &[PriceLevel],
        last_update_id: Option<u64>,
        now_ms: i64,
    ) -> Result<Vec<FlowDelta>, ReplicaError> {
        if let Some(bad) = bids.iter().chain(asks.iter()).find(|l| !l.is_valid()) {
            self.deltas_rejected += 1;
            return Err(ReplicaError::InvalidSnapshot(format!(
                "price={} size={}", bad.price, bad.size
            )));
        }

        let depth = self.config.depth_levels;
        let new_bids = build_side(bids, Side::Bid, depth);
        let new_asks = build_side(asks, Side::Ask, depth);

        let flows = if self.is_initialized {
            let mut flows = diff_side(&self.bids, &new_bids, Side::Bid, now_ms, self.config.level_decay);
            flows.extend(diff_side(&self.asks, &new_asks, Side::Ask, now_ms, self.config.level_decay));
            flows
        } else {
            Vec::new()
        };

        // Levels that appear in a later snapshot start their lifetime clock now;
        // the first snapshot's levels are of unknown age and are not damped
        if self.is_initialized {
            for price in new_bids.keys() {
                if !self.bids.contains_key(price) {
                    self.first_seen.insert((Side::Bid, *price), now_ms);
                }
            }
            for price in new_asks.keys() {
                if !self.asks.contains_key(price) {
                    self.first_seen.insert((Side::Ask, *price), now_ms);
                }
            }
        }

        self.bids = new_bids;
        self.asks = new_asks;

        let (bids_ref, asks_ref) = (&self.bids, &self.asks);
        self.first_seen.retain(|(side, price), _| match side {
            Side::Bid => bids_ref.contains_key(price),
            Side::Ask => asks_ref.contains_key(price),
        });

        self.sequence.reset(last_update_id);
        self.snapshot_count += 1;
        self.last_update_ms = now_ms;

        if !self.is_initialized {
            self.is_initialized = true;
            info!(
                symbol = %self.symbol,
                last_update_id = ?last_update_id,
                bid_levels = self.bids.len(),
                ask_levels = self.asks.len(),
                "Order book initialized from snapshot"
            );
        } else {
            debug!(flows = flows.len(), "Snapshot replaced book");
        }

        Ok(flows)
    }

    /// Snapshot from raw [price, size] string pairs
    pub fn load_raw_snapshot(
        &mut self,
        bids: &[[String; 2]],
        asks: &[[String; 2]],
        last_update_id: Option<u64>,
        now_ms: i64,
    ) -> Result<Vec<FlowDelta>, ReplicaError> {
        let parsed = parse_levels(bids).and_then(|b| parse_levels(asks).map(|a| (b, a)));
        match parsed {
            Ok((bids, asks)) => self.load_snapshot(&bids, &asks, last_update_id, now_ms),
            Err(e) => {
                self.deltas_rejected += 1;
                Err(ReplicaError::InvalidSnapshot(e.to_string()))
            }
        }
    }

    // ========================================================================
    // Deltas
    // ========================================================================

    /// Apply a single level change
    pub fn apply_delta(
        &mut self,
        delta: DeltaEvent,
        sequence: Option<SequenceInfo>,
    ) -> Result<Option<FlowDelta>, ReplicaError> {
        let flows = self.apply_depth_update(&[delta], sequence)?;
        Ok(flows.into_iter().next())
    }

    /// Apply a batch of level changes that share one sequence range.
    ///
    /// The batch is validated and sequence-checked before anything is applied, so a
    /// rejected update never leaves the book half-modified.
    pub fn apply_depth_update(
        &mut self,
        deltas: &[DeltaEvent],
        sequence: Option<SequenceInfo>,
    ) -> Result<Vec<FlowDelta>, ReplicaError> {
        if !self.is_initialized {
            self.deltas_rejected += 1;
            return Err(ReplicaError::NotInitialized);
        }

        if let Some(bad) = deltas.iter().find(|d| !valid_delta(d)) {
            self.deltas_rejected += 1;
            return Err(ReplicaError::InvalidDelta(format!(
                "{} price={} size={}", bad.side, bad.price, bad.size
            )));
        }

        if let Some(seq) = sequence.as_ref() {
            if let SequenceCheck::Gap { expected, got } = self.sequence.check(seq) {
                self.deltas_rejected += 1;
                return Err(ReplicaError::NeedsResync { expected, got });
            }
        }

        let mut flows = Vec::new();
        for delta in deltas {
            if let Some(flow) = self.apply_level(delta) {
                flows.push(flow);
            }
            self.last_update_ms = self.last_update_ms.max(delta.observed_at_ms);
        }

        if let Some(seq) = sequence.as_ref() {
            self.sequence.advance(seq);
        }
        self.deltas_applied += deltas.len() as u64;

        Ok(flows)
    }

    /// Idempotent per (side, price): unchanged size is a no-op
    fn apply_level(&mut self, delta: &DeltaEvent) -> Option<FlowDelta> {
        let key = OrderedFloat(delta.price);
        let rank = self.rank_of(delta.side, key);
        let depth = self.config.depth_levels;

        let book = match delta.side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };
        let old = book.get(&key).copied().unwrap_or(0.0);

        if old == delta.size {
            return None;
        }

        if delta.size == 0.0 {
            book.remove(&key);
            self.first_seen.remove(&(delta.side, key));
        } else {
            book.insert(key, delta.size);
            if old == 0.0 {
                self.first_seen.insert((delta.side, key), delta.observed_at_ms);
            }
        }

        self.trim_side(delta.side);

        if rank >= depth {
            return None;
        }

        Some(FlowDelta {
            timestamp_ms: delta.observed_at_ms,
            side: delta.side,
            added_qty: (delta.size - old).max(0.0),
            removed_qty: (old - delta.size).max(0.0),
            level_weight: self.config.level_decay.powi(rank as i32),
        })
    }

    /// Drop levels beyond the configured depth, with their first-seen records
    fn trim_side(&mut self, side: Side) {
        let depth = self.config.depth_levels;
        let book = match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        };

        while book.len() > depth {
            // Worst bid is the lowest price, worst ask the highest
            let worst = match side {
                Side::Bid => book.keys().next().copied(),
                Side::Ask => book.keys().next_back().copied(),
            };
            match worst {
                Some(price) => {
                    book.remove(&price);
                    self.first_seen.remove(&(side, price));
                }
                None => break,
            }
        }
    }

    /// Number of strictly better prices on the same side (0 = touch)
    fn rank_of(&self, side: Side, price: Price) -> usize {
        match side {
            Side::Bid => self.bids.range((Excluded(price), Unbounded)).count(),
            Side::Ask => self.asks.range(..price).count(),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    fn effective_size(&self, side: Side, price: Price, size: f64, now_ms: i64) -> f64 {
        match self.first_seen.get(&(side, price)) {
            Some(&seen) if now_ms - seen < self.config.order_lifetime_ms => size * self.config.flash_damping,
            _ => size,
        }
    }

    /// (weightedBid, weightedAsk, total) over the top `n` levels
    pub fn top_weighted_depth(&self, n: usize, now_ms: i64) -> WeightedDepth {
        let n = n.min(self.config.depth_levels);
        let decay = self.config.level_decay;

        let bid: f64 = self
            .bids
            .iter()
            .rev()
            .take(n)
            .enumerate()
            .map(|(rank, (p, &q))| self.effective_size(Side::Bid, *p, q, now_ms) * decay.powi(rank as i32))
            .sum();
        let ask: f64 = self
            .asks
            .iter()
            .take(n)
            .enumerate()
            .map(|(rank, (p, &q))| self.effective_size(Side::Ask, *p, q, now_ms) * decay.powi(rank as i32))
            .sum();

        WeightedDepth { bid, ask, total: bid + ask }
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.keys().next_back().map(|p| p.0)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.keys().next().map(|p| p.0)
    }

    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    pub fn spread_bps(&self) -> Option<f64> {
        let (bid, ask) = (self.best_bid()?, self.best_ask()?);
        let mid = (bid + ask) / 2.0;
        if mid > 0.0 {
            Some((ask - bid) / mid * 10_000.0)
        } else {
            None
        }
    }

    /// Raw resting volume of one side, no damping or rank weighting
    pub fn resting_volume(&self, side: Side) -> f64 {
        match side {
            Side::Bid => self.bids.values().sum(),
            Side::Ask => self.asks.values().sum(),
        }
    }

    pub fn level_size(&self, side: Side, price: f64) -> Option<f64> {
        let key = OrderedFloat(price);
        match side {
            Side::Bid => self.bids.get(&key).copied(),
            Side::Ask => self.asks.get(&key).copied(),
        }
    }

    pub fn first_seen(&self, side: Side, price: f64) -> Option<i64> {
        self.first_seen.get(&(side, OrderedFloat(price))).copied()
    }

    /// Top N levels, best first
    pub fn top_levels(&self, side: Side, n: usize) -> Vec<PriceLevel> {
        match side {
            Side::Bid => self.bids.iter().rev().take(n).map(|(p, &q)| PriceLevel::new(p.0, q)).collect(),
            Side::Ask => self.asks.iter().take(n).map(|(p, &q)| PriceLevel::new(p.0, q)).collect(),
        }
    }

    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }

    /// A gap was seen and no snapshot has arrived since
    pub fn needs_resync(&self) -> bool {
        self.sequence.is_out_of_sync()
    }

    pub fn last_update_ms(&self) -> i64 {
        self.last_update_ms
    }

    pub fn sequence_stats(&self) -> SequenceStats {
        self.sequence.get_stats()
    }

    pub fn get_summary(&self, now_ms: i64) -> ReplicaSummary {
        let flash_levels = self
            .first_seen
            .values()
            .filter(|&&seen| now_ms - seen < self.config.order_lifetime_ms)
            .count();

        ReplicaSummary {
            symbol: self.symbol.clone(),
            is_initialized: self.is_initialized,
            snapshot_count: self.snapshot_count,
            deltas_applied: self.deltas_applied,
            deltas_rejected: self.deltas_rejected,
            bid_levels: self.bids.len(),
            ask_levels: self.asks.len(),
            flash_levels,
            best_bid: self.best_bid(),
            best_ask: self.best_ask(),
            spread_bps: self.spread_bps(),
            last_update_id: self.sequence.last_update_id(),
        }
    }

    /// Drop everything; the next snapshot re-initializes
    pub fn reset(&mut self) {
        warn!(symbol = %self.symbol, "Resetting order book replica");
        self.bids.clear();
        self.asks.clear();
        self.first_seen.clear();
        self.sequence = SequenceTracker::new();
        self.is_initialized = false;
    }
}

fn valid_delta(delta: &DeltaEvent) -> bool {
    delta.price.is_finite() && delta.price > 0.0 && delta.size.is_finite() && delta.size >= 0.0
}

/// Build one side from validated levels: zero sizes skipped, last duplicate wins, top N kept
fn build_side(levels: &[PriceLevel], side: Side, depth: usize) -> BTreeMap<Price, Quantity> {
    let mut book: BTreeMap<Price, Quantity> = levels
        .iter()
        .filter(|l| l.size > 0.0)
        .map(|l| (OrderedFloat(l.price), l.size))
        .collect();

    while book.len() > depth {
        let worst = match side {
            Side::Bid => book.keys().next().copied(),
            Side::Ask => book.keys().next_back().copied(),
        };
        match worst {
            Some(price) => {
                book.remove(&price);
            }
            None => break,
        }
    }
    book
}

/// Per-level size changes between two views of one side, ranked in the view holding the level
fn diff_side(
    old: &BTreeMap<Price, Quantity>,
    new: &BTreeMap<Price, Quantity>,
    side: Side,
    now_ms: i64,
    decay: f64,
) -> Vec<FlowDelta> {
    let ranked = |book: &BTreeMap<Price, Quantity>| -> HashMap<Price, usize> {
        let keys: Vec<Price> = match side {
            Side::Bid => book.keys().rev().copied().collect(),
            Side::Ask => book.keys().copied().collect(),
        };
        keys.into_iter().enumerate().map(|(rank, p)| (p, rank)).collect()
    };
    let old_rank = ranked(old);
    let new_rank = ranked(new);

    let mut prices: Vec<Price> = old.keys().chain(new.keys()).copied().collect();
    prices.sort();
    prices.dedup();

    prices
        .into_iter()
        .filter_map(|price| {
            let before = old.get(&price).copied().unwrap_or(0.0);
            let after = new.get(&price).copied().unwrap_or(0.0);
            if before == after {
                return None;
            }
            let rank = new_rank.get(&price).or_else(|| old_rank.get(&price)).copied().unwrap_or(0);
            Some(FlowDelta {
                timestamp_ms: now_ms,
                side,
                added_qty: (after - before).max(0.0),
                removed_qty: (before - after).max(0.0),
                level_weight: decay.powi(rank as i32),
            })
        })
        .collect()
}
