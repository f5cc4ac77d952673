// Time Window - ordered, capacity-bounded buffer of timestamped entries
// Out-of-order arrivals are clamped forward on insert; eviction is from the front only

use std::collections::VecDeque;

use crate::core::types::{FlowDelta, TradeEvent};

/// An entry that carries its own event time
pub trait Timestamped {
    fn timestamp_ms(&self) -> i64;
    fn set_timestamp_ms(&mut self, ts: i64);
}

impl Timestamped for TradeEvent {
    fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }
    fn set_timestamp_ms(&mut self, ts: i64) {
        self.timestamp_ms = ts;
    }
}

impl Timestamped for FlowDelta {
    fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }
    fn set_timestamp_ms(&mut self, ts: i64) {
        self.timestamp_ms = ts;
    }
}

/// A mid-price observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidSample {
    pub timestamp_ms: i64,
    pub mid: f64,
}

impl Timestamped for MidSample {
    fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }
    fn set_timestamp_ms(&mut self, ts: i64) {
        self.timestamp_ms = ts;
    }
}

#[derive(Debug, Clone)]
pub struct TimeWindow<T> {
    horizon_ms: i64,
    capacity: usize,
    entries: VecDeque<T>,
    // Latest accepted timestamp; survives pruning so ordering holds across an empty buffer
    high_water: Option<i64>,

    clamped: u64,
    evicted_by_capacity: u64,
}

impl<T: Timestamped> TimeWindow<T> {
    pub fn new(horizon_ms: i64, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            horizon_ms,
            capacity,
            entries: VecDeque::with_capacity(capacity.min(4096)),
            high_water: None,
            clamped: 0,
            evicted_by_capacity: 0,
        }
    }

    /// Append an entry. Returns true when its timestamp had to be moved forward.
    pub fn push(&mut self, mut entry: T) -> bool {
        let ts = entry.timestamp_ms();
        let was_clamped = match self.high_water {
            Some(hw) if ts < hw => {
                entry.set_timestamp_ms(hw);
                self.clamped += 1;
                true
            }
            _ => false,
        };
        self.high_water = Some(entry.timestamp_ms());

        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
            self.evicted_by_capacity += 1;
        }
        self.entries.push_back(entry);
        was_clamped
    }

    /// Drop entries older than the window's own horizon
    pub fn prune(&mut self, now_ms: i64) -> usize {
        self.prune_before(now_ms - self.horizon_ms)
    }

    /// Drop entries with timestamp < cutoff
    pub fn prune_before(&mut self, cutoff: i64) -> usize {
        let keep_from = self.entries.partition_point(|e| e.timestamp_ms() < cutoff);
        self.entries.drain(..keep_from);
        keep_from
    }

    /// Entries with timestamp >= now - window_ms, oldest first
    pub fn since(&self, window_ms: i64, now_ms: i64) -> impl Iterator<Item = &T> {
        let cutoff = now_ms - window_ms;
        let start = self.entries.partition_point(|e| e.timestamp_ms() < cutoff);
        self.entries.range(start..)
    }

    /// The `n` most recent entries, oldest first
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &T> {
        let start = self.entries.len().saturating_sub(n);
        self.entries.range(start..)
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn horizon_ms(&self) -> i64 {
        self.horizon_ms
    }

    pub fn clamped(&self) -> u64 {
        self.clamped
    }

    pub fn evicted_by_capacity(&self) -> u64 {
        self.evicted_by_capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: i64, mid: f64) -> MidSample {
        MidSample { timestamp_ms: ts, mid }
    }

    #[test]
    fn test_prune_by_horizon() {
        let mut w = TimeWindow::new(100, 100);
        for ts in [0, 50, 100, 150, 200] {
            w.push(sample(ts, 1.0));
        }

        assert_eq!(w.prune(200), 2);
        assert_eq!(w.len(), 3);
        assert_eq!(w.since(1_000, 200).next().map(|s| s.timestamp_ms), Some(100));
    }

    #[test]
    fn test_out_of_order_is_clamped_forward() {
        let mut w = TimeWindow::new(10_000, 10);
        assert!(!w.push(sample(500, 1.0)));
        assert!(w.push(sample(400, 2.0)));

        assert_eq!(w.latest().map(|s| s.timestamp_ms), Some(500));
        assert_eq!(w.clamped(), 1);

        // Ordering survives an emptied buffer
        w.prune_before(1_000);
        assert!(w.is_empty());
        assert!(w.push(sample(450, 3.0)));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut w = TimeWindow::new(10_000, 3);
        for ts in 1..=4 {
            w.push(sample(ts * 100, ts as f64));
        }

        assert_eq!(w.len(), 3);
        assert_eq!(w.evicted_by_capacity(), 1);
        let mids: Vec<f64> = w.tail(10).map(|s| s.mid).collect();
        assert_eq!(mids, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_since_and_tail() {
        let mut w = TimeWindow::new(10_000, 100);
        for i in 0..10 {
            w.push(sample(i * 100, i as f64));
        }

        let recent: Vec<f64> = w.since(250, 900).map(|s| s.mid).collect();
        assert_eq!(recent, vec![7.0, 8.0, 9.0]);
        assert_eq!(w.tail(2).count(), 2);
        assert_eq!(w.tail(50).count(), 10);
    }
}
