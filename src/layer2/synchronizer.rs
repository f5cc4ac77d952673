// Sequence Tracker - gap detection for sequenced depth feeds
// Snapshot lastUpdateId -> first straddling delta -> pu continuity

use std::fmt;
use tracing::{debug, warn};

use crate::core::types::SequenceInfo;

/// Stream synchronization state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    NotStarted,
    AwaitingFirst,  // Snapshot loaded, no delta bridged to it yet
    Synchronized,
    OutOfSync,      // Gap seen; only a fresh snapshot recovers
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Outcome of checking one sequenced update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    Continuous,
    Gap { expected: u64, got: u64 },
}

/// Tracks the last applied update id for one book
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    state: SyncState,
    last_update_id: Option<u64>,

    // Statistics
    checked: u64,
    passed: u64,
    gap_count: u64,
    largest_gap: u64,
    resets: u64,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self {
            state: SyncState::NotStarted,
            last_update_id: None,
            checked: 0,
            passed: 0,
            gap_count: 0,
            largest_gap: 0,
            resets: 0,
        }
    }

    /// Arm with a snapshot's lastUpdateId (None for unsequenced snapshots)
    pub fn reset(&mut self, snapshot_last_id: Option<u64>) {
        self.last_update_id = snapshot_last_id;
        self.state = SyncState::AwaitingFirst;
        self.resets += 1;
        debug!(snapshot_last_id = ?snapshot_last_id, "Sequence tracker reset");
    }

    /// Check an update against the stored id. Does not advance; call `advance` after applying.
    ///
    /// First update after a snapshot with id L bridges when `pu == L` or it straddles L
    /// (`U <= L + 1 && u >= L`). Later updates need `pu == last` or, without `pu`,
    /// `U <= last + 1 <= u`.
    pub fn check(&mut self, seq: &SequenceInfo) -> SequenceCheck {
        self.checked += 1;

        let result = match (self.state, self.last_update_id) {
            (SyncState::OutOfSync, last) => {
                let expected = last.unwrap_or(0);
                SequenceCheck::Gap { expected, got: seq.prev_final_update_id.unwrap_or(seq.first_update_id) }
            }
            // Unsequenced snapshot or no snapshot at all: first update anchors the chain
            (_, None) => SequenceCheck::Continuous,
            (SyncState::AwaitingFirst, Some(last)) | (SyncState::NotStarted, Some(last)) => {
                let bridges_pu = seq.prev_final_update_id == Some(last);
                let straddles = seq.first_update_id <= last.saturating_add(1) && seq.final_update_id >= last;
                if bridges_pu || straddles {
                    SequenceCheck::Continuous
                } else {
                    SequenceCheck::Gap {
                        expected: last,
                        got: seq.prev_final_update_id.unwrap_or(seq.first_update_id),
                    }
                }
            }
            (SyncState::Synchronized, Some(last)) => match seq.prev_final_update_id {
                Some(pu) if pu == last => SequenceCheck::Continuous,
                Some(pu) => SequenceCheck::Gap { expected: last, got: pu },
                None => {
                    let next = last.saturating_add(1);
                    if seq.first_update_id <= next && seq.final_update_id >= next {
                        SequenceCheck::Continuous
                    } else {
                        SequenceCheck::Gap { expected: next, got: seq.first_update_id }
                    }
                }
            },
        };

        if let SequenceCheck::Gap { expected, got } = result {
            if self.state != SyncState::OutOfSync {
                let gap = expected.abs_diff(got);
                self.gap_count += 1;
                self.largest_gap = self.largest_gap.max(gap);
                warn!(expected = expected, got = got, "Sequence gap detected");
            }
            self.state = SyncState::OutOfSync;
        }

        result
    }

    /// Record an applied update
    pub fn advance(&mut self, seq: &SequenceInfo) {
        self.last_update_id = Some(seq.final_update_id);
        self.state = SyncState::Synchronized;
        self.passed += 1;
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn last_update_id(&self) -> Option<u64> {
        self.last_update_id
    }

    pub fn is_out_of_sync(&self) -> bool {
        self.state == SyncState::OutOfSync
    }

    pub fn get_stats(&self) -> SequenceStats {
        let gap_rate = if self.checked > 0 {
            self.gap_count as f64 / self.checked as f64
        } else {
            0.0
        };

        SequenceStats {
            state: self.state,
            last_update_id: self.last_update_id,
            checked: self.checked,
            passed: self.passed,
            gap_count: self.gap_count,
            largest_gap: self.largest_gap,
            resets: self.resets,
            gap_rate,
        }
    }
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Sequence tracker statistics
#[derive(Debug, Clone)]
pub struct SequenceStats {
    pub state: SyncState,
    pub last_update_id: Option<u64>,
    pub checked: u64,
    pub passed: u64,
    pub gap_count: u64,
    pub largest_gap: u64,
    pub resets: u64,
    pub gap_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_update_straddles_snapshot() {
        let mut tracker = SequenceTracker::new();
        tracker.reset(Some(100));

        let seq = SequenceInfo::new(100, 101, Some(99));
        assert_eq!(tracker.check(&seq), SequenceCheck::Continuous);
        tracker.advance(&seq);
        assert_eq!(tracker.state(), SyncState::Synchronized);
        assert_eq!(tracker.last_update_id(), Some(101));
    }

    #[test]
    fn test_first_update_bridging_by_pu() {
        let mut tracker = SequenceTracker::new();
        tracker.reset(Some(100));
        let seq = SequenceInfo::new(105, 110, Some(100));
        assert_eq!(tracker.check(&seq), SequenceCheck::Continuous);
    }

    #[test]
    fn test_disconnected_first_update_is_gap() {
        let mut tracker = SequenceTracker::new();
        tracker.reset(Some(100));

        let seq = SequenceInfo::new(51, 60, Some(50));
        assert_eq!(tracker.check(&seq), SequenceCheck::Gap { expected: 100, got: 50 });
        assert!(tracker.is_out_of_sync());
        assert_eq!(tracker.get_stats().gap_count, 1);
    }

    #[test]
    fn test_pu_continuity_after_sync() {
        let mut tracker = SequenceTracker::new();
        tracker.reset(Some(100));
        let first = SequenceInfo::new(99, 105, Some(98));
        tracker.check(&first);
        tracker.advance(&first);

        let next = SequenceInfo::new(106, 110, Some(105));
        assert_eq!(tracker.check(&next), SequenceCheck::Continuous);
        tracker.advance(&next);

        let gapped = SequenceInfo::new(200, 205, Some(199));
        assert!(matches!(tracker.check(&gapped), SequenceCheck::Gap { .. }));

        // Stays out of sync until the next snapshot
        let resumed = SequenceInfo::new(111, 112, Some(110));
        assert!(matches!(tracker.check(&resumed), SequenceCheck::Gap { .. }));
        assert_eq!(tracker.get_stats().gap_count, 1);

        tracker.reset(Some(300));
        assert_eq!(tracker.state(), SyncState::AwaitingFirst);
    }

    #[test]
    fn test_spot_style_sequential_ids() {
        let mut tracker = SequenceTracker::new();
        tracker.reset(Some(10));
        let first = SequenceInfo::new(11, 12, None);
        assert_eq!(tracker.check(&first), SequenceCheck::Continuous);
        tracker.advance(&first);

        let next = SequenceInfo::new(13, 15, None);
        assert_eq!(tracker.check(&next), SequenceCheck::Continuous);
        tracker.advance(&next);

        let gapped = SequenceInfo::new(20, 21, None);
        assert_eq!(tracker.check(&gapped), SequenceCheck::Gap { expected: 16, got: 20 });
    }

    #[test]
    fn test_unsequenced_snapshot_anchors_on_first_update() {
        let mut tracker = SequenceTracker::new();
        tracker.reset(None);
        let seq = SequenceInfo::new(500, 510, Some(499));
        assert_eq!(tracker.check(&seq), SequenceCheck::Continuous);
    }
}
