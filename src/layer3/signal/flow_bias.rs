// Flow Bias Detector - three aligned filters: top-N OBI, buy ratio, mid vs SMA
// Debounced directional readout; never drives the state machine

use std::fmt;
use tracing::debug;

use crate::core::config::FlowBiasConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowBias {
    Long,
    Short,
    #[default]
    Neutral,
}

impl fmt::Display for FlowBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowBias::Long => write!(f, "long"),
            FlowBias::Short => write!(f, "short"),
            FlowBias::Neutral => write!(f, "no-signal"),
        }
    }
}

/// A debounced directional reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowBiasReading {
    pub bias: FlowBias,
    pub obi: f64,
    pub buy_ratio: f64,
    pub mid: f64,
    pub mid_sma: f64,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone)]
pub struct FlowBiasDetector {
    config: FlowBiasConfig,
    last_signal_at: Option<i64>,
    last_reading: Option<FlowBiasReading>,

    // Statistics
    long_signals: u64,
    short_signals: u64,
    debounced: u64,
}

impl FlowBiasDetector {
    pub fn new(config: FlowBiasConfig) -> Self {
        Self {
            config,
            last_signal_at: None,
            last_reading: None,
            long_signals: 0,
            short_signals: 0,
            debounced: 0,
        }
    }

    /// Evaluate the filters. Returns a reading only when a direction fires outside the debounce interval.
    pub fn evaluate(
        &mut self,
        obi: f64,
        buy_ratio: f64,
        mid: Option<f64>,
        mid_sma: Option<f64>,
        now_ms: i64,
    ) -> Option<FlowBiasReading> {
        // Both the mid and a full SMA buffer are required
        let (mid, mid_sma) = (mid?, mid_sma?);

        let bias = if obi > self.config.obi_long && buy_ratio > self.config.tfi_long && mid > mid_sma {
            FlowBias::Long
        } else if obi < self.config.obi_short && buy_ratio < self.config.tfi_short && mid < mid_sma {
            FlowBias::Short
        } else {
            return None;
        };

        if let Some(last) = self.last_signal_at {
            if now_ms - last < self.config.min_signal_interval_ms {
                self.debounced += 1;
                return None;
            }
        }

        self.last_signal_at = Some(now_ms);
        match bias {
            FlowBias::Long => self.long_signals += 1,
            FlowBias::Short => self.short_signals += 1,
            FlowBias::Neutral => {}
        }

        let reading = FlowBiasReading { bias, obi, buy_ratio, mid, mid_sma, timestamp_ms: now_ms };
        debug!(bias = %bias, obi = obi, buy_ratio = buy_ratio, "Flow bias");
        self.last_reading = Some(reading);
        Some(reading)
    }

    pub fn last_reading(&self) -> Option<FlowBiasReading> {
        self.last_reading
    }

    pub fn last_bias(&self) -> FlowBias {
        self.last_reading.map(|r| r.bias).unwrap_or_default()
    }

    /// (long, short, debounced)
    pub fn counts(&self) -> (u64, u64, u64) {
        (self.long_signals, self.short_signals, self.debounced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_filters_must_align() {
        let mut d = FlowBiasDetector::new(FlowBiasConfig::default());
        // Mid below SMA blocks the long
        assert!(d.evaluate(0.5, 0.8, Some(99.0), Some(100.0), 0).is_none());
        // Buy ratio too low
        assert!(d.evaluate(0.5, 0.5, Some(101.0), Some(100.0), 0).is_none());
        // No SMA yet
        assert!(d.evaluate(0.5, 0.8, Some(101.0), None, 0).is_none());

        let reading = d.evaluate(0.5, 0.8, Some(101.0), Some(100.0), 0).unwrap();
        assert_eq!(reading.bias, FlowBias::Long);
    }

    #[test]
    fn test_short_and_debounce() {
        let mut d = FlowBiasDetector::new(FlowBiasConfig::default());
        let reading = d.evaluate(-0.5, 0.2, Some(99.0), Some(100.0), 0).unwrap();
        assert_eq!(reading.bias, FlowBias::Short);

        assert!(d.evaluate(-0.5, 0.2, Some(99.0), Some(100.0), 1_000).is_none());
        assert!(d.evaluate(-0.5, 0.2, Some(99.0), Some(100.0), 2_000).is_some());
        assert_eq!(d.counts(), (0, 2, 1));
        assert_eq!(d.last_bias(), FlowBias::Short);
    }
}
