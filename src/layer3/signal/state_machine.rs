// Signal State Machine - hysteresis and cooldown over the composite score
// Flat / Long / Short; at most one transition per cycle

use std::fmt;
use tracing::{debug, info};

use crate::core::config::{ConfigError, SignalConfig};
use crate::core::types::{PositionBias, SignalAction};

/// State machine statistics
#[derive(Debug, Clone)]
pub struct StateMachineStats {
    pub state: PositionBias,
    pub steps: u64,
    pub transitions: u64,
    pub suppressed_by_cooldown: u64,
    pub last_signal_at: Option<i64>,
}

impl fmt::Display for StateMachineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StateMachine(state={}, steps={}, transitions={}, cooldown_suppressed={})",
            self.state, self.steps, self.transitions, self.suppressed_by_cooldown
        )
    }
}

#[derive(Debug, Clone)]
pub struct SignalStateMachine {
    config: SignalConfig,
    state: PositionBias,
    last_signal_at: Option<i64>,

    // Statistics
    steps: u64,
    transitions: u64,
    suppressed_by_cooldown: u64,
}

impl SignalStateMachine {
    /// Rejects thresholds without hysteresis
    pub fn new(config: SignalConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            state: PositionBias::Flat,
            last_signal_at: None,
            steps: 0,
            transitions: 0,
            suppressed_by_cooldown: 0,
        })
    }

    fn cooldown_elapsed(&self, now_ms: i64) -> bool {
        self.last_signal_at
            .map(|t| now_ms - t >= self.config.cooldown_ms)
            .unwrap_or(true)
    }

    /// Entry qualifies on score and gate; cooldown is checked separately
    fn long_entry_qualifies(&self, final_score: u8, gate: i8) -> bool {
        gate >= 0 && final_score >= self.config.enter_long
    }

    fn short_entry_qualifies(&self, final_score: u8, gate: i8) -> bool {
        gate <= 0 && final_score <= self.config.enter_short
    }

    /// Advance one cycle
    pub fn step(&mut self, final_score: u8, gate: i8, now_ms: i64) -> SignalAction {
        self.steps += 1;
        let cooled = self.cooldown_elapsed(now_ms);

        let wants_long = self.long_entry_qualifies(final_score, gate);
        let wants_short = self.short_entry_qualifies(final_score, gate);

        let action = match self.state {
            PositionBias::Flat => {
                if wants_long && cooled {
                    SignalAction::EnterLong
                } else if wants_short && cooled {
                    SignalAction::EnterShort
                } else {
                    SignalAction::Hold
                }
            }
            PositionBias::Long => {
                if wants_short && cooled {
                    SignalAction::EnterShort
                } else if final_score <= self.config.exit_long {
                    SignalAction::ExitLong
                } else {
                    SignalAction::Hold
                }
            }
            PositionBias::Short => {
                if wants_long && cooled {
                    SignalAction::EnterLong
                } else if final_score >= self.config.exit_short {
                    SignalAction::ExitShort
                } else {
                    SignalAction::Hold
                }
            }
        };

        if action.is_hold() {
            let entry_blocked = !cooled
                && match self.state {
                    PositionBias::Flat => wants_long || wants_short,
                    PositionBias::Long => wants_short,
                    PositionBias::Short => wants_long,
                };
            if entry_blocked {
                self.suppressed_by_cooldown += 1;
                debug!(score = final_score, gate = gate, "Entry suppressed by cooldown");
            }
            return action;
        }

        let previous = self.state;
        self.state = match action {
            SignalAction::EnterLong => PositionBias::Long,
            SignalAction::EnterShort => PositionBias::Short,
            _ => PositionBias::Flat,
        };
        self.last_signal_at = Some(now_ms);
        self.transitions += 1;

        info!(
            from = %previous,
            to = %self.state,
            action = %action,
            score = final_score,
            gate = gate,
            "Signal transition"
        );
        action
    }

    pub fn state(&self) -> PositionBias {
        self.state
    }

    pub fn last_signal_at(&self) -> Option<i64> {
        self.last_signal_at
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    pub fn get_stats(&self) -> StateMachineStats {
        StateMachineStats {
            state: self.state,
            steps: self.steps,
            transitions: self.transitions,
            suppressed_by_cooldown: self.suppressed_by_cooldown,
            last_signal_at: self.last_signal_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> SignalStateMachine {
        SignalStateMachine::new(SignalConfig::default()).unwrap()
    }

    #[test]
    fn test_rejects_non_hysteretic_thresholds() {
        let config = SignalConfig { enter_long: 60, exit_long: 70, ..SignalConfig::default() };
        assert!(matches!(SignalStateMachine::new(config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_hysteresis_sequence() {
        let mut sm = machine();
        let actions: Vec<SignalAction> = [50u8, 85, 75, 70, 65]
            .iter()
            .enumerate()
            .map(|(i, s)| sm.step(*s, 1, i as i64 * 1_000))
            .collect();

        assert_eq!(
            actions,
            vec![
                SignalAction::Hold,
                SignalAction::EnterLong,
                SignalAction::Hold,
                SignalAction::Hold,
                SignalAction::ExitLong,
            ]
        );
        assert_eq!(sm.state(), PositionBias::Flat);
    }

    #[test]
    fn test_cooldown_blocks_reentry() {
        let mut sm = machine();
        assert_eq!(sm.step(85, 1, 0), SignalAction::EnterLong);
        // Exits are never held back by cooldown
        assert_eq!(sm.step(60, 1, 1_000), SignalAction::ExitLong);
        assert_eq!(sm.step(85, 1, 2_000), SignalAction::Hold);
        assert_eq!(sm.get_stats().suppressed_by_cooldown, 1);

        assert_eq!(sm.step(85, 1, 31_000), SignalAction::EnterLong);
    }

    #[test]
    fn test_gate_blocks_counter_trend_entry() {
        let mut sm = machine();
        assert_eq!(sm.step(90, -1, 0), SignalAction::Hold);
        assert_eq!(sm.step(10, 1, 0), SignalAction::Hold);
        assert_eq!(sm.step(10, 0, 0), SignalAction::EnterShort);
        assert_eq!(sm.state(), PositionBias::Short);
    }

    #[test]
    fn test_short_exit_and_reversal_precedence() {
        let mut sm = machine();
        sm.step(10, -1, 0);
        assert_eq!(sm.step(25, -1, 1_000), SignalAction::Hold);
        assert_eq!(sm.step(35, -1, 2_000), SignalAction::ExitShort);

        let mut sm = machine();
        sm.step(10, -1, 0);
        // Qualified long entry after cooldown reverses directly
        assert_eq!(sm.step(90, 1, 40_000), SignalAction::EnterLong);
        assert_eq!(sm.state(), PositionBias::Long);

        // Inside cooldown the same score only exits
        let mut sm = machine();
        sm.step(10, -1, 0);
        assert_eq!(sm.step(90, 1, 1_000), SignalAction::ExitShort);
    }
}
