// Signal - composite scoring and position-bias transitions
// FeatureSet -> CompositeScore -> SignalAction

// Module structure:
// - score_combiner.rs: ScoreCombiner (regime weights, trend gate, conviction damping)
// - state_machine.rs: SignalStateMachine (hysteresis, cooldown)
// - flow_bias.rs: FlowBiasDetector (three-filter readout)

pub mod score_combiner;
pub mod state_machine;
pub mod flow_bias;

pub use score_combiner::{to_final_score, CompositeScore, InsufficientData, ScoreCombiner, ScoreNote};
pub use state_machine::{SignalStateMachine, StateMachineStats};
pub use flow_bias::{FlowBias, FlowBiasDetector, FlowBiasReading};
