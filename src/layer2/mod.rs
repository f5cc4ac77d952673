// Layer 2 - Book replication, event windows and the per-instrument pipeline
// Feed events in arrival order -> synchronized replica + windowed buffers -> throttled scoring

pub mod parser;
pub mod synchronizer;
pub mod orderbook;
pub mod event_window;
pub mod pipeline;

// Re-export commonly used items
pub use parser::{FeedEvent, FeedParser, ParseError, ParserStats, PriceLevel, parse_levels};
pub use synchronizer::{SequenceCheck, SequenceStats, SequenceTracker, SyncState};
pub use orderbook::{OrderBookReplica, ReplicaError, ReplicaSummary, WeightedDepth};
pub use event_window::{EventWindowStats, EventWindowStore};
pub use pipeline::{
    ComputeGate, InstrumentPipeline, PipelineError, PipelineHandle, PipelineSet, PipelineStats,
    ResyncReason, ResyncRequest, ResyncRequester, ScoreInputs, ScoreOutcome, spawn_pipeline,
};
