// Flowscore - Order-flow trend score engine
// Order book replica -> windowed features -> composite score -> hysteretic signal

pub mod core;
pub mod layer2;
pub mod layer3;

pub use crate::core::config::{ConfigManager, EngineConfig};
pub use crate::core::events::{SignalBus, SignalSink};
pub use crate::core::types::{Signal, SignalAction, PositionBias};
pub use crate::layer2::pipeline::{
    InstrumentPipeline, PipelineHandle, PipelineSet, ResyncRequest, ResyncRequester, spawn_pipeline,
};
