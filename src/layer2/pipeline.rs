// Instrument Pipeline - ingestion, throttled scoring and signal emission
// FeedEvent -> replica/windows/trend -> (tick) features -> score -> state machine -> sink

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

use crate::core::config::{ConfigError, EngineConfig, PipelineConfig};
use crate::core::events::SignalSink;
use crate::core::logger::instrument_span;
use crate::core::types::{now_ms, DeltaEvent, FlowDelta, PositionBias, SequenceInfo, Signal, TradeEvent};
use crate::layer2::event_window::EventWindowStore;
use crate::layer2::orderbook::{OrderBookReplica, ReplicaError};
use crate::layer2::parser::{FeedEvent, PriceLevel};
use crate::layer3::features::{FeatureEngine, FeatureInputs, FeatureSet, TrendTracker};
use crate::layer3::signal::{
    CompositeScore, FlowBias, FlowBiasDetector, FlowBiasReading, InsufficientData, ScoreCombiner,
    ScoreNote, SignalStateMachine,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No pipeline for instrument {0}")]
    UnknownInstrument(String),
    #[error("Feed channel closed for {0}")]
    ChannelClosed(String),
    #[error("Feed channel full for {0}")]
    Backpressure(String),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

// ============================================================================
// Resync
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncReason {
    SequenceGap { expected: u64, got: u64 },
    NotInitialized,
    Periodic,
}

impl fmt::Display for ResyncReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResyncReason::SequenceGap { expected, got } => write!(f, "sequence gap (expected {}, got {})", expected, got),
            ResyncReason::NotInitialized => write!(f, "not initialized"),
            ResyncReason::Periodic => write!(f, "periodic"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResyncRequest {
    pub instrument: String,
    pub reason: ResyncReason,
    pub requested_at: i64,
}

/// Feed-side collaborator that answers with a fresh snapshot
pub trait ResyncRequester: Send + Sync {
    fn on_resync_required(&self, instrument: &str, reason: ResyncReason);
}

impl ResyncRequester for mpsc::UnboundedSender<ResyncRequest> {
    fn on_resync_required(&self, instrument: &str, reason: ResyncReason) {
        let request = ResyncRequest {
            instrument: instrument.to_string(),
            reason,
            requested_at: now_ms(),
        };
        if self.send(request).is_err() {
            debug!(instrument = instrument, "Resync receiver dropped");
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Pipeline statistics
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub instrument: String,
    pub is_running: bool,
    pub snapshots: u64,
    pub depth_updates: u64,
    pub trades: u64,
    pub rejected_events: u64,
    pub resync_requests: u64,
    pub cycles_completed: u64,
    pub ticks_skipped: u64,
    pub insufficient_data: u64,
    pub book_unavailable: u64,
    pub shallow_depth: u64,
    pub signals_emitted: u64,
    pub last_final_score: Option<u8>,
    pub last_gate: i8,
    pub state: PositionBias,
    pub flow_bias: FlowBias,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pipeline(instrument={}, running={}, cycles={}, skipped_ticks={}, signals={}, state={}, score={:?})",
            self.instrument, self.is_running, self.cycles_completed, self.ticks_skipped,
            self.signals_emitted, self.state, self.last_final_score
        )
    }
}

// ============================================================================
// Throttle gate
// ============================================================================

/// At most one computation in flight; ticks arriving meanwhile are dropped, not queued
#[derive(Debug, Clone, Default)]
pub struct ComputeGate {
    in_flight: bool,
    started: u64,
    skipped: u64,
}

impl ComputeGate {
    pub fn try_begin(&mut self) -> bool {
        if self.in_flight {
            self.skipped += 1;
            return false;
        }
        self.in_flight = true;
        self.started += 1;
        true
    }

    pub fn finish(&mut self) {
        self.in_flight = false;
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn started(&self) -> u64 {
        self.started
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

// ============================================================================
// Score inputs
// ============================================================================

/// Detached reads for one cycle. Ingestion continues on the live state.
#[derive(Debug, Clone)]
pub struct ScoreInputs {
    inputs: FeatureInputs,
    features: FeatureEngine,
    combiner: ScoreCombiner,
}

impl ScoreInputs {
    pub fn now_ms(&self) -> i64 {
        self.inputs.timestamp_ms
    }

    pub fn run(self) -> ScoreOutcome {
        let now_ms = self.inputs.timestamp_ms;
        let features = self.features.derive(self.inputs);
        let score = self.combiner.combine(&features);
        ScoreOutcome { features, score, now_ms }
    }
}

#[derive(Debug, Clone)]
pub struct ScoreOutcome {
    pub features: FeatureSet,
    pub score: Result<CompositeScore, InsufficientData>,
    pub now_ms: i64,
}

// ============================================================================
// Instrument Pipeline
// ============================================================================

/// Owns all state for one instrument. Events must be fed in arrival order.
pub struct InstrumentPipeline {
    pub instrument: String,
    runtime: PipelineConfig,

    book: OrderBookReplica,
    window: EventWindowStore,
    trend: TrendTracker,
    features: FeatureEngine,
    combiner: ScoreCombiner,
    state_machine: SignalStateMachine,
    flow_bias: FlowBiasDetector,

    // One gap/uninitialized request per outage; cleared by the next snapshot
    resync_requested: bool,
    pending_resync: Option<ResyncReason>,

    last_score: Option<CompositeScore>,
    stats: PipelineStats,
}

impl InstrumentPipeline {
    pub fn new(instrument: &str, config: &EngineConfig) -> Result<Self, ConfigError> {
        let instrument = instrument.to_uppercase();
        config.check_pipeline()?;
        let state_machine = SignalStateMachine::new(config.signal.clone())?;

        info!(
            instrument = %instrument,
            recompute_ms = config.pipeline.recompute_interval_ms,
            "Creating instrument pipeline"
        );

        Ok(Self {
            runtime: config.pipeline.clone(),
            book: OrderBookReplica::new(&instrument, config.book.clone()),
            window: EventWindowStore::new(&instrument, &config.window),
            trend: TrendTracker::new(&instrument, config.trend.clone(), &config.window),
            features: FeatureEngine::new(config),
            combiner: ScoreCombiner::new(config.scoring.clone()),
            state_machine,
            flow_bias: FlowBiasDetector::new(config.flow_bias.clone()),
            resync_requested: false,
            pending_resync: None,
            last_score: None,
            stats: PipelineStats { instrument: instrument.clone(), ..PipelineStats::default() },
            instrument,
        })
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    pub fn handle(&mut self, event: FeedEvent) -> Result<(), ReplicaError> {
        match event {
            FeedEvent::Snapshot { bids, asks, last_update_id, timestamp_ms } => {
                self.on_snapshot(&bids, &asks, last_update_id, timestamp_ms)
            }
            FeedEvent::RawSnapshot { bids, asks, last_update_id, timestamp_ms } => {
                self.on_raw_snapshot(&bids, &asks, last_update_id, timestamp_ms)
            }
            FeedEvent::Depth { deltas, sequence } => self.on_depth(&deltas, sequence),
            FeedEvent::Trade(trade) => {
                self.on_trade(trade);
                Ok(())
            }
        }
    }

    pub fn on_snapshot(
        &mut self,
        bids: &[PriceLevel],
        asks: &[PriceLevel],
        last_update_id: Option<u64>,
        timestamp_ms: i64,
    ) -> Result<(), ReplicaError> {
        let result = self.book.load_snapshot(bids, asks, last_update_id, timestamp_ms);
        self.after_snapshot(result, timestamp_ms)
    }

    pub fn on_raw_snapshot(
        &mut self,
        bids: &[[String; 2]],
        asks: &[[String; 2]],
        last_update_id: Option<u64>,
        timestamp_ms: i64,
    ) -> Result<(), ReplicaError> {
        let result = self.book.load_raw_snapshot(bids, asks, last_update_id, timestamp_ms);
        self.after_snapshot(result, timestamp_ms)
    }

    fn after_snapshot(
        &mut self,
        result: Result<Vec<FlowDelta>, ReplicaError>,
        timestamp_ms: i64,
    ) -> Result<(), ReplicaError> {
        match result {
            Ok(flows) => {
                self.window.record_flows(flows);
                self.stats.snapshots += 1;
                self.resync_requested = false;
                self.pending_resync = None;
                self.update_mid(timestamp_ms);
                Ok(())
            }
            Err(e) => {
                self.reject(&e);
                Err(e)
            }
        }
    }

    /// Apply a batch of level changes sharing one sequence range
    pub fn on_depth(&mut self, deltas: &[DeltaEvent], sequence: Option<SequenceInfo>) -> Result<(), ReplicaError> {
        match self.book.apply_depth_update(deltas, sequence) {
            Ok(flows) => {
                self.window.record_flows(flows);
                self.stats.depth_updates += 1;
                let ts = deltas
                    .iter()
                    .map(|d| d.observed_at_ms)
                    .max()
                    .unwrap_or_else(|| self.book.last_update_ms());
                self.update_mid(ts);
                Ok(())
            }
            Err(e) => {
                self.reject(&e);
                Err(e)
            }
        }
    }

    pub fn on_delta(&mut self, delta: DeltaEvent, sequence: Option<SequenceInfo>) -> Result<(), ReplicaError> {
        self.on_depth(&[delta], sequence)
    }

    /// Record a trade; malformed prints are dropped
    pub fn on_trade(&mut self, trade: TradeEvent) -> bool {
        let valid = trade.price.is_finite() && trade.price > 0.0 && trade.size.is_finite() && trade.size > 0.0;
        if !valid {
            self.stats.rejected_events += 1;
            warn!(instrument = %self.instrument, price = trade.price, size = trade.size, "Dropping invalid trade");
            return false;
        }
        self.trend.on_trade(&trade);
        self.window.record_trade(trade);
        self.stats.trades += 1;
        true
    }

    fn update_mid(&mut self, timestamp_ms: i64) {
        if let Some(mid) = self.book.mid_price() {
            self.trend.on_mid(mid, timestamp_ms);
        }
    }

    fn reject(&mut self, error: &ReplicaError) {
        self.stats.rejected_events += 1;
        match error {
            ReplicaError::NeedsResync { expected, got } => {
                self.request_resync(ResyncReason::SequenceGap { expected: *expected, got: *got })
            }
            ReplicaError::NotInitialized => self.request_resync(ResyncReason::NotInitialized),
            other => warn!(instrument = %self.instrument, error = %other, "Dropping invalid book update"),
        }
    }

    fn request_resync(&mut self, reason: ResyncReason) {
        if self.resync_requested {
            return;
        }
        self.resync_requested = true;
        self.pending_resync = Some(reason);
        self.stats.resync_requests += 1;
        warn!(instrument = %self.instrument, reason = %reason, "Resync required");
    }

    /// Time-based resync for feeds without sequence ids
    pub fn request_periodic_resync(&mut self) {
        self.pending_resync = Some(ResyncReason::Periodic);
        self.stats.resync_requests += 1;
        debug!(instrument = %self.instrument, "Periodic resync due");
    }

    /// Take the outstanding resync request, if any
    pub fn take_resync_request(&mut self) -> Option<ResyncReason> {
        self.pending_resync.take()
    }

    // ========================================================================
    // Scoring
    // ========================================================================

    /// Prune windows and capture the reads one cycle needs
    pub fn prepare(&mut self, now_ms: i64) -> Result<ScoreInputs, InsufficientData> {
        if !self.book.is_initialized() || self.book.needs_resync() {
            self.stats.book_unavailable += 1;
            return Err(InsufficientData::BookUnavailable);
        }

        self.window.prune(now_ms);
        Ok(ScoreInputs {
            inputs: self.features.capture(&self.book, &self.window, &self.trend, now_ms),
            features: self.features.clone(),
            combiner: self.combiner.clone(),
        })
    }

    /// Feed a finished computation through the flow bias and the state machine
    pub fn apply_outcome(&mut self, outcome: ScoreOutcome) -> Option<Signal> {
        let ScoreOutcome { features, score, now_ms } = outcome;

        if let Some(reading) = self.flow_bias.evaluate(
            features.top_n_obi,
            features.bias_flow.buy_ratio(),
            features.trend.mid,
            features.trend.mid_sma,
            now_ms,
        ) {
            info!(
                instrument = %self.instrument,
                bias = %reading.bias,
                obi = reading.obi,
                buy_ratio = reading.buy_ratio,
                "Flow bias"
            );
        }
        self.stats.flow_bias = self.flow_bias.last_bias();

        let score = match score {
            Ok(score) => score,
            Err(reason) => {
                self.stats.insufficient_data += 1;
                debug!(instrument = %self.instrument, reason = %reason, "Cycle skipped");
                return None;
            }
        };

        self.stats.cycles_completed += 1;
        if score.has_note(ScoreNote::ShallowDepth) {
            self.stats.shallow_depth += 1;
        }

        let action = self.state_machine.step(score.final_score, score.gate, now_ms);
        self.stats.last_final_score = Some(score.final_score);
        self.stats.last_gate = score.gate;
        self.stats.state = self.state_machine.state();

        debug!(instrument = %self.instrument, score = %score, action = %action, "Cycle complete");

        let signal = Signal {
            instrument: self.instrument.clone(),
            action,
            final_score: score.final_score,
            gate: score.gate,
            edge_bps: score.edge_bps,
            depth: score.depth,
            timestamp_ms: now_ms,
        };
        self.last_score = Some(score);

        if action.is_hold() && !self.runtime.emit_hold {
            return None;
        }
        self.stats.signals_emitted += 1;
        Some(signal)
    }

    /// Score without touching the state machine
    pub fn compute_score(&mut self, now_ms: i64) -> Result<CompositeScore, InsufficientData> {
        self.prepare(now_ms)?.run().score
    }

    /// One full synchronous cycle
    pub fn evaluate(&mut self, now_ms: i64) -> Option<Signal> {
        match self.prepare(now_ms) {
            Ok(inputs) => {
                let outcome = inputs.run();
                self.apply_outcome(outcome)
            }
            Err(reason) => {
                debug!(instrument = %self.instrument, reason = %reason, "Cycle skipped");
                None
            }
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn book(&self) -> &OrderBookReplica {
        &self.book
    }

    pub fn window(&self) -> &EventWindowStore {
        &self.window
    }

    pub fn trend(&self) -> &TrendTracker {
        &self.trend
    }

    pub fn state(&self) -> PositionBias {
        self.state_machine.state()
    }

    pub fn last_score(&self) -> Option<&CompositeScore> {
        self.last_score.as_ref()
    }

    pub fn flow_bias(&self) -> Option<FlowBiasReading> {
        self.flow_bias.last_reading()
    }

    pub fn runtime_config(&self) -> &PipelineConfig {
        &self.runtime
    }

    pub fn get_stats(&self) -> PipelineStats {
        let mut stats = self.stats.clone();
        stats.state = self.state_machine.state();
        stats
    }
}

// ============================================================================
// Async runner
// ============================================================================

/// Handle to a running pipeline task. Dropping it stops the task.
pub struct PipelineHandle {
    pub instrument: String,
    stats: Arc<RwLock<PipelineStats>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<InstrumentPipeline>,
}

impl PipelineHandle {
    pub fn stats(&self) -> PipelineStats {
        self.stats.read().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the task and take back the pipeline. In-flight work is discarded.
    pub async fn shutdown(mut self) -> Result<InstrumentPipeline, JoinError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.task.await
    }

    /// Wait for the task to end on its own (feed channel closed)
    pub async fn join(self) -> Result<InstrumentPipeline, JoinError> {
        let PipelineHandle { task, shutdown_tx, .. } = self;
        let result = task.await;
        drop(shutdown_tx);
        result
    }
}

async fn wait_in_flight(task: &mut Option<JoinHandle<ScoreOutcome>>) -> Result<ScoreOutcome, JoinError> {
    match task.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn publish_stats(shared: &RwLock<PipelineStats>, pipeline: &InstrumentPipeline, gate: &ComputeGate, running: bool) {
    let mut stats = pipeline.get_stats();
    stats.ticks_skipped = gate.skipped();
    stats.is_running = running;
    *shared.write() = stats;
}

/// Run one pipeline on its own task. Must be called inside a tokio runtime.
pub fn spawn_pipeline(
    mut pipeline: InstrumentPipeline,
    mut feed_rx: mpsc::Receiver<FeedEvent>,
    sink: Arc<dyn SignalSink>,
    resync: Arc<dyn ResyncRequester>,
) -> PipelineHandle {
    let instrument = pipeline.instrument.clone();
    let stats = Arc::new(RwLock::new(pipeline.get_stats()));
    let shared = Arc::clone(&stats);
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let recompute = Duration::from_millis(pipeline.runtime.recompute_interval_ms.max(1));
    let resync_every = pipeline.runtime.resync_interval_ms.map(|ms| Duration::from_millis(ms.max(1)));
    let span = instrument_span(&instrument);
    let task_instrument = instrument.clone();

    let task = tokio::spawn(
        async move {
            let instrument = task_instrument;
            info!(recompute_ms = recompute.as_millis() as u64, "Pipeline task started");

            let mut ticker = interval(recompute);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let mut resync_ticker = interval(resync_every.unwrap_or(Duration::from_secs(3600)));
            resync_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            resync_ticker.reset();

            let mut gate = ComputeGate::default();
            let mut in_flight: Option<JoinHandle<ScoreOutcome>> = None;
            publish_stats(&shared, &pipeline, &gate, true);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        debug!("Shutdown requested");
                        break;
                    }

                    event = feed_rx.recv() => match event {
                        Some(event) => {
                            // Rejections are logged and counted inside the pipeline
                            let _ = pipeline.handle(event);
                            if let Some(reason) = pipeline.take_resync_request() {
                                resync.on_resync_required(&instrument, reason);
                            }
                        }
                        None => {
                            info!("Feed channel closed");
                            break;
                        }
                    },

                    _ = ticker.tick() => {
                        if !gate.try_begin() {
                            debug!("Computation still in flight, tick skipped");
                        } else {
                            match pipeline.prepare(now_ms()) {
                                Ok(inputs) => in_flight = Some(tokio::spawn(async move { inputs.run() })),
                                Err(reason) => {
                                    gate.finish();
                                    debug!(reason = %reason, "Cycle skipped");
                                }
                            }
                        }
                        publish_stats(&shared, &pipeline, &gate, true);
                    }

                    joined = wait_in_flight(&mut in_flight), if in_flight.is_some() => {
                        in_flight = None;
                        gate.finish();
                        match joined {
                            Ok(outcome) => {
                                if let Some(signal) = pipeline.apply_outcome(outcome) {
                                    info!(signal = %signal, "Signal emitted");
                                    sink.on_signal(signal);
                                }
                            }
                            Err(e) => warn!(error = %e, "Score computation failed"),
                        }
                        publish_stats(&shared, &pipeline, &gate, true);
                    }

                    _ = resync_ticker.tick(), if resync_every.is_some() => {
                        pipeline.request_periodic_resync();
                        if let Some(reason) = pipeline.take_resync_request() {
                            resync.on_resync_required(&instrument, reason);
                        }
                    }
                }
            }

            if let Some(task) = in_flight.take() {
                task.abort();
            }
            publish_stats(&shared, &pipeline, &gate, false);
            info!(stats = %pipeline.get_stats(), "Pipeline task stopped");
            pipeline
        }
        .instrument(span),
    );

    PipelineHandle {
        instrument,
        stats,
        shutdown_tx: Some(shutdown_tx),
        task,
    }
}

// ============================================================================
// Pipeline Set
// ============================================================================

/// Independent pipelines keyed by instrument; routes feed events to the right one
pub struct PipelineSet {
    feeds: HashMap<String, mpsc::Sender<FeedEvent>>,
    handles: HashMap<String, PipelineHandle>,
}

impl PipelineSet {
    /// Spawn one pipeline per configured instrument
    pub fn spawn(
        config: &EngineConfig,
        sink: Arc<dyn SignalSink>,
        resync: Arc<dyn ResyncRequester>,
    ) -> Result<Self, PipelineError> {
        config.check()?;
        let mut feeds = HashMap::new();
        let mut handles = HashMap::new();

        for instrument in &config.instruments {
            let key = instrument.to_uppercase();
            if feeds.contains_key(&key) {
                warn!(instrument = %key, "Duplicate instrument in config, ignoring");
                continue;
            }

            let pipeline = InstrumentPipeline::new(&key, config)?;
            let (tx, rx) = mpsc::channel(config.pipeline.feed_buffer.max(1));
            let handle = spawn_pipeline(pipeline, rx, Arc::clone(&sink), Arc::clone(&resync));

            feeds.insert(key.clone(), tx);
            handles.insert(key, handle);
        }

        info!(count = handles.len(), "Pipelines spawned");
        Ok(Self { feeds, handles })
    }

    fn sender(&self, instrument: &str) -> Result<(&mpsc::Sender<FeedEvent>, String), PipelineError> {
        let key = instrument.to_uppercase();
        match self.feeds.get(&key) {
            Some(tx) => Ok((tx, key)),
            None => Err(PipelineError::UnknownInstrument(key)),
        }
    }

    /// Route an event, waiting for channel capacity
    pub async fn route(&self, instrument: &str, event: FeedEvent) -> Result<(), PipelineError> {
        let (tx, key) = self.sender(instrument)?;
        tx.send(event).await.map_err(|_| PipelineError::ChannelClosed(key))
    }

    /// Route without waiting; a full channel is reported, not buffered
    pub fn try_route(&self, instrument: &str, event: FeedEvent) -> Result<(), PipelineError> {
        let (tx, key) = self.sender(instrument)?;
        tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => PipelineError::Backpressure(key),
            TrySendError::Closed(_) => PipelineError::ChannelClosed(key),
        })
    }

    pub fn instruments(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handles.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn stats(&self, instrument: &str) -> Option<PipelineStats> {
        self.handles.get(&instrument.to_uppercase()).map(|h| h.stats())
    }

    pub fn all_stats(&self) -> Vec<PipelineStats> {
        self.instruments()
            .iter()
            .filter_map(|name| self.stats(name))
            .collect()
    }

    /// Stop every pipeline and hand back their final state
    pub async fn shutdown(self) -> HashMap<String, InstrumentPipeline> {
        let PipelineSet { feeds, handles } = self;
        drop(feeds);

        let mut stopped = HashMap::new();
        for (name, handle) in handles {
            match handle.shutdown().await {
                Ok(pipeline) => {
                    stopped.insert(name, pipeline);
                }
                Err(e) => warn!(instrument = %name, error = %e, "Pipeline task failed"),
            }
        }
        info!(count = stopped.len(), "Pipelines stopped");
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AggressorSide, Side, SignalAction};

    fn test_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.book.level_decay = 1.0;
        config.scoring.spike_factor = 1.0;
        config.signal.enter_long = 60;
        config.signal.exit_long = 50;
        config
    }

    fn levels(start: f64, step: f64, size: f64) -> Vec<PriceLevel> {
        (0..5).map(|i| PriceLevel::new(start + step * i as f64, size)).collect()
    }

    /// Snapshot, rising bids, then 25 rising buys and 5 falling sells, all relative to `base`
    fn feed_bullish(pipeline: &mut InstrumentPipeline, base: i64) {
        pipeline
            .on_snapshot(&levels(99.0, -0.1, 200.0), &levels(101.0, 0.1, 80.0), None, base)
            .unwrap();
        for k in 1..=10 {
            let delta = DeltaEvent::new(Side::Bid, 99.0 + 0.1 * k as f64, 1.0, base + k * 1_000);
            pipeline.on_delta(delta, None).unwrap();
        }
        for i in 0..25 {
            pipeline.on_trade(TradeEvent::new(base + 1_000 + i * 200, 100.0 + 0.01 * i as f64, 10.0, AggressorSide::Buy));
        }
        for i in 0..5 {
            pipeline.on_trade(TradeEvent::new(base + 6_000 + i * 200, 100.0 - 0.01 * i as f64, 10.0, AggressorSide::Sell));
        }
    }

    #[test]
    fn test_compute_gate_skips_while_in_flight() {
        let mut gate = ComputeGate::default();
        assert!(gate.try_begin());
        assert!(!gate.try_begin());
        assert!(!gate.try_begin());
        gate.finish();
        assert!(gate.try_begin());
        assert_eq!(gate.started(), 2);
        assert_eq!(gate.skipped(), 2);
    }

    #[test]
    fn test_bullish_cycle_enters_long() {
        let mut pipeline = InstrumentPipeline::new("btcusdt", &test_config()).unwrap();
        feed_bullish(&mut pipeline, 0);

        let signal = pipeline.evaluate(20_000).expect("entry signal");
        assert_eq!(signal.action, SignalAction::EnterLong);
        assert_eq!(signal.gate, 1);
        assert!(signal.final_score >= 60);
        assert_eq!(signal.instrument, "BTCUSDT");
        assert_eq!(pipeline.state(), PositionBias::Long);

        // Same inputs next cycle: already long, hold is not emitted
        assert!(pipeline.evaluate(20_200).is_none());
        assert_eq!(pipeline.get_stats().cycles_completed, 2);
    }

    #[test]
    fn test_insufficient_trades_skips_cycle() {
        let mut pipeline = InstrumentPipeline::new("BTCUSDT", &test_config()).unwrap();
        pipeline
            .on_snapshot(&levels(99.0, -0.1, 200.0), &levels(101.0, 0.1, 80.0), None, 0)
            .unwrap();
        assert_eq!(
            pipeline.compute_score(1_000),
            Err(InsufficientData::TooFewTrades { have: 0, need: 20 })
        );
        assert!(pipeline.evaluate(1_000).is_none());
        assert_eq!(pipeline.get_stats().insufficient_data, 1);
    }

    #[test]
    fn test_delta_before_snapshot_requests_resync_once() {
        let mut pipeline = InstrumentPipeline::new("BTCUSDT", &test_config()).unwrap();
        let delta = DeltaEvent::new(Side::Bid, 100.0, 1.0, 0);

        assert_eq!(pipeline.on_delta(delta, None), Err(ReplicaError::NotInitialized));
        assert_eq!(pipeline.on_delta(delta, None), Err(ReplicaError::NotInitialized));
        assert_eq!(pipeline.take_resync_request(), Some(ResyncReason::NotInitialized));
        assert_eq!(pipeline.take_resync_request(), None);
        assert_eq!(pipeline.get_stats().resync_requests, 1);
        assert_eq!(pipeline.compute_score(0), Err(InsufficientData::BookUnavailable));
    }

    #[test]
    fn test_sequence_gap_blocks_scoring_until_snapshot() {
        let mut pipeline = InstrumentPipeline::new("BTCUSDT", &test_config()).unwrap();
        let bids = levels(99.0, -0.1, 200.0);
        let asks = levels(101.0, 0.1, 80.0);
        pipeline.on_snapshot(&bids, &asks, Some(100), 0).unwrap();

        let gapped = DeltaEvent::new(Side::Bid, 99.5, 1.0, 10);
        let result = pipeline.on_delta(gapped, Some(SequenceInfo::new(51, 60, Some(50))));
        assert!(matches!(result, Err(ReplicaError::NeedsResync { .. })));
        assert!(matches!(pipeline.take_resync_request(), Some(ResyncReason::SequenceGap { .. })));
        assert_eq!(pipeline.book().level_size(Side::Bid, 99.5), None);
        assert_eq!(pipeline.compute_score(100), Err(InsufficientData::BookUnavailable));

        pipeline.on_snapshot(&bids, &asks, Some(200), 200).unwrap();
        assert!(!pipeline.book().needs_resync());
        assert_ne!(pipeline.compute_score(300), Err(InsufficientData::BookUnavailable));
    }

    #[test]
    fn test_emit_hold() {
        let mut config = test_config();
        config.pipeline.emit_hold = true;
        let mut pipeline = InstrumentPipeline::new("BTCUSDT", &config).unwrap();
        feed_bullish(&mut pipeline, 0);

        assert_eq!(pipeline.evaluate(20_000).map(|s| s.action), Some(SignalAction::EnterLong));
        assert_eq!(pipeline.evaluate(20_200).map(|s| s.action), Some(SignalAction::Hold));
    }

    #[test]
    fn test_invalid_trade_dropped() {
        let mut pipeline = InstrumentPipeline::new("BTCUSDT", &test_config()).unwrap();
        assert!(!pipeline.on_trade(TradeEvent::new(0, -1.0, 1.0, AggressorSide::Buy)));
        assert!(!pipeline.on_trade(TradeEvent::new(0, 100.0, f64::NAN, AggressorSide::Buy)));
        assert_eq!(pipeline.window().trade_count(), 0);
        assert_eq!(pipeline.get_stats().rejected_events, 2);
    }

    #[tokio::test]
    async fn test_runner_emits_signal() {
        let config = test_config();
        let mut pipeline = InstrumentPipeline::new("BTCUSDT", &config).unwrap();
        feed_bullish(&mut pipeline, now_ms() - 20_000);

        let (feed_tx, feed_rx) = mpsc::channel(16);
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<Signal>();
        let (resync_tx, _resync_rx) = mpsc::unbounded_channel::<ResyncRequest>();
        let handle = spawn_pipeline(pipeline, feed_rx, Arc::new(signal_tx), Arc::new(resync_tx));

        let signal = tokio::time::timeout(Duration::from_secs(5), signal_rx.recv())
            .await
            .expect("signal within timeout")
            .expect("sink open");
        assert_eq!(signal.action, SignalAction::EnterLong);

        drop(feed_tx);
        let pipeline = handle.join().await.unwrap();
        assert_eq!(pipeline.state(), PositionBias::Long);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = test_config();
        config.book.depth_levels = 0;
        config.window.window_ms = -5;

        match InstrumentPipeline::new("BTCUSDT", &config) {
            Err(ConfigError::Validation(msg)) => assert!(msg.contains("book.depth_levels")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("invalid config accepted"),
        }

        let (signal_tx, _signal_rx) = mpsc::unbounded_channel::<Signal>();
        let (resync_tx, _resync_rx) = mpsc::unbounded_channel::<ResyncRequest>();
        let result = PipelineSet::spawn(&config, Arc::new(signal_tx), Arc::new(resync_tx));
        assert!(matches!(result, Err(PipelineError::Config(ConfigError::Validation(_)))));
    }

    #[tokio::test]
    async fn test_runner_requests_periodic_resync() {
        let mut config = test_config();
        config.pipeline.resync_interval_ms = Some(30);
        let pipeline = InstrumentPipeline::new("BTCUSDT", &config).unwrap();

        let (_feed_tx, feed_rx) = mpsc::channel(16);
        let (signal_tx, _signal_rx) = mpsc::unbounded_channel::<Signal>();
        let (resync_tx, mut resync_rx) = mpsc::unbounded_channel::<ResyncRequest>();
        let handle = spawn_pipeline(pipeline, feed_rx, Arc::new(signal_tx), Arc::new(resync_tx));

        let request = tokio::time::timeout(Duration::from_secs(2), resync_rx.recv())
            .await
            .expect("resync within timeout")
            .expect("resync channel open");
        assert_eq!(request.instrument, "BTCUSDT");
        assert_eq!(request.reason, ResyncReason::Periodic);

        let pipeline = handle.shutdown().await.unwrap();
        assert!(pipeline.get_stats().resync_requests >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_runner_skips_ticks_while_computing() {
        let mut config = test_config();
        config.pipeline.recompute_interval_ms = 1;
        config.window.max_trades = 60_000;
        let mut pipeline = InstrumentPipeline::new("BTCUSDT", &config).unwrap();

        // A heavy window so each computation outlasts the 1ms tick
        let base = now_ms() - 20_000;
        feed_bullish(&mut pipeline, base);
        for i in 0..50_000 {
            let side = if i % 3 == 0 { AggressorSide::Sell } else { AggressorSide::Buy };
            pipeline.on_trade(TradeEvent::new(base + 8_000 + i / 10, 100.0 + (i % 7) as f64 * 0.01, 1.0, side));
        }

        let (_feed_tx, feed_rx) = mpsc::channel(16);
        let (signal_tx, _signal_rx) = mpsc::unbounded_channel::<Signal>();
        let (resync_tx, _resync_rx) = mpsc::unbounded_channel::<ResyncRequest>();
        let handle = spawn_pipeline(pipeline, feed_rx, Arc::new(signal_tx), Arc::new(resync_tx));

        let mut stats = handle.stats();
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stats = handle.stats();
            if stats.ticks_skipped > 0 && stats.cycles_completed > 0 {
                break;
            }
        }
        assert!(stats.is_running);
        assert!(stats.ticks_skipped > 0, "no tick skipped: {}", stats);
        assert!(stats.cycles_completed > 0, "no cycle completed: {}", stats);

        let pipeline = handle.shutdown().await.unwrap();
        assert!(pipeline.get_stats().cycles_completed >= stats.cycles_completed);
    }
}
