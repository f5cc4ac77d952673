// Signal Bus - pub/sub delivery of emitted signals
// Broadcast channel for async consumers, callbacks for sync ones

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::types::{Signal, SignalAction};

// ============================================================================
// Signal Sink
// ============================================================================

/// Consumer of signals emitted by a pipeline
pub trait SignalSink: Send + Sync {
    fn on_signal(&self, signal: Signal);
}

impl SignalSink for mpsc::UnboundedSender<Signal> {
    fn on_signal(&self, signal: Signal) {
        if self.send(signal).is_err() {
            debug!("Signal receiver dropped");
        }
    }
}

// ============================================================================
// Signal Event
// ============================================================================

/// A published signal with its bus identity
#[derive(Debug, Clone, Serialize)]
pub struct SignalEvent {
    pub event_id: String,
    pub published_at: i64,
    pub signal: Signal,
}

impl SignalEvent {
    pub fn new(signal: Signal) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            published_at: crate::core::types::now_ms(),
            signal,
        }
    }

    pub fn action(&self) -> SignalAction {
        self.signal.action
    }
}

impl fmt::Display for SignalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SignalEvent(instrument={}, action={}, score={}, id={})",
            self.signal.instrument,
            self.signal.action,
            self.signal.final_score,
            &self.event_id[..8]
        )
    }
}

// ============================================================================
// Signal Bus
// ============================================================================

type SignalCallback = Arc<dyn Fn(SignalEvent) + Send + Sync>;

pub struct SignalBus {
    tx: broadcast::Sender<SignalEvent>,
    subscribers: Arc<RwLock<HashMap<String, Vec<SignalCallback>>>>,
    wildcard_subscribers: Arc<RwLock<Vec<SignalCallback>>>,
    history: Arc<RwLock<std::collections::VecDeque<SignalEvent>>>,
    max_history: usize,
    stats: Arc<RwLock<SignalBusStats>>,
}

#[derive(Debug, Clone, Default)]
struct SignalBusStats {
    total_published: u64,
    total_delivered: u64,
    holds_published: u64,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::with_capacity(10000, 10000)
    }

    pub fn with_capacity(channel_capacity: usize, max_history: usize) -> Self {
        let (tx, _rx) = broadcast::channel(channel_capacity.max(1));

        Self {
            tx,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            wildcard_subscribers: Arc::new(RwLock::new(Vec::new())),
            history: Arc::new(RwLock::new(std::collections::VecDeque::new())),
            max_history,
            stats: Arc::new(RwLock::new(SignalBusStats::default())),
        }
    }

    /// Subscribe to one instrument's signals, or "*" for all instruments
    pub fn subscribe<F>(&self, instrument: &str, callback: F)
    where
        F: Fn(SignalEvent) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);

        if instrument == "*" {
            self.wildcard_subscribers.write().push(callback);
        } else {
            self.subscribers
                .write()
                .entry(instrument.to_uppercase())
                .or_default()
                .push(callback);
        }

        info!(instrument = %instrument, "Subscribed to signals");
    }

    /// Publish signal to all subscribers
    pub fn publish(&self, signal: Signal) {
        let event = SignalEvent::new(signal);

        {
            let mut stats = self.stats.write();
            stats.total_published += 1;
            if event.action().is_hold() {
                stats.holds_published += 1;
            }
        }

        {
            let mut history = self.history.write();
            history.push_back(event.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        // No receivers is fine
        let _ = self.tx.send(event.clone());

        // Locks are released before any callback runs; a callback may subscribe
        let mut callbacks: Vec<SignalCallback> = self
            .subscribers
            .read()
            .get(&event.signal.instrument.to_uppercase())
            .cloned()
            .unwrap_or_default();
        callbacks.extend(self.wildcard_subscribers.read().iter().cloned());

        for callback in &callbacks {
            callback(event.clone());
        }

        self.stats.write().total_delivered += callbacks.len() as u64;
    }

    /// Get a receiver for all signals (broadcast channel)
    pub fn subscribe_channel(&self) -> broadcast::Receiver<SignalEvent> {
        self.tx.subscribe()
    }

    /// Most recent signals first, optionally filtered by instrument
    pub fn get_recent_signals(&self, instrument: Option<&str>, limit: Option<usize>) -> Vec<SignalEvent> {
        let history = self.history.read();
        let limit = limit.unwrap_or(100);

        history
            .iter()
            .rev()
            .filter(|e| instrument.map_or(true, |i| e.signal.instrument.eq_ignore_ascii_case(i)))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get_stats(&self) -> SignalBusStatsSnapshot {
        let stats = self.stats.read();
        let subscribers = self.subscribers.read();
        let wildcard = self.wildcard_subscribers.read();

        SignalBusStatsSnapshot {
            total_published: stats.total_published,
            total_delivered: stats.total_delivered,
            holds_published: stats.holds_published,
            subscriber_count: subscribers.values().map(|v| v.len()).sum::<usize>() + wildcard.len(),
            instruments: subscribers.keys().cloned().collect(),
            history_size: self.history.read().len(),
        }
    }

    pub fn clear_history(&self) {
        self.history.write().clear();
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalSink for SignalBus {
    fn on_signal(&self, signal: Signal) {
        self.publish(signal);
    }
}

/// Snapshot of signal bus statistics
#[derive(Debug, Clone)]
pub struct SignalBusStatsSnapshot {
    pub total_published: u64,
    pub total_delivered: u64,
    pub holds_published: u64,
    pub subscriber_count: usize,
    pub instruments: Vec<String>,
    pub history_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(instrument: &str, action: SignalAction) -> Signal {
        Signal {
            instrument: instrument.to_string(),
            action,
            final_score: 85,
            gate: 1,
            edge_bps: 4.0,
            depth: 100.0,
            timestamp_ms: 1_000,
        }
    }

    #[test]
    fn test_signal_event_creation() {
        let event = SignalEvent::new(signal("BTCUSDT", SignalAction::EnterLong));
        assert_eq!(event.action(), SignalAction::EnterLong);
        assert!(!event.event_id.is_empty());
        assert!(event.to_string().contains("ENTER_LONG"));
    }

    #[test]
    fn test_bus_subscribe_and_publish() {
        let bus = SignalBus::new();

        let received = Arc::new(RwLock::new(0u32));
        let received_clone = Arc::clone(&received);
        bus.subscribe("btcusdt", move |_event| {
            *received_clone.write() += 1;
        });

        bus.publish(signal("BTCUSDT", SignalAction::EnterLong));
        bus.publish(signal("ETHUSDT", SignalAction::EnterShort));

        assert_eq!(*received.read(), 1);
        let stats = bus.get_stats();
        assert_eq!(stats.total_published, 2);
        assert_eq!(stats.total_delivered, 1);
    }

    #[test]
    fn test_callback_may_subscribe_during_publish() {
        let bus = Arc::new(SignalBus::new());
        let weak = Arc::downgrade(&bus);
        let eth_seen = Arc::new(RwLock::new(0u32));
        let eth_seen_clone = Arc::clone(&eth_seen);

        bus.subscribe("*", move |event| {
            if event.signal.instrument != "BTCUSDT" {
                return;
            }
            if let Some(bus) = weak.upgrade() {
                let counter = Arc::clone(&eth_seen_clone);
                bus.subscribe("ETHUSDT", move |_| *counter.write() += 1);
            }
        });

        bus.publish(signal("BTCUSDT", SignalAction::EnterLong));
        bus.publish(signal("ETHUSDT", SignalAction::EnterShort));

        assert_eq!(*eth_seen.read(), 1);
        assert_eq!(bus.get_stats().total_delivered, 3);
    }

    #[test]
    fn test_history_bounded_and_filtered() {
        let bus = SignalBus::with_capacity(16, 3);
        for _ in 0..5 {
            bus.publish(signal("BTCUSDT", SignalAction::Hold));
        }
        bus.publish(signal("ETHUSDT", SignalAction::ExitLong));

        assert_eq!(bus.get_stats().history_size, 3);
        let eth = bus.get_recent_signals(Some("ethusdt"), None);
        assert_eq!(eth.len(), 1);
        assert_eq!(eth[0].action(), SignalAction::ExitLong);
        assert_eq!(bus.get_stats().holds_published, 5);
    }

    #[tokio::test]
    async fn test_broadcast_channel() {
        let bus = SignalBus::new();
        let mut rx = bus.subscribe_channel();
        bus.on_signal(signal("BTCUSDT", SignalAction::ExitShort));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.signal.action, SignalAction::ExitShort);
    }

    #[test]
    fn test_mpsc_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.on_signal(signal("BTCUSDT", SignalAction::EnterLong));
        assert_eq!(rx.try_recv().unwrap().action, SignalAction::EnterLong);
    }
}
