//! Per-facade event bus
//!
//! Every facade owns one bus. Adapters publish onto it and observers
//! subscribe through the facade, so consumers never learn which transport
//! produced an event.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default buffer size for the event channel
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 4096;

/// Events published by a facade and its adapters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// Transport-level link to the server is up
    ServerConnected,
    /// Transport-level link went down, with the device names it carried
    ServerDisconnected { devices: Vec<String> },
    /// The named device reported connected
    DeviceConnected { name: String },
    /// The named device reported disconnected
    DeviceDisconnected { name: String },
    /// A cache entry changed for the named device
    PropertyChanged { device: String, key: String },
    /// Dome azimuth reading in degrees
    Azimuth(f64),
    /// Dome slew completed and the settling delay elapsed
    SlewFinished,
    /// Camera exposure data arrived
    Exposed,
    /// Exposure data written to disk
    Saved { path: String },
    /// Human-readable status text, empty string clears the previous one
    Message(String),
}

/// Broadcast bus with a monotone sequence stamp per published event
///
/// Publishing never blocks and never fails: with no subscribers the event is
/// simply dropped. Slow subscribers lag and lose the oldest events rather
/// than stalling publishers.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<DeviceEvent>,
    sequence: AtomicU64,
}

/// Shared handle to an event bus
pub type SharedEventBus = Arc<EventBus>;

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: AtomicU64::new(1),
        }
    }

    /// Publish an event, returning its sequence number
    pub fn publish(&self, event: DeviceEvent) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        match self.sender.send(event) {
            Ok(_) => {}
            Err(_) => {
                // No receivers - this is fine
            }
        }
        sequence
    }

    /// Subscribe to all events published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Sequence number the next published event will receive
    pub fn next_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}
