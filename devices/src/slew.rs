//! Dome slew state shared between protocol adapters
//!
//! Both transport variants feed azimuth and slewing readings into one
//! tracker per adapter. The tracker turns the stream into `Azimuth` events
//! and detects the end of a slew: a true-to-false transition of the slewing
//! flag arms a one-shot settle timer, and only its expiry announces
//! `SlewFinished`. Arming while a timer is pending restarts the delay, so
//! the event fires exactly once per completed slew.

use crate::event::{DeviceEvent, SharedEventBus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct SlewTracker {
    events: SharedEventBus,
    azimuth: Mutex<Option<f64>>,
    slewing: AtomicBool,
    settling: Mutex<Duration>,
    settle_task: Mutex<Option<JoinHandle<()>>>,
}

impl SlewTracker {
    pub fn new(events: SharedEventBus) -> Self {
        Self {
            events,
            azimuth: Mutex::new(None),
            slewing: AtomicBool::new(false),
            settling: Mutex::new(Duration::ZERO),
            settle_task: Mutex::new(None),
        }
    }

    pub async fn set_settling_time(&self, duration: Duration) {
        *self.settling.lock().await = duration;
    }

    pub async fn settling_time(&self) -> Duration {
        *self.settling.lock().await
    }

    /// Note that a slew command was just accepted. The next reading that
    /// reports not-slewing then counts as a falling edge even if no status
    /// poll ever caught the dome in motion.
    pub fn mark_slewing(&self) {
        self.slewing.store(true, Ordering::SeqCst);
    }

    pub fn is_slewing(&self) -> bool {
        self.slewing.load(Ordering::SeqCst)
    }

    /// Feed one status reading into the tracker.
    ///
    /// The very first azimuth is stored without an event; every later call
    /// publishes the previously stored value. There is no baseline to
    /// compare the first reading against, so it stays silent.
    pub async fn observe(&self, azimuth: f64, is_slewing: bool) {
        let mut stored = self.azimuth.lock().await;

        match *stored {
            None => {
                *stored = Some(azimuth);
                self.slewing.store(is_slewing, Ordering::SeqCst);
                return;
            }
            Some(previous) => {
                self.events.publish(DeviceEvent::Azimuth(previous));
            }
        }

        let was_slewing = self.slewing.swap(is_slewing, Ordering::SeqCst);
        if was_slewing && !is_slewing {
            self.arm_settle_timer().await;
        }

        *stored = Some(azimuth);
    }

    /// Forget all readings and cancel a pending settle timer
    pub async fn reset(&self) {
        if let Some(task) = self.settle_task.lock().await.take() {
            task.abort();
        }
        *self.azimuth.lock().await = None;
        self.slewing.store(false, Ordering::SeqCst);
    }

    async fn arm_settle_timer(&self) {
        let delay = *self.settling.lock().await;
        let events = self.events.clone();

        let mut task = self.settle_task.lock().await;
        if let Some(pending) = task.take() {
            pending.abort();
        }
        *task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            events.publish(DeviceEvent::Message(String::new()));
            events.publish(DeviceEvent::SlewFinished);
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBus;
    use std::sync::Arc;

    fn tracker() -> (Arc<SlewTracker>, tokio::sync::broadcast::Receiver<DeviceEvent>) {
        let bus = Arc::new(EventBus::default());
        let rx = bus.subscribe();
        (Arc::new(SlewTracker::new(bus)), rx)
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn count_finished(events: &[DeviceEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, DeviceEvent::SlewFinished))
            .count()
    }

    #[tokio::test]
    async fn test_first_reading_is_silent_then_previous_value_is_emitted() {
        let (tracker, mut rx) = tracker();

        tracker.observe(120.0, false).await;
        assert!(drain(&mut rx).is_empty());

        tracker.observe(125.0, false).await;
        let events = drain(&mut rx);
        assert_eq!(events, vec![DeviceEvent::Azimuth(120.0)]);

        tracker.observe(130.0, false).await;
        let events = drain(&mut rx);
        assert_eq!(events, vec![DeviceEvent::Azimuth(125.0)]);
    }

    #[tokio::test]
    async fn test_falling_edge_fires_slew_finished_once_after_settling() {
        let (tracker, mut rx) = tracker();
        tracker.set_settling_time(Duration::from_millis(300)).await;

        tracker.observe(10.0, true).await;
        tracker.observe(80.0, true).await;
        tracker.observe(90.0, false).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count_finished(&drain(&mut rx)), 0);

        tokio::time::sleep(Duration::from_millis(600)).await;
        let events = drain(&mut rx);
        assert_eq!(count_finished(&events), 1);
        // the status text is cleared right before the completion event
        let clear_pos = events
            .iter()
            .position(|e| *e == DeviceEvent::Message(String::new()));
        let finish_pos = events.iter().position(|e| *e == DeviceEvent::SlewFinished);
        assert!(clear_pos.is_some() && clear_pos < finish_pos);

        // no second completion later on
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(count_finished(&drain(&mut rx)), 0);
    }

    #[tokio::test]
    async fn test_rearming_restarts_the_delay() {
        let (tracker, mut rx) = tracker();
        tracker.set_settling_time(Duration::from_millis(300)).await;

        tracker.observe(10.0, true).await;
        tracker.observe(50.0, false).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        tracker.observe(60.0, true).await;
        tracker.observe(70.0, false).await;

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(count_finished(&drain(&mut rx)), 1);
    }

    #[tokio::test]
    async fn test_mark_slewing_supplies_the_rising_edge() {
        let (tracker, mut rx) = tracker();
        tracker.observe(200.0, false).await;
        drain(&mut rx);

        tracker.mark_slewing();
        tracker.observe(210.0, false).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count_finished(&drain(&mut rx)), 1);
    }

    #[tokio::test]
    async fn test_reset_cancels_pending_timer() {
        let (tracker, mut rx) = tracker();
        tracker.set_settling_time(Duration::from_millis(200)).await;

        tracker.observe(10.0, true).await;
        tracker.observe(20.0, false).await;
        tracker.reset().await;

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count_finished(&drain(&mut rx)), 0);

        // the next reading after a reset is treated as the first again
        tracker.observe(30.0, false).await;
        assert!(drain(&mut rx).is_empty());
    }
}
