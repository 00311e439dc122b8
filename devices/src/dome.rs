//! Dome facade
//!
//! Slew targets optionally pass through an injected mount-geometry
//! correction before they reach the transport, so the slit tracks the
//! optical axis instead of the dome center. Arrival is signalled on the
//! bus as `SlewFinished` once the settle timer ran out.

use crate::alpaca_adapter::AlpacaDome;
use crate::cache::{PropertyCache, PropertyValue};
use crate::event::{DeviceEvent, EventBus, SharedEventBus};
use crate::facade::{FacadeCore, FacadeState};
use crate::geometry::MountGeometry;
use crate::indi_adapter::IndiDome;
use crate::transport::{DomeTransport, Framework};
use crate::worker::WorkerPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tracing::warn;

pub struct Dome {
    core: FacadeCore<dyn DomeTransport>,
    geometry: RwLock<Option<Arc<dyn MountGeometry>>>,
}

impl Dome {
    pub fn new(pool: WorkerPool) -> Self {
        let cache = PropertyCache::new();
        let events: SharedEventBus = Arc::new(EventBus::default());
        let indi = Arc::new(IndiDome::new(cache.clone(), events.clone()));
        let alpaca = Arc::new(AlpacaDome::new(cache.clone(), events.clone(), pool));
        Self {
            core: FacadeCore::new(
                cache,
                events,
                Some(indi as Arc<dyn DomeTransport>),
                Some(alpaca as Arc<dyn DomeTransport>),
            ),
            geometry: RwLock::new(None),
        }
    }

    #[cfg(test)]
    fn with_transports(
        indi: Option<Arc<dyn DomeTransport>>,
        alpaca: Option<Arc<dyn DomeTransport>>,
    ) -> Self {
        Self {
            core: FacadeCore::new(
                PropertyCache::new(),
                Arc::new(EventBus::default()),
                indi,
                alpaca,
            ),
            geometry: RwLock::new(None),
        }
    }

    pub async fn set_framework(&self, framework: Framework) -> bool {
        self.core.set_framework(framework).await
    }

    pub async fn start_communication(&self) -> bool {
        self.core.start_communication().await
    }

    pub async fn stop_communication(&self) -> bool {
        self.core.stop_communication().await
    }

    pub async fn set_host(&self, host: &str, port: u16) {
        self.core.set_host(host, port).await;
    }

    pub async fn set_device_name(&self, name: &str) {
        self.core.set_device_name(name).await;
    }

    pub async fn state(&self) -> FacadeState {
        self.core.state().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.core.events().subscribe()
    }

    pub fn cache(&self) -> &PropertyCache {
        self.core.cache()
    }

    /// Install the mount-geometry correction for future slew targets
    pub async fn set_geometry(&self, geometry: Arc<dyn MountGeometry>) {
        *self.geometry.write().await = Some(geometry);
    }

    pub async fn clear_geometry(&self) {
        *self.geometry.write().await = None;
    }

    /// Slew the dome to the given topocentric target.
    ///
    /// Returns acceptance by the transport; arrival is the `SlewFinished`
    /// event. Refused while the link is down or before the dome reported
    /// any property at all.
    pub async fn slew_dome(&self, altitude: f64, azimuth: f64) -> bool {
        let Some(adapter) = self.core.active().await else {
            return false;
        };
        if self.core.cache().is_empty().await {
            warn!("Dome has not reported its schema yet, refusing to slew");
            return false;
        }

        let (target_alt, target_az) = match self.geometry.read().await.as_ref() {
            Some(geometry) => {
                let coordinates = geometry.coordinates();
                geometry.transform(&coordinates, altitude, azimuth)
            }
            None => (altitude, azimuth),
        };

        let delta = target_az - azimuth;
        self.core.events().publish(DeviceEvent::Message(format!(
            "Slewing dome, az correction: {:.1}°",
            delta
        )));

        adapter.slew_to_alt_az(target_alt, target_az).await
    }

    pub async fn open_shutter(&self) -> bool {
        let Some(adapter) = self.core.active().await else {
            return false;
        };
        adapter
            .send_property("DOME_SHUTTER.SHUTTER_OPEN", PropertyValue::Switch(true))
            .await
    }

    pub async fn close_shutter(&self) -> bool {
        let Some(adapter) = self.core.active().await else {
            return false;
        };
        adapter
            .send_property("DOME_SHUTTER.SHUTTER_CLOSE", PropertyValue::Switch(true))
            .await
    }

    pub async fn abort_slew(&self) -> bool {
        let Some(adapter) = self.core.active().await else {
            return false;
        };
        adapter
            .send_property("DOME_ABORT_MOTION.ABORT", PropertyValue::Switch(true))
            .await
    }

    /// Settle delay between dome standstill and `SlewFinished`, pushed to
    /// every configured adapter so it survives a framework switch
    pub async fn set_settling_time(&self, duration: Duration) {
        for adapter in self.core.adapters() {
            adapter.set_settling_time(duration).await;
        }
    }

    pub async fn settling_time(&self) -> Duration {
        if let Some(adapter) = self.core.selected().await {
            return adapter.settling_time().await;
        }
        match self.core.adapters().into_iter().next() {
            Some(adapter) => adapter.settling_time().await,
            None => Duration::ZERO,
        }
    }

    pub async fn azimuth(&self) -> Option<f64> {
        self.core
            .cache()
            .number("ABS_DOME_POSITION.DOME_ABSOLUTE_POSITION")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{MountCoordinates, PierSide};
    use crate::transport::DeviceTransport;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubDome {
        slews: Mutex<Vec<(f64, f64)>>,
        sent: Mutex<Vec<(String, PropertyValue)>>,
        settling: Mutex<Duration>,
    }

    impl StubDome {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                slews: Mutex::new(Vec::new()),
                sent: Mutex::new(Vec::new()),
                settling: Mutex::new(Duration::ZERO),
            })
        }
    }

    #[async_trait]
    impl DeviceTransport for StubDome {
        fn framework(&self) -> Framework {
            Framework::Indi
        }

        async fn set_host(&self, _host: &str, _port: u16) {}

        async fn host(&self) -> (String, u16) {
            (String::new(), 0)
        }

        async fn set_device_name(&self, _name: &str) {}

        async fn device_name(&self) -> String {
            String::new()
        }

        async fn start_communication(&self) -> bool {
            true
        }

        async fn stop_communication(&self) -> bool {
            true
        }

        async fn send_property(&self, key: &str, value: PropertyValue) -> bool {
            self.sent.lock().unwrap().push((key.to_string(), value));
            true
        }
    }

    #[async_trait]
    impl DomeTransport for StubDome {
        async fn slew_to_alt_az(&self, altitude: f64, azimuth: f64) -> bool {
            self.slews.lock().unwrap().push((altitude, azimuth));
            true
        }

        async fn set_settling_time(&self, duration: Duration) {
            *self.settling.lock().unwrap() = duration;
        }

        async fn settling_time(&self) -> Duration {
            *self.settling.lock().unwrap()
        }
    }

    struct OffsetGeometry;

    impl MountGeometry for OffsetGeometry {
        fn coordinates(&self) -> MountCoordinates {
            MountCoordinates {
                hour_angle: 0.0,
                declination: 20.0,
                latitude: 48.0,
                pier_side: PierSide::East,
            }
        }

        fn transform(
            &self,
            _coordinates: &MountCoordinates,
            altitude: f64,
            azimuth: f64,
        ) -> (f64, f64) {
            (altitude, (azimuth + 3.5) % 360.0)
        }
    }

    async fn running_dome(stub: Arc<StubDome>) -> Dome {
        let dome = Dome::with_transports(Some(stub as Arc<dyn DomeTransport>), None);
        dome.set_framework(Framework::Indi).await;
        dome.start_communication().await;
        dome
    }

    #[tokio::test]
    async fn test_slew_requires_link_and_schema() {
        let stub = StubDome::new();
        let dome = Dome::with_transports(Some(stub.clone() as Arc<dyn DomeTransport>), None);

        // no framework selected
        assert!(!dome.slew_dome(30.0, 100.0).await);

        dome.set_framework(Framework::Indi).await;
        dome.start_communication().await;
        // link is up but the dome never reported a property
        assert!(!dome.slew_dome(30.0, 100.0).await);
        assert!(stub.slews.lock().unwrap().is_empty());

        dome.cache()
            .set(
                "ABS_DOME_POSITION.DOME_ABSOLUTE_POSITION",
                PropertyValue::Number(10.0),
            )
            .await;
        assert!(dome.slew_dome(30.0, 100.0).await);
        assert_eq!(stub.slews.lock().unwrap().as_slice(), &[(30.0, 100.0)]);
    }

    #[tokio::test]
    async fn test_slew_applies_geometry_and_reports_delta() {
        let stub = StubDome::new();
        let dome = running_dome(stub.clone()).await;
        dome.cache()
            .set(
                "ABS_DOME_POSITION.DOME_ABSOLUTE_POSITION",
                PropertyValue::Number(10.0),
            )
            .await;
        dome.set_geometry(Arc::new(OffsetGeometry)).await;
        let mut rx = dome.subscribe();

        assert!(dome.slew_dome(30.0, 100.0).await);
        assert_eq!(stub.slews.lock().unwrap().as_slice(), &[(30.0, 103.5)]);

        match rx.try_recv() {
            Ok(DeviceEvent::Message(text)) => assert!(text.contains("3.5")),
            other => panic!("expected the correction message, got {:?}", other),
        }

        // without geometry the target passes through and the delta is zero
        dome.clear_geometry().await;
        assert!(dome.slew_dome(30.0, 100.0).await);
        assert_eq!(stub.slews.lock().unwrap().last(), Some(&(30.0, 100.0)));
        match rx.try_recv() {
            Ok(DeviceEvent::Message(text)) => assert!(text.contains("0.0")),
            other => panic!("expected the correction message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutter_and_abort_use_the_property_path() {
        let stub = StubDome::new();
        let dome = running_dome(stub.clone()).await;

        assert!(dome.open_shutter().await);
        assert!(dome.close_shutter().await);
        assert!(dome.abort_slew().await);

        let sent = stub.sent.lock().unwrap();
        assert_eq!(
            sent.as_slice(),
            &[
                (
                    "DOME_SHUTTER.SHUTTER_OPEN".to_string(),
                    PropertyValue::Switch(true)
                ),
                (
                    "DOME_SHUTTER.SHUTTER_CLOSE".to_string(),
                    PropertyValue::Switch(true)
                ),
                (
                    "DOME_ABORT_MOTION.ABORT".to_string(),
                    PropertyValue::Switch(true)
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_shutter_refused_without_link() {
        let stub = StubDome::new();
        let dome = Dome::with_transports(Some(stub.clone() as Arc<dyn DomeTransport>), None);
        dome.set_framework(Framework::Indi).await;

        assert!(!dome.open_shutter().await);
        assert!(stub.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settling_time_reaches_every_adapter() {
        let indi = StubDome::new();
        let alpaca = StubDome::new();
        let dome = Dome::with_transports(
            Some(indi.clone() as Arc<dyn DomeTransport>),
            Some(alpaca.clone() as Arc<dyn DomeTransport>),
        );

        dome.set_settling_time(Duration::from_secs(5)).await;
        assert_eq!(*indi.settling.lock().unwrap(), Duration::from_secs(5));
        assert_eq!(*alpaca.settling.lock().unwrap(), Duration::from_secs(5));

        dome.set_framework(Framework::Alpaca).await;
        assert_eq!(dome.settling_time().await, Duration::from_secs(5));
    }
}
