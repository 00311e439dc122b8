//! Flat panel cover facade

use crate::alpaca_adapter::AlpacaCover;
use crate::cache::PropertyCache;
use crate::event::{DeviceEvent, EventBus, SharedEventBus};
use crate::facade::{FacadeCore, FacadeState};
use crate::indi_adapter::IndiCover;
use crate::transport::{CoverTransport, Framework};
use crate::worker::WorkerPool;
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct Cover {
    core: FacadeCore<dyn CoverTransport>,
}

impl Cover {
    pub fn new(pool: WorkerPool) -> Self {
        let cache = PropertyCache::new();
        let events: SharedEventBus = Arc::new(EventBus::default());
        let indi = Arc::new(IndiCover::new(cache.clone(), events.clone()));
        let alpaca = Arc::new(AlpacaCover::new(cache.clone(), events.clone(), pool));
        Self {
            core: FacadeCore::new(
                cache,
                events,
                Some(indi as Arc<dyn CoverTransport>),
                Some(alpaca as Arc<dyn CoverTransport>),
            ),
        }
    }

    #[cfg(test)]
    fn with_transport(indi: Arc<dyn CoverTransport>) -> Self {
        Self {
            core: FacadeCore::new(
                PropertyCache::new(),
                Arc::new(EventBus::default()),
                Some(indi),
                None,
            ),
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

    /// Park (close) or unpark (open) the cover
    pub async fn set_park(&self, park: bool) -> bool {
        let Some(adapter) = self.core.active().await else {
            return false;
        };
        adapter.set_park(park).await
    }

    /// Switch the flat field light on or off
    pub async fn switch_light(&self, on: bool) -> bool {
        let Some(adapter) = self.core.active().await else {
            return false;
        };
        adapter.switch_light(on).await
    }

    /// Set the flat field light brightness
    pub async fn set_brightness(&self, value: f64) -> bool {
        let Some(adapter) = self.core.active().await else {
            return false;
        };
        adapter.set_brightness(value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PropertyValue;
    use crate::transport::DeviceTransport;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubCover {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DeviceTransport for StubCover {
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

        async fn send_property(&self, _key: &str, _value: PropertyValue) -> bool {
            true
        }
    }

    #[async_trait]
    impl CoverTransport for StubCover {
        async fn set_park(&self, park: bool) -> bool {
            self.calls.lock().unwrap().push(format!("park:{}", park));
            true
        }

        async fn switch_light(&self, on: bool) -> bool {
            self.calls.lock().unwrap().push(format!("light:{}", on));
            true
        }

        async fn set_brightness(&self, value: f64) -> bool {
            self.calls.lock().unwrap().push(format!("brightness:{}", value));
            true
        }
    }

    #[tokio::test]
    async fn test_commands_refused_without_link() {
        let stub = Arc::new(StubCover::default());
        let cover = Cover::with_transport(stub.clone());
        cover.set_framework(Framework::Indi).await;

        assert!(!cover.set_park(true).await);
        assert!(!cover.switch_light(true).await);
        assert!(stub.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commands_reach_the_transport_while_active() {
        let stub = Arc::new(StubCover::default());
        let cover = Cover::with_transport(stub.clone());
        cover.set_framework(Framework::Indi).await;
        cover.start_communication().await;

        assert!(cover.set_park(true).await);
        assert!(cover.switch_light(true).await);
        assert!(cover.set_brightness(128.0).await);

        assert_eq!(
            stub.calls.lock().unwrap().as_slice(),
            &["park:true", "light:true", "brightness:128"]
        );
    }
}
