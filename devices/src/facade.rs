//! Facade state machine shared by every peripheral
//!
//! A facade owns one cache, one event bus and up to two transport adapters,
//! of which at most one is ever live. Consumers talk to the facade alone;
//! which protocol sits behind it is invisible to them.
//!
//! State machine: `Unbound` (no framework selected) to `Bound` (framework
//! selected, link down) to `Active` (link up). Selecting a framework while
//! another is live stops the live adapter first, so two adapters can never
//! feed the cache at the same time.

use crate::cache::PropertyCache;
use crate::event::SharedEventBus;
use crate::transport::{DeviceTransport, Framework};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacadeState {
    Unbound,
    Bound(Framework),
    Active(Framework),
}

impl FacadeState {
    pub fn framework(&self) -> Option<Framework> {
        match self {
            FacadeState::Unbound => None,
            FacadeState::Bound(f) | FacadeState::Active(f) => Some(*f),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, FacadeState::Active(_))
    }
}

pub struct FacadeCore<T: DeviceTransport + ?Sized> {
    cache: PropertyCache,
    events: SharedEventBus,
    indi: Option<Arc<T>>,
    alpaca: Option<Arc<T>>,
    state: RwLock<FacadeState>,
    host: RwLock<Option<(String, u16)>>,
    device_name: RwLock<String>,
}

impl<T: DeviceTransport + ?Sized> FacadeCore<T> {
    pub fn new(
        cache: PropertyCache,
        events: SharedEventBus,
        indi: Option<Arc<T>>,
        alpaca: Option<Arc<T>>,
    ) -> Self {
        Self {
            cache,
            events,
            indi,
            alpaca,
            state: RwLock::new(FacadeState::Unbound),
            host: RwLock::new(None),
            device_name: RwLock::new(String::new()),
        }
    }

    pub fn cache(&self) -> &PropertyCache {
        &self.cache
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    pub async fn state(&self) -> FacadeState {
        *self.state.read().await
    }

    pub async fn framework(&self) -> Option<Framework> {
        self.state.read().await.framework()
    }

    fn slot(&self, framework: Framework) -> Option<&Arc<T>> {
        match framework {
            Framework::Indi => self.indi.as_ref(),
            Framework::Alpaca => self.alpaca.as_ref(),
        }
    }

    /// Adapter of the selected framework, regardless of link state
    pub async fn selected(&self) -> Option<Arc<T>> {
        let framework = self.state.read().await.framework()?;
        self.slot(framework).cloned()
    }

    /// Adapter of the selected framework, only while the link is up.
    /// Commands go through here so an unbound or stopped facade rejects
    /// them without touching any transport.
    pub async fn active(&self) -> Option<Arc<T>> {
        match *self.state.read().await {
            FacadeState::Active(framework) => self.slot(framework).cloned(),
            _ => None,
        }
    }

    /// All configured adapters, live or not
    pub fn adapters(&self) -> Vec<Arc<T>> {
        self.indi
            .iter()
            .chain(self.alpaca.iter())
            .cloned()
            .collect()
    }

    /// Select the protocol to use from now on.
    ///
    /// A live adapter is stopped before the switch, and the stored host and
    /// device name are pushed into the newly selected adapter.
    pub async fn set_framework(&self, framework: Framework) -> bool {
        let Some(target) = self.slot(framework).cloned() else {
            warn!("No {} adapter configured for this device", framework);
            return false;
        };

        let current = *self.state.read().await;
        if let FacadeState::Active(live) = current {
            if let Some(adapter) = self.slot(live).cloned() {
                adapter.stop_communication().await;
            }
        }

        if let Some((host, port)) = self.host.read().await.clone() {
            target.set_host(&host, port).await;
        }
        let name = self.device_name.read().await.clone();
        if !name.is_empty() {
            target.set_device_name(&name).await;
        }

        *self.state.write().await = FacadeState::Bound(framework);
        info!("Framework selected: {}", framework);
        true
    }

    pub async fn start_communication(&self) -> bool {
        let current = *self.state.read().await;
        let framework = match current {
            FacadeState::Unbound => {
                warn!("Cannot start communication, no framework selected");
                return false;
            }
            FacadeState::Active(_) => {
                debug!("Communication already running");
                return true;
            }
            FacadeState::Bound(framework) => framework,
        };

        let Some(adapter) = self.slot(framework).cloned() else {
            return false;
        };
        if !adapter.start_communication().await {
            return false;
        }

        *self.state.write().await = FacadeState::Active(framework);
        true
    }

    /// Stop the live adapter and clear the cache.
    ///
    /// Succeeds whenever a framework is selected, no matter how often it is
    /// called; only an unbound facade reports `false`.
    pub async fn stop_communication(&self) -> bool {
        let current = *self.state.read().await;
        match current {
            FacadeState::Unbound => false,
            FacadeState::Bound(_) => {
                self.cache.clear().await;
                true
            }
            FacadeState::Active(framework) => {
                if let Some(adapter) = self.slot(framework).cloned() {
                    if !adapter.stop_communication().await {
                        warn!("{} adapter reported an unclean stop", framework);
                    }
                }
                *self.state.write().await = FacadeState::Bound(framework);
                self.cache.clear().await;
                true
            }
        }
    }

    /// Store the server address and push it to the selected adapter
    pub async fn set_host(&self, host: &str, port: u16) {
        *self.host.write().await = Some((host.to_string(), port));
        if let Some(adapter) = self.selected().await {
            adapter.set_host(host, port).await;
        }
    }

    pub async fn host(&self) -> Option<(String, u16)> {
        self.host.read().await.clone()
    }

    /// Store the device name and push it to the selected adapter
    pub async fn set_device_name(&self, name: &str) {
        *self.device_name.write().await = name.to_string();
        if let Some(adapter) = self.selected().await {
            adapter.set_device_name(name).await;
        }
    }

    pub async fn device_name(&self) -> String {
        self.device_name.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PropertyValue;
    use crate::event::EventBus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct StubTransport {
        framework: Framework,
        fail_start: AtomicBool,
        starts: AtomicUsize,
        stops: AtomicUsize,
        host: RwLock<(String, u16)>,
        name: RwLock<String>,
    }

    impl StubTransport {
        fn new(framework: Framework) -> Arc<Self> {
            Arc::new(Self {
                framework,
                fail_start: AtomicBool::new(false),
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                host: RwLock::new((String::new(), 0)),
                name: RwLock::new(String::new()),
            })
        }
    }

    #[async_trait]
    impl DeviceTransport for StubTransport {
        fn framework(&self) -> Framework {
            self.framework
        }

        async fn set_host(&self, host: &str, port: u16) {
            *self.host.write().await = (host.to_string(), port);
        }

        async fn host(&self) -> (String, u16) {
            self.host.read().await.clone()
        }

        async fn set_device_name(&self, name: &str) {
            *self.name.write().await = name.to_string();
        }

        async fn device_name(&self) -> String {
            self.name.read().await.clone()
        }

        async fn start_communication(&self) -> bool {
            self.starts.fetch_add(1, Ordering::SeqCst);
            !self.fail_start.load(Ordering::SeqCst)
        }

        async fn stop_communication(&self) -> bool {
            self.stops.fetch_add(1, Ordering::SeqCst);
            true
        }

        async fn send_property(&self, _key: &str, _value: PropertyValue) -> bool {
            true
        }
    }

    fn core_with(
        indi: Option<Arc<StubTransport>>,
        alpaca: Option<Arc<StubTransport>>,
    ) -> FacadeCore<dyn DeviceTransport> {
        FacadeCore::new(
            PropertyCache::new(),
            Arc::new(EventBus::default()),
            indi.map(|a| a as Arc<dyn DeviceTransport>),
            alpaca.map(|a| a as Arc<dyn DeviceTransport>),
        )
    }

    #[tokio::test]
    async fn test_missing_slot_rejects_selection() {
        let core = core_with(Some(StubTransport::new(Framework::Indi)), None);
        assert!(!core.set_framework(Framework::Alpaca).await);
        assert_eq!(core.state().await, FacadeState::Unbound);
        assert!(core.set_framework(Framework::Indi).await);
        assert_eq!(core.state().await, FacadeState::Bound(Framework::Indi));
    }

    #[tokio::test]
    async fn test_config_set_before_selection_reaches_adapter_after() {
        let stub = StubTransport::new(Framework::Indi);
        let core = core_with(Some(stub.clone()), None);

        core.set_host("observatory.local", 7624).await;
        core.set_device_name("Dome Simulator").await;
        // nothing selected yet, the stub has seen nothing
        assert_eq!(stub.name.read().await.as_str(), "");

        core.set_framework(Framework::Indi).await;
        assert_eq!(
            stub.host.read().await.clone(),
            ("observatory.local".to_string(), 7624)
        );
        assert_eq!(stub.name.read().await.as_str(), "Dome Simulator");
    }

    #[tokio::test]
    async fn test_start_requires_selection_and_promotes_state() {
        let stub = StubTransport::new(Framework::Indi);
        let core = core_with(Some(stub.clone()), None);

        assert!(!core.start_communication().await);
        assert_eq!(stub.starts.load(Ordering::SeqCst), 0);

        core.set_framework(Framework::Indi).await;
        assert!(core.start_communication().await);
        assert_eq!(core.state().await, FacadeState::Active(Framework::Indi));
        assert_eq!(stub.starts.load(Ordering::SeqCst), 1);

        // starting again is a no-op
        assert!(core.start_communication().await);
        assert_eq!(stub.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_start_stays_bound() {
        let stub = StubTransport::new(Framework::Indi);
        stub.fail_start.store(true, Ordering::SeqCst);
        let core = core_with(Some(stub.clone()), None);

        core.set_framework(Framework::Indi).await;
        assert!(!core.start_communication().await);
        assert_eq!(core.state().await, FacadeState::Bound(Framework::Indi));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_clears_cache() {
        let stub = StubTransport::new(Framework::Indi);
        let core = core_with(Some(stub.clone()), None);

        core.set_framework(Framework::Indi).await;
        core.start_communication().await;
        core.cache()
            .set("CONNECTION.CONNECT", PropertyValue::Switch(true))
            .await;

        assert!(core.stop_communication().await);
        assert_eq!(core.state().await, FacadeState::Bound(Framework::Indi));
        assert!(core.cache().is_empty().await);
        assert_eq!(stub.stops.load(Ordering::SeqCst), 1);

        assert!(core.stop_communication().await);
        assert!(core.cache().is_empty().await);
        // adapter is only stopped while active
        assert_eq!(stub.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_without_selection_fails() {
        let core = core_with(Some(StubTransport::new(Framework::Indi)), None);
        assert!(!core.stop_communication().await);
    }

    #[tokio::test]
    async fn test_reselecting_stops_the_live_adapter() {
        let indi = StubTransport::new(Framework::Indi);
        let alpaca = StubTransport::new(Framework::Alpaca);
        let core = core_with(Some(indi.clone()), Some(alpaca.clone()));

        core.set_framework(Framework::Indi).await;
        core.start_communication().await;

        assert!(core.set_framework(Framework::Alpaca).await);
        assert_eq!(indi.stops.load(Ordering::SeqCst), 1);
        assert_eq!(core.state().await, FacadeState::Bound(Framework::Alpaca));
        assert!(core.active().await.is_none());
    }

    #[tokio::test]
    async fn test_active_accessor_requires_running_link() {
        let stub = StubTransport::new(Framework::Indi);
        let core = core_with(Some(stub.clone()), None);

        assert!(core.active().await.is_none());
        core.set_framework(Framework::Indi).await;
        assert!(core.active().await.is_none());
        assert!(core.selected().await.is_some());

        core.start_communication().await;
        assert!(core.active().await.is_some());
    }
}
