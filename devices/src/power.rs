//! Pegasus UPB power box facade
//!
//! Every operation is a toggle or a plain value write against the switch
//! schema the device reported. The UPB only speaks INDI, so the Alpaca
//! slot stays empty and selecting that framework is refused.

use crate::cache::PropertyCache;
use crate::event::{DeviceEvent, EventBus, SharedEventBus};
use crate::facade::{FacadeCore, FacadeState};
use crate::indi_adapter::IndiPegasusUpb;
use crate::transport::{Framework, SwitchTransport};
use crate::worker::WorkerPool;
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct PegasusUpb {
    core: FacadeCore<dyn SwitchTransport>,
}

impl PegasusUpb {
    pub fn new(_pool: WorkerPool) -> Self {
        let cache = PropertyCache::new();
        let events: SharedEventBus = Arc::new(EventBus::default());
        let indi = Arc::new(IndiPegasusUpb::new(cache.clone(), events.clone()));
        Self {
            core: FacadeCore::new(
                cache,
                events,
                Some(indi as Arc<dyn SwitchTransport>),
                None,
            ),
        }
    }

    #[cfg(test)]
    fn with_transport(indi: Arc<dyn SwitchTransport>) -> Self {
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

    /// Flip one of the four switched 12 V outputs
    pub async fn toggle_power_port(&self, port: u8) -> bool {
        let Some(adapter) = self.core.active().await else {
            return false;
        };
        adapter.toggle_power_port(port).await
    }

    /// Flip whether a 12 V output comes up powered after boot
    pub async fn toggle_power_boot(&self, port: u8) -> bool {
        let Some(adapter) = self.core.active().await else {
            return false;
        };
        adapter.toggle_power_boot(port).await
    }

    /// Flip the whole USB hub
    pub async fn toggle_hub_usb(&self) -> bool {
        let Some(adapter) = self.core.active().await else {
            return false;
        };
        adapter.toggle_hub_usb().await
    }

    /// Flip a single USB port
    pub async fn toggle_port_usb(&self, port: u8) -> bool {
        let Some(adapter) = self.core.active().await else {
            return false;
        };
        adapter.toggle_port_usb(port).await
    }

    /// Flip automatic dew control for all heater channels
    pub async fn toggle_auto_dew(&self) -> bool {
        let Some(adapter) = self.core.active().await else {
            return false;
        };
        adapter.toggle_auto_dew().await
    }

    /// Flip automatic dew control for one heater channel (A, B or C)
    pub async fn toggle_auto_dew_port(&self, port: char) -> bool {
        let Some(adapter) = self.core.active().await else {
            return false;
        };
        adapter.toggle_auto_dew_port(port).await
    }

    /// Set the manual PWM duty cycle of one heater channel
    pub async fn send_dew_pwm(&self, port: char, value: f64) -> bool {
        let Some(adapter) = self.core.active().await else {
            return false;
        };
        adapter.send_dew_pwm(port, value).await
    }

    /// Set the adjustable voltage output
    pub async fn send_adjustable_output(&self, value: f64) -> bool {
        let Some(adapter) = self.core.active().await else {
            return false;
        };
        adapter.send_adjustable_output(value).await
    }
}
