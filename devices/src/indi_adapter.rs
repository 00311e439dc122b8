//! INDI transport adapters
//!
//! One adapter binds one device name on one INDI server. After connecting
//! it subscribes the device with `getProperties`, requests the device-level
//! connect as soon as the `CONNECTION` vector shows up, and pumps every
//! pushed vector update into the facade cache as dotted `GROUP.ELEMENT`
//! keys. The pump task owns no locks across awaits on the client, so
//! command writes from the facade side never starve it.

use crate::cache::{PropertyCache, PropertyValue};
use crate::event::{DeviceEvent, SharedEventBus};
use crate::slew::SlewTracker;
use crate::transport::{
    CameraTransport, CoverTransport, DeviceTransport, DomeTransport, ExposureRequest, Framework,
    SwitchTransport,
};
use crate::worker::WorkerPool;
use async_trait::async_trait;
use meridian_indi::standard_properties as props;
use meridian_indi::{IndiClient, IndiEvent, IndiPropertyState, IndiPropertyType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One number written to the device right after it reports connected.
/// INDI drivers default to slow poll intervals; pinning the rate keeps the
/// cache fresh enough for dome tracking and cooler supervision.
#[derive(Debug, Clone)]
pub struct RateCorrection {
    pub property: &'static str,
    pub element: &'static str,
    pub value: f64,
}

/// Device-specific reaction to pump traffic, called after the cache has
/// been refreshed for the update in question
#[async_trait]
pub trait PropertyHook: Send + Sync {
    async fn on_property(
        &self,
        _property: &str,
        _state: IndiPropertyState,
        _cache: &PropertyCache,
        _events: &SharedEventBus,
    ) {
    }

    /// BLOB payload for the bound device; the default drops it
    async fn on_blob(&self, _data: Vec<u8>, _format: &str, _events: &SharedEventBus) {}
}

/// Shared plumbing of every INDI transport
///
/// Clones share the same client, cache and pump; the concrete adapters wrap
/// one core each and add their typed commands on top.
#[derive(Clone)]
pub struct IndiAdapterCore {
    client: Arc<RwLock<IndiClient>>,
    cache: PropertyCache,
    events: SharedEventBus,
    device_name: Arc<RwLock<String>>,
    rate: Option<RateCorrection>,
    hook: Option<Arc<dyn PropertyHook>>,
    wants_blobs: bool,
    running: Arc<AtomicBool>,
    device_connected: Arc<AtomicBool>,
    pump_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl IndiAdapterCore {
    pub fn new(
        cache: PropertyCache,
        events: SharedEventBus,
        rate: Option<RateCorrection>,
        hook: Option<Arc<dyn PropertyHook>>,
        wants_blobs: bool,
    ) -> Self {
        Self {
            client: Arc::new(RwLock::new(IndiClient::new("localhost", None))),
            cache,
            events,
            device_name: Arc::new(RwLock::new(String::new())),
            rate,
            hook,
            wants_blobs,
            running: Arc::new(AtomicBool::new(false)),
            device_connected: Arc::new(AtomicBool::new(false)),
            pump_task: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn set_host(&self, host: &str, port: u16) {
        self.client.write().await.set_host(host, Some(port));
    }

    pub async fn host(&self) -> (String, u16) {
        let client = self.client.read().await;
        (client.host().to_string(), client.port())
    }

    pub async fn set_device_name(&self, name: &str) {
        *self.device_name.write().await = name.to_string();
    }

    pub async fn device_name(&self) -> String {
        self.device_name.read().await.clone()
    }

    pub async fn start(&self) -> bool {
        let name = self.device_name().await;
        if name.is_empty() {
            warn!("Cannot start INDI communication without a device name");
            return false;
        }

        let receiver = {
            let mut client = self.client.write().await;
            // subscribe before connecting so no early definition is missed
            let receiver = client.subscribe();
            if let Err(e) = client.connect().await {
                error!(
                    "INDI connection to {}:{} failed: {}",
                    client.host(),
                    client.port(),
                    e
                );
                return false;
            }
            if let Err(e) = client.watch_device(&name).await {
                error!("Could not subscribe {}: {}", name, e);
                let _ = client.disconnect().await;
                return false;
            }
            if self.wants_blobs {
                if let Err(e) = client.enable_blob(&name).await {
                    warn!("Could not enable BLOB transfer for {}: {}", name, e);
                }
            }
            receiver
        };

        self.running.store(true, Ordering::SeqCst);
        self.events.publish(DeviceEvent::ServerConnected);

        let pump = self.clone();
        let handle = tokio::spawn(async move { pump.run_pump(receiver).await });
        *self.pump_task.lock().await = Some(handle);

        info!("INDI communication started for {}", name);
        true
    }

    pub async fn stop(&self) -> bool {
        let was_running = self.running.swap(false, Ordering::SeqCst);

        if let Some(handle) = self.pump_task.lock().await.take() {
            handle.abort();
        }

        let name = self.device_name().await;
        {
            let mut client = self.client.write().await;
            if let Err(e) = client.disconnect().await {
                debug!("INDI disconnect for {}: {}", name, e);
            }
        }

        if was_running {
            if self.device_connected.swap(false, Ordering::SeqCst) {
                self.events
                    .publish(DeviceEvent::DeviceDisconnected { name: name.clone() });
            }
            self.events
                .publish(DeviceEvent::ServerDisconnected { devices: vec![name] });
        }

        self.cache.clear().await;
        true
    }

    async fn run_pump(&self, mut receiver: broadcast::Receiver<IndiEvent>) {
        loop {
            match receiver.recv().await {
                Ok(event) => self.handle_event(event).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("INDI event pump lagged, {} events dropped", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn handle_event(&self, event: IndiEvent) {
        let name = self.device_name().await;
        match event {
            IndiEvent::PropertyDefined(device, property, _) => {
                if device != name {
                    return;
                }
                if property == props::CONNECTION && !self.device_connected.load(Ordering::SeqCst) {
                    let mut client = self.client.write().await;
                    if let Err(e) = client.connect_device(&name).await {
                        warn!("Could not request device connect for {}: {}", name, e);
                    }
                }
            }
            IndiEvent::PropertyUpdated(device, property) => {
                if device == name {
                    self.apply_update(&name, &property).await;
                }
            }
            IndiEvent::PropertyDeleted(device, property) => {
                if device == name {
                    self.cache.remove_group(&property).await;
                }
            }
            IndiEvent::DeviceRemoved(device) => {
                if device != name {
                    return;
                }
                self.cache.clear().await;
                if self.device_connected.swap(false, Ordering::SeqCst) {
                    self.events.publish(DeviceEvent::DeviceDisconnected { name });
                }
            }
            IndiEvent::Message { device, text } => {
                if device.is_empty() || device == name {
                    self.events.publish(DeviceEvent::Message(text));
                }
            }
            IndiEvent::BlobReceived {
                device, data, format, ..
            } => {
                if device != name {
                    return;
                }
                if let Some(hook) = &self.hook {
                    hook.on_blob(data, &format, &self.events).await;
                }
            }
            IndiEvent::ConnectionStateChanged(false) => {
                if self.running.load(Ordering::SeqCst) {
                    warn!("INDI server connection lost");
                    self.device_connected.store(false, Ordering::SeqCst);
                    self.events
                        .publish(DeviceEvent::ServerDisconnected { devices: vec![name] });
                }
            }
            IndiEvent::ConnectionStateChanged(true) | IndiEvent::DeviceDefined(_) => {}
            IndiEvent::Error(text) => debug!("INDI client error: {}", text),
        }
    }

    /// Refresh the cache from the client's shadow copy of one property
    async fn apply_update(&self, name: &str, property: &str) {
        let (property_type, state, values) = {
            let client = self.client.read().await;
            let Some(definition) = client.get_property(name, property).await else {
                return;
            };
            let values = client
                .get_element_values(name, property)
                .await
                .unwrap_or_default();
            (definition.property_type, definition.state, values)
        };

        for (element, raw) in &values {
            let value = match property_type {
                IndiPropertyType::Number => raw.parse::<f64>().ok().map(PropertyValue::Number),
                IndiPropertyType::Switch => {
                    Some(PropertyValue::Switch(raw.eq_ignore_ascii_case("on")))
                }
                IndiPropertyType::Text | IndiPropertyType::Light => {
                    Some(PropertyValue::Text(raw.clone()))
                }
                IndiPropertyType::Blob => None,
            };
            let Some(value) = value else { continue };
            let key = format!("{}.{}", property, element);
            self.cache.set(&key, value).await;
            self.events.publish(DeviceEvent::PropertyChanged {
                device: name.to_string(),
                key,
            });
        }

        if property == props::CONNECTION {
            self.track_connection_edge(name).await;
        }

        if let Some(hook) = &self.hook {
            hook.on_property(property, state, &self.cache, &self.events)
                .await;
        }
    }

    async fn track_connection_edge(&self, name: &str) {
        let key = format!("{}.{}", props::CONNECTION, props::CONNECT);
        let connected = self.cache.switch(&key).await.unwrap_or(false);
        let was_connected = self.device_connected.swap(connected, Ordering::SeqCst);

        if connected && !was_connected {
            info!("Device connected: {}", name);
            self.events.publish(DeviceEvent::DeviceConnected {
                name: name.to_string(),
            });
            self.apply_rate_correction(name).await;
        } else if !connected && was_connected {
            info!("Device disconnected: {}", name);
            self.events.publish(DeviceEvent::DeviceDisconnected {
                name: name.to_string(),
            });
        }
    }

    /// Pin the driver poll rate once per connect edge. Skipped when the
    /// driver has no such knob or already runs at the wanted rate.
    async fn apply_rate_correction(&self, name: &str) {
        let Some(rate) = &self.rate else { return };
        {
            let client = self.client.read().await;
            if !client.has_element(name, rate.property, rate.element).await {
                return;
            }
            if client.get_number(name, rate.property, rate.element).await == Some(rate.value) {
                return;
            }
        }
        let mut client = self.client.write().await;
        match client
            .set_number(name, rate.property, rate.element, rate.value)
            .await
        {
            Ok(()) => debug!(
                "Poll rate for {} set to {}.{} = {}",
                name, rate.property, rate.element, rate.value
            ),
            Err(e) => warn!("Could not adjust poll rate for {}: {}", name, e),
        }
    }

    /// Uniform write path: one `GROUP.ELEMENT` key, one value
    pub async fn send(&self, key: &str, value: PropertyValue) -> bool {
        let name = self.device_name().await;
        if name.is_empty() {
            return false;
        }
        let Some((property, element)) = key.split_once('.') else {
            warn!("Malformed property key: {}", key);
            return false;
        };
        {
            let client = self.client.read().await;
            if !client.has_element(&name, property, element).await {
                debug!("{} does not expose {}", name, key);
                return false;
            }
        }
        let mut client = self.client.write().await;
        let result = match value {
            PropertyValue::Number(v) => client.set_number(&name, property, element, v).await,
            PropertyValue::Switch(v) => client.set_switch(&name, property, element, v).await,
            PropertyValue::Text(v) => client.set_text(&name, property, element, &v).await,
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                error!("Write of {} to {} failed: {}", key, name, e);
                false
            }
        }
    }

    /// Write a whole switch vector in one command
    async fn send_switches(&self, property: &str, states: &[(&str, bool)]) -> bool {
        let name = self.device_name().await;
        if name.is_empty() {
            return false;
        }
        {
            let client = self.client.read().await;
            if !client.has_property(&name, property).await {
                debug!("{} does not expose {}", name, property);
                return false;
            }
        }
        let mut client = self.client.write().await;
        match client.set_switches(&name, property, states).await {
            Ok(()) => true,
            Err(e) => {
                error!("Write of {} to {} failed: {}", property, name, e);
                false
            }
        }
    }

    /// Flip one element of a switch vector, resending the whole vector so
    /// drivers with exclusive rules see a consistent state
    async fn toggle_element(&self, property: &str, element: &str) -> bool {
        let name = self.device_name().await;
        if name.is_empty() {
            return false;
        }
        let current = {
            let client = self.client.read().await;
            client.get_switch_values(&name, property).await
        };
        let Some(mut states) = current else {
            debug!("{} does not expose {}", name, property);
            return false;
        };
        match states.iter_mut().find(|(n, _)| n.as_str() == element) {
            Some(entry) => entry.1 = !entry.1,
            None => {
                debug!("{} has no element {}.{}", name, property, element);
                return false;
            }
        }
        let pairs: Vec<(&str, bool)> = states.iter().map(|(n, v)| (n.as_str(), *v)).collect();
        self.send_switches(property, &pairs).await
    }

    /// Invert every element of a switch vector
    async fn invert_elements(&self, property: &str) -> bool {
        let name = self.device_name().await;
        if name.is_empty() {
            return false;
        }
        let current = {
            let client = self.client.read().await;
            client.get_switch_values(&name, property).await
        };
        let Some(states) = current else {
            debug!("{} does not expose {}", name, property);
            return false;
        };
        if states.is_empty() {
            return false;
        }
        let pairs: Vec<(&str, bool)> = states.iter().map(|(n, v)| (n.as_str(), !*v)).collect();
        self.send_switches(property, &pairs).await
    }
}

// --- Dome ---

struct DomeSlewHook {
    tracker: Arc<SlewTracker>,
}

#[async_trait]
impl PropertyHook for DomeSlewHook {
    async fn on_property(
        &self,
        property: &str,
        state: IndiPropertyState,
        cache: &PropertyCache,
        _events: &SharedEventBus,
    ) {
        if property != props::ABS_DOME_POSITION {
            return;
        }
        let key = format!(
            "{}.{}",
            props::ABS_DOME_POSITION,
            props::DOME_ABSOLUTE_POSITION
        );
        let Some(azimuth) = cache.number(&key).await else {
            return;
        };
        // a Busy position vector is how INDI domes report an ongoing slew
        self.tracker
            .observe(azimuth, state == IndiPropertyState::Busy)
            .await;
    }
}

/// Dome on an INDI server
pub struct IndiDome {
    core: IndiAdapterCore,
    tracker: Arc<SlewTracker>,
}

impl IndiDome {
    pub fn new(cache: PropertyCache, events: SharedEventBus) -> Self {
        let tracker = Arc::new(SlewTracker::new(events.clone()));
        let hook = Arc::new(DomeSlewHook {
            tracker: tracker.clone(),
        });
        let core = IndiAdapterCore::new(
            cache,
            events,
            Some(RateCorrection {
                property: props::POLLING_PERIOD,
                element: props::PERIOD_MS,
                value: 1000.0,
            }),
            Some(hook),
            false,
        );
        Self { core, tracker }
    }
}

#[async_trait]
impl DeviceTransport for IndiDome {
    fn framework(&self) -> Framework {
        Framework::Indi
    }

    async fn set_host(&self, host: &str, port: u16) {
        self.core.set_host(host, port).await;
    }

    async fn host(&self) -> (String, u16) {
        self.core.host().await
    }

    async fn set_device_name(&self, name: &str) {
        self.core.set_device_name(name).await;
    }

    async fn device_name(&self) -> String {
        self.core.device_name().await
    }

    async fn start_communication(&self) -> bool {
        self.core.start().await
    }

    async fn stop_communication(&self) -> bool {
        self.tracker.reset().await;
        self.core.stop().await
    }

    async fn send_property(&self, key: &str, value: PropertyValue) -> bool {
        self.core.send(key, value).await
    }
}

#[async_trait]
impl DomeTransport for IndiDome {
    async fn slew_to_alt_az(&self, _altitude: f64, azimuth: f64) -> bool {
        let key = format!(
            "{}.{}",
            props::ABS_DOME_POSITION,
            props::DOME_ABSOLUTE_POSITION
        );
        if self.core.send(&key, PropertyValue::Number(azimuth)).await {
            self.tracker.mark_slewing();
            true
        } else {
            false
        }
    }

    async fn set_settling_time(&self, duration: Duration) {
        self.tracker.set_settling_time(duration).await;
    }

    async fn settling_time(&self) -> Duration {
        self.tracker.settling_time().await
    }
}

// --- Camera ---

struct CameraBlobHook {
    pool: WorkerPool,
    pending_path: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl PropertyHook for CameraBlobHook {
    async fn on_blob(&self, data: Vec<u8>, format: &str, events: &SharedEventBus) {
        let Some(path) = self.pending_path.lock().await.take() else {
            warn!(
                "Image data arrived without a pending exposure, {} bytes dropped",
                data.len()
            );
            return;
        };
        debug!("Saving {} bytes ({}) to {}", data.len(), format, path);
        let events = events.clone();
        self.pool.submit(
            async move {
                match tokio::fs::write(&path, &data).await {
                    Ok(()) => Some(path),
                    Err(e) => {
                        error!("Could not write image to {}: {}", path, e);
                        None
                    }
                }
            },
            move |saved| {
                if let Some(path) = saved {
                    events.publish(DeviceEvent::Exposed);
                    events.publish(DeviceEvent::Saved { path });
                }
            },
        );
    }
}

/// CCD camera on an INDI server
pub struct IndiCamera {
    core: IndiAdapterCore,
    pending_path: Arc<Mutex<Option<String>>>,
}

impl IndiCamera {
    pub fn new(cache: PropertyCache, events: SharedEventBus, pool: WorkerPool) -> Self {
        let pending_path = Arc::new(Mutex::new(None));
        let hook = Arc::new(CameraBlobHook {
            pool,
            pending_path: pending_path.clone(),
        });
        let core = IndiAdapterCore::new(
            cache,
            events,
            Some(RateCorrection {
                property: props::POLLING_PERIOD,
                element: props::PERIOD_MS,
                value: 1000.0,
            }),
            Some(hook),
            true,
        );
        Self { core, pending_path }
    }
}

#[async_trait]
impl DeviceTransport for IndiCamera {
    fn framework(&self) -> Framework {
        Framework::Indi
    }

    async fn set_host(&self, host: &str, port: u16) {
        self.core.set_host(host, port).await;
    }

    async fn host(&self) -> (String, u16) {
        self.core.host().await
    }

    async fn set_device_name(&self, name: &str) {
        self.core.set_device_name(name).await;
    }

    async fn device_name(&self) -> String {
        self.core.device_name().await
    }

    async fn start_communication(&self) -> bool {
        self.core.start().await
    }

    async fn stop_communication(&self) -> bool {
        self.pending_path.lock().await.take();
        self.core.stop().await
    }

    async fn send_property(&self, key: &str, value: PropertyValue) -> bool {
        self.core.send(key, value).await
    }
}

#[async_trait]
impl CameraTransport for IndiCamera {
    async fn expose(&self, request: ExposureRequest) -> bool {
        let name = self.core.device_name().await;
        if name.is_empty() {
            return false;
        }
        {
            let client = self.core.client.read().await;
            if !client.has_property(&name, props::CCD_EXPOSURE).await {
                debug!("{} does not expose {}", name, props::CCD_EXPOSURE);
                return false;
            }
        }

        let mut client = self.core.client.write().await;

        // binning first, the driver reinterprets the frame against it
        if client.has_property(&name, props::CCD_BINNING).await {
            let bin = request.binning as f64;
            if let Err(e) = client
                .set_numbers(&name, props::CCD_BINNING, &[("HOR_BIN", bin), ("VER_BIN", bin)])
                .await
            {
                error!("Could not set binning on {}: {}", name, e);
                return false;
            }
        }

        if request.width > 0
            && request.height > 0
            && client.has_property(&name, props::CCD_FRAME).await
        {
            let frame = [
                ("X", request.pos_x as f64),
                ("Y", request.pos_y as f64),
                ("WIDTH", request.width as f64),
                ("HEIGHT", request.height as f64),
            ];
            if let Err(e) = client.set_numbers(&name, props::CCD_FRAME, &frame).await {
                error!("Could not set frame on {}: {}", name, e);
                return false;
            }
        }

        if client.has_property(&name, props::READOUT_QUALITY).await {
            let quality = [
                ("QUALITY_LOW", request.fast_readout),
                ("QUALITY_HIGH", !request.fast_readout),
            ];
            if let Err(e) = client
                .set_switches(&name, props::READOUT_QUALITY, &quality)
                .await
            {
                warn!("Could not set readout quality on {}: {}", name, e);
            }
        }

        *self.pending_path.lock().await = Some(request.image_path.clone());
        match client
            .set_number(
                &name,
                props::CCD_EXPOSURE,
                props::CCD_EXPOSURE_VALUE,
                request.exposure_time,
            )
            .await
        {
            Ok(()) => {
                info!(
                    "Exposure started on {}: {}s to {}",
                    name, request.exposure_time, request.image_path
                );
                true
            }
            Err(e) => {
                error!("Could not start exposure on {}: {}", name, e);
                self.pending_path.lock().await.take();
                false
            }
        }
    }

    async fn abort_exposure(&self) -> bool {
        self.pending_path.lock().await.take();
        let key = format!("{}.{}", props::CCD_ABORT_EXPOSURE, "ABORT");
        self.core.send(&key, PropertyValue::Switch(true)).await
    }

    async fn set_cooler(&self, on: bool) -> bool {
        self.core
            .send_switches(props::CCD_COOLER, &[("COOLER_ON", on), ("COOLER_OFF", !on)])
            .await
    }

    async fn set_cooler_temperature(&self, temperature: f64) -> bool {
        let key = format!("{}.{}", props::CCD_TEMPERATURE, "CCD_TEMPERATURE_VALUE");
        self.core
            .send(&key, PropertyValue::Number(temperature))
            .await
    }

    async fn set_download_mode(&self, fast: bool) -> bool {
        self.core
            .send_switches(
                props::READOUT_QUALITY,
                &[("QUALITY_LOW", fast), ("QUALITY_HIGH", !fast)],
            )
            .await
    }
}

// --- Pegasus UPB power box ---

/// Pegasus Ultimate Power Box on an INDI server
pub struct IndiPegasusUpb {
    core: IndiAdapterCore,
}

impl IndiPegasusUpb {
    pub fn new(cache: PropertyCache, events: SharedEventBus) -> Self {
        let core = IndiAdapterCore::new(
            cache,
            events,
            Some(RateCorrection {
                property: props::POLLING_PERIOD,
                element: props::PERIOD_MS,
                value: 1000.0,
            }),
            None,
            false,
        );
        Self { core }
    }
}

#[async_trait]
impl DeviceTransport for IndiPegasusUpb {
    fn framework(&self) -> Framework {
        Framework::Indi
    }

    async fn set_host(&self, host: &str, port: u16) {
        self.core.set_host(host, port).await;
    }

    async fn host(&self) -> (String, u16) {
        self.core.host().await
    }

    async fn set_device_name(&self, name: &str) {
        self.core.set_device_name(name).await;
    }

    async fn device_name(&self) -> String {
        self.core.device_name().await
    }

    async fn start_communication(&self) -> bool {
        self.core.start().await
    }

    async fn stop_communication(&self) -> bool {
        self.core.stop().await
    }

    async fn send_property(&self, key: &str, value: PropertyValue) -> bool {
        self.core.send(key, value).await
    }
}

#[async_trait]
impl SwitchTransport for IndiPegasusUpb {
    async fn toggle_power_port(&self, port: u8) -> bool {
        let element = format!("POWER_CONTROL_{}", port);
        self.core
            .toggle_element(props::POWER_CONTROL, &element)
            .await
    }

    async fn toggle_power_boot(&self, port: u8) -> bool {
        let element = format!("POWER_PORT_{}", port);
        self.core
            .toggle_element(props::POWER_ON_BOOT, &element)
            .await
    }

    async fn toggle_hub_usb(&self) -> bool {
        self.core.invert_elements(props::USB_HUB_CONTROL).await
    }

    async fn toggle_port_usb(&self, port: u8) -> bool {
        let element = format!("PORT_{}", port);
        self.core
            .toggle_element(props::USB_PORT_CONTROL, &element)
            .await
    }

    async fn toggle_auto_dew(&self) -> bool {
        self.core.invert_elements(props::AUTO_DEW).await
    }

    async fn toggle_auto_dew_port(&self, port: char) -> bool {
        let element = format!("DEW_{}", port);
        self.core.toggle_element(props::AUTO_DEW, &element).await
    }

    async fn send_dew_pwm(&self, port: char, value: f64) -> bool {
        let key = format!("{}.DEW_{}", props::DEW_PWM, port);
        self.core.send(&key, PropertyValue::Number(value)).await
    }

    async fn send_adjustable_output(&self, value: f64) -> bool {
        let key = format!("{}.ADJUSTABLE_VOLTAGE_VALUE", props::ADJUSTABLE_VOLTAGE);
        self.core.send(&key, PropertyValue::Number(value)).await
    }
}

// --- Flat panel cover ---

/// Flip-flat style cover with calibration light on an INDI server
pub struct IndiCover {
    core: IndiAdapterCore,
}

impl IndiCover {
    pub fn new(cache: PropertyCache, events: SharedEventBus) -> Self {
        let core = IndiAdapterCore::new(
            cache,
            events,
            Some(RateCorrection {
                property: "PERIOD_MS",
                element: "PERIOD",
                value: 1.0,
            }),
            None,
            false,
        );
        Self { core }
    }
}

#[async_trait]
impl DeviceTransport for IndiCover {
    fn framework(&self) -> Framework {
        Framework::Indi
    }

    async fn set_host(&self, host: &str, port: u16) {
        self.core.set_host(host, port).await;
    }

    async fn host(&self) -> (String, u16) {
        self.core.host().await
    }

    async fn set_device_name(&self, name: &str) {
        self.core.set_device_name(name).await;
    }

    async fn device_name(&self) -> String {
        self.core.device_name().await
    }

    async fn start_communication(&self) -> bool {
        self.core.start().await
    }

    async fn stop_communication(&self) -> bool {
        self.core.stop().await
    }

    async fn send_property(&self, key: &str, value: PropertyValue) -> bool {
        self.core.send(key, value).await
    }
}

#[async_trait]
impl CoverTransport for IndiCover {
    async fn set_park(&self, park: bool) -> bool {
        self.core
            .send_switches(props::CAP_PARK, &[("PARK", park), ("UNPARK", !park)])
            .await
    }

    async fn switch_light(&self, on: bool) -> bool {
        self.core
            .send_switches(
                props::FLAT_LIGHT_CONTROL,
                &[("FLAT_LIGHT_ON", on), ("FLAT_LIGHT_OFF", !on)],
            )
            .await
    }

    async fn set_brightness(&self, value: f64) -> bool {
        let key = format!(
            "{}.FLAT_LIGHT_INTENSITY_VALUE",
            props::FLAT_LIGHT_INTENSITY
        );
        self.core.send(&key, PropertyValue::Number(value)).await
    }
}

// --- Weather sensor ---

/// Passive weather station on an INDI server. All readings flow through
/// the generic pump; there are no commands to send.
pub struct IndiWeather {
    core: IndiAdapterCore,
}

impl IndiWeather {
    pub fn new(cache: PropertyCache, events: SharedEventBus) -> Self {
        let core = IndiAdapterCore::new(
            cache,
            events,
            Some(RateCorrection {
                property: props::WEATHER_UPDATE,
                element: "PERIOD",
                value: 1.0,
            }),
            None,
            false,
        );
        Self { core }
    }
}

#[async_trait]
impl DeviceTransport for IndiWeather {
    fn framework(&self) -> Framework {
        Framework::Indi
    }

    async fn set_host(&self, host: &str, port: u16) {
        self.core.set_host(host, port).await;
    }

    async fn host(&self) -> (String, u16) {
        self.core.host().await
    }

    async fn set_device_name(&self, name: &str) {
        self.core.set_device_name(name).await;
    }

    async fn device_name(&self) -> String {
        self.core.device_name().await
    }

    async fn start_communication(&self) -> bool {
        self.core.start().await
    }

    async fn stop_communication(&self) -> bool {
        self.core.stop().await
    }

    async fn send_property(&self, key: &str, value: PropertyValue) -> bool {
        self.core.send(key, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBus;
    use std::sync::atomic::AtomicU32;

    static FILE_SEQ: AtomicU32 = AtomicU32::new(0);

    fn scratch_file(tag: &str) -> String {
        let seq = FILE_SEQ.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir()
            .join(format!("meridian-{}-{}-{}.bin", tag, std::process::id(), seq))
            .to_string_lossy()
            .into_owned()
    }

    fn drain(rx: &mut broadcast::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_start_without_device_name_fails() {
        let core = IndiAdapterCore::new(
            PropertyCache::new(),
            Arc::new(EventBus::default()),
            None,
            None,
            false,
        );
        assert!(!core.start().await);
    }

    #[tokio::test]
    async fn test_stop_before_start_clears_cache_and_succeeds() {
        let cache = PropertyCache::new();
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        cache
            .set("CONNECTION.CONNECT", PropertyValue::Switch(true))
            .await;

        let core = IndiAdapterCore::new(cache.clone(), bus, None, None, false);
        core.set_device_name("Dome Simulator").await;

        assert!(core.stop().await);
        assert!(cache.is_empty().await);
        assert!(core.stop().await);
        // a stop that never followed a start stays silent
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_send_on_undefined_property_fails() {
        let core = IndiAdapterCore::new(
            PropertyCache::new(),
            Arc::new(EventBus::default()),
            None,
            None,
            false,
        );
        core.set_device_name("CCD Simulator").await;

        assert!(
            !core
                .send("CCD_EXPOSURE.CCD_EXPOSURE_VALUE", PropertyValue::Number(1.0))
                .await
        );
        assert!(!core.send("no-dot-key", PropertyValue::Switch(true)).await);
    }

    #[tokio::test]
    async fn test_unstarted_power_box_rejects_toggles() {
        let cache = PropertyCache::new();
        let upb = IndiPegasusUpb::new(cache.clone(), Arc::new(EventBus::default()));
        upb.set_device_name("Pegasus UPB").await;

        assert!(!upb.toggle_power_port(1).await);
        assert!(!upb.toggle_hub_usb().await);
        assert!(!upb.send_dew_pwm('A', 55.0).await);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_dome_hook_feeds_tracker_from_cache() {
        let cache = PropertyCache::new();
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let tracker = Arc::new(SlewTracker::new(bus.clone()));
        let hook = DomeSlewHook {
            tracker: tracker.clone(),
        };
        let key = "ABS_DOME_POSITION.DOME_ABSOLUTE_POSITION";

        cache.set(key, PropertyValue::Number(120.0)).await;
        hook.on_property(
            props::ABS_DOME_POSITION,
            IndiPropertyState::Ok,
            &cache,
            &bus,
        )
        .await;
        assert!(drain(&mut rx).is_empty());

        cache.set(key, PropertyValue::Number(125.0)).await;
        hook.on_property(
            props::ABS_DOME_POSITION,
            IndiPropertyState::Busy,
            &cache,
            &bus,
        )
        .await;
        assert_eq!(drain(&mut rx), vec![DeviceEvent::Azimuth(120.0)]);
        assert!(tracker.is_slewing());

        // an unrelated property leaves the tracker alone
        hook.on_property(props::CONNECTION, IndiPropertyState::Ok, &cache, &bus)
            .await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_blob_hook_saves_and_announces() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let path = scratch_file("blob");
        let pending = Arc::new(Mutex::new(Some(path.clone())));
        let hook = CameraBlobHook {
            pool: WorkerPool::default(),
            pending_path: pending.clone(),
        };

        hook.on_blob(b"fits-bytes".to_vec(), ".fits", &bus).await;

        let mut events = Vec::new();
        for _ in 0..50 {
            events.extend(drain(&mut rx));
            if events.iter().any(|e| matches!(e, DeviceEvent::Saved { .. })) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(
            events,
            vec![
                DeviceEvent::Exposed,
                DeviceEvent::Saved { path: path.clone() }
            ]
        );
        assert_eq!(tokio::fs::read(&path).await.ok().as_deref(), Some(&b"fits-bytes"[..]));
        assert!(pending.lock().await.is_none());
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_blob_without_pending_exposure_is_dropped() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let hook = CameraBlobHook {
            pool: WorkerPool::default(),
            pending_path: Arc::new(Mutex::new(None)),
        };

        hook.on_blob(b"stray".to_vec(), ".fits", &bus).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(drain(&mut rx).is_empty());
    }
}
