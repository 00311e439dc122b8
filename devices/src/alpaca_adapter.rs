//! ASCOM Alpaca transport adapters
//!
//! Alpaca exposes no push channel, so each adapter runs a one-second
//! polling cycle on the shared worker pool and writes whatever the REST
//! endpoints answer into the facade cache, under the same dotted keys the
//! INDI variant uses. A failed read leaves its key untouched; the next
//! cycle simply asks again.

use crate::cache::{PropertyCache, PropertyValue};
use crate::event::{DeviceEvent, SharedEventBus};
use crate::slew::SlewTracker;
use crate::transport::{
    CameraTransport, CoverTransport, DeviceTransport, DomeTransport, ExposureRequest, Framework,
};
use crate::weather::dew_point;
use crate::worker::WorkerPool;
use async_trait::async_trait;
use meridian_alpaca::{
    AlpacaCamera as CameraClient, AlpacaCoverCalibrator as CoverClient, AlpacaDome as DomeClient,
    AlpacaError, AlpacaObservingConditions as ConditionsClient, CalibratorStatus, CameraState,
    CoverStatus, ShutterStatus, ALPACA_DEFAULT_PORT,
};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Extra wait beyond the exposure time before an image download is
/// considered failed
const IMAGE_WAIT_GRACE: Duration = Duration::from_secs(60);

/// Typed REST client plus the mapping from endpoint values to cache keys
/// for one Alpaca device type
#[async_trait]
pub trait AlpacaDriver: Send + Sync {
    /// Build the typed client against `base_url` and connect the device
    async fn open(&self, base_url: &str, device_number: u32) -> Result<(), AlpacaError>;

    /// Disconnect (best effort) and drop the client
    async fn close(&self);

    /// One-time battery of static properties fetched right after connect
    async fn initial_config(&self, device: &str, cache: &PropertyCache, events: &SharedEventBus);

    /// One polling cycle
    async fn poll(&self, device: &str, cache: &PropertyCache, events: &SharedEventBus);
}

/// Write one value and announce it, but only when it actually changed.
/// Polling rereads everything every second; unchanged values would flood
/// the bus otherwise.
async fn store(
    cache: &PropertyCache,
    events: &SharedEventBus,
    device: &str,
    key: &str,
    value: PropertyValue,
) {
    let changed = match cache.get(key).await {
        Some(old) => old != value,
        None => true,
    };
    cache.set(key, value).await;
    if changed {
        events.publish(DeviceEvent::PropertyChanged {
            device: device.to_string(),
            key: key.to_string(),
        });
    }
}

async fn store_number(
    cache: &PropertyCache,
    events: &SharedEventBus,
    device: &str,
    key: &str,
    value: Result<f64, String>,
) {
    if let Ok(v) = value {
        store(cache, events, device, key, PropertyValue::Number(v)).await;
    }
}

async fn store_int(
    cache: &PropertyCache,
    events: &SharedEventBus,
    device: &str,
    key: &str,
    value: Result<i32, String>,
) {
    if let Ok(v) = value {
        store(cache, events, device, key, PropertyValue::Number(v as f64)).await;
    }
}

async fn store_switch(
    cache: &PropertyCache,
    events: &SharedEventBus,
    device: &str,
    key: &str,
    value: Result<bool, String>,
) {
    if let Ok(v) = value {
        store(cache, events, device, key, PropertyValue::Switch(v)).await;
    }
}

/// Shared plumbing of every Alpaca transport: host and device identity,
/// the connect/disconnect lifecycle and the poll ticker
#[derive(Clone)]
pub struct AlpacaAdapterCore {
    driver: Arc<dyn AlpacaDriver>,
    cache: PropertyCache,
    events: SharedEventBus,
    pool: WorkerPool,
    host: Arc<RwLock<(String, u16)>>,
    device_name: Arc<RwLock<String>>,
    device_number: Arc<AtomicU32>,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    poll_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AlpacaAdapterCore {
    pub fn new(
        driver: Arc<dyn AlpacaDriver>,
        cache: PropertyCache,
        events: SharedEventBus,
        pool: WorkerPool,
    ) -> Self {
        Self {
            driver,
            cache,
            events,
            pool,
            host: Arc::new(RwLock::new(("localhost".to_string(), ALPACA_DEFAULT_PORT))),
            device_name: Arc::new(RwLock::new(String::new())),
            device_number: Arc::new(AtomicU32::new(0)),
            poll_interval: DEFAULT_POLL_INTERVAL,
            running: Arc::new(AtomicBool::new(false)),
            poll_task: Arc::new(Mutex::new(None)),
        }
    }

    #[cfg(test)]
    fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub async fn set_host(&self, host: &str, port: u16) {
        *self.host.write().await = (host.to_string(), port);
    }

    pub async fn host(&self) -> (String, u16) {
        self.host.read().await.clone()
    }

    /// Store the device name. A trailing `:N` selects the Alpaca device
    /// number on the server; a bare name keeps the current number.
    pub async fn set_device_name(&self, name: &str) {
        let (bare, number) = match name.rsplit_once(':') {
            Some((prefix, suffix)) if !prefix.trim().is_empty() => {
                match suffix.trim().parse::<u32>() {
                    Ok(n) => (prefix.trim().to_string(), Some(n)),
                    Err(_) => (name.to_string(), None),
                }
            }
            _ => (name.to_string(), None),
        };
        *self.device_name.write().await = bare;
        if let Some(number) = number {
            self.device_number.store(number, Ordering::SeqCst);
        }
    }

    pub async fn device_name(&self) -> String {
        self.device_name.read().await.clone()
    }

    pub fn device_number(&self) -> u32 {
        self.device_number.load(Ordering::SeqCst)
    }

    pub async fn start(&self) -> bool {
        let name = self.device_name().await;
        if name.is_empty() {
            warn!("Cannot start Alpaca communication without a device name");
            return false;
        }
        let (host, port) = self.host().await;
        let base_url = format!("http://{}:{}", host, port);
        let number = self.device_number();

        if let Err(e) = self.driver.open(&base_url, number).await {
            error!(
                "Alpaca connection to {} (device {}) failed: {}",
                base_url, number, e
            );
            return false;
        }

        self.events.publish(DeviceEvent::ServerConnected);
        self.events
            .publish(DeviceEvent::DeviceConnected { name: name.clone() });

        self.driver
            .initial_config(&name, &self.cache, &self.events)
            .await;

        self.running.store(true, Ordering::SeqCst);
        let ticker = self.clone();
        let handle = tokio::spawn(async move { ticker.run_poll_loop().await });
        *self.poll_task.lock().await = Some(handle);

        info!("Alpaca communication started for {} at {}", name, base_url);
        true
    }

    async fn run_poll_loop(&self) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let driver = self.driver.clone();
            let cache = self.cache.clone();
            let events = self.events.clone();
            let name = self.device_name().await;
            self.pool.submit(
                async move { driver.poll(&name, &cache, &events).await },
                |_| {},
            );
        }
    }

    pub async fn stop(&self) -> bool {
        let was_running = self.running.swap(false, Ordering::SeqCst);

        if let Some(handle) = self.poll_task.lock().await.take() {
            handle.abort();
        }

        if was_running {
            self.driver.close().await;
            let name = self.device_name().await;
            self.events
                .publish(DeviceEvent::DeviceDisconnected { name: name.clone() });
            self.events
                .publish(DeviceEvent::ServerDisconnected { devices: vec![name] });
        }

        self.cache.clear().await;
        true
    }
}

// --- Camera ---

pub struct AlpacaCameraDriver {
    camera: RwLock<Option<Arc<CameraClient>>>,
    pool: WorkerPool,
    last_state: Mutex<Option<CameraState>>,
}

impl AlpacaCameraDriver {
    fn new(pool: WorkerPool) -> Self {
        Self {
            camera: RwLock::new(None),
            pool,
            last_state: Mutex::new(None),
        }
    }

    async fn client(&self) -> Option<Arc<CameraClient>> {
        self.camera.read().await.clone()
    }

    /// Start the full exposure sequence on the worker pool. Returns
    /// acceptance; completion is the `Saved` event.
    async fn start_exposure(&self, request: ExposureRequest, events: &SharedEventBus) -> bool {
        let Some(camera) = self.client().await else {
            warn!("No Alpaca camera connected");
            return false;
        };

        info!(
            "Exposure started: {}s to {}",
            request.exposure_time, request.image_path
        );
        let events = events.clone();
        self.pool.submit(
            async move { run_exposure(camera, request).await },
            move |outcome| match outcome {
                Ok(path) => {
                    events.publish(DeviceEvent::Exposed);
                    events.publish(DeviceEvent::Saved { path });
                }
                Err(e) => error!("Exposure failed: {}", e),
            },
        );
        true
    }

    async fn abort(&self) -> bool {
        let Some(camera) = self.client().await else {
            return false;
        };
        match camera.abort_exposure().await {
            Ok(()) => true,
            Err(e) => {
                error!("Could not abort exposure: {}", e);
                false
            }
        }
    }

    async fn set_cooler(&self, on: bool) -> bool {
        let Some(camera) = self.client().await else {
            return false;
        };
        match camera.set_cooler_on(on).await {
            Ok(()) => true,
            Err(e) => {
                error!("Could not switch cooler: {}", e);
                false
            }
        }
    }

    async fn set_cooler_temperature(&self, temperature: f64) -> bool {
        let Some(camera) = self.client().await else {
            return false;
        };
        match camera.set_ccd_temperature(temperature).await {
            Ok(()) => true,
            Err(e) => {
                error!("Could not set cooler temperature: {}", e);
                false
            }
        }
    }

    async fn set_fast_readout(&self, fast: bool) -> bool {
        let Some(camera) = self.client().await else {
            return false;
        };
        match camera.set_fast_readout(fast).await {
            Ok(()) => true,
            Err(e) => {
                error!("Could not set readout mode: {}", e);
                false
            }
        }
    }
}

/// Program the camera, wait for the image and write it to disk
async fn run_exposure(
    camera: Arc<CameraClient>,
    request: ExposureRequest,
) -> Result<String, String> {
    if let Err(e) = camera.set_fast_readout(request.fast_readout).await {
        debug!("Readout mode not applied: {}", e);
    }

    let bin = request.binning.max(1);
    camera.set_bin_x(bin).await?;
    camera.set_bin_y(bin).await?;
    // Alpaca frame coordinates are in binned pixels
    camera.set_start_x(request.pos_x / bin).await?;
    camera.set_start_y(request.pos_y / bin).await?;
    camera.set_num_x(request.width / bin).await?;
    camera.set_num_y(request.height / bin).await?;

    camera
        .start_exposure(request.exposure_time, true)
        .await
        .map_err(|e| e.to_string())?;

    let deadline = Duration::from_secs_f64(request.exposure_time.max(0.0)) + IMAGE_WAIT_GRACE;
    let started = tokio::time::Instant::now();
    loop {
        match camera.image_ready().await {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => debug!("Image readiness poll: {}", e),
        }
        if started.elapsed() > deadline {
            return Err(format!("Image was not ready within {:?}", deadline));
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    let data = camera.image_bytes().await.map_err(|e| e.to_string())?;
    tokio::fs::write(&request.image_path, &data)
        .await
        .map_err(|e| format!("Could not write {}: {}", request.image_path, e))?;
    Ok(request.image_path)
}

#[async_trait]
impl AlpacaDriver for AlpacaCameraDriver {
    async fn open(&self, base_url: &str, device_number: u32) -> Result<(), AlpacaError> {
        let camera = Arc::new(CameraClient::from_server(base_url, device_number));
        camera.connect().await?;
        *self.camera.write().await = Some(camera);
        Ok(())
    }

    async fn close(&self) {
        if let Some(camera) = self.camera.write().await.take() {
            if let Err(e) = camera.disconnect().await {
                debug!("Camera disconnect: {}", e);
            }
        }
        *self.last_state.lock().await = None;
    }

    async fn initial_config(&self, device: &str, cache: &PropertyCache, events: &SharedEventBus) {
        let Some(camera) = self.client().await else {
            return;
        };
        store_int(cache, events, device, "CCD_INFO.CCD_MAX_X", camera.camera_x_size().await).await;
        store_int(cache, events, device, "CCD_INFO.CCD_MAX_Y", camera.camera_y_size().await).await;
        store_number(
            cache,
            events,
            device,
            "CCD_INFO.CCD_PIXEL_SIZE_X",
            camera.pixel_size_x().await,
        )
        .await;
        store_number(
            cache,
            events,
            device,
            "CCD_INFO.CCD_PIXEL_SIZE_Y",
            camera.pixel_size_y().await,
        )
        .await;
        store_switch(cache, events, device, "CAN_FAST", camera.can_fast_readout().await).await;
        store_switch(
            cache,
            events,
            device,
            "CAN_SET_CCD_TEMPERATURE",
            camera.can_set_ccd_temperature().await,
        )
        .await;
        store_int(cache, events, device, "CCD_BINNING.HOR_BIN_MAX", camera.max_bin_x().await)
            .await;
        store_int(cache, events, device, "CCD_BINNING.VER_BIN_MAX", camera.max_bin_y().await)
            .await;
        store_int(cache, events, device, "CCD_BINNING.HOR_BIN", camera.bin_x().await).await;
        store_int(cache, events, device, "CCD_BINNING.VER_BIN", camera.bin_y().await).await;
        store_int(cache, events, device, "CCD_FRAME.X", camera.start_x().await).await;
        store_int(cache, events, device, "CCD_FRAME.Y", camera.start_y().await).await;
        store_int(cache, events, device, "CCD_FRAME.WIDTH", camera.num_x().await).await;
        store_int(cache, events, device, "CCD_FRAME.HEIGHT", camera.num_y().await).await;
    }

    async fn poll(&self, device: &str, cache: &PropertyCache, events: &SharedEventBus) {
        let Some(camera) = self.client().await else {
            return;
        };

        if let Ok(state) = camera.camera_state().await {
            store(
                cache,
                events,
                device,
                "CAMERA.STATE",
                PropertyValue::Number(state as i32 as f64),
            )
            .await;
            let mut last = self.last_state.lock().await;
            if *last != Some(state) {
                *last = Some(state);
                events.publish(DeviceEvent::Message(format!("Camera {}", state)));
            }
        }

        store_number(
            cache,
            events,
            device,
            "CCD_TEMPERATURE.CCD_TEMPERATURE_VALUE",
            camera.ccd_temperature().await,
        )
        .await;
        store_switch(cache, events, device, "CCD_COOLER.COOLER_ON", camera.cooler_on().await)
            .await;
        store_number(
            cache,
            events,
            device,
            "CCD_COOLER_POWER.CCD_COOLER_VALUE",
            camera.cooler_power().await,
        )
        .await;
        store_switch(cache, events, device, "IMAGEREADY", camera.image_ready().await).await;
        store_number(
            cache,
            events,
            device,
            "CCD_EXPOSURE.CCD_EXPOSURE_VALUE",
            camera.last_exposure_duration().await,
        )
        .await;
        if let Ok(fast) = camera.fast_readout().await {
            store(
                cache,
                events,
                device,
                "READOUT_QUALITY.QUALITY_LOW",
                PropertyValue::Switch(fast),
            )
            .await;
            store(
                cache,
                events,
                device,
                "READOUT_QUALITY.QUALITY_HIGH",
                PropertyValue::Switch(!fast),
            )
            .await;
        }
    }
}

/// CCD camera behind an Alpaca server
pub struct AlpacaCamera {
    core: AlpacaAdapterCore,
    driver: Arc<AlpacaCameraDriver>,
}

impl AlpacaCamera {
    pub fn new(cache: PropertyCache, events: SharedEventBus, pool: WorkerPool) -> Self {
        let driver = Arc::new(AlpacaCameraDriver::new(pool.clone()));
        let core = AlpacaAdapterCore::new(driver.clone(), cache, events, pool);
        Self { core, driver }
    }
}

#[async_trait]
impl DeviceTransport for AlpacaCamera {
    fn framework(&self) -> Framework {
        Framework::Alpaca
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
        match (key, &value) {
            ("CCD_TEMPERATURE.CCD_TEMPERATURE_VALUE", PropertyValue::Number(v)) => {
                self.driver.set_cooler_temperature(*v).await
            }
            ("CCD_COOLER.COOLER_ON", PropertyValue::Switch(v)) => self.driver.set_cooler(*v).await,
            ("CCD_COOLER.COOLER_OFF", PropertyValue::Switch(v)) => {
                self.driver.set_cooler(!*v).await
            }
            ("READOUT_QUALITY.QUALITY_LOW", PropertyValue::Switch(v)) => {
                self.driver.set_fast_readout(*v).await
            }
            ("READOUT_QUALITY.QUALITY_HIGH", PropertyValue::Switch(v)) => {
                self.driver.set_fast_readout(!*v).await
            }
            _ => {
                debug!("No Alpaca camera endpoint for {}", key);
                false
            }
        }
    }
}

#[async_trait]
impl CameraTransport for AlpacaCamera {
    async fn expose(&self, request: ExposureRequest) -> bool {
        self.driver.start_exposure(request, &self.core.events).await
    }

    async fn abort_exposure(&self) -> bool {
        self.driver.abort().await
    }

    async fn set_cooler(&self, on: bool) -> bool {
        self.driver.set_cooler(on).await
    }

    async fn set_cooler_temperature(&self, temperature: f64) -> bool {
        self.driver.set_cooler_temperature(temperature).await
    }

    async fn set_download_mode(&self, fast: bool) -> bool {
        self.driver.set_fast_readout(fast).await
    }
}

// --- Dome ---

pub struct AlpacaDomeDriver {
    dome: RwLock<Option<Arc<DomeClient>>>,
    tracker: Arc<SlewTracker>,
}

impl AlpacaDomeDriver {
    fn new(tracker: Arc<SlewTracker>) -> Self {
        Self {
            dome: RwLock::new(None),
            tracker,
        }
    }

    async fn client(&self) -> Option<Arc<DomeClient>> {
        self.dome.read().await.clone()
    }

    async fn slew(&self, azimuth: f64) -> bool {
        let Some(dome) = self.client().await else {
            return false;
        };
        match dome.slew_to_azimuth(azimuth).await {
            Ok(()) => {
                self.tracker.mark_slewing();
                true
            }
            Err(e) => {
                error!("Dome slew failed: {}", e);
                false
            }
        }
    }

    async fn open_shutter(&self) -> bool {
        let Some(dome) = self.client().await else {
            return false;
        };
        match dome.open_shutter().await {
            Ok(()) => true,
            Err(e) => {
                error!("Could not open shutter: {}", e);
                false
            }
        }
    }

    async fn close_shutter(&self) -> bool {
        let Some(dome) = self.client().await else {
            return false;
        };
        match dome.close_shutter().await {
            Ok(()) => true,
            Err(e) => {
                error!("Could not close shutter: {}", e);
                false
            }
        }
    }

    async fn abort_slew(&self) -> bool {
        let Some(dome) = self.client().await else {
            return false;
        };
        match dome.abort_slew().await {
            Ok(()) => true,
            Err(e) => {
                error!("Could not abort slew: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl AlpacaDriver for AlpacaDomeDriver {
    async fn open(&self, base_url: &str, device_number: u32) -> Result<(), AlpacaError> {
        let dome = Arc::new(DomeClient::from_server(base_url, device_number));
        dome.connect().await?;
        *self.dome.write().await = Some(dome);
        Ok(())
    }

    async fn close(&self) {
        if let Some(dome) = self.dome.write().await.take() {
            if let Err(e) = dome.disconnect().await {
                debug!("Dome disconnect: {}", e);
            }
        }
        self.tracker.reset().await;
    }

    async fn initial_config(&self, _device: &str, _cache: &PropertyCache, _events: &SharedEventBus) {
    }

    async fn poll(&self, device: &str, cache: &PropertyCache, events: &SharedEventBus) {
        let Some(dome) = self.client().await else {
            return;
        };

        let azimuth = dome.azimuth().await;
        let slewing = dome.slewing().await;
        if let Ok(az) = azimuth {
            store(
                cache,
                events,
                device,
                "ABS_DOME_POSITION.DOME_ABSOLUTE_POSITION",
                PropertyValue::Number(az),
            )
            .await;
            if let Ok(moving) = slewing {
                store(
                    cache,
                    events,
                    device,
                    "DOME_MOTION.SLEWING",
                    PropertyValue::Switch(moving),
                )
                .await;
                self.tracker.observe(az, moving).await;
            }
        }

        store_switch(cache, events, device, "HOME.POSITION", dome.at_home().await).await;
        store_switch(cache, events, device, "PARK.POSITION", dome.at_park().await).await;
        if let Ok(status) = dome.shutter_status().await {
            store(
                cache,
                events,
                device,
                "DOME_SHUTTER.SHUTTER_OPEN",
                PropertyValue::Switch(status == ShutterStatus::Open),
            )
            .await;
        }
    }
}

/// Dome behind an Alpaca server
pub struct AlpacaDome {
    core: AlpacaAdapterCore,
    driver: Arc<AlpacaDomeDriver>,
}

impl AlpacaDome {
    pub fn new(cache: PropertyCache, events: SharedEventBus, pool: WorkerPool) -> Self {
        let tracker = Arc::new(SlewTracker::new(events.clone()));
        let driver = Arc::new(AlpacaDomeDriver::new(tracker));
        let core = AlpacaAdapterCore::new(driver.clone(), cache, events, pool);
        Self { core, driver }
    }
}

#[async_trait]
impl DeviceTransport for AlpacaDome {
    fn framework(&self) -> Framework {
        Framework::Alpaca
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
        match (key, &value) {
            ("DOME_SHUTTER.SHUTTER_OPEN", PropertyValue::Switch(true)) => {
                self.driver.open_shutter().await
            }
            ("DOME_SHUTTER.SHUTTER_OPEN", PropertyValue::Switch(false)) => {
                self.driver.close_shutter().await
            }
            ("DOME_SHUTTER.SHUTTER_CLOSE", PropertyValue::Switch(true)) => {
                self.driver.close_shutter().await
            }
            ("ABS_DOME_POSITION.DOME_ABSOLUTE_POSITION", PropertyValue::Number(az)) => {
                self.driver.slew(*az).await
            }
            ("DOME_ABORT_MOTION.ABORT", PropertyValue::Switch(true)) => {
                self.driver.abort_slew().await
            }
            _ => {
                debug!("No Alpaca dome endpoint for {}", key);
                false
            }
        }
    }
}

#[async_trait]
impl DomeTransport for AlpacaDome {
    async fn slew_to_alt_az(&self, _altitude: f64, azimuth: f64) -> bool {
        self.driver.slew(azimuth).await
    }

    async fn set_settling_time(&self, duration: Duration) {
        self.driver.tracker.set_settling_time(duration).await;
    }

    async fn settling_time(&self) -> Duration {
        self.driver.tracker.settling_time().await
    }
}

// --- Flat panel cover ---

pub struct AlpacaCoverDriver {
    cover: RwLock<Option<Arc<CoverClient>>>,
    /// Brightness used when the light is switched on without an explicit
    /// value, refreshed by the poll
    last_brightness: AtomicI32,
}

impl AlpacaCoverDriver {
    fn new() -> Self {
        Self {
            cover: RwLock::new(None),
            last_brightness: AtomicI32::new(255),
        }
    }

    async fn client(&self) -> Option<Arc<CoverClient>> {
        self.cover.read().await.clone()
    }

    async fn set_park(&self, park: bool) -> bool {
        let Some(cover) = self.client().await else {
            return false;
        };
        let result = if park {
            cover.close_cover().await
        } else {
            cover.open_cover().await
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                error!("Could not move cover: {}", e);
                false
            }
        }
    }

    async fn switch_light(&self, on: bool) -> bool {
        let Some(cover) = self.client().await else {
            return false;
        };
        let result = if on {
            cover
                .calibrator_on(self.last_brightness.load(Ordering::SeqCst))
                .await
        } else {
            cover.calibrator_off().await
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                error!("Could not switch calibrator light: {}", e);
                false
            }
        }
    }

    async fn set_brightness(&self, value: f64) -> bool {
        let Some(cover) = self.client().await else {
            return false;
        };
        let brightness = value.round() as i32;
        match cover.calibrator_on(brightness).await {
            Ok(()) => {
                self.last_brightness.store(brightness, Ordering::SeqCst);
                true
            }
            Err(e) => {
                error!("Could not set calibrator brightness: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl AlpacaDriver for AlpacaCoverDriver {
    async fn open(&self, base_url: &str, device_number: u32) -> Result<(), AlpacaError> {
        let cover = Arc::new(CoverClient::from_server(base_url, device_number));
        cover.connect().await?;
        *self.cover.write().await = Some(cover);
        Ok(())
    }

    async fn close(&self) {
        if let Some(cover) = self.cover.write().await.take() {
            if let Err(e) = cover.disconnect().await {
                debug!("Cover disconnect: {}", e);
            }
        }
    }

    async fn initial_config(&self, _device: &str, _cache: &PropertyCache, _events: &SharedEventBus) {
    }

    async fn poll(&self, device: &str, cache: &PropertyCache, events: &SharedEventBus) {
        let Some(cover) = self.client().await else {
            return;
        };

        if let Ok(state) = cover.cover_state().await {
            store(
                cache,
                events,
                device,
                "CAP_PARK.PARK",
                PropertyValue::Switch(state == CoverStatus::Closed),
            )
            .await;
            store(
                cache,
                events,
                device,
                "CAP_PARK.UNPARK",
                PropertyValue::Switch(state == CoverStatus::Open),
            )
            .await;
        }

        if let Ok(state) = cover.calibrator_state().await {
            store(
                cache,
                events,
                device,
                "FLAT_LIGHT_CONTROL.FLAT_LIGHT_ON",
                PropertyValue::Switch(state == CalibratorStatus::Ready),
            )
            .await;
        }

        if let Ok(brightness) = cover.brightness().await {
            self.last_brightness.store(brightness, Ordering::SeqCst);
            store(
                cache,
                events,
                device,
                "FLAT_LIGHT_INTENSITY.FLAT_LIGHT_INTENSITY_VALUE",
                PropertyValue::Number(brightness as f64),
            )
            .await;
        }
    }
}

/// Flat panel cover behind an Alpaca server
pub struct AlpacaCover {
    core: AlpacaAdapterCore,
    driver: Arc<AlpacaCoverDriver>,
}

impl AlpacaCover {
    pub fn new(cache: PropertyCache, events: SharedEventBus, pool: WorkerPool) -> Self {
        let driver = Arc::new(AlpacaCoverDriver::new());
        let core = AlpacaAdapterCore::new(driver.clone(), cache, events, pool);
        Self { core, driver }
    }
}

#[async_trait]
impl DeviceTransport for AlpacaCover {
    fn framework(&self) -> Framework {
        Framework::Alpaca
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
        match (key, &value) {
            ("CAP_PARK.PARK", PropertyValue::Switch(true)) => self.driver.set_park(true).await,
            ("CAP_PARK.UNPARK", PropertyValue::Switch(true)) => self.driver.set_park(false).await,
            ("FLAT_LIGHT_CONTROL.FLAT_LIGHT_ON", PropertyValue::Switch(v)) => {
                self.driver.switch_light(*v).await
            }
            ("FLAT_LIGHT_CONTROL.FLAT_LIGHT_OFF", PropertyValue::Switch(true)) => {
                self.driver.switch_light(false).await
            }
            ("FLAT_LIGHT_INTENSITY.FLAT_LIGHT_INTENSITY_VALUE", PropertyValue::Number(v)) => {
                self.driver.set_brightness(*v).await
            }
            _ => {
                debug!("No Alpaca cover endpoint for {}", key);
                false
            }
        }
    }
}

#[async_trait]
impl CoverTransport for AlpacaCover {
    async fn set_park(&self, park: bool) -> bool {
        self.driver.set_park(park).await
    }

    async fn switch_light(&self, on: bool) -> bool {
        self.driver.switch_light(on).await
    }

    async fn set_brightness(&self, value: f64) -> bool {
        self.driver.set_brightness(value).await
    }
}

// --- Weather sensor ---

pub struct AlpacaWeatherDriver {
    conditions: RwLock<Option<Arc<ConditionsClient>>>,
}

impl AlpacaWeatherDriver {
    fn new() -> Self {
        Self {
            conditions: RwLock::new(None),
        }
    }

    async fn client(&self) -> Option<Arc<ConditionsClient>> {
        self.conditions.read().await.clone()
    }
}

#[async_trait]
impl AlpacaDriver for AlpacaWeatherDriver {
    async fn open(&self, base_url: &str, device_number: u32) -> Result<(), AlpacaError> {
        let conditions = Arc::new(ConditionsClient::from_server(base_url, device_number));
        conditions.connect().await?;
        *self.conditions.write().await = Some(conditions);
        Ok(())
    }

    async fn close(&self) {
        if let Some(conditions) = self.conditions.write().await.take() {
            if let Err(e) = conditions.disconnect().await {
                debug!("Weather disconnect: {}", e);
            }
        }
    }

    async fn initial_config(&self, _device: &str, _cache: &PropertyCache, _events: &SharedEventBus) {
    }

    async fn poll(&self, device: &str, cache: &PropertyCache, events: &SharedEventBus) {
        let Some(conditions) = self.client().await else {
            return;
        };

        let temperature = conditions.temperature().await;
        let humidity = conditions.humidity().await;
        store_number(
            cache,
            events,
            device,
            "WEATHER_PARAMETERS.WEATHER_TEMPERATURE",
            temperature.clone(),
        )
        .await;
        store_number(
            cache,
            events,
            device,
            "WEATHER_PARAMETERS.WEATHER_HUMIDITY",
            humidity.clone(),
        )
        .await;

        // stations without a dew point sensor get the Magnus estimate
        match conditions.dew_point().await {
            Ok(v) => {
                store(
                    cache,
                    events,
                    device,
                    "WEATHER_PARAMETERS.WEATHER_DEWPOINT",
                    PropertyValue::Number(v),
                )
                .await;
            }
            Err(_) => {
                if let (Ok(t), Ok(h)) = (&temperature, &humidity) {
                    store(
                        cache,
                        events,
                        device,
                        "WEATHER_PARAMETERS.WEATHER_DEWPOINT",
                        PropertyValue::Number(dew_point(*t, *h)),
                    )
                    .await;
                }
            }
        }

        store_number(
            cache,
            events,
            device,
            "WEATHER_PARAMETERS.WEATHER_PRESSURE",
            conditions.pressure().await,
        )
        .await;
        store_number(
            cache,
            events,
            device,
            "WEATHER_PARAMETERS.WEATHER_CLOUD_COVER",
            conditions.cloud_cover().await,
        )
        .await;
        store_number(
            cache,
            events,
            device,
            "WEATHER_PARAMETERS.WEATHER_RAIN_HOUR",
            conditions.rain_rate().await,
        )
        .await;
        store_number(
            cache,
            events,
            device,
            "WEATHER_PARAMETERS.WEATHER_WIND_SPEED",
            conditions.wind_speed().await,
        )
        .await;
        store_number(
            cache,
            events,
            device,
            "WEATHER_PARAMETERS.WEATHER_WIND_GUST",
            conditions.wind_gust().await,
        )
        .await;
        store_number(
            cache,
            events,
            device,
            "WEATHER_PARAMETERS.WEATHER_WIND_DIR",
            conditions.wind_direction().await,
        )
        .await;
        store_number(
            cache,
            events,
            device,
            "SKY_QUALITY.SKY_BRIGHTNESS",
            conditions.sky_brightness().await,
        )
        .await;
        store_number(
            cache,
            events,
            device,
            "SKY_QUALITY.SKY_QUALITY",
            conditions.sky_quality().await,
        )
        .await;
        store_number(
            cache,
            events,
            device,
            "SKY_QUALITY.SKY_TEMPERATURE",
            conditions.sky_temperature().await,
        )
        .await;
    }
}

/// Weather station behind an Alpaca server. Readings only.
pub struct AlpacaWeather {
    core: AlpacaAdapterCore,
}

impl AlpacaWeather {
    pub fn new(cache: PropertyCache, events: SharedEventBus, pool: WorkerPool) -> Self {
        let driver = Arc::new(AlpacaWeatherDriver::new());
        let core = AlpacaAdapterCore::new(driver, cache, events, pool);
        Self { core }
    }
}

#[async_trait]
impl DeviceTransport for AlpacaWeather {
    fn framework(&self) -> Framework {
        Framework::Alpaca
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

    async fn send_property(&self, key: &str, _value: PropertyValue) -> bool {
        debug!("Weather station accepts no commands ({})", key);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBus;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::broadcast;

    struct CountingDriver {
        opens: AtomicUsize,
        closes: AtomicUsize,
        configs: AtomicUsize,
        polls: AtomicUsize,
        fail_open: AtomicBool,
    }

    impl CountingDriver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                configs: AtomicUsize::new(0),
                polls: AtomicUsize::new(0),
                fail_open: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl AlpacaDriver for CountingDriver {
        async fn open(&self, _base_url: &str, _device_number: u32) -> Result<(), AlpacaError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail_open.load(Ordering::SeqCst) {
                return Err(AlpacaError::NotConnected);
            }
            Ok(())
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }

        async fn initial_config(
            &self,
            _device: &str,
            _cache: &PropertyCache,
            _events: &SharedEventBus,
        ) {
            self.configs.fetch_add(1, Ordering::SeqCst);
        }

        async fn poll(&self, _device: &str, _cache: &PropertyCache, _events: &SharedEventBus) {
            self.polls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn drain(rx: &mut broadcast::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_device_name_suffix_selects_device_number() {
        let core = AlpacaAdapterCore::new(
            CountingDriver::new(),
            PropertyCache::new(),
            Arc::new(EventBus::default()),
            WorkerPool::default(),
        );

        core.set_device_name("FlipFlat:3").await;
        assert_eq!(core.device_name().await, "FlipFlat");
        assert_eq!(core.device_number(), 3);

        // a bare name keeps the previously selected number
        core.set_device_name("FlipFlat").await;
        assert_eq!(core.device_name().await, "FlipFlat");
        assert_eq!(core.device_number(), 3);

        // a suffix that is not a number stays part of the name
        core.set_device_name("Dome:main").await;
        assert_eq!(core.device_name().await, "Dome:main");
        assert_eq!(core.device_number(), 3);
    }

    #[tokio::test]
    async fn test_start_without_device_name_fails() {
        let driver = CountingDriver::new();
        let core = AlpacaAdapterCore::new(
            driver.clone(),
            PropertyCache::new(),
            Arc::new(EventBus::default()),
            WorkerPool::default(),
        );
        assert!(!core.start().await);
        assert_eq!(driver.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_open_reports_false_and_stays_silent() {
        let driver = CountingDriver::new();
        driver.fail_open.store(true, Ordering::SeqCst);
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let core = AlpacaAdapterCore::new(
            driver.clone(),
            PropertyCache::new(),
            bus,
            WorkerPool::default(),
        );
        core.set_device_name("CCD:0").await;

        assert!(!core.start().await);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(driver.configs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_lifecycle_events_and_poll_ticks() {
        let driver = CountingDriver::new();
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let cache = PropertyCache::new();
        let core = AlpacaAdapterCore::new(
            driver.clone(),
            cache.clone(),
            bus,
            WorkerPool::default(),
        )
        .with_poll_interval(Duration::from_millis(50));
        core.set_device_name("Pegasus Astro:1").await;

        assert!(core.start().await);
        assert_eq!(driver.configs.load(Ordering::SeqCst), 1);
        assert_eq!(
            drain(&mut rx),
            vec![
                DeviceEvent::ServerConnected,
                DeviceEvent::DeviceConnected {
                    name: "Pegasus Astro".to_string()
                }
            ]
        );

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(driver.polls.load(Ordering::SeqCst) >= 3);

        cache
            .set("CAP_PARK.PARK", PropertyValue::Switch(true))
            .await;
        assert!(core.stop().await);
        assert_eq!(driver.closes.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty().await);
        assert_eq!(
            drain(&mut rx),
            vec![
                DeviceEvent::DeviceDisconnected {
                    name: "Pegasus Astro".to_string()
                },
                DeviceEvent::ServerDisconnected {
                    devices: vec!["Pegasus Astro".to_string()]
                }
            ]
        );

        // a second stop succeeds without another close or event
        assert!(core.stop().await);
        assert_eq!(driver.closes.load(Ordering::SeqCst), 1);
        assert!(drain(&mut rx).is_empty());

        // let a cycle already handed to the pool drain, then verify the
        // ticker is really gone
        tokio::time::sleep(Duration::from_millis(100)).await;
        let polls_after_stop = driver.polls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(driver.polls.load(Ordering::SeqCst), polls_after_stop);
    }

    #[tokio::test]
    async fn test_store_publishes_only_changes() {
        let cache = PropertyCache::new();
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();

        store(&cache, &bus, "Dome", "HOME.POSITION", PropertyValue::Switch(false)).await;
        store(&cache, &bus, "Dome", "HOME.POSITION", PropertyValue::Switch(false)).await;
        store(&cache, &bus, "Dome", "HOME.POSITION", PropertyValue::Switch(true)).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(
            e,
            DeviceEvent::PropertyChanged { device, key }
                if device == "Dome" && key == "HOME.POSITION"
        )));
    }
}
