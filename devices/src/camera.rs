//! Camera facade
//!
//! `expose` validates against the schema the camera reported into the
//! cache, computes the centered sub-frame and hands the request to the
//! transport. The return value is acceptance only; `Exposed` and `Saved`
//! on the bus signal the finished image.

use crate::alpaca_adapter::AlpacaCamera;
use crate::cache::PropertyCache;
use crate::event::{DeviceEvent, EventBus, SharedEventBus};
use crate::facade::{FacadeCore, FacadeState};
use crate::indi_adapter::IndiCamera;
use crate::transport::{CameraTransport, ExposureRequest, Framework};
use crate::worker::WorkerPool;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

pub struct Camera {
    core: FacadeCore<dyn CameraTransport>,
}

impl Camera {
    pub fn new(pool: WorkerPool) -> Self {
        let cache = PropertyCache::new();
        let events: SharedEventBus = Arc::new(EventBus::default());
        let indi = Arc::new(IndiCamera::new(cache.clone(), events.clone(), pool.clone()));
        let alpaca = Arc::new(AlpacaCamera::new(cache.clone(), events.clone(), pool));
        Self {
            core: FacadeCore::new(
                cache,
                events,
                Some(indi as Arc<dyn CameraTransport>),
                Some(alpaca as Arc<dyn CameraTransport>),
            ),
        }
    }

    #[cfg(test)]
    fn with_transports(
        indi: Option<Arc<dyn CameraTransport>>,
        alpaca: Option<Arc<dyn CameraTransport>>,
    ) -> Self {
        Self {
            core: FacadeCore::new(
                PropertyCache::new(),
                Arc::new(EventBus::default()),
                indi,
                alpaca,
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

    /// Whether a sub-frame of `percent` can be requested: the value must
    /// be inside [10, 100] and the camera must have reported a frame schema
    pub async fn can_sub_frame(&self, percent: i32) -> bool {
        if !(10..=100).contains(&percent) {
            return false;
        }
        let cache = self.core.cache();
        cache.contains("CCD_FRAME.X").await && cache.contains("CCD_FRAME.Y").await
    }

    /// Whether `binning` can be requested: inside [1, 4] and the camera
    /// reported a binning schema
    pub async fn can_binning(&self, binning: i32) -> bool {
        (1..=4).contains(&binning) && self.core.cache().contains("CCD_BINNING.HOR_BIN").await
    }

    /// Centered sub-frame rectangle `(pos_x, pos_y, width, height)` in
    /// unbinned pixels for `percent` of the sensor, from the cached chip
    /// dimensions. Out-of-range percentages fall back to the full frame.
    /// `None` while the chip dimensions are unknown.
    pub async fn calc_sub_frame(&self, percent: i32) -> Option<(i32, i32, i32, i32)> {
        let cache = self.core.cache();
        let max_x = cache.number("CCD_INFO.CCD_MAX_X").await? as i32;
        let max_y = cache.number("CCD_INFO.CCD_MAX_Y").await? as i32;

        if !(10..=100).contains(&percent) {
            return Some((0, 0, max_x, max_y));
        }
        let width = max_x * percent / 100;
        let height = max_y * percent / 100;
        let pos_x = (max_x - width) / 2;
        let pos_y = (max_y - height) / 2;
        Some((pos_x, pos_y, width, height))
    }

    /// Start an exposure.
    ///
    /// Returns acceptance; completion is the `Saved` event carrying the
    /// image path. Parameters outside what the camera reported it can do
    /// are rejected before anything reaches the transport.
    pub async fn expose(
        &self,
        image_path: &str,
        exposure_time: f64,
        binning: i32,
        sub_frame_percent: i32,
        fast_readout: bool,
    ) -> bool {
        let Some(adapter) = self.core.active().await else {
            return false;
        };
        if image_path.is_empty() {
            warn!("Cannot expose without an image path");
            return false;
        }
        if !self.can_binning(binning).await {
            warn!("Binning {} not supported", binning);
            return false;
        }
        if !self.can_sub_frame(sub_frame_percent).await {
            warn!("Sub-frame {}% not supported", sub_frame_percent);
            return false;
        }
        let Some((pos_x, pos_y, width, height)) = self.calc_sub_frame(sub_frame_percent).await
        else {
            warn!("Chip dimensions unknown, cannot compute the frame");
            return false;
        };

        adapter
            .expose(ExposureRequest {
                image_path: image_path.to_string(),
                exposure_time,
                binning,
                fast_readout,
                pos_x,
                pos_y,
                width,
                height,
            })
            .await
    }

    /// Best-effort abort of a running exposure
    pub async fn abort(&self) -> bool {
        let Some(adapter) = self.core.active().await else {
            return false;
        };
        adapter.abort_exposure().await
    }

    pub async fn send_cooler_switch(&self, on: bool) -> bool {
        let Some(adapter) = self.core.active().await else {
            return false;
        };
        adapter.set_cooler(on).await
    }

    pub async fn send_cooler_temp(&self, temperature: f64) -> bool {
        let Some(adapter) = self.core.active().await else {
            return false;
        };
        adapter.set_cooler_temperature(temperature).await
    }

    /// Switch between fast and high-quality readout. Silently refused for
    /// cameras that did not report the capability.
    pub async fn send_download_mode(&self, fast: bool) -> bool {
        let Some(adapter) = self.core.active().await else {
            return false;
        };
        if self.core.cache().switch("CAN_FAST").await != Some(true) {
            return false;
        }
        adapter.set_download_mode(fast).await
    }
}
