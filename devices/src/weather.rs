//! Weather station facade
//!
//! Purely passive: readings arrive through the transport into the cache
//! and are exposed as typed getters. There is nothing to command.

use crate::alpaca_adapter::AlpacaWeather;
use crate::cache::PropertyCache;
use crate::event::{DeviceEvent, EventBus, SharedEventBus};
use crate::facade::{FacadeCore, FacadeState};
use crate::indi_adapter::IndiWeather;
use crate::transport::{DeviceTransport, Framework};
use crate::worker::WorkerPool;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Dew point in degrees Celsius from air temperature (degrees Celsius)
/// and relative humidity (percent), Magnus approximation.
///
/// Inputs outside the validity range of the approximation (temperature
/// beyond [-40, 80], humidity beyond [0, 100]) yield 0.0.
pub fn dew_point(temperature: f64, humidity: f64) -> f64 {
    const A: f64 = 17.27;
    const B: f64 = 237.7;

    if !(-40.0..=80.0).contains(&temperature) || !(0.0..=100.0).contains(&humidity) {
        return 0.0;
    }
    let alpha = A * temperature / (B + temperature) + (humidity / 100.0).ln();
    B * alpha / (A - alpha)
}

pub struct Weather {
    core: FacadeCore<dyn DeviceTransport>,
}

impl Weather {
    pub fn new(pool: WorkerPool) -> Self {
        let cache = PropertyCache::new();
        let events: SharedEventBus = Arc::new(EventBus::default());
        let indi = Arc::new(IndiWeather::new(cache.clone(), events.clone()));
        let alpaca = Arc::new(AlpacaWeather::new(cache.clone(), events.clone(), pool));
        Self {
            core: FacadeCore::new(
                cache,
                events,
                Some(indi as Arc<dyn DeviceTransport>),
                Some(alpaca as Arc<dyn DeviceTransport>),
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

    pub async fn temperature(&self) -> Option<f64> {
        self.core
            .cache()
            .number("WEATHER_PARAMETERS.WEATHER_TEMPERATURE")
            .await
    }

    pub async fn humidity(&self) -> Option<f64> {
        self.core
            .cache()
            .number("WEATHER_PARAMETERS.WEATHER_HUMIDITY")
            .await
    }

    pub async fn pressure(&self) -> Option<f64> {
        self.core
            .cache()
            .number("WEATHER_PARAMETERS.WEATHER_PRESSURE")
            .await
    }

    /// Dew point as reported by the station, or the Magnus estimate when
    /// the station only delivers temperature and humidity
    pub async fn dew_point(&self) -> Option<f64> {
        if let Some(v) = self
            .core
            .cache()
            .number("WEATHER_PARAMETERS.WEATHER_DEWPOINT")
            .await
        {
            return Some(v);
        }
        match (self.temperature().await, self.humidity().await) {
            (Some(t), Some(h)) => Some(dew_point(t, h)),
            _ => None,
        }
    }

    pub async fn cloud_cover(&self) -> Option<f64> {
        self.core
            .cache()
            .number("WEATHER_PARAMETERS.WEATHER_CLOUD_COVER")
            .await
    }

    pub async fn wind_speed(&self) -> Option<f64> {
        self.core
            .cache()
            .number("WEATHER_PARAMETERS.WEATHER_WIND_SPEED")
            .await
    }

    pub async fn rain_rate(&self) -> Option<f64> {
        self.core
            .cache()
            .number("WEATHER_PARAMETERS.WEATHER_RAIN_HOUR")
            .await
    }

    pub async fn sky_quality(&self) -> Option<f64> {
        self.core.cache().number("SKY_QUALITY.SKY_QUALITY").await
    }
}
