//! Transport abstraction over device control protocols
//!
//! A facade talks to at most one live transport at a time. The base trait
//! carries connection lifecycle and the uniform property write path;
//! per-device extension traits add the typed commands a facade needs.
//!
//! Command methods return plain booleans. `false` covers rejection by a
//! precondition, a missing property on the device and transport errors
//! alike; the detail goes to the log, and no command is retried here.

use crate::cache::PropertyValue;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Control protocol a transport adapter speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Framework {
    Indi,
    Alpaca,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::Indi => "indi",
            Framework::Alpaca => "alpaca",
        }
    }
}

impl std::fmt::Display for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Framework {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "indi" => Ok(Framework::Indi),
            "alpaca" => Ok(Framework::Alpaca),
            other => Err(format!("Unknown framework: {}", other)),
        }
    }
}

/// Everything a camera needs to know for one exposure
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureRequest {
    /// Destination file for the raw image data
    pub image_path: String,
    /// Exposure time in seconds
    pub exposure_time: f64,
    /// Symmetric binning factor
    pub binning: i32,
    /// Prefer the fast readout path when the camera offers one
    pub fast_readout: bool,
    /// Sub-frame origin in unbinned pixels
    pub pos_x: i32,
    pub pos_y: i32,
    /// Sub-frame size in unbinned pixels
    pub width: i32,
    pub height: i32,
}

/// Connection lifecycle and uniform property access for one device
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Protocol this adapter speaks
    fn framework(&self) -> Framework;

    /// Store the server address for the next connect
    async fn set_host(&self, host: &str, port: u16);

    async fn host(&self) -> (String, u16);

    /// Store the device name this adapter binds to
    async fn set_device_name(&self, name: &str);

    async fn device_name(&self) -> String;

    /// Bring the link up and start feeding the cache.
    /// `false` when no device name is set or the server is unreachable.
    async fn start_communication(&self) -> bool;

    /// Tear the link down and clear the cache. Safe to call repeatedly.
    async fn stop_communication(&self) -> bool;

    /// Write one `GROUP.ELEMENT` value to the device
    async fn send_property(&self, key: &str, value: PropertyValue) -> bool;
}

/// Dome movement commands
#[async_trait]
pub trait DomeTransport: DeviceTransport {
    /// Move the dome to the given azimuth; altitude is advisory for
    /// shutter-tracking domes and ignored by the rest
    async fn slew_to_alt_az(&self, altitude: f64, azimuth: f64) -> bool;

    /// Delay between the end of a slew and `SlewFinished`
    async fn set_settling_time(&self, duration: Duration);

    async fn settling_time(&self) -> Duration;
}

/// Camera exposure and cooling commands
#[async_trait]
pub trait CameraTransport: DeviceTransport {
    /// Start an exposure. `true` means accepted, not completed; completion
    /// is announced by the `Saved` event.
    async fn expose(&self, request: ExposureRequest) -> bool;

    async fn abort_exposure(&self) -> bool;

    async fn set_cooler(&self, on: bool) -> bool;

    async fn set_cooler_temperature(&self, temperature: f64) -> bool;

    /// Select fast or quality readout
    async fn set_download_mode(&self, fast: bool) -> bool;
}

/// Power box port switching
#[async_trait]
pub trait SwitchTransport: DeviceTransport {
    async fn toggle_power_port(&self, port: u8) -> bool;

    async fn toggle_power_boot(&self, port: u8) -> bool;

    async fn toggle_hub_usb(&self) -> bool;

    async fn toggle_port_usb(&self, port: u8) -> bool;

    async fn toggle_auto_dew(&self) -> bool;

    async fn toggle_auto_dew_port(&self, port: char) -> bool;

    /// Manual dew heater duty cycle, 0 to 100
    async fn send_dew_pwm(&self, port: char, value: f64) -> bool;

    /// Adjustable output voltage
    async fn send_adjustable_output(&self, value: f64) -> bool;
}

/// Flat panel cover and light commands
#[async_trait]
pub trait CoverTransport: DeviceTransport {
    /// Park closes the cover, unpark opens it
    async fn set_park(&self, park: bool) -> bool;

    async fn switch_light(&self, on: bool) -> bool;

    async fn set_brightness(&self, value: f64) -> bool;
}
