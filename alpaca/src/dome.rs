//! Alpaca Dome API implementation

use crate::{AlpacaClient, AlpacaDevice, AlpacaDeviceType, AlpacaError, TimeoutConfig};

/// Shutter state enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutterStatus {
    Open = 0,
    Closed = 1,
    Opening = 2,
    Closing = 3,
    Error = 4,
}

impl From<i32> for ShutterStatus {
    fn from(value: i32) -> Self {
        match value {
            0 => ShutterStatus::Open,
            1 => ShutterStatus::Closed,
            2 => ShutterStatus::Opening,
            3 => ShutterStatus::Closing,
            _ => ShutterStatus::Error,
        }
    }
}

impl std::fmt::Display for ShutterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutterStatus::Open => write!(f, "Open"),
            ShutterStatus::Closed => write!(f, "Closed"),
            ShutterStatus::Opening => write!(f, "Opening"),
            ShutterStatus::Closing => write!(f, "Closing"),
            ShutterStatus::Error => write!(f, "Error"),
        }
    }
}

/// Alpaca Dome client
pub struct AlpacaDome {
    client: AlpacaClient,
}

impl AlpacaDome {
    /// Create a new Alpaca dome client
    pub fn new(device: &AlpacaDevice) -> Self {
        assert_eq!(device.device_type, AlpacaDeviceType::Dome);
        Self {
            client: AlpacaClient::with_config(device, TimeoutConfig::for_dome()),
        }
    }

    /// Create from server details
    pub fn from_server(base_url: &str, device_number: u32) -> Self {
        let device = AlpacaDevice {
            device_type: AlpacaDeviceType::Dome,
            device_number,
            server_name: String::new(),
            manufacturer: String::new(),
            device_name: String::new(),
            unique_id: String::new(),
            base_url: base_url.to_string(),
        };
        Self::new(&device)
    }

    /// Get access to the underlying client
    pub fn client(&self) -> &AlpacaClient {
        &self.client
    }

    /// Get the base URL for this device
    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }

    /// Get the device number for this device
    pub fn device_number(&self) -> u32 {
        self.client.device_number()
    }

    // Connection methods

    pub async fn connect(&self) -> Result<(), AlpacaError> {
        self.client.connect().await
    }

    pub async fn disconnect(&self) -> Result<(), AlpacaError> {
        self.client.disconnect().await
    }

    pub async fn is_connected(&self) -> Result<bool, String> {
        self.client.is_connected().await
    }

    // Dome information

    pub async fn name(&self) -> Result<String, String> {
        self.client.get_name().await
    }

    pub async fn description(&self) -> Result<String, String> {
        self.client.get_description().await
    }

    // Position

    pub async fn azimuth(&self) -> Result<f64, String> {
        self.client.get("azimuth").await
    }

    // Status

    pub async fn at_home(&self) -> Result<bool, String> {
        self.client.get("athome").await
    }

    pub async fn at_park(&self) -> Result<bool, String> {
        self.client.get("atpark").await
    }

    pub async fn shutter_status(&self) -> Result<ShutterStatus, String> {
        let status: i32 = self.client.get("shutterstatus").await?;
        Ok(ShutterStatus::from(status))
    }

    pub async fn slewing(&self) -> Result<bool, String> {
        self.client.get("slewing").await
    }

    // Movement commands

    pub async fn abort_slew(&self) -> Result<(), AlpacaError> {
        self.client.put_typed("abortslew", &[]).await
    }

    /// Close the dome shutter
    /// Uses long timeout as shutter operations can take several minutes
    pub async fn close_shutter(&self) -> Result<(), AlpacaError> {
        self.client.put_long("closeshutter", &[]).await
    }

    /// Open the dome shutter
    /// Uses long timeout as shutter operations can take several minutes
    pub async fn open_shutter(&self) -> Result<(), AlpacaError> {
        self.client.put_long("openshutter", &[]).await
    }

    /// Slew dome to azimuth
    /// Uses long timeout as a full rotation can take many minutes
    pub async fn slew_to_azimuth(&self, azimuth: f64) -> Result<(), AlpacaError> {
        self.client
            .put_long("slewtoazimuth", &[("Azimuth", &azimuth.to_string())])
            .await
    }
}
