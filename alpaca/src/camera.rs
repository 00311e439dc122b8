//! Alpaca Camera API implementation

use crate::{AlpacaClient, AlpacaDevice, AlpacaDeviceType, AlpacaError, TimeoutConfig};

/// Camera state enum matching ASCOM CameraState
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Idle = 0,
    Waiting = 1,
    Exposing = 2,
    Reading = 3,
    Download = 4,
    Error = 5,
}

impl From<i32> for CameraState {
    fn from(value: i32) -> Self {
        match value {
            0 => CameraState::Idle,
            1 => CameraState::Waiting,
            2 => CameraState::Exposing,
            3 => CameraState::Reading,
            4 => CameraState::Download,
            _ => CameraState::Error,
        }
    }
}

impl std::fmt::Display for CameraState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraState::Idle => write!(f, "Idle"),
            CameraState::Waiting => write!(f, "Waiting"),
            CameraState::Exposing => write!(f, "Exposing"),
            CameraState::Reading => write!(f, "Reading"),
            CameraState::Download => write!(f, "Downloading"),
            CameraState::Error => write!(f, "Error"),
        }
    }
}

/// Alpaca Camera client
pub struct AlpacaCamera {
    client: AlpacaClient,
}

impl AlpacaCamera {
    /// Create a new Alpaca camera client
    pub fn new(device: &AlpacaDevice) -> Self {
        assert_eq!(device.device_type, AlpacaDeviceType::Camera);
        Self {
            client: AlpacaClient::with_config(device, TimeoutConfig::for_camera()),
        }
    }

    /// Create from server details
    pub fn from_server(base_url: &str, device_number: u32) -> Self {
        let device = AlpacaDevice {
            device_type: AlpacaDeviceType::Camera,
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

    pub async fn name(&self) -> Result<String, String> {
        self.client.get_name().await
    }

    // Sensor geometry

    pub async fn camera_x_size(&self) -> Result<i32, String> {
        self.client.get("cameraxsize").await
    }

    pub async fn camera_y_size(&self) -> Result<i32, String> {
        self.client.get("cameraysize").await
    }

    pub async fn pixel_size_x(&self) -> Result<f64, String> {
        self.client.get("pixelsizex").await
    }

    pub async fn pixel_size_y(&self) -> Result<f64, String> {
        self.client.get("pixelsizey").await
    }

    // Binning

    pub async fn max_bin_x(&self) -> Result<i32, String> {
        self.client.get("maxbinx").await
    }

    pub async fn max_bin_y(&self) -> Result<i32, String> {
        self.client.get("maxbiny").await
    }

    pub async fn bin_x(&self) -> Result<i32, String> {
        self.client.get("binx").await
    }

    pub async fn set_bin_x(&self, bin: i32) -> Result<(), String> {
        self.client.put("binx", &[("BinX", &bin.to_string())]).await
    }

    pub async fn bin_y(&self) -> Result<i32, String> {
        self.client.get("biny").await
    }

    pub async fn set_bin_y(&self, bin: i32) -> Result<(), String> {
        self.client.put("biny", &[("BinY", &bin.to_string())]).await
    }

    // Sub-frame

    pub async fn start_x(&self) -> Result<i32, String> {
        self.client.get("startx").await
    }

    pub async fn set_start_x(&self, value: i32) -> Result<(), String> {
        self.client
            .put("startx", &[("StartX", &value.to_string())])
            .await
    }

    pub async fn start_y(&self) -> Result<i32, String> {
        self.client.get("starty").await
    }

    pub async fn set_start_y(&self, value: i32) -> Result<(), String> {
        self.client
            .put("starty", &[("StartY", &value.to_string())])
            .await
    }

    pub async fn num_x(&self) -> Result<i32, String> {
        self.client.get("numx").await
    }

    pub async fn set_num_x(&self, value: i32) -> Result<(), String> {
        self.client.put("numx", &[("NumX", &value.to_string())]).await
    }

    pub async fn num_y(&self) -> Result<i32, String> {
        self.client.get("numy").await
    }

    pub async fn set_num_y(&self, value: i32) -> Result<(), String> {
        self.client.put("numy", &[("NumY", &value.to_string())]).await
    }

    // Cooling

    pub async fn can_set_ccd_temperature(&self) -> Result<bool, String> {
        self.client.get("cansetccdtemperature").await
    }

    pub async fn ccd_temperature(&self) -> Result<f64, String> {
        self.client.get("ccdtemperature").await
    }

    pub async fn set_ccd_temperature(&self, temperature: f64) -> Result<(), String> {
        self.client
            .put(
                "setccdtemperature",
                &[("SetCCDTemperature", &temperature.to_string())],
            )
            .await
    }

    pub async fn cooler_on(&self) -> Result<bool, String> {
        self.client.get("cooleron").await
    }

    pub async fn set_cooler_on(&self, on: bool) -> Result<(), String> {
        self.client
            .put("cooleron", &[("CoolerOn", &on.to_string())])
            .await
    }

    pub async fn cooler_power(&self) -> Result<f64, String> {
        self.client.get("coolerpower").await
    }

    // Readout

    pub async fn can_fast_readout(&self) -> Result<bool, String> {
        self.client.get("canfastreadout").await
    }

    pub async fn fast_readout(&self) -> Result<bool, String> {
        self.client.get("fastreadout").await
    }

    pub async fn set_fast_readout(&self, fast: bool) -> Result<(), String> {
        self.client
            .put("fastreadout", &[("FastReadout", &fast.to_string())])
            .await
    }

    // Exposure

    pub async fn camera_state(&self) -> Result<CameraState, String> {
        let state: i32 = self.client.get("camerastate").await?;
        Ok(CameraState::from(state))
    }

    pub async fn image_ready(&self) -> Result<bool, String> {
        self.client.get("imageready").await
    }

    pub async fn last_exposure_duration(&self) -> Result<f64, String> {
        self.client.get("lastexposureduration").await
    }

    /// Start an exposure
    /// Uses long timeout as some drivers block until the shutter opens
    pub async fn start_exposure(&self, duration: f64, light: bool) -> Result<(), AlpacaError> {
        self.client
            .put_long(
                "startexposure",
                &[
                    ("Duration", &duration.to_string()),
                    ("Light", &light.to_string()),
                ],
            )
            .await
    }

    pub async fn abort_exposure(&self) -> Result<(), AlpacaError> {
        self.client.put_typed("abortexposure", &[]).await
    }

    pub async fn stop_exposure(&self) -> Result<(), AlpacaError> {
        self.client.put_typed("stopexposure", &[]).await
    }

    /// Download the image in the binary imagebytes format
    /// Uses long timeout as large sensors take minutes to transfer
    pub async fn image_bytes(&self) -> Result<Vec<u8>, AlpacaError> {
        self.client.get_bytes_long("imagearray").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_state_from_i32() {
        assert_eq!(CameraState::from(0), CameraState::Idle);
        assert_eq!(CameraState::from(2), CameraState::Exposing);
        assert_eq!(CameraState::from(4), CameraState::Download);
        assert_eq!(CameraState::from(5), CameraState::Error);
        assert_eq!(CameraState::from(99), CameraState::Error);
    }

    #[test]
    fn test_camera_state_display() {
        assert_eq!(CameraState::Idle.to_string(), "Idle");
        assert_eq!(CameraState::Download.to_string(), "Downloading");
    }
}
