//! Alpaca HTTP Client

use crate::{AlpacaDevice, AlpacaDeviceType};
use reqwest::Client;
use serde::Deserialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Client ID for Alpaca API calls (thread-safe)
static CLIENT_ID: AtomicU32 = AtomicU32::new(1);
static TRANSACTION_ID: AtomicU32 = AtomicU32::new(0);

/// Alpaca-specific error types
///
/// Failed requests are reported to the caller as-is. There is no retry
/// layer; the polling cycle observes the device again on its next tick.
#[derive(Debug, Error)]
pub enum AlpacaError {
    #[error("Connection timeout after {duration_ms}ms during {operation}")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("Connection refused: {url} - {cause}")]
    ConnectionRefused { url: String, cause: String },

    #[error("HTTP error {status}: {message}")]
    HttpError { status: u16, message: String },

    #[error("Device error {code}: {message}")]
    DeviceError { code: i32, message: String },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),
}

impl AlpacaError {
    /// Create a timeout error with operation context
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        AlpacaError::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }
}

impl From<reqwest::Error> for AlpacaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AlpacaError::Timeout {
                operation: "HTTP request".to_string(),
                duration_ms: 30000, // Default timeout - actual tracked in specific methods
            }
        } else if err.is_connect() {
            let url = err
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            AlpacaError::ConnectionRefused {
                url,
                cause: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            AlpacaError::HttpError {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            AlpacaError::RequestFailed(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AlpacaError {
    fn from(err: serde_json::Error) -> Self {
        AlpacaError::ParseError(err.to_string())
    }
}

impl From<AlpacaError> for String {
    fn from(err: AlpacaError) -> Self {
        err.to_string()
    }
}

pub fn get_client_transaction() -> (u32, u32) {
    let client_id = CLIENT_ID.load(Ordering::SeqCst);
    let transaction_id = TRANSACTION_ID.fetch_add(1, Ordering::SeqCst);
    (client_id, transaction_id)
}

/// Get the current client ID
pub fn get_client_id() -> u32 {
    CLIENT_ID.load(Ordering::SeqCst)
}

/// Set the client ID
pub fn set_client_id(id: u32) {
    CLIENT_ID.store(id, Ordering::SeqCst);
}

/// Timeout configuration for different operation types
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Timeout for quick status queries (e.g., is_connected, position)
    pub quick_query_ms: u64,
    /// Timeout for standard operations (e.g., cooler changes, short moves)
    pub standard_operation_ms: u64,
    /// Timeout for long operations (e.g., image download, parking, slewing)
    pub long_operation_ms: u64,
    /// Connection timeout
    pub connect_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            quick_query_ms: 5000,         // 5 seconds for quick queries
            standard_operation_ms: 30000, // 30 seconds for standard operations
            long_operation_ms: 300000,    // 5 minutes for long operations
            connect_ms: 10000,            // 10 seconds for initial connection
        }
    }
}

impl TimeoutConfig {
    /// Timeout config for camera operations
    /// Cameras need longer timeouts for image downloads
    pub fn for_camera() -> Self {
        Self {
            quick_query_ms: 5000,
            standard_operation_ms: 30000,
            long_operation_ms: 600000, // 10 minutes for large image downloads
            connect_ms: 15000,
        }
    }

    /// Timeout config for dome operations
    /// Domes can take a long time to rotate and operate shutters
    pub fn for_dome() -> Self {
        Self {
            quick_query_ms: 5000,
            standard_operation_ms: 60000, // 1 minute for status queries
            long_operation_ms: 300000,    // 5 minutes for shutter operations
            connect_ms: 15000,
        }
    }
}

/// Alpaca API response wrapper
///
/// PUT responses carry no Value member, so it is optional here.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AlpacaResponse<T> {
    pub value: Option<T>,
    #[serde(default)]
    pub client_transaction_id: u32,
    #[serde(default)]
    pub server_transaction_id: u32,
    pub error_number: i32,
    pub error_message: String,
}

impl<T> AlpacaResponse<T> {
    /// Turn the envelope into the carried value, surfacing device errors
    fn into_value(self, endpoint: &str) -> Result<T, AlpacaError> {
        if self.error_number != 0 {
            return Err(AlpacaError::DeviceError {
                code: self.error_number,
                message: self.error_message,
            });
        }
        self.value.ok_or_else(|| {
            AlpacaError::ParseError(format!("Response for '{}' contained no value", endpoint))
        })
    }

    /// Check the envelope of a response that carries no value
    fn into_unit(self) -> Result<(), AlpacaError> {
        if self.error_number != 0 {
            return Err(AlpacaError::DeviceError {
                code: self.error_number,
                message: self.error_message,
            });
        }
        Ok(())
    }
}

/// Alpaca client for communicating with a device
pub struct AlpacaClient {
    http_client: Client,
    base_url: String,
    device_type: AlpacaDeviceType,
    device_number: u32,
    timeout_config: TimeoutConfig,
}

impl AlpacaClient {
    /// Create a new Alpaca client for a device with default configuration
    pub fn new(device: &AlpacaDevice) -> Self {
        Self::with_config(device, TimeoutConfig::default())
    }

    /// Create a new Alpaca client with custom timeout configuration
    pub fn with_config(device: &AlpacaDevice, timeout_config: TimeoutConfig) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_millis(timeout_config.standard_operation_ms))
            .connect_timeout(Duration::from_millis(timeout_config.connect_ms))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            base_url: device.base_url.clone(),
            device_type: device.device_type,
            device_number: device.device_number,
            timeout_config,
        }
    }

    /// Get the base URL for this client
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the device number for this client
    pub fn device_number(&self) -> u32 {
        self.device_number
    }

    /// Get the timeout configuration
    pub fn timeout_config(&self) -> &TimeoutConfig {
        &self.timeout_config
    }

    /// Build the URL for an API endpoint
    fn build_url(&self, endpoint: &str) -> String {
        format!(
            "{}/api/v1/{}/{}/{}",
            self.base_url,
            self.device_type.as_str(),
            self.device_number,
            endpoint
        )
    }

    /// Create a client with a specific timeout for long operations
    fn create_long_timeout_client(&self) -> Result<Client, AlpacaError> {
        Client::builder()
            .timeout(Duration::from_millis(self.timeout_config.long_operation_ms))
            .connect_timeout(Duration::from_millis(self.timeout_config.connect_ms))
            .build()
            .map_err(|e| AlpacaError::RequestFailed(e.to_string()))
    }

    /// Make a GET request with typed error handling
    pub async fn get_typed<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
    ) -> Result<T, AlpacaError> {
        let (client_id, transaction_id) = get_client_transaction();
        let url = format!(
            "{}?ClientID={}&ClientTransactionID={}",
            self.build_url(endpoint),
            client_id,
            transaction_id
        );

        let response = self.http_client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AlpacaError::HttpError {
                status: status.as_u16(),
                message: body,
            });
        }

        let alpaca_response: AlpacaResponse<T> = response.json().await?;
        alpaca_response.into_value(endpoint)
    }

    /// Make a GET request (String errors for device wrappers)
    pub async fn get<T: for<'de> Deserialize<'de>>(&self, endpoint: &str) -> Result<T, String> {
        self.get_typed(endpoint).await.map_err(|e| e.to_string())
    }

    /// Make a PUT request with typed error handling
    pub async fn put_typed(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<(), AlpacaError> {
        let (client_id, transaction_id) = get_client_transaction();
        let url = self.build_url(endpoint);

        let mut form_params: Vec<(&str, String)> = vec![
            ("ClientID", client_id.to_string()),
            ("ClientTransactionID", transaction_id.to_string()),
        ];

        for (key, value) in params {
            form_params.push((key, value.to_string()));
        }

        let response = self.http_client.put(&url).form(&form_params).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AlpacaError::HttpError {
                status: status.as_u16(),
                message: body,
            });
        }

        let alpaca_response: AlpacaResponse<serde_json::Value> = response.json().await?;
        alpaca_response.into_unit()
    }

    /// Make a PUT request (String errors for device wrappers)
    pub async fn put(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<(), String> {
        self.put_typed(endpoint, params)
            .await
            .map_err(|e| e.to_string())
    }

    /// Make a long-running PUT request with extended timeout
    /// Use for operations like slewing, parking, and shutter control
    pub async fn put_long(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<(), AlpacaError> {
        let client = self.create_long_timeout_client()?;
        let (client_id, transaction_id) = get_client_transaction();
        let url = self.build_url(endpoint);

        let mut form_params: Vec<(&str, String)> = vec![
            ("ClientID", client_id.to_string()),
            ("ClientTransactionID", transaction_id.to_string()),
        ];

        for (key, value) in params {
            form_params.push((key, value.to_string()));
        }

        let response = client
            .put(&url)
            .form(&form_params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AlpacaError::timeout(endpoint, self.timeout_config.long_operation_ms)
                } else {
                    e.into()
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AlpacaError::HttpError {
                status: status.as_u16(),
                message: body,
            });
        }

        let alpaca_response: AlpacaResponse<serde_json::Value> = response.json().await?;
        alpaca_response.into_unit()
    }

    /// Make a long-running GET request returning the raw response body
    /// Use for binary image downloads via the imagebytes format
    pub async fn get_bytes_long(&self, endpoint: &str) -> Result<Vec<u8>, AlpacaError> {
        let client = self.create_long_timeout_client()?;
        let (client_id, transaction_id) = get_client_transaction();
        let url = format!(
            "{}?ClientID={}&ClientTransactionID={}",
            self.build_url(endpoint),
            client_id,
            transaction_id
        );

        let response = client
            .get(&url)
            .header("Accept", "application/imagebytes")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AlpacaError::timeout(endpoint, self.timeout_config.long_operation_ms)
                } else {
                    e.into()
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AlpacaError::HttpError {
                status: status.as_u16(),
                message: body,
            });
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    // Common device properties

    /// Check if the device is connected
    pub async fn is_connected(&self) -> Result<bool, String> {
        self.get("connected").await
    }

    /// Connect to the device
    pub async fn connect(&self) -> Result<(), AlpacaError> {
        self.put_typed("connected", &[("Connected", "true")]).await
    }

    /// Disconnect from the device
    pub async fn disconnect(&self) -> Result<(), AlpacaError> {
        self.put_typed("connected", &[("Connected", "false")]).await
    }

    /// Get the device name
    pub async fn get_name(&self) -> Result<String, String> {
        self.get("name").await
    }

    /// Get the device description
    pub async fn get_description(&self) -> Result<String, String> {
        self.get("description").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn test_device(device_type: AlpacaDeviceType) -> AlpacaDevice {
        AlpacaDevice {
            device_type,
            device_number: 3,
            server_name: String::new(),
            manufacturer: String::new(),
            device_name: String::new(),
            unique_id: String::new(),
            base_url: "http://localhost:11111".to_string(),
        }
    }

    #[test]
    fn test_transaction_id_uniqueness_single_thread() {
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            let (_, tid) = get_client_transaction();
            assert!(ids.insert(tid), "Transaction ID {} was not unique", tid);
        }
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_transaction_id_uniqueness_multi_thread() {
        use std::sync::Mutex;

        let ids = Arc::new(Mutex::new(HashSet::new()));
        let mut handles = vec![];

        for _ in 0..10 {
            let handle = thread::spawn(move || {
                let mut local_ids = Vec::new();
                for _ in 0..100 {
                    let (_, tid) = get_client_transaction();
                    local_ids.push(tid);
                }
                local_ids
            });
            handles.push(handle);
        }

        for handle in handles {
            let local_ids = handle.join().unwrap();
            let mut ids_lock = ids.lock().unwrap();
            for id in local_ids {
                assert!(
                    ids_lock.insert(id),
                    "Transaction ID {} was not unique across threads",
                    id
                );
            }
        }

        let ids_lock = ids.lock().unwrap();
        assert_eq!(ids_lock.len(), 1000);
    }

    #[test]
    fn test_client_id_get_set() {
        let original = get_client_id();

        set_client_id(42);
        assert_eq!(get_client_id(), 42);

        set_client_id(100);
        assert_eq!(get_client_id(), 100);

        set_client_id(original);
    }

    #[test]
    fn test_alpaca_error_conversion() {
        let error = AlpacaError::timeout("camerastate", 5000);
        let error_string: String = error.into();
        assert!(error_string.contains("5000ms"));
        assert!(error_string.contains("camerastate"));

        let error = AlpacaError::DeviceError {
            code: 1031,
            message: "Method not implemented".to_string(),
        };
        let error_string: String = error.into();
        assert!(error_string.contains("1031"));
        assert!(error_string.contains("Method not implemented"));
    }

    #[test]
    fn test_timeout_config_defaults() {
        let config = TimeoutConfig::default();
        assert_eq!(config.quick_query_ms, 5000);
        assert_eq!(config.standard_operation_ms, 30000);
        assert_eq!(config.long_operation_ms, 300000);
        assert_eq!(config.connect_ms, 10000);
    }

    #[test]
    fn test_timeout_config_for_camera() {
        let config = TimeoutConfig::for_camera();
        assert_eq!(config.quick_query_ms, 5000);
        assert_eq!(config.long_operation_ms, 600000);
        assert_eq!(config.connect_ms, 15000);
    }

    #[test]
    fn test_build_url() {
        let client = AlpacaClient::new(&test_device(AlpacaDeviceType::Dome));
        assert_eq!(
            client.build_url("azimuth"),
            "http://localhost:11111/api/v1/dome/3/azimuth"
        );
    }

    #[test]
    fn test_response_envelope_with_value() {
        let json = r#"{
            "Value": 231.5,
            "ClientTransactionID": 7,
            "ServerTransactionID": 12,
            "ErrorNumber": 0,
            "ErrorMessage": ""
        }"#;
        let response: AlpacaResponse<f64> = serde_json::from_str(json).unwrap();
        assert_eq!(response.client_transaction_id, 7);
        assert_eq!(response.server_transaction_id, 12);
        assert_eq!(response.into_value("azimuth").unwrap(), 231.5);
    }

    #[test]
    fn test_response_envelope_without_value() {
        let json = r#"{
            "ClientTransactionID": 7,
            "ServerTransactionID": 12,
            "ErrorNumber": 0,
            "ErrorMessage": ""
        }"#;
        let response: AlpacaResponse<serde_json::Value> = serde_json::from_str(json).unwrap();
        assert!(response.into_unit().is_ok());
    }

    #[test]
    fn test_response_envelope_device_error() {
        let json = r#"{
            "Value": null,
            "ClientTransactionID": 1,
            "ServerTransactionID": 2,
            "ErrorNumber": 1025,
            "ErrorMessage": "Invalid value"
        }"#;
        let response: AlpacaResponse<f64> = serde_json::from_str(json).unwrap();
        match response.into_value("setccdtemperature") {
            Err(AlpacaError::DeviceError { code, message }) => {
                assert_eq!(code, 1025);
                assert_eq!(message, "Invalid value");
            }
            other => panic!("expected device error, got {:?}", other),
        }
    }
}
