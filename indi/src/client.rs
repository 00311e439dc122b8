//! INDI client implementation
//!
//! This module provides an INDI client with:
//! - Proper error handling using IndiError
//! - XML parse timeout for incomplete messages
//! - BLOB reception with base64 decode
//! - Property min/max extraction
//! - Permission checking before writes
//! - Per-device subscription via getProperties
//!
//! Timeouts fail the operation and are reported to the caller; the client
//! never reconnects on its own.

use crate::error::{IndiError, IndiResult};
use crate::protocol::INDI_PROTOCOL_VERSION;
use crate::{
    IndiDevice, IndiPermission, IndiProperty, IndiPropertyState, IndiPropertyType,
    IndiTimeoutConfig, INDI_DEFAULT_PORT,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use quick_xml::events::Event;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{timeout, Instant};

/// INDI client event
#[derive(Debug, Clone)]
pub enum IndiEvent {
    /// Device defined
    DeviceDefined(String),
    /// Device removed by the server (delProperty without a property name)
    DeviceRemoved(String),
    /// Property defined
    PropertyDefined(String, String, IndiPropertyType),
    /// Property updated
    PropertyUpdated(String, String),
    /// Property deleted
    PropertyDeleted(String, String),
    /// Server message for a device (empty device name means server-wide)
    Message { device: String, text: String },
    /// BLOB received with format information
    BlobReceived {
        device: String,
        property: String,
        element: String,
        data: Vec<u8>,
        format: String,
        size: usize,
    },
    /// Connection state changed
    ConnectionStateChanged(bool),
    /// Error occurred
    Error(String),
}

/// Number element limits (min, max, step)
#[derive(Debug, Clone, Default)]
pub struct NumberLimits {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    pub format: Option<String>,
}

/// Type alias for property value storage
type PropertyValueMap = HashMap<(String, String, String), String>;

/// Type alias for number limits storage
type NumberLimitsMap = HashMap<(String, String, String), NumberLimits>;

/// INDI client for communicating with an INDI server
pub struct IndiClient {
    host: String,
    port: u16,
    connected: Arc<AtomicBool>,
    devices: Arc<RwLock<HashMap<String, IndiDevice>>>,
    properties: Arc<RwLock<HashMap<(String, String), IndiProperty>>>,
    property_values: Arc<RwLock<PropertyValueMap>>,
    number_limits: Arc<RwLock<NumberLimitsMap>>,
    tx: Option<mpsc::Sender<String>>,
    event_tx: broadcast::Sender<IndiEvent>,
    timeout_config: IndiTimeoutConfig,
    /// Shutdown signal sender for the reader task
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl IndiClient {
    /// Create a new INDI client
    pub fn new(host: &str, port: Option<u16>) -> Self {
        Self::with_timeout_config(host, port, IndiTimeoutConfig::default())
    }

    /// Create a new INDI client with custom timeout configuration
    pub fn with_timeout_config(
        host: &str,
        port: Option<u16>,
        timeout_config: IndiTimeoutConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            host: host.to_string(),
            port: port.unwrap_or(INDI_DEFAULT_PORT),
            connected: Arc::new(AtomicBool::new(false)),
            devices: Arc::new(RwLock::new(HashMap::new())),
            properties: Arc::new(RwLock::new(HashMap::new())),
            property_values: Arc::new(RwLock::new(HashMap::new())),
            number_limits: Arc::new(RwLock::new(HashMap::new())),
            tx: None,
            event_tx,
            timeout_config,
            shutdown_tx: None,
        }
    }

    /// Get the timeout configuration
    pub fn timeout_config(&self) -> &IndiTimeoutConfig {
        &self.timeout_config
    }

    /// Get the configured server host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the configured server port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Change the server address. Takes effect on the next connect.
    pub fn set_host(&mut self, host: &str, port: Option<u16>) {
        self.host = host.to_string();
        self.port = port.unwrap_or(INDI_DEFAULT_PORT);
    }

    /// Subscribe to INDI events
    pub fn subscribe(&self) -> broadcast::Receiver<IndiEvent> {
        self.event_tx.subscribe()
    }

    /// Connect to the INDI server
    ///
    /// Establishes the TCP session and spawns the writer and reader tasks.
    /// No subscription is sent here; call `watch_device` afterwards.
    pub async fn connect(&mut self) -> IndiResult<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let connection_timeout = self.timeout_config.connection_timeout();

        let stream = match timeout(connection_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(IndiError::ConnectionFailed(format!(
                    "Failed to connect to INDI server at {}: {}. Check that the server is running and the address is correct.",
                    addr, e
                )));
            }
            Err(_) => {
                return Err(IndiError::ConnectionTimeout {
                    host: self.host.clone(),
                    port: self.port,
                    duration: connection_timeout,
                });
            }
        };

        let (read_half, write_half) = stream.into_split();

        // Channel for outgoing commands
        let (tx, rx) = mpsc::channel::<String>(100);
        self.tx = Some(tx);

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        tokio::spawn(Self::writer_task(write_half, rx));

        let devices = self.devices.clone();
        let properties = self.properties.clone();
        let property_values = self.property_values.clone();
        let number_limits = self.number_limits.clone();
        let connected = self.connected.clone();
        let event_tx = self.event_tx.clone();
        let timeout_config = self.timeout_config.clone();

        tokio::spawn(async move {
            tokio::select! {
                result = Self::reader_task(
                    read_half,
                    devices,
                    properties,
                    property_values,
                    number_limits,
                    connected.clone(),
                    event_tx.clone(),
                    timeout_config,
                ) => {
                    if let Err(e) = result {
                        tracing::error!("INDI reader task failed: {}", e);
                    }
                }
                _ = &mut shutdown_rx => {
                    tracing::debug!("INDI reader task received shutdown signal");
                }
            }
            connected.store(false, Ordering::SeqCst);
            let _ = event_tx.send(IndiEvent::ConnectionStateChanged(false));
        });

        self.connected.store(true, Ordering::SeqCst);
        let _ = self.event_tx.send(IndiEvent::ConnectionStateChanged(true));

        tracing::info!("Connected to INDI server at {}", addr);
        Ok(())
    }

    /// Writer task - sends commands to INDI server
    async fn writer_task<W: AsyncWrite + Unpin>(mut writer: W, mut rx: mpsc::Receiver<String>) {
        while let Some(cmd) = rx.recv().await {
            if let Err(e) = writer.write_all(cmd.as_bytes()).await {
                tracing::error!("INDI write error: {}", e);
                break;
            }
            if let Err(e) = writer.write_all(b"\n").await {
                tracing::error!("INDI write error: {}", e);
                break;
            }
        }
    }

    /// Reader task - processes incoming INDI messages
    #[allow(clippy::too_many_arguments)]
    async fn reader_task<R: AsyncRead + Unpin>(
        reader: R,
        devices: Arc<RwLock<HashMap<String, IndiDevice>>>,
        properties: Arc<RwLock<HashMap<(String, String), IndiProperty>>>,
        property_values: Arc<RwLock<PropertyValueMap>>,
        number_limits: Arc<RwLock<NumberLimitsMap>>,
        connected: Arc<AtomicBool>,
        event_tx: broadcast::Sender<IndiEvent>,
        timeout_config: IndiTimeoutConfig,
    ) -> IndiResult<()> {
        let mut reader = quick_xml::reader::Reader::from_reader(tokio::io::BufReader::new(reader));
        reader.trim_text(true);

        let mut buf = Vec::new();

        // State tracking
        let mut current_device = String::new();
        let mut current_property = String::new();
        let mut current_element = String::new();
        let mut current_blob_format = String::new();
        let mut current_blob_size: usize = 0;

        let xml_timeout = timeout_config.message_timeout();

        // BLOB reception timeout tracking
        let mut blob_start_time: Option<Instant> = None;
        let blob_timeout = timeout_config.blob_timeout();

        // Track consecutive timeouts for incomplete message detection
        let mut incomplete_message_start: Option<Instant> = None;
        let mut incomplete_message_bytes: usize = 0;

        loop {
            // Check for XML parse timeout (incomplete messages)
            if let Some(start) = incomplete_message_start {
                if start.elapsed() > xml_timeout {
                    tracing::warn!(
                        "XML message parse timeout: incomplete message after {:?}. Received {} bytes. Resetting parser.",
                        xml_timeout,
                        incomplete_message_bytes
                    );
                    let _ = event_tx.send(IndiEvent::Error(format!(
                        "XML parse timeout after {:?}: {} bytes of incomplete message",
                        xml_timeout, incomplete_message_bytes
                    )));
                    buf.clear();
                    incomplete_message_start = None;
                    incomplete_message_bytes = 0;
                    continue;
                }
            }

            // Check for BLOB reception timeout
            if let Some(start) = blob_start_time {
                if start.elapsed() > blob_timeout {
                    tracing::error!(
                        "BLOB reception timeout for {}.{}: expected {} bytes after {:?}",
                        current_device,
                        current_property,
                        current_blob_size,
                        blob_timeout
                    );
                    let _ = event_tx.send(IndiEvent::Error(format!(
                        "BLOB timeout for {}.{}: expected {} bytes after {:?}",
                        current_device, current_property, current_blob_size, blob_timeout
                    )));
                    blob_start_time = None;
                    current_blob_format.clear();
                    current_blob_size = 0;
                }
            }

            let read_timeout = Duration::from_secs(5);
            let read_result = timeout(read_timeout, reader.read_event_into_async(&mut buf)).await;

            match read_result {
                Ok(Ok(Event::Start(e))) => {
                    incomplete_message_start = None;
                    incomplete_message_bytes = 0;
                    let name = e.name();
                    let name_str = String::from_utf8_lossy(name.as_ref()).to_string();

                    // Property definitions (def*Vector)
                    if name_str.starts_with("def") && name_str.ends_with("Vector") {
                        if let Some(dev) = get_attribute(&e, "device") {
                            current_device = dev.clone();
                            if let Some(prop) = get_attribute(&e, "name") {
                                current_property = prop.clone();

                                let prop_type = if name_str.contains("Switch") {
                                    IndiPropertyType::Switch
                                } else if name_str.contains("Number") {
                                    IndiPropertyType::Number
                                } else if name_str.contains("Text") {
                                    IndiPropertyType::Text
                                } else if name_str.contains("Light") {
                                    IndiPropertyType::Light
                                } else if name_str.contains("BLOB") {
                                    IndiPropertyType::Blob
                                } else {
                                    IndiPropertyType::Text
                                };

                                let state_str = get_attribute(&e, "state")
                                    .unwrap_or_else(|| "Idle".to_string());
                                let state = parse_state(&state_str);

                                let perm_str =
                                    get_attribute(&e, "perm").unwrap_or_else(|| "rw".to_string());
                                let perm = parse_perm(&perm_str);

                                // Add device if new
                                {
                                    let mut devs = devices.write().await;
                                    if !devs.contains_key(&current_device) {
                                        devs.insert(
                                            current_device.clone(),
                                            IndiDevice {
                                                name: current_device.clone(),
                                                driver: String::new(),
                                            },
                                        );
                                        let _ = event_tx
                                            .send(IndiEvent::DeviceDefined(current_device.clone()));
                                    }
                                }

                                // Add property
                                {
                                    let mut props = properties.write().await;
                                    props.insert(
                                        (current_device.clone(), current_property.clone()),
                                        IndiProperty {
                                            device: current_device.clone(),
                                            name: current_property.clone(),
                                            label: get_attribute(&e, "label")
                                                .unwrap_or_else(|| current_property.clone()),
                                            group: get_attribute(&e, "group").unwrap_or_default(),
                                            property_type: prop_type,
                                            state,
                                            perm,
                                            elements: Vec::new(),
                                        },
                                    );
                                }

                                let _ = event_tx.send(IndiEvent::PropertyDefined(
                                    current_device.clone(),
                                    current_property.clone(),
                                    prop_type,
                                ));
                            }
                        }
                    }
                    // Element definitions (defText, defNumber, etc. inside Vector)
                    else if name_str.starts_with("def") && !name_str.ends_with("Vector") {
                        if !current_device.is_empty() && !current_property.is_empty() {
                            if let Some(elem_name) = get_attribute(&e, "name") {
                                current_element = elem_name.clone();

                                let mut props = properties.write().await;
                                if let Some(prop) = props
                                    .get_mut(&(current_device.clone(), current_property.clone()))
                                {
                                    prop.elements.push(elem_name.clone());
                                }

                                // Extract min/max/step/format for number elements
                                if name_str == "defNumber" {
                                    let limits = NumberLimits {
                                        min: get_attribute(&e, "min").and_then(|s| s.parse().ok()),
                                        max: get_attribute(&e, "max").and_then(|s| s.parse().ok()),
                                        step: get_attribute(&e, "step")
                                            .and_then(|s| s.parse().ok()),
                                        format: get_attribute(&e, "format"),
                                    };

                                    let mut limits_map = number_limits.write().await;
                                    limits_map.insert(
                                        (
                                            current_device.clone(),
                                            current_property.clone(),
                                            elem_name,
                                        ),
                                        limits,
                                    );
                                }
                            }
                        }
                    }
                    // Property updates (set*Vector, new*Vector)
                    else if (name_str.starts_with("set") || name_str.starts_with("new"))
                        && name_str.ends_with("Vector")
                    {
                        if let Some(dev) = get_attribute(&e, "device") {
                            current_device = dev;
                            if let Some(prop) = get_attribute(&e, "name") {
                                current_property = prop;

                                if let Some(state_str) = get_attribute(&e, "state") {
                                    let state = parse_state(&state_str);
                                    let mut props = properties.write().await;
                                    if let Some(p) = props.get_mut(&(
                                        current_device.clone(),
                                        current_property.clone(),
                                    )) {
                                        p.state = state;
                                    }
                                }
                            }
                        }
                    }
                    // BLOB elements carry format and size attributes
                    else if name_str == "oneBLOB" {
                        if let Some(elem) = get_attribute(&e, "name") {
                            current_element = elem;
                        }
                        current_blob_format =
                            get_attribute(&e, "format").unwrap_or_else(|| ".fits".to_string());
                        current_blob_size = get_attribute(&e, "size")
                            .and_then(|s| s.parse().ok())
                            .unwrap_or(0);
                        blob_start_time = Some(Instant::now());
                        tracing::debug!(
                            "Starting BLOB reception for {}.{}.{}: expected size {} bytes",
                            current_device,
                            current_property,
                            current_element,
                            current_blob_size
                        );
                    }
                    // Element values (oneSwitch, oneNumber, etc.)
                    else if name_str.starts_with("one") {
                        if let Some(elem) = get_attribute(&e, "name") {
                            current_element = elem;
                        }
                    }
                }
                Ok(Ok(Event::Text(e))) => {
                    incomplete_message_start = None;
                    incomplete_message_bytes = 0;
                    let text = e.unescape().unwrap_or_default().to_string();
                    if !current_device.is_empty()
                        && !current_property.is_empty()
                        && !current_element.is_empty()
                    {
                        {
                            let mut vals = property_values.write().await;
                            vals.insert(
                                (
                                    current_device.clone(),
                                    current_property.clone(),
                                    current_element.clone(),
                                ),
                                text.clone(),
                            );
                        }

                        if !current_blob_format.is_empty() {
                            match BASE64.decode(text.trim()) {
                                Ok(data) => {
                                    if let Some(start) = blob_start_time {
                                        tracing::debug!(
                                            "BLOB received for {}.{}.{}: {} bytes in {:?}",
                                            current_device,
                                            current_property,
                                            current_element,
                                            data.len(),
                                            start.elapsed()
                                        );
                                    }

                                    let _ = event_tx.send(IndiEvent::BlobReceived {
                                        device: current_device.clone(),
                                        property: current_property.clone(),
                                        element: current_element.clone(),
                                        data,
                                        format: current_blob_format.clone(),
                                        size: current_blob_size,
                                    });
                                }
                                Err(e) => {
                                    tracing::warn!(
                                        "Failed to decode BLOB base64 for {}.{}.{}: {}",
                                        current_device,
                                        current_property,
                                        current_element,
                                        e
                                    );
                                }
                            }
                            current_blob_format.clear();
                            current_blob_size = 0;
                            blob_start_time = None;
                        }
                    }
                }
                Ok(Ok(Event::End(e))) => {
                    incomplete_message_start = None;
                    incomplete_message_bytes = 0;
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    if name.starts_with("set") || name.starts_with("new") {
                        // Property update complete
                        let _ = event_tx.send(IndiEvent::PropertyUpdated(
                            current_device.clone(),
                            current_property.clone(),
                        ));
                        current_property.clear();
                    } else if name.starts_with("one") || name.starts_with("def") {
                        current_element.clear();
                    }
                }
                Ok(Ok(Event::Empty(e))) => {
                    incomplete_message_start = None;
                    incomplete_message_bytes = 0;
                    let name_str = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    if name_str == "delProperty" {
                        if let Some(dev) = get_attribute(&e, "device") {
                            match get_attribute(&e, "name") {
                                Some(prop) => {
                                    properties
                                        .write()
                                        .await
                                        .remove(&(dev.clone(), prop.clone()));
                                    property_values
                                        .write()
                                        .await
                                        .retain(|(d, p, _), _| d != &dev || p != &prop);
                                    number_limits
                                        .write()
                                        .await
                                        .retain(|(d, p, _), _| d != &dev || p != &prop);
                                    let _ = event_tx.send(IndiEvent::PropertyDeleted(dev, prop));
                                }
                                None => {
                                    devices.write().await.remove(&dev);
                                    properties.write().await.retain(|(d, _), _| d != &dev);
                                    property_values
                                        .write()
                                        .await
                                        .retain(|(d, _, _), _| d != &dev);
                                    number_limits
                                        .write()
                                        .await
                                        .retain(|(d, _, _), _| d != &dev);
                                    let _ = event_tx.send(IndiEvent::DeviceRemoved(dev));
                                }
                            }
                        }
                    } else if name_str == "message" {
                        let device = get_attribute(&e, "device").unwrap_or_default();
                        if let Some(text) = get_attribute(&e, "message") {
                            let _ = event_tx.send(IndiEvent::Message { device, text });
                        }
                    }
                }
                Ok(Ok(Event::Eof)) => {
                    tracing::info!("INDI connection closed (EOF)");
                    break;
                }
                Ok(Err(e)) => {
                    tracing::error!(
                        "INDI XML parse error: {}. Raw buffer (first 200 chars): {:?}",
                        e,
                        String::from_utf8_lossy(&buf[..buf.len().min(200)])
                    );
                    // Continue on parse errors, try to recover
                }
                Err(_) => {
                    // Read timeout - check if connection is still alive
                    if !connected.load(Ordering::SeqCst) {
                        break;
                    }
                    if !buf.is_empty() {
                        if incomplete_message_start.is_none() {
                            incomplete_message_start = Some(Instant::now());
                        }
                        incomplete_message_bytes = buf.len();
                    }
                }
                _ => {}
            }
            buf.clear();
        }

        Ok(())
    }

    /// Disconnect from the INDI server
    ///
    /// Graceful shutdown: stops the reader task, closes the writer channel
    /// and clears all cached device/property state.
    pub async fn disconnect(&mut self) -> IndiResult<()> {
        tracing::info!("Disconnecting from INDI server {}:{}", self.host, self.port);

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        self.tx = None; // Drop sender, which will close the writer task
        self.connected.store(false, Ordering::SeqCst);

        self.devices.write().await.clear();
        self.properties.write().await.clear();
        self.property_values.write().await.clear();
        self.number_limits.write().await.clear();

        let _ = self.event_tx.send(IndiEvent::ConnectionStateChanged(false));

        Ok(())
    }

    /// Check if connected
    pub async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Send a raw INDI command
    pub async fn send_command(&mut self, command: &str) -> IndiResult<()> {
        if let Some(tx) = &self.tx {
            tx.send(command.to_string()).await.map_err(|e| {
                IndiError::ChannelClosed(format!(
                    "Failed to send INDI command to {}:{}: {}. The connection may have been lost.",
                    self.host, self.port, e
                ))
            })
        } else {
            Err(IndiError::NotConnected)
        }
    }

    /// Subscribe to property pushes for a single device
    pub async fn watch_device(&mut self, device: &str) -> IndiResult<()> {
        let cmd = format!(
            "<getProperties version=\"{}\" device=\"{}\"/>",
            INDI_PROTOCOL_VERSION, device
        );
        self.send_command(&cmd).await
    }

    /// Get the list of discovered devices
    pub async fn get_devices(&self) -> Vec<IndiDevice> {
        self.devices.read().await.values().cloned().collect()
    }

    /// Get the names of all discovered devices
    pub async fn device_names(&self) -> Vec<String> {
        self.devices.read().await.keys().cloned().collect()
    }

    /// Get properties for a device
    pub async fn get_properties(&self, device_name: &str) -> Vec<IndiProperty> {
        self.properties
            .read()
            .await
            .iter()
            .filter(|((device, _), _)| device == device_name)
            .map(|(_, prop)| prop.clone())
            .collect()
    }

    /// Get a property
    pub async fn get_property(&self, device: &str, property: &str) -> Option<IndiProperty> {
        self.properties
            .read()
            .await
            .get(&(device.to_string(), property.to_string()))
            .cloned()
    }

    /// Get a property value
    pub async fn get_property_value(
        &self,
        device: &str,
        property: &str,
        element: &str,
    ) -> Option<String> {
        self.property_values
            .read()
            .await
            .get(&(
                device.to_string(),
                property.to_string(),
                element.to_string(),
            ))
            .cloned()
    }

    /// Get number limits for a property element
    pub async fn get_number_limits(
        &self,
        device: &str,
        property: &str,
        element: &str,
    ) -> Option<NumberLimits> {
        self.number_limits
            .read()
            .await
            .get(&(
                device.to_string(),
                property.to_string(),
                element.to_string(),
            ))
            .cloned()
    }

    /// Get a number property value
    pub async fn get_number(&self, device: &str, property: &str, element: &str) -> Option<f64> {
        self.get_property_value(device, property, element)
            .await
            .and_then(|v| v.parse().ok())
    }

    /// Get a switch property value
    pub async fn get_switch(&self, device: &str, property: &str, element: &str) -> Option<bool> {
        self.get_property_value(device, property, element)
            .await
            .map(|v| v.eq_ignore_ascii_case("on"))
    }

    /// Get property state
    pub async fn get_property_state(
        &self,
        device: &str,
        property: &str,
    ) -> Option<IndiPropertyState> {
        self.properties
            .read()
            .await
            .get(&(device.to_string(), property.to_string()))
            .map(|p| p.state)
    }

    /// Get property permission
    pub async fn get_property_permission(
        &self,
        device: &str,
        property: &str,
    ) -> Option<IndiPermission> {
        self.properties
            .read()
            .await
            .get(&(device.to_string(), property.to_string()))
            .map(|p| p.perm)
    }

    /// Check if a property is in the busy state
    pub async fn is_property_busy(&self, device: &str, property: &str) -> bool {
        self.get_property_state(device, property)
            .await
            .map(|s| s == IndiPropertyState::Busy)
            .unwrap_or(false)
    }

    /// Check if a property exists for a device
    pub async fn has_property(&self, device: &str, property: &str) -> bool {
        self.properties
            .read()
            .await
            .contains_key(&(device.to_string(), property.to_string()))
    }

    /// Check if an element is part of a property's definition
    pub async fn has_element(&self, device: &str, property: &str, element: &str) -> bool {
        self.properties
            .read()
            .await
            .get(&(device.to_string(), property.to_string()))
            .map(|p| p.elements.iter().any(|e| e == element))
            .unwrap_or(false)
    }

    /// Get all element values of a property, in definition order
    ///
    /// Elements with no value received yet are skipped.
    pub async fn get_element_values(
        &self,
        device: &str,
        property: &str,
    ) -> Option<Vec<(String, String)>> {
        let prop = self.get_property(device, property).await?;
        let vals = self.property_values.read().await;
        let mut out = Vec::with_capacity(prop.elements.len());
        for elem in &prop.elements {
            if let Some(v) = vals.get(&(device.to_string(), property.to_string(), elem.clone())) {
                out.push((elem.clone(), v.clone()));
            }
        }
        Some(out)
    }

    /// Get all switch elements of a property with their current states
    ///
    /// Elements with no value received yet default to off.
    pub async fn get_switch_values(
        &self,
        device: &str,
        property: &str,
    ) -> Option<Vec<(String, bool)>> {
        let prop = self.get_property(device, property).await?;
        let vals = self.property_values.read().await;
        let out = prop
            .elements
            .iter()
            .map(|elem| {
                let on = vals
                    .get(&(device.to_string(), property.to_string(), elem.clone()))
                    .map(|v| v.eq_ignore_ascii_case("on"))
                    .unwrap_or(false);
                (elem.clone(), on)
            })
            .collect();
        Some(out)
    }

    /// Enable BLOB mode for a device
    pub async fn enable_blob(&mut self, device: &str) -> IndiResult<()> {
        let cmd = format!(
            "<enableBLOB device=\"{}\" name=\"\">Also</enableBLOB>",
            device
        );
        self.send_command(&cmd).await
    }

    /// Check property permission before write
    fn check_write_permission(&self, perm: IndiPermission, property: &str) -> IndiResult<()> {
        match perm {
            IndiPermission::ReadOnly => Err(IndiError::PermissionDenied(format!(
                "Property '{}' is read-only",
                property
            ))),
            IndiPermission::WriteOnly | IndiPermission::ReadWrite => Ok(()),
        }
    }

    /// Validate number value against limits
    async fn validate_number_limits(
        &self,
        device: &str,
        property: &str,
        element: &str,
        value: f64,
    ) -> IndiResult<()> {
        if let Some(limits) = self.get_number_limits(device, property, element).await {
            if let (Some(min), Some(max)) = (limits.min, limits.max) {
                if value < min || value > max {
                    return Err(IndiError::ValueOutOfRange {
                        device: device.to_string(),
                        property: property.to_string(),
                        element: element.to_string(),
                        value,
                        min,
                        max,
                    });
                }
            }
        }
        Ok(())
    }

    /// Set a switch property with permission check
    pub async fn set_switch(
        &mut self,
        device: &str,
        property: &str,
        element: &str,
        state: bool,
    ) -> IndiResult<()> {
        self.set_switches(device, property, &[(element, state)])
            .await
    }

    /// Set multiple switch elements of a property at once
    pub async fn set_switches(
        &mut self,
        device: &str,
        property: &str,
        states: &[(&str, bool)],
    ) -> IndiResult<()> {
        if let Some(perm) = self.get_property_permission(device, property).await {
            self.check_write_permission(perm, property)?;
        }

        let elements: String = states
            .iter()
            .map(|(name, state)| {
                format!(
                    "<oneSwitch name=\"{}\">{}</oneSwitch>",
                    name,
                    if *state { "On" } else { "Off" }
                )
            })
            .collect();
        let cmd = format!(
            "<newSwitchVector device=\"{}\" name=\"{}\">{}</newSwitchVector>",
            device, property, elements
        );
        self.send_command(&cmd).await
    }

    /// Set a number property with permission and limits check
    pub async fn set_number(
        &mut self,
        device: &str,
        property: &str,
        element: &str,
        value: f64,
    ) -> IndiResult<()> {
        self.set_numbers(device, property, &[(element, value)]).await
    }

    /// Set multiple number elements of a property at once with validation
    pub async fn set_numbers(
        &mut self,
        device: &str,
        property: &str,
        values: &[(&str, f64)],
    ) -> IndiResult<()> {
        if let Some(perm) = self.get_property_permission(device, property).await {
            self.check_write_permission(perm, property)?;
        }

        for (element, value) in values {
            self.validate_number_limits(device, property, element, *value)
                .await?;
        }

        let elements: String = values
            .iter()
            .map(|(name, value)| format!("<oneNumber name=\"{}\">{}</oneNumber>", name, value))
            .collect();
        let cmd = format!(
            "<newNumberVector device=\"{}\" name=\"{}\">{}</newNumberVector>",
            device, property, elements
        );
        self.send_command(&cmd).await
    }

    /// Set a text property with permission check
    pub async fn set_text(
        &mut self,
        device: &str,
        property: &str,
        element: &str,
        value: &str,
    ) -> IndiResult<()> {
        if let Some(perm) = self.get_property_permission(device, property).await {
            self.check_write_permission(perm, property)?;
        }

        let cmd = format!(
            "<newTextVector device=\"{}\" name=\"{}\">\
             <oneText name=\"{}\">{}</oneText>\
             </newTextVector>",
            device, property, element, value
        );
        self.send_command(&cmd).await
    }

    /// Connect to a device (turn on CONNECTION switch)
    pub async fn connect_device(&mut self, device: &str) -> IndiResult<()> {
        self.set_switch(device, "CONNECTION", "CONNECT", true).await
    }

    /// Disconnect from a device
    pub async fn disconnect_device(&mut self, device: &str) -> IndiResult<()> {
        self.set_switch(device, "CONNECTION", "DISCONNECT", true)
            .await
    }

    /// Check if a device is connected
    pub async fn is_device_connected(&self, device: &str) -> bool {
        self.get_switch(device, "CONNECTION", "CONNECT")
            .await
            .unwrap_or(false)
    }
}

impl Default for IndiClient {
    fn default() -> Self {
        Self::new("localhost", None)
    }
}

/// Helper to get attribute from XML event
fn get_attribute(e: &quick_xml::events::BytesStart, name: &str) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == name.as_bytes())
        .map(|a| String::from_utf8_lossy(&a.value).to_string())
}

fn parse_state(s: &str) -> IndiPropertyState {
    match s {
        "Idle" => IndiPropertyState::Idle,
        "Ok" => IndiPropertyState::Ok,
        "Busy" => IndiPropertyState::Busy,
        "Alert" => IndiPropertyState::Alert,
        _ => IndiPropertyState::Idle,
    }
}

fn parse_perm(s: &str) -> IndiPermission {
    match s.to_lowercase().as_str() {
        "ro" => IndiPermission::ReadOnly,
        "wo" => IndiPermission::WriteOnly,
        "rw" => IndiPermission::ReadWrite,
        _ => IndiPermission::ReadWrite,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_reader(
        client: &IndiClient,
        reader: tokio::io::DuplexStream,
    ) -> tokio::task::JoinHandle<IndiResult<()>> {
        client.connected.store(true, Ordering::SeqCst);
        tokio::spawn(IndiClient::reader_task(
            reader,
            client.devices.clone(),
            client.properties.clone(),
            client.property_values.clone(),
            client.number_limits.clone(),
            client.connected.clone(),
            client.event_tx.clone(),
            client.timeout_config.clone(),
        ))
    }

    #[tokio::test]
    async fn test_timeout_config_default() {
        let config = IndiTimeoutConfig::default();
        assert_eq!(config.connection_timeout_secs, 10);
        assert_eq!(config.message_timeout_secs, 60);
        assert_eq!(config.blob_timeout_secs, 300);
        assert_eq!(config.connection_timeout(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_send_command_not_connected() {
        let mut client = IndiClient::new("localhost", None);
        let result = client.send_command("<getProperties version=\"1.7\"/>").await;
        assert!(matches!(result, Err(IndiError::NotConnected)));
    }

    #[tokio::test]
    async fn test_set_host_changes_address() {
        let mut client = IndiClient::new("localhost", None);
        assert_eq!(client.port(), INDI_DEFAULT_PORT);
        client.set_host("10.0.0.5", Some(7625));
        assert_eq!(client.host(), "10.0.0.5");
        assert_eq!(client.port(), 7625);
    }

    #[tokio::test]
    async fn test_reader_parses_number_definition_and_update() {
        let client = IndiClient::new("localhost", None);
        let mut events = client.subscribe();
        let (server, reader) = tokio::io::duplex(4096);
        let handle = spawn_reader(&client, reader);

        let mut server = server;
        server
            .write_all(
                b"<defNumberVector device=\"Dome Simulator\" name=\"ABS_DOME_POSITION\" \
                  state=\"Idle\" perm=\"rw\">\
                  <defNumber name=\"DOME_ABSOLUTE_POSITION\" min=\"0\" max=\"360\" step=\"1\">90</defNumber>\
                  </defNumberVector>\
                  <setNumberVector device=\"Dome Simulator\" name=\"ABS_DOME_POSITION\" state=\"Busy\">\
                  <oneNumber name=\"DOME_ABSOLUTE_POSITION\">120.5</oneNumber>\
                  </setNumberVector>",
            )
            .await
            .unwrap();
        drop(server);
        handle.await.unwrap().unwrap();

        let value = client
            .get_number(
                "Dome Simulator",
                "ABS_DOME_POSITION",
                "DOME_ABSOLUTE_POSITION",
            )
            .await;
        assert_eq!(value, Some(120.5));

        let state = client
            .get_property_state("Dome Simulator", "ABS_DOME_POSITION")
            .await;
        assert_eq!(state, Some(IndiPropertyState::Busy));

        let limits = client
            .get_number_limits(
                "Dome Simulator",
                "ABS_DOME_POSITION",
                "DOME_ABSOLUTE_POSITION",
            )
            .await
            .unwrap();
        assert_eq!(limits.min, Some(0.0));
        assert_eq!(limits.max, Some(360.0));

        let mut saw_defined = false;
        let mut saw_updated = false;
        while let Ok(event) = events.try_recv() {
            match event {
                IndiEvent::PropertyDefined(d, p, t) => {
                    assert_eq!(d, "Dome Simulator");
                    assert_eq!(p, "ABS_DOME_POSITION");
                    assert_eq!(t, IndiPropertyType::Number);
                    saw_defined = true;
                }
                IndiEvent::PropertyUpdated(d, p) => {
                    assert_eq!(d, "Dome Simulator");
                    assert_eq!(p, "ABS_DOME_POSITION");
                    saw_updated = true;
                }
                _ => {}
            }
        }
        assert!(saw_defined);
        assert!(saw_updated);
    }

    #[tokio::test]
    async fn test_reader_parses_switch_vector() {
        let client = IndiClient::new("localhost", None);
        let (server, reader) = tokio::io::duplex(4096);
        let handle = spawn_reader(&client, reader);

        let mut server = server;
        server
            .write_all(
                b"<defSwitchVector device=\"Pegasus UPB\" name=\"POWER_CONTROL\" \
                  state=\"Ok\" perm=\"rw\">\
                  <defSwitch name=\"POWER_CONTROL_1\">On</defSwitch>\
                  <defSwitch name=\"POWER_CONTROL_2\">Off</defSwitch>\
                  </defSwitchVector>",
            )
            .await
            .unwrap();
        drop(server);
        handle.await.unwrap().unwrap();

        assert!(client.has_property("Pegasus UPB", "POWER_CONTROL").await);
        assert!(
            client
                .has_element("Pegasus UPB", "POWER_CONTROL", "POWER_CONTROL_2")
                .await
        );
        assert_eq!(
            client
                .get_switch("Pegasus UPB", "POWER_CONTROL", "POWER_CONTROL_1")
                .await,
            Some(true)
        );
        let values = client
            .get_switch_values("Pegasus UPB", "POWER_CONTROL")
            .await
            .unwrap();
        assert_eq!(
            values,
            vec![
                ("POWER_CONTROL_1".to_string(), true),
                ("POWER_CONTROL_2".to_string(), false),
            ]
        );
    }

    #[tokio::test]
    async fn test_reader_decodes_blob() {
        let client = IndiClient::new("localhost", None);
        let mut events = client.subscribe();
        let (server, reader) = tokio::io::duplex(4096);
        let handle = spawn_reader(&client, reader);

        let mut server = server;
        server
            .write_all(
                b"<setBLOBVector device=\"CCD Simulator\" name=\"CCD1\" state=\"Ok\">\
                  <oneBLOB name=\"CCD1\" size=\"5\" format=\".fits\">SGVsbG8=</oneBLOB>\
                  </setBLOBVector>",
            )
            .await
            .unwrap();
        drop(server);
        handle.await.unwrap().unwrap();

        let mut blob = None;
        while let Ok(event) = events.try_recv() {
            if let IndiEvent::BlobReceived {
                device,
                element,
                data,
                format,
                ..
            } = event
            {
                blob = Some((device, element, data, format));
            }
        }
        let (device, element, data, format) = blob.expect("no BLOB event");
        assert_eq!(device, "CCD Simulator");
        assert_eq!(element, "CCD1");
        assert_eq!(data, b"Hello");
        assert_eq!(format, ".fits");
    }

    #[tokio::test]
    async fn test_reader_removes_device_on_del_property() {
        let client = IndiClient::new("localhost", None);
        let (server, reader) = tokio::io::duplex(4096);
        let handle = spawn_reader(&client, reader);

        let mut server = server;
        server
            .write_all(
                b"<defTextVector device=\"Flip Flat\" name=\"DRIVER_INFO\" state=\"Idle\" perm=\"ro\">\
                  <defText name=\"DRIVER_NAME\">Flip Flat</defText>\
                  </defTextVector>\
                  <delProperty device=\"Flip Flat\"/>",
            )
            .await
            .unwrap();
        drop(server);
        handle.await.unwrap().unwrap();

        assert!(client.get_devices().await.is_empty());
        assert!(!client.has_property("Flip Flat", "DRIVER_INFO").await);
    }
}
