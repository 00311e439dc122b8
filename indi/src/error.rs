//! INDI error types
//!
//! Structured errors for the INDI client. Timeouts and transport faults are
//! surfaced to the caller as values; nothing here retries on its own.

use std::fmt;
use std::time::Duration;

/// INDI client errors
#[derive(Debug, Clone)]
pub enum IndiError {
    /// Connection to INDI server failed
    ConnectionFailed(String),
    /// Connection timeout with context
    ConnectionTimeout {
        host: String,
        port: u16,
        duration: Duration,
    },
    /// XML parse error
    ParseError(String),
    /// Property not found in the device's exposed schema
    PropertyNotFound { device: String, property: String },
    /// Element not part of the property's definition
    ElementNotFound {
        device: String,
        property: String,
        element: String,
    },
    /// Attempted to write to a read-only property
    PermissionDenied(String),
    /// Send channel closed, writer task gone
    ChannelClosed(String),
    /// Not connected to server
    NotConnected,
    /// Property value outside the advertised limits
    ValueOutOfRange {
        device: String,
        property: String,
        element: String,
        value: f64,
        min: f64,
        max: f64,
    },
}

impl std::error::Error for IndiError {}

impl fmt::Display for IndiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndiError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            IndiError::ConnectionTimeout {
                host,
                port,
                duration,
            } => {
                write!(
                    f,
                    "Connection timeout: failed to connect to {}:{} after {:?}",
                    host, port, duration
                )
            }
            IndiError::ParseError(msg) => write!(f, "XML parse error: {}", msg),
            IndiError::PropertyNotFound { device, property } => {
                write!(f, "Property not found: {}.{}", device, property)
            }
            IndiError::ElementNotFound {
                device,
                property,
                element,
            } => {
                write!(f, "Element not found: {}.{}.{}", device, property, element)
            }
            IndiError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            IndiError::ChannelClosed(msg) => write!(f, "Channel closed: {}", msg),
            IndiError::NotConnected => write!(f, "Not connected to INDI server"),
            IndiError::ValueOutOfRange {
                device,
                property,
                element,
                value,
                min,
                max,
            } => {
                write!(
                    f,
                    "Value {} out of range [{}, {}] for {}.{}.{}",
                    value, min, max, device, property, element
                )
            }
        }
    }
}

impl From<IndiError> for String {
    fn from(err: IndiError) -> String {
        err.to_string()
    }
}

/// Result type for INDI operations
pub type IndiResult<T> = Result<T, IndiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndiError::ConnectionFailed("connection refused".to_string());
        assert_eq!(err.to_string(), "Connection failed: connection refused");

        let err = IndiError::PropertyNotFound {
            device: "Dome Simulator".to_string(),
            property: "ABS_DOME_POSITION".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Property not found: Dome Simulator.ABS_DOME_POSITION"
        );

        let err = IndiError::ValueOutOfRange {
            device: "Dome Simulator".to_string(),
            property: "ABS_DOME_POSITION".to_string(),
            element: "DOME_ABSOLUTE_POSITION".to_string(),
            value: 500.0,
            min: 0.0,
            max: 360.0,
        };
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("360"));
    }

    #[test]
    fn test_element_not_found_display() {
        let err = IndiError::ElementNotFound {
            device: "Pegasus UPB".to_string(),
            property: "POWER_CONTROL".to_string(),
            element: "POWER_CONTROL_9".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Element not found: Pegasus UPB.POWER_CONTROL.POWER_CONTROL_9"
        );
    }

    #[test]
    fn test_error_to_string_conversion() {
        let err = IndiError::NotConnected;
        let s: String = err.into();
        assert_eq!(s, "Not connected to INDI server");
    }

    #[test]
    fn test_connection_timeout_display() {
        let err = IndiError::ConnectionTimeout {
            host: "192.168.1.100".to_string(),
            port: 7624,
            duration: Duration::from_secs(10),
        };
        let msg = err.to_string();
        assert!(msg.contains("192.168.1.100"));
        assert!(msg.contains("7624"));
        assert!(msg.contains("10"));
    }
}
