//! Error types for the ble-central crate.

use thiserror::Error;

/// An error reported by the radio adapter for a specific request or event.
///
/// Unlike [`Error`], this type is cheap to clone so that a single adapter
/// failure can be delivered to every caller waiting on the same operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct AdapterError {
    /// Platform-specific error code, when the adapter supplies one.
    pub code: Option<i32>,
    /// Human-readable description of the failure.
    pub message: String,
}

impl AdapterError {
    /// Create an adapter error with a message and no code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Create an adapter error with a platform error code.
    pub fn with_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Placeholder used when the adapter reports a failure without details.
    pub fn unknown() -> Self {
        Self::new("unknown adapter error")
    }
}

impl From<&btleplug::Error> for AdapterError {
    fn from(error: &btleplug::Error) -> Self {
        Self::new(error.to_string())
    }
}

impl From<btleplug::Error> for AdapterError {
    fn from(error: btleplug::Error) -> Self {
        Self::from(&error)
    }
}

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The application is not authorized to use Bluetooth.
    #[error("Bluetooth permission denied")]
    PermissionDenied,

    /// The device disconnected while the operation was pending.
    #[error("Device disconnected")]
    Disconnected,

    /// The adapter reported that the connection attempt failed.
    #[error("Connection failed: {cause}")]
    ConnectionFailed {
        /// The adapter-supplied failure.
        cause: AdapterError,
    },

    /// The connection attempt did not complete before its deadline.
    #[error("Connection timed out")]
    ConnectTimeout,

    /// A characteristic read did not complete before its deadline.
    #[error("Characteristic read timed out")]
    ReadTimeout,

    /// A characteristic write was not confirmed before its deadline.
    #[error("Characteristic write timed out")]
    WriteTimeout,

    /// The adapter reported an error for a read, write or discovery request.
    #[error("Adapter error: {0}")]
    Adapter(AdapterError),

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is one of the deadline failures (connect, read or write).
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout | Self::ReadTimeout | Self::WriteTimeout
        )
    }
}

impl From<AdapterError> for Error {
    fn from(error: AdapterError) -> Self {
        Self::Adapter(error)
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        assert!(Error::ConnectTimeout.is_timeout());
        assert!(Error::ReadTimeout.is_timeout());
        assert!(Error::WriteTimeout.is_timeout());
        assert!(!Error::Disconnected.is_timeout());
        assert!(!Error::Adapter(AdapterError::unknown()).is_timeout());
    }

    #[test]
    fn test_connection_failed_display_includes_cause() {
        let error = Error::ConnectionFailed {
            cause: AdapterError::with_code(133, "GATT error"),
        };
        assert_eq!(error.to_string(), "Connection failed: GATT error");
    }
}
