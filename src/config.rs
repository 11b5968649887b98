//! Manager configuration.

use std::time::Duration;

use crate::error::{Error, Result};

/// Tunables for a [`ConnectionManager`](crate::ConnectionManager) and the
/// devices it creates.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ManagerConfig {
    /// Deadline used by [`ConnectionManager::connect`](crate::ConnectionManager::connect).
    pub connect_timeout: Duration,
    /// Buffer size of each per-characteristic notification channel.
    pub notification_capacity: usize,
    /// Buffer size of the discovery event channel.
    pub discovery_capacity: usize,
    /// How long a device may go without advertising before it counts as stale.
    pub stale_timeout: Duration,
}

impl ManagerConfig {
    /// Default connect deadline (10 seconds).
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Default stale timeout (15 seconds).
    pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(15);

    /// Set the connect deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-characteristic notification buffer size.
    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }

    /// Set the discovery event buffer size.
    pub fn with_discovery_capacity(mut self, capacity: usize) -> Self {
        self.discovery_capacity = capacity;
        self
    }

    /// Set the stale timeout.
    pub fn with_stale_timeout(mut self, timeout: Duration) -> Self {
        self.stale_timeout = timeout;
        self
    }

    /// Check that the configuration can be used to build channels.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if a channel capacity is zero.
    pub fn validate(&self) -> Result<()> {
        if self.notification_capacity == 0 {
            return Err(Error::InvalidParameter {
                name: "notification_capacity".to_string(),
                value: "0".to_string(),
            });
        }
        if self.discovery_capacity == 0 {
            return Err(Error::InvalidParameter {
                name: "discovery_capacity".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            notification_capacity: 64,
            discovery_capacity: 32,
            stale_timeout: Self::DEFAULT_STALE_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_connect_timeout() {
        assert_eq!(
            ManagerConfig::default().connect_timeout,
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_builder_setters() {
        let config = ManagerConfig::default()
            .with_connect_timeout(Duration::from_secs(3))
            .with_notification_capacity(8)
            .with_discovery_capacity(4)
            .with_stale_timeout(Duration::from_secs(30));

        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.notification_capacity, 8);
        assert_eq!(config.discovery_capacity, 4);
        assert_eq!(config.stale_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = ManagerConfig::default().with_notification_capacity(0);
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidParameter { ref name, .. }) if name == "notification_capacity"
        ));

        let config = ManagerConfig::default().with_discovery_capacity(0);
        assert!(config.validate().is_err());
    }
}
