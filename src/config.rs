use std::time::Duration;

use thiserror::Error;

/// Most of our boards talk at 9600 baud. USB CDC devices
/// ignore the rate entirely, so this only matters for real UARTs.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Consecutive failures after which we stop retrying on our own and ask.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

#[derive(Clone, Debug, PartialEq)]
pub struct Timing {
    /// Pause between enumeration passes while waiting for a first port.
    pub discovery_interval: Duration,
    /// How long to wait for a first port before giving up at startup.
    pub discovery_timeout: Duration,
    /// Pause after every poll of a connected port, data or not.
    pub poll_interval: Duration,
    /// Delay between reconnect attempts.
    pub backoff: Duration,
    /// Per-read timeout handed to the port.
    pub read_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Timing {
        Timing {
            discovery_interval: Duration::from_millis(500),
            discovery_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            backoff: Duration::from_secs(2),
            read_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MonitorConfig {
    /// Device to connect to. None means "use the first port we can find".
    pub port: Option<String>,
    pub baud_rate: u32,
    pub failure_threshold: u32,
    pub timing: Timing,
}

impl Default for MonitorConfig {
    fn default() -> MonitorConfig {
        MonitorConfig {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            timing: Timing::default(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("baud rate must be non-zero")]
    ZeroBaudRate,
    #[error("failure threshold must be at least 1")]
    ZeroThreshold,
    #[error("discovery interval must be non-zero")]
    ZeroDiscoveryInterval,
    #[error("port name must not be empty")]
    EmptyPortName,
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.baud_rate == 0 {
            return Err(ConfigError::ZeroBaudRate);
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        // Discovery counts elapsed time in interval steps, a zero interval
        // would never reach the timeout.
        if self.timing.discovery_interval.is_zero() {
            return Err(ConfigError::ZeroDiscoveryInterval);
        }
        if matches!(&self.port, Some(port) if port.trim().is_empty()) {
            return Err(ConfigError::EmptyPortName);
        }
        Ok(())
    }
}
