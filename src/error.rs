//! Error types for Chakra

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Chakra error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The plate MCU did not acknowledge on connect
    #[error("Plate not available: {0}")]
    HardwareUnavailable(String),

    /// I2C transaction failed, or the session is disconnected
    #[error("Communication error: {0}")]
    Communication(String),

    /// Illegal configuration: speed factors, ports, goal shape, config files
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Out-of-range argument to a motion or sensor operation
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// `go_to` called while another navigation is running
    #[error("Navigation already in progress")]
    NavigationInProgress,

    /// A blocking hardware operation exceeded its watchdog
    #[error("Hardware timeout: {0}")]
    HardwareTimeout(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A worker thread panicked before it could be joined
    #[error("Thread panicked: {0}")]
    ThreadPanic(&'static str),
}
