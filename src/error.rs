//! Error types for LA66 protocol and monitor operations.

use thiserror::Error;

/// Result type alias for LA66 operations.
pub type Result<T> = std::result::Result<T, La66Error>;

/// Error types for LA66 modem communication and the operating cycle.
#[derive(Error, Debug)]
pub enum La66Error {
    /// Serial port communication error
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Modem reported `AT_ERROR`
    #[error("Modem reported an error")]
    Modem,

    /// Command malformed locally or rejected with `AT_PARAM_ERROR`
    #[error("Invalid parameter or malformed command")]
    Param,

    /// Modem reported `AT_BUSY_ERROR`, all channels in use
    #[error("Modem busy, all channels in use")]
    Busy,

    /// Not joined to a network, or the join window elapsed
    #[error("Not joined to a LoRaWAN network")]
    Join,

    /// No terminal response within the timeout budget, link state undetermined
    #[error("Modem state undetermined, protocol desynchronized")]
    Panic,

    /// Payload or response exceeded the fixed line buffer
    #[error("Line buffer exhausted")]
    BufferExhausted,

    /// Configuration store serialization error
    #[error("Config store error: {0}")]
    Config(#[from] serde_json::Error),

    /// Response parsing error
    #[error("Parse error: {0}")]
    Parse(String),
}

impl La66Error {
    /// One-byte code carried by error-report uplinks.
    ///
    /// Codes 1-6 follow the modem return-code table; 5 is reserved for the
    /// benign no-downlink case, which is not an error.
    pub fn code(&self) -> u8 {
        match self {
            La66Error::Modem => 1,
            La66Error::Param => 2,
            La66Error::Busy => 3,
            La66Error::Join => 4,
            La66Error::Panic => 6,
            La66Error::BufferExhausted => 7,
            La66Error::SerialPort(_) => 8,
            La66Error::Io(_) => 9,
            La66Error::Config(_) => 10,
            La66Error::Parse(_) => 11,
        }
    }
}
