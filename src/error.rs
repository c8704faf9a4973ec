use thiserror::Error;

/// Sensor driver error types
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Sensor not present: {0}")]
    NotPresent(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Checksum mismatch (expected {expected:#06x}, got {actual:#06x})")]
    Checksum { expected: u16, actual: u16 },

    #[error("Device not ready: {0}")]
    NotReady(String),

    #[error("No satellite fix")]
    NoFix,

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while persisting samples or the snapshot file
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Invalid configuration values
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("{key} of {value} is out of range (at most {max} decimal places)")]
    Precision {
        key: &'static str,
        value: u32,
        max: u32,
    },

    #[error("Data directory must not be empty")]
    EmptyDataDir,

    #[error("Invalid primary sensor slot '{0}' (expected spi:<path> or usb-iss:<path>)")]
    InvalidSlot(String),

    #[error("Duplicate primary sensor slot '{0}'")]
    DuplicateSlot(String),
}

pub type SensorResult<T> = Result<T, SensorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_message_is_hex() {
        let err = SensorError::Checksum {
            expected: 0xBEEF,
            actual: 0x0001,
        };
        assert_eq!(
            err.to_string(),
            "Checksum mismatch (expected 0xbeef, got 0x0001)"
        );
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SensorError = io.into();
        assert!(matches!(err, SensorError::Io(_)));
    }
}
