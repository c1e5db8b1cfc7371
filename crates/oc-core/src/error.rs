//! Error types for the oxidized-cell session controller

use thiserror::Error;

/// Main error type for the emulator
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Loader errors
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Invalid SELF: {0}")]
    InvalidSelf(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for emulator operations
pub type Result<T> = std::result::Result<T, EmulatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LoaderError::DecryptionFailed("no keys".to_string());
        assert_eq!(format!("{}", err), "Decryption failed: no keys");

        let err = EmulatorError::Memory("0x30000000 already mapped".to_string());
        assert_eq!(format!("{}", err), "Memory error: 0x30000000 already mapped");
    }

    #[test]
    fn test_error_conversion() {
        let loader_err = LoaderError::InvalidSelf("truncated".to_string());
        let emu_err: EmulatorError = loader_err.into();
        assert!(matches!(emu_err, EmulatorError::Loader(_)));

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let emu_err: EmulatorError = io_err.into();
        assert!(matches!(emu_err, EmulatorError::Io(_)));
    }
}
