use std::io;
use std::str::Utf8Error;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start async runtime: {source}")]
    Runtime { source: io::Error },

    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to talk to the dice: {source}")]
    Device { #[from] source: DeviceError },

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No usable bluetooth adapter found")]
    NoAdapter,

    #[error("Received an orientation notification without payload")]
    InvalidPayload,
}

/// Diagnostic reported by the BLE subsystem for a failed request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    #[error("Not allowed to access Bluetooth")]
    Authorization,

    #[error("The remote device is unknown to the adapter")]
    UnknownRemoteDevice,

    #[error("The remote device closed the connection")]
    RemoteHostClosed,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<&btleplug::Error> for ErrorCode {
    fn from(err: &btleplug::Error) -> Self {
        match err {
            btleplug::Error::PermissionDenied => ErrorCode::Authorization,
            btleplug::Error::DeviceNotFound => ErrorCode::UnknownRemoteDevice,
            btleplug::Error::NotConnected => ErrorCode::RemoteHostClosed,
            btleplug::Error::TimedOut(_) | btleplug::Error::NotSupported(_) => ErrorCode::Connection(err.to_string()),
            _ => ErrorCode::Unknown(err.to_string()),
        }
    }
}
