//! Unified error handling for gpu-mmio-hwmon
//!
//! This crate provides the single error type shared by the core library, the
//! daemon and the CLI. Every variant classifies into one of the coarse
//! [`ErrorKind`]s that the sensor interface reports to its readers.

use std::io;
use std::path::PathBuf;

/// Result type alias using GpuHwmonError
pub type Result<T> = std::result::Result<T, GpuHwmonError>;

/// Coarse classification surfaced to sensor readers and push writers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No matching device, no mappable window, unknown chip or attribute
    NotFound,
    /// Metric not yet pushed, or attribute/channel not implemented
    Unsupported,
    /// Malformed push payload or request parameter
    InvalidArgument,
    /// Mapping or sensor-framework registration failure
    ResourceError,
    /// Configuration, IPC and everything else
    Other,
}

/// Unified error type for all gpu-mmio-hwmon operations
#[derive(thiserror::Error, Debug)]
pub enum GpuHwmonError {
    // ============================================================================
    // Device Discovery Errors
    // ============================================================================
    #[error("No supported device found (vendor {vendor:#06x})")]
    DeviceNotFound {
        vendor: u16,
    },

    #[error("Device {device} has no mappable BAR{bar}")]
    NoMappableRegion {
        device: String,
        bar: u8,
    },

    // ============================================================================
    // Resource Errors
    // ============================================================================
    #[error("Failed to map BAR{bar} of {device}: {reason}")]
    Mapping {
        device: String,
        bar: u8,
        reason: String,
    },

    #[error("Sensor registration failed: {0}")]
    Registration(String),

    #[error("Driver already loaded for {0}")]
    AlreadyLoaded(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Sensor Access Errors
    // ============================================================================
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Sensor chip not found: {0}")]
    ChipNotFound(String),

    #[error("Attribute not found: {0}")]
    AttributeNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Daemon and IPC Errors
    // ============================================================================
    #[error("Daemon connection failed: {0}")]
    DaemonConnection(String),

    #[error("Daemon response error: {0}")]
    DaemonResponse(String),

    #[error("IPC protocol error: {0}")]
    IpcProtocol(String),

    #[error("Message too large: {size} bytes (max {max_size} bytes)")]
    MessageTooLarge {
        size: usize,
        max_size: usize,
    },
}

impl GpuHwmonError {
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Classify this error for the sensor interface
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DeviceNotFound { .. }
            | Self::NoMappableRegion { .. }
            | Self::ChipNotFound(_)
            | Self::AttributeNotFound(_) => ErrorKind::NotFound,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Mapping { .. }
            | Self::Registration(_)
            | Self::AlreadyLoaded(_)
            | Self::Io(_)
            | Self::FileRead { .. } => ErrorKind::ResourceError,
            _ => ErrorKind::Other,
        }
    }
}
