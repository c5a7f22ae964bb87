//! Error handling for Hearth Occlusion
//!
//! One error type for the whole crate. Configuration and precondition
//! failures are programming errors: they are returned immediately and the
//! failing call performs no partial work.

use std::error::Error as StdError;
use std::fmt;

/// Main error type for Hearth Occlusion
#[derive(Debug)]
pub enum EngineError {
    // Configuration Errors
    InvalidConfig {
        field: String,
        value: String,
        reason: String,
    },

    // Precondition Errors
    MissingCamera {
        operation: String,
    },
    MissingShadowDescriptor {
        light: String,
    },
    StateError {
        expected: String,
        actual: String,
    },

    // GPU Errors
    DeviceNotFound,
    ShaderCompilation {
        source: String,
        error: String,
    },
    RenderPipelineError {
        error: String,
    },
    GpuOperationFailed {
        operation: String,
        error: String,
    },
    BufferError {
        operation: String,
        error: String,
    },

    // Threading Errors
    ChannelClosed {
        name: String,
    },

    // System Errors
    IoError {
        path: String,
        error: String,
    },
    ResourceExhausted(String),

    // Generic fallback for unexpected errors
    Internal {
        message: String,
    },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidConfig {
                field,
                value,
                reason,
            } => write!(f, "Invalid config: {} = {} ({})", field, value, reason),

            EngineError::MissingCamera { operation } => {
                write!(f, "No camera set in frame context for {}", operation)
            }
            EngineError::MissingShadowDescriptor { light } => write!(
                f,
                "Light '{}' has no cascaded shadow descriptor but shadow-caster culling was requested",
                light
            ),
            EngineError::StateError { expected, actual } => {
                write!(f, "State error: expected {}, actual {}", expected, actual)
            }

            EngineError::DeviceNotFound => write!(f, "GPU device not found"),
            EngineError::ShaderCompilation { source, error } => {
                write!(f, "Shader compilation failed for {}: {}", source, error)
            }
            EngineError::RenderPipelineError { error } => {
                write!(f, "Render pipeline error: {}", error)
            }
            EngineError::GpuOperationFailed { operation, error } => {
                write!(f, "GPU operation '{}' failed: {}", operation, error)
            }
            EngineError::BufferError { operation, error } => {
                write!(f, "Buffer error during {}: {}", operation, error)
            }

            EngineError::ChannelClosed { name } => write!(f, "Channel closed: {}", name),

            EngineError::IoError { path, error } => write!(f, "IO error for {}: {}", path, error),
            EngineError::ResourceExhausted(msg) => write!(f, "Resource exhausted: {}", msg),

            EngineError::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl StdError for EngineError {}

/// Type alias for Results in Hearth Occlusion
pub type EngineResult<T> = Result<T, EngineError>;

impl From<std::io::Error> for EngineError {
    fn from(error: std::io::Error) -> Self {
        EngineError::IoError {
            path: String::new(),
            error: error.to_string(),
        }
    }
}

impl From<flume::RecvError> for EngineError {
    fn from(_: flume::RecvError) -> Self {
        EngineError::ChannelClosed {
            name: "flume".to_string(),
        }
    }
}

impl From<crate::config::ConfigError> for EngineError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::Io { path, error } => EngineError::IoError {
                path,
                error: error.to_string(),
            },
            ConfigError::Parse(e) => EngineError::InvalidConfig {
                field: "<toml>".to_string(),
                value: String::new(),
                reason: e.to_string(),
            },
            ConfigError::Serialize(e) => EngineError::Internal {
                message: format!("Config serialization error: {}", e),
            },
        }
    }
}

// Helper functions for common error patterns

/// Convert Option to Result with context
pub trait OptionExt<T> {
    fn ok_or_engine<F>(self, f: F) -> EngineResult<T>
    where
        F: FnOnce() -> EngineError;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_engine<F>(self, f: F) -> EngineResult<T>
    where
        F: FnOnce() -> EngineError,
    {
        self.ok_or_else(f)
    }
}
