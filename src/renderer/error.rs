//! Renderer subsystem error handling
//!
//! Type aliases and helpers so GPU-facing code propagates failures instead of
//! unwrapping them.

use crate::error::{EngineError, EngineResult};

/// Type alias for renderer operation results
pub type RendererResult<T> = EngineResult<T>;

/// Helper trait for renderer error contexts
pub trait RendererErrorContext<T> {
    fn renderer_context(self, context: &str) -> RendererResult<T>;
}

impl<T, E> RendererErrorContext<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn renderer_context(self, context: &str) -> RendererResult<T> {
        self.map_err(|e| gpu_operation_error(context, e))
    }
}

/// Create a GPU operation error
pub fn gpu_operation_error(operation: &str, error: impl std::fmt::Display) -> EngineError {
    EngineError::GpuOperationFailed {
        operation: operation.to_string(),
        error: error.to_string(),
    }
}

/// Create a buffer mapping error
pub fn buffer_mapping_error(buffer: &str) -> EngineError {
    EngineError::BufferError {
        operation: "map_async".to_string(),
        error: format!("Failed to map GPU buffer: {}", buffer),
    }
}

/// Create a pipeline creation error
pub fn pipeline_creation_error(pipeline: &str, error: impl std::fmt::Display) -> EngineError {
    EngineError::RenderPipelineError {
        error: format!("Failed to create pipeline '{}': {}", pipeline, error),
    }
}
