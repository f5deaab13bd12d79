//! Model-related error types.

use thiserror::Error;

use crate::graph::Shape;

/// Errors that can occur while defining or compiling a model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model `{model}` does not implement model_graph()")]
    NotImplemented { model: String },

    #[error("Model has no input buffer defined")]
    NoInputBuffer,

    #[error("Invalid layer configuration: {message}")]
    InvalidLayerConfig { message: String },

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: Shape, actual: Shape },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),
}
