//! # speckle-unet
//!
//! A Dense U-Net for imaging through scattering media, defined with the Burn
//! framework.
//!
//! The network follows "Deep speckle correlation: a deep learning approach
//! towards scalable imaging through scattering media" (Li, Xue & Tian, 2018):
//! a four-level U-Net whose stages are each followed by a densely connected
//! block of dilated convolutions, mapping a 64x64 speckle pattern to two-class
//! per-pixel probabilities.
//!
//! ## Features
//!
//! - **Functional graph API**: layers are wired like the Keras functional API
//!   and shape-checked before any weight exists.
//! - **Burn Backend**: compiled models are plain Burn modules, so Burn's
//!   optimizers, recorders and backends apply unchanged.
//! - **Architecture export**: every graph can be summarized layer by layer
//!   and exported to JSON.
//!
//! ## Example
//!
//! ```
//! use speckle_unet::prelude::*;
//! use burn::backend::NdArray;
//!
//! type Backend = NdArray;
//!
//! let device = <Backend as burn::tensor::backend::Backend>::Device::default();
//!
//! let graph = DenseUNet::new().model_graph().expect("Failed to build graph");
//! assert_eq!(graph.input_shape(), Some(Shape::new(64, 64, 1)));
//! assert_eq!(graph.output_shape(), Shape::new(64, 64, 2));
//!
//! let model = graph.compile::<Backend>(&device).expect("Failed to compile");
//! assert_eq!(model.output_shape(), Shape::new(64, 64, 2));
//! ```

pub mod architecture;
pub mod errors;
pub mod graph;
pub mod layers;

// Re-exports for convenience
pub use architecture::{DenseUNet, DenseUNetConfig, ModelFactory};
pub use errors::ModelError;
pub use graph::{CompiledModel, ModelGraph, Shape};
pub use layers::activation::Activation;

/// Backend type alias for WGPU with autodiff support.
pub type Backend = burn::backend::Autodiff<burn::backend::Wgpu>;

/// Backend type for inference (no autodiff).
pub type InferenceBackend = burn::backend::Wgpu;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::architecture::{DenseBlock, DenseUNet, DenseUNetConfig, ModelFactory};
    pub use crate::errors::ModelError;
    pub use crate::graph::{CompiledModel, InputBuffer, ModelGraph, Shape, ops};
    pub use crate::layers::{Activation, KernelInit};
    pub use crate::{Backend, InferenceBackend};
}
