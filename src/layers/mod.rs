//! Neural network layer implementations.
//!
//! This module contains the building blocks the compiled model is made of:
//! convolutions with "same" padding, batch normalization, activation
//! functions and kernel initializers.

pub mod activation;
pub mod conv;
pub mod initializer;
pub mod norm;

pub use activation::Activation;
pub use conv::{ConvLayer, ConvLayerConfig};
pub use initializer::KernelInit;
pub use norm::NormLayer;
