//! Functional graph API for building convolutional networks.
//!
//! Graphs are built from shapes alone; weights only exist once the graph is
//! compiled for a backend.
//!
//! # Example
//!
//! ```
//! use speckle_unet::graph::{InputBuffer, ModelGraph, Shape, ops};
//! use speckle_unet::layers::{Activation, KernelInit};
//! use burn::backend::NdArray;
//! use burn::tensor::backend::Backend;
//!
//! type TestBackend = NdArray;
//! let device = <TestBackend as Backend>::Device::default();
//!
//! // Create input and build graph (no device needed)
//! let input = InputBuffer::new(Shape::new(16, 16, 1));
//! let x = ops::conv2d(8, 3, Activation::Relu, KernelInit::HeNormal, input.buffer());
//! let skip = x.clone();
//! let x = ops::max_pool2d(2, x);
//! let x = ops::up_sampling2d(2, x);
//! let x = ops::concat(vec![skip, x]);
//! let output = ops::conv2d(2, 1, Activation::Softmax, KernelInit::GlorotUniform, x);
//! let graph = ModelGraph::new(vec![input], output);
//!
//! // Compile to create weights on device
//! let model = graph.compile::<TestBackend>(&device).unwrap();
//! assert_eq!(model.output_shape(), Shape::new(16, 16, 2));
//! ```

mod buffer;
mod export;
mod model;
mod operation;
mod structure;

pub use buffer::{BufferId, DataBuffer, InputBuffer, Shape};
pub use export::{LayerExport, LayerSummary, ModelSummary, SummaryContext};
pub use model::CompiledModel;
pub use operation::{ConvSpec, OpId, Operation, ops};
pub use structure::{GraphId, ModelGraph};
