//! ModelGraph - graph structure without weights.
//!
//! This module contains the non-generic ModelGraph that represents
//! the computation graph structure. Weights are only created when
//! `compile()` is called.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use burn::tensor::backend::Backend;

use super::buffer::{BufferId, DataBuffer, InputBuffer, Shape};
use super::export::{ModelSummary, SummaryContext};
use super::model::CompiledModel;
use super::operation::Operation;
use crate::errors::ModelError;

/// Global counter for unique graph IDs.
static GRAPH_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Unique identifier for a ModelGraph.
pub type GraphId = usize;

fn next_graph_id() -> GraphId {
    GRAPH_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// ModelGraph represents the computation graph structure without weights.
///
/// Call `compile()` to create a `CompiledModel` with actual weight tensors.
/// Every call creates fresh weights, so one graph can back any number of
/// independently trained models.
///
/// # Example
///
/// ```
/// use speckle_unet::graph::{InputBuffer, ModelGraph, Shape, ops};
/// use speckle_unet::layers::{Activation, KernelInit};
/// use burn::backend::NdArray;
/// use burn::tensor::backend::Backend;
///
/// let device = <NdArray as Backend>::Device::default();
/// let input = InputBuffer::new(Shape::new(8, 8, 1));
/// let output = ops::conv2d(2, 1, Activation::Softmax, KernelInit::GlorotUniform, input.buffer());
/// let graph = ModelGraph::new(vec![input], output);
///
/// // Compile to create weights
/// let model = graph.compile::<NdArray>(&device).unwrap();
/// assert_eq!(model.output_shape(), Shape::new(8, 8, 2));
/// ```
#[derive(Clone, Debug)]
pub struct ModelGraph {
    id: GraphId,
    inputs: Vec<InputBuffer>,
    /// Output buffer (carries the graph structure via the producer chain)
    output: DataBuffer,
}

impl ModelGraph {
    /// Creates a new ModelGraph from input buffers and output buffer.
    ///
    /// This only captures the graph structure - no weights are created.
    pub fn new(inputs: Vec<InputBuffer>, output: DataBuffer) -> Self {
        Self {
            id: next_graph_id(),
            inputs,
            output,
        }
    }

    /// Returns the unique ID of this graph.
    pub fn id(&self) -> GraphId {
        self.id
    }

    /// Returns the input buffers.
    pub fn inputs(&self) -> &[InputBuffer] {
        &self.inputs
    }

    /// Returns the output buffer.
    pub fn output(&self) -> &DataBuffer {
        &self.output
    }

    /// Returns the shape of the first input.
    pub fn input_shape(&self) -> Option<Shape> {
        self.inputs.first().map(|i| i.shape())
    }

    /// Returns the output shape of the model.
    pub fn output_shape(&self) -> Shape {
        self.output.shape()
    }

    /// Returns every buffer reachable from the output, inputs first,
    /// each after all of its dependencies.
    pub fn nodes(&self) -> Vec<DataBuffer> {
        fn visit(buffer: &DataBuffer, seen: &mut HashSet<BufferId>, order: &mut Vec<DataBuffer>) {
            if !seen.insert(buffer.id()) {
                return;
            }
            for input in buffer.inputs() {
                visit(input, seen, order);
            }
            order.push(buffer.clone());
        }

        let mut seen = HashSet::new();
        let mut order = Vec::new();
        for input in &self.inputs {
            visit(&input.buffer(), &mut seen, &mut order);
        }
        visit(&self.output, &mut seen, &mut order);
        order
    }

    /// Finds a buffer by name.
    pub fn find(&self, name: &str) -> Option<DataBuffer> {
        self.nodes().into_iter().find(|b| b.name() == Some(name))
    }

    /// Returns the names of the buffers concatenated into the named buffer.
    ///
    /// Unnamed sources are reported as `None`; returns `None` when the
    /// buffer does not exist or is not produced by a concatenation.
    pub fn concat_sources(&self, name: &str) -> Option<Vec<Option<String>>> {
        let buffer = self.find(name)?;
        match buffer.producer()? {
            Operation::Concat { .. } => Some(
                buffer
                    .inputs()
                    .iter()
                    .map(|b| b.name().map(String::from))
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Walks the graph into a layer-by-layer summary.
    pub fn summary(&self) -> Result<ModelSummary, ModelError> {
        let mut ctx = SummaryContext::new();
        for input in &self.inputs {
            ctx.register_input(&input.buffer());
        }
        ctx.visit(&self.output).ok_or_else(|| {
            ModelError::InvalidGraph(
                "Buffer has no producer and is not a registered input".to_string(),
            )
        })?;
        Ok(ctx.into_summary(self.output_shape()))
    }

    /// Exports the architecture description as pretty JSON.
    pub fn to_json(&self) -> Result<String, ModelError> {
        let summary = self.summary()?;
        Ok(serde_json::to_string_pretty(&summary)?)
    }

    /// Compiles this graph into a CompiledModel with initialized weights.
    ///
    /// This is where the actual weight tensors are created on the specified device.
    pub fn compile<B: Backend>(&self, device: &B::Device) -> Result<CompiledModel<B>, ModelError> {
        CompiledModel::new(&self.inputs, &self.output, device)
    }
}
