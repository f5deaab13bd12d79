//! Operations for the computation graph.
//!
//! Uses a simple enum instead of trait objects for clarity.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

use crate::layers::norm::{DEFAULT_EPSILON, DEFAULT_MOMENTUM};
use crate::layers::{Activation, KernelInit};

use super::buffer::{DataBuffer, Shape};

/// Unique identifier for an operation.
pub type OpId = usize;

/// Global counter for unique operation IDs.
static OP_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Generates a new unique operation ID.
pub(crate) fn next_op_id() -> OpId {
    OP_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Hyperparameters of a convolution node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConvSpec {
    pub filters: usize,
    pub kernel_size: usize,
    pub dilation: usize,
    pub activation: Activation,
    pub init: KernelInit,
    /// L2 factor on the kernel, if regularized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_decay: Option<f32>,
}

impl ConvSpec {
    /// A plain convolution: no dilation, no regularizer.
    pub fn new(filters: usize, kernel_size: usize, activation: Activation, init: KernelInit) -> Self {
        Self {
            filters,
            kernel_size,
            dilation: 1,
            activation,
            init,
            weight_decay: None,
        }
    }

    pub fn with_dilation(mut self, dilation: usize) -> Self {
        self.dilation = dilation;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = Some(weight_decay);
        self
    }
}

/// A computation operation in the graph.
#[derive(Debug, Clone)]
pub enum Operation {
    /// 2D convolution with "same" padding and a fused activation.
    Conv2d { id: OpId, spec: ConvSpec },
    /// Batch normalization over the channel axis.
    BatchNorm {
        id: OpId,
        epsilon: f64,
        momentum: f64,
        /// L2 factor on gamma and beta, if regularized.
        weight_decay: Option<f32>,
    },
    /// Standalone activation.
    Activation { id: OpId, activation: Activation },
    /// Dropout, active only while training.
    Dropout { id: OpId, rate: f64 },
    /// Max pooling with a square window and matching stride.
    MaxPool2d { id: OpId, pool_size: usize },
    /// Nearest-neighbour upsampling by an integer factor.
    UpSampling2d { id: OpId, factor: usize },
    /// Concatenate buffers along the channel axis.
    Concat { id: OpId },
}

impl Operation {
    /// Creates a new Conv2d operation.
    pub fn conv2d(spec: ConvSpec) -> Self {
        Self::Conv2d {
            id: next_op_id(),
            spec,
        }
    }

    /// Creates a new BatchNorm operation.
    pub fn batch_norm(epsilon: f64, momentum: f64, weight_decay: Option<f32>) -> Self {
        Self::BatchNorm {
            id: next_op_id(),
            epsilon,
            momentum,
            weight_decay,
        }
    }

    /// Creates a new BatchNorm operation with Keras defaults (eps 1e-3, momentum 0.99).
    pub fn batch_norm_default() -> Self {
        Self::batch_norm(DEFAULT_EPSILON, DEFAULT_MOMENTUM, None)
    }

    /// Creates a new Activation operation.
    pub fn activation(activation: Activation) -> Self {
        Self::Activation {
            id: next_op_id(),
            activation,
        }
    }

    /// Creates a new Dropout operation.
    pub fn dropout(rate: f64) -> Self {
        Self::Dropout {
            id: next_op_id(),
            rate,
        }
    }

    /// Creates a new MaxPool2d operation.
    pub fn max_pool2d(pool_size: usize) -> Self {
        Self::MaxPool2d {
            id: next_op_id(),
            pool_size,
        }
    }

    /// Creates a new UpSampling2d operation.
    pub fn up_sampling2d(factor: usize) -> Self {
        Self::UpSampling2d {
            id: next_op_id(),
            factor,
        }
    }

    /// Creates a new Concat operation.
    pub fn concat() -> Self {
        Self::Concat { id: next_op_id() }
    }

    /// Returns the unique ID of this operation.
    pub fn id(&self) -> OpId {
        match self {
            Self::Conv2d { id, .. } => *id,
            Self::BatchNorm { id, .. } => *id,
            Self::Activation { id, .. } => *id,
            Self::Dropout { id, .. } => *id,
            Self::MaxPool2d { id, .. } => *id,
            Self::UpSampling2d { id, .. } => *id,
            Self::Concat { id } => *id,
        }
    }

    /// Returns the layer kind, Keras spelling.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Conv2d { .. } => "Conv2D",
            Self::BatchNorm { .. } => "BatchNormalization",
            Self::Activation { .. } => "Activation",
            Self::Dropout { .. } => "Dropout",
            Self::MaxPool2d { .. } => "MaxPooling2D",
            Self::UpSampling2d { .. } => "UpSampling2D",
            Self::Concat { .. } => "Concatenate",
        }
    }

    /// Returns the output shape for this operation given input shapes.
    pub fn output_shape(&self, input_shapes: &[Shape]) -> Shape {
        let first = input_shapes[0];
        match self {
            Self::Conv2d { spec, .. } => first.with_channels(spec.filters),
            Self::BatchNorm { .. } | Self::Activation { .. } | Self::Dropout { .. } => first,
            Self::MaxPool2d { pool_size, .. } => Shape::new(
                first.height / pool_size,
                first.width / pool_size,
                first.channels,
            ),
            Self::UpSampling2d { factor, .. } => Shape::new(
                first.height * factor,
                first.width * factor,
                first.channels,
            ),
            Self::Concat { .. } => first.with_channels(input_shapes.iter().map(|s| s.channels).sum()),
        }
    }

    /// Returns `(trainable, non_trainable)` parameter counts for the given input shapes.
    pub fn param_counts(&self, input_shapes: &[Shape]) -> (usize, usize) {
        match self {
            Self::Conv2d { spec, .. } => {
                let kernel = spec.kernel_size * spec.kernel_size * input_shapes[0].channels;
                (kernel * spec.filters + spec.filters, 0)
            }
            // gamma and beta are trained, the running statistics are not
            Self::BatchNorm { .. } => {
                let channels = input_shapes[0].channels;
                (2 * channels, 2 * channels)
            }
            _ => (0, 0),
        }
    }

    /// Applies this operation to an input buffer, returning a new DataBuffer.
    pub fn apply(&self, input: DataBuffer) -> DataBuffer {
        let output_shape = self.output_shape(&[input.shape()]);
        DataBuffer::new(output_shape, Some(self.clone()), vec![input])
    }

    /// Applies this operation to multiple input buffers.
    pub fn apply_multi(&self, inputs: Vec<DataBuffer>) -> DataBuffer {
        let input_shapes: Vec<Shape> = inputs.iter().map(|b| b.shape()).collect();
        let output_shape = self.output_shape(&input_shapes);
        DataBuffer::new(output_shape, Some(self.clone()), inputs)
    }
}

/// Convenience functions for creating operations and applying them in one step.
/// These read like the Keras functional API.
pub mod ops {
    use super::*;

    /// Creates a Conv2d layer and applies it to the input.
    ///
    /// # Example
    /// ```
    /// use speckle_unet::graph::{InputBuffer, Shape, ops};
    /// use speckle_unet::layers::{Activation, KernelInit};
    ///
    /// let input = InputBuffer::new(Shape::new(64, 64, 1));
    /// let output = ops::conv2d(16, 3, Activation::Relu, KernelInit::HeNormal, input.buffer());
    /// assert_eq!(output.shape(), Shape::new(64, 64, 16));
    /// ```
    pub fn conv2d(
        filters: usize,
        kernel_size: usize,
        activation: Activation,
        init: KernelInit,
        input: DataBuffer,
    ) -> DataBuffer {
        conv2d_with(ConvSpec::new(filters, kernel_size, activation, init), input)
    }

    /// Applies a convolution described by a full `ConvSpec`.
    pub fn conv2d_with(spec: ConvSpec, input: DataBuffer) -> DataBuffer {
        assert!(spec.filters > 0, "Conv2d requires at least 1 filter");
        assert!(spec.kernel_size > 0, "Conv2d kernel size must be positive");
        assert!(spec.dilation > 0, "Conv2d dilation must be positive");
        Operation::conv2d(spec).apply(input)
    }

    /// Applies batch normalization with Keras defaults.
    pub fn batch_norm(input: DataBuffer) -> DataBuffer {
        Operation::batch_norm_default().apply(input)
    }

    /// Applies batch normalization with an L2 regularizer on gamma and beta.
    pub fn batch_norm_regularized(weight_decay: f32, input: DataBuffer) -> DataBuffer {
        Operation::batch_norm(DEFAULT_EPSILON, DEFAULT_MOMENTUM, Some(weight_decay)).apply(input)
    }

    /// Applies an activation function as its own layer.
    pub fn activation(activation: Activation, input: DataBuffer) -> DataBuffer {
        Operation::activation(activation).apply(input)
    }

    /// Applies ReLU as its own layer.
    pub fn relu(input: DataBuffer) -> DataBuffer {
        activation(Activation::Relu, input)
    }

    /// Applies dropout with the given drop rate.
    pub fn dropout(rate: f64, input: DataBuffer) -> DataBuffer {
        assert!(
            (0.0..1.0).contains(&rate),
            "Dropout rate must be in [0, 1)"
        );
        Operation::dropout(rate).apply(input)
    }

    /// Downsamples with a square max-pooling window.
    ///
    /// # Example
    /// ```
    /// use speckle_unet::graph::{InputBuffer, Shape, ops};
    ///
    /// let input = InputBuffer::new(Shape::new(64, 64, 80));
    /// let pooled = ops::max_pool2d(2, input.buffer());
    /// assert_eq!(pooled.shape(), Shape::new(32, 32, 80));
    /// ```
    pub fn max_pool2d(pool_size: usize, input: DataBuffer) -> DataBuffer {
        let shape = input.shape();
        assert!(pool_size > 0, "MaxPool2d pool size must be positive");
        assert!(
            shape.height >= pool_size && shape.width >= pool_size,
            "MaxPool2d window {pool_size} does not fit input {shape}"
        );
        Operation::max_pool2d(pool_size).apply(input)
    }

    /// Repeats rows and columns `factor` times.
    pub fn up_sampling2d(factor: usize, input: DataBuffer) -> DataBuffer {
        assert!(factor > 0, "UpSampling2d factor must be positive");
        Operation::up_sampling2d(factor).apply(input)
    }

    /// Concatenates buffers along the channel axis.
    ///
    /// # Example
    /// ```
    /// use speckle_unet::graph::{InputBuffer, Shape, ops};
    ///
    /// let a = InputBuffer::new(Shape::new(8, 8, 3));
    /// let b = InputBuffer::new(Shape::new(8, 8, 5));
    /// let merged = ops::concat(vec![a.buffer(), b.buffer()]);
    /// assert_eq!(merged.shape(), Shape::new(8, 8, 8));
    /// ```
    pub fn concat(inputs: Vec<DataBuffer>) -> DataBuffer {
        assert!(!inputs.is_empty(), "Concat requires at least 1 input");
        let shape = inputs[0].shape();
        for input in &inputs[1..] {
            assert!(
                input.shape().same_spatial(&shape),
                "All inputs to Concat must share height and width"
            );
        }
        Operation::concat().apply_multi(inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::buffer::InputBuffer;

    fn input(h: usize, w: usize, c: usize) -> DataBuffer {
        InputBuffer::new(Shape::new(h, w, c)).buffer()
    }

    #[test]
    fn test_unique_ids() {
        let op1 = Operation::concat();
        let op2 = Operation::dropout(0.5);
        let op3 = Operation::max_pool2d(2);

        assert_ne!(op1.id(), op2.id());
        assert_ne!(op2.id(), op3.id());
    }

    #[test]
    fn test_conv_output_shape() {
        let spec = ConvSpec::new(16, 3, Activation::Relu, KernelInit::HeNormal);
        let conv = Operation::conv2d(spec);
        assert_eq!(
            conv.output_shape(&[Shape::new(64, 64, 1)]),
            Shape::new(64, 64, 16)
        );
    }

    #[test]
    fn test_pool_floors_odd_sizes() {
        let pool = Operation::max_pool2d(2);
        assert_eq!(
            pool.output_shape(&[Shape::new(5, 7, 3)]),
            Shape::new(2, 3, 3)
        );
    }

    #[test]
    fn test_up_sampling_output_shape() {
        let up = Operation::up_sampling2d(2);
        assert_eq!(
            up.output_shape(&[Shape::new(4, 4, 320)]),
            Shape::new(8, 8, 320)
        );
    }

    #[test]
    fn test_concat_output_shape() {
        let concat = Operation::concat();
        let shapes = [Shape::new(8, 8, 192), Shape::new(8, 8, 64)];
        assert_eq!(concat.output_shape(&shapes), Shape::new(8, 8, 256));
    }

    #[test]
    fn test_conv_param_counts() {
        let spec = ConvSpec::new(16, 3, Activation::Relu, KernelInit::HeNormal);
        let conv = Operation::conv2d(spec);
        // 3*3*1*16 + 16
        assert_eq!(conv.param_counts(&[Shape::new(64, 64, 1)]), (160, 0));
    }

    #[test]
    fn test_batch_norm_param_counts() {
        let bn = Operation::batch_norm_default();
        assert_eq!(bn.param_counts(&[Shape::new(8, 8, 32)]), (64, 64));
        assert_eq!(Operation::dropout(0.5).param_counts(&[Shape::new(8, 8, 32)]), (0, 0));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Operation::concat().kind(), "Concatenate");
        assert_eq!(Operation::up_sampling2d(2).kind(), "UpSampling2D");
        assert_eq!(Operation::batch_norm_default().kind(), "BatchNormalization");
    }

    #[test]
    fn test_convenience_chain() {
        let x = ops::conv2d(8, 3, Activation::Relu, KernelInit::HeNormal, input(16, 16, 1));
        let x = ops::batch_norm(x);
        let x = ops::relu(x);
        let x = ops::dropout(0.5, x);
        let pooled = ops::max_pool2d(2, x);
        let up = ops::up_sampling2d(2, pooled);
        assert_eq!(up.shape(), Shape::new(16, 16, 8));
        assert!(up.producer().is_some());
    }

    #[test]
    fn test_regularized_batch_norm_records_decay() {
        let x = ops::batch_norm_regularized(1e-4, input(4, 4, 2));
        match x.producer() {
            Some(Operation::BatchNorm { weight_decay, .. }) => {
                assert_eq!(*weight_decay, Some(1e-4))
            }
            other => panic!("unexpected producer {other:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "Concat requires at least 1 input")]
    fn test_concat_requires_input() {
        ops::concat(vec![]);
    }

    #[test]
    #[should_panic(expected = "All inputs to Concat must share height and width")]
    fn test_concat_requires_same_spatial_size() {
        ops::concat(vec![input(8, 8, 2), input(4, 4, 2)]);
    }

    #[test]
    #[should_panic(expected = "Dropout rate must be in [0, 1)")]
    fn test_dropout_rejects_rate_one() {
        ops::dropout(1.0, input(4, 4, 1));
    }

    #[test]
    #[should_panic(expected = "does not fit input")]
    fn test_pool_larger_than_input() {
        ops::max_pool2d(4, input(2, 2, 1));
    }
}
