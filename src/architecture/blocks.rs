//! Densely connected convolutional blocks.

use crate::graph::{ConvSpec, DataBuffer, ops};
use crate::layers::{Activation, KernelInit};

/// Kernel size of a dense-block convolution.
pub const DENSE_KERNEL_SIZE: usize = 5;

/// Dilation of a dense-block convolution (a 5x5 kernel covering 9x9).
pub const DENSE_DILATION: usize = 2;

/// One dense-block sub-layer: batch norm, ReLU, dilated 5x5 convolution
/// and optional dropout.
///
/// Batch norm gamma/beta and the convolution kernel carry an L2
/// regularizer of `weight_decay`.
pub fn conv_factory(
    filters: usize,
    dropout_rate: Option<f64>,
    weight_decay: f32,
    input: DataBuffer,
) -> DataBuffer {
    let x = ops::batch_norm_regularized(weight_decay, input);
    let x = ops::relu(x);
    let spec = ConvSpec::new(filters, DENSE_KERNEL_SIZE, Activation::None, KernelInit::HeUniform)
        .with_dilation(DENSE_DILATION)
        .with_weight_decay(weight_decay);
    let x = ops::conv2d_with(spec, x);
    match dropout_rate {
        Some(rate) if rate > 0.0 => ops::dropout(rate, x),
        _ => x,
    }
}

/// A dense block: every sub-layer sees the concatenation of the block
/// input and all previous sub-layer outputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DenseBlock {
    pub layers: usize,
    pub growth_rate: usize,
    pub dropout_rate: Option<f64>,
    pub weight_decay: f32,
}

impl DenseBlock {
    pub fn new(layers: usize, growth_rate: usize) -> Self {
        Self {
            layers,
            growth_rate,
            dropout_rate: None,
            weight_decay: 1e-4,
        }
    }

    pub fn with_dropout(mut self, rate: Option<f64>) -> Self {
        self.dropout_rate = rate;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Channels coming out of the block for `in_channels` going in.
    pub fn output_channels(&self, in_channels: usize) -> usize {
        in_channels + self.layers * self.growth_rate
    }

    /// Appends the block to the graph.
    pub fn apply(&self, input: DataBuffer) -> DataBuffer {
        let mut features = vec![input.clone()];
        let mut x = input;
        for _ in 0..self.layers {
            let grown = conv_factory(self.growth_rate, self.dropout_rate, self.weight_decay, x);
            features.push(grown);
            x = ops::concat(features.clone());
        }
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{InputBuffer, ModelGraph, Operation, Shape};

    #[test]
    fn test_conv_factory_layer_order() {
        let input = InputBuffer::new(Shape::new(16, 16, 8));
        let output = conv_factory(16, Some(0.5), 1e-4, input.buffer());
        let graph = ModelGraph::new(vec![input], output);

        let kinds: Vec<&str> = graph
            .nodes()
            .iter()
            .filter_map(|n| n.producer().map(|op| op.kind()))
            .collect();
        assert_eq!(
            kinds,
            vec!["BatchNormalization", "Activation", "Conv2D", "Dropout"]
        );
        assert_eq!(graph.output_shape(), Shape::new(16, 16, 16));
    }

    #[test]
    fn test_conv_factory_without_dropout() {
        let input = InputBuffer::new(Shape::new(8, 8, 4));
        let output = conv_factory(16, None, 1e-4, input.buffer());
        assert_eq!(output.producer().map(|op| op.kind()), Some("Conv2D"));
    }

    #[test]
    fn test_conv_factory_uses_dilated_regularized_kernel() {
        let input = InputBuffer::new(Shape::new(8, 8, 4));
        let output = conv_factory(16, None, 1e-4, input.buffer());
        match output.producer() {
            Some(Operation::Conv2d { spec, .. }) => {
                assert_eq!(spec.kernel_size, 5);
                assert_eq!(spec.dilation, 2);
                assert_eq!(spec.init, KernelInit::HeUniform);
                assert_eq!(spec.activation, Activation::None);
                assert_eq!(spec.weight_decay, Some(1e-4));
            }
            other => panic!("unexpected producer {other:?}"),
        }
    }

    #[test]
    fn test_dense_block_growth() {
        let block = DenseBlock::new(4, 16).with_dropout(Some(0.5));
        let input = InputBuffer::new(Shape::new(64, 64, 16));
        let output = block.apply(input.buffer());
        assert_eq!(output.shape(), Shape::new(64, 64, 80));
        assert_eq!(block.output_channels(16), 80);
    }

    #[test]
    fn test_dense_block_concatenates_all_previous_features() {
        let block = DenseBlock::new(3, 16);
        let input = InputBuffer::new(Shape::new(8, 8, 32));
        let output = block.apply(input.buffer());

        // Last concat joins the block input with all three sub-layer outputs.
        assert!(matches!(output.producer(), Some(Operation::Concat { .. })));
        let channels: Vec<usize> = output.inputs().iter().map(|b| b.shape().channels).collect();
        assert_eq!(channels, vec![32, 16, 16, 16]);
        assert_eq!(output.inputs()[0].id(), input.id());
    }

    #[test]
    fn test_empty_dense_block_is_identity() {
        let input = InputBuffer::new(Shape::new(8, 8, 32));
        let output = DenseBlock::new(0, 16).apply(input.buffer());
        assert_eq!(output.id(), input.id());
    }
}
