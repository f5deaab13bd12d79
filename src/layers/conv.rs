//! 2D convolution with "same" padding and a fused activation.

use burn::{
    module::Module,
    nn::{
        Initializer, PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig},
    },
    tensor::{Tensor, backend::Backend},
};

use crate::layers::{Activation, KernelInit};

/// Configuration for a ConvLayer.
#[derive(Debug, Clone)]
pub struct ConvLayerConfig {
    /// Number of input channels.
    pub in_channels: usize,
    /// Number of output channels (filters).
    pub filters: usize,
    /// Square kernel size.
    pub kernel_size: usize,
    /// Dilation rate, applied on both axes.
    pub dilation: usize,
    /// Activation applied after the convolution.
    pub activation: Activation,
    /// Kernel initializer.
    pub init: KernelInit,
}

impl ConvLayerConfig {
    /// Creates a new ConvLayerConfig with no dilation and no activation.
    pub fn new(in_channels: usize, filters: usize, kernel_size: usize) -> Self {
        Self {
            in_channels,
            filters,
            kernel_size,
            dilation: 1,
            activation: Activation::None,
            init: KernelInit::default(),
        }
    }

    pub fn with_dilation(mut self, dilation: usize) -> Self {
        self.dilation = dilation;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_init(mut self, init: KernelInit) -> Self {
        self.init = init;
        self
    }

    /// Returns the (before, after) padding that keeps the spatial size.
    ///
    /// For even effective kernels the extra row and column go after,
    /// matching TensorFlow's "same" padding.
    pub fn same_padding(&self) -> (usize, usize) {
        let total = self.dilation * (self.kernel_size - 1);
        let before = total / 2;
        (before, total - before)
    }

    /// Initializes the layer on the given device.
    ///
    /// The kernel uses `init`; the bias starts at zero.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvLayer<B> {
        let mut conv = Conv2dConfig::new(
            [self.in_channels, self.filters],
            [self.kernel_size, self.kernel_size],
        )
        .with_dilation([self.dilation, self.dilation])
        .with_padding(PaddingConfig2d::Valid)
        .with_bias(true)
        .with_initializer(self.init.to_initializer())
        .init(device);
        // Burn draws the bias from the kernel initializer.
        conv.bias = Some(Initializer::Zeros.init([self.filters], device));

        let (pad_before, pad_after) = self.same_padding();

        ConvLayer {
            conv,
            in_channels: self.in_channels,
            filters: self.filters,
            pad_before,
            pad_after,
            activation_id: self.activation.to_id(),
        }
    }
}

/// A convolution that preserves height and width, followed by an activation.
///
/// Padding is applied explicitly before a valid convolution so that even
/// kernels and dilated kernels pad exactly like the reference framework.
#[derive(Module, Debug)]
pub struct ConvLayer<B: Backend> {
    conv: Conv2d<B>,
    in_channels: usize,
    filters: usize,
    pad_before: usize,
    pad_after: usize,
    activation_id: u8,
}

impl<B: Backend> ConvLayer<B> {
    /// Performs the forward pass on an NCHW tensor.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let padded = if self.pad_before + self.pad_after > 0 {
            // (left, right, top, bottom)
            input.pad(
                (
                    self.pad_before,
                    self.pad_after,
                    self.pad_before,
                    self.pad_after,
                ),
                0.0,
            )
        } else {
            input
        };
        self.activation().apply(self.conv.forward(padded))
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn filters(&self) -> usize {
        self.filters
    }

    pub fn activation(&self) -> Activation {
        Activation::from_id(self.activation_id)
    }

    /// Returns the kernel tensor, shape `[filters, in_channels, k, k]`.
    pub fn kernel(&self) -> Tensor<B, 4> {
        self.conv.weight.val()
    }

    /// Extracts the kernel as a flat vector in Burn's layout.
    pub fn kernel_to_vec(&self) -> Vec<f32> {
        self.kernel().to_data().convert::<f32>().to_vec().unwrap_or_default()
    }

    /// Extracts the bias as a 1D vector.
    pub fn bias_to_vec(&self) -> Vec<f32> {
        match &self.conv.bias {
            Some(bias) => bias
                .val()
                .to_data()
                .convert::<f32>()
                .to_vec()
                .unwrap_or_default(),
            None => vec![0.0; self.filters],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_same_padding_odd_kernel() {
        assert_eq!(ConvLayerConfig::new(1, 1, 3).same_padding(), (1, 1));
        assert_eq!(ConvLayerConfig::new(1, 1, 1).same_padding(), (0, 0));
    }

    #[test]
    fn test_same_padding_dilated_kernel() {
        // 5x5 with dilation 2 covers 9x9.
        let config = ConvLayerConfig::new(1, 1, 5).with_dilation(2);
        assert_eq!(config.same_padding(), (4, 4));
    }

    #[test]
    fn test_same_padding_even_kernel_pads_after() {
        assert_eq!(ConvLayerConfig::new(1, 1, 2).same_padding(), (0, 1));
    }

    #[test]
    fn test_forward_preserves_spatial_size() {
        let device = <TestBackend as Backend>::Device::default();
        for (kernel, dilation) in [(3, 1), (5, 2), (2, 1), (1, 1)] {
            let layer: ConvLayer<TestBackend> = ConvLayerConfig::new(3, 4, kernel)
                .with_dilation(dilation)
                .with_activation(Activation::Relu)
                .init(&device);

            let input = Tensor::<TestBackend, 4>::ones([2, 3, 8, 6], &device);
            let output = layer.forward(input);
            assert_eq!(
                output.dims(),
                [2, 4, 8, 6],
                "kernel {kernel} dilation {dilation}"
            );
        }
    }

    #[test]
    fn test_relu_output_is_non_negative() {
        let device = <TestBackend as Backend>::Device::default();
        let layer: ConvLayer<TestBackend> = ConvLayerConfig::new(1, 2, 3)
            .with_activation(Activation::Relu)
            .with_init(KernelInit::HeNormal)
            .init(&device);

        let input = Tensor::<TestBackend, 4>::random(
            [1, 1, 5, 5],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        let output: Vec<f32> = layer.forward(input).to_data().to_vec().unwrap();
        assert!(output.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_kernel_extraction() {
        let device = <TestBackend as Backend>::Device::default();
        let layer: ConvLayer<TestBackend> = ConvLayerConfig::new(3, 2, 5).init(&device);

        assert_eq!(layer.kernel().dims(), [2, 3, 5, 5]);
        assert_eq!(layer.kernel_to_vec().len(), 2 * 3 * 5 * 5);
        assert_eq!(layer.bias_to_vec().len(), 2);
        assert_eq!(layer.in_channels(), 3);
        assert_eq!(layer.filters(), 2);
    }

    #[test]
    fn test_bias_starts_at_zero() {
        let device = <TestBackend as Backend>::Device::default();
        for init in [
            KernelInit::HeNormal,
            KernelInit::HeUniform,
            KernelInit::GlorotUniform,
        ] {
            let layer: ConvLayer<TestBackend> = ConvLayerConfig::new(1, 16, 3)
                .with_init(init)
                .init(&device);

            let bias = layer.bias_to_vec();
            assert_eq!(bias.len(), 16);
            assert!(bias.iter().all(|b| *b == 0.0), "{init:?}: {bias:?}");
            assert!(layer.kernel_to_vec().iter().any(|w| *w != 0.0));
        }
    }
}
