//! Batch normalization over the channel axis of a feature map.

use burn::{
    module::Module,
    nn::{BatchNorm, BatchNormConfig},
    tensor::{Tensor, backend::Backend},
};

/// Keras-side default epsilon.
pub const DEFAULT_EPSILON: f64 = 1e-3;

/// Keras-side default momentum (weight of the old running statistic).
pub const DEFAULT_MOMENTUM: f64 = 0.99;

/// Initialized BatchNorm layer with Burn's BatchNorm module.
#[derive(Module, Debug)]
pub struct NormLayer<B: Backend> {
    batch_norm: BatchNorm<B, 2>,
    num_features: usize,
}

impl<B: Backend> NormLayer<B> {
    /// Creates a batch norm layer.
    ///
    /// `momentum` is given the Keras way; Burn weighs the new statistic,
    /// so it receives `1 - momentum`.
    pub fn new(num_features: usize, epsilon: f64, momentum: f64, device: &B::Device) -> Self {
        let batch_norm = BatchNormConfig::new(num_features)
            .with_epsilon(epsilon)
            .with_momentum(1.0 - momentum)
            .init(device);
        Self {
            batch_norm,
            num_features,
        }
    }

    /// Normalizes an NCHW tensor per channel.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.batch_norm.forward(input)
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Returns the learned scale.
    pub fn gamma(&self) -> Tensor<B, 1> {
        self.batch_norm.gamma.val()
    }

    /// Returns the learned offset.
    pub fn beta(&self) -> Tensor<B, 1> {
        self.batch_norm.beta.val()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_forward_initial_state_is_near_identity() {
        let device = <TestBackend as Backend>::Device::default();
        let layer = NormLayer::<TestBackend>::new(2, DEFAULT_EPSILON, DEFAULT_MOMENTUM, &device);

        // Initial state: gamma=1, beta=0, running_mean=0, running_var=1
        // output = x / sqrt(1 + eps)
        let input =
            Tensor::<TestBackend, 4>::from_floats([[[[1.0, 2.0]], [[-3.0, 4.0]]]], &device);
        let output: Vec<f32> = layer.forward(input).to_data().to_vec().unwrap();

        let scale = 1.0 / (1.0 + DEFAULT_EPSILON as f32).sqrt();
        let expected = [1.0 * scale, 2.0 * scale, -3.0 * scale, 4.0 * scale];
        for (got, want) in output.iter().zip(expected) {
            assert!((got - want).abs() < 1e-4, "got {got}, expected {want}");
        }
    }

    #[test]
    fn test_parameters_have_channel_length() {
        let device = <TestBackend as Backend>::Device::default();
        let layer = NormLayer::<TestBackend>::new(16, DEFAULT_EPSILON, DEFAULT_MOMENTUM, &device);

        assert_eq!(layer.num_features(), 16);
        assert_eq!(layer.gamma().dims(), [16]);
        assert_eq!(layer.beta().dims(), [16]);
    }

    #[test]
    fn test_preserves_shape() {
        let device = <TestBackend as Backend>::Device::default();
        let layer = NormLayer::<TestBackend>::new(3, DEFAULT_EPSILON, DEFAULT_MOMENTUM, &device);
        let input = Tensor::<TestBackend, 4>::ones([4, 3, 5, 7], &device);
        assert_eq!(layer.forward(input).dims(), [4, 3, 5, 7]);
    }
}
