//! U-Net with dense blocks, after "Deep speckle correlation: a deep learning
//! approach towards scalable imaging through scattering media"
//! (Li, Xue & Tian, 2018).
//!
//! Level `i` of the encoder runs at `1 / 2^i` of the input resolution. Its
//! dense-block output is concatenated with the up-sampled decoder features
//! arriving at the same level, so encoder level `i` feeds decoder level `i`.
//!
//! Stage names in the built graph:
//!
//! | stage | name |
//! |---|---|
//! | input | `input` |
//! | encoder level `i` | `encoder{i}_conv`, `encoder{i}_dense`, `encoder{i}_pool` |
//! | bottleneck | `bottleneck_conv`, `bottleneck_dense` |
//! | decoder level `i` | `decoder{i}_upconv`, `decoder{i}_merge`, `decoder{i}_conv`, `decoder{i}_dense` |
//! | head | `head_conv`, `output` |

use serde::{Deserialize, Serialize};

use crate::errors::ModelError;
use crate::graph::{DataBuffer, InputBuffer, ModelGraph, Shape, ops};
use crate::layers::{Activation, KernelInit};

use super::ModelFactory;
use super::blocks::DenseBlock;

/// Hyperparameters of the Dense U-Net.
///
/// The default reproduces the published network: 64x64x1 speckle patterns
/// in, two-class per-pixel probabilities out. Per-level vectors are indexed
/// by level, 0 being the full-resolution level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenseUNetConfig {
    pub input_shape: Shape,
    pub num_classes: usize,
    /// Filters of the 3x3 convolution opening each encoder level.
    pub encoder_filters: Vec<usize>,
    /// Filters of the 3x3 convolution opening the bottleneck.
    pub bottleneck_filters: usize,
    /// Filters of the 3x3 convolution opening each decoder level.
    pub decoder_filters: Vec<usize>,
    /// Filters of the 2x2 up-convolution arriving at each decoder level.
    pub up_filters: Vec<usize>,
    /// Filters of the 3x3 convolution before the classifier.
    pub head_filters: usize,
    /// Dense-block depth in the encoder and the bottleneck.
    pub encoder_dense_layers: usize,
    /// Dense-block depth in the decoder.
    pub decoder_dense_layers: usize,
    pub growth_rate: usize,
    pub dropout_rate: Option<f64>,
    /// L2 factor on dense-block kernels and batch norm parameters.
    pub weight_decay: f32,
}

impl Default for DenseUNetConfig {
    fn default() -> Self {
        Self {
            input_shape: Shape::new(64, 64, 1),
            num_classes: 2,
            encoder_filters: vec![16, 32, 64, 128],
            bottleneck_filters: 256,
            decoder_filters: vec![16, 32, 64, 128],
            up_filters: vec![16, 32, 64, 64],
            head_filters: 8,
            encoder_dense_layers: 4,
            decoder_dense_layers: 3,
            growth_rate: 16,
            dropout_rate: Some(0.5),
            weight_decay: 1e-4,
        }
    }
}

impl DenseUNetConfig {
    /// Creates the published configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_input_shape(mut self, input_shape: Shape) -> Self {
        self.input_shape = input_shape;
        self
    }

    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    pub fn with_growth_rate(mut self, growth_rate: usize) -> Self {
        self.growth_rate = growth_rate;
        self
    }

    pub fn with_dense_layers(mut self, encoder: usize, decoder: usize) -> Self {
        self.encoder_dense_layers = encoder;
        self.decoder_dense_layers = decoder;
        self
    }

    pub fn with_dropout(mut self, dropout_rate: Option<f64>) -> Self {
        self.dropout_rate = dropout_rate;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Number of down-sampling levels.
    pub fn depth(&self) -> usize {
        self.encoder_filters.len()
    }

    /// Checks that the per-level tables agree and the input survives
    /// `depth()` halvings.
    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |message: String| Err(ModelError::InvalidLayerConfig { message });
        let depth = self.depth();

        if depth == 0 {
            return invalid("encoder_filters must name at least one level".to_string());
        }
        if self.decoder_filters.len() != depth || self.up_filters.len() != depth {
            return invalid(format!(
                "expected {depth} decoder and up-convolution filter counts, got {} and {}",
                self.decoder_filters.len(),
                self.up_filters.len()
            ));
        }

        let filters = self
            .encoder_filters
            .iter()
            .chain(&self.decoder_filters)
            .chain(&self.up_filters)
            .chain([&self.bottleneck_filters, &self.head_filters, &self.num_classes]);
        if filters.into_iter().any(|&f| f == 0) {
            return invalid("filter and class counts must be positive".to_string());
        }
        if self.growth_rate == 0 {
            return invalid("growth_rate must be positive".to_string());
        }
        if self.encoder_dense_layers == 0 || self.decoder_dense_layers == 0 {
            return invalid(format!(
                "dense blocks need at least one layer, got {} encoder and {} decoder",
                self.encoder_dense_layers, self.decoder_dense_layers
            ));
        }
        if self.input_shape.channels == 0 {
            return invalid("input must have at least one channel".to_string());
        }
        if let Some(rate) = self.dropout_rate {
            if !(0.0..1.0).contains(&rate) {
                return invalid(format!("dropout_rate {rate} is outside [0, 1)"));
            }
        }

        let scale = 1usize << depth;
        let Shape { height, width, .. } = self.input_shape;
        if height == 0 || width == 0 || height % scale != 0 || width % scale != 0 {
            return invalid(format!(
                "input {} is not divisible by 2^{depth} = {scale}",
                self.input_shape
            ));
        }

        Ok(())
    }

    fn encoder_block(&self) -> DenseBlock {
        DenseBlock::new(self.encoder_dense_layers, self.growth_rate)
            .with_dropout(self.dropout_rate)
            .with_weight_decay(self.weight_decay)
    }

    fn decoder_block(&self) -> DenseBlock {
        DenseBlock::new(self.decoder_dense_layers, self.growth_rate)
            .with_dropout(self.dropout_rate)
            .with_weight_decay(self.weight_decay)
    }
}

/// The Dense U-Net factory.
///
/// # Example
///
/// ```
/// use speckle_unet::architecture::{DenseUNet, ModelFactory};
/// use speckle_unet::graph::Shape;
///
/// let graph = DenseUNet::new().model_graph().unwrap();
/// assert_eq!(graph.input_shape(), Some(Shape::new(64, 64, 1)));
/// assert_eq!(graph.output_shape(), Shape::new(64, 64, 2));
/// ```
#[derive(Debug, Clone, Default)]
pub struct DenseUNet {
    config: DenseUNetConfig,
}

impl DenseUNet {
    /// Creates the published network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a network with custom hyperparameters.
    pub fn with_config(config: DenseUNetConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DenseUNetConfig {
        &self.config
    }
}

/// 3x3 ReLU convolution with He-normal kernels, used at every stage entry.
fn stage_conv(filters: usize, input: DataBuffer) -> DataBuffer {
    ops::conv2d(filters, 3, Activation::Relu, KernelInit::HeNormal, input)
}

fn named(buffer: DataBuffer, name: String) -> DataBuffer {
    log::debug!("{name} shape: {}", buffer.shape());
    buffer.named(name)
}

impl ModelFactory for DenseUNet {
    fn name(&self) -> &str {
        "dense_unet"
    }

    fn model_graph(&self) -> Result<ModelGraph, ModelError> {
        let config = &self.config;
        config.validate()?;
        let depth = config.depth();

        let input = InputBuffer::named(config.input_shape, "input");
        log::debug!("input shape: {}", input.shape());

        // Contracting path; keep each level's dense output for the skips.
        let mut skips: Vec<DataBuffer> = Vec::with_capacity(depth);
        let mut x = input.buffer();
        for (level, &filters) in config.encoder_filters.iter().enumerate() {
            let conv = named(stage_conv(filters, x), format!("encoder{level}_conv"));
            let dense = named(
                config.encoder_block().apply(conv),
                format!("encoder{level}_dense"),
            );
            skips.push(dense.clone());
            x = named(ops::max_pool2d(2, dense), format!("encoder{level}_pool"));
        }

        let conv = named(
            stage_conv(config.bottleneck_filters, x),
            "bottleneck_conv".to_string(),
        );
        x = named(
            config.encoder_block().apply(conv),
            "bottleneck_dense".to_string(),
        );

        // Expanding path, deepest level first.
        for level in (0..depth).rev() {
            let upsampled = ops::up_sampling2d(2, x);
            let up = named(
                ops::conv2d(
                    config.up_filters[level],
                    2,
                    Activation::Relu,
                    KernelInit::HeNormal,
                    upsampled,
                ),
                format!("decoder{level}_upconv"),
            );
            let merge = named(
                ops::concat(vec![skips[level].clone(), up]),
                format!("decoder{level}_merge"),
            );
            let conv = named(
                stage_conv(config.decoder_filters[level], merge),
                format!("decoder{level}_conv"),
            );
            x = named(
                config.decoder_block().apply(conv),
                format!("decoder{level}_dense"),
            );
        }

        let head = named(stage_conv(config.head_filters, x), "head_conv".to_string());
        let output = named(
            ops::conv2d(
                config.num_classes,
                1,
                Activation::Softmax,
                KernelInit::GlorotUniform,
                head,
            ),
            "output".to_string(),
        );

        Ok(ModelGraph::new(vec![input], output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels(graph: &ModelGraph, name: &str) -> usize {
        graph
            .find(name)
            .unwrap_or_else(|| panic!("no stage named {name}"))
            .shape()
            .channels
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = DenseUNetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.depth(), 4);
    }

    #[test]
    fn test_encoder_channels() {
        let graph = DenseUNet::new().model_graph().unwrap();
        let expected = [(80, 64), (96, 32), (128, 16), (192, 8)];
        for (level, (c, size)) in expected.into_iter().enumerate() {
            let dense = graph.find(&format!("encoder{level}_dense")).unwrap();
            assert_eq!(dense.shape(), Shape::new(size, size, c), "encoder level {level}");
        }
        assert_eq!(
            graph.find("bottleneck_dense").unwrap().shape(),
            Shape::new(4, 4, 320)
        );
    }

    #[test]
    fn test_decoder_channels() {
        let graph = DenseUNet::new().model_graph().unwrap();
        assert_eq!(channels(&graph, "decoder3_merge"), 256);
        assert_eq!(channels(&graph, "decoder2_merge"), 192);
        assert_eq!(channels(&graph, "decoder1_merge"), 128);
        assert_eq!(channels(&graph, "decoder0_merge"), 96);

        assert_eq!(channels(&graph, "decoder3_dense"), 176);
        assert_eq!(channels(&graph, "decoder2_dense"), 112);
        assert_eq!(channels(&graph, "decoder1_dense"), 80);
        assert_eq!(channels(&graph, "decoder0_dense"), 64);

        assert_eq!(channels(&graph, "head_conv"), 8);
    }

    #[test]
    fn test_upconv_filters() {
        let graph = DenseUNet::new().model_graph().unwrap();
        let filters: Vec<usize> = (0..4)
            .map(|level| channels(&graph, &format!("decoder{level}_upconv")))
            .collect();
        assert_eq!(filters, vec![16, 32, 64, 64]);
    }

    #[test]
    fn test_validate_rejects_mismatched_levels() {
        let mut config = DenseUNetConfig::default();
        config.decoder_filters.pop();
        assert!(matches!(
            config.validate(),
            Err(ModelError::InvalidLayerConfig { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_indivisible_input() {
        let config = DenseUNetConfig::default().with_input_shape(Shape::new(60, 64, 1));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("not divisible by 2^4"));
    }

    #[test]
    fn test_validate_rejects_bad_dropout() {
        let config = DenseUNetConfig::default().with_dropout(Some(1.5));
        assert!(config.validate().is_err());
        assert!(DenseUNetConfig::default().with_dropout(None).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_dense_blocks() {
        for (encoder, decoder) in [(0, 3), (4, 0), (0, 0)] {
            let config = DenseUNetConfig::default().with_dense_layers(encoder, decoder);
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("at least one layer"), "{err}");
        }
        let config = DenseUNetConfig::default().with_dense_layers(1, 1);
        let graph = DenseUNet::with_config(config).model_graph().unwrap();
        assert!(graph.find("encoder0_conv").is_some());
        assert!(graph.find("decoder0_conv").is_some());
    }

    #[test]
    fn test_invalid_config_fails_model_graph() {
        let config = DenseUNetConfig::default().with_growth_rate(0);
        let result = DenseUNet::with_config(config).model_graph();
        assert!(matches!(result, Err(ModelError::InvalidLayerConfig { .. })));
    }

    #[test]
    fn test_config_from_partial_json() {
        let config = DenseUNetConfig::from_json(
            r#"{"input_shape": {"height": 32, "width": 32, "channels": 1}, "num_classes": 3}"#,
        )
        .unwrap();
        assert_eq!(config.input_shape, Shape::new(32, 32, 1));
        assert_eq!(config.num_classes, 3);
        assert_eq!(config.growth_rate, 16);
        assert_eq!(config.encoder_filters, vec![16, 32, 64, 128]);
    }

    #[test]
    fn test_config_from_json_validates() {
        let result = DenseUNetConfig::from_json(r#"{"up_filters": [16]}"#);
        assert!(matches!(result, Err(ModelError::InvalidLayerConfig { .. })));
        let result = DenseUNetConfig::from_json("{not json");
        assert!(matches!(result, Err(ModelError::SerializationError(_))));
    }

    #[test]
    fn test_custom_classes_and_depth() {
        let config = DenseUNetConfig {
            input_shape: Shape::new(16, 16, 3),
            num_classes: 4,
            encoder_filters: vec![8, 16],
            decoder_filters: vec![8, 16],
            up_filters: vec![8, 8],
            bottleneck_filters: 32,
            ..DenseUNetConfig::default()
        };
        let graph = DenseUNet::with_config(config).model_graph().unwrap();
        assert_eq!(graph.input_shape(), Some(Shape::new(16, 16, 3)));
        assert_eq!(graph.output_shape(), Shape::new(16, 16, 4));
        assert!(graph.find("encoder2_dense").is_none());
        assert!(graph.find("decoder1_merge").is_some());
    }
}
