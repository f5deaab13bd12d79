//! Architecture summary and JSON export.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use super::buffer::{BufferId, DataBuffer, Shape};
use super::operation::{ConvSpec, Operation};

/// Layer configuration as it appears in the export.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "class_name", content = "config")]
pub enum LayerExport {
    #[serde(rename = "InputLayer")]
    Input,
    #[serde(rename = "Conv2D")]
    Conv2d(ConvSpec),
    #[serde(rename = "BatchNormalization")]
    BatchNorm {
        epsilon: f64,
        momentum: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        weight_decay: Option<f32>,
    },
    #[serde(rename = "Activation")]
    Activation { activation: String },
    #[serde(rename = "Dropout")]
    Dropout { rate: f64 },
    #[serde(rename = "MaxPooling2D")]
    MaxPool2d { pool_size: usize },
    #[serde(rename = "UpSampling2D")]
    UpSampling2d { size: usize },
    #[serde(rename = "Concatenate")]
    Concat,
}

impl LayerExport {
    fn from_operation(op: &Operation) -> Self {
        match op {
            Operation::Conv2d { spec, .. } => Self::Conv2d(*spec),
            Operation::BatchNorm {
                epsilon,
                momentum,
                weight_decay,
                ..
            } => Self::BatchNorm {
                epsilon: *epsilon,
                momentum: *momentum,
                weight_decay: *weight_decay,
            },
            Operation::Activation { activation, .. } => Self::Activation {
                activation: activation.name().to_string(),
            },
            Operation::Dropout { rate, .. } => Self::Dropout { rate: *rate },
            Operation::MaxPool2d { pool_size, .. } => Self::MaxPool2d {
                pool_size: *pool_size,
            },
            Operation::UpSampling2d { factor, .. } => Self::UpSampling2d { size: *factor },
            Operation::Concat { .. } => Self::Concat,
        }
    }

    /// Returns the layer class name.
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::Input => "InputLayer",
            Self::Conv2d(_) => "Conv2D",
            Self::BatchNorm { .. } => "BatchNormalization",
            Self::Activation { .. } => "Activation",
            Self::Dropout { .. } => "Dropout",
            Self::MaxPool2d { .. } => "MaxPooling2D",
            Self::UpSampling2d { .. } => "UpSampling2D",
            Self::Concat => "Concatenate",
        }
    }
}

/// One row of the summary.
///
/// Positions are indices into the summary's layer list, so two graphs with
/// the same structure produce equal summaries regardless of their IDs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerSummary {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub layer: LayerExport,
    pub output_shape: Shape,
    pub inputs: Vec<usize>,
    pub trainable_params: usize,
    pub non_trainable_params: usize,
}

/// Complete description of a graph's architecture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub input_shapes: Vec<Shape>,
    pub output_shape: Shape,
    pub layers: Vec<LayerSummary>,
    pub trainable_params: usize,
    pub non_trainable_params: usize,
}

impl ModelSummary {
    /// Total parameter count, trainable or not.
    pub fn total_params(&self) -> usize {
        self.trainable_params + self.non_trainable_params
    }

    /// Returns the layers of the given class.
    pub fn layers_of(&self, class_name: &str) -> impl Iterator<Item = &LayerSummary> {
        self.layers
            .iter()
            .filter(move |l| l.layer.class_name() == class_name)
    }
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<5} {:<24} {:<20} {:<16} {:>10}  inputs",
            "#", "layer", "type", "output shape", "params"
        )?;
        for layer in &self.layers {
            let inputs: Vec<String> = layer.inputs.iter().map(|i| i.to_string()).collect();
            writeln!(
                f,
                "{:<5} {:<24} {:<20} {:<16} {:>10}  {}",
                layer.index,
                layer.name.as_deref().unwrap_or("-"),
                layer.layer.class_name(),
                layer.output_shape.to_string(),
                layer.trainable_params + layer.non_trainable_params,
                inputs.join(", ")
            )?;
        }
        writeln!(f, "Total params: {}", self.total_params())?;
        writeln!(f, "Trainable params: {}", self.trainable_params)?;
        write!(f, "Non-trainable params: {}", self.non_trainable_params)
    }
}

/// Context for walking a graph into a `ModelSummary`.
pub struct SummaryContext {
    layers: Vec<LayerSummary>,
    /// Maps buffer IDs to their row in `layers`.
    visited_buffers: HashMap<BufferId, usize>,
}

impl SummaryContext {
    /// Creates a new empty context.
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            visited_buffers: HashMap::new(),
        }
    }

    /// Registers an input buffer, returning its row.
    pub fn register_input(&mut self, buffer: &DataBuffer) -> usize {
        let index = self.layers.len();
        self.layers.push(LayerSummary {
            index,
            name: buffer.name().map(String::from),
            layer: LayerExport::Input,
            output_shape: buffer.shape(),
            inputs: vec![],
            trainable_params: 0,
            non_trainable_params: 0,
        });
        self.visited_buffers.insert(buffer.id(), index);
        index
    }

    /// Recursively records a buffer and its dependencies, returning its row.
    ///
    /// Buffers without a producer must have been registered as inputs.
    pub fn visit(&mut self, buffer: &DataBuffer) -> Option<usize> {
        if let Some(&index) = self.visited_buffers.get(&buffer.id()) {
            return Some(index);
        }

        let producer = buffer.producer()?;

        let mut inputs = Vec::with_capacity(buffer.inputs().len());
        for input in buffer.inputs() {
            inputs.push(self.visit(input)?);
        }

        let input_shapes: Vec<Shape> = buffer.inputs().iter().map(|b| b.shape()).collect();
        let (trainable_params, non_trainable_params) = producer.param_counts(&input_shapes);

        let index = self.layers.len();
        self.layers.push(LayerSummary {
            index,
            name: buffer.name().map(String::from),
            layer: LayerExport::from_operation(producer),
            output_shape: buffer.shape(),
            inputs,
            trainable_params,
            non_trainable_params,
        });
        self.visited_buffers.insert(buffer.id(), index);

        Some(index)
    }

    /// Converts the context into the summary.
    pub fn into_summary(self, output_shape: Shape) -> ModelSummary {
        let input_shapes = self
            .layers
            .iter()
            .filter(|l| l.layer == LayerExport::Input)
            .map(|l| l.output_shape)
            .collect();
        let trainable_params = self.layers.iter().map(|l| l.trainable_params).sum();
        let non_trainable_params = self.layers.iter().map(|l| l.non_trainable_params).sum();

        ModelSummary {
            input_shapes,
            output_shape,
            layers: self.layers,
            trainable_params,
            non_trainable_params,
        }
    }
}

impl Default for SummaryContext {
    fn default() -> Self {
        Self::new()
    }
}
