//! CompiledModel - a graph with initialized weights, ready to run.

use std::collections::HashMap;

use burn::module::{Ignored, Module};
use burn::nn::DropoutConfig;
use burn::nn::pool::MaxPool2dConfig;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};
use burn::tensor::{Tensor, backend::Backend};

use crate::errors::ModelError;
use crate::layers::activation::CHANNEL_DIM;
use crate::layers::{Activation, ConvLayer, ConvLayerConfig, NormLayer};

use super::buffer::{BufferId, DataBuffer, InputBuffer, Shape};
use super::operation::{OpId, Operation};

/// Index of an intermediate tensor during the forward pass.
type Slot = usize;

/// Execution step in the forward pass.
#[derive(Debug, Clone)]
enum Step {
    Conv {
        layer: usize,
        input: Slot,
        output: Slot,
    },
    Norm {
        layer: usize,
        input: Slot,
        output: Slot,
    },
    Activation {
        activation: Activation,
        input: Slot,
        output: Slot,
    },
    Dropout {
        rate: f64,
        input: Slot,
        output: Slot,
    },
    MaxPool {
        pool_size: usize,
        input: Slot,
        output: Slot,
    },
    UpSample {
        factor: usize,
        input: Slot,
        output: Slot,
    },
    Concat {
        inputs: Vec<Slot>,
        output: Slot,
    },
}

/// Everything about the compiled graph that is not a trainable tensor.
#[derive(Debug, Clone)]
struct ExecutionPlan {
    steps: Vec<Step>,
    slots: usize,
    input_slot: Slot,
    output_slot: Slot,
    input_shape: Shape,
    output_shape: Shape,
    /// L2 factor per conv layer.
    conv_decay: Vec<Option<f32>>,
    /// L2 factor per norm layer.
    norm_decay: Vec<Option<f32>>,
}

/// A compiled model: Burn modules plus the order to run them in.
///
/// This is a regular Burn `Module`, so optimizers, recorders and device
/// transfers work on it directly. Operations applied more than once in the
/// graph share one set of weights.
#[derive(Module, Debug)]
pub struct CompiledModel<B: Backend> {
    convs: Vec<ConvLayer<B>>,
    norms: Vec<NormLayer<B>>,
    plan: Ignored<ExecutionPlan>,
}

impl<B: Backend> CompiledModel<B> {
    /// Creates a compiled model from input buffers and an output buffer.
    pub fn new(
        inputs: &[InputBuffer],
        output: &DataBuffer,
        device: &B::Device,
    ) -> Result<Self, ModelError> {
        let Some(input) = inputs.first() else {
            return Err(ModelError::NoInputBuffer);
        };
        if inputs.len() > 1 {
            return Err(ModelError::InvalidGraph(format!(
                "Compiled models take exactly one input, got {}",
                inputs.len()
            )));
        }

        let mut builder = GraphBuilder::new();
        let input_slot = builder.register_input(input);
        builder.traverse(output)?;
        let output_slot = builder.slot_of[&output.id()];

        let convs: Vec<ConvLayer<B>> = builder
            .conv_configs
            .iter()
            .map(|config| config.init(device))
            .collect();
        let norms: Vec<NormLayer<B>> = builder
            .norm_configs
            .iter()
            .map(|&(channels, epsilon, momentum)| {
                NormLayer::new(channels, epsilon, momentum, device)
            })
            .collect();

        let plan = ExecutionPlan {
            steps: builder.steps,
            slots: builder.next_slot,
            input_slot,
            output_slot,
            input_shape: input.shape(),
            output_shape: output.shape(),
            conv_decay: builder.conv_decay,
            norm_decay: builder.norm_decay,
        };

        let model = Self {
            convs,
            norms,
            plan: Ignored(plan),
        };
        log::info!(
            "compiled model: {} conv, {} batch norm layers, {} parameters",
            model.convs.len(),
            model.norms.len(),
            model.num_params()
        );
        Ok(model)
    }

    /// Performs the forward pass on a `[batch, channels, height, width]` tensor.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let plan = &self.plan.0;
        let mut buffers: Vec<Option<Tensor<B, 4>>> = vec![None; plan.slots];
        buffers[plan.input_slot] = Some(input);

        let get = |buffers: &[Option<Tensor<B, 4>>], slot: Slot| -> Tensor<B, 4> {
            buffers[slot]
                .clone()
                .expect("execution plan reads a slot before writing it")
        };

        for step in &plan.steps {
            match step {
                Step::Conv {
                    layer,
                    input,
                    output,
                } => {
                    let result = self.convs[*layer].forward(get(&buffers, *input));
                    buffers[*output] = Some(result);
                }
                Step::Norm {
                    layer,
                    input,
                    output,
                } => {
                    let result = self.norms[*layer].forward(get(&buffers, *input));
                    buffers[*output] = Some(result);
                }
                Step::Activation {
                    activation,
                    input,
                    output,
                } => {
                    buffers[*output] = Some(activation.apply(get(&buffers, *input)));
                }
                Step::Dropout {
                    rate,
                    input,
                    output,
                } => {
                    // Burn's dropout is the identity unless autodiff is enabled.
                    let dropout = DropoutConfig::new(*rate).init();
                    buffers[*output] = Some(dropout.forward(get(&buffers, *input)));
                }
                Step::MaxPool {
                    pool_size,
                    input,
                    output,
                } => {
                    let pool = MaxPool2dConfig::new([*pool_size, *pool_size])
                        .with_strides([*pool_size, *pool_size])
                        .init();
                    buffers[*output] = Some(pool.forward(get(&buffers, *input)));
                }
                Step::UpSample {
                    factor,
                    input,
                    output,
                } => {
                    let tensor = get(&buffers, *input);
                    let [_, _, height, width] = tensor.dims();
                    let result = interpolate(
                        tensor,
                        [height * factor, width * factor],
                        InterpolateOptions::new(InterpolateMode::Nearest),
                    );
                    buffers[*output] = Some(result);
                }
                Step::Concat { inputs, output } => {
                    let tensors: Vec<Tensor<B, 4>> =
                        inputs.iter().map(|slot| get(&buffers, *slot)).collect();
                    buffers[*output] = Some(Tensor::cat(tensors, CHANNEL_DIM));
                }
            }
        }

        get(&buffers, plan.output_slot)
    }

    /// Checks the input against the compiled input shape, then runs `forward`.
    pub fn try_forward(&self, input: Tensor<B, 4>) -> Result<Tensor<B, 4>, ModelError> {
        let [_, channels, height, width] = input.dims();
        let actual = Shape::new(height, width, channels);
        let expected = self.input_shape();
        if actual != expected {
            return Err(ModelError::ShapeMismatch { expected, actual });
        }
        Ok(self.forward(input))
    }

    /// Runs the model on a `[batch, height, width, channels]` tensor and
    /// returns the result in the same layout.
    pub fn forward_channels_last(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(input.permute([0, 3, 1, 2]))
            .permute([0, 2, 3, 1])
    }

    /// Returns the compiled input shape.
    pub fn input_shape(&self) -> Shape {
        self.plan.0.input_shape
    }

    /// Returns the compiled output shape.
    pub fn output_shape(&self) -> Shape {
        self.plan.0.output_shape
    }

    /// Returns the convolution layers in execution order.
    pub fn conv_layers(&self) -> &[ConvLayer<B>] {
        &self.convs
    }

    /// Returns the batch norm layers in execution order.
    pub fn norm_layers(&self) -> &[NormLayer<B>] {
        &self.norms
    }

    /// Sum of the L2 regularization terms declared in the graph:
    /// `decay * sum(w^2)` over every regularized conv kernel and batch
    /// norm gamma/beta. Zero when nothing is regularized.
    pub fn l2_penalty(&self, device: &B::Device) -> Tensor<B, 1> {
        let plan = &self.plan.0;
        let mut penalty = Tensor::<B, 1>::zeros([1], device);

        for (conv, decay) in self.convs.iter().zip(&plan.conv_decay) {
            if let Some(decay) = decay {
                let squares = conv.kernel().powf_scalar(2.0).sum();
                penalty = penalty + squares.mul_scalar(*decay);
            }
        }
        for (norm, decay) in self.norms.iter().zip(&plan.norm_decay) {
            if let Some(decay) = decay {
                let squares = norm.gamma().powf_scalar(2.0).sum() + norm.beta().powf_scalar(2.0).sum();
                penalty = penalty + squares.mul_scalar(*decay);
            }
        }

        penalty
    }
}

/// Builder for constructing the execution order.
struct GraphBuilder {
    slot_of: HashMap<BufferId, Slot>,
    next_slot: Slot,
    steps: Vec<Step>,
    conv_index: HashMap<OpId, usize>,
    conv_configs: Vec<ConvLayerConfig>,
    conv_decay: Vec<Option<f32>>,
    norm_index: HashMap<OpId, usize>,
    norm_configs: Vec<(usize, f64, f64)>,
    norm_decay: Vec<Option<f32>>,
}

impl GraphBuilder {
    fn new() -> Self {
        Self {
            slot_of: HashMap::new(),
            next_slot: 0,
            steps: Vec::new(),
            conv_index: HashMap::new(),
            conv_configs: Vec::new(),
            conv_decay: Vec::new(),
            norm_index: HashMap::new(),
            norm_configs: Vec::new(),
            norm_decay: Vec::new(),
        }
    }

    fn allocate(&mut self, buffer: BufferId) -> Slot {
        let slot = self.next_slot;
        self.slot_of.insert(buffer, slot);
        self.next_slot += 1;
        slot
    }

    fn register_input(&mut self, input: &InputBuffer) -> Slot {
        self.allocate(input.id())
    }

    fn traverse(&mut self, buffer: &DataBuffer) -> Result<(), ModelError> {
        if self.slot_of.contains_key(&buffer.id()) {
            return Ok(());
        }

        let Some(producer) = buffer.producer() else {
            return Err(ModelError::InvalidGraph(
                "Buffer has no producer and is not a registered input".to_string(),
            ));
        };

        for input in buffer.inputs() {
            self.traverse(input)?;
        }

        let inputs: Vec<Slot> = buffer
            .inputs()
            .iter()
            .map(|b| self.slot_of[&b.id()])
            .collect();
        let input_shape = buffer.inputs()[0].shape();
        let output = self.allocate(buffer.id());
        let input = inputs[0];

        let step = match producer {
            Operation::Conv2d { id, spec } => {
                let layer = match self.conv_index.get(id) {
                    Some(&layer) => layer,
                    None => {
                        let layer = self.conv_configs.len();
                        self.conv_configs.push(
                            ConvLayerConfig::new(input_shape.channels, spec.filters, spec.kernel_size)
                                .with_dilation(spec.dilation)
                                .with_activation(spec.activation)
                                .with_init(spec.init),
                        );
                        self.conv_decay.push(spec.weight_decay);
                        self.conv_index.insert(*id, layer);
                        layer
                    }
                };
                Step::Conv {
                    layer,
                    input,
                    output,
                }
            }
            Operation::BatchNorm {
                id,
                epsilon,
                momentum,
                weight_decay,
            } => {
                let layer = match self.norm_index.get(id) {
                    Some(&layer) => layer,
                    None => {
                        let layer = self.norm_configs.len();
                        self.norm_configs
                            .push((input_shape.channels, *epsilon, *momentum));
                        self.norm_decay.push(*weight_decay);
                        self.norm_index.insert(*id, layer);
                        layer
                    }
                };
                Step::Norm {
                    layer,
                    input,
                    output,
                }
            }
            Operation::Activation { activation, .. } => Step::Activation {
                activation: *activation,
                input,
                output,
            },
            Operation::Dropout { rate, .. } => Step::Dropout {
                rate: *rate,
                input,
                output,
            },
            Operation::MaxPool2d { pool_size, .. } => Step::MaxPool {
                pool_size: *pool_size,
                input,
                output,
            },
            Operation::UpSampling2d { factor, .. } => Step::UpSample {
                factor: *factor,
                input,
                output,
            },
            Operation::Concat { .. } => Step::Concat { inputs, output },
        };

        self.steps.push(step);
        Ok(())
    }
}
