//! Kernel initializers, named the way the published architecture names them.

use burn::nn::Initializer;
use serde::{Deserialize, Serialize};

/// Weight initialization scheme for a convolution kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KernelInit {
    /// Normal with std = sqrt(2 / fan_in).
    ///
    /// Keras draws `he_normal` from a normal truncated at two standard
    /// deviations; Burn's `KaimingNormal` is not truncated, so rare
    /// samples can land further out.
    HeNormal,
    /// Uniform in [-limit, limit] with limit = sqrt(6 / fan_in).
    HeUniform,
    /// Uniform in [-limit, limit] with limit = sqrt(6 / (fan_in + fan_out)).
    #[default]
    GlorotUniform,
}

impl KernelInit {
    /// Maps this scheme onto Burn's initializer.
    pub fn to_initializer(self) -> Initializer {
        match self {
            KernelInit::HeNormal => Initializer::KaimingNormal {
                gain: std::f64::consts::SQRT_2,
                fan_out_only: false,
            },
            KernelInit::HeUniform => Initializer::KaimingUniform {
                gain: std::f64::consts::SQRT_2,
                fan_out_only: false,
            },
            KernelInit::GlorotUniform => Initializer::XavierUniform { gain: 1.0 },
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            KernelInit::HeNormal => "he_normal",
            KernelInit::HeUniform => "he_uniform",
            KernelInit::GlorotUniform => "glorot_uniform",
        }
    }
}
