//! Typed layer options.
//!
//! Options deserialize with defaults for omitted fields, so a configuration only needs to name
//! what differs:
//!
//!```
//! # use recurrent::options::RecurrentOptions;
//! let options: RecurrentOptions = serde_json::from_str(r#"{ "num_output": 8 }"#).unwrap();
//! assert_eq!(options.num_output, 8);
//! assert!(options.bias_term);
//!```
use crate::filler::Filler;
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_axis() -> usize {
    1
}

/// Options for [`InnerProduct`](crate::layer::InnerProduct).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InnerProductOptions {
    /// The number of outputs.
    pub num_output: usize,
    /// Whether to add a bias.
    #[serde(default = "default_true")]
    pub bias_term: bool,
    /// Axes before `axis` are batch axes, the rest are flattened into the inputs.
    #[serde(default = "default_axis")]
    pub axis: usize,
    /// Weight initialization.
    #[serde(default = "InnerProductOptions::default_weight_filler")]
    pub weight_filler: Filler,
    /// Bias initialization.
    #[serde(default)]
    pub bias_filler: Filler,
}

impl InnerProductOptions {
    /// Creates options for `num_output` outputs.
    ///
    /// Defaults:
    /// - bias_term: true
    /// - axis: 1
    /// - weight_filler: Xavier
    /// - bias_filler: Constant 0
    pub fn new(num_output: usize) -> Self {
        Self {
            num_output,
            bias_term: true,
            axis: 1,
            weight_filler: Self::default_weight_filler(),
            bias_filler: Filler::default(),
        }
    }
    fn default_weight_filler() -> Filler {
        Filler::Xavier
    }
    /// Sets whether to add a bias.
    pub fn with_bias(self, bias_term: bool) -> Self {
        Self { bias_term, ..self }
    }
    /// Sets the first flattened axis.
    pub fn with_axis(self, axis: usize) -> Self {
        Self { axis, ..self }
    }
    /// Sets the weight filler.
    pub fn with_weight_filler(self, weight_filler: Filler) -> Self {
        Self {
            weight_filler,
            ..self
        }
    }
    /// Sets the bias filler.
    pub fn with_bias_filler(self, bias_filler: Filler) -> Self {
        Self {
            bias_filler,
            ..self
        }
    }
}

/// Options shared by the recurrent layers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecurrentOptions {
    /// The hidden dimension.
    pub num_output: usize,
    /// Whether the gate layer has a bias.
    #[serde(default = "default_true")]
    pub bias_term: bool,
    /// Clamps gate gradients to `[-clipping_threshold, clipping_threshold]` when positive.
    #[serde(default)]
    pub clipping_threshold: f32,
    /// Adds a top for each recurrent state holding its value at the last timestep.
    #[serde(default)]
    pub expose_final_state: bool,
    /// Weight initialization.
    #[serde(default = "RecurrentOptions::default_weight_filler")]
    pub weight_filler: Filler,
    /// Bias initialization.
    #[serde(default)]
    pub bias_filler: Filler,
}

impl RecurrentOptions {
    /// Creates options with `num_output` hidden units.
    ///
    /// Defaults:
    /// - bias_term: true
    /// - clipping_threshold: 0 (disabled)
    /// - expose_final_state: false
    /// - weight_filler: Xavier
    /// - bias_filler: Constant 0
    pub fn new(num_output: usize) -> Self {
        Self {
            num_output,
            bias_term: true,
            clipping_threshold: 0.,
            expose_final_state: false,
            weight_filler: Self::default_weight_filler(),
            bias_filler: Filler::default(),
        }
    }
    fn default_weight_filler() -> Filler {
        Filler::Xavier
    }
    /// Sets whether the gate layer has a bias.
    pub fn with_bias(self, bias_term: bool) -> Self {
        Self { bias_term, ..self }
    }
    /// Sets the gradient clipping threshold.
    pub fn with_clipping_threshold(self, clipping_threshold: f32) -> Self {
        Self {
            clipping_threshold,
            ..self
        }
    }
    /// Sets whether final states are exposed as tops.
    pub fn with_expose_final_state(self, expose_final_state: bool) -> Self {
        Self {
            expose_final_state,
            ..self
        }
    }
    /// Sets the weight filler.
    pub fn with_weight_filler(self, weight_filler: Filler) -> Self {
        Self {
            weight_filler,
            ..self
        }
    }
    /// Sets the bias filler.
    pub fn with_bias_filler(self, bias_filler: Filler) -> Self {
        Self {
            bias_filler,
            ..self
        }
    }
    /// Options for the internal gate layer with `gates` blocks of `num_output`.
    pub(crate) fn gate_options(&self, gates: usize) -> InnerProductOptions {
        InnerProductOptions::new(gates * self.num_output)
            .with_axis(2)
            .with_bias(self.bias_term)
            .with_weight_filler(self.weight_filler)
            .with_bias_filler(self.bias_filler)
    }
}

/// Activation applied to a prediction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, derive_more::IsVariant)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Logistic sigmoid.
    #[default]
    Sigmoid,
    /// Rectified linear.
    Relu,
}

/// Options for [`LocalLstm`](crate::recurrent::LocalLstm).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalLstmOptions {
    /// Recurrence options.
    pub recurrent: RecurrentOptions,
    /// Activation of the next input prediction.
    #[serde(default)]
    pub activation: Activation,
    /// Weight initialization of the prediction layer.
    #[serde(default = "RecurrentOptions::default_weight_filler")]
    pub predictor_filler: Filler,
}

impl LocalLstmOptions {
    /// Creates options from `recurrent`.
    ///
    /// Defaults:
    /// - activation: Sigmoid
    /// - predictor_filler: Xavier
    pub fn new(recurrent: RecurrentOptions) -> Self {
        Self {
            recurrent,
            activation: Activation::default(),
            predictor_filler: RecurrentOptions::default_weight_filler(),
        }
    }
    /// Sets the activation.
    pub fn with_activation(self, activation: Activation) -> Self {
        Self { activation, ..self }
    }
    /// Sets the prediction weight filler.
    pub fn with_predictor_filler(self, predictor_filler: Filler) -> Self {
        Self {
            predictor_filler,
            ..self
        }
    }
}

/// Options for [`DecoderLstm`](crate::recurrent::DecoderLstm).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecoderOptions {
    /// Recurrence options.
    pub recurrent: RecurrentOptions,
    /// Writes each sequence's decode steps in reverse order.
    #[serde(default)]
    pub reverse: bool,
    /// Feeds the target of the previous decode step as input.
    #[serde(default)]
    pub conditional: bool,
}

impl DecoderOptions {
    /// Creates options from `recurrent`.
    ///
    /// Defaults:
    /// - reverse: false
    /// - conditional: false
    pub fn new(recurrent: RecurrentOptions) -> Self {
        Self {
            recurrent,
            reverse: false,
            conditional: false,
        }
    }
    /// Sets reverse decoding.
    pub fn with_reverse(self, reverse: bool) -> Self {
        Self { reverse, ..self }
    }
    /// Sets conditional (teacher forced) decoding.
    pub fn with_conditional(self, conditional: bool) -> Self {
        Self {
            conditional,
            ..self
        }
    }
}

/// Options for [`PredictorLstm`](crate::recurrent::PredictorLstm).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictorOptions {
    /// Recurrence options.
    pub recurrent: RecurrentOptions,
    /// The number of predicted timesteps.
    pub unroll_length: usize,
}

impl PredictorOptions {
    /// Creates options predicting `unroll_length` timesteps.
    pub fn new(recurrent: RecurrentOptions, unroll_length: usize) -> Self {
        Self {
            recurrent,
            unroll_length,
        }
    }
}
