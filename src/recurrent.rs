//! Recurrent layers over padded sequence batches.
//!
//! A [`RecurrentLayer`] slices an input `[T, N, D]` and continuation flags `[T, N]` into
//! timesteps, runs a [`Recurrence`] forward through time, and concatenates the hidden states
//! into the output `[T, N, H]`. Backward runs the recurrence in reverse.
//!
//! Columns of the batch hold packed sequences: a continuation flag of 0 at `[t, n]` starts a new
//! sequence in column `n`, and the state carried from `t - 1` is multiplied by the flag before
//! use.
//!
//! Parameters are owned by the layer, see [`Layer::blobs()`]. Internal sub-layers alias them at
//! the start of every forward and backward, so updates and replacements of the exposed blobs
//! take effect on the next call.
//!
//! Layers are not reentrant: per timestep buffers are reused between calls.
//!
//!```
//! # use recurrent::{blob::Blob, layer::{Context, Layer}, options::RecurrentOptions, recurrent::Lstm};
//! # fn main() -> anyhow::Result<()> {
//! let mut lstm = Lstm::new(RecurrentOptions::new(3));
//! let x = Blob::zeros(&[5, 1, 2]);
//! let cont = Blob::from_shape_vec(&[5, 1], vec![0., 1., 1., 1., 1.])?;
//! let h = Blob::default();
//! lstm.setup(&[x.clone(), cont.clone()], &[h.clone()], &mut Context::seeded(0))?;
//! lstm.forward(&[x, cont], &[h.clone()])?;
//! assert_eq!(h.shape(), [5, 1, 3]);
//! # Ok(())
//! # }
//!```
use crate::{
    blob::Blob,
    error::ensure_shape,
    layer::{check_propagate_down, propagates, Concat, Context, Layer, Slice},
    math::clip,
    options::RecurrentOptions,
};
use anyhow::{bail, Result};
use std::fmt::Debug;

mod decoder;
pub use decoder::{DecodePlan, DecoderLstm, PredictorLstm, Segment};
mod dual_memory;
pub use dual_memory::DualMemoryRecurrence;
mod local_lstm;
pub use local_lstm::LocalLstmRecurrence;
mod lstm;
pub use lstm::LstmRecurrence;
mod unit;
pub use unit::{DualMemoryUnit, LstmUnit};


/// Long short-term memory.
///
/// Bottoms: input `[T, N, D]`, continuation `[T, N]`, and optionally seed hidden and cell
/// states `[1, N, H]`. Tops: hidden `[T, N, H]`, then the final hidden and cell states when
/// [`expose_final_state`](RecurrentOptions::expose_final_state) is set.
pub type Lstm = RecurrentLayer<LstmRecurrence>;
/// [`Lstm`] that also predicts the next input from each hidden state.
///
/// The prediction `[T, N, D]` is the second top.
pub type LocalLstm = RecurrentLayer<LocalLstmRecurrence>;
/// LSTM with a fast and a slow memory.
///
/// States are hidden, fast and slow.
pub type DualMemoryLstm = RecurrentLayer<DualMemoryRecurrence>;

/// Per timestep slots shared between [`RecurrentLayer`] and its [`Recurrence`].
///
/// Slots are reallocated only when the number of timesteps changes.
#[derive(Debug, Default)]
pub struct Timesteps {
    /// Input slices, `[1, N, D]`.
    pub x: Vec<Blob>,
    /// Continuation slices, `[1, N]`.
    pub cont: Vec<Blob>,
    /// Hidden outputs, `[1, N, H]`. A recurrence may rebind these to alias its own buffers.
    pub h: Vec<Blob>,
}

impl Timesteps {
    /// The number of timesteps.
    pub fn len(&self) -> usize {
        self.x.len()
    }
    /// Whether there are no timesteps.
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
    /// The batch size.
    pub fn batch(&self) -> usize {
        self.cont.first().map_or(0, |c| c.shape().get(1).copied().unwrap_or(0))
    }
    fn resize(&mut self, len: usize) {
        for slots in [&mut self.x, &mut self.cont, &mut self.h] {
            slots.resize_with(len, Blob::default);
        }
    }
    fn reshape(&self, batch: usize, input_dim: usize, hidden_dim: usize) {
        for t in 0..self.len() {
            self.x[t].reshape(&[1, batch, input_dim]);
            self.cont[t].reshape(&[1, batch]);
            self.h[t].reshape(&[1, batch, hidden_dim]);
        }
    }
}

/// The computation of a single timestep, driven by [`RecurrentLayer`].
pub trait Recurrence: Debug + Send {
    /// The layer type, used in errors.
    fn type_name(&self) -> &'static str;
    /// The options.
    fn options(&self) -> &RecurrentOptions;
    /// The hidden dimension.
    fn hidden_dim(&self) -> usize {
        self.options().num_output
    }
    /// The number of states handed from one timestep to the next.
    ///
    /// Each state can be seeded by a bottom and exposed as a final state top.
    fn num_states(&self) -> usize;
    /// The number of auxiliary tops following the hidden output.
    fn num_aux_outputs(&self) -> usize {
        0
    }
    /// Builds the sub-layers on the timestep 0 slots and returns the initialized parameters.
    fn setup(&mut self, steps: &Timesteps, context: &mut Context) -> Result<Vec<Blob>>;
    /// Reshapes internal buffers to the slots.
    fn reshape(&mut self, steps: &mut Timesteps) -> Result<()>;
    /// Reshapes the auxiliary tops.
    #[allow(unused_variables)]
    fn reshape_aux(&mut self, steps: &Timesteps, aux: &[Blob]) -> Result<()> {
        Ok(())
    }
    /// Aliases the parameters of the sub-layers to `blobs`.
    fn share_weight(&mut self, blobs: &[Blob], propagate: &[bool]) -> Result<()>;
    /// The states read at timestep 0, in state order.
    fn seeds(&self) -> Vec<Blob>;
    /// The states written at the last timestep, in state order.
    fn final_states(&self, steps: &Timesteps) -> Vec<Blob>;
    /// Computes timestep `t`.
    fn forward_step(&mut self, t: usize, steps: &Timesteps) -> Result<()>;
    /// Backpropagates timestep `t`.
    ///
    /// Gradients of the hidden output of `t` and of the states written at `t` are set.
    fn backward_step(&mut self, t: usize, steps: &Timesteps, propagate_input: bool)
        -> Result<()>;
    /// Computes the auxiliary tops after the last timestep.
    #[allow(unused_variables)]
    fn forward_aux(&mut self, steps: &Timesteps, aux: &[Blob]) -> Result<()> {
        Ok(())
    }
    /// Distributes the gradients of the auxiliary tops before the first backward step.
    #[allow(unused_variables)]
    fn backward_aux(&mut self, steps: &Timesteps, aux: &[Blob]) -> Result<()> {
        Ok(())
    }
}

/// Aliases the parameters of `layers`, in order, to `blobs`.
pub(crate) fn share_params(
    layers: &mut [&mut dyn Layer],
    blobs: &[Blob],
    propagate: &[bool],
) -> Result<()> {
    let mut blobs = blobs.iter().zip(propagate);
    for layer in layers.iter_mut() {
        let params = layer.blobs_mut().len();
        for index in 0..params {
            let Some((blob, propagate)) = blobs.next() else {
                bail!("{} has more parameters than were provided!", layer.type_name());
            };
            layer.blobs_mut()[index].share(blob)?;
            layer.set_param_propagate_down(index, *propagate);
        }
    }
    Ok(())
}

/// Collects the parameters of `layers`.
pub(crate) fn collect_params(layers: &[&dyn Layer]) -> Vec<Blob> {
    layers
        .iter()
        .flat_map(|layer| layer.blobs().iter().cloned())
        .collect()
}

/// Keeps `previous[t + 1]` aliasing the value of `steps.h[t]`, with its own gradient.
///
/// `previous[0]` is the seed state and is left as is.
pub(crate) fn alias_previous_hidden(previous: &mut Vec<Blob>, steps: &Timesteps) {
    if previous.is_empty() {
        previous.push(Blob::default());
    }
    previous.truncate(steps.len() + 1);
    for (t, h) in steps.h.iter().enumerate() {
        match previous.get_mut(t + 1) {
            Some(blob) if blob.shares_value_with(h) => blob.reshape_like(h),
            Some(blob) => *blob = h.alias_value(),
            None => previous.push(h.alias_value()),
        }
    }
}

/// The previous timestep of `t` in `states`, or `seed` at `t = 0`.
pub(crate) fn previous<'a>(states: &'a [Blob], seed: &'a Blob, t: usize) -> &'a Blob {
    t.checked_sub(1)
        .and_then(|t| states.get(t))
        .unwrap_or(seed)
}

/// Clamps the gradient of `blob` to `[-threshold, threshold]` if `threshold` is positive.
pub(crate) fn clip_grad(blob: &Blob, threshold: f32) {
    if threshold > 0. {
        blob.grad_mut().mapv_inplace(|dx| clip(dx, threshold));
    }
}

/// Drives a [`Recurrence`] over the timesteps of a sequence batch.
///
/// See the [module docs](self).
#[derive(Debug)]
pub struct RecurrentLayer<R> {
    recurrence: R,
    blobs: Vec<Blob>,
    propagate: Vec<bool>,
    steps: Timesteps,
    slice_input: Slice,
    slice_cont: Slice,
    concat_output: Concat,
}

impl<R: Recurrence> RecurrentLayer<R> {
    /// Creates a layer driving `recurrence`.
    pub fn from_recurrence(recurrence: R) -> Self {
        Self {
            recurrence,
            blobs: Vec::new(),
            propagate: Vec::new(),
            steps: Timesteps::default(),
            slice_input: Slice::new(0),
            slice_cont: Slice::new(0),
            concat_output: Concat::new(0),
        }
    }
    /// The recurrence.
    pub fn recurrence(&self) -> &R {
        &self.recurrence
    }
    /// The options.
    pub fn options(&self) -> &RecurrentOptions {
        self.recurrence.options()
    }
    /// The hidden dimension.
    pub fn hidden_dim(&self) -> usize {
        self.recurrence.hidden_dim()
    }
    /// The number of timesteps of the last reshape.
    pub fn num_timesteps(&self) -> usize {
        self.steps.len()
    }
    fn num_states(&self) -> usize {
        self.recurrence.num_states()
    }
    fn num_aux(&self) -> usize {
        self.recurrence.num_aux_outputs()
    }
    fn num_final_tops(&self) -> usize {
        if self.options().expose_final_state {
            self.num_states()
        } else {
            0
        }
    }
    fn check_bottoms(&self, bottom: &[Blob]) -> Result<(usize, usize, usize)> {
        let layer = self.recurrence.type_name();
        let states = self.num_states();
        ensure_shape!(
            bottom.len() == 2 || bottom.len() == 2 + states,
            layer,
            "expected 2 or {} bottoms, found {}",
            2 + states,
            bottom.len()
        );
        let shape = bottom[0].shape();
        ensure_shape!(
            shape.len() == 3,
            layer,
            "input must have 3 axes [T, N, D], found {shape:?}"
        );
        let (t, n, d) = (shape[0], shape[1], shape[2]);
        ensure_shape!(
            t > 0 && n > 0,
            layer,
            "input must have at least one timestep and one sequence, found {shape:?}"
        );
        let cont_shape = bottom[1].shape();
        ensure_shape!(
            cont_shape == [t, n],
            layer,
            "continuation must be [{t}, {n}] to match input {shape:?}, found {cont_shape:?}"
        );
        let hidden_dim = self.hidden_dim();
        for (i, seed) in bottom[2..].iter().enumerate() {
            let seed_shape = seed.shape();
            ensure_shape!(
                seed_shape == [1, n, hidden_dim],
                layer,
                "seed state {i} must be [1, {n}, {hidden_dim}], found {seed_shape:?}"
            );
        }
        Ok((t, n, d))
    }
}

impl<R: Recurrence> Layer for RecurrentLayer<R> {
    fn type_name(&self) -> &'static str {
        self.recurrence.type_name()
    }
    fn min_bottom_blobs(&self) -> Option<usize> {
        Some(2)
    }
    fn max_bottom_blobs(&self) -> Option<usize> {
        Some(2 + self.num_states())
    }
    fn exact_num_top_blobs(&self) -> Option<usize> {
        Some(1 + self.num_aux() + self.num_final_tops())
    }
    fn allow_force_backward(&self, index: usize) -> bool {
        index != 1
    }
    fn blobs(&self) -> &[Blob] {
        &self.blobs
    }
    fn blobs_mut(&mut self) -> &mut [Blob] {
        &mut self.blobs
    }
    fn param_propagate_down(&self, index: usize) -> bool {
        self.propagate.get(index).copied().unwrap_or(false)
    }
    fn set_param_propagate_down(&mut self, index: usize, propagate: bool) {
        if let Some(p) = self.propagate.get_mut(index) {
            *p = propagate;
        }
    }
    fn layer_setup(&mut self, bottom: &[Blob], _top: &[Blob], context: &mut Context) -> Result<()> {
        let (t, n, d) = self.check_bottoms(bottom)?;
        let hidden_dim = self.hidden_dim();
        log::debug!(
            "{}: setup T = {t}, N = {n}, D = {d}, H = {hidden_dim}",
            self.type_name()
        );
        // Sub-layers are built on a single placeholder timestep.
        self.steps.resize(1);
        self.steps.reshape(n, d, hidden_dim);
        self.blobs = self.recurrence.setup(&self.steps, context)?;
        self.propagate = vec![true; self.blobs.len()];
        Ok(())
    }
    fn reshape(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        let (t, n, d) = self.check_bottoms(bottom)?;
        ensure_shape!(
            top.len() == 1 + self.num_aux() + self.num_final_tops(),
            self.type_name(),
            "expected {} tops, found {}",
            1 + self.num_aux() + self.num_final_tops(),
            top.len()
        );
        let hidden_dim = self.hidden_dim();
        if self.steps.len() != t {
            log::debug!(
                "{}: reallocating timesteps {} -> {t}",
                self.type_name(),
                self.steps.len()
            );
            self.steps.resize(t);
        }
        self.steps.reshape(n, d, hidden_dim);
        self.recurrence.reshape(&mut self.steps)?;
        self.slice_input.reshape(&bottom[..1], &self.steps.x)?;
        self.slice_cont.reshape(&bottom[1..2], &self.steps.cont)?;
        self.concat_output.reshape(&self.steps.h, &top[..1])?;
        let aux = 1 + self.num_aux();
        self.recurrence.reshape_aux(&self.steps, &top[1..aux])?;
        for blob in &top[aux..] {
            blob.reshape(&[1, n, hidden_dim]);
        }
        Ok(())
    }
    fn forward(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        self.recurrence.share_weight(&self.blobs, &self.propagate)?;
        self.slice_input.forward(&bottom[..1], &self.steps.x)?;
        self.slice_cont.forward(&bottom[1..2], &self.steps.cont)?;
        let seeds = self.recurrence.seeds();
        if bottom.len() > 2 {
            for (seed, blob) in seeds.iter().zip(&bottom[2..]) {
                seed.copy_value_from(blob)?;
            }
        } else {
            seeds.iter().for_each(|seed| seed.fill_value(0.));
        }
        for t in 0..self.steps.len() {
            self.recurrence.forward_step(t, &self.steps)?;
        }
        let aux = 1 + self.num_aux();
        if self.options().expose_final_state {
            let states = self.recurrence.final_states(&self.steps);
            for (blob, state) in top[aux..].iter().zip(&states) {
                blob.copy_value_from(state)?;
            }
        }
        self.recurrence.forward_aux(&self.steps, &top[1..aux])?;
        self.concat_output.forward(&self.steps.h, &top[..1])
    }
    fn backward(&mut self, top: &[Blob], propagate_down: &[bool], bottom: &[Blob]) -> Result<()> {
        check_propagate_down(self, propagate_down)?;
        self.recurrence.share_weight(&self.blobs, &self.propagate)?;
        let len = self.steps.len();
        self.concat_output
            .backward(&top[..1], &vec![true; len], &self.steps.h)?;
        let aux = 1 + self.num_aux();
        let states = self.recurrence.final_states(&self.steps);
        if self.options().expose_final_state {
            for (state, blob) in states.iter().zip(&top[aux..]) {
                state.copy_grad_from(blob)?;
            }
        } else {
            states.iter().for_each(|state| state.fill_grad(0.));
        }
        self.recurrence.backward_aux(&self.steps, &top[1..aux])?;
        let propagate_input = propagates(propagate_down, 0);
        for t in (0..len).rev() {
            self.recurrence
                .backward_step(t, &self.steps, propagate_input)?;
        }
        if propagate_input {
            self.slice_input
                .backward(&self.steps.x, &[true], &bottom[..1])?;
        }
        for (i, seed) in self.recurrence.seeds().iter().enumerate() {
            if let Some(blob) = bottom.get(2 + i) {
                if propagates(propagate_down, 2 + i) {
                    blob.copy_grad_from(seed)?;
                }
            }
        }
        Ok(())
    }
}
