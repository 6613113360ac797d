//! Decoders over packed sequences.
//!
//! Unlike [`RecurrentLayer`](super::RecurrentLayer), a decoder tracks where each sequence
//! begins and ends. The continuation flags are split into [`Segment`]s at every zero, and the
//! state is replaced by the seed state at the start of each segment.
use super::{clip_grad, collect_params, previous, share_params, unit::LstmUnit};
use crate::{
    blob::Blob,
    error::{ensure_shape, LayerError},
    layer::{check_propagate_down, propagates, Concat, Context, InnerProduct, Layer},
    options::{DecoderOptions, PredictorOptions, RecurrentOptions},
};
use anyhow::Result;
use ndarray::{s, Array2, ArrayView1, ArrayView2, Axis, Ix2, Ix3, Zip};

/// A sequence occupying timesteps `begin..begin + len` of a batch column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    /// The first timestep.
    pub begin: usize,
    /// The number of timesteps.
    pub len: usize,
}

impl Segment {
    /// One past the last timestep.
    pub fn end(&self) -> usize {
        self.begin + self.len
    }
}

/// Maps the timesteps of each column to the sequences packed in it.
///
/// Timestep `t` of column `n` is decode step `k = t - begin` of its segment. Its output is
/// written to timestep `t`, or to `begin + len - k - 1` when reversed. With teacher forcing its
/// input is the target at the output timestep of step `k - 1`, and step 0 has no input.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodePlan {
    num_timesteps: usize,
    reverse: bool,
    segments: Vec<Vec<Segment>>,
    // The index of the segment of [t, n].
    sequence: Array2<usize>,
}

impl DecodePlan {
    /// Infers the segments from continuation flags `[T, N]`.
    ///
    /// A zero at `t > 0` starts a new segment. Timestep 0 always starts a segment, whatever
    /// its flag.
    pub fn infer(cont: ArrayView2<f32>, reverse: bool) -> Self {
        let (num_timesteps, batch) = cont.dim();
        let mut segments = Vec::with_capacity(batch);
        let mut sequence = Array2::zeros((num_timesteps, batch));
        for (n, column) in cont.columns().into_iter().enumerate() {
            let mut column_segments = Vec::new();
            let mut begin = 0;
            for (t, flag) in column.iter().enumerate() {
                if t > 0 && *flag == 0. {
                    column_segments.push(Segment {
                        begin,
                        len: t - begin,
                    });
                    begin = t;
                }
                sequence[(t, n)] = column_segments.len();
            }
            if num_timesteps > 0 {
                column_segments.push(Segment {
                    begin,
                    len: num_timesteps - begin,
                });
            }
            segments.push(column_segments);
        }
        Self {
            num_timesteps,
            reverse,
            segments,
            sequence,
        }
    }
    /// A single segment of `num_timesteps` in each of `batch` columns.
    pub fn single(num_timesteps: usize, batch: usize) -> Self {
        let mut cont = Array2::ones((num_timesteps, batch));
        if num_timesteps > 0 {
            cont.row_mut(0).fill(0.);
        }
        Self::infer(cont.view(), false)
    }
    /// The number of timesteps.
    pub fn num_timesteps(&self) -> usize {
        self.num_timesteps
    }
    /// The number of columns.
    pub fn batch(&self) -> usize {
        self.segments.len()
    }
    /// Whether outputs are written in reverse.
    pub fn is_reverse(&self) -> bool {
        self.reverse
    }
    /// The segments of `column`, in order.
    pub fn segments(&self, column: usize) -> &[Segment] {
        self.segments.get(column).map(Vec::as_slice).unwrap_or(&[])
    }
    /// The index of the segment of `t` in `column`.
    pub fn sequence_index(&self, t: usize, column: usize) -> usize {
        self.sequence[(t, column)]
    }
    /// The segment of `t` in `column`.
    pub fn segment(&self, t: usize, column: usize) -> Segment {
        self.segments[column][self.sequence_index(t, column)]
    }
    /// The decode step of `t` within its segment.
    pub fn step(&self, t: usize, column: usize) -> usize {
        t - self.segment(t, column).begin
    }
    /// Whether `t` starts a segment in `column`.
    pub fn is_start(&self, t: usize, column: usize) -> bool {
        self.step(t, column) == 0
    }
    /// The timestep the output of `t` is written to.
    pub fn output_index(&self, t: usize, column: usize) -> usize {
        let segment = self.segment(t, column);
        if self.reverse {
            segment.begin + segment.len - (t - segment.begin) - 1
        } else {
            t
        }
    }
    /// The timestep of the target fed as input at `t`, `None` at the start of a segment.
    pub fn input_index(&self, t: usize, column: usize) -> Option<usize> {
        if self.is_start(t, column) {
            None
        } else {
            Some(self.output_index(t - 1, column))
        }
    }
    /// 0 where a segment starts, else 1, `[T, N]`.
    fn keep(&self) -> Array2<f32> {
        Array2::from_shape_fn((self.num_timesteps, self.batch()), |(t, n)| {
            if self.is_start(t, n) {
                0.
            } else {
                1.
            }
        })
    }
}

/// Blends `prev` and `seed` per column into `dst`, `dst = keep * prev + (1 - keep) * seed`.
fn reset_forward(dst: &Blob, prev: &Blob, seed: &Blob, keep: ArrayView1<f32>) -> Result<()> {
    if prev.shares_value_with(seed) {
        return dst.copy_value_from(seed);
    }
    let shape = (keep.len(), dst.count() / keep.len().max(1));
    let prev = prev.value();
    let prev = prev.view().into_shape(shape)?;
    let seed = seed.value();
    let seed = seed.view().into_shape(shape)?;
    let mut y = dst.value_mut();
    let mut y = y.view_mut().into_shape(shape)?;
    Zip::from(y.rows_mut())
        .and(prev.rows())
        .and(seed.rows())
        .and(&keep)
        .for_each(|mut y, prev, seed, &k| {
            Zip::from(&mut y)
                .and(&prev)
                .and(&seed)
                .for_each(|y, p, s| *y = k * p + (1. - k) * s);
        });
    Ok(())
}

/// Adds the gradient of `dst` into `prev` and `seed`, weighted as in [`reset_forward()`].
fn reset_backward(dst: &Blob, prev: Option<&Blob>, seed: &Blob, keep: ArrayView1<f32>) -> Result<()> {
    let shape = (keep.len(), dst.count() / keep.len().max(1));
    let dy = dst.grad();
    let dy = dy.view().into_shape(shape)?;
    {
        let mut ds = seed.grad_mut();
        let mut ds = ds.view_mut().into_shape(shape)?;
        Zip::from(ds.rows_mut())
            .and(dy.rows())
            .and(&keep)
            .for_each(|mut ds, dy, &k| ds.scaled_add(1. - k, &dy));
    }
    if let Some(prev) = prev {
        let mut dp = prev.grad_mut();
        let mut dp = dp.view_mut().into_shape(shape)?;
        Zip::from(dp.rows_mut())
            .and(dy.rows())
            .and(&keep)
            .for_each(|mut dp, dy, &k| dp.scaled_add(k, &dy));
    }
    Ok(())
}

/// The decoder recurrence shared by [`DecoderLstm`] and [`PredictorLstm`].
///
/// Each timestep runs:
/// - reset: the previous hidden and cell states, or the seeds at the start of a segment
/// - concat: the teacher forced input and the hidden state, when conditional
/// - gate: inner product to `[1, N, 4H]` pre-activations
/// - unit: [`LstmUnit::decoder()`], producing the cell and hidden state
#[derive(Debug)]
struct DecoderCore {
    options: RecurrentOptions,
    conditional: bool,
    concat: Concat,
    gate: InnerProduct,
    unit: LstmUnit,
    h0: Blob,
    c0: Blob,
    plan: DecodePlan,
    x: Vec<Blob>,
    hr: Vec<Blob>,
    cr: Vec<Blob>,
    xh: Vec<Blob>,
    gates: Vec<Blob>,
    c: Vec<Blob>,
    h: Vec<Blob>,
}

impl DecoderCore {
    fn new(options: RecurrentOptions, conditional: bool) -> Self {
        let gate = InnerProduct::new(options.gate_options(4));
        Self {
            options,
            conditional,
            concat: Concat::new(2),
            gate,
            unit: LstmUnit::decoder(),
            h0: Blob::default(),
            c0: Blob::default(),
            plan: DecodePlan::default(),
            x: Vec::new(),
            hr: Vec::new(),
            cr: Vec::new(),
            xh: Vec::new(),
            gates: Vec::new(),
            c: Vec::new(),
            h: Vec::new(),
        }
    }
    fn hidden_dim(&self) -> usize {
        self.options.num_output
    }
    fn len(&self) -> usize {
        self.h.len()
    }
    fn gate_input(&self, t: usize) -> &Blob {
        if self.conditional {
            &self.xh[t]
        } else {
            &self.hr[t]
        }
    }
    fn resize(&mut self, len: usize) {
        for blobs in [
            &mut self.x,
            &mut self.hr,
            &mut self.cr,
            &mut self.xh,
            &mut self.gates,
            &mut self.c,
            &mut self.h,
        ] {
            blobs.resize_with(len, Blob::default);
        }
    }
    fn reshape_step(&mut self, t: usize) -> Result<()> {
        let gate_input = self.gate_input(t).clone();
        if self.conditional {
            self.concat.reshape(
                &[self.x[t].clone(), self.hr[t].clone()],
                &[self.xh[t].clone()],
            )?;
        }
        self.gate
            .reshape(&[gate_input], &[self.gates[t].clone()])?;
        self.unit.reshape(
            &[self.cr[t].clone(), self.gates[t].clone()],
            &[self.c[t].clone(), self.h[t].clone()],
        )
    }
    fn setup(&mut self, batch: usize, input_dim: usize, context: &mut Context) -> Result<Vec<Blob>> {
        let shape = [1, batch, self.hidden_dim()];
        self.h0 = Blob::zeros(&shape);
        self.c0 = Blob::zeros(&shape);
        self.resize(1);
        self.x[0].reshape(&[1, batch, input_dim]);
        self.hr[0].reshape(&shape);
        self.cr[0].reshape(&shape);
        if self.conditional {
            self.concat.setup(
                &[self.x[0].clone(), self.hr[0].clone()],
                &[self.xh[0].clone()],
                context,
            )?;
        }
        let gate_input = self.gate_input(0).clone();
        self.gate
            .setup(&[gate_input], &[self.gates[0].clone()], context)?;
        self.unit.setup(
            &[self.cr[0].clone(), self.gates[0].clone()],
            &[self.c[0].clone(), self.h[0].clone()],
            context,
        )?;
        Ok(collect_params(&[&self.gate]))
    }
    fn reshape(&mut self, len: usize, batch: usize, input_dim: usize, top: &Blob) -> Result<()> {
        if self.len() != len {
            log::debug!("decoder: reallocating timesteps {} -> {len}", self.len());
            self.resize(len);
        }
        let shape = [1, batch, self.hidden_dim()];
        for blob in [&self.h0, &self.c0] {
            blob.reshape(&shape);
        }
        for t in 0..len {
            self.x[t].reshape(&[1, batch, input_dim]);
            self.hr[t].reshape(&shape);
            self.cr[t].reshape(&shape);
            self.reshape_step(t)?;
        }
        top.reshape(&[len, batch, self.hidden_dim()]);
        Ok(())
    }
    fn share_weight(&mut self, blobs: &[Blob], propagate: &[bool]) -> Result<()> {
        share_params(&mut [&mut self.gate], blobs, propagate)
    }
    fn load_seeds(&self, seeds: Option<(&Blob, &Blob)>) -> Result<()> {
        match seeds {
            Some((h0, c0)) => {
                self.h0.copy_value_from(h0)?;
                self.c0.copy_value_from(c0)
            }
            None => {
                self.h0.fill_value(0.);
                self.c0.fill_value(0.);
                Ok(())
            }
        }
    }
    /// Gathers the teacher forced input of `t` from `target`, `[T, N, D]`.
    fn gather_input(&self, t: usize, target: &Blob) -> Result<()> {
        let target = target.value();
        let target = target.view().into_dimensionality::<Ix3>()?;
        let mut x = self.x[t].value_mut();
        let batch = self.plan.batch();
        let mut x = x.view_mut().into_shape((batch, target.dim().2))?;
        for (n, mut row) in x.rows_mut().into_iter().enumerate() {
            match self.plan.input_index(t, n) {
                Some(source) => row.assign(&target.slice(s![source, n, ..])),
                None => row.fill(0.),
            }
        }
        Ok(())
    }
    fn forward_step(&mut self, t: usize, keep: &Array2<f32>) -> Result<()> {
        let keep = keep.row(t);
        let h_prev = previous(&self.h, &self.h0, t);
        let c_prev = previous(&self.c, &self.c0, t);
        reset_forward(&self.hr[t], h_prev, &self.h0, keep)?;
        reset_forward(&self.cr[t], c_prev, &self.c0, keep)?;
        if self.conditional {
            self.concat.forward(
                &[self.x[t].clone(), self.hr[t].clone()],
                &[self.xh[t].clone()],
            )?;
        }
        let gate_input = self.gate_input(t).clone();
        self.gate
            .forward(&[gate_input], &[self.gates[t].clone()])?;
        self.unit.forward(
            &[self.cr[t].clone(), self.gates[t].clone()],
            &[self.c[t].clone(), self.h[t].clone()],
        )
    }
    fn backward_step(&mut self, t: usize, keep: &Array2<f32>) -> Result<()> {
        self.unit.backward(
            &[self.c[t].clone(), self.h[t].clone()],
            &[true, true],
            &[self.cr[t].clone(), self.gates[t].clone()],
        )?;
        clip_grad(&self.gates[t], self.options.clipping_threshold);
        let gate_input = self.gate_input(t).clone();
        self.gate
            .backward(&[self.gates[t].clone()], &[true], &[gate_input])?;
        if self.conditional {
            self.concat.backward(
                &[self.xh[t].clone()],
                &[false, true],
                &[self.x[t].clone(), self.hr[t].clone()],
            )?;
        }
        let keep = keep.row(t);
        let (h_prev, c_prev) = match t.checked_sub(1) {
            Some(p) => (Some(&self.h[p]), Some(&self.c[p])),
            None => (None, None),
        };
        reset_backward(&self.hr[t], h_prev, &self.h0, keep)?;
        reset_backward(&self.cr[t], c_prev, &self.c0, keep)
    }
    /// Runs every timestep under `plan` and writes the outputs to `top`, `[T, N, H]`.
    fn forward(&mut self, plan: DecodePlan, target: Option<&Blob>, top: &Blob) -> Result<()> {
        log::trace!("decoder plan: {:?}", plan.segments);
        self.plan = plan;
        let keep = self.plan.keep();
        for t in 0..self.len() {
            if let Some(target) = target {
                self.gather_input(t, target)?;
            }
            self.forward_step(t, &keep)?;
        }
        let mut y = top.value_mut();
        let mut y = y.view_mut().into_dimensionality::<Ix3>()?;
        for (t, h) in self.h.iter().enumerate() {
            let h = h.value();
            let h = h.view().into_dimensionality::<Ix3>()?;
            for (n, row) in h.index_axis(Axis(0), 0).rows().into_iter().enumerate() {
                y.slice_mut(s![self.plan.output_index(t, n), n, ..])
                    .assign(&row);
            }
        }
        Ok(())
    }
    /// Backpropagates the gradient of `top` through the plan of the last forward.
    fn backward(&mut self, top: &Blob) -> Result<()> {
        {
            let dy = top.grad();
            let dy = dy.view().into_dimensionality::<Ix3>()?;
            for (t, h) in self.h.iter().enumerate() {
                let mut dh = h.grad_mut();
                let mut dh = dh.view_mut().into_dimensionality::<Ix3>()?;
                for (n, mut row) in dh
                    .index_axis_mut(Axis(0), 0)
                    .rows_mut()
                    .into_iter()
                    .enumerate()
                {
                    row.assign(&dy.slice(s![self.plan.output_index(t, n), n, ..]));
                }
            }
        }
        self.c.iter().for_each(|c| c.fill_grad(0.));
        self.h0.fill_grad(0.);
        self.c0.fill_grad(0.);
        let keep = self.plan.keep();
        for t in (0..self.len()).rev() {
            self.backward_step(t, &keep)?;
        }
        Ok(())
    }
}

/// LSTM decoder.
///
/// Bottoms: continuation `[T, N]`, optionally seed hidden and cell states `[1, N, H]` (ie the
/// final states of an encoder), and when [`conditional`](DecoderOptions::conditional) the
/// targets `[T, N, D]`, last. Top: hidden `[T, N, H]`.
///
/// Each segment of the continuation flags (see [`DecodePlan`]) is decoded from the seed states.
/// When conditional, the input of each decode step is the target of the previous step, so the
/// targets are never read past the end of a segment.
#[derive(Debug)]
pub struct DecoderLstm {
    options: DecoderOptions,
    core: DecoderCore,
    blobs: Vec<Blob>,
    propagate: Vec<bool>,
    seeded: bool,
}

impl DecoderLstm {
    /// Creates a new [`DecoderLstm`].
    pub fn new(options: DecoderOptions) -> Self {
        let core = DecoderCore::new(options.recurrent.clone(), options.conditional);
        Self {
            options,
            core,
            blobs: Vec::new(),
            propagate: Vec::new(),
            seeded: false,
        }
    }
    /// The options.
    pub fn options(&self) -> &DecoderOptions {
        &self.options
    }
    /// The plan of the last forward.
    pub fn plan(&self) -> &DecodePlan {
        &self.core.plan
    }
    fn target<'a>(&self, bottom: &'a [Blob]) -> Option<&'a Blob> {
        if self.options.conditional {
            bottom.last()
        } else {
            None
        }
    }
    fn seeds<'a>(&self, bottom: &'a [Blob]) -> Option<(&'a Blob, &'a Blob)> {
        if self.seeded {
            Some((&bottom[1], &bottom[2]))
        } else {
            None
        }
    }
    /// The seed bottoms are present iff they were at setup.
    fn check_seeded(&self, bottom: &[Blob]) -> Result<()> {
        let expected = 1 + usize::from(self.options.conditional) + if self.seeded { 2 } else { 0 };
        ensure_shape!(
            bottom.len() == expected,
            self.type_name(),
            "set up with {expected} bottoms, found {}",
            bottom.len()
        );
        Ok(())
    }
    /// Returns `(T, N, D)`.
    fn check_bottoms(&self, bottom: &[Blob]) -> Result<(usize, usize, usize)> {
        let layer = self.type_name();
        let base = 1 + usize::from(self.options.conditional);
        ensure_shape!(
            bottom.len() == base || bottom.len() == base + 2,
            layer,
            "expected {base} or {} bottoms, found {}",
            base + 2,
            bottom.len()
        );
        let shape = bottom[0].shape();
        ensure_shape!(
            shape.len() == 2 && shape[0] > 0 && shape[1] > 0,
            layer,
            "continuation must be [T, N], found {shape:?}"
        );
        let (t, n) = (shape[0], shape[1]);
        let hidden_dim = self.options.recurrent.num_output;
        if bottom.len() == base + 2 {
            for seed in &bottom[1..3] {
                let seed_shape = seed.shape();
                ensure_shape!(
                    seed_shape == [1, n, hidden_dim],
                    layer,
                    "seed state must be [1, {n}, {hidden_dim}], found {seed_shape:?}"
                );
            }
        }
        let input_dim = match self.target(bottom) {
            Some(target) => {
                let target_shape = target.shape();
                ensure_shape!(
                    target_shape.len() == 3 && target_shape[..2] == [t, n],
                    layer,
                    "target must be [{t}, {n}, D], found {target_shape:?}"
                );
                target_shape[2]
            }
            None => 0,
        };
        Ok((t, n, input_dim))
    }
}

impl Layer for DecoderLstm {
    fn type_name(&self) -> &'static str {
        "DecoderLSTM"
    }
    fn min_bottom_blobs(&self) -> Option<usize> {
        Some(1 + usize::from(self.options.conditional))
    }
    fn max_bottom_blobs(&self) -> Option<usize> {
        Some(3 + usize::from(self.options.conditional))
    }
    fn exact_num_top_blobs(&self) -> Option<usize> {
        Some(1)
    }
    fn allow_force_backward(&self, index: usize) -> bool {
        self.seeded && (index == 1 || index == 2)
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
        self.seeded = bottom.len() == 3 + usize::from(self.options.conditional);
        log::debug!(
            "{}: setup T = {t}, N = {n}, D = {d}, H = {}, reverse = {}, conditional = {}",
            self.type_name(),
            self.options.recurrent.num_output,
            self.options.reverse,
            self.options.conditional
        );
        self.blobs = self.core.setup(n, d, context)?;
        self.propagate = vec![true; self.blobs.len()];
        Ok(())
    }
    fn reshape(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        let (t, n, d) = self.check_bottoms(bottom)?;
        self.check_seeded(bottom)?;
        self.core.reshape(t, n, d, &top[0])
    }
    fn forward(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        self.check_seeded(bottom)?;
        self.core.share_weight(&self.blobs, &self.propagate)?;
        let plan = {
            let cont = bottom[0].value();
            DecodePlan::infer(cont.view().into_dimensionality::<Ix2>()?, self.options.reverse)
        };
        self.core.load_seeds(self.seeds(bottom))?;
        self.core.forward(plan, self.target(bottom), &top[0])
    }
    fn backward(&mut self, top: &[Blob], propagate_down: &[bool], bottom: &[Blob]) -> Result<()> {
        check_propagate_down(self, propagate_down)?;
        self.check_seeded(bottom)?;
        self.core.share_weight(&self.blobs, &self.propagate)?;
        self.core.backward(&top[0])?;
        if let Some((h0, c0)) = self.seeds(bottom) {
            if propagates(propagate_down, 1) {
                h0.copy_grad_from(&self.core.h0)?;
            }
            if propagates(propagate_down, 2) {
                c0.copy_grad_from(&self.core.c0)?;
            }
        }
        Ok(())
    }
}

/// Open loop LSTM decoder for inference.
///
/// Bottoms: seed hidden and cell states `[1, N, H]`. Top: hidden `[U, N, H]` where `U` is
/// [`unroll_length`](PredictorOptions::unroll_length). Each column is decoded as a single
/// sequence without input. Backward is not implemented.
#[derive(Debug)]
pub struct PredictorLstm {
    options: PredictorOptions,
    core: DecoderCore,
    blobs: Vec<Blob>,
    propagate: Vec<bool>,
}

impl PredictorLstm {
    /// Creates a new [`PredictorLstm`].
    pub fn new(options: PredictorOptions) -> Self {
        let core = DecoderCore::new(options.recurrent.clone(), false);
        Self {
            options,
            core,
            blobs: Vec::new(),
            propagate: Vec::new(),
        }
    }
    /// The options.
    pub fn options(&self) -> &PredictorOptions {
        &self.options
    }
    /// Returns `N`.
    fn check_bottoms(&self, bottom: &[Blob]) -> Result<usize> {
        let layer = self.type_name();
        let hidden_dim = self.options.recurrent.num_output;
        ensure_shape!(
            self.options.unroll_length > 0,
            layer,
            "unroll_length must be positive"
        );
        let shape = bottom[0].shape();
        ensure_shape!(
            shape.len() == 3 && shape[0] == 1 && shape[1] > 0 && shape[2] == hidden_dim,
            layer,
            "seed hidden state must be [1, N, {hidden_dim}], found {shape:?}"
        );
        let cell_shape = bottom[1].shape();
        ensure_shape!(
            cell_shape == shape,
            layer,
            "seed cell state {cell_shape:?} does not match hidden state {shape:?}"
        );
        Ok(shape[1])
    }
}

impl Layer for PredictorLstm {
    fn type_name(&self) -> &'static str {
        "PredictorLSTM"
    }
    fn exact_num_bottom_blobs(&self) -> Option<usize> {
        Some(2)
    }
    fn exact_num_top_blobs(&self) -> Option<usize> {
        Some(1)
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
        let n = self.check_bottoms(bottom)?;
        log::debug!(
            "{}: setup U = {}, N = {n}, H = {}",
            self.type_name(),
            self.options.unroll_length,
            self.options.recurrent.num_output
        );
        self.blobs = self.core.setup(n, 0, context)?;
        self.propagate = vec![true; self.blobs.len()];
        Ok(())
    }
    fn reshape(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        let n = self.check_bottoms(bottom)?;
        self.core.reshape(self.options.unroll_length, n, 0, &top[0])
    }
    fn forward(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        self.core.share_weight(&self.blobs, &self.propagate)?;
        self.core.load_seeds(Some((&bottom[0], &bottom[1])))?;
        let plan = DecodePlan::single(self.options.unroll_length, self.core.h0.dim(1)?);
        self.core.forward(plan, None, &top[0])
    }
    fn backward(&mut self, _top: &[Blob], _propagate_down: &[bool], _bottom: &[Blob]) -> Result<()> {
        Err(LayerError::NotImplemented {
            layer: self.type_name(),
            what: "backward",
        }
        .into())
    }
}
