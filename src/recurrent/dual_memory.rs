use super::{
    alias_previous_hidden, clip_grad, collect_params, previous, share_params, unit::DualMemoryUnit,
    Recurrence, RecurrentLayer, Timesteps,
};
use crate::{
    blob::Blob,
    layer::{Concat, Context, InnerProduct, Layer, Scale},
    options::RecurrentOptions,
};
use anyhow::Result;

/// The recurrence of [`DualMemoryLstm`](super::DualMemoryLstm).
///
/// Like [`LstmRecurrence`](super::LstmRecurrence) with `[1, N, 5H]` gates feeding a
/// [`DualMemoryUnit`]. The states are the hidden state and the fast and slow memories.
#[derive(Debug)]
pub struct DualMemoryRecurrence {
    options: RecurrentOptions,
    scale: Scale,
    concat: Concat,
    gate: InnerProduct,
    unit: DualMemoryUnit,
    fast0: Blob,
    slow0: Blob,
    // `hp[0]` is the seed hidden state, `hp[t + 1]` aliases the hidden output of `t`.
    hp: Vec<Blob>,
    hc: Vec<Blob>,
    xh: Vec<Blob>,
    gates: Vec<Blob>,
    fast: Vec<Blob>,
    slow: Vec<Blob>,
}

impl DualMemoryRecurrence {
    /// Creates a new [`DualMemoryRecurrence`].
    pub fn new(options: RecurrentOptions) -> Self {
        let gate = InnerProduct::new(options.gate_options(5));
        Self {
            options,
            scale: Scale::new(0),
            concat: Concat::new(2),
            gate,
            unit: DualMemoryUnit::new(),
            fast0: Blob::default(),
            slow0: Blob::default(),
            hp: vec![Blob::default()],
            hc: Vec::new(),
            xh: Vec::new(),
            gates: Vec::new(),
            fast: Vec::new(),
            slow: Vec::new(),
        }
    }
    fn resize(&mut self, steps: &Timesteps) {
        let len = steps.len();
        for blobs in [
            &mut self.hc,
            &mut self.xh,
            &mut self.gates,
            &mut self.fast,
            &mut self.slow,
        ] {
            blobs.resize_with(len, Blob::default);
        }
        alias_previous_hidden(&mut self.hp, steps);
    }
    fn step(&self, t: usize, steps: &Timesteps) -> Step {
        Step {
            x: steps.x[t].clone(),
            cont: steps.cont[t].clone(),
            h: steps.h[t].clone(),
            h_prev: self.hp[t].clone(),
            fast_prev: previous(&self.fast, &self.fast0, t).clone(),
            slow_prev: previous(&self.slow, &self.slow0, t).clone(),
            hc: self.hc[t].clone(),
            xh: self.xh[t].clone(),
            gates: self.gates[t].clone(),
            fast: self.fast[t].clone(),
            slow: self.slow[t].clone(),
        }
    }
}

/// The blobs of one timestep.
struct Step {
    x: Blob,
    cont: Blob,
    h: Blob,
    h_prev: Blob,
    fast_prev: Blob,
    slow_prev: Blob,
    hc: Blob,
    xh: Blob,
    gates: Blob,
    fast: Blob,
    slow: Blob,
}

impl Step {
    fn scale(&self) -> ([Blob; 2], [Blob; 1]) {
        ([self.h_prev.clone(), self.cont.clone()], [self.hc.clone()])
    }
    fn concat(&self) -> ([Blob; 2], [Blob; 1]) {
        ([self.x.clone(), self.hc.clone()], [self.xh.clone()])
    }
    fn gate(&self) -> ([Blob; 1], [Blob; 1]) {
        ([self.xh.clone()], [self.gates.clone()])
    }
    fn unit(&self) -> ([Blob; 4], [Blob; 3]) {
        (
            [
                self.fast_prev.clone(),
                self.slow_prev.clone(),
                self.gates.clone(),
                self.cont.clone(),
            ],
            [self.fast.clone(), self.slow.clone(), self.h.clone()],
        )
    }
}

impl RecurrentLayer<DualMemoryRecurrence> {
    /// Creates a new [`DualMemoryLstm`](super::DualMemoryLstm).
    pub fn new(options: RecurrentOptions) -> Self {
        Self::from_recurrence(DualMemoryRecurrence::new(options))
    }
}

impl Recurrence for DualMemoryRecurrence {
    fn type_name(&self) -> &'static str {
        "DualMemoryLSTM"
    }
    fn options(&self) -> &RecurrentOptions {
        &self.options
    }
    fn num_states(&self) -> usize {
        3
    }
    fn setup(&mut self, steps: &Timesteps, context: &mut Context) -> Result<Vec<Blob>> {
        let shape = [1, steps.batch(), self.hidden_dim()];
        self.hp[0] = Blob::zeros(&shape);
        self.fast0 = Blob::zeros(&shape);
        self.slow0 = Blob::zeros(&shape);
        self.resize(steps);
        let step = self.step(0, steps);
        let (bottom, top) = step.scale();
        self.scale.setup(&bottom, &top, context)?;
        let (bottom, top) = step.concat();
        self.concat.setup(&bottom, &top, context)?;
        let (bottom, top) = step.gate();
        self.gate.setup(&bottom, &top, context)?;
        let (bottom, top) = step.unit();
        self.unit.setup(&bottom, &top, context)?;
        Ok(collect_params(&[&self.gate]))
    }
    fn reshape(&mut self, steps: &mut Timesteps) -> Result<()> {
        if self.fast.len() != steps.len() || self.hp.len() != steps.len() + 1 {
            self.resize(steps);
        } else {
            alias_previous_hidden(&mut self.hp, steps);
        }
        let shape = [1, steps.batch(), self.hidden_dim()];
        for seed in [&self.hp[0], &self.fast0, &self.slow0] {
            seed.reshape(&shape);
        }
        for t in 0..steps.len() {
            let step = self.step(t, steps);
            let (bottom, top) = step.scale();
            self.scale.reshape(&bottom, &top)?;
            let (bottom, top) = step.concat();
            self.concat.reshape(&bottom, &top)?;
            let (bottom, top) = step.gate();
            self.gate.reshape(&bottom, &top)?;
            let (bottom, top) = step.unit();
            self.unit.reshape(&bottom, &top)?;
            self.hp[t + 1].reshape_like(&step.h);
        }
        Ok(())
    }
    fn share_weight(&mut self, blobs: &[Blob], propagate: &[bool]) -> Result<()> {
        share_params(&mut [&mut self.gate], blobs, propagate)
    }
    fn seeds(&self) -> Vec<Blob> {
        vec![self.hp[0].clone(), self.fast0.clone(), self.slow0.clone()]
    }
    fn final_states(&self, steps: &Timesteps) -> Vec<Blob> {
        let t = steps.len();
        vec![
            previous(&self.hp[1..], &self.hp[0], t).clone(),
            previous(&self.fast, &self.fast0, t).clone(),
            previous(&self.slow, &self.slow0, t).clone(),
        ]
    }
    fn forward_step(&mut self, t: usize, steps: &Timesteps) -> Result<()> {
        let step = self.step(t, steps);
        let (bottom, top) = step.scale();
        self.scale.forward(&bottom, &top)?;
        let (bottom, top) = step.concat();
        self.concat.forward(&bottom, &top)?;
        let (bottom, top) = step.gate();
        self.gate.forward(&bottom, &top)?;
        let (bottom, top) = step.unit();
        self.unit.forward(&bottom, &top)
    }
    fn backward_step(&mut self, t: usize, steps: &Timesteps, propagate_input: bool) -> Result<()> {
        let step = self.step(t, steps);
        step.h.accumulate_grad_from(&self.hp[t + 1])?;
        let (bottom, top) = step.unit();
        self.unit
            .backward(&top, &[true, true, true, false], &bottom)?;
        clip_grad(&step.gates, self.options.clipping_threshold);
        let (bottom, top) = step.gate();
        self.gate.backward(&top, &[true], &bottom)?;
        let (bottom, top) = step.concat();
        self.concat
            .backward(&top, &[propagate_input, true], &bottom)?;
        let (bottom, top) = step.scale();
        self.scale.backward(&top, &[true, false], &bottom)
    }
}
