use super::{
    clip_grad, collect_params, previous, share_params, unit::LstmUnit, Recurrence,
    RecurrentLayer, Timesteps,
};
use crate::{
    blob::Blob,
    layer::{Concat, Context, InnerProduct, Layer, Scale, Split},
    options::RecurrentOptions,
};
use anyhow::Result;

/// The recurrence of [`Lstm`](super::Lstm).
///
/// Each timestep runs:
/// - scale: the previous hidden state times the continuation flags
/// - concat: the input and the scaled hidden state
/// - gate: inner product to `[1, N, 4H]` pre-activations
/// - unit: [`LstmUnit`], producing the cell and hidden state
/// - split: the hidden state into the output slot and the recurrent input of the next step
#[derive(Debug)]
pub struct LstmRecurrence {
    options: RecurrentOptions,
    scale: Scale,
    concat: Concat,
    gate: InnerProduct,
    unit: LstmUnit,
    split: Split,
    h0: Blob,
    c0: Blob,
    hc: Vec<Blob>,
    xh: Vec<Blob>,
    gates: Vec<Blob>,
    c: Vec<Blob>,
    hidden: Vec<Blob>,
    hr: Vec<Blob>,
}

impl LstmRecurrence {
    /// Creates a new [`LstmRecurrence`].
    pub fn new(options: RecurrentOptions) -> Self {
        let gate = InnerProduct::new(options.gate_options(4));
        Self {
            options,
            scale: Scale::new(0),
            concat: Concat::new(2),
            gate,
            unit: LstmUnit::new(),
            split: Split::new(),
            h0: Blob::default(),
            c0: Blob::default(),
            hc: Vec::new(),
            xh: Vec::new(),
            gates: Vec::new(),
            c: Vec::new(),
            hidden: Vec::new(),
            hr: Vec::new(),
        }
    }
    fn resize(&mut self, len: usize) {
        for blobs in [&mut self.hc, &mut self.xh, &mut self.gates, &mut self.c] {
            blobs.resize_with(len, Blob::default);
        }
        self.hidden.resize_with(len, Blob::default);
        self.hr.truncate(len);
        for hidden in &self.hidden[self.hr.len()..] {
            self.hr.push(hidden.alias_value());
        }
    }
}

impl RecurrentLayer<LstmRecurrence> {
    /// Creates a new [`Lstm`](super::Lstm).
    pub fn new(options: RecurrentOptions) -> Self {
        Self::from_recurrence(LstmRecurrence::new(options))
    }
}

impl Recurrence for LstmRecurrence {
    fn type_name(&self) -> &'static str {
        "LSTM"
    }
    fn options(&self) -> &RecurrentOptions {
        &self.options
    }
    fn num_states(&self) -> usize {
        2
    }
    fn setup(&mut self, steps: &Timesteps, context: &mut Context) -> Result<Vec<Blob>> {
        let shape = [1, steps.batch(), self.hidden_dim()];
        self.h0 = Blob::zeros(&shape);
        self.c0 = Blob::zeros(&shape);
        self.resize(1);
        let (x, cont) = (&steps.x[0], &steps.cont[0]);
        let (hc, xh, gates) = (&self.hc[0], &self.xh[0], &self.gates[0]);
        let (c, hidden, hr) = (&self.c[0], &self.hidden[0], &self.hr[0]);
        self.scale
            .setup(&[self.h0.clone(), cont.clone()], &[hc.clone()], context)?;
        self.concat
            .setup(&[x.clone(), hc.clone()], &[xh.clone()], context)?;
        self.gate.setup(&[xh.clone()], &[gates.clone()], context)?;
        self.unit.setup(
            &[self.c0.clone(), gates.clone(), cont.clone()],
            &[c.clone(), hidden.clone()],
            context,
        )?;
        self.split.setup(
            &[hidden.clone()],
            &[hidden.alias_value(), hr.clone()],
            context,
        )?;
        Ok(collect_params(&[&self.gate]))
    }
    fn reshape(&mut self, steps: &mut Timesteps) -> Result<()> {
        let len = steps.len();
        if self.hidden.len() != len {
            self.resize(len);
        }
        let shape = [1, steps.batch(), self.hidden_dim()];
        self.h0.reshape(&shape);
        self.c0.reshape(&shape);
        for t in 0..len {
            if !steps.h[t].shares_value_with(&self.hidden[t]) {
                steps.h[t] = self.hidden[t].alias_value();
            }
            let (x, cont) = (&steps.x[t], &steps.cont[t]);
            let (h_prev, c_prev) = (previous(&self.hr, &self.h0, t), previous(&self.c, &self.c0, t));
            let (hc, xh, gates) = (&self.hc[t], &self.xh[t], &self.gates[t]);
            let (c, hidden, hr) = (&self.c[t], &self.hidden[t], &self.hr[t]);
            self.scale
                .reshape(&[h_prev.clone(), cont.clone()], &[hc.clone()])?;
            self.concat.reshape(&[x.clone(), hc.clone()], &[xh.clone()])?;
            self.gate.reshape(&[xh.clone()], &[gates.clone()])?;
            self.unit.reshape(
                &[c_prev.clone(), gates.clone(), cont.clone()],
                &[c.clone(), hidden.clone()],
            )?;
            self.split
                .reshape(&[hidden.clone()], &[steps.h[t].clone(), hr.clone()])?;
        }
        Ok(())
    }
    fn share_weight(&mut self, blobs: &[Blob], propagate: &[bool]) -> Result<()> {
        share_params(&mut [&mut self.gate], blobs, propagate)
    }
    fn seeds(&self) -> Vec<Blob> {
        vec![self.h0.clone(), self.c0.clone()]
    }
    fn final_states(&self, steps: &Timesteps) -> Vec<Blob> {
        let t = steps.len();
        vec![
            previous(&self.hr, &self.h0, t).clone(),
            previous(&self.c, &self.c0, t).clone(),
        ]
    }
    fn forward_step(&mut self, t: usize, steps: &Timesteps) -> Result<()> {
        let (x, cont) = (&steps.x[t], &steps.cont[t]);
        let (h_prev, c_prev) = (previous(&self.hr, &self.h0, t), previous(&self.c, &self.c0, t));
        let (hc, xh, gates) = (&self.hc[t], &self.xh[t], &self.gates[t]);
        let (c, hidden, hr) = (&self.c[t], &self.hidden[t], &self.hr[t]);
        self.scale
            .forward(&[h_prev.clone(), cont.clone()], &[hc.clone()])?;
        self.concat.forward(&[x.clone(), hc.clone()], &[xh.clone()])?;
        self.gate.forward(&[xh.clone()], &[gates.clone()])?;
        self.unit.forward(
            &[c_prev.clone(), gates.clone(), cont.clone()],
            &[c.clone(), hidden.clone()],
        )?;
        self.split
            .forward(&[hidden.clone()], &[steps.h[t].clone(), hr.clone()])
    }
    fn backward_step(&mut self, t: usize, steps: &Timesteps, propagate_input: bool) -> Result<()> {
        let (x, cont) = (&steps.x[t], &steps.cont[t]);
        let (h_prev, c_prev) = (previous(&self.hr, &self.h0, t), previous(&self.c, &self.c0, t));
        let (hc, xh, gates) = (&self.hc[t], &self.xh[t], &self.gates[t]);
        let (c, hidden, hr) = (&self.c[t], &self.hidden[t], &self.hr[t]);
        self.split.backward(
            &[steps.h[t].clone(), hr.clone()],
            &[true],
            &[hidden.clone()],
        )?;
        self.unit.backward(
            &[c.clone(), hidden.clone()],
            &[true, true, false],
            &[c_prev.clone(), gates.clone(), cont.clone()],
        )?;
        clip_grad(gates, self.options.clipping_threshold);
        self.gate.backward(&[gates.clone()], &[true], &[xh.clone()])?;
        self.concat.backward(
            &[xh.clone()],
            &[propagate_input, true],
            &[x.clone(), hc.clone()],
        )?;
        self.scale.backward(
            &[hc.clone()],
            &[true, false],
            &[h_prev.clone(), cont.clone()],
        )
    }
}
