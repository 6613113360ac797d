use super::{
    alias_previous_hidden, clip_grad, collect_params, previous, share_params, unit::LstmUnit,
    Recurrence, RecurrentLayer, Timesteps,
};
use crate::{
    blob::Blob,
    layer::{Concat, Context, InnerProduct, Layer, Relu, Scale, Sigmoid},
    options::{Activation, InnerProductOptions, LocalLstmOptions, RecurrentOptions},
};
use anyhow::Result;

/// The recurrence of [`LocalLstm`](super::LocalLstm).
///
/// The same steps as [`LstmRecurrence`](super::LstmRecurrence) without the split: the hidden
/// state is written to the output slot directly and its gradient is summed from the output, the
/// next timestep and the prediction.
///
/// After each timestep a predictor maps the hidden state to `[1, N, D]` followed by the
/// configured activation. The predictions are concatenated into the auxiliary top.
#[derive(Debug)]
pub struct LocalLstmRecurrence {
    options: LocalLstmOptions,
    scale: Scale,
    concat: Concat,
    gate: InnerProduct,
    unit: LstmUnit,
    predictor: InnerProduct,
    activation: Box<dyn Layer>,
    concat_prediction: Concat,
    c0: Blob,
    // `hp[0]` is the seed hidden state, `hp[t + 1]` aliases the hidden output of `t`.
    hp: Vec<Blob>,
    hc: Vec<Blob>,
    xh: Vec<Blob>,
    gates: Vec<Blob>,
    c: Vec<Blob>,
    // Aliases of the hidden outputs read by the predictor.
    hq: Vec<Blob>,
    pre: Vec<Blob>,
    prediction: Vec<Blob>,
}

impl LocalLstmRecurrence {
    /// Creates a new [`LocalLstmRecurrence`].
    pub fn new(options: LocalLstmOptions) -> Self {
        let gate = InnerProduct::new(options.recurrent.gate_options(4));
        let activation: Box<dyn Layer> = match options.activation {
            Activation::Sigmoid => Box::new(Sigmoid),
            Activation::Relu => Box::new(Relu::new()),
        };
        Self {
            options,
            scale: Scale::new(0),
            concat: Concat::new(2),
            gate,
            unit: LstmUnit::new(),
            // Sized in setup, once the input dimension is known.
            predictor: InnerProduct::new(InnerProductOptions::new(0)),
            activation,
            concat_prediction: Concat::new(0),
            c0: Blob::default(),
            hp: vec![Blob::default()],
            hc: Vec::new(),
            xh: Vec::new(),
            gates: Vec::new(),
            c: Vec::new(),
            hq: Vec::new(),
            pre: Vec::new(),
            prediction: Vec::new(),
        }
    }
    fn resize(&mut self, steps: &Timesteps) {
        let len = steps.len();
        for blobs in [
            &mut self.hc,
            &mut self.xh,
            &mut self.gates,
            &mut self.c,
            &mut self.pre,
            &mut self.prediction,
        ] {
            blobs.resize_with(len, Blob::default);
        }
        alias_previous_hidden(&mut self.hp, steps);
        self.hq = steps.h.iter().map(Blob::alias_value).collect();
    }
}

impl RecurrentLayer<LocalLstmRecurrence> {
    /// Creates a new [`LocalLstm`](super::LocalLstm).
    pub fn new(options: LocalLstmOptions) -> Self {
        Self::from_recurrence(LocalLstmRecurrence::new(options))
    }
}

impl Recurrence for LocalLstmRecurrence {
    fn type_name(&self) -> &'static str {
        "LocalLSTM"
    }
    fn options(&self) -> &RecurrentOptions {
        &self.options.recurrent
    }
    fn num_states(&self) -> usize {
        2
    }
    fn num_aux_outputs(&self) -> usize {
        1
    }
    fn setup(&mut self, steps: &Timesteps, context: &mut Context) -> Result<Vec<Blob>> {
        let shape = [1, steps.batch(), self.hidden_dim()];
        let input_dim = steps.x[0].dim(2)?;
        self.predictor = InnerProduct::new(
            InnerProductOptions::new(input_dim)
                .with_axis(2)
                .with_bias(self.options.recurrent.bias_term)
                .with_weight_filler(self.options.predictor_filler)
                .with_bias_filler(self.options.recurrent.bias_filler),
        );
        self.hp[0] = Blob::zeros(&shape);
        self.c0 = Blob::zeros(&shape);
        self.resize(steps);
        let (x, cont, h) = (&steps.x[0], &steps.cont[0], &steps.h[0]);
        let (hc, xh, gates, c) = (&self.hc[0], &self.xh[0], &self.gates[0], &self.c[0]);
        let (hq, pre, prediction) = (&self.hq[0], &self.pre[0], &self.prediction[0]);
        self.scale
            .setup(&[self.hp[0].clone(), cont.clone()], &[hc.clone()], context)?;
        self.concat
            .setup(&[x.clone(), hc.clone()], &[xh.clone()], context)?;
        self.gate.setup(&[xh.clone()], &[gates.clone()], context)?;
        self.unit.setup(
            &[self.c0.clone(), gates.clone(), cont.clone()],
            &[c.clone(), h.clone()],
            context,
        )?;
        hq.reshape_like(h);
        self.predictor
            .setup(&[hq.clone()], &[pre.clone()], context)?;
        self.activation
            .setup(&[pre.clone()], &[prediction.clone()], context)?;
        Ok(collect_params(&[&self.gate, &self.predictor]))
    }
    fn reshape(&mut self, steps: &mut Timesteps) -> Result<()> {
        let aliased = self.hq.len() == steps.len()
            && self
                .hq
                .iter()
                .zip(&steps.h)
                .all(|(hq, h)| hq.shares_value_with(h));
        if !aliased || self.hp.len() != steps.len() + 1 {
            self.resize(steps);
        }
        let shape = [1, steps.batch(), self.hidden_dim()];
        self.hp[0].reshape(&shape);
        self.c0.reshape(&shape);
        for t in 0..steps.len() {
            let (x, cont, h) = (&steps.x[t], &steps.cont[t], &steps.h[t]);
            let h_prev = &self.hp[t];
            let c_prev = previous(&self.c, &self.c0, t);
            let (hc, xh, gates, c) = (&self.hc[t], &self.xh[t], &self.gates[t], &self.c[t]);
            let (hq, pre, prediction) = (&self.hq[t], &self.pre[t], &self.prediction[t]);
            self.scale
                .reshape(&[h_prev.clone(), cont.clone()], &[hc.clone()])?;
            self.concat.reshape(&[x.clone(), hc.clone()], &[xh.clone()])?;
            self.gate.reshape(&[xh.clone()], &[gates.clone()])?;
            self.unit.reshape(
                &[c_prev.clone(), gates.clone(), cont.clone()],
                &[c.clone(), h.clone()],
            )?;
            self.hp[t + 1].reshape_like(h);
            hq.reshape_like(h);
            self.predictor.reshape(&[hq.clone()], &[pre.clone()])?;
            self.activation
                .reshape(&[pre.clone()], &[prediction.clone()])?;
        }
        Ok(())
    }
    fn reshape_aux(&mut self, _steps: &Timesteps, aux: &[Blob]) -> Result<()> {
        self.concat_prediction.reshape(&self.prediction, aux)
    }
    fn share_weight(&mut self, blobs: &[Blob], propagate: &[bool]) -> Result<()> {
        share_params(&mut [&mut self.gate, &mut self.predictor], blobs, propagate)
    }
    fn seeds(&self) -> Vec<Blob> {
        vec![self.hp[0].clone(), self.c0.clone()]
    }
    fn final_states(&self, steps: &Timesteps) -> Vec<Blob> {
        let t = steps.len();
        vec![
            previous(&self.hp[1..], &self.hp[0], t).clone(),
            previous(&self.c, &self.c0, t).clone(),
        ]
    }
    fn forward_step(&mut self, t: usize, steps: &Timesteps) -> Result<()> {
        let (x, cont, h) = (&steps.x[t], &steps.cont[t], &steps.h[t]);
        let h_prev = &self.hp[t];
        let c_prev = previous(&self.c, &self.c0, t);
        let (hc, xh, gates, c) = (&self.hc[t], &self.xh[t], &self.gates[t], &self.c[t]);
        let (hq, pre, prediction) = (&self.hq[t], &self.pre[t], &self.prediction[t]);
        self.scale
            .forward(&[h_prev.clone(), cont.clone()], &[hc.clone()])?;
        self.concat.forward(&[x.clone(), hc.clone()], &[xh.clone()])?;
        self.gate.forward(&[xh.clone()], &[gates.clone()])?;
        self.unit.forward(
            &[c_prev.clone(), gates.clone(), cont.clone()],
            &[c.clone(), h.clone()],
        )?;
        self.predictor.forward(&[hq.clone()], &[pre.clone()])?;
        self.activation
            .forward(&[pre.clone()], &[prediction.clone()])
    }
    fn forward_aux(&mut self, _steps: &Timesteps, aux: &[Blob]) -> Result<()> {
        self.concat_prediction.forward(&self.prediction, aux)
    }
    fn backward_aux(&mut self, _steps: &Timesteps, aux: &[Blob]) -> Result<()> {
        let propagate = vec![true; self.prediction.len()];
        self.concat_prediction
            .backward(aux, &propagate, &self.prediction)
    }
    fn backward_step(&mut self, t: usize, steps: &Timesteps, propagate_input: bool) -> Result<()> {
        let (x, cont, h) = (&steps.x[t], &steps.cont[t], &steps.h[t]);
        let (h_prev, h_next) = (&self.hp[t], &self.hp[t + 1]);
        let c_prev = previous(&self.c, &self.c0, t);
        let (hc, xh, gates, c) = (&self.hc[t], &self.xh[t], &self.gates[t], &self.c[t]);
        let (hq, pre, prediction) = (&self.hq[t], &self.pre[t], &self.prediction[t]);
        self.activation
            .backward(&[prediction.clone()], &[true], &[pre.clone()])?;
        self.predictor.backward(&[pre.clone()], &[true], &[hq.clone()])?;
        h.accumulate_grad_from(h_next)?;
        h.accumulate_grad_from(hq)?;
        self.unit.backward(
            &[c.clone(), h.clone()],
            &[true, true, false],
            &[c_prev.clone(), gates.clone(), cont.clone()],
        )?;
        clip_grad(gates, self.options.recurrent.clipping_threshold);
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
