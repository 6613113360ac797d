//! Gated recurrence units.
//!
//! Units are stateless between calls: backward recomputes the activations from the forward
//! inputs.
use crate::{
    blob::Blob,
    error::ensure_shape,
    layer::{check_propagate_down, propagates, Layer},
    math::{sigmoid, tanh},
};
use anyhow::Result;
use ndarray::{Array1, ArrayView1, ArrayViewMut1, Zip};

const PARALLEL_THRESHOLD: usize = 1 << 12;

fn parallel(len: usize) -> bool {
    len >= PARALLEL_THRESHOLD && rayon::current_num_threads() > 1
}

fn continuation(bottom: &[Blob], index: usize, batch: usize) -> Result<Array1<f32>> {
    match bottom.get(index) {
        Some(cont) => Ok(cont.value().view().into_shape(batch)?.to_owned()),
        None => Ok(Array1::ones(batch)),
    }
}

/// Checks `[1, N, dim]` and returns `N`.
fn check_state(layer: &'static str, blob: &Blob, what: &str, dim: Option<usize>) -> Result<usize> {
    let shape = blob.shape();
    ensure_shape!(
        shape.len() == 3 && shape[0] == 1 && dim.map_or(true, |d| shape[2] == d),
        layer,
        "{what} must be [1, N, {}], found {shape:?}",
        dim.map_or("D".to_string(), |d| d.to_string())
    );
    Ok(shape[1])
}

fn check_continuation(layer: &'static str, blob: &Blob, batch: usize) -> Result<()> {
    let shape = blob.shape();
    ensure_shape!(
        shape == [1, batch],
        layer,
        "continuation must be [1, {batch}], found {shape:?}"
    );
    Ok(())
}

/// LSTM unit.
///
/// Bottoms: previous cell `[1, N, D]`, gate pre-activations `[1, N, 4D]` ordered input, forget,
/// output and candidate, and (plain variant) continuation flags `[1, N]`.
///
/// Tops: cell `[1, N, D]` and hidden `[1, N, D]`.
///
/// ```text
/// i = sigmoid(a_i), f = sigmoid(a_f), o = sigmoid(a_o), g = tanh(a_g)
/// c = cont * f * c_prev + i * g
/// h = o * tanh(c)
/// ```
/// The decoder variant has no continuation bottom, its callers reset the state themselves.
#[derive(Debug)]
pub struct LstmUnit {
    continuation: bool,
    batch: usize,
    hidden_dim: usize,
}

impl Default for LstmUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl LstmUnit {
    /// The plain unit, gated by continuation flags.
    pub fn new() -> Self {
        Self {
            continuation: true,
            batch: 0,
            hidden_dim: 0,
        }
    }
    /// The decoder unit, without continuation flags.
    pub fn decoder() -> Self {
        Self {
            continuation: false,
            ..Self::new()
        }
    }
}

fn lstm_forward_row(
    c_prev: ArrayView1<f32>,
    gates: ArrayView1<f32>,
    cont: f32,
    mut c: ArrayViewMut1<f32>,
    mut h: ArrayViewMut1<f32>,
) {
    let dim = c.len();
    for d in 0..dim {
        let i = sigmoid(gates[d]);
        let f = sigmoid(gates[dim + d]);
        let o = sigmoid(gates[2 * dim + d]);
        let g = tanh(gates[3 * dim + d]);
        let c_d = cont * f * c_prev[d] + i * g;
        c[d] = c_d;
        h[d] = o * tanh(c_d);
    }
}

#[allow(clippy::too_many_arguments)]
fn lstm_backward_row(
    c_prev: ArrayView1<f32>,
    gates: ArrayView1<f32>,
    cont: f32,
    dc: ArrayView1<f32>,
    dh: ArrayView1<f32>,
    mut dc_prev: ArrayViewMut1<f32>,
    mut dgates: ArrayViewMut1<f32>,
) {
    let dim = c_prev.len();
    for d in 0..dim {
        let i = sigmoid(gates[d]);
        let f = sigmoid(gates[dim + d]);
        let o = sigmoid(gates[2 * dim + d]);
        let g = tanh(gates[3 * dim + d]);
        let c = cont * f * c_prev[d] + i * g;
        let tanh_c = tanh(c);
        let c_term = dc[d] + dh[d] * o * (1. - tanh_c * tanh_c);
        dc_prev[d] = c_term * cont * f;
        dgates[d] = c_term * g * i * (1. - i);
        dgates[dim + d] = c_term * c_prev[d] * cont * f * (1. - f);
        dgates[2 * dim + d] = dh[d] * tanh_c * o * (1. - o);
        dgates[3 * dim + d] = c_term * i * (1. - g * g);
    }
}

impl Layer for LstmUnit {
    fn type_name(&self) -> &'static str {
        if self.continuation {
            "LSTMUnit"
        } else {
            "DecoderLSTMUnit"
        }
    }
    fn exact_num_bottom_blobs(&self) -> Option<usize> {
        Some(if self.continuation { 3 } else { 2 })
    }
    fn exact_num_top_blobs(&self) -> Option<usize> {
        Some(2)
    }
    fn allow_force_backward(&self, index: usize) -> bool {
        index != 2
    }
    fn reshape(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        let layer = self.type_name();
        let batch = check_state(layer, &bottom[0], "previous cell", None)?;
        let hidden_dim = bottom[0].dim(2)?;
        let gate_batch = check_state(layer, &bottom[1], "gates", Some(4 * hidden_dim))?;
        ensure_shape!(
            gate_batch == batch,
            layer,
            "gates batch {gate_batch} does not match previous cell batch {batch}"
        );
        if self.continuation {
            check_continuation(layer, &bottom[2], batch)?;
        }
        self.batch = batch;
        self.hidden_dim = hidden_dim;
        for blob in top {
            blob.reshape(&[1, batch, hidden_dim]);
        }
        Ok(())
    }
    fn forward(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        let (n, dim) = (self.batch, self.hidden_dim);
        let cont = continuation(bottom, 2, n)?;
        let c_prev = bottom[0].value();
        let c_prev = c_prev.view().into_shape((n, dim))?;
        let gates = bottom[1].value();
        let gates = gates.view().into_shape((n, 4 * dim))?;
        let mut c = top[0].value_mut();
        let mut c = c.view_mut().into_shape((n, dim))?;
        let mut h = top[1].value_mut();
        let mut h = h.view_mut().into_shape((n, dim))?;
        let zip = Zip::indexed(c.rows_mut()).and(h.rows_mut());
        let row = |j: usize, c, h| lstm_forward_row(c_prev.row(j), gates.row(j), cont[j], c, h);
        if parallel(n * dim) {
            zip.par_for_each(row);
        } else {
            zip.for_each(row);
        }
        Ok(())
    }
    fn backward(&mut self, top: &[Blob], propagate_down: &[bool], bottom: &[Blob]) -> Result<()> {
        let (n, dim) = (self.batch, self.hidden_dim);
        check_propagate_down(self, propagate_down)?;
        if !propagates(propagate_down, 0) && !propagates(propagate_down, 1) {
            return Ok(());
        }
        let cont = continuation(bottom, 2, n)?;
        let c_prev = bottom[0].value();
        let c_prev = c_prev.view().into_shape((n, dim))?;
        let gates = bottom[1].value();
        let gates = gates.view().into_shape((n, 4 * dim))?;
        let dc = top[0].grad();
        let dc = dc.view().into_shape((n, dim))?;
        let dh = top[1].grad();
        let dh = dh.view().into_shape((n, dim))?;
        let mut dc_prev = bottom[0].grad_mut();
        let mut dc_prev = dc_prev.view_mut().into_shape((n, dim))?;
        let mut dgates = bottom[1].grad_mut();
        let mut dgates = dgates.view_mut().into_shape((n, 4 * dim))?;
        // Both gradients are computed together, a bottom that was not requested is still
        // written and left for the caller to ignore.
        let zip = Zip::indexed(dc_prev.rows_mut()).and(dgates.rows_mut());
        let row = |j: usize, dc_prev, dgates| {
            lstm_backward_row(
                c_prev.row(j),
                gates.row(j),
                cont[j],
                dc.row(j),
                dh.row(j),
                dc_prev,
                dgates,
            )
        };
        if parallel(n * dim) {
            zip.par_for_each(row);
        } else {
            zip.for_each(row);
        }
        Ok(())
    }
}

/// Unit with a fast and a slow memory.
///
/// Bottoms: previous fast memory `[1, N, D]`, previous slow memory `[1, N, D]`, gate
/// pre-activations `[1, N, 5D]` ordered input, forget, output, candidate and slow update, and
/// continuation flags `[1, N]`.
///
/// Tops: fast memory, slow memory and hidden, each `[1, N, D]`.
///
/// ```text
/// fast = cont * f * fast_prev + i * g
/// slow = cont * s * slow_prev + (1 - s) * fast
/// h = o * tanh(fast + slow)
/// ```
#[derive(Debug, Default)]
pub struct DualMemoryUnit {
    batch: usize,
    hidden_dim: usize,
}

impl DualMemoryUnit {
    /// Creates a new [`DualMemoryUnit`].
    pub fn new() -> Self {
        Self::default()
    }
}

struct DualGates {
    i: f32,
    f: f32,
    o: f32,
    g: f32,
    s: f32,
}

impl DualGates {
    fn new(gates: &ArrayView1<f32>, dim: usize, d: usize) -> Self {
        Self {
            i: sigmoid(gates[d]),
            f: sigmoid(gates[dim + d]),
            o: sigmoid(gates[2 * dim + d]),
            g: tanh(gates[3 * dim + d]),
            s: sigmoid(gates[4 * dim + d]),
        }
    }
}

struct DualInputs<'a> {
    fast_prev: ArrayView1<'a, f32>,
    slow_prev: ArrayView1<'a, f32>,
    gates: ArrayView1<'a, f32>,
    cont: f32,
}

fn dual_forward_row(
    x: DualInputs,
    mut fast: ArrayViewMut1<f32>,
    mut slow: ArrayViewMut1<f32>,
    mut h: ArrayViewMut1<f32>,
) {
    let dim = fast.len();
    for d in 0..dim {
        let DualGates { i, f, o, g, s } = DualGates::new(&x.gates, dim, d);
        let fast_d = x.cont * f * x.fast_prev[d] + i * g;
        let slow_d = x.cont * s * x.slow_prev[d] + (1. - s) * fast_d;
        fast[d] = fast_d;
        slow[d] = slow_d;
        h[d] = o * tanh(fast_d + slow_d);
    }
}

fn dual_backward_row(
    x: DualInputs,
    dfast: ArrayView1<f32>,
    dslow: ArrayView1<f32>,
    dh: ArrayView1<f32>,
    mut dfast_prev: ArrayViewMut1<f32>,
    mut dslow_prev: ArrayViewMut1<f32>,
    mut dgates: ArrayViewMut1<f32>,
) {
    let dim = dfast.len();
    let cont = x.cont;
    for d in 0..dim {
        let DualGates { i, f, o, g, s } = DualGates::new(&x.gates, dim, d);
        let fast = cont * f * x.fast_prev[d] + i * g;
        let slow = cont * s * x.slow_prev[d] + (1. - s) * fast;
        let tanh_m = tanh(fast + slow);
        let m_term = dh[d] * o * (1. - tanh_m * tanh_m);
        let slow_term = dslow[d] + m_term;
        let fast_term = dfast[d] + m_term + slow_term * (1. - s);
        dfast_prev[d] = fast_term * cont * f;
        dslow_prev[d] = slow_term * cont * s;
        dgates[d] = fast_term * g * i * (1. - i);
        dgates[dim + d] = fast_term * x.fast_prev[d] * cont * f * (1. - f);
        dgates[2 * dim + d] = dh[d] * tanh_m * o * (1. - o);
        dgates[3 * dim + d] = fast_term * i * (1. - g * g);
        dgates[4 * dim + d] = slow_term * (cont * x.slow_prev[d] - fast) * s * (1. - s);
    }
}

impl Layer for DualMemoryUnit {
    fn type_name(&self) -> &'static str {
        "DualMemoryUnit"
    }
    fn exact_num_bottom_blobs(&self) -> Option<usize> {
        Some(4)
    }
    fn exact_num_top_blobs(&self) -> Option<usize> {
        Some(3)
    }
    fn allow_force_backward(&self, index: usize) -> bool {
        index != 3
    }
    fn reshape(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        let layer = self.type_name();
        let batch = check_state(layer, &bottom[0], "previous fast memory", None)?;
        let hidden_dim = bottom[0].dim(2)?;
        let slow_batch = check_state(layer, &bottom[1], "previous slow memory", Some(hidden_dim))?;
        let gate_batch = check_state(layer, &bottom[2], "gates", Some(5 * hidden_dim))?;
        ensure_shape!(
            slow_batch == batch && gate_batch == batch,
            layer,
            "batch sizes {batch}, {slow_batch} and {gate_batch} differ"
        );
        check_continuation(layer, &bottom[3], batch)?;
        self.batch = batch;
        self.hidden_dim = hidden_dim;
        for blob in top {
            blob.reshape(&[1, batch, hidden_dim]);
        }
        Ok(())
    }
    fn forward(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        let (n, dim) = (self.batch, self.hidden_dim);
        let cont = continuation(bottom, 3, n)?;
        let fast_prev = bottom[0].value();
        let fast_prev = fast_prev.view().into_shape((n, dim))?;
        let slow_prev = bottom[1].value();
        let slow_prev = slow_prev.view().into_shape((n, dim))?;
        let gates = bottom[2].value();
        let gates = gates.view().into_shape((n, 5 * dim))?;
        let mut fast = top[0].value_mut();
        let mut fast = fast.view_mut().into_shape((n, dim))?;
        let mut slow = top[1].value_mut();
        let mut slow = slow.view_mut().into_shape((n, dim))?;
        let mut h = top[2].value_mut();
        let mut h = h.view_mut().into_shape((n, dim))?;
        let zip = Zip::indexed(fast.rows_mut())
            .and(slow.rows_mut())
            .and(h.rows_mut());
        let row = |j: usize, fast, slow, h| {
            let x = DualInputs {
                fast_prev: fast_prev.row(j),
                slow_prev: slow_prev.row(j),
                gates: gates.row(j),
                cont: cont[j],
            };
            dual_forward_row(x, fast, slow, h)
        };
        if parallel(n * dim) {
            zip.par_for_each(row);
        } else {
            zip.for_each(row);
        }
        Ok(())
    }
    fn backward(&mut self, top: &[Blob], propagate_down: &[bool], bottom: &[Blob]) -> Result<()> {
        let (n, dim) = (self.batch, self.hidden_dim);
        check_propagate_down(self, propagate_down)?;
        if !(0..3).any(|i| propagates(propagate_down, i)) {
            return Ok(());
        }
        let cont = continuation(bottom, 3, n)?;
        let fast_prev = bottom[0].value();
        let fast_prev = fast_prev.view().into_shape((n, dim))?;
        let slow_prev = bottom[1].value();
        let slow_prev = slow_prev.view().into_shape((n, dim))?;
        let gates = bottom[2].value();
        let gates = gates.view().into_shape((n, 5 * dim))?;
        let dfast = top[0].grad();
        let dfast = dfast.view().into_shape((n, dim))?;
        let dslow = top[1].grad();
        let dslow = dslow.view().into_shape((n, dim))?;
        let dh = top[2].grad();
        let dh = dh.view().into_shape((n, dim))?;
        let mut dfast_prev = bottom[0].grad_mut();
        let mut dfast_prev = dfast_prev.view_mut().into_shape((n, dim))?;
        let mut dslow_prev = bottom[1].grad_mut();
        let mut dslow_prev = dslow_prev.view_mut().into_shape((n, dim))?;
        let mut dgates = bottom[2].grad_mut();
        let mut dgates = dgates.view_mut().into_shape((n, 5 * dim))?;
        let zip = Zip::indexed(dfast_prev.rows_mut())
            .and(dslow_prev.rows_mut())
            .and(dgates.rows_mut());
        let row = |j: usize, dfast_prev, dslow_prev, dgates| {
            let x = DualInputs {
                fast_prev: fast_prev.row(j),
                slow_prev: slow_prev.row(j),
                gates: gates.row(j),
                cont: cont[j],
            };
            dual_backward_row(
                x,
                dfast.row(j),
                dslow.row(j),
                dh.row(j),
                dfast_prev,
                dslow_prev,
                dgates,
            )
        };
        if parallel(n * dim) {
            zip.par_for_each(row);
        } else {
            zip.for_each(row);
        }
        Ok(())
    }
}
