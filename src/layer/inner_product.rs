use super::{propagates, Context, Layer};
use crate::{blob::Blob, error::ensure_shape, options::InnerProductOptions};
use anyhow::Result;
use ndarray::{linalg::general_mat_mul, Axis, Ix2};

/// Fully connected layer.
///
/// Axes before `axis` are batch axes (`M` rows), the remaining axes are flattened into `K`
/// inputs. The weight is `[num_output, K]` and the top is the bottom shape up to `axis` followed
/// by `num_output`.
#[derive(Debug)]
pub struct InnerProduct {
    options: InnerProductOptions,
    blobs: Vec<Blob>,
    propagate: Vec<bool>,
    m: usize,
    k: usize,
}

impl InnerProduct {
    /// Creates a new [`InnerProduct`] with `options`.
    pub fn new(options: InnerProductOptions) -> Self {
        Self {
            options,
            blobs: Vec::new(),
            propagate: Vec::new(),
            m: 0,
            k: 0,
        }
    }
    /// The options.
    pub fn options(&self) -> &InnerProductOptions {
        &self.options
    }
}

impl Layer for InnerProduct {
    fn type_name(&self) -> &'static str {
        "InnerProduct"
    }
    fn exact_num_bottom_blobs(&self) -> Option<usize> {
        Some(1)
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
        let axis = self.options.axis;
        let num_axes = bottom[0].num_axes();
        ensure_shape!(
            axis <= num_axes,
            self.type_name(),
            "axis {axis} out of range for {num_axes} axes"
        );
        let k = bottom[0].count_range(axis, num_axes);
        let weight = Blob::zeros(&[self.options.num_output, k]);
        self.options.weight_filler.fill(&weight, context.rng())?;
        self.blobs = vec![weight];
        if self.options.bias_term {
            let bias = Blob::zeros(&[self.options.num_output]);
            self.options.bias_filler.fill(&bias, context.rng())?;
            self.blobs.push(bias);
        }
        self.propagate = vec![true; self.blobs.len()];
        Ok(())
    }
    fn reshape(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        let axis = self.options.axis;
        let shape = bottom[0].shape();
        ensure_shape!(
            axis <= shape.len(),
            self.type_name(),
            "axis {axis} out of range for {shape:?}"
        );
        let k = shape[axis..].iter().product::<usize>();
        let expected = self.blobs.first().map_or(0, |w| w.count_range(1, 2));
        ensure_shape!(
            k == expected,
            self.type_name(),
            "input size {k} of bottom {shape:?} does not match weight inputs {expected}"
        );
        self.m = shape[..axis].iter().product();
        self.k = k;
        let mut top_shape = shape[..axis].to_vec();
        top_shape.push(self.options.num_output);
        top[0].reshape(&top_shape);
        Ok(())
    }
    fn forward(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        let (m, k, n) = (self.m, self.k, self.options.num_output);
        let x = bottom[0].value();
        let x = x.view().into_shape((m, k))?;
        let w = self.blobs[0].value();
        let w = w.view().into_dimensionality::<Ix2>()?;
        let mut y = top[0].value_mut();
        let mut y = y.view_mut().into_shape((m, n))?;
        general_mat_mul(1., &x, &w.t(), 0., &mut y);
        if let Some(bias) = self.blobs.get(1) {
            let b = bias.value();
            let b = b.view().into_shape(n)?;
            y.rows_mut().into_iter().for_each(|mut row| row += &b);
        }
        Ok(())
    }
    fn backward(&mut self, top: &[Blob], propagate_down: &[bool], bottom: &[Blob]) -> Result<()> {
        let (m, k, n) = (self.m, self.k, self.options.num_output);
        let dy = top[0].grad();
        let dy = dy.view().into_shape((m, n))?;
        if self.param_propagate_down(0) {
            let x = bottom[0].value();
            let x = x.view().into_shape((m, k))?;
            let mut dw = self.blobs[0].grad_mut();
            let mut dw = dw.view_mut().into_shape((n, k))?;
            general_mat_mul(1., &dy.t(), &x, 1., &mut dw);
        }
        if self.blobs.len() > 1 && self.param_propagate_down(1) {
            let mut db = self.blobs[1].grad_mut();
            let mut db = db.view_mut().into_shape(n)?;
            db += &dy.sum_axis(Axis(0));
        }
        if propagates(propagate_down, 0) {
            let w = self.blobs[0].value();
            let w = w.view().into_dimensionality::<Ix2>()?;
            let mut dx = bottom[0].grad_mut();
            let mut dx = dx.view_mut().into_shape((m, k))?;
            general_mat_mul(1., &dy, &w, 0., &mut dx);
        }
        Ok(())
    }
}
