use super::{propagates, Layer};
use crate::{blob::Blob, error::ensure_shape};
use anyhow::Result;
use ndarray::Axis;

/// Multiplies the first bottom by the second, broadcast from `axis`.
///
/// The shape of the second bottom must equal the shape of the first on the axes starting at
/// `axis`. The recurrent layers use this with the continuation flags to zero the previous state
/// of restarted sequences.
#[derive(Debug)]
pub struct Scale {
    axis: usize,
    outer: usize,
    scale: usize,
    inner: usize,
}

impl Scale {
    /// Creates a new [`Scale`] broadcasting from `axis`.
    pub fn new(axis: usize) -> Self {
        Self {
            axis,
            outer: 0,
            scale: 0,
            inner: 0,
        }
    }
}

impl Layer for Scale {
    fn type_name(&self) -> &'static str {
        "Scale"
    }
    fn exact_num_bottom_blobs(&self) -> Option<usize> {
        Some(2)
    }
    fn exact_num_top_blobs(&self) -> Option<usize> {
        Some(1)
    }
    fn reshape(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        let axis = self.axis;
        let shape = bottom[0].shape();
        let scale_shape = bottom[1].shape();
        let end = axis + scale_shape.len();
        ensure_shape!(
            end <= shape.len() && shape[axis..end] == scale_shape[..],
            self.type_name(),
            "scale {scale_shape:?} does not match {shape:?} at axis {axis}"
        );
        self.outer = shape[..axis].iter().product();
        self.scale = scale_shape.iter().product();
        self.inner = shape[end..].iter().product();
        top[0].reshape(&shape);
        Ok(())
    }
    fn forward(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        let dim = (self.outer, self.scale, self.inner);
        let x = bottom[0].value();
        let x = x.view().into_shape(dim)?;
        let s = bottom[1].value();
        let s = s.view().into_shape(self.scale)?;
        let mut y = top[0].value_mut();
        let mut y = y.view_mut().into_shape(dim)?;
        y.assign(&x);
        for mut y in y.outer_iter_mut() {
            y.axis_iter_mut(Axis(0))
                .zip(s.iter())
                .for_each(|(mut y, s)| y *= *s);
        }
        Ok(())
    }
    fn backward(&mut self, top: &[Blob], propagate_down: &[bool], bottom: &[Blob]) -> Result<()> {
        let dim = (self.outer, self.scale, self.inner);
        let dy = top[0].grad();
        let dy = dy.view().into_shape(dim)?;
        if propagates(propagate_down, 1) {
            let x = bottom[0].value();
            let x = x.view().into_shape(dim)?;
            let mut ds = bottom[1].grad_mut();
            let mut ds = ds.view_mut().into_shape(self.scale)?;
            ds.fill(0.);
            for (x, dy) in x.outer_iter().zip(dy.outer_iter()) {
                for ((x, dy), ds) in x.outer_iter().zip(dy.outer_iter()).zip(ds.iter_mut()) {
                    *ds += x.dot(&dy);
                }
            }
        }
        if propagates(propagate_down, 0) {
            let s = bottom[1].value();
            let s = s.view().into_shape(self.scale)?;
            let mut dx = bottom[0].grad_mut();
            let mut dx = dx.view_mut().into_shape(dim)?;
            dx.assign(&dy);
            for mut dx in dx.outer_iter_mut() {
                dx.axis_iter_mut(Axis(0))
                    .zip(s.iter())
                    .for_each(|(mut dx, s)| dx *= *s);
            }
        }
        Ok(())
    }
}
