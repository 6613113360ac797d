use super::{propagates, Layer};
use crate::{blob::Blob, error::ensure_shape};
use anyhow::Result;
use ndarray::{Axis, Slice as NdSlice};

/// Concatenates bottoms along an axis.
#[derive(Debug)]
pub struct Concat {
    axis: usize,
}

impl Concat {
    /// Creates a new [`Concat`] along `axis`.
    pub fn new(axis: usize) -> Self {
        Self { axis }
    }
}

impl Layer for Concat {
    fn type_name(&self) -> &'static str {
        "Concat"
    }
    fn min_bottom_blobs(&self) -> Option<usize> {
        Some(1)
    }
    fn exact_num_top_blobs(&self) -> Option<usize> {
        Some(1)
    }
    fn reshape(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        let axis = self.axis;
        let mut top_shape = bottom[0].shape();
        ensure_shape!(
            axis < top_shape.len(),
            self.type_name(),
            "axis {axis} out of range for {top_shape:?}"
        );
        for blob in bottom.iter().skip(1) {
            let shape = blob.shape();
            let matches = shape.len() == top_shape.len()
                && shape
                    .iter()
                    .zip(top_shape.iter())
                    .enumerate()
                    .all(|(i, (a, b))| i == axis || a == b);
            ensure_shape!(
                matches,
                self.type_name(),
                "bottom {shape:?} does not match {top_shape:?} outside axis {axis}"
            );
            top_shape[axis] += shape[axis];
        }
        top[0].reshape(&top_shape);
        Ok(())
    }
    fn forward(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        let axis = Axis(self.axis);
        let mut y = top[0].value_mut();
        let mut offset = 0;
        for blob in bottom {
            let x = blob.value();
            let len = x.len_of(axis);
            y.slice_axis_mut(axis, NdSlice::from(offset..offset + len))
                .assign(&*x);
            offset += len;
        }
        Ok(())
    }
    fn backward(&mut self, top: &[Blob], propagate_down: &[bool], bottom: &[Blob]) -> Result<()> {
        let axis = Axis(self.axis);
        let dy = top[0].grad();
        let mut offset = 0;
        for (i, blob) in bottom.iter().enumerate() {
            let len = blob.dim(self.axis)?;
            if propagates(propagate_down, i) {
                blob.grad_mut()
                    .assign(&dy.slice_axis(axis, NdSlice::from(offset..offset + len)));
            }
            offset += len;
        }
        Ok(())
    }
}
