use super::{propagates, Layer};
use crate::{blob::Blob, error::ensure_shape};
use anyhow::Result;
use ndarray::{Axis, Slice as NdSlice};

/// Slices a bottom along an axis into equal parts, one per top.
#[derive(Debug)]
pub struct Slice {
    axis: usize,
}

impl Slice {
    /// Creates a new [`Slice`] along `axis`.
    pub fn new(axis: usize) -> Self {
        Self { axis }
    }
}

impl Layer for Slice {
    fn type_name(&self) -> &'static str {
        "Slice"
    }
    fn exact_num_bottom_blobs(&self) -> Option<usize> {
        Some(1)
    }
    fn min_top_blobs(&self) -> Option<usize> {
        Some(1)
    }
    fn reshape(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        let axis = self.axis;
        let mut shape = bottom[0].shape();
        ensure_shape!(
            axis < shape.len(),
            self.type_name(),
            "axis {axis} out of range for {shape:?}"
        );
        ensure_shape!(
            shape[axis] % top.len() == 0,
            self.type_name(),
            "cannot slice {shape:?} along axis {axis} into {} tops",
            top.len()
        );
        shape[axis] /= top.len();
        for blob in top {
            blob.reshape(&shape);
        }
        Ok(())
    }
    fn forward(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        let axis = Axis(self.axis);
        let x = bottom[0].value();
        let len = x.len_of(axis) / top.len().max(1);
        for (i, blob) in top.iter().enumerate() {
            blob.value_mut()
                .assign(&x.slice_axis(axis, NdSlice::from(i * len..(i + 1) * len)));
        }
        Ok(())
    }
    fn backward(&mut self, top: &[Blob], propagate_down: &[bool], bottom: &[Blob]) -> Result<()> {
        if !propagates(propagate_down, 0) {
            return Ok(());
        }
        let axis = Axis(self.axis);
        let mut dx = bottom[0].grad_mut();
        let len = dx.len_of(axis) / top.len().max(1);
        for (i, blob) in top.iter().enumerate() {
            dx.slice_axis_mut(axis, NdSlice::from(i * len..(i + 1) * len))
                .assign(&*blob.grad());
        }
        Ok(())
    }
}
