use super::{propagates, Layer};
use crate::{blob::Blob, error::ensure_shape};
use anyhow::Result;

/// Hands one bottom to several consumers.
///
/// The tops alias the value of the bottom (see [`Blob::alias_value()`]) so forward copies
/// nothing. Each top keeps its own gradient and backward sums them into the bottom.
#[derive(Debug, Default)]
pub struct Split;

impl Split {
    /// Creates a new [`Split`].
    pub fn new() -> Self {
        Self
    }
}

impl Layer for Split {
    fn type_name(&self) -> &'static str {
        "Split"
    }
    fn exact_num_bottom_blobs(&self) -> Option<usize> {
        Some(1)
    }
    fn min_top_blobs(&self) -> Option<usize> {
        Some(1)
    }
    fn reshape(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        let shape = bottom[0].shape();
        for (i, blob) in top.iter().enumerate() {
            blob.reshape(&shape);
            ensure_shape!(
                blob.shares_value_with(&bottom[0]),
                self.type_name(),
                "top {i} does not alias the bottom value"
            );
            ensure_shape!(
                !blob.shares_grad_with(&bottom[0]),
                self.type_name(),
                "top {i} must not alias the bottom gradient"
            );
        }
        Ok(())
    }
    fn forward(&mut self, _bottom: &[Blob], _top: &[Blob]) -> Result<()> {
        Ok(())
    }
    fn backward(&mut self, top: &[Blob], propagate_down: &[bool], bottom: &[Blob]) -> Result<()> {
        if !propagates(propagate_down, 0) {
            return Ok(());
        }
        let mut dx = bottom[0].grad_mut();
        dx.fill(0.);
        for blob in top {
            *dx += &*blob.grad();
        }
        Ok(())
    }
}
