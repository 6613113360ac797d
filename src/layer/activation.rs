use super::{propagates, Layer};
use crate::{blob::Blob, math::sigmoid};
use anyhow::Result;
use ndarray::Zip;

/// Logistic sigmoid activation.
#[derive(Debug, Default)]
pub struct Sigmoid;

/// Rectified linear activation, with an optional slope for negative inputs.
#[derive(Debug, Default)]
pub struct Relu {
    negative_slope: f32,
}

impl Relu {
    /// Creates a new [`Relu`].
    pub fn new() -> Self {
        Self::default()
    }
    /// Sets the slope for negative inputs (leaky relu).
    pub fn with_negative_slope(self, negative_slope: f32) -> Self {
        Self { negative_slope }
    }
}

impl Layer for Sigmoid {
    fn type_name(&self) -> &'static str {
        "Sigmoid"
    }
    fn exact_num_bottom_blobs(&self) -> Option<usize> {
        Some(1)
    }
    fn exact_num_top_blobs(&self) -> Option<usize> {
        Some(1)
    }
    fn reshape(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        top[0].reshape_like(&bottom[0]);
        Ok(())
    }
    fn forward(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        let x = bottom[0].value();
        Zip::from(&mut *top[0].value_mut())
            .and(&*x)
            .for_each(|y, x| *y = sigmoid(*x));
        Ok(())
    }
    fn backward(&mut self, top: &[Blob], propagate_down: &[bool], bottom: &[Blob]) -> Result<()> {
        if propagates(propagate_down, 0) {
            let y = top[0].value();
            let dy = top[0].grad();
            Zip::from(&mut *bottom[0].grad_mut())
                .and(&*y)
                .and(&*dy)
                .for_each(|dx, y, dy| *dx = dy * y * (1. - y));
        }
        Ok(())
    }
}

impl Layer for Relu {
    fn type_name(&self) -> &'static str {
        "ReLU"
    }
    fn exact_num_bottom_blobs(&self) -> Option<usize> {
        Some(1)
    }
    fn exact_num_top_blobs(&self) -> Option<usize> {
        Some(1)
    }
    fn reshape(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        top[0].reshape_like(&bottom[0]);
        Ok(())
    }
    fn forward(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()> {
        let slope = self.negative_slope;
        let x = bottom[0].value();
        Zip::from(&mut *top[0].value_mut())
            .and(&*x)
            .for_each(|y, x| *y = if *x > 0. { *x } else { slope * x });
        Ok(())
    }
    fn backward(&mut self, top: &[Blob], propagate_down: &[bool], bottom: &[Blob]) -> Result<()> {
        if propagates(propagate_down, 0) {
            let slope = self.negative_slope;
            let dy = top[0].grad();
            let mut dx = bottom[0].grad_mut();
            let x = bottom[0].value();
            Zip::from(&mut *dx)
                .and(&*x)
                .and(&*dy)
                .for_each(|dx, x, dy| *dx = if *x > 0. { *dy } else { slope * dy });
        }
        Ok(())
    }
}
