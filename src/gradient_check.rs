//! Finite difference gradient checks.
use crate::{blob::Blob, layer::Layer};
use anyhow::{bail, Result};

/// Compares the gradients computed by [`Layer::backward()`] with central differences.
///
/// The objective is `0.5 * sum(top^2)` over every top, so each top gradient equals the top
/// value. An element passes if the analytic and numeric gradients differ by at most
/// [`absolute`](GradientChecker::with_absolute) or by at most
/// [`relative`](GradientChecker::with_relative) times the larger magnitude.
#[derive(Clone, Copy, Debug)]
pub struct GradientChecker {
    step: f32,
    absolute: f32,
    relative: f32,
}

impl Default for GradientChecker {
    fn default() -> Self {
        Self {
            step: 1e-2,
            absolute: 1e-3,
            relative: 1e-2,
        }
    }
}

impl GradientChecker {
    /// Creates a checker.
    ///
    /// Defaults:
    /// - step: 1e-2
    /// - absolute: 1e-3
    /// - relative: 1e-2
    pub fn new() -> Self {
        Self::default()
    }
    /// Sets the finite difference step.
    pub fn with_step(self, step: f32) -> Self {
        Self { step, ..self }
    }
    /// Sets the absolute tolerance.
    pub fn with_absolute(self, absolute: f32) -> Self {
        Self { absolute, ..self }
    }
    /// Sets the relative tolerance.
    pub fn with_relative(self, relative: f32) -> Self {
        Self { relative, ..self }
    }
    /// Checks the gradients of the bottoms in `bottoms` and, if `params`, of every parameter.
    ///
    /// The layer must be set up. Parameter gradients are cleared before backward.
    ///
    /// **Errors**
    ///
    /// Forward or backward fails, or a gradient is out of tolerance.
    pub fn check<L: Layer + ?Sized>(
        &self,
        layer: &mut L,
        bottom: &[Blob],
        top: &[Blob],
        bottoms: &[usize],
        params: bool,
    ) -> Result<()> {
        layer.forward(bottom, top)?;
        for blob in top {
            let value = blob.to_value_array();
            blob.grad_mut().assign(&value);
        }
        let params: Vec<Blob> = if params {
            layer.blobs().to_vec()
        } else {
            Vec::new()
        };
        params.iter().for_each(|param| param.fill_grad(0.));
        let propagate_down: Vec<bool> = (0..bottom.len()).map(|i| bottoms.contains(&i)).collect();
        layer.backward(top, &propagate_down, bottom)?;
        let mut checked: Vec<(String, Blob)> = bottoms
            .iter()
            .map(|i| (format!("bottom {i}"), bottom[*i].clone()))
            .collect();
        checked.extend(
            params
                .into_iter()
                .enumerate()
                .map(|(i, param)| (format!("param {i}"), param)),
        );
        for (name, blob) in checked {
            let analytic = blob.to_grad_array();
            for (index, analytic) in analytic.iter().enumerate() {
                let numeric = self.numeric_gradient(layer, bottom, top, &blob, index)?;
                let (a, n) = (*analytic, numeric);
                let scale = a.abs().max(n.abs());
                let diff = (a - n).abs();
                if diff > self.absolute && diff > self.relative * scale {
                    bail!(
                        "{} gradient mismatch for {name}[{index}]: analytic {a}, numeric {n}!",
                        layer.type_name()
                    );
                }
            }
        }
        Ok(())
    }
    fn numeric_gradient<L: Layer + ?Sized>(
        &self,
        layer: &mut L,
        bottom: &[Blob],
        top: &[Blob],
        blob: &Blob,
        index: usize,
    ) -> Result<f32> {
        let x = value_at(blob, index);
        set_value_at(blob, index, x + self.step);
        layer.forward(bottom, top)?;
        let positive = objective(top);
        set_value_at(blob, index, x - self.step);
        layer.forward(bottom, top)?;
        let negative = objective(top);
        set_value_at(blob, index, x);
        Ok(((positive - negative) / (2. * f64::from(self.step))) as f32)
    }
}

fn value_at(blob: &Blob, index: usize) -> f32 {
    blob.value().iter().nth(index).copied().unwrap_or_default()
}

fn set_value_at(blob: &Blob, index: usize, x: f32) {
    if let Some(y) = blob.value_mut().iter_mut().nth(index) {
        *y = x;
    }
}

fn objective(top: &[Blob]) -> f64 {
    top.iter()
        .map(|blob| {
            blob.value()
                .iter()
                .map(|y| 0.5 * f64::from(*y) * f64::from(*y))
                .sum::<f64>()
        })
        .sum()
}
