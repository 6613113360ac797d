//! Layers operating on bottom and top [`Blob`]s.
//!
//! A layer is set up once with [`.setup()`](Layer::setup), which checks the number of blobs,
//! allocates parameters and reshapes the tops. [`.forward()`](Layer::forward) computes the top
//! values from the bottom values and [`.backward()`](Layer::backward) computes bottom gradients
//! from top gradients.
//!
//! Gradients written to bottoms overwrite, gradients of parameters ([`.blobs()`](Layer::blobs))
//! accumulate, so a parameter used several times sums the contributions of every use. Callers
//! clear parameter gradients between updates.
use crate::{blob::Blob, error::LayerError};
use anyhow::Result;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

mod activation;
pub use activation::{Relu, Sigmoid};
mod concat;
pub use concat::Concat;
mod inner_product;
pub use inner_product::InnerProduct;
mod scale;
pub use scale::Scale;
mod slice;
pub use slice::Slice;
mod split;
pub use split::Split;

#[cfg(test)]
mod tests;

/// Where layers execute.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, derive_more::IsVariant)]
pub enum ExecutionMode {
    /// On the host.
    #[default]
    Cpu,
    /// On a gpu. Not supported.
    Gpu,
}

/// Explicit state for [`Layer::setup()`].
///
/// Holds the random source used to initialize parameters and the execution mode.
#[derive(Debug)]
pub struct Context {
    rng: StdRng,
    mode: ExecutionMode,
}

impl Context {
    /// A cpu context with a seeded random source.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            mode: ExecutionMode::Cpu,
        }
    }
    /// Sets the execution mode.
    pub fn with_mode(self, mode: ExecutionMode) -> Self {
        Self { mode, ..self }
    }
    /// The random source.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
    /// The execution mode.
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }
    /// Fails unless the mode is [`ExecutionMode::Cpu`].
    pub(crate) fn ensure_cpu(&self, layer: &'static str) -> Result<()> {
        if self.mode.is_gpu() {
            return Err(LayerError::NotImplemented {
                layer,
                what: "gpu execution",
            }
            .into());
        }
        Ok(())
    }
}

/// A unit of computation over blobs.
pub trait Layer: Debug + Send {
    /// The layer type, used in errors.
    fn type_name(&self) -> &'static str;
    /// The exact number of bottoms, if fixed.
    fn exact_num_bottom_blobs(&self) -> Option<usize> {
        None
    }
    /// The minimum number of bottoms.
    fn min_bottom_blobs(&self) -> Option<usize> {
        None
    }
    /// The maximum number of bottoms.
    fn max_bottom_blobs(&self) -> Option<usize> {
        None
    }
    /// The exact number of tops, if fixed.
    fn exact_num_top_blobs(&self) -> Option<usize> {
        None
    }
    /// The minimum number of tops.
    fn min_top_blobs(&self) -> Option<usize> {
        None
    }
    /// The maximum number of tops.
    fn max_top_blobs(&self) -> Option<usize> {
        None
    }
    /// Whether a gradient may be requested for bottom `index`.
    #[allow(unused_variables)]
    fn allow_force_backward(&self, index: usize) -> bool {
        true
    }
    /// The learnable parameters.
    fn blobs(&self) -> &[Blob] {
        &[]
    }
    /// Mutable access to the learnable parameters, to replace or alias them.
    fn blobs_mut(&mut self) -> &mut [Blob] {
        &mut []
    }
    /// Whether gradients are computed for parameter `index`.
    #[allow(unused_variables)]
    fn param_propagate_down(&self, index: usize) -> bool {
        false
    }
    /// Sets whether gradients are computed for parameter `index`.
    #[allow(unused_variables)]
    fn set_param_propagate_down(&mut self, index: usize, propagate: bool) {}
    /// Layer specific setup, allocating parameters and internal state.
    #[allow(unused_variables)]
    fn layer_setup(&mut self, bottom: &[Blob], top: &[Blob], context: &mut Context) -> Result<()> {
        Ok(())
    }
    /// Reshapes the tops and internal buffers to fit the bottoms.
    fn reshape(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()>;
    /// Computes the tops from the bottoms.
    fn forward(&mut self, bottom: &[Blob], top: &[Blob]) -> Result<()>;
    /// Computes the gradients of the bottoms flagged in `propagate_down` and of the parameters
    /// from the top gradients.
    fn backward(&mut self, top: &[Blob], propagate_down: &[bool], bottom: &[Blob]) -> Result<()>;
    /// Checks the blob counts, then runs [`.layer_setup()`](Layer::layer_setup) and
    /// [`.reshape()`](Layer::reshape).
    fn setup(&mut self, bottom: &[Blob], top: &[Blob], context: &mut Context) -> Result<()> {
        check_blob_counts(self, bottom.len(), top.len())?;
        context.ensure_cpu(self.type_name())?;
        self.layer_setup(bottom, top, context)?;
        self.reshape(bottom, top)
    }
}

fn check_count(
    layer: &'static str,
    kind: &'static str,
    got: usize,
    exact: Option<usize>,
    min: Option<usize>,
    max: Option<usize>,
) -> Result<()> {
    let ok = exact.map_or(true, |n| got == n)
        && min.map_or(true, |n| got >= n)
        && max.map_or(true, |n| got <= n);
    if ok {
        return Ok(());
    }
    let expected = match (exact, min, max) {
        (Some(n), _, _) => n.to_string(),
        (None, Some(a), Some(b)) => format!("{a}..={b}"),
        (None, Some(a), None) => format!("{a}.."),
        (None, None, Some(b)) => format!("..={b}"),
        (None, None, None) => "any".to_string(),
    };
    Err(LayerError::BlobCount {
        layer,
        kind,
        expected,
        got,
    }
    .into())
}

fn check_blob_counts<L: Layer + ?Sized>(layer: &L, bottoms: usize, tops: usize) -> Result<()> {
    let name = layer.type_name();
    check_count(
        name,
        "bottom",
        bottoms,
        layer.exact_num_bottom_blobs(),
        layer.min_bottom_blobs(),
        layer.max_bottom_blobs(),
    )?;
    check_count(
        name,
        "top",
        tops,
        layer.exact_num_top_blobs(),
        layer.min_top_blobs(),
        layer.max_top_blobs(),
    )
}

/// Fails if `propagate_down` requests a gradient for a bottom that does not allow one.
pub(crate) fn check_propagate_down<L: Layer + ?Sized>(
    layer: &L,
    propagate_down: &[bool],
) -> Result<()> {
    if let Some(index) = propagate_down
        .iter()
        .enumerate()
        .position(|(i, p)| *p && !layer.allow_force_backward(i))
    {
        return Err(LayerError::UnsupportedPropagation {
            layer: layer.type_name(),
            index,
        }
        .into());
    }
    Ok(())
}

/// Whether bottom `index` should receive a gradient.
pub(crate) fn propagates(propagate_down: &[bool], index: usize) -> bool {
    propagate_down.get(index).copied().unwrap_or(false)
}
