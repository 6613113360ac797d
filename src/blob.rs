use crate::error::LayerError;
use anyhow::Result;
use ndarray::{Array, ArrayD, IxDyn};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::{
    fmt::{self, Debug},
    sync::Arc,
};

type Storage = Arc<RwLock<ArrayD<f32>>>;

fn storage(shape: &[usize]) -> Storage {
    Arc::new(RwLock::new(Array::zeros(IxDyn(shape))))
}

/// A tensor with a value and a gradient of the same shape.
///
/// [`Blob`] is a handle, cloning it produces an alias of the same storage. The value and the
/// gradient are stored separately so that they can be shared independently with
/// [`.share_value()`](Blob::share_value) and [`.share_grad()`](Blob::share_grad).
///
/// Accessors return lock guards. Holding a write guard while acquiring another guard on the same
/// storage deadlocks, so guards should be short lived.
#[derive(Clone)]
pub struct Blob {
    value: Storage,
    grad: Storage,
}

impl Default for Blob {
    fn default() -> Self {
        Self::zeros(&[])
    }
}

impl Blob {
    /// Creates a blob of zeros with `shape`.
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            value: storage(shape),
            grad: storage(shape),
        }
    }
    /// Creates a blob from `value`, with a zero gradient.
    pub fn from_array(value: ArrayD<f32>) -> Self {
        let grad = Array::zeros(value.raw_dim());
        Self {
            value: Arc::new(RwLock::new(value.as_standard_layout().into_owned())),
            grad: Arc::new(RwLock::new(grad)),
        }
    }
    /// Creates a blob from `shape` and `data`.
    ///
    /// **Errors**
    ///
    /// The length of `data` does not match `shape`.
    pub fn from_shape_vec(shape: &[usize], data: Vec<f32>) -> Result<Self> {
        Ok(Self::from_array(Array::from_shape_vec(IxDyn(shape), data)?))
    }
    /// A new blob aliasing the value of `self`, with its own gradient.
    pub fn alias_value(&self) -> Self {
        let shape = self.shape();
        Self {
            value: self.value.clone(),
            grad: storage(&shape),
        }
    }
    /// The shape.
    pub fn shape(&self) -> Vec<usize> {
        self.value.read().shape().to_vec()
    }
    /// The number of axes.
    pub fn num_axes(&self) -> usize {
        self.value.read().ndim()
    }
    /// The length of `axis`.
    ///
    /// **Errors**
    ///
    /// `axis` is out of bounds.
    pub fn dim(&self, axis: usize) -> Result<usize> {
        let shape = self.shape();
        shape.get(axis).copied().ok_or_else(|| {
            LayerError::shape("Blob", format!("axis {axis} out of bounds for {shape:?}")).into()
        })
    }
    /// The number of elements.
    pub fn count(&self) -> usize {
        self.value.read().len()
    }
    /// The product of the dimensions in `start..end`.
    ///
    /// Axes past the end are ignored.
    pub fn count_range(&self, start: usize, end: usize) -> usize {
        let shape = self.shape();
        let end = end.min(shape.len());
        shape.get(start..end).map_or(1, |dims| dims.iter().product())
    }
    /// The linear offset of `index` in the contiguous value buffer.
    ///
    /// Missing trailing indices are treated as 0.
    ///
    /// **Errors**
    ///
    /// `index` has more axes than the blob or is out of bounds.
    pub fn offset(&self, index: &[usize]) -> Result<usize> {
        let shape = self.shape();
        if index.len() > shape.len() || index.iter().zip(shape.iter()).any(|(i, d)| i >= d) {
            return Err(
                LayerError::shape("Blob", format!("index {index:?} out of bounds for {shape:?}"))
                    .into(),
            );
        }
        Ok(shape.iter().enumerate().fold(0, |offset, (axis, dim)| {
            offset * dim + index.get(axis).copied().unwrap_or(0)
        }))
    }
    /// Reshapes to `shape`.
    ///
    /// Does nothing if the shape is unchanged. If the number of elements is unchanged the data is
    /// kept, otherwise value and gradient are reallocated as zeros. Aliases observe the new shape.
    pub fn reshape(&self, shape: &[usize]) {
        fn reshape_storage(storage: &Storage, shape: &[usize]) {
            let mut guard = storage.write();
            if guard.shape() == shape {
                return;
            }
            let array = std::mem::take(&mut *guard);
            *guard = if array.len() == shape.iter().product::<usize>() {
                array
                    .into_shape(IxDyn(shape))
                    .unwrap_or_else(|_| Array::zeros(IxDyn(shape)))
            } else {
                Array::zeros(IxDyn(shape))
            };
        }
        reshape_storage(&self.value, shape);
        reshape_storage(&self.grad, shape);
    }
    /// Reshapes to the shape of `other`.
    pub fn reshape_like(&self, other: &Blob) {
        self.reshape(&other.shape());
    }
    /// The value.
    pub fn value(&self) -> RwLockReadGuard<'_, ArrayD<f32>> {
        self.value.read()
    }
    /// The mutable value.
    pub fn value_mut(&self) -> RwLockWriteGuard<'_, ArrayD<f32>> {
        self.value.write()
    }
    /// The gradient.
    pub fn grad(&self) -> RwLockReadGuard<'_, ArrayD<f32>> {
        self.grad.read()
    }
    /// The mutable gradient.
    pub fn grad_mut(&self) -> RwLockWriteGuard<'_, ArrayD<f32>> {
        self.grad.write()
    }
    /// Copies the value into a new array.
    pub fn to_value_array(&self) -> ArrayD<f32> {
        self.value().clone()
    }
    /// Copies the gradient into a new array.
    pub fn to_grad_array(&self) -> ArrayD<f32> {
        self.grad().clone()
    }
    /// Fills the value with `x`.
    pub fn fill_value(&self, x: f32) {
        self.value_mut().fill(x);
    }
    /// Fills the gradient with `x`.
    pub fn fill_grad(&self, x: f32) {
        self.grad_mut().fill(x);
    }
    /// Copies the value of `other`.
    ///
    /// **Errors**
    ///
    /// The number of elements differs.
    pub fn copy_value_from(&self, other: &Blob) -> Result<()> {
        if self.shares_value_with(other) {
            return Ok(());
        }
        let src = other.value();
        let mut dst = self.value_mut();
        copy_from(&mut dst, &src)
    }
    /// Copies the gradient of `other`.
    ///
    /// **Errors**
    ///
    /// The number of elements differs.
    pub fn copy_grad_from(&self, other: &Blob) -> Result<()> {
        if self.shares_grad_with(other) {
            return Ok(());
        }
        let src = other.grad();
        let mut dst = self.grad_mut();
        copy_from(&mut dst, &src)
    }
    /// Adds the gradient of `other` to the gradient of `self`.
    ///
    /// **Errors**
    ///
    /// The number of elements differs.
    pub fn accumulate_grad_from(&self, other: &Blob) -> Result<()> {
        let src = other.grad().clone();
        let mut dst = self.grad_mut();
        if dst.len() != src.len() {
            return Err(LayerError::shape(
                "Blob",
                format!(
                    "cannot accumulate {:?} into {:?}",
                    src.shape(),
                    dst.shape()
                ),
            )
            .into());
        }
        dst.iter_mut().zip(src.iter()).for_each(|(y, x)| *y += x);
        Ok(())
    }
    /// Aliases the value of `other`.
    ///
    /// After this call, writes to the value of either blob are visible through both.
    ///
    /// **Errors**
    ///
    /// The number of elements differs.
    pub fn share_value(&mut self, other: &Blob) -> Result<()> {
        let (count, other_count) = (self.count(), other.count());
        if count != other_count {
            return Err(LayerError::shape(
                "Blob",
                format!("cannot share value of {other_count} elements with {count}"),
            )
            .into());
        }
        self.value = other.value.clone();
        Ok(())
    }
    /// Aliases the gradient of `other`.
    ///
    /// **Errors**
    ///
    /// The number of elements differs.
    pub fn share_grad(&mut self, other: &Blob) -> Result<()> {
        let (count, other_count) = (self.count(), other.count());
        if count != other_count {
            return Err(LayerError::shape(
                "Blob",
                format!("cannot share gradient of {other_count} elements with {count}"),
            )
            .into());
        }
        self.grad = other.grad.clone();
        Ok(())
    }
    /// Aliases both value and gradient of `other`.
    ///
    /// See [`.share_value()`](Blob::share_value).
    pub fn share(&mut self, other: &Blob) -> Result<()> {
        self.share_value(other)?;
        self.share_grad(other)
    }
    /// Whether the values are the same storage.
    pub fn shares_value_with(&self, other: &Blob) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
    /// Whether the gradients are the same storage.
    pub fn shares_grad_with(&self, other: &Blob) -> bool {
        Arc::ptr_eq(&self.grad, &other.grad)
    }
}

fn copy_from(dst: &mut ArrayD<f32>, src: &ArrayD<f32>) -> Result<()> {
    if dst.len() != src.len() {
        return Err(LayerError::shape(
            "Blob",
            format!("cannot copy {:?} into {:?}", src.shape(), dst.shape()),
        )
        .into());
    }
    dst.iter_mut().zip(src.iter()).for_each(|(y, x)| *y = *x);
    Ok(())
}

impl Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Blob")
            .field("shape", &self.shape())
            .finish()
    }
}

#[cfg(test)]
mod tests;
