use super::*;
use ndarray::array;

#[test]
fn reshape_same_shape_keeps_storage() {
    let blob = Blob::zeros(&[2, 3]);
    blob.fill_value(1.);
    let ptr = blob.value().as_ptr();
    blob.reshape(&[2, 3]);
    assert_eq!(blob.value().as_ptr(), ptr);
    assert!(blob.value().iter().all(|x| *x == 1.));
}

#[test]
fn reshape_same_count_keeps_data() -> Result<()> {
    let blob = Blob::from_shape_vec(&[2, 3], (0..6).map(|x| x as f32).collect())?;
    blob.reshape(&[3, 2]);
    assert_eq!(blob.shape(), [3, 2]);
    assert_eq!(blob.grad().shape(), [3, 2]);
    assert_eq!(blob.value()[[2, 1]], 5.);
    Ok(())
}

#[test]
fn reshape_new_count_zeros() -> Result<()> {
    let blob = Blob::from_shape_vec(&[2], vec![1., 2.])?;
    blob.reshape(&[1, 3]);
    assert_eq!(blob.count(), 3);
    assert!(blob.value().iter().all(|x| *x == 0.));
    Ok(())
}

#[test]
fn counts_and_offsets() -> Result<()> {
    let blob = Blob::zeros(&[2, 3, 4]);
    assert_eq!(blob.num_axes(), 3);
    assert_eq!(blob.count(), 24);
    assert_eq!(blob.count_range(1, 3), 12);
    assert_eq!(blob.count_range(1, 10), 12);
    assert_eq!(blob.dim(2)?, 4);
    assert!(blob.dim(3).is_err());
    assert_eq!(blob.offset(&[1, 2, 3])?, 23);
    assert_eq!(blob.offset(&[1])?, 12);
    assert!(blob.offset(&[2]).is_err());
    Ok(())
}

#[test]
fn share_value_aliases() -> Result<()> {
    let a = Blob::from_array(array![1f32, 2.].into_dyn());
    let mut b = Blob::zeros(&[2]);
    b.share_value(&a)?;
    assert!(b.shares_value_with(&a));
    assert!(!b.shares_grad_with(&a));
    a.value_mut()[0] = 5.;
    assert_eq!(b.value()[0], 5.);
    b.fill_grad(1.);
    assert!(a.grad().iter().all(|x| *x == 0.));
    Ok(())
}

#[test]
fn share_count_mismatch() {
    let a = Blob::zeros(&[3]);
    let mut b = Blob::zeros(&[2]);
    let error = b.share(&a).unwrap_err();
    assert!(error.downcast_ref::<LayerError>().unwrap().is_shape());
}

#[test]
fn alias_value_has_own_grad() {
    let a = Blob::zeros(&[2, 2]);
    let b = a.alias_value();
    assert!(b.shares_value_with(&a));
    assert!(!b.shares_grad_with(&a));
    assert_eq!(b.grad().shape(), [2, 2]);
    let c = a.clone();
    assert!(c.shares_grad_with(&a));
}

#[test]
fn copy_and_accumulate() -> Result<()> {
    let a = Blob::from_shape_vec(&[1, 2], vec![1., 2.])?;
    let b = Blob::zeros(&[2]);
    b.copy_value_from(&a)?;
    assert_eq!(b.to_value_array(), array![1f32, 2.].into_dyn());
    a.fill_grad(1.);
    b.accumulate_grad_from(&a)?;
    b.accumulate_grad_from(&a)?;
    assert_eq!(b.to_grad_array(), array![2f32, 2.].into_dyn());
    assert!(b.copy_value_from(&Blob::zeros(&[3])).is_err());
    Ok(())
}
