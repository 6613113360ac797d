use super::*;
use crate::{
    filler::Filler, gradient_check::GradientChecker, options::InnerProductOptions,
};
use approx::assert_relative_eq;
use ndarray::{array, Axis};

fn blob_from_fn(shape: &[usize], f: impl Fn(usize) -> f32) -> Blob {
    let len = shape.iter().product();
    Blob::from_shape_vec(shape, (0..len).map(f).collect()).unwrap()
}

fn input(shape: &[usize]) -> Blob {
    blob_from_fn(shape, |i| ((i * 7 % 11) as f32 - 5.) / 10.)
}

#[test]
fn inner_product_forward() -> Result<()> {
    let options = InnerProductOptions::new(2)
        .with_weight_filler(Filler::Constant { value: 1. })
        .with_bias_filler(Filler::Constant { value: 0.5 });
    let mut layer = InnerProduct::new(options);
    let x = Blob::from_shape_vec(&[2, 3], vec![1., 2., 3., 4., 5., 6.])?;
    let y = Blob::default();
    layer.setup(&[x.clone()], &[y.clone()], &mut Context::seeded(0))?;
    assert_eq!(layer.blobs()[0].shape(), [2, 3]);
    assert_eq!(layer.blobs()[1].shape(), [2]);
    layer.forward(&[x], &[y.clone()])?;
    assert_eq!(
        y.to_value_array(),
        array![[6.5f32, 6.5], [15.5, 15.5]].into_dyn()
    );
    Ok(())
}

#[test]
fn inner_product_axis() -> Result<()> {
    let mut layer = InnerProduct::new(InnerProductOptions::new(5).with_axis(2).with_bias(false));
    let x = input(&[1, 3, 4]);
    let y = Blob::default();
    layer.setup(&[x.clone()], &[y.clone()], &mut Context::seeded(0))?;
    assert_eq!(layer.blobs().len(), 1);
    assert_eq!(layer.blobs()[0].shape(), [5, 4]);
    assert_eq!(y.shape(), [1, 3, 5]);
    Ok(())
}

#[test]
fn inner_product_gradient() -> Result<()> {
    let options = InnerProductOptions::new(3)
        .with_bias_filler(Filler::Uniform { min: -0.5, max: 0.5 });
    let mut layer = InnerProduct::new(options);
    let x = input(&[2, 4]);
    let y = Blob::default();
    layer.setup(&[x.clone()], &[y.clone()], &mut Context::seeded(1))?;
    GradientChecker::new().check(&mut layer, &[x], &[y], &[0], true)
}

#[test]
fn inner_product_accumulates_param_grads() -> Result<()> {
    let mut layer = InnerProduct::new(InnerProductOptions::new(2));
    let x = input(&[3, 2]);
    let y = Blob::default();
    layer.setup(&[x.clone()], &[y.clone()], &mut Context::seeded(2))?;
    layer.forward(&[x.clone()], &[y.clone()])?;
    y.fill_grad(1.);
    layer.backward(&[y.clone()], &[false], &[x.clone()])?;
    let once = layer.blobs()[0].to_grad_array();
    layer.backward(&[y], &[false], &[x])?;
    let twice = layer.blobs()[0].to_grad_array();
    assert_eq!(twice, &once * 2.);
    Ok(())
}

#[test]
fn concat_slice() -> Result<()> {
    let a = input(&[2, 1, 3]);
    let b = input(&[1, 1, 3]);
    let y = Blob::default();
    let mut concat = Concat::new(0);
    let mut context = Context::seeded(0);
    concat.setup(&[a.clone(), b.clone()], &[y.clone()], &mut context)?;
    concat.forward(&[a.clone(), b.clone()], &[y.clone()])?;
    assert_eq!(y.shape(), [3, 1, 3]);
    let parts = [Blob::default(), Blob::default(), Blob::default()];
    let mut slice = Slice::new(0);
    slice.setup(&[y.clone()], &parts, &mut context)?;
    slice.forward(&[y.clone()], &parts)?;
    for (t, part) in parts.iter().enumerate() {
        assert_eq!(part.shape(), [1, 1, 3]);
        let expected = y.value().index_axis(Axis(0), t).to_owned();
        assert_eq!(
            part.value().index_axis(Axis(0), 0).to_owned(),
            expected
        );
    }
    y.fill_grad(1.);
    concat.backward(&[y.clone()], &[true, true], &[a.clone(), b])?;
    assert!(a.grad().iter().all(|dx| *dx == 1.));
    parts
        .iter()
        .enumerate()
        .for_each(|(i, part)| part.fill_grad(i as f32));
    slice.backward(&parts, &[true], &[y.clone()])?;
    assert_eq!(
        y.to_grad_array().into_shape(9)?,
        array![0f32, 0., 0., 1., 1., 1., 2., 2., 2.]
    );
    Ok(())
}

#[test]
fn concat_shape_mismatch() {
    let mut concat = Concat::new(2);
    let a = Blob::zeros(&[1, 2, 3]);
    let b = Blob::zeros(&[1, 3, 3]);
    let error = concat
        .setup(&[a, b], &[Blob::default()], &mut Context::seeded(0))
        .unwrap_err();
    assert!(error.downcast_ref::<LayerError>().unwrap().is_shape());
}

#[test]
fn split_sums_grads() -> Result<()> {
    let x = input(&[2, 2]);
    let tops = [x.alias_value(), x.alias_value()];
    let mut split = Split::new();
    split.setup(&[x.clone()], &tops, &mut Context::seeded(0))?;
    split.forward(&[x.clone()], &tops)?;
    assert_eq!(tops[1].to_value_array(), x.to_value_array());
    tops[0].fill_grad(1.);
    tops[1].fill_grad(2.);
    split.backward(&tops, &[true], &[x.clone()])?;
    assert!(x.grad().iter().all(|dx| *dx == 3.));
    Ok(())
}

#[test]
fn split_requires_aliases() {
    let x = Blob::zeros(&[2]);
    let error = Split::new()
        .setup(&[x.clone()], &[x.clone()], &mut Context::seeded(0))
        .unwrap_err();
    assert!(error.downcast_ref::<LayerError>().unwrap().is_shape());
}

#[test]
fn scale_resets_columns() -> Result<()> {
    let x = blob_from_fn(&[1, 3, 2], |i| i as f32 + 1.);
    let s = Blob::from_shape_vec(&[1, 3], vec![1., 0., 1.])?;
    let y = Blob::default();
    let mut scale = Scale::new(0);
    scale.setup(&[x.clone(), s.clone()], &[y.clone()], &mut Context::seeded(0))?;
    scale.forward(&[x, s], &[y.clone()])?;
    assert_eq!(
        y.to_value_array().into_shape(6)?,
        array![1f32, 2., 0., 0., 5., 6.]
    );
    Ok(())
}

#[test]
fn scale_gradient() -> Result<()> {
    let x = input(&[2, 3, 2]);
    let s = blob_from_fn(&[2, 3], |i| i as f32 / 4. - 0.5);
    let y = Blob::default();
    let mut scale = Scale::new(0);
    scale.setup(&[x.clone(), s.clone()], &[y.clone()], &mut Context::seeded(0))?;
    GradientChecker::new().check(&mut scale, &[x, s], &[y], &[0, 1], false)
}

#[test]
fn sigmoid_gradient() -> Result<()> {
    let x = input(&[3, 4]);
    let y = Blob::default();
    let mut sigmoid = Sigmoid;
    sigmoid.setup(&[x.clone()], &[y.clone()], &mut Context::seeded(0))?;
    GradientChecker::new().check(&mut sigmoid, &[x], &[y], &[0], false)
}

#[test]
fn relu_gradient() -> Result<()> {
    // Away from the kink at 0.
    let x = blob_from_fn(&[2, 5], |i| if i % 2 == 0 { 0.3 + i as f32 } else { -0.7 - i as f32 });
    let y = Blob::default();
    let mut relu = Relu::new().with_negative_slope(0.1);
    relu.setup(&[x.clone()], &[y.clone()], &mut Context::seeded(0))?;
    relu.forward(&[x.clone()], &[y.clone()])?;
    assert_relative_eq!(y.value()[[0, 1]], -0.17, epsilon = 1e-6);
    GradientChecker::new().check(&mut relu, &[x], &[y], &[0], false)
}

#[test]
fn blob_counts() {
    let error = InnerProduct::new(InnerProductOptions::new(1))
        .setup(
            &[Blob::zeros(&[1, 1]), Blob::zeros(&[1, 1])],
            &[Blob::default()],
            &mut Context::seeded(0),
        )
        .unwrap_err();
    let error = error.downcast_ref::<LayerError>().unwrap();
    assert_eq!(
        error,
        &LayerError::BlobCount {
            layer: "InnerProduct",
            kind: "bottom",
            expected: "1".to_string(),
            got: 2,
        }
    );
}

#[test]
fn gpu_not_implemented() {
    let mut context = Context::seeded(0).with_mode(ExecutionMode::Gpu);
    let error = Sigmoid
        .setup(&[Blob::zeros(&[1])], &[Blob::default()], &mut context)
        .unwrap_err();
    assert!(error
        .downcast_ref::<LayerError>()
        .unwrap()
        .is_not_implemented());
}

#[test]
fn propagate_down_checked() {
    #[derive(Debug)]
    struct Gated;
    impl Layer for Gated {
        fn type_name(&self) -> &'static str {
            "Gated"
        }
        fn allow_force_backward(&self, index: usize) -> bool {
            index == 0
        }
        fn reshape(&mut self, _bottom: &[Blob], _top: &[Blob]) -> Result<()> {
            Ok(())
        }
        fn forward(&mut self, _bottom: &[Blob], _top: &[Blob]) -> Result<()> {
            Ok(())
        }
        fn backward(&mut self, _top: &[Blob], _propagate_down: &[bool], _bottom: &[Blob]) -> Result<()> {
            Ok(())
        }
    }
    assert!(check_propagate_down(&Gated, &[true, false]).is_ok());
    let error = check_propagate_down(&Gated, &[true, true]).unwrap_err();
    assert_eq!(
        error.downcast_ref::<LayerError>(),
        Some(&LayerError::UnsupportedPropagation {
            layer: "Gated",
            index: 1
        })
    );
}

#[test]
fn xavier_filler_bounds() -> Result<()> {
    let blob = Blob::zeros(&[4, 12]);
    Filler::Xavier.fill(&blob, Context::seeded(3).rng())?;
    let a = 0.5f32;
    assert!(blob.value().iter().all(|x| x.abs() <= a));
    assert!(blob.value().iter().any(|x| *x != 0.));
    Ok(())
}

#[test]
fn uniform_filler_rejects_invalid_range() {
    let blob = Blob::zeros(&[2, 3]);
    let mut context = Context::seeded(0);
    for (min, max) in [(-f32::MAX, f32::MAX), (1., 1.), (1., -1.), (0., f32::INFINITY)] {
        assert!(Filler::Uniform { min, max }.fill(&blob, context.rng()).is_err());
    }
    Filler::Uniform { min: -1., max: 1. }.fill(&blob, context.rng()).unwrap();
    assert!(blob.value().iter().all(|x| (-1. ..1.).contains(x)));
}
