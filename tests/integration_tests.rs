use anyhow::Result;
use libtest_mimic::{Arguments, Failed, Trial};
use ndarray::{Array2, Axis};
use rand::{rngs::StdRng, Rng, SeedableRng};
use recurrent::{
    blob::Blob,
    filler::Filler,
    layer::{Context, Layer},
    options::{DecoderOptions, LocalLstmOptions, PredictorOptions, RecurrentOptions},
    recurrent::{DecoderLstm, DualMemoryLstm, LocalLstm, Lstm, PredictorLstm},
};

fn main() {
    let args = Arguments::from_args();
    let tests = vec![
        test("encoder_decoder", encoder_decoder),
        test("encoder_predictor", encoder_predictor),
        test("encoder_variable_length", encoder_variable_length),
        test("local_lstm_sequences", local_lstm_sequences),
        test("dual_memory_final_states", dual_memory_final_states),
        test("options_round_trip", options_round_trip),
    ];
    libtest_mimic::run(&args, tests).exit()
}

fn test(name: &str, f: fn() -> Result<()>) -> Trial {
    Trial::test(name, move || f().map_err(|e| Failed::from(format!("{e:?}"))))
}

fn random(shape: &[usize], seed: u64) -> Result<Blob> {
    let mut rng = StdRng::seed_from_u64(seed);
    let len = shape.iter().product();
    Blob::from_shape_vec(shape, (0..len).map(|_| rng.gen_range(-1f32..1.)).collect())
}

/// Continuation flags with a zero at the start of each sequence.
fn continuation(len: usize, batch: usize, starts: &[usize]) -> Blob {
    let mut cont = Array2::ones((len, batch));
    cont.row_mut(0).fill(0.);
    for t in starts {
        cont.row_mut(*t).fill(0.);
    }
    Blob::from_array(cont.into_dyn())
}

fn options(hidden_dim: usize) -> RecurrentOptions {
    RecurrentOptions::new(hidden_dim).with_bias_filler(Filler::Uniform {
        min: -0.1,
        max: 0.1,
    })
}

fn blobs(n: usize) -> Vec<Blob> {
    (0..n).map(|_| Blob::default()).collect()
}

fn encoder_decoder() -> Result<()> {
    let mut context = Context::seeded(0);
    let (t, n, d, h) = (6, 3, 4, 5);
    let x = random(&[t, n, d], 1)?;
    let encoder_bottom = [x.clone(), continuation(t, n, &[])];
    let encoder_top = blobs(3);
    let mut encoder = Lstm::new(options(h).with_expose_final_state(true));
    encoder.setup(&encoder_bottom, &encoder_top, &mut context)?;
    let decoder_bottom = [
        continuation(t, n, &[3]),
        encoder_top[1].clone(),
        encoder_top[2].clone(),
        random(&[t, n, d], 2)?,
    ];
    let decoder_top = blobs(1);
    let mut decoder = DecoderLstm::new(
        DecoderOptions::new(options(h))
            .with_reverse(true)
            .with_conditional(true),
    );
    decoder.setup(&decoder_bottom, &decoder_top, &mut context)?;

    encoder.forward(&encoder_bottom, &encoder_top)?;
    decoder.forward(&decoder_bottom, &decoder_top)?;
    assert_eq!(decoder_top[0].shape(), [t, n, h]);
    assert_eq!(decoder.plan().segments(0).len(), 2);

    decoder_top[0].fill_grad(1.);
    decoder.backward(&decoder_top, &[false, true, true, false], &decoder_bottom)?;
    assert!(encoder_top[1].grad().iter().any(|dh| *dh != 0.));
    encoder_top[0].fill_grad(0.);
    encoder.backward(&encoder_top, &[true, false], &encoder_bottom)?;
    let dx = x.grad();
    assert!(dx.iter().all(|dx| dx.is_finite()));
    assert!(dx.iter().any(|dx| *dx != 0.));
    assert!(encoder.blobs()[0].grad().iter().any(|dw| *dw != 0.));
    assert!(decoder.blobs()[0].grad().iter().any(|dw| *dw != 0.));
    Ok(())
}

fn encoder_predictor() -> Result<()> {
    let mut context = Context::seeded(1);
    let (t, n, d, h, unroll) = (4, 2, 3, 4, 8);
    let encoder_bottom = [random(&[t, n, d], 3)?, continuation(t, n, &[])];
    let encoder_top = blobs(3);
    let mut encoder = Lstm::new(options(h).with_expose_final_state(true));
    encoder.setup(&encoder_bottom, &encoder_top, &mut context)?;
    encoder.forward(&encoder_bottom, &encoder_top)?;
    let predictor_bottom = [encoder_top[1].clone(), encoder_top[2].clone()];
    let predictor_top = blobs(1);
    let mut predictor = PredictorLstm::new(PredictorOptions::new(options(h), unroll));
    predictor.setup(&predictor_bottom, &predictor_top, &mut context)?;
    predictor.forward(&predictor_bottom, &predictor_top)?;
    let y = predictor_top[0].to_value_array();
    assert_eq!(y.shape(), [unroll, n, h]);
    assert!(y.iter().all(|y| y.abs() < 1.));
    // Columns decode independently from their own seeds.
    assert_ne!(y.index_axis(Axis(1), 0), y.index_axis(Axis(1), 1));
    Ok(())
}

fn encoder_variable_length() -> Result<()> {
    let (n, d, h) = (2, 3, 4);
    let short = [random(&[3, n, d], 4)?, continuation(3, n, &[])];
    let long = [random(&[7, n, d], 5)?, continuation(7, n, &[2, 5])];
    let top = blobs(1);
    let mut encoder = Lstm::new(options(h));
    encoder.setup(&short, &top, &mut Context::seeded(2))?;
    encoder.forward(&short, &top)?;
    let first = top[0].to_value_array();
    for bottom in [&long, &short] {
        encoder.reshape(bottom, &top)?;
        encoder.forward(bottom, &top)?;
    }
    assert_eq!(top[0].to_value_array(), first);
    Ok(())
}

fn local_lstm_sequences() -> Result<()> {
    let (t, n, d, h) = (5, 2, 3, 4);
    let x = random(&[t, n, d], 6)?;
    let bottom = [x.clone(), continuation(t, n, &[3])];
    let top = blobs(2);
    let mut lstm = LocalLstm::new(LocalLstmOptions::new(options(h)));
    lstm.setup(&bottom, &top, &mut Context::seeded(3))?;
    lstm.forward(&bottom, &top)?;
    assert_eq!(top[0].shape(), [t, n, h]);
    let prediction = top[1].to_value_array();
    assert_eq!(prediction.shape(), [t, n, d]);
    assert!(prediction.iter().all(|y| *y > 0. && *y < 1.));
    top[0].fill_grad(0.);
    top[1].fill_grad(1.);
    lstm.backward(&top, &[true, false], &bottom)?;
    assert!(x.grad().iter().any(|dx| *dx != 0.));
    Ok(())
}

fn dual_memory_final_states() -> Result<()> {
    let (t, n, d, h) = (4, 2, 2, 3);
    let bottom = [random(&[t, n, d], 7)?, continuation(t, n, &[])];
    let top = blobs(4);
    let mut lstm = DualMemoryLstm::new(options(h).with_expose_final_state(true));
    lstm.setup(&bottom, &top, &mut Context::seeded(4))?;
    lstm.forward(&bottom, &top)?;
    let hidden = top[0].to_value_array();
    assert_eq!(
        top[1].to_value_array().index_axis(Axis(0), 0),
        hidden.index_axis(Axis(0), t - 1)
    );
    for state in &top[1..] {
        assert_eq!(state.shape(), [1, n, h]);
    }
    Ok(())
}

fn options_round_trip() -> Result<()> {
    let options = DecoderOptions::new(
        RecurrentOptions::new(8)
            .with_clipping_threshold(5.)
            .with_weight_filler(Filler::Gaussian {
                mean: 0.,
                std: 0.01,
            }),
    )
    .with_reverse(true);
    let json = serde_json::to_string(&options)?;
    let parsed: DecoderOptions = serde_json::from_str(&json)?;
    assert_eq!(parsed, options);
    Ok(())
}
