/*!
# recurrent

Recurrent layers for a blob based layer framework: LSTM encoders, decoders with teacher forcing
and reversed output, and open loop predictors, running on the cpu with [`ndarray`] and
[`rayon`].

Layers implement [`Layer`](layer::Layer): they are set up once with bottom and top
[`Blob`](blob::Blob)s, then run [`forward`](layer::Layer::forward) and
[`backward`](layer::Layer::backward) any number of times.

- [`layer`]: the layer trait and the building blocks (inner product, concat, slice, split,
  scale, activations).
- [`recurrent`]: the recurrent driver and its LSTM variants, the LSTM units, and the decoder
  and predictor.
- [`gradient_check`]: finite difference checks of backward.

# Logging
Setup and reallocation of per timestep buffers are logged at the debug level with [`log`],
decode plans at the trace level.
*/
/// Blobs.
pub mod blob;
/// Errors.
pub mod error;
/// Parameter initialization.
pub mod filler;
pub mod gradient_check;
pub mod layer;
/// Activation functions.
pub mod math;
pub mod options;
pub mod recurrent;
