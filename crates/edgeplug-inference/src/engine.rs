//! The layer executor (§4.5): loads a validated [`Model`] and evaluates it
//! over an int8 input vector subject to a latency budget.

use crate::model::{LayerKind, MaxTensorBuf, Model, ModelError, MAX_TENSOR};

/// A monotonic millisecond clock, injected so the latency budget can be
/// tested without depending on real wall-clock speed.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

/// Errors raised by [`InferenceEngine::load_model`] or
/// [`InferenceEngine::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InferenceError {
    /// The model buffer failed parsing or validation; see the wrapped
    /// [`ModelError`] for which invariant failed.
    Model(ModelError),
    /// `run` was called before `load_model` succeeded.
    NotLoaded,
    /// `input.len()` did not equal the model's declared `input_size`.
    InputLengthMismatch,
    /// `output.len()` was smaller than the model's declared `output_size`.
    OutputTooSmall,
    /// A `Conv` or `Pool` layer was encountered during execution.
    UnsupportedLayer,
    /// The call's wall-clock duration exceeded the configured budget; no
    /// output should be treated as meaningful.
    TimeBudget,
}

impl From<ModelError> for InferenceError {
    fn from(e: ModelError) -> Self {
        InferenceError::Model(e)
    }
}

impl core::fmt::Display for InferenceError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            InferenceError::Model(e) => write!(f, "model error: {e}"),
            InferenceError::NotLoaded => f.write_str("no model loaded"),
            InferenceError::InputLengthMismatch => f.write_str("input length does not match model input_size"),
            InferenceError::OutputTooSmall => f.write_str("output buffer smaller than model output_size"),
            InferenceError::UnsupportedLayer => f.write_str("model declares a Conv or Pool layer"),
            InferenceError::TimeBudget => f.write_str("inference call exceeded its latency budget"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InferenceError {}

/// Default per-call latency budget, in milliseconds (§4.5).
pub const DEFAULT_BUDGET_MS: u32 = 1;

/// Executes a loaded model's layers over an int8 input vector.
pub struct InferenceEngine<'a> {
    model: Option<Model<'a>>,
}

impl<'a> InferenceEngine<'a> {
    pub fn new() -> Self {
        InferenceEngine { model: None }
    }

    /// Parses and validates `bytes` as a model (see [`Model::parse`]) and
    /// stores the borrow for subsequent [`Self::run`] calls.
    pub fn load_model(&mut self, bytes: &'a [u8]) -> Result<(), InferenceError> {
        let model = Model::parse(bytes)?;
        self.model = Some(model);
        Ok(())
    }

    /// Whether a model is currently loaded.
    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Runs the loaded model's layers in declared order over `input`,
    /// writing `header.output_size` bytes into `output`. Measures wall-clock
    /// duration via `clock` and fails with `TimeBudget` if it exceeds
    /// `budget_ms` (typically [`DEFAULT_BUDGET_MS`]). Returns the number of
    /// output bytes written.
    pub fn run(
        &self,
        input: &[i8],
        output: &mut [i8],
        clock: &impl Clock,
        budget_ms: u32,
    ) -> Result<usize, InferenceError> {
        let model = self.model.as_ref().ok_or(InferenceError::NotLoaded)?;
        if input.len() != model.header.input_size as usize {
            return Err(InferenceError::InputLengthMismatch);
        }
        if output.len() < model.header.output_size as usize {
            return Err(InferenceError::OutputTooSmall);
        }

        let start = clock.now_ms();

        let mut buf_a: MaxTensorBuf = [0i8; MAX_TENSOR];
        let mut buf_b: MaxTensorBuf = [0i8; MAX_TENSOR];
        buf_a[..input.len()].copy_from_slice(input);
        let mut cur_len = input.len();
        let mut use_a_as_src = true;

        for layer in model.layers() {
            let (src, dst) = if use_a_as_src { (&buf_a, &mut buf_b) } else { (&buf_b, &mut buf_a) };
            let src_slice = &src[..cur_len];
            let out_len = layer.output_size as usize;

            match layer.kind {
                LayerKind::Dense => {
                    let weights = &model.bytes[layer.weights_offset as usize..];
                    let bias_bytes = &model.bytes[layer.bias_offset as usize..];
                    for j in 0..out_len {
                        let bias = i32::from_le_bytes(bias_bytes[j * 4..j * 4 + 4].try_into().unwrap());
                        let mut acc: i32 = bias;
                        for i in 0..cur_len {
                            let w = weights[i * out_len + j] as i8 as i32;
                            acc += src_slice[i] as i32 * w;
                        }
                        acc = layer.activation.apply(acc);
                        let requantized = (acc / 64).clamp(-128, 127);
                        dst[j] = requantized as i8;
                    }
                }
                LayerKind::Activation => {
                    for i in 0..cur_len {
                        let acc = layer.activation.apply(src_slice[i] as i32);
                        dst[i] = acc.clamp(-128, 127) as i8;
                    }
                }
                LayerKind::Conv | LayerKind::Pool => return Err(InferenceError::UnsupportedLayer),
            }

            cur_len = out_len;
            use_a_as_src = !use_a_as_src;
        }

        let final_buf = if use_a_as_src { &buf_a } else { &buf_b };
        output[..cur_len].copy_from_slice(&final_buf[..cur_len]);

        let elapsed = clock.now_ms().wrapping_sub(start);
        if elapsed > budget_ms {
            return Err(InferenceError::TimeBudget);
        }

        Ok(cur_len)
    }
}

impl<'a> Default for InferenceEngine<'a> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    struct SteppingClock {
        value: Cell<u32>,
        step: u32,
    }

    impl Clock for SteppingClock {
        fn now_ms(&self) -> u32 {
            let v = self.value.get();
            self.value.set(v + self.step);
            v
        }
    }

    fn header(input_size: u32, output_size: u32, layer_count: u32) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[0..4].copy_from_slice(&crate::model::MODEL_MAGIC.to_le_bytes());
        out[4..8].copy_from_slice(&1u32.to_le_bytes());
        out[8..12].copy_from_slice(&input_size.to_le_bytes());
        out[12..16].copy_from_slice(&output_size.to_le_bytes());
        out[16..20].copy_from_slice(&layer_count.to_le_bytes());
        out
    }

    fn dense_layer(input_size: u32, output_size: u32, weights_offset: u32, bias_offset: u32, activation: u32) -> [u8; 36] {
        let mut out = [0u8; 36];
        out[0..4].copy_from_slice(&0u32.to_le_bytes());
        out[4..8].copy_from_slice(&input_size.to_le_bytes());
        out[8..12].copy_from_slice(&output_size.to_le_bytes());
        out[12..16].copy_from_slice(&weights_offset.to_le_bytes());
        out[16..20].copy_from_slice(&bias_offset.to_le_bytes());
        out[20..24].copy_from_slice(&activation.to_le_bytes());
        out
    }

    #[test]
    fn identity_dense_layer_passes_input_through() {
        // 2 -> 2 dense layer with an identity-like weight matrix (64 on the
        // diagonal cancels the /64 requantization shift) and zero bias.
        let mut bytes = header(2, 2, 1).to_vec();
        let weights_offset = bytes.len() as u32 + 36;
        let bias_offset = weights_offset + 4;
        bytes.extend_from_slice(&dense_layer(2, 2, weights_offset, bias_offset, 0));
        bytes.extend_from_slice(&[64i8 as u8, 0, 0, 64i8 as u8]); // weights[i*2+j]
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());

        let mut engine = InferenceEngine::new();
        engine.load_model(&bytes).unwrap();
        let clock = SteppingClock { value: Cell::new(0), step: 0 };
        let mut output = [0i8; 2];
        let n = engine.run(&[5, -3], &mut output, &clock, DEFAULT_BUDGET_MS).unwrap();
        assert_eq!(n, 2);
        assert_eq!(output, [5, -3]);
    }

    #[test]
    fn run_before_load_is_not_loaded() {
        let engine = InferenceEngine::new();
        let clock = SteppingClock { value: Cell::new(0), step: 0 };
        let mut output = [0i8; 2];
        assert_eq!(
            engine.run(&[1, 2], &mut output, &clock, DEFAULT_BUDGET_MS),
            Err(InferenceError::NotLoaded)
        );
    }

    #[test]
    fn breaches_latency_budget_without_partial_output_treated_as_valid() {
        let mut bytes = header(1, 1, 1).to_vec();
        let weights_offset = bytes.len() as u32 + 36;
        let bias_offset = weights_offset + 1;
        bytes.extend_from_slice(&dense_layer(1, 1, weights_offset, bias_offset, 0));
        bytes.extend_from_slice(&[64i8 as u8]);
        bytes.extend_from_slice(&0i32.to_le_bytes());

        let mut engine = InferenceEngine::new();
        engine.load_model(&bytes).unwrap();
        // Steps past the 1ms budget between the start and end clock reads.
        let clock = SteppingClock { value: Cell::new(0), step: 5 };
        let mut output = [0i8; 1];
        let result = engine.run(&[10], &mut output, &clock, DEFAULT_BUDGET_MS);
        assert_eq!(result, Err(InferenceError::TimeBudget));
    }

    #[test]
    fn conv_layer_is_unsupported() {
        let mut bytes = header(2, 2, 1).to_vec();
        let mut conv = [0u8; 36];
        conv[0..4].copy_from_slice(&2u32.to_le_bytes()); // Conv
        conv[4..8].copy_from_slice(&2u32.to_le_bytes());
        conv[8..12].copy_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&conv);

        let mut engine = InferenceEngine::new();
        engine.load_model(&bytes).unwrap();
        let clock = SteppingClock { value: Cell::new(0), step: 0 };
        let mut output = [0i8; 2];
        assert_eq!(
            engine.run(&[1, 2], &mut output, &clock, DEFAULT_BUDGET_MS),
            Err(InferenceError::UnsupportedLayer)
        );
    }
}
