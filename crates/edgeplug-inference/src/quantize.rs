//! f32 <-> int8 conversion for inference tensors (§3 Quantization Parameters).

/// `{in_scale, in_zero, out_scale, out_zero}`: the affine map between
/// physical-unit f32 values and the int8 tensors the engine runs on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantizationParams {
    pub in_scale: f32,
    pub in_zero: i8,
    pub out_scale: f32,
    pub out_zero: i8,
}

/// Maps a physical value to int8 using the input scale/zero point:
/// `clamp(round(x / in_scale) + in_zero, -128, 127)`.
pub fn quantize(params: &QuantizationParams, x: f32) -> i8 {
    let scaled = libm::roundf(x / params.in_scale) + params.in_zero as f32;
    scaled.clamp(-128.0, 127.0) as i8
}

/// Maps an int8 tensor value back to a physical value using the output
/// scale/zero point: `(q - out_zero) * out_scale`.
pub fn dequantize(params: &QuantizationParams, q: i8) -> f32 {
    (q as i32 - params.out_zero as i32) as f32 * params.out_scale
}
