//! Model header and layer descriptor parsing (§6): the on-flash layout an
//! [`crate::engine::InferenceEngine`] loads and validates before executing.

/// Wire length of the model header, in bytes.
pub const MODEL_HEADER_LEN: usize = 32;
/// Wire length of one layer descriptor, in bytes.
pub const LAYER_DESCRIPTOR_LEN: usize = 36;
/// Magic value identifying a byte buffer as a model.
pub const MODEL_MAGIC: u32 = 0x4E4E_5343;
/// Largest number of layer descriptors a model may declare.
pub const MAX_LAYERS: usize = 16;
/// Largest tensor (input, output, or any intermediate activation) this
/// implementation will allocate scratch space for.
pub const MAX_TENSOR: usize = 512;

/// A fixed-capacity scratch buffer sized to [`MAX_TENSOR`].
pub type MaxTensorBuf = [i8; MAX_TENSOR];

/// Errors raised while parsing or validating a model buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModelError {
    /// Buffer shorter than the header, or shorter than header + declared layers.
    Truncated,
    /// Header magic did not match [`MODEL_MAGIC`].
    BadMagic,
    /// `input_size` or `output_size` was zero.
    InvalidSize,
    /// `layer_count` exceeded [`MAX_LAYERS`], or a tensor exceeded [`MAX_TENSOR`].
    ModelTooLarge,
    /// A layer's `input_size` did not match the previous layer's `output_size`
    /// (or the header's `input_size`, for the first layer), or the final
    /// layer's `output_size` did not match the header's `output_size`.
    LayerChainMismatch,
    /// A Dense layer's declared `weights_offset`/`bias_offset` range did not
    /// fit within the model buffer.
    OffsetOutOfRange,
    /// An unrecognized `type` or `activation_type` value.
    BadLayerKind,
}

impl core::fmt::Display for ModelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            ModelError::Truncated => "model buffer shorter than its declared layout",
            ModelError::BadMagic => "model header magic mismatch",
            ModelError::InvalidSize => "model input_size or output_size is zero",
            ModelError::ModelTooLarge => "model exceeds this engine's layer or tensor limit",
            ModelError::LayerChainMismatch => "layer input/output sizes do not chain",
            ModelError::OffsetOutOfRange => "layer weights or bias offset out of range",
            ModelError::BadLayerKind => "unrecognized layer type or activation type",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ModelError {}

/// The layer kinds the wire format can declare. `Conv` and `Pool` parse but
/// are not executable yet (see [`crate::engine::InferenceEngine::run`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Dense,
    Activation,
    Conv,
    Pool,
}

impl LayerKind {
    fn from_u32(v: u32) -> Result<Self, ModelError> {
        match v {
            0 => Ok(LayerKind::Dense),
            1 => Ok(LayerKind::Activation),
            2 => Ok(LayerKind::Conv),
            3 => Ok(LayerKind::Pool),
            _ => Err(ModelError::BadLayerKind),
        }
    }
}

/// `None` passes its input through unchanged; `ReLU` clamps negatives to
/// zero; `Sigmoid` is approximated as a sign step (see §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    None,
    ReLU,
    Sigmoid,
}

impl Activation {
    fn from_u32(v: u32) -> Result<Self, ModelError> {
        match v {
            0 => Ok(Activation::None),
            1 => Ok(Activation::ReLU),
            2 => Ok(Activation::Sigmoid),
            _ => Err(ModelError::BadLayerKind),
        }
    }

    /// Applies this activation to an int32 accumulator, before requantization.
    pub fn apply(self, acc: i32) -> i32 {
        match self {
            Activation::None => acc,
            Activation::ReLU => acc.max(0),
            Activation::Sigmoid => {
                if acc > 0 {
                    127
                } else {
                    -128
                }
            }
        }
    }
}

/// The 32-byte header prefixing every model buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelHeader {
    pub magic: u32,
    pub version: u32,
    pub input_size: u32,
    pub output_size: u32,
    pub layer_count: u32,
    pub weights_offset: u32,
    pub bias_offset: u32,
    pub activation_offset: u32,
}

impl ModelHeader {
    fn decode(bytes: &[u8]) -> Self {
        let w = |lo: usize| u32::from_le_bytes(bytes[lo..lo + 4].try_into().unwrap());
        ModelHeader {
            magic: w(0),
            version: w(4),
            input_size: w(8),
            output_size: w(12),
            layer_count: w(16),
            weights_offset: w(20),
            bias_offset: w(24),
            activation_offset: w(28),
        }
    }
}

/// One 36-byte layer descriptor following the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerDescriptor {
    pub kind: LayerKind,
    pub input_size: u32,
    pub output_size: u32,
    pub weights_offset: u32,
    pub bias_offset: u32,
    pub activation: Activation,
    pub padding: u32,
    pub stride: u32,
    pub kernel_size: u32,
}

impl LayerDescriptor {
    fn decode(bytes: &[u8]) -> Result<Self, ModelError> {
        let w = |lo: usize| u32::from_le_bytes(bytes[lo..lo + 4].try_into().unwrap());
        Ok(LayerDescriptor {
            kind: LayerKind::from_u32(w(0))?,
            input_size: w(4),
            output_size: w(8),
            weights_offset: w(12),
            bias_offset: w(16),
            activation: Activation::from_u32(w(20))?,
            padding: w(24),
            stride: w(28),
            kernel_size: w(32),
        })
    }
}

/// A parsed, validated model: header plus a fixed-capacity array of layer
/// descriptors and the byte buffer they reference.
pub struct Model<'a> {
    pub bytes: &'a [u8],
    pub header: ModelHeader,
    pub(crate) layers: [Option<LayerDescriptor>; MAX_LAYERS],
    pub(crate) layer_count: usize,
}

impl<'a> Model<'a> {
    /// Returns the validated layer descriptors in declared order.
    pub fn layers(&self) -> impl Iterator<Item = &LayerDescriptor> {
        self.layers[..self.layer_count].iter().filter_map(|l| l.as_ref())
    }

    /// Parses and validates `bytes` against every invariant in §3 and §4.5:
    /// magic, nonzero input/output size, layer count and tensor size limits,
    /// the input/output chaining invariant, and (for Dense layers) that
    /// weights/bias ranges fit within `bytes`.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ModelError> {
        if bytes.len() < MODEL_HEADER_LEN {
            return Err(ModelError::Truncated);
        }
        let header = ModelHeader::decode(bytes);
        if header.magic != MODEL_MAGIC {
            return Err(ModelError::BadMagic);
        }
        if header.input_size == 0 || header.output_size == 0 {
            return Err(ModelError::InvalidSize);
        }
        if header.input_size as usize > MAX_TENSOR || header.output_size as usize > MAX_TENSOR {
            return Err(ModelError::ModelTooLarge);
        }
        let layer_count = header.layer_count as usize;
        if layer_count > MAX_LAYERS {
            return Err(ModelError::ModelTooLarge);
        }
        let required = MODEL_HEADER_LEN + layer_count * LAYER_DESCRIPTOR_LEN;
        if bytes.len() < required {
            return Err(ModelError::Truncated);
        }

        let mut layers: [Option<LayerDescriptor>; MAX_LAYERS] = [None; MAX_LAYERS];
        let mut expected_input = header.input_size;
        for i in 0..layer_count {
            let start = MODEL_HEADER_LEN + i * LAYER_DESCRIPTOR_LEN;
            let descriptor = LayerDescriptor::decode(&bytes[start..start + LAYER_DESCRIPTOR_LEN])?;

            if descriptor.input_size != expected_input {
                return Err(ModelError::LayerChainMismatch);
            }
            if descriptor.input_size as usize > MAX_TENSOR || descriptor.output_size as usize > MAX_TENSOR {
                return Err(ModelError::ModelTooLarge);
            }
            if descriptor.kind == LayerKind::Activation && descriptor.input_size != descriptor.output_size {
                return Err(ModelError::LayerChainMismatch);
            }
            if descriptor.kind == LayerKind::Dense {
                let weights_len = descriptor.input_size as usize * descriptor.output_size as usize;
                let bias_len = descriptor.output_size as usize * 4;
                check_range(bytes.len(), descriptor.weights_offset as usize, weights_len)?;
                check_range(bytes.len(), descriptor.bias_offset as usize, bias_len)?;
            }

            expected_input = descriptor.output_size;
            layers[i] = Some(descriptor);
        }
        if expected_input != header.output_size {
            return Err(ModelError::LayerChainMismatch);
        }

        Ok(Model { bytes, header, layers, layer_count })
    }
}

fn check_range(buf_len: usize, offset: usize, len: usize) -> Result<(), ModelError> {
    let end = offset.checked_add(len).ok_or(ModelError::OffsetOutOfRange)?;
    if end > buf_len {
        return Err(ModelError::OffsetOutOfRange);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(input_size: u32, output_size: u32, layer_count: u32) -> [u8; MODEL_HEADER_LEN] {
        let mut out = [0u8; MODEL_HEADER_LEN];
        out[0..4].copy_from_slice(&MODEL_MAGIC.to_le_bytes());
        out[4..8].copy_from_slice(&1u32.to_le_bytes());
        out[8..12].copy_from_slice(&input_size.to_le_bytes());
        out[12..16].copy_from_slice(&output_size.to_le_bytes());
        out[16..20].copy_from_slice(&layer_count.to_le_bytes());
        out
    }

    fn dense_layer(input_size: u32, output_size: u32, weights_offset: u32, bias_offset: u32) -> [u8; LAYER_DESCRIPTOR_LEN] {
        let mut out = [0u8; LAYER_DESCRIPTOR_LEN];
        out[0..4].copy_from_slice(&0u32.to_le_bytes()); // Dense
        out[4..8].copy_from_slice(&input_size.to_le_bytes());
        out[8..12].copy_from_slice(&output_size.to_le_bytes());
        out[12..16].copy_from_slice(&weights_offset.to_le_bytes());
        out[16..20].copy_from_slice(&bias_offset.to_le_bytes());
        out[20..24].copy_from_slice(&1u32.to_le_bytes()); // ReLU
        out
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = header_bytes(2, 2, 0).to_vec();
        bytes[0] = 0;
        assert_eq!(Model::parse(&bytes).unwrap_err(), ModelError::BadMagic);
    }

    #[test]
    fn rejects_zero_sizes() {
        let bytes = header_bytes(0, 2, 0);
        assert_eq!(Model::parse(&bytes).unwrap_err(), ModelError::InvalidSize);
    }

    #[test]
    fn parses_single_dense_layer() {
        let mut bytes = header_bytes(2, 3, 1).to_vec();
        let weights_offset = bytes.len() as u32 + LAYER_DESCRIPTOR_LEN as u32;
        let bias_offset = weights_offset + 2 * 3;
        bytes.extend_from_slice(&dense_layer(2, 3, weights_offset, bias_offset));
        bytes.extend_from_slice(&[0u8; 6]); // weights
        bytes.extend_from_slice(&[0u8; 12]); // bias (3 x i32)
        let model = Model::parse(&bytes).unwrap();
        assert_eq!(model.layer_count, 1);
        assert_eq!(model.header.output_size, 3);
    }

    #[test]
    fn rejects_chain_mismatch() {
        let mut bytes = header_bytes(2, 3, 1).to_vec();
        bytes.extend_from_slice(&dense_layer(5, 3, 0, 0)); // input_size != header.input_size
        assert_eq!(Model::parse(&bytes).unwrap_err(), ModelError::LayerChainMismatch);
    }

    #[test]
    fn rejects_offsets_out_of_range() {
        let mut bytes = header_bytes(2, 3, 1).to_vec();
        bytes.extend_from_slice(&dense_layer(2, 3, 10_000, 10_000));
        assert_eq!(Model::parse(&bytes).unwrap_err(), ModelError::OffsetOutOfRange);
    }
}
