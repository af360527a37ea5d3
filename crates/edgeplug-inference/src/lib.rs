//! Int8 quantized model executor (§4.5): parses the model-header/layer-
//! descriptor wire format and evaluates Dense/Activation layers under a
//! hard per-call latency budget.
#![cfg_attr(not(any(feature = "std", test)), no_std)]

mod engine;
mod model;
mod quantize;

pub use engine::{Clock, InferenceEngine, InferenceError, DEFAULT_BUDGET_MS};
pub use model::{
    Activation, LayerDescriptor, LayerKind, Model, ModelError, ModelHeader, LAYER_DESCRIPTOR_LEN, MAX_LAYERS,
    MAX_TENSOR, MODEL_HEADER_LEN, MODEL_MAGIC,
};
pub use quantize::{dequantize, quantize, QuantizationParams};
