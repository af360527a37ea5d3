//! `RuntimeConfig` (§1 of `SPEC_FULL.md`): the configuration bundle passed
//! once to [`crate::Runtime::init`] and immutable thereafter.

use edgeplug_inference::QuantizationParams;

/// Immutable runtime configuration. Validated as a whole at
/// [`crate::Runtime::init`]; changing any field requires a fresh `Runtime`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeConfig {
    /// Slot size in bytes. Must equal the `S_SLOT` const generic the caller
    /// instantiates `Runtime` with.
    pub s_slot: usize,
    /// Preprocessor window capacity `W`, in `[1, 256]`.
    pub window_size: usize,
    /// IIR filter coefficient `alpha`, in `[0.0, 1.0]`.
    pub alpha: f32,
    /// Quantization parameters applied at the inference boundary.
    pub quantization: QuantizationParams,
    /// The pinned Ed25519 public key images are verified against.
    pub pinned_pubkey: [u8; 32],
    /// Per-call inference latency budget, in milliseconds.
    pub inference_budget_ms: u32,
    /// Per-call actuation latency budget, in milliseconds.
    pub actuation_budget_ms: u32,
    /// Watchdog stall threshold, in milliseconds. Must equal
    /// [`edgeplug_lifecycle::WATCHDOG_STALL_MS`] — the engine does not make
    /// this configurable, so this field exists for introspection and is
    /// validated rather than honored.
    pub watchdog_stall_ms: u32,
    /// Modbus slave id used when framing serial register writes.
    pub slave_id: u8,
    /// Safety bound: `tick` trips `Safety` if the derived actuation value's
    /// magnitude exceeds this.
    pub safety_value_bound: f32,
    /// Fixed Modbus register address `tick` addresses its derived command to.
    /// Zero means the serial sub-operation is always skipped.
    pub actuation_modbus_addr: u16,
    /// Fixed network node id `tick` addresses its derived command to. Zero
    /// means the network sub-operation is always skipped.
    pub actuation_opcua_node: u32,
    /// Fixed GPIO pin `tick` addresses its derived command to. Zero means
    /// the discrete sub-operation is always skipped.
    pub actuation_gpio_pin: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_is_plain_data() {
        let cfg = RuntimeConfig {
            s_slot: 14 * 1024,
            window_size: 8,
            alpha: 0.2,
            quantization: QuantizationParams { in_scale: 1.0, in_zero: 0, out_scale: 1.0, out_zero: 0 },
            pinned_pubkey: [0u8; 32],
            inference_budget_ms: 1,
            actuation_budget_ms: 10,
            watchdog_stall_ms: edgeplug_lifecycle::WATCHDOG_STALL_MS,
            slave_id: 1,
            safety_value_bound: 100.0,
            actuation_modbus_addr: 1,
            actuation_opcua_node: 0,
            actuation_gpio_pin: 0,
        };
        assert_eq!(cfg.window_size, 8);
    }
}
