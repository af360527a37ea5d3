//! Actuation dispatcher (§4.6): turns an [`ActuationCommand`] into framed
//! byte sequences for up to three transport collaborators, enforcing a
//! per-call latency budget and tracking dispatch stats.
#![cfg_attr(not(any(feature = "std", test)), no_std)]

use crc::{Crc, CRC_16_MODBUS};

/// OPC-UA `AttributeId::Value`, used as the attribute tag in node-write frames.
pub const NODE_ATTR_VALUE: u8 = 0x0D;

/// Function code for a Modbus single-register write.
pub const MODBUS_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Default per-call actuation latency budget, in milliseconds (§5).
pub const DEFAULT_ACTUATION_BUDGET_MS: u32 = 10;

/// A monotonic millisecond clock.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

/// Opaque transport failure. The dispatcher does not interpret *why* a
/// transport refused a frame — only that it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportError;

/// A discrete GPIO line.
pub trait Gpio {
    fn write(&mut self, pin: u16, state: u8) -> Result<(), TransportError>;
}

/// A sink for framed industrial-serial (Modbus-style) byte sequences.
pub trait SerialFrameSink {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;
}

/// A sink for framed network-tagged node-write byte sequences.
pub trait NodeFrameSink {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;
}

/// `{opcua_node, modbus_addr, gpio_pin, gpio_state, value}`. A target
/// identifier of zero means "not addressed" and that sub-operation is
/// skipped entirely.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuationCommand {
    pub opcua_node: u32,
    pub modbus_addr: u16,
    pub gpio_pin: u16,
    pub gpio_state: u8,
    pub value: f32,
}

/// Errors raised while dispatching a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ActuationError {
    /// `gpio_state` was outside `{0, 1}`.
    InvalidGpioState,
    /// A transport collaborator refused a frame.
    Transport,
    /// The call's wall-clock duration exceeded the configured budget.
    TimeBudget,
}

impl core::fmt::Display for ActuationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            ActuationError::InvalidGpioState => "gpio_state must be 0 or 1",
            ActuationError::Transport => "transport collaborator refused the frame",
            ActuationError::TimeBudget => "actuation call exceeded its latency budget",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ActuationError {}

/// Running counters for dispatched commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActuationStats {
    pub calls: u32,
    pub failures: u32,
    pub total_duration_ms: u32,
    pub max_duration_ms: u32,
}

/// Computes the Modbus CRC-16 (polynomial `0x8005` reflected to `0xA001`,
/// init `0xFFFF`) over `bytes`.
pub fn modbus_crc16(bytes: &[u8]) -> u16 {
    let crc = Crc::<u16>::new(&CRC_16_MODBUS);
    crc.checksum(bytes)
}

/// Builds the 8-byte serial register-write frame:
/// `[slave_id][0x06][addr_hi][addr_lo][val_hi][val_lo][crc_lo][crc_hi]`.
pub fn build_serial_frame(slave_id: u8, addr: u16, value: u16) -> [u8; 8] {
    let mut frame = [0u8; 8];
    frame[0] = slave_id;
    frame[1] = MODBUS_WRITE_SINGLE_REGISTER;
    frame[2..4].copy_from_slice(&addr.to_be_bytes());
    frame[4..6].copy_from_slice(&value.to_be_bytes());
    let crc = modbus_crc16(&frame[0..6]);
    frame[6] = (crc & 0xFF) as u8;
    frame[7] = (crc >> 8) as u8;
    frame
}

/// Builds the 9-byte network-tagged node-write frame: `node_id` (LE u32),
/// [`NODE_ATTR_VALUE`], and the IEEE-754 single-precision bits of `value` (LE).
pub fn build_node_frame(node_id: u32, value: f32) -> [u8; 9] {
    let mut frame = [0u8; 9];
    frame[0..4].copy_from_slice(&node_id.to_le_bytes());
    frame[4] = NODE_ATTR_VALUE;
    frame[5..9].copy_from_slice(&value.to_bits().to_le_bytes());
    frame
}

/// Dispatches commands to up to three transport collaborators under a
/// shared per-call latency budget.
pub struct Dispatcher<G, S, N, C> {
    gpio: G,
    serial: S,
    node: N,
    clock: C,
    slave_id: u8,
    budget_ms: u32,
    stats: ActuationStats,
}

impl<G, S, N, C> Dispatcher<G, S, N, C>
where
    G: Gpio,
    S: SerialFrameSink,
    N: NodeFrameSink,
    C: Clock,
{
    pub fn new(gpio: G, serial: S, node: N, clock: C, slave_id: u8, budget_ms: u32) -> Self {
        Dispatcher { gpio, serial, node, clock, slave_id, budget_ms, stats: ActuationStats::default() }
    }

    pub fn stats(&self) -> ActuationStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = ActuationStats::default();
    }

    /// Dispatches `cmd`'s addressed sub-operations in order: serial register
    /// write, network node write, discrete line write. The first failure
    /// aborts the remaining sub-operations; already-dispatched
    /// sub-operations are not rolled back.
    pub fn dispatch(&mut self, cmd: &ActuationCommand) -> Result<(), ActuationError> {
        let start = self.clock.now_ms();
        let result = self.dispatch_inner(cmd);

        let elapsed = self.clock.now_ms().wrapping_sub(start);
        self.stats.calls += 1;
        self.stats.total_duration_ms += elapsed;
        if elapsed > self.stats.max_duration_ms {
            self.stats.max_duration_ms = elapsed;
        }
        if result.is_err() {
            self.stats.failures += 1;
            return result;
        }
        if elapsed > self.budget_ms {
            self.stats.failures += 1;
            return Err(ActuationError::TimeBudget);
        }
        Ok(())
    }

    fn dispatch_inner(&mut self, cmd: &ActuationCommand) -> Result<(), ActuationError> {
        if cmd.modbus_addr != 0 {
            let value = round_to_i16(cmd.value) as u16;
            let frame = build_serial_frame(self.slave_id, cmd.modbus_addr, value);
            self.serial.send(&frame).map_err(|_| ActuationError::Transport)?;
        }
        if cmd.opcua_node != 0 {
            let frame = build_node_frame(cmd.opcua_node, cmd.value);
            self.node.send(&frame).map_err(|_| ActuationError::Transport)?;
        }
        if cmd.gpio_pin != 0 {
            if cmd.gpio_state > 1 {
                return Err(ActuationError::InvalidGpioState);
            }
            self.gpio.write(cmd.gpio_pin, cmd.gpio_state).map_err(|_| ActuationError::Transport)?;
        }
        Ok(())
    }
}

fn round_to_i16(value: f32) -> i16 {
    let clamped = value.clamp(i16::MIN as f32, i16::MAX as f32);
    libm::roundf(clamped) as i16
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

    #[derive(Default)]
    struct RecordingGpio {
        last: Option<(u16, u8)>,
        fail: bool,
    }
    impl Gpio for RecordingGpio {
        fn write(&mut self, pin: u16, state: u8) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError);
            }
            self.last = Some((pin, state));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSerial {
        last: Option<[u8; 8]>,
        fail: bool,
    }
    impl SerialFrameSink for RecordingSerial {
        fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError);
            }
            self.last = Some(frame.try_into().unwrap());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNode {
        last: Option<[u8; 9]>,
    }
    impl NodeFrameSink for RecordingNode {
        fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
            self.last = Some(frame.try_into().unwrap());
            Ok(())
        }
    }

    #[test]
    fn modbus_crc16_matches_known_vector() {
        assert_eq!(modbus_crc16(&[0x01, 0x06, 0x00, 0x01, 0x00, 0x03]), 0x980A);
    }

    #[test]
    fn serial_frame_has_low_byte_first_crc() {
        let frame = build_serial_frame(0x01, 0x0001, 0x0003);
        assert_eq!(frame, [0x01, 0x06, 0x00, 0x01, 0x00, 0x03, 0x0A, 0x98]);
    }

    #[test]
    fn skips_sub_operations_addressed_with_zero() {
        let clock = SteppingClock { value: Cell::new(0), step: 0 };
        let mut d = Dispatcher::new(RecordingGpio::default(), RecordingSerial::default(), RecordingNode::default(), clock, 1, DEFAULT_ACTUATION_BUDGET_MS);
        let cmd = ActuationCommand { opcua_node: 0, modbus_addr: 0, gpio_pin: 7, gpio_state: 1, value: 0.0 };
        d.dispatch(&cmd).unwrap();
        assert_eq!(d.gpio.last, Some((7, 1)));
        assert!(d.serial.last.is_none());
        assert!(d.node.last.is_none());
    }

    #[test]
    fn rejects_invalid_gpio_state() {
        let clock = SteppingClock { value: Cell::new(0), step: 0 };
        let mut d = Dispatcher::new(RecordingGpio::default(), RecordingSerial::default(), RecordingNode::default(), clock, 1, DEFAULT_ACTUATION_BUDGET_MS);
        let cmd = ActuationCommand { opcua_node: 0, modbus_addr: 0, gpio_pin: 7, gpio_state: 2, value: 0.0 };
        assert_eq!(d.dispatch(&cmd), Err(ActuationError::InvalidGpioState));
        assert_eq!(d.stats().failures, 1);
    }

    #[test]
    fn aborts_on_first_failure_without_rollback() {
        let clock = SteppingClock { value: Cell::new(0), step: 0 };
        let mut serial = RecordingSerial::default();
        serial.fail = true;
        let mut d = Dispatcher::new(RecordingGpio::default(), serial, RecordingNode::default(), clock, 1, DEFAULT_ACTUATION_BUDGET_MS);
        let cmd = ActuationCommand { opcua_node: 42, modbus_addr: 1, gpio_pin: 7, gpio_state: 1, value: 3.0 };
        assert_eq!(d.dispatch(&cmd), Err(ActuationError::Transport));
        // node/gpio were never reached because serial failed first
        assert!(d.node.last.is_none());
        assert!(d.gpio.last.is_none());
    }

    #[test]
    fn breaches_latency_budget() {
        let clock = SteppingClock { value: Cell::new(0), step: 20 };
        let mut d = Dispatcher::new(RecordingGpio::default(), RecordingSerial::default(), RecordingNode::default(), clock, 1, DEFAULT_ACTUATION_BUDGET_MS);
        let cmd = ActuationCommand { opcua_node: 0, modbus_addr: 0, gpio_pin: 7, gpio_state: 1, value: 0.0 };
        assert_eq!(d.dispatch(&cmd), Err(ActuationError::TimeBudget));
    }

    #[test]
    fn node_frame_encodes_ieee754_value() {
        let frame = build_node_frame(9, 1.5);
        assert_eq!(&frame[0..4], &9u32.to_le_bytes());
        assert_eq!(frame[4], NODE_ATTR_VALUE);
        assert_eq!(&frame[5..9], &1.5f32.to_bits().to_le_bytes());
    }
}
