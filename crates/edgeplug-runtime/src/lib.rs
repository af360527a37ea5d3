//! The runtime façade (§4.7): composes crypto, image format, the image
//! lifecycle engine, the preprocessor, the inference engine, and the
//! actuation dispatcher into the per-sample agent execution loop.
#![cfg_attr(not(any(feature = "std", test)), no_std)]

mod config;
mod error;
mod stats;

pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use stats::Stats;

pub use edgeplug_actuation::{ActuationCommand, Gpio, NodeFrameSink, SerialFrameSink, TransportError};
pub use edgeplug_crypto::EntropySource;
pub use edgeplug_format::manifest::Manifest;
pub use edgeplug_inference::QuantizationParams;
pub use edgeplug_lifecycle::{LifecycleState, SlotId, WATCHDOG_STALL_MS};
pub use edgeplug_preprocess::{SensorSample, MAX_WINDOW};

use edgeplug_actuation::Dispatcher;
use edgeplug_format::envelope;
use edgeplug_inference::InferenceEngine;
use edgeplug_lifecycle::LifecycleEngine;
use edgeplug_preprocess::Preprocessor;

/// A monotonic millisecond clock, shared by the lifecycle engine, the
/// inference engine's latency budget, and the actuation dispatcher's.
pub trait Clock: edgeplug_lifecycle::Clock + edgeplug_inference::Clock + edgeplug_actuation::Clock {}
impl<T> Clock for T where T: edgeplug_lifecycle::Clock + edgeplug_inference::Clock + edgeplug_actuation::Clock {}

/// Composes A-F. `S_SLOT` is fixed at compile time (see
/// [`edgeplug_lifecycle::LifecycleEngine`]); `RuntimeConfig::s_slot` must
/// match it and is checked at [`Runtime::init`].
pub struct Runtime<C, E, G, S, N, const S_SLOT: usize>
where
    C: Clock + Clone,
    E: EntropySource,
    G: Gpio,
    S: SerialFrameSink,
    N: NodeFrameSink,
{
    lifecycle: LifecycleEngine<C, S_SLOT>,
    preprocess: Preprocessor,
    dispatcher: Dispatcher<G, S, N, C>,
    entropy: E,
    clock: C,
    config: RuntimeConfig,
    stats: Stats,
    active_manifest: Option<Manifest>,
}

impl<C, E, G, S, N, const S_SLOT: usize> Runtime<C, E, G, S, N, S_SLOT>
where
    C: Clock + Clone,
    E: EntropySource,
    G: Gpio,
    S: SerialFrameSink,
    N: NodeFrameSink,
{
    fn payload_cap() -> usize {
        LifecycleEngine::<C, S_SLOT>::PAYLOAD_CAP
    }

    fn validate_config(config: &RuntimeConfig) -> Result<(), RuntimeError> {
        if config.s_slot != S_SLOT {
            return Err(RuntimeError::InvalidParam);
        }
        if config.window_size == 0 || config.window_size > MAX_WINDOW {
            return Err(RuntimeError::InvalidParam);
        }
        if !(0.0..=1.0).contains(&config.alpha) {
            return Err(RuntimeError::InvalidParam);
        }
        if config.inference_budget_ms == 0 || config.actuation_budget_ms == 0 {
            return Err(RuntimeError::InvalidParam);
        }
        if config.watchdog_stall_ms != WATCHDOG_STALL_MS {
            return Err(RuntimeError::InvalidParam);
        }
        if config.safety_value_bound <= 0.0 {
            return Err(RuntimeError::InvalidParam);
        }
        Ok(())
    }

    /// Builds and brings up the runtime: validates `config`, constructs the
    /// lifecycle engine over fresh slots, and attempts to select an active
    /// slot. A controller that has never been provisioned has no valid slot
    /// at this point — that is not a construction failure; it simply leaves
    /// `active_manifest() == None` and `tick`/`execute` failing with
    /// `AgentLoad` until [`Self::load_agent`] succeeds.
    pub fn init(clock: C, entropy: E, gpio: G, serial: S, node: N, config: RuntimeConfig) -> Result<Self, RuntimeError> {
        Self::validate_config(&config)?;
        let preprocess = Preprocessor::new(config.window_size, config.alpha)?;
        let lifecycle = LifecycleEngine::new(config.pinned_pubkey, clock.clone());
        let dispatcher = Dispatcher::new(gpio, serial, node, clock.clone(), config.slave_id, config.actuation_budget_ms);

        let mut runtime =
            Runtime { lifecycle, preprocess, dispatcher, entropy, clock, config, stats: Stats::default(), active_manifest: None };
        let _ = runtime.lifecycle.init();
        log::debug!("runtime initialized; active_slot={:?}", runtime.lifecycle.active_slot());
        Ok(runtime)
    }

    /// The platform entropy source, for callers that need to draw random
    /// bytes directly (e.g. provisioning flows outside the tick loop).
    pub fn entropy_mut(&mut self) -> &mut E {
        &mut self.entropy
    }

    /// Loads the first agent image onto a freshly provisioned controller.
    /// Structural envelope errors and lifecycle failures both surface as
    /// `AgentLoad`, matching §7 ("envelope parse or verification failure").
    pub fn load_agent(&mut self, bytes: &[u8], manifest: &Manifest) -> Result<(), RuntimeError> {
        envelope::parse(bytes, Self::payload_cap())?;
        self.lifecycle.stage(bytes, manifest).map_err(|e| {
            log::error!("agent load failed: {e}");
            error::from_lifecycle_initial(e)
        })?;
        self.active_manifest = Some(*manifest);
        log::info!("agent loaded: agent_id={}", manifest.agent_id);
        Ok(())
    }

    /// Replaces the running agent image. Identical machinery to
    /// [`Self::load_agent`], but lifecycle failures surface as `HotSwap`
    /// rather than `AgentLoad` since an agent was already active.
    pub fn hotswap(&mut self, bytes: &[u8], manifest: &Manifest) -> Result<(), RuntimeError> {
        envelope::parse(bytes, Self::payload_cap())?;
        self.lifecycle.stage(bytes, manifest).map_err(|e| {
            log::error!("hot-swap failed: {e}");
            error::from_lifecycle_hotswap(e)
        })?;
        self.active_manifest = Some(*manifest);
        log::info!("hot-swapped to agent_id={}", manifest.agent_id);
        Ok(())
    }

    /// Must be invoked periodically by the host (§5). Forces a rollback if
    /// an update has stalled past [`WATCHDOG_STALL_MS`].
    pub fn watchdog_tick(&mut self) {
        let failures_before = self.lifecycle.state().failures;
        self.lifecycle.watchdog_tick();
        if self.lifecycle.state().failures != failures_before {
            log::warn!("watchdog forced a rollback after a stalled update");
        }
    }

    /// The manifest of the agent most recently loaded or hot-swapped in via
    /// this `Runtime` instance. `None` if the active slot was selected at
    /// `init` from a prior session (slot metadata alone does not carry the
    /// full manifest).
    pub fn active_manifest(&self) -> Option<&Manifest> {
        self.active_manifest.as_ref()
    }

    /// The canonical per-sample entry point. Returns `None` until the
    /// preprocessor's window fills; once ready, derives a command from the
    /// active agent's inference output via the averaging rule of §4.7: sign
    /// of the summed output bytes selects `gpio_state`, their mean becomes
    /// `value`, and the configured addresses are attached.
    pub fn tick(&mut self, sample: SensorSample) -> Result<Option<ActuationCommand>, RuntimeError> {
        let start = self.clock.now_ms();
        let result = self.tick_inner(sample);
        let elapsed = self.clock.now_ms().wrapping_sub(start);
        self.stats.samples += 1;
        self.stats.record_tick_duration(elapsed);
        log::trace!("tick complete in {elapsed}ms");
        result
    }

    fn tick_inner(&mut self, sample: SensorSample) -> Result<Option<ActuationCommand>, RuntimeError> {
        self.preprocess.add_sample(&sample);
        if !self.preprocess.is_ready() {
            return Ok(None);
        }

        let mut input = [0i8; MAX_WINDOW];
        let n = self.preprocess.normalize(&mut input)?;

        let active = self.lifecycle.active().map_err(error::from_lifecycle_initial)?;
        let parts = envelope::parse(active, Self::payload_cap())?;

        let mut engine = InferenceEngine::new();
        engine.load_model(parts.model)?;
        let mut output = [0i8; edgeplug_inference::MAX_TENSOR];
        let out_len = engine.run(&input[..n], &mut output, &self.clock, self.config.inference_budget_ms)?;
        self.stats.inference_cycles += 1;

        let sum: i32 = output[..out_len].iter().map(|&b| b as i32).sum();
        let mean_q = (libm::roundf(sum as f32 / out_len as f32) as i32).clamp(-128, 127) as i8;
        let gpio_state = if sum >= 0 { 1u8 } else { 0u8 };
        let value = edgeplug_inference::dequantize(&self.config.quantization, mean_q);

        if value.abs() > self.config.safety_value_bound {
            self.stats.safety_trips += 1;
            log::warn!("safety trip: |{value}| exceeds bound {}", self.config.safety_value_bound);
            return Err(RuntimeError::Safety);
        }

        Ok(Some(ActuationCommand {
            opcua_node: self.config.actuation_opcua_node,
            modbus_addr: self.config.actuation_modbus_addr,
            gpio_pin: self.config.actuation_gpio_pin,
            gpio_state,
            value,
        }))
    }

    /// Dispatches a command derived from (or equivalent to) [`Self::tick`]'s
    /// output to the configured transport collaborators.
    pub fn execute(&mut self, command: &ActuationCommand) -> Result<(), RuntimeError> {
        self.dispatcher.dispatch(command)?;
        self.stats.actuation = self.dispatcher.stats();
        Ok(())
    }

    /// A snapshot of the runtime's counters.
    pub fn stats(&self) -> Stats {
        let mut s = self.stats;
        s.actuation = self.dispatcher.stats();
        s
    }

    /// Resets all counters. Lifecycle audit counters (`attempts`,
    /// `successes`, `failures`) are not part of `Stats` and are unaffected.
    pub fn reset_stats(&mut self) {
        self.stats = Stats::default();
        self.dispatcher.reset_stats();
    }

    /// Idempotent teardown hook. This runtime holds no resources beyond its
    /// fixed-size slots and scratch buffers, so there is nothing to release;
    /// the method exists so callers have a single place to stop driving
    /// `tick`/`watchdog_tick`.
    pub fn shutdown(&mut self) -> Result<(), RuntimeError> {
        log::info!("runtime shutdown");
        Ok(())
    }
}
