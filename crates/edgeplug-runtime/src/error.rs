//! The seven-member error taxonomy of §7, and the `From` conversions that
//! fold every lower crate's error type into it.

use edgeplug_actuation::ActuationError;
use edgeplug_crypto::CryptoError;
use edgeplug_format::envelope::ParseError;
use edgeplug_inference::InferenceError;
use edgeplug_lifecycle::LifecycleError;
use edgeplug_preprocess::PreprocessError;

/// The façade-level error taxonomy (§7, §6's `StatusCode`). Every lower
/// crate's error type maps into exactly one of these kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum RuntimeError {
    /// Caller contract violation: out-of-range or inconsistent configuration
    /// or argument. Never retried.
    InvalidParam,
    /// A request exceeded a fixed buffer, slot, or scratch capacity.
    Memory,
    /// Envelope parsing or image verification failed while loading an agent
    /// for the first time (no agent was previously active).
    AgentLoad,
    /// Inference failed: time budget breached, malformed model, or
    /// unsupported layer. The active agent is left undisturbed.
    Inference,
    /// Actuation failed: a transport refused a frame, an invalid GPIO state
    /// was requested, or the actuation latency budget was breached.
    Actuation,
    /// An agent's derived output violated a configured safety bound; no
    /// actuation was emitted.
    Safety,
    /// Any failure path of the image lifecycle engine (stage, rollback,
    /// watchdog) that occurred while an agent was already active, i.e. a
    /// hot-swap rather than an initial load.
    HotSwap,
}

impl core::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            RuntimeError::InvalidParam => "invalid parameter",
            RuntimeError::Memory => "capacity exceeded",
            RuntimeError::AgentLoad => "agent load failed",
            RuntimeError::Inference => "inference failed",
            RuntimeError::Actuation => "actuation failed",
            RuntimeError::Safety => "safety bound violated",
            RuntimeError::HotSwap => "hot-swap failed",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RuntimeError {}

/// Maps a lifecycle failure to `AgentLoad` (first attempt to bring up an
/// agent) or `HotSwap` (a lifecycle failure once an agent was already
/// running) depending on the call site — lifecycle errors alone don't carry
/// that distinction, so callers pick via [`from_lifecycle_initial`] or
/// [`from_lifecycle_hotswap`] rather than a single blanket `From` impl.
pub fn from_lifecycle_initial(e: LifecycleError) -> RuntimeError {
    match e {
        LifecycleError::AlreadyUpdating => RuntimeError::InvalidParam,
        LifecycleError::TooLarge | LifecycleError::SizeMismatch => RuntimeError::Memory,
        _ => RuntimeError::AgentLoad,
    }
}

pub fn from_lifecycle_hotswap(e: LifecycleError) -> RuntimeError {
    match e {
        LifecycleError::AlreadyUpdating => RuntimeError::InvalidParam,
        LifecycleError::TooLarge | LifecycleError::SizeMismatch => RuntimeError::Memory,
        _ => RuntimeError::HotSwap,
    }
}

impl From<ParseError> for RuntimeError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::OversizedField(_) => RuntimeError::Memory,
            ParseError::Truncated | ParseError::BadHeader | ParseError::MissingKey(_) | ParseError::DuplicateKey(_) => {
                RuntimeError::AgentLoad
            }
        }
    }
}

impl From<InferenceError> for RuntimeError {
    fn from(_: InferenceError) -> Self {
        RuntimeError::Inference
    }
}

impl From<ActuationError> for RuntimeError {
    fn from(_: ActuationError) -> Self {
        RuntimeError::Actuation
    }
}

impl From<PreprocessError> for RuntimeError {
    fn from(e: PreprocessError) -> Self {
        match e {
            PreprocessError::InvalidConfig => RuntimeError::InvalidParam,
            PreprocessError::NotReady => RuntimeError::InvalidParam,
            PreprocessError::BufferTooSmall => RuntimeError::Memory,
        }
    }
}

impl From<CryptoError> for RuntimeError {
    fn from(_: CryptoError) -> Self {
        RuntimeError::InvalidParam
    }
}
