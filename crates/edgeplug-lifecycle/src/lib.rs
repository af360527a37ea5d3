//! The dual-slot agent image store (§4.3): integrity-sealed metadata, CRC
//! verification, signature-anchored activation, atomic switch, and
//! watchdog-driven rollback.
#![cfg_attr(not(any(feature = "std", test)), no_std)]

use edgeplug_crypto::{crc32, sha512, verify_ed25519};
use edgeplug_format::manifest::Manifest;
use edgeplug_format::slot_metadata::{SlotMetadata, SLOT_METADATA_LEN};

/// Reads a monotonic millisecond clock. Injected so the engine has no
/// platform-specific code of its own.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

/// One of the two equally sized persistent regions that may hold an agent
/// image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotId {
    A,
    B,
}

impl SlotId {
    fn other(self) -> SlotId {
        match self {
            SlotId::A => SlotId::B,
            SlotId::B => SlotId::A,
        }
    }

    fn index(self) -> usize {
        match self {
            SlotId::A => 0,
            SlotId::B => 1,
        }
    }
}

/// Watchdog stall threshold: a `stage()` that hasn't committed within this
/// many milliseconds of `update_started_at` is presumed stuck.
pub const WATCHDOG_STALL_MS: u32 = 30_000;

/// `{active_slot, update_in_progress, update_started_at, attempts,
/// successes, failures, last_success_at}` — mutated only by the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct LifecycleState {
    pub active_slot: Option<SlotId>,
    pub update_in_progress: bool,
    pub update_started_at: u32,
    pub attempts: u32,
    pub successes: u32,
    pub failures: u32,
    pub last_success_at: u32,
}

/// Errors raised by lifecycle operations; these are the sole `HotSwap`
/// failure paths of §7 — on every one of them, `active_slot` is left
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum LifecycleError {
    /// Neither slot validated at `init()`.
    NoValidSlot,
    /// `active()` or `active_manifest()` was called with no active slot.
    NoActiveSlot,
    /// `stage()` was called while another update was already in progress.
    AlreadyUpdating,
    /// The payload is larger than `S_SLOT - sizeof(SlotMetadata)`.
    TooLarge,
    /// `manifest.flash_size` did not match the payload length.
    SizeMismatch,
    /// The recomputed SHA-512 of the payload did not match `manifest.hash`.
    BadHash,
    /// The manifest's signature did not verify against the pinned public key.
    BadSignature,
    /// The freshly written slot failed re-validation after being persisted.
    PersistError,
    /// `rollback()` found no validatable slot to fall back to.
    NoRollbackTarget,
}

impl core::fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            LifecycleError::NoValidSlot => "neither slot validated",
            LifecycleError::NoActiveSlot => "no active slot",
            LifecycleError::AlreadyUpdating => "an update is already in progress",
            LifecycleError::TooLarge => "payload larger than slot capacity",
            LifecycleError::SizeMismatch => "manifest flash_size does not match payload length",
            LifecycleError::BadHash => "payload hash does not match manifest",
            LifecycleError::BadSignature => "manifest signature did not verify",
            LifecycleError::PersistError => "persisted slot failed re-validation",
            LifecycleError::NoRollbackTarget => "no valid slot to roll back to",
        };
        f.write_str(msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LifecycleError {}

/// The dual-slot agent store. `S_SLOT` is the configured slot size in bytes
/// (fixed at compile time to keep the store allocation-free); a value larger
/// than a slot's capacity is rejected at `stage()`, not at construction.
pub struct LifecycleEngine<C: Clock, const S_SLOT: usize> {
    slots: [[u8; S_SLOT]; 2],
    state: LifecycleState,
    pinned_pubkey: [u8; 32],
    clock: C,
}

impl<C: Clock, const S_SLOT: usize> LifecycleEngine<C, S_SLOT> {
    /// Payload capacity of a single slot: `S_SLOT - sizeof(SlotMetadata)`.
    pub const PAYLOAD_CAP: usize = S_SLOT - SLOT_METADATA_LEN;

    /// Builds an engine over two zeroed slots. Call [`Self::init`] before
    /// relying on [`Self::active`] — a freshly constructed engine has no
    /// active slot, matching a controller that has never been provisioned.
    pub fn new(pinned_pubkey: [u8; 32], clock: C) -> Self {
        const { assert!(S_SLOT > SLOT_METADATA_LEN, "slot must be larger than its own metadata block") };
        LifecycleEngine { slots: [[0u8; S_SLOT]; 2], state: LifecycleState::default(), pinned_pubkey, clock }
    }

    /// Reads metadata from both slots and selects the active one: the slot
    /// that validates; if both validate, the one with the larger
    /// `timestamp`; ties prefer slot A. Never erases an invalid slot.
    pub fn init(&mut self) -> Result<SlotId, LifecycleError> {
        let a_valid = self.is_valid(SlotId::A);
        let b_valid = self.is_valid(SlotId::B);
        let chosen = match (a_valid, b_valid) {
            (true, true) => {
                let a_ts = self.slot_info(SlotId::A).timestamp;
                let b_ts = self.slot_info(SlotId::B).timestamp;
                if b_ts > a_ts { SlotId::B } else { SlotId::A }
            }
            (true, false) => SlotId::A,
            (false, true) => SlotId::B,
            (false, false) => return Err(LifecycleError::NoValidSlot),
        };
        self.state.active_slot = Some(chosen);
        Ok(chosen)
    }

    /// Returns the active slot's payload, truncated to its recorded size.
    pub fn active(&self) -> Result<&[u8], LifecycleError> {
        let slot = self.state.active_slot.ok_or(LifecycleError::NoActiveSlot)?;
        let size = self.slot_info(slot).size as usize;
        Ok(&self.slots[slot.index()][..size])
    }

    /// The identifier of the currently active slot, if any.
    pub fn active_slot(&self) -> Option<SlotId> {
        self.state.active_slot
    }

    /// A read-only snapshot of the lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Stages, verifies, persists, and activates a new agent image.
    ///
    /// Any failure before the commit step leaves `active_slot` exactly as it
    /// was before this call — observers never see a torn image.
    pub fn stage(&mut self, bytes: &[u8], manifest: &Manifest) -> Result<(), LifecycleError> {
        if self.state.update_in_progress {
            return Err(LifecycleError::AlreadyUpdating);
        }
        if bytes.len() > Self::PAYLOAD_CAP {
            return Err(LifecycleError::TooLarge);
        }
        if manifest.flash_size as usize != bytes.len() {
            return Err(LifecycleError::SizeMismatch);
        }

        self.state.update_in_progress = true;
        self.state.update_started_at = self.clock.now_ms();
        self.state.attempts += 1;

        if let Err(e) = self.stage_inner(bytes, manifest) {
            self.state.update_in_progress = false;
            self.state.failures += 1;
            return Err(e);
        }

        self.state.successes += 1;
        self.state.last_success_at = self.clock.now_ms();
        self.state.update_in_progress = false;
        Ok(())
    }

    fn stage_inner(&mut self, bytes: &[u8], manifest: &Manifest) -> Result<(), LifecycleError> {
        let hash = sha512(bytes);
        if hash != manifest.hash {
            return Err(LifecycleError::BadHash);
        }
        if !verify_ed25519(&manifest.hash, &manifest.signature, &self.pinned_pubkey) {
            return Err(LifecycleError::BadSignature);
        }

        let target = match self.state.active_slot {
            Some(active) => active.other(),
            None => SlotId::A,
        };

        let slot = &mut self.slots[target.index()];
        slot[..bytes.len()].copy_from_slice(bytes);
        let meta = SlotMetadata::new(manifest.version, bytes.len() as u32, crc32(bytes), self.clock.now_ms(), manifest.signature);
        let meta_offset = S_SLOT - SLOT_METADATA_LEN;
        slot[meta_offset..].copy_from_slice(&meta.encode());

        if !self.is_valid(target) {
            return Err(LifecycleError::PersistError);
        }

        self.state.active_slot = Some(target);
        Ok(())
    }

    /// Falls back to the other slot if it validates; else reports
    /// [`LifecycleError::NoRollbackTarget`].
    pub fn rollback(&mut self) -> Result<(), LifecycleError> {
        let current = self.state.active_slot.ok_or(LifecycleError::NoActiveSlot)?;
        let other = current.other();
        if self.is_valid(other) {
            self.state.active_slot = Some(other);
            Ok(())
        } else {
            Err(LifecycleError::NoRollbackTarget)
        }
    }

    /// Must be invoked periodically by the host. If an update has been
    /// in-progress for longer than [`WATCHDOG_STALL_MS`], forces a rollback,
    /// clears the in-progress flag, and counts a failure.
    pub fn watchdog_tick(&mut self) {
        if !self.state.update_in_progress {
            return;
        }
        let elapsed = self.clock.now_ms().wrapping_sub(self.state.update_started_at);
        if elapsed > WATCHDOG_STALL_MS {
            let _ = self.rollback();
            self.state.update_in_progress = false;
            self.state.failures += 1;
        }
    }

    /// Zeroes a slot's payload and metadata. Does not touch `active_slot`;
    /// callers must not clear the currently active slot out from under a
    /// running agent.
    pub fn clear_slot(&mut self, which: SlotId) {
        self.slots[which.index()] = [0u8; S_SLOT];
    }

    /// Decodes the metadata record stored at the trailing edge of `which`.
    pub fn slot_info(&self, which: SlotId) -> SlotMetadata {
        let meta_offset = S_SLOT - SLOT_METADATA_LEN;
        SlotMetadata::decode(&self.slots[which.index()][meta_offset..])
            .expect("slice is always exactly SLOT_METADATA_LEN bytes")
    }

    /// Whether `which` holds a valid payload: its magic matches, its
    /// recorded size is in range, its CRC-32 recomputes, and its signature
    /// verifies against the pinned public key over the recomputed hash of
    /// its payload.
    pub fn is_valid(&self, which: SlotId) -> bool {
        let meta = self.slot_info(which);
        if !meta.has_valid_magic() {
            return false;
        }
        let size = meta.size as usize;
        if size > Self::PAYLOAD_CAP {
            return false;
        }
        let payload = &self.slots[which.index()][..size];
        if crc32(payload) != meta.crc32 {
            return false;
        }
        let hash = sha512(payload);
        verify_ed25519(&hash, &meta.signature, &self.pinned_pubkey)
    }

    #[cfg(test)]
    fn test_force_stalled_update(&mut self, started_at_ms: u32) {
        self.state.update_in_progress = true;
        self.state.update_started_at = started_at_ms;
    }

    #[cfg(test)]
    fn test_write_raw_slot(&mut self, which: SlotId, payload: &[u8], meta: &SlotMetadata) {
        let slot = &mut self.slots[which.index()];
        slot[..payload.len()].copy_from_slice(payload);
        let meta_offset = S_SLOT - SLOT_METADATA_LEN;
        slot[meta_offset..].copy_from_slice(&meta.encode());
    }
}
