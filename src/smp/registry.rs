//! CPU registry: the authoritative map from logical core index to hardware
//! identifier and lifecycle state.
//!
//! Entries are created once, on the boot core, before any secondary runs.
//! After that every field is atomics-only: the secondary core writes its own
//! entry during bring-up, the primary polls it, and the emergency paths flip
//! states from interrupt context. There is no lock; correctness relies on
//! single-writer-per-entry discipline plus release/acquire ordering at the
//! documented handoff points.

use core::array;
use core::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

use super::types::{BootStatus, CpuMask, CpuState, RegistryError, INVALID_HWID, MAX_CPUS};

struct CpuSlot {
    hardware_id: AtomicU64,
    state: AtomicU8,
    boot_status: AtomicU8,
}

impl CpuSlot {
    fn invalid() -> Self {
        Self {
            hardware_id: AtomicU64::new(INVALID_HWID),
            state: AtomicU8::new(CpuState::Invalid as u8),
            boot_status: AtomicU8::new(BootStatus::MmuOff as u8),
        }
    }
}

pub struct CpuRegistry {
    slots: [CpuSlot; MAX_CPUS],
    registered: AtomicUsize,
}

impl CpuRegistry {
    /// Create a registry seeded with the boot core: index 0 starts `Online`
    /// with `boot_hwid`, satisfying the "exactly one boot core" invariant by
    /// construction.
    pub fn new(boot_hwid: u64) -> Self {
        let registry = Self {
            slots: array::from_fn(|_| CpuSlot::invalid()),
            registered: AtomicUsize::new(1),
        };
        registry.slots[0]
            .hardware_id
            .store(boot_hwid, Ordering::Relaxed);
        registry.slots[0]
            .state
            .store(CpuState::Online as u8, Ordering::Relaxed);
        registry.slots[0]
            .boot_status
            .store(BootStatus::BootSuccess as u8, Ordering::Relaxed);
        registry
    }

    /// Register a secondary core. Boot-core only, single-threaded, before
    /// any secondary runs. Duplicate hardware ids are rejected and leave the
    /// existing entry untouched.
    pub fn register(&self, index: usize, hardware_id: u64) -> Result<(), RegistryError> {
        if index == 0 || index >= MAX_CPUS {
            return Err(RegistryError::BadIndex);
        }
        if self.state(index) != CpuState::Invalid {
            return Err(RegistryError::SlotInUse);
        }
        if self.index_of(hardware_id).is_some() {
            return Err(RegistryError::DuplicateId(hardware_id));
        }
        self.slots[index]
            .hardware_id
            .store(hardware_id, Ordering::Relaxed);
        self.slots[index]
            .state
            .store(CpuState::Possible as u8, Ordering::Release);
        self.registered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn hardware_id(&self, index: usize) -> Option<u64> {
        if index >= MAX_CPUS || self.state(index) == CpuState::Invalid {
            return None;
        }
        Some(self.slots[index].hardware_id.load(Ordering::Relaxed))
    }

    /// Logical index owning `hardware_id`, if any.
    pub fn index_of(&self, hardware_id: u64) -> Option<usize> {
        for (index, slot) in self.slots.iter().enumerate() {
            if CpuState::from_atomic(slot.state.load(Ordering::Acquire)) != CpuState::Invalid
                && slot.hardware_id.load(Ordering::Relaxed) == hardware_id
            {
                return Some(index);
            }
        }
        None
    }

    pub fn state(&self, index: usize) -> CpuState {
        CpuState::from_atomic(self.slots[index].state.load(Ordering::Acquire))
    }

    /// Unordered outside explicit synchronization; callers own the meaning
    /// of the transition. Invalid transitions are programmer errors, not
    /// recoverable faults.
    pub fn set_state(&self, index: usize, state: CpuState) {
        crate::ktrace!("CPU{}: state -> {}", index, state);
        self.slots[index].state.store(state as u8, Ordering::Release);
    }

    pub fn boot_status(&self, index: usize) -> BootStatus {
        BootStatus::from_atomic(self.slots[index].boot_status.load(Ordering::Acquire))
    }

    pub fn set_boot_status(&self, index: usize, status: BootStatus) {
        self.slots[index]
            .boot_status
            .store(status as u8, Ordering::Release);
    }

    /// Number of registered entries, including the boot core.
    pub fn count_registered(&self) -> usize {
        self.registered.load(Ordering::Relaxed)
    }

    pub fn count_present(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| CpuState::from_atomic(slot.state.load(Ordering::Acquire)).is_present())
            .count()
    }

    pub fn count_online(&self) -> usize {
        self.online_mask().count()
    }

    pub fn online_mask(&self) -> CpuMask {
        let mut mask = CpuMask::empty();
        for (index, slot) in self.slots.iter().enumerate() {
            if CpuState::from_atomic(slot.state.load(Ordering::Acquire)).is_online() {
                mask.set(index);
            }
        }
        mask
    }

    /// Cores that are executing kernel text but will never join the system.
    pub fn count_stuck_in_kernel(&self) -> usize {
        self.count_in_state(CpuState::StuckInKernel)
    }

    pub fn count_parked(&self) -> usize {
        self.count_in_state(CpuState::Parked)
    }

    /// Reporting query: higher-level orchestration refuses operations that
    /// assume full core participation while this holds.
    pub fn any_stuck_or_parked(&self) -> bool {
        self.count_stuck_in_kernel() > 0 || self.count_parked() > 0
    }

    fn count_in_state(&self, wanted: CpuState) -> usize {
        self.slots
            .iter()
            .filter(|slot| CpuState::from_atomic(slot.state.load(Ordering::Acquire)) == wanted)
            .count()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
