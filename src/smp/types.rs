//! SMP type definitions: per-core lifecycle states, boot status words,
//! CPU masks and the error taxonomy.

use core::fmt;

/// Maximum number of logical CPUs supported. Bound by the `u64` cpu mask.
pub const MAX_CPUS: usize = 64;

/// Sentinel hardware identifier. Registry slots are pre-filled with it so no
/// valid identifier can alias an empty slot.
pub const INVALID_HWID: u64 = u64::MAX;

/// Lifecycle state of one logical CPU.
///
/// `Dead`, `Parked` and `StuckInKernel` are terminal for this subsystem; a
/// later re-bring-up is a fresh sequence starting from `Present`, not a
/// reverse transition.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CpuState {
    Invalid = 0,
    Possible = 1,
    Present = 2,
    Preparing = 3,
    Booting = 4,
    Online = 5,
    GoingOffline = 6,
    Dead = 7,
    Parked = 8,
    StuckInKernel = 9,
}

impl CpuState {
    pub fn from_atomic(value: u8) -> Self {
        match value {
            1 => CpuState::Possible,
            2 => CpuState::Present,
            3 => CpuState::Preparing,
            4 => CpuState::Booting,
            5 => CpuState::Online,
            6 => CpuState::GoingOffline,
            7 => CpuState::Dead,
            8 => CpuState::Parked,
            9 => CpuState::StuckInKernel,
            _ => CpuState::Invalid,
        }
    }

    /// The core has been prepared by the platform boot driver at some point.
    /// A core that never joined the system (`StuckInKernel`) is not counted.
    pub fn is_present(self) -> bool {
        (self as u8) >= (CpuState::Present as u8) && self != CpuState::StuckInKernel
    }

    pub fn is_online(self) -> bool {
        self == CpuState::Online
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            CpuState::Invalid => "invalid",
            CpuState::Possible => "possible",
            CpuState::Present => "present",
            CpuState::Preparing => "preparing",
            CpuState::Booting => "booting",
            CpuState::Online => "online",
            CpuState::GoingOffline => "going-offline",
            CpuState::Dead => "dead",
            CpuState::Parked => "parked",
            CpuState::StuckInKernel => "stuck-in-kernel",
        }
    }
}

impl fmt::Display for CpuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status word a secondary core writes during its own bring-up, read by the
/// booting core to diagnose a failed or aborted boot.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BootStatus {
    /// Initial value: the core has not reached kernel addressing yet.
    MmuOff = 0,
    /// The core cannot join and asks the platform to power it off.
    KillMe = 1,
    /// The core is executing kernel text but will never come online.
    StuckInKernel = 2,
    /// The core detected a configuration the running kernel cannot support.
    PanicKernel = 3,
    /// Bring-up finished; the core is about to mark itself online.
    BootSuccess = 4,
}

impl BootStatus {
    pub fn from_atomic(value: u8) -> Self {
        match value {
            1 => BootStatus::KillMe,
            2 => BootStatus::StuckInKernel,
            3 => BootStatus::PanicKernel,
            4 => BootStatus::BootSuccess,
            _ => BootStatus::MmuOff,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            BootStatus::MmuOff => "mmu-off",
            BootStatus::KillMe => "kill-me",
            BootStatus::StuckInKernel => "stuck-in-kernel",
            BootStatus::PanicKernel => "panic-kernel",
            BootStatus::BootSuccess => "boot-success",
        }
    }
}

impl fmt::Display for BootStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution context handed to a secondary core: where to resume and on
/// which stack. The values are opaque to this subsystem.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    pub entry: u64,
    pub stack_top: u64,
    pub task: u64,
}

// ===========================================================================
// CPU masks
// ===========================================================================

/// Set of logical CPU indices, one bit per core.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CpuMask(u64);

impl CpuMask {
    pub const EMPTY: CpuMask = CpuMask(0);

    pub const fn empty() -> Self {
        CpuMask(0)
    }

    pub const fn single(cpu: usize) -> Self {
        CpuMask(1 << cpu)
    }

    /// All indices below `count`.
    pub fn all_under(count: usize) -> Self {
        debug_assert!(count <= MAX_CPUS);
        if count >= 64 {
            CpuMask(u64::MAX)
        } else {
            CpuMask((1u64 << count) - 1)
        }
    }

    pub fn set(&mut self, cpu: usize) {
        debug_assert!(cpu < MAX_CPUS);
        self.0 |= 1 << cpu;
    }

    pub fn clear(&mut self, cpu: usize) {
        self.0 &= !(1 << cpu);
    }

    pub const fn contains(&self, cpu: usize) -> bool {
        self.0 & (1 << cpu) != 0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    pub fn iter(&self) -> CpuMaskIter {
        CpuMaskIter(self.0)
    }
}

pub struct CpuMaskIter(u64);

impl Iterator for CpuMaskIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            return None;
        }
        let cpu = self.0.trailing_zeros() as usize;
        self.0 &= self.0 - 1;
        Some(cpu)
    }
}

impl IntoIterator for CpuMask {
    type Item = usize;
    type IntoIter = CpuMaskIter;

    fn into_iter(self) -> CpuMaskIter {
        CpuMaskIter(self.0)
    }
}

impl fmt::Display for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for cpu in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{}", cpu)?;
            first = false;
        }
        Ok(())
    }
}

// ===========================================================================
// Error taxonomy
// ===========================================================================

/// Enumeration-time registry failures. Non-fatal: the offending entry is
/// skipped and enumeration continues.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// Hardware identifier already claimed by another logical CPU.
    DuplicateId(u64),
    /// The slot already holds a valid entry.
    SlotInUse,
    /// Index out of range or refers to the boot core.
    BadIndex,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateId(hwid) => {
                write!(f, "duplicate hardware id {:#x}", hwid)
            }
            RegistryError::SlotInUse => f.write_str("slot already registered"),
            RegistryError::BadIndex => f.write_str("bad logical cpu index"),
        }
    }
}

/// Secondary bring-up failures.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BootError {
    /// No boot method available for this core.
    Unsupported,
    /// The platform release primitive rejected the boot immediately.
    HardwareRejected,
    /// The core never reported online within the timeout. Carries the last
    /// boot status the secondary managed to write.
    Timeout(BootStatus),
    /// The core came up with a configuration the running system cannot
    /// tolerate. The caller must halt the whole system.
    InconsistentConfiguration,
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootError::Unsupported => f.write_str("no boot method available"),
            BootError::HardwareRejected => f.write_str("boot rejected by hardware"),
            BootError::Timeout(status) => {
                write!(f, "timed out waiting for online (status: {})", status)
            }
            BootError::InconsistentConfiguration => {
                f.write_str("unsupported configuration detected post-boot")
            }
        }
    }
}

/// Hotplug teardown failures.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OfflineError {
    /// No clean shutdown method known, or the platform vetoed the unplug.
    Unsupported,
    /// The core did not report death within the timeout. The system keeps
    /// running; the core may not have shut down fully.
    Timeout,
}

impl fmt::Display for OfflineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfflineError::Unsupported => f.write_str("no clean shutdown method"),
            OfflineError::Timeout => f.write_str("core did not report death in time"),
        }
    }
}

/// Emergency stop/park failures. Only the re-exec park variant can fail;
/// panic and crash paths swallow everything into logging.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StopError {
    /// Park memory is not available; caller should fall back to a plain stop.
    Unsupported,
}

impl fmt::Display for StopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopError::Unsupported => f.write_str("park memory unavailable"),
        }
    }
}

/// Errors surfaced by the platform boot primitive.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PlatformError {
    Unsupported,
    HardwareRejected,
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformError::Unsupported => f.write_str("operation not supported"),
            PlatformError::HardwareRejected => f.write_str("rejected by hardware"),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
