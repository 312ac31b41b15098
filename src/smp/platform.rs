//! Seams to the outside world.
//!
//! Everything hardware- or subsystem-specific is reached through the traits
//! here: the platform's per-core boot driver, the interrupt controller's
//! cross-call primitive, and the consumers of received IPIs. The kernel
//! provides real implementations; the test suite provides mocks.

use super::types::{CpuMask, ExecutionContext, PlatformError};
use super::ipi::IpiMessage;

/// Monotonic time source backing every bounded wait.
pub trait Clock: Sync {
    fn now_us(&self) -> u64;

    /// Called once per iteration of a wait loop.
    fn relax(&self) {
        core::hint::spin_loop();
    }
}

/// Platform per-core boot driver (spin-table, firmware call, mailbox, ...).
///
/// `prepare`/`release` are mandatory. The rest are optional hooks: a missing
/// `disable` never vetoes an unplug, a missing `die` means the core has no
/// clean shutdown path, and a missing `kill` means there is no way to
/// synchronize with a dying core, so it is assumed really dead.
pub trait CpuOps: Sync {
    /// One-time per-core preparation during enumeration.
    fn prepare(&self, cpu: usize) -> Result<(), PlatformError>;

    /// Release the core so it starts executing with the published context.
    fn release(&self, cpu: usize, ctx: &ExecutionContext) -> Result<(), PlatformError>;

    /// Runs on the secondary itself right after it enters the kernel.
    fn post_boot(&self, _cpu: usize) {}

    /// May veto a hot unplug for a mechanism-specific reason.
    fn disable(&self, _cpu: usize) -> Result<(), PlatformError> {
        Ok(())
    }

    /// Whether this core has a clean shutdown method at all.
    fn can_die(&self, _cpu: usize) -> bool {
        false
    }

    /// Actually shut down the calling core. Runs on the dying core.
    fn die(&self, _cpu: usize) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported)
    }

    /// Confirm from the outside that a core has left the kernel.
    fn kill(&self, _cpu: usize) -> Result<(), PlatformError> {
        // No way to synchronize with the dying core: assume it is really
        // dead rather than waiting an arbitrary time and hoping.
        Ok(())
    }
}

/// The interrupt controller's narrow interface: raise an IPI towards a mask
/// of cores, and identify the calling core.
pub trait CrossCall: Sync {
    fn deliver(&self, mask: CpuMask, message: IpiMessage);
    fn current_cpu(&self) -> usize;
}

/// Receiving-side collaborators for IPI dispatch, bundled the way a machine
/// vector table would be. All methods run on the receiving core, most of
/// them in interrupt context.
pub trait IpiHandlers: Sync {
    /// `Reschedule` consumer.
    fn scheduler_ipi(&self, cpu: usize);

    /// `CallFunction` consumer: run the pending deferred calls.
    fn call_function(&self, cpu: usize);

    /// `TimerBroadcast` consumer.
    fn tick_broadcast(&self, cpu: usize);

    /// `IrqWork` consumer.
    fn irq_work(&self, cpu: usize);

    /// Save the receiving core's register state for the crash dump.
    fn save_crash_regs(&self, cpu: usize);

    /// Capture and emit this core's call-stack snapshot.
    fn capture_backtrace(&self, cpu: usize);

    /// Whether this core expected a wake-up from a firmware wake source.
    fn wakeup_expected(&self, _cpu: usize) -> bool {
        false
    }

    /// Mask further interrupts on this core.
    fn mask_local_irqs(&self, cpu: usize);

    /// Whether the calling core currently has interrupts masked.
    fn local_irqs_disabled(&self, cpu: usize) -> bool;
}

/// Topology/affinity bookkeeping collaborator.
pub trait Topology: Sync {
    fn add_cpu(&self, _cpu: usize) {}
    fn remove_cpu(&self, _cpu: usize) {}
}

/// Interrupt-affinity migration collaborator, used when a core goes away.
pub trait IrqMigration: Sync {
    fn migrate_off(&self, _cpu: usize) {}
}
