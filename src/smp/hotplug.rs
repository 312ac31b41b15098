//! Hot unplug: taking an online core back out of the system.
//!
//! Split across two cores, like bring-up in reverse. The coordinating core
//! runs `take_offline` and then `wait_for_death`; the dying core runs
//! `report_death` as the last thing it ever does in this kernel.

use crate::config::SmpConfig;

use super::platform::{Clock, CpuOps, IpiHandlers, IrqMigration, Topology};
use super::poll::poll_until;
use super::registry::CpuRegistry;
use super::types::{CpuState, OfflineError};

pub struct HotplugCoordinator<'a> {
    registry: &'a CpuRegistry,
    ops: &'a dyn CpuOps,
    topology: &'a dyn Topology,
    irq: &'a dyn IrqMigration,
    handlers: &'a dyn IpiHandlers,
    clock: &'a dyn Clock,
    config: SmpConfig,
}

impl<'a> HotplugCoordinator<'a> {
    pub fn new(
        registry: &'a CpuRegistry,
        ops: &'a dyn CpuOps,
        topology: &'a dyn Topology,
        irq: &'a dyn IrqMigration,
        handlers: &'a dyn IpiHandlers,
        clock: &'a dyn Clock,
        config: SmpConfig,
    ) -> Self {
        Self {
            registry,
            ops,
            topology,
            irq,
            handlers,
            clock,
            config,
        }
    }

    /// Start taking `cpu` offline. Vetoes happen before any state changes;
    /// once the core leaves the online set the operation cannot be undone.
    pub fn take_offline(&self, cpu: usize) -> Result<(), OfflineError> {
        if !self.ops.can_die(cpu) {
            return Err(OfflineError::Unsupported);
        }
        if self.ops.disable(cpu).is_err() {
            return Err(OfflineError::Unsupported);
        }

        self.topology.remove_cpu(cpu);
        // Point of no return.
        self.registry.set_state(cpu, CpuState::GoingOffline);
        self.irq.migrate_off(cpu);
        Ok(())
    }

    /// Runs on the dying core: mask interrupts, publish death, then try the
    /// clean shutdown path. If `die` returns the caller must spin the core
    /// forever; it is already out of the system either way.
    pub fn report_death(&self, cpu: usize) {
        self.handlers.mask_local_irqs(cpu);
        self.registry.set_state(cpu, CpuState::Dead);
        let _ = self.ops.die(cpu);
    }

    /// Coordinator side: wait (bounded) for the dying core to publish death,
    /// then confirm with the platform that it has really left the kernel.
    pub fn wait_for_death(&self, cpu: usize) -> Result<(), OfflineError> {
        let dead = poll_until(self.clock, self.config.death_timeout_us(), || {
            self.registry.state(cpu) == CpuState::Dead
        });
        if !dead {
            crate::kfatal!("CPU{}: cpu didn't die", cpu);
            return Err(OfflineError::Timeout);
        }
        crate::kinfo!("CPU{}: shutdown", cpu);

        if let Err(error) = self.ops.kill(cpu) {
            crate::kwarn!("CPU{}: may not have shut down cleanly: {}", cpu, error);
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
