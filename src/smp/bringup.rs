//! Secondary core bring-up.
//!
//! One core at a time: the boot core publishes an execution context, releases
//! the target through the platform driver (or a park section, when the core
//! was left parked by a previous kernel), then polls for the secondary to
//! mark itself online. A core that misses the deadline is triaged by the
//! status word it managed to write on its way down.

use core::sync::atomic::{fence, Ordering};

use spin::Mutex;

use crate::config::SmpConfig;

use super::park::ParkArea;
use super::platform::{Clock, CpuOps, Topology};
use super::poll::poll_until;
use super::registry::CpuRegistry;
use super::types::{BootError, BootStatus, CpuState, ExecutionContext};

pub struct BringupSequencer<'a> {
    registry: &'a CpuRegistry,
    ops: &'a dyn CpuOps,
    topology: &'a dyn Topology,
    clock: &'a dyn Clock,
    config: SmpConfig,
    park: Option<&'a ParkArea>,
    /// Context handed to the secondary currently booting. One core boots at
    /// a time, so a single slot suffices.
    secondary: Mutex<Option<ExecutionContext>>,
}

impl<'a> BringupSequencer<'a> {
    pub fn new(
        registry: &'a CpuRegistry,
        ops: &'a dyn CpuOps,
        topology: &'a dyn Topology,
        clock: &'a dyn Clock,
        config: SmpConfig,
        park: Option<&'a ParkArea>,
    ) -> Self {
        Self {
            registry,
            ops,
            topology,
            clock,
            config,
            park,
            secondary: Mutex::new(None),
        }
    }

    /// Boot one secondary core and wait (bounded) for it to come online.
    pub fn bring_up(&self, cpu: usize, ctx: ExecutionContext) -> Result<(), BootError> {
        if self.registry.state(cpu) != CpuState::Present {
            crate::kerror!(
                "CPU{}: cannot boot from state {}",
                cpu,
                self.registry.state(cpu)
            );
            return Err(BootError::Unsupported);
        }

        // Publish the context before the core can possibly observe its
        // release. The fence pairs with the secondary's first read.
        *self.secondary.lock() = Some(ctx);
        self.registry.set_boot_status(cpu, BootStatus::MmuOff);
        self.registry.set_state(cpu, CpuState::Preparing);
        fence(Ordering::SeqCst);
        self.registry.set_state(cpu, CpuState::Booting);

        if let Err(error) = self.release(cpu, &ctx) {
            self.registry.set_state(cpu, CpuState::Present);
            *self.secondary.lock() = None;
            return Err(error);
        }

        let online = poll_until(self.clock, self.config.boot_timeout_us(), || {
            self.registry.state(cpu) == CpuState::Online
        });
        *self.secondary.lock() = None;

        if online {
            // The section must never release this core again.
            if let Some(park) = self.park {
                let _ = park.uninstall(cpu);
            }
            return Ok(());
        }
        self.triage_boot_failure(cpu)
    }

    /// Fast path first: a core parked by the previous kernel restarts from
    /// its park section. Everything else goes through the platform driver.
    fn release(&self, cpu: usize, ctx: &ExecutionContext) -> Result<(), BootError> {
        if let Some(park) = self.park {
            if park.release(cpu, ctx.entry).is_ok() {
                return Ok(());
            }
        }
        self.ops.release(cpu, ctx).map_err(|error| {
            crate::kerror!("CPU{}: failed to boot: {}", cpu, error);
            match error {
                super::types::PlatformError::Unsupported => BootError::Unsupported,
                super::types::PlatformError::HardwareRejected => BootError::HardwareRejected,
            }
        })
    }

    /// The core missed the deadline. Decide what it has become from the last
    /// status word it wrote.
    fn triage_boot_failure(&self, cpu: usize) -> Result<(), BootError> {
        let status = self.registry.boot_status(cpu);
        crate::kfatal!("CPU{}: failed to come online", cpu);

        match status {
            BootStatus::KillMe => {
                if self.ops.kill(cpu).is_ok() {
                    crate::kinfo!("CPU{}: died during early boot", cpu);
                    self.registry.set_state(cpu, CpuState::Dead);
                } else {
                    crate::kwarn!("CPU{}: may not have shut down cleanly", cpu);
                    self.registry.set_state(cpu, CpuState::StuckInKernel);
                }
            }
            BootStatus::StuckInKernel | BootStatus::BootSuccess => {
                // BootSuccess here means it marked itself but never went
                // online: still executing kernel text, still unusable.
                crate::kerror!("CPU{}: is stuck in kernel", cpu);
                self.registry.set_state(cpu, CpuState::StuckInKernel);
            }
            BootStatus::PanicKernel => {
                return Err(BootError::InconsistentConfiguration);
            }
            BootStatus::MmuOff => {
                // Never even reached the kernel. The slot can be retried.
                self.registry.set_state(cpu, CpuState::Present);
            }
        }
        Err(BootError::Timeout(status))
    }

    /// Read-once accessor for the secondary: the context the boot core
    /// published for it.
    pub fn take_execution_context(&self) -> Option<ExecutionContext> {
        self.secondary.lock().take()
    }

    /// Runs on the secondary itself, as the tail of its boot path. The
    /// online store is the release that ends the boot-core's poll.
    pub fn secondary_start(&self, cpu: usize) {
        self.ops.post_boot(cpu);
        self.topology.add_cpu(cpu);
        crate::kinfo!(
            "CPU{}: booted secondary processor (hwid {:#x})",
            cpu,
            self.registry.hardware_id(cpu).unwrap_or(super::types::INVALID_HWID)
        );
        self.registry.set_boot_status(cpu, BootStatus::BootSuccess);
        fence(Ordering::SeqCst);
        self.registry.set_state(cpu, CpuState::Online);
    }

    /// Runs on a secondary that discovered, mid-boot, that it cannot join.
    /// Tries to power itself off; failing that it reports itself stuck and
    /// the caller must spin it forever.
    pub fn abort_boot(&self, cpu: usize) {
        crate::kfatal!("CPU{}: will not boot", cpu);
        self.registry.set_boot_status(cpu, BootStatus::KillMe);
        if self.ops.die(cpu).is_ok() {
            return;
        }
        self.registry.set_boot_status(cpu, BootStatus::StuckInKernel);
        self.registry.set_state(cpu, CpuState::StuckInKernel);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
