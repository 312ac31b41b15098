//! Emergency stop and park coordination.
//!
//! Three reasons ever justify yanking every other core out of circulation:
//! a panic, a crash dump, and a re-exec of the kernel image. They share one
//! entry point, `stop_all_others`, and differ only in which message goes out
//! and what the initiator waits for afterwards. The initiating core never
//! stops itself.

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::config::SmpConfig;

use super::ipi::{IpiDispatcher, IpiMessage};
use super::park::ParkArea;
use super::platform::Clock;
use super::poll::poll_until;
use super::registry::CpuRegistry;
use super::types::{CpuMask, StopError};

/// Why the other cores are being taken down.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Panic path: spin the others down quietly.
    PanicStop,
    /// Crash dump: others save registers first, then halt.
    CrashDumpStop,
    /// Kernel re-exec: park the others so the next image can restart them.
    ReExecPark,
}

/// Shared flags between the initiating core and the stop/crash receivers.
/// Lives separately from the coordinator because the dispatcher needs it
/// from interrupt context.
pub struct StopState {
    crash_stopped: AtomicBool,
    crash_failed: AtomicBool,
    waiting: AtomicUsize,
    re_exec_pending: AtomicBool,
}

impl StopState {
    pub const fn new() -> Self {
        Self {
            crash_stopped: AtomicBool::new(false),
            crash_failed: AtomicBool::new(false),
            waiting: AtomicUsize::new(0),
            re_exec_pending: AtomicBool::new(false),
        }
    }

    /// First crash-stop initiator wins; later calls (and the panic path
    /// re-entering after a crash) must not send a second round of IPIs.
    fn claim_crash_stop(&self) -> bool {
        self.crash_stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn crash_stop_in_progress(&self) -> bool {
        self.crash_stopped.load(Ordering::Acquire)
    }

    pub fn begin_crash_wait(&self, cores: usize) {
        self.waiting.store(cores, Ordering::Release);
    }

    /// Called by each crash-stop receiver once its registers are saved.
    pub fn crash_arrived(&self) {
        // Saturating: a straggler arriving after the initiator gave up must
        // not wrap the counter.
        let _ = self
            .waiting
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |waiting| {
                waiting.checked_sub(1)
            });
    }

    pub fn crash_waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    /// Whether some core failed to acknowledge the crash stop. The crash
    /// dump machinery consults this before trusting the captured state.
    pub fn crash_stop_failed(&self) -> bool {
        self.crash_failed.load(Ordering::Acquire)
    }

    fn mark_crash_failed(&self) {
        self.crash_failed.store(true, Ordering::Release);
    }

    pub fn set_re_exec_pending(&self) {
        self.re_exec_pending.store(true, Ordering::Release);
    }

    pub fn re_exec_pending(&self) -> bool {
        self.re_exec_pending.load(Ordering::Acquire)
    }
}

impl Default for StopState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct StopCoordinator<'a> {
    registry: &'a CpuRegistry,
    dispatcher: &'a IpiDispatcher<'a>,
    state: &'a StopState,
    park: Option<&'a ParkArea>,
    clock: &'a dyn Clock,
    config: SmpConfig,
}

impl<'a> StopCoordinator<'a> {
    pub fn new(
        registry: &'a CpuRegistry,
        dispatcher: &'a IpiDispatcher<'a>,
        state: &'a StopState,
        park: Option<&'a ParkArea>,
        clock: &'a dyn Clock,
        config: SmpConfig,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            state,
            park,
            clock,
            config,
        }
    }

    /// Take every other online core out of circulation. Best effort: a core
    /// that never acknowledges is logged and left behind, never waited on
    /// forever.
    pub fn stop_all_others(&self, reason: StopReason) -> Result<(), StopError> {
        match reason {
            StopReason::PanicStop => {
                self.panic_stop();
                Ok(())
            }
            StopReason::CrashDumpStop => {
                self.crash_stop();
                Ok(())
            }
            StopReason::ReExecPark => self.re_exec_park(),
        }
    }

    fn others(&self) -> CpuMask {
        let mut mask = self.registry.online_mask();
        mask.clear(self.dispatcher.current_cpu());
        mask
    }

    fn num_other_online(&self) -> usize {
        self.others().count()
    }

    fn panic_stop(&self) {
        // A crash stop already quiesced the others; a second round of stop
        // IPIs would hit halted cores.
        if self.state.crash_stop_in_progress() {
            return;
        }
        let targets = self.others();
        if targets.is_empty() {
            return;
        }
        crate::kfatal!("SMP: stopping secondary CPUs");
        self.dispatcher.send(targets, IpiMessage::Stop);

        let stopped = poll_until(self.clock, self.config.stop_timeout_us(), || {
            self.num_other_online() == 0
        });
        if !stopped {
            crate::kwarn!("SMP: failed to stop secondary CPUs {}", self.others());
        }
    }

    fn crash_stop(&self) {
        if !self.state.claim_crash_stop() {
            return;
        }
        let targets = self.others();
        if targets.is_empty() {
            return;
        }
        self.state.begin_crash_wait(targets.count());
        crate::kfatal!("SMP: stopping secondary CPUs for crash dump");
        self.dispatcher.send(targets, IpiMessage::CrashStop);

        let acknowledged = poll_until(self.clock, self.config.stop_timeout_us(), || {
            self.state.crash_waiting() == 0
        });
        if !acknowledged {
            self.state.mark_crash_failed();
            crate::kwarn!(
                "SMP: failed to stop secondary CPUs for crash dump {}",
                self.others()
            );
        }
    }

    /// Park every other online core ahead of a kernel re-exec. The pending
    /// flag is published before any IPI so every receiver observes it.
    fn re_exec_park(&self) -> Result<(), StopError> {
        let park = self.park.ok_or(StopError::Unsupported)?;
        self.state.set_re_exec_pending();

        let targets = self.others();
        for cpu in targets.iter() {
            if park.install(cpu).is_err() {
                crate::kerror!("CPU{}: no park section, cannot park for re-exec", cpu);
            }
        }
        self.dispatcher.send(targets, IpiMessage::Stop);

        let mut parked = 0usize;
        for cpu in targets.iter() {
            if park.wait_for_confirmation(cpu, self.clock, self.config.park_timeout_us()) {
                parked += 1;
            }
        }
        crate::kinfo!("SMP: parked {} of {} secondary CPUs", parked, targets.count());
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
