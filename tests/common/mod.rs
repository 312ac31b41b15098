//! Shared mock machine for the integration tests: a real clock, a cross-call
//! channel backed by per-core message queues, and a scripted boot driver.
//! Secondary cores are host threads driving the same public API the kernel
//! would.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use smpcore::smp::{
    Clock, CpuMask, CpuOps, CrossCall, ExecutionContext, IpiHandlers, IpiMessage, IrqMigration,
    PlatformError, Topology, MAX_CPUS,
};

pub struct NullTopology;

impl Topology for NullTopology {}

pub struct NullIrqMigration;

impl IrqMigration for NullIrqMigration {}

pub struct TestClock(Instant);

impl TestClock {
    pub fn new() -> Self {
        Self(Instant::now())
    }
}

impl Clock for TestClock {
    fn now_us(&self) -> u64 {
        self.0.elapsed().as_micros() as u64
    }

    fn relax(&self) {
        std::thread::yield_now();
    }
}

/// Cross-call primitive: one message queue per core. Worker threads drain
/// their own queue and feed the dispatcher, exactly as interrupt glue would.
pub struct MockChannel {
    queues: [Mutex<VecDeque<IpiMessage>>; MAX_CPUS],
    current: AtomicUsize,
}

impl MockChannel {
    pub fn new() -> Self {
        Self {
            queues: std::array::from_fn(|_| Mutex::new(VecDeque::new())),
            current: AtomicUsize::new(0),
        }
    }

    pub fn poll(&self, cpu: usize) -> Option<IpiMessage> {
        self.queues[cpu].lock().unwrap().pop_front()
    }

    pub fn set_current_cpu(&self, cpu: usize) {
        self.current.store(cpu, Ordering::Relaxed);
    }
}

impl CrossCall for MockChannel {
    fn deliver(&self, mask: CpuMask, message: IpiMessage) {
        for cpu in mask.iter() {
            self.queues[cpu].lock().unwrap().push_back(message);
        }
    }

    fn current_cpu(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }
}

/// Boot driver whose `release` just raises a flag the mock core thread is
/// waiting on. Clean shutdown is supported but `die` returns, so the dying
/// thread keeps control and can exit by itself.
pub struct MockCpuOps {
    pub released: [AtomicBool; MAX_CPUS],
    pub kills: AtomicUsize,
}

impl MockCpuOps {
    pub fn new() -> Self {
        Self {
            released: std::array::from_fn(|_| AtomicBool::new(false)),
            kills: AtomicUsize::new(0),
        }
    }

    pub fn wait_for_release(&self, cpu: usize) {
        while !self.released[cpu].load(Ordering::Acquire) {
            std::thread::yield_now();
        }
    }
}

impl CpuOps for MockCpuOps {
    fn prepare(&self, _cpu: usize) -> Result<(), PlatformError> {
        Ok(())
    }

    fn release(&self, cpu: usize, _ctx: &ExecutionContext) -> Result<(), PlatformError> {
        self.released[cpu].store(true, Ordering::Release);
        Ok(())
    }

    fn can_die(&self, _cpu: usize) -> bool {
        true
    }

    fn die(&self, _cpu: usize) -> Result<(), PlatformError> {
        // Host threads cannot power off; the caller exits on its own.
        Err(PlatformError::Unsupported)
    }

    fn kill(&self, _cpu: usize) -> Result<(), PlatformError> {
        self.kills.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Message consumers that only count.
pub struct RecordingHandlers {
    pub resched: AtomicUsize,
    pub calls: AtomicUsize,
    pub crash_regs: AtomicUsize,
    pub backtraces: AtomicUsize,
    pub irqs_disabled: AtomicBool,
}

impl RecordingHandlers {
    pub fn new() -> Self {
        Self {
            resched: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            crash_regs: AtomicUsize::new(0),
            backtraces: AtomicUsize::new(0),
            irqs_disabled: AtomicBool::new(false),
        }
    }
}

impl IpiHandlers for RecordingHandlers {
    fn scheduler_ipi(&self, _cpu: usize) {
        self.resched.fetch_add(1, Ordering::Relaxed);
    }

    fn call_function(&self, _cpu: usize) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    fn tick_broadcast(&self, _cpu: usize) {}

    fn irq_work(&self, _cpu: usize) {}

    fn save_crash_regs(&self, _cpu: usize) {
        self.crash_regs.fetch_add(1, Ordering::Relaxed);
    }

    fn capture_backtrace(&self, _cpu: usize) {
        self.backtraces.fetch_add(1, Ordering::Relaxed);
    }

    fn mask_local_irqs(&self, _cpu: usize) {}

    fn local_irqs_disabled(&self, _cpu: usize) -> bool {
        self.irqs_disabled.load(Ordering::Relaxed)
    }
}

pub fn boot_context(cpu: usize) -> ExecutionContext {
    ExecutionContext {
        entry: 0xffff_0000_0008_0000 + (cpu as u64) * 0x1000,
        stack_top: 0xffff_8000_0010_0000 + (cpu as u64) * 0x4000,
        task: cpu as u64,
    }
}
