//! Cross-core interrupt dispatch.
//!
//! Eight message types cover everything one core ever asks of another, from
//! routine scheduling kicks to the emergency stop used on panic. The sender
//! side is a thin wrapper over the interrupt controller's cross-call; the
//! receiver side is `on_receive`, which consumes a message on the target core
//! and tells the caller what the core must do next.

use core::sync::atomic::{AtomicU64, Ordering};

use super::park::ParkArea;
use super::platform::{CpuOps, CrossCall, IpiHandlers};
use super::registry::CpuRegistry;
use super::stop::StopState;
use super::types::{CpuMask, CpuState, MAX_CPUS};

/// Number of distinct IPI message types.
pub const NR_IPI: usize = 8;

/// Cross-core message vocabulary. Fixed at eight; anything more elaborate
/// rides on `CallFunction`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IpiMessage {
    Reschedule,
    CallFunction,
    Stop,
    CrashStop,
    TimerBroadcast,
    IrqWork,
    Wakeup,
    Backtrace,
}

impl IpiMessage {
    pub const ALL: [IpiMessage; NR_IPI] = [
        IpiMessage::Reschedule,
        IpiMessage::CallFunction,
        IpiMessage::Stop,
        IpiMessage::CrashStop,
        IpiMessage::TimerBroadcast,
        IpiMessage::IrqWork,
        IpiMessage::Wakeup,
        IpiMessage::Backtrace,
    ];

    pub fn index(self) -> usize {
        match self {
            IpiMessage::Reschedule => 0,
            IpiMessage::CallFunction => 1,
            IpiMessage::Stop => 2,
            IpiMessage::CrashStop => 3,
            IpiMessage::TimerBroadcast => 4,
            IpiMessage::IrqWork => 5,
            IpiMessage::Wakeup => 6,
            IpiMessage::Backtrace => 7,
        }
    }

    /// Diagnostic label, as shown by the per-core counter dump.
    pub fn name(self) -> &'static str {
        match self {
            IpiMessage::Reschedule => "Rescheduling interrupts",
            IpiMessage::CallFunction => "Function call interrupts",
            IpiMessage::Stop => "CPU stop interrupts",
            IpiMessage::CrashStop => "CPU stop (for crash dump) interrupts",
            IpiMessage::TimerBroadcast => "Timer broadcast interrupts",
            IpiMessage::IrqWork => "IRQ work interrupts",
            IpiMessage::Wakeup => "CPU wake-up interrupts",
            IpiMessage::Backtrace => "backtrace interrupts",
        }
    }
}

/// Per-core, per-message delivery counters.
pub struct IpiStats {
    counts: [[AtomicU64; NR_IPI]; MAX_CPUS],
}

impl IpiStats {
    pub fn new() -> Self {
        Self {
            counts: core::array::from_fn(|_| core::array::from_fn(|_| AtomicU64::new(0))),
        }
    }

    fn record(&self, cpu: usize, message: IpiMessage) {
        self.counts[cpu][message.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self, cpu: usize, message: IpiMessage) -> u64 {
        self.counts[cpu][message.index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, cpu: usize) -> [u64; NR_IPI] {
        core::array::from_fn(|slot| self.counts[cpu][slot].load(Ordering::Relaxed))
    }
}

impl Default for IpiStats {
    fn default() -> Self {
        Self::new()
    }
}

/// What the receiving core must do after a message is consumed. Terminal
/// control flow (quiescing, parking, halting) belongs to the arch glue that
/// called `on_receive`, not to the dispatch logic itself.
#[must_use]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IpiOutcome {
    /// Return from the interrupt and keep running.
    Resume,
    /// Spin quietly with interrupts masked, forever.
    Quiesce,
    /// Enter the park loop and wait for a resume address.
    Park,
    /// The core has been shut down (or must halt in place).
    Halted,
}

/// Routing table between the cross-call primitive and the message consumers.
pub struct IpiDispatcher<'a> {
    registry: &'a CpuRegistry,
    channel: &'a dyn CrossCall,
    ops: &'a dyn CpuOps,
    handlers: &'a dyn IpiHandlers,
    stop: &'a StopState,
    park: Option<&'a ParkArea>,
    stats: IpiStats,
}

impl<'a> IpiDispatcher<'a> {
    pub fn new(
        registry: &'a CpuRegistry,
        channel: &'a dyn CrossCall,
        ops: &'a dyn CpuOps,
        handlers: &'a dyn IpiHandlers,
        stop: &'a StopState,
        park: Option<&'a ParkArea>,
    ) -> Self {
        Self {
            registry,
            channel,
            ops,
            handlers,
            stop,
            park,
            stats: IpiStats::new(),
        }
    }

    pub fn current_cpu(&self) -> usize {
        self.channel.current_cpu()
    }

    /// Raise `message` towards every core in `mask`.
    pub fn send(&self, mask: CpuMask, message: IpiMessage) {
        if mask.is_empty() {
            return;
        }
        crate::ktrace!("IPI {:?} -> {}", message, mask);
        self.channel.deliver(mask, message);
    }

    /// Consume one message on the receiving core. Counted first, so even a
    /// message that halts the core shows up in the stats.
    pub fn on_receive(&self, cpu: usize, message: IpiMessage) -> IpiOutcome {
        self.stats.record(cpu, message);
        match message {
            IpiMessage::Reschedule => {
                self.handlers.scheduler_ipi(cpu);
                IpiOutcome::Resume
            }
            IpiMessage::CallFunction => {
                self.handlers.call_function(cpu);
                IpiOutcome::Resume
            }
            IpiMessage::Stop => self.handle_stop(cpu),
            IpiMessage::CrashStop => self.handle_crash_stop(cpu),
            IpiMessage::TimerBroadcast => {
                self.handlers.tick_broadcast(cpu);
                IpiOutcome::Resume
            }
            IpiMessage::IrqWork => {
                self.handlers.irq_work(cpu);
                IpiOutcome::Resume
            }
            IpiMessage::Wakeup => {
                if !self.handlers.wakeup_expected(cpu) {
                    crate::kwarn!("CPU{}: wake-up IPI arrived with no pending wake request", cpu);
                }
                IpiOutcome::Resume
            }
            IpiMessage::Backtrace => {
                self.handlers.capture_backtrace(cpu);
                IpiOutcome::Resume
            }
        }
    }

    /// Ordinary stop, also reused for re-exec parking: when a re-exec is
    /// pending and a park section exists the core parks instead of spinning,
    /// so the next kernel can restart it without a hardware boot. Either way
    /// the core leaves the online set before this returns.
    fn handle_stop(&self, cpu: usize) -> IpiOutcome {
        self.handlers.mask_local_irqs(cpu);
        self.registry.set_state(cpu, CpuState::Parked);
        if self.stop.re_exec_pending() && self.park.is_some() {
            return IpiOutcome::Park;
        }
        IpiOutcome::Quiesce
    }

    /// Crash-dump stop: save registers first, while the machine state is
    /// still worth dumping, then acknowledge and try the clean shutdown
    /// path. A core stopped for a crash never parks.
    fn handle_crash_stop(&self, cpu: usize) -> IpiOutcome {
        self.handlers.save_crash_regs(cpu);
        self.handlers.mask_local_irqs(cpu);
        self.registry.set_state(cpu, CpuState::Dead);
        self.stop.crash_arrived();
        let _ = self.ops.die(cpu);
        IpiOutcome::Halted
    }

    /// Request call-stack snapshots from `mask`. If the caller is in the
    /// mask with interrupts masked, its own snapshot is taken synchronously;
    /// an IPI to self would never be delivered.
    pub fn trigger_backtrace(&self, mask: CpuMask) {
        let mut remote = mask;
        let this_cpu = self.channel.current_cpu();
        if remote.contains(this_cpu) && self.handlers.local_irqs_disabled(this_cpu) {
            self.stats.record(this_cpu, IpiMessage::Backtrace);
            self.handlers.capture_backtrace(this_cpu);
            remote.clear(this_cpu);
        }
        self.send(remote, IpiMessage::Backtrace);
    }

    pub fn stats(&self) -> &IpiStats {
        &self.stats
    }

    /// Dump per-core delivery counters for every message type.
    pub fn log_ipi_counts(&self) {
        for message in IpiMessage::ALL {
            for cpu in 0..MAX_CPUS {
                let count = self.stats.count(cpu, message);
                if count != 0 {
                    crate::kinfo!("CPU{}: {}: {}", cpu, message.name(), count);
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::park::PARK_SECTION_SIZE;
    use core::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Mutex;

    #[derive(Default)]
    struct NullChannel {
        sent: Mutex<Vec<(CpuMask, IpiMessage)>>,
        cpu: AtomicUsize,
    }

    impl CrossCall for NullChannel {
        fn deliver(&self, mask: CpuMask, message: IpiMessage) {
            self.sent.lock().unwrap().push((mask, message));
        }

        fn current_cpu(&self) -> usize {
            self.cpu.load(Ordering::Relaxed)
        }
    }

    #[derive(Default)]
    struct CountingHandlers {
        resched: AtomicUsize,
        calls: AtomicUsize,
        ticks: AtomicUsize,
        irq_work: AtomicUsize,
        crash_regs: AtomicUsize,
        backtraces: AtomicUsize,
        irqs_masked: AtomicBool,
        wakeup_ok: AtomicBool,
    }

    impl IpiHandlers for CountingHandlers {
        fn scheduler_ipi(&self, _cpu: usize) {
            self.resched.fetch_add(1, Ordering::Relaxed);
        }
        fn call_function(&self, _cpu: usize) {
            self.calls.fetch_add(1, Ordering::Relaxed);
        }
        fn tick_broadcast(&self, _cpu: usize) {
            self.ticks.fetch_add(1, Ordering::Relaxed);
        }
        fn irq_work(&self, _cpu: usize) {
            self.irq_work.fetch_add(1, Ordering::Relaxed);
        }
        fn save_crash_regs(&self, _cpu: usize) {
            self.crash_regs.fetch_add(1, Ordering::Relaxed);
        }
        fn capture_backtrace(&self, _cpu: usize) {
            self.backtraces.fetch_add(1, Ordering::Relaxed);
        }
        fn wakeup_expected(&self, _cpu: usize) -> bool {
            self.wakeup_ok.load(Ordering::Relaxed)
        }
        fn mask_local_irqs(&self, _cpu: usize) {
            self.irqs_masked.store(true, Ordering::Relaxed);
        }
        fn local_irqs_disabled(&self, _cpu: usize) -> bool {
            self.irqs_masked.load(Ordering::Relaxed)
        }
    }

    struct NullOps {
        died: AtomicUsize,
    }

    impl NullOps {
        fn new() -> Self {
            Self {
                died: AtomicUsize::new(0),
            }
        }
    }

    impl CpuOps for NullOps {
        fn prepare(&self, _cpu: usize) -> Result<(), super::super::types::PlatformError> {
            Ok(())
        }
        fn release(
            &self,
            _cpu: usize,
            _ctx: &super::super::types::ExecutionContext,
        ) -> Result<(), super::super::types::PlatformError> {
            Ok(())
        }
        fn die(&self, _cpu: usize) -> Result<(), super::super::types::PlatformError> {
            self.died.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct Rig {
        registry: CpuRegistry,
        channel: NullChannel,
        ops: NullOps,
        handlers: CountingHandlers,
        stop: StopState,
    }

    impl Rig {
        fn new() -> Self {
            let registry = CpuRegistry::new(0x0);
            registry.register(1, 0x100).unwrap();
            registry.set_state(1, CpuState::Online);
            Self {
                registry,
                channel: NullChannel::default(),
                ops: NullOps::new(),
                handlers: CountingHandlers::default(),
                stop: StopState::new(),
            }
        }

        fn dispatcher<'a>(&'a self, park: Option<&'a ParkArea>) -> IpiDispatcher<'a> {
            IpiDispatcher::new(
                &self.registry,
                &self.channel,
                &self.ops,
                &self.handlers,
                &self.stop,
                park,
            )
        }
    }

    #[test]
    fn test_routine_messages_resume() {
        let rig = Rig::new();
        let dispatcher = rig.dispatcher(None);

        assert_eq!(
            dispatcher.on_receive(1, IpiMessage::Reschedule),
            IpiOutcome::Resume
        );
        assert_eq!(
            dispatcher.on_receive(1, IpiMessage::CallFunction),
            IpiOutcome::Resume
        );
        assert_eq!(
            dispatcher.on_receive(1, IpiMessage::TimerBroadcast),
            IpiOutcome::Resume
        );
        assert_eq!(
            dispatcher.on_receive(1, IpiMessage::IrqWork),
            IpiOutcome::Resume
        );
        assert_eq!(rig.handlers.resched.load(Ordering::Relaxed), 1);
        assert_eq!(rig.handlers.calls.load(Ordering::Relaxed), 1);
        assert_eq!(rig.handlers.ticks.load(Ordering::Relaxed), 1);
        assert_eq!(rig.handlers.irq_work.load(Ordering::Relaxed), 1);
        // The core stayed online.
        assert_eq!(rig.registry.state(1), CpuState::Online);
    }

    #[test]
    fn test_counters_track_per_core_per_type() {
        let rig = Rig::new();
        let dispatcher = rig.dispatcher(None);

        let _ = dispatcher.on_receive(1, IpiMessage::Reschedule);
        let _ = dispatcher.on_receive(1, IpiMessage::Reschedule);
        let _ = dispatcher.on_receive(0, IpiMessage::CallFunction);

        assert_eq!(dispatcher.stats().count(1, IpiMessage::Reschedule), 2);
        assert_eq!(dispatcher.stats().count(0, IpiMessage::Reschedule), 0);
        assert_eq!(dispatcher.stats().count(0, IpiMessage::CallFunction), 1);
        let snap = dispatcher.stats().snapshot(1);
        assert_eq!(snap[IpiMessage::Reschedule.index()], 2);
        assert_eq!(snap.iter().sum::<u64>(), 2);
    }

    #[test]
    fn test_stop_without_pending_re_exec_quiesces() {
        let rig = Rig::new();
        let dispatcher = rig.dispatcher(None);

        assert_eq!(dispatcher.on_receive(1, IpiMessage::Stop), IpiOutcome::Quiesce);
        assert!(rig.handlers.irqs_masked.load(Ordering::Relaxed));
        assert_eq!(rig.registry.state(1), CpuState::Parked);
        assert_eq!(rig.registry.count_online(), 1);
    }

    #[test]
    fn test_stop_with_pending_re_exec_parks() {
        let rig = Rig::new();
        let mut backing = vec![0u8; PARK_SECTION_SIZE];
        let park = unsafe { ParkArea::new(backing.as_mut_ptr(), backing.len()) };
        park.install(1).unwrap();
        rig.stop.set_re_exec_pending();
        let dispatcher = rig.dispatcher(Some(&park));

        assert_eq!(dispatcher.on_receive(1, IpiMessage::Stop), IpiOutcome::Park);
        assert_eq!(rig.registry.state(1), CpuState::Parked);
    }

    #[test]
    fn test_re_exec_without_park_memory_quiesces() {
        let rig = Rig::new();
        rig.stop.set_re_exec_pending();
        let dispatcher = rig.dispatcher(None);

        assert_eq!(dispatcher.on_receive(1, IpiMessage::Stop), IpiOutcome::Quiesce);
    }

    #[test]
    fn test_crash_stop_saves_regs_and_halts() {
        let rig = Rig::new();
        rig.stop.begin_crash_wait(1);
        let dispatcher = rig.dispatcher(None);

        assert_eq!(
            dispatcher.on_receive(1, IpiMessage::CrashStop),
            IpiOutcome::Halted
        );
        assert_eq!(rig.handlers.crash_regs.load(Ordering::Relaxed), 1);
        assert_eq!(rig.registry.state(1), CpuState::Dead);
        assert_eq!(rig.stop.crash_waiting(), 0);
        assert_eq!(rig.ops.died.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_unexpected_wakeup_resumes() {
        let rig = Rig::new();
        let dispatcher = rig.dispatcher(None);
        // Not expected: logged but harmless.
        assert_eq!(dispatcher.on_receive(1, IpiMessage::Wakeup), IpiOutcome::Resume);
        rig.handlers.wakeup_ok.store(true, Ordering::Relaxed);
        assert_eq!(dispatcher.on_receive(1, IpiMessage::Wakeup), IpiOutcome::Resume);
    }

    #[test]
    fn test_send_skips_empty_mask() {
        let rig = Rig::new();
        let dispatcher = rig.dispatcher(None);
        dispatcher.send(CpuMask::empty(), IpiMessage::Reschedule);
        assert!(rig.channel.sent.lock().unwrap().is_empty());

        dispatcher.send(CpuMask::single(1), IpiMessage::Reschedule);
        assert_eq!(rig.channel.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_backtrace_self_capture_when_irqs_masked() {
        let rig = Rig::new();
        rig.handlers.irqs_masked.store(true, Ordering::Relaxed);
        let dispatcher = rig.dispatcher(None);

        let mut mask = CpuMask::single(0);
        mask.set(1);
        dispatcher.trigger_backtrace(mask);

        // Own snapshot taken synchronously, only the remote core got an IPI.
        assert_eq!(rig.handlers.backtraces.load(Ordering::Relaxed), 1);
        assert_eq!(dispatcher.stats().count(0, IpiMessage::Backtrace), 1);
        let sent = rig.channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, CpuMask::single(1));
        assert_eq!(sent[0].1, IpiMessage::Backtrace);
    }

    #[test]
    fn test_backtrace_all_remote_when_irqs_enabled() {
        let rig = Rig::new();
        let dispatcher = rig.dispatcher(None);

        let mut mask = CpuMask::single(0);
        mask.set(1);
        dispatcher.trigger_backtrace(mask);

        assert_eq!(rig.handlers.backtraces.load(Ordering::Relaxed), 0);
        let sent = rig.channel.sent.lock().unwrap();
        assert_eq!(sent[0].0, mask);
    }

    #[test]
    fn test_message_names_and_indices() {
        for (slot, message) in IpiMessage::ALL.iter().enumerate() {
            assert_eq!(message.index(), slot);
            assert!(!message.name().is_empty());
        }
    }
}
