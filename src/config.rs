//! SMP tunables.
//!
//! Reference values match the hardware defaults: 5 s for a secondary core to
//! come online, 1 s for emergency stop/park rendezvous, 5 s for a hotplugged
//! core to report death. All of them can be overridden from the kernel
//! command line (`smp.boot_timeout_ms=` and friends).

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SmpConfig {
    /// How long `bring_up` waits for the secondary to self-report online.
    pub boot_timeout_ms: u64,
    /// Bound on the emergency stop rendezvous (panic and crash-dump paths).
    pub stop_timeout_ms: u64,
    /// Per-core bound on park confirmation during re-exec.
    pub park_timeout_ms: u64,
    /// How long `wait_for_death` waits by default.
    pub death_timeout_ms: u64,
}

impl Default for SmpConfig {
    fn default() -> Self {
        Self {
            boot_timeout_ms: 5000,
            stop_timeout_ms: 1000,
            park_timeout_ms: 1000,
            death_timeout_ms: 5000,
        }
    }
}

impl SmpConfig {
    /// Apply `smp.*_timeout_ms=` directives from the kernel command line.
    /// Unknown or malformed values are ignored.
    pub fn apply_cmdline(&mut self, cmdline: &str) {
        for arg in cmdline.split_whitespace() {
            if let Some(value) = arg.strip_prefix("smp.boot_timeout_ms=") {
                if let Ok(ms) = value.parse() {
                    self.boot_timeout_ms = ms;
                }
            } else if let Some(value) = arg.strip_prefix("smp.stop_timeout_ms=") {
                if let Ok(ms) = value.parse() {
                    self.stop_timeout_ms = ms;
                }
            } else if let Some(value) = arg.strip_prefix("smp.park_timeout_ms=") {
                if let Ok(ms) = value.parse() {
                    self.park_timeout_ms = ms;
                }
            } else if let Some(value) = arg.strip_prefix("smp.death_timeout_ms=") {
                if let Ok(ms) = value.parse() {
                    self.death_timeout_ms = ms;
                }
            }
        }
    }

    pub const fn boot_timeout_us(&self) -> u64 {
        self.boot_timeout_ms * 1000
    }

    pub const fn stop_timeout_us(&self) -> u64 {
        self.stop_timeout_ms * 1000
    }

    pub const fn park_timeout_us(&self) -> u64 {
        self.park_timeout_ms * 1000
    }

    pub const fn death_timeout_us(&self) -> u64 {
        self.death_timeout_ms * 1000
    }
}

// ===========================================================================
// Tests
// ===========================================================================
