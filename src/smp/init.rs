//! Boot-time enumeration and the bring-them-all-up orchestration.
//!
//! Runs once, on the boot core, before any secondary executes. Firmware
//! hands over a table of hardware ids; we validate it, assign logical
//! indices, and let the platform prepare each core. Individual bad entries
//! cost that entry only, never the boot.

use super::bringup::BringupSequencer;
use super::platform::CpuOps;
use super::registry::CpuRegistry;
use super::types::{BootError, CpuState, ExecutionContext, INVALID_HWID, MAX_CPUS};

/// Populate `registry` from the firmware table. The boot core's hardware id
/// is already seeded at index 0; its table entry (there must be one) is
/// skipped rather than re-registered. Returns the number of usable cores.
pub fn enumerate(registry: &CpuRegistry, ops: &dyn CpuOps, hwids: &[u64]) -> usize {
    let boot_hwid = match registry.hardware_id(0) {
        Some(hwid) => hwid,
        None => return 0,
    };

    // The table must mention the core we are running on. A table that does
    // not describe reality is not trusted for anything else.
    if !hwids.contains(&boot_hwid) {
        crate::kerror!(
            "missing boot CPU hwid {:#x} in firmware table, ignoring secondaries",
            boot_hwid
        );
        return 1;
    }

    let mut next_index = 1;
    let mut bootcpu_seen = false;
    for &hwid in hwids {
        if hwid == INVALID_HWID {
            crate::kwarn!("skipping invalid hwid entry");
            continue;
        }
        if hwid == boot_hwid {
            if bootcpu_seen {
                crate::kerror!("duplicate boot CPU hwid {:#x} in firmware table", hwid);
            }
            bootcpu_seen = true;
            continue;
        }
        if next_index >= MAX_CPUS {
            crate::kwarn!("more than {} CPUs in firmware table, clipping", MAX_CPUS);
            break;
        }
        match registry.register(next_index, hwid) {
            Ok(()) => {}
            Err(error) => {
                crate::kerror!("hwid {:#x} rejected: {}", hwid, error);
                continue;
            }
        }
        // The slot is consumed even if preparation fails, so logical
        // indices stay stable across reboots with the same table.
        if ops.prepare(next_index).is_ok() {
            registry.set_state(next_index, CpuState::Present);
        } else {
            crate::kwarn!("CPU{}: no boot method, leaving as possible", next_index);
        }
        next_index += 1;
    }

    registry.count_present()
}

/// Boot every present secondary. Per-core failures are logged and charged
/// to that core alone, with one exception: a core that came up with a
/// configuration the running system cannot tolerate aborts the whole
/// sequence, and the caller must halt. Returns the number of cores online.
pub fn bring_up_all(
    sequencer: &BringupSequencer<'_>,
    registry: &CpuRegistry,
    mut make_context: impl FnMut(usize) -> ExecutionContext,
) -> Result<usize, BootError> {
    for cpu in 1..MAX_CPUS {
        if registry.state(cpu) != CpuState::Present {
            continue;
        }
        match sequencer.bring_up(cpu, make_context(cpu)) {
            Ok(()) => {}
            Err(BootError::InconsistentConfiguration) => {
                crate::kfatal!("CPU{}: incompatible configuration, cannot continue", cpu);
                return Err(BootError::InconsistentConfiguration);
            }
            Err(error) => {
                crate::kerror!("CPU{}: failed to boot: {}", cpu, error);
            }
        }
    }
    let online = registry.count_online();
    crate::kinfo!("SMP: Total of {} processors activated", online);
    Ok(online)
}

// ===========================================================================
// Tests
// ===========================================================================
