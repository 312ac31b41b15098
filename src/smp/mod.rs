//! Multi-core bring-up, cross-core messaging, hot unplug, and the emergency
//! stop/park paths.
//!
//! The boot core owns a [`CpuRegistry`] describing every core the firmware
//! reported. [`init::enumerate`] fills it, [`BringupSequencer`] boots the
//! secondaries one at a time, [`IpiDispatcher`] routes cross-core messages
//! once they are up, [`HotplugCoordinator`] takes them back down cleanly,
//! and [`StopCoordinator`] handles the three ways the system takes every
//! other core out at once.
//!
//! All hardware access goes through the traits in [`platform`]; the logic
//! here is freestanding and runs identically under the host test suite.

pub mod bringup;
pub mod hotplug;
pub mod init;
pub mod ipi;
pub mod park;
pub mod platform;
pub mod poll;
pub mod registry;
pub mod stop;
pub mod types;

pub use bringup::BringupSequencer;
pub use hotplug::HotplugCoordinator;
pub use ipi::{IpiDispatcher, IpiMessage, IpiOutcome, IpiStats, NR_IPI};
pub use park::{ParkArea, ParkError, PARK_MAGIC, PARK_SECTION_SIZE};
pub use platform::{Clock, CpuOps, CrossCall, IpiHandlers, IrqMigration, Topology};
pub use poll::poll_until;
pub use registry::CpuRegistry;
pub use stop::{StopCoordinator, StopReason, StopState};
pub use types::{
    BootError, BootStatus, CpuMask, CpuState, ExecutionContext, OfflineError, PlatformError,
    RegistryError, StopError, INVALID_HWID, MAX_CPUS,
};
