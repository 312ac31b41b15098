//! CPU park sections.
//!
//! When a core cannot be powered off cleanly it can instead be parked: sent
//! into a tight wait loop inside a reserved physical region, from which it
//! can later be released by writing a resume address. The region survives a
//! re-exec of the kernel image, which is the whole point - a parked core is
//! strictly faster to re-boot than a full hardware boot.
//!
//! Layout per core (one section each, indexed `cpu - 1`; the boot core is
//! never parked):
//!
//! ```text
//! +0   exit:  u64   resume address, written by the releasing core
//! +8   magic: u64   PARK_MAGIC, written by the parked core on arrival
//! +16  text:  ...   the park loop itself, copied in by install()
//! ```
//!
//! This file is the subsystem's only unsafe boundary. Everything outside it
//! sees the safe `install` / `release` / `wait_for_confirmation` /
//! `uninstall` / `enter` API and never touches raw memory.

use core::fmt;
use core::sync::atomic::{fence, Ordering};

use super::platform::Clock;
use super::poll::poll_until;

/// Size of one per-core park section.
pub const PARK_SECTION_SIZE: usize = 1024;

/// Written by a parked core once it has reached the wait loop.
pub const PARK_MAGIC: u64 = 0x7061726b; // "park"

/// First word of the installed park loop text: `wfe; b .`. `release` checks
/// it before writing an exit address, so a section that was never installed
/// (or already reclaimed) cannot send a core to garbage.
const PARK_TEXT_SIGNATURE: u64 = 0xd503_205f_1400_0000;

const EXIT_OFFSET: usize = 0;
const MAGIC_OFFSET: usize = 8;
const TEXT_OFFSET: usize = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParkError {
    /// No section reserved for this core.
    OutOfRange,
    /// The section does not hold an installed park loop.
    NotInstalled,
}

impl fmt::Display for ParkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParkError::OutOfRange => f.write_str("no park section for this cpu"),
            ParkError::NotInstalled => f.write_str("park section not installed"),
        }
    }
}

/// A reserved memory range carved into per-core park sections.
pub struct ParkArea {
    base: *mut u8,
    sections: usize,
}

// The area is a set of non-overlapping per-core records; each word has a
// single writer at any point of the protocol.
unsafe impl Send for ParkArea {}
unsafe impl Sync for ParkArea {}

impl ParkArea {
    /// Wrap a reserved region.
    ///
    /// # Safety
    ///
    /// `base..base + len` must be a valid, exclusively owned, writable
    /// mapping that lives for the lifetime of the boot. Nothing else may
    /// access it while this `ParkArea` exists.
    pub unsafe fn new(base: *mut u8, len: usize) -> Self {
        Self {
            base,
            sections: len / PARK_SECTION_SIZE,
        }
    }

    /// Number of cores this area can park.
    pub fn capacity(&self) -> usize {
        self.sections
    }

    fn section(&self, cpu: usize) -> Result<*mut u8, ParkError> {
        if cpu == 0 || cpu > self.sections {
            return Err(ParkError::OutOfRange);
        }
        // Section index is cpu - 1: the boot core has no section.
        Ok(unsafe { self.base.add((cpu - 1) * PARK_SECTION_SIZE) })
    }

    fn read_word(section: *mut u8, offset: usize) -> u64 {
        unsafe { (section.add(offset) as *const u64).read_volatile() }
    }

    fn write_word(section: *mut u8, offset: usize, value: u64) {
        unsafe { (section.add(offset) as *mut u64).write_volatile(value) }
    }

    /// Prepare the section for `cpu`: clear exit and magic, copy the park
    /// loop text in. Stands in for the dcache flush the hardware needs.
    pub fn install(&self, cpu: usize) -> Result<(), ParkError> {
        let section = self.section(cpu)?;
        Self::write_word(section, EXIT_OFFSET, 0);
        Self::write_word(section, MAGIC_OFFSET, 0);
        Self::write_word(section, TEXT_OFFSET, PARK_TEXT_SIGNATURE);
        fence(Ordering::SeqCst);
        crate::kdebug!("CPU{}: park section installed", cpu);
        Ok(())
    }

    /// Release a parked core by writing its resume address. Fails when the
    /// section does not hold an installed park loop, in which case the
    /// caller must fall back to a full hardware boot.
    pub fn release(&self, cpu: usize, resume: u64) -> Result<(), ParkError> {
        let section = self.section(cpu)?;
        if Self::read_word(section, TEXT_OFFSET) != PARK_TEXT_SIGNATURE {
            return Err(ParkError::NotInstalled);
        }
        Self::write_word(section, EXIT_OFFSET, resume);
        fence(Ordering::SeqCst);
        crate::kinfo!("CPU{}: booting from parked state", cpu);
        Ok(())
    }

    /// Wait (bounded) for `cpu` to confirm it reached the park loop.
    pub fn wait_for_confirmation(&self, cpu: usize, clock: &dyn Clock, timeout_us: u64) -> bool {
        let section = match self.section(cpu) {
            Ok(section) => section,
            Err(_) => return false,
        };
        let parked = poll_until(clock, timeout_us, || {
            Self::read_word(section, MAGIC_OFFSET) == PARK_MAGIC
        });
        if parked {
            crate::kdebug!("CPU{}: park done", cpu);
        } else {
            crate::kerror!("CPU{}: park failed", cpu);
        }
        parked
    }

    /// Scrub the section after the core has been re-booted from it, so a
    /// stale exit address can never release anything again.
    pub fn uninstall(&self, cpu: usize) -> Result<(), ParkError> {
        let section = self.section(cpu)?;
        Self::write_word(section, EXIT_OFFSET, 0);
        Self::write_word(section, MAGIC_OFFSET, 0);
        Self::write_word(section, TEXT_OFFSET, 0);
        fence(Ordering::SeqCst);
        Ok(())
    }

    pub fn is_installed(&self, cpu: usize) -> bool {
        self.section(cpu)
            .map(|section| Self::read_word(section, TEXT_OFFSET) == PARK_TEXT_SIGNATURE)
            .unwrap_or(false)
    }

    /// The park loop itself, run by the core being parked. Publishes the
    /// magic marker, then waits for a resume address. This is the one
    /// deliberately unbounded wait in the subsystem: a parked core has
    /// nothing else to do until someone releases it.
    pub fn enter(&self, cpu: usize, clock: &dyn Clock) -> Result<u64, ParkError> {
        let section = self.section(cpu)?;
        if Self::read_word(section, TEXT_OFFSET) != PARK_TEXT_SIGNATURE {
            return Err(ParkError::NotInstalled);
        }
        fence(Ordering::SeqCst);
        Self::write_word(section, MAGIC_OFFSET, PARK_MAGIC);
        loop {
            let exit = Self::read_word(section, EXIT_OFFSET);
            if exit != 0 {
                return Ok(exit);
            }
            clock.relax();
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
