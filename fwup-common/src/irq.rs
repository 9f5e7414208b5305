// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Nesting interrupt lock.
//!
//! Flash command execution is non-reentrant, so every launch runs with
//! interrupts masked. The lock counts depth: interrupts are disabled on the
//! first acquisition and re-enabled only when the outermost holder releases.

use core::ops::{Deref, DerefMut};

/// Global interrupt enable/disable, injected into the flash driver.
pub trait InterruptControl {
    fn disable(&mut self);
    fn enable(&mut self);
}

/// No interrupts to mask (host tools, simulation).
#[derive(Clone, Copy, Debug, Default)]
pub struct NoInterrupts;

impl InterruptControl for NoInterrupts {
    fn disable(&mut self) {}
    fn enable(&mut self) {}
}

/// PRIMASK-based control for Cortex-M targets.
#[cfg(feature = "embedded")]
#[derive(Clone, Copy, Debug, Default)]
pub struct CortexM;

#[cfg(feature = "embedded")]
impl InterruptControl for CortexM {
    fn disable(&mut self) {
        cortex_m::interrupt::disable();
    }

    fn enable(&mut self) {
        // SAFETY: only reached when the outermost lock holder releases.
        unsafe { cortex_m::interrupt::enable() }
    }
}

/// Depth-counted interrupt lock.
#[derive(Debug, Default)]
pub struct IrqLock<I> {
    ctrl: I,
    depth: u32,
}

impl<I: InterruptControl> IrqLock<I> {
    pub const fn new(ctrl: I) -> Self {
        Self { ctrl, depth: 0 }
    }

    pub fn acquire(&mut self) {
        if self.depth == 0 {
            self.ctrl.disable();
        }
        self.depth += 1;
    }

    pub fn release(&mut self) {
        match self.depth {
            0 => {}
            1 => {
                self.depth = 0;
                self.ctrl.enable();
            }
            _ => self.depth -= 1,
        }
    }

    /// Acquire the lock for the lifetime of the returned guard.
    pub fn lock(&mut self) -> IrqGuard<'_, I> {
        self.acquire();
        IrqGuard { lock: self }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn control(&self) -> &I {
        &self.ctrl
    }
}

/// Scoped lock acquisition; releases on drop. Derefs to the lock so nested
/// acquisitions can be taken through it.
pub struct IrqGuard<'a, I: InterruptControl> {
    lock: &'a mut IrqLock<I>,
}

impl<I: InterruptControl> Deref for IrqGuard<'_, I> {
    type Target = IrqLock<I>;

    fn deref(&self) -> &IrqLock<I> {
        self.lock
    }
}

impl<I: InterruptControl> DerefMut for IrqGuard<'_, I> {
    fn deref_mut(&mut self) -> &mut IrqLock<I> {
        self.lock
    }
}

impl<I: InterruptControl> Drop for IrqGuard<'_, I> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
