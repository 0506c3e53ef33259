// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Tegra platforms, where the trusted OS is reached through the secure monitor.

use super::Platform;
use crate::{config::DriverConfig, device::OteDevice, error::OteError, smccc::FunctionId};
use smccc::smc64;
use spin::Once;

static OTE: Once<OteDevice<Tegra>> = Once::new();

/// Issues calls with the `smc` instruction.
pub struct Tegra {
    translate: fn(usize) -> u64,
}

impl Tegra {
    /// Creates the platform, given the kernel's virtual to physical address translation.
    pub const fn new(translate: fn(usize) -> u64) -> Self {
        Self { translate }
    }
}

impl Platform for Tegra {
    fn secure_call(&self, function: FunctionId, args: [u64; 3]) -> u32 {
        let mut regs = [0; 17];
        regs[..args.len()].copy_from_slice(&args);
        smc64(function.0, regs)[0] as u32
    }

    fn virt_to_phys(&self, va: usize) -> u64 {
        (self.translate)(va)
    }
}

/// Probes the driver, if that hasn't already been done, and returns it.
///
/// If probing fails it will be retried on the next call.
pub fn init(
    translate: fn(usize) -> u64,
    config: &DriverConfig,
) -> Result<&'static OteDevice<Tegra>, OteError> {
    OTE.try_call_once(|| OteDevice::probe(Tegra::new(translate), config))
}

/// Returns the driver, if it has been probed.
pub fn device() -> Option<&'static OteDevice<Tegra>> {
    OTE.get()
}
