// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

#[cfg(target_arch = "aarch64")]
pub mod tegra;

use crate::smccc::FunctionId;

/// The hooks implemented by all platforms.
pub trait Platform {
    /// The number of physical address bits the trusted OS can address when buffers are shared by
    /// physical address.
    const SECURE_ADDRESS_BITS: u32 = 32;

    /// Traps into the secure world with the given function ID and arguments, and returns the
    /// status it reports once the call has completed.
    ///
    /// Calls are serialised by the driver; an implementation never sees two calls in flight.
    fn secure_call(&self, function: FunctionId, args: [u64; 3]) -> u32;

    /// Returns the physical address backing the given kernel virtual address.
    fn virt_to_phys(&self, va: usize) -> u64;
}
