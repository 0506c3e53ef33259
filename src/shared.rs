// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The request and parameter pages shared with the trusted OS, and how they are made known to it.

use crate::{
    error::OteError,
    platform::Platform,
    protocol::{OperParam, PAGE_SIZE, PageList, SharedPages, TeRequest},
    smccc::{SUCCESS, TE_SMC_FEATURES, TE_SMC_REGISTER_REQ_BUF, TE_SMC_SHARE_BUFFERS},
};
use alloc::{boxed::Box, vec::Vec};
use core::{ops::Range, ptr};
use log::{info, warn};
use zerocopy::FromZeros;

/// How the shared pages were made known to the trusted OS.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShareMode {
    /// Both pages were registered as one buffer by virtual address.
    Registered,
    /// The request page, parameter page and page list were shared by physical address.
    Fallback,
}

/// The buffers shared with the trusted OS for the lifetime of the driver.
pub struct SharedBuffer {
    pages: Box<SharedPages>,
    /// Only allocated in fallback mode.
    page_list: Option<Box<PageList>>,
    mode: ShareMode,
}

impl SharedBuffer {
    /// Allocates the shared pages and registers them with the trusted OS.
    ///
    /// Registration by virtual address is used if the trusted OS supports it, otherwise the pages
    /// are shared by physical address, which must then fit in `P::SECURE_ADDRESS_BITS`.
    pub fn setup<P: Platform>(platform: &P) -> Result<Self, OteError> {
        let pages = SharedPages::new_box_zeroed().map_err(|_| OteError::OutOfMemory)?;
        let mut shared = Self {
            pages,
            page_list: None,
            mode: ShareMode::Registered,
        };

        let supported =
            platform.secure_call(TE_SMC_FEATURES, [TE_SMC_REGISTER_REQ_BUF.0.into(), 0, 0]);
        if supported == SUCCESS {
            let status = platform.secure_call(
                TE_SMC_REGISTER_REQ_BUF,
                [shared.addr() as u64, size_of::<SharedPages>() as u64, 0],
            );
            if status != SUCCESS {
                return Err(OteError::SecureCall {
                    call: TE_SMC_REGISTER_REQ_BUF,
                    status,
                });
            }
            info!("Registered request buffer at {:#x}", shared.addr());
            return Ok(shared);
        }

        warn!("Request buffer registration not supported, sharing by physical address");
        let page_list = PageList::new_box_zeroed().map_err(|_| OteError::OutOfMemory)?;
        let requests = checked_phys(
            platform,
            ptr::from_ref(&shared.pages.requests) as usize,
            PAGE_SIZE,
        )?;
        let params = checked_phys(
            platform,
            ptr::from_ref(&shared.pages.params) as usize,
            PAGE_SIZE,
        )?;
        let list = checked_phys(
            platform,
            ptr::from_ref::<PageList>(&page_list) as usize,
            size_of::<PageList>(),
        )?;
        let status = platform.secure_call(TE_SMC_SHARE_BUFFERS, [requests, params, list]);
        if status != SUCCESS {
            return Err(OteError::SecureCall {
                call: TE_SMC_SHARE_BUFFERS,
                status,
            });
        }
        info!("Shared request buffers at {requests:#x}, {params:#x}, {list:#x}");
        shared.page_list = Some(page_list);
        shared.mode = ShareMode::Fallback;
        Ok(shared)
    }

    /// Returns how the buffers were shared.
    pub fn mode(&self) -> ShareMode {
        self.mode
    }

    /// Returns the virtual address of the request page, which the parameter page follows.
    pub fn addr(&self) -> usize {
        ptr::from_ref::<SharedPages>(&self.pages) as usize
    }

    /// Returns the request record in the given slot for filling in.
    pub fn request_mut(&mut self, slot: usize) -> &mut TeRequest {
        &mut self.pages.requests.slots[slot]
    }

    /// Reads back the request record in the given slot after a call.
    pub fn read_request(&self, slot: usize) -> TeRequest {
        // SAFETY: The record is valid and aligned as it is part of the page we own. The trusted OS
        // may have written it during the last call, so the compiler must not assume it unchanged.
        unsafe { ptr::read_volatile(&raw const self.pages.requests.slots[slot]) }
    }

    /// Reads back the given parameter slots after a call.
    pub fn read_params(&self, slots: Range<usize>) -> Vec<OperParam> {
        self.pages.params.slots[slots]
            .iter()
            .map(|slot| {
                // SAFETY: Each slot is a valid, aligned record in the page we own, which the
                // trusted OS may have written during the last call.
                unsafe { ptr::read_volatile(slot) }
            })
            .collect()
    }

    /// Returns the parameter slots and, in fallback mode, the matching page list entries.
    pub fn params_and_page_list_mut(
        &mut self,
        slots: Range<usize>,
    ) -> (&mut [OperParam], Option<&mut [u64]>) {
        let page_list = self
            .page_list
            .as_deref_mut()
            .map(|list| &mut list.entries[slots.clone()]);
        (&mut self.pages.params.slots[slots], page_list)
    }
}

/// Translates `va` and checks that the `len` bytes there are addressable by the trusted OS.
pub(crate) fn checked_phys<P: Platform>(
    platform: &P,
    va: usize,
    len: usize,
) -> Result<u64, OteError> {
    let pa = platform.virt_to_phys(va);
    // A width of 64 bits leaves no limit beyond overflow.
    let limit = 1u64.checked_shl(P::SECURE_ADDRESS_BITS).unwrap_or(0);
    match pa.checked_add(len as u64) {
        Some(end) if limit == 0 || end <= limit => Ok(pa),
        _ => Err(OteError::AddressOutOfRange(pa)),
    }
}
