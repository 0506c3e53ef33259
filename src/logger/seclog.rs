// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Relay of the trusted OS log.
//!
//! The trusted OS writes its log into a circular buffer shared with this driver. After every call
//! into the secure world the driver drains whatever was added and forwards it line by line through
//! the `log` facade.

use crate::{error::OteError, protocol::PAGE_SIZE};
use alloc::{boxed::Box, string::String, vec::Vec};
use core::{cmp::min, ptr};
use log::{info, warn};
use zerocopy::{FromBytes, FromZeros, KnownLayout};

/// The number of log bytes the shared page holds.
pub const LOG_BUFFER_SIZE: usize = PAGE_SIZE - 8;

/// The page shared with the trusted OS.
#[derive(FromBytes, KnownLayout)]
#[repr(C, align(4096))]
pub struct LogPage {
    /// The total number of bytes logged since the buffer was registered. Note that this may be
    /// greater than `LOG_BUFFER_SIZE`, so not all the bytes logged may still be available. Written
    /// by the trusted OS.
    pub logged_bytes_count: u32,
    /// The size of `buffer`, for the trusted OS to read.
    pub size: u32,
    /// Byte `n` of the log is stored at index `n % LOG_BUFFER_SIZE`.
    pub buffer: [u8; LOG_BUFFER_SIZE],
}

/// The reading end of the trusted OS log buffer.
pub struct SecureLog {
    page: Box<LogPage>,
    /// The value of `logged_bytes_count` at the previous drain.
    read_count: u32,
    /// Bytes of an incomplete line.
    pending: Vec<u8>,
}

impl SecureLog {
    /// Allocates an empty log page.
    pub fn new() -> Result<Self, OteError> {
        let mut page = LogPage::new_box_zeroed().map_err(|_| OteError::OutOfMemory)?;
        page.size = LOG_BUFFER_SIZE as u32;
        Ok(Self {
            page,
            read_count: 0,
            pending: Vec::new(),
        })
    }

    /// Returns the virtual address of the log page.
    pub fn addr(&self) -> usize {
        ptr::from_ref::<LogPage>(&self.page) as usize
    }

    /// Forwards every complete line logged since the last drain.
    ///
    /// If the trusted OS has logged more than a buffer-full since then, only the newest
    /// `LOG_BUFFER_SIZE` bytes are kept.
    pub fn drain(&mut self) {
        // SAFETY: The field is a valid, aligned `u32` inside the page we own. The trusted OS may
        // have written it during the last call.
        let written = unsafe { ptr::read_volatile(&raw const self.page.logged_bytes_count) };
        let mut available = written.wrapping_sub(self.read_count) as usize;
        if available == 0 {
            return;
        }
        if available > LOG_BUFFER_SIZE {
            warn!(
                "Lost {} bytes of secure world log",
                available - LOG_BUFFER_SIZE
            );
            self.pending.clear();
            self.read_count = written.wrapping_sub(LOG_BUFFER_SIZE as u32);
            available = LOG_BUFFER_SIZE;
        }

        let start = self.read_count as usize % LOG_BUFFER_SIZE;
        let end_len = min(available, LOG_BUFFER_SIZE - start);
        self.pending
            .extend_from_slice(&self.page.buffer[start..start + end_len]);
        self.pending
            .extend_from_slice(&self.page.buffer[..available - end_len]);
        self.read_count = written;

        while let Some(newline) = self.pending.iter().position(|&byte| byte == b'\n') {
            let line = self.pending.drain(..=newline).collect::<Vec<u8>>();
            emit(&line[..newline]);
        }
        // A line longer than the buffer will never be completed.
        if self.pending.len() >= LOG_BUFFER_SIZE {
            emit(&self.pending);
            self.pending.clear();
        }
    }

    /// Returns the bytes of an incomplete line held back from the last drain.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}

fn emit(line: &[u8]) {
    let line = String::from_utf8_lossy(line);
    info!("TLK: {}", line.trim_end_matches('\r'));
}

/// Appends `bytes` to the log page the way the trusted OS does.
///
/// # Safety
///
/// `page` must point to a valid `LogPage` which nothing else accesses for the duration of the call.
#[cfg(test)]
pub unsafe fn append_to_page(page: *mut LogPage, bytes: &[u8]) {
    // SAFETY: Our caller guarantees exclusive access to a valid page.
    let page = unsafe { &mut *page };
    for &byte in bytes {
        page.buffer[page.logged_bytes_count as usize % LOG_BUFFER_SIZE] = byte;
        page.logged_bytes_count = page.logged_bytes_count.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append(log: &mut SecureLog, bytes: &[u8]) {
        let page = ptr::from_mut::<LogPage>(&mut log.page);
        // SAFETY: The page is owned by `log`, which we borrow mutably.
        unsafe { append_to_page(page, bytes) }
    }

    #[test]
    fn holds_incomplete_line() {
        let mut log = SecureLog::new().unwrap();
        assert_eq!(log.page.size as usize, LOG_BUFFER_SIZE);
        assert_eq!(log.addr() % PAGE_SIZE, 0);

        append(&mut log, b"first line\nsecond");
        log.drain();
        assert_eq!(log.pending(), b"second");

        append(&mut log, b" line\n");
        log.drain();
        assert!(log.pending().is_empty());
        assert_eq!(log.read_count, 23);
    }

    #[test]
    fn wraps_around() {
        let mut log = SecureLog::new().unwrap();
        let filler = [b'x'; LOG_BUFFER_SIZE - 4];
        append(&mut log, &filler);
        append(&mut log, b"\n");
        log.drain();
        assert!(log.pending().is_empty());

        append(&mut log, b"wrapped\npart");
        log.drain();
        assert_eq!(log.pending(), b"part");
        assert_eq!(log.page.buffer[0..5], *b"pped\n");
    }

    #[test]
    fn overrun_keeps_newest_bytes() {
        let mut log = SecureLog::new().unwrap();
        append(&mut log, b"old partial");
        let mut bytes = vec![b'y'; LOG_BUFFER_SIZE + 100];
        let tail = b"\ntail";
        let len = bytes.len();
        bytes[len - tail.len()..].copy_from_slice(tail);
        append(&mut log, &bytes);

        log.drain();
        assert_eq!(log.pending(), b"tail");
        assert_eq!(log.read_count as usize, 11 + LOG_BUFFER_SIZE + 100);
    }

    #[test]
    fn nothing_new() {
        let mut log = SecureLog::new().unwrap();
        log.drain();
        assert!(log.pending().is_empty());
        assert_eq!(log.read_count, 0);
    }
}
