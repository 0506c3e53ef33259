// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Layouts of the records shared with the trusted OS.
//!
//! The request page holds an array of [`TeRequest`] records, one per request descriptor, and the
//! parameter page an array of [`OperParam`] slots which are handed out in power-of-two blocks. The
//! same [`OperParam`] layout is used for the nodes of the parameter chain in user memory.

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// The size of a page shared with the trusted OS.
pub const PAGE_SIZE: usize = 4096;

/// The number of request records which fit in the request page.
pub const REQUEST_SLOTS: usize = PAGE_SIZE / size_of::<TeRequest>();

/// The number of parameter slots in the parameter page.
pub const PARAM_SLOTS: usize = PAGE_SIZE / size_of::<OperParam>();

/// The longest parameter list a single call may carry.
pub const MAX_PARAM_COUNT: usize = 32;

/// The kind of call a request record describes.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum RequestType {
    /// Open a session with a trusted application.
    OpenSession = 1,
    /// Close a session.
    CloseSession = 2,
    /// Invoke a command in an open session.
    LaunchOperation = 3,
}

/// A request record in the request page.
#[derive(Clone, Copy, Debug, Default, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
pub struct TeRequest {
    /// A [`RequestType`].
    pub request_type: u32,
    /// The session the request targets, or the session opened by the trusted OS.
    pub session_id: u32,
    /// The trusted application command to invoke.
    pub command_id: u32,
    /// The number of parameters. The trusted OS may update this on return.
    pub params_count: u32,
    /// Byte offset of the parameter block within the parameter page.
    pub params_offset: u64,
    /// UUID of the trusted application to open a session with.
    pub dest_uuid: [u8; 16],
    /// The result code written by the trusted OS.
    pub result: u32,
    /// A [`ResultOrigin`](crate::error::ResultOrigin) written by the trusted OS.
    pub result_origin: u32,
}

/// The type tag of a parameter.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum ParamType {
    /// An unused parameter.
    None = 0,
    /// A pair of integers the trusted application may only read.
    IntRo = 1,
    /// A pair of integers the trusted application may update.
    IntRw = 2,
    /// A user buffer mapped for the duration of the call, read-only.
    MemRo = 3,
    /// A user buffer mapped for the duration of the call, read-write.
    MemRw = 4,
    /// A user buffer which stays mapped until the session closes, read-only.
    PersistMemRo = 0x100,
    /// A user buffer which stays mapped until the session closes, read-write.
    PersistMemRw = 0x101,
}

impl ParamType {
    /// Returns whether the parameter refers to a user buffer.
    pub fn is_memory(self) -> bool {
        !matches!(self, Self::None | Self::IntRo | Self::IntRw)
    }

    /// Returns whether a mapping for the parameter outlives the call.
    pub fn is_persistent(self) -> bool {
        matches!(self, Self::PersistMemRo | Self::PersistMemRw)
    }

    /// Returns the access the secure world needs to the referenced buffer.
    pub fn access(self) -> ShmemAccess {
        match self {
            Self::MemRw | Self::PersistMemRw => ShmemAccess::READ | ShmemAccess::WRITE,
            _ => ShmemAccess::READ,
        }
    }
}

bitflags! {
    /// Access the secure world is granted to a mapped user buffer.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct ShmemAccess: u32 {
        /// The buffer may be read.
        const READ = 1 << 0;
        /// The buffer may be written.
        const WRITE = 1 << 1;
    }
}

/// One parameter, both as a slot in the parameter page and as a node of the user parameter chain.
///
/// For integer parameters `a` and `b` are the two values; for memory parameters `a` is the user
/// address of the buffer and `b` its length in bytes.
#[derive(Clone, Copy, Debug, Default, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
pub struct OperParam {
    /// Position of the parameter in the trusted application's parameter list.
    pub index: u32,
    /// A [`ParamType`].
    pub param_type: u32,
    /// First value, or buffer address.
    pub a: u64,
    /// Second value, or buffer length.
    pub b: u64,
    /// User address of the next node in the chain, or 0.
    pub next: u64,
}

impl OperParam {
    /// Byte offset of the `next` field within the record.
    pub const NEXT_OFFSET: usize = core::mem::offset_of!(OperParam, next);

    /// Returns the decoded parameter type, if it is a known one.
    pub fn kind(&self) -> Option<ParamType> {
        ParamType::try_from(self.param_type).ok()
    }
}

/// The page of request records.
#[derive(FromBytes, KnownLayout)]
#[repr(C, align(4096))]
pub struct RequestPage {
    /// One record per request slot.
    pub slots: [TeRequest; REQUEST_SLOTS],
}

/// The page of parameter slots.
#[derive(FromBytes, KnownLayout)]
#[repr(C, align(4096))]
pub struct ParamPage {
    /// The parameter slots.
    pub slots: [OperParam; PARAM_SLOTS],
}

/// The request and parameter pages, contiguous, as registered with the trusted OS.
#[derive(FromBytes, KnownLayout)]
#[repr(C, align(4096))]
pub struct SharedPages {
    /// The first page.
    pub requests: RequestPage,
    /// The second page.
    pub params: ParamPage,
}

/// Physical addresses of pinned memory parameters, indexed by parameter slot.
#[derive(FromBytes, KnownLayout)]
#[repr(C, align(4096))]
pub struct PageList {
    /// One entry per parameter slot.
    pub entries: [u64; PARAM_SLOTS],
}
