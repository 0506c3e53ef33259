// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Types and helpers related to the SMC Calling Convention, and the function IDs of the Trusted
//! Little Kernel interface.

use core::fmt::{self, Debug, Display, Formatter};

const FAST_CALL: u32 = 0x8000_0000;
const SMC64: u32 = 0x4000_0000;
const OEN_MASK: u32 = 0x3f00_0000;
const OEN_SHIFT: u8 = 24;

/// The call completed successfully.
pub const SUCCESS: u32 = 0;

/// The call is not supported by the implementation.
pub const NOT_SUPPORTED: u32 = -1i32 as u32;

/// The type of an SMCCC call: whether it is a fast call or yielding call, and which calling
/// convention it uses.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SmcccCallType {
    /// An SMC32/HVC32 fast call.
    Fast32,
    /// An SMC64/HVC64 fast call.
    Fast64,
    /// A yielding call.
    Yielding,
}

/// The service range a function ID belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OwningEntity {
    /// Calls to a trusted application hosted by the trusted OS.
    TrustedApplications,
    /// Calls to the trusted OS itself.
    TrustedOS,
    /// Anything else; never issued by this driver.
    Other,
}

/// Owning Entity Number (OEN)
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct OwningEntityNumber(pub u8);

impl OwningEntityNumber {
    /// First OEN of the trusted application range.
    pub const TRUSTED_APPS: Self = Self(48);
    /// First OEN of the trusted OS range.
    pub const TRUSTED_OS: Self = Self(50);

    /// Returns which service range the OEN falls in.
    pub fn oe(self) -> OwningEntity {
        match self {
            Self(48..=49) => OwningEntity::TrustedApplications,
            Self(50..=63) => OwningEntity::TrustedOS,
            _ => OwningEntity::Other,
        }
    }
}

impl Display for OwningEntityNumber {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An SMCCC function ID.
#[derive(Copy, Clone, Eq, PartialEq)]
#[repr(transparent)]
pub struct FunctionId(pub u32);

impl FunctionId {
    /// Creates a new `FunctionId` from its components.
    pub const fn new(call_type: SmcccCallType, oen: OwningEntityNumber, number: u16) -> Self {
        let type_bits = match call_type {
            SmcccCallType::Fast32 => FAST_CALL,
            SmcccCallType::Fast64 => FAST_CALL | SMC64,
            SmcccCallType::Yielding => 0,
        };
        Self(type_bits | (((oen.0 as u32) << OEN_SHIFT) & OEN_MASK) | (number as u32))
    }

    /// Returns the Owning Entity Number of the function ID.
    pub fn oen(self) -> OwningEntityNumber {
        OwningEntityNumber(((self.0 & OEN_MASK) >> OEN_SHIFT) as u8)
    }

    /// Returns the lower 16 bits of the function ID.
    pub fn number(self) -> u16 {
        self.0 as u16
    }

    /// Returns what type of call this is.
    pub fn call_type(self) -> SmcccCallType {
        if self.0 & FAST_CALL != 0 {
            if self.0 & SMC64 != 0 {
                SmcccCallType::Fast64
            } else {
                SmcccCallType::Fast32
            }
        } else {
            SmcccCallType::Yielding
        }
    }
}

impl Display for FunctionId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl Debug for FunctionId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(
            f,
            "{:#010x} ({:?} OEN {} {:?})",
            self.0,
            self.call_type(),
            self.oen(),
            self.oen().oe()
        )
    }
}

const fn trusted_app_call(number: u16) -> FunctionId {
    FunctionId::new(
        SmcccCallType::Yielding,
        OwningEntityNumber::TRUSTED_APPS,
        number,
    )
}

const fn trusted_os_call(number: u16) -> FunctionId {
    FunctionId::new(
        SmcccCallType::Yielding,
        OwningEntityNumber::TRUSTED_OS,
        number,
    )
}

/// Opens a session with a trusted application.
pub const TE_SMC_OPEN_SESSION: FunctionId = trusted_app_call(1);
/// Closes a session with a trusted application.
pub const TE_SMC_CLOSE_SESSION: FunctionId = trusted_app_call(2);
/// Invokes a command within an open session.
pub const TE_SMC_LAUNCH_OPERATION: FunctionId = trusted_app_call(3);

/// Asks whether the trusted OS implements the function ID passed in the first argument.
pub const TE_SMC_FEATURES: FunctionId = trusted_os_call(0);
/// Registers a two-page request/parameter buffer by virtual address.
pub const TE_SMC_REGISTER_REQ_BUF: FunctionId = trusted_os_call(2);
/// Registers the circular buffer the trusted OS writes its log into.
pub const TE_SMC_INIT_LOGGER: FunctionId = trusted_os_call(7);
/// Shares the physical addresses of the request, parameter and parameter-pages buffers.
pub const TE_SMC_SHARE_BUFFERS: FunctionId = trusted_os_call(0xa);
