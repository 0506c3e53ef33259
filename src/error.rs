// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Local error type and the result codes exchanged with the trusted OS.

use crate::smccc::FunctionId;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

/// The operation completed successfully.
pub const TEE_SUCCESS: u32 = 0;
/// Non-specific failure.
pub const TEE_ERROR_GENERIC: u32 = 0xffff_0000;
/// Input parameters were invalid.
pub const TEE_ERROR_BAD_PARAMETERS: u32 = 0xffff_0006;
/// The referenced item does not exist.
pub const TEE_ERROR_ITEM_NOT_FOUND: u32 = 0xffff_0008;
/// Not enough resources were available to complete the request.
pub const TEE_ERROR_OUT_OF_MEMORY: u32 = 0xffff_000c;
/// Communication with the trusted OS failed.
pub const TEE_ERROR_COMMUNICATION: u32 = 0xffff_000e;

const ENOMEM: i32 = 12;
const EFAULT: i32 = 14;
const ENODEV: i32 = 19;
const EINVAL: i32 = 22;
const EIO: i32 = 5;

/// Where in the stack a result code was produced.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum ResultOrigin {
    /// This driver.
    Api = 1,
    /// The communication path to the trusted OS.
    Comms = 2,
    /// The trusted OS.
    Tee = 3,
    /// The trusted application.
    TrustedApp = 4,
}

/// Errors detected locally, before or after a call into the secure world.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum OteError {
    /// No request descriptor, parameter block or shared page was available.
    #[error("out of request descriptors or parameter slots")]
    OutOfMemory,
    /// Reading or writing user memory failed while marshaling a request.
    #[error("fault copying to or from user memory")]
    CopyFault,
    /// The command or its arguments were malformed.
    #[error("invalid request")]
    InvalidRequest,
    /// The driver is disabled by its configuration.
    #[error("driver disabled by configuration")]
    Disabled,
    /// The secure world rejected an initialization call.
    #[error("secure world rejected {call}: {status:#x}")]
    SecureCall {
        /// The call which was rejected.
        call: FunctionId,
        /// The status it returned.
        status: u32,
    },
    /// A fallback shared buffer lies beyond what the secure world can address.
    #[error("shared buffer at physical address {0:#x} is not addressable by the secure world")]
    AddressOutOfRange(u64),
}

impl OteError {
    /// Returns the negative errno to report from an ioctl-style entry point.
    pub fn errno(self) -> i32 {
        -match self {
            Self::OutOfMemory => ENOMEM,
            Self::CopyFault => EFAULT,
            Self::InvalidRequest => EINVAL,
            Self::Disabled => ENODEV,
            Self::SecureCall { .. } | Self::AddressOutOfRange(_) => EIO,
        }
    }

    /// Returns the result code and origin to report in an answer for this error.
    pub fn answer(self) -> (u32, ResultOrigin) {
        let result = match self {
            Self::OutOfMemory => TEE_ERROR_OUT_OF_MEMORY,
            Self::CopyFault | Self::InvalidRequest => TEE_ERROR_BAD_PARAMETERS,
            Self::Disabled | Self::SecureCall { .. } | Self::AddressOutOfRange(_) => {
                TEE_ERROR_GENERIC
            }
        };
        (result, ResultOrigin::Api)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_values() {
        assert_eq!(OteError::OutOfMemory.errno(), -12);
        assert_eq!(OteError::CopyFault.errno(), -14);
        assert_eq!(OteError::InvalidRequest.errno(), -22);
        assert_eq!(OteError::AddressOutOfRange(1 << 40).errno(), -5);
    }

    #[test]
    fn local_errors_as_answers() {
        assert_eq!(
            OteError::OutOfMemory.answer(),
            (TEE_ERROR_OUT_OF_MEMORY, ResultOrigin::Api)
        );
        assert_eq!(
            OteError::CopyFault.answer(),
            (TEE_ERROR_BAD_PARAMETERS, ResultOrigin::Api)
        );
    }

    #[test]
    fn origin_from_wire() {
        assert_eq!(ResultOrigin::try_from(3).ok(), Some(ResultOrigin::Tee));
        assert!(ResultOrigin::try_from(9).is_err());
        assert_eq!(u32::from(ResultOrigin::TrustedApp), 4);
    }
}
