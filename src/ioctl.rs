// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The ioctl interface of the driver's character device.

use crate::{
    context::ClientHandle,
    device::{OteDevice, Request},
    dispatcher::Answer,
    error::OteError,
    marshal::{Operation, UserMemory, UserPtr},
    platform::Platform,
    session::SessionId,
};
use core::mem::offset_of;
use log::{debug, warn};
use uuid::Uuid;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;
const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = 8;
const IOC_SIZESHIFT: u32 = 16;
const IOC_DIRSHIFT: u32 = 30;

/// The ioctl type of the driver's commands.
pub const TE_IOCTL_MAGIC: u8 = b't';

/// Encodes a command which both reads and writes an argument of `size` bytes.
const fn iowr(nr: u8, size: usize) -> u32 {
    ((IOC_READ | IOC_WRITE) << IOC_DIRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)
        | ((TE_IOCTL_MAGIC as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
}

/// Opens a session; the argument is a [`TeOpenSessionArgs`].
pub const TE_IOCTL_OPEN_CLIENT_SESSION: u32 = iowr(0x10, size_of::<TeOpenSessionArgs>());
/// Closes a session; the argument is a [`TeCloseSessionArgs`].
pub const TE_IOCTL_CLOSE_CLIENT_SESSION: u32 = iowr(0x11, size_of::<TeCloseSessionArgs>());
/// Invokes a command; the argument is a [`TeLaunchOperationArgs`].
pub const TE_IOCTL_LAUNCH_OPERATION: u32 = iowr(0x14, size_of::<TeLaunchOperationArgs>());

/// An operation as laid out by the client.
#[derive(Clone, Copy, Debug, Default, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
#[allow(missing_docs)]
pub struct TeOperation {
    pub command: u32,
    pub list_count: u32,
    /// User address of the first parameter.
    pub list_head: u64,
}

impl From<TeOperation> for Operation {
    fn from(operation: TeOperation) -> Self {
        Self {
            command: operation.command,
            list_head: UserPtr::new(operation.list_head),
            list_count: operation.list_count,
        }
    }
}

/// The answer written back to the client.
#[derive(Clone, Copy, Debug, Default, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
#[allow(missing_docs)]
pub struct TeAnswer {
    pub result: u32,
    pub session_id: u32,
    pub result_origin: u32,
    pub reserved: u32,
}

impl From<Answer> for TeAnswer {
    fn from(answer: Answer) -> Self {
        Self {
            result: answer.result,
            session_id: answer.session_id,
            result_origin: answer.result_origin,
            reserved: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
#[allow(missing_docs)]
pub struct TeOpenSessionArgs {
    pub dest_uuid: [u8; 16],
    pub operation: TeOperation,
    pub answer: TeAnswer,
}

#[derive(Clone, Copy, Debug, Default, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
#[allow(missing_docs)]
pub struct TeCloseSessionArgs {
    pub session_id: u32,
    pub reserved: u32,
    pub answer: TeAnswer,
}

#[derive(Clone, Copy, Debug, Default, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
#[allow(missing_docs)]
pub struct TeLaunchOperationArgs {
    pub session_id: u32,
    pub reserved: u32,
    pub operation: TeOperation,
    pub answer: TeAnswer,
}

impl<P: Platform> OteDevice<P> {
    /// Handles an ioctl on the device from the given client.
    ///
    /// `arg` is the user address of the command's argument record. For open and launch, errors
    /// detected by the driver are also reported in the record's answer.
    pub fn ioctl(
        &self,
        handle: ClientHandle,
        cmd: u32,
        arg: UserPtr,
        user: &impl UserMemory,
    ) -> Result<(), OteError> {
        match cmd {
            TE_IOCTL_OPEN_CLIENT_SESSION => {
                let args = read_args::<TeOpenSessionArgs>(user, arg)?;
                let request = Request::OpenSession {
                    destination: Uuid::from_bytes(args.dest_uuid),
                    operation: args.operation.into(),
                };
                let answer = answer_ptr(arg, offset_of!(TeOpenSessionArgs, answer))?;
                self.ioctl_request(handle, request, user, answer, true)
            }
            TE_IOCTL_CLOSE_CLIENT_SESSION => {
                let args = read_args::<TeCloseSessionArgs>(user, arg)?;
                let request = Request::CloseSession {
                    session: SessionId(args.session_id),
                };
                let answer = answer_ptr(arg, offset_of!(TeCloseSessionArgs, answer))?;
                self.ioctl_request(handle, request, user, answer, false)
            }
            TE_IOCTL_LAUNCH_OPERATION => {
                let args = read_args::<TeLaunchOperationArgs>(user, arg)?;
                let request = Request::LaunchOperation {
                    session: SessionId(args.session_id),
                    operation: args.operation.into(),
                };
                let answer = answer_ptr(arg, offset_of!(TeLaunchOperationArgs, answer))?;
                self.ioctl_request(handle, request, user, answer, true)
            }
            _ => {
                warn!("Unknown ioctl {cmd:#x} from {handle}");
                Err(OteError::InvalidRequest)
            }
        }
    }

    fn ioctl_request(
        &self,
        handle: ClientHandle,
        request: Request,
        user: &impl UserMemory,
        answer: UserPtr,
        report_errors: bool,
    ) -> Result<(), OteError> {
        match self.request(handle, request, user) {
            Ok(reply) => write_answer(user, answer, reply),
            Err(error) => {
                debug!("{request:?} from {handle} failed: {error}");
                if report_errors {
                    // The request's own error is what the caller needs to see.
                    let _ = write_answer(user, answer, Answer::from_error(error));
                }
                Err(error)
            }
        }
    }
}

fn read_args<T: FromBytes + IntoBytes>(
    user: &impl UserMemory,
    arg: UserPtr,
) -> Result<T, OteError> {
    let mut args = T::new_zeroed();
    user.read(arg, args.as_mut_bytes())?;
    Ok(args)
}

fn answer_ptr(arg: UserPtr, offset: usize) -> Result<UserPtr, OteError> {
    arg.checked_add(offset).ok_or(OteError::CopyFault)
}

fn write_answer(user: &impl UserMemory, dst: UserPtr, answer: Answer) -> Result<(), OteError> {
    user.write(dst, TeAnswer::from(answer).as_bytes())?;
    Ok(())
}
