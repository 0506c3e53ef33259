// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Normal world driver for the Trusted Little Kernel.
//!
//! Clients open sessions with trusted applications and invoke commands in them. Requests from all
//! clients are issued one at a time, through a pool of request records and parameter slots in
//! pages shared with the trusted OS.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod context;
mod debug;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod ioctl;
pub mod logger;
pub mod marshal;
pub mod platform;
pub mod pool;
pub mod protocol;
pub mod session;
pub mod shared;
pub mod smccc;

pub use crate::{
    config::DriverConfig,
    context::ClientHandle,
    device::{OteDevice, Request},
    dispatcher::Answer,
    error::OteError,
    marshal::{Operation, UserMemory, UserPtr},
    platform::Platform,
};
