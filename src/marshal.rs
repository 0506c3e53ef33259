// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Copying parameter chains between user memory and parameter blocks.
//!
//! A caller describes its parameters as a singly-linked chain of [`OperParam`] records in its own
//! address space. The `next` field of each node is only ever used as a [`UserPtr`] handed back to
//! [`UserMemory`]; it is never dereferenced.

use crate::{error::OteError, protocol::OperParam, protocol::ShmemAccess};
use core::fmt::{self, Display, Formatter};
use log::warn;
use zerocopy::IntoBytes;

/// An address in the calling client's address space.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UserPtr(u64);

impl UserPtr {
    /// The null user address, which terminates a parameter chain.
    pub const NULL: Self = Self(0);

    /// Wraps a raw user address.
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw user address.
    pub const fn addr(self) -> u64 {
        self.0
    }

    /// Returns whether this is the null address.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns the address `offset` bytes further on, or `None` if that would overflow.
    pub fn checked_add(self, offset: usize) -> Option<Self> {
        self.0.checked_add(offset as u64).map(Self)
    }
}

impl Display for UserPtr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// An access to user memory faulted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UserFault;

impl From<UserFault> for OteError {
    fn from(_: UserFault) -> Self {
        Self::CopyFault
    }
}

/// Checked access to the address space of the client making a request.
///
/// Implementations must validate every access, as the addresses come straight from the client.
pub trait UserMemory {
    /// Copies `dst.len()` bytes starting at `src` into `dst`.
    fn read(&self, src: UserPtr, dst: &mut [u8]) -> Result<(), UserFault>;

    /// Copies `src` into user memory starting at `dst`.
    fn write(&self, dst: UserPtr, src: &[u8]) -> Result<(), UserFault>;

    /// Pins `len` bytes at `base` so the secure world can access them, and returns the physical
    /// address of the pinned range.
    fn pin(&self, base: UserPtr, len: u64, access: ShmemAccess) -> Result<u64, UserFault>;

    /// Releases a range previously pinned with [`UserMemory::pin`].
    fn unpin(&self, base: UserPtr, len: u64);
}

/// A trusted application command together with the caller's parameter chain.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Operation {
    /// The command to invoke; ignored when closing a session.
    pub command: u32,
    /// The first node of the parameter chain.
    pub list_head: UserPtr,
    /// The number of parameters in the chain.
    pub list_count: u32,
}

impl Operation {
    /// Returns the declared number of parameters.
    pub fn count(&self) -> usize {
        self.list_count as usize
    }
}

/// Copies the operation's parameter chain into `slots`.
///
/// Exactly `operation.list_count` nodes are copied. A chain which ends early is a fault; nothing
/// already copied is rolled back.
pub fn copy_params_in(
    user: &impl UserMemory,
    operation: &Operation,
    slots: &mut [OperParam],
) -> Result<(), OteError> {
    let count = operation.count();
    if count == 0 {
        return Ok(());
    }
    if slots.len() < count {
        return Err(OteError::InvalidRequest);
    }

    let mut node = operation.list_head;
    for (index, slot) in slots[..count].iter_mut().enumerate() {
        if node.is_null() {
            warn!("Parameter chain ended after {index} of {count} nodes");
            return Err(OteError::CopyFault);
        }
        user.read(node, slot.as_mut_bytes())?;
        node = UserPtr::new(slot.next);
    }
    Ok(())
}

/// Copies `recorded_count` parameters from `slots` back to the operation's parameter chain.
///
/// The chain is walked again from its head, following the `next` fields currently in user memory,
/// and each node's `next` field is left as it was.
pub fn copy_params_out(
    user: &impl UserMemory,
    operation: &Operation,
    slots: &[OperParam],
    recorded_count: usize,
) -> Result<(), OteError> {
    if operation.count() == 0 {
        return Ok(());
    }
    if recorded_count > slots.len() {
        warn!(
            "Secure world returned {recorded_count} parameters for a block of {}",
            slots.len()
        );
    }

    let mut node = operation.list_head;
    for (index, slot) in slots.iter().take(recorded_count).enumerate() {
        if node.is_null() {
            warn!("Parameter chain ended after {index} of {recorded_count} nodes");
            return Err(OteError::CopyFault);
        }
        let mut next = 0u64;
        let next_field = node
            .checked_add(OperParam::NEXT_OFFSET)
            .ok_or(OteError::CopyFault)?;
        user.read(next_field, next.as_mut_bytes())?;

        let out = OperParam { next, ..*slot };
        user.write(node, out.as_bytes())?;
        node = UserPtr::new(next);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::test::FakeUserMemory;

    fn int_param(index: u32, a: u64) -> OperParam {
        OperParam {
            index,
            param_type: 2,
            a,
            b: a * 10,
            next: 0,
        }
    }

    #[test]
    fn zero_count_is_trivial() {
        let user = FakeUserMemory::new();
        let operation = Operation {
            list_head: UserPtr::new(0xdead_0000),
            ..Default::default()
        };
        copy_params_in(&user, &operation, &mut []).unwrap();
        copy_params_out(&user, &operation, &[], 5).unwrap();
    }

    #[test]
    fn copies_chain_in_order() {
        let user = FakeUserMemory::new();
        let params = [int_param(0, 1), int_param(1, 2), int_param(2, 3)];
        let operation = user.write_chain(&params);

        let mut slots = [OperParam::default(); 4];
        copy_params_in(&user, &operation, &mut slots).unwrap();
        for (slot, param) in slots.iter().zip(&params) {
            assert_eq!((slot.index, slot.a, slot.b), (param.index, param.a, param.b));
        }
        assert_eq!(slots[3], OperParam::default());
    }

    #[test]
    fn short_chain_faults() {
        let user = FakeUserMemory::new();
        let mut operation = user.write_chain(&[int_param(0, 1), int_param(1, 2)]);
        operation.list_count = 3;

        let mut slots = [OperParam::default(); 4];
        assert_eq!(
            copy_params_in(&user, &operation, &mut slots),
            Err(OteError::CopyFault)
        );
    }

    #[test]
    fn unmapped_node_faults() {
        let user = FakeUserMemory::new();
        let operation = Operation {
            list_head: UserPtr::new(0x10),
            list_count: 1,
            ..Default::default()
        };
        let mut slots = [OperParam::default(); 1];
        assert_eq!(
            copy_params_in(&user, &operation, &mut slots),
            Err(OteError::CopyFault)
        );
    }

    #[test]
    fn block_too_small_is_invalid() {
        let user = FakeUserMemory::new();
        let operation = user.write_chain(&[int_param(0, 1), int_param(1, 2)]);
        let mut slots = [OperParam::default(); 1];
        assert_eq!(
            copy_params_in(&user, &operation, &mut slots),
            Err(OteError::InvalidRequest)
        );
    }

    #[test]
    fn round_trip_preserves_chain() {
        let user = FakeUserMemory::new();
        let params = [int_param(0, 11), int_param(1, 22), int_param(2, 33)];
        let operation = user.write_chain(&params);
        let before = user.read_chain(&operation);

        let mut slots = [OperParam::default(); 4];
        copy_params_in(&user, &operation, &mut slots).unwrap();
        copy_params_out(&user, &operation, &slots, 3).unwrap();

        assert_eq!(user.read_chain(&operation), before);
    }

    #[test]
    fn copy_out_uses_recorded_count() {
        let user = FakeUserMemory::new();
        let params = [int_param(0, 1), int_param(1, 2), int_param(2, 3)];
        let operation = user.write_chain(&params);

        let mut slots = [OperParam::default(); 4];
        copy_params_in(&user, &operation, &mut slots).unwrap();
        for slot in &mut slots {
            slot.a += 100;
            slot.next = 0;
        }
        copy_params_out(&user, &operation, &slots, 2).unwrap();

        let chain = user.read_chain(&operation);
        assert_eq!(chain[0].a, 101);
        assert_eq!(chain[1].a, 102);
        assert_eq!(chain[2].a, 3);
        // Links are kept even though the secure world cleared them.
        assert_ne!(chain[0].next, 0);
        assert_ne!(chain[1].next, 0);
    }

    #[test]
    fn copy_out_write_fault() {
        let user = FakeUserMemory::new();
        let operation = user.write_chain(&[int_param(0, 1)]);
        let mut slots = [OperParam::default(); 1];
        copy_params_in(&user, &operation, &mut slots).unwrap();

        user.fail_writes(true);
        assert_eq!(
            copy_params_out(&user, &operation, &slots, 1),
            Err(OteError::CopyFault)
        );
    }

    #[test]
    fn copy_out_longer_than_chain_faults() {
        let user = FakeUserMemory::new();
        let operation = user.write_chain(&[int_param(0, 1), int_param(1, 2)]);
        let mut slots = [OperParam::default(); 4];
        copy_params_in(&user, &operation, &mut slots).unwrap();

        assert_eq!(
            copy_params_out(&user, &operation, &slots, 3),
            Err(OteError::CopyFault)
        );
    }
}
