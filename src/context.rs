// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Per-client state: open sessions and the user buffers mapped for the secure world.

use crate::{
    error::OteError,
    marshal::{UserMemory, UserPtr},
    protocol::{OperParam, ShmemAccess},
    session::{SessionId, SessionTable},
};
use alloc::vec::Vec;
use core::fmt::{self, Display, Formatter};
use log::debug;

/// Identifies an open client of the driver.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ClientHandle(pub u64);

impl Display for ClientHandle {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "client {}", self.0)
    }
}

/// A user buffer pinned on behalf of a memory parameter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ShmemMapping {
    /// User address of the buffer.
    pub base: UserPtr,
    /// Length of the buffer in bytes.
    pub len: u64,
    /// Access granted to the secure world.
    pub access: ShmemAccess,
    /// The session a persistent mapping belongs to, once the call which created it succeeded.
    pub session: Option<SessionId>,
}

/// State owned by one open client.
#[derive(Debug, Default)]
pub struct ClientContext {
    /// Sessions opened by this client.
    pub sessions: SessionTable,
    temp_mappings: Vec<ShmemMapping>,
    persist_mappings: Vec<ShmemMapping>,
}

impl ClientContext {
    /// Creates a context with no sessions and no mappings.
    pub const fn new() -> Self {
        Self {
            sessions: SessionTable::new(),
            temp_mappings: Vec::new(),
            persist_mappings: Vec::new(),
        }
    }

    /// Pins the user buffers referenced by memory parameters in `slots`.
    ///
    /// If `page_list` is given, the physical address of each pinned buffer is stored in the entry
    /// with the same index as its slot. On failure the mappings made so far stay registered until
    /// [`ClientContext::finish_call`].
    pub fn map_params(
        &mut self,
        user: &impl UserMemory,
        slots: &[OperParam],
        mut page_list: Option<&mut [u64]>,
    ) -> Result<(), OteError> {
        for (index, slot) in slots.iter().enumerate() {
            let kind = slot.kind().ok_or(OteError::InvalidRequest)?;
            if !kind.is_memory() {
                continue;
            }
            let mapping = ShmemMapping {
                base: UserPtr::new(slot.a),
                len: slot.b,
                access: kind.access(),
                session: None,
            };
            let phys = user.pin(mapping.base, mapping.len, mapping.access)?;
            if let Some(entry) = page_list.as_deref_mut().and_then(|list| list.get_mut(index)) {
                *entry = phys;
            }
            if kind.is_persistent() {
                self.persist_mappings.push(mapping);
            } else {
                self.temp_mappings.push(mapping);
            }
        }
        Ok(())
    }

    /// Releases the temporary mappings of the call which just completed.
    ///
    /// Persistent mappings made by the call are bound to `session` if it is given, and released
    /// otherwise.
    pub fn finish_call(&mut self, user: &impl UserMemory, session: Option<SessionId>) {
        for mapping in self.temp_mappings.drain(..) {
            user.unpin(mapping.base, mapping.len);
        }
        match session {
            Some(session) => {
                for mapping in &mut self.persist_mappings {
                    mapping.session.get_or_insert(session);
                }
            }
            None => release_where(user, &mut self.persist_mappings, |mapping| {
                mapping.session.is_none()
            }),
        }
    }

    /// Releases the persistent mappings bound to the given session.
    pub fn release_session_mappings(&mut self, user: &impl UserMemory, session: SessionId) {
        release_where(user, &mut self.persist_mappings, |mapping| {
            mapping.session == Some(session)
        });
    }

    /// Releases every mapping still registered.
    pub fn release_all_mappings(&mut self, user: &impl UserMemory) {
        self.finish_call(user, None);
        release_where(user, &mut self.persist_mappings, |_| true);
    }

    /// Returns the persistent mappings currently registered.
    pub fn persistent_mappings(&self) -> &[ShmemMapping] {
        &self.persist_mappings
    }

    /// Returns the number of mappings currently registered.
    pub fn mapping_count(&self) -> usize {
        self.temp_mappings.len() + self.persist_mappings.len()
    }
}

fn release_where(
    user: &impl UserMemory,
    mappings: &mut Vec<ShmemMapping>,
    mut predicate: impl FnMut(&ShmemMapping) -> bool,
) {
    mappings.retain(|mapping| {
        if predicate(mapping) {
            debug!("Unpinning {} bytes at {}", mapping.len, mapping.base);
            user.unpin(mapping.base, mapping.len);
            false
        } else {
            true
        }
    });
}
