// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Per-client table of sessions opened with trusted applications.

use alloc::collections::BTreeMap;
use core::fmt::{self, Display, Formatter};
use log::warn;
use uuid::Uuid;

/// A session identifier, assigned by the trusted OS when a session is opened.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SessionId(pub u32);

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// An open session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Session {
    /// The identifier the trusted OS assigned.
    pub id: SessionId,
    /// The trusted application the session is connected to.
    pub destination: Uuid,
}

/// Sessions of one client, ordered by id so teardown closes them in a deterministic order.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: BTreeMap<SessionId, Session>,
}

impl SessionTable {
    /// Creates an empty table.
    pub const fn new() -> Self {
        Self {
            sessions: BTreeMap::new(),
        }
    }

    /// Adds a newly opened session.
    ///
    /// The trusted OS never hands out an id which is still open, so a duplicate replaces the stale
    /// entry.
    pub fn insert(&mut self, session: Session) {
        if let Some(stale) = self.sessions.insert(session.id, session) {
            warn!("Session {} was already open, replacing it", stale.id);
        }
    }

    /// Removes the session with the given id, if it is open.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    /// Returns whether a session with the given id is open.
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Iterates over the open sessions in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Returns the number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns whether no sessions are open.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
