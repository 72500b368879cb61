//! Opaque-handle session arena
//!
//! The binding holds sessions as plain integers. Handles pack a slot index
//! and a generation, so a handle kept past `destroy` never resolves to a
//! later session that reuses the slot.

use std::fmt;

use slab::Slab;
use tracing::debug;

use crate::{SessionCoordinator, SessionError};

/// Opaque session handle handed across the binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(u64);

impl SessionHandle {
    fn new(slot: usize, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (slot as u64 & 0xffff_ffff))
    }

    /// Rebuild a handle from the binding's integer
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    fn slot(self) -> usize {
        (self.0 & 0xffff_ffff) as usize
    }

    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug)]
struct Entry<S> {
    generation: u32,
    session: S,
}

/// Slab of live sessions keyed by [`SessionHandle`]
#[derive(Debug)]
pub struct SessionRegistry<S = SessionCoordinator> {
    entries: Slab<Entry<S>>,
    next_generation: u32,
}

impl<S> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SessionRegistry<S> {
    pub fn new() -> Self {
        Self {
            entries: Slab::new(),
            // Zero is never issued, so a zeroed integer is always stale
            next_generation: 1,
        }
    }

    pub fn insert(&mut self, session: S) -> SessionHandle {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1).max(1);
        let slot = self.entries.insert(Entry { generation, session });
        let handle = SessionHandle::new(slot, generation);
        debug!(handle = %handle, "session registered");
        handle
    }

    fn check(&self, handle: SessionHandle) -> Result<(), SessionError> {
        match self.entries.get(handle.slot()) {
            Some(entry) if entry.generation == handle.generation() => Ok(()),
            _ => Err(SessionError::UnknownHandle(handle)),
        }
    }

    pub fn get(&self, handle: SessionHandle) -> Result<&S, SessionError> {
        self.check(handle)?;
        Ok(&self.entries[handle.slot()].session)
    }

    pub fn get_mut(&mut self, handle: SessionHandle) -> Result<&mut S, SessionError> {
        self.check(handle)?;
        Ok(&mut self.entries[handle.slot()].session)
    }

    /// Remove a session; the handle is stale afterwards
    pub fn remove(&mut self, handle: SessionHandle) -> Result<S, SessionError> {
        self.check(handle)?;
        let entry = self.entries.remove(handle.slot());
        debug!(handle = %handle, "session unregistered");
        Ok(entry.session)
    }

    pub fn contains(&self, handle: SessionHandle) -> bool {
        self.check(handle).is_ok()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = SessionHandle> + '_ {
        self.entries
            .iter()
            .map(|(slot, entry)| SessionHandle::new(slot, entry.generation))
    }
}

impl SessionRegistry<SessionCoordinator> {
    /// Destroy and unregister a session
    pub fn destroy(&mut self, handle: SessionHandle) -> Result<(), SessionError> {
        let mut session = self.remove(handle)?;
        session.destroy();
        Ok(())
    }

    /// Destroy every registered session
    pub fn destroy_all(&mut self) {
        for mut entry in self.entries.drain() {
            entry.session.destroy();
        }
    }
}
