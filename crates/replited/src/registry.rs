//! Dense handle registry mapping small integer IDs to owned objects.
//!
//! Clients refer to databases and prepared statements by the IDs handed out
//! here. Freed IDs are recycled lowest-first so the ID space stays bounded by
//! the number of live handles, and a lookup with a stale ID simply misses.

use std::collections::BTreeSet;

use thiserror::Error;

/// Errors surfaced by registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Growing the slot table failed.
    #[error("out of memory")]
    OutOfMemory,
    /// Every representable ID is in use.
    #[error("handle space exhausted")]
    Exhausted,
}

/// Owns objects of one type, each addressed by a `u32` handle.
#[derive(Debug)]
pub struct Registry<T> {
    slots: Vec<Option<T>>,
    free: BTreeSet<u32>,
    live: usize,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: BTreeSet::new(),
            live: 0,
        }
    }

    /// Stores the object built by `make` under the lowest free ID.
    ///
    /// `make` receives the allocated ID so the object can remember it.
    pub fn add(&mut self, make: impl FnOnce(u32) -> T) -> Result<(u32, &mut T), RegistryError> {
        let id = match self.free.pop_first() {
            Some(id) => id,
            None => self.grow()?,
        };
        let slot = self
            .slots
            .get_mut(slot_index(id))
            .ok_or(RegistryError::Exhausted)?;
        self.live += 1;
        Ok((id, slot.insert(make(id))))
    }

    /// Looks up a live object.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<&T> {
        self.slots.get(slot_index(id)).and_then(Option::as_ref)
    }

    /// Looks up a live object for mutation.
    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.slots.get_mut(slot_index(id)).and_then(Option::as_mut)
    }

    /// Removes an object and hands it back to the caller, freeing its ID.
    ///
    /// Returns `None` when `id` does not name a live object; callers that
    /// obtained `id` from [`Registry::add`] or [`Registry::get`] never see it.
    pub fn del(&mut self, id: u32) -> Option<T> {
        let object = self.slots.get_mut(slot_index(id))?.take()?;
        self.live -= 1;
        self.release_id(id);
        Some(object)
    }

    /// Number of live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether the registry holds no live objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterates over live objects in ID order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let id = u32::try_from(index).ok()?;
            slot.as_ref().map(|object| (id, object))
        })
    }

    /// Removes every live object, yielding them in ID order.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.free.clear();
        self.live = 0;
        self.slots.drain(..).flatten()
    }

    fn grow(&mut self) -> Result<u32, RegistryError> {
        let id = u32::try_from(self.slots.len()).map_err(|_| RegistryError::Exhausted)?;
        self.slots
            .try_reserve(1)
            .map_err(|_| RegistryError::OutOfMemory)?;
        self.slots.push(None);
        Ok(id)
    }

    fn release_id(&mut self, id: u32) {
        // Trailing free slots are trimmed so the table shrinks back.
        if slot_index(id) + 1 == self.slots.len() {
            self.slots.pop();
            while let Some(None) = self.slots.last() {
                self.slots.pop();
                if let Ok(last) = u32::try_from(self.slots.len()) {
                    self.free.remove(&last);
                }
            }
        } else {
            self.free.insert(id);
        }
    }
}

fn slot_index(id: u32) -> usize {
    usize::try_from(id).unwrap_or(usize::MAX)
}
