//! Concurrent registry of resources retained per native handle.
//!
//! Each key maps to an entry guarded by its own mutex, so work on one handle
//! never waits on another. The DashMap shard lock is only held long enough to
//! clone the entry's `Arc` out; entry mutexes are never taken while a shard
//! lock is held, except for the removal in [`HandleRegistry::detach`] which
//! always runs entry-then-shard.
//!
//! An entry is "live" from its first registration until it is detached. A
//! detached entry is unlinked from the map while its mutex is still held, so
//! a concurrent caller either sees the live entry or no entry at all, and a
//! later registration for a recycled handle value always starts a fresh
//! generation.

use crate::handle::NativeHandle;
use crate::resource::RetainedResource;
use dashmap::DashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Temporary key for resources registered before the native handle exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingKey(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKey {
    Pending(PendingKey),
    Handle(NativeHandle),
}

impl From<NativeHandle> for EntryKey {
    fn from(handle: NativeHandle) -> Self {
        EntryKey::Handle(handle)
    }
}

impl From<PendingKey> for EntryKey {
    fn from(key: PendingKey) -> Self {
        EntryKey::Pending(key)
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKey::Pending(key) => write!(f, "pending#{}", key.0),
            EntryKey::Handle(handle) => handle.fmt(f),
        }
    }
}

/// Identifies one incarnation of an entry. A recycled handle value gets a new
/// generation, so stale registrations and notifications can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(u64);

impl Generation {
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId {
    key: EntryKey,
    generation: Generation,
    slot: u64,
}

impl RegistrationId {
    pub fn key(&self) -> EntryKey {
        self.key
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }
}

/// Outcome of [`HandleRegistry::claim_hook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookClaim {
    /// Caller must install the native free hook for this generation.
    Install(Generation),
    /// A hook for this generation is already installed.
    Installed(Generation),
    /// No live entry for the handle.
    Missing,
}

struct Slot {
    id: u64,
    resource: Arc<dyn RetainedResource>,
}

struct Entry {
    generation: Generation,
    alive: bool,
    hooked: bool,
    slots: SmallVec<[Slot; 4]>,
}

type EntryCell = Arc<Mutex<Entry>>;

/// Resources unlinked from the registry, waiting to be released.
///
/// Dropping a `DetachedEntry` releases whatever it still holds, so a detached
/// entry can be moved to another thread but can never be leaked.
pub struct DetachedEntry {
    key: EntryKey,
    generation: Generation,
    slots: SmallVec<[Slot; 4]>,
}

impl DetachedEntry {
    pub fn key(&self) -> EntryKey {
        self.key
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Release every resource, newest registration first. Returns the count.
    pub fn release(mut self) -> usize {
        self.release_slots()
    }

    fn release_slots(&mut self) -> usize {
        let count = self.slots.len();
        while let Some(slot) = self.slots.pop() {
            tracing::trace!(key = %self.key, slot = slot.id, label = slot.resource.label(), "releasing");
            slot.resource.release();
        }
        count
    }

    fn into_slots(mut self) -> SmallVec<[Slot; 4]> {
        mem::take(&mut self.slots)
    }
}

impl Drop for DetachedEntry {
    fn drop(&mut self) {
        if !self.slots.is_empty() {
            self.release_slots();
        }
    }
}

/// Concurrent map from native handle to the resources it depends on.
pub struct HandleRegistry {
    entries: DashMap<EntryKey, EntryCell>,
    next_generation: AtomicU64,
    next_slot: AtomicU64,
    next_pending: AtomicU64,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_generation: AtomicU64::new(1),
            next_slot: AtomicU64::new(1),
            next_pending: AtomicU64::new(1),
        }
    }

    /// Start a provisional registration for a handle that does not exist yet.
    pub fn provisional(&self) -> Provisional<'_> {
        Provisional {
            registry: self,
            key: PendingKey(self.next_pending.fetch_add(1, Ordering::Relaxed)),
            settled: false,
        }
    }

    /// Retain `resource` under `key`, creating the entry if absent.
    pub fn register(
        &self,
        key: impl Into<EntryKey>,
        resource: Arc<dyn RetainedResource>,
    ) -> RegistrationId {
        let key = key.into();
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);

        loop {
            let cell = self.cell_or_insert(key);
            let mut entry = cell.lock();
            if !entry.alive {
                // Detached under our feet; it is already gone from the map.
                continue;
            }
            entry.slots.push(Slot {
                id: slot,
                resource: Arc::clone(&resource),
            });
            tracing::trace!(%key, slot, generation = entry.generation.0, label = resource.label(), "registered");
            return RegistrationId {
                key,
                generation: entry.generation,
                slot,
            };
        }
    }

    /// Release everything registered under `key`, newest first, and remove the
    /// entry. Returns the number of resources released; zero when the entry
    /// was already gone.
    pub fn release_all(&self, key: impl Into<EntryKey>) -> usize {
        self.detach(key).map(DetachedEntry::release).unwrap_or(0)
    }

    /// Unlink the live entry for `key` without releasing it yet.
    pub fn detach(&self, key: impl Into<EntryKey>) -> Option<DetachedEntry> {
        self.detach_where(key.into(), None)
    }

    /// Like [`detach`](Self::detach), but only if the live entry still belongs
    /// to `generation`.
    pub fn detach_generation(
        &self,
        key: impl Into<EntryKey>,
        generation: Generation,
    ) -> Option<DetachedEntry> {
        self.detach_where(key.into(), Some(generation))
    }

    /// Remove one registration without releasing it. The caller becomes
    /// responsible for the returned resource.
    pub fn cancel(&self, id: &RegistrationId) -> Option<Arc<dyn RetainedResource>> {
        let cell = self.cell(id.key)?;
        let mut entry = cell.lock();
        if !entry.alive || entry.generation != id.generation {
            return None;
        }
        let pos = entry.slots.iter().position(|s| s.id == id.slot)?;
        let slot = entry.slots.remove(pos);

        // A hooked entry stays so the pending free hook still finds it.
        if entry.slots.is_empty() && !entry.hooked {
            self.unlink(id.key, &cell, &mut entry);
        }
        tracing::trace!(key = %id.key, slot = id.slot, "registration cancelled");
        Some(slot.resource)
    }

    /// Remove and release one registration. `false` when it was already gone.
    pub fn release(&self, id: &RegistrationId) -> bool {
        match self.cancel(id) {
            Some(resource) => {
                resource.release();
                true
            }
            None => false,
        }
    }

    /// Move a provisional entry's resources to `handle`'s live entry.
    pub fn promote(&self, pending: PendingKey, handle: NativeHandle) -> Generation {
        let mut moved = self
            .detach(pending)
            .map(DetachedEntry::into_slots)
            .unwrap_or_default();

        let key = EntryKey::Handle(handle);
        loop {
            let cell = self.cell_or_insert(key);
            let mut entry = cell.lock();
            if !entry.alive {
                continue;
            }
            let count = moved.len();
            entry.slots.extend(moved.drain(..));
            tracing::debug!(%key, generation = entry.generation.0, count, "promoted provisional entry");
            return entry.generation;
        }
    }

    /// Mark `handle`'s live entry as hooked, telling the caller whether it
    /// has to install the native free hook.
    pub fn claim_hook(&self, handle: NativeHandle) -> HookClaim {
        let Some(cell) = self.cell(handle.into()) else {
            return HookClaim::Missing;
        };
        let mut entry = cell.lock();
        if !entry.alive {
            return HookClaim::Missing;
        }
        if entry.hooked {
            HookClaim::Installed(entry.generation)
        } else {
            entry.hooked = true;
            HookClaim::Install(entry.generation)
        }
    }

    /// Undo a [`claim_hook`](Self::claim_hook) whose native install failed.
    pub fn unclaim_hook(&self, handle: NativeHandle, generation: Generation) {
        let key = EntryKey::Handle(handle);
        let Some(cell) = self.cell(key) else {
            return;
        };
        let mut entry = cell.lock();
        if entry.alive && entry.generation == generation {
            entry.hooked = false;
            if entry.slots.is_empty() {
                self.unlink(key, &cell, &mut entry);
            }
        }
    }

    pub fn is_live(&self, key: impl Into<EntryKey>) -> bool {
        self.generation(key).is_some()
    }

    pub fn generation(&self, key: impl Into<EntryKey>) -> Option<Generation> {
        let cell = self.cell(key.into())?;
        let entry = cell.lock();
        entry.alive.then_some(entry.generation)
    }

    pub fn is_hooked(&self, handle: NativeHandle) -> bool {
        self.cell(handle.into())
            .map(|cell| {
                let entry = cell.lock();
                entry.alive && entry.hooked
            })
            .unwrap_or(false)
    }

    /// Number of resources retained under `key`.
    pub fn resource_count(&self, key: impl Into<EntryKey>) -> usize {
        self.cell(key.into())
            .map(|cell| {
                let entry = cell.lock();
                if entry.alive {
                    entry.slots.len()
                } else {
                    0
                }
            })
            .unwrap_or(0)
    }

    /// Whether `id` is still registered (not released, cancelled or detached).
    pub fn contains(&self, id: &RegistrationId) -> bool {
        self.cell(id.key)
            .map(|cell| {
                let entry = cell.lock();
                entry.alive
                    && entry.generation == id.generation
                    && entry.slots.iter().any(|s| s.id == id.slot)
            })
            .unwrap_or(false)
    }

    /// Number of live entries, provisional ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn next_generation(&self) -> Generation {
        Generation(self.next_generation.fetch_add(1, Ordering::Relaxed))
    }

    fn cell(&self, key: EntryKey) -> Option<EntryCell> {
        self.entries.get(&key).map(|r| Arc::clone(r.value()))
    }

    fn cell_or_insert(&self, key: EntryKey) -> EntryCell {
        let entry = self.entries.entry(key).or_insert_with(|| {
            Arc::new(Mutex::new(Entry {
                generation: self.next_generation(),
                alive: true,
                hooked: false,
                slots: SmallVec::new(),
            }))
        });
        Arc::clone(entry.value())
    }

    fn detach_where(&self, key: EntryKey, expected: Option<Generation>) -> Option<DetachedEntry> {
        let cell = self.cell(key)?;
        let mut entry = cell.lock();
        if !entry.alive {
            return None;
        }
        if let Some(generation) = expected {
            if entry.generation != generation {
                tracing::debug!(%key, stale = generation.0, current = entry.generation.0, "ignoring stale detach");
                return None;
            }
        }
        self.unlink(key, &cell, &mut entry);
        Some(DetachedEntry {
            key,
            generation: entry.generation,
            slots: mem::take(&mut entry.slots),
        })
    }

    /// Kill the entry and drop it from the map. Caller holds the entry lock.
    fn unlink(&self, key: EntryKey, cell: &EntryCell, entry: &mut Entry) {
        entry.alive = false;
        self.entries.remove_if(&key, |_, v| Arc::ptr_eq(v, cell));
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Resources registered ahead of a native constructor call.
///
/// Settle it with [`promote`](Self::promote) once the handle is known or
/// [`rollback`](Self::rollback) when creation failed. Dropping an unsettled
/// provisional rolls it back.
pub struct Provisional<'a> {
    registry: &'a HandleRegistry,
    key: PendingKey,
    settled: bool,
}

impl<'a> Provisional<'a> {
    pub fn key(&self) -> PendingKey {
        self.key
    }

    pub fn retain(&self, resource: Arc<dyn RetainedResource>) -> RegistrationId {
        self.registry.register(self.key, resource)
    }

    pub fn len(&self) -> usize {
        self.registry.resource_count(self.key)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn promote(mut self, handle: NativeHandle) -> Generation {
        self.settled = true;
        self.registry.promote(self.key, handle)
    }

    pub fn rollback(mut self) -> usize {
        self.settled = true;
        self.registry.release_all(self.key)
    }
}

impl Drop for Provisional<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let released = self.registry.release_all(self.key);
            if released > 0 {
                tracing::debug!(key = %EntryKey::Pending(self.key), released, "provisional dropped, rolled back");
            }
        }
    }
}
