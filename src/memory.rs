//! Storage for long-lived game objects
//!
//! Two allocators share one interface:
//! - [`Arena`]: append-only, level-scoped storage. Values are never freed
//!   individually; the whole arena is torn down by [`Arena::reset`]. Safe to
//!   push into from worker threads.
//! - [`EntityPool`]: slot storage with individual removal. Removed slots stay
//!   empty until reused, and handles carry a generation so a stale handle
//!   never aliases a newer occupant.

use std::sync::Arc;

use parking_lot::RwLock;

/// Common allocation interface
pub trait Allocator<T> {
    /// Handle returned for each allocation
    type Handle: Copy + Eq;

    /// Store a value and return its handle
    fn allocate(&mut self, value: T) -> Self::Handle;

    /// Number of live values
    fn live(&self) -> usize;
}

/// Index of a value inside an [`Arena`], tagged with the arena epoch it
/// was allocated in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaId {
    epoch: u32,
    index: u32,
}

impl ArenaId {
    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// Number of resets the arena had seen when this id was issued
    #[inline]
    pub fn epoch(self) -> u32 {
        self.epoch
    }
}

#[derive(Debug)]
struct ArenaSlots<T> {
    values: Vec<Arc<T>>,
    epoch: u32,
}

impl<T> ArenaSlots<T> {
    fn id(&self, index: usize) -> ArenaId {
        ArenaId {
            epoch: self.epoch,
            index: index as u32,
        }
    }
}

/// Append-only arena with a lock-guarded bump index
///
/// Each value is wrapped in an `Arc`, so a reference taken right after
/// allocation stays valid until the arena is reset even if other threads
/// keep pushing. Ids issued before a reset never resolve afterwards.
#[derive(Debug)]
pub struct Arena<T> {
    slots: RwLock<ArenaSlots<T>>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(ArenaSlots {
                values: Vec::new(),
                epoch: 0,
            }),
        }
    }

    /// Push a value, returning its id and a shared reference to it
    pub fn push(&self, value: T) -> (ArenaId, Arc<T>) {
        let value = Arc::new(value);
        let mut slots = self.slots.write();
        let id = slots.id(slots.values.len());
        slots.values.push(Arc::clone(&value));
        (id, value)
    }

    pub fn get(&self, id: ArenaId) -> Option<Arc<T>> {
        let slots = self.slots.read();
        if id.epoch != slots.epoch {
            return None;
        }
        slots.values.get(id.index()).cloned()
    }

    /// All values in allocation order
    pub fn snapshot(&self) -> Vec<(ArenaId, Arc<T>)> {
        let slots = self.slots.read();
        slots
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| (slots.id(i), Arc::clone(v)))
            .collect()
    }

    /// First value (in allocation order) matching the predicate
    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<(ArenaId, Arc<T>)> {
        let slots = self.slots.read();
        slots
            .values
            .iter()
            .enumerate()
            .find(|(_, v)| pred(v))
            .map(|(i, v)| (slots.id(i), Arc::clone(v)))
    }

    pub fn len(&self) -> usize {
        self.slots.read().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every value at once (level teardown)
    ///
    /// References handed out earlier stay valid for their holders but the
    /// arena no longer tracks them.
    pub fn reset(&self) {
        let mut slots = self.slots.write();
        slots.values.clear();
        slots.epoch = slots.epoch.wrapping_add(1);
    }
}

impl<T> Allocator<T> for Arena<T> {
    type Handle = ArenaId;

    fn allocate(&mut self, value: T) -> ArenaId {
        self.push(value).0
    }

    fn live(&self) -> usize {
        self.len()
    }
}

/// Generation-checked handle into an [`EntityPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    index: u32,
    generation: u32,
}

impl EntityId {
    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage with removal and slot reuse
#[derive(Debug, Clone)]
pub struct EntityPool<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Default for EntityPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EntityPool<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> EntityId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return EntityId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        EntityId {
            index,
            generation: 0,
        }
    }

    pub fn remove(&mut self, id: EntityId) -> Option<T> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(value)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: EntityId) -> Option<&T> {
        self.slots
            .get(id.index())
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.value.as_ref())
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index())
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.value.as_mut())
    }

    /// Borrow two distinct live values mutably
    pub fn get2_mut(&mut self, a: EntityId, b: EntityId) -> Option<(&mut T, &mut T)> {
        if a.index == b.index || !self.contains(a) || !self.contains(b) {
            return None;
        }
        let (lo, hi, swapped) = if a.index < b.index {
            (a.index(), b.index(), false)
        } else {
            (b.index(), a.index(), true)
        };
        let (head, tail) = self.slots.split_at_mut(hi);
        let first = head[lo].value.as_mut()?;
        let second = tail[0].value.as_mut()?;
        if swapped {
            Some((second, first))
        } else {
            Some((first, second))
        }
    }

    /// Live values in slot order
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.value.as_ref().map(|v| {
                (
                    EntityId {
                        index: i as u32,
                        generation: s.generation,
                    },
                    v,
                )
            })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityId, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| {
            let generation = s.generation;
            s.value.as_mut().map(|v| {
                (
                    EntityId {
                        index: i as u32,
                        generation,
                    },
                    v,
                )
            })
        })
    }

    /// Handles of all live values in slot order
    pub fn ids(&self) -> Vec<EntityId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.live = 0;
    }
}

impl<T> Allocator<T> for EntityPool<T> {
    type Handle = EntityId;

    fn allocate(&mut self, value: T) -> EntityId {
        self.insert(value)
    }

    fn live(&self) -> usize {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn fill<A: Allocator<u32>>(alloc: &mut A, n: u32) -> Vec<A::Handle> {
        (0..n).map(|i| alloc.allocate(i)).collect()
    }

    #[test]
    fn test_allocator_interface() {
        let mut arena = Arena::new();
        let mut pool = EntityPool::new();
        assert_eq!(fill(&mut arena, 3).len(), 3);
        assert_eq!(fill(&mut pool, 3).len(), 3);
        assert_eq!(arena.live(), 3);
        assert_eq!(pool.live(), 3);
    }

    #[test]
    fn test_arena_concurrent_push() {
        let arena = Arc::new(Arena::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let arena = Arc::clone(&arena);
                thread::spawn(move || {
                    for i in 0..100 {
                        arena.push(t * 1000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(arena.len(), 400);
        let mut values: Vec<u32> = arena.snapshot().iter().map(|(_, v)| **v).collect();
        values.sort();
        values.dedup();
        assert_eq!(values.len(), 400);
    }

    #[test]
    fn test_arena_reference_survives_growth() {
        let arena = Arena::new();
        let (id, first) = arena.push(String::from("first"));
        for i in 0..64 {
            arena.push(i.to_string());
        }
        assert_eq!(*first, "first");
        assert_eq!(*arena.get(id).unwrap(), "first");
    }

    #[test]
    fn test_arena_reset() {
        let arena = Arena::new();
        arena.push(1);
        arena.push(2);
        let (first, _) = arena.snapshot()[0].clone();
        assert_eq!(arena.find(|v| *v == 2).map(|(id, _)| id.index()), Some(1));
        arena.reset();
        assert!(arena.is_empty());
        assert!(arena.get(first).is_none());
    }

    #[test]
    fn test_arena_id_from_before_reset_never_resolves() {
        let arena = Arena::new();
        let (old, _) = arena.push("old");
        arena.reset();
        let (new, _) = arena.push("new");
        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert!(arena.get(old).is_none());
        assert_eq!(*arena.get(new).unwrap(), "new");
        assert_eq!(arena.find(|v| *v == "new").map(|(id, _)| id), Some(new));
    }

    #[test]
    fn test_pool_stale_handle() {
        let mut pool = EntityPool::new();
        let a = pool.insert("a");
        assert_eq!(pool.remove(a), Some("a"));
        let b = pool.insert("b");
        // Slot reused, generation bumped
        assert_eq!(a.index(), b.index());
        assert!(pool.get(a).is_none());
        assert_eq!(pool.get(b), Some(&"b"));
        assert_eq!(pool.remove(a), None);
    }

    #[test]
    fn test_pool_iter_skips_removed() {
        let mut pool = EntityPool::new();
        let ids: Vec<_> = (0..5).map(|i| pool.insert(i)).collect();
        pool.remove(ids[1]);
        pool.remove(ids[3]);
        let values: Vec<_> = pool.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![0, 2, 4]);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_pool_get2_mut() {
        let mut pool = EntityPool::new();
        let a = pool.insert(1);
        let b = pool.insert(2);
        {
            let (x, y) = pool.get2_mut(b, a).unwrap();
            assert_eq!((*x, *y), (2, 1));
            *x += 10;
            *y += 20;
        }
        assert_eq!(pool.get(a), Some(&21));
        assert_eq!(pool.get(b), Some(&12));
        assert!(pool.get2_mut(a, a).is_none());
    }
}
