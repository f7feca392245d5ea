// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bounded handle-to-mapper cache.
//!
//! [`BufferCache`] keeps at most one live mapper per [`BufferHandle`] and
//! never grows past the capacity fixed at construction. Entries are kept
//! sorted by handle; there is no age-based eviction, callers invalidate in
//! bulk through [`mapper_at`](BufferCache::mapper_at).

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::fmt;

use crate::buffer::BufferHandle;
use crate::mapper::SharedMapper;

/// Errors from [`BufferCache::add_mapper`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheError {
    /// The cache already holds its maximum number of entries.
    Full,
    /// A different mapper is cached under this handle.
    Occupied(BufferHandle),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("buffer cache is full"),
            Self::Occupied(handle) => {
                write!(f, "a different mapper is cached for {handle:?}")
            }
        }
    }
}

impl core::error::Error for CacheError {}

/// Bounded map from buffer handle to shared mapper.
pub struct BufferCache {
    capacity: usize,
    entries: Vec<(BufferHandle, SharedMapper)>,
}

impl BufferCache {
    /// Creates an empty cache holding at most `capacity` mappers.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Caches `mapper` under `handle`.
    ///
    /// Re-adding the mapper already cached under `handle` succeeds without
    /// change.
    pub fn add_mapper(
        &mut self,
        handle: BufferHandle,
        mapper: SharedMapper,
    ) -> Result<(), CacheError> {
        match self.entries.binary_search_by_key(&handle, |(h, _)| *h) {
            Ok(pos) => {
                if Rc::ptr_eq(&self.entries[pos].1, &mapper) {
                    Ok(())
                } else {
                    Err(CacheError::Occupied(handle))
                }
            }
            Err(pos) => {
                if self.entries.len() >= self.capacity {
                    return Err(CacheError::Full);
                }
                self.entries.insert(pos, (handle, mapper));
                Ok(())
            }
        }
    }

    /// Evicts `mapper` by identity. Returns `false` if it was not cached.
    pub fn remove_mapper(&mut self, mapper: &SharedMapper) -> bool {
        match self.entries.iter().position(|(_, m)| Rc::ptr_eq(m, mapper)) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Returns the mapper cached under `handle`.
    #[must_use]
    pub fn get_mapper(&self, handle: BufferHandle) -> Option<SharedMapper> {
        self.entries
            .binary_search_by_key(&handle, |(h, _)| *h)
            .ok()
            .map(|pos| self.entries[pos].1.clone())
    }

    /// Returns the mapper at position `index` in handle order.
    #[must_use]
    pub fn mapper_at(&self, index: usize) -> Option<SharedMapper> {
        self.entries.get(index).map(|(_, m)| m.clone())
    }

    /// Iterates over cached handles in ascending order.
    pub fn handles(&self) -> impl Iterator<Item = BufferHandle> + '_ {
        self.entries.iter().map(|(h, _)| *h)
    }

    /// Number of cached mappers.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if no further mapper can be added.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Maximum number of cached mappers.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Debug for BufferCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferCache")
            .field("capacity", &self.capacity)
            .field("handles", &self.handles().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fake_mapper;

    #[test]
    fn one_mapper_per_handle() {
        let mut cache = BufferCache::new(4);
        let a = fake_mapper(1);
        let b = fake_mapper(1);
        cache.add_mapper(BufferHandle(1), a.clone()).unwrap();
        assert_eq!(
            cache.add_mapper(BufferHandle(1), a.clone()),
            Ok(()),
            "re-adding the same mapper is accepted"
        );
        assert_eq!(
            cache.add_mapper(BufferHandle(1), b),
            Err(CacheError::Occupied(BufferHandle(1)))
        );
        assert_eq!(cache.len(), 1);
        let got = cache.get_mapper(BufferHandle(1)).unwrap();
        assert!(Rc::ptr_eq(&got, &a));
    }

    #[test]
    fn capacity_is_a_hard_bound() {
        let mut cache = BufferCache::new(2);
        cache.add_mapper(BufferHandle(3), fake_mapper(3)).unwrap();
        cache.add_mapper(BufferHandle(1), fake_mapper(1)).unwrap();
        assert!(cache.is_full());
        assert_eq!(
            cache.add_mapper(BufferHandle(2), fake_mapper(2)),
            Err(CacheError::Full)
        );
        assert_eq!(cache.len(), 2);
        let handles: Vec<_> = cache.handles().collect();
        assert_eq!(handles, [BufferHandle(1), BufferHandle(3)]);
    }

    #[test]
    fn remove_is_by_identity() {
        let mut cache = BufferCache::new(4);
        let a = fake_mapper(5);
        cache.add_mapper(BufferHandle(5), a.clone()).unwrap();
        assert!(!cache.remove_mapper(&fake_mapper(5)), "different mapper");
        assert!(cache.remove_mapper(&a));
        assert!(!cache.remove_mapper(&a), "already removed");
        assert!(cache.get_mapper(BufferHandle(5)).is_none());
    }

    #[test]
    fn positional_drain_empties_the_cache() {
        let mut cache = BufferCache::new(8);
        for h in 1..=5 {
            cache.add_mapper(BufferHandle(h), fake_mapper(h)).unwrap();
        }
        while let Some(m) = cache.mapper_at(0) {
            assert!(cache.remove_mapper(&m));
        }
        assert!(cache.is_empty());
        assert!(cache.mapper_at(0).is_none());
    }
}
