// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reference-counted front end over the global mapper pool.
//!
//! Every plane that scans out a buffer holds a reference obtained through
//! [`BufferManager::map`]. The first reference creates and maps the mapper;
//! the last [`unmap`](BufferManager::unmap) evicts and unmaps it.

use alloc::vec::Vec;
use core::fmt;

use hashbrown::HashMap;

use crate::buffer::{BufferHandle, BufferInfo, GraphicBuffer, PixelFormat, usage};
use crate::cache::BufferCache;
use crate::mapper::{MapError, SharedMapper};

/// The platform allocator.
pub trait Gralloc {
    /// Decodes `handle` into `buffer`, overwriting its previous contents.
    fn describe(&self, handle: BufferHandle, buffer: &mut GraphicBuffer) -> Result<(), MapError>;

    /// Creates an unmapped mapper for `info`.
    fn create_mapper(&self, info: &BufferInfo) -> SharedMapper;

    /// Allocates a new buffer.
    fn allocate(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: u32,
    ) -> Result<BufferHandle, MapError>;

    /// Frees a buffer obtained from [`allocate`](Self::allocate).
    fn free(&self, handle: BufferHandle);
}

/// Construction parameters for [`BufferManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferManagerConfig {
    /// Maximum number of simultaneously mapped buffers.
    pub pool_size: usize,
}

impl BufferManagerConfig {
    /// Pool size suitable for phones and tablets.
    pub const DEFAULT: Self = Self { pool_size: 1000 };
}

impl Default for BufferManagerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A scan-out buffer allocated by [`BufferManager::alloc_frame_buffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameBuffer {
    /// Allocator handle.
    pub handle: BufferHandle,
    /// Framebuffer object id.
    pub fb: u32,
}

/// One pool entry as seen by diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MappedBufferSnapshot {
    /// Buffer handle.
    pub handle: BufferHandle,
    /// Pixel format.
    pub format: PixelFormat,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Outstanding references.
    pub refs: u32,
    /// Whether the mapper is currently mapped.
    pub mapped: bool,
}

/// The mapper pool as seen by diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferPoolSnapshot {
    /// Pool capacity.
    pub capacity: usize,
    /// Entries in handle order.
    pub buffers: Vec<MappedBufferSnapshot>,
}

/// Owns the allocator and the pool of mapped buffers.
pub struct BufferManager<G: Gralloc> {
    gralloc: G,
    pool: BufferCache,
    refs: HashMap<BufferHandle, u32>,
    scratch: GraphicBuffer,
    frame_buffers: HashMap<BufferHandle, SharedMapper>,
}

impl<G: Gralloc> BufferManager<G> {
    /// Creates a manager with an empty pool.
    #[must_use]
    pub fn new(gralloc: G, config: BufferManagerConfig) -> Self {
        Self {
            gralloc,
            pool: BufferCache::new(config.pool_size),
            refs: HashMap::new(),
            scratch: GraphicBuffer::new(),
            frame_buffers: HashMap::new(),
        }
    }

    /// The allocator.
    #[must_use]
    pub fn gralloc(&self) -> &G {
        &self.gralloc
    }

    /// Describes `handle` into the shared scratch buffer and returns it.
    pub fn lock_data_buffer(&mut self, handle: BufferHandle) -> Result<&GraphicBuffer, MapError> {
        if handle.is_null() {
            return Err(MapError::Describe(handle));
        }
        self.gralloc.describe(handle, &mut self.scratch)?;
        Ok(&self.scratch)
    }

    /// Returns a mapped mapper for `info`, adding one reference.
    pub fn map(&mut self, info: &BufferInfo) -> Result<SharedMapper, MapError> {
        let handle = info.handle;
        if let Some(mapper) = self.pool.get_mapper(handle) {
            *self.refs.entry(handle).or_insert(0) += 1;
            return Ok(mapper);
        }

        let mapper = self.gralloc.create_mapper(info);
        mapper.borrow_mut().map()?;
        if let Err(err) = self.pool.add_mapper(handle, mapper.clone()) {
            log::error!("failed to pool mapper for {handle:?}: {err}");
            mapper.borrow_mut().unmap();
            return Err(MapError::PoolExhausted);
        }
        self.refs.insert(handle, 1);
        log::trace!("mapped {handle:?}");
        Ok(mapper)
    }

    /// Adds a reference to an already mapped buffer. Returns `false` if
    /// `handle` is not mapped.
    pub fn retain(&mut self, handle: BufferHandle) -> bool {
        match self.refs.get_mut(&handle) {
            Some(refs) => {
                *refs += 1;
                true
            }
            None => false,
        }
    }

    /// Drops one reference; the last one evicts and unmaps the buffer.
    pub fn unmap(&mut self, handle: BufferHandle) {
        let Some(refs) = self.refs.get_mut(&handle) else {
            log::warn!("unmap of {handle:?} which is not mapped");
            return;
        };
        *refs -= 1;
        if *refs > 0 {
            return;
        }
        self.refs.remove(&handle);
        if let Some(mapper) = self.pool.get_mapper(handle) {
            self.pool.remove_mapper(&mapper);
            mapper.borrow_mut().unmap();
            log::trace!("unmapped {handle:?}");
        }
    }

    /// Outstanding references on `handle`.
    #[must_use]
    pub fn ref_count(&self, handle: BufferHandle) -> u32 {
        self.refs.get(&handle).copied().unwrap_or(0)
    }

    /// Number of mapped buffers.
    #[must_use]
    pub fn mapped_count(&self) -> usize {
        self.pool.len()
    }

    /// Allocates a scan-out buffer and registers a framebuffer object for it.
    pub fn alloc_frame_buffer(&mut self, width: u32, height: u32) -> Result<FrameBuffer, MapError> {
        let handle = self.gralloc.allocate(
            width,
            height,
            PixelFormat::RGBX_8888,
            usage::HW_FB | usage::HW_COMPOSER,
        )?;

        let info = match self.lock_data_buffer(handle) {
            Ok(buffer) => *buffer.info(),
            Err(err) => {
                self.gralloc.free(handle);
                return Err(err);
            }
        };
        let mapper = match self.map(&info) {
            Ok(mapper) => mapper,
            Err(err) => {
                self.gralloc.free(handle);
                return Err(err);
            }
        };
        let fb = mapper.borrow_mut().fb_handle(0);
        match fb {
            Ok(fb) => {
                self.frame_buffers.insert(handle, mapper);
                Ok(FrameBuffer { handle, fb })
            }
            Err(err) => {
                log::error!("failed to get framebuffer object for {handle:?}");
                self.unmap(handle);
                self.gralloc.free(handle);
                Err(err)
            }
        }
    }

    /// Releases a buffer from [`alloc_frame_buffer`](Self::alloc_frame_buffer).
    pub fn free_frame_buffer(&mut self, handle: BufferHandle) {
        let Some(mapper) = self.frame_buffers.remove(&handle) else {
            log::warn!("{handle:?} is not an allocated frame buffer");
            return;
        };
        mapper.borrow_mut().put_fb_handle();
        self.unmap(handle);
        self.gralloc.free(handle);
    }

    /// Unmaps and evicts every buffer, regardless of references.
    pub fn deinitialize(&mut self) {
        let frame_buffers: Vec<BufferHandle> = self.frame_buffers.keys().copied().collect();
        for handle in frame_buffers {
            self.free_frame_buffer(handle);
        }
        while let Some(mapper) = self.pool.mapper_at(0) {
            self.pool.remove_mapper(&mapper);
            mapper.borrow_mut().unmap();
        }
        self.refs.clear();
    }

    /// Captures the pool for diagnostics.
    #[must_use]
    pub fn snapshot(&self) -> BufferPoolSnapshot {
        let buffers = (0..self.pool.len())
            .filter_map(|i| self.pool.mapper_at(i))
            .map(|mapper| {
                let mapper = mapper.borrow();
                let info = mapper.info();
                MappedBufferSnapshot {
                    handle: info.handle,
                    format: info.format,
                    width: info.width,
                    height: info.height,
                    refs: self.ref_count(info.handle),
                    mapped: mapper.is_mapped(),
                }
            })
            .collect();
        BufferPoolSnapshot {
            capacity: self.pool.capacity(),
            buffers,
        }
    }
}

impl<G: Gralloc> fmt::Debug for BufferManager<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferManager")
            .field("pool", &self.pool)
            .field("refs", &self.refs)
            .field("frame_buffers", &self.frame_buffers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGralloc, rgba};
    use alloc::rc::Rc;

    fn manager() -> BufferManager<FakeGralloc> {
        BufferManager::new(FakeGralloc::new(), BufferManagerConfig { pool_size: 4 })
    }

    #[test]
    fn map_shares_and_counts_references() {
        let mut bm = manager();
        let info = rgba(1, 64, 64);
        let a = bm.map(&info).unwrap();
        let b = bm.map(&info).unwrap();
        assert!(Rc::ptr_eq(&a, &b), "second map returns the pooled mapper");
        assert_eq!(bm.ref_count(info.handle), 2);
        assert!(a.borrow().is_mapped());

        bm.unmap(info.handle);
        assert!(a.borrow().is_mapped(), "one reference left");
        bm.unmap(info.handle);
        assert!(!a.borrow().is_mapped(), "last reference unmaps");
        assert_eq!(bm.mapped_count(), 0);
        assert_eq!(bm.ref_count(info.handle), 0);
    }

    #[test]
    fn map_failure_leaves_pool_untouched() {
        let mut bm = manager();
        bm.gralloc().device().fail_gtt_at(0);
        assert_eq!(bm.map(&rgba(2, 16, 16)).err(), Some(MapError::Gtt { sub: 0 }));
        assert_eq!(bm.mapped_count(), 0);
        assert_eq!(bm.ref_count(BufferHandle(2)), 0);
    }

    #[test]
    fn full_pool_refuses_new_buffers() {
        let mut bm = manager();
        for h in 1..=4 {
            bm.map(&rgba(h, 8, 8)).unwrap();
        }
        assert_eq!(bm.map(&rgba(5, 8, 8)).err(), Some(MapError::PoolExhausted));
        assert_eq!(bm.gralloc().device().live_gtt(), 4, "rejected mapper unmapped");
    }

    #[test]
    fn lock_data_buffer_describes_in_place() {
        let mut bm = manager();
        bm.gralloc().register(rgba(9, 32, 16));
        let info = *bm.lock_data_buffer(BufferHandle(9)).unwrap().info();
        assert_eq!((info.width, info.height), (32, 16));
        assert!(bm.lock_data_buffer(BufferHandle::NULL).is_err());
        assert!(bm.lock_data_buffer(BufferHandle(77)).is_err(), "unknown handle");
    }

    #[test]
    fn frame_buffer_lifecycle() {
        let mut bm = manager();
        let fb = bm.alloc_frame_buffer(720, 1280).unwrap();
        assert_eq!(bm.gralloc().device().live_framebuffers(), 1);
        assert_eq!(bm.ref_count(fb.handle), 1);
        bm.free_frame_buffer(fb.handle);
        assert_eq!(bm.gralloc().device().live_framebuffers(), 0);
        assert_eq!(bm.mapped_count(), 0);
        assert_eq!(bm.gralloc().live_allocations(), 0);
    }

    #[test]
    fn deinitialize_unmaps_everything() {
        let mut bm = manager();
        bm.map(&rgba(1, 8, 8)).unwrap();
        bm.map(&rgba(1, 8, 8)).unwrap();
        bm.map(&rgba(2, 8, 8)).unwrap();
        bm.alloc_frame_buffer(8, 8).unwrap();
        bm.deinitialize();
        assert_eq!(bm.mapped_count(), 0);
        assert_eq!(bm.gralloc().device().live_gtt(), 0);
        assert_eq!(bm.gralloc().device().live_framebuffers(), 0);
    }

    #[test]
    fn snapshot_lists_pool_in_handle_order() {
        let mut bm = manager();
        bm.map(&rgba(3, 8, 8)).unwrap();
        bm.map(&rgba(1, 8, 8)).unwrap();
        bm.map(&rgba(1, 8, 8)).unwrap();
        let snap = bm.snapshot();
        assert_eq!(snap.capacity, 4);
        assert_eq!(snap.buffers.len(), 2);
        assert_eq!(snap.buffers[0].handle, BufferHandle(1));
        assert_eq!(snap.buffers[0].refs, 2);
        assert!(snap.buffers[1].mapped);
    }
}
