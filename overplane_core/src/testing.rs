// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! In-memory stand-ins for the hardware collaborators, shared by unit tests.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use hashbrown::{HashMap, HashSet};

use crate::buffer::{BufferHandle, BufferInfo, GraphicBuffer, PixelFormat};
use crate::buffer_manager::Gralloc;
use crate::context::{CommitError, PostDevice};
use crate::display::{DisplayId, Fence};
use crate::mapper::{
    CpuRegion, GrallocBufferMapper, MapError, MappingDevice, SUB_BUFFER_MAX, SharedMapper,
};
use crate::plane::{PlaneContext, PlaneDriver, PlaneError, PlaneKey};

const REGION_SIZE: u32 = 0x1000;

/// Counts live resources so tests can check nothing leaks.
#[derive(Debug, Default)]
pub(crate) struct FakeDevice {
    subs: usize,
    fail_gtt: Cell<Option<usize>>,
    live_gtt: Cell<usize>,
    live_cpu: Cell<usize>,
    kernel_wraps: Cell<usize>,
    live_fb: Cell<usize>,
    next_fb: Cell<u32>,
}

impl FakeDevice {
    pub(crate) fn with_subs(subs: usize) -> Self {
        Self {
            subs: subs.min(SUB_BUFFER_MAX),
            ..Self::default()
        }
    }

    pub(crate) fn fail_gtt_at(&self, sub: usize) {
        self.fail_gtt.set(Some(sub));
    }

    pub(crate) fn live_gtt(&self) -> usize {
        self.live_gtt.get()
    }

    pub(crate) fn live_cpu(&self) -> usize {
        self.live_cpu.get()
    }

    pub(crate) fn kernel_wraps(&self) -> usize {
        self.kernel_wraps.get()
    }

    pub(crate) fn live_framebuffers(&self) -> usize {
        self.live_fb.get()
    }
}

impl MappingDevice for FakeDevice {
    fn cpu_regions(&self, _info: &BufferInfo) -> Result<[CpuRegion; SUB_BUFFER_MAX], MapError> {
        let mut regions = [CpuRegion::default(); SUB_BUFFER_MAX];
        for (i, region) in regions.iter_mut().enumerate().take(self.subs) {
            *region = CpuRegion {
                address: (i + 1) * REGION_SIZE as usize,
                size: REGION_SIZE,
            };
        }
        self.live_cpu.set(self.live_cpu.get() + 1);
        Ok(regions)
    }

    fn put_cpu_regions(&self, _info: &BufferInfo) {
        self.live_cpu.set(self.live_cpu.get().saturating_sub(1));
    }

    fn gtt_map(&self, region: CpuRegion) -> Result<u32, MapError> {
        let sub = region.address / REGION_SIZE as usize - 1;
        if self.fail_gtt.get() == Some(sub) {
            return Err(MapError::Gtt { sub });
        }
        let address = u32::try_from(region.address).map_err(|_| MapError::Gtt { sub })?;
        self.live_gtt.set(self.live_gtt.get() + 1);
        Ok(0x10_0000 + address)
    }

    fn gtt_unmap(&self, _region: CpuRegion) {
        self.live_gtt.set(self.live_gtt.get().saturating_sub(1));
    }

    fn wrap_kernel_buffer(&self, info: &BufferInfo) -> Result<u32, MapError> {
        self.kernel_wraps.set(self.kernel_wraps.get() + 1);
        u32::try_from(info.handle.0).map_err(|_| MapError::KernelBuffer)
    }

    fn add_framebuffer(&self, _info: &BufferInfo, _k_handle: u32) -> Result<u32, MapError> {
        self.live_fb.set(self.live_fb.get() + 1);
        let fb = self.next_fb.get() + 1;
        self.next_fb.set(fb);
        Ok(fb)
    }

    fn remove_framebuffer(&self, _fb: u32) {
        self.live_fb.set(self.live_fb.get().saturating_sub(1));
    }
}

/// Allocator backed by a table of registered buffers.
#[derive(Debug)]
pub(crate) struct FakeGralloc {
    device: Rc<FakeDevice>,
    buffers: RefCell<HashMap<BufferHandle, BufferInfo>>,
    describes: Cell<usize>,
    next: Cell<u64>,
    allocations: Cell<usize>,
}

impl FakeGralloc {
    pub(crate) fn new() -> Self {
        Self {
            device: Rc::new(FakeDevice::with_subs(1)),
            buffers: RefCell::new(HashMap::new()),
            describes: Cell::new(0),
            next: Cell::new(0x1000),
            allocations: Cell::new(0),
        }
    }

    pub(crate) fn device(&self) -> &FakeDevice {
        &self.device
    }

    pub(crate) fn register(&self, info: BufferInfo) {
        self.buffers.borrow_mut().insert(info.handle, info);
    }

    pub(crate) fn describe_calls(&self) -> usize {
        self.describes.get()
    }

    pub(crate) fn live_allocations(&self) -> usize {
        self.allocations.get()
    }
}

impl Gralloc for FakeGralloc {
    fn describe(&self, handle: BufferHandle, buffer: &mut GraphicBuffer) -> Result<(), MapError> {
        self.describes.set(self.describes.get() + 1);
        let info = self
            .buffers
            .borrow()
            .get(&handle)
            .copied()
            .ok_or(MapError::Describe(handle))?;
        buffer.reset_buffer(info);
        Ok(())
    }

    fn create_mapper(&self, info: &BufferInfo) -> SharedMapper {
        GrallocBufferMapper::shared(self.device.clone(), *info)
    }

    fn allocate(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: u32,
    ) -> Result<BufferHandle, MapError> {
        let handle = BufferHandle(self.next.get());
        self.next.set(handle.0 + 1);
        self.register(BufferInfo::new(handle, format, width, height, usage));
        self.allocations.set(self.allocations.get() + 1);
        Ok(handle)
    }

    fn free(&self, handle: BufferHandle) {
        if self.buffers.borrow_mut().remove(&handle).is_some() {
            self.allocations.set(self.allocations.get().saturating_sub(1));
        }
    }
}

#[derive(Debug, Default)]
struct DriverState {
    enabled: HashSet<PlaneKey>,
    fail_enable: HashSet<PlaneKey>,
    fail_disable: HashSet<PlaneKey>,
}

/// Plane driver whose state stays observable after it is boxed.
#[derive(Clone, Debug, Default)]
pub(crate) struct FakeDriver {
    state: Rc<RefCell<DriverState>>,
}

impl FakeDriver {
    pub(crate) fn fail_enable(&self, key: PlaneKey) {
        self.state.borrow_mut().fail_enable.insert(key);
    }

    pub(crate) fn fail_disable(&self, key: PlaneKey) {
        self.state.borrow_mut().fail_disable.insert(key);
    }

    pub(crate) fn is_enabled(&self, key: PlaneKey) -> bool {
        self.state.borrow().enabled.contains(&key)
    }
}

impl PlaneDriver for FakeDriver {
    fn enable(&mut self, key: PlaneKey) -> Result<(), PlaneError> {
        let mut state = self.state.borrow_mut();
        if state.fail_enable.contains(&key) {
            return Err(PlaneError::Driver(key));
        }
        state.enabled.insert(key);
        Ok(())
    }

    fn disable(&mut self, key: PlaneKey) -> Result<(), PlaneError> {
        let mut state = self.state.borrow_mut();
        if state.fail_disable.contains(&key) {
            return Err(PlaneError::Driver(key));
        }
        state.enabled.remove(&key);
        Ok(())
    }

    fn is_disabled(&self, key: PlaneKey) -> bool {
        !self.state.borrow().enabled.contains(&key)
    }
}

pub(crate) fn rgba(handle: u64, width: u32, height: u32) -> BufferInfo {
    BufferInfo::new(BufferHandle(handle), PixelFormat::RGBA_8888, width, height, 0)
}

pub(crate) fn fake_mapper(handle: u64) -> SharedMapper {
    GrallocBufferMapper::shared(Rc::new(FakeDevice::with_subs(1)), rgba(handle, 16, 16))
}

pub(crate) fn fake_mapped(
    handle: BufferHandle,
    format: PixelFormat,
    width: u32,
    height: u32,
) -> SharedMapper {
    let subs = if format.is_yuv() && !format.is_packed_yuv() { 2 } else { 1 };
    let info = BufferInfo::new(handle, format, width, height, 0);
    let mapper = GrallocBufferMapper::shared(Rc::new(FakeDevice::with_subs(subs)), info);
    mapper.borrow_mut().map().unwrap();
    mapper
}

#[derive(Debug, Default)]
struct PostState {
    posts: Vec<usize>,
    closed: Vec<Fence>,
    next_fence: i32,
    fail_post: bool,
    fail_idle: bool,
    cursor: Option<(DisplayId, u32)>,
}

/// Post device recording what the commit path asked of it.
#[derive(Clone, Debug, Default)]
pub(crate) struct FakePostDevice {
    state: Rc<RefCell<PostState>>,
}

impl FakePostDevice {
    pub(crate) fn fail_post(&self) {
        self.state.borrow_mut().fail_post = true;
    }

    pub(crate) fn fail_idle(&self) {
        self.state.borrow_mut().fail_idle = true;
    }

    /// Plane count of every successful post.
    pub(crate) fn posts(&self) -> Vec<usize> {
        self.state.borrow().posts.clone()
    }

    pub(crate) fn closed(&self) -> Vec<Fence> {
        self.state.borrow().closed.clone()
    }

    pub(crate) fn cursor(&self) -> Option<(DisplayId, u32)> {
        self.state.borrow().cursor
    }

    fn fresh_fence(state: &mut PostState) -> Fence {
        state.next_fence += 1;
        Fence(100 + state.next_fence)
    }
}

impl PostDevice for FakePostDevice {
    fn post(&mut self, contexts: &[PlaneContext]) -> Result<Fence, CommitError> {
        let mut state = self.state.borrow_mut();
        if state.fail_post {
            return Err(CommitError::Post);
        }
        state.posts.push(contexts.len());
        Ok(Self::fresh_fence(&mut state))
    }

    fn dup_fence(&mut self, _fence: Fence) -> Fence {
        Self::fresh_fence(&mut self.state.borrow_mut())
    }

    fn close_fence(&mut self, fence: Fence) {
        self.state.borrow_mut().closed.push(fence);
    }

    fn wait_idle(&mut self) -> Result<(), CommitError> {
        if self.state.borrow().fail_idle {
            Err(CommitError::Timeout)
        } else {
            Ok(())
        }
    }

    fn write_cursor_position(&mut self, display: DisplayId, bits: u32) -> Result<(), CommitError> {
        self.state.borrow_mut().cursor = Some((display, bits));
        Ok(())
    }
}
