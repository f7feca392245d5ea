// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hardware display planes.
//!
//! A [`DisplayPlane`] is one scan-out engine. It is either
//! [`Disabled`](PlaneState::Disabled) or [`Enabled`](PlaneState::Enabled);
//! enabling and disabling go through the [`PlaneDriver`] so the hardware and
//! the bookkeeping never disagree. While enabled, the plane is bound to a
//! buffer via [`DisplayPlane::set_data_buffer`], which maps the buffer
//! through a small per-plane cache in front of the global
//! [`BufferManager`](crate::buffer_manager::BufferManager) and rebuilds the
//! plane's register [`PlaneContext`].
//!
//! The per-type register layouts live in [`variant`]; the per-type
//! acceptance rules in [`capabilities`].

pub mod capabilities;
mod variant;

use alloc::collections::VecDeque;
use core::fmt;

use kurbo::Rect;

pub use variant::{PlaneContext, PlaneRegisters, cursor_position_bits};

use crate::buffer::{BufferHandle, PixelFormat, is_compression_usage, is_protected_usage};
use crate::buffer_manager::{BufferManager, Gralloc};
use crate::cache::{BufferCache, CacheError};
use crate::display::{Blending, DisplayId, Transform};
use crate::mapper::{Crop, MapError, SharedMapper};
use variant::PlaneVariant;

/// Number of recently flipped buffers each plane keeps mapped.
pub const MIN_DATA_BUFFER_COUNT: usize = 3;

/// Kind of hardware plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlaneType {
    /// Full-screen RGB plane, one per pipe.
    Primary,
    /// RGB plane that can be placed anywhere.
    Sprite,
    /// YUV video plane with scaling.
    Overlay,
    /// Small RGBA pointer plane, one per pipe, always topmost.
    Cursor,
}

impl PlaneType {
    /// Every plane type, in pool order.
    pub const ALL: [Self; 4] = [Self::Primary, Self::Sprite, Self::Overlay, Self::Cursor];

    /// Position of this type in [`ALL`](Self::ALL).
    #[inline]
    #[must_use]
    pub const fn pool(self) -> usize {
        match self {
            Self::Primary => 0,
            Self::Sprite => 1,
            Self::Overlay => 2,
            Self::Cursor => 3,
        }
    }

    /// Short upper-case label used in dumps.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Primary => "PRIMARY",
            Self::Sprite => "SPRITE",
            Self::Overlay => "OVERLAY",
            Self::Cursor => "CURSOR",
        }
    }
}

/// Identity of a plane: its type and index within that type's pool.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlaneKey {
    /// Plane type.
    pub plane_type: PlaneType,
    /// Index within the type.
    pub index: u32,
}

impl PlaneKey {
    /// Creates a key.
    #[inline]
    #[must_use]
    pub const fn new(plane_type: PlaneType, index: u32) -> Self {
        Self { plane_type, index }
    }
}

impl fmt::Debug for PlaneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.plane_type, self.index)
    }
}

/// Hardware state of a plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PlaneState {
    /// Not scanning out.
    #[default]
    Disabled,
    /// Scanning out its bound buffer.
    Enabled,
}

/// Errors from plane and plane-manager operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaneError {
    /// The platform describes no planes at all.
    NoPlanes,
    /// No free plane of the requested type is available.
    NoFreePlane(PlaneType),
    /// The z-order configuration cannot be realized on this display.
    InvalidZOrder(DisplayId),
    /// The display is not driven by a hardware pipe.
    InvalidDisplay(DisplayId),
    /// The plane does not exist.
    UnknownPlane(PlaneKey),
    /// The operation requires an enabled plane.
    NotEnabled(PlaneKey),
    /// No buffer is bound to the plane.
    NoBuffer(PlaneKey),
    /// The null handle was passed as a buffer.
    InvalidBuffer,
    /// The plane cannot scan out this format.
    UnsupportedFormat(PixelFormat),
    /// The plane cannot scan out a buffer of this size.
    UnsupportedSize {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },
    /// The source crop starts outside the buffer.
    InvalidOffset,
    /// The plane driver rejected the request.
    Driver(PlaneKey),
    /// Mapping the buffer failed.
    Map(MapError),
    /// The per-plane buffer cache rejected the mapper.
    Cache(CacheError),
}

impl fmt::Display for PlaneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPlanes => f.write_str("no display planes available"),
            Self::NoFreePlane(ty) => write!(f, "no free {} plane", ty.label()),
            Self::InvalidZOrder(d) => write!(f, "invalid z-order for {d:?}"),
            Self::InvalidDisplay(d) => write!(f, "{d:?} has no hardware pipe"),
            Self::UnknownPlane(key) => write!(f, "plane {key:?} does not exist"),
            Self::NotEnabled(key) => write!(f, "plane {key:?} is not enabled"),
            Self::NoBuffer(key) => write!(f, "plane {key:?} has no buffer bound"),
            Self::InvalidBuffer => f.write_str("invalid buffer handle"),
            Self::UnsupportedFormat(format) => write!(f, "unsupported format {format:?}"),
            Self::UnsupportedSize { width, height } => {
                write!(f, "unsupported buffer size {width}x{height}")
            }
            Self::InvalidOffset => f.write_str("source crop lies outside the buffer"),
            Self::Driver(key) => write!(f, "driver failed on plane {key:?}"),
            Self::Map(err) => write!(f, "mapping failed: {err}"),
            Self::Cache(err) => write!(f, "plane cache: {err}"),
        }
    }
}

impl core::error::Error for PlaneError {}

impl From<MapError> for PlaneError {
    fn from(err: MapError) -> Self {
        Self::Map(err)
    }
}

impl From<CacheError> for PlaneError {
    fn from(err: CacheError) -> Self {
        Self::Cache(err)
    }
}

/// Kernel-side control of plane power state.
pub trait PlaneDriver {
    /// Turns scan-out on for `key`.
    fn enable(&mut self, key: PlaneKey) -> Result<(), PlaneError>;

    /// Turns scan-out off for `key`.
    fn disable(&mut self, key: PlaneKey) -> Result<(), PlaneError>;

    /// Returns `true` once the hardware reports `key` idle.
    fn is_disabled(&self, key: PlaneKey) -> bool;
}

/// Destination rectangle in display pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Position {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width.
    pub width: i32,
    /// Height.
    pub height: i32,
}

impl Position {
    /// Creates a position.
    #[must_use]
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Converts a display frame to whole pixels.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "display frames are rounded to whole pixels well inside i32"
    )]
    pub fn from_rect(rect: Rect) -> Self {
        let r = rect.round();
        Self::new(r.x0 as i32, r.y0 as i32, r.width() as i32, r.height() as i32)
    }
}

/// Converts a source crop to whole, non-negative buffer pixels.
#[must_use]
#[expect(
    clippy::cast_possible_truncation,
    reason = "source crops are clamped non-negative and rounded to whole pixels"
)]
pub fn crop_from_rect(rect: Rect) -> Crop {
    let r = rect.round();
    let x0 = r.x0.max(0.0);
    let y0 = r.y0.max(0.0);
    Crop::new(
        x0 as u32,
        y0 as u32,
        (r.x1 - x0).max(0.0) as u32,
        (r.y1 - y0).max(0.0) as u32,
    )
}

/// One hardware plane and its buffer bookkeeping.
pub struct DisplayPlane {
    key: PlaneKey,
    variant: PlaneVariant,
    state: PlaneState,
    display: DisplayId,
    zorder: u32,
    position: Position,
    src_crop: Crop,
    transform: Transform,
    plane_alpha: u8,
    blending: Blending,
    mode: (i32, i32),
    current: BufferHandle,
    is_protected: bool,
    update_masks: u32,
    data_buffers: BufferCache,
    active_buffers: VecDeque<BufferHandle>,
    context: Option<PlaneContext>,
}

impl DisplayPlane {
    /// Position changed since the last flip.
    pub const POSITION_CHANGED: u32 = 1 << 0;
    /// Source crop changed since the last flip.
    pub const SOURCE_CROP_CHANGED: u32 = 1 << 1;
    /// Transform changed since the last flip.
    pub const TRANSFORM_CHANGED: u32 = 1 << 2;
    /// Bound buffer changed since the last flip.
    pub const BUFFER_CHANGED: u32 = 1 << 3;

    /// Creates a disabled plane whose mapping cache holds `buffer_count`
    /// entries (at least [`MIN_DATA_BUFFER_COUNT`]).
    #[must_use]
    pub fn new(key: PlaneKey, buffer_count: usize) -> Self {
        let buffer_count = if buffer_count < MIN_DATA_BUFFER_COUNT {
            log::warn!("buffer count {buffer_count} is too small for {key:?}");
            MIN_DATA_BUFFER_COUNT
        } else {
            buffer_count
        };
        Self {
            key,
            variant: PlaneVariant::for_type(key.plane_type),
            state: PlaneState::Disabled,
            display: DisplayId::PRIMARY,
            zorder: 0,
            position: Position::default(),
            src_crop: Crop::default(),
            transform: Transform::IDENTITY,
            plane_alpha: 0xff,
            blending: Blending::None,
            mode: (0, 0),
            current: BufferHandle::NULL,
            is_protected: false,
            update_masks: 0,
            data_buffers: BufferCache::new(buffer_count),
            active_buffers: VecDeque::with_capacity(MIN_DATA_BUFFER_COUNT),
            context: None,
        }
    }

    /// Identity of the plane.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> PlaneKey {
        self.key
    }

    /// Plane type.
    #[inline]
    #[must_use]
    pub const fn plane_type(&self) -> PlaneType {
        self.key.plane_type
    }

    /// Index within the type.
    #[inline]
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.key.index
    }

    /// Hardware state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> PlaneState {
        self.state
    }

    /// Returns `true` while scanning out.
    #[inline]
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        matches!(self.state, PlaneState::Enabled)
    }

    /// Display pipe the plane was last assigned to.
    #[inline]
    #[must_use]
    pub const fn display(&self) -> DisplayId {
        self.display
    }

    /// Z-order slot within the pipe.
    #[inline]
    #[must_use]
    pub const fn zorder(&self) -> u32 {
        self.zorder
    }

    /// Handle of the bound buffer, or [`BufferHandle::NULL`].
    #[inline]
    #[must_use]
    pub const fn current_buffer(&self) -> BufferHandle {
        self.current
    }

    /// Pending update mask bits.
    #[inline]
    #[must_use]
    pub const fn update_masks(&self) -> u32 {
        self.update_masks
    }

    /// Returns `true` if the bound buffer holds protected content.
    #[inline]
    #[must_use]
    pub const fn is_protected(&self) -> bool {
        self.is_protected
    }

    /// Current destination rectangle.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> Position {
        self.position
    }

    /// Register context built from the bound buffer.
    #[inline]
    #[must_use]
    pub const fn context(&self) -> Option<&PlaneContext> {
        self.context.as_ref()
    }

    /// Handles of the buffers kept mapped for in-flight scan-out, oldest
    /// first.
    pub fn active_buffers(&self) -> impl Iterator<Item = BufferHandle> + '_ {
        self.active_buffers.iter().copied()
    }

    /// Number of cached mappings.
    #[must_use]
    pub fn cached_buffers(&self) -> usize {
        self.data_buffers.len()
    }

    /// Turns the plane on.
    pub fn enable(&mut self, driver: &mut dyn PlaneDriver) -> Result<(), PlaneError> {
        if self.is_enabled() {
            return Ok(());
        }
        driver.enable(self.key)?;
        self.state = PlaneState::Enabled;
        log::debug!("{:?} enabled", self.key);
        Ok(())
    }

    /// Turns the plane off.
    pub fn disable(&mut self, driver: &mut dyn PlaneDriver) -> Result<(), PlaneError> {
        if !self.is_enabled() {
            return Ok(());
        }
        driver.disable(self.key)?;
        self.state = PlaneState::Disabled;
        log::debug!("{:?} disabled", self.key);
        Ok(())
    }

    /// Assigns the plane to a display pipe.
    pub fn set_display(&mut self, display: DisplayId) {
        self.display = display;
    }

    /// Sets the display mode used to clamp positions. Zero disables
    /// clamping.
    pub fn set_mode_size(&mut self, width: i32, height: i32) {
        self.mode = (width, height);
    }

    /// Sets the z-order slot within the pipe.
    pub fn set_zorder(&mut self, slot: u32) {
        self.zorder = slot;
        if let Some(context) = &mut self.context {
            context.zorder = slot;
        }
    }

    fn clamp_position(&self, mut pos: Position) -> Position {
        let (mode_w, mode_h) = self.mode;
        if mode_w == 0 || mode_h == 0 {
            return pos;
        }
        pos.x = pos.x.max(0);
        pos.y = pos.y.max(0);
        if pos.x.saturating_add(pos.width) > mode_w {
            pos.width = (mode_w - pos.x).max(0);
        }
        if pos.y.saturating_add(pos.height) > mode_h {
            pos.height = (mode_h - pos.y).max(0);
        }
        pos
    }

    /// Sets the destination rectangle, clamped to the display mode.
    pub fn set_position(&mut self, position: Position) {
        let position = self.clamp_position(position);
        if position == self.position {
            return;
        }
        self.position = position;
        self.update_masks |= Self::POSITION_CHANGED;
        log::trace!("{:?} position {:?}", self.key, self.position);
    }

    /// Sets the source crop.
    pub fn set_source_crop(&mut self, crop: Crop) {
        if crop == self.src_crop {
            return;
        }
        self.src_crop = crop;
        self.update_masks |= Self::SOURCE_CROP_CHANGED;
    }

    /// Sets the buffer transform.
    pub fn set_transform(&mut self, transform: Transform) {
        if transform == self.transform {
            return;
        }
        self.transform = transform;
        self.update_masks |= Self::TRANSFORM_CHANGED;
    }

    /// Sets whole-plane alpha and the blend mode. Takes effect on the next
    /// buffer bind.
    pub fn set_plane_alpha(&mut self, alpha: u8, blending: Blending) {
        self.plane_alpha = alpha;
        self.blending = blending;
    }

    /// Binds `handle` as the plane's source buffer.
    ///
    /// Nothing happens if neither the buffer nor any attribute changed since
    /// the last flip, unless the content is protected.
    pub fn set_data_buffer<G: Gralloc>(
        &mut self,
        handle: BufferHandle,
        buffers: &mut BufferManager<G>,
    ) -> Result<(), PlaneError> {
        if handle.is_null() {
            log::error!("{:?}: invalid buffer handle", self.key);
            return Err(PlaneError::InvalidBuffer);
        }
        if handle != self.current {
            self.update_masks |= Self::BUFFER_CHANGED;
        }
        if self.update_masks == 0 && !self.is_protected {
            return Ok(());
        }

        let info = *buffers.lock_data_buffer(handle)?.info();
        self.is_protected = is_protected_usage(info.usage);

        let mapper = match self.data_buffers.get_mapper(handle) {
            Some(mapper) => mapper,
            None => {
                if self.data_buffers.is_full() {
                    self.invalidate_buffer_cache(buffers);
                }
                let mapper = buffers.map(&info)?;
                if let Err(err) = self.data_buffers.add_mapper(handle, mapper.clone()) {
                    log::error!("{:?}: failed to cache mapper: {err}", self.key);
                    buffers.unmap(handle);
                    return Err(err.into());
                }
                mapper
            }
        };

        {
            let mut m = mapper.borrow_mut();
            m.set_crop(self.src_crop);
            m.set_compressed(is_compression_usage(info.usage));
        }

        self.bind_mapper(&mapper)?;
        self.current = handle;
        self.update_active_buffers(handle, buffers);
        Ok(())
    }

    /// Rebuilds the register context from `mapper`.
    pub fn bind_mapper(&mut self, mapper: &SharedMapper) -> Result<(), PlaneError> {
        let registers = self.variant.registers(
            &*mapper.borrow(),
            self.position,
            self.transform,
            self.plane_alpha,
            self.blending,
        )?;
        self.context = Some(PlaneContext {
            key: self.key,
            zorder: self.zorder,
            position: self.position,
            registers,
        });
        Ok(())
    }

    fn update_active_buffers<G: Gralloc>(
        &mut self,
        handle: BufferHandle,
        buffers: &mut BufferManager<G>,
    ) {
        if self.active_buffers.len() >= MIN_DATA_BUFFER_COUNT {
            if let Some(oldest) = self.active_buffers.pop_front() {
                buffers.unmap(oldest);
            }
        }
        if !self.active_buffers.contains(&handle) && buffers.retain(handle) {
            self.active_buffers.push_back(handle);
        }
    }

    /// Queues the bound buffer for scan-out and returns the register context
    /// to post.
    pub fn flip(&mut self) -> Result<&PlaneContext, PlaneError> {
        if !self.is_enabled() {
            log::error!("flip on {:?} while disabled", self.key);
            return Err(PlaneError::NotEnabled(self.key));
        }
        self.context
            .as_ref()
            .ok_or(PlaneError::NoBuffer(self.key))
    }

    /// Clears pending updates once the flip was posted.
    pub fn post_flip(&mut self) {
        self.update_masks = 0;
    }

    /// Drops every cached mapping and forgets the bound buffer.
    pub fn invalidate_buffer_cache<G: Gralloc>(&mut self, buffers: &mut BufferManager<G>) {
        log::trace!("{:?}: invalidating buffer cache", self.key);
        while let Some(mapper) = self.data_buffers.mapper_at(0) {
            let handle = mapper.borrow().info().handle;
            self.data_buffers.remove_mapper(&mapper);
            buffers.unmap(handle);
        }
        self.current = BufferHandle::NULL;
        self.context = None;
    }

    /// Releases the buffers kept for in-flight scan-out.
    pub fn invalidate_active_buffers<G: Gralloc>(&mut self, buffers: &mut BufferManager<G>) {
        for handle in self.active_buffers.drain(..) {
            buffers.unmap(handle);
        }
    }

    /// Returns the plane to its freshly created state, keeping its hardware
    /// state.
    pub fn reset<G: Gralloc>(&mut self, buffers: &mut BufferManager<G>) {
        self.invalidate_buffer_cache(buffers);
        self.invalidate_active_buffers(buffers);
        self.update_masks = 0;
        self.is_protected = false;
        self.position = Position::default();
        self.src_crop = Crop::default();
        self.transform = Transform::IDENTITY;
    }
}

impl fmt::Debug for DisplayPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayPlane")
            .field("key", &self.key)
            .field("state", &self.state)
            .field("display", &self.display)
            .field("zorder", &self.zorder)
            .field("position", &self.position)
            .field("current", &self.current)
            .field("update_masks", &self.update_masks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::usage;
    use crate::buffer_manager::BufferManagerConfig;
    use crate::testing::{FakeDriver, FakeGralloc, rgba};

    fn setup() -> (DisplayPlane, FakeDriver, BufferManager<FakeGralloc>) {
        let gralloc = FakeGralloc::new();
        for h in 1..=8 {
            gralloc.register(rgba(h, 64, 64));
        }
        let bm = BufferManager::new(gralloc, BufferManagerConfig { pool_size: 32 });
        let plane = DisplayPlane::new(PlaneKey::new(PlaneType::Sprite, 0), 3);
        (plane, FakeDriver::default(), bm)
    }

    #[test]
    fn flip_requires_enabled_plane() {
        let (mut plane, mut driver, mut bm) = setup();
        plane.set_data_buffer(BufferHandle(1), &mut bm).unwrap();
        assert_eq!(
            plane.flip().err(),
            Some(PlaneError::NotEnabled(plane.key()))
        );
        plane.enable(&mut driver).unwrap();
        assert!(plane.flip().is_ok());
        plane.disable(&mut driver).unwrap();
        assert!(plane.flip().is_err(), "disabled again");
    }

    #[test]
    fn flip_without_buffer_is_an_error() {
        let (mut plane, mut driver, _bm) = setup();
        plane.enable(&mut driver).unwrap();
        assert_eq!(plane.flip().err(), Some(PlaneError::NoBuffer(plane.key())));
    }

    #[test]
    fn driver_failure_keeps_state() {
        let (mut plane, mut driver, _bm) = setup();
        driver.fail_enable(plane.key());
        assert!(plane.enable(&mut driver).is_err());
        assert_eq!(plane.state(), PlaneState::Disabled);
    }

    #[test]
    fn unchanged_buffer_is_not_rebound() {
        let (mut plane, _driver, mut bm) = setup();
        plane.set_data_buffer(BufferHandle(1), &mut bm).unwrap();
        assert_ne!(plane.update_masks() & DisplayPlane::BUFFER_CHANGED, 0);
        plane.post_flip();
        let describes = bm.gralloc().describe_calls();
        plane.set_data_buffer(BufferHandle(1), &mut bm).unwrap();
        assert_eq!(bm.gralloc().describe_calls(), describes, "early return");
        assert_eq!(plane.update_masks(), 0);
    }

    #[test]
    fn active_ring_keeps_three_buffers_mapped() {
        let (mut plane, _driver, mut bm) = setup();
        for h in 1..=5 {
            plane.set_data_buffer(BufferHandle(h), &mut bm).unwrap();
            plane.post_flip();
        }
        let active: alloc::vec::Vec<_> = plane.active_buffers().collect();
        assert_eq!(active, [BufferHandle(3), BufferHandle(4), BufferHandle(5)]);
        assert_eq!(bm.ref_count(BufferHandle(1)), 0, "evicted from cache and ring");
        assert!(plane.cached_buffers() <= 3);
    }

    #[test]
    fn reset_releases_every_reference() {
        let (mut plane, _driver, mut bm) = setup();
        for h in 1..=4 {
            plane.set_data_buffer(BufferHandle(h), &mut bm).unwrap();
        }
        plane.reset(&mut bm);
        assert_eq!(bm.mapped_count(), 0);
        assert!(plane.current_buffer().is_null());
        assert!(plane.context().is_none());
    }

    #[test]
    fn protected_buffer_is_always_rebound() {
        let (mut plane, _driver, mut bm) = setup();
        bm.gralloc().register(crate::buffer::BufferInfo::new(
            BufferHandle(20),
            PixelFormat::RGBA_8888,
            64,
            64,
            usage::PROTECTED,
        ));
        plane.set_data_buffer(BufferHandle(20), &mut bm).unwrap();
        assert!(plane.is_protected());
        plane.post_flip();
        let describes = bm.gralloc().describe_calls();
        plane.set_data_buffer(BufferHandle(20), &mut bm).unwrap();
        assert_eq!(bm.gralloc().describe_calls(), describes + 1);
    }

    #[test]
    fn position_is_clamped_to_mode() {
        let (mut plane, _driver, _bm) = setup();
        plane.set_mode_size(100, 50);
        plane.set_position(Position::new(-5, 10, 200, 60));
        assert_eq!(plane.position(), Position::new(0, 10, 100, 40));
        assert_ne!(plane.update_masks() & DisplayPlane::POSITION_CHANGED, 0);
    }

    #[test]
    fn offscreen_position_is_stable_across_frames() {
        let (mut plane, _driver, _bm) = setup();
        plane.set_mode_size(100, 50);
        plane.set_position(Position::new(-5, 10, 200, 60));
        plane.post_flip();
        plane.set_position(Position::new(-5, 10, 200, 60));
        assert_eq!(
            plane.update_masks() & DisplayPlane::POSITION_CHANGED,
            0,
            "same clamped position is not an update"
        );
    }

    #[test]
    fn huge_position_clamps_without_overflow() {
        let (mut plane, _driver, _bm) = setup();
        plane.set_mode_size(100, 50);
        plane.set_position(Position::new(90, 40, i32::MAX, i32::MAX));
        assert_eq!(plane.position(), Position::new(90, 40, 10, 10));
        plane.set_position(Position::new(300, 0, 20, 20));
        assert_eq!(plane.position(), Position::new(300, 0, 0, 20), "fully off the right edge");
    }

    #[test]
    fn null_handle_is_rejected() {
        let (mut plane, _driver, mut bm) = setup();
        assert_eq!(
            plane.set_data_buffer(BufferHandle::NULL, &mut bm),
            Err(PlaneError::InvalidBuffer)
        );
    }

    #[test]
    fn crop_rounds_and_clamps() {
        let crop = crop_from_rect(Rect::new(-2.0, 1.4, 10.6, 20.0));
        assert_eq!(crop, Crop::new(0, 1, 11, 19));
    }
}
