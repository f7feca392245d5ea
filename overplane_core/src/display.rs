// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-frame display and layer descriptors.
//!
//! The window system hands the composer one [`DisplayContents`] per display
//! each frame. Every [`LayerContents`] names a buffer, where to sample it
//! from, where to put it on screen, and how to blend it. The composer writes
//! back a [`CompositionType`] per layer and fills release and retire
//! [`Fence`]s after commit.

use alloc::vec::Vec;
use core::fmt;

use kurbo::Rect;

use crate::buffer::BufferHandle;

/// Identifies a logical display.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DisplayId(pub u32);

impl DisplayId {
    /// The built-in panel.
    pub const PRIMARY: Self = Self(0);
    /// The external (HDMI) display.
    pub const EXTERNAL: Self = Self(1);
    /// A virtual display backed by memory.
    pub const VIRTUAL: Self = Self(2);
    /// Number of logical displays.
    pub const COUNT: usize = 3;

    /// Returns `true` for displays scanned out by a hardware pipe.
    #[inline]
    #[must_use]
    pub const fn is_physical(self) -> bool {
        self.0 == Self::PRIMARY.0 || self.0 == Self::EXTERNAL.0
    }

    /// Returns the display index as a `usize` for table lookups.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DisplayId({})", self.0)
    }
}

/// Active mode of a display.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DisplayMode {
    /// Horizontal resolution.
    pub width: u32,
    /// Vertical resolution.
    pub height: u32,
    /// Refresh rate in Hz.
    pub refresh_hz: u32,
}

impl DisplayMode {
    /// Creates a mode.
    #[must_use]
    pub const fn new(width: u32, height: u32, refresh_hz: u32) -> Self {
        Self {
            width,
            height,
            refresh_hz,
        }
    }

    /// 720x1280 at 60 Hz, a common phone panel.
    pub const PANEL_720P: Self = Self::new(720, 1280, 60);

    /// 1920x1080 at 60 Hz.
    pub const HDMI_1080P: Self = Self::new(1920, 1080, 60);
}

/// A sync fence file descriptor, or [`Fence::NONE`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fence(pub i32);

impl Fence {
    /// No fence; the buffer is ready immediately.
    pub const NONE: Self = Self(-1);

    /// Returns `true` if this refers to an actual fence.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl Default for Fence {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Fence({})", self.0)
        } else {
            f.write_str("Fence(none)")
        }
    }
}

/// Buffer transform bits, applied before the layer is placed on screen.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Transform(pub u32);

impl Transform {
    /// No transform.
    pub const IDENTITY: Self = Self(0);
    /// Horizontal mirror.
    pub const FLIP_H: Self = Self(1);
    /// Vertical mirror.
    pub const FLIP_V: Self = Self(2);
    /// 90 degrees clockwise.
    pub const ROT_90: Self = Self(4);
    /// 180 degrees.
    pub const ROT_180: Self = Self(3);
    /// 270 degrees clockwise.
    pub const ROT_270: Self = Self(7);

    /// Returns `true` for the identity transform.
    #[inline]
    #[must_use]
    pub const fn is_identity(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` for the pure rotations overlays support.
    #[inline]
    #[must_use]
    pub const fn is_rotation(self) -> bool {
        matches!(self.0, 0 | 3 | 4 | 7)
    }

    /// Returns `true` if width and height swap under this transform.
    #[inline]
    #[must_use]
    pub const fn swaps_axes(self) -> bool {
        self.0 & Self::ROT_90.0 != 0
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transform({:#x})", self.0)
    }
}

/// How a layer blends with what is beneath it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Blending {
    /// Opaque; the layer replaces its destination.
    #[default]
    None,
    /// Source color is premultiplied by alpha.
    Premultiplied,
    /// Source color is straight alpha.
    Coverage,
}

/// How a layer gets onto the screen this frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum CompositionType {
    /// Rendered by the GPU into the framebuffer target.
    #[default]
    Framebuffer,
    /// Scanned out directly by a hardware plane.
    Overlay,
    /// The GPU composition result itself.
    FramebufferTarget,
    /// Scanned out by the cursor plane.
    CursorOverlay,
}

/// Per-layer flags set by the window system.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LayerFlags(pub u32);

impl LayerFlags {
    /// The composer must not touch this layer; the GPU draws it.
    pub const SKIP_LAYER: Self = Self(1);
    /// The layer is a pointer cursor.
    pub const IS_CURSOR_LAYER: Self = Self(2);

    /// Returns `true` if all bits in `other` are set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl fmt::Debug for LayerFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LayerFlags({:#x})", self.0)
    }
}

/// One application layer for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerContents {
    /// Composition decision; written by `prepare`.
    pub composition_type: CompositionType,
    /// Window-system flags.
    pub flags: LayerFlags,
    /// Buffer to scan out, or [`BufferHandle::NULL`].
    pub handle: BufferHandle,
    /// Buffer transform.
    pub transform: Transform,
    /// Blend mode.
    pub blending: Blending,
    /// Region of the buffer to sample, in buffer pixels.
    pub source_crop: Rect,
    /// Destination on the display, in display pixels.
    pub display_frame: Rect,
    /// Whole-layer alpha, 0..=255.
    pub plane_alpha: u8,
    /// Fence to wait on before reading the buffer.
    pub acquire_fence: Fence,
    /// Fence signalled when the buffer may be reused; written by `commit`.
    pub release_fence: Fence,
}

impl LayerContents {
    /// Creates an opaque layer scanning `handle` 1:1 from `source_crop`
    /// into `display_frame`.
    #[must_use]
    pub fn new(handle: BufferHandle, source_crop: Rect, display_frame: Rect) -> Self {
        Self {
            composition_type: CompositionType::Framebuffer,
            flags: LayerFlags::default(),
            handle,
            transform: Transform::IDENTITY,
            blending: Blending::None,
            source_crop,
            display_frame,
            plane_alpha: 0xff,
            acquire_fence: Fence::NONE,
            release_fence: Fence::NONE,
        }
    }

    /// Creates the GPU composition target layer covering `frame`.
    #[must_use]
    pub fn framebuffer_target(handle: BufferHandle, frame: Rect) -> Self {
        Self {
            composition_type: CompositionType::FramebufferTarget,
            ..Self::new(handle, frame, frame)
        }
    }
}

/// All layers of one display for one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DisplayContents {
    /// Layers from bottom to top. The framebuffer target, if any, is last.
    pub layers: Vec<LayerContents>,
    /// Set when layer geometry changed since the previous frame.
    pub geometry_changed: bool,
    /// Fence signalled when this frame leaves the screen; written by `commit`.
    pub retire_fence: Fence,
}

impl DisplayContents {
    /// Creates contents with `layers` and geometry marked changed.
    #[must_use]
    pub fn new(layers: Vec<LayerContents>) -> Self {
        Self {
            layers,
            geometry_changed: true,
            retire_fence: Fence::NONE,
        }
    }

    /// Returns the index of the framebuffer target layer, if present.
    #[must_use]
    pub fn framebuffer_target(&self) -> Option<usize> {
        self.layers
            .iter()
            .rposition(|l| l.composition_type == CompositionType::FramebufferTarget)
    }
}
