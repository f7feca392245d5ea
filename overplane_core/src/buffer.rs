// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Graphics buffer handles and metadata.
//!
//! A [`BufferHandle`] is the opaque token another process passes us for a
//! buffer it allocated. [`GraphicBuffer`] is the decoded metadata for that
//! handle: geometry, [`PixelFormat`], [`Stride`], and usage bits. The
//! composer keeps one scratch `GraphicBuffer` and re-initializes it in place
//! with [`GraphicBuffer::reset_buffer`] for each lookup; callers that need to
//! keep the metadata take a [`BufferInfo`] copy.

use core::fmt;

/// Opaque identifier of a graphics buffer shared across processes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BufferHandle(pub u64);

impl BufferHandle {
    /// The invalid handle.
    pub const NULL: Self = Self(0);

    /// Returns `true` for [`BufferHandle::NULL`].
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferHandle({:#x})", self.0)
    }
}

/// Allocator usage bits.
pub mod usage {
    /// Sampled by the GPU.
    pub const HW_TEXTURE: u32 = 0x0000_0100;
    /// Rendered to by the GPU.
    pub const HW_RENDER: u32 = 0x0000_0200;
    /// Scanned out by a display plane.
    pub const HW_COMPOSER: u32 = 0x0000_0800;
    /// Allocated as a framebuffer.
    pub const HW_FB: u32 = 0x0000_1000;
    /// Content is protected; only secure paths may read it.
    pub const PROTECTED: u32 = 0x0000_4000;
    /// Content is stored in a compressed render format.
    pub const COMPRESSION: u32 = 0x8000_0000;
    /// Sentinel for "usage unknown"; satisfies no usage test.
    pub const INVALID: u32 = 0xffff_ffff;
}

/// Returns `true` if `usage` marks protected content.
#[inline]
#[must_use]
pub const fn is_protected_usage(usage: u32) -> bool {
    usage != usage::INVALID && usage & usage::PROTECTED != 0
}

/// Returns `true` if `usage` marks compressed content.
#[inline]
#[must_use]
pub const fn is_compression_usage(usage: u32) -> bool {
    usage != usage::INVALID && usage & usage::COMPRESSION != 0
}

/// Pixel format code as used by the allocator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PixelFormat(pub u32);

impl PixelFormat {
    /// 32-bit RGBA.
    pub const RGBA_8888: Self = Self(1);
    /// 32-bit RGB with ignored alpha.
    pub const RGBX_8888: Self = Self(2);
    /// Packed 24-bit RGB.
    pub const RGB_888: Self = Self(3);
    /// 16-bit RGB.
    pub const RGB_565: Self = Self(4);
    /// 32-bit BGRA.
    pub const BGRA_8888: Self = Self(5);
    /// 32-bit BGR with ignored alpha.
    pub const BGRX_8888: Self = Self(0x112);
    /// Planar Y, V, U.
    pub const YV12: Self = Self(0x3231_5659);
    /// Planar Y, U, V.
    pub const I420: Self = Self(0x3032_3449);
    /// Y plane with interleaved UV plane.
    pub const NV12: Self = Self(0x3231_564e);
    /// Packed YUYV.
    pub const YUY2: Self = Self(0x3259_5559);
    /// Packed UYVY.
    pub const UYVY: Self = Self(0x5956_5955);
    /// NV12 tiled by the video decoder.
    pub const NV12_VED: Self = Self(0x7fa0_0e00);
    /// NV12 tiled by the video decoder, top field first.
    pub const NV12_VEDT: Self = Self(0x7fa0_0f00);

    /// Returns `true` for the RGB formats a sprite can scan out.
    #[must_use]
    pub const fn is_rgb(self) -> bool {
        matches!(
            self,
            Self::RGBA_8888 | Self::RGBX_8888 | Self::BGRA_8888 | Self::BGRX_8888 | Self::RGB_565
        )
    }

    /// Returns `true` for YUV formats.
    #[must_use]
    pub const fn is_yuv(self) -> bool {
        matches!(
            self,
            Self::YV12
                | Self::I420
                | Self::NV12
                | Self::YUY2
                | Self::UYVY
                | Self::NV12_VED
                | Self::NV12_VEDT
        )
    }

    /// Returns `true` for single-plane packed YUV formats.
    #[must_use]
    pub const fn is_packed_yuv(self) -> bool {
        matches!(self, Self::YUY2 | Self::UYVY)
    }

    /// Returns `true` if the format carries a meaningful alpha channel.
    #[must_use]
    pub const fn has_alpha(self) -> bool {
        matches!(self, Self::RGBA_8888 | Self::BGRA_8888)
    }

    /// Bytes per pixel of the first plane.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::RGBA_8888 | Self::RGBX_8888 | Self::BGRA_8888 | Self::BGRX_8888 => 4,
            Self::RGB_888 => 3,
            Self::RGB_565 | Self::YUY2 | Self::UYVY => 2,
            _ => 1,
        }
    }
}

impl fmt::Debug for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PixelFormat({:#x})", self.0)
    }
}

/// Row pitch of a buffer's planes in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stride {
    /// Single-plane RGB (or packed YUV) buffer.
    Rgb {
        /// Row pitch.
        stride: u32,
    },
    /// Multi-plane YUV buffer.
    Yuv {
        /// Luma row pitch.
        luma: u32,
        /// Chroma row pitch.
        chroma: u32,
    },
}

impl Stride {
    /// Row pitch of the first plane.
    #[inline]
    #[must_use]
    pub const fn primary(self) -> u32 {
        match self {
            Self::Rgb { stride } => stride,
            Self::Yuv { luma, .. } => luma,
        }
    }
}

impl Default for Stride {
    fn default() -> Self {
        Self::Rgb { stride: 0 }
    }
}

/// Snapshot of a buffer's metadata.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BufferInfo {
    /// The handle the metadata describes.
    pub handle: BufferHandle,
    /// Pixel format.
    pub format: PixelFormat,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row pitch.
    pub stride: Stride,
    /// Allocator usage bits.
    pub usage: u32,
    /// Bytes per pixel of the first plane.
    pub bpp: u32,
}

impl BufferInfo {
    /// Builds metadata for a buffer, deriving the stride from `width`.
    #[must_use]
    pub const fn new(
        handle: BufferHandle,
        format: PixelFormat,
        width: u32,
        height: u32,
        usage: u32,
    ) -> Self {
        let bpp = format.bytes_per_pixel();
        let stride = if format.is_yuv() && !format.is_packed_yuv() {
            Stride::Yuv {
                luma: width,
                chroma: width,
            }
        } else {
            Stride::Rgb {
                stride: width * bpp,
            }
        };
        Self {
            handle,
            format,
            width,
            height,
            stride,
            usage,
            bpp,
        }
    }
}

/// Metadata for one buffer handle, re-initialized in place per lookup.
///
/// Deliberately not `Clone`: the composer owns a single instance per
/// allocator and copies out a [`BufferInfo`] when it must keep data.
#[derive(Debug, Default)]
pub struct GraphicBuffer {
    info: BufferInfo,
}

impl GraphicBuffer {
    /// Creates an empty buffer describing [`BufferHandle::NULL`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            info: BufferInfo {
                usage: usage::INVALID,
                ..BufferInfo::default()
            },
        }
    }

    /// Re-initializes this buffer to describe `info`.
    pub fn reset_buffer(&mut self, info: BufferInfo) {
        self.info = info;
    }

    /// The current metadata.
    #[inline]
    #[must_use]
    pub const fn info(&self) -> &BufferInfo {
        &self.info
    }

    /// The handle this buffer describes.
    #[inline]
    #[must_use]
    pub const fn handle(&self) -> BufferHandle {
        self.info.handle
    }

    /// Returns `true` if the buffer holds protected content.
    #[inline]
    #[must_use]
    pub const fn is_protected(&self) -> bool {
        is_protected_usage(self.info.usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_usage_matches_nothing() {
        assert!(!is_protected_usage(usage::INVALID));
        assert!(!is_compression_usage(usage::INVALID));
        assert!(is_protected_usage(usage::PROTECTED | usage::HW_COMPOSER));
        assert!(is_compression_usage(usage::COMPRESSION));
        assert!(!is_protected_usage(usage::HW_TEXTURE));
    }

    #[test]
    fn planar_yuv_gets_two_strides() {
        let nv12 = BufferInfo::new(BufferHandle(1), PixelFormat::NV12, 1920, 1080, 0);
        assert_eq!(
            nv12.stride,
            Stride::Yuv {
                luma: 1920,
                chroma: 1920
            }
        );
        let yuy2 = BufferInfo::new(BufferHandle(2), PixelFormat::YUY2, 640, 480, 0);
        assert_eq!(yuy2.stride, Stride::Rgb { stride: 1280 });
    }

    #[test]
    fn reset_replaces_metadata_in_place() {
        let mut buffer = GraphicBuffer::new();
        assert!(buffer.handle().is_null());
        assert!(!buffer.is_protected(), "empty buffer has invalid usage");
        buffer.reset_buffer(BufferInfo::new(
            BufferHandle(7),
            PixelFormat::RGBA_8888,
            64,
            64,
            usage::PROTECTED,
        ));
        assert_eq!(buffer.handle(), BufferHandle(7));
        assert!(buffer.is_protected());
        assert_eq!(buffer.info().stride.primary(), 256);
    }
}
