// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-type register programming.
//!
//! Each plane type turns a mapped buffer into a different register layout.
//! The closed set of layouts is [`PlaneRegisters`]; [`PlaneContext`] wraps
//! it with the plane's identity and placement so the commit path can post it
//! without knowing the plane type.

use crate::buffer::{PixelFormat, Stride};
use crate::display::{Blending, Transform};
use crate::mapper::BufferMapper;

use super::{PlaneError, PlaneKey, PlaneType, Position};

/// Hardware register values for one plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaneRegisters {
    /// Primary and sprite planes.
    Rgb {
        /// Device offset of the surface.
        surface: u32,
        /// Byte offset of the source crop origin within the surface.
        linear_offset: u32,
        /// Row pitch.
        stride: u32,
        /// Pixel format.
        format: PixelFormat,
        /// Whole-plane alpha.
        alpha: u8,
        /// Blend mode.
        blending: Blending,
        /// Render-compressed source.
        compressed: bool,
    },
    /// Video overlay planes.
    Overlay {
        /// Device offset of the first luma sample.
        y_offset: u32,
        /// Device offset of the first U (or UV) sample.
        u_offset: u32,
        /// Device offset of the first V (or UV) sample.
        v_offset: u32,
        /// Luma row pitch.
        y_stride: u32,
        /// Chroma row pitch.
        uv_stride: u32,
        /// Source width.
        width: u32,
        /// Source height.
        height: u32,
        /// Pixel format.
        format: PixelFormat,
        /// Rotation applied by the overlay.
        transform: Transform,
    },
    /// Cursor planes.
    Cursor {
        /// Device offset of the cursor image.
        base: u32,
        /// Control register: size mode and alpha enable.
        control: u32,
        /// Packed position register.
        position: u32,
    },
}

/// Everything needed to post one plane in a commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneContext {
    /// Plane being programmed.
    pub key: PlaneKey,
    /// Z-order slot.
    pub zorder: u32,
    /// Destination rectangle.
    pub position: Position,
    /// Register values.
    pub registers: PlaneRegisters,
}

/// Packs a cursor position into its register layout.
///
/// Each coordinate keeps 12 bits of magnitude; a negative coordinate sets
/// its sign bit (bit 15 for x, bit 31 for y).
#[must_use]
pub const fn cursor_position_bits(x: i32, y: i32) -> u32 {
    let mut bits = 0_u32;
    if x < 0 {
        bits |= 1 << 15;
    }
    if y < 0 {
        bits |= 1 << 31;
    }
    let ax = x.unsigned_abs() & 0xfff;
    let ay = y.unsigned_abs() & 0xfff;
    bits | (ay << 16) | ax
}

const CURSOR_ALPHA_ENABLE: u32 = 1 << 5;

const fn cursor_size_mode(size: u32) -> Option<u32> {
    match size {
        64 => Some(0x7),
        128 => Some(0x2),
        256 => Some(0x3),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum PlaneVariant {
    Rgb,
    Overlay,
    Cursor,
}

impl PlaneVariant {
    pub(super) const fn for_type(plane_type: PlaneType) -> Self {
        match plane_type {
            PlaneType::Primary | PlaneType::Sprite => Self::Rgb,
            PlaneType::Overlay => Self::Overlay,
            PlaneType::Cursor => Self::Cursor,
        }
    }

    pub(super) fn registers(
        self,
        mapper: &dyn BufferMapper,
        position: Position,
        transform: Transform,
        alpha: u8,
        blending: Blending,
    ) -> Result<PlaneRegisters, PlaneError> {
        let info = mapper.info();
        let base = mapper
            .sub_mapping(0)
            .ok_or(PlaneError::Map(crate::mapper::MapError::NotMapped))?;
        let crop = mapper.crop();

        match self {
            Self::Rgb => {
                if !info.format.is_rgb() {
                    return Err(PlaneError::UnsupportedFormat(info.format));
                }
                let stride = info.stride.primary();
                let linoff = u64::from(crop.y) * u64::from(stride)
                    + u64::from(crop.x) * u64::from(info.bpp);
                let limit = u64::from(stride) * u64::from(info.height);
                if linoff > limit {
                    log::error!("{:?}: linear offset {linoff} beyond {limit}", info.handle);
                    return Err(PlaneError::InvalidOffset);
                }
                let linear_offset = u32::try_from(linoff).map_err(|_| PlaneError::InvalidOffset)?;
                Ok(PlaneRegisters::Rgb {
                    surface: base.device_offset,
                    linear_offset,
                    stride,
                    format: info.format,
                    alpha,
                    blending,
                    compressed: mapper.is_compressed(),
                })
            }
            Self::Overlay => {
                if !info.format.is_yuv() {
                    return Err(PlaneError::UnsupportedFormat(info.format));
                }
                let (luma, chroma) = match info.stride {
                    Stride::Yuv { luma, chroma } => (luma, chroma),
                    Stride::Rgb { stride } => (stride, 0),
                };
                if u64::from(crop.x) + u64::from(crop.width) > u64::from(info.width)
                    || u64::from(crop.y) + u64::from(crop.height) > u64::from(info.height)
                {
                    log::error!("{:?}: crop {crop:?} outside the buffer", info.handle);
                    return Err(PlaneError::InvalidOffset);
                }
                let register =
                    |offset: u64| u32::try_from(offset).map_err(|_| PlaneError::InvalidOffset);
                let (luma, chroma) = (u64::from(luma), u64::from(chroma));
                let (x, y) = (u64::from(crop.x), u64::from(crop.y));
                let height = u64::from(info.height);
                let y_base = u64::from(base.device_offset);
                let y_offset = register(y_base + y * luma + x * u64::from(info.bpp))?;
                // Chroma lives in its own sub-buffer when the allocator
                // split it, otherwise right after the luma plane.
                let uv_base = mapper
                    .sub_mapping(1)
                    .map_or(y_base + luma * height, |sub| u64::from(sub.device_offset));
                let (u_offset, v_offset) = match info.format {
                    PixelFormat::YUY2 | PixelFormat::UYVY => (0, 0),
                    PixelFormat::YV12 | PixelFormat::I420 => {
                        let half = chroma / 2;
                        let first = uv_base + (y / 2) * half + x / 2;
                        let second = first + half * (height / 2);
                        let (first, second) = (register(first)?, register(second)?);
                        if info.format == PixelFormat::YV12 {
                            (second, first)
                        } else {
                            (first, second)
                        }
                    }
                    _ => {
                        let uv = register(uv_base + (y / 2) * chroma + x)?;
                        (uv, uv)
                    }
                };
                Ok(PlaneRegisters::Overlay {
                    y_offset,
                    u_offset,
                    v_offset,
                    y_stride: register(luma)?,
                    uv_stride: register(chroma)?,
                    width: crop.width,
                    height: crop.height,
                    format: info.format,
                    transform,
                })
            }
            Self::Cursor => {
                if !info.format.is_rgb() {
                    return Err(PlaneError::UnsupportedFormat(info.format));
                }
                let mode = cursor_size_mode(info.width).ok_or(PlaneError::UnsupportedSize {
                    width: info.width,
                    height: info.height,
                })?;
                let control = if info.format.has_alpha() {
                    mode | CURSOR_ALPHA_ENABLE
                } else {
                    mode
                };
                Ok(PlaneRegisters::Cursor {
                    base: base.device_offset,
                    control,
                    position: cursor_position_bits(position.x, position.y),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferHandle;
    use crate::mapper::Crop;
    use crate::testing::fake_mapped;

    fn build(
        variant: PlaneVariant,
        format: PixelFormat,
        width: u32,
        height: u32,
        crop: Crop,
    ) -> Result<PlaneRegisters, PlaneError> {
        let mapper = fake_mapped(BufferHandle(1), format, width, height);
        mapper.borrow_mut().set_crop(crop);
        variant.registers(
            &*mapper.borrow(),
            Position::new(10, -4, width as i32, height as i32),
            Transform::IDENTITY,
            0xff,
            Blending::Premultiplied,
        )
    }

    #[test]
    fn cursor_position_sign_bits() {
        assert_eq!(cursor_position_bits(10, 20), (20 << 16) | 10);
        assert_eq!(cursor_position_bits(-3, 5), (1 << 15) | (5 << 16) | 3);
        assert_eq!(cursor_position_bits(4, -7), (1 << 31) | (7 << 16) | 4);
        assert_eq!(cursor_position_bits(0x1234, 0), 0x234, "magnitude is 12 bits");
    }

    #[test]
    fn rgb_linear_offset() {
        let regs = build(
            PlaneVariant::Rgb,
            PixelFormat::BGRA_8888,
            100,
            50,
            Crop::new(2, 3, 10, 10),
        )
        .unwrap();
        let PlaneRegisters::Rgb { linear_offset, stride, .. } = regs else {
            panic!("expected RGB registers, got {regs:?}");
        };
        assert_eq!(stride, 400);
        assert_eq!(linear_offset, 3 * 400 + 2 * 4);
    }

    #[test]
    fn rgb_rejects_crop_outside_buffer() {
        let err = build(
            PlaneVariant::Rgb,
            PixelFormat::RGBA_8888,
            16,
            16,
            Crop::new(0, 17, 1, 1),
        );
        assert_eq!(err, Err(PlaneError::InvalidOffset));
    }

    #[test]
    fn rgb_rejects_yuv() {
        let err = build(PlaneVariant::Rgb, PixelFormat::NV12, 16, 16, Crop::new(0, 0, 16, 16));
        assert_eq!(err, Err(PlaneError::UnsupportedFormat(PixelFormat::NV12)));
    }

    #[test]
    fn cursor_control_bits() {
        let regs = build(PlaneVariant::Cursor, PixelFormat::RGBA_8888, 128, 128, Crop::default())
            .unwrap();
        let PlaneRegisters::Cursor { control, position, .. } = regs else {
            panic!("expected cursor registers, got {regs:?}");
        };
        assert_eq!(control, 0x2 | (1 << 5));
        assert_eq!(position, cursor_position_bits(10, -4));

        let err = build(PlaneVariant::Cursor, PixelFormat::RGBA_8888, 100, 100, Crop::default());
        assert!(matches!(err, Err(PlaneError::UnsupportedSize { .. })));
    }

    #[test]
    fn overlay_nv12_offsets() {
        let regs = build(
            PlaneVariant::Overlay,
            PixelFormat::NV12,
            64,
            32,
            Crop::new(4, 2, 32, 16),
        )
        .unwrap();
        let PlaneRegisters::Overlay { y_offset, u_offset, v_offset, width, .. } = regs else {
            panic!("expected overlay registers, got {regs:?}");
        };
        assert_eq!(u_offset, v_offset, "NV12 chroma is interleaved");
        assert!(u_offset > y_offset);
        assert_eq!(width, 32);
    }

    #[test]
    fn overlay_rejects_crop_outside_buffer() {
        let wide = build(
            PlaneVariant::Overlay,
            PixelFormat::YUY2,
            64,
            32,
            Crop::new(u32::MAX / 2, 0, 32, 16),
        );
        assert_eq!(wide, Err(PlaneError::InvalidOffset));

        let past_edge = build(PlaneVariant::Overlay, PixelFormat::NV12, 64, 32, Crop::new(40, 0, 32, 16));
        assert_eq!(past_edge, Err(PlaneError::InvalidOffset), "x + width beyond the buffer");

        let tall = build(PlaneVariant::Overlay, PixelFormat::NV12, 64, 32, Crop::new(0, 20, 32, 16));
        assert_eq!(tall, Err(PlaneError::InvalidOffset), "y + height beyond the buffer");
    }
}
