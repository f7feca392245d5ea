// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Which layers each plane type can scan out.
//!
//! The layer list asks these predicates before offering a layer to the
//! plane manager. Each check logs why it refused at `trace!` level so a
//! GPU fallback can be explained from logs.

use crate::buffer::{BufferInfo, is_protected_usage};
use crate::display::{Blending, LayerContents, Transform};

use super::{PlaneType, Position, crop_from_rect};

const RGB_MAX_STRIDE: u32 = 16384;
const OVERLAY_MAX_STRIDE: u32 = 8192;
const OVERLAY_MAX_STRIDE_PACKED: u32 = 4096;
const OVERLAY_MAX_SIZE: u32 = 2047;
const OVERLAY_MIN_SCALE: f64 = 0.25;
const OVERLAY_MAX_SCALE: f64 = 4.0;

/// Returns `true` if `plane_type` can read `info`'s pixel format.
#[must_use]
pub fn is_format_supported(plane_type: PlaneType, info: &BufferInfo) -> bool {
    let ok = match plane_type {
        PlaneType::Primary | PlaneType::Sprite => info.format.is_rgb(),
        PlaneType::Overlay => info.format.is_yuv(),
        PlaneType::Cursor => info.format.has_alpha(),
    };
    if !ok {
        log::trace!("{plane_type:?}: unsupported format {:?}", info.format);
    }
    ok
}

/// Returns `true` if `plane_type` can handle `info`'s dimensions and pitch.
#[must_use]
pub fn is_size_supported(plane_type: PlaneType, info: &BufferInfo) -> bool {
    let stride = info.stride.primary();
    let ok = match plane_type {
        PlaneType::Primary | PlaneType::Sprite => stride <= RGB_MAX_STRIDE,
        PlaneType::Overlay => {
            let max = if info.format.is_packed_yuv() {
                OVERLAY_MAX_STRIDE_PACKED
            } else {
                OVERLAY_MAX_STRIDE
            };
            stride <= max
        }
        PlaneType::Cursor => matches!(info.width, 64 | 128 | 256) && info.height <= info.width,
    };
    if !ok {
        log::trace!(
            "{plane_type:?}: unsupported size {}x{} stride {stride}",
            info.width,
            info.height
        );
    }
    ok
}

/// Returns `true` if `plane_type` can apply `blending`.
#[must_use]
pub fn is_blending_supported(plane_type: PlaneType, blending: Blending) -> bool {
    match plane_type {
        PlaneType::Overlay => blending == Blending::None,
        PlaneType::Primary | PlaneType::Sprite | PlaneType::Cursor => true,
    }
}

/// Returns `true` if `plane_type` can apply `transform`.
#[must_use]
pub fn is_transform_supported(plane_type: PlaneType, transform: Transform) -> bool {
    match plane_type {
        PlaneType::Overlay => transform.is_rotation(),
        PlaneType::Primary | PlaneType::Sprite | PlaneType::Cursor => transform.is_identity(),
    }
}

/// Returns `true` if `plane_type` can map the layer's source crop onto its
/// display frame.
#[must_use]
pub fn is_scaling_supported(plane_type: PlaneType, layer: &LayerContents, protected: bool) -> bool {
    let src = crop_from_rect(layer.source_crop);
    let dst = Position::from_rect(layer.display_frame);
    let (src_w, src_h) = (i64::from(src.width), i64::from(src.height));
    let (dst_w, dst_h) = (i64::from(dst.width), i64::from(dst.height));

    match plane_type {
        PlaneType::Primary | PlaneType::Sprite | PlaneType::Cursor => {
            src_w == dst_w && src_h == dst_h
        }
        PlaneType::Overlay => {
            let max = i64::from(OVERLAY_MAX_SIZE);
            if src_w > max || src_h > max {
                return false;
            }
            if dst_w <= 1 || dst_h <= 1 || src_w <= 1 || src_h <= 1 {
                log::trace!("overlay: degenerate size {dst_w}x{dst_h}");
                return false;
            }
            let (src_w, src_h) = if layer.transform.swaps_axes() {
                (src_h, src_w)
            } else {
                (src_w, src_h)
            };
            if !protected {
                if src.x & 63 != 0 {
                    log::trace!("overlay: source x {} is not 64-aligned", src.x);
                    return false;
                }
                let (sx, sy) = (src_w as f64 / dst_w as f64, src_h as f64 / dst_h as f64);
                let range = OVERLAY_MIN_SCALE..=OVERLAY_MAX_SCALE;
                if !range.contains(&sx) || !range.contains(&sy) {
                    log::trace!("overlay: scale {sx}x{sy} out of range");
                    return false;
                }
            }
            true
        }
    }
}

/// Returns `true` if `layer`, whose buffer is described by `info`, can be
/// scanned out by a plane of `plane_type`.
#[must_use]
pub fn supports_layer(plane_type: PlaneType, info: &BufferInfo, layer: &LayerContents) -> bool {
    is_format_supported(plane_type, info)
        && is_size_supported(plane_type, info)
        && is_blending_supported(plane_type, layer.blending)
        && is_transform_supported(plane_type, layer.transform)
        && is_scaling_supported(plane_type, layer, is_protected_usage(info.usage))
}
