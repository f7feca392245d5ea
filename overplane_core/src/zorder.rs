// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Z-order configurations.
//!
//! A [`ZOrderConfig`] is the bottom-to-top list of layers one display wants
//! on hardware planes this frame. The layer list builds it; the plane
//! manager validates it and fills in the concrete [`PlaneKey`] of every
//! entry.

use alloc::vec::Vec;

use crate::display::Transform;
use crate::plane::{PlaneKey, PlaneType};

/// One layer in a z-order configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZOrderLayer {
    /// Requested plane type. Platforms may override it on assignment.
    pub plane_type: PlaneType,
    /// Index of the layer in the display contents.
    pub layer: usize,
    /// Stacking position of the layer (higher is nearer the viewer).
    pub zorder: u32,
    /// Layer transform; some planes cannot rotate.
    pub transform: Transform,
    /// Plane bound to this entry, once assigned.
    pub plane: Option<PlaneKey>,
}

impl ZOrderLayer {
    /// Creates an unassigned entry.
    #[must_use]
    pub const fn new(plane_type: PlaneType, layer: usize, zorder: u32) -> Self {
        Self {
            plane_type,
            layer,
            zorder,
            transform: Transform::IDENTITY,
            plane: None,
        }
    }

    /// Sets the layer transform.
    #[must_use]
    pub const fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }
}

/// Bottom-to-top list of layers for one display.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ZOrderConfig {
    layers: Vec<ZOrderLayer>,
}

impl ZOrderConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Adds an entry. Call [`sort`](Self::sort) after adding out of order.
    pub fn push(&mut self, layer: ZOrderLayer) {
        self.layers.push(layer);
    }

    /// Orders entries by their `zorder`.
    pub fn sort(&mut self) {
        self.layers.sort_by_key(|l| l.zorder);
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.layers.clear();
    }

    /// Number of entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns `true` if there are no entries.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Entries, bottom to top.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[ZOrderLayer] {
        &self.layers
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [ZOrderLayer] {
        &mut self.layers
    }

    /// Iterates over entries, bottom to top.
    pub fn iter(&self) -> core::slice::Iter<'_, ZOrderLayer> {
        self.layers.iter()
    }

    /// Number of entries requesting `plane_type`.
    #[must_use]
    pub fn count(&self, plane_type: PlaneType) -> usize {
        self.layers
            .iter()
            .filter(|l| l.plane_type == plane_type)
            .count()
    }

    /// Position of the lowest entry requesting `plane_type`.
    #[must_use]
    pub fn first(&self, plane_type: PlaneType) -> Option<usize> {
        self.layers.iter().position(|l| l.plane_type == plane_type)
    }

    /// Number of RGB entries (neither overlay nor cursor).
    #[must_use]
    pub fn rgb_count(&self) -> usize {
        self.layers
            .iter()
            .filter(|l| !matches!(l.plane_type, PlaneType::Overlay | PlaneType::Cursor))
            .count()
    }
}

impl<'a> IntoIterator for &'a ZOrderConfig {
    type Item = &'a ZOrderLayer;
    type IntoIter = core::slice::Iter<'a, ZOrderLayer>;

    fn into_iter(self) -> Self::IntoIter {
        self.layers.iter()
    }
}
