// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-display plane assignment for one geometry.
//!
//! A [`LayerList`] is rebuilt whenever the window system reports a
//! geometry change. Building it:
//!
//! 1. classifies every layer (framebuffer target, skipped, forced to the
//!    GPU, or a candidate for a cursor, overlay or sprite plane);
//! 2. searches for the largest set of candidates the plane manager can
//!    take, preferring overlays, then sprites, keeping the topmost cursor
//!    candidate on the cursor plane when possible;
//! 3. slots the framebuffer target onto the primary plane at a z position
//!    where no plane layer would wrongly cover, or be covered by, a GPU
//!    layer it overlaps;
//! 4. falls back to the framebuffer target alone when nothing fits.
//!
//! Every frame [`LayerList::update`] pushes the attributes that changed
//! (tracked per channel with `understory_dirty`) into the assigned planes.

use alloc::vec::Vec;
use core::fmt;

use kurbo::Rect;
use understory_dirty::{Channel, CycleHandling, DirtyTracker};

use crate::buffer_manager::{BufferManager, Gralloc};
use crate::dirty;
use crate::display::{
    CompositionType, DisplayContents, DisplayId, DisplayMode, LayerContents, LayerFlags,
};
use crate::plane::capabilities::supports_layer;
use crate::plane::{DisplayPlane, PlaneKey, PlaneType, Position, crop_from_rect};
use crate::plane_manager::DisplayPlaneManager;
use crate::zorder::{ZOrderConfig, ZOrderLayer};

/// How a layer was classified when the list was built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerKind {
    /// The GPU composition result.
    FramebufferTarget,
    /// Flagged by the window system to stay on the GPU.
    Skipped,
    /// Has no describable buffer; must be drawn by the GPU.
    ForceFramebuffer,
    /// No plane type can scan it out.
    Framebuffer,
    /// Can be scanned out by a plane of this type.
    Candidate(PlaneType),
}

#[derive(Clone, Debug)]
struct ListLayer {
    kind: LayerKind,
    plane: Option<PlaneKey>,
    composition: CompositionType,
    last: Option<LayerContents>,
    ready: bool,
}

/// Plane assignment of one display for the current geometry.
pub struct LayerList {
    display: DisplayId,
    mode: DisplayMode,
    layers: Vec<ListLayer>,
    fb_target: Option<usize>,
    config: ZOrderConfig,
    dirty: DirtyTracker<u32>,
}

fn overlaps(a: Rect, b: Rect) -> bool {
    a.intersect(b).area() > 0.0
}

/// Lexicographic `k`-subsets of `items`, produced one at a time.
struct Combinations<'a> {
    items: &'a [usize],
    indices: Vec<usize>,
    done: bool,
}

impl Iterator for Combinations<'_> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.done {
            return None;
        }
        let current = self.indices.iter().map(|&i| self.items[i]).collect();
        let (n, k) = (self.items.len(), self.indices.len());
        // Rightmost index that can still move right.
        let pivot = (0..k).rev().find(|&i| self.indices[i] != i + n - k);
        match pivot {
            Some(i) => {
                self.indices[i] += 1;
                for j in i + 1..k {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
            }
            None => self.done = true,
        }
        Some(current)
    }
}

fn combinations(items: &[usize], k: usize) -> Combinations<'_> {
    Combinations {
        items,
        indices: (0..k).collect(),
        done: k > items.len(),
    }
}

fn layer_key(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

impl LayerList {
    /// Classifies `contents` and assigns planes for `display`.
    pub fn new<G: Gralloc>(
        display: DisplayId,
        mode: DisplayMode,
        contents: &DisplayContents,
        planes: &mut DisplayPlaneManager,
        buffers: &mut BufferManager<G>,
    ) -> Self {
        let fb_target = contents.framebuffer_target();
        let layers = contents
            .layers
            .iter()
            .enumerate()
            .map(|(i, layer)| {
                let kind = if Some(i) == fb_target {
                    LayerKind::FramebufferTarget
                } else {
                    Self::classify(layer, buffers)
                };
                ListLayer {
                    kind,
                    plane: None,
                    composition: if kind == LayerKind::FramebufferTarget {
                        CompositionType::FramebufferTarget
                    } else {
                        CompositionType::Framebuffer
                    },
                    last: None,
                    ready: false,
                }
            })
            .collect();

        let mut list = Self {
            display,
            mode,
            layers,
            fb_target,
            config: ZOrderConfig::new(),
            dirty: DirtyTracker::with_cycle_handling(CycleHandling::Error),
        };
        if display.is_physical() {
            list.allocate(contents, planes);
        }
        list.record_assignment();
        log::debug!(
            "{display:?}: {} of {} layers on planes",
            list.config.len(),
            list.layers.len()
        );
        list
    }

    fn classify<G: Gralloc>(layer: &LayerContents, buffers: &mut BufferManager<G>) -> LayerKind {
        if layer.flags.contains(LayerFlags::SKIP_LAYER) {
            return LayerKind::Skipped;
        }
        if layer.handle.is_null() {
            return LayerKind::ForceFramebuffer;
        }
        let info = match buffers.lock_data_buffer(layer.handle) {
            Ok(buffer) => *buffer.info(),
            Err(err) => {
                log::warn!("{:?}: {err}", layer.handle);
                return LayerKind::ForceFramebuffer;
            }
        };
        if layer.flags.contains(LayerFlags::IS_CURSOR_LAYER)
            && supports_layer(PlaneType::Cursor, &info, layer)
        {
            return LayerKind::Candidate(PlaneType::Cursor);
        }
        for plane_type in [PlaneType::Overlay, PlaneType::Sprite] {
            if supports_layer(plane_type, &info, layer) {
                return LayerKind::Candidate(plane_type);
            }
        }
        LayerKind::Framebuffer
    }

    fn candidates(&self, plane_type: PlaneType) -> Vec<usize> {
        self.layers
            .iter()
            .enumerate()
            .filter(|(_, l)| l.kind == LayerKind::Candidate(plane_type))
            .map(|(i, _)| i)
            .collect()
    }

    fn allocate(&mut self, contents: &DisplayContents, planes: &mut DisplayPlaneManager) {
        let overlays = self.candidates(PlaneType::Overlay);
        let sprites = self.candidates(PlaneType::Sprite);

        let topmost = (0..self.layers.len())
            .rev()
            .find(|i| Some(*i) != self.fb_target);
        let cursor = topmost.filter(|&i| {
            self.layers[i].kind == LayerKind::Candidate(PlaneType::Cursor)
                && planes.free_planes(self.display, PlaneType::Cursor) > 0
        });

        if self.search(contents, planes, &overlays, &sprites, cursor) {
            return;
        }
        if cursor.is_some() && self.search(contents, planes, &overlays, &sprites, None) {
            return;
        }

        let Some(fb) = self.fb_target else {
            return;
        };
        let mut config = ZOrderConfig::new();
        config.push(ZOrderLayer::new(PlaneType::Primary, fb, 0));
        match planes.assign_planes(self.display, &mut config) {
            Ok(()) => self.config = config,
            Err(err) => log::error!("{:?}: no plane for framebuffer target: {err}", self.display),
        }
    }

    fn search(
        &mut self,
        contents: &DisplayContents,
        planes: &mut DisplayPlaneManager,
        overlays: &[usize],
        sprites: &[usize],
        cursor: Option<usize>,
    ) -> bool {
        let free_overlays = planes.free_planes(self.display, PlaneType::Overlay) as usize;
        let free_rgb = planes.free_planes(self.display, PlaneType::Sprite) as usize
            + planes.free_planes(self.display, PlaneType::Primary) as usize;
        let max_overlays = overlays.len().min(free_overlays);
        let max_sprites = sprites.len().min(free_rgb);

        for n_overlays in (0..=max_overlays).rev() {
            for chosen_overlays in combinations(overlays, n_overlays) {
                for n_sprites in (0..=max_sprites).rev() {
                    if n_overlays + n_sprites == 0 && cursor.is_none() {
                        continue;
                    }
                    for chosen_sprites in combinations(sprites, n_sprites) {
                        let mut selected: Vec<(usize, PlaneType)> = chosen_overlays
                            .iter()
                            .map(|&i| (i, PlaneType::Overlay))
                            .chain(chosen_sprites.iter().map(|&i| (i, PlaneType::Sprite)))
                            .collect();
                        selected.sort_by_key(|(i, _)| *i);
                        if let Some(config) = self.try_attach(contents, planes, &selected, cursor)
                        {
                            self.config = config;
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    /// Returns `true` if the framebuffer target can sit at position `fb_pos`
    /// among `selected` without any plane layer being wrongly ordered
    /// against a GPU layer it overlaps.
    fn framebuffer_position_ok(
        contents: &DisplayContents,
        selected: &[(usize, PlaneType)],
        gpu: &[usize],
        fb_pos: usize,
    ) -> bool {
        selected.iter().enumerate().all(|(pos, &(s, _))| {
            gpu.iter().all(|&g| {
                if !overlaps(
                    contents.layers[s].display_frame,
                    contents.layers[g].display_frame,
                ) {
                    return true;
                }
                if pos < fb_pos { s < g } else { s > g }
            })
        })
    }

    fn try_attach(
        &self,
        contents: &DisplayContents,
        planes: &mut DisplayPlaneManager,
        selected: &[(usize, PlaneType)],
        cursor: Option<usize>,
    ) -> Option<ZOrderConfig> {
        let gpu: Vec<usize> = (0..self.layers.len())
            .filter(|i| {
                Some(*i) != self.fb_target
                    && Some(*i) != cursor
                    && !selected.iter().any(|(s, _)| s == i)
            })
            .collect();

        let positions: Vec<Option<usize>> = if gpu.is_empty() {
            alloc::vec![None]
        } else {
            self.fb_target?;
            (0..=selected.len())
                .filter(|&p| Self::framebuffer_position_ok(contents, selected, &gpu, p))
                .map(Some)
                .collect()
        };

        for fb_pos in positions {
            let mut entries = selected.to_vec();
            if let (Some(pos), Some(fb)) = (fb_pos, self.fb_target) {
                entries.insert(pos, (fb, PlaneType::Primary));
            }
            if let Some(c) = cursor {
                entries.push((c, PlaneType::Cursor));
            }

            let mut config = ZOrderConfig::new();
            for (z, (layer, plane_type)) in (0_u32..).zip(entries) {
                config.push(
                    ZOrderLayer::new(plane_type, layer, z)
                        .with_transform(contents.layers[layer].transform),
                );
            }
            if !planes.is_valid_zorder(self.display, &config) {
                continue;
            }
            match planes.assign_planes(self.display, &mut config) {
                Ok(()) => return Some(config),
                Err(err) => log::trace!("{:?}: {err}", self.display),
            }
        }
        None
    }

    fn record_assignment(&mut self) {
        for entry in self.config.iter() {
            let Some(layer) = self.layers.get_mut(entry.layer) else {
                continue;
            };
            layer.plane = entry.plane;
            layer.composition = match layer.kind {
                LayerKind::FramebufferTarget => CompositionType::FramebufferTarget,
                LayerKind::Candidate(PlaneType::Cursor) if entry.plane_type == PlaneType::Cursor => {
                    CompositionType::CursorOverlay
                }
                _ => CompositionType::Overlay,
            };
        }
    }

    /// Display this list belongs to.
    #[must_use]
    pub const fn display(&self) -> DisplayId {
        self.display
    }

    /// Number of layers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Returns `true` if the display has no layers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Classification of layer `index`.
    #[must_use]
    pub fn kind(&self, index: usize) -> Option<LayerKind> {
        self.layers.get(index).map(|l| l.kind)
    }

    /// Plane assigned to layer `index`.
    #[must_use]
    pub fn plane_for(&self, index: usize) -> Option<PlaneKey> {
        self.layers.get(index).and_then(|l| l.plane)
    }

    /// Composition decision for layer `index`.
    #[must_use]
    pub fn composition_type(&self, index: usize) -> Option<CompositionType> {
        self.layers.get(index).map(|l| l.composition)
    }

    /// Composition decisions of every layer, bottom to top.
    pub fn composition_types(&self) -> impl Iterator<Item = CompositionType> + '_ {
        self.layers.iter().map(|l| l.composition)
    }

    /// Returns `true` if layer `index` is bound and can be flipped this
    /// frame.
    #[must_use]
    pub fn is_ready(&self, index: usize) -> bool {
        self.layers.get(index).is_some_and(|l| l.ready)
    }

    /// The assigned configuration, bottom to top.
    #[must_use]
    pub fn zorder(&self) -> &ZOrderConfig {
        &self.config
    }

    /// Layers on planes, bottom to top.
    pub fn attached(&self) -> impl Iterator<Item = (usize, PlaneKey)> + '_ {
        self.config
            .iter()
            .filter_map(|entry| entry.plane.map(|key| (entry.layer, key)))
    }

    /// Writes composition decisions back into `contents`.
    pub fn apply_composition(&self, contents: &mut DisplayContents) {
        for (layer, composition) in contents.layers.iter_mut().zip(self.composition_types()) {
            layer.composition_type = composition;
        }
    }

    /// Pushes changed layer attributes and buffers into the assigned
    /// planes. Returns the number of layers that could not be bound; those
    /// are not flipped this frame.
    pub fn update<G: Gralloc>(
        &mut self,
        contents: &DisplayContents,
        planes: &mut DisplayPlaneManager,
        buffers: &mut BufferManager<G>,
    ) -> usize {
        for entry in self.config.iter() {
            let (Some(layer), Some(state)) = (
                contents.layers.get(entry.layer),
                self.layers.get_mut(entry.layer),
            ) else {
                continue;
            };
            let key = layer_key(entry.layer);
            match &state.last {
                None => {
                    for channel in dirty::ALL {
                        self.dirty.mark(key, channel);
                    }
                }
                Some(last) => {
                    if last.display_frame != layer.display_frame
                        || last.source_crop != layer.source_crop
                    {
                        self.dirty.mark(key, dirty::GEOMETRY);
                    }
                    if last.transform != layer.transform {
                        self.dirty.mark(key, dirty::TRANSFORM);
                    }
                    if last.plane_alpha != layer.plane_alpha || last.blending != layer.blending {
                        self.dirty.mark(key, dirty::BLENDING);
                    }
                    if last.handle != layer.handle {
                        self.dirty.mark(key, dirty::BUFFER);
                    }
                }
            }
            state.last = Some(layer.clone());
        }

        let geometry = self.drain(dirty::GEOMETRY);
        let transforms = self.drain(dirty::TRANSFORM);
        let blending = self.drain(dirty::BLENDING);
        let buffers_changed = self.drain(dirty::BUFFER);

        let mode_w = i32::try_from(self.mode.width).unwrap_or(i32::MAX);
        let mode_h = i32::try_from(self.mode.height).unwrap_or(i32::MAX);
        for &key in &geometry {
            if let Some((layer, plane)) = self.layer_plane(key, contents, planes) {
                plane.set_mode_size(mode_w, mode_h);
                plane.set_position(Position::from_rect(layer.display_frame));
                plane.set_source_crop(crop_from_rect(layer.source_crop));
            }
        }
        for &key in &transforms {
            if let Some((layer, plane)) = self.layer_plane(key, contents, planes) {
                plane.set_transform(layer.transform);
            }
        }
        for &key in &blending {
            if let Some((layer, plane)) = self.layer_plane(key, contents, planes) {
                plane.set_plane_alpha(layer.plane_alpha, layer.blending);
            }
        }
        let rebind = |key: u32| {
            [&geometry, &transforms, &blending, &buffers_changed]
                .iter()
                .any(|changed| changed.contains(&key))
        };

        let mut failures = 0;
        for entry in self.config.iter() {
            let index = entry.layer;
            let (Some(layer), Some(plane_key)) = (contents.layers.get(index), entry.plane) else {
                continue;
            };
            let Some(plane) = planes.plane_mut(plane_key) else {
                continue;
            };
            let ready = if layer.handle.is_null() {
                false
            } else if rebind(layer_key(index)) || plane.is_protected() {
                match plane.set_data_buffer(layer.handle, buffers) {
                    Ok(()) => true,
                    Err(err) => {
                        log::warn!("{:?} layer {index}: {err}", self.display);
                        // Retry on the next update even if the layer is unchanged.
                        self.dirty.mark(layer_key(index), dirty::BUFFER);
                        failures += 1;
                        false
                    }
                }
            } else {
                plane.current_buffer() == layer.handle && plane.context().is_some()
            };
            if let Some(state) = self.layers.get_mut(index) {
                state.ready = ready;
            }
        }
        failures
    }

    fn drain(&mut self, channel: Channel) -> Vec<u32> {
        self.dirty.drain(channel).deterministic().run().collect()
    }

    fn layer_plane<'a>(
        &self,
        key: u32,
        contents: &'a DisplayContents,
        planes: &'a mut DisplayPlaneManager,
    ) -> Option<(&'a LayerContents, &'a mut DisplayPlane)> {
        let index = key as usize;
        let layer = contents.layers.get(index)?;
        let plane = planes.plane_mut(self.plane_for(index)?)?;
        Some((layer, plane))
    }

    /// Clears pending plane updates after a successful post.
    pub fn post_flip(&self, planes: &mut DisplayPlaneManager) {
        for (_, key) in self.attached() {
            if let Some(plane) = planes.plane_mut(key) {
                plane.post_flip();
            }
        }
    }

    /// Reclaims every assigned plane and forgets the assignment.
    pub fn deinitialize(&mut self, planes: &mut DisplayPlaneManager) {
        for (_, key) in self.attached() {
            planes.reclaim_plane(key);
        }
        self.config.clear();
        for layer in &mut self.layers {
            layer.plane = None;
            layer.ready = false;
        }
    }
}

impl fmt::Debug for LayerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerList")
            .field("display", &self.display)
            .field("mode", &self.mode)
            .field("layers", &self.layers)
            .field("fb_target", &self.fb_target)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
