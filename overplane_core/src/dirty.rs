// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dirty-tracking channels for layer attributes.
//!
//! The layer list marks a layer (keyed by its index in the display
//! contents) on one of these channels whenever the window system changes
//! the matching attribute between frames. Each
//! [`LayerList::update`](crate::layer_list::LayerList::update) drains every
//! channel and pushes only the changed attributes into the layer's plane.
//! All channels are local: a change to one layer never dirties another.

use understory_dirty::Channel;

/// Display frame or source crop changed.
pub const GEOMETRY: Channel = Channel::new(0);

/// Buffer transform changed.
pub const TRANSFORM: Channel = Channel::new(1);

/// Plane alpha or blend mode changed.
pub const BLENDING: Channel = Channel::new(2);

/// A different buffer is queued.
pub const BUFFER: Channel = Channel::new(3);

/// Every channel, in drain order.
pub const ALL: [Channel; 4] = [GEOMETRY, TRANSFORM, BLENDING, BUFFER];
