// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Display plane allocation and buffer lifecycle for hardware composers.
//!
//! `overplane_core` decides, every frame, which hardware planes scan out
//! which application layers, and keeps GPU-visible mappings of the graphics
//! buffers those layers name. It is `no_std` compatible (with `alloc`); the
//! hardware itself sits behind small collaborator traits.
//!
//! # Architecture
//!
//! ```text
//!   DisplayContents (per display, per frame)
//!       │
//!       ▼
//!   Hwcomposer::prepare() ──► LayerList::new() ──► DisplayPlaneManager::assign_planes()
//!                                                        │
//!                 ┌──────────────────────────────────────┘
//!                 ▼
//!   Hwcomposer::commit() ──► LayerList::update() ──► DisplayPlane::set_data_buffer()
//!                                                        │
//!                 ┌──────────────────────────────────────┘
//!                 ▼
//!   DisplayContext: commit_begin ─► commit_contents* ─► commit_end ─► fences
//! ```
//!
//! **[`buffer`]** and **[`mapper`]**: buffer descriptors, usage predicates,
//! and the [`BufferMapper`](mapper::BufferMapper) view of a buffer mapped
//! into the display's address space.
//!
//! **[`cache`]**: bounded handle-to-mapper cache.
//!
//! **[`buffer_manager`]**: the allocator boundary
//! ([`Gralloc`](buffer_manager::Gralloc)) and the refcounted pool of mapped
//! buffers shared by all planes.
//!
//! **[`plane`]**: the [`DisplayPlane`](plane::DisplayPlane) state machine,
//! its register variants and the per-type capability checks.
//!
//! **[`platform`]** and **[`plane_manager`]**: the closed set of supported
//! controllers and the allocator that hands planes to displays according to
//! their z-order rules.
//!
//! **[`layer_list`]**: per-display plane assignment with GPU fallback.
//!
//! **[`context`]**: the three-phase commit driver and fence distribution.
//!
//! **[`composer`]**: the explicitly constructed context tying it all
//! together.
//!
//! # Crate features
//!
//! - `std` (disabled by default): Enables `std` support in dependencies.

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod buffer;
pub mod buffer_manager;
pub mod cache;
pub mod composer;
pub mod context;
pub mod dirty;
pub mod display;
pub mod layer_list;
pub mod mapper;
pub mod plane;
pub mod plane_manager;
pub mod platform;
pub mod time;
pub mod zorder;

#[cfg(test)]
mod testing;
