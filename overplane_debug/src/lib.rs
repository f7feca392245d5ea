// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Text and JSON state dumps for overplane diagnostics.
//!
//! Both modules consume the snapshots produced by
//! [`DisplayPlaneManager::snapshot`](overplane_core::plane_manager::DisplayPlaneManager::snapshot)
//! and [`BufferManager::snapshot`](overplane_core::buffer_manager::BufferManager::snapshot):
//!
//! - [`pretty`]: the plane-pool table and buffer list as plain text.
//! - [`json`]: the same state as a `serde_json` document.

pub mod json;
pub mod pretty;
