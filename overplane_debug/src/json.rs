// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! JSON state export.
//!
//! [`export`] writes one JSON object holding both the plane-manager and the
//! buffer-pool snapshots, suitable for attaching to bug reports or diffing
//! between frames.

use std::io::{self, Write};

use serde_json::{Value, json};

use overplane_core::buffer_manager::BufferPoolSnapshot;
use overplane_core::plane_manager::PlaneManagerSnapshot;
use overplane_core::platform::anniedale_nickname;

/// Converts a plane-manager snapshot to a JSON value.
#[must_use]
pub fn planes_to_value(snapshot: &PlaneManagerSnapshot) -> Value {
    let pools: Vec<Value> = snapshot
        .pools
        .iter()
        .map(|pool| {
            json!({
                "type": pool.plane_type.label(),
                "count": pool.count,
                "free": pool.free,
                "reclaimed": pool.reclaimed,
            })
        })
        .collect();
    let planes: Vec<Value> = snapshot
        .planes
        .iter()
        .map(|plane| {
            json!({
                "type": plane.key.plane_type.label(),
                "index": plane.key.index,
                "nickname": anniedale_nickname(plane.key).map(String::from),
                "enabled": plane.enabled,
                "display": plane.display.0,
                "zorder": plane.zorder,
                "buffer": plane.buffer.0,
            })
        })
        .collect();
    json!({ "pools": pools, "planes": planes })
}

/// Converts a buffer-pool snapshot to a JSON value.
#[must_use]
pub fn buffers_to_value(snapshot: &BufferPoolSnapshot) -> Value {
    let buffers: Vec<Value> = snapshot
        .buffers
        .iter()
        .map(|b| {
            json!({
                "handle": b.handle.0,
                "format": b.format.0,
                "width": b.width,
                "height": b.height,
                "refs": b.refs,
                "mapped": b.mapped,
            })
        })
        .collect();
    json!({ "capacity": snapshot.capacity, "buffers": buffers })
}

/// Writes both snapshots as a single JSON object.
pub fn export(
    planes: &PlaneManagerSnapshot,
    buffers: &BufferPoolSnapshot,
    writer: &mut dyn Write,
) -> io::Result<()> {
    let value = json!({
        "plane_manager": planes_to_value(planes),
        "buffer_manager": buffers_to_value(buffers),
    });
    serde_json::to_writer_pretty(&mut *writer, &value)?;
    writeln!(writer)
}
