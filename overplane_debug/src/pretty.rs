// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable state dumps.
//!
//! [`write_planes`] renders a [`PlaneManagerSnapshot`] as the plane-pool
//! table followed by one line per plane; [`write_buffers`] lists the mapped
//! buffer pool. Both write to any [`Write`](std::io::Write) destination.

use std::io::{self, Write};

use overplane_core::buffer_manager::BufferPoolSnapshot;
use overplane_core::plane_manager::PlaneManagerSnapshot;

const RULE: &str = "-------------------------------------------------------------";

/// Writes the plane-manager table and per-plane state.
pub fn write_planes(snapshot: &PlaneManagerSnapshot, writer: &mut dyn Write) -> io::Result<()> {
    writeln!(writer, "Display Plane Manager state:")?;
    writeln!(writer, "{RULE}")?;
    writeln!(writer, " PLANE TYPE | COUNT |   FREE   | RECLAIMED ")?;
    writeln!(writer, "------------+-------+----------+-----------")?;
    for pool in &snapshot.pools {
        writeln!(
            writer,
            " {:>9}  |  {:2}   | {:08x} | {:08x}",
            pool.plane_type.label(),
            pool.count,
            pool.free,
            pool.reclaimed,
        )?;
    }

    if snapshot.planes.is_empty() {
        return Ok(());
    }
    writeln!(writer, "{RULE}")?;
    for plane in &snapshot.planes {
        let state = if plane.enabled { "on " } else { "off" };
        writeln!(
            writer,
            "  {}#{} {state} display={} zorder={} buffer={:#x}",
            plane.key.plane_type.label(),
            plane.key.index,
            plane.display.0,
            plane.zorder,
            plane.buffer.0,
        )?;
    }
    Ok(())
}

/// Writes the mapped-buffer pool, one line per cached mapper.
pub fn write_buffers(snapshot: &BufferPoolSnapshot, writer: &mut dyn Write) -> io::Result<()> {
    writeln!(
        writer,
        "Buffer Manager status: pool size {} ({} cached)",
        snapshot.capacity,
        snapshot.buffers.len(),
    )?;
    writeln!(writer, "{RULE}")?;
    for (i, buffer) in snapshot.buffers.iter().enumerate() {
        writeln!(
            writer,
            "Buffer {i}: handle {:#x}, ({}x{}), format {:#x}, refCount {}{}",
            buffer.handle.0,
            buffer.width,
            buffer.height,
            buffer.format.0,
            buffer.refs,
            if buffer.mapped { "" } else { ", unmapped" },
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use overplane_core::buffer::{BufferHandle, PixelFormat};
    use overplane_core::buffer_manager::MappedBufferSnapshot;
    use overplane_core::display::DisplayId;
    use overplane_core::plane::{PlaneKey, PlaneType};
    use overplane_core::plane_manager::{PlanePoolSnapshot, PlaneSnapshot};

    fn render(f: impl FnOnce(&mut dyn Write) -> io::Result<()>) -> String {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn pool_table_rows() {
        let snapshot = PlaneManagerSnapshot {
            pools: vec![
                PlanePoolSnapshot {
                    plane_type: PlaneType::Sprite,
                    count: 3,
                    free: 0b110,
                    reclaimed: 0,
                },
                PlanePoolSnapshot {
                    plane_type: PlaneType::Cursor,
                    count: 2,
                    free: 0b11,
                    reclaimed: 0b01,
                },
            ],
            planes: vec![PlaneSnapshot {
                key: PlaneKey {
                    plane_type: PlaneType::Sprite,
                    index: 0,
                },
                enabled: true,
                display: DisplayId::PRIMARY,
                zorder: 1,
                buffer: BufferHandle(0x40),
            }],
        };
        let text = render(|w| write_planes(&snapshot, w));

        assert!(text.contains(" PLANE TYPE | COUNT |   FREE   | RECLAIMED"), "{text}");
        assert!(text.contains("   SPRITE  |   3   | 00000006 | 00000000"), "{text}");
        assert!(text.contains("   CURSOR  |   2   | 00000003 | 00000001"), "{text}");
        assert!(
            text.contains("SPRITE#0 on  display=0 zorder=1 buffer=0x40"),
            "{text}"
        );
    }

    #[test]
    fn empty_plane_list_stops_after_table() {
        let snapshot = PlaneManagerSnapshot {
            pools: Vec::new(),
            planes: Vec::new(),
        };
        let text = render(|w| write_planes(&snapshot, w));
        assert_eq!(text.lines().count(), 4, "header only: {text}");
    }

    #[test]
    fn buffer_lines() {
        let snapshot = BufferPoolSnapshot {
            capacity: 8,
            buffers: vec![
                MappedBufferSnapshot {
                    handle: BufferHandle(0x10),
                    format: PixelFormat::NV12,
                    width: 1920,
                    height: 1080,
                    refs: 2,
                    mapped: true,
                },
                MappedBufferSnapshot {
                    handle: BufferHandle(0x11),
                    format: PixelFormat::RGBA_8888,
                    width: 64,
                    height: 64,
                    refs: 0,
                    mapped: false,
                },
            ],
        };
        let text = render(|w| write_buffers(&snapshot, w));

        assert!(text.starts_with("Buffer Manager status: pool size 8 (2 cached)"));
        assert!(
            text.contains("Buffer 0: handle 0x10, (1920x1080), format 0x3231564e, refCount 2\n"),
            "{text}"
        );
        assert!(text.contains("Buffer 1: handle 0x11, (64x64), format 0x1, refCount 0, unmapped"));
    }
}
