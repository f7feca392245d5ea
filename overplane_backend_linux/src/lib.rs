// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Linux event sources for overplane.
//!
//! The composition path in `overplane_core` is single-threaded. Everything
//! that has to block on the kernel lives here, each piece on its own worker
//! thread that is joined on teardown:
//!
//! - [`VsyncEventObserver`]: waits on a [`VsyncControl`] while vsync is
//!   enabled and delivers [`VsyncEvent`]s. [`TimerVsyncControl`] is a
//!   software source paced on `CLOCK_MONOTONIC`.
//! - [`UeventObserver`]: reads kernel uevents (from a
//!   [`NetlinkUeventSource`] or any datagram descriptor) and dispatches them
//!   by event name.
//! - [`HotplugMonitor`]: a uevent listener turning switch state changes
//!   into hot-plug reports.
//!
//! Sinks run on the worker threads. Bridging into the composer, which is
//! not `Send`, is left to the host; [`vsync_to_callbacks`] and
//! [`hotplug_to_callbacks`] forward straight to its
//! [`ComposerCallbacks`](overplane_core::composer::ComposerCallbacks).

mod error;
mod hotplug;
mod time;
mod uevent;
mod vsync;
mod worker;

pub use error::{ObserverError, UeventError};
pub use hotplug::{HDMI_SWITCH_EVENT, HotplugMonitor, HotplugSink, SWITCH_STATE, hotplug_to_callbacks};
pub use time::now;
pub use uevent::{
    NetlinkUeventSource, UEVENT_MSG_LEN, Uevent, UeventCallback, UeventConfig, UeventObserver,
};
pub use vsync::{
    TimerVsyncControl, VsyncControl, VsyncEvent, VsyncEventObserver, VsyncSink, vsync_to_callbacks,
};
