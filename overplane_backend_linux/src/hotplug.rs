// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hot-plug detection from switch uevents.
//!
//! HDMI connectors report plug state through a switch device. Every change
//! produces a uevent carrying `SWITCH_STATE=0` or `SWITCH_STATE=1`; the
//! [`HotplugMonitor`] turns those into `(display, connected)` reports and
//! drops repeats of the state it last reported.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use overplane_core::composer::ComposerCallbacks;
use overplane_core::display::DisplayId;

use crate::error::UeventError;
use crate::uevent::{Uevent, UeventObserver};

/// Event name of the HDMI switch node.
pub const HDMI_SWITCH_EVENT: &str = "change@/devices/virtual/switch/hdmi";

/// Property carrying the switch state.
pub const SWITCH_STATE: &str = "SWITCH_STATE";

/// Receives hot-plug reports on the uevent thread.
pub type HotplugSink = Arc<dyn Fn(DisplayId, bool) + Send + Sync>;

/// Returns a sink forwarding hot-plug reports to `callbacks`.
pub fn hotplug_to_callbacks(callbacks: Arc<dyn ComposerCallbacks>) -> HotplugSink {
    Arc::new(move |display, connected| {
        callbacks.hotplug(display, connected);
        callbacks.invalidate();
    })
}

const UNKNOWN: u8 = 0;
const DISCONNECTED: u8 = 1;
const CONNECTED: u8 = 2;

/// Uevent listener reporting connection changes of one display.
pub struct HotplugMonitor {
    display: DisplayId,
    last: AtomicU8,
    sink: HotplugSink,
}

impl HotplugMonitor {
    /// Creates a monitor for `display` with an unknown initial state.
    pub fn new(display: DisplayId, sink: HotplugSink) -> Self {
        Self {
            display,
            last: AtomicU8::new(UNKNOWN),
            sink,
        }
    }

    /// Display this monitor reports for.
    #[must_use]
    pub fn display(&self) -> DisplayId {
        self.display
    }

    /// Last reported state, if any.
    #[must_use]
    pub fn connected(&self) -> Option<bool> {
        match self.last.load(Ordering::Acquire) {
            CONNECTED => Some(true),
            DISCONNECTED => Some(false),
            _ => None,
        }
    }

    /// Handles one switch uevent. Returns the new state if it was reported.
    pub fn handle(&self, event: &Uevent<'_>) -> Option<bool> {
        let connected = match event.get(SWITCH_STATE) {
            Some("1") => true,
            Some("0") => false,
            other => {
                log::warn!("{}: unexpected {SWITCH_STATE} {other:?}", event.name());
                return None;
            }
        };
        let state = if connected { CONNECTED } else { DISCONNECTED };
        if self.last.swap(state, Ordering::AcqRel) == state {
            log::trace!("{:?} still connected: {connected}", self.display);
            return None;
        }
        log::info!("{:?} hot-plug, connected: {connected}", self.display);
        (self.sink)(self.display, connected);
        Some(connected)
    }

    /// Registers this monitor on `observer` for `event`.
    pub fn register<S>(
        self: &Arc<Self>,
        observer: &mut UeventObserver<S>,
        event: &str,
    ) -> Result<(), UeventError>
    where
        S: std::os::fd::AsFd + Send + 'static,
    {
        let monitor = Arc::clone(self);
        observer.register_listener(event, move |uevent| {
            monitor.handle(uevent);
        })
    }
}

impl std::fmt::Debug for HotplugMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotplugMonitor")
            .field("display", &self.display)
            .field("connected", &self.connected())
            .finish_non_exhaustive()
    }
}
