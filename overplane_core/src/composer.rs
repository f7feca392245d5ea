// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The composer context.
//!
//! [`Hwcomposer`] owns every piece of per-process composition state: the
//! buffer manager, the plane manager, the display context and one
//! [`LayerList`] per display. It is constructed explicitly by the host and
//! passed where it is needed; there is no global instance.
//!
//! Frame flow:
//!
//! ```text
//!   prepare(displays)  ──► layer lists rebuilt on geometry change,
//!                          composition types written back
//!        │
//!        ▼
//!   commit(displays)   ──► begin / contents per display / end,
//!                          fences written back
//! ```
//!
//! Vsync and hot-plug notifications arrive from the backend observers and
//! are forwarded to the registered [`ComposerCallbacks`].

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;

use crate::buffer_manager::{BufferManager, BufferManagerConfig, Gralloc};
use crate::context::{CommitError, DisplayContext};
use crate::display::{DisplayContents, DisplayId, DisplayMode};
use crate::layer_list::LayerList;
use crate::mapper::MapError;
use crate::plane::{PlaneDriver, PlaneError};
use crate::plane_manager::DisplayPlaneManager;
use crate::platform::Platform;
use crate::time::HostTime;

/// Receives display events on behalf of the window system.
///
/// Called from observer threads, so implementations must be thread-safe
/// and must not call back into the composer.
pub trait ComposerCallbacks: Send + Sync {
    /// A vsync happened at `timestamp`.
    fn vsync(&self, display: DisplayId, timestamp: HostTime);

    /// `display` was connected or disconnected.
    fn hotplug(&self, display: DisplayId, connected: bool);

    /// The window system should redraw.
    fn invalidate(&self) {}
}

/// Turns a display's output on and off.
pub trait BlankControl {
    /// Blanks (`true`) or unblanks `display`.
    fn blank(&mut self, display: DisplayId, blank: bool) -> Result<(), ComposerError>;
}

/// Errors reported by [`Hwcomposer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComposerError {
    /// The display does not exist or is not connected.
    NoDisplay(DisplayId),
    /// The display could not be blanked or unblanked.
    Blank(DisplayId),
    /// A plane operation failed.
    Plane(PlaneError),
    /// The commit failed.
    Commit(CommitError),
    /// A buffer operation failed.
    Map(MapError),
}

impl fmt::Display for ComposerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDisplay(display) => write!(f, "{display:?} is not connected"),
            Self::Blank(display) => write!(f, "failed to change blank state of {display:?}"),
            Self::Plane(err) => write!(f, "plane: {err}"),
            Self::Commit(err) => write!(f, "commit: {err}"),
            Self::Map(err) => write!(f, "buffer: {err}"),
        }
    }
}

impl core::error::Error for ComposerError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Plane(err) => Some(err),
            Self::Commit(err) => Some(err),
            Self::Map(err) => Some(err),
            Self::NoDisplay(_) | Self::Blank(_) => None,
        }
    }
}

impl From<PlaneError> for ComposerError {
    fn from(err: PlaneError) -> Self {
        Self::Plane(err)
    }
}

impl From<CommitError> for ComposerError {
    fn from(err: CommitError) -> Self {
        Self::Commit(err)
    }
}

impl From<MapError> for ComposerError {
    fn from(err: MapError) -> Self {
        Self::Map(err)
    }
}

/// Construction-time composer settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComposerConfig {
    /// Buffer manager settings.
    pub buffers: BufferManagerConfig,
    /// Mode of the built-in panel.
    pub primary_mode: DisplayMode,
    /// Mode assumed for an external display when it connects.
    pub external_mode: DisplayMode,
}

impl ComposerConfig {
    /// A 720p panel with a 1080p external output.
    pub const DEFAULT: Self = Self {
        buffers: BufferManagerConfig::DEFAULT,
        primary_mode: DisplayMode::PANEL_720P,
        external_mode: DisplayMode::HDMI_1080P,
    };
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug)]
struct DeviceState {
    connected: bool,
    blank: bool,
    mode: DisplayMode,
    list: Option<LayerList>,
}

/// Per-process composition context.
pub struct Hwcomposer<G: Gralloc, C: DisplayContext> {
    buffers: BufferManager<G>,
    planes: DisplayPlaneManager,
    context: C,
    blank: Box<dyn BlankControl>,
    devices: [DeviceState; DisplayId::COUNT],
    callbacks: Option<Arc<dyn ComposerCallbacks>>,
}

impl<G: Gralloc, C: DisplayContext> Hwcomposer<G, C> {
    /// Creates a composer with the primary and virtual displays connected.
    pub fn new(
        gralloc: G,
        platform: Platform,
        driver: Box<dyn PlaneDriver>,
        context: C,
        blank: Box<dyn BlankControl>,
        config: ComposerConfig,
    ) -> Result<Self, ComposerError> {
        let planes = DisplayPlaneManager::new(platform, driver)?;
        let device = |connected, mode| DeviceState {
            connected,
            blank: false,
            mode,
            list: None,
        };
        log::debug!("composer on {platform:?}");
        Ok(Self {
            buffers: BufferManager::new(gralloc, config.buffers),
            planes,
            context,
            blank,
            devices: [
                device(true, config.primary_mode),
                device(false, config.external_mode),
                device(true, config.primary_mode),
            ],
            callbacks: None,
        })
    }

    /// Registers the window system's callbacks, replacing earlier ones.
    pub fn register_callbacks(&mut self, callbacks: Arc<dyn ComposerCallbacks>) {
        self.callbacks = Some(callbacks);
    }

    /// The buffer manager.
    pub fn buffer_manager(&self) -> &BufferManager<G> {
        &self.buffers
    }

    /// The plane manager.
    pub fn plane_manager(&self) -> &DisplayPlaneManager {
        &self.planes
    }

    /// The display context.
    pub fn display_context(&self) -> &C {
        &self.context
    }

    /// The layer list built for `display` by the last prepare.
    #[must_use]
    pub fn layer_list(&self, display: DisplayId) -> Option<&LayerList> {
        self.devices.get(display.index())?.list.as_ref()
    }

    /// Returns `true` if `display` is connected.
    #[must_use]
    pub fn is_connected(&self, display: DisplayId) -> bool {
        self.devices
            .get(display.index())
            .is_some_and(|d| d.connected)
    }

    /// Marks `display` connected or disconnected. Disconnecting releases
    /// the display's planes.
    pub fn set_connected(&mut self, display: DisplayId, connected: bool) {
        let Some(device) = self.devices.get_mut(display.index()) else {
            return;
        };
        if device.connected == connected {
            return;
        }
        log::debug!("{display:?} connected: {connected}");
        device.connected = connected;
        if !connected {
            if let Some(mut list) = device.list.take() {
                list.deinitialize(&mut self.planes);
            }
        }
    }

    /// Changes the mode of `display`. Takes effect on the next geometry.
    pub fn set_mode(&mut self, display: DisplayId, mode: DisplayMode) {
        if let Some(device) = self.devices.get_mut(display.index()) {
            device.mode = mode;
        }
    }

    /// Assigns planes for every display and writes the composition type of
    /// each layer back into `displays`, indexed by display id.
    pub fn prepare(&mut self, displays: &mut [Option<DisplayContents>]) {
        self.planes.disable_reclaimed_planes(&mut self.buffers);

        for (index, device) in self.devices.iter_mut().enumerate() {
            let display = DisplayId(u32::try_from(index).unwrap_or(u32::MAX));
            let contents = displays.get_mut(index).and_then(Option::as_mut);
            let Some(contents) = contents.filter(|_| device.connected && !device.blank) else {
                if let Some(mut list) = device.list.take() {
                    list.deinitialize(&mut self.planes);
                }
                continue;
            };

            if contents.geometry_changed || device.list.is_none() {
                if let Some(mut list) = device.list.take() {
                    list.deinitialize(&mut self.planes);
                }
                device.list = Some(LayerList::new(
                    display,
                    device.mode,
                    contents,
                    &mut self.planes,
                    &mut self.buffers,
                ));
            }
            if let Some(list) = &device.list {
                list.apply_composition(contents);
            }
        }
    }

    /// Commits the frame prepared by [`prepare`](Self::prepare).
    ///
    /// Layers whose buffers cannot be bound are left out of the frame; the
    /// rest is still posted.
    pub fn commit(&mut self, displays: &mut [Option<DisplayContents>]) -> Result<(), ComposerError> {
        self.context.commit_begin(displays)?;

        for (index, device) in self.devices.iter_mut().enumerate() {
            let display = DisplayId(u32::try_from(index).unwrap_or(u32::MAX));
            let (Some(contents), Some(list)) = (
                displays.get_mut(index).and_then(Option::as_mut),
                device.list.as_mut(),
            ) else {
                continue;
            };
            let skipped = list.update(contents, &mut self.planes, &mut self.buffers);
            if skipped > 0 {
                log::warn!("{display:?}: {skipped} layers skipped this frame");
            }
            if let Err(err) = self
                .context
                .commit_contents(display, contents, list, &mut self.planes)
            {
                log::error!("{display:?}: {err}");
            }
        }

        self.context.commit_end(displays)?;
        for list in self.devices.iter().filter_map(|d| d.list.as_ref()) {
            list.post_flip(&mut self.planes);
        }
        Ok(())
    }

    /// Waits for the hardware to consume the last commit.
    ///
    /// A [`CommitError::Timeout`] is logged and reported; the caller retries
    /// next frame.
    pub fn composition_complete(&mut self, display: DisplayId) -> Result<(), ComposerError> {
        log::trace!("composition complete on {display:?}");
        self.context
            .composition_complete()
            .map_err(ComposerError::from)
    }

    /// Blanks or unblanks `display`. Blanking releases the display's planes.
    pub fn blank(&mut self, display: DisplayId, blank: bool) -> Result<(), ComposerError> {
        if !self.is_connected(display) {
            return Err(ComposerError::NoDisplay(display));
        }
        self.blank.blank(display, blank)?;
        let Some(device) = self.devices.get_mut(display.index()) else {
            return Err(ComposerError::NoDisplay(display));
        };
        device.blank = blank;
        if blank {
            if let Some(mut list) = device.list.take() {
                list.deinitialize(&mut self.planes);
            }
        }
        log::debug!("{display:?} blank: {blank}");
        Ok(())
    }

    /// Moves the cursor of `display` outside the regular commit.
    pub fn set_cursor_position_async(
        &mut self,
        display: DisplayId,
        x: i32,
        y: i32,
    ) -> Result<(), ComposerError> {
        if !self.is_connected(display) {
            return Err(ComposerError::NoDisplay(display));
        }
        self.context
            .set_cursor_position(display, x, y)
            .map_err(ComposerError::from)
    }

    /// Forwards a vsync. The window system only follows the primary
    /// display's vsync, so every event is reported as primary.
    pub fn vsync(&self, display: DisplayId, timestamp: HostTime) {
        log::trace!("vsync on {display:?} at {timestamp:?}");
        if let Some(callbacks) = &self.callbacks {
            callbacks.vsync(DisplayId::PRIMARY, timestamp);
        }
    }

    /// Records a hot-plug event and forwards it.
    pub fn hotplug(&mut self, display: DisplayId, connected: bool) {
        self.set_connected(display, connected);
        if let Some(callbacks) = &self.callbacks {
            callbacks.hotplug(display, connected);
            callbacks.invalidate();
        }
    }

    /// Releases every plane and mapping.
    pub fn deinitialize(&mut self) {
        for device in &mut self.devices {
            if let Some(mut list) = device.list.take() {
                list.deinitialize(&mut self.planes);
            }
        }
        self.planes.deinitialize(&mut self.buffers);
        self.buffers.deinitialize();
    }
}

impl<G: Gralloc, C: DisplayContext> fmt::Debug for Hwcomposer<G, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hwcomposer")
            .field("planes", &self.planes)
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}
