// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Display context: the per-frame commit driver.
//!
//! A frame is committed in three phases:
//!
//! ```text
//!   commit_begin(displays)
//!       │
//!       ▼
//!   commit_contents(display, ..)   once per connected display
//!       │
//!       ▼
//!   commit_end(displays)           one post for every display
//! ```
//!
//! The ordering is the caller's contract. [`PostingContext`] only checks it
//! with debug assertions.
//!
//! # Fences
//!
//! After a successful post every flipped layer gets a duplicate of the post
//! fence as its release fence, every physical display gets one as its retire
//! fence, and all acquire fences are closed. On failure acquire fences are
//! still closed and no release fence is handed out.

use alloc::vec::Vec;
use core::fmt;

use crate::display::{DisplayContents, DisplayId, Fence};
use crate::layer_list::LayerList;
use crate::plane::{PlaneContext, cursor_position_bits};
use crate::plane_manager::DisplayPlaneManager;

/// Maximum plane contexts carried by one post.
pub const MAXIMUM_LAYER_NUMBER: usize = 20;

/// Errors reported by the commit path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitError {
    /// The hardware did not consume the previous frame in time. Retry next
    /// frame.
    Timeout,
    /// The controller refused the post.
    Post,
    /// More planes were flipped than one post can carry.
    TooManyLayers,
    /// The cursor registers could not be written.
    Cursor(DisplayId),
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timed out waiting for the display to go idle"),
            Self::Post => f.write_str("display controller rejected the post"),
            Self::TooManyLayers => {
                write!(f, "more than {MAXIMUM_LAYER_NUMBER} planes in one post")
            }
            Self::Cursor(display) => write!(f, "failed to move the cursor on {display:?}"),
        }
    }
}

impl core::error::Error for CommitError {}

/// The controller interface a [`PostingContext`] drives.
pub trait PostDevice {
    /// Posts `contexts` atomically and returns the fence signalled when the
    /// frame reaches the screen.
    fn post(&mut self, contexts: &[PlaneContext]) -> Result<Fence, CommitError>;

    /// Duplicates `fence`.
    fn dup_fence(&mut self, fence: Fence) -> Fence;

    /// Closes `fence`.
    fn close_fence(&mut self, fence: Fence);

    /// Blocks until the last post has been consumed.
    fn wait_idle(&mut self) -> Result<(), CommitError>;

    /// Writes the cursor position register of `display`.
    fn write_cursor_position(&mut self, display: DisplayId, bits: u32)
    -> Result<(), CommitError>;
}

/// Turns assigned layer lists into hardware commits.
pub trait DisplayContext {
    /// Starts a frame.
    fn commit_begin(&mut self, displays: &[Option<DisplayContents>]) -> Result<(), CommitError>;

    /// Flips every ready plane of `list` for `display`.
    fn commit_contents(
        &mut self,
        display: DisplayId,
        contents: &mut DisplayContents,
        list: &LayerList,
        planes: &mut DisplayPlaneManager,
    ) -> Result<(), CommitError>;

    /// Posts the frame and distributes fences.
    fn commit_end(&mut self, displays: &mut [Option<DisplayContents>]) -> Result<(), CommitError>;

    /// Waits for the hardware to consume the committed buffers.
    ///
    /// [`CommitError::Timeout`] is not fatal.
    fn composition_complete(&mut self) -> Result<(), CommitError>;

    /// Moves the cursor plane of `display`.
    fn set_cursor_position(&mut self, display: DisplayId, x: i32, y: i32)
    -> Result<(), CommitError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Open,
}

/// [`DisplayContext`] that batches plane contexts into one post.
pub struct PostingContext<D: PostDevice> {
    device: D,
    phase: Phase,
    contexts: Vec<PlaneContext>,
    flipped: Vec<(DisplayId, usize)>,
}

impl<D: PostDevice> PostingContext<D> {
    /// Creates a context posting through `device`.
    pub fn new(device: D) -> Self {
        Self {
            device,
            phase: Phase::Idle,
            contexts: Vec::with_capacity(MAXIMUM_LAYER_NUMBER),
            flipped: Vec::with_capacity(MAXIMUM_LAYER_NUMBER),
        }
    }

    /// The underlying device.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Plane contexts collected for the open frame.
    #[must_use]
    pub fn pending(&self) -> &[PlaneContext] {
        &self.contexts
    }

    fn close_acquire_fences(&mut self, displays: &mut [Option<DisplayContents>]) {
        for contents in displays.iter_mut().flatten() {
            for layer in &mut contents.layers {
                if layer.acquire_fence.is_valid() {
                    self.device.close_fence(layer.acquire_fence);
                    layer.acquire_fence = Fence::NONE;
                }
            }
        }
    }
}

impl<D: PostDevice> DisplayContext for PostingContext<D> {
    fn commit_begin(&mut self, _displays: &[Option<DisplayContents>]) -> Result<(), CommitError> {
        debug_assert_eq!(self.phase, Phase::Idle, "commit_begin while a frame is open");
        self.contexts.clear();
        self.flipped.clear();
        self.phase = Phase::Open;
        Ok(())
    }

    fn commit_contents(
        &mut self,
        display: DisplayId,
        contents: &mut DisplayContents,
        list: &LayerList,
        planes: &mut DisplayPlaneManager,
    ) -> Result<(), CommitError> {
        debug_assert_eq!(self.phase, Phase::Open, "commit_contents outside a frame");
        for (layer, key) in list.attached() {
            if !list.is_ready(layer) || layer >= contents.layers.len() {
                continue;
            }
            let Some(plane) = planes.plane_mut(key) else {
                continue;
            };
            match plane.flip() {
                Ok(context) => {
                    if self.contexts.len() >= MAXIMUM_LAYER_NUMBER {
                        log::error!("{display:?}: too many planes to post");
                        return Err(CommitError::TooManyLayers);
                    }
                    self.contexts.push(*context);
                    self.flipped.push((display, layer));
                }
                Err(err) => log::error!("{display:?} layer {layer}: {err}"),
            }
        }
        Ok(())
    }

    fn commit_end(&mut self, displays: &mut [Option<DisplayContents>]) -> Result<(), CommitError> {
        debug_assert_eq!(self.phase, Phase::Open, "commit_end without commit_begin");
        self.phase = Phase::Idle;

        if self.contexts.is_empty() {
            self.close_acquire_fences(displays);
            return Ok(());
        }

        let fence = match self.device.post(&self.contexts) {
            Ok(fence) => fence,
            Err(err) => {
                log::error!("post of {} planes failed: {err}", self.contexts.len());
                self.close_acquire_fences(displays);
                return Err(err);
            }
        };
        log::trace!("posted {} planes, {fence:?}", self.contexts.len());

        if fence.is_valid() {
            for &(display, layer) in &self.flipped {
                if let Some(l) = displays
                    .get_mut(display.index())
                    .and_then(Option::as_mut)
                    .and_then(|c| c.layers.get_mut(layer))
                {
                    l.release_fence = self.device.dup_fence(fence);
                }
            }
            for (index, contents) in displays.iter_mut().enumerate() {
                let Some(contents) = contents else {
                    continue;
                };
                let physical = u32::try_from(index).is_ok_and(|i| DisplayId(i).is_physical());
                if physical {
                    contents.retire_fence = self.device.dup_fence(fence);
                }
            }
            self.device.close_fence(fence);
        }

        self.close_acquire_fences(displays);
        Ok(())
    }

    fn composition_complete(&mut self) -> Result<(), CommitError> {
        self.device.wait_idle().inspect_err(|err| {
            log::warn!("composition complete: {err}");
        })
    }

    fn set_cursor_position(
        &mut self,
        display: DisplayId,
        x: i32,
        y: i32,
    ) -> Result<(), CommitError> {
        self.device
            .write_cursor_position(display, cursor_position_bits(x, y))
    }
}

impl<D: PostDevice + fmt::Debug> fmt::Debug for PostingContext<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostingContext")
            .field("device", &self.device)
            .field("phase", &self.phase)
            .field("pending", &self.contexts.len())
            .finish()
    }
}
