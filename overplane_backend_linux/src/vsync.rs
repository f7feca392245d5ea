// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Vsync event observer.
//!
//! [`VsyncEventObserver`] owns one worker thread that blocks in
//! [`VsyncControl::wait`] while vsync is enabled and delivers a
//! [`VsyncEvent`] for every signal.
//!
//! ```text
//!   Uninitialized ──initialize()──► Initialized ──deinitialize()──► Uninitialized
//!                                    │      ▲
//!                        control(true)│      │control(false)
//!                                    ▼      │
//!                                  enabled / disabled
//! ```
//!
//! The enabled and exit flags live under one mutex; the worker sleeps on a
//! condition variable while disabled. Events are delivered without holding
//! the lock. [`VsyncEventObserver::deinitialize`] joins the worker, so no
//! event is delivered after it returns.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use overplane_core::composer::ComposerCallbacks;
use overplane_core::display::{DisplayId, DisplayMode};
use overplane_core::time::{Duration, HostTime};
use crate::error::ObserverError;
use crate::time::{now, sleep_until};
use crate::worker::{Spawner, Worker};

/// One vsync signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VsyncEvent {
    /// Display that produced the signal.
    pub display: DisplayId,
    /// When the signal happened.
    pub timestamp: HostTime,
}

/// Receives vsync events on the observer thread.
pub type VsyncSink = Arc<dyn Fn(VsyncEvent) + Send + Sync>;

/// Returns a sink forwarding every event to `callbacks` as a primary
/// display vsync.
pub fn vsync_to_callbacks(callbacks: Arc<dyn ComposerCallbacks>) -> VsyncSink {
    Arc::new(move |event: VsyncEvent| callbacks.vsync(DisplayId::PRIMARY, event.timestamp))
}

/// The hardware vsync source.
///
/// `control` is called from the composition thread while `wait` blocks on
/// the observer thread, so implementations synchronize internally.
pub trait VsyncControl: Send + Sync {
    /// Turns hardware vsync interrupts on or off.
    fn control(&self, enabled: bool) -> Result<(), ObserverError>;

    /// Blocks until the next vsync and returns its timestamp.
    fn wait(&self) -> Result<HostTime, ObserverError>;
}

#[derive(Debug, Default)]
struct Flags {
    enabled: bool,
    exit: bool,
}

#[derive(Debug, Default)]
struct Shared {
    flags: Mutex<Flags>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background poller turning hardware vsync into [`VsyncEvent`]s.
pub struct VsyncEventObserver {
    display: DisplayId,
    control: Arc<dyn VsyncControl>,
    sink: VsyncSink,
    shared: Arc<Shared>,
    worker: Option<Worker>,
}

impl VsyncEventObserver {
    /// Creates an uninitialized observer for `display`.
    pub fn new(display: DisplayId, control: Arc<dyn VsyncControl>, sink: VsyncSink) -> Self {
        Self {
            display,
            control,
            sink,
            shared: Arc::new(Shared::default()),
            worker: None,
        }
    }

    /// Starts the poll thread with vsync disabled.
    ///
    /// On failure the observer stays uninitialized.
    pub fn initialize(&mut self) -> Result<(), ObserverError> {
        self.initialize_with(Worker::spawn)
    }

    fn initialize_with(&mut self, spawn: Spawner) -> Result<(), ObserverError> {
        if self.worker.is_some() {
            return Err(ObserverError::AlreadyInitialized);
        }
        *self.shared.lock() = Flags::default();

        let display = self.display;
        let control = Arc::clone(&self.control);
        let sink = Arc::clone(&self.sink);
        let shared = Arc::clone(&self.shared);
        let name = format!("vsync-{}", display.0);
        self.worker = Some(spawn(
            &name,
            Box::new(move || poll_loop(display, &*control, &sink, &shared)),
        )?);
        Ok(())
    }

    /// Returns `true` between `initialize` and `deinitialize`.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.worker.is_some()
    }

    /// Returns `true` if events are being delivered.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.shared.lock().enabled
    }

    /// Enables or disables vsync delivery.
    pub fn control(&self, enabled: bool) -> Result<(), ObserverError> {
        if self.worker.is_none() {
            return Err(ObserverError::NotInitialized);
        }
        let mut flags = self.shared.lock();
        if flags.enabled == enabled {
            return Ok(());
        }
        self.control.control(enabled)?;
        flags.enabled = enabled;
        log::debug!("{:?} vsync enabled: {enabled}", self.display);
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Stops and joins the poll thread. May be called from any thread but
    /// the observer's own.
    pub fn deinitialize(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };
        {
            let mut flags = self.shared.lock();
            if flags.enabled {
                if let Err(err) = self.control.control(false) {
                    log::warn!("{:?}: failed to disable vsync: {err}", self.display);
                }
                flags.enabled = false;
            }
            flags.exit = true;
            self.shared.wake.notify_all();
        }
        worker.join();
    }
}

impl Drop for VsyncEventObserver {
    fn drop(&mut self) {
        self.deinitialize();
    }
}

impl std::fmt::Debug for VsyncEventObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VsyncEventObserver")
            .field("display", &self.display)
            .field("initialized", &self.is_initialized())
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

fn poll_loop(display: DisplayId, control: &dyn VsyncControl, sink: &VsyncSink, shared: &Shared) {
    loop {
        {
            let mut flags = shared.lock();
            while !flags.enabled && !flags.exit {
                flags = shared
                    .wake
                    .wait(flags)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if flags.exit {
                return;
            }
        }

        match control.wait() {
            Ok(timestamp) => {
                {
                    let flags = shared.lock();
                    if flags.exit {
                        return;
                    }
                    if !flags.enabled {
                        continue;
                    }
                }
                sink(VsyncEvent { display, timestamp });
            }
            Err(err) => {
                log::warn!("{display:?}: vsync wait failed: {err}");
                thread::yield_now();
            }
        }
    }
}

/// Software vsync paced on the monotonic clock.
#[derive(Debug)]
pub struct TimerVsyncControl {
    period: Duration,
    last: Mutex<Option<HostTime>>,
}

impl TimerVsyncControl {
    /// Creates a source ticking every `period`.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last: Mutex::new(None),
        }
    }

    /// Creates a source ticking at the refresh rate of `mode`.
    #[must_use]
    pub fn for_mode(mode: DisplayMode) -> Self {
        Self::new(Duration::from_refresh_rate(mode.refresh_hz))
    }

    /// The tick period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl VsyncControl for TimerVsyncControl {
    fn control(&self, enabled: bool) -> Result<(), ObserverError> {
        if enabled {
            *self.last.lock().unwrap_or_else(PoisonError::into_inner) = None;
        }
        Ok(())
    }

    fn wait(&self) -> Result<HostTime, ObserverError> {
        let current = now();
        let deadline = {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            let next = match *last {
                Some(previous) if previous + self.period > current => previous + self.period,
                _ => current + self.period,
            };
            *last = Some(next);
            next
        };
        sleep_until(deadline)?;
        Ok(deadline)
    }
}
