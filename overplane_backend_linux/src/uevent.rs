// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Kernel uevent observer.
//!
//! [`UeventObserver`] owns a worker thread that waits on a uevent source and
//! a self-pipe. Each datagram read from the source is parsed just far
//! enough to find its event name (the leading token, up to the first NUL or
//! newline) and handed to the listener registered under exactly that name.
//! Listeners run synchronously on the worker thread.
//!
//! Lifecycle:
//!
//! ```text
//!   new() ──► initialize() ──► register_listener()* ──► start() ──► deinitialize()
//! ```
//!
//! Listeners are frozen at `start`; events arriving before it are not
//! buffered. The source and listeners move to the worker only once its
//! thread exists, so a failed `start` leaves the observer as it was. Writing to the self-pipe wakes the worker for shutdown and
//! [`UeventObserver::deinitialize`] joins it.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::mpsc;

use hashbrown::HashMap;
use rustix::event::{PollFd, PollFlags, poll};
use rustix::io::{Errno, read, write};
use rustix::net::netlink::{self, SocketAddrNetlink};
use rustix::net::{AddressFamily, SocketFlags, SocketType, bind, socket_with, sockopt};
use rustix::pipe::{PipeFlags, pipe_with};

use crate::error::{ObserverError, UeventError};
use crate::worker::{Spawner, Worker};

/// Size of the datagram buffer. Longer datagrams are truncated.
pub const UEVENT_MSG_LEN: usize = 2048;

const NETLINK_RECV_BUFFER: usize = 64 * 1024;

/// Observer settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UeventConfig {
    /// Datagram buffer size.
    pub buffer_len: usize,
    /// Worker thread name.
    pub thread_name: &'static str,
}

impl UeventConfig {
    /// A [`UEVENT_MSG_LEN`] buffer on a thread named `uevent`.
    pub const DEFAULT: Self = Self {
        buffer_len: UEVENT_MSG_LEN,
        thread_name: "uevent",
    };
}

impl Default for UeventConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// One kernel uevent.
///
/// The payload is a sequence of NUL- or newline-separated fields. The first
/// is the event name (`ACTION@DEVPATH`), the rest are `KEY=VALUE`
/// properties.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Uevent<'a> {
    name: &'a str,
    raw: &'a [u8],
}

fn is_separator(byte: &u8) -> bool {
    matches!(byte, b'\0' | b'\n')
}

impl<'a> Uevent<'a> {
    /// Parses `raw`. Returns `None` if the event name is empty or not UTF-8.
    #[must_use]
    pub fn parse(raw: &'a [u8]) -> Option<Self> {
        let end = raw.iter().position(is_separator).unwrap_or(raw.len());
        let name = std::str::from_utf8(&raw[..end]).ok()?;
        if name.is_empty() {
            return None;
        }
        Some(Self { name, raw })
    }

    /// The event name.
    #[must_use]
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// The `KEY=VALUE` properties following the name, in order. Fields that
    /// are not UTF-8 or have no `=` are skipped.
    pub fn properties(&self) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.raw
            .split(is_separator)
            .skip(1)
            .filter_map(|field| std::str::from_utf8(field).ok()?.split_once('='))
    }

    /// Looks up property `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.properties().find(|(k, _)| *k == key).map(|(_, v)| v)
    }
}

/// A registered uevent handler. Context is whatever the closure captures.
pub type UeventCallback = Box<dyn Fn(&Uevent<'_>) + Send>;

/// The kernel's `NETLINK_KOBJECT_UEVENT` broadcast socket.
#[derive(Debug)]
pub struct NetlinkUeventSource {
    fd: OwnedFd,
}

impl NetlinkUeventSource {
    /// Opens and binds the uevent socket.
    pub fn open() -> Result<Self, ObserverError> {
        let fd = socket_with(
            AddressFamily::NETLINK,
            SocketType::DGRAM,
            SocketFlags::CLOEXEC,
            Some(netlink::KOBJECT_UEVENT),
        )?;
        if let Err(errno) = sockopt::set_socket_recv_buffer_size(&fd, NETLINK_RECV_BUFFER) {
            log::warn!("uevent socket: cannot grow receive buffer: {errno}");
        }
        bind(&fd, &SocketAddrNetlink::new(0, u32::MAX))?;
        Ok(Self { fd })
    }
}

impl AsFd for NetlinkUeventSource {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Background listener dispatching uevents by name.
pub struct UeventObserver<S: AsFd + Send + 'static> {
    config: UeventConfig,
    source: Option<S>,
    listeners: HashMap<String, UeventCallback>,
    exit_read: Option<OwnedFd>,
    exit_write: Option<OwnedFd>,
    worker: Option<Worker>,
}

impl<S: AsFd + Send + 'static> UeventObserver<S> {
    /// Creates an uninitialized observer reading from `source`.
    pub fn new(config: UeventConfig, source: S) -> Self {
        Self {
            config,
            source: Some(source),
            listeners: HashMap::new(),
            exit_read: None,
            exit_write: None,
            worker: None,
        }
    }

    /// Opens the exit pipe.
    pub fn initialize(&mut self) -> Result<(), UeventError> {
        if self.exit_write.is_some() {
            return Err(ObserverError::AlreadyInitialized.into());
        }
        let (read_end, write_end) = pipe_with(PipeFlags::CLOEXEC)?;
        self.exit_read = Some(read_end);
        self.exit_write = Some(write_end);
        Ok(())
    }

    /// Registers `callback` for events named exactly `event`.
    ///
    /// Must be called before [`start`](Self::start). A second listener for
    /// the same name is rejected.
    pub fn register_listener<F>(&mut self, event: &str, callback: F) -> Result<(), UeventError>
    where
        F: Fn(&Uevent<'_>) + Send + 'static,
    {
        if self.worker.is_some() || self.source.is_none() {
            return Err(UeventError::AlreadyStarted);
        }
        if self.listeners.contains_key(event) {
            log::warn!("duplicate uevent listener for {event:?}");
            return Err(UeventError::DuplicateListener(event.to_owned()));
        }
        self.listeners.insert(event.to_owned(), Box::new(callback));
        log::debug!("uevent listener registered for {event:?}");
        Ok(())
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Returns `true` while the worker runs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Starts the worker thread.
    pub fn start(&mut self) -> Result<(), UeventError> {
        self.start_with(Worker::spawn)
    }

    fn start_with(&mut self, spawn: Spawner) -> Result<(), UeventError> {
        if self.worker.is_some() {
            return Err(UeventError::AlreadyStarted);
        }
        if self.exit_write.is_none() {
            return Err(ObserverError::NotInitialized.into());
        }
        if self.source.is_none() || self.exit_read.is_none() {
            return Err(UeventError::AlreadyStarted);
        }

        let (handoff, receive) = mpsc::channel::<Listening<S>>();
        let buffer_len = self.config.buffer_len.max(1);
        let worker = spawn(
            self.config.thread_name,
            Box::new(move || {
                // A dropped sender means start gave up; exit without listening.
                if let Ok(state) = receive.recv() {
                    listen(&state.source, &state.exit, &state.listeners, buffer_len);
                }
            }),
        )?;

        if let (Some(source), Some(exit)) = (self.source.take(), self.exit_read.take()) {
            let state = Listening {
                source,
                exit,
                listeners: core::mem::take(&mut self.listeners),
            };
            if handoff.send(state).is_err() {
                log::error!("{} exited before receiving its source", self.config.thread_name);
            }
        }
        self.worker = Some(worker);
        Ok(())
    }

    /// Signals the worker and joins it. Idempotent.
    pub fn deinitialize(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            if let Some(exit) = &self.exit_write {
                loop {
                    match write(exit, &[1]) {
                        Err(Errno::INTR) => continue,
                        Err(errno) => log::error!("uevent exit signal failed: {errno}"),
                        Ok(_) => {}
                    }
                    break;
                }
            }
            worker.join();
        }
        self.exit_read = None;
        self.exit_write = None;
    }
}

impl<S: AsFd + Send + 'static> Drop for UeventObserver<S> {
    fn drop(&mut self) {
        self.deinitialize();
    }
}

impl<S: AsFd + Send + 'static> std::fmt::Debug for UeventObserver<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UeventObserver")
            .field("config", &self.config)
            .field("listeners", &self.listeners.keys().collect::<Vec<_>>())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// What the worker owns while listening.
struct Listening<S> {
    source: S,
    exit: OwnedFd,
    listeners: HashMap<String, UeventCallback>,
}

fn dispatch(listeners: &HashMap<String, UeventCallback>, datagram: &[u8]) {
    let Some(event) = Uevent::parse(datagram) else {
        return;
    };
    match listeners.get(event.name()) {
        Some(callback) => {
            log::trace!("dispatching {}", event.name());
            callback(&event);
        }
        None => log::trace!("no listener for {}", event.name()),
    }
}

fn listen<S: AsFd>(
    source: &S,
    exit: &OwnedFd,
    listeners: &HashMap<String, UeventCallback>,
    buffer_len: usize,
) {
    let mut buffer = vec![0_u8; buffer_len];
    loop {
        let mut fds = [
            PollFd::new(source, PollFlags::IN),
            PollFd::new(exit, PollFlags::IN),
        ];
        match poll(&mut fds, None) {
            Ok(_) => {}
            Err(Errno::INTR) => continue,
            Err(errno) => {
                log::error!("uevent poll failed: {errno}");
                return;
            }
        }
        let (source_ready, exit_ready) = (fds[0].revents(), fds[1].revents());
        if !exit_ready.is_empty() {
            return;
        }
        if source_ready.contains(PollFlags::IN) {
            match read(source, buffer.as_mut_slice()) {
                Ok(len) => dispatch(listeners, &buffer[..len]),
                Err(Errno::INTR | Errno::AGAIN) => {}
                Err(errno) => {
                    log::error!("uevent read failed: {errno}");
                    return;
                }
            }
        } else if source_ready.intersects(PollFlags::ERR | PollFlags::HUP | PollFlags::NVAL) {
            log::error!("uevent source closed");
            return;
        }
    }
}
