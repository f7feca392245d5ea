// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Observer error types.

use std::fmt;

use rustix::io::Errno;

/// Errors from observer lifecycle and I/O.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObserverError {
    /// The worker thread could not be created. The observer stays
    /// uninitialized.
    Spawn(String),
    /// The observer is already running.
    AlreadyInitialized,
    /// The observer was used before `initialize`.
    NotInitialized,
    /// A system call failed.
    Io(Errno),
}

impl fmt::Display for ObserverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(reason) => write!(f, "failed to spawn worker thread: {reason}"),
            Self::AlreadyInitialized => f.write_str("observer is already initialized"),
            Self::NotInitialized => f.write_str("observer is not initialized"),
            Self::Io(errno) => write!(f, "system call failed: {errno}"),
        }
    }
}

impl core::error::Error for ObserverError {}

impl From<Errno> for ObserverError {
    fn from(errno: Errno) -> Self {
        Self::Io(errno)
    }
}

/// Errors from the uevent observer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UeventError {
    /// A listener for this event name is already registered.
    DuplicateListener(String),
    /// Listeners can only change before `start`.
    AlreadyStarted,
    /// Lifecycle or I/O failure.
    Observer(ObserverError),
}

impl fmt::Display for UeventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateListener(event) => {
                write!(f, "a listener for {event:?} is already registered")
            }
            Self::AlreadyStarted => f.write_str("uevent observer already started"),
            Self::Observer(err) => err.fmt(f),
        }
    }
}

impl core::error::Error for UeventError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Observer(err) => Some(err),
            Self::DuplicateListener(_) | Self::AlreadyStarted => None,
        }
    }
}

impl From<ObserverError> for UeventError {
    fn from(err: ObserverError) -> Self {
        Self::Observer(err)
    }
}

impl From<Errno> for UeventError {
    fn from(errno: Errno) -> Self {
        Self::Observer(ObserverError::Io(errno))
    }
}
