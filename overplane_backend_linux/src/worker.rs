// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Named worker threads joined on teardown.

use std::thread::{self, JoinHandle};

use crate::error::ObserverError;

/// Closure run on a worker thread.
pub(crate) type WorkerBody = Box<dyn FnOnce() + Send + 'static>;

/// Starts a named worker. [`Worker::spawn`] in production; tests substitute
/// one that fails.
pub(crate) type Spawner = fn(&str, WorkerBody) -> Result<Worker, ObserverError>;

/// One long-lived observer thread.
///
/// Dropping a `Worker` joins it, so the thread's closure and everything it
/// captured are gone once the owner is torn down. A worker must not be
/// joined from its own thread.
#[derive(Debug)]
pub(crate) struct Worker {
    name: String,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn<F>(name: &str, body: F) -> Result<Self, ObserverError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(body)
            .map_err(|err| ObserverError::Spawn(err.to_string()))?;
        log::debug!("started {name}");
        Ok(Self {
            name: name.to_owned(),
            handle: Some(handle),
        })
    }

    pub(crate) fn join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            log::error!("{} cannot join itself", self.name);
            return;
        }
        if handle.join().is_err() {
            log::error!("{} panicked", self.name);
        } else {
            log::debug!("stopped {}", self.name);
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.join();
    }
}
