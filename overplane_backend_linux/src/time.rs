// Copyright 2026 the Overplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The monotonic clock behind vsync timestamps and software vsync deadlines.
//!
//! [`HostTime`] is nanoseconds on `CLOCK_MONOTONIC`. Reading the clock and
//! sleeping toward an absolute point on it are the only two things the
//! backend needs; both go through [`std::time::Duration`] so the
//! seconds/nanoseconds split is never done by hand.

use std::time::Duration as Span;

use overplane_core::time::HostTime;
use rustix::io::Errno;
use rustix::thread::clock_nanosleep_absolute;
use rustix::time::{ClockId, Timespec, clock_gettime};

const CLOCK: ClockId = ClockId::Monotonic;

/// Returns the current monotonic time.
#[must_use]
pub fn now() -> HostTime {
    from_timespec(clock_gettime(CLOCK))
}

/// Blocks until the monotonic clock reaches `deadline`.
///
/// The wait is absolute: a sleep interrupted by a signal resumes toward the
/// same deadline. A deadline in the past returns at once.
pub(crate) fn sleep_until(deadline: HostTime) -> Result<(), Errno> {
    let request = to_timespec(deadline);
    loop {
        match clock_nanosleep_absolute(CLOCK, &request) {
            Err(Errno::INTR) => continue,
            result => return result,
        }
    }
}

fn from_timespec(ts: Timespec) -> HostTime {
    // The monotonic clock never reports negative components.
    let span = Span::new(
        u64::try_from(ts.tv_sec).unwrap_or(0),
        u32::try_from(ts.tv_nsec).unwrap_or(0).min(999_999_999),
    );
    HostTime(u64::try_from(span.as_nanos()).unwrap_or(u64::MAX))
}

fn to_timespec(time: HostTime) -> Timespec {
    let span = Span::from_nanos(time.nanos());
    Timespec {
        tv_sec: i64::try_from(span.as_secs()).unwrap_or(i64::MAX),
        tv_nsec: span.subsec_nanos().into(),
    }
}
