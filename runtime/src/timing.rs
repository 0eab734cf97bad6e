//! Single-run timing for performance dispatch.
//!
//! Launches may return before the device finishes, so a timed run is fenced
//! by a synchronization on both sides. Without the leading barrier the
//! measurement would include unrelated queued work, and without the trailing
//! one it would stop before the candidate finished.

use std::time::{Duration, Instant};

use kiln_device::Synchronize;
use snafu::ResultExt;

use crate::error::{DeviceSnafu, Result};

/// Result of one fenced run.
#[derive(Debug, Clone)]
pub struct TimedRun<T> {
    pub output: T,
    pub elapsed: Duration,
}

/// Run `f` once between two device barriers and measure the wall time.
///
/// The trailing barrier is inside the measured interval. A failing `f`
/// propagates its error without a trailing barrier.
pub fn time_run<T>(device: &dyn Synchronize, f: impl FnOnce() -> Result<T>) -> Result<TimedRun<T>> {
    device.synchronize().context(DeviceSnafu)?;

    let start = Instant::now();
    let output = f()?;
    device.synchronize().context(DeviceSnafu)?;
    let elapsed = start.elapsed();

    Ok(TimedRun { output, elapsed })
}
