//! Runtime services on top of `kiln-kernel`.
//!
//! - **Performance dispatch**: [`PerformanceDispatcher`] picks the fastest of
//!   several interchangeable kernels per call geometry and freezes the choice.
//! - **Timing**: [`time_run`] measures one run fenced by device barriers.
//! - **Host backend**: [`HostCompiler`] and [`HostDevice`] run kernels as Rust
//!   closures on the calling thread.

pub mod config;
pub mod error;
pub mod host;
pub mod perf_dispatch;
pub mod timing;


pub use config::DispatchConfig;
pub use error::*;
pub use host::{HostCompiler, HostDevice, HostFn};
pub use perf_dispatch::{CompatibilityFn, GeometryFn, GeometryState, PerformanceDispatcher};
pub use timing::{TimedRun, time_run};
