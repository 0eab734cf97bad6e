//! Host reference backend.
//!
//! [`HostCompiler`] turns registered Rust closures into programs, keyed by
//! kernel name, so the full call path (instantiation, pruning, binding,
//! launch) runs without a device toolchain. [`HostDevice`] is the matching
//! barrier; host programs complete before `launch` returns, so it only counts.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use kiln_device::{LaunchContext, Program, Synchronize};
use kiln_kernel::{AutodiffMode, CompileRequest, KernelCompiler};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

/// Body of a host kernel: reads its slots and pushes return values.
pub type HostFn = Arc<dyn Fn(&mut LaunchContext) -> kiln_device::Result<()> + Send + Sync>;

/// Compiles kernels by looking up a registered closure.
#[derive(Default)]
pub struct HostCompiler {
    kernels: RwLock<FxHashMap<String, HostFn>>,
    compilations: AtomicUsize,
}

impl HostCompiler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register the body for kernels named `name`. Replaces an earlier body;
    /// already compiled instantiations keep the old one.
    pub fn define(
        &self,
        name: impl Into<String>,
        f: impl Fn(&mut LaunchContext) -> kiln_device::Result<()> + Send + Sync + 'static,
    ) {
        self.kernels.write().insert(name.into(), Arc::new(f));
    }

    /// Number of programs produced so far.
    pub fn compilations(&self) -> usize {
        self.compilations.load(Ordering::Relaxed)
    }
}

impl KernelCompiler for HostCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> kiln_device::Result<Arc<dyn Program>> {
        let f = self.kernels.read().get(request.kernel).cloned();
        let Some(f) = f else {
            return kiln_device::error::CompileFailedSnafu {
                kernel: request.kernel.to_string(),
                reason: "no host body registered",
            }
            .fail();
        };

        if request.autodiff_mode == AutodiffMode::Reverse {
            return kiln_device::error::CompileFailedSnafu {
                kernel: request.kernel.to_string(),
                reason: "host backend has no adjoint programs",
            }
            .fail();
        }

        self.compilations.fetch_add(1, Ordering::Relaxed);
        debug!(kernel = request.kernel, instantiation = %request.instantiation, slots = request.slots, "host program built");

        Ok(Arc::new(HostProgram { name: format!("{}{}", request.kernel, request.instantiation), f }))
    }
}

struct HostProgram {
    name: String,
    f: HostFn,
}

impl Program for HostProgram {
    fn launch(&self, ctx: &mut LaunchContext) -> kiln_device::Result<()> {
        (self.f)(ctx)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Host barrier. Counts synchronizations for inspection.
#[derive(Debug, Default)]
pub struct HostDevice {
    syncs: AtomicUsize,
}

impl HostDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn syncs(&self) -> usize {
        self.syncs.load(Ordering::Relaxed)
    }
}

impl Synchronize for HostDevice {
    fn synchronize(&self) -> kiln_device::Result<()> {
        self.syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
