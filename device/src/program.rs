use crate::error::Result;
use crate::launch::LaunchContext;

/// A compiled, launchable kernel program.
///
/// Programs read their arguments from the [`LaunchContext`] slots the binder
/// filled and may push return values back into it. Launches on asynchronous
/// devices may return before the work completes; see [`Synchronize`].
pub trait Program: Send + Sync {
    fn launch(&self, ctx: &mut LaunchContext) -> Result<()>;

    /// Get the kernel name (for debugging/profiling).
    fn name(&self) -> &str;
}

/// Host-side barrier for outstanding device work.
pub trait Synchronize: Send + Sync {
    /// Block until every launched program has completed.
    fn synchronize(&self) -> Result<()>;
}
