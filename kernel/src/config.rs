//! Compilation and caching configuration.
//!
//! Typed configuration with bon builders and environment variable fallbacks.

use bon::bon;
use kiln_device::DeviceSpec;

/// Default bound for identity-keyed caches (fast path and launch contexts).
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Configuration shared by every kernel built against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileConfig {
    /// Target the compiler produces code for.
    pub arch: DeviceSpec,
    /// Reject floats passed to template parameters.
    pub raise_on_templated_floats: bool,
    /// Validate own arrays against their annotation on every feature extraction.
    pub debug_checks: bool,
    /// Bound on the mapper's identity fast path. Zero disables it.
    pub fast_path_capacity: usize,
    /// Bound on cached launch contexts per kernel. Zero disables the cache.
    pub launch_cache_capacity: usize,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            arch: DeviceSpec::Cpu,
            raise_on_templated_floats: false,
            debug_checks: true,
            fast_path_capacity: DEFAULT_CACHE_CAPACITY,
            launch_cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[bon]
impl CompileConfig {
    /// Create a compile configuration with builder pattern.
    #[builder(finish_fn = build)]
    pub fn builder(
        #[builder(default)] arch: DeviceSpec,
        #[builder(default = false)] raise_on_templated_floats: bool,
        #[builder(default = true)] debug_checks: bool,
        #[builder(default = DEFAULT_CACHE_CAPACITY)] fast_path_capacity: usize,
        #[builder(default = DEFAULT_CACHE_CAPACITY)] launch_cache_capacity: usize,
    ) -> Self {
        Self { arch, raise_on_templated_floats, debug_checks, fast_path_capacity, launch_cache_capacity }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `KILN_ARCH` - Target device, e.g. `cpu` or `cuda:0` (default: cpu)
    /// * `KILN_RAISE_ON_TEMPLATED_FLOATS=1` - Reject floats in template slots
    /// * `KILN_DEBUG=1` - Validate own arrays against annotations (default: on; `KILN_DEBUG=0` disables)
    /// * `KILN_FAST_PATH_CAPACITY` - Identity fast path bound (default: 256)
    /// * `KILN_LAUNCH_CACHE_CAPACITY` - Launch context cache bound (default: 256)
    pub fn from_env() -> Self {
        let arch = std::env::var("KILN_ARCH").ok().and_then(|s| s.parse().ok()).unwrap_or_default();
        let raise_on_templated_floats = env_flag("KILN_RAISE_ON_TEMPLATED_FLOATS").unwrap_or(false);
        let debug_checks = env_flag("KILN_DEBUG").unwrap_or(true);
        let fast_path_capacity =
            std::env::var("KILN_FAST_PATH_CAPACITY").ok().and_then(|s| s.parse().ok()).unwrap_or(DEFAULT_CACHE_CAPACITY);
        let launch_cache_capacity = std::env::var("KILN_LAUNCH_CACHE_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CACHE_CAPACITY);

        Self { arch, raise_on_templated_floats, debug_checks, fast_path_capacity, launch_cache_capacity }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| !matches!(v.as_str(), "" | "0" | "false" | "FALSE"))
}
