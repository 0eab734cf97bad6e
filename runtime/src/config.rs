//! Dispatcher configuration.

use bon::bon;

/// Untimed trials every candidate runs per geometry before its times count.
pub const DEFAULT_NUM_WARMUP: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Trials per candidate and geometry whose elapsed time is discarded.
    pub num_warmup: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { num_warmup: DEFAULT_NUM_WARMUP }
    }
}

#[bon]
impl DispatchConfig {
    #[builder(finish_fn = build)]
    pub fn builder(#[builder(default = DEFAULT_NUM_WARMUP)] num_warmup: usize) -> Self {
        Self { num_warmup }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `KILN_PERF_DISPATCH_WARMUP` - Warm-up trials per candidate (default: 2)
    pub fn from_env() -> Self {
        let num_warmup =
            std::env::var("KILN_PERF_DISPATCH_WARMUP").ok().and_then(|s| s.parse().ok()).unwrap_or(DEFAULT_NUM_WARMUP);
        Self { num_warmup }
    }
}
