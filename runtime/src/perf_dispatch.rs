//! Performance dispatch among interchangeable kernels.
//!
//! A [`PerformanceDispatcher`] stands for one logical operation backed by
//! several kernels with the same parameter list. Calls are grouped by a
//! user-supplied geometry hash. Within a geometry every compatible candidate
//! is tried in turn (fewest trials first) until each has run `num_warmup + 1`
//! times, then the one with the lowest last measured time is frozen for that
//! geometry and every later call goes straight to it.
//!
//! There is no exploration after freezing.

use std::sync::Arc;
use std::time::Duration;

use bon::bon;
use kiln_device::Synchronize;
use kiln_kernel::{ArgMetadata, Callable, Kernel, Returns, Value};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use snafu::ensure;
use tracing::{debug, trace};

use crate::config::DispatchConfig;
use crate::error::*;
use crate::timing::time_run;

/// Maps the arguments of a call to its geometry. Must be pure.
pub type GeometryFn = Arc<dyn Fn(&[Value]) -> u64 + Send + Sync>;

/// Decides whether a candidate can run a call with these arguments.
pub type CompatibilityFn = Arc<dyn Fn(&[Value]) -> bool + Send + Sync>;

struct Candidate {
    kernel: Arc<Kernel>,
    is_compatible: Option<CompatibilityFn>,
}

impl Candidate {
    fn accepts(&self, args: &[Value]) -> bool {
        self.is_compatible.as_ref().is_none_or(|f| f(args))
    }
}

/// Trial bookkeeping for one geometry.
#[derive(Debug, Clone, Default)]
pub struct GeometryState {
    /// Completed trials per candidate, indexed by registration order.
    pub trials: Vec<usize>,
    /// Last recorded (post warm-up) time per candidate.
    pub elapsed: Vec<Option<Duration>>,
    /// Candidate every call of this geometry goes to, once decided.
    pub fastest: Option<usize>,
}

impl GeometryState {
    fn grow(&mut self, candidates: usize) {
        if self.trials.len() < candidates {
            self.trials.resize(candidates, 0);
            self.elapsed.resize(candidates, None);
        }
    }
}

enum Selection {
    Frozen(usize),
    Trial(usize),
}

pub struct PerformanceDispatcher {
    name: String,
    params: Vec<ArgMetadata>,
    geometry: GeometryFn,
    device: Arc<dyn Synchronize>,
    config: DispatchConfig,
    candidates: RwLock<Vec<Arc<Candidate>>>,
    geometries: Mutex<FxHashMap<u64, GeometryState>>,
}

#[bon]
impl PerformanceDispatcher {
    /// Create a dispatcher for an operation with the given prototype.
    ///
    /// Candidates registered later must declare exactly these parameter names.
    #[builder(finish_fn = build)]
    pub fn builder(
        #[builder(into)] name: String,
        #[builder(default)] params: Vec<ArgMetadata>,
        geometry: GeometryFn,
        device: Arc<dyn Synchronize>,
        #[builder(default = DispatchConfig::from_env())] config: DispatchConfig,
    ) -> Self {
        Self {
            name,
            params,
            geometry,
            device,
            config,
            candidates: RwLock::new(Vec::new()),
            geometries: Mutex::new(FxHashMap::default()),
        }
    }
}

impl PerformanceDispatcher {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> DispatchConfig {
        self.config
    }

    pub fn len(&self) -> usize {
        self.candidates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.read().is_empty()
    }

    /// Add a candidate, optionally gated by a compatibility predicate.
    ///
    /// Returns the candidate's registration index. Only kernels are accepted,
    /// and their declared parameters must match the prototype by count and name.
    pub fn register(&self, candidate: impl Into<Callable>, is_compatible: Option<CompatibilityFn>) -> Result<usize> {
        let candidate = candidate.into();
        let Some(kernel) = candidate.as_kernel() else {
            return NotAKernelSnafu { name: candidate.name() }.fail();
        };

        let declared = kernel.signature().params();
        ensure!(
            declared.len() == self.params.len(),
            ParameterCountMismatchSnafu {
                dispatcher: self.name.as_str(),
                candidate: kernel.name(),
                expected: self.params.len(),
                found: declared.len(),
            }
        );
        for (index, (expected, found)) in self.params.iter().zip(declared.iter()).enumerate() {
            ensure!(
                expected.name == found.name,
                SignatureMismatchSnafu {
                    dispatcher: self.name.as_str(),
                    candidate: kernel.name(),
                    index,
                    expected: expected.name.as_str(),
                    found: found.name.as_str(),
                }
            );
        }

        let mut candidates = self.candidates.write();
        candidates.push(Arc::new(Candidate { kernel: Arc::clone(kernel), is_compatible }));
        debug!(dispatcher = %self.name, candidate = kernel.name(), index = candidates.len() - 1, "candidate registered");
        Ok(candidates.len() - 1)
    }

    /// Run the operation on the candidate chosen for this call's geometry.
    #[tracing::instrument(level = "trace", skip_all, fields(dispatcher = %self.name))]
    pub fn call(&self, args: &[Value]) -> Result<Returns> {
        let geometry = (self.geometry)(args);
        let candidates = self.candidates.read().clone();

        if let Some(index) = self.frozen(geometry) {
            trace!(geometry, candidate = index, "frozen candidate");
            return Ok(candidates[index].kernel.call(args)?);
        }

        let compatible: SmallVec<[usize; 4]> =
            candidates.iter().enumerate().filter(|(_, c)| c.accepts(args)).map(|(i, _)| i).collect();

        let selection = {
            let mut geometries = self.geometries.lock();
            let state = geometries.entry(geometry).or_default();
            state.grow(candidates.len());
            self.select(geometry, state, &compatible)?
        };

        let index = match selection {
            Selection::Frozen(index) => return Ok(candidates[index].kernel.call(args)?),
            Selection::Trial(index) => index,
        };

        let run = time_run(self.device.as_ref(), || Ok(candidates[index].kernel.call(args)?))?;

        let mut geometries = self.geometries.lock();
        let state = geometries.entry(geometry).or_default();
        state.grow(candidates.len());
        self.record(geometry, state, &compatible, index, run.elapsed);

        Ok(run.output)
    }

    /// Candidate frozen for `geometry`, if any.
    pub fn frozen(&self, geometry: u64) -> Option<usize> {
        self.geometries.lock().get(&geometry).and_then(|state| state.fastest)
    }

    /// Snapshot of the trial bookkeeping for `geometry`.
    pub fn geometry_state(&self, geometry: u64) -> Option<GeometryState> {
        self.geometries.lock().get(&geometry).cloned()
    }

    /// Name of the candidate registered at `index`.
    pub fn candidate_name(&self, index: usize) -> Option<String> {
        self.candidates.read().get(index).map(|c| c.kernel.name().to_string())
    }

    fn select(&self, geometry: u64, state: &mut GeometryState, compatible: &[usize]) -> Result<Selection> {
        // Another call may have frozen this geometry since the first check.
        if let Some(index) = state.fastest {
            return Ok(Selection::Frozen(index));
        }

        match *compatible {
            [] => NoCandidateSnafu { dispatcher: self.name.as_str(), registered: state.trials.len() }.fail(),
            [only] => {
                state.fastest = Some(only);
                debug!(dispatcher = %self.name, geometry, candidate = only, "single compatible candidate frozen");
                Ok(Selection::Frozen(only))
            }
            _ => {
                let index = compatible.iter().copied().min_by_key(|&i| (state.trials[i], i)).unwrap_or(compatible[0]);
                Ok(Selection::Trial(index))
            }
        }
    }

    fn record(&self, geometry: u64, state: &mut GeometryState, compatible: &[usize], index: usize, elapsed: Duration) {
        if state.fastest.is_some() {
            return;
        }

        if state.trials[index] >= self.config.num_warmup {
            state.elapsed[index] = Some(elapsed);
        }
        state.trials[index] += 1;
        trace!(geometry, candidate = index, trials = state.trials[index], ?elapsed, "trial finished");

        let warm = compatible.iter().all(|&i| state.trials[i] > self.config.num_warmup);
        if !warm {
            return;
        }

        let fastest = compatible
            .iter()
            .filter_map(|&i| state.elapsed[i].map(|t| (t, i)))
            .min()
            .map(|(_, i)| i);
        if let Some(fastest) = fastest {
            state.fastest = Some(fastest);
            debug!(dispatcher = %self.name, geometry, candidate = fastest, "fastest candidate frozen");
        }
    }
}
