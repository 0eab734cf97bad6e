//! Kernel front door.
//!
//! A call walks `Unbound -> InstantiationId -> Compiled -> Bound -> Launched`:
//!
//! 1. The [`InstantiationMapper`] maps the call's features to an id.
//! 2. An id seen for the first time is traced twice (collect, then enforce),
//!    and the pruned kernel is handed to the [`KernelCompiler`]. The result is
//!    kept until [`KernelVariant::reset`].
//! 3. Arguments are bound into a launch context, or a cached context is
//!    reused when every argument is an object whose identity is unchanged.
//! 4. The program launches outside the callable's lock, then copy-back
//!    callbacks run.
//!
//! Every kernel is a primal/adjoint pair; both share the body and signature
//! but specialize and cache independently.

use std::sync::Arc;

use bon::bon;
use kiln_device::{DeviceSpec, LaunchContext, Program, Scalar};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use snafu::{OptionExt, ResultExt, ensure};
use tracing::{debug, instrument};

use crate::annotation::TypeAnnotation;
use crate::cache::BoundedCache;
use crate::config::CompileConfig;
use crate::error::{
    CompileSnafu, CopyBackSnafu, InKernelSnafu, InternalConsistencySnafu, LaunchSnafu, Result, TooManyArgumentsSnafu,
};
use crate::feature::{ExtractOptions, FeatureTuple};
use crate::flat::DottedPath;
use crate::func::{Func, TraceFn};
use crate::launch::{CopyBack, MAX_ARG_NUM, bind_args, expected_slot_count};
use crate::mapper::{IdentityKey, InstantiationId, InstantiationMapper, identity_key};
use crate::pruning::{Enforced, KERNEL_FUNC_ID, Pruning};
use crate::signature::{ArgMetadata, CallableKind, Signature};
use crate::trace::{TraceSession, TracedCall};
use crate::value::Value;

/// Values a kernel returns.
pub type Returns = SmallVec<[Scalar; 1]>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AutodiffMode {
    #[default]
    None,
    Reverse,
}

/// Everything a backend needs to compile one instantiation.
#[derive(Debug)]
pub struct CompileRequest<'a> {
    pub kernel: &'a str,
    pub instantiation: InstantiationId,
    pub features: &'a FeatureTuple,
    pub autodiff_mode: AutodiffMode,
    pub arch: DeviceSpec,
    /// Parameters occupying launch slots after pruning, in slot order.
    pub params: Vec<&'a ArgMetadata>,
    /// Pruned calls emitted while enforcing, in trace order.
    pub calls: &'a [TracedCall],
    pub pruning: &'a Pruning<Enforced>,
    pub slots: usize,
}

/// Backend turning a traced, pruned kernel into a launchable program.
pub trait KernelCompiler: Send + Sync {
    fn compile(&self, request: &CompileRequest<'_>) -> kiln_device::Result<Arc<dyn Program>>;
}

/// Observable cache counters of one kernel variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Distinct feature tuples seen.
    pub instantiations: usize,
    pub fast_path_hits: usize,
    pub compilations: usize,
    pub launches: usize,
    pub launch_cache_hits: usize,
    pub launch_cache_misses: usize,
    pub launch_cache_size: usize,
}

/// One compiled instantiation and the pruning it was compiled against.
pub struct CompiledInstance {
    program: Arc<dyn Program>,
    pruning: Arc<Pruning<Enforced>>,
    /// Kernel-scope used leaves as paths, including enclosing structs.
    used: FxHashSet<DottedPath>,
    slots: usize,
    calls: Arc<[TracedCall]>,
}

impl CompiledInstance {
    pub fn program(&self) -> &Arc<dyn Program> {
        &self.program
    }

    pub fn pruning(&self) -> &Arc<Pruning<Enforced>> {
        &self.pruning
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn calls(&self) -> &Arc<[TracedCall]> {
        &self.calls
    }
}

impl std::fmt::Debug for CompiledInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledInstance")
            .field("program", &self.program.name())
            .field("slots", &self.slots)
            .field("calls", &self.calls.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LaunchKey {
    instantiation: InstantiationId,
    args: IdentityKey,
}

#[derive(Debug, Default)]
struct Counters {
    compilations: usize,
    launches: usize,
    launch_cache_hits: usize,
    launch_cache_misses: usize,
}

struct KernelState {
    mapper: InstantiationMapper,
    compiled: FxHashMap<InstantiationId, Arc<CompiledInstance>>,
    launch_cache: BoundedCache<LaunchKey, LaunchContext>,
    counters: Counters,
}

// =========================================================================
// Kernel variant
// =========================================================================

/// One autodiff mode of a kernel, with its own instantiations and caches.
pub struct KernelVariant {
    signature: Signature,
    body: TraceFn,
    mode: AutodiffMode,
    compiler: Arc<dyn KernelCompiler>,
    config: CompileConfig,
    state: Mutex<KernelState>,
}

impl KernelVariant {
    fn new(
        signature: Signature,
        body: TraceFn,
        mode: AutodiffMode,
        compiler: Arc<dyn KernelCompiler>,
        config: CompileConfig,
    ) -> Self {
        let mapper =
            InstantiationMapper::new(signature.name(), Arc::clone(signature.params()), config.fast_path_capacity);
        let state = KernelState {
            mapper,
            compiled: FxHashMap::default(),
            launch_cache: BoundedCache::new(config.launch_cache_capacity),
            counters: Counters::default(),
        };
        Self { signature, body, mode, compiler, config, state: Mutex::new(state) }
    }

    pub fn name(&self) -> &str {
        self.signature.name()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn mode(&self) -> AutodiffMode {
        self.mode
    }

    pub fn config(&self) -> &CompileConfig {
        &self.config
    }

    /// Launch with one value per declared parameter.
    pub fn call(&self, args: &[Value]) -> Result<Returns> {
        self.launch(args).context(InKernelSnafu { kernel: self.name() })
    }

    /// Launch with positional and keyword arguments.
    pub fn call_with(&self, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Result<Returns> {
        let fused = self.signature.bind_call(args, kwargs).context(InKernelSnafu { kernel: self.name() })?;
        self.call(&fused)
    }

    /// Map `args` to an instantiation and compile it if needed, without launching.
    pub fn ensure_compiled(&self, args: &[Value]) -> Result<InstantiationId> {
        let mut state = self.state.lock();
        let (id, _) = self.instance(&mut state, args)?;
        Ok(id)
    }

    /// Drop compiled programs and cached launch contexts. Instantiation ids are kept.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.compiled.clear();
        state.launch_cache.clear();
        debug!(kernel = self.name(), mode = ?self.mode, "reset compiled instantiations");
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let mapper = state.mapper.stats();
        CacheStats {
            instantiations: state.mapper.len(),
            fast_path_hits: mapper.fast_path_hits,
            compilations: state.counters.compilations,
            launches: state.counters.launches,
            launch_cache_hits: state.counters.launch_cache_hits,
            launch_cache_misses: state.counters.launch_cache_misses,
            launch_cache_size: state.launch_cache.len(),
        }
    }

    /// Compiled state of an instantiation, if it is currently compiled.
    pub fn compiled(&self, id: InstantiationId) -> Option<Arc<CompiledInstance>> {
        self.state.lock().compiled.get(&id).cloned()
    }

    /// Pruned calls traced for an instantiation.
    pub fn traced_calls(&self, id: InstantiationId) -> Option<Arc<[TracedCall]>> {
        self.compiled(id).map(|instance| Arc::clone(&instance.calls))
    }

    fn launch(&self, args: &[Value]) -> Result<Returns> {
        let (program, mut ctx, callbacks) = {
            let mut state = self.state.lock();
            let (id, instance) = self.instance(&mut state, args)?;
            let key = LaunchKey { instantiation: id, args: identity_key(self.signature.params(), args) };

            if let Some(ctx) = state.launch_cache.get(&key) {
                let ctx = ctx.clone();
                state.counters.launch_cache_hits += 1;
                (Arc::clone(&instance.program), ctx, Vec::<CopyBack>::new())
            } else {
                state.counters.launch_cache_misses += 1;
                let bound = bind_args(self.signature.params(), args, &instance.used, self.config.arch)?;
                if bound.cacheable && bound.callbacks.is_empty() {
                    state.launch_cache.insert(key, bound.ctx.clone());
                }
                (Arc::clone(&instance.program), bound.ctx, bound.callbacks)
            }
        };

        program.launch(&mut ctx).context(LaunchSnafu { kernel: self.name() })?;
        for callback in callbacks {
            callback().context(CopyBackSnafu { kernel: self.name() })?;
        }
        self.state.lock().counters.launches += 1;
        Ok(ctx.take_returns())
    }

    fn instance(&self, state: &mut KernelState, args: &[Value]) -> Result<(InstantiationId, Arc<CompiledInstance>)> {
        let options = ExtractOptions {
            raise_on_templated_floats: self.config.raise_on_templated_floats,
            check_matched: self.config.debug_checks,
        };
        let (id, features) = state.mapper.lookup(options, args)?;
        if let Some(instance) = state.compiled.get(&id) {
            return Ok((id, Arc::clone(instance)));
        }

        let instance = Arc::new(self.materialize(id, &features, args)?);
        state.compiled.insert(id, Arc::clone(&instance));
        state.counters.compilations += 1;
        Ok((id, instance))
    }

    #[instrument(level = "debug", skip_all, fields(kernel = self.name(), mode = ?self.mode, instantiation = %id))]
    fn materialize(&self, id: InstantiationId, features: &FeatureTuple, args: &[Value]) -> Result<CompiledInstance> {
        let mut session = TraceSession::collecting();
        session.run(KERNEL_FUNC_ID, &self.signature, Some(args), &self.body)?;
        let collected = session.into_collected().context(InternalConsistencySnafu {
            func_id: KERNEL_FUNC_ID,
            reason: "collecting trace finished in the enforcing phase",
        })?;

        let pruning = Arc::new(collected.enforce());
        let mut session = TraceSession::enforcing(Arc::clone(&pruning));
        session.run(KERNEL_FUNC_ID, &self.signature, Some(args), &self.body)?;
        let calls: Arc<[TracedCall]> = session.into_calls().into();

        let used = pruning.dotted(KERNEL_FUNC_ID).cloned().unwrap_or_default();
        let slots = expected_slot_count(self.signature.params(), &used);
        ensure!(
            slots <= MAX_ARG_NUM,
            TooManyArgumentsSnafu { slots, max: MAX_ARG_NUM, arch: self.config.arch.to_string() }
        );

        let params: Vec<&ArgMetadata> = pruning
            .pruned_params(KERNEL_FUNC_ID, self.signature.expanded())
            .into_iter()
            .filter(|p| !matches!(p.annotation, TypeAnnotation::Template))
            .collect();

        let request = CompileRequest {
            kernel: self.name(),
            instantiation: id,
            features,
            autodiff_mode: self.mode,
            arch: self.config.arch,
            params,
            calls: &calls,
            pruning: &pruning,
            slots,
        };
        let program = self.compiler.compile(&request).context(CompileSnafu { kernel: self.name() })?;
        debug!(slots, calls = calls.len(), program = program.name(), "compiled instantiation");

        Ok(CompiledInstance { program, pruning, used, slots, calls })
    }
}

impl std::fmt::Debug for KernelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelVariant")
            .field("name", &self.name())
            .field("mode", &self.mode)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =========================================================================
// Kernel pair
// =========================================================================

/// A kernel and its gradient counterpart.
#[derive(Debug, Clone)]
pub struct Kernel {
    primal: Arc<KernelVariant>,
    adjoint: Arc<KernelVariant>,
}

#[bon]
impl Kernel {
    #[builder(finish_fn = build)]
    pub fn builder(
        #[builder(into)] name: String,
        #[builder(default)] params: Vec<ArgMetadata>,
        body: TraceFn,
        compiler: Arc<dyn KernelCompiler>,
        #[builder(default = CompileConfig::from_env())] config: CompileConfig,
        /// First parameter is an implicit receiver.
        #[builder(default = false)]
        method: bool,
    ) -> Result<Self> {
        let signature = Signature::new(name, CallableKind::Kernel, params, method)?;
        let adjoint = KernelVariant::new(
            signature.clone(),
            Arc::clone(&body),
            AutodiffMode::Reverse,
            Arc::clone(&compiler),
            config.clone(),
        );
        let primal = KernelVariant::new(signature, body, AutodiffMode::None, compiler, config);
        Ok(Self { primal: Arc::new(primal), adjoint: Arc::new(adjoint) })
    }
}

impl Kernel {
    pub fn name(&self) -> &str {
        self.primal.name()
    }

    pub fn signature(&self) -> &Signature {
        self.primal.signature()
    }

    pub fn call(&self, args: &[Value]) -> Result<Returns> {
        self.primal.call(args)
    }

    pub fn call_with(&self, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Result<Returns> {
        self.primal.call_with(args, kwargs)
    }

    pub fn primal(&self) -> &Arc<KernelVariant> {
        &self.primal
    }

    /// The reverse-mode counterpart.
    pub fn grad(&self) -> &Arc<KernelVariant> {
        &self.adjoint
    }

    pub fn stats(&self) -> CacheStats {
        self.primal.stats()
    }

    /// Reset both variants.
    pub fn reset(&self) {
        self.primal.reset();
        self.adjoint.reset();
    }
}

// =========================================================================
// Callables
// =========================================================================

/// Anything defined with a traced body.
#[derive(Debug, Clone)]
pub enum Callable {
    Kernel(Arc<Kernel>),
    Func(Arc<Func>),
}

impl Callable {
    pub fn name(&self) -> &str {
        match self {
            Self::Kernel(k) => k.name(),
            Self::Func(f) => f.name(),
        }
    }

    pub fn signature(&self) -> &Signature {
        match self {
            Self::Kernel(k) => k.signature(),
            Self::Func(f) => f.signature(),
        }
    }

    pub fn as_kernel(&self) -> Option<&Arc<Kernel>> {
        match self {
            Self::Kernel(k) => Some(k),
            Self::Func(_) => None,
        }
    }
}

impl From<Kernel> for Callable {
    fn from(kernel: Kernel) -> Self {
        Self::Kernel(Arc::new(kernel))
    }
}

impl From<Arc<Kernel>> for Callable {
    fn from(kernel: Arc<Kernel>) -> Self {
        Self::Kernel(kernel)
    }
}

impl From<Arc<Func>> for Callable {
    fn from(func: Arc<Func>) -> Self {
        Self::Func(func)
    }
}
