//! Dead-parameter elimination across func calls.
//!
//! Struct arguments are flattened into one launch slot per leaf, so forwarding
//! whole structs through nested funcs would multiply the kernel's argument
//! count. Pruning keeps, per func, the set of flattened leaves its body
//! actually reads, and forwards only those.
//!
//! The protocol runs over two traces of the same kernel body:
//!
//! 1. **Collect** ([`Pruning<Collecting>`]): reads mark leaves used, and after
//!    each call returns, [`Pruning::record_after_call`] copies the callee's
//!    needs into the caller. Callees finish tracing before their caller
//!    resumes, so the callee's set is complete when it is copied.
//! 2. **Enforce** ([`Pruning<Enforced>`]): the sets are frozen, and every call
//!    site forwards [`Pruning::filter_call_args`] instead of its full argument
//!    list.
//!
//! The kernel's own parameter scope is func [`KERNEL_FUNC_ID`], so the root
//! needs no special treatment.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use snafu::{OptionExt, ensure};

use crate::annotation::TypeAnnotation;
use crate::error::{
    ArgumentCountSnafu, MissingArgumentSnafu, Result, StructTypeMismatchSnafu, UnexpectedArgumentSnafu,
};
use crate::flat::{DottedPath, dotted, is_flat, join};
use crate::signature::{ArgMetadata, Signature};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub u32);

/// Parameter scope of the kernel itself.
pub const KERNEL_FUNC_ID: FuncId = FuncId(0);

/// Phase marker: used sets are still growing.
#[derive(Debug, Default)]
pub struct Collecting;

/// Phase marker: used sets are frozen.
#[derive(Debug, Default)]
pub struct Enforced {
    dotted: FxHashMap<FuncId, FxHashSet<DottedPath>>,
}

/// One argument leaf at a call site, as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallLeaf {
    /// Caller-side name: a plain parameter, a flattened leaf, or a literal marker.
    pub name: String,
    /// Field path from the passed value down to this leaf.
    pub suffix: SmallVec<[String; 2]>,
}

impl CallLeaf {
    pub const LITERAL: &'static str = "<literal>";

    pub fn literal() -> Self {
        Self { name: Self::LITERAL.to_string(), suffix: SmallVec::new() }
    }
}

/// Caller leaf bound to the callee parameter it lands in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgBinding {
    pub caller_name: String,
    pub callee_name: String,
}

/// Bindings of one call site, in the callee's expanded parameter order.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub bindings: Vec<ArgBinding>,
    /// Expanded parameters skipped because the receiver was implicit.
    pub offset: usize,
}

#[derive(Debug, Default)]
pub struct Pruning<S> {
    used_parameters_by_func_id: FxHashMap<FuncId, FxHashSet<String>>,
    child_name_by_caller_name_by_func_id: FxHashMap<FuncId, FxHashMap<String, String>>,
    state: S,
}

impl Pruning<Collecting> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_used(&mut self, func_id: FuncId, leaf: impl Into<String>) {
        self.used_parameters_by_func_id.entry(func_id).or_default().insert(leaf.into());
    }

    /// Propagate a finished callee's needs into its caller.
    ///
    /// A flattened caller leaf becomes used when the callee parameter it binds
    /// to is used, or is a plain parameter (plain parameters are always passed).
    pub fn record_after_call(&mut self, caller: FuncId, callee: FuncId, bindings: &[ArgBinding]) {
        for binding in bindings {
            if !is_flat(&binding.caller_name) {
                continue;
            }
            let callee_flat = is_flat(&binding.callee_name);
            if !callee_flat || self.is_used(callee, &binding.callee_name) {
                self.mark_used(caller, binding.caller_name.clone());
            }
            if callee_flat {
                self.child_name_by_caller_name_by_func_id
                    .entry(callee)
                    .or_default()
                    .insert(binding.caller_name.clone(), binding.callee_name.clone());
            }
        }
    }

    /// Freeze the used sets and build the dotted view.
    pub fn enforce(self) -> Pruning<Enforced> {
        let dotted = self
            .used_parameters_by_func_id
            .iter()
            .map(|(func_id, used)| {
                let mut paths = FxHashSet::default();
                for name in used.iter().filter(|n| is_flat(n)) {
                    let path = dotted(name);
                    // Every enclosing struct is reachable too, so binders can walk down to the leaf.
                    for len in 1..=path.len() {
                        paths.insert(path[..len].iter().cloned().collect::<DottedPath>());
                    }
                }
                (*func_id, paths)
            })
            .collect();

        Pruning {
            used_parameters_by_func_id: self.used_parameters_by_func_id,
            child_name_by_caller_name_by_func_id: self.child_name_by_caller_name_by_func_id,
            state: Enforced { dotted },
        }
    }
}

impl<S> Pruning<S> {
    pub fn is_used(&self, func_id: FuncId, leaf: &str) -> bool {
        self.used_parameters_by_func_id.get(&func_id).is_some_and(|used| used.contains(leaf))
    }

    pub fn used_parameters(&self, func_id: FuncId) -> Option<&FxHashSet<String>> {
        self.used_parameters_by_func_id.get(&func_id)
    }

    /// Callee-side name a caller leaf was last bound to.
    pub fn child_name(&self, callee: FuncId, caller_name: &str) -> Option<&str> {
        self.child_name_by_caller_name_by_func_id.get(&callee)?.get(caller_name).map(String::as_str)
    }

    /// Expanded parameters that survive pruning: plain ones and used leaves.
    pub fn pruned_params<'p>(&self, func_id: FuncId, expanded: &'p [ArgMetadata]) -> Vec<&'p ArgMetadata> {
        expanded.iter().filter(|p| !is_flat(&p.name) || self.is_used(func_id, &p.name)).collect()
    }
}

impl Pruning<Enforced> {
    /// Used leaves of `func_id` as path tuples, including every enclosing struct.
    pub fn dotted(&self, func_id: FuncId) -> Option<&FxHashSet<DottedPath>> {
        self.state.dotted.get(&func_id)
    }

    /// Caller-side names to forward to `callee`.
    ///
    /// Anything bound to a plain parameter passes. An argument bound to a
    /// flattened leaf (a caller leaf or a literal struct) passes only if the
    /// callee uses that leaf.
    pub fn filter_call_args(&self, callee: FuncId, bindings: &[ArgBinding]) -> Vec<String> {
        bindings
            .iter()
            .filter(|b| !is_flat(&b.callee_name) || self.is_used(callee, &b.callee_name))
            .map(|b| b.caller_name.clone())
            .collect()
    }
}

/// Bind caller leaves to the callee's expanded parameters.
///
/// Positional leaves match by position. When the callee is a method and the
/// call supplies exactly one argument fewer than it declares, the receiver is
/// implicit and matching starts at the second parameter. Keyword leaves match
/// by name. Remaining parameters take their default.
pub fn resolve_call_site(
    callee: &Signature,
    positional: &[Vec<CallLeaf>],
    keyword: &[(String, Vec<CallLeaf>)],
) -> Result<CallSite> {
    let params = callee.params();
    let expanded = callee.expanded();
    let offset = usize::from(callee.has_receiver() && positional.len() + keyword.len() + 1 == params.len());

    ensure!(
        positional.len() + offset <= params.len(),
        ArgumentCountSnafu { func: callee.name(), expected: params.len(), provided: positional.len() }
    );

    let mut slots: Vec<Option<String>> = vec![None; expanded.len()];
    let mut bind = |param: &ArgMetadata, leaves: &[CallLeaf]| -> Result<()> {
        if let TypeAnnotation::Record(ty) = &param.annotation
            && let [leaf] = leaves
            && leaf.suffix.is_empty()
        {
            // A literal struct fills every leaf of the parameter.
            ensure!(
                leaf.name == CallLeaf::LITERAL,
                StructTypeMismatchSnafu { arg: &param.name, expected: &ty.name, provided: &leaf.name }
            );
            for (slot, p) in slots.iter_mut().zip(expanded.iter()) {
                if is_flat(&p.name) && dotted(&p.name).first() == Some(&param.name) {
                    *slot = Some(leaf.name.clone());
                }
            }
            return Ok(());
        }

        for leaf in leaves {
            let callee_name = join(&param.name, &leaf.suffix);
            match expanded.iter().position(|p| p.name == callee_name) {
                Some(index) => slots[index] = Some(leaf.name.clone()),
                None => return UnexpectedArgumentSnafu { func: callee.name(), name: callee_name }.fail(),
            }
        }
        Ok(())
    };

    for (param, leaves) in params[offset..].iter().zip(positional) {
        bind(param, leaves)?;
    }
    for (name, leaves) in keyword {
        let param = callee.param(name).context(UnexpectedArgumentSnafu { func: callee.name(), name })?;
        bind(param, leaves)?;
    }

    let mut bindings = Vec::with_capacity(expanded.len());
    for (param, slot) in expanded.iter().zip(slots).skip(offset) {
        let caller_name = match slot {
            Some(name) => name,
            None if param.default.is_some() => CallLeaf::LITERAL.to_string(),
            None => return MissingArgumentSnafu { func: callee.name(), name: &param.name }.fail(),
        };
        bindings.push(ArgBinding { caller_name, callee_name: param.name.clone() });
    }

    Ok(CallSite { bindings, offset })
}
