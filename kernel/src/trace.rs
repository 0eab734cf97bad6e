//! Tracing kernel bodies.
//!
//! A body is an ordinary closure that reports what it does to a [`Tracer`]:
//! which parameters (or struct fields) it reads and which funcs it calls with
//! which arguments. The front door runs every body twice per instantiation,
//! first collecting used leaves and then emitting pruned calls.

use std::sync::Arc;

use smallvec::SmallVec;
use snafu::{OptionExt, ensure};

use crate::annotation::TypeAnnotation;
use crate::error::{InternalConsistencySnafu, RecursiveCallSnafu, Result, UnknownFieldSnafu, UnknownNameSnafu};
use crate::flat::{FLAT_SEPARATOR, flat_name, is_flat};
use crate::func::{Func, TraceFn};
use crate::pruning::{CallLeaf, Collecting, Enforced, FuncId, Pruning, resolve_call_site};
use crate::signature::Signature;
use crate::value::Value;

/// Argument expression at a call site.
#[derive(Debug, Clone)]
pub enum CallArg {
    /// A parameter of the calling scope, optionally followed by struct fields (`s.inner`).
    Path(String),
    /// A value computed inside the body.
    Literal(Value),
}

impl CallArg {
    pub fn lit(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }
}

impl From<&str> for CallArg {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

impl From<String> for CallArg {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

/// One pruned call emitted while enforcing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracedCall {
    pub caller: FuncId,
    pub callee: FuncId,
    pub callee_name: String,
    /// Caller-side names forwarded to the callee.
    pub args: Vec<String>,
    /// Callee parameters receiving them, in the same order.
    pub params: Vec<String>,
}

pub(crate) enum Phase {
    Collecting(Pruning<Collecting>),
    Enforcing(Arc<Pruning<Enforced>>),
}

pub(crate) struct TraceSession {
    phase: Phase,
    calls: Vec<TracedCall>,
    stack: Vec<FuncId>,
}

impl TraceSession {
    pub(crate) fn collecting() -> Self {
        Self { phase: Phase::Collecting(Pruning::new()), calls: Vec::new(), stack: Vec::new() }
    }

    pub(crate) fn enforcing(pruning: Arc<Pruning<Enforced>>) -> Self {
        Self { phase: Phase::Enforcing(pruning), calls: Vec::new(), stack: Vec::new() }
    }

    /// Collected used sets; `None` if this session was enforcing.
    pub(crate) fn into_collected(self) -> Option<Pruning<Collecting>> {
        match self.phase {
            Phase::Collecting(pruning) => Some(pruning),
            Phase::Enforcing(_) => None,
        }
    }

    pub(crate) fn into_calls(self) -> Vec<TracedCall> {
        self.calls
    }

    /// Trace `body` as the scope `func_id`.
    pub(crate) fn run(
        &mut self,
        func_id: FuncId,
        signature: &Signature,
        values: Option<&[Value]>,
        body: &TraceFn,
    ) -> Result<()> {
        self.stack.push(func_id);
        let result = body(&mut Tracer { session: self, func_id, signature, values });
        self.stack.pop();
        result
    }
}

pub struct Tracer<'a> {
    session: &'a mut TraceSession,
    func_id: FuncId,
    signature: &'a Signature,
    /// Call arguments; only the kernel scope has them.
    values: Option<&'a [Value]>,
}

impl Tracer<'_> {
    pub fn func_id(&self) -> FuncId {
        self.func_id
    }

    pub fn func_name(&self) -> &str {
        self.signature.name()
    }

    pub fn is_collecting(&self) -> bool {
        matches!(self.session.phase, Phase::Collecting(_))
    }

    /// Value of a kernel template parameter, for bodies that specialize on it.
    pub fn template(&self, name: &str) -> Option<&Value> {
        let index = self.signature.params().iter().position(|p| p.name == name && p.annotation.is_template())?;
        self.values?.get(index)
    }

    /// Record a read of a parameter or a struct field path like `s.a.b`.
    pub fn read(&mut self, path: &str) -> Result<()> {
        for leaf in self.leaves(path)?.into_iter().filter(|l| is_flat(&l.name)) {
            match &mut self.session.phase {
                Phase::Collecting(pruning) => pruning.mark_used(self.func_id, leaf.name),
                Phase::Enforcing(pruning) => ensure!(
                    pruning.is_used(self.func_id, &leaf.name),
                    InternalConsistencySnafu {
                        func_id: self.func_id,
                        reason: format!("'{}' was read while enforcing but not while collecting", leaf.name),
                    }
                ),
            }
        }
        Ok(())
    }

    /// Record a call to `callee` and trace its body.
    pub fn call(&mut self, callee: &Func, args: &[CallArg], kwargs: &[(&str, CallArg)]) -> Result<()> {
        ensure!(!self.session.stack.contains(&callee.id()), RecursiveCallSnafu { func: callee.name() });

        let positional = args.iter().map(|a| self.expand(a)).collect::<Result<Vec<_>>>()?;
        let keyword = kwargs
            .iter()
            .map(|(name, a)| Ok((name.to_string(), self.expand(a)?)))
            .collect::<Result<Vec<_>>>()?;
        let site = resolve_call_site(callee.signature(), &positional, &keyword)?;

        let enforced = match &self.session.phase {
            Phase::Enforcing(pruning) => Some(Arc::clone(pruning)),
            Phase::Collecting(_) => None,
        };

        let Some(pruning) = enforced else {
            self.session.run(callee.id(), callee.signature(), None, callee.body())?;
            if let Phase::Collecting(pruning) = &mut self.session.phase {
                pruning.record_after_call(self.func_id, callee.id(), &site.bindings);
            }
            return Ok(());
        };

        let args = pruning.filter_call_args(callee.id(), &site.bindings);
        let params: Vec<String> = pruning
            .pruned_params(callee.id(), &callee.signature().expanded()[site.offset..])
            .into_iter()
            .map(|p| p.name.clone())
            .collect();
        ensure!(
            args.len() == params.len(),
            InternalConsistencySnafu {
                func_id: callee.id(),
                reason: format!("forwarding {} arguments to {} pruned parameters", args.len(), params.len()),
            }
        );
        tracing::trace!(caller = ?self.func_id, callee = callee.name(), ?args, "pruned call");
        self.session.calls.push(TracedCall {
            caller: self.func_id,
            callee: callee.id(),
            callee_name: callee.name().to_string(),
            args,
            params,
        });
        self.session.run(callee.id(), callee.signature(), None, callee.body())?;
        Ok(())
    }

    fn expand(&self, arg: &CallArg) -> Result<Vec<CallLeaf>> {
        match arg {
            CallArg::Path(path) => self.leaves(path),
            CallArg::Literal(_) => Ok(vec![CallLeaf::literal()]),
        }
    }

    /// Leaves under `path`, with their field suffix relative to `path`.
    fn leaves(&self, path: &str) -> Result<Vec<CallLeaf>> {
        let mut components = path.split(FLAT_SEPARATOR);
        let root = components.next().unwrap_or_default();
        let param = self.signature.param(root).context(UnknownNameSnafu { func: self.func_name(), name: root })?;

        let mut name = root.to_string();
        let mut annotation = &param.annotation;
        for field in components {
            annotation = annotation
                .as_record()
                .and_then(|r| r.field(field))
                .context(UnknownFieldSnafu { func: self.func_name(), path })?;
            name = flat_name(&name, field);
        }

        let mut leaves = Vec::new();
        collect_leaves(name, annotation, &mut SmallVec::new(), &mut leaves);
        Ok(leaves)
    }
}

fn collect_leaves(
    name: String,
    annotation: &TypeAnnotation,
    suffix: &mut SmallVec<[String; 2]>,
    out: &mut Vec<CallLeaf>,
) {
    match annotation {
        TypeAnnotation::Record(record) => {
            for (field, field_ty) in &record.fields {
                suffix.push(field.clone());
                collect_leaves(flat_name(&name, field), field_ty, suffix, out);
                suffix.pop();
            }
        }
        _ => out.push(CallLeaf { name, suffix: suffix.clone() }),
    }
}
