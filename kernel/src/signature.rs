//! Declared parameter lists.
//!
//! A [`Signature`] is validated once when a kernel or func is defined and is
//! immutable afterwards. Besides the declared parameters it keeps the
//! *expanded* list, where every struct parameter is replaced by its flattened
//! leaves; tracing and pruning work on the expanded list.

use std::sync::Arc;

use snafu::ensure;

use crate::annotation::TypeAnnotation;
use crate::error::{
    ArgumentCountSnafu, InvalidAnnotationSnafu, KernelDefaultSnafu, MissingAnnotationSnafu, MissingArgumentSnafu,
    MultipleValuesSnafu, Result, UnexpectedArgumentSnafu, UnsupportedParameterSnafu,
};
use crate::flat::flat_name;
use crate::value::Value;

/// How a parameter may be supplied at a call site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ParamKind {
    #[default]
    PositionalOrKeyword,
    PositionalOnly,
    KeywordOnly,
    VarPositional,
    VarKeyword,
}

impl ParamKind {
    const fn describe(&self) -> &'static str {
        match self {
            Self::PositionalOrKeyword => "positional-or-keyword",
            Self::PositionalOnly => "positional-only",
            Self::KeywordOnly => "keyword-only",
            Self::VarPositional => "variadic positional",
            Self::VarKeyword => "variadic keyword",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallableKind {
    Kernel,
    Func,
}

/// One declared parameter.
#[derive(Debug, Clone)]
pub struct ArgMetadata {
    pub annotation: TypeAnnotation,
    pub name: String,
    pub default: Option<Value>,
    pub kind: ParamKind,
}

impl ArgMetadata {
    pub fn new(name: impl Into<String>, annotation: impl Into<TypeAnnotation>) -> Self {
        Self { annotation: annotation.into(), name: name.into(), default: None, kind: ParamKind::default() }
    }

    pub fn template(name: impl Into<String>) -> Self {
        Self::new(name, TypeAnnotation::Template)
    }

    pub fn unannotated(name: impl Into<String>) -> Self {
        Self::new(name, TypeAnnotation::Unannotated)
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_kind(mut self, kind: ParamKind) -> Self {
        self.kind = kind;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Signature {
    name: String,
    kind: CallableKind,
    params: Arc<[ArgMetadata]>,
    expanded: Arc<[ArgMetadata]>,
    has_receiver: bool,
}

impl Signature {
    /// Validate a parameter list.
    ///
    /// With `has_receiver`, an unannotated first parameter is the receiver of a
    /// method and becomes a template parameter.
    pub fn new(name: impl Into<String>, kind: CallableKind, params: Vec<ArgMetadata>, has_receiver: bool) -> Result<Self> {
        let name = name.into();
        let mut params = params;

        for (index, param) in params.iter_mut().enumerate() {
            if matches!(param.kind, ParamKind::VarPositional | ParamKind::VarKeyword | ParamKind::KeywordOnly) {
                return UnsupportedParameterSnafu { func: &name, name: &param.name, kind: param.kind.describe() }.fail();
            }
            if kind == CallableKind::Kernel {
                ensure!(param.default.is_none(), KernelDefaultSnafu { func: &name, name: &param.name });
                ensure!(
                    param.kind == ParamKind::PositionalOrKeyword,
                    UnsupportedParameterSnafu { func: &name, name: &param.name, kind: param.kind.describe() }
                );
            }
            let unannotated = matches!(param.annotation, TypeAnnotation::Unannotated);
            if unannotated && has_receiver && index == 0 {
                param.annotation = TypeAnnotation::Template;
            } else if unannotated && kind == CallableKind::Kernel {
                return MissingAnnotationSnafu { func: &name, index, name: &param.name }.fail();
            } else if kind == CallableKind::Func && matches!(param.annotation, TypeAnnotation::SparseMatrixBuilder) {
                return InvalidAnnotationSnafu {
                    func: &name,
                    index,
                    name: &param.name,
                    reason: "sparse matrix builders can only be kernel arguments",
                }
                .fail();
            }
        }

        let mut seen = rustc_hash::FxHashSet::default();
        for (index, param) in params.iter().enumerate() {
            ensure!(
                seen.insert(param.name.as_str()),
                InvalidAnnotationSnafu { func: &name, index, name: &param.name, reason: "duplicate parameter name" }
            );
        }

        let expanded = expand_params(&params).into();
        Ok(Self { name, kind, params: params.into(), expanded, has_receiver })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CallableKind {
        self.kind
    }

    pub fn params(&self) -> &Arc<[ArgMetadata]> {
        &self.params
    }

    /// Parameters with struct parameters replaced by their flattened leaves.
    pub fn expanded(&self) -> &Arc<[ArgMetadata]> {
        &self.expanded
    }

    pub fn has_receiver(&self) -> bool {
        self.has_receiver
    }

    pub fn param(&self, name: &str) -> Option<&ArgMetadata> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Fuse positional arguments, keyword arguments and defaults into one
    /// value per declared parameter.
    pub fn bind_call(&self, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Result<Vec<Value>> {
        let expected = self.params.len();
        ensure!(args.len() <= expected, ArgumentCountSnafu { func: &self.name, expected, provided: args.len() });

        let mut fused: Vec<Option<Value>> = args.into_iter().map(Some).collect();
        fused.resize(expected, None);

        for (key, value) in kwargs {
            let Some(index) = self.params.iter().position(|p| p.name == key && p.kind != ParamKind::PositionalOnly)
            else {
                return UnexpectedArgumentSnafu { func: &self.name, name: key }.fail();
            };
            ensure!(fused[index].is_none(), MultipleValuesSnafu { func: &self.name, name: key });
            fused[index] = Some(value);
        }

        fused
            .into_iter()
            .zip(self.params.iter())
            .map(|(value, param)| match value.or_else(|| param.default.clone()) {
                Some(value) => Ok(value),
                None => MissingArgumentSnafu { func: &self.name, name: &param.name }.fail(),
            })
            .collect()
    }
}

/// Replace every struct parameter by its leaves, depth first, in field order.
pub fn expand_params(params: &[ArgMetadata]) -> Vec<ArgMetadata> {
    let mut expanded = Vec::with_capacity(params.len());
    for param in params {
        expand_into(&param.name, &param.annotation, param, &mut expanded);
    }
    expanded
}

fn expand_into(name: &str, annotation: &TypeAnnotation, origin: &ArgMetadata, out: &mut Vec<ArgMetadata>) {
    match annotation {
        TypeAnnotation::Record(record) => {
            for (field, field_ty) in &record.fields {
                expand_into(&flat_name(name, field), field_ty, origin, out);
            }
        }
        _ => out.push(ArgMetadata {
            annotation: annotation.clone(),
            name: name.to_string(),
            default: if name == origin.name { origin.default.clone() } else { None },
            kind: origin.kind,
        }),
    }
}
