//! Instantiation mapping.
//!
//! Maps a call's [`FeatureTuple`] to a dense [`InstantiationId`]. Ids are
//! assigned in order of first sight and the mapping is never evicted, so an id
//! stays valid for the lifetime of the owning callable. In front of the
//! mapping sits a bounded fast path keyed on argument identity that skips
//! feature extraction for calls repeating the exact same objects.

use std::sync::Arc;

use kiln_device::IdentityToken;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use snafu::ensure;

use crate::annotation::TypeAnnotation;
use crate::cache::BoundedCache;
use crate::error::{ArgumentCountSnafu, Result};
use crate::feature::{ExtractOptions, FeatureTuple, extract_arg};
use crate::signature::ArgMetadata;
use crate::value::{NodeRef, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstantiationId(usize);

impl InstantiationId {
    pub const fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for InstantiationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of one argument: its value for plain data, its object token otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArgIdentity {
    /// Runtime scalar slot; the value never affects instantiation.
    Slot,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(u64),
    Node(NodeRef),
    Token(IdentityToken),
    Seq(Box<[ArgIdentity]>),
}

impl ArgIdentity {
    pub fn of(value: &Value, annotation: &TypeAnnotation) -> Self {
        if matches!(annotation, TypeAnnotation::Primitive(_) | TypeAnnotation::Matrix(_) | TypeAnnotation::Unannotated) {
            return Self::Slot;
        }
        Self::of_value(value)
    }

    fn of_value(value: &Value) -> Self {
        match value {
            Value::Bool(v) => Self::Bool(*v),
            Value::Int(v) => Self::Int(*v),
            Value::UInt(v) => Self::UInt(*v),
            Value::Float(v) => Self::Float(v.to_bits()),
            Value::Node(n) => Self::Node(*n),
            Value::Tuple(items) => Self::Seq(items.iter().map(Self::of_value).collect()),
            Value::Matrix(m) => Self::Seq(m.entries.iter().map(Self::of_value).collect()),
            Value::Composite(c) => Self::Token(c.token()),
            Value::Ndarray(a) => Self::Token(a.token()),
            Value::External(a) => Self::Token(a.token()),
            Value::Record(r) => Self::Token(r.token()),
            Value::Texture(t) => Self::Token(t.token()),
            Value::SparseBuilder(b) => Self::Token(b.token()),
        }
    }
}

/// Identities of every argument of one call.
pub type IdentityKey = SmallVec<[ArgIdentity; 4]>;

pub fn identity_key(params: &[ArgMetadata], args: &[Value]) -> IdentityKey {
    params.iter().zip(args).map(|(p, v)| ArgIdentity::of(v, &p.annotation)).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapperStats {
    pub fast_path_hits: usize,
    pub hits: usize,
    pub misses: usize,
}

#[derive(Debug)]
pub struct InstantiationMapper {
    func: String,
    arguments: Arc<[ArgMetadata]>,
    mapping: FxHashMap<FeatureTuple, InstantiationId>,
    fast_path: BoundedCache<IdentityKey, (InstantiationId, FeatureTuple)>,
    stats: MapperStats,
}

impl InstantiationMapper {
    pub fn new(func: impl Into<String>, arguments: Arc<[ArgMetadata]>, fast_path_capacity: usize) -> Self {
        Self {
            func: func.into(),
            arguments,
            mapping: FxHashMap::default(),
            fast_path: BoundedCache::new(fast_path_capacity),
            stats: MapperStats::default(),
        }
    }

    /// Features of every declared argument, without touching the mapping.
    pub fn extract(&self, options: ExtractOptions, args: &[Value]) -> Result<FeatureTuple> {
        self.check_arity(args)?;
        self.arguments.iter().zip(args).map(|(meta, arg)| extract_arg(options, arg, &meta.annotation, &meta.name)).collect()
    }

    #[tracing::instrument(level = "trace", skip_all, fields(func = %self.func))]
    pub fn lookup(&mut self, options: ExtractOptions, args: &[Value]) -> Result<(InstantiationId, FeatureTuple)> {
        self.check_arity(args)?;

        // Gradient buffers can appear without the owning object changing identity.
        let fast_key = (!args.iter().any(Value::requests_grad)).then(|| identity_key(&self.arguments, args));
        if let Some(key) = &fast_key
            && let Some((id, features)) = self.fast_path.get(key)
        {
            self.stats.fast_path_hits += 1;
            return Ok((*id, features.clone()));
        }

        let features = self.extract(options, args)?;
        let id = match self.mapping.get(&features) {
            Some(id) => {
                self.stats.hits += 1;
                *id
            }
            None => {
                let id = InstantiationId(self.mapping.len());
                self.mapping.insert(features.clone(), id);
                self.stats.misses += 1;
                tracing::debug!(func = %self.func, instantiation = %id, features = ?features, "new instantiation");
                id
            }
        };

        if let Some(key) = fast_key {
            self.fast_path.insert(key, (id, features.clone()));
        }
        Ok((id, features))
    }

    /// Number of distinct instantiations seen.
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    pub fn get(&self, features: &FeatureTuple) -> Option<InstantiationId> {
        self.mapping.get(features).copied()
    }

    pub fn stats(&self) -> MapperStats {
        self.stats
    }

    pub fn fast_path_len(&self) -> usize {
        self.fast_path.len()
    }

    fn check_arity(&self, args: &[Value]) -> Result<()> {
        let expected = self.arguments.len();
        ensure!(args.len() == expected, ArgumentCountSnafu { func: &self.func, expected, provided: args.len() });
        Ok(())
    }
}
