//! Runtime argument values.
//!
//! A closed set of argument kinds: every value a caller can pass to a kernel
//! or func is one of these variants, and each carries exactly what feature
//! extraction and binding need.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use kiln_device::{ExternalArray, Identity, IdentityToken, Ndarray, SparseMatrixBuilder, Texture};
use smallvec::SmallVec;

use crate::annotation::RecordType;

/// Address of a node in the compiled graph (expression or storage node).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Expr(u64),
    SNode(u64),
}

impl NodeRef {
    pub const fn address(&self) -> u64 {
        match self {
            Self::Expr(a) | Self::SNode(a) => *a,
        }
    }
}

/// Composite host object passed to template parameters by identity.
///
/// Clones share identity. Two composites built from equal payloads are
/// still distinct objects and specialize separately.
#[derive(Clone)]
pub struct Composite {
    inner: Arc<CompositeData>,
}

struct CompositeData {
    identity: Identity,
    type_name: String,
    payload: Box<dyn Any + Send + Sync>,
}

impl Composite {
    pub fn new(type_name: impl Into<String>, payload: impl Any + Send + Sync) -> Self {
        Self {
            inner: Arc::new(CompositeData { identity: Identity::new(), type_name: type_name.into(), payload: Box::new(payload) }),
        }
    }

    pub fn token(&self) -> IdentityToken {
        self.inner.identity.token()
    }

    pub fn type_name(&self) -> &str {
        &self.inner.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.payload.downcast_ref()
    }

    /// Declare that the object changed in a way that must re-specialize kernels.
    pub fn invalidate(&self) {
        self.inner.identity.bump();
    }
}

impl fmt::Debug for Composite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Composite").field("type", &self.inner.type_name).field("token", &self.token()).finish()
    }
}

/// Instance of a [`RecordType`].
#[derive(Debug)]
pub struct RecordValue {
    identity: Identity,
    ty: Arc<RecordType>,
    fields: Vec<Value>,
}

impl RecordValue {
    /// Fields are given in declaration order.
    pub fn new(ty: &Arc<RecordType>, fields: Vec<Value>) -> Arc<Self> {
        Arc::new(Self { identity: Identity::new(), ty: Arc::clone(ty), fields })
    }

    pub fn token(&self) -> IdentityToken {
        self.identity.token()
    }

    pub fn ty(&self) -> &Arc<RecordType> {
        &self.ty
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        let index = self.ty.fields.iter().position(|(n, _)| n == name)?;
        self.fields.get(index)
    }

    pub fn fields(&self) -> &[Value] {
        &self.fields
    }
}

/// Matrix or vector passed by value; entries are row-major.
#[derive(Debug, Clone)]
pub struct MatrixValue {
    pub shape: SmallVec<[usize; 2]>,
    pub entries: Vec<Value>,
}

impl MatrixValue {
    pub fn vector(entries: Vec<Value>) -> Self {
        Self { shape: [entries.len()].into_iter().collect(), entries }
    }

    pub fn matrix(rows: usize, cols: usize, entries: Vec<Value>) -> Self {
        Self { shape: [rows, cols].into_iter().collect(), entries }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Tuple(Arc<[Value]>),
    Node(NodeRef),
    Composite(Composite),
    Ndarray(Ndarray),
    External(ExternalArray),
    Record(Arc<RecordValue>),
    Matrix(MatrixValue),
    Texture(Texture),
    SparseBuilder(SparseMatrixBuilder),
}

impl Value {
    /// Type name used in diagnostics.
    pub fn kind_name(&self) -> String {
        match self {
            Self::Bool(_) => "bool".into(),
            Self::Int(_) => "int".into(),
            Self::UInt(_) => "uint".into(),
            Self::Float(_) => "float".into(),
            Self::Tuple(_) => "tuple".into(),
            Self::Node(NodeRef::Expr(_)) => "expr".into(),
            Self::Node(NodeRef::SNode(_)) => "snode".into(),
            Self::Composite(c) => c.type_name().to_string(),
            Self::Ndarray(a) => format!("ndarray({}, ndim={})", a.element_type(), a.ndim()),
            Self::External(a) => format!("external array({}, shape={:?})", a.dtype(), a.shape()),
            Self::Record(r) => r.ty().name.clone(),
            Self::Matrix(m) => format!("matrix{:?}", m.shape.as_slice()),
            Self::Texture(_) => "texture".into(),
            Self::SparseBuilder(_) => "sparse_matrix_builder".into(),
        }
    }

    /// Whether any part of this value carries or requests a gradient buffer.
    pub fn requests_grad(&self) -> bool {
        match self {
            Self::Ndarray(a) => a.has_grad(),
            Self::External(a) => a.requires_grad(),
            Self::Tuple(items) => items.iter().any(Value::requests_grad),
            Self::Record(r) => r.fields().iter().any(Value::requests_grad),
            _ => false,
        }
    }
}

macro_rules! impl_from_value {
    ($($ty:ty => |$v:ident| $body:expr),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from($v: $ty) -> Self {
                $body
            }
        })*
    };
}

impl_from_value! {
    bool => |v| Value::Bool(v),
    i32 => |v| Value::Int(v as i64),
    i64 => |v| Value::Int(v),
    u32 => |v| Value::UInt(v as u64),
    u64 => |v| Value::UInt(v),
    f32 => |v| Value::Float(v as f64),
    f64 => |v| Value::Float(v),
    Ndarray => |v| Value::Ndarray(v),
    ExternalArray => |v| Value::External(v),
    Composite => |v| Value::Composite(v),
    Arc<RecordValue> => |v| Value::Record(v),
    MatrixValue => |v| Value::Matrix(v),
    Texture => |v| Value::Texture(v),
    SparseMatrixBuilder => |v| Value::SparseBuilder(v),
    NodeRef => |v| Value::Node(v),
    Vec<Value> => |v| Value::Tuple(v.into()),
}
