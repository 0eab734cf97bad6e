//! Declared parameter types.

use std::fmt;
use std::sync::Arc;

use bon::bon;
use kiln_device::{Ndarray, TexFormat};
use kiln_dtype::{DType, ElementShape, ScalarDType};
use snafu::ensure;

use crate::error::{DTypeMismatchSnafu, InvalidArgumentSnafu, NdimMismatchSnafu, Result};

/// Out-of-bounds policy compiled into array accesses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BoundaryMode {
    #[default]
    Unsafe,
    Clamp,
}

/// Placement of an element sub-shape within a host tensor's dimensions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Layout {
    /// Element dims trail the array dims.
    #[default]
    Aos,
    /// Element dims lead the array dims.
    Soa,
}

/// Array parameter. Unset fields accept any value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NdarrayType {
    pub dtype: Option<DType>,
    pub ndim: Option<usize>,
    pub needs_grad: Option<bool>,
    pub boundary: BoundaryMode,
    pub layout: Layout,
}

#[bon]
impl NdarrayType {
    #[builder(finish_fn = build)]
    pub fn builder(
        #[builder(into)] dtype: Option<DType>,
        ndim: Option<usize>,
        needs_grad: Option<bool>,
        #[builder(default)] boundary: BoundaryMode,
        #[builder(default)] layout: Layout,
    ) -> Self {
        Self { dtype, ndim, needs_grad, boundary, layout }
    }
}

impl NdarrayType {
    pub fn element_shape(&self) -> ElementShape {
        self.dtype.map(|d| d.element_shape()).unwrap_or_default()
    }

    /// Validate an own array against this annotation.
    pub fn check_matched(&self, array: &Ndarray, arg: &str) -> Result<()> {
        if let Some(expected) = self.dtype {
            let actual = array.element_type();
            ensure!(
                expected == actual,
                DTypeMismatchSnafu { arg, expected: expected.to_string(), actual: actual.to_string() }
            );
        }
        if let Some(expected) = self.ndim {
            ensure!(expected == array.ndim(), NdimMismatchSnafu { arg, expected, actual: array.ndim() });
        }
        if self.needs_grad == Some(true) {
            ensure!(
                array.has_grad(),
                InvalidArgumentSnafu { arg, reason: "annotation requires a gradient buffer but the array has none" }
            );
        }
        Ok(())
    }
}

/// Small vector (`m == None`) or matrix value passed by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatrixType {
    pub n: usize,
    pub m: Option<usize>,
    pub dtype: ScalarDType,
}

impl MatrixType {
    pub const fn vector(n: usize, dtype: ScalarDType) -> Self {
        Self { n, m: None, dtype }
    }

    pub const fn matrix(n: usize, m: usize, dtype: ScalarDType) -> Self {
        Self { n, m: Some(m), dtype }
    }

    pub fn shape(&self) -> ElementShape {
        match self.m {
            Some(m) => [self.n, m].into_iter().collect(),
            None => [self.n].into_iter().collect(),
        }
    }

    pub fn element_type(&self) -> DType {
        match self.m {
            Some(m) => DType::matrix(self.dtype, self.n, m),
            None => DType::vector(self.dtype, self.n),
        }
    }
}

/// Struct parameter type. Compared nominally: two records with the same fields are still distinct types.
#[derive(Debug, PartialEq, Eq)]
pub struct RecordType {
    pub name: String,
    pub fields: Vec<(String, TypeAnnotation)>,
    /// Frozen records are immutable and therefore safe to cache launch contexts for.
    pub frozen: bool,
}

impl RecordType {
    pub fn new(name: impl Into<String>, fields: Vec<(String, TypeAnnotation)>, frozen: bool) -> Arc<Self> {
        Arc::new(Self { name: name.into(), fields, frozen })
    }

    pub fn field(&self, name: &str) -> Option<&TypeAnnotation> {
        self.fields.iter().find_map(|(n, a)| (n == name).then_some(a))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureType {
    pub num_dims: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RwTextureType {
    pub num_dims: u8,
    pub format: TexFormat,
    pub lod: u8,
}

/// Declared type of one parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeAnnotation {
    Primitive(ScalarDType),
    Matrix(MatrixType),
    Ndarray(NdarrayType),
    Record(Arc<RecordType>),
    Texture(TextureType),
    RwTexture(RwTextureType),
    SparseMatrixBuilder,
    /// Specialized on at compile time; never occupies a launch slot.
    Template,
    /// Func parameters may be left unannotated.
    Unannotated,
}

impl TypeAnnotation {
    pub const fn is_template(&self) -> bool {
        matches!(self, Self::Template)
    }

    pub fn as_record(&self) -> Option<&Arc<RecordType>> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }
}

impl From<ScalarDType> for TypeAnnotation {
    fn from(dtype: ScalarDType) -> Self {
        Self::Primitive(dtype)
    }
}

impl From<NdarrayType> for TypeAnnotation {
    fn from(ty: NdarrayType) -> Self {
        Self::Ndarray(ty)
    }
}

impl From<MatrixType> for TypeAnnotation {
    fn from(ty: MatrixType) -> Self {
        Self::Matrix(ty)
    }
}

impl From<Arc<RecordType>> for TypeAnnotation {
    fn from(ty: Arc<RecordType>) -> Self {
        Self::Record(ty)
    }
}

impl fmt::Display for TypeAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(d) => write!(f, "{d}"),
            Self::Matrix(m) => write!(f, "{}", m.element_type()),
            Self::Ndarray(a) => {
                f.write_str("ndarray(")?;
                match a.dtype {
                    Some(d) => write!(f, "dtype={d}")?,
                    None => f.write_str("dtype=any")?,
                }
                match a.ndim {
                    Some(n) => write!(f, ", ndim={n})"),
                    None => f.write_str(", ndim=any)"),
                }
            }
            Self::Record(r) => f.write_str(&r.name),
            Self::Texture(t) => write!(f, "texture({}d)", t.num_dims),
            Self::RwTexture(t) => write!(f, "rw_texture({}d, {:?})", t.num_dims, t.format),
            Self::SparseMatrixBuilder => f.write_str("sparse_matrix_builder"),
            Self::Template => f.write_str("template"),
            Self::Unannotated => f.write_str("unannotated"),
        }
    }
}
