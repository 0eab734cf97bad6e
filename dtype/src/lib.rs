//! Element types for kernel arguments.
//!
//! A [`DType`] describes one element of an array or one scalar kernel
//! parameter. Arrays whose elements are themselves small vectors or matrices
//! carry that sub-shape in the dtype rather than in the array shape, so the
//! compiled kernel can specialize on it while the launch shape stays rank-only.

pub mod ext;


use smallvec::{SmallVec, smallvec};

pub use ext::HasDType;

/// Trailing element sub-shape of a vector or matrix dtype.
pub type ElementShape = SmallVec<[usize; 2]>;

/// Scalar data types (base numeric types).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::EnumCount, strum::EnumIter, strum::VariantArray, strum::FromRepr)]
#[cfg_attr(feature = "proptest", derive(proptest_derive::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ScalarDType {
    Bool = 0,

    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    UInt8 = 5,
    UInt16 = 6,
    UInt32 = 7,
    UInt64 = 8,

    Float16 = 9,
    Float32 = 10,
    Float64 = 11,
}

/// Element type: a scalar, a fixed-length vector, or a fixed-size matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DType {
    /// Scalar type (single value).
    Scalar(ScalarDType),

    /// Vector element with `count` lanes.
    Vector { scalar: ScalarDType, count: usize },

    /// Row-major matrix element.
    Matrix { scalar: ScalarDType, rows: usize, cols: usize },
}

impl ScalarDType {
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 | Self::Float16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_int(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float16 | Self::Float32 | Self::Float64)
    }

    /// Short name used in diagnostics (`i32`, `f64`, ...).
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Bool => "u1",
            Self::Int8 => "i8",
            Self::Int16 => "i16",
            Self::Int32 => "i32",
            Self::Int64 => "i64",
            Self::UInt8 => "u8",
            Self::UInt16 => "u16",
            Self::UInt32 => "u32",
            Self::UInt64 => "u64",
            Self::Float16 => "f16",
            Self::Float32 => "f32",
            Self::Float64 => "f64",
        }
    }
}

impl std::fmt::Display for ScalarDType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl From<ScalarDType> for DType {
    fn from(scalar: ScalarDType) -> Self {
        Self::Scalar(scalar)
    }
}

impl DType {
    // =========================================================================
    // Type Constructors
    // =========================================================================

    /// Vector element type. A single lane collapses to the scalar.
    pub const fn vector(scalar: ScalarDType, count: usize) -> Self {
        if count == 1 { Self::Scalar(scalar) } else { Self::Vector { scalar, count } }
    }

    pub const fn matrix(scalar: ScalarDType, rows: usize, cols: usize) -> Self {
        Self::Matrix { scalar, rows, cols }
    }

    /// Rebuild an element type from its base scalar and trailing sub-shape.
    ///
    /// Returns `None` for sub-shapes with more than two dimensions, which no
    /// element type can describe.
    pub fn from_element_shape(scalar: ScalarDType, shape: &[usize]) -> Option<Self> {
        match *shape {
            [] => Some(Self::Scalar(scalar)),
            [count] => Some(Self::Vector { scalar, count }),
            [rows, cols] => Some(Self::Matrix { scalar, rows, cols }),
            _ => None,
        }
    }

    pub fn scalar(&self) -> Option<ScalarDType> {
        match self {
            Self::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    /// Base scalar type of any element.
    pub const fn base(&self) -> ScalarDType {
        match self {
            Self::Scalar(s) => *s,
            Self::Vector { scalar, .. } | Self::Matrix { scalar, .. } => *scalar,
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Self::Vector { .. })
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, Self::Matrix { .. })
    }

    // =========================================================================
    // Type Properties
    // =========================================================================

    /// Sub-shape contributed by one element (empty for scalars).
    pub fn element_shape(&self) -> ElementShape {
        match self {
            Self::Scalar(_) => ElementShape::new(),
            Self::Vector { count, .. } => smallvec![*count],
            Self::Matrix { rows, cols, .. } => smallvec![*rows, *cols],
        }
    }

    pub const fn element_ndim(&self) -> usize {
        match self {
            Self::Scalar(_) => 0,
            Self::Vector { .. } => 1,
            Self::Matrix { .. } => 2,
        }
    }

    /// Number of scalar lanes in one element.
    pub const fn lanes(&self) -> usize {
        match self {
            Self::Scalar(_) => 1,
            Self::Vector { count, .. } => *count,
            Self::Matrix { rows, cols, .. } => *rows * *cols,
        }
    }

    pub const fn bytes(&self) -> usize {
        self.base().bytes() * self.lanes()
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.scalar(), Some(ScalarDType::Bool))
    }

    pub fn is_signed(&self) -> bool {
        self.base().is_signed()
    }

    pub fn is_unsigned(&self) -> bool {
        self.base().is_unsigned()
    }

    pub fn is_int(&self) -> bool {
        self.base().is_int()
    }

    pub fn is_float(&self) -> bool {
        self.base().is_float()
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar(s) => write!(f, "{s}"),
            Self::Vector { scalar, count } => write!(f, "vector({count}, {scalar})"),
            Self::Matrix { scalar, rows, cols } => write!(f, "matrix({rows}, {cols}, {scalar})"),
        }
    }
}

#[allow(non_upper_case_globals)]
impl DType {
    pub const Bool: Self = Self::Scalar(ScalarDType::Bool);
    pub const Int8: Self = Self::Scalar(ScalarDType::Int8);
    pub const Int16: Self = Self::Scalar(ScalarDType::Int16);
    pub const Int32: Self = Self::Scalar(ScalarDType::Int32);
    pub const Int64: Self = Self::Scalar(ScalarDType::Int64);
    pub const UInt8: Self = Self::Scalar(ScalarDType::UInt8);
    pub const UInt16: Self = Self::Scalar(ScalarDType::UInt16);
    pub const UInt32: Self = Self::Scalar(ScalarDType::UInt32);
    pub const UInt64: Self = Self::Scalar(ScalarDType::UInt64);
    pub const Float16: Self = Self::Scalar(ScalarDType::Float16);
    pub const Float32: Self = Self::Scalar(ScalarDType::Float32);
    pub const Float64: Self = Self::Scalar(ScalarDType::Float64);
}
