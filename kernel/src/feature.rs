//! Feature extraction.
//!
//! A [`Feature`] summarizes one argument: everything that must be identical
//! for two calls to share one compiled instantiation, and nothing else. Scalars
//! bound to runtime slots contribute the constant [`Feature::Unused`], so their
//! values never cause recompilation; template arguments contribute their value
//! or identity; arrays contribute element type, rank, gradient flag and
//! boundary mode but not their extent.

use std::sync::Arc;

use kiln_device::{IdentityToken, TexFormat};
use kiln_dtype::{DType, ScalarDType};
use snafu::ensure;

use crate::annotation::{BoundaryMode, Layout, NdarrayType, TypeAnnotation};
use crate::error::{
    DTypeMismatchSnafu, ElementShapeMismatchSnafu, EmptyRecordSnafu, InvalidArgumentSnafu, NdimMismatchSnafu, Result,
    StructTypeMismatchSnafu,
};
use crate::flat::flat_name;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Feature {
    Bool(bool),
    Int(i64),
    UInt(u64),
    /// Bit pattern, so `0.0` and `-0.0` specialize separately.
    Float(u64),
    Address(u64),
    Tuple(Box<[Feature]>),
    /// Composite object, matched by identity rather than contents.
    Identity(IdentityToken),
    Array {
        element: DType,
        ndim: usize,
        needs_grad: bool,
        boundary: BoundaryMode,
    },
    Record(Box<[Feature]>),
    Texture {
        num_dims: u8,
    },
    RwTexture {
        num_dims: u8,
        format: TexFormat,
        lod: u8,
    },
    DType(ScalarDType),
    /// Argument never affects instantiation.
    Unused,
}

/// Per-argument features of one call, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureTuple(Arc<[Feature]>);

impl FeatureTuple {
    pub fn features(&self) -> &[Feature] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Feature> for FeatureTuple {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    pub raise_on_templated_floats: bool,
    /// Validate own arrays against their annotation.
    pub check_matched: bool,
}

/// Feature of `arg` declared as `annotation`. `name` is used in diagnostics and
/// extended with field names when recursing into structs.
pub fn extract_arg(options: ExtractOptions, arg: &Value, annotation: &TypeAnnotation, name: &str) -> Result<Feature> {
    match annotation {
        TypeAnnotation::Template => extract_template(options, arg, name),
        TypeAnnotation::Primitive(_) | TypeAnnotation::Matrix(_) | TypeAnnotation::Unannotated => Ok(Feature::Unused),
        TypeAnnotation::Ndarray(ty) => extract_array(options, arg, ty, name),
        TypeAnnotation::Record(ty) => {
            ensure!(!ty.fields.is_empty(), EmptyRecordSnafu { arg: name, ty: ty.name.clone() });
            let Value::Record(record) = arg else {
                return StructTypeMismatchSnafu { arg: name, expected: ty.name.clone(), provided: arg.kind_name() }.fail();
            };
            let features = ty
                .fields
                .iter()
                .map(|(field, field_ty)| {
                    let field_name = flat_name(name, field);
                    match record.field(field) {
                        Some(value) => extract_arg(options, value, field_ty, &field_name),
                        None => StructTypeMismatchSnafu {
                            arg: field_name,
                            expected: ty.name.clone(),
                            provided: record.ty().name.clone(),
                        }
                        .fail(),
                    }
                })
                .collect::<Result<Box<[_]>>>()?;
            Ok(Feature::Record(features))
        }
        TypeAnnotation::Texture(ty) => {
            let Value::Texture(texture) = arg else {
                return InvalidArgumentSnafu { arg: name, reason: format!("expected a texture, got {}", arg.kind_name()) }
                    .fail();
            };
            ensure!(
                texture.num_dims() == ty.num_dims,
                InvalidArgumentSnafu {
                    arg: name,
                    reason: format!("expected a {}-dimensional texture, got {} dimensions", ty.num_dims, texture.num_dims())
                }
            );
            Ok(Feature::Texture { num_dims: ty.num_dims })
        }
        TypeAnnotation::RwTexture(ty) => {
            let Value::Texture(texture) = arg else {
                return InvalidArgumentSnafu { arg: name, reason: format!("expected a texture, got {}", arg.kind_name()) }
                    .fail();
            };
            ensure!(
                texture.num_dims() == ty.num_dims,
                InvalidArgumentSnafu {
                    arg: name,
                    reason: format!("expected a {}-dimensional texture, got {} dimensions", ty.num_dims, texture.num_dims())
                }
            );
            ensure!(
                texture.format() == ty.format,
                InvalidArgumentSnafu {
                    arg: name,
                    reason: format!("expected texture format {:?}, got {:?}", ty.format, texture.format())
                }
            );
            Ok(Feature::RwTexture { num_dims: ty.num_dims, format: ty.format, lod: ty.lod })
        }
        TypeAnnotation::SparseMatrixBuilder => match arg {
            Value::SparseBuilder(builder) => Ok(Feature::DType(builder.dtype())),
            _ => Ok(Feature::Unused),
        },
    }
}

fn extract_template(options: ExtractOptions, arg: &Value, name: &str) -> Result<Feature> {
    Ok(match arg {
        Value::Int(v) => Feature::Int(*v),
        Value::UInt(v) => Feature::UInt(*v),
        Value::Bool(v) => Feature::Bool(*v),
        Value::Float(v) => {
            ensure!(
                !options.raise_on_templated_floats,
                InvalidArgumentSnafu { arg: name, reason: "floats are not allowed as templated values" }
            );
            Feature::Float(v.to_bits())
        }
        Value::Node(node) => Feature::Address(node.address()),
        Value::Tuple(items) => {
            Feature::Tuple(items.iter().map(|item| extract_template(options, item, name)).collect::<Result<_>>()?)
        }
        Value::Matrix(m) => {
            Feature::Tuple(m.entries.iter().map(|item| extract_template(options, item, name)).collect::<Result<_>>()?)
        }
        Value::Composite(c) => Feature::Identity(c.token()),
        Value::Record(r) => Feature::Identity(r.token()),
        Value::External(a) => Feature::Identity(a.token()),
        Value::Texture(t) => Feature::Identity(t.token()),
        Value::SparseBuilder(b) => Feature::Identity(b.token()),
        Value::Ndarray(_) => {
            return InvalidArgumentSnafu {
                arg: name,
                reason: "ndarrays cannot be passed through a template parameter; annotate it as an ndarray",
            }
            .fail();
        }
    })
}

fn extract_array(options: ExtractOptions, arg: &Value, ty: &NdarrayType, name: &str) -> Result<Feature> {
    match arg {
        Value::Ndarray(array) => {
            if options.check_matched {
                ty.check_matched(array, name)?;
            }
            Ok(Feature::Array {
                element: array.element_type(),
                ndim: array.ndim(),
                needs_grad: ty.needs_grad.unwrap_or_else(|| array.has_grad()),
                boundary: ty.boundary,
            })
        }
        Value::External(array) => {
            let (dtype, shape) = {
                let tensor = array.read();
                (tensor.dtype(), tensor.shape().to_vec())
            };
            let (element, ndim) = check_external(ty, name, dtype, &shape)?;

            Ok(Feature::Array {
                element,
                ndim,
                needs_grad: ty.needs_grad.unwrap_or_else(|| array.requires_grad()),
                boundary: ty.boundary,
            })
        }
        _ => Ok(Feature::Unused),
    }
}

/// Validate a caller-owned tensor of `dtype` and `shape` against `ty`.
///
/// Returns the element type and the rank left after stripping element dims.
pub(crate) fn check_external(
    ty: &NdarrayType,
    name: &str,
    dtype: ScalarDType,
    shape: &[usize],
) -> Result<(DType, usize)> {
    let element_shape = ty.element_shape();
    let element_ndim = element_shape.len();

    if element_ndim > 0 {
        let expected_total = ty.ndim.map(|n| n + element_ndim);
        match expected_total {
            Some(total) => ensure!(
                shape.len() == total,
                NdimMismatchSnafu { arg: name, expected: total - element_ndim, actual: shape.len().saturating_sub(element_ndim) }
            ),
            None => ensure!(
                shape.len() >= element_ndim,
                ElementShapeMismatchSnafu { arg: name, expected: element_shape.to_vec(), actual: shape.to_vec() }
            ),
        }
        let observed = match ty.layout {
            Layout::Aos => &shape[shape.len() - element_ndim..],
            Layout::Soa => &shape[..element_ndim],
        };
        ensure!(
            observed == element_shape.as_slice(),
            ElementShapeMismatchSnafu { arg: name, expected: element_shape.to_vec(), actual: observed.to_vec() }
        );
    } else if let Some(expected) = ty.ndim {
        ensure!(shape.len() == expected, NdimMismatchSnafu { arg: name, expected, actual: shape.len() });
    }

    let element = match ty.dtype {
        Some(expected) => {
            ensure!(
                expected.base() == dtype,
                DTypeMismatchSnafu { arg: name, expected: expected.to_string(), actual: dtype.to_string() }
            );
            expected
        }
        None => DType::Scalar(dtype),
    };

    Ok((element, shape.len() - element_ndim))
}
