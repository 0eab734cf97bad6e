//! Argument binding.
//!
//! Flattens a call's arguments into the fixed-layout [`LaunchContext`] a
//! compiled program reads. Writes are staged per kind in a
//! [`LaunchContextBuffer`] and flushed in one batch per kind.
//!
//! Struct arguments contribute one slot per *used* leaf only; the used set is
//! the kernel scope's dotted view from pruning, so binding and compilation
//! agree on the slot layout.

use std::sync::Arc;

use kiln_device::{ArrayArg, DeviceSpec, ExternalArray, LaunchContext, MemoryLayout, Scalar};
use kiln_dtype::ScalarDType;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use snafu::ensure;
use tracing::{debug, warn};

use crate::annotation::{Layout, MatrixType, NdarrayType, TypeAnnotation};
use crate::error::{
    NonContiguousSnafu, Result, StructTypeMismatchSnafu, TooManyArgumentsSnafu, TypeMismatchSnafu,
    UnsupportedBindingSnafu,
};
use crate::feature::check_external;
use crate::flat::{DottedPath, join};
use crate::signature::ArgMetadata;
use crate::value::Value;

/// Hard cap on flattened argument slots per launch.
pub const MAX_ARG_NUM: usize = 512;

/// Runs after a launch to propagate results into a caller-owned tensor.
pub type CopyBack = Box<dyn FnOnce() -> kiln_device::Result<()> + Send>;

/// Pending slot writes, grouped by kind.
#[derive(Debug, Default)]
pub struct LaunchContextBuffer {
    floats: Vec<(usize, f64)>,
    ints: Vec<(usize, i64)>,
    uints: Vec<(usize, u64)>,
    arrays: Vec<(usize, ArrayArg)>,
    arrays_with_grad: Vec<(usize, ArrayArg)>,
    external_arrays: Vec<(usize, ArrayArg)>,
    matrices: Vec<(usize, Vec<Scalar>)>,
    textures: Vec<(usize, u64, bool)>,
}

impl LaunchContextBuffer {
    pub fn len(&self) -> usize {
        self.floats.len()
            + self.ints.len()
            + self.uints.len()
            + self.arrays.len()
            + self.arrays_with_grad.len()
            + self.external_arrays.len()
            + self.matrices.len()
            + self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain every kind into `ctx`, one batch per non-empty kind.
    pub fn flush(self, ctx: &mut LaunchContext) {
        ctx.set_args_float(&self.floats);
        ctx.set_args_int(&self.ints);
        ctx.set_args_uint(&self.uints);
        ctx.set_args_array(self.arrays);
        ctx.set_args_array(self.arrays_with_grad);
        ctx.set_args_external_array(self.external_arrays);
        ctx.set_args_matrix(self.matrices);
        ctx.set_args_texture(&self.textures);
    }
}

/// Result of binding one call.
pub struct Bound {
    pub ctx: LaunchContext,
    /// Whether `ctx` may be reused for a later call with identical argument identities.
    pub cacheable: bool,
    pub callbacks: Vec<CopyBack>,
    pub slots: usize,
}

impl std::fmt::Debug for Bound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bound")
            .field("ctx", &self.ctx)
            .field("cacheable", &self.cacheable)
            .field("callbacks", &self.callbacks.len())
            .field("slots", &self.slots)
            .finish()
    }
}

/// Number of launch slots `params` occupy when only `used` struct leaves are bound.
pub fn expected_slot_count(params: &[ArgMetadata], used: &FxHashSet<DottedPath>) -> usize {
    params
        .iter()
        .map(|p| {
            let mut path = DottedPath::new();
            path.push(p.name.clone());
            slots_of(&p.annotation, &mut path, used)
        })
        .sum()
}

fn slots_of(annotation: &TypeAnnotation, path: &mut DottedPath, used: &FxHashSet<DottedPath>) -> usize {
    match annotation {
        TypeAnnotation::Template => 0,
        TypeAnnotation::Record(ty) => {
            let mut total = 0;
            for (field, field_ty) in &ty.fields {
                path.push(field.clone());
                if used.contains(&*path) {
                    total += slots_of(field_ty, path, used);
                }
                path.pop();
            }
            total
        }
        _ => 1,
    }
}

/// Bind `args` (already matched to `params`) into a fresh launch context.
#[tracing::instrument(level = "trace", skip_all, fields(params = params.len()))]
pub fn bind_args(
    params: &[ArgMetadata],
    args: &[Value],
    used: &FxHashSet<DottedPath>,
    arch: DeviceSpec,
) -> Result<Bound> {
    let mut binder = Binder {
        used,
        arch,
        param_index: 0,
        buffer: LaunchContextBuffer::default(),
        callbacks: Vec::new(),
    };

    let mut slots = 0;
    let mut cacheable = true;
    for (index, (param, arg)) in params.iter().zip(args).enumerate() {
        binder.param_index = index;
        let mut path = DottedPath::new();
        path.push(param.name.clone());
        let (consumed, arg_cacheable) = binder.recursive_set_args(&mut path, &param.annotation, arg, slots)?;
        slots += consumed;
        cacheable &= arg_cacheable;
    }

    let Binder { buffer, callbacks, .. } = binder;
    let mut ctx = LaunchContext::with_capacity(slots);
    buffer.flush(&mut ctx);

    debug!(slots, cacheable, callbacks = callbacks.len(), batches = ctx.batch_writes(), "bound launch context");
    Ok(Bound { ctx, cacheable, callbacks, slots })
}

struct Binder<'a> {
    used: &'a FxHashSet<DottedPath>,
    arch: DeviceSpec,
    /// Declared position of the argument being bound, for diagnostics.
    param_index: usize,
    buffer: LaunchContextBuffer,
    callbacks: Vec<CopyBack>,
}

impl Binder<'_> {
    /// Bind `value` declared as `declared` starting at slot `index`.
    ///
    /// Returns the number of slots consumed and whether the binding may be cached.
    fn recursive_set_args(
        &mut self,
        path: &mut DottedPath,
        declared: &TypeAnnotation,
        value: &Value,
        index: usize,
    ) -> Result<(usize, bool)> {
        let name = join(&path[0], &path[1..]);

        if !matches!(declared, TypeAnnotation::Template | TypeAnnotation::Record(_)) {
            ensure!(
                index < MAX_ARG_NUM,
                TooManyArgumentsSnafu { slots: index + 1, max: MAX_ARG_NUM, arch: self.arch.to_string() }
            );
        }

        match (declared, value) {
            (TypeAnnotation::Template, _) => Ok((0, true)),

            (TypeAnnotation::Primitive(dtype), _) => {
                match self.coerce(*dtype, value, &name)? {
                    Scalar::Float(v) => self.buffer.floats.push((index, v)),
                    Scalar::Int(v) => self.buffer.ints.push((index, v)),
                    Scalar::UInt(v) => self.buffer.uints.push((index, v)),
                    Scalar::Bool(v) => self.buffer.uints.push((index, u64::from(v))),
                }
                Ok((1, false))
            }

            (TypeAnnotation::Record(ty), Value::Record(record)) => {
                ensure!(
                    Arc::ptr_eq(ty, record.ty()),
                    StructTypeMismatchSnafu { arg: &name, expected: &ty.name, provided: &record.ty().name }
                );
                let mut consumed = 0;
                let mut cacheable = ty.frozen;
                for ((field, field_ty), field_value) in ty.fields.iter().zip(record.fields()) {
                    path.push(field.clone());
                    if self.used.contains(&*path) {
                        let (n, c) = self.recursive_set_args(path, field_ty, field_value, index + consumed)?;
                        consumed += n;
                        cacheable &= c;
                    }
                    path.pop();
                }
                Ok((consumed, cacheable))
            }
            (TypeAnnotation::Record(ty), _) => {
                StructTypeMismatchSnafu { arg: name, expected: &ty.name, provided: value.kind_name() }.fail()
            }

            (TypeAnnotation::Ndarray(_), Value::Ndarray(array)) => {
                let arg = array.as_arg();
                if arg.grad.is_some() {
                    self.buffer.arrays_with_grad.push((index, arg));
                } else {
                    self.buffer.arrays.push((index, arg));
                }
                Ok((1, true))
            }
            (TypeAnnotation::Ndarray(ty), Value::External(array)) => {
                let arg = self.bind_external(ty, array, &name)?;
                self.buffer.external_arrays.push((index, arg));
                Ok((1, false))
            }

            (TypeAnnotation::Matrix(ty), Value::Matrix(matrix)) => {
                ensure!(
                    matrix.shape == ty.shape(),
                    TypeMismatchSnafu {
                        arg: &name,
                        index: self.param_index,
                        expected: ty.element_type().to_string(),
                        provided: value.kind_name(),
                    }
                );
                let entries = self.coerce_matrix(ty, &matrix.entries, &name)?;
                self.buffer.matrices.push((index, entries));
                Ok((1, false))
            }

            (TypeAnnotation::Texture(_), Value::Texture(texture)) => {
                self.buffer.textures.push((index, texture.handle(), false));
                Ok((1, true))
            }
            (TypeAnnotation::RwTexture(_), Value::Texture(texture)) => {
                self.buffer.textures.push((index, texture.handle(), true));
                Ok((1, true))
            }

            (TypeAnnotation::SparseMatrixBuilder, Value::SparseBuilder(builder)) => {
                self.buffer.uints.push((index, builder.base_ptr().addr() as u64));
                Ok((1, true))
            }

            _ => UnsupportedBindingSnafu { arg: name, expected: declared.to_string(), provided: value.kind_name() }.fail(),
        }
    }

    fn coerce(&self, dtype: ScalarDType, value: &Value, name: &str) -> Result<Scalar> {
        coerce_scalar(dtype, value).ok_or_else(|| {
            TypeMismatchSnafu {
                arg: name,
                index: self.param_index,
                expected: dtype.to_string(),
                provided: value.kind_name(),
            }
            .build()
        })
    }

    fn coerce_matrix(&self, ty: &MatrixType, entries: &[Value], name: &str) -> Result<Vec<Scalar>> {
        entries.iter().map(|entry| self.coerce(ty.dtype, entry, name)).collect()
    }

    /// Launch payload for a caller-owned tensor.
    ///
    /// Row-major tensors reachable from the target are passed in place. Other
    /// contiguous tensors are staged through a row-major host copy that is
    /// written back after the launch.
    fn bind_external(&mut self, ty: &NdarrayType, array: &ExternalArray, name: &str) -> Result<ArrayArg> {
        let element_ndim = ty.element_shape().len();
        let tensor = array.read();
        let full_shape = tensor.shape().to_vec();
        // Contents may have been swapped since the features were extracted.
        check_external(ty, name, tensor.dtype(), &full_shape)?;
        let shape: SmallVec<[usize; 4]> = match ty.layout {
            Layout::Aos => full_shape[..full_shape.len() - element_ndim].iter().copied().collect(),
            Layout::Soa => full_shape[element_ndim..].iter().copied().collect(),
        };

        if tensor.len() > i32::MAX as usize {
            warn!(arg = name, len = tensor.len(), "external array exceeds int32 indexing; kernels may overflow");
        }

        let layout = tensor.layout();
        ensure!(layout != MemoryLayout::Strided, NonContiguousSnafu { arg: name, shape: full_shape });

        let grad = if array.requires_grad() {
            let mut grad = array.grad();
            let buffer = grad.get_or_insert_with(|| tensor.zeros_like());
            Some(buffer.as_mut_ptr())
        } else {
            None
        };

        let nbytes = tensor.nbytes();
        let in_place = layout == MemoryLayout::RowMajor && array.device().is_reachable_from(&self.arch);
        let staged = (!in_place).then(|| tensor.to_row_major());
        drop(tensor);

        let ptr = match staged {
            None => array.data_ptr(),
            Some(mut staged) => {
                debug!(arg = name, ?layout, device = %array.device(), arch = %self.arch, "staging external array");
                let ptr = staged.as_mut_ptr();
                let target = array.clone();
                self.callbacks.push(Box::new(move || target.write_back(&staged)));
                ptr
            }
        };

        Ok(ArrayArg { ptr, nbytes, shape, grad })
    }
}

/// Numeric coercion of `value` into a slot of `dtype`.
pub fn coerce_scalar(dtype: ScalarDType, value: &Value) -> Option<Scalar> {
    if dtype.is_float() {
        return match value {
            Value::Float(v) => Some(Scalar::Float(*v)),
            Value::Int(v) => Some(Scalar::Float(*v as f64)),
            Value::UInt(v) => Some(Scalar::Float(*v as f64)),
            Value::Bool(v) => Some(Scalar::Float(f64::from(u8::from(*v)))),
            _ => None,
        };
    }
    if dtype.is_signed() {
        return match value {
            Value::Int(v) => Some(Scalar::Int(*v)),
            Value::UInt(v) => i64::try_from(*v).ok().map(Scalar::Int),
            Value::Bool(v) => Some(Scalar::Int(i64::from(*v))),
            _ => None,
        };
    }
    match value {
        Value::Bool(v) if dtype.is_bool() => Some(Scalar::Bool(*v)),
        Value::Bool(v) => Some(Scalar::UInt(u64::from(*v))),
        Value::UInt(v) => Some(Scalar::UInt(*v)),
        Value::Int(v) => u64::try_from(*v).ok().map(Scalar::UInt),
        _ => None,
    }
}
