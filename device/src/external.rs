//! Caller-owned host tensors.
//!
//! An [`ExternalArray`] wraps an `ndarray::ArrayD` the caller keeps ownership
//! of. Unlike [`Ndarray`](crate::Ndarray), its memory layout is whatever the
//! caller built: row-major, column-major, or an arbitrary strided view. The
//! binder passes row-major data through directly and stages the rest.

use std::sync::Arc;

use kiln_dtype::{HasDType, ScalarDType};
use ndarray::ArrayD;
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;
use snafu::ensure;

use crate::arch::DeviceSpec;
use crate::error::{DTypeMismatchSnafu, Result, ShapeMismatchSnafu};
use crate::launch::DevicePtr;
use crate::object::{Identity, IdentityToken, ObjectId};

/// Memory order of a host tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLayout {
    /// C-contiguous.
    RowMajor,
    /// Fortran-contiguous.
    ColumnMajor,
    /// Neither; cannot be handed to a kernel.
    Strided,
}

/// Host tensor of one of the supported scalar dtypes.
#[derive(Debug, Clone, PartialEq)]
pub enum HostTensor {
    Int8(ArrayD<i8>),
    Int16(ArrayD<i16>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    UInt8(ArrayD<u8>),
    UInt16(ArrayD<u16>),
    UInt32(ArrayD<u32>),
    UInt64(ArrayD<u64>),
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
}

macro_rules! dispatch {
    ($tensor:expr, $array:ident => $body:expr) => {
        match $tensor {
            HostTensor::Int8($array) => $body,
            HostTensor::Int16($array) => $body,
            HostTensor::Int32($array) => $body,
            HostTensor::Int64($array) => $body,
            HostTensor::UInt8($array) => $body,
            HostTensor::UInt16($array) => $body,
            HostTensor::UInt32($array) => $body,
            HostTensor::UInt64($array) => $body,
            HostTensor::Float32($array) => $body,
            HostTensor::Float64($array) => $body,
        }
    };
}

macro_rules! map_variant {
    ($tensor:expr, $array:ident => $body:expr) => {
        match $tensor {
            HostTensor::Int8($array) => HostTensor::Int8($body),
            HostTensor::Int16($array) => HostTensor::Int16($body),
            HostTensor::Int32($array) => HostTensor::Int32($body),
            HostTensor::Int64($array) => HostTensor::Int64($body),
            HostTensor::UInt8($array) => HostTensor::UInt8($body),
            HostTensor::UInt16($array) => HostTensor::UInt16($body),
            HostTensor::UInt32($array) => HostTensor::UInt32($body),
            HostTensor::UInt64($array) => HostTensor::UInt64($body),
            HostTensor::Float32($array) => HostTensor::Float32($body),
            HostTensor::Float64($array) => HostTensor::Float64($body),
        }
    };
}

fn layout_of<T>(array: &ArrayD<T>) -> MemoryLayout {
    if array.is_standard_layout() {
        MemoryLayout::RowMajor
    } else if array.t().is_standard_layout() {
        MemoryLayout::ColumnMajor
    } else {
        MemoryLayout::Strided
    }
}

impl HostTensor {
    pub fn dtype(&self) -> ScalarDType {
        match self {
            Self::Int8(_) => ScalarDType::Int8,
            Self::Int16(_) => ScalarDType::Int16,
            Self::Int32(_) => ScalarDType::Int32,
            Self::Int64(_) => ScalarDType::Int64,
            Self::UInt8(_) => ScalarDType::UInt8,
            Self::UInt16(_) => ScalarDType::UInt16,
            Self::UInt32(_) => ScalarDType::UInt32,
            Self::UInt64(_) => ScalarDType::UInt64,
            Self::Float32(_) => ScalarDType::Float32,
            Self::Float64(_) => ScalarDType::Float64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        dispatch!(self, a => a.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn len(&self) -> usize {
        dispatch!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn nbytes(&self) -> usize {
        self.len() * self.dtype().bytes()
    }

    pub fn layout(&self) -> MemoryLayout {
        dispatch!(self, a => layout_of(a))
    }

    /// Owned row-major copy with the same logical contents.
    pub fn to_row_major(&self) -> Self {
        map_variant!(self, a => a.as_standard_layout().into_owned())
    }

    pub fn zeros_like(&self) -> Self {
        map_variant!(self, a => ArrayD::zeros(a.raw_dim()))
    }

    /// Address of the first element. Only meaningful for row-major tensors.
    pub fn as_mut_ptr(&mut self) -> DevicePtr {
        dispatch!(self, a => DevicePtr::from_mut_ptr(a.as_mut_ptr()))
    }

    /// Element-wise copy of `source` into `self`, honoring each side's layout.
    pub fn assign(&mut self, source: &HostTensor) -> Result<()> {
        ensure!(
            self.shape() == source.shape(),
            ShapeMismatchSnafu { expected: self.shape().to_vec(), actual: source.shape().to_vec() }
        );
        match (self, source) {
            (Self::Int8(d), Self::Int8(s)) => d.assign(s),
            (Self::Int16(d), Self::Int16(s)) => d.assign(s),
            (Self::Int32(d), Self::Int32(s)) => d.assign(s),
            (Self::Int64(d), Self::Int64(s)) => d.assign(s),
            (Self::UInt8(d), Self::UInt8(s)) => d.assign(s),
            (Self::UInt16(d), Self::UInt16(s)) => d.assign(s),
            (Self::UInt32(d), Self::UInt32(s)) => d.assign(s),
            (Self::UInt64(d), Self::UInt64(s)) => d.assign(s),
            (Self::Float32(d), Self::Float32(s)) => d.assign(s),
            (Self::Float64(d), Self::Float64(s)) => d.assign(s),
            (d, s) => return DTypeMismatchSnafu { expected: d.dtype(), actual: s.dtype() }.fail(),
        }
        Ok(())
    }
}

/// Host element types a [`HostTensor`] can hold.
pub trait HostElement: HasDType + Clone {
    fn wrap(array: ArrayD<Self>) -> HostTensor;
    fn view(tensor: &HostTensor) -> Option<&ArrayD<Self>>;
}

macro_rules! impl_host_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl HostElement for $ty {
                fn wrap(array: ArrayD<Self>) -> HostTensor {
                    HostTensor::$variant(array)
                }

                fn view(tensor: &HostTensor) -> Option<&ArrayD<Self>> {
                    match tensor {
                        HostTensor::$variant(a) => Some(a),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_host_element! {
    i8 => Int8, i16 => Int16, i32 => Int32, i64 => Int64,
    u8 => UInt8, u16 => UInt16, u32 => UInt32, u64 => UInt64,
    f32 => Float32, f64 => Float64,
}

impl<T: HostElement> From<ArrayD<T>> for HostTensor {
    fn from(array: ArrayD<T>) -> Self {
        T::wrap(array)
    }
}

/// Caller-owned tensor passed to kernels by reference.
///
/// Clones share the same tensor and identity.
#[derive(Debug, Clone)]
pub struct ExternalArray {
    inner: Arc<ExternalData>,
}

#[derive(Debug)]
struct ExternalData {
    identity: Identity,
    device: DeviceSpec,
    data: RwLock<HostTensor>,
    requires_grad: bool,
    grad: Mutex<Option<HostTensor>>,
}

impl ExternalArray {
    /// Host-resident tensor without gradient tracking.
    pub fn new(data: impl Into<HostTensor>) -> Self {
        Self::with_options(data.into(), DeviceSpec::Cpu, false)
    }

    /// Tensor that reports residence on `device` and optionally requires a gradient.
    pub fn with_options(data: HostTensor, device: DeviceSpec, requires_grad: bool) -> Self {
        Self {
            inner: Arc::new(ExternalData {
                identity: Identity::new(),
                device,
                data: RwLock::new(data),
                requires_grad,
                grad: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.inner.identity.id()
    }

    pub fn token(&self) -> IdentityToken {
        self.inner.identity.token()
    }

    pub fn device(&self) -> DeviceSpec {
        self.inner.device
    }

    pub fn requires_grad(&self) -> bool {
        self.inner.requires_grad
    }

    pub fn dtype(&self) -> ScalarDType {
        self.inner.data.read().dtype()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.inner.data.read().shape().to_vec()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, HostTensor> {
        self.inner.data.read()
    }

    /// Writable access. The guard may change shape or dtype, so this retires
    /// identity-keyed cache entries up front.
    pub fn write(&self) -> RwLockWriteGuard<'_, HostTensor> {
        let guard = self.inner.data.write();
        let epoch = self.inner.identity.bump();
        trace!(id = ?self.id(), epoch, "external array opened for writing");
        guard
    }

    /// Swap in a new tensor. Retires identity-keyed cache entries.
    pub fn replace(&self, data: impl Into<HostTensor>) -> HostTensor {
        std::mem::replace(&mut *self.write(), data.into())
    }

    /// Address of the first element, for in-place launches of row-major tensors.
    pub fn data_ptr(&self) -> DevicePtr {
        self.inner.data.write().as_mut_ptr()
    }

    /// Copy `source` back element-wise. Shape and dtype must already match,
    /// so the identity is kept.
    pub fn write_back(&self, source: &HostTensor) -> Result<()> {
        self.inner.data.write().assign(source)
    }

    /// Copy of the contents as `ArrayD<T>`, or `None` if the dtype differs.
    pub fn to_array<T: HostElement>(&self) -> Option<ArrayD<T>> {
        T::view(&self.inner.data.read()).cloned()
    }

    pub fn grad(&self) -> MutexGuard<'_, Option<HostTensor>> {
        self.inner.grad.lock()
    }
}
