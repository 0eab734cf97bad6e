use std::sync::Arc;

use bytemuck::Pod;
use kiln_dtype::{DType, HasDType};
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use snafu::ensure;

use crate::error::{DTypeMismatchSnafu, Result, SizeMismatchSnafu};
use crate::launch::{ArrayArg, DevicePtr};
use crate::object::{Identity, IdentityToken, ObjectId};

/// Array owned by the storage layer.
///
/// Clones share storage and identity. The element type may be a vector or
/// matrix; `shape` never includes the element sub-shape.
#[derive(Debug, Clone)]
pub struct Ndarray {
    inner: Arc<NdarrayData>,
}

#[derive(Debug)]
struct NdarrayData {
    identity: Identity,
    element_type: DType,
    /// Shape of the array (stack-allocated for 0-4D arrays).
    shape: SmallVec<[usize; 4]>,
    nbytes: usize,
    /// Word-backed so typed views of any scalar width stay aligned.
    storage: Mutex<Box<[u64]>>,
    grad: RwLock<Option<Ndarray>>,
}

impl Ndarray {
    /// Zero-initialized array.
    pub fn zeros(element_type: DType, shape: &[usize]) -> Self {
        let nbytes = element_type.bytes() * shape.iter().product::<usize>();
        let words = nbytes.div_ceil(8);
        Self {
            inner: Arc::new(NdarrayData {
                identity: Identity::new(),
                element_type,
                shape: SmallVec::from_slice(shape),
                nbytes,
                storage: Mutex::new(vec![0u64; words].into_boxed_slice()),
                grad: RwLock::new(None),
            }),
        }
    }

    /// Scalar-element array initialized from row-major host data.
    pub fn from_slice<T: HasDType + Pod>(shape: &[usize], data: &[T]) -> Result<Self> {
        let array = Self::zeros(T::DTYPE, shape);
        array.copy_from_slice(data)?;
        Ok(array)
    }

    pub fn id(&self) -> ObjectId {
        self.inner.identity.id()
    }

    pub fn token(&self) -> IdentityToken {
        self.inner.identity.token()
    }

    pub fn element_type(&self) -> DType {
        self.inner.element_type
    }

    pub fn shape(&self) -> &[usize] {
        &self.inner.shape
    }

    pub fn ndim(&self) -> usize {
        self.inner.shape.len()
    }

    pub fn nbytes(&self) -> usize {
        self.inner.nbytes
    }

    /// Number of scalar lanes across all elements.
    pub fn numel(&self) -> usize {
        self.inner.shape.iter().product::<usize>() * self.inner.element_type.lanes()
    }

    pub fn base_ptr(&self) -> DevicePtr {
        // Storage is never reallocated, so the address outlives the guard.
        DevicePtr::from_mut_ptr(self.inner.storage.lock().as_mut_ptr())
    }

    pub fn grad(&self) -> Option<Ndarray> {
        self.inner.grad.read().clone()
    }

    pub fn has_grad(&self) -> bool {
        self.inner.grad.read().is_some()
    }

    /// Attach a zeroed gradient buffer if none exists.
    ///
    /// Changes the array's gradient requirement, so the identity epoch is bumped.
    pub fn enable_grad(&self) -> Ndarray {
        let mut grad = self.inner.grad.write();
        if let Some(existing) = grad.as_ref() {
            return existing.clone();
        }
        let buffer = Ndarray::zeros(self.inner.element_type, &self.inner.shape);
        *grad = Some(buffer.clone());
        self.inner.identity.bump();
        buffer
    }

    /// Launch-slot payload for this array.
    pub fn as_arg(&self) -> ArrayArg {
        ArrayArg {
            ptr: self.base_ptr(),
            nbytes: self.nbytes(),
            shape: self.inner.shape.clone(),
            grad: self.grad().map(|g| g.base_ptr()),
        }
    }

    pub fn copy_from_slice<T: HasDType + Pod>(&self, data: &[T]) -> Result<()> {
        self.check_base::<T>()?;
        ensure!(data.len() == self.numel(), SizeMismatchSnafu { expected: self.numel(), actual: data.len() });
        let mut storage = self.inner.storage.lock();
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut storage[..]);
        bytes[..self.inner.nbytes].copy_from_slice(bytemuck::cast_slice(data));
        Ok(())
    }

    pub fn to_vec<T: HasDType + Pod>(&self) -> Result<Vec<T>> {
        self.check_base::<T>()?;
        let storage = self.inner.storage.lock();
        let bytes: &[u8] = bytemuck::cast_slice(&storage[..]);
        Ok(bytemuck::cast_slice::<u8, T>(&bytes[..self.inner.nbytes]).to_vec())
    }

    fn check_base<T: HasDType>(&self) -> Result<()> {
        let actual = self.inner.element_type.base();
        ensure!(actual == T::SCALAR, DTypeMismatchSnafu { expected: T::SCALAR, actual });
        Ok(())
    }
}
