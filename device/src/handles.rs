use std::sync::Arc;

use kiln_dtype::ScalarDType;

use crate::launch::DevicePtr;
use crate::object::{Identity, IdentityToken};

/// Pixel format of a read-write texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexFormat {
    R8,
    Rg8,
    Rgba8,
    R16f,
    Rgba16f,
    R32f,
    Rg32f,
    Rgba32f,
    R32i,
    R32u,
}

/// Texture handle allocated by the storage layer.
#[derive(Debug, Clone)]
pub struct Texture {
    inner: Arc<TextureData>,
}

#[derive(Debug)]
struct TextureData {
    identity: Identity,
    num_dims: u8,
    format: TexFormat,
    handle: u64,
}

impl Texture {
    pub fn new(handle: u64, num_dims: u8, format: TexFormat) -> Self {
        Self { inner: Arc::new(TextureData { identity: Identity::new(), num_dims, format, handle }) }
    }

    pub fn token(&self) -> IdentityToken {
        self.inner.identity.token()
    }

    pub fn num_dims(&self) -> u8 {
        self.inner.num_dims
    }

    pub fn format(&self) -> TexFormat {
        self.inner.format
    }

    pub fn handle(&self) -> u64 {
        self.inner.handle
    }
}

/// Device-side builder that a kernel appends sparse triplets into.
#[derive(Debug, Clone)]
pub struct SparseMatrixBuilder {
    inner: Arc<SparseData>,
}

#[derive(Debug)]
struct SparseData {
    identity: Identity,
    dtype: ScalarDType,
    base: DevicePtr,
}

impl SparseMatrixBuilder {
    pub fn new(dtype: ScalarDType, base: DevicePtr) -> Self {
        Self { inner: Arc::new(SparseData { identity: Identity::new(), dtype, base }) }
    }

    pub fn token(&self) -> IdentityToken {
        self.inner.identity.token()
    }

    pub fn dtype(&self) -> ScalarDType {
        self.inner.dtype
    }

    pub fn base_ptr(&self) -> DevicePtr {
        self.inner.base
    }
}
