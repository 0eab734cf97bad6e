//! Native launch context.
//!
//! A [`LaunchContext`] is the fixed-layout argument table a compiled program
//! reads at launch: one slot per flattened kernel argument, written in batches
//! grouped by kind so a binder issues one write per kind rather than one per
//! argument.

use smallvec::SmallVec;

use crate::error::{ArgumentSlotSnafu, Result};

/// Raw address handed to a program.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DevicePtr(usize);

impl DevicePtr {
    pub const NULL: Self = Self(0);

    pub fn from_mut_ptr<T>(ptr: *mut T) -> Self {
        Self(ptr as usize)
    }

    pub const fn from_addr(addr: usize) -> Self {
        Self(addr)
    }

    pub const fn addr(self) -> usize {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}

/// Scalar value crossing the launch boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Scalar {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Bool(b) => b as u8 as f64,
            Self::Int(v) => v as f64,
            Self::UInt(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Self::Bool(b) => b as i64,
            Self::Int(v) => v,
            Self::UInt(v) => v as i64,
            Self::Float(v) => v as i64,
        }
    }
}

/// Array slot payload: base address, byte length, launch shape and optional gradient buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayArg {
    pub ptr: DevicePtr,
    pub nbytes: usize,
    pub shape: SmallVec<[usize; 4]>,
    pub grad: Option<DevicePtr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Float(f64),
    Int(i64),
    UInt(u64),
    /// Array owned by the storage layer.
    Array(ArrayArg),
    /// Host tensor memory owned by the caller.
    ExternalArray(ArrayArg),
    /// Row-major matrix or vector entries.
    Matrix(Vec<Scalar>),
    Texture { handle: u64, rw: bool },
}

impl ArgValue {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Float(_) => "float",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Array(_) => "array",
            Self::ExternalArray(_) => "external array",
            Self::Matrix(_) => "matrix",
            Self::Texture { .. } => "texture",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LaunchContext {
    args: Vec<Option<ArgValue>>,
    returns: SmallVec<[Scalar; 1]>,
    batch_writes: usize,
}

impl LaunchContext {
    pub fn with_capacity(slots: usize) -> Self {
        Self { args: Vec::with_capacity(slots), ..Self::default() }
    }

    // =========================================================================
    // Batched writes
    // =========================================================================

    pub fn set_args_float(&mut self, writes: &[(usize, f64)]) {
        self.write_batch(writes.iter().map(|&(i, v)| (i, ArgValue::Float(v))));
    }

    pub fn set_args_int(&mut self, writes: &[(usize, i64)]) {
        self.write_batch(writes.iter().map(|&(i, v)| (i, ArgValue::Int(v))));
    }

    pub fn set_args_uint(&mut self, writes: &[(usize, u64)]) {
        self.write_batch(writes.iter().map(|&(i, v)| (i, ArgValue::UInt(v))));
    }

    /// Own arrays, with or without a gradient buffer.
    pub fn set_args_array(&mut self, writes: Vec<(usize, ArrayArg)>) {
        self.write_batch(writes.into_iter().map(|(i, a)| (i, ArgValue::Array(a))));
    }

    pub fn set_args_external_array(&mut self, writes: Vec<(usize, ArrayArg)>) {
        self.write_batch(writes.into_iter().map(|(i, a)| (i, ArgValue::ExternalArray(a))));
    }

    pub fn set_args_matrix(&mut self, writes: Vec<(usize, Vec<Scalar>)>) {
        self.write_batch(writes.into_iter().map(|(i, m)| (i, ArgValue::Matrix(m))));
    }

    pub fn set_args_texture(&mut self, writes: &[(usize, u64, bool)]) {
        self.write_batch(writes.iter().map(|&(i, handle, rw)| (i, ArgValue::Texture { handle, rw })));
    }

    fn write_batch(&mut self, writes: impl IntoIterator<Item = (usize, ArgValue)>) {
        let mut writes = writes.into_iter().peekable();
        if writes.peek().is_none() {
            return;
        }
        self.batch_writes += 1;
        for (index, value) in writes {
            if index >= self.args.len() {
                self.args.resize(index + 1, None);
            }
            self.args[index] = Some(value);
        }
    }

    // =========================================================================
    // Program-side reads
    // =========================================================================

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Number of filled slots.
    pub fn filled(&self) -> usize {
        self.args.iter().filter(|a| a.is_some()).count()
    }

    /// Number of batched writes issued since construction.
    pub fn batch_writes(&self) -> usize {
        self.batch_writes
    }

    pub fn arg(&self, index: usize) -> Option<&ArgValue> {
        self.args.get(index).and_then(Option::as_ref)
    }

    pub fn float(&self, index: usize) -> Result<f64> {
        match self.arg(index) {
            Some(ArgValue::Float(v)) => Ok(*v),
            other => slot_error(index, "float", other),
        }
    }

    pub fn int(&self, index: usize) -> Result<i64> {
        match self.arg(index) {
            Some(ArgValue::Int(v)) => Ok(*v),
            other => slot_error(index, "int", other),
        }
    }

    pub fn uint(&self, index: usize) -> Result<u64> {
        match self.arg(index) {
            Some(ArgValue::UInt(v)) => Ok(*v),
            other => slot_error(index, "uint", other),
        }
    }

    /// Either array kind.
    pub fn array(&self, index: usize) -> Result<&ArrayArg> {
        match self.arg(index) {
            Some(ArgValue::Array(a) | ArgValue::ExternalArray(a)) => Ok(a),
            other => slot_error(index, "array", other),
        }
    }

    pub fn matrix(&self, index: usize) -> Result<&[Scalar]> {
        match self.arg(index) {
            Some(ArgValue::Matrix(m)) => Ok(m),
            other => slot_error(index, "matrix", other),
        }
    }

    // =========================================================================
    // Return values
    // =========================================================================

    pub fn push_return(&mut self, value: Scalar) {
        self.returns.push(value);
    }

    pub fn returns(&self) -> &[Scalar] {
        &self.returns
    }

    pub fn take_returns(&mut self) -> SmallVec<[Scalar; 1]> {
        std::mem::take(&mut self.returns)
    }
}

fn slot_error<T>(index: usize, expected: &'static str, found: Option<&ArgValue>) -> Result<T> {
    ArgumentSlotSnafu { index, expected, found: found.map_or("empty", ArgValue::kind) }.fail()
}
