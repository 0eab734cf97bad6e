//! Kernel instantiation, parameter pruning and argument binding.
//!
//! This crate sits between a typed call and a compiled program:
//!
//! - **Signatures**: validated parameter lists with struct parameters expanded into flat leaves ([`Signature`]).
//! - **Features**: hashable per-argument summaries deciding which compiled specialization a call
//!   needs ([`FeatureTuple`], [`InstantiationMapper`]).
//! - **Pruning**: a collect/enforce pass pair over traced bodies that forwards only the struct
//!   leaves each func reads ([`Pruning`]).
//! - **Binding**: flattening arguments into a [`kiln_device::LaunchContext`] ([`bind_args`]).
//! - **Front door**: [`Kernel`] ties these together and caches compiled programs per instantiation.
//!
//! # Example
//!
//! ```ignore
//! let kernel = Kernel::builder()
//!     .name("scale")
//!     .params(vec![ArgMetadata::new("x", NdarrayType::builder().ndim(1).build()), ArgMetadata::new("k", ScalarDType::Float32)])
//!     .body(trace_fn(|t| t.read("x")))
//!     .compiler(compiler)
//!     .build()?;
//! kernel.call(&[array.into(), 2.0.into()])?;
//! ```

pub mod annotation;
pub mod cache;
pub mod config;
pub mod error;
pub mod feature;
pub mod flat;
pub mod func;
pub mod kernel;
pub mod launch;
pub mod mapper;
pub mod pruning;
pub mod signature;
pub mod trace;
pub mod value;


pub use annotation::{BoundaryMode, Layout, MatrixType, NdarrayType, RecordType, RwTextureType, TextureType, TypeAnnotation};
pub use cache::BoundedCache;
pub use config::CompileConfig;
pub use error::{Error, Result};
pub use feature::{ExtractOptions, Feature, FeatureTuple, extract_arg};
pub use func::{Func, TraceFn, trace_fn};
pub use kernel::{
    AutodiffMode, CacheStats, Callable, CompileRequest, CompiledInstance, Kernel, KernelCompiler, KernelVariant, Returns,
};
pub use launch::{Bound, CopyBack, LaunchContextBuffer, MAX_ARG_NUM, bind_args, expected_slot_count};
pub use mapper::{ArgIdentity, IdentityKey, InstantiationId, InstantiationMapper, MapperStats};
pub use pruning::{ArgBinding, CallLeaf, CallSite, Collecting, Enforced, FuncId, KERNEL_FUNC_ID, Pruning};
pub use signature::{ArgMetadata, CallableKind, ParamKind, Signature};
pub use trace::{CallArg, TracedCall, Tracer};
pub use value::{Composite, MatrixValue, NodeRef, RecordValue, Value};
