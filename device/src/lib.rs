//! Storage and launch interfaces consumed by the kiln kernel front end.
//!
//! This crate holds everything on the far side of argument binding:
//!
//! - **Launch context**: the fixed-layout argument table programs read ([`LaunchContext`]).
//! - **Programs**: compiled artifacts and the device barrier ([`Program`], [`Synchronize`]).
//! - **Argument handles**: arrays owned by the storage layer ([`Ndarray`]), caller-owned
//!   host tensors ([`ExternalArray`]), textures and sparse builders, each with a stable
//!   identity ([`IdentityToken`]) for identity-keyed caches.

pub mod arch;
pub mod array;
pub mod error;
pub mod external;
pub mod handles;
pub mod launch;
pub mod object;
pub mod program;


pub use arch::DeviceSpec;
pub use array::Ndarray;
pub use error::{Error, Result};
pub use external::{ExternalArray, HostElement, HostTensor, MemoryLayout};
pub use handles::{SparseMatrixBuilder, TexFormat, Texture};
pub use launch::{ArgValue, ArrayArg, DevicePtr, LaunchContext, Scalar};
pub use object::{Identity, IdentityToken, ObjectId};
pub use program::{Program, Synchronize};
