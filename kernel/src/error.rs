use snafu::Snafu;

use crate::pruning::FuncId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    // =========================================================================
    // Declaration
    // =========================================================================
    #[snafu(display("invalid type annotation of argument #{index} ({name}) of '{func}': {reason}"))]
    InvalidAnnotation { func: String, index: usize, name: String, reason: String },

    #[snafu(display("'{func}' does not support {kind} parameters ({name})"))]
    UnsupportedParameter { func: String, name: String, kind: &'static str },

    #[snafu(display("kernel '{func}' argument #{index} ({name}) must be type annotated"))]
    MissingAnnotation { func: String, index: usize, name: String },

    #[snafu(display("kernel '{func}' does not support default values for argument {name}"))]
    KernelDefault { func: String, name: String },

    // =========================================================================
    // Call arguments
    // =========================================================================
    #[snafu(display("'{func}': {expected} argument(s) needed but {provided} provided"))]
    ArgumentCount { func: String, expected: usize, provided: usize },

    #[snafu(display("'{func}': missing argument '{name}'"))]
    MissingArgument { func: String, name: String },

    #[snafu(display("'{func}': unexpected argument '{name}'"))]
    UnexpectedArgument { func: String, name: String },

    #[snafu(display("'{func}': multiple values for argument '{name}'"))]
    MultipleValues { func: String, name: String },

    #[snafu(display("invalid argument '{arg}': {reason}"))]
    InvalidArgument { arg: String, reason: String },

    #[snafu(display("argument #{index} ({arg}) type mismatch: expected {expected}, got {provided}"))]
    TypeMismatch { arg: String, index: usize, expected: String, provided: String },

    #[snafu(display("invalid argument '{arg}': ndim mismatch, expected ndim={expected}, got ndim={actual}"))]
    NdimMismatch { arg: String, expected: usize, actual: usize },

    #[snafu(display("invalid argument '{arg}': dtype mismatch, expected {expected}, got {actual}"))]
    DTypeMismatch { arg: String, expected: String, actual: String },

    #[snafu(display("invalid argument '{arg}': element shape mismatch, expected {expected:?}, got {actual:?}"))]
    ElementShapeMismatch { arg: String, expected: Vec<usize>, actual: Vec<usize> },

    #[snafu(display("invalid argument '{arg}': non contiguous array of shape {shape:?} is not supported"))]
    NonContiguous { arg: String, shape: Vec<usize> },

    #[snafu(display("mismatched struct type for argument '{arg}': expected {expected}, got {provided}"))]
    StructTypeMismatch { arg: String, expected: String, provided: String },

    #[snafu(display("argument '{arg}' type mismatch: expecting {expected}, got {provided}"))]
    UnsupportedBinding { arg: String, expected: String, provided: String },

    #[snafu(display("struct argument '{arg}' of type {ty} declares no fields"))]
    EmptyRecord { arg: String, ty: String },

    #[snafu(display("'{func}' has no parameter named '{name}'"))]
    UnknownName { func: String, name: String },

    #[snafu(display("'{path}' in '{func}' does not name a struct field"))]
    UnknownField { func: String, path: String },

    #[snafu(display("'{func}' calls itself recursively, which cannot be compiled"))]
    RecursiveCall { func: String },

    // =========================================================================
    // Resources
    // =========================================================================
    #[snafu(display("too many arguments: {slots} argument slots needed, the limit on {arch} is {max}"))]
    TooManyArguments { slots: usize, max: usize, arch: String },

    // =========================================================================
    // Internal
    // =========================================================================
    #[snafu(display("internal consistency error in func {func_id:?}: {reason}"))]
    InternalConsistency { func_id: FuncId, reason: String },

    // =========================================================================
    // Backend
    // =========================================================================
    #[snafu(display("failed to compile '{kernel}'"))]
    Compile { kernel: String, source: kiln_device::Error },

    #[snafu(display("failed to launch '{kernel}'"))]
    Launch { kernel: String, source: kiln_device::Error },

    #[snafu(display("post-launch copy back for '{kernel}' failed"))]
    CopyBack { kernel: String, source: kiln_device::Error },

    #[snafu(display("in kernel '{kernel}': {source}"))]
    InKernel {
        kernel: String,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },
}

impl Error {
    /// The error with every [`Error::InKernel`] wrapper removed.
    pub fn innermost(&self) -> &Error {
        match self {
            Self::InKernel { source, .. } => source.innermost(),
            other => other,
        }
    }
}
