use kiln_dtype::ScalarDType;
use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Shape of target array does not match expected shape.
    #[snafu(display("shape mismatch: expected {expected:?}, got {actual:?}"))]
    ShapeMismatch { expected: Vec<usize>, actual: Vec<usize> },

    #[snafu(display("size mismatch: expected {expected}, got {actual}"))]
    SizeMismatch { expected: usize, actual: usize },

    #[snafu(display("dtype mismatch: expected {expected}, got {actual}"))]
    DTypeMismatch { expected: ScalarDType, actual: ScalarDType },

    /// Failed to copy data between host and device.
    #[snafu(display("copy operation failed: {reason}"))]
    CopyFailed { reason: String },

    /// Invalid device specification.
    #[snafu(display("invalid device: {device}"))]
    InvalidDevice { device: String },

    /// Backend failed to produce a program.
    #[snafu(display("failed to compile kernel '{kernel}': {reason}"))]
    CompileFailed { kernel: String, reason: String },

    /// Program raised while running.
    #[snafu(display("kernel '{kernel}' failed: {reason}"))]
    LaunchFailed { kernel: String, reason: String },

    /// Launch context slot is missing or holds a different kind.
    #[snafu(display("argument slot {index} is {found}, expected {expected}"))]
    ArgumentSlot { index: usize, expected: &'static str, found: &'static str },

    #[snafu(display("device synchronization failed: {reason}"))]
    SyncFailed { reason: String },
}
