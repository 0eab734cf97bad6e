//! Error types for performance dispatch.

use snafu::Snafu;

/// Result type for runtime operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Only compiled kernels can be registered as candidates.
    #[snafu(display("'{name}' is not a kernel; performance dispatch candidates must be kernels"))]
    NotAKernel { name: String },

    #[snafu(display(
        "candidate '{candidate}' does not match '{dispatcher}': parameter {index} is '{found}', expected '{expected}'"
    ))]
    SignatureMismatch { dispatcher: String, candidate: String, index: usize, expected: String, found: String },

    #[snafu(display("candidate '{candidate}' takes {found} parameters, '{dispatcher}' declares {expected}"))]
    ParameterCountMismatch { dispatcher: String, candidate: String, expected: usize, found: usize },

    /// Every registered candidate rejected the call.
    #[snafu(display("no compatible candidate for '{dispatcher}' among {registered} registered"))]
    NoCandidate { dispatcher: String, registered: usize },

    #[snafu(display("{source}"))]
    Kernel { source: kiln_kernel::Error },

    #[snafu(display("device error: {source}"))]
    Device { source: kiln_device::Error },
}

impl From<kiln_kernel::Error> for Error {
    fn from(source: kiln_kernel::Error) -> Self {
        Self::Kernel { source }
    }
}
