//! Result and error types representing the outcome of compiling a function.

use crate::verifier::VerifierErrors;
use failure_derive::Fail;

/// A compilation error.
///
/// When a function cannot be compiled, the pipeline aborts the unit with one of these.
/// Invariant violations inside a pass are programming bugs and panic instead.
#[derive(Fail, Debug, PartialEq, Eq)]
pub enum CodegenError {
    /// A list of IR verifier errors.
    ///
    /// This always represents a bug, either in the code that generated IR for the backend, or
    /// a bug in one of the passes themselves.
    #[fail(display = "Verifier errors")]
    Verifier(#[cause] VerifierErrors),
}

/// A convenient alias for a `Result` that uses `CodegenError` as the error type.
pub type CodegenResult<T> = Result<T, CodegenError>;

impl From<VerifierErrors> for CodegenError {
    fn from(errors: VerifierErrors) -> Self {
        CodegenError::Verifier(errors)
    }
}
