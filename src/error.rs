//! The five error kinds of spec.md §7, plus the shared "first error wins"
//! slot a parallel pass reports through (§4.5/§5).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// A contract violation: shape mismatch, non-integer labels, unsupported
/// dimensionality, misaligned WCS, a polygon with too few vertices, and so
/// on. The pipeline aborts before any writes happen.
#[derive(thiserror::Error, Debug)]
pub enum ContractError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("label image has non-integer element type")]
    NonIntegerLabels,

    #[error("column `{0}` is not supported for {1}-dimensional input")]
    UnsupportedDimensionality(&'static str, usize),

    #[error("image coordinate system is not aligned with celestial axes")]
    Misaligned,

    #[error(
        "input pixel scale is not square (ra scale {ra_scale_deg}, dec scale {dec_scale_deg}); \
         a single celestial width cannot be converted to a pixel rectangle"
    )]
    NonSquarePixelScale { ra_scale_deg: f64, dec_scale_deg: f64 },

    #[error("polygon must have at least 3 vertices, got {0}")]
    PolygonTooFewVertices(usize),

    #[error("3-D polygon crops are not supported")]
    PolygonNot2D,

    #[error("num_samples must be >= 20 for upper-limit sampling, got {0}")]
    TooFewSamples(usize),

    #[error("zero objects in label image")]
    ZeroObjects,

    #[error("{0}")]
    Other(String),
}

/// I/O failure opening/reading/writing an image or table.
#[derive(thiserror::Error, Debug)]
pub enum RuntimeIoError {
    #[error("failed to read `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to write `{path}`: {source}")]
    Write {
        path: String,
        #[source]
        source: anyhow::Error,
    },
}

/// A bug: the state machine reached a state it forbids. Always an
/// immediate abort with a diagnostic naming the offending label.
#[derive(thiserror::Error, Debug)]
#[error("internal error: {message} (label {label:?})")]
pub struct InternalError {
    pub message: String,
    pub label: Option<i64>,
}

/// Top-level error type returned by the pipelines.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error(transparent)]
    Io(#[from] RuntimeIoError),
    #[error(transparent)]
    Internal(#[from] InternalError),
    #[error("numerical/overflow error: {0}")]
    Numerical(String),
}

impl CoreError {
    /// The exit code table of spec.md §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::Contract(_) => 1,
            CoreError::Io(_) => 2,
            CoreError::Numerical(_) => 3,
            CoreError::Internal(_) => 3,
        }
    }
}

/// First-writer-wins shared error slot for a parallel pass (spec.md §4.5,
/// §5, §7: "an error populates a shared slot using first-writer-wins
/// atomics; other workers finish their current label and exit").
#[derive(Default)]
pub struct ErrorSlot {
    written: AtomicBool,
    error: Mutex<Option<CoreError>>,
}

impl ErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `err` if no error has been recorded yet. Returns `true` if
    /// this call was the one that claimed the slot.
    pub fn record(&self, err: CoreError) -> bool {
        if self
            .written
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self.error.lock().unwrap() = Some(err);
            true
        } else {
            false
        }
    }

    pub fn is_set(&self) -> bool {
        self.written.load(Ordering::SeqCst)
    }

    /// Take the first recorded error, if any, consuming the slot.
    pub fn into_inner(self) -> Option<CoreError> {
        self.error.into_inner().unwrap()
    }
}

impl fmt::Debug for ErrorSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSlot")
            .field("is_set", &self.is_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_writer_wins() {
        let slot = ErrorSlot::new();
        assert!(slot.record(CoreError::Numerical("first".into())));
        assert!(!slot.record(CoreError::Numerical("second".into())));
        match slot.into_inner() {
            Some(CoreError::Numerical(msg)) => assert_eq!(msg, "first"),
            _ => panic!("expected the first error to win"),
        }
    }

    #[test]
    fn exit_codes_match_spec() {
        assert_eq!(CoreError::Contract(ContractError::ZeroObjects).exit_code(), 1);
        assert_eq!(
            CoreError::Io(RuntimeIoError::Read {
                path: "x".into(),
                source: anyhow::anyhow!("boom")
            })
            .exit_code(),
            2
        );
        assert_eq!(CoreError::Numerical("nan".into()).exit_code(), 3);
    }
}
