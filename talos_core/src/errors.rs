// talos_core/src/errors.rs

use thiserror::Error;

/// Fatal errors detected while wiring an estimator together.
///
/// A malformed filter topology has no safe runtime fallback, so every variant
/// here aborts construction: no estimator is produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("state slot `{name}` registered with dimension {second} after dimension {first}")]
    AmbiguousSlotDimension {
        name: String,
        first: usize,
        second: usize,
    },

    #[error("input port `{name}` registered with dimension {second} after dimension {first}")]
    AmbiguousPortDimension {
        name: String,
        first: usize,
        second: usize,
    },

    #[error(
        "element `{element}` produced a {rows}x{cols} block for `{target}`, expected {expected_rows}x{expected_cols}"
    )]
    BlockDimensionMismatch {
        element: String,
        target: String,
        rows: usize,
        cols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },

    #[error("state slot `{name}` is advanced by more than one process model element")]
    DuplicateSlotOwner { name: String },

    #[error("state slot `{name}` is coupled into a group that contains no element advancing it")]
    UnownedCoupledSlot { name: String, element: String },

    #[error("state slot `{name}` is shared between the continuous-time and discrete-time partitions")]
    SharedTimeDomainSlots { name: String },

    #[error("estimator has no registered state slots")]
    EmptyStateVector,

    #[error("slot offsets are not assigned until the process model is constructed")]
    OffsetsNotAssigned,

    #[error("sensor `{sensor}` requires the `{port}` port to be wired")]
    MissingPort { sensor: String, port: String },

    #[error("covariance for `{name}` is {rows}x{cols}, expected {expected}x{expected}")]
    CovarianceDimensionMismatch {
        name: String,
        rows: usize,
        cols: usize,
        expected: usize,
    },

    #[error("sensor `{sensor}` reads center-of-mass state, but CoM estimation is disabled")]
    SensorRequiresComEstimation { sensor: String },
}

/// Recoverable numerical failures during steady-state operation.
///
/// These are reported to the caller but never poison the filter state: the
/// offending update is skipped and `(x, P)` are left untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NumericalError {
    #[error("innovation covariance is not positive definite; measurement update skipped")]
    IndefiniteInnovation,
}
