//! Error taxonomy for the array engine.
//!
//! Every failure is raised synchronously at the point of detection, before any
//! buffer is written. One enum per kind, wrapped by [`Error`] with `#[from]`
//! conversions so engine code can use `?` across kinds.

use thiserror::Error;

use crate::dim::Dim;
use crate::element::DType;
use crate::unit::Unit;

/// Shape or label invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DimensionError {
    #[error("duplicate dimension label {0}")]
    DuplicateLabel(Dim),

    #[error("dimension {0} not found")]
    NotFound(Dim),

    #[error("rank would exceed the maximum of {max}")]
    RankOverflow { max: usize },

    #[error("negative extent {0}")]
    NegativeExtent(i64),

    #[error("extent mismatch for {dim}: {a} vs {b}")]
    ExtentMismatch { dim: Dim, a: i64, b: i64 },

    #[error("slice [{begin}, {end}) out of range for {dim} of extent {extent}")]
    SliceOutOfRange {
        dim: Dim,
        begin: i64,
        end: i64,
        extent: i64,
    },

    #[error("invalid slice step {0}, must be positive")]
    InvalidStep(i64),

    #[error("dimensions {0:?} are not a contiguous, order-matching block")]
    NotContiguous(Vec<Dim>),

    #[error("fold of {dim} with extent {extent} does not preserve volume {volume}")]
    VolumeMismatch { dim: Dim, extent: i64, volume: i64 },

    #[error("invalid transpose order {0:?}")]
    InvalidOrder(Vec<Dim>),

    #[error("cannot broadcast {dim} from extent {from} to {to}")]
    CannotBroadcast { dim: Dim, from: i64, to: i64 },

    #[error("in-place operand would need to grow along {0}")]
    InPlaceBroadcast(Dim),
}

/// Incompatible or unsupported unit combinations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    #[error("incompatible units {a} and {b}")]
    Incompatible { a: Unit, b: Unit },

    #[error("unit exponent overflow")]
    ExponentOverflow,

    #[error("unit {0} has no integer square root")]
    NonIntegerRoot(Unit),

    #[error("expected dimensionless operand, got {0}")]
    NotDimensionless(Unit),
}

/// Variances present or absent where forbidden, or a variance-unaware
/// operation requested on data that carries them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VariancesError {
    #[error("dtype {0} cannot have variances")]
    Unsupported(DType),

    #[error("variable has no variances")]
    Missing,

    #[error("operation {op} has no variance overload for dtype {dtype}")]
    NoVarianceOverload { op: &'static str, dtype: DType },

    #[error("operation {op} accepts only variance-free values for argument {argument}")]
    ValuesOnlyArgument { op: &'static str, argument: usize },

    #[error("operands disagree on the presence of variances")]
    PresenceMismatch,

    #[error("variances length {variances} does not match values length {values}")]
    LengthMismatch { values: usize, variances: usize },

    #[error("cannot set variances through a slice of a larger buffer")]
    SetThroughSlice,
}

/// No dtype overload matches the requested operand combination.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DTypeError {
    #[error("operation {op} has no overload for dtype {dtype}")]
    NoOverload { op: &'static str, dtype: DType },

    #[error("dtype mismatch: {a} vs {b}")]
    Mismatch { a: DType, b: DType },

    #[error("expected dtype {expected}, got {actual}")]
    Unexpected { expected: DType, actual: DType },
}

/// Mismatched bin structure across co-iterated binned operands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BinnedDataError {
    #[error(
        "bin size mismatch between operands {lhs_operand} and {rhs_operand} \
         at bin {bin}: {lhs_size} vs {rhs_size}"
    )]
    BinSizeMismatch {
        lhs_operand: usize,
        rhs_operand: usize,
        bin: usize,
        lhs_size: usize,
        rhs_size: usize,
    },

    #[error("bin {bin} range [{begin}, {end}) exceeds inner buffer extent {extent}")]
    RangeOutOfBounds {
        bin: usize,
        begin: usize,
        end: usize,
        extent: usize,
    },

    #[error("expected {expected} bin ranges for the outer shape, got {actual}")]
    RangeCountMismatch { expected: usize, actual: usize },

    #[error("variable is not binned")]
    NotBinned,
}

/// Misuse of a `Variable` handle itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VariableError {
    #[error("attempt to mutate a readonly variable")]
    Readonly,

    #[error("values length {actual} does not match volume {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("expected a scalar (rank-0) variable, got rank {0}")]
    NotScalar(usize),
}

/// Any failure the engine can raise.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Dimension(#[from] DimensionError),

    #[error(transparent)]
    Unit(#[from] UnitError),

    #[error(transparent)]
    Variances(#[from] VariancesError),

    #[error(transparent)]
    DType(#[from] DTypeError),

    #[error(transparent)]
    BinnedData(#[from] BinnedDataError),

    #[error(transparent)]
    Variable(#[from] VariableError),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
