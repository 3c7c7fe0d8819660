// =============================================================================
// Error Types
// =============================================================================
//
// A single error enum is shared by every module. Only genuinely fatal
// conditions end up here: inconsistent input shapes, invalid parameters and
// count tables that make a log-ratio undefined.
//
// Border cases (a single patch, a collapsed search interval) and
// non-convergence are NOT errors. They are reported through the result
// structs so the caller always gets a usable estimate back.
//
// =============================================================================

use thiserror::Error;

/// Errors raised by the estimation pipeline.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BinlessError {
    /// Two inputs that must have matching lengths do not.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// An input that must contain data is empty.
    #[error("empty input: {0}")]
    EmptyInput(String),

    /// A parameter or data value is outside its valid range.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// A bin pair does not describe a cell of the upper-triangular grid.
    #[error("invalid bin pair ({bin1}, {bin2}) for a grid with {nbins} bins")]
    InvalidBin { bin1: usize, bin2: usize, nbins: usize },

    /// A counter diagonal has zero total observed count, so its log-ratio
    /// decay estimate is undefined.
    #[error("counter diagonal {diagonal} has zero total observed count")]
    ZeroCounterDiagonal { diagonal: usize },

    /// A solution was requested before any optimization round was run.
    #[error("fused lasso solution requested before optimize was called")]
    NotOptimized,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BinlessError>;
