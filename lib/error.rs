//! Error taxonomy shared by every table, cache, and assembly phase.
//!
//! Errors fall into three classes: inputs that cannot be represented with
//! the requested configuration ([`ConfigError`]), data that contradicts the
//! declared symmetry labels ([`SymmetryError`]), and violated table
//! invariants ([`InternalError`]). The last class always indicates a bug in
//! this crate rather than bad input.

use thiserror::Error;
use crate::expr::ExprError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid initial label (n = {n}, twos = {twos}) for {sites} site(s)")]
    InvalidInitialLabel { n: i16, twos: i16, sites: usize },

    #[error("duplicate initial label at positions {0} and {1}")]
    DuplicateInitialLabel(usize, usize),

    #[error("per-site symmetry labels: expected {expected}, got {got}")]
    SiteLabelCount { expected: usize, got: usize },

    #[error("basis index {0} out of range for a table of size {1}")]
    IndexOutOfRange(u64, u64),

    #[error("invalid step character '{0}' in occupation string")]
    InvalidStep(char),

    #[error("occupation string has {got} step(s), expected {expected}")]
    StringLength { expected: usize, got: usize },

    #[error("pattern not found: sub-expression '{sub}' with spin delta {dq} in '{expr}'")]
    PatternNotFound { expr: String, sub: String, dq: i16 },

    #[error("index tuple {indices:?} does not fit expression '{expr}'")]
    BadIndexTuple { expr: String, indices: Vec<u16> },

    #[error("nonzero count {0} exceeds the 32-bit index width")]
    IndexOverflow(usize),

    #[error("operator spin {0} exceeds the recoupling factor cache bound {1}")]
    FactorBound(i16, i16),

    #[error("coefficient buffer has length {got}, expected {expected}")]
    BufferLength { expected: usize, got: usize },

    #[error("operator assembly requires the SU(2) spin scheme")]
    SpinProjected,

    #[error("operator {op} carries intermediate spin {s}; only 0 and 1 are supported")]
    OperatorSpin { op: String, s: u8 },

    #[error("big site of {n_orbs} orbital(s) does not fit in {n_all} orbital(s)")]
    OrbitalCount { n_orbs: usize, n_all: usize },

    #[error("integral arrays: one-electron shape {t:?}, two-electron shape {v:?}")]
    IntegralShape { t: Vec<usize>, v: Vec<usize> },

    #[error("thread pool: {0}")]
    ThreadPool(String),

    #[error("expression error: {0}")]
    Expr(#[from] ExprError),
}

#[derive(Debug, Error)]
pub enum SymmetryError {
    #[error("occupation string '{0}' is not in the basis")]
    StringNotInBasis(String),

    #[error("entry '{expr}' {indices:?}: symmetry label unreachable in the operator table")]
    UnreachableEntry { expr: String, indices: Vec<u16> },

    #[error("sector label {0} is absent from the table")]
    MissingSector(String),

    #[error("operator {op} cannot connect ket {ket} to bra {bra}")]
    InadmissibleSector { bra: String, ket: String, op: String },

    #[error("duplicate terminal match for pattern {pattern:?} of '{expr}' (pg {pg})")]
    DuplicateMatch { expr: String, pattern: Vec<u16>, pg: u8 },
}

#[derive(Debug, Error)]
pub enum InternalError {
    #[error("followed a missing edge at row {row}, step {step}")]
    MissingEdge { row: usize, step: usize },

    #[error("weight prefix of row {0} is not monotone")]
    WeightOrder(usize),

    #[error("recoupling factor outside the cache bounds")]
    FactorLookup,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("symmetry error: {0}")]
    Symmetry(#[from] SymmetryError),

    #[error("internal consistency error: {0}")]
    Internal(#[from] InternalError),
}

impl From<ExprError> for Error {
    fn from(err: ExprError) -> Self { Self::Config(err.into()) }
}

pub type BigSiteResult<T> = Result<T, Error>;
