//! This package builds spin-adapted many-body bases and operator matrices for
//! a *big site*: a contiguous block of spatial orbitals treated as a single
//! site of a larger tensor-network calculation.
//!
//! - [`drt`] indexes configuration state functions through a distinct row
//! table, mapping occupation strings to dense indices and back.
//! - [`hdrt`] indexes operator terms through an analogous table over operator
//! insertions, so that integral coefficients live in a flat buffer.
//! - [`integrals`] distributes one- and two-electron integrals into those
//! buffers, and [`assemble`] turns a buffer into sector-resolved matrices by
//! walking bra and ket paths together.
//! - [`site`] ties everything together for the operator families of
//! [`ops`], for big sites at either end of the orbital chain.
//!
//! Spin coupling is handled by [`expr`] (coupled operator expressions),
//! [`scheme`] (site-ordered recoupling), [`local`] (one-orbital reduced
//! matrix elements), [`factors`] (per-site 9j recoupling factors), and
//! [`cg`] (Clebsch-Gordan, 6j, and 9j symbols).
//!
//! # Further reading
//! - I. Shavitt, "Graph theoretical concepts for the unitary group approach to
//! the many-electron correlation problem." Int. J. Quantum Chem. **12**, 131
//! (1977)
//! - J. Paldus, "Group theoretical approach to the configuration interaction
//! and perturbation theory calculations for atomic and molecular systems."
//! J. Chem. Phys. **61**, 5321 (1974)
//!

pub mod assemble;
pub mod cg;
pub mod drt;
pub mod error;
pub mod expr;
pub mod factors;
#[cfg(test)]
pub(crate) mod fock;
pub mod hdrt;
pub mod integrals;
pub mod local;
pub mod matrix;
pub mod ops;
pub mod quanta;
pub mod scheme;
pub mod site;

pub use crate::{
    assemble::AssemblerConfig,
    drt::Drt,
    error::{ BigSiteResult, Error },
    hdrt::Hdrt,
    integrals::{ IntegralSource, Integrals },
    matrix::{ MatrixData, OperatorBlock, SectorMatrix },
    ops::{ OpFamily, OpKind, Side },
    quanta::{ Quanta, SpinScheme, PG },
    site::BigSite,
};
