//! Reduced single-site matrix elements of coupled operator expressions.
//!
//! A single spatial orbital carries three spin-adapted states: empty
//! (spin 0), singly occupied (spin 1/2), and doubly occupied (spin 0).
//! Matrices here are stored in row-table step indices, where the singly
//! occupied state appears twice (steps 1 and 2) because the step also records
//! how the site couples to the spin of the sites below it.
//!
//! Reduced elements follow `<j' m'| T^K_Q |j m> = <j m K Q | j' m'> <j'||T^K||j>`.

use ndarray as nd;
use crate::{
    cg::SU2CG,
    expr::{ ElemOp, OpExpr },
};

// Fock basis: 0 = |0>, 1 = |up>, 2 = |dn>, 3 = |2> = a+_up a+_dn |0>
const FOCK_SPIN: [(i32, i32); 4] = [(0, 0), (1, 1), (1, -1), (0, 0)];
const FOCK_CLASS: [usize; 4] = [0, 1, 1, 2];

fn create_up() -> nd::Array2<f64> {
    let mut m = nd::Array2::zeros((4, 4));
    m[[1, 0]] = 1.0;
    m[[3, 2]] = 1.0;
    m
}

fn create_dn() -> nd::Array2<f64> {
    let mut m = nd::Array2::zeros((4, 4));
    m[[2, 0]] = 1.0;
    m[[3, 1]] = -1.0;
    m
}

/// Spherical components of `expr`, indexed by `(Q + K) / 2`.
fn components(expr: &OpExpr, cg: &SU2CG) -> Vec<nd::Array2<f64>> {
    match expr {
        // C_{+1/2} = a+_up, C_{-1/2} = a+_dn
        OpExpr::Leaf(ElemOp::C) => vec![create_dn(), create_up()],
        // D_{+1/2} = -a_dn, D_{-1/2} = a_up
        OpExpr::Leaf(ElemOp::D)
            => vec![create_up().reversed_axes(), -create_dn().reversed_axes()],
        OpExpr::Couple(l, r, twos) => {
            let (ka, kb, k) = (l.twos() as i32, r.twos() as i32, *twos as i32);
            let ca = components(l, cg);
            let cb = components(r, cg);
            (-k..=k).step_by(2)
                .map(|tq| {
                    let mut acc = nd::Array2::<f64>::zeros((4, 4));
                    for (ia, a) in ca.iter().enumerate() {
                        let tqa = 2 * ia as i32 - ka;
                        let tqb = tq - tqa;
                        if tqb.abs() > kb { continue; }
                        let ib = ((tqb + kb) / 2) as usize;
                        let f = cg.cg(ka, kb, k, tqa, tqb, tq);
                        if f == 0.0 { continue; }
                        acc.scaled_add(f, &a.dot(&cb[ib]));
                    }
                    acc
                })
                .collect()
        },
    }
}

/// Reduced matrix of one local operator, expanded to step indices.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalMatrix {
    /// Doubled spin of the operator.
    pub twos: i16,
    /// `(bra step, ket step, reduced element)`.
    pub entries: Vec<(u8, u8, f64)>,
}

impl LocalMatrix {
    /// The identity operator.
    pub fn identity() -> Self {
        Self::from_reduced(0, &[(0, 0, 1.0), (1, 1, 1.0), (2, 2, 1.0)])
    }

    /// Build the reduced matrix of `expr` (`None` is the identity).
    pub fn from_expr(expr: Option<&OpExpr>, cg: &SU2CG) -> Self {
        let Some(expr) = expr else { return Self::identity(); };
        let k = expr.twos() as i32;
        let comps = components(expr, cg);
        let mut reduced: Vec<(usize, usize, f64)> = Vec::new();
        for bra_class in 0..3 {
            for ket_class in 0..3 {
                if let Some(v) = reduce(&comps, k, bra_class, ket_class, cg) {
                    if v.abs() > 1e-14 { reduced.push((bra_class, ket_class, v)); }
                }
            }
        }
        Self::from_reduced(expr.twos(), &reduced)
    }

    // expand spatial classes {empty, single, double} to steps {0, 1|2, 3}
    fn from_reduced(twos: i16, reduced: &[(usize, usize, f64)]) -> Self {
        fn steps(class: usize) -> &'static [u8] {
            match class {
                0 => &[0],
                1 => &[1, 2],
                _ => &[3],
            }
        }
        let entries = reduced.iter()
            .flat_map(|&(b, k, v)| {
                steps(b).iter()
                    .flat_map(move |&db| steps(k).iter().map(move |&dk| (db, dk, v)))
            })
            .collect();
        Self { twos, entries }
    }

    /// Return `true` if every reduced element vanishes.
    pub fn is_zero(&self) -> bool { self.entries.is_empty() }

    /// Entries with a given bra step.
    pub fn with_bra(&self, step: u8) -> impl Iterator<Item = &(u8, u8, f64)> + '_ {
        self.entries.iter().filter(move |(b, _, _)| *b == step)
    }
}

fn reduce(
    comps: &[nd::Array2<f64>],
    k: i32,
    bra_class: usize,
    ket_class: usize,
    cg: &SU2CG,
) -> Option<f64>
{
    for (f_bra, &(jb, mb)) in FOCK_SPIN.iter().enumerate() {
        if FOCK_CLASS[f_bra] != bra_class { continue; }
        for (f_ket, &(jk, mk)) in FOCK_SPIN.iter().enumerate() {
            if FOCK_CLASS[f_ket] != ket_class { continue; }
            let tq = mb - mk;
            if tq.abs() > k { continue; }
            let c = cg.cg(jk, k, jb, mk, tq, mb);
            if c.abs() < 1e-12 { continue; }
            let iq = ((tq + k) / 2) as usize;
            return Some(comps[iq][[f_bra, f_ket]] / c);
        }
    }
    None
}
