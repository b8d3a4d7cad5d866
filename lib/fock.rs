//! Determinant-space reference operators for checking assembled blocks.
//!
//! Determinants of `n` spatial orbitals are bit strings over `2n` spin
//! orbitals, where bit `2p` is orbital `p` with spin up and bit `2p + 1` the
//! same orbital with spin down. Operators are dense matrices over all `4^n`
//! determinants, so this is only meant for a handful of orbitals.

use ndarray as nd;
use crate::{
    cg::SU2CG,
    expr::{ ElemOp, OpExpr },
    integrals::IntegralSource,
    quanta::{ Quanta, PG },
};

/// Annihilate (`create = false`) or create spin orbital `so` in `det`, with
/// the sign of the operators passed over.
pub fn apply(det: usize, so: usize, create: bool) -> Option<(f64, usize)> {
    let bit = 1_usize << so;
    if (det & bit != 0) == create { return None; }
    let sign = if (det & (bit - 1)).count_ones() % 2 == 0 { 1.0 } else { -1.0 };
    Some((sign, det ^ bit))
}

/// Apply a product of `(spin orbital, create)` factors, rightmost first.
pub fn apply_string(det: usize, ops: &[(usize, bool)]) -> Option<(f64, usize)> {
    ops.iter().rev()
        .try_fold((1.0, det), |(s, d), &(so, create)| {
            apply(d, so, create).map(|(s1, d1)| (s * s1, d1))
        })
}

/// Submatrix of `m` on the given rows and columns.
pub fn block(m: &nd::Array2<f64>, rows: &[usize], cols: &[usize]) -> nd::Array2<f64> {
    nd::Array2::from_shape_fn((rows.len(), cols.len()), |(i, j)| m[[rows[i], cols[j]]])
}

/// Eigenvalues in ascending order and the matching eigenvectors (as columns)
/// of a symmetric matrix, by cyclic Jacobi rotations.
pub fn eigh(a: &nd::Array2<f64>) -> (Vec<f64>, nd::Array2<f64>) {
    let n = a.nrows();
    let mut a = a.to_owned();
    let mut v: nd::Array2<f64> = nd::Array2::eye(n);
    let scale: f64 = a.iter().map(|x| x * x).sum::<f64>().max(1.0);
    for _ in 0..100 {
        let off: f64 = (0..n)
            .flat_map(|p| (0..n).filter(move |&q| q != p).map(move |q| (p, q)))
            .map(|(p, q)| a[[p, q]] * a[[p, q]])
            .sum();
        if off <= 1e-30 * scale { break; }
        for p in 0..n {
            for q in p + 1..n {
                let apq = a[[p, q]];
                if apq == 0.0 { continue; }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for k in 0..n {
                    let (akp, akq) = (a[[k, p]], a[[k, q]]);
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let (apk, aqk) = (a[[p, k]], a[[q, k]]);
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let (vkp, vkq) = (v[[k, p]], v[[k, q]]);
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| a[[i, i]].total_cmp(&a[[j, j]]));
    let vals: Vec<f64> = order.iter().map(|&i| a[[i, i]]).collect();
    let vecs = nd::Array2::from_shape_fn((n, n), |(k, i)| v[[k, order[i]]]);
    (vals, vecs)
}

pub fn eigvalsh(a: &nd::Array2<f64>) -> Vec<f64> { eigh(a).0 }

/// Fock space of a few spatial orbitals with point-group irreps.
#[derive(Clone, Debug)]
pub struct Fock {
    orb_sym: Vec<PG>,
}

impl Fock {
    pub fn new(orb_sym: &[PG]) -> Self { Self { orb_sym: orb_sym.to_vec() } }

    pub fn n_orbs(&self) -> usize { self.orb_sym.len() }

    pub fn dim(&self) -> usize { 1 << (2 * self.n_orbs()) }

    /// Matrix of a product of `(spin orbital, create)` factors.
    pub fn string(&self, ops: &[(usize, bool)]) -> nd::Array2<f64> {
        let mut m = nd::Array2::zeros((self.dim(), self.dim()));
        for det in 0..self.dim() {
            if let Some((s, d)) = apply_string(det, ops) { m[[d, det]] += s; }
        }
        m
    }

    /// Spherical component `twom` of `expr` with its operators placed on
    /// orbitals `idxs`, in the conventions of the one-orbital reduced
    /// matrices: `C` has components `a+_up`, `a+_dn` and `D` has components
    /// `-a_dn`, `a_up` for projections `+1/2`, `-1/2`.
    pub fn component(&self, expr: &OpExpr, idxs: &[usize], twom: i32, cg: &SU2CG)
        -> nd::Array2<f64>
    {
        match expr {
            OpExpr::Leaf(op) => {
                let p = idxs[0];
                match (op, twom) {
                    (ElemOp::C, 1) => self.string(&[(2 * p, true)]),
                    (ElemOp::C, -1) => self.string(&[(2 * p + 1, true)]),
                    (ElemOp::D, 1) => -self.string(&[(2 * p + 1, false)]),
                    (ElemOp::D, -1) => self.string(&[(2 * p, false)]),
                    _ => nd::Array2::zeros((self.dim(), self.dim())),
                }
            },
            OpExpr::Couple(l, r, k) => {
                let (kl, kr) = (l.twos() as i32, r.twos() as i32);
                let (il, ir) = idxs.split_at(l.count_ops());
                let mut acc = nd::Array2::zeros((self.dim(), self.dim()));
                for tql in (-kl..=kl).step_by(2) {
                    let tqr = twom - tql;
                    if tqr.abs() > kr { continue; }
                    let f = cg.cg(kl, kr, *k as i32, tql, tqr, twom);
                    if f == 0.0 { continue; }
                    let a = self.component(l, il, tql, cg);
                    let b = self.component(r, ir, tqr, cg);
                    acc.scaled_add(f, &a.dot(&b));
                }
                acc
            },
        }
    }

    /// Hamiltonian of the orbitals, where orbital `p` reads integral index
    /// `orbs[p]`.
    pub fn hamiltonian<I>(&self, ints: &I, orbs: &[usize]) -> nd::Array2<f64>
    where I: IntegralSource + ?Sized
    {
        let n = self.n_orbs();
        let mut h = nd::Array2::zeros((self.dim(), self.dim()));
        for det in 0..self.dim() {
            for p in 0..n {
                for q in 0..n {
                    let t = ints.t(orbs[p], orbs[q]);
                    if t == 0.0 { continue; }
                    for sp in 0..2 {
                        let ops = [(2 * p + sp, true), (2 * q + sp, false)];
                        if let Some((s, d)) = apply_string(det, &ops) {
                            h[[d, det]] += s * t;
                        }
                    }
                }
            }
            for p in 0..n {
                for q in 0..n {
                    for r in 0..n {
                        for t in 0..n {
                            let v = ints.v(orbs[p], orbs[q], orbs[r], orbs[t]);
                            if v == 0.0 { continue; }
                            for (sp, sr) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                                let ops = [
                                    (2 * p + sp, true),
                                    (2 * r + sr, true),
                                    (2 * t + sr, false),
                                    (2 * q + sp, false),
                                ];
                                if let Some((s, d)) = apply_string(det, &ops) {
                                    h[[d, det]] += 0.5 * s * v;
                                }
                            }
                        }
                    }
                }
            }
        }
        h
    }

    /// Determinants with `n` electrons, `2 S_z = twom` and irrep `pg`.
    pub fn states(&self, n: i16, twom: i16, pg: PG) -> Vec<usize> {
        (0..self.dim())
            .filter(|&det| {
                let (mut n_up, mut n_dn, mut g) = (0, 0, 0);
                for (p, &gp) in self.orb_sym.iter().enumerate() {
                    let up = det >> (2 * p) & 1;
                    let dn = det >> (2 * p + 1) & 1;
                    n_up += up as i16;
                    n_dn += dn as i16;
                    if up != dn { g ^= gp; }
                }
                n_up + n_dn == n && n_up - n_dn == twom && g == pg
            })
            .collect()
    }

    /// `S^2` on the span of `states`, which must share one `S_z`.
    pub fn spin_squared(&self, states: &[usize]) -> nd::Array2<f64> {
        let n = self.n_orbs();
        // S_+ = sum_p a+_{p up} a_{p dn}, kept as its columns over `states`
        let mut s_plus = nd::Array2::zeros((self.dim(), states.len()));
        for (col, &det) in states.iter().enumerate() {
            for p in 0..n {
                if let Some((s, d)) = apply_string(det, &[(2 * p, true), (2 * p + 1, false)]) {
                    s_plus[[d, col]] += s;
                }
            }
        }
        let sz = states.first()
            .map(|&det| {
                let up = (0..n).filter(|p| det >> (2 * p) & 1 == 1).count() as f64;
                let dn = (0..n).filter(|p| det >> (2 * p + 1) & 1 == 1).count() as f64;
                (up - dn) / 2.0
            })
            .unwrap_or(0.0);
        let mut s2 = s_plus.t().dot(&s_plus);
        s2.diag_mut().mapv_inplace(|x| x + sz * (sz + 1.0));
        s2
    }

    /// Determinants of label `q` at projection `M = S`, and an orthonormal
    /// basis (as columns over those determinants) of their spin-`S` states.
    pub fn spin_basis(&self, q: &Quanta) -> (Vec<usize>, nd::Array2<f64>) {
        let states = self.states(q.n, q.twos, q.pg);
        let (vals, vecs) = eigh(&self.spin_squared(&states));
        let s = q.twos as f64 / 2.0;
        let cols: Vec<usize> = vals.iter().enumerate()
            .filter(|&(_, &x)| (x - s * (s + 1.0)).abs() < 1e-8)
            .map(|(i, _)| i)
            .collect();
        let basis = nd::Array2::from_shape_fn(
            (states.len(), cols.len()), |(k, i)| vecs[[k, cols[i]]]);
        (states, basis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jacobi_eigenpairs() {
        let a = nd::arr2(&[
            [ 4.0, 1.0, -2.0, 2.0],
            [ 1.0, 2.0,  0.0, 1.0],
            [-2.0, 0.0,  3.0, -2.0],
            [ 2.0, 1.0, -2.0, -1.0],
        ]);
        let (vals, vecs) = eigh(&a);
        for w in vals.windows(2) { assert!(w[0] <= w[1]); }
        let recon = vecs.dot(&nd::Array2::from_diag(&nd::arr1(&vals))).dot(&vecs.t());
        for (x, y) in recon.iter().zip(a.iter()) {
            assert!((x - y).abs() < 1e-12);
        }
        let eye = vecs.t().dot(&vecs);
        for ((i, j), x) in eye.indexed_iter() {
            assert!((x - if i == j { 1.0 } else { 0.0 }).abs() < 1e-12);
        }
    }

    #[test]
    fn two_orbital_spin_states() {
        let fock = Fock::new(&[0, 1]);
        // one electron in each orbital: singlet and triplet at M = 0
        let states = fock.states(2, 0, 1);
        assert_eq!(states.len(), 2);
        let mut s2 = eigvalsh(&fock.spin_squared(&states));
        s2.iter_mut().for_each(|x| *x = (*x * 1e8).round() / 1e8);
        assert_eq!(s2, vec![0.0, 2.0]);
        let (_, singlet) = fock.spin_basis(&Quanta::new(2, 0, 1));
        assert_eq!(singlet.dim(), (2, 1));
        let (_, triplet) = fock.spin_basis(&Quanta::new(2, 2, 1));
        assert_eq!(triplet.dim(), (1, 1));
        // closed shells carry the trivial irrep
        assert_eq!(fock.states(2, 0, 0).len(), 2);
    }

    #[test]
    fn coupled_components() {
        let cg = SU2CG::default();
        let fock = Fock::new(&[0]);
        // (C+D)0 is the number operator over sqrt(2)
        let x: OpExpr = "(C+D)0".parse().unwrap();
        let n = fock.component(&x, &[0, 0], 0, &cg);
        for det in 0..fock.dim() {
            let count = det.count_ones() as f64;
            assert!((n[[det, det]] * 2.0_f64.sqrt() - count).abs() < 1e-12);
        }
        // (C+C)0 creates the closed shell from the vacuum
        let y: OpExpr = "(C+C)0".parse().unwrap();
        let pair = fock.component(&y, &[0, 0], 0, &cg);
        assert!((pair[[3, 0]].abs() - 2.0_f64.sqrt()).abs() < 1e-12);
    }
}
