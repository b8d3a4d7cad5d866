//! Site-ordered recoupling of operator expressions.
//!
//! Operator row tables only know about expressions whose operators are sorted
//! by site and coupled linearly: every run of operators sitting on one site is
//! coupled left-to-right, then the runs themselves are coupled left-to-right
//! from the innermost site outward. A general term like
//! `((C_i+(C_j+D_k)0)1+D_l)0` is first rewritten as a linear combination of such
//! terms. The coefficients are overlaps between the SU(2) coupling
//! coefficients of the two trees, times the fermionic sign of the reordering.

use std::ops::Range;
use itertools::Itertools;
use log::debug;
use rustc_hash::FxHashMap as HashMap;
use crate::{
    cg::SU2CG,
    error::{ BigSiteResult, ConfigError },
    expr::{ ElemOp, OpExpr },
    local::LocalMatrix,
};

/// Maximal runs of equal consecutive values.
pub fn runs<T: PartialEq>(xs: &[T]) -> Vec<Range<usize>> {
    let mut acc: Vec<Range<usize>> = Vec::new();
    let mut k = 0;
    for l in 1..=xs.len() {
        if l == xs.len() || xs[l] != xs[k] {
            acc.push(k..l);
            k = l;
        }
    }
    acc
}

/// Rank of each index among the distinct values of `idxs`.
pub fn class_pattern(idxs: &[u16]) -> Vec<u16> {
    let distinct: Vec<u16> = idxs.iter().copied().sorted_unstable().dedup().collect();
    idxs.iter()
        .map(|i| distinct.partition_point(|d| d < i) as u16)
        .collect()
}

/// Site-class pattern together with every linearly coupled expression that
/// realizes it.
#[derive(Clone, Debug, PartialEq)]
pub struct RecouplingScheme {
    /// Non-decreasing class label of every operator position.
    pub pattern: Vec<u16>,
    pub exprs: Vec<OpExpr>,
}

impl RecouplingScheme {
    /// Enumerate the schemes reachable from `expr` by placing its operators
    /// on any arrangement of sites.
    pub fn enumerate(expr: &OpExpr, cg: &SU2CG) -> Vec<Self> {
        let mut recoupler = Recoupler::new(cg);
        let nn = expr.count_ops();
        let ops = expr.leaves();
        let mut schemes: Vec<Self> = Vec::new();
        for f in surjections(nn) {
            let (perm, pattern) = sort_by_class(&f);
            let sorted: Vec<ElemOp> = perm.iter().map(|&p| ops[p]).collect();
            let trees = recoupler.linear_couplings(&sorted, &pattern, expr.twos());
            if trees.is_empty() { continue; }
            let pos = match schemes.iter().position(|s| s.pattern == pattern) {
                Some(pos) => pos,
                None => {
                    schemes.push(Self { pattern, exprs: Vec::new() });
                    schemes.len() - 1
                },
            };
            let scheme = &mut schemes[pos];
            for tree in trees {
                if !scheme.exprs.contains(&tree) { scheme.exprs.push(tree); }
            }
        }
        debug!("{}: {} recoupling scheme(s)", expr, schemes.len());
        schemes
    }
}

// all maps from `nn` positions onto some prefix `0..m` of class labels
fn surjections(nn: usize) -> Vec<Vec<u16>> {
    (0..nn).map(|_| 0..nn as u16)
        .multi_cartesian_product()
        .filter(|f| {
            let m = f.iter().copied().max().map(|x| x + 1).unwrap_or(0);
            (0..m).all(|c| f.contains(&c))
        })
        .collect()
}

// stable sort of positions by class
fn sort_by_class(f: &[u16]) -> (Vec<usize>, Vec<u16>) {
    let perm: Vec<usize> = (0..f.len()).sorted_by_key(|&p| f[p]).collect();
    let pattern: Vec<u16> = perm.iter().map(|&p| f[p]).collect();
    (perm, pattern)
}

// sign of the permutation restricted to operators on different sites
fn reorder_sign(f: &[u16]) -> f64 {
    let swaps = (0..f.len())
        .tuple_combinations()
        .filter(|&(a, b)| f[a] > f[b])
        .count();
    if swaps % 2 == 0 { 1.0 } else { -1.0 }
}

// SU(2) coupling coefficients of `expr` at total projection `tq`, keyed by
// the projections of the individual operators
fn projections(expr: &OpExpr, tq: i32, cg: &SU2CG) -> Vec<(Vec<i8>, f64)> {
    match expr {
        OpExpr::Leaf(_) => {
            if tq.abs() == 1 { vec![(vec![tq as i8], 1.0)] } else { Vec::new() }
        },
        OpExpr::Couple(l, r, twos) => {
            let (ka, kb, k) = (l.twos() as i32, r.twos() as i32, *twos as i32);
            let mut acc: Vec<(Vec<i8>, f64)> = Vec::new();
            for tqa in (-ka..=ka).step_by(2) {
                let tqb = tq - tqa;
                if tqb.abs() > kb { continue; }
                let c = cg.cg(ka, kb, k, tqa, tqb, tq);
                if c == 0.0 { continue; }
                let left = projections(l, tqa, cg);
                let right = projections(r, tqb, cg);
                for ((ma, va), (mb, vb)) in left.iter().cartesian_product(right.iter()) {
                    let m: Vec<i8> = ma.iter().chain(mb.iter()).copied().collect();
                    acc.push((m, c * va * vb));
                }
            }
            acc
        },
    }
}

/// Rewrites expressions into site-ordered linear couplings, caching by
/// operator sequence and relative site order.
#[derive(Debug)]
pub struct Recoupler<'a> {
    cg: &'a SU2CG,
    run_trees: HashMap<Vec<ElemOp>, Vec<OpExpr>>,
}

impl<'a> Recoupler<'a> {
    pub fn new(cg: &'a SU2CG) -> Self {
        Self { cg, run_trees: HashMap::default() }
    }

    // left-nested couplings of operators on one site, dropping those whose
    // local matrix vanishes
    fn run_trees(&mut self, ops: &[ElemOp]) -> Vec<OpExpr> {
        if let Some(trees) = self.run_trees.get(ops) { return trees.clone(); }
        let mut trees: Vec<OpExpr> = vec![OpExpr::Leaf(ops[0])];
        for &op in ops[1..].iter() {
            trees = trees.into_iter()
                .flat_map(|t| {
                    let s = t.twos();
                    [s - 1, s + 1].into_iter()
                        .filter(|&twos| twos >= 0)
                        .map(move |twos| {
                            OpExpr::Couple(
                                Box::new(t.clone()), Box::new(OpExpr::Leaf(op)), twos)
                        })
                })
                .collect();
        }
        trees.retain(|t| !LocalMatrix::from_expr(Some(t), self.cg).is_zero());
        self.run_trees.insert(ops.to_vec(), trees.clone());
        trees
    }

    /// Every linear coupling of site-sorted operators `ops` with class
    /// `pattern` to total spin `twos`.
    pub fn linear_couplings(&mut self, ops: &[ElemOp], pattern: &[u16], twos: i16)
        -> Vec<OpExpr>
    {
        let mut acc: Option<Vec<OpExpr>> = None;
        for run in runs(pattern) {
            let trees = self.run_trees(&ops[run]);
            acc = Some(match acc {
                None => trees,
                Some(prev) => {
                    prev.iter()
                        .cartesian_product(trees.iter())
                        .flat_map(|(a, r)| {
                            let (sa, sr) = (a.twos(), r.twos());
                            ((sa - sr).abs()..=sa + sr).step_by(2)
                                .map(move |s| {
                                    OpExpr::Couple(
                                        Box::new(a.clone()), Box::new(r.clone()), s)
                                })
                        })
                        .collect()
                },
            });
        }
        let mut acc = acc.unwrap_or_default();
        acc.retain(|t| t.twos() == twos);
        acc
    }

    /// Expand `expr`, with its operators placed on sites of relative order
    /// `classes`, into site-ordered linear couplings and their coefficients.
    pub fn recouple(&mut self, expr: &OpExpr, classes: &[u16]) -> Vec<(OpExpr, f64)> {
        let ops = expr.leaves();
        let (perm, pattern) = sort_by_class(classes);
        let sorted: Vec<ElemOp> = perm.iter().map(|&p| ops[p]).collect();
        let k = expr.twos() as i32;
        let orig: HashMap<Vec<i8>, f64> = projections(expr, k, self.cg).into_iter()
            .map(|(m, v)| (perm.iter().map(|&p| m[p]).collect(), v))
            .collect();
        let sign = reorder_sign(classes);
        let cg = self.cg;
        self.linear_couplings(&sorted, &pattern, expr.twos()).into_iter()
            .filter_map(|tree| {
                let overlap: f64 = projections(&tree, k, cg).into_iter()
                    .map(|(m, v)| orig.get(&m).copied().unwrap_or(0.0) * v)
                    .sum();
                (overlap.abs() > 1e-12).then_some((tree, sign * overlap))
            })
            .collect()
    }
}

/// Operator terms grouped by expression: `indices[i]` holds the flattened
/// site tuples and `data[i]` the coefficients of `exprs[i]`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TermList {
    pub exprs: Vec<OpExpr>,
    pub indices: Vec<Vec<u16>>,
    pub data: Vec<Vec<f64>>,
}

impl TermList {
    pub fn new() -> Self { Self::default() }

    /// Append one term. `idxs` must hold one index per operator of `expr`.
    pub fn push(&mut self, expr: &OpExpr, idxs: &[u16], value: f64)
        -> BigSiteResult<()>
    {
        if idxs.len() != expr.count_ops() {
            return Err(ConfigError::BadIndexTuple {
                expr: expr.to_string(), indices: idxs.to_vec() }.into());
        }
        let ix = match self.exprs.iter().position(|x| x == expr) {
            Some(ix) => ix,
            None => {
                self.exprs.push(expr.clone());
                self.indices.push(Vec::new());
                self.data.push(Vec::new());
                self.exprs.len() - 1
            },
        };
        self.indices[ix].extend_from_slice(idxs);
        self.data[ix].push(value);
        Ok(())
    }

    /// Total number of terms.
    pub fn len(&self) -> usize { self.data.iter().map(|d| d.len()).sum() }

    /// Return `true` if there are no terms.
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Iterate over `(expression, site tuple, coefficient)`.
    pub fn iter(&self) -> impl Iterator<Item = (&OpExpr, &[u16], f64)> + '_ {
        self.exprs.iter().enumerate()
            .flat_map(move |(ix, expr)| {
                self.indices[ix].chunks(expr.count_ops())
                    .zip(self.data[ix].iter())
                    .map(move |(idxs, &v)| (expr, idxs, v))
            })
    }

    /// Rewrite every term into site-ordered linear couplings, dropping
    /// coefficients with magnitude at most `cutoff`.
    pub fn site_ordered(&self, cg: &SU2CG, cutoff: f64) -> Self {
        let mut recoupler = Recoupler::new(cg);
        let mut cache: HashMap<(usize, Vec<u16>), Vec<(OpExpr, f64)>>
            = HashMap::default();
        let mut positions: HashMap<OpExpr, usize> = HashMap::default();
        let mut out = Self::new();
        for (ix, expr) in self.exprs.iter().enumerate() {
            let nn = expr.count_ops();
            for (idxs, &v) in self.indices[ix].chunks(nn).zip(self.data[ix].iter()) {
                let classes = class_pattern(idxs);
                let sorted: Vec<u16> = idxs.iter().copied().sorted().collect();
                let expansion = cache.entry((ix, classes))
                    .or_insert_with_key(|(_, classes)| recoupler.recouple(expr, classes));
                for (tree, c) in expansion.iter() {
                    let value = c * v;
                    if value.abs() <= cutoff { continue; }
                    let jx = *positions.entry(tree.clone())
                        .or_insert_with(|| {
                            out.exprs.push(tree.clone());
                            out.indices.push(Vec::new());
                            out.data.push(Vec::new());
                            out.exprs.len() - 1
                        });
                    out.indices[jx].extend_from_slice(&sorted);
                    out.data[jx].push(value);
                }
            }
        }
        debug!("recoupled {} term(s) into {} term(s)", self.len(), out.len());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool { (a - b).abs() < 1e-12 }

    #[test]
    fn runs_and_classes() {
        assert_eq!(runs(&[0, 0, 1, 2, 2]), vec![0..2, 2..3, 3..5]);
        assert_eq!(runs::<u16>(&[]), Vec::<Range<usize>>::new());
        assert_eq!(class_pattern(&[3, 1, 1, 0]), vec![2, 1, 1, 0]);
        assert_eq!(surjections(2), vec![vec![0, 0], vec![0, 1], vec![1, 0]]);
        assert_eq!(surjections(3).len(), 13);
        assert_eq!(reorder_sign(&[1, 0]), -1.0);
        assert_eq!(reorder_sign(&[0, 0]), 1.0);
        assert_eq!(reorder_sign(&[2, 1, 1, 0]), -1.0);
    }

    #[test]
    fn pair_schemes() {
        let cg = SU2CG::default();
        let x: OpExpr = "(C+D)0".parse().unwrap();
        let schemes = RecouplingScheme::enumerate(&x, &cg);
        assert_eq!(schemes.len(), 2);
        assert_eq!(schemes[0].pattern, vec![0, 0]);
        assert_eq!(schemes[0].exprs, vec![x.clone()]);
        assert_eq!(schemes[1].pattern, vec![0, 1]);
        let texts: Vec<String> = schemes[1].exprs.iter().map(|e| e.to_string()).collect();
        assert_eq!(texts, vec!["(C+D)0", "(D+C)0"]);
    }

    #[test]
    fn reorder_singlet_pair() {
        // (C_1 D_0)^0 = (D_0 C_1)^0: the fermionic sign cancels against the
        // antisymmetry of the singlet coupling
        let cg = SU2CG::default();
        let x: OpExpr = "(C+D)0".parse().unwrap();
        let mut recoupler = Recoupler::new(&cg);
        let terms = recoupler.recouple(&x, &[1, 0]);
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].0.to_string(), "(D+C)0");
        assert!(approx_eq(terms[0].1, 1.0));
        let terms = recoupler.recouple(&x, &[0, 1]);
        assert_eq!(terms.len(), 1);
        assert!(approx_eq(terms[0].1, 1.0));
        let y: OpExpr = "(C+D)2".parse().unwrap();
        let terms = recoupler.recouple(&y, &[1, 0]);
        assert_eq!(terms[0].0.to_string(), "(D+C)2");
        assert!(approx_eq(terms[0].1, -1.0));
    }

    #[test]
    fn reorder_two_body() {
        // moving the last operator to the front of a singlet four-operator
        // product must preserve the norm of the coupling coefficients
        let cg = SU2CG::default();
        let x: OpExpr = "((C+(C+D)0)1+D)0".parse().unwrap();
        let mut recoupler = Recoupler::new(&cg);
        let terms = recoupler.recouple(&x, &[1, 2, 3, 0]);
        let norm: f64 = terms.iter().map(|(_, c)| c * c).sum();
        assert!(approx_eq(norm, 1.0));
        for (tree, _) in terms.iter() {
            assert_eq!(tree.leaves()[0], ElemOp::D);
            assert_eq!(tree.twos(), 0);
        }
    }

    #[test]
    fn site_ordered_terms() {
        let cg = SU2CG::default();
        let x: OpExpr = "(C+D)0".parse().unwrap();
        let mut terms = TermList::new();
        terms.push(&x, &[0, 1], 1.0).unwrap();
        terms.push(&x, &[1, 0], 1.0).unwrap();
        terms.push(&x, &[2, 2], 0.5).unwrap();
        let sorted = terms.site_ordered(&cg, 1e-14);
        assert_eq!(sorted.len(), 3);
        let find = |text: &str, idxs: &[u16]| -> f64 {
            sorted.iter()
                .find(|(e, i, _)| e.to_string() == text && *i == idxs)
                .map(|(_, _, v)| v)
                .unwrap()
        };
        assert!(approx_eq(find("(C+D)0", &[0, 1]), 1.0));
        assert!(approx_eq(find("(D+C)0", &[0, 1]), 1.0));
        assert!(approx_eq(find("(C+D)0", &[2, 2]), 0.5));
        assert!(terms.push(&x, &[0, 1, 2], 1.0).is_err());
        assert_eq!(terms.len(), 3);
    }
}
