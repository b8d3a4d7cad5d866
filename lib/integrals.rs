//! Integral sources and their distribution onto operator row tables.

use std::ops::Range;
use log::debug;
use ndarray as nd;
use rayon::prelude::*;
use rustc_hash::FxHashMap as HashMap;
use crate::{
    error::{ BigSiteResult, ConfigError, InternalError, SymmetryError },
    expr::OpExpr,
    hdrt::Hdrt,
    quanta::{ pg_mul, PG },
    scheme::{ class_pattern, runs, TermList },
};

/// Source of one- and two-electron integrals over spatial orbitals.
///
/// Two-electron integrals use chemists' notation, `v(i, j, k, l) = (ij|kl)`.
pub trait IntegralSource: Sync {
    /// Number of orbitals.
    fn n_sites(&self) -> usize;

    /// One-electron integral `t_ij`.
    fn t(&self, i: usize, j: usize) -> f64;

    /// Two-electron integral `(ij|kl)`.
    fn v(&self, i: usize, j: usize, k: usize, l: usize) -> f64;
}

/// Integrals held in dense arrays.
#[derive(Clone, Debug, PartialEq)]
pub struct Integrals {
    pub t: nd::Array2<f64>,
    pub v: nd::Array4<f64>,
}

impl Integrals {
    /// Wrap integral arrays, checking that `t` is square and `v` matches it.
    pub fn new(t: nd::Array2<f64>, v: nd::Array4<f64>) -> BigSiteResult<Self> {
        let n = t.nrows();
        if t.dim() != (n, n) || v.dim() != (n, n, n, n) {
            return Err(ConfigError::IntegralShape {
                t: t.shape().to_vec(), v: v.shape().to_vec() }.into());
        }
        Ok(Self { t, v })
    }

    /// Integrals of a Hubbard chain with hopping `-hop` between neighbors,
    /// optionally periodic, and on-site repulsion `u`.
    pub fn hubbard(n: usize, hop: f64, u: f64, periodic: bool) -> Self {
        let mut t = nd::Array2::zeros((n, n));
        for i in 0..n.saturating_sub(1) {
            t[[i, i + 1]] = -hop;
            t[[i + 1, i]] = -hop;
        }
        if periodic && n > 2 {
            t[[0, n - 1]] = -hop;
            t[[n - 1, 0]] = -hop;
        }
        let mut v = nd::Array4::zeros((n, n, n, n));
        for i in 0..n { v[[i, i, i, i]] = u; }
        Self { t, v }
    }
}

impl IntegralSource for Integrals {
    fn n_sites(&self) -> usize { self.t.nrows() }

    fn t(&self, i: usize, j: usize) -> f64 { self.t[[i, j]] }

    fn v(&self, i: usize, j: usize, k: usize, l: usize) -> f64 { self.v[[i, j, k, l]] }
}

// catalog steps of one (expression, pattern) and its top row per irrep
#[derive(Clone, Debug)]
struct PatternData {
    steps: Vec<usize>,
    tops: HashMap<PG, (usize, u64)>,
}

/// Distributes site-ordered terms onto the paths of an [`Hdrt`].
///
/// Term resolution is amortized over every (expression, site pattern) pair,
/// and runs of identity steps are skipped in constant time.
#[derive(Debug)]
pub struct IntegralDistributor<'a> {
    hdrt: &'a Hdrt,
    // (row, offset) after following 0, 1, 2, ... identity steps
    jumps: Vec<Vec<(u32, u64)>>,
    patterns: HashMap<(OpExpr, Vec<u16>), PatternData>,
}

impl<'a> IntegralDistributor<'a> {
    /// Prepare distribution of every term in `lists`.
    pub fn new(hdrt: &'a Hdrt, lists: &[&TermList]) -> BigSiteResult<Self> {
        let n_rows = hdrt.n_rows();
        let mut jumps: Vec<Vec<(u32, u64)>> = vec![Vec::new(); n_rows];
        for j in (0..n_rows).rev() {
            let mut hops = vec![(j as u32, 0)];
            let next = hdrt.jd(j, 0);
            if next != 0 {
                let skip = hdrt.x(j, 0);
                hops.extend(jumps[next].iter().map(|&(r, x)| (r, x + skip)));
            }
            jumps[j] = hops;
        }

        let mut dist = Self { hdrt, jumps, patterns: HashMap::default() };
        for terms in lists.iter() {
            for (expr, idxs, _) in terms.iter() {
                let pattern = class_pattern(idxs);
                if dist.patterns.contains_key(&(expr.clone(), pattern.clone())) {
                    continue;
                }
                let data = dist.prepare(expr, &pattern)?;
                dist.patterns.insert((expr.clone(), pattern), data);
            }
        }
        debug!("integral distributor: {} pattern(s)", dist.patterns.len());
        Ok(dist)
    }

    // resolve the steps of a pattern and every top row reachable by placing
    // the pattern's runs on actual sites
    fn prepare(&self, expr: &OpExpr, pattern: &[u16]) -> BigSiteResult<PatternData> {
        let hdrt = self.hdrt;
        let steps = hdrt.catalog().resolve(expr, pattern)?;
        let mut tops: HashMap<PG, (usize, u64)> = HashMap::default();
        let mut q = [0_i16; 5];
        let mut pg_mask: Vec<bool> = Vec::new();
        for &d in steps.iter() {
            let st = hdrt.catalog().step(d);
            q.iter_mut().zip(st.delta()).for_each(|(x, dx)| { *x += dx; });
            pg_mask.push(st.pg_flip);
        }
        q[0] = hdrt.n_sites() as i16;
        // the reachable irreps are products of site irreps over the flipping
        // runs; collect every product realized by some placement
        let mut irreps: Vec<PG> = vec![0];
        for _ in pg_mask.iter().filter(|&&f| f) {
            let mut next: Vec<PG> = irreps.iter()
                .flat_map(|&g| hdrt.orb_sym().iter().map(move |&s| pg_mul(g, s)))
                .collect();
            next.sort_unstable();
            next.dedup();
            irreps = next;
        }
        for g in irreps {
            let matches: Vec<usize> = (0..hdrt.n_init())
                .filter(|&j| hdrt.q(j) == q && hdrt.pg(j) == g)
                .collect();
            match matches[..] {
                [] => { },
                [j] => { tops.insert(g, (j, hdrt.init_offset(j))); },
                _ => {
                    return Err(SymmetryError::DuplicateMatch {
                        expr: expr.to_string(),
                        pattern: pattern.to_vec(),
                        pg: g,
                    }.into());
                },
            }
        }
        Ok(PatternData { steps, tops })
    }

    // follow `n` identity steps from row `j`
    fn skip(&self, j: usize, n: usize) -> BigSiteResult<(usize, u64)> {
        self.jumps[j].get(n)
            .map(|&(r, x)| (r as usize, x))
            .ok_or_else(|| InternalError::MissingEdge { row: j, step: 0 }.into())
    }

    /// Offset of one site-ordered term.
    pub fn offset(&self, expr: &OpExpr, idxs: &[u16]) -> BigSiteResult<u64> {
        let hdrt = self.hdrt;
        let n_sites = hdrt.n_sites();
        let bad = || ConfigError::BadIndexTuple {
            expr: expr.to_string(), indices: idxs.to_vec() };
        if idxs.len() != expr.count_ops()
            || idxs.windows(2).any(|w| w[0] > w[1])
            || idxs.iter().any(|&i| i as usize >= n_sites)
        {
            return Err(bad().into());
        }
        let pattern = class_pattern(idxs);
        let data = self.patterns.get(&(expr.clone(), pattern))
            .ok_or_else(bad)?;
        let g = idxs.iter()
            .fold(0, |g, &i| pg_mul(g, hdrt.orb_sym()[i as usize]));
        let &(mut j, mut offset) = data.tops.get(&g)
            .ok_or_else(|| SymmetryError::UnreachableEntry {
                expr: expr.to_string(), indices: idxs.to_vec() })?;
        let mut k = n_sites;
        let site_runs: Vec<Range<usize>> = runs(idxs);
        for (run, &d) in site_runs.iter().zip(data.steps.iter()).rev() {
            let site = idxs[run.start] as usize;
            let (r, x) = self.skip(j, k - 1 - site)?;
            offset += x;
            offset += hdrt.x(r, d);
            j = hdrt.jd(r, d);
            if j == 0 {
                return Err(SymmetryError::UnreachableEntry {
                    expr: expr.to_string(), indices: idxs.to_vec() }.into());
            }
            k = site;
        }
        let (_, x) = self.skip(j, k)?;
        Ok(offset + x)
    }

    /// Coefficient buffer of `terms`, indexed by operator row table offset.
    ///
    /// Offsets are resolved in parallel; coefficients landing on the same
    /// offset are summed. The first unresolvable term aborts the whole
    /// distribution.
    pub fn distribute(&self, terms: &TermList) -> BigSiteResult<Vec<f64>> {
        let entries: Vec<(&OpExpr, &[u16], f64)> = terms.iter().collect();
        let offsets: Vec<(u64, f64)> = entries.par_iter()
            .map(|&(expr, idxs, v)| self.offset(expr, idxs).map(|i| (i, v)))
            .collect::<BigSiteResult<_>>()?;
        let mut buf = vec![0.0; self.hdrt.size() as usize];
        for (i, v) in offsets {
            buf[i as usize] += v;
        }
        debug!("distributed {} term(s) onto {} offset(s)", entries.len(), buf.len());
        Ok(buf)
    }
}
