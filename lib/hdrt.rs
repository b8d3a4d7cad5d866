//! Operator row table: a row table over operator insertions rather than
//! occupations.
//!
//! A row is `(cut, n, twos, weight, length)` plus a point-group irrep, where
//! `cut` is the number of sites still to be visited, `n` and `twos` are the
//! particle-number change and coupled spin of the operator part below the
//! cut, `weight` counts the sites that still carry a non-identity operator,
//! and `length` counts the elementary operators still to be placed. Steps
//! come from a [`StepCatalog`] built out of a set of [`RecouplingScheme`]s, so
//! each path from an initial row to the all-zero terminal row is one
//! site-ordered, linearly coupled operator string.
//!
//! Paths are indexed exactly as in [`Drt`][crate::drt::Drt], which turns any
//! (expression, site tuple) pair into a flat offset into a coefficient
//! buffer.

use std::{ fmt, ops::Range };
use log::debug;
use rustc_hash::FxHashMap as HashMap;
use crate::{
    cg::SU2CG,
    drt::find_desc,
    error::{ BigSiteResult, ConfigError, InternalError, SymmetryError },
    expr::{ expr_text, expr_twos, parse_optional, ExprResult, OpExpr },
    quanta::{ pg_mul, Quanta, SpinScheme, PG },
    scheme::{ runs, RecouplingScheme, TermList },
};

/// A registered local operator insertion.
#[derive(Clone, Debug, PartialEq)]
pub struct DeltaStep {
    /// Particle-number change.
    pub dn: i16,
    /// Change in the coupled spin of the operator prefix.
    pub dtwos: i16,
    pub dweight: i16,
    pub dlength: i16,
    /// Whether the step multiplies the irrep by the site's irrep.
    pub pg_flip: bool,
    /// Local sub-expression; `None` for the identity.
    pub expr: Option<OpExpr>,
}

impl DeltaStep {
    fn identity() -> Self {
        Self { dn: 0, dtwos: 0, dweight: 0, dlength: 0, pg_flip: false, expr: None }
    }

    fn new(expr: &OpExpr, dtwos: i16) -> Self {
        let dn = expr.dn();
        Self {
            dn,
            dtwos,
            dweight: 1,
            dlength: expr.count_ops() as i16,
            pg_flip: dn & 1 != 0,
            expr: Some(expr.clone()),
        }
    }

    /// Row delta `(cut, n, twos, weight, length)`.
    pub fn delta(&self) -> [i16; 5] {
        [1, self.dn, self.dtwos, self.dweight, self.dlength]
    }

    /// Doubled spin of the local sub-expression.
    pub fn local_twos(&self) -> i16 { expr_twos(self.expr.as_ref()) }
}

/// Catalog of local operator insertions keyed by `(sub-expression, spin
/// delta)`. Entry 0 is always the identity.
#[derive(Clone, Debug)]
pub struct StepCatalog {
    steps: Vec<DeltaStep>,
    index: HashMap<(String, i16), usize>,
}

impl Default for StepCatalog {
    fn default() -> Self { Self::new() }
}

impl StepCatalog {
    /// Create a catalog holding only the identity.
    pub fn new() -> Self {
        let mut index = HashMap::default();
        index.insert((String::new(), 0), 0);
        Self { steps: vec![DeltaStep::identity()], index }
    }

    /// Register every run sub-expression of every scheme.
    pub fn collect(schemes: &[RecouplingScheme]) -> ExprResult<Self> {
        let mut catalog = Self::new();
        for scheme in schemes.iter() {
            for run in runs(&scheme.pattern) {
                for expr in scheme.exprs.iter() {
                    let sub = expr.sub_expr(run.start, run.end)?;
                    let dq = expr.prefix_twos(run.end)?
                        - expr.prefix_twos(run.start)?;
                    catalog.register(sub, dq);
                }
            }
        }
        debug!("step catalog: {} entries", catalog.len());
        Ok(catalog)
    }

    /// Add a step if it is not already present and return its position.
    pub fn register(&mut self, expr: Option<&OpExpr>, dq: i16) -> usize {
        let key = (expr_text(expr), dq);
        if let Some(&d) = self.index.get(&key) { return d; }
        let d = self.steps.len();
        self.steps.push(
            expr.map(|x| DeltaStep::new(x, dq)).unwrap_or_else(DeltaStep::identity));
        self.index.insert(key, d);
        d
    }

    /// Position of a step.
    pub fn find(&self, expr: Option<&OpExpr>, dq: i16) -> Option<usize> {
        self.index.get(&(expr_text(expr), dq)).copied()
    }

    /// Number of steps, including the identity.
    pub fn len(&self) -> usize { self.steps.len() }

    /// Return `true` if only the identity is registered.
    pub fn is_empty(&self) -> bool { self.steps.len() <= 1 }

    /// Get step `d`.
    ///
    /// *Panics if `d` is out of bounds.*
    pub fn step(&self, d: usize) -> &DeltaStep { &self.steps[d] }

    /// Iterate over all steps in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &DeltaStep> + '_ { self.steps.iter() }

    /// Resolve the catalog step of each maximal run of `pattern`.
    pub fn resolve(&self, expr: &OpExpr, pattern: &[u16])
        -> BigSiteResult<Vec<usize>>
    {
        runs(pattern).into_iter()
            .map(|run| -> BigSiteResult<usize> {
                let sub = expr.sub_expr(run.start, run.end)?;
                let dq = expr.prefix_twos(run.end)? - expr.prefix_twos(run.start)?;
                self.find(sub, dq)
                    .ok_or_else(|| {
                        ConfigError::PatternNotFound {
                            expr: expr.to_string(),
                            sub: expr_text(sub),
                            dq,
                        }.into()
                    })
            })
            .collect()
    }
}

type HRow = ([i16; 5], PG);

/// Operator row table over a fixed number of sites.
#[derive(Clone, Debug)]
pub struct Hdrt {
    scheme: SpinScheme,
    n_sites: usize,
    orb_sym: Vec<PG>,
    init: Vec<(Quanta, i16, i16)>,
    qs: Vec<[i16; 5]>,
    pgs: Vec<PG>,
    levels: Vec<usize>,
    catalog: StepCatalog,
    jds: Vec<u32>,
    xs: Vec<u64>,
}

impl Hdrt {
    fn allow_q(scheme: SpinScheme, q: &[i16; 5]) -> bool {
        (q[0] > 0
            && (scheme == SpinScheme::SZ || q[2] >= 0)
            && q[3] >= 0
            && q[4] >= 0)
        || q.iter().all(|&x| x == 0)
    }

    fn step_row(
        scheme: SpinScheme,
        catalog: &StepCatalog,
        (q, g): HRow,
        k: usize,
        gk: PG,
        d: usize,
    ) -> Option<HRow>
    {
        let st = catalog.step(d);
        let mut next = q;
        next.iter_mut().zip(st.delta()).for_each(|(x, dx)| { *x -= dx; });
        if !Self::allow_q(scheme, &next) { return None; }
        if scheme == SpinScheme::SU2
            && !SU2CG::triangle(
                st.local_twos() as i32, q[2] as i32, next[2] as i32)
        {
            return None;
        }
        let g = if st.pg_flip { pg_mul(g, gk) } else { g };
        (k != 0 || g == 0).then_some((next, g))
    }

    /// Build the table for `n_sites` sites.
    ///
    /// Each initial label is an operator label together with its operator
    /// weight (number of sites carrying operators) and length (number of
    /// elementary operators).
    pub fn new(
        scheme: SpinScheme,
        n_sites: usize,
        init: &[(Quanta, i16, i16)],
        orb_sym: &[PG],
        catalog: StepCatalog,
    ) -> BigSiteResult<Self>
    {
        if orb_sym.len() != n_sites {
            return Err(ConfigError::SiteLabelCount {
                expected: n_sites, got: orb_sym.len() }.into());
        }
        let mut top: Vec<HRow> = Vec::with_capacity(init.len());
        for (i, (q, w, l)) in init.iter().enumerate() {
            if scheme == SpinScheme::SU2 && q.twos < 0 {
                return Err(ConfigError::InvalidInitialLabel {
                    n: q.n, twos: q.twos, sites: n_sites }.into());
            }
            let row = ([n_sites as i16, q.n, q.twos, *w, *l], q.pg);
            if let Some(j) = top.iter().position(|r| *r == row) {
                return Err(ConfigError::DuplicateInitialLabel(j, i).into());
            }
            top.push(row);
        }
        let nd = catalog.len();

        let mut levels: Vec<Vec<HRow>> = vec![top];
        for j in 0..n_sites {
            let k = n_sites - 1 - j;
            let catalog = &catalog;
            let mut next: Vec<HRow> = levels[j].iter()
                .flat_map(|&row| {
                    (0..nd).filter_map(move |d| {
                        Self::step_row(scheme, catalog, row, k, orb_sym[k], d)
                    })
                })
                .collect();
            next.sort_unstable_by(|p, q| q.cmp(p));
            next.dedup();
            levels.push(next);
        }

        if n_sites > 0 {
            levels[n_sites].retain(|row| *row == ([0; 5], 0));
        }
        for j in (1..n_sites).rev() {
            let k = n_sites - 1 - j;
            let (head, tail) = levels.split_at_mut(j + 1);
            let below = &tail[0];
            head[j].retain(|&row| {
                (0..nd).any(|d| {
                    Self::step_row(scheme, &catalog, row, k, orb_sym[k], d)
                        .is_some_and(|next| find_desc(below, &next).is_some())
                })
            });
        }

        let mut offsets: Vec<usize> = Vec::with_capacity(n_sites + 2);
        offsets.push(0);
        for level in levels.iter() {
            offsets.push(offsets.last().copied().unwrap_or(0) + level.len());
        }
        let n_rows = offsets[n_sites + 1];
        let mut qs: Vec<[i16; 5]> = Vec::with_capacity(n_rows);
        let mut pgs: Vec<PG> = Vec::with_capacity(n_rows);
        let mut jds: Vec<u32> = vec![0; n_rows * nd];
        for (j, level) in levels.iter().enumerate() {
            for (p, &row) in level.iter().enumerate() {
                qs.push(row.0);
                pgs.push(row.1);
                if j == n_sites { continue; }
                let k = n_sites - 1 - j;
                let r = offsets[j] + p;
                for d in 0..nd {
                    jds[r * nd + d]
                        = Self::step_row(scheme, &catalog, row, k, orb_sym[k], d)
                        .and_then(|next| find_desc(&levels[j + 1], &next))
                        .map(|p| (offsets[j + 1] + p) as u32)
                        .unwrap_or(0);
                }
            }
        }

        let mut xs: Vec<u64> = vec![0; n_rows * (nd + 1)];
        for j in (0..n_rows).rev() {
            let base = j * (nd + 1);
            if j >= offsets[n_sites] {
                xs[base + nd] = 1;
                continue;
            }
            for d in 0..nd {
                let jd = jds[j * nd + d] as usize;
                let sub = if jd != 0 { xs[jd * (nd + 1) + nd] } else { 0 };
                xs[base + d + 1] = xs[base + d] + sub;
            }
        }

        let hdrt = Self {
            scheme,
            n_sites,
            orb_sym: orb_sym.to_vec(),
            init: init.to_vec(),
            qs,
            pgs,
            levels: offsets,
            catalog,
            jds,
            xs,
        };
        debug!(
            "operator row table: {} site(s), {} label(s), {} step(s), {} row(s), size {}",
            n_sites, hdrt.n_init(), nd, hdrt.n_rows(), hdrt.size(),
        );
        Ok(hdrt)
    }

    /// Spin scheme of the table.
    pub fn scheme(&self) -> SpinScheme { self.scheme }

    /// Number of sites.
    pub fn n_sites(&self) -> usize { self.n_sites }

    /// Number of rows.
    pub fn n_rows(&self) -> usize { self.qs.len() }

    /// Number of initial labels.
    pub fn n_init(&self) -> usize { self.init.len() }

    /// Initial labels with their operator weights and lengths.
    pub fn init_labels(&self) -> &[(Quanta, i16, i16)] { &self.init }

    /// The step catalog.
    pub fn catalog(&self) -> &StepCatalog { &self.catalog }

    /// Number of catalog steps.
    pub fn nd(&self) -> usize { self.catalog.len() }

    /// Point-group irreps of the sites.
    pub fn orb_sym(&self) -> &[PG] { &self.orb_sym }

    /// Row tuple `(cut, n, twos, weight, length)` of row `j`.
    pub fn q(&self, j: usize) -> [i16; 5] { self.qs[j] }

    /// Point-group irrep of row `j`.
    pub fn pg(&self, j: usize) -> PG { self.pgs[j] }

    /// Target of step `d` from row `j`, `0` if there is none.
    pub fn jd(&self, j: usize, d: usize) -> usize {
        self.jds[j * self.nd() + d] as usize
    }

    /// Number of paths from row `j` through steps before `d`.
    pub fn x(&self, j: usize, d: usize) -> u64 { self.xs[j * (self.nd() + 1) + d] }

    /// Number of paths below row `j`.
    pub fn subtree(&self, j: usize) -> u64 { self.x(j, self.nd()) }

    /// Rows at the cut just above site `k`.
    pub fn site_rows(&self, k: usize) -> Range<usize> {
        let level = self.n_sites - 1 - k;
        self.levels[level]..self.levels[level + 1]
    }

    /// Offset of the first path of initial row `i`.
    pub fn init_offset(&self, i: usize) -> u64 {
        (0..i).map(|j| self.subtree(j)).sum()
    }

    /// Total number of paths.
    pub fn size(&self) -> u64 { self.init_offset(self.n_init()) }

    /// Largest operator spin appearing in any row or step.
    pub fn max_twos(&self) -> i16 {
        let rows = self.qs.iter().map(|q| q[2].abs()).max().unwrap_or(0);
        let steps = self.catalog.iter().map(|st| st.local_twos()).max().unwrap_or(0);
        rows.max(steps)
    }

    fn step_of(&self, j: usize, i: u64) -> BigSiteResult<usize> {
        let nd = self.nd();
        if i >= self.subtree(j) { return Err(InternalError::WeightOrder(j).into()); }
        let d = (1..nd).rev().find(|&d| self.x(j, d) <= i).unwrap_or(0);
        if self.jd(j, d) == 0 {
            return Err(InternalError::MissingEdge { row: j, step: d }.into());
        }
        Ok(d)
    }

    /// Composed expression and ordered site indices of path `i`.
    ///
    /// Sub-expressions of consecutive non-identity sites are coupled
    /// left-to-right using the operator spins recorded in the rows.
    pub fn decode(&self, i: u64) -> BigSiteResult<(String, Vec<u16>)> {
        let size = self.size();
        if i >= size { return Err(ConfigError::IndexOutOfRange(i, size).into()); }
        let (mut j, mut i) = (0, i);
        while i >= self.subtree(j) {
            i -= self.subtree(j);
            j += 1;
        }
        let mut parts: Vec<(usize, usize, i16)> = Vec::new();
        for k in (0..self.n_sites).rev() {
            let d = self.step_of(j, i)?;
            i -= self.x(j, d);
            if d != 0 { parts.push((k, d, self.qs[j][2])); }
            j = self.jd(j, d);
        }
        let mut acc: Option<OpExpr> = None;
        let mut idxs: Vec<u16> = Vec::new();
        for &(k, d, twos) in parts.iter().rev() {
            let st = self.catalog.step(d);
            let Some(x) = st.expr.clone() else { continue; };
            acc = Some(match acc {
                None => x,
                Some(a) => OpExpr::Couple(Box::new(a), Box::new(x), twos),
            });
            idxs.extend(std::iter::repeat(k as u16).take(st.dlength as usize));
        }
        Ok((expr_text(acc.as_ref()), idxs))
    }

    /// Offset of the path spelling `expr` (empty for the identity) on the
    /// sorted site indices `idxs`.
    pub fn encode(&self, expr: &str, idxs: &[u16]) -> BigSiteResult<u64> {
        let expr = parse_optional(expr)?;
        self.encode_expr(expr.as_ref(), idxs)
    }

    /// Catalog step of every site for a term, identity where no operator sits.
    pub fn site_steps(&self, expr: Option<&OpExpr>, idxs: &[u16])
        -> BigSiteResult<Vec<usize>>
    {
        let bad = || ConfigError::BadIndexTuple {
            expr: expr_text(expr), indices: idxs.to_vec() };
        let mut steps = vec![0; self.n_sites];
        let Some(x) = expr else {
            return if idxs.is_empty() { Ok(steps) } else { Err(bad().into()) };
        };
        if idxs.len() != x.count_ops()
            || idxs.windows(2).any(|w| w[0] > w[1])
            || idxs.iter().any(|&i| i as usize >= self.n_sites)
        {
            return Err(bad().into());
        }
        let ds = self.catalog.resolve(x, idxs)?;
        for (run, d) in runs(idxs).into_iter().zip(ds) {
            steps[idxs[run.start] as usize] = d;
        }
        Ok(steps)
    }

    /// Initial row reached by applying `steps` upward from the terminal row.
    pub fn top_row(&self, steps: &[usize]) -> Option<usize> {
        let mut q = [0_i16; 5];
        let mut g: PG = 0;
        for (k, &d) in steps.iter().enumerate() {
            let st = self.catalog.step(d);
            q.iter_mut().zip(st.delta()).for_each(|(x, dx)| { *x += dx; });
            if st.pg_flip { g = pg_mul(g, self.orb_sym[k]); }
        }
        (0..self.n_init()).find(|&j| self.qs[j] == q && self.pgs[j] == g)
    }

    pub(crate) fn encode_expr(&self, expr: Option<&OpExpr>, idxs: &[u16])
        -> BigSiteResult<u64>
    {
        let steps = self.site_steps(expr, idxs)?;
        let unreachable = || SymmetryError::UnreachableEntry {
            expr: expr_text(expr), indices: idxs.to_vec() };
        let j0 = self.top_row(&steps).ok_or_else(unreachable)?;
        let (mut j, mut i) = (j0, self.init_offset(j0));
        for k in (0..self.n_sites).rev() {
            let d = steps[k];
            let jd = self.jd(j, d);
            if jd == 0 { return Err(unreachable().into()); }
            i += self.x(j, d);
            j = jd;
        }
        Ok(i)
    }

    /// Accumulate every term's coefficient at its offset.
    ///
    /// Terms resolving to the same offset are summed.
    pub fn scatter_add(&self, terms: &TermList) -> BigSiteResult<Vec<f64>> {
        let mut buf = vec![0.0; self.size() as usize];
        for (ix, expr) in terms.exprs.iter().enumerate() {
            let nn = expr.count_ops();
            for (idxs, &v) in terms.indices[ix].chunks(nn).zip(terms.data[ix].iter()) {
                buf[self.encode_expr(Some(expr), idxs)? as usize] += v;
            }
        }
        Ok(buf)
    }

    fn level_of(&self, j: usize) -> usize {
        self.levels.partition_point(|&start| start <= j) - 1
    }
}

impl fmt::Display for Hdrt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "steps:")?;
        for (d, st) in self.catalog.iter().enumerate() {
            writeln!(
                f,
                "{:>4} {:>12} dn={:>2} dq={:>2} dw={} dl={} pg={}",
                d, expr_text(st.expr.as_ref()), st.dn, st.dtwos,
                st.dweight, st.dlength, st.pg_flip as u8,
            )?;
        }
        writeln!(
            f, "{:>6} {:>4} {:>4} {:>4} {:>4} {:>4} {:>3} {:>10}",
            "J", "K", "N", "S", "W", "L", "PG", "X",
        )?;
        for j in 0..self.n_rows() {
            let q = self.qs[j];
            write!(
                f, "{:>6} {:>4} {:>4} {:>4} {:>4} {:>4} {:>3} {:>10}",
                j, self.n_sites - self.level_of(j), q[1], q[2], q[3], q[4],
                self.pgs[j], self.subtree(j),
            )?;
            for d in 0..self.nd() {
                write!(f, " {:>5}", self.jd(j, d))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
