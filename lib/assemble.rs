//! Sector-by-sector assembly of operator matrices.
//!
//! For every bra state, the bra path is followed site by site while a set of
//! walkers carries the operator row, the ket row, both path offsets, and the
//! product of local reduced elements and recoupling factors collected so far.
//! At the terminal row each walker names one operator path and one ket state;
//! its value times the coefficient of that operator path is one contribution
//! to the matrix element.
//!
//! Operators of a right big site couple to the site basis in the opposite
//! order, which multiplies each sector by a phase depending only on the spins
//! of the operator, bra and ket labels.

use std::mem;
use log::{ debug, trace };
use rayon::prelude::*;
use crate::{
    cg::SU2CG,
    drt::Drt,
    error::{ BigSiteResult, ConfigError, InternalError, SymmetryError },
    factors::RecouplingFactorCache,
    hdrt::Hdrt,
    local::LocalMatrix,
    matrix::{ checked_index, MatrixData, SectorMatrix },
    ops::Side,
    quanta::{ pg_mul, Quanta, SpinScheme },
};

// recoupling factors below this magnitude end a walker
const FACTOR_CUTOFF: f64 = 1e-14;

/// Parameters of the assembly phases.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AssemblerConfig {
    /// Worker threads; `0` leaves the choice to rayon.
    pub n_threads: usize,
    /// Fill fraction above which a sector block is stored densely.
    pub dense_ratio: f64,
    /// Matrix elements and integral terms at or below this magnitude are
    /// dropped.
    pub cutoff: f64,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self { n_threads: 0, dense_ratio: 0.25, cutoff: 1e-14 }
    }
}

impl AssemblerConfig {
    /// Build a worker pool of the configured size.
    pub fn thread_pool(&self) -> BigSiteResult<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.n_threads)
            .build()
            .map_err(|e| ConfigError::ThreadPool(e.to_string()).into())
    }
}

/// Return `true` if an operator with label `op` can connect `ket` to `bra`.
pub fn is_admissible(bra: &Quanta, ket: &Quanta, op: &Quanta) -> bool {
    bra.n == ket.n + op.n
        && bra.pg == pg_mul(ket.pg, op.pg)
        && SU2CG::triangle(ket.twos as i32, op.twos as i32, bra.twos as i32)
}

/// Label index pairs `(bra, ket)` connected by an operator with label `op`.
pub fn admissible_sectors(labels: &[Quanta], op: &Quanta) -> Vec<(usize, usize)> {
    let mut acc: Vec<(usize, usize)> = Vec::new();
    for (ib, bra) in labels.iter().enumerate() {
        for (ik, ket) in labels.iter().enumerate() {
            if is_admissible(bra, ket, op) { acc.push((ib, ik)); }
        }
    }
    acc
}

// a (bra, ket) label pair and the initial value of its walkers
#[derive(Copy, Clone, Debug)]
struct Sector {
    ib: usize,
    ik: usize,
    phase: f64,
}

// one operator step compatible with a bra step
#[derive(Copy, Clone, Debug)]
struct Branch {
    d: u32,
    dket: u8,
    dq: i16,
    value: f64,
}

#[derive(Clone, Debug, Default)]
struct Walkers {
    jh: Vec<u32>,
    jk: Vec<u32>,
    ph: Vec<u64>,
    pk: Vec<u64>,
    v: Vec<f64>,
}

impl Walkers {
    fn clear(&mut self) {
        self.jh.clear();
        self.jk.clear();
        self.ph.clear();
        self.pk.clear();
        self.v.clear();
    }

    fn push(&mut self, jh: usize, jk: usize, ph: u64, pk: u64, v: f64) {
        self.jh.push(jh as u32);
        self.jk.push(jk as u32);
        self.ph.push(ph);
        self.pk.push(pk);
        self.v.push(v);
    }

    fn len(&self) -> usize { self.v.len() }
}

// per-worker buffers, reused across bra states
#[derive(Clone, Debug, Default)]
struct Scratch {
    cur: Walkers,
    next: Walkers,
    order: Vec<usize>,
}

/// Assembles operator matrices over the basis of a [`Drt`] from the
/// operator paths of an [`Hdrt`].
#[derive(Debug)]
pub struct OperatorAssembler<'a> {
    drt: &'a Drt,
    hdrt: &'a Hdrt,
    factors: &'a RecouplingFactorCache,
    side: Side,
    config: AssemblerConfig,
    // branches[k][bra step][operator row - first row of site k]
    branches: Vec<[Vec<Vec<Branch>>; 4]>,
}

impl<'a> OperatorAssembler<'a> {
    /// Tabulate the operator steps available at every site for every bra
    /// step, for a big site on `side`.
    pub fn new(
        drt: &'a Drt,
        hdrt: &'a Hdrt,
        factors: &'a RecouplingFactorCache,
        cg: &SU2CG,
        side: Side,
        config: AssemblerConfig,
    ) -> BigSiteResult<Self>
    {
        if drt.scheme() != SpinScheme::SU2 || hdrt.scheme() != SpinScheme::SU2 {
            return Err(ConfigError::SpinProjected.into());
        }
        if drt.n_sites() != hdrt.n_sites() {
            return Err(ConfigError::SiteLabelCount {
                expected: drt.n_sites(), got: hdrt.n_sites() }.into());
        }
        if drt.max_twos() > factors.max_b() {
            return Err(ConfigError::FactorBound(drt.max_twos(), factors.max_b()).into());
        }
        if hdrt.max_twos() > factors.max_op() {
            return Err(ConfigError::FactorBound(hdrt.max_twos(), factors.max_op()).into());
        }

        let locals: Vec<LocalMatrix> = hdrt.catalog().iter()
            .map(|st| LocalMatrix::from_expr(st.expr.as_ref(), cg))
            .collect();
        let branches: Vec<[Vec<Vec<Branch>>; 4]> = (0..hdrt.n_sites())
            .map(|k| {
                let mut table: [Vec<Vec<Branch>>; 4] = Default::default();
                for (dbra, rows) in table.iter_mut().enumerate() {
                    *rows = hdrt.site_rows(k)
                        .map(|j| {
                            (0..hdrt.nd())
                                .filter(|&d| hdrt.jd(j, d) != 0)
                                .flat_map(|d| {
                                    let m = &locals[d];
                                    m.with_bra(dbra as u8)
                                        .map(move |&(_, dket, value)| {
                                            Branch { d: d as u32, dket, dq: m.twos, value }
                                        })
                                })
                                .collect()
                        })
                        .collect();
                }
                table
            })
            .collect();
        let n_branches: usize = branches.iter()
            .flat_map(|t| t.iter())
            .flat_map(|rows| rows.iter())
            .map(|b| b.len())
            .sum();
        debug!("assembler: {} branch(es) over {} site(s)", n_branches, branches.len());
        Ok(Self { drt, hdrt, factors, side, config, branches })
    }

    pub fn config(&self) -> &AssemblerConfig { &self.config }

    pub fn side(&self) -> Side { self.side }

    // operator rows labeled `op`, with their path offsets
    fn tops(&self, op: &Quanta, coefs: &[&[f64]]) -> BigSiteResult<Vec<(usize, u64)>> {
        let hdrt = self.hdrt;
        let size = hdrt.size() as usize;
        if let Some(c) = coefs.iter().find(|c| c.len() != size) {
            return Err(ConfigError::BufferLength { expected: size, got: c.len() }.into());
        }
        let tops: Vec<(usize, u64)> = (0..hdrt.n_init())
            .filter(|&j| hdrt.init_labels()[j].0 == *op)
            .map(|j| (j, hdrt.init_offset(j)))
            .collect();
        if tops.is_empty() {
            return Err(SymmetryError::MissingSector(op.to_string()).into());
        }
        Ok(tops)
    }

    fn sector(&self, op: &Quanta, ib: usize, ik: usize) -> Sector {
        let phase = match self.side {
            Side::Left => 1.0,
            Side::Right => {
                let labels = self.drt.init_labels();
                let (tb, tk, tq)
                    = (labels[ib].twos as i32, labels[ik].twos as i32, op.twos as i32);
                let odd = if tq & tk & 1 != 0 { -1.0 } else { 1.0 };
                SU2CG::phase(tq, tk, tb) * odd
            },
        };
        Sector { ib, ik, phase }
    }

    /// Assemble every admissible sector of the operator labeled `op`, once
    /// per coefficient buffer.
    ///
    /// The outer vector follows `coefs`; each inner vector holds one block per
    /// admissible `(bra, ket)` label pair. Bra states are processed in
    /// parallel on the current rayon pool.
    pub fn assemble(&self, op: &Quanta, coefs: &[&[f64]])
        -> BigSiteResult<Vec<Vec<SectorMatrix>>>
    {
        let tops = self.tops(op, coefs)?;
        let sectors = admissible_sectors(self.drt.init_labels(), op);
        let mut out: Vec<Vec<SectorMatrix>> = vec![Vec::new(); coefs.len()];
        for &(ib, ik) in sectors.iter() {
            let mats = self.build_sector(self.sector(op, ib, ik), &tops, coefs)?;
            out.iter_mut().zip(mats).for_each(|(acc, m)| { acc.push(m); });
        }
        debug!("assembled {} sector(s) of {} for {} buffer(s)", sectors.len(), op, coefs.len());
        Ok(out)
    }

    /// Assemble the single sector `bra <- ket` of the operator labeled `op`,
    /// once per coefficient buffer.
    ///
    /// Fails if either label is absent from the basis, if no operator row
    /// carries `op`, or if `op` cannot connect the two labels.
    pub fn assemble_sector(
        &self,
        op: &Quanta,
        bra: &Quanta,
        ket: &Quanta,
        coefs: &[&[f64]],
    ) -> BigSiteResult<Vec<SectorMatrix>>
    {
        let find = |q: &Quanta| {
            self.drt.find_initial_label(q)
                .ok_or_else(|| SymmetryError::MissingSector(q.to_string()))
        };
        let (ib, ik) = (find(bra)?, find(ket)?);
        let tops = self.tops(op, coefs)?;
        if !is_admissible(bra, ket, op) {
            return Err(SymmetryError::InadmissibleSector {
                bra: bra.to_string(), ket: ket.to_string(), op: op.to_string() }.into());
        }
        self.build_sector(self.sector(op, ib, ik), &tops, coefs)
    }

    fn build_sector(
        &self,
        sector: Sector,
        tops: &[(usize, u64)],
        coefs: &[&[f64]],
    ) -> BigSiteResult<Vec<SectorMatrix>>
    {
        let Sector { ib, ik, .. } = sector;
        let labels = self.drt.init_labels();
        let n_bra = self.drt.subtree(ib);
        let n_ket = self.drt.subtree(ik) as usize;
        checked_index(n_ket)?;
        let rows: Vec<Vec<Vec<(u32, f64)>>> = (0..n_bra).into_par_iter()
            .map_init(
                Scratch::default,
                |scratch, ibra| self.bra_row(scratch, sector, ibra, tops, coefs),
            )
            .collect::<BigSiteResult<_>>()?;

        let mut per_buffer: Vec<Vec<Vec<(u32, f64)>>>
            = vec![Vec::with_capacity(rows.len()); coefs.len()];
        for row in rows {
            per_buffer.iter_mut().zip(row).for_each(|(acc, r)| { acc.push(r); });
        }
        per_buffer.into_iter()
            .map(|rows| -> BigSiteResult<SectorMatrix> {
                let data = MatrixData::from_rows(n_ket, &rows, self.config.dense_ratio)?;
                trace!(
                    "{} <- {}: {}x{}, {} stored{}",
                    labels[ib], labels[ik], n_bra, n_ket, data.nnz(),
                    if data.is_dense() { " (dense)" } else { "" },
                );
                Ok(SectorMatrix { bra: labels[ib], ket: labels[ik], data })
            })
            .collect()
    }

    // merged (ket, value) lists of bra state `ibra` of `sector`, one per
    // coefficient buffer
    fn bra_row(
        &self,
        scratch: &mut Scratch,
        sector: Sector,
        ibra: u64,
        tops: &[(usize, u64)],
        coefs: &[&[f64]],
    ) -> BigSiteResult<Vec<Vec<(u32, f64)>>>
    {
        let (drt, hdrt) = (self.drt, self.hdrt);
        let Scratch { cur, next, order } = scratch;
        cur.clear();
        for &(jh, ph) in tops.iter() {
            cur.push(jh, sector.ik, ph, 0, sector.phase);
        }

        let (mut jb, mut i) = (sector.ib, ibra);
        for k in (0..drt.n_sites()).rev() {
            let dbra = drt.step_of(jb, i)?;
            i -= drt.x(jb, dbra);
            let jbv = drt.jd(jb, dbra);
            let bfq = drt.row_twos(jb);
            let db = drt.row_twos(jbv) - bfq + 1;
            let start = hdrt.site_rows(k).start;
            let table = &self.branches[k][dbra];
            next.clear();
            for w in 0..cur.len() {
                let (jh, jk) = (cur.jh[w] as usize, cur.jk[w] as usize);
                let kfq = drt.row_twos(jk);
                let fq = hdrt.q(jh)[2];
                for br in table[jh - start].iter() {
                    let dket = br.dket as usize;
                    let jkv = drt.jd(jk, dket);
                    if jkv == 0 { continue; }
                    let d = br.d as usize;
                    let jhv = hdrt.jd(jh, d);
                    let f = self.factors
                        .factor(bfq, db, kfq, drt.row_twos(jkv) - kfq + 1,
                            fq, hdrt.q(jhv)[2], br.dq)
                        .ok_or(InternalError::FactorLookup)?;
                    if f.abs() < FACTOR_CUTOFF { continue; }
                    next.push(
                        jhv,
                        jkv,
                        cur.ph[w] + hdrt.x(jh, d),
                        cur.pk[w] + drt.x(jk, dket),
                        cur.v[w] * f * br.value,
                    );
                }
            }
            mem::swap(cur, next);
            jb = jbv;
        }

        order.clear();
        order.extend(0..cur.len());
        order.sort_unstable_by_key(|&w| cur.pk[w]);
        let cutoff = self.config.cutoff;
        let rows = coefs.iter()
            .map(|c| {
                let mut row: Vec<(u32, f64)> = Vec::new();
                for &w in order.iter() {
                    let x = c[cur.ph[w] as usize] * cur.v[w];
                    let pk = cur.pk[w] as u32;
                    match row.last_mut() {
                        Some((col, val)) if *col == pk => { *val += x; },
                        _ => { row.push((pk, x)); },
                    }
                }
                row.retain(|(_, v)| v.abs() > cutoff);
                row
            })
            .collect();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        expr::OpExpr,
        hdrt::StepCatalog,
        ops::OpFamily,
        scheme::{ RecouplingScheme, TermList },
    };
    use crate::error::Error;
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool { (a - b).abs() < 1e-12 }

    #[test]
    fn sector_selection() {
        let labels = [
            Quanta::new(1, 1, 0),
            Quanta::new(2, 0, 0),
            Quanta::new(2, 2, 0),
            Quanta::new(2, 0, 1),
        ];
        assert_eq!(
            admissible_sectors(&labels, &Quanta::vacuum()),
            vec![(0, 0), (1, 1), (2, 2), (3, 3)],
        );
        assert_eq!(
            admissible_sectors(&labels, &Quanta::new(1, 1, 0)),
            vec![(1, 0), (2, 0)],
        );
        assert_eq!(
            admissible_sectors(&labels, &Quanta::new(0, 2, 1)),
            vec![(2, 3), (3, 2)],
        );
        assert!(admissible_sectors(&labels, &Quanta::new(2, 0, 0)).is_empty());
        assert_eq!(admissible_sectors(&labels, &Quanta::new(-1, 1, 1)), vec![(0, 3)]);
    }

    #[test]
    fn one_body_blocks() {
        let cg = SU2CG::default();
        let x: OpExpr = "(C+D)0".parse().unwrap();
        let y: OpExpr = "(D+C)0".parse().unwrap();
        let catalog = StepCatalog::collect(&RecouplingScheme::enumerate(&x, &cg))
            .unwrap();
        let init = OpFamily::Q(0).init_labels(&[Quanta::vacuum()]);
        let hdrt = Hdrt::new(SpinScheme::SU2, 2, &init, &[0, 0], catalog).unwrap();
        let labels = [Quanta::new(1, 1, 0), Quanta::new(2, 0, 0)];
        let drt = Drt::new(SpinScheme::SU2, 2, &labels, &[0, 0]).unwrap();
        let factors = RecouplingFactorCache::new(drt.max_twos(), 4, &cg);
        let asm = OperatorAssembler::new(
            &drt, &hdrt, &factors, &cg, Side::Left, AssemblerConfig::default())
            .unwrap();

        let r2 = 2.0_f64.sqrt();
        let mut number = TermList::new();
        number.push(&x, &[0, 0], r2).unwrap();
        number.push(&x, &[1, 1], r2).unwrap();
        let mut hop = TermList::new();
        hop.push(&x, &[0, 1], 0.5 * r2).unwrap();
        hop.push(&y, &[0, 1], -0.25 * r2).unwrap();
        let bufs = [hdrt.scatter_add(&number).unwrap(), hdrt.scatter_add(&hop).unwrap()];
        let refs: Vec<&[f64]> = bufs.iter().map(|b| b.as_slice()).collect();
        let out = asm.assemble(&Quanta::vacuum(), &refs).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), 2);

        // the number operator counts electrons in every state
        let n1 = out[0][0].data.to_dense();
        let n2 = out[0][1].data.to_dense();
        assert_eq!(n1.dim(), (2, 2));
        assert_eq!(n2.dim(), (3, 3));
        for i in 0..2 {
            for j in 0..2 {
                assert!(approx_eq(n1[[i, j]], if i == j { 1.0 } else { 0.0 }));
            }
        }
        for i in 0..3 {
            for j in 0..3 {
                assert!(approx_eq(n2[[i, j]], if i == j { 2.0 } else { 0.0 }));
            }
        }

        // one electron over the basis ["+0", "0+"]
        let h1 = out[1][0].data.to_dense();
        assert!(approx_eq(h1[[0, 1]],  0.5));
        assert!(approx_eq(h1[[1, 0]], -0.25));
        assert!(approx_eq(h1[[0, 0]],  0.0));
        assert!(approx_eq(h1[[1, 1]],  0.0));
        assert_eq!(out[1][0].bra, labels[0]);
        assert_eq!(out[1][1].ket, labels[1]);
    }

    #[test]
    fn rejected_inputs() {
        let cg = SU2CG::default();
        let x: OpExpr = "(C+D)0".parse().unwrap();
        let catalog = StepCatalog::collect(&RecouplingScheme::enumerate(&x, &cg))
            .unwrap();
        let init = OpFamily::Q(0).init_labels(&[Quanta::vacuum()]);
        let hdrt = Hdrt::new(SpinScheme::SU2, 2, &init, &[0, 0], catalog).unwrap();
        let drt = Drt::new(SpinScheme::SU2, 2, &[Quanta::new(2, 0, 0)], &[0, 0])
            .unwrap();
        let factors = RecouplingFactorCache::new(drt.max_twos(), 4, &cg);
        let config = AssemblerConfig::default();
        let asm = OperatorAssembler::new(&drt, &hdrt, &factors, &cg, Side::Left, config)
            .unwrap();
        let buf = vec![0.0; hdrt.size() as usize];
        let b: &[f64] = &buf;
        assert!(asm.assemble(&Quanta::new(1, 1, 0), &[b]).is_err());
        assert!(asm.assemble(&Quanta::vacuum(), &[&b[1..]]).is_err());
        let zero = asm.assemble(&Quanta::vacuum(), &[b]).unwrap();
        assert_eq!(zero[0][0].data.nnz(), 0);

        let sz = Drt::new(SpinScheme::SZ, 2, &[Quanta::new(2, 0, 0)], &[0, 0]).unwrap();
        assert!(OperatorAssembler::new(&sz, &hdrt, &factors, &cg, Side::Left, config).is_err());
        let small = RecouplingFactorCache::new(0, 0, &cg);
        assert!(OperatorAssembler::new(&drt, &hdrt, &small, &cg, Side::Left, config).is_err());
    }

    #[test]
    fn single_sector() {
        let cg = SU2CG::default();
        let x: OpExpr = "(C+D)0".parse().unwrap();
        let catalog = StepCatalog::collect(&RecouplingScheme::enumerate(&x, &cg))
            .unwrap();
        let init = OpFamily::Q(0).init_labels(&[Quanta::vacuum()]);
        let hdrt = Hdrt::new(SpinScheme::SU2, 2, &init, &[0, 0], catalog).unwrap();
        let labels = [Quanta::new(1, 1, 0), Quanta::new(2, 0, 0), Quanta::new(2, 2, 0)];
        let drt = Drt::new(SpinScheme::SU2, 2, &labels, &[0, 0]).unwrap();
        let factors = RecouplingFactorCache::new(drt.max_twos(), 4, &cg);
        let config = AssemblerConfig::default();
        let asm = OperatorAssembler::new(&drt, &hdrt, &factors, &cg, Side::Left, config)
            .unwrap();

        let mut number = TermList::new();
        number.push(&x, &[0, 0], 2.0_f64.sqrt()).unwrap();
        number.push(&x, &[1, 1], 2.0_f64.sqrt()).unwrap();
        let buf = hdrt.scatter_add(&number).unwrap();
        let b: &[f64] = &buf;
        let all = asm.assemble(&Quanta::vacuum(), &[b]).unwrap();
        let one = asm.assemble_sector(&Quanta::vacuum(), &labels[1], &labels[1], &[b])
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0], all[0][1]);

        let absent = Quanta::new(3, 1, 0);
        let err = asm.assemble_sector(&Quanta::vacuum(), &absent, &labels[0], &[b]);
        assert!(matches!(err, Err(Error::Symmetry(SymmetryError::MissingSector(_)))));
        let err = asm.assemble_sector(&Quanta::vacuum(), &labels[0], &labels[1], &[b]);
        assert!(matches!(err, Err(Error::Symmetry(SymmetryError::InadmissibleSector { .. }))));
        let err = asm.assemble_sector(&Quanta::new(0, 2, 0), &labels[2], &labels[2], &[b]);
        assert!(matches!(err, Err(Error::Symmetry(SymmetryError::MissingSector(_)))));

        // right sites flip sectors where the operator and ket spins are both
        // odd and add to the bra spin
        let right = OperatorAssembler::new(&drt, &hdrt, &factors, &cg, Side::Right, config)
            .unwrap();
        let op = Quanta::new(1, 1, 0);
        assert_eq!(asm.sector(&op, 2, 0).phase,    1.0);
        assert_eq!(right.sector(&op, 2, 0).phase, -1.0);
        assert_eq!(right.sector(&op, 1, 0).phase,  1.0);
        assert_eq!(right.sector(&Quanta::vacuum(), 2, 2).phase, 1.0);
        let mirrored = right.assemble(&Quanta::vacuum(), &[b]).unwrap();
        assert_eq!(mirrored, all);
    }
}
