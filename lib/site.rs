//! A big site at either end of the orbital chain: the spin-adapted basis of
//! its orbitals and the operator blocks a sweep needs from it.

use std::collections::BTreeMap;
use itertools::Itertools;
use log::info;
use crate::{
    assemble::{ AssemblerConfig, OperatorAssembler },
    cg::SU2CG,
    drt::Drt,
    error::{ BigSiteResult, ConfigError, SymmetryError },
    factors::RecouplingFactorCache,
    hdrt::{ Hdrt, StepCatalog },
    integrals::{ IntegralDistributor, IntegralSource },
    matrix::{ OperatorBlock, SectorMatrix },
    ops::{ OpFamily, OpKind, Side },
    quanta::{ Quanta, SpinScheme, PG },
    scheme::{ RecouplingScheme, TermList },
};

// operator spins never exceed this within the supported families
const MAX_OP_TWOS: i16 = 4;

/// The `n_orbs` outermost orbitals at one end of a system, treated as a
/// single site.
///
/// A left big site covers orbitals `0..n_orbs`; a right big site covers the
/// last `n_orbs` orbitals and numbers them from the far end, so that its
/// local orbital `x` is orbital `n_all - 1 - x`.
pub struct BigSite<I> {
    side: Side,
    n_orbs: usize,
    orb_sym: Vec<PG>,
    ints: I,
    drt: Drt,
    cg: SU2CG,
    factors: RecouplingFactorCache,
    config: AssemblerConfig,
    pool: rayon::ThreadPool,
}

impl<I> BigSite<I>
where I: IntegralSource
{
    /// Build the basis over `targets` and the recoupling factors.
    ///
    /// `orb_sym` holds the irrep of every orbital of `ints`.
    pub fn new(
        targets: &[Quanta],
        side: Side,
        n_orbs: usize,
        orb_sym: &[PG],
        ints: I,
        config: AssemblerConfig,
    ) -> BigSiteResult<Self>
    {
        if orb_sym.len() != ints.n_sites() {
            return Err(ConfigError::SiteLabelCount {
                expected: ints.n_sites(), got: orb_sym.len() }.into());
        }
        if n_orbs > orb_sym.len() {
            return Err(ConfigError::OrbitalCount {
                n_orbs, n_all: orb_sym.len() }.into());
        }
        let site_sym = side.site_sym(n_orbs, orb_sym);
        let drt = Drt::new(SpinScheme::SU2, n_orbs, targets, &site_sym)?;
        let cg = SU2CG::default();
        let factors = RecouplingFactorCache::new(drt.max_twos(), MAX_OP_TWOS, &cg);
        let pool = config.thread_pool()?;
        info!(
            "{} big site: {} of {} orbital(s), {} sector(s), {} state(s), {} thread(s)",
            side, n_orbs, orb_sym.len(), drt.n_init(), drt.size(),
            pool.current_num_threads(),
        );
        Ok(Self {
            side,
            n_orbs,
            orb_sym: orb_sym.to_vec(),
            ints,
            drt,
            cg,
            factors,
            config,
            pool,
        })
    }

    /// Labels reachable on the `n_orbs` orbitals of a big site on `side`, in
    /// ascending order.
    ///
    /// A left big site keeps labels with at most `n_max_elec` holes below a
    /// completely filled site; a right big site keeps labels with at most
    /// `n_max_elec` electrons.
    pub fn target_quanta(side: Side, n_orbs: usize, n_max_elec: usize, orb_sym: &[PG])
        -> Vec<Quanta>
    {
        let site_sym = side.site_sym(n_orbs.min(orb_sym.len()), orb_sym);
        let mut acc: Vec<Quanta> = vec![Quanta::vacuum()];
        for &g in site_sym.iter() {
            let local = [Quanta::vacuum(), Quanta::new(1, 1, g), Quanta::new(2, 0, 0)];
            acc = acc.iter()
                .flat_map(|a| local.iter().flat_map(move |l| a.couple(*l, SpinScheme::SU2)))
                .sorted()
                .dedup()
                .collect();
        }
        let n_max_elec = n_max_elec as i16;
        match side {
            Side::Left => {
                let max_n = acc.iter().map(|q| q.n).max().unwrap_or(0);
                acc.retain(|q| q.n >= max_n - n_max_elec && q.twos <= n_max_elec);
            },
            Side::Right => {
                acc.retain(|q| q.n <= n_max_elec);
            },
        }
        acc
    }

    pub fn side(&self) -> Side { self.side }

    pub fn n_orbs(&self) -> usize { self.n_orbs }

    /// Basis row table.
    pub fn drt(&self) -> &Drt { &self.drt }

    /// Sector labels with their dimensions.
    pub fn basis(&self) -> Vec<(Quanta, u64)> { self.drt.basis() }

    pub fn config(&self) -> &AssemblerConfig { &self.config }

    pub fn integrals(&self) -> &I { &self.ints }

    /// Assemble the blocks of every operator in `kinds`, in the same order.
    ///
    /// Operators are grouped by family, so that each family builds one
    /// operator row table and one assembler, and then by operator label, so
    /// that each walk over the basis serves every operator sharing a label.
    pub fn build_operators(&self, kinds: &[OpKind]) -> BigSiteResult<Vec<OperatorBlock>> {
        let n_all = self.orb_sym.len();
        let mut groups: BTreeMap<OpFamily, BTreeMap<Quanta, Vec<usize>>> = BTreeMap::new();
        for (ix, kind) in kinds.iter().enumerate() {
            kind.check(n_all)?;
            groups.entry(kind.family())
                .or_default()
                .entry(kind.label(&self.orb_sym))
                .or_default()
                .push(ix);
        }
        let mut out: Vec<Option<OperatorBlock>> = vec![None; kinds.len()];
        self.pool.install(|| -> BigSiteResult<()> {
            for (family, by_label) in groups.iter() {
                let blocks = self.build_family(
                    *family, by_label, kinds, |asm, op, coefs| asm.assemble(op, coefs))?;
                for (&ix, block) in by_label.values().flatten().zip(blocks) {
                    out[ix] = Some(block);
                }
            }
            Ok(())
        })?;
        Ok(out.into_iter().flatten().collect())
    }

    /// Assemble the single sector `bra <- ket` of one operator.
    ///
    /// Fails with a symmetry error if either label is absent from the basis
    /// or if the operator cannot connect them.
    pub fn build_sector(&self, kind: OpKind, bra: &Quanta, ket: &Quanta)
        -> BigSiteResult<SectorMatrix>
    {
        kind.check(self.orb_sym.len())?;
        let by_label = BTreeMap::from([(kind.label(&self.orb_sym), vec![0])]);
        let blocks = self.pool.install(|| {
            self.build_family(kind.family(), &by_label, &[kind], |asm, op, coefs| {
                let mats = asm.assemble_sector(op, bra, ket, coefs)?;
                Ok(mats.into_iter().map(|m| vec![m]).collect())
            })
        })?;
        blocks.into_iter()
            .flat_map(|block| block.sectors)
            .next()
            .ok_or_else(|| SymmetryError::MissingSector(bra.to_string()).into())
    }

    // blocks of the operators in `by_label`, in label order; `assemble` maps
    // an operator label and its coefficient buffers to sectors per buffer
    fn build_family<F>(
        &self,
        family: OpFamily,
        by_label: &BTreeMap<Quanta, Vec<usize>>,
        kinds: &[OpKind],
        assemble: F,
    ) -> BigSiteResult<Vec<OperatorBlock>>
    where F: Fn(&OperatorAssembler<'_>, &Quanta, &[&[f64]])
        -> BigSiteResult<Vec<Vec<SectorMatrix>>>
    {
        let cutoff = self.config.cutoff;
        let schemes: Vec<RecouplingScheme> = family.parsed_exprs()?.iter()
            .flat_map(|x| RecouplingScheme::enumerate(x, &self.cg))
            .collect();
        let catalog = StepCatalog::collect(&schemes)?;
        let labels: Vec<Quanta> = by_label.keys().copied().collect();
        let hdrt = Hdrt::new(
            SpinScheme::SU2,
            self.n_orbs,
            &family.init_labels(&labels),
            self.drt.orb_sym(),
            catalog,
        )?;

        let terms: Vec<TermList> = by_label.values()
            .flat_map(|ixs| ixs.iter())
            .map(|&ix| -> BigSiteResult<TermList> {
                let raw = kinds[ix].terms(&self.ints, self.n_orbs, self.side, cutoff)?;
                Ok(raw.site_ordered(&self.cg, cutoff))
            })
            .collect::<BigSiteResult<_>>()?;
        let refs: Vec<&TermList> = terms.iter().collect();
        let dist = IntegralDistributor::new(&hdrt, &refs)?;
        let asm = OperatorAssembler::new(
            &self.drt, &hdrt, &self.factors, &self.cg, self.side, self.config)?;

        let mut out: Vec<OperatorBlock> = Vec::with_capacity(terms.len());
        let mut terms_iter = terms.iter();
        for (label, ixs) in by_label.iter() {
            let bufs: Vec<Vec<f64>> = terms_iter.by_ref()
                .take(ixs.len())
                .map(|t| dist.distribute(t))
                .collect::<BigSiteResult<_>>()?;
            let refs: Vec<&[f64]> = bufs.iter().map(|b| b.as_slice()).collect();
            let mats = assemble(&asm, label, &refs)?;
            for (&ix, sectors) in ixs.iter().zip(mats) {
                out.push(OperatorBlock { kind: kinds[ix], op: *label, sectors });
            }
        }
        info!(
            "{}: {} label(s), {} operator path(s), {} term(s)",
            family, by_label.len(), hdrt.size(),
            terms.iter().map(|t| t.len()).sum::<usize>(),
        );
        Ok(out)
    }
}
