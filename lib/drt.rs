//! Distinct row table (DRT) for spin-adapted or spin-projected occupation
//! bases.
//!
//! Each row is a triple `(a, b, c)` of counts remaining below a site cut
//! (doubly occupied, spin excess, and empty orbitals) plus the point-group
//! irrep still to be accumulated. Walking from an initial row to the vacuum
//! row through one of four steps per site spells out a basis state:
//!
//! | step | char | local state                          |
//! |------|------|--------------------------------------|
//! | 0    | `0`  | empty                                |
//! | 1    | `+`  | single, spin coupled up              |
//! | 2    | `-`  | single, spin coupled down            |
//! | 3    | `2`  | double                               |
//!
//! Under [`SpinScheme::SZ`], `+` and `-` are simply spin up and spin down.
//! Basis states are indexed lexicographically in step order, starting from
//! the outermost site.

use std::{ fmt, ops::Range };
use log::debug;
use crate::{
    error::{ BigSiteResult, ConfigError, InternalError, SymmetryError },
    quanta::{ pg_mul, Quanta, SpinScheme, PG },
};

/// Characters for the four local steps.
pub const STEP_CHARS: [char; 4] = ['0', '+', '-', '2'];

type Row = ([i16; 3], PG);

fn step_abc(scheme: SpinScheme, [a, b, c]: [i16; 3], d: usize)
    -> Option<[i16; 3]>
{
    let allowed = match (d, scheme) {
        (0, _) => c > 0,
        (1, SpinScheme::SU2) => b > 0,
        (1, SpinScheme::SZ) => b > 0 || (a > 0 && c > 0),
        (2, SpinScheme::SU2) => a > 0 && c > 0,
        (2, SpinScheme::SZ) => b < 0 || (a > 0 && c > 0),
        (3, _) => a > 0,
        _ => false,
    };
    if !allowed { return None; }
    let next = match d {
        0 => [a, b, c - 1],
        1 => [a - (b <= 0) as i16, b - 1, c - (b <= 0) as i16],
        2 => [a - (b >= 0) as i16, b + 1, c - (b >= 0) as i16],
        _ => [a - 1, b, c],
    };
    let valid = next[0] >= 0 && next[2] >= 0
        && (scheme == SpinScheme::SZ || next[1] >= 0);
    valid.then_some(next)
}

// site `k` carries irrep `gk`; only the last site must close the irrep
fn step_row(scheme: SpinScheme, (abc, g): Row, k: usize, gk: PG, d: usize)
    -> Option<Row>
{
    let abc = step_abc(scheme, abc, d)?;
    let g = if d == 1 || d == 2 { pg_mul(g, gk) } else { g };
    (k != 0 || g == 0).then_some((abc, g))
}

// rows within a level are sorted in descending order
pub(crate) fn find_desc<T: Ord>(level: &[T], row: &T) -> Option<usize> {
    level.binary_search_by(|other| row.cmp(other)).ok()
}

/// Row table over a fixed number of sites.
#[derive(Clone, Debug)]
pub struct Drt {
    scheme: SpinScheme,
    n_sites: usize,
    orb_sym: Vec<PG>,
    init_qs: Vec<Quanta>,
    abc: Vec<[i16; 3]>,
    pgs: Vec<PG>,
    levels: Vec<usize>,
    jds: Vec<[u32; 4]>,
    xs: Vec<[u64; 5]>,
}

impl Drt {
    /// Build the table for `n_sites` sites with point-group irreps `orb_sym`
    /// (indexed by site), holding one basis sector per initial label.
    ///
    /// Initial labels keep their order: sector `i` of [`Self::sector_range`]
    /// belongs to `init[i]`.
    pub fn new(
        scheme: SpinScheme,
        n_sites: usize,
        init: &[Quanta],
        orb_sym: &[PG],
    ) -> BigSiteResult<Self>
    {
        if orb_sym.len() != n_sites {
            return Err(ConfigError::SiteLabelCount {
                expected: n_sites, got: orb_sym.len() }.into());
        }
        let mut top: Vec<Row> = Vec::with_capacity(init.len());
        for (i, q) in init.iter().enumerate() {
            let row = Self::init_row(scheme, n_sites, q)?;
            if let Some(j) = top.iter().position(|r| *r == row) {
                return Err(ConfigError::DuplicateInitialLabel(j, i).into());
            }
            top.push(row);
        }

        // forward expansion, from the outermost site inward
        let mut levels: Vec<Vec<Row>> = vec![top];
        for j in 0..n_sites {
            let k = n_sites - 1 - j;
            let mut next: Vec<Row> = levels[j].iter()
                .flat_map(|&row| {
                    (0..4).filter_map(move |d| {
                        step_row(scheme, row, k, orb_sym[k], d)
                    })
                })
                .collect();
            next.sort_unstable_by(|p, q| q.cmp(p));
            next.dedup();
            levels.push(next);
        }

        // backward filter; initial rows are kept so that sector indices are
        // stable even when a label has no states
        if n_sites > 0 {
            levels[n_sites].retain(|row| *row == ([0, 0, 0], 0));
        }
        for j in (1..n_sites).rev() {
            let k = n_sites - 1 - j;
            let (head, tail) = levels.split_at_mut(j + 1);
            let below = &tail[0];
            head[j].retain(|&row| {
                (0..4).any(|d| {
                    step_row(scheme, row, k, orb_sym[k], d)
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
        let mut abc: Vec<[i16; 3]> = Vec::with_capacity(n_rows);
        let mut pgs: Vec<PG> = Vec::with_capacity(n_rows);
        let mut jds: Vec<[u32; 4]> = Vec::with_capacity(n_rows);
        for (j, level) in levels.iter().enumerate() {
            for &row in level.iter() {
                abc.push(row.0);
                pgs.push(row.1);
                let mut jd = [0_u32; 4];
                if j < n_sites {
                    let k = n_sites - 1 - j;
                    for (d, target) in jd.iter_mut().enumerate() {
                        *target = step_row(scheme, row, k, orb_sym[k], d)
                            .and_then(|next| find_desc(&levels[j + 1], &next))
                            .map(|p| (offsets[j + 1] + p) as u32)
                            .unwrap_or(0);
                    }
                }
                jds.push(jd);
            }
        }

        let mut xs: Vec<[u64; 5]> = vec![[0; 5]; n_rows];
        for j in (0..n_rows).rev() {
            if j >= offsets[n_sites] {
                // with no sites, the initial rows are terminal and only the
                // vacuum among them counts a state
                if (abc[j], pgs[j]) == ([0, 0, 0], 0) {
                    xs[j] = [0, 0, 0, 0, 1];
                }
                continue;
            }
            let mut x = [0_u64; 5];
            for d in 0..4 {
                let jd = jds[j][d] as usize;
                x[d + 1] = x[d] + if jd != 0 { xs[jd][4] } else { 0 };
            }
            xs[j] = x;
        }

        let drt = Self {
            scheme,
            n_sites,
            orb_sym: orb_sym.to_vec(),
            init_qs: init.to_vec(),
            abc,
            pgs,
            levels: offsets,
            jds,
            xs,
        };
        debug!(
            "row table: {} site(s), {} label(s), {} row(s), {} state(s)",
            n_sites, drt.n_init(), drt.n_rows(), drt.size(),
        );
        Ok(drt)
    }

    fn init_row(scheme: SpinScheme, n_sites: usize, q: &Quanta)
        -> BigSiteResult<Row>
    {
        let invalid = || ConfigError::InvalidInitialLabel {
            n: q.n, twos: q.twos, sites: n_sites };
        let t = match scheme {
            SpinScheme::SU2 if q.twos < 0 => return Err(invalid().into()),
            SpinScheme::SU2 => q.twos,
            SpinScheme::SZ => q.twos.abs(),
        };
        if q.n < 0 || (q.n + t) & 1 != 0 { return Err(invalid().into()); }
        let a = (q.n - t) / 2;
        let c = n_sites as i16 - (q.n + t) / 2;
        if a < 0 || c < 0 { return Err(invalid().into()); }
        Ok(([a, q.twos, c], q.pg))
    }

    /// Spin scheme of the table.
    pub fn scheme(&self) -> SpinScheme { self.scheme }

    /// Number of sites.
    pub fn n_sites(&self) -> usize { self.n_sites }

    /// Number of rows, including initial and terminal rows.
    pub fn n_rows(&self) -> usize { self.abc.len() }

    /// Number of initial labels.
    pub fn n_init(&self) -> usize { self.init_qs.len() }

    /// Initial labels, in sector order.
    pub fn init_labels(&self) -> &[Quanta] { &self.init_qs }

    /// Point-group irreps of the sites.
    pub fn orb_sym(&self) -> &[PG] { &self.orb_sym }

    /// Total number of basis states across all initial labels.
    pub fn size(&self) -> u64 {
        self.xs[..self.n_init()].iter().map(|x| x[4]).sum()
    }

    /// Index range of the basis states belonging to initial label `i`.
    ///
    /// *Panics if `i` is out of bounds.*
    pub fn sector_range(&self, i: usize) -> Range<u64> {
        let lo: u64 = self.xs[..i].iter().map(|x| x[4]).sum();
        lo..lo + self.xs[i][4]
    }

    /// Position of `q` among the initial labels.
    pub fn find_initial_label(&self, q: &Quanta) -> Option<usize> {
        self.init_qs.iter().position(|p| p == q)
    }

    /// Initial labels paired with their basis sizes.
    pub fn basis(&self) -> Vec<(Quanta, u64)> {
        self.init_qs.iter()
            .zip(self.xs.iter())
            .map(|(q, x)| (*q, x[4]))
            .collect()
    }

    /// Largest spin excess `b` of any row.
    pub fn max_twos(&self) -> i16 {
        self.abc.iter().map(|abc| abc[1].abs()).max().unwrap_or(0)
    }

    /// Spin excess of row `j`.
    pub fn row_twos(&self, j: usize) -> i16 { self.abc[j][1] }

    /// Target of step `d` from row `j`, `0` if there is none.
    pub fn jd(&self, j: usize, d: usize) -> usize { self.jds[j][d] as usize }

    /// Number of states reached from row `j` through steps before `d`.
    pub fn x(&self, j: usize, d: usize) -> u64 { self.xs[j][d] }

    /// Number of states below row `j`.
    pub fn subtree(&self, j: usize) -> u64 { self.xs[j][4] }

    /// Step from row `j` whose index range contains the local index `i`.
    pub(crate) fn step_of(&self, j: usize, i: u64) -> BigSiteResult<usize> {
        let x = &self.xs[j];
        if i >= x[4] { return Err(InternalError::WeightOrder(j).into()); }
        let d = (1..4).rev().find(|&d| x[d] <= i).unwrap_or(0);
        if self.jds[j][d] == 0 {
            return Err(InternalError::MissingEdge { row: j, step: d }.into());
        }
        Ok(d)
    }

    /// Occupation string of basis state `i`, one step character per site.
    pub fn decode(&self, i: u64) -> BigSiteResult<String> {
        let size = self.size();
        if i >= size { return Err(ConfigError::IndexOutOfRange(i, size).into()); }
        let (mut j, mut i) = (0, i);
        while i >= self.xs[j][4] {
            i -= self.xs[j][4];
            j += 1;
        }
        let mut steps = vec!['0'; self.n_sites];
        for k in (0..self.n_sites).rev() {
            let d = self.step_of(j, i)?;
            i -= self.xs[j][d];
            j = self.jds[j][d] as usize;
            steps[k] = STEP_CHARS[d];
        }
        Ok(steps.into_iter().collect())
    }

    /// Index of the basis state with occupation string `s`.
    pub fn encode(&self, s: &str) -> BigSiteResult<u64> {
        let steps: Vec<usize> = s.chars()
            .map(|c| {
                STEP_CHARS.iter().position(|&x| x == c)
                    .ok_or(ConfigError::InvalidStep(c))
            })
            .collect::<Result<_, _>>()?;
        if steps.len() != self.n_sites {
            return Err(ConfigError::StringLength {
                expected: self.n_sites, got: steps.len() }.into());
        }
        let mut offset: u64 = 0;
        'init: for j0 in 0..self.n_init() {
            let (mut j, mut i) = (j0, 0);
            for k in (0..self.n_sites).rev() {
                let d = steps[k];
                let jd = self.jds[j][d] as usize;
                if jd == 0 {
                    offset += self.xs[j0][4];
                    continue 'init;
                }
                i += self.xs[j][d];
                j = jd;
            }
            if self.xs[j][4] == 0 { continue; }
            return Ok(offset + i);
        }
        Err(SymmetryError::StringNotInBasis(s.to_string()).into())
    }

    fn level_of(&self, j: usize) -> usize {
        self.levels.partition_point(|&start| start <= j) - 1
    }
}

impl fmt::Display for Drt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>6} {:>4} {:>4} {:>4} {:>4} {:>3} {:>6} {:>6} {:>6} {:>6} {:>10}",
            "J", "K", "A", "B", "C", "PG", "JD0", "JD1", "JD2", "JD3", "X",
        )?;
        for j in 0..self.n_rows() {
            let [a, b, c] = self.abc[j];
            let jd = self.jds[j];
            writeln!(
                f,
                "{:>6} {:>4} {:>4} {:>4} {:>4} {:>3} {:>6} {:>6} {:>6} {:>6} {:>10}",
                j, self.n_sites - self.level_of(j), a, b, c, self.pgs[j],
                jd[0], jd[1], jd[2], jd[3], self.xs[j][4],
            )?;
        }
        Ok(())
    }
}
