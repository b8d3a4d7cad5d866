//! Recoupling factors for one site of a simultaneous bra/operator/ket walk.
//!
//! At a site cut, the bra and ket are states `|(inner, local) outer>` and the
//! operator is `[O_inner x o_local]^outer`. The reduced matrix element of the
//! whole factorizes into inner and local reduced elements times a 9j symbol
//! (Edmonds 7.1.5),
//!
//! ```text
//! <b'||[O x o]^K||k'> = sqrt((2k'+1)(2K+1)(2b+1)(2l_b+1))
//!                       { k  l_k k' }
//!                       { Ki Kl  K  } <b||O||k> <l_b||o||l_k>
//!                       { b  l_b b' }
//! ```
//!
//! with primes marking outer spins. The fermionic sign from moving the local
//! operator past the inner ket state is folded in as well.

use log::debug;
use crate::cg::SU2CG;

/// Dense table of recoupling factors.
///
/// Spin steps are `0` (inner spin one lower than outer), `1` (equal), `2`
/// (one higher), so that `inner = outer + step - 1`.
#[derive(Clone, Debug)]
pub struct RecouplingFactorCache {
    max_b: usize,
    max_op: usize,
    data: Vec<f64>,
}

impl RecouplingFactorCache {
    /// Tabulate every factor for state spins up to `max_b` and operator spins
    /// up to `max_op` (both doubled).
    pub fn new(max_b: i16, max_op: i16, cg: &SU2CG) -> Self {
        let max_b = max_b.max(0) as usize;
        let max_op = max_op.max(0) as usize;
        let (nb, no) = (max_b + 1, max_op + 1);
        let mut data = vec![0.0; nb * 3 * nb * 3 * no * no * no];
        let mut p = 0;
        for bb in 0..nb as i32 {
            for db in 0..3 {
                for bk in 0..nb as i32 {
                    for dk in 0..3 {
                        for fq in 0..no as i32 {
                            for iq in 0..no as i32 {
                                for dq in 0..no as i32 {
                                    data[p] = Self::compute(cg, bb, db, bk, dk, fq, iq, dq);
                                    p += 1;
                                }
                            }
                        }
                    }
                }
            }
        }
        debug!(
            "recoupling factors: state spin <= {}, operator spin <= {}, {} entries",
            max_b, max_op, data.len(),
        );
        Self { max_b, max_op, data }
    }

    #[allow(clippy::too_many_arguments)]
    fn compute(
        cg: &SU2CG,
        bb: i32, db: i32,
        bk: i32, dk: i32,
        fq: i32, iq: i32, dq: i32,
    ) -> f64
    {
        let (bi, bl) = (bb + db - 1, 1 - (db & 1));
        let (ki, kl) = (bk + dk - 1, 1 - (dk & 1));
        if bi < 0 || ki < 0 { return 0.0; }
        let nine = cg.wigner_9j(ki, kl, bk, iq, dq, fq, bi, bl, bb);
        if nine == 0.0 { return 0.0; }
        let norm = (((bk + 1) * (fq + 1) * (bi + 1) * (bl + 1)) as f64).sqrt();
        let sign = if ki & 1 == 1 && dq & 1 == 1 { -1.0 } else { 1.0 };
        sign * norm * nine
    }

    /// Largest state spin covered.
    pub fn max_b(&self) -> i16 { self.max_b as i16 }

    /// Largest operator spin covered.
    pub fn max_op(&self) -> i16 { self.max_op as i16 }

    /// Factor for bra outer spin `bb` with spin step `db`, ket outer spin
    /// `bk` with step `dk`, operator outer spin `fq`, inner spin `iq`, and
    /// local spin `dq`.
    ///
    /// Returns `None` outside the tabulated range.
    #[allow(clippy::too_many_arguments)]
    pub fn factor(
        &self,
        bb: i16, db: i16,
        bk: i16, dk: i16,
        fq: i16, iq: i16, dq: i16,
    ) -> Option<f64>
    {
        let (nb, no) = (self.max_b + 1, self.max_op + 1);
        let b = |x: i16| (x >= 0 && (x as usize) < nb).then_some(x as usize);
        let o = |x: i16| (x >= 0 && (x as usize) < no).then_some(x as usize);
        let d = |x: i16| (0..3).contains(&x).then_some(x as usize);
        let p = (((((b(bb)? * 3 + d(db)?) * nb + b(bk)?) * 3 + d(dk)?)
            * no + o(fq)?) * no + o(iq)?) * no + o(dq)?;
        Some(self.data[p])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool { (a - b).abs() < 1e-12 }

    #[test]
    fn scalar_steps() {
        let cache = RecouplingFactorCache::new(4, 2, &SU2CG::default());
        // identity on every site with a scalar operator: no recoupling
        assert!(approx_eq(cache.factor(1, 0, 1, 0, 0, 0, 0).unwrap(), 1.0));
        assert!(approx_eq(cache.factor(2, 0, 2, 0, 0, 0, 0).unwrap(), 1.0));
        assert!(approx_eq(cache.factor(2, 2, 2, 2, 0, 0, 0).unwrap(), 1.0));
        assert!(approx_eq(cache.factor(0, 1, 0, 1, 0, 0, 0).unwrap(), 1.0));
        // bra and ket must share spins under a scalar identity
        assert!(approx_eq(cache.factor(2, 0, 2, 2, 0, 0, 0).unwrap(), 0.0));
    }

    #[test]
    fn hopping_steps() {
        let cache = RecouplingFactorCache::new(4, 2, &SU2CG::default());
        // annihilator on the outer site of a spin-1/2 pair
        assert!(approx_eq(cache.factor(1, 1, 1, 0, 0, 1, 1).unwrap(), 0.5));
        // creator on the inner site, closing the operator
        assert!(approx_eq(cache.factor(1, 0, 0, 1, 1, 0, 1).unwrap(), 1.0));
    }

    #[test]
    fn bounds() {
        let cache = RecouplingFactorCache::new(2, 2, &SU2CG::default());
        assert_eq!(cache.max_b(), 2);
        assert_eq!(cache.max_op(), 2);
        assert!(cache.factor(3, 0, 1, 0, 0, 0, 0).is_none());
        assert!(cache.factor(1, 3, 1, 0, 0, 0, 0).is_none());
        assert!(cache.factor(1, 0, 1, 0, 3, 0, 0).is_none());
        assert!(cache.factor(1, 0, 1, 0, 0, 0, -1).is_none());
    }
}
