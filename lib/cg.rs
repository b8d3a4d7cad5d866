//! SU(2) coupling coefficients over doubled integer spins.
//!
//! All arguments are `2j` / `2m`, so half-integer spins are representable
//! with plain integers. Every function returns zero when a triangle or
//! parity condition fails, which lets callers sum over loose ranges.
//!
//! # Further reading
//! - A. R. Edmonds, *Angular Momentum in Quantum Mechanics* (Princeton, 1957),
//! eqs. 3.6.11, 6.3.7 and 6.4.3.

/// Factorial table for Racah-formula evaluation.
#[derive(Clone, Debug)]
pub struct SU2CG {
    fact: Vec<f64>,
}

impl Default for SU2CG {
    fn default() -> Self { Self::new(100) }
}

impl SU2CG {
    /// Tabulate factorials up to `n_max!`.
    ///
    /// *Panics if `n_max > 170`* (the result would overflow `f64`).
    pub fn new(n_max: usize) -> Self {
        assert!(n_max <= 170, "factorial table too large");
        let mut fact = Vec::with_capacity(n_max + 1);
        fact.push(1.0);
        for k in 1..=n_max {
            fact.push(fact[k - 1] * k as f64);
        }
        Self { fact }
    }

    fn f(&self, k: i32) -> f64 { self.fact[k as usize] }

    /// Return `true` if `(ta, tb, tc)` can be coupled.
    pub fn triangle(ta: i32, tb: i32, tc: i32) -> bool {
        ta >= 0 && tb >= 0 && tc >= 0
            && (ta + tb + tc) & 1 == 0
            && tc >= (ta - tb).abs()
            && tc <= ta + tb
    }

    /// Sign `(-1)^(ja + jb - jc)`.
    pub fn phase(ta: i32, tb: i32, tc: i32) -> f64 {
        if (ta + tb - tc) & 2 != 0 { -1.0 } else { 1.0 }
    }

    fn delta(&self, ta: i32, tb: i32, tc: i32) -> f64 {
        (
            self.f((ta + tb - tc) / 2)
            * self.f((ta - tb + tc) / 2)
            * self.f((-ta + tb + tc) / 2)
            / self.f((ta + tb + tc) / 2 + 1)
        ).sqrt()
    }

    /// Clebsch-Gordan coefficient `<ja ma jb mb | jc mc>`.
    pub fn cg(&self, ta: i32, tb: i32, tc: i32, tma: i32, tmb: i32, tmc: i32)
        -> f64
    {
        if !Self::triangle(ta, tb, tc)
            || tma + tmb != tmc
            || tma.abs() > ta || tmb.abs() > tb || tmc.abs() > tc
            || (ta + tma) & 1 != 0 || (tb + tmb) & 1 != 0 || (tc + tmc) & 1 != 0
        {
            return 0.0;
        }
        let pre = ((tc + 1) as f64).sqrt()
            * self.delta(ta, tb, tc)
            * (
                self.f((ta + tma) / 2) * self.f((ta - tma) / 2)
                * self.f((tb + tmb) / 2) * self.f((tb - tmb) / 2)
                * self.f((tc + tmc) / 2) * self.f((tc - tmc) / 2)
            ).sqrt();
        let d2 = (ta + tb - tc) / 2;
        let d3 = (ta - tma) / 2;
        let d4 = (tb + tmb) / 2;
        let d5 = (tc - tb + tma) / 2;
        let d6 = (tc - ta - tmb) / 2;
        let kmin = 0.max(-d5).max(-d6);
        let kmax = d2.min(d3).min(d4);
        let sum: f64 = (kmin..=kmax)
            .map(|k| {
                let term = 1.0 / (
                    self.f(k) * self.f(d2 - k) * self.f(d3 - k)
                    * self.f(d4 - k) * self.f(d5 + k) * self.f(d6 + k)
                );
                if k & 1 == 0 { term } else { -term }
            })
            .sum();
        pre * sum
    }

    /// Wigner 6j symbol `{a b c; d e f}`.
    pub fn wigner_6j(&self, ta: i32, tb: i32, tc: i32, td: i32, te: i32, tf: i32)
        -> f64
    {
        if !Self::triangle(ta, tb, tc) || !Self::triangle(ta, te, tf)
            || !Self::triangle(td, tb, tf) || !Self::triangle(td, te, tc)
        {
            return 0.0;
        }
        let pre = self.delta(ta, tb, tc) * self.delta(ta, te, tf)
            * self.delta(td, tb, tf) * self.delta(td, te, tc);
        let a1 = (ta + tb + tc) / 2;
        let a2 = (ta + te + tf) / 2;
        let a3 = (td + tb + tf) / 2;
        let a4 = (td + te + tc) / 2;
        let b1 = (ta + tb + td + te) / 2;
        let b2 = (tb + tc + te + tf) / 2;
        let b3 = (tc + ta + tf + td) / 2;
        let tmin = a1.max(a2).max(a3).max(a4);
        let tmax = b1.min(b2).min(b3);
        let sum: f64 = (tmin..=tmax)
            .map(|t| {
                let term = self.f(t + 1) / (
                    self.f(t - a1) * self.f(t - a2) * self.f(t - a3)
                    * self.f(t - a4) * self.f(b1 - t) * self.f(b2 - t)
                    * self.f(b3 - t)
                );
                if t & 1 == 0 { term } else { -term }
            })
            .sum();
        pre * sum
    }

    /// Wigner 9j symbol `{a b c; d e f; g h i}`, as a sum over products of
    /// three 6j symbols.
    #[allow(clippy::too_many_arguments)]
    pub fn wigner_9j(
        &self,
        ta: i32, tb: i32, tc: i32,
        td: i32, te: i32, tf: i32,
        tg: i32, th: i32, ti: i32,
    ) -> f64
    {
        if !Self::triangle(ta, tb, tc) || !Self::triangle(td, te, tf)
            || !Self::triangle(tg, th, ti) || !Self::triangle(ta, td, tg)
            || !Self::triangle(tb, te, th) || !Self::triangle(tc, tf, ti)
        {
            return 0.0;
        }
        let xmin = (ta - ti).abs().max((td - th).abs()).max((tb - tf).abs());
        let xmax = (ta + ti).min(td + th).min(tb + tf);
        (xmin..=xmax).step_by(2)
            .map(|tx| {
                let sign = if tx & 1 == 0 { 1.0 } else { -1.0 };
                sign * (tx + 1) as f64
                    * self.wigner_6j(ta, td, tg, th, ti, tx)
                    * self.wigner_6j(tb, te, th, td, tx, tf)
                    * self.wigner_6j(tc, tf, ti, tx, ta, tb)
            })
            .sum()
    }
}
