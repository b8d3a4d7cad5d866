//! Conserved labels attached to basis states and operators.

use std::fmt;

/// Irreducible representation of an abelian point group, multiplied by XOR.
pub type PG = u8;

/// Product of two point-group irreps.
pub fn pg_mul(a: PG, b: PG) -> PG { a ^ b }

/// Inverse of a point-group irrep (every irrep is its own inverse).
pub fn pg_inv(a: PG) -> PG { a }

/// Selects whether spin is handled as a coupled total `S` or as a projection
/// `S_z`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SpinScheme {
    SU2,
    SZ,
}

/// Particle number, doubled spin, and point-group irrep.
///
/// Under [`SpinScheme::SU2`] `twos` is `2S`; under [`SpinScheme::SZ`] it is
/// `2S_z` and may be negative.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Quanta {
    pub n: i16,
    pub twos: i16,
    pub pg: PG,
}

impl Quanta {
    pub fn new(n: i16, twos: i16, pg: PG) -> Self { Self { n, twos, pg } }

    /// The vacuum label.
    pub fn vacuum() -> Self { Self::default() }

    /// Return `true` if the label carries an odd particle number.
    pub fn is_fermion(&self) -> bool { self.n & 1 == 1 }

    /// Combine two labels under spin projection.
    pub fn compose(self, other: Self) -> Self {
        Self::new(self.n + other.n, self.twos + other.twos, pg_mul(self.pg, other.pg))
    }

    /// Inverse label under spin projection; under SU(2) the spin is kept.
    pub fn inverse(self, scheme: SpinScheme) -> Self {
        match scheme {
            SpinScheme::SU2 => Self::new(-self.n, self.twos, pg_inv(self.pg)),
            SpinScheme::SZ => Self::new(-self.n, -self.twos, pg_inv(self.pg)),
        }
    }

    /// Every label obtained by coupling `self` with `other`.
    pub fn couple(self, other: Self, scheme: SpinScheme)
        -> impl Iterator<Item = Self>
    {
        let n = self.n + other.n;
        let pg = pg_mul(self.pg, other.pg);
        let (lo, hi) = match scheme {
            SpinScheme::SU2
                => ((self.twos - other.twos).abs(), self.twos + other.twos),
            SpinScheme::SZ => {
                let t = self.twos + other.twos;
                (t, t)
            },
        };
        (lo..=hi).step_by(2).map(move |twos| Self::new(n, twos, pg))
    }
}

impl fmt::Display for Quanta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "< N={} S={}/2 PG={} >", self.n, self.twos, self.pg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn couple_su2() {
        let a = Quanta::new(1, 1, 2);
        let b = Quanta::new(2, 2, 3);
        let qs: Vec<Quanta> = a.couple(b, SpinScheme::SU2).collect();
        assert_eq!(qs, vec![Quanta::new(3, 1, 1), Quanta::new(3, 3, 1)]);
        let qs: Vec<Quanta> = a.couple(b, SpinScheme::SZ).collect();
        assert_eq!(qs, vec![Quanta::new(3, 3, 1)]);
    }

    #[test]
    fn inverse() {
        let a = Quanta::new(2, -2, 5);
        assert_eq!(a.compose(a.inverse(SpinScheme::SZ)), Quanta::vacuum());
        assert_eq!(a.inverse(SpinScheme::SU2), Quanta::new(-2, -2, 5));
        assert!(!a.is_fermion());
        assert!(Quanta::new(1, 1, 0) > Quanta::new(0, 2, 7));
    }
}
