//! Operator families of a big site.
//!
//! Each family is a fixed set of raw expressions whose terms carry
//! integral-derived coefficients. Families share one operator row table;
//! operators within a family differ only in their coefficients and, possibly,
//! their operator label.
//!
//! | family | raw expressions                     | `(weight, length)` |
//! |--------|-------------------------------------|--------------------|
//! | `H`    | `((C+(C+D)0)1+D)0`, `(C+D)0`        | `w <= l`, `l in {2, 4}` |
//! | `R`    | `((C+D)0+D)1`, `D`                  | `w <= l`, `l in {1, 3}` |
//! | `RD`   | `(C+(C+D)0)1`, `C`                  | `w <= l`, `l in {1, 3}` |
//! | `P`    | `(D+D)0` or `(D+D)2`                | `w <= 2`, `l = 2`  |
//! | `PD`   | `(C+C)0` or `(C+C)2`                | `w <= 2`, `l = 2`  |
//! | `Q`    | `(C+D)0` or `(C+D)2`                | `w <= 2`, `l = 2`  |
//!
//! A big site sits either at the left or at the right end of the orbital
//! chain ([`Side`]). A right big site numbers its orbitals from the far end,
//! so local orbital `x` is orbital `n_all - 1 - x` of the integrals, and its
//! spin-1 pair operators pick up an extra sign.

use std::fmt;
use crate::{
    error::{ BigSiteResult, ConfigError },
    expr::{ ExprResult, OpExpr },
    integrals::IntegralSource,
    quanta::{ pg_mul, Quanta, PG },
    scheme::TermList,
};

/// End of the orbital chain occupied by a big site.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Side {
    #[default]
    Left,
    Right,
}

impl Side {
    /// Integral index of local orbital `x` among `n_all` orbitals.
    pub fn orbital(self, x: usize, n_all: usize) -> usize {
        match self {
            Self::Left => x,
            Self::Right => n_all - 1 - x,
        }
    }

    /// Irreps of the `n_orbs` big-site orbitals in local order, taken from
    /// the irreps of every orbital.
    ///
    /// *Panics if `n_orbs > orb_sym.len()`.*
    pub fn site_sym(self, n_orbs: usize, orb_sym: &[PG]) -> Vec<PG> {
        (0..n_orbs).map(|x| orb_sym[self.orbital(x, orb_sym.len())]).collect()
    }

    /// Sign of the spin-`s` pair operators.
    fn pair_sign(self, s: u8) -> f64 {
        if self == Self::Right && s == 1 { -1.0 } else { 1.0 }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

/// A family of operators sharing raw expressions.
///
/// Pair families carry the operator spin `s` (0 or 1).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpFamily {
    H,
    R,
    RD,
    P(u8),
    PD(u8),
    Q(u8),
}

impl OpFamily {
    /// Raw expressions, in the order the term builders fill them.
    pub fn exprs(self) -> &'static [&'static str] {
        match self {
            Self::H => &["((C+(C+D)0)1+D)0", "(C+D)0"],
            Self::R => &["((C+D)0+D)1", "D"],
            Self::RD => &["(C+(C+D)0)1", "C"],
            Self::P(0) => &["(D+D)0"],
            Self::P(_) => &["(D+D)2"],
            Self::PD(0) => &["(C+C)0"],
            Self::PD(_) => &["(C+C)2"],
            Self::Q(0) => &["(C+D)0"],
            Self::Q(_) => &["(C+D)2"],
        }
    }

    /// Parsed raw expressions.
    pub fn parsed_exprs(self) -> ExprResult<Vec<OpExpr>> {
        self.exprs().iter().map(|s| s.parse()).collect()
    }

    /// Operator lengths of the family's terms.
    pub fn lengths(self) -> &'static [i16] {
        match self {
            Self::H => &[2, 4],
            Self::R | Self::RD => &[1, 3],
            Self::P(_) | Self::PD(_) | Self::Q(_) => &[2],
        }
    }

    /// Initial operator row labels for a set of operator labels: every
    /// weight from 1 up to each length.
    pub fn init_labels(self, labels: &[Quanta]) -> Vec<(Quanta, i16, i16)> {
        labels.iter()
            .flat_map(|&q| {
                self.lengths().iter()
                    .flat_map(move |&l| (1..=l).map(move |w| (q, w, l)))
            })
            .collect()
    }
}

impl fmt::Display for OpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::H => write!(f, "H"),
            Self::R => write!(f, "R"),
            Self::RD => write!(f, "RD"),
            Self::P(s) => write!(f, "P{}", s),
            Self::PD(s) => write!(f, "PD{}", s),
            Self::Q(s) => write!(f, "Q{}", s),
        }
    }
}

/// A single operator of a big site.
///
/// Orbital indices of `R`, `RD`, `P`, `PD` and `Q` refer to the full orbital
/// space of the integrals, not just the orbitals of the big site. Pair
/// operators carry spin `s` of 0 or 1; anything else is rejected by
/// [`OpKind::check`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpKind {
    /// Hamiltonian restricted to the big site.
    H,
    /// Complementary annihilation operator of orbital `i`.
    R(u16),
    /// Complementary creation operator of orbital `i`.
    RD(u16),
    /// Pair annihilation complement with spin `s`.
    P { i: u16, j: u16, s: u8 },
    /// Pair creation complement with spin `s`.
    PD { i: u16, j: u16, s: u8 },
    /// Particle-hole complement with spin `s`.
    Q { i: u16, j: u16, s: u8 },
}

impl OpKind {
    pub fn family(&self) -> OpFamily {
        match *self {
            Self::H => OpFamily::H,
            Self::R(_) => OpFamily::R,
            Self::RD(_) => OpFamily::RD,
            Self::P { s, .. } => OpFamily::P(s),
            Self::PD { s, .. } => OpFamily::PD(s),
            Self::Q { s, .. } => OpFamily::Q(s),
        }
    }

    /// Operator label, given the irreps of every orbital.
    ///
    /// *Panics if an orbital index is out of bounds.*
    pub fn label(&self, orb_sym: &[PG]) -> Quanta {
        let g = |i: u16| orb_sym[i as usize];
        match *self {
            Self::H => Quanta::vacuum(),
            Self::R(i) => Quanta::new(-1, 1, g(i)),
            Self::RD(i) => Quanta::new(1, 1, g(i)),
            Self::P { i, j, s } => Quanta::new(-2, 2 * s as i16, pg_mul(g(i), g(j))),
            Self::PD { i, j, s } => Quanta::new(2, 2 * s as i16, pg_mul(g(i), g(j))),
            Self::Q { i, j, s } => Quanta::new(0, 2 * s as i16, pg_mul(g(i), g(j))),
        }
    }

    /// Check orbital indices against `n_all` orbitals and the pair spin.
    pub fn check(&self, n_all: usize) -> BigSiteResult<()> {
        let (idxs, s): (&[u16], u8) = match self {
            Self::H => (&[], 0),
            Self::R(i) | Self::RD(i) => (std::slice::from_ref(i), 0),
            Self::P { i, j, s } | Self::PD { i, j, s } | Self::Q { i, j, s }
                => (&[*i, *j], *s),
        };
        if s > 1 {
            return Err(ConfigError::OperatorSpin { op: self.to_string(), s }.into());
        }
        if let Some(&i) = idxs.iter().find(|&&i| i as usize >= n_all) {
            return Err(
                ConfigError::IndexOutOfRange(i as u64, n_all as u64).into());
        }
        Ok(())
    }

    /// Raw terms of the operator over the `n_orbs` orbitals of a big site on
    /// `side`, keeping coefficients with magnitude above `cutoff`. Term
    /// indices are local to the big site.
    pub fn terms<I>(&self, ints: &I, n_orbs: usize, side: Side, cutoff: f64)
        -> BigSiteResult<TermList>
    where I: IntegralSource + ?Sized
    {
        let n_all = ints.n_sites();
        if n_orbs > n_all {
            return Err(ConfigError::OrbitalCount { n_orbs, n_all }.into());
        }
        self.check(n_all)?;
        let exprs = self.family().parsed_exprs()?;
        let n = n_orbs as u16;
        let u = |x: u16| x as usize;
        let g = |x: u16| side.orbital(x as usize, n_all);
        let mut terms = TermList::new();
        let mut push = |ix: usize, idxs: &[u16], v: f64| -> BigSiteResult<()> {
            if v.abs() > cutoff { terms.push(&exprs[ix], idxs, v)?; }
            Ok(())
        };
        match *self {
            Self::H => {
                for a0 in 0..n {
                    for a1 in 0..n {
                        for a2 in 0..n {
                            for a3 in 0..n {
                                let v = ints.v(g(a0), g(a3), g(a1), g(a2));
                                push(0, &[a0, a1, a2, a3], v)?;
                            }
                        }
                    }
                }
                for a0 in 0..n {
                    for a1 in 0..n {
                        push(1, &[a0, a1], 2.0_f64.sqrt() * ints.t(g(a0), g(a1)))?;
                    }
                }
            },
            Self::R(i) | Self::RD(i) => {
                let normal = matches!(self, Self::R(_));
                for a0 in 0..n {
                    for a1 in 0..n {
                        for a2 in 0..n {
                            let v = if normal {
                                ints.v(u(i), g(a2), g(a0), g(a1))
                            } else {
                                ints.v(u(i), g(a0), g(a2), g(a1))
                            };
                            push(0, &[a0, a1, a2], v)?;
                        }
                    }
                }
                for a0 in 0..n {
                    push(1, &[a0], 2.0_f64.sqrt() / 4.0 * ints.t(u(i), g(a0)))?;
                }
            },
            Self::P { i, j, s } => {
                let sign = side.pair_sign(s);
                for a0 in 0..n {
                    for a1 in 0..n {
                        let v = ints.v(u(i), g(a0), u(j), g(a1));
                        push(0, &[a0, a1], sign * v)?;
                    }
                }
            },
            Self::PD { i, j, s } => {
                let sign = side.pair_sign(s);
                for a0 in 0..n {
                    for a1 in 0..n {
                        let v = ints.v(u(i), g(a1), u(j), g(a0));
                        push(0, &[a0, a1], sign * v)?;
                    }
                }
            },
            Self::Q { i, j, s } => {
                for a0 in 0..n {
                    for a1 in 0..n {
                        let exchange = ints.v(u(i), g(a1), g(a0), u(j));
                        let v = if s == 0 {
                            2.0 * ints.v(u(i), u(j), g(a0), g(a1)) - exchange
                        } else {
                            side.pair_sign(s) * exchange
                        };
                        push(0, &[a0, a1], v)?;
                    }
                }
            },
        }
        Ok(terms)
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::H => write!(f, "H"),
            Self::R(i) => write!(f, "R[{}]", i),
            Self::RD(i) => write!(f, "RD[{}]", i),
            Self::P { i, j, s } => write!(f, "P{}[{},{}]", s, i, j),
            Self::PD { i, j, s } => write!(f, "PD{}[{},{}]", s, i, j),
            Self::Q { i, j, s } => write!(f, "Q{}[{},{}]", s, i, j),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::integrals::Integrals;
    use super::*;

    #[test]
    fn labels() {
        let orb_sym: Vec<PG> = vec![0, 1, 3];
        assert_eq!(OpKind::H.label(&orb_sym),      Quanta::vacuum());
        assert_eq!(OpKind::R(1).label(&orb_sym),   Quanta::new(-1, 1, 1));
        assert_eq!(OpKind::RD(2).label(&orb_sym),  Quanta::new(1, 1, 3));
        assert_eq!(
            OpKind::P { i: 1, j: 2, s: 1 }.label(&orb_sym), Quanta::new(-2, 2, 2));
        assert_eq!(
            OpKind::PD { i: 0, j: 2, s: 0 }.label(&orb_sym), Quanta::new(2, 0, 3));
        assert_eq!(
            OpKind::Q { i: 1, j: 1, s: 0 }.label(&orb_sym), Quanta::new(0, 0, 0));
    }

    #[test]
    fn families() {
        assert_eq!(OpKind::Q { i: 0, j: 1, s: 1 }.family(), OpFamily::Q(1));
        assert_eq!(OpKind::R(3).family(), OpFamily::R);
        assert_eq!(OpFamily::P(1).exprs(), &["(D+D)2"]);
        assert_eq!(OpFamily::H.parsed_exprs().unwrap().len(), 2);
        let init = OpFamily::R.init_labels(&[Quanta::new(-1, 1, 0)]);
        assert_eq!(init.len(), 1 + 3);
        assert_eq!(init[0], (Quanta::new(-1, 1, 0), 1, 1));
        assert_eq!(init[3], (Quanta::new(-1, 1, 0), 3, 3));
        assert_eq!(OpFamily::H.init_labels(&[Quanta::vacuum()]).len(), 2 + 4);
        assert_eq!(format!("{}", OpKind::P { i: 2, j: 0, s: 1 }), "P1[2,0]");
    }

    #[test]
    fn hamiltonian_terms() {
        let ints = Integrals::hubbard(3, 1.0, 4.0, false);
        let terms = OpKind::H.terms(&ints, 3, Side::Left, 1e-14).unwrap();
        // two hopping terms per bond, one on-site repulsion per site
        assert_eq!(terms.len(), 4 + 3);
        let found = terms.iter()
            .find(|(x, idxs, _)| x.to_string() == "(C+D)0" && *idxs == [0, 1])
            .map(|(_, _, v)| v)
            .unwrap();
        assert!((found + 2.0_f64.sqrt()).abs() < 1e-12);
        // restricting to a sub-chain drops terms touching the outer orbitals
        let inner = OpKind::H.terms(&ints, 2, Side::Left, 1e-14).unwrap();
        assert_eq!(inner.len(), 2 + 2);
    }

    #[test]
    fn pair_terms() {
        let mut ints = Integrals::hubbard(3, 0.0, 0.0, false);
        ints.v[[2, 0, 1, 1]] = 0.5;
        let p = OpKind::P { i: 2, j: 1, s: 0 }.terms(&ints, 2, Side::Left, 1e-14).unwrap();
        assert_eq!(p.len(), 1);
        assert_eq!(p.indices[0], vec![0, 1]);
        // only the exchange part survives
        let q = OpKind::Q { i: 2, j: 1, s: 1 }.terms(&ints, 2, Side::Left, 1e-14).unwrap();
        assert_eq!(q.indices[0], vec![1, 0]);
        assert_eq!(q.data[0],    vec![0.5]);
        let q = OpKind::Q { i: 2, j: 1, s: 0 }.terms(&ints, 2, Side::Left, 1e-14).unwrap();
        assert_eq!(q.data[0],    vec![-0.5]);
        let pd = OpKind::PD { i: 0, j: 0, s: 0 }.terms(&ints, 2, Side::Left, 1e-14).unwrap();
        assert!(pd.is_empty());
    }

    #[test]
    fn right_side_terms() {
        // local orbitals 0 and 1 of a right site are orbitals 2 and 1
        let mut ints = Integrals::hubbard(3, 0.0, 0.0, false);
        ints.v[[0, 2, 0, 1]] = 0.5;
        ints.t[[0, 2]] = 0.25;
        assert_eq!(Side::Right.orbital(0, 3), 2);
        assert_eq!(Side::Right.site_sym(2, &[0, 1, 3]), vec![3, 1]);
        assert_eq!(Side::Left.site_sym(2, &[0, 1, 3]), vec![0, 1]);
        let p0 = OpKind::P { i: 0, j: 0, s: 0 }.terms(&ints, 2, Side::Right, 1e-14).unwrap();
        assert_eq!(p0.indices[0], vec![0, 1]);
        assert_eq!(p0.data[0],    vec![0.5]);
        // spin-1 pairs change sign on a right site
        let p1 = OpKind::P { i: 0, j: 0, s: 1 }.terms(&ints, 2, Side::Right, 1e-14).unwrap();
        assert_eq!(p1.data[0],    vec![-0.5]);
        let left = OpKind::P { i: 0, j: 0, s: 1 }.terms(&ints, 2, Side::Left, 1e-14).unwrap();
        assert!(left.is_empty());
        let rd = OpKind::RD(0).terms(&ints, 2, Side::Right, 1e-14).unwrap();
        let one = rd.iter()
            .find(|(x, _, _)| x.to_string() == "C")
            .unwrap();
        assert_eq!(one.1, &[0]);
        assert!((one.2 - 2.0_f64.sqrt() / 4.0 * 0.25).abs() < 1e-15);
    }

    #[test]
    fn rejected_operators() {
        let ints = Integrals::hubbard(3, 1.0, 1.0, false);
        let wide = OpKind::Q { i: 0, j: 1, s: 2 };
        assert!(matches!(
            wide.check(3),
            Err(crate::error::Error::Config(ConfigError::OperatorSpin { s: 2, .. })),
        ));
        assert!(wide.terms(&ints, 2, Side::Left, 1e-14).is_err());
        assert!(OpKind::R(3).check(3).is_err());
        assert!(OpKind::PD { i: 0, j: 5, s: 1 }.check(3).is_err());
        assert!(OpKind::H.check(0).is_ok());
        assert!(OpKind::H.terms(&ints, 4, Side::Right, 1e-14).is_err());
    }
}
