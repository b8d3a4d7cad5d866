//! Spin-coupled operator expressions.
//!
//! An expression is a binary tree of elementary creation (`C`) and
//! annihilation (`D`) operators, each internal node coupling its two children
//! to a definite total spin. The canonical text form nests every coupling in
//! parentheses followed by the doubled spin, e.g. `((C+(C+D)0)1+D)0`.

use std::{ fmt, str::FromStr };
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExprError {
    #[error("parse error at byte {0} in '{1}'")]
    Parse(usize, String),

    #[error("coupling ({0}, {1}) -> {2} violates the triangle rule")]
    Triangle(i16, i16, i16),

    #[error("operators [{1}, {2}) of '{0}' do not form a sub-expression")]
    NotSubtree(String, usize, usize),
}
pub type ExprResult<T> = Result<T, ExprError>;

/// A single-site creation or annihilation operator, both carrying spin 1/2.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElemOp {
    C,
    D,
}

impl ElemOp {
    /// Change in particle number.
    pub fn dn(self) -> i16 {
        match self {
            Self::C => 1,
            Self::D => -1,
        }
    }
}

impl fmt::Display for ElemOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::C => write!(f, "C"),
            Self::D => write!(f, "D"),
        }
    }
}

/// Binary coupling tree of elementary operators.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OpExpr {
    Leaf(ElemOp),
    Couple(Box<OpExpr>, Box<OpExpr>, i16),
}

impl OpExpr {
    /// Couple two expressions to total spin `twos`.
    pub fn couple(left: Self, right: Self, twos: i16) -> ExprResult<Self> {
        let (a, b) = (left.twos(), right.twos());
        if twos < (a - b).abs() || twos > a + b || (a + b + twos) & 1 != 0 {
            return Err(ExprError::Triangle(a, b, twos));
        }
        Ok(Self::Couple(Box::new(left), Box::new(right), twos))
    }

    /// Doubled total spin.
    pub fn twos(&self) -> i16 {
        match self {
            Self::Leaf(_) => 1,
            Self::Couple(_, _, twos) => *twos,
        }
    }

    /// Number of elementary operators.
    pub fn count_ops(&self) -> usize {
        match self {
            Self::Leaf(_) => 1,
            Self::Couple(l, r, _) => l.count_ops() + r.count_ops(),
        }
    }

    /// Number of creation operators.
    pub fn count_c(&self) -> usize {
        self.leaves().into_iter().filter(|op| *op == ElemOp::C).count()
    }

    /// Net change in particle number.
    pub fn dn(&self) -> i16 {
        match self {
            Self::Leaf(op) => op.dn(),
            Self::Couple(l, r, _) => l.dn() + r.dn(),
        }
    }

    /// Elementary operators in left-to-right order.
    pub fn leaves(&self) -> Vec<ElemOp> {
        let mut acc = Vec::with_capacity(self.count_ops());
        self.collect_leaves(&mut acc);
        acc
    }

    fn collect_leaves(&self, acc: &mut Vec<ElemOp>) {
        match self {
            Self::Leaf(op) => acc.push(*op),
            Self::Couple(l, r, _) => {
                l.collect_leaves(acc);
                r.collect_leaves(acc);
            },
        }
    }

    /// Return the sub-tree covering exactly the operators `[k, l)`.
    ///
    /// An empty range gives `None` (the identity).
    pub fn sub_expr(&self, k: usize, l: usize) -> ExprResult<Option<&Self>> {
        if k == l { return Ok(None); }
        self.find_span(0, k, l)
            .map(Some)
            .ok_or_else(|| ExprError::NotSubtree(self.to_string(), k, l))
    }

    fn find_span(&self, offs: usize, k: usize, l: usize) -> Option<&Self> {
        if offs == k && offs + self.count_ops() == l { return Some(self); }
        match self {
            Self::Leaf(_) => None,
            Self::Couple(left, right, _) => {
                let nl = left.count_ops();
                if l <= offs + nl {
                    left.find_span(offs, k, l)
                } else if k >= offs + nl {
                    right.find_span(offs + nl, k, l)
                } else {
                    None
                }
            },
        }
    }

    /// Doubled spin of the sub-tree covering `[0, l)`, zero for `l == 0`.
    pub fn prefix_twos(&self, l: usize) -> ExprResult<i16> {
        Ok(self.sub_expr(0, l)?.map(|x| x.twos()).unwrap_or(0))
    }
}

/// Doubled spin of an optional expression, zero for the identity.
pub fn expr_twos(expr: Option<&OpExpr>) -> i16 {
    expr.map(|x| x.twos()).unwrap_or(0)
}

/// Canonical text of an optional expression, empty for the identity.
pub fn expr_text(expr: Option<&OpExpr>) -> String {
    expr.map(|x| x.to_string()).unwrap_or_default()
}

impl fmt::Display for OpExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf(op) => op.fmt(f),
            Self::Couple(l, r, twos) => write!(f, "({}+{}){}", l, r, twos),
        }
    }
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn err(&self) -> ExprError { ExprError::Parse(self.pos, self.src.to_string()) }

    fn eat(&mut self, c: u8) -> ExprResult<()> {
        if self.bytes.get(self.pos) == Some(&c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.err())
        }
    }

    fn expr(&mut self) -> ExprResult<OpExpr> {
        match self.bytes.get(self.pos) {
            Some(b'C') => { self.pos += 1; Ok(OpExpr::Leaf(ElemOp::C)) },
            Some(b'D') => { self.pos += 1; Ok(OpExpr::Leaf(ElemOp::D)) },
            Some(b'(') => {
                self.pos += 1;
                let left = self.expr()?;
                self.eat(b'+')?;
                let right = self.expr()?;
                self.eat(b')')?;
                let start = self.pos;
                while self.bytes.get(self.pos).is_some_and(u8::is_ascii_digit) {
                    self.pos += 1;
                }
                let twos: i16 = self.src[start..self.pos].parse()
                    .map_err(|_| self.err())?;
                OpExpr::couple(left, right, twos)
            },
            _ => Err(self.err()),
        }
    }
}

impl FromStr for OpExpr {
    type Err = ExprError;

    fn from_str(s: &str) -> ExprResult<Self> {
        let mut parser = Parser { src: s, bytes: s.as_bytes(), pos: 0 };
        let expr = parser.expr()?;
        if parser.pos != s.len() { return Err(parser.err()); }
        Ok(expr)
    }
}

/// Parse an expression that may be empty (the identity).
pub fn parse_optional(s: &str) -> ExprResult<Option<OpExpr>> {
    if s.is_empty() { Ok(None) } else { s.parse().map(Some) }
}
