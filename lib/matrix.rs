//! Sector-resolved operator matrices.

use ndarray as nd;
use crate::{
    error::{ BigSiteResult, ConfigError },
    ops::OpKind,
    quanta::Quanta,
};

/// Convert a count to the 32-bit index width used by [`CsrMatrix`].
pub fn checked_index(n: usize) -> BigSiteResult<u32> {
    u32::try_from(n).map_err(|_| ConfigError::IndexOverflow(n).into())
}

/// Compressed sparse row matrix with 32-bit indices.
#[derive(Clone, Debug, PartialEq)]
pub struct CsrMatrix {
    n_rows: usize,
    n_cols: usize,
    indptr: Vec<u32>,
    indices: Vec<u32>,
    data: Vec<f64>,
}

impl CsrMatrix {
    /// Build from per-row `(column, value)` lists with strictly increasing
    /// columns.
    ///
    /// Fails if the nonzero count does not fit in 32 bits.
    pub fn from_rows(n_cols: usize, rows: &[Vec<(u32, f64)>]) -> BigSiteResult<Self> {
        let nnz: usize = rows.iter().map(|r| r.len()).sum();
        checked_index(nnz)?;
        let mut indptr: Vec<u32> = Vec::with_capacity(rows.len() + 1);
        let mut indices: Vec<u32> = Vec::with_capacity(nnz);
        let mut data: Vec<f64> = Vec::with_capacity(nnz);
        indptr.push(0);
        for row in rows.iter() {
            for &(c, v) in row.iter() {
                indices.push(c);
                data.push(v);
            }
            indptr.push(indices.len() as u32);
        }
        Ok(Self { n_rows: rows.len(), n_cols, indptr, indices, data })
    }

    pub fn shape(&self) -> (usize, usize) { (self.n_rows, self.n_cols) }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize { self.data.len() }

    /// Row pointers, one more than the number of rows.
    pub fn indptr(&self) -> &[u32] { &self.indptr }

    /// Column index of every stored entry.
    pub fn indices(&self) -> &[u32] { &self.indices }

    /// Value of every stored entry.
    pub fn data(&self) -> &[f64] { &self.data }

    /// Stored `(column, value)` pairs of row `i`.
    ///
    /// *Panics if `i` is out of bounds.*
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.indptr[i] as usize..self.indptr[i + 1] as usize;
        self.indices[range.clone()].iter()
            .zip(self.data[range].iter())
            .map(|(&c, &v)| (c as usize, v))
    }

    /// Element `(i, j)`, zero where nothing is stored.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        if i >= self.n_rows { return 0.0; }
        self.row(i).find(|&(c, _)| c == j).map(|(_, v)| v).unwrap_or(0.0)
    }

    pub fn to_dense(&self) -> nd::Array2<f64> {
        let mut m = nd::Array2::zeros((self.n_rows, self.n_cols));
        for i in 0..self.n_rows {
            self.row(i).for_each(|(j, v)| { m[[i, j]] = v; });
        }
        m
    }
}

/// Storage of one sector block.
#[derive(Clone, Debug, PartialEq)]
pub enum MatrixData {
    Csr(CsrMatrix),
    Dense(nd::Array2<f64>),
}

impl MatrixData {
    /// Store rows sparsely unless more than `dense_ratio` of the block is
    /// filled.
    pub fn from_rows(n_cols: usize, rows: &[Vec<(u32, f64)>], dense_ratio: f64)
        -> BigSiteResult<Self>
    {
        let nnz: usize = rows.iter().map(|r| r.len()).sum();
        let size = rows.len() * n_cols;
        if nnz >= size || nnz as f64 > dense_ratio * size as f64 {
            let mut m = nd::Array2::zeros((rows.len(), n_cols));
            for (i, row) in rows.iter().enumerate() {
                row.iter().for_each(|&(j, v)| { m[[i, j as usize]] = v; });
            }
            Ok(Self::Dense(m))
        } else {
            CsrMatrix::from_rows(n_cols, rows).map(Self::Csr)
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        match self {
            Self::Csr(m) => m.shape(),
            Self::Dense(m) => m.dim(),
        }
    }

    /// Number of stored entries; every element of a dense block counts.
    pub fn nnz(&self) -> usize {
        match self {
            Self::Csr(m) => m.nnz(),
            Self::Dense(m) => m.len(),
        }
    }

    /// Return `true` if the block is stored densely.
    pub fn is_dense(&self) -> bool { matches!(self, Self::Dense(_)) }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        match self {
            Self::Csr(m) => m.get(i, j),
            Self::Dense(m) => m.get([i, j]).copied().unwrap_or(0.0),
        }
    }

    pub fn to_dense(&self) -> nd::Array2<f64> {
        match self {
            Self::Csr(m) => m.to_dense(),
            Self::Dense(m) => m.clone(),
        }
    }
}

/// Reduced matrix of an operator between one bra and one ket sector.
#[derive(Clone, Debug, PartialEq)]
pub struct SectorMatrix {
    pub bra: Quanta,
    pub ket: Quanta,
    pub data: MatrixData,
}

/// Every sector block of one operator.
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorBlock {
    pub kind: OpKind,
    /// Operator label.
    pub op: Quanta,
    pub sectors: Vec<SectorMatrix>,
}

impl OperatorBlock {
    /// Block between the given bra and ket labels, if admissible.
    pub fn sector(&self, bra: &Quanta, ket: &Quanta) -> Option<&SectorMatrix> {
        self.sectors.iter().find(|s| s.bra == *bra && s.ket == *ket)
    }

    /// Total number of stored entries over all sectors.
    pub fn nnz(&self) -> usize { self.sectors.iter().map(|s| s.data.nnz()).sum() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<Vec<(u32, f64)>> {
        vec![
            vec![(0, 1.0), (3, -2.0)],
            vec![],
            vec![(2, 0.5)],
        ]
    }

    #[test]
    fn csr_layout() {
        let m = CsrMatrix::from_rows(4, &rows()).unwrap();
        assert_eq!(m.shape(), (3, 4));
        assert_eq!(m.nnz(),     3);
        assert_eq!(m.indptr(),  &[0, 2, 2, 3]);
        assert_eq!(m.indices(), &[0, 3, 2]);
        assert_eq!(m.get(0, 3), -2.0);
        assert_eq!(m.get(1, 1),  0.0);
        assert_eq!(m.get(5, 0),  0.0);
        let d = m.to_dense();
        assert_eq!(d[[2, 2]], 0.5);
        assert_eq!(d.sum(), -0.5);
    }

    #[test]
    fn density_switch() {
        let sparse = MatrixData::from_rows(4, &rows(), 0.25).unwrap();
        assert!(!sparse.is_dense());
        assert_eq!(sparse.nnz(), 3);
        let dense = MatrixData::from_rows(4, &rows(), 0.2).unwrap();
        assert!(dense.is_dense());
        assert_eq!(dense.nnz(), 12);
        assert_eq!(sparse.to_dense(), dense.to_dense());
        assert_eq!(dense.get(0, 3), -2.0);
        let full = MatrixData::from_rows(1, &[vec![(0, 1.0)]], 1.0).unwrap();
        assert!(full.is_dense());
        let empty = MatrixData::from_rows(3, &[], 0.25).unwrap();
        assert_eq!(empty.shape(), (0, 3));
    }

    #[test]
    fn index_width() {
        assert_eq!(checked_index(7).unwrap(), 7);
        assert!(checked_index(u32::MAX as usize + 1).is_err());
    }
}
