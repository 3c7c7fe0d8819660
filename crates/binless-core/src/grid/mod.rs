// =============================================================================
// Triangular Contact Grid
// =============================================================================
//
// A contact matrix between `nbins` genomic bins is symmetric, so only its
// upper triangle is stored. A cell is a pair (bin1, bin2) with
// 0 <= bin1 <= bin2 < nbins, and cells are numbered row by row:
//
//     bin2 ->   0  1  2
//     bin1 = 0  0  1  2
//     bin1 = 1     3  4
//     bin1 = 2        5
//
// Two cells are physically adjacent when they differ by one in exactly one
// coordinate. The counter-diagonal index `bin2 - bin1` groups cells at the
// same genomic distance.
//
// =============================================================================

mod trails;

pub use trails::{triangle_grid_chains, TrailSet};

use crate::error::{BinlessError, Result};

/// Indexing helper for an upper-triangular grid of `nbins` bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriangleGrid {
    nbins: usize,
}

impl TriangleGrid {
    pub fn new(nbins: usize) -> Self {
        Self { nbins }
    }

    pub fn nbins(&self) -> usize {
        self.nbins
    }

    /// Number of cells, `nbins * (nbins + 1) / 2`.
    pub fn ncells(&self) -> usize {
        self.nbins * (self.nbins + 1) / 2
    }

    /// Linear index of a cell. Callers must pass a valid pair.
    #[inline]
    pub fn index(&self, bin1: usize, bin2: usize) -> usize {
        debug_assert!(bin1 <= bin2 && bin2 < self.nbins);
        // rows before bin1 hold nbins, nbins-1, ... cells
        bin1 * self.nbins - bin1 * bin1.saturating_sub(1) / 2 + (bin2 - bin1)
    }

    /// Linear index of a cell, validating the pair first.
    pub fn try_index(&self, bin1: usize, bin2: usize) -> Result<usize> {
        if bin1 > bin2 || bin2 >= self.nbins {
            return Err(BinlessError::InvalidBin {
                bin1,
                bin2,
                nbins: self.nbins,
            });
        }
        Ok(self.index(bin1, bin2))
    }

    /// All cells as (bin1, bin2) pairs, in linear index order.
    pub fn coordinates(&self) -> Vec<(usize, usize)> {
        let mut coords = Vec::with_capacity(self.ncells());
        for bin1 in 0..self.nbins {
            for bin2 in bin1..self.nbins {
                coords.push((bin1, bin2));
            }
        }
        coords
    }

    /// Counter-diagonal index of every cell, in linear index order.
    pub fn diagonal_indices(&self) -> Vec<usize> {
        self.coordinates()
            .into_iter()
            .map(|(bin1, bin2)| bin2 - bin1)
            .collect()
    }

    /// Every pair of physically adjacent cells, listed once.
    ///
    /// For each cell the neighbour to the right `(bin1, bin2 + 1)` and the
    /// neighbour below `(bin1 + 1, bin2)` are emitted when they exist.
    pub fn adjacent_pairs(&self) -> Vec<(usize, usize)> {
        let n = self.nbins;
        let mut edges = Vec::with_capacity(2 * self.ncells());
        for bin1 in 0..n {
            for bin2 in bin1..n {
                let here = self.index(bin1, bin2);
                if bin2 + 1 < n {
                    edges.push((here, self.index(bin1, bin2 + 1)));
                }
                if bin1 < bin2 {
                    edges.push((here, self.index(bin1 + 1, bin2)));
                }
            }
        }
        edges
    }
}
