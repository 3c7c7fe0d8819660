// =============================================================================
// Patch Detection
// =============================================================================
//
// A patch is a connected set of grid cells whose fused values agree within a
// tolerance along physical adjacency. Equality is only propagated through
// neighbours: two far-apart cells with the same value stay in different
// patches unless a path of tolerance-equal neighbours joins them.
//
// Components are found with a union-find over the grid edges, using path
// halving and union by rank.
//
// =============================================================================

use ndarray::Array1;

use crate::error::{BinlessError, Result};
use crate::grid::TriangleGrid;

/// Connected components of tolerance-equal cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Patches {
    /// Patch id of every cell, numbered by first appearance in linear order.
    pub membership: Vec<usize>,
    pub npatches: usize,
    /// Mean member value, indexed by patch id.
    pub values: Vec<f64>,
}

impl Patches {
    /// Patch values sorted ascending.
    pub fn sorted_values(&self) -> Vec<f64> {
        let mut values = self.values.clone();
        values.sort_by(f64::total_cmp);
        values
    }

    pub fn is_single(&self) -> bool {
        self.npatches == 1
    }
}

/// Groups grid cells into patches.
#[derive(Debug, Clone, Copy)]
pub struct PatchGrouper {
    grid: TriangleGrid,
    tol: f64,
}

impl PatchGrouper {
    pub fn new(nbins: usize, tol: f64) -> Self {
        Self {
            grid: TriangleGrid::new(nbins),
            tol,
        }
    }

    pub fn group(&self, beta: &Array1<f64>) -> Result<Patches> {
        let n = self.grid.ncells();
        if beta.len() != n {
            return Err(BinlessError::DimensionMismatch(format!(
                "beta has {} entries but the grid has {} cells",
                beta.len(),
                n
            )));
        }

        let mut parent: Vec<usize> = (0..n).collect();
        let mut rank = vec![0u8; n];
        for (a, b) in self.grid.adjacent_pairs() {
            if (beta[a] - beta[b]).abs() <= self.tol {
                uf_union(&mut parent, &mut rank, a, b);
            }
        }

        // relabel roots in order of first appearance
        let mut label = vec![usize::MAX; n];
        let mut membership = Vec::with_capacity(n);
        let mut sums: Vec<f64> = Vec::new();
        let mut sizes: Vec<usize> = Vec::new();
        for cell in 0..n {
            let root = uf_find(&mut parent, cell);
            if label[root] == usize::MAX {
                label[root] = sums.len();
                sums.push(0.0);
                sizes.push(0);
            }
            let id = label[root];
            membership.push(id);
            sums[id] += beta[cell];
            sizes[id] += 1;
        }

        let values = sums
            .iter()
            .zip(&sizes)
            .map(|(s, &c)| s / c as f64)
            .collect::<Vec<_>>();
        Ok(Patches {
            membership,
            npatches: values.len(),
            values,
        })
    }
}

fn uf_find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

fn uf_union(parent: &mut [usize], rank: &mut [u8], a: usize, b: usize) {
    let ra = uf_find(parent, a);
    let rb = uf_find(parent, b);
    if ra == rb {
        return;
    }
    match rank[ra].cmp(&rank[rb]) {
        std::cmp::Ordering::Less => parent[ra] = rb,
        std::cmp::Ordering::Greater => parent[rb] = ra,
        std::cmp::Ordering::Equal => {
            parent[rb] = ra;
            rank[ra] = rank[ra].saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_uniform_grid_is_one_patch() {
        let patches = PatchGrouper::new(3, 1e-3).group(&Array1::from_elem(6, 2.0)).unwrap();
        assert_eq!(patches.npatches, 1);
        assert!(patches.is_single());
        assert_eq!(patches.membership, vec![0; 6]);
        assert!((patches.values[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_equal_values_need_an_adjacent_path() {
        // 0 1 2       cells 0 and 5 both hold 1.0 but every path between
        //   3 4       them crosses a cell holding 5.0
        //     5
        let beta = array![1.0, 5.0, 5.0, 5.0, 5.0, 1.0];
        let patches = PatchGrouper::new(3, 0.1).group(&beta).unwrap();
        assert_eq!(patches.npatches, 3);
        assert_eq!(patches.membership, vec![0, 1, 1, 1, 1, 2]);
        assert_eq!(patches.sorted_values(), vec![1.0, 1.0, 5.0]);
    }

    #[test]
    fn test_ids_follow_first_appearance() {
        let beta = array![3.0, 0.0, 0.0, 3.0, 0.0, 0.0];
        let patches = PatchGrouper::new(3, 0.1).group(&beta).unwrap();
        // cell 0 alone, cells 1,2,4,5 joined, cell 3 alone
        assert_eq!(patches.membership, vec![0, 1, 1, 2, 1, 1]);
    }

    #[test]
    fn test_members_connect_through_tolerant_neighbours() {
        let grid = TriangleGrid::new(5);
        let beta = Array1::from_iter((0..15).map(|i| ((i * 7) % 4) as f64 * 0.5));
        let tol = 0.6;
        let patches = PatchGrouper::new(5, tol).group(&beta).unwrap();
        // every tolerance-respecting edge joins cells of one patch
        for (a, b) in grid.adjacent_pairs() {
            if (beta[a] - beta[b]).abs() <= tol {
                assert_eq!(patches.membership[a], patches.membership[b]);
            }
        }
        assert!(patches.membership.iter().all(|&m| m < patches.npatches));
    }

    #[test]
    fn test_dimension_mismatch() {
        assert!(PatchGrouper::new(3, 0.1).group(&Array1::zeros(5)).is_err());
    }
}
