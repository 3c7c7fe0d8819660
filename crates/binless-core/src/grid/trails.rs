// =============================================================================
// Trail Decomposition
// =============================================================================
//
// The ADMM solver handles a 2D total-variation penalty by splitting the grid
// graph into 1D chains ("trails"). Each trail gets its own exact 1D solve and
// the solver enforces agreement between trails sharing a cell.
//
// For the triangle grid two families of chains are enough:
//
//   - rows: cells (b, b), (b, b+1), ..., (b, n-1), i.e. consecutive linear
//     indices, of lengths n, n-1, ..., 1;
//   - columns: cells (0, c), (1, c), ..., (c, c) for c = 1..n-1. Using
//     1-based positions U, a column starts at U_1 = c + 1 and moves down with
//     U_{i+1} = U_i + (n - i).
//
// Every row edge lies in one row chain and every column edge in one column
// chain, so the union of chain edges is exactly the grid adjacency.
//
// =============================================================================

/// Build row and column chains of linear cell indices for a grid of
/// `nrows` bins. Rows come first, then columns.
pub fn triangle_grid_chains(nrows: usize) -> Vec<Vec<usize>> {
    let ntotal = nrows * (nrows + 1) / 2;
    let mut chains = Vec::with_capacity(2 * nrows);
    if nrows == 0 {
        return chains;
    }

    // rows of consecutive numbers
    let mut len = nrows;
    let mut current = Vec::with_capacity(len);
    for i in 0..ntotal {
        current.push(i);
        if current.len() == len {
            chains.push(std::mem::take(&mut current));
            len -= 1;
            current.reserve(len);
        }
    }

    // columns, 1-based recurrence U_{i+1} = U_i + (nrows - i)
    for u1 in 2..=nrows {
        let mut ui = u1;
        let mut column = Vec::with_capacity(u1);
        column.push(ui - 1);
        for i in 1..u1 {
            ui += nrows - i;
            column.push(ui - 1);
        }
        chains.push(column);
    }
    chains
}

/// Flattened trail storage consumed by the ADMM solver.
///
/// `trails` holds every chain back to back; `breakpoints[t]` is the end
/// offset (exclusive) of chain `t` within it. Built once per grid size.
#[derive(Debug, Clone, PartialEq)]
pub struct TrailSet {
    nodes: usize,
    trails: Vec<usize>,
    breakpoints: Vec<usize>,
}

impl TrailSet {
    /// Decompose the triangle grid of `nrows` bins.
    pub fn triangle_grid(nrows: usize) -> Self {
        Self::from_chains(nrows * (nrows + 1) / 2, &triangle_grid_chains(nrows))
    }

    /// Flatten arbitrary chains over `nodes` cells.
    pub fn from_chains(nodes: usize, chains: &[Vec<usize>]) -> Self {
        let mut trails = Vec::with_capacity(chains.iter().map(Vec::len).sum());
        let mut breakpoints = Vec::with_capacity(chains.len());
        for chain in chains.iter().filter(|c| !c.is_empty()) {
            trails.extend_from_slice(chain);
            breakpoints.push(trails.len());
        }
        Self {
            nodes,
            trails,
            breakpoints,
        }
    }

    /// Number of grid cells covered.
    pub fn nodes(&self) -> usize {
        self.nodes
    }

    pub fn ntrails(&self) -> usize {
        self.breakpoints.len()
    }

    /// Total number of trail entries (cells counted once per trail).
    pub fn len(&self) -> usize {
        self.trails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trails.is_empty()
    }

    /// Flattened cell indices.
    pub fn flat(&self) -> &[usize] {
        &self.trails
    }

    pub fn breakpoints(&self) -> &[usize] {
        &self.breakpoints
    }

    /// Offset range of trail `t` within `flat()`.
    pub fn range(&self, t: usize) -> std::ops::Range<usize> {
        let start = if t == 0 { 0 } else { self.breakpoints[t - 1] };
        start..self.breakpoints[t]
    }

    /// Iterate over trails as slices of cell indices.
    pub fn iter(&self) -> impl Iterator<Item = &[usize]> + '_ {
        (0..self.ntrails()).map(move |t| &self.trails[self.range(t)])
    }

    /// How many trails pass through each cell.
    pub fn node_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.nodes];
        for &cell in &self.trails {
            counts[cell] += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::TriangleGrid;
    use std::collections::BTreeSet;

    #[test]
    fn test_three_bin_chains() {
        let chains = triangle_grid_chains(3);
        assert_eq!(
            chains,
            vec![
                vec![0, 1, 2],
                vec![3, 4],
                vec![5],
                vec![1, 3],
                vec![2, 4, 5],
            ]
        );
    }

    #[test]
    fn test_empty_grid_has_no_trails() {
        let trails = TrailSet::triangle_grid(0);
        assert_eq!(trails.ntrails(), 0);
        assert!(trails.is_empty());
    }

    #[test]
    fn test_coverage_for_many_sizes() {
        for nrows in 1..12 {
            let ncells = nrows * (nrows + 1) / 2;
            let chains = triangle_grid_chains(nrows);
            assert_eq!(chains.len(), 2 * nrows - 1);

            // rows partition the grid
            let rows: Vec<usize> = chains[..nrows].iter().flatten().copied().collect();
            assert_eq!(rows, (0..ncells).collect::<Vec<_>>());

            // each family has no repeats, union covers every cell
            let cols: Vec<usize> = chains[nrows..].iter().flatten().copied().collect();
            let col_set: BTreeSet<usize> = cols.iter().copied().collect();
            assert_eq!(col_set.len(), cols.len());
            let union: BTreeSet<usize> = rows.iter().chain(cols.iter()).copied().collect();
            assert_eq!(union, (0..ncells).collect());
        }
    }

    #[test]
    fn test_chain_edges_equal_grid_adjacency() {
        for nrows in 1..10 {
            let grid = TriangleGrid::new(nrows);
            let expected: BTreeSet<(usize, usize)> = grid.adjacent_pairs().into_iter().collect();
            let mut found = BTreeSet::new();
            for chain in triangle_grid_chains(nrows) {
                for pair in chain.windows(2) {
                    let edge = (pair[0].min(pair[1]), pair[0].max(pair[1]));
                    assert!(found.insert(edge), "edge {:?} appears twice", edge);
                }
            }
            assert_eq!(found, expected);
        }
    }

    #[test]
    fn test_trail_set_ranges_and_counts() {
        let trails = TrailSet::triangle_grid(3);
        assert_eq!(trails.ntrails(), 5);
        assert_eq!(trails.len(), 11);
        assert_eq!(trails.breakpoints(), &[3, 5, 6, 8, 11]);
        assert_eq!(trails.iter().nth(4).unwrap(), &[2, 4, 5]);
        assert_eq!(trails.node_counts(), vec![1, 2, 2, 2, 2, 2]);
    }
}
