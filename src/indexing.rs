use crate::{datatypes::NodeRef, error::FieldSolverError, mesh::SpatialMesh};

/// Maps interior grid nodes to rows of the linear system and back.
///
/// Numbering starts at the bottom-left-near interior node, runs along x,
/// then y, then z.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteriorIndexer {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
}

impl InteriorIndexer {
    /// Creates an indexer for a grid of `nx * ny * nz` nodes
    ///
    /// # Returns
    /// A configuration error if any axis has no interior nodes
    pub fn new(nx: usize, ny: usize, nz: usize) -> Result<InteriorIndexer, FieldSolverError> {
        for (axis, n) in [("x", nx), ("y", ny), ("z", nz)] {
            if n <= 2 {
                return Err(FieldSolverError::Configuration(format!(
                    "grid needs more than 2 nodes along {axis} to have interior nodes, got {n}"
                )));
            }
        }
        Ok(InteriorIndexer { nx, ny, nz })
    }

    pub fn for_mesh(mesh: &SpatialMesh) -> Result<InteriorIndexer, FieldSolverError> {
        InteriorIndexer::new(mesh.x_n_nodes, mesh.y_n_nodes, mesh.z_n_nodes)
    }

    /// Interior node counts along x, y, z
    pub fn interior_dims(&self) -> (usize, usize, usize) {
        (self.nx - 2, self.ny - 2, self.nz - 2)
    }

    pub fn n_unknowns(&self) -> usize {
        (self.nx - 2) * (self.ny - 2) * (self.nz - 2)
    }

    pub fn is_interior(&self, i: usize, j: usize, k: usize) -> bool {
        (1..self.nx - 1).contains(&i) && (1..self.ny - 1).contains(&j) && (1..self.nz - 1).contains(&k)
    }

    pub fn ijk_to_index(&self, i: usize, j: usize, k: usize) -> Result<usize, FieldSolverError> {
        if !self.is_interior(i, j, k) {
            return Err(FieldSolverError::Index {
                i,
                j,
                k,
                nx: self.nx,
                ny: self.ny,
                nz: self.nz,
            });
        }
        let (mx, my, _) = self.interior_dims();
        Ok((i - 1) + (j - 1) * mx + (k - 1) * mx * my)
    }

    pub fn node_to_index(&self, node: &NodeRef) -> Result<usize, FieldSolverError> {
        self.ijk_to_index(node.i, node.j, node.k)
    }

    pub fn index_to_ijk(&self, index: usize) -> Result<(usize, usize, usize), FieldSolverError> {
        if index >= self.n_unknowns() {
            return Err(FieldSolverError::LinearIndex {
                index,
                size: self.n_unknowns(),
            });
        }
        let (mx, my, _) = self.interior_dims();
        let i = index % mx + 1;
        let j = (index / mx) % my + 1;
        let k = index / (mx * my) + 1;
        Ok((i, j, k))
    }

    /// Linear indices of a list of nodes, in the same order
    pub fn indices_of(&self, nodes: &[NodeRef]) -> Result<Vec<usize>, FieldSolverError> {
        nodes.iter().map(|n| self.node_to_index(n)).collect()
    }

    /// Iterates interior nodes in linear-index order
    pub fn interior_nodes(&self) -> impl Iterator<Item = NodeRef> + '_ {
        let (nx, ny, nz) = (self.nx, self.ny, self.nz);
        (1..nz - 1).flat_map(move |k| {
            (1..ny - 1).flat_map(move |j| (1..nx - 1).map(move |i| NodeRef::new(i, j, k)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_is_a_bijection() {
        let indexer = InteriorIndexer::new(5, 6, 7).unwrap();
        let mut seen = vec![false; indexer.n_unknowns()];

        for (expected, node) in indexer.interior_nodes().enumerate() {
            let index = indexer.node_to_index(&node).unwrap();
            assert_eq!(index, expected);
            assert!(!seen[index]);
            seen[index] = true;
            assert_eq!(indexer.index_to_ijk(index).unwrap(), (node.i, node.j, node.k));
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn first_and_last_interior_nodes() {
        let indexer = InteriorIndexer::new(5, 6, 7).unwrap();
        assert_eq!(indexer.ijk_to_index(1, 1, 1).unwrap(), 0);
        assert_eq!(indexer.ijk_to_index(3, 4, 5).unwrap(), 3 * 4 * 5 - 1);
        assert_eq!(indexer.ijk_to_index(2, 1, 1).unwrap(), 1);
        assert_eq!(indexer.ijk_to_index(1, 2, 1).unwrap(), 3);
        assert_eq!(indexer.ijk_to_index(1, 1, 2).unwrap(), 12);
    }

    #[test]
    fn non_interior_nodes_are_rejected() {
        let indexer = InteriorIndexer::new(5, 5, 5).unwrap();

        for (i, j, k) in [(0, 2, 2), (4, 2, 2), (2, 0, 2), (2, 4, 2), (2, 2, 0), (2, 2, 4), (9, 9, 9)] {
            match indexer.ijk_to_index(i, j, k) {
                Err(FieldSolverError::Index { i: ei, j: ej, k: ek, .. }) => {
                    assert_eq!((ei, ej, ek), (i, j, k))
                }
                other => panic!("expected index error for ({i}, {j}, {k}), got {other:?}"),
            }
        }
        assert!(matches!(
            indexer.index_to_ijk(27),
            Err(FieldSolverError::LinearIndex { index: 27, size: 27 })
        ));
    }

    #[test]
    fn degenerate_grid_fails_fast() {
        assert!(matches!(
            InteriorIndexer::new(5, 2, 5),
            Err(FieldSolverError::Configuration(_))
        ));
        assert!(matches!(
            InteriorIndexer::new(0, 5, 5),
            Err(FieldSolverError::Configuration(_))
        ));
    }
}
