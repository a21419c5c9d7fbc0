use nalgebra_sparse::{CooMatrix, CsrMatrix};

use crate::{
    error::FieldSolverError,
    indexing::InteriorIndexer,
    mesh::SpatialMesh,
    region::{InnerRegion, InnerRegionsManager},
};

/// Builds the 1-D second-difference pattern on `n` interior nodes.
///
/// Rows are `[1, -2, 1]` in the middle and `[-2, 1]`, `[1, -2]` at the two
/// ends, where the coupling to the domain edge is left out.
pub fn second_difference_pattern(n: usize) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(n, n);
    for i in 0..n {
        if i > 0 {
            coo.push(i, i - 1, 1.0);
        }
        coo.push(i, i, -2.0);
        if i + 1 < n {
            coo.push(i, i + 1, 1.0);
        }
    }
    CsrMatrix::from(&coo)
}

/// Repeats `pattern` as `n_times` blocks along the diagonal (`I ⊗ P`)
///
/// # Arguments
/// * `pattern` - A square block
/// * `n_times` - How many copies to place
///
/// # Returns
/// A block-diagonal matrix of size `pattern.nrows() * n_times`
pub fn multiply_pattern_along_diagonal(pattern: &CsrMatrix<f64>, n_times: usize) -> CsrMatrix<f64> {
    let pt_size = pattern.nrows();
    let size = pt_size * n_times;
    let mut coo = CooMatrix::new(size, size);

    for block in 0..n_times {
        let offset = block * pt_size;
        for (row, col, value) in pattern.triplet_iter() {
            coo.push(offset + row, offset + col, *value);
        }
    }
    CsrMatrix::from(&coo)
}

/// Spreads `pattern` so that its couplings connect unknowns `stride` apart
/// (`P ⊗ I`)
///
/// # Arguments
/// * `pattern` - A square pattern along a slow axis
/// * `stride` - Number of unknowns in one layer of that axis
pub fn spread_pattern(pattern: &CsrMatrix<f64>, stride: usize) -> CsrMatrix<f64> {
    let size = pattern.nrows() * stride;
    let mut coo = CooMatrix::new(size, size);

    for (row, col, value) in pattern.triplet_iter() {
        for s in 0..stride {
            coo.push(row * stride + s, col * stride + s, *value);
        }
    }
    CsrMatrix::from(&coo)
}

pub fn construct_d2dx2_in_3d(indexer: &InteriorIndexer) -> CsrMatrix<f64> {
    let (mx, my, mz) = indexer.interior_dims();
    let d2dx2_2d = multiply_pattern_along_diagonal(&second_difference_pattern(mx), my);
    multiply_pattern_along_diagonal(&d2dx2_2d, mz)
}

pub fn construct_d2dy2_in_3d(indexer: &InteriorIndexer) -> CsrMatrix<f64> {
    let (mx, my, mz) = indexer.interior_dims();
    let d2dy2_2d = spread_pattern(&second_difference_pattern(my), mx);
    multiply_pattern_along_diagonal(&d2dy2_2d, mz)
}

pub fn construct_d2dz2_in_3d(indexer: &InteriorIndexer) -> CsrMatrix<f64> {
    let (mx, my, mz) = indexer.interior_dims();
    spread_pattern(&second_difference_pattern(mz), mx * my)
}

/// Accumulates `alpha * m` into `target`
fn axpy_into(target: &mut CooMatrix<f64>, alpha: f64, m: &CsrMatrix<f64>) {
    for (row, col, value) in m.triplet_iter() {
        target.push(row, col, alpha * value);
    }
}

/// Builds the Laplacian over all interior nodes, without embedded regions.
///
/// The result approximates `dy²dz² ∂²/∂x² + dx²dz² ∂²/∂y² + dx²dy² ∂²/∂z²`,
/// i.e. `dx²dy²dz² ∇²`.
///
/// # Arguments
/// * `indexer` - Interior node numbering of the grid
/// * `dx`, `dy`, `dz` - Cell sizes
pub fn construct_equation_matrix_in_full_domain(
    indexer: &InteriorIndexer,
    dx: f64,
    dy: f64,
    dz: f64,
) -> CsrMatrix<f64> {
    let n = indexer.n_unknowns();
    let mut coo = CooMatrix::new(n, n);

    axpy_into(&mut coo, dy * dy * dz * dz, &construct_d2dx2_in_3d(indexer));
    axpy_into(&mut coo, dx * dx * dz * dz, &construct_d2dy2_in_3d(indexer));
    axpy_into(&mut coo, dx * dx * dy * dy, &construct_d2dz2_in_3d(indexer));

    CsrMatrix::from(&coo)
}

/// Replaces the rows of the region's interior unknowns with identity rows
pub fn cross_out_nodes_occupied_by_objects(
    a: &mut CsrMatrix<f64>,
    indexer: &InteriorIndexer,
    region: &InnerRegion,
) -> Result<(), FieldSolverError> {
    for row in indexer.indices_of(region.inner_nodes_not_at_domain_edge())? {
        let mut row_view = a.row_mut(row);
        let (cols, values) = row_view.cols_and_values_mut();

        let mut has_diagonal = false;
        for (col, value) in cols.iter().zip(values.iter_mut()) {
            if *col == row {
                *value = 1.0;
                has_diagonal = true;
            } else {
                *value = 0.0;
            }
        }

        if !has_diagonal {
            return Err(FieldSolverError::BackendAllocation(format!(
                "row {row} of region '{}' has no diagonal entry to pin",
                region.name
            )));
        }
    }

    Ok(())
}

/// Zeroes the couplings of near-boundary unknowns toward unknowns inside the
/// region. Their contribution moves to the right-hand side.
pub fn modify_equation_near_object_boundaries(
    a: &mut CsrMatrix<f64>,
    indexer: &InteriorIndexer,
    mesh: &SpatialMesh,
    region: &InnerRegion,
) -> Result<(), FieldSolverError> {
    for node in region.near_boundary_nodes_not_at_domain_edge() {
        let adjacent = region.adjacent_nodes_not_at_domain_edge_and_inside(node, mesh);
        if adjacent.is_empty() {
            continue;
        }

        let row = indexer.node_to_index(node)?;
        let cols_to_modify = adjacent
            .iter()
            .map(|(_, adj)| indexer.node_to_index(adj))
            .collect::<Result<Vec<usize>, FieldSolverError>>()?;

        let mut row_view = a.row_mut(row);
        let (cols, values) = row_view.cols_and_values_mut();
        for col in cols_to_modify {
            // an entry missing from the pattern is already zero
            if let Ok(pos) = cols.binary_search(&col) {
                values[pos] = 0.0;
            }
        }
    }

    Ok(())
}

/// Drops explicit zeros and re-packs the matrix
pub fn finalize_operator(a: &CsrMatrix<f64>) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(a.nrows(), a.ncols());
    for (row, col, value) in a.triplet_iter() {
        if *value != 0.0 {
            coo.push(row, col, *value);
        }
    }
    CsrMatrix::from(&coo)
}

/// Builds the final operator for a mesh and its embedded regions.
///
/// All regions are crossed out first, in registration order, then the
/// stencils around every region are cut. Rows shared by overlapping regions
/// keep whatever the last region wrote.
pub fn construct_equation_matrix(
    mesh: &SpatialMesh,
    regions: &InnerRegionsManager,
) -> Result<CsrMatrix<f64>, FieldSolverError> {
    let indexer = InteriorIndexer::for_mesh(mesh)?;
    let (dx, dy, dz) = mesh.cell_sizes();

    let mut a = construct_equation_matrix_in_full_domain(&indexer, dx, dy, dz);

    for region in regions.iter() {
        cross_out_nodes_occupied_by_objects(&mut a, &indexer, region)?;
    }
    for region in regions.iter() {
        modify_equation_near_object_boundaries(&mut a, &indexer, mesh, region)?;
    }

    Ok(finalize_operator(&a))
}

/// Value stored at `(row, col)`, zero when outside the pattern
pub fn matrix_entry(a: &CsrMatrix<f64>, row: usize, col: usize) -> f64 {
    let row_view = a.row(row);
    match row_view.col_indices().binary_search(&col) {
        Ok(pos) => row_view.values()[pos],
        Err(_) => 0.0,
    }
}

/// Sparse matrix-vector product `a * x`
pub fn apply_operator(a: &CsrMatrix<f64>, x: &[f64]) -> Vec<f64> {
    a.row_iter()
        .map(|row| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .map(|(col, value)| value * x[*col])
                .sum()
        })
        .collect()
}
