use std::f64::consts::PI;

use nalgebra::DVector;

use crate::{
    error::FieldSolverError,
    indexing::InteriorIndexer,
    mesh::SpatialMesh,
    region::{InnerRegion, InnerRegionsManager},
};

fn kronecker_delta(i: usize, j: usize) -> f64 {
    if i == j {
        1.0
    } else {
        0.0
    }
}

/// Charge source and outer Dirichlet values for every interior node
///
/// # Arguments
/// * `indexer` - Interior node numbering of the mesh
/// * `mesh` - Mesh holding charge density and domain-edge potentials
///
/// # Returns
/// `-4πρ dx²dy²dz²` minus the domain-edge potentials scaled like the
/// couplings the operator leaves out
pub fn init_rhs_vector_in_full_domain(indexer: &InteriorIndexer, mesh: &SpatialMesh) -> DVector<f64> {
    let (nx, ny, nz) = mesh.n_nodes();
    let (dx, dy, dz) = mesh.cell_sizes();
    let rho = &mesh.charge_density;
    let phi = &mesh.potential;

    let mut rhs = DVector::zeros(indexer.n_unknowns());

    // numbering runs along x fastest, so interior nodes come out in row order
    for (row, node) in indexer.interior_nodes().enumerate() {
        let (i, j, k) = (node.i, node.j, node.k);

        let mut rhs_at_node = -4.0 * PI * rho[[i, j, k]] * dx * dx * dy * dy * dz * dz;
        // left and right
        rhs_at_node -= dy * dy * dz * dz
            * (kronecker_delta(i, 1) * phi[[0, j, k]] + kronecker_delta(i, nx - 2) * phi[[nx - 1, j, k]]);
        // bottom and top
        rhs_at_node -= dx * dx * dz * dz
            * (kronecker_delta(j, 1) * phi[[i, 0, k]] + kronecker_delta(j, ny - 2) * phi[[i, ny - 1, k]]);
        // near and far
        rhs_at_node -= dx * dx * dy * dy
            * (kronecker_delta(k, 1) * phi[[i, j, 0]] + kronecker_delta(k, nz - 2) * phi[[i, j, nz - 1]]);

        rhs[row] = rhs_at_node;
    }

    rhs
}

/// Zero charge density inside the conductor
pub fn set_rhs_at_nodes_occupied_by_objects(
    rhs: &mut DVector<f64>,
    indexer: &InteriorIndexer,
    region: &InnerRegion,
) -> Result<(), FieldSolverError> {
    for row in indexer.indices_of(region.inner_nodes_not_at_domain_edge())? {
        rhs[row] = 0.0;
    }
    Ok(())
}

/// Near-boundary rows and the terms that replace the couplings removed from
/// them by the operator modifier
///
/// # Returns
/// One `(row, modification)` pair per near-boundary unknown of the region
pub fn near_boundary_rhs_modifications(
    indexer: &InteriorIndexer,
    mesh: &SpatialMesh,
    region: &InnerRegion,
) -> Result<Vec<(usize, f64)>, FieldSolverError> {
    let (dx, dy, dz) = mesh.cell_sizes();
    let nodes = region.near_boundary_nodes_not_at_domain_edge();
    let mut modifications = Vec::with_capacity(nodes.len());

    for node in nodes {
        let rhs_mod: f64 = region
            .adjacent_nodes_not_at_domain_edge_and_inside(node, mesh)
            .iter()
            .map(|(direction, _)| -region.potential * direction.stencil_factor(dx, dy, dz))
            .sum();
        modifications.push((indexer.node_to_index(node)?, rhs_mod));
    }

    Ok(modifications)
}

pub fn modify_rhs_near_object_boundaries(
    rhs: &mut DVector<f64>,
    indexer: &InteriorIndexer,
    mesh: &SpatialMesh,
    region: &InnerRegion,
) -> Result<(), FieldSolverError> {
    for (row, rhs_mod) in near_boundary_rhs_modifications(indexer, mesh, region)? {
        rhs[row] += rhs_mod;
    }
    Ok(())
}

/// Assembles the right-hand side for one solve.
///
/// Steps are cumulative: full-domain source, zero inside every region, then
/// near-boundary compensation added region by region.
pub fn assemble_rhs(
    indexer: &InteriorIndexer,
    mesh: &SpatialMesh,
    regions: &InnerRegionsManager,
) -> Result<DVector<f64>, FieldSolverError> {
    let mut rhs = init_rhs_vector_in_full_domain(indexer, mesh);

    for region in regions.iter() {
        set_rhs_at_nodes_occupied_by_objects(&mut rhs, indexer, region)?;
    }
    for region in regions.iter() {
        modify_rhs_near_object_boundaries(&mut rhs, indexer, mesh, region)?;
    }

    Ok(rhs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        datatypes::BoundaryPotentials,
        region::{InnerRegion, Shape},
    };
    use approx::assert_relative_eq;

    fn single_node_box(i: f64, j: f64, k: f64, mesh: &SpatialMesh) -> Shape {
        let (dx, dy, dz) = mesh.cell_sizes();
        Shape::Box {
            x_left: (i - 0.1) * dx,
            x_right: (i + 0.1) * dx,
            y_bottom: (j - 0.1) * dy,
            y_top: (j + 0.1) * dy,
            z_near: (k - 0.1) * dz,
            z_far: (k + 0.1) * dz,
        }
    }

    #[test]
    fn charge_density_source_term() {
        let mut mesh = SpatialMesh::new([5, 5, 5], [0.5, 1.0, 2.0]).unwrap();
        mesh.charge_density[[2, 2, 2]] = 3.0;
        let indexer = InteriorIndexer::for_mesh(&mesh).unwrap();

        let rhs = init_rhs_vector_in_full_domain(&indexer, &mesh);
        let row = indexer.ijk_to_index(2, 2, 2).unwrap();

        assert_relative_eq!(rhs[row], -4.0 * PI * 3.0 * 0.25 * 1.0 * 4.0);
        assert_eq!(rhs.iter().filter(|v| **v != 0.0).count(), 1);
    }

    #[test]
    fn domain_edge_potentials_are_injected() {
        let mut mesh = SpatialMesh::new([5, 5, 5], [1.0, 2.0, 3.0]).unwrap();
        mesh.set_boundary_potentials(&BoundaryPotentials {
            left: 1.0,
            right: 2.0,
            bottom: 0.0,
            top: 0.0,
            near: 0.0,
            far: 5.0,
        });
        let indexer = InteriorIndexer::for_mesh(&mesh).unwrap();
        let rhs = init_rhs_vector_in_full_domain(&indexer, &mesh);

        // touches the left face only
        assert_relative_eq!(rhs[indexer.ijk_to_index(1, 2, 2).unwrap()], -36.0 * 1.0);
        // touches right and far faces
        assert_relative_eq!(rhs[indexer.ijk_to_index(3, 2, 3).unwrap()], -36.0 * 2.0 - 4.0 * 5.0);
        // touches nothing
        assert_eq!(rhs[indexer.ijk_to_index(2, 2, 2).unwrap()], 0.0);
    }

    #[test]
    fn compensation_matches_removed_coefficient() {
        let mesh = SpatialMesh::new([7, 7, 7], [1.0, 2.0, 3.0]).unwrap();
        let indexer = InteriorIndexer::for_mesh(&mesh).unwrap();
        let potential = 5.0;
        let region = InnerRegion::new("dot", potential, single_node_box(3.0, 3.0, 3.0, &mesh), None, &mesh).unwrap();
        let regions = InnerRegionsManager::new(vec![region]);

        let rhs = assemble_rhs(&indexer, &mesh, &regions).unwrap();

        // the pinned node sits at +x of (2,3,3)
        assert_relative_eq!(rhs[indexer.ijk_to_index(2, 3, 3).unwrap()], -potential * 36.0);
        assert_relative_eq!(rhs[indexer.ijk_to_index(3, 2, 3).unwrap()], -potential * 9.0);
        assert_relative_eq!(rhs[indexer.ijk_to_index(3, 3, 4).unwrap()], -potential * 4.0);
        assert_eq!(rhs[indexer.ijk_to_index(3, 3, 3).unwrap()], 0.0);
        assert_eq!(rhs[indexer.ijk_to_index(1, 1, 1).unwrap()], 0.0);
    }

    #[test]
    fn region_interior_rhs_is_zero_even_with_charge() {
        let mut mesh = SpatialMesh::new([7, 7, 7], [1.0, 1.0, 1.0]).unwrap();
        mesh.charge_density.fill(1.0);
        let indexer = InteriorIndexer::for_mesh(&mesh).unwrap();
        let region = InnerRegion::new("dot", 2.0, single_node_box(3.0, 3.0, 3.0, &mesh), None, &mesh).unwrap();

        let rhs = assemble_rhs(&indexer, &mesh, &InnerRegionsManager::new(vec![region])).unwrap();
        assert_eq!(rhs[indexer.ijk_to_index(3, 3, 3).unwrap()], 0.0);
        assert_relative_eq!(rhs[indexer.ijk_to_index(2, 3, 3).unwrap()], -4.0 * PI - 2.0);
    }

    #[test]
    fn shared_near_boundary_node_accumulates() {
        let mesh = SpatialMesh::new([7, 7, 7], [1.0, 1.0, 1.0]).unwrap();
        let indexer = InteriorIndexer::for_mesh(&mesh).unwrap();
        let regions = InnerRegionsManager::new(vec![
            InnerRegion::new("a", 1.0, single_node_box(2.0, 3.0, 3.0, &mesh), None, &mesh).unwrap(),
            InnerRegion::new("b", 10.0, single_node_box(4.0, 3.0, 3.0, &mesh), None, &mesh).unwrap(),
        ]);

        let rhs = assemble_rhs(&indexer, &mesh, &regions).unwrap();
        assert_relative_eq!(rhs[indexer.ijk_to_index(3, 3, 3).unwrap()], -11.0);
    }
}
