use nalgebra::Vector3;
use ndarray::{s, Array3};

use crate::{
    datatypes::{BoundaryPotentials, NodeRef},
    error::FieldSolverError,
};

/// Regular structured grid with the node-centred arrays of the simulation
#[derive(Debug, Clone)]
pub struct SpatialMesh {
    pub x_n_nodes: usize,
    pub y_n_nodes: usize,
    pub z_n_nodes: usize,
    pub x_cell_size: f64,
    pub y_cell_size: f64,
    pub z_cell_size: f64,
    pub charge_density: Array3<f64>,
    pub potential: Array3<f64>,
    pub electric_field: Array3<Vector3<f64>>,
}

impl SpatialMesh {
    /// Creates a mesh from explicit node counts and cell sizes
    ///
    /// # Arguments
    /// * `n_nodes` - Number of nodes along x, y, z
    /// * `cell_size` - Distance between neighbouring nodes along x, y, z
    ///
    /// # Returns
    /// A mesh with zeroed charge density, potential and field
    pub fn new(n_nodes: [usize; 3], cell_size: [f64; 3]) -> Result<SpatialMesh, FieldSolverError> {
        for (axis, (n, h)) in ["x", "y", "z"].iter().zip(n_nodes.iter().zip(cell_size.iter())) {
            if *n < 2 {
                return Err(FieldSolverError::Configuration(format!(
                    "Mesh needs at least 2 nodes along {axis}, got {n}"
                )));
            }
            if !(h.is_finite() && *h > 0.0) {
                return Err(FieldSolverError::Configuration(format!(
                    "Cell size along {axis} must be positive, got {h}"
                )));
            }
        }

        let shape = (n_nodes[0], n_nodes[1], n_nodes[2]);
        Ok(SpatialMesh {
            x_n_nodes: n_nodes[0],
            y_n_nodes: n_nodes[1],
            z_n_nodes: n_nodes[2],
            x_cell_size: cell_size[0],
            y_cell_size: cell_size[1],
            z_cell_size: cell_size[2],
            charge_density: Array3::zeros(shape),
            potential: Array3::zeros(shape),
            electric_field: Array3::from_elem(shape, Vector3::zeros()),
        })
    }

    /// Creates a mesh covering a box of the given size with approximately the
    /// requested cell size.
    ///
    /// The node count along an axis is `ceil(size / step) + 1`; the step is
    /// then shrunk so that the nodes span the volume exactly.
    pub fn from_volume(
        volume_size: [f64; 3],
        requested_step: [f64; 3],
    ) -> Result<SpatialMesh, FieldSolverError> {
        let mut n_nodes = [0usize; 3];
        let mut cell_size = [0f64; 3];

        for (axis, name) in ["x", "y", "z"].iter().enumerate() {
            let size = volume_size[axis];
            let step = requested_step[axis];
            if !(size.is_finite() && size > 0.0) {
                return Err(FieldSolverError::Configuration(format!(
                    "grid_{name}_size must be positive, got {size}"
                )));
            }
            if !(step.is_finite() && step > 0.0) {
                return Err(FieldSolverError::Configuration(format!(
                    "grid_{name}_step must be positive, got {step}"
                )));
            }
            if step > size {
                return Err(FieldSolverError::Configuration(format!(
                    "grid_{name}_step {step} is larger than grid_{name}_size {size}"
                )));
            }

            n_nodes[axis] = (size / step).ceil() as usize + 1;
            cell_size[axis] = size / (n_nodes[axis] - 1) as f64;
            if (cell_size[axis] - step).abs() > f64::EPSILON * size {
                println!(
                    "warning [mesh]: {name} step changed from {step} to {} to fit the volume",
                    cell_size[axis]
                );
            }
        }

        SpatialMesh::new(n_nodes, cell_size)
    }

    pub fn n_nodes(&self) -> (usize, usize, usize) {
        (self.x_n_nodes, self.y_n_nodes, self.z_n_nodes)
    }

    pub fn cell_sizes(&self) -> (f64, f64, f64) {
        (self.x_cell_size, self.y_cell_size, self.z_cell_size)
    }

    /// Physical coordinates of a node
    pub fn node_position(&self, node: &NodeRef) -> Vector3<f64> {
        Vector3::new(
            node.i as f64 * self.x_cell_size,
            node.j as f64 * self.y_cell_size,
            node.k as f64 * self.z_cell_size,
        )
    }

    /// Writes the face potentials onto the outer layer of `potential`.
    ///
    /// Faces are written near, far, bottom, top, left, right, so edges and
    /// corners take the value of the face written last.
    pub fn set_boundary_potentials(&mut self, boundary: &BoundaryPotentials) {
        let (nx, ny, nz) = self.n_nodes();

        self.potential.slice_mut(s![.., .., 0]).fill(boundary.near);
        self.potential.slice_mut(s![.., .., nz - 1]).fill(boundary.far);
        self.potential.slice_mut(s![.., 0, ..]).fill(boundary.bottom);
        self.potential.slice_mut(s![.., ny - 1, ..]).fill(boundary.top);
        self.potential.slice_mut(s![0, .., ..]).fill(boundary.left);
        self.potential.slice_mut(s![nx - 1, .., ..]).fill(boundary.right);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn volume_step_is_adjusted_to_fit() {
        let mesh = SpatialMesh::from_volume([1.0, 2.0, 3.0], [0.3, 1.0, 3.0]).unwrap();

        assert_eq!(mesh.n_nodes(), (5, 3, 2));
        assert_relative_eq!(mesh.x_cell_size, 0.25);
        assert_relative_eq!(mesh.y_cell_size, 1.0);
        assert_relative_eq!(mesh.z_cell_size, 3.0);
        assert_eq!(mesh.potential.dim(), (5, 3, 2));
    }

    #[test]
    fn rejects_step_larger_than_volume() {
        let err = SpatialMesh::from_volume([1.0, 1.0, 1.0], [2.0, 0.5, 0.5]).unwrap_err();
        assert!(matches!(err, FieldSolverError::Configuration(_)));
    }

    #[test]
    fn boundary_potentials_cover_faces_only() {
        let mut mesh = SpatialMesh::new([4, 4, 4], [1.0, 1.0, 1.0]).unwrap();
        mesh.set_boundary_potentials(&BoundaryPotentials {
            left: 1.0,
            right: 2.0,
            bottom: 3.0,
            top: 4.0,
            near: 5.0,
            far: 6.0,
        });

        assert_eq!(mesh.potential[[0, 1, 1]], 1.0);
        assert_eq!(mesh.potential[[3, 2, 2]], 2.0);
        assert_eq!(mesh.potential[[1, 0, 2]], 3.0);
        assert_eq!(mesh.potential[[2, 3, 1]], 4.0);
        assert_eq!(mesh.potential[[1, 1, 0]], 5.0);
        assert_eq!(mesh.potential[[2, 2, 3]], 6.0);
        assert_eq!(mesh.potential[[1, 2, 1]], 0.0);
    }
}
