use std::collections::HashSet;

use nalgebra::Vector3;
use ndarray::Array3;
use serde::Serialize;

use crate::{
    datatypes::{Direction, NodeRef},
    error::FieldSolverError,
    mesh::SpatialMesh,
};

/// Geometry of an embedded conductor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Shape {
    Box {
        x_left: f64,
        x_right: f64,
        y_bottom: f64,
        y_top: f64,
        z_near: f64,
        z_far: f64,
    },
    Sphere {
        origin_x: f64,
        origin_y: f64,
        origin_z: f64,
        radius: f64,
    },
    Cylinder {
        axis_start_x: f64,
        axis_start_y: f64,
        axis_start_z: f64,
        axis_end_x: f64,
        axis_end_y: f64,
        axis_end_z: f64,
        radius: f64,
    },
    Tube {
        axis_start_x: f64,
        axis_start_y: f64,
        axis_start_z: f64,
        axis_end_x: f64,
        axis_end_y: f64,
        axis_end_z: f64,
        inner_radius: f64,
        outer_radius: f64,
    },
}

/// Projects `point` onto the segment `start..end`.
///
/// # Returns
/// The normalized position along the axis and the squared distance from the
/// axis line
fn axial_projection(point: Vector3<f64>, start: Vector3<f64>, end: Vector3<f64>) -> (f64, f64) {
    let axis = end - start;
    let rel = point - start;
    let t = rel.dot(&axis) / axis.norm_squared();
    let perpendicular = rel - axis * t;
    (t, perpendicular.norm_squared())
}

impl Shape {
    pub fn type_name(&self) -> &'static str {
        match self {
            Shape::Box { .. } => "box",
            Shape::Sphere { .. } => "sphere",
            Shape::Cylinder { .. } => "cylinder",
            Shape::Tube { .. } => "tube",
        }
    }

    /// Checks the shape parameters describe a non-empty solid
    pub fn validate(&self) -> Result<(), FieldSolverError> {
        let fail = |msg: String| Err(FieldSolverError::Configuration(msg));

        match *self {
            Shape::Box {
                x_left,
                x_right,
                y_bottom,
                y_top,
                z_near,
                z_far,
            } => {
                if x_left >= x_right {
                    return fail(format!("box x_left {x_left} must be below x_right {x_right}"));
                }
                if y_bottom >= y_top {
                    return fail(format!("box y_bottom {y_bottom} must be below y_top {y_top}"));
                }
                if z_near >= z_far {
                    return fail(format!("box z_near {z_near} must be below z_far {z_far}"));
                }
            }
            Shape::Sphere { radius, .. } => {
                if radius <= 0.0 {
                    return fail(format!("sphere radius must be positive, got {radius}"));
                }
            }
            Shape::Cylinder { radius, .. } => {
                if radius <= 0.0 {
                    return fail(format!("cylinder radius must be positive, got {radius}"));
                }
            }
            Shape::Tube {
                inner_radius,
                outer_radius,
                ..
            } => {
                if inner_radius < 0.0 {
                    return fail(format!("tube inner radius must be non-negative, got {inner_radius}"));
                }
                if inner_radius >= outer_radius {
                    return fail(format!(
                        "tube inner radius {inner_radius} must be below outer radius {outer_radius}"
                    ));
                }
            }
        }

        if let Some((start, end)) = self.axis() {
            if (end - start).norm_squared() == 0.0 {
                return fail(format!("{} axis start and end coincide", self.type_name()));
            }
        }

        Ok(())
    }

    fn axis(&self) -> Option<(Vector3<f64>, Vector3<f64>)> {
        match *self {
            Shape::Cylinder {
                axis_start_x,
                axis_start_y,
                axis_start_z,
                axis_end_x,
                axis_end_y,
                axis_end_z,
                ..
            }
            | Shape::Tube {
                axis_start_x,
                axis_start_y,
                axis_start_z,
                axis_end_x,
                axis_end_y,
                axis_end_z,
                ..
            } => Some((
                Vector3::new(axis_start_x, axis_start_y, axis_start_z),
                Vector3::new(axis_end_x, axis_end_y, axis_end_z),
            )),
            _ => None,
        }
    }

    /// Whether a point lies inside the shape, surface included
    pub fn contains_point(&self, x: f64, y: f64, z: f64) -> bool {
        let point = Vector3::new(x, y, z);
        match *self {
            Shape::Box {
                x_left,
                x_right,
                y_bottom,
                y_top,
                z_near,
                z_far,
            } => {
                (x_left..=x_right).contains(&x)
                    && (y_bottom..=y_top).contains(&y)
                    && (z_near..=z_far).contains(&z)
            }
            Shape::Sphere {
                origin_x,
                origin_y,
                origin_z,
                radius,
            } => (point - Vector3::new(origin_x, origin_y, origin_z)).norm_squared() <= radius * radius,
            Shape::Cylinder { radius, .. } => match self.axis() {
                Some((start, end)) => {
                    let (t, dist2) = axial_projection(point, start, end);
                    (0.0..=1.0).contains(&t) && dist2 <= radius * radius
                }
                None => false,
            },
            Shape::Tube {
                inner_radius,
                outer_radius,
                ..
            } => match self.axis() {
                Some((start, end)) => {
                    let (t, dist2) = axial_projection(point, start, end);
                    (0.0..=1.0).contains(&t)
                        && dist2 >= inner_radius * inner_radius
                        && dist2 <= outer_radius * outer_radius
                }
                None => false,
            },
        }
    }
}

/// How a region interacts with simulated particles, when it does at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionModel {
    /// Particles entering the region are removed and their charge collected
    Absorbing,
}

/// A conductor embedded in the mesh and held at a fixed potential
#[derive(Debug, Clone)]
pub struct InnerRegion {
    pub name: String,
    pub potential: f64,
    pub shape: Shape,
    pub model: Option<InteractionModel>,
    pub total_absorbed_particles: u64,
    pub total_absorbed_charge: f64,
    inner_nodes: Vec<NodeRef>,
    inner_nodes_not_at_domain_edge: Vec<NodeRef>,
    near_boundary_nodes: Vec<NodeRef>,
    near_boundary_nodes_not_at_domain_edge: Vec<NodeRef>,
}

impl InnerRegion {
    /// Creates a region and classifies the mesh nodes against it
    ///
    /// # Arguments
    /// * `name` - Identifier used in diagnostics
    /// * `potential` - Fixed potential of the conductor
    /// * `shape` - Region geometry
    /// * `model` - Optional particle interaction model
    /// * `mesh` - The mesh whose nodes are classified
    pub fn new(
        name: &str,
        potential: f64,
        shape: Shape,
        model: Option<InteractionModel>,
        mesh: &SpatialMesh,
    ) -> Result<InnerRegion, FieldSolverError> {
        shape.validate()?;
        if !potential.is_finite() {
            return Err(FieldSolverError::Configuration(format!(
                "inner region '{name}' has non-finite potential {potential}"
            )));
        }

        let mut region = InnerRegion {
            name: name.to_owned(),
            potential,
            shape,
            model,
            total_absorbed_particles: 0,
            total_absorbed_charge: 0.0,
            inner_nodes: Vec::new(),
            inner_nodes_not_at_domain_edge: Vec::new(),
            near_boundary_nodes: Vec::new(),
            near_boundary_nodes_not_at_domain_edge: Vec::new(),
        };
        region.classify(mesh);

        Ok(region)
    }

    /// Recomputes the inner and near-boundary node sets.
    ///
    /// Must be called again whenever the shape or the mesh changes.
    pub fn classify(&mut self, mesh: &SpatialMesh) {
        let (nx, ny, nz) = mesh.n_nodes();
        let (dx, dy, dz) = mesh.cell_sizes();

        let inside = Array3::from_shape_fn((nx, ny, nz), |(i, j, k)| {
            self.check_if_node_inside(&NodeRef::new(i, j, k), dx, dy, dz)
        });

        self.inner_nodes.clear();
        self.near_boundary_nodes.clear();

        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let node = NodeRef::new(i, j, k);
                    if inside[[i, j, k]] {
                        self.inner_nodes.push(node);
                    } else if node
                        .adjacent_nodes(nx, ny, nz)
                        .iter()
                        .any(|(_, adj)| inside[[adj.i, adj.j, adj.k]])
                    {
                        self.near_boundary_nodes.push(node);
                    }
                }
            }
        }

        self.inner_nodes_not_at_domain_edge = self
            .inner_nodes
            .iter()
            .filter(|n| !n.at_domain_edge(nx, ny, nz))
            .copied()
            .collect();
        self.near_boundary_nodes_not_at_domain_edge = self
            .near_boundary_nodes
            .iter()
            .filter(|n| !n.at_domain_edge(nx, ny, nz))
            .copied()
            .collect();
    }

    pub fn inner_nodes(&self) -> &[NodeRef] {
        &self.inner_nodes
    }

    pub fn inner_nodes_not_at_domain_edge(&self) -> &[NodeRef] {
        &self.inner_nodes_not_at_domain_edge
    }

    pub fn near_boundary_nodes(&self) -> &[NodeRef] {
        &self.near_boundary_nodes
    }

    pub fn near_boundary_nodes_not_at_domain_edge(&self) -> &[NodeRef] {
        &self.near_boundary_nodes_not_at_domain_edge
    }

    pub fn check_if_point_inside(&self, x: f64, y: f64, z: f64) -> bool {
        self.shape.contains_point(x, y, z)
    }

    pub fn check_if_node_inside(&self, node: &NodeRef, dx: f64, dy: f64, dz: f64) -> bool {
        self.check_if_point_inside(node.i as f64 * dx, node.j as f64 * dy, node.k as f64 * dz)
    }

    /// Lists the axis neighbours of `node` that are unknowns of the linear
    /// system and lie inside this region
    ///
    /// # Arguments
    /// * `node` - The reference node, usually a near-boundary node
    /// * `mesh` - The mesh the region was classified against
    ///
    /// # Returns
    /// Each qualifying neighbour with the direction in which it sits
    pub fn adjacent_nodes_not_at_domain_edge_and_inside(
        &self,
        node: &NodeRef,
        mesh: &SpatialMesh,
    ) -> Vec<(Direction, NodeRef)> {
        let (nx, ny, nz) = mesh.n_nodes();
        let (dx, dy, dz) = mesh.cell_sizes();

        node.adjacent_nodes(nx, ny, nz)
            .into_iter()
            .filter(|(_, adj)| !adj.at_domain_edge(nx, ny, nz) && self.check_if_node_inside(adj, dx, dy, dz))
            .collect()
    }

    /// Checks whether a particle is inside and, if the region carries an
    /// interaction model, records its charge as absorbed
    ///
    /// # Returns
    /// Whether the position is inside the region
    pub fn check_if_point_inside_and_count_charge(&mut self, position: &Vector3<f64>, charge: f64) -> bool {
        let inside = self.check_if_point_inside(position.x, position.y, position.z);
        if inside && self.model.is_some() {
            self.total_absorbed_particles += 1;
            self.total_absorbed_charge += charge;
        }
        inside
    }
}

/// Ordered collection of all embedded regions of a simulation
#[derive(Debug, Clone, Default)]
pub struct InnerRegionsManager {
    pub regions: Vec<InnerRegion>,
}

impl InnerRegionsManager {
    pub fn new(regions: Vec<InnerRegion>) -> InnerRegionsManager {
        InnerRegionsManager { regions }
    }

    pub fn push(&mut self, region: InnerRegion) {
        self.regions.push(region);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, InnerRegion> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn classify(&mut self, mesh: &SpatialMesh) {
        for region in self.regions.iter_mut() {
            region.classify(mesh);
        }
    }

    pub fn check_if_point_inside(&self, position: &Vector3<f64>) -> bool {
        self.regions
            .iter()
            .any(|r| r.check_if_point_inside(position.x, position.y, position.z))
    }

    /// Hands the particle to the first region containing it
    pub fn check_if_point_inside_and_count_charge(&mut self, position: &Vector3<f64>, charge: f64) -> bool {
        self.regions
            .iter_mut()
            .any(|r| r.check_if_point_inside_and_count_charge(position, charge))
    }

    /// Pairs of region names whose eliminated unknowns overlap
    pub fn overlapping_regions(&self) -> Vec<(String, String)> {
        let sets: Vec<HashSet<NodeRef>> = self
            .regions
            .iter()
            .map(|r| r.inner_nodes_not_at_domain_edge().iter().copied().collect())
            .collect();

        let mut pairs = Vec::new();
        for a in 0..sets.len() {
            for b in (a + 1)..sets.len() {
                if !sets[a].is_disjoint(&sets[b]) {
                    pairs.push((self.regions[a].name.clone(), self.regions[b].name.clone()));
                }
            }
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_mesh(n: usize) -> SpatialMesh {
        SpatialMesh::new([n, n, n], [1.0, 1.0, 1.0]).unwrap()
    }

    fn sphere(x: f64, y: f64, z: f64, radius: f64) -> Shape {
        Shape::Sphere {
            origin_x: x,
            origin_y: y,
            origin_z: z,
            radius,
        }
    }

    #[test]
    fn shapes_contain_expected_points() {
        let cube = Shape::Box {
            x_left: 1.0,
            x_right: 2.0,
            y_bottom: 1.0,
            y_top: 2.0,
            z_near: 1.0,
            z_far: 2.0,
        };
        assert!(cube.contains_point(1.5, 1.5, 1.5));
        assert!(cube.contains_point(1.0, 2.0, 1.0));
        assert!(!cube.contains_point(2.1, 1.5, 1.5));

        let ball = sphere(0.0, 0.0, 0.0, 1.0);
        assert!(ball.contains_point(1.0, 0.0, 0.0));
        assert!(!ball.contains_point(0.8, 0.8, 0.0));

        let rod = Shape::Cylinder {
            axis_start_x: 0.0,
            axis_start_y: 0.0,
            axis_start_z: 0.0,
            axis_end_x: 0.0,
            axis_end_y: 0.0,
            axis_end_z: 4.0,
            radius: 1.0,
        };
        assert!(rod.contains_point(0.5, 0.5, 2.0));
        assert!(!rod.contains_point(0.5, 0.5, 4.5));
        assert!(!rod.contains_point(1.0, 1.0, 2.0));

        let pipe = Shape::Tube {
            axis_start_x: 0.0,
            axis_start_y: 0.0,
            axis_start_z: 0.0,
            axis_end_x: 4.0,
            axis_end_y: 0.0,
            axis_end_z: 0.0,
            inner_radius: 1.0,
            outer_radius: 2.0,
        };
        assert!(!pipe.contains_point(2.0, 0.0, 0.5));
        assert!(pipe.contains_point(2.0, 1.5, 0.0));
        assert!(!pipe.contains_point(2.0, 2.5, 0.0));
    }

    #[test]
    fn invalid_shapes_are_rejected() {
        assert!(sphere(0.0, 0.0, 0.0, 0.0).validate().is_err());
        let pipe = Shape::Tube {
            axis_start_x: 0.0,
            axis_start_y: 0.0,
            axis_start_z: 0.0,
            axis_end_x: 1.0,
            axis_end_y: 0.0,
            axis_end_z: 0.0,
            inner_radius: 2.0,
            outer_radius: 1.0,
        };
        assert!(pipe.validate().is_err());
        let rod = Shape::Cylinder {
            axis_start_x: 1.0,
            axis_start_y: 1.0,
            axis_start_z: 1.0,
            axis_end_x: 1.0,
            axis_end_y: 1.0,
            axis_end_z: 1.0,
            radius: 1.0,
        };
        assert!(rod.validate().is_err());
    }

    #[test]
    fn sphere_at_center_classifies_seven_inner_nodes() {
        let mesh = unit_mesh(5);
        let region = InnerRegion::new("ball", 10.0, sphere(2.0, 2.0, 2.0, 1.0), None, &mesh).unwrap();

        assert_eq!(region.inner_nodes().len(), 7);
        assert_eq!(region.inner_nodes_not_at_domain_edge().len(), 7);
        // edge-sharing nodes touch two inner nodes, the 8 corners of the
        // interior block touch none
        assert_eq!(region.near_boundary_nodes_not_at_domain_edge().len(), 12);
        // each arm tip has one outer neighbour on the domain edge
        assert_eq!(region.near_boundary_nodes().len(), 12 + 6);
    }

    #[test]
    fn inner_and_near_boundary_sets_are_disjoint() {
        let mesh = unit_mesh(9);
        let region = InnerRegion::new("ball", 1.0, sphere(4.0, 3.5, 4.2, 2.3), None, &mesh).unwrap();

        let inner: HashSet<NodeRef> = region.inner_nodes().iter().copied().collect();
        assert!(region.near_boundary_nodes().iter().all(|n| !inner.contains(n)));
        assert!(!region.near_boundary_nodes().is_empty());
    }

    #[test]
    fn domain_edge_nodes_are_filtered() {
        let mesh = unit_mesh(5);
        let slab = Shape::Box {
            x_left: -1.0,
            x_right: 0.5,
            y_bottom: -1.0,
            y_top: 5.0,
            z_near: -1.0,
            z_far: 5.0,
        };
        let region = InnerRegion::new("wall", 3.0, slab, None, &mesh).unwrap();

        assert_eq!(region.inner_nodes().len(), 25);
        assert!(region.inner_nodes_not_at_domain_edge().is_empty());
        assert_eq!(region.near_boundary_nodes().len(), 25);
        assert_eq!(region.near_boundary_nodes_not_at_domain_edge().len(), 9);
    }

    #[test]
    fn absorbing_region_counts_charge() {
        let mesh = unit_mesh(5);
        let mut regions = InnerRegionsManager::new(vec![
            InnerRegion::new("probe", 0.0, sphere(1.0, 1.0, 1.0, 0.5), None, &mesh).unwrap(),
            InnerRegion::new(
                "collector",
                0.0,
                sphere(3.0, 3.0, 3.0, 0.5),
                Some(InteractionModel::Absorbing),
                &mesh,
            )
            .unwrap(),
        ]);

        assert!(regions.check_if_point_inside_and_count_charge(&Vector3::new(3.1, 3.0, 3.0), -2.0));
        assert!(regions.check_if_point_inside_and_count_charge(&Vector3::new(1.0, 1.1, 1.0), -2.0));
        assert!(!regions.check_if_point_inside_and_count_charge(&Vector3::new(2.0, 2.0, 2.0), -2.0));

        assert_eq!(regions.regions[0].total_absorbed_particles, 0);
        assert_eq!(regions.regions[1].total_absorbed_particles, 1);
        assert_eq!(regions.regions[1].total_absorbed_charge, -2.0);
    }

    #[test]
    fn overlap_is_reported() {
        let mesh = unit_mesh(7);
        let regions = InnerRegionsManager::new(vec![
            InnerRegion::new("a", 1.0, sphere(3.0, 3.0, 3.0, 1.0), None, &mesh).unwrap(),
            InnerRegion::new("b", 2.0, sphere(3.0, 3.0, 4.0, 1.0), None, &mesh).unwrap(),
            InnerRegion::new("c", 3.0, sphere(1.0, 1.0, 1.0, 0.1), None, &mesh).unwrap(),
        ]);

        assert_eq!(regions.overlapping_regions(), vec![("a".to_owned(), "b".to_owned())]);
    }
}
