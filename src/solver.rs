use nalgebra::{DVector, Vector3};
use nalgebra_sparse::CsrMatrix;
use ndarray::Array3;

use crate::{
    backend::LinearBackend,
    datatypes::NodeRef,
    error::FieldSolverError,
    indexing::InteriorIndexer,
    mesh::SpatialMesh,
    operator::construct_equation_matrix,
    region::InnerRegionsManager,
    rhs::assemble_rhs,
};

/// Lifecycle of a [`FieldSolver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverState {
    Unconfigured,
    OperatorBuilt,
    Solving,
    SolutionAvailable,
}

/// Geometry an operator was built for
#[derive(Debug, Clone, Copy, PartialEq)]
struct MeshSignature {
    n_nodes: (usize, usize, usize),
    cell_sizes: (f64, f64, f64),
}

impl MeshSignature {
    fn of(mesh: &SpatialMesh) -> MeshSignature {
        MeshSignature {
            n_nodes: mesh.n_nodes(),
            cell_sizes: mesh.cell_sizes(),
        }
    }
}

/// Node sets of every region, which fix the shape of the operator
#[derive(Debug, Clone, PartialEq)]
struct RegionsSignature {
    node_sets: Vec<(Vec<NodeRef>, Vec<NodeRef>)>,
}

impl RegionsSignature {
    fn of(regions: &InnerRegionsManager) -> RegionsSignature {
        RegionsSignature {
            node_sets: regions
                .iter()
                .map(|r| {
                    (
                        r.inner_nodes_not_at_domain_edge().to_vec(),
                        r.near_boundary_nodes_not_at_domain_edge().to_vec(),
                    )
                })
                .collect(),
        }
    }
}

/// Persistent Poisson operator for one mesh and set of regions, plus the
/// backend that solves against it
pub struct FieldSolver<B: LinearBackend> {
    backend: B,
    state: SolverState,
    indexer: Option<InteriorIndexer>,
    signature: Option<MeshSignature>,
    regions_signature: Option<RegionsSignature>,
    operator: Option<CsrMatrix<f64>>,
    phi_vec: DVector<f64>,
}

impl<B: LinearBackend> FieldSolver<B> {
    pub fn new(backend: B) -> FieldSolver<B> {
        FieldSolver {
            backend,
            state: SolverState::Unconfigured,
            indexer: None,
            signature: None,
            regions_signature: None,
            operator: None,
            phi_vec: DVector::zeros(0),
        }
    }

    /// Builds the solver and its operator in one step
    pub fn with_operator(
        backend: B,
        mesh: &SpatialMesh,
        regions: &InnerRegionsManager,
    ) -> Result<FieldSolver<B>, FieldSolverError> {
        let mut solver = FieldSolver::new(backend);
        solver.rebuild(mesh, regions)?;
        Ok(solver)
    }

    pub fn state(&self) -> SolverState {
        self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The persisted operator, if one was built
    pub fn operator(&self) -> Option<&CsrMatrix<f64>> {
        self.operator.as_ref()
    }

    /// Solution of the last solve in interior numbering
    pub fn solution(&self) -> &DVector<f64> {
        &self.phi_vec
    }

    /// Rebuilds the operator from scratch.
    ///
    /// Regions must already be classified against `mesh`. Resets the stored
    /// solution, so the next solve starts from zero.
    ///
    /// # Arguments
    /// * `mesh` - Mesh the operator is built for
    /// * `regions` - Embedded conductors eliminated from the system
    pub fn rebuild(&mut self, mesh: &SpatialMesh, regions: &InnerRegionsManager) -> Result<(), FieldSolverError> {
        let indexer = InteriorIndexer::for_mesh(mesh)?;

        println!(
            "info: building operator for {} unknowns and {} inner regions...",
            indexer.n_unknowns(),
            regions.len()
        );
        for (a, b) in regions.overlapping_regions() {
            println!("warning [regions]: inner regions '{a}' and '{b}' overlap, '{b}' takes precedence");
        }

        let operator = construct_equation_matrix(mesh, regions)?;
        println!("info: operator has {} non-zeros", operator.nnz());

        self.phi_vec = DVector::zeros(indexer.n_unknowns());
        self.indexer = Some(indexer);
        self.signature = Some(MeshSignature::of(mesh));
        self.regions_signature = Some(RegionsSignature::of(regions));
        self.operator = Some(operator);
        self.state = SolverState::OperatorBuilt;

        Ok(())
    }

    /// Solves for the potential and writes it to the interior of
    /// `mesh.potential`. Domain-edge values are left as they are.
    ///
    /// Region potentials and the charge density may change between solves.
    /// Region node sets may not: reshaping or reclassifying a region needs a
    /// `rebuild` first.
    ///
    /// # Arguments
    /// * `mesh` - Mesh with charge density and domain-edge potentials set
    /// * `regions` - The regions the operator was built with
    pub fn eval_potential(
        &mut self,
        mesh: &mut SpatialMesh,
        regions: &InnerRegionsManager,
    ) -> Result<(), FieldSolverError> {
        let (indexer, operator) = match (self.indexer, self.operator.as_ref()) {
            (Some(indexer), Some(operator)) => (indexer, operator),
            _ => {
                return Err(FieldSolverError::Configuration(
                    "operator has not been built, call rebuild first".to_owned(),
                ))
            }
        };
        let signature = MeshSignature::of(mesh);
        if self.signature != Some(signature) {
            return Err(FieldSolverError::Configuration(format!(
                "mesh with {:?} nodes and cell sizes {:?} does not match the operator, call rebuild first",
                signature.n_nodes, signature.cell_sizes
            )));
        }

        if self.regions_signature.as_ref() != Some(&RegionsSignature::of(regions)) {
            return Err(FieldSolverError::Configuration(
                "inner region nodes differ from the ones the operator was built with, call rebuild first".to_owned(),
            ));
        }

        let rhs = assemble_rhs(&indexer, mesh, regions)?;

        self.state = SolverState::Solving;
        println!("info: solving with {} backend...", self.backend.name());
        let start = std::time::Instant::now();
        let solution = match self.backend.solve(operator, &rhs, &self.phi_vec) {
            Ok(x) => x,
            Err(err) => {
                self.state = SolverState::OperatorBuilt;
                return Err(err);
            }
        };
        let elapsed = (std::time::Instant::now() - start).as_secs_f32();
        println!("info: solved system in {:.3} seconds", elapsed);

        self.phi_vec = solution;
        set_solution_at_nodes_of_inner_regions(&mut self.phi_vec, &indexer, regions)?;
        transfer_solution_to_spat_mesh(&self.phi_vec, &indexer, mesh)?;

        self.state = SolverState::SolutionAvailable;
        Ok(())
    }

    pub fn eval_fields_from_potential(&self, mesh: &mut SpatialMesh) {
        eval_fields_from_potential(mesh);
    }
}

/// Overwrites the unknowns inside every region with its potential
pub fn set_solution_at_nodes_of_inner_regions(
    phi_vec: &mut DVector<f64>,
    indexer: &InteriorIndexer,
    regions: &InnerRegionsManager,
) -> Result<(), FieldSolverError> {
    for region in regions.iter() {
        for row in indexer.indices_of(region.inner_nodes_not_at_domain_edge())? {
            phi_vec[row] = region.potential;
        }
    }
    Ok(())
}

/// Scatters the solution vector onto the interior of `mesh.potential`
pub fn transfer_solution_to_spat_mesh(
    phi_vec: &DVector<f64>,
    indexer: &InteriorIndexer,
    mesh: &mut SpatialMesh,
) -> Result<(), FieldSolverError> {
    if phi_vec.len() != indexer.n_unknowns() {
        return Err(FieldSolverError::BackendSolve(format!(
            "solution has {} entries, expected {}",
            phi_vec.len(),
            indexer.n_unknowns()
        )));
    }
    for (row, node) in indexer.interior_nodes().enumerate() {
        mesh.potential[[node.i, node.j, node.k]] = phi_vec[row];
    }
    Ok(())
}

fn central_difference(phi_next: f64, phi_prev: f64, h: f64) -> f64 {
    (phi_next - phi_prev) / (2.0 * h)
}

fn boundary_difference(phi_upper: f64, phi_lower: f64, h: f64) -> f64 {
    (phi_upper - phi_lower) / h
}

/// Derivative of `phi` along one axis at node index `n` of `count`
fn axis_derivative(phi: impl Fn(usize) -> f64, n: usize, count: usize, h: f64) -> f64 {
    if n == 0 {
        boundary_difference(phi(1), phi(0), h)
    } else if n == count - 1 {
        boundary_difference(phi(n), phi(n - 1), h)
    } else {
        central_difference(phi(n + 1), phi(n - 1), h)
    }
}

/// Electric field `E = -grad(phi)` at every node of the mesh.
///
/// Central differences inside, one-sided differences on the outer layer.
pub fn eval_fields_from_potential(mesh: &mut SpatialMesh) {
    let (nx, ny, nz) = mesh.n_nodes();
    let (dx, dy, dz) = mesh.cell_sizes();
    let phi: &Array3<f64> = &mesh.potential;

    let field = Array3::from_shape_fn((nx, ny, nz), |(i, j, k)| {
        let ex = -axis_derivative(|n| phi[[n, j, k]], i, nx, dx);
        let ey = -axis_derivative(|n| phi[[i, n, k]], j, ny, dy);
        let ez = -axis_derivative(|n| phi[[i, j, n]], k, nz, dz);
        Vector3::new(ex, ey, ez)
    });

    mesh.electric_field = field;
}
