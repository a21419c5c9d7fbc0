use argmin::{
    core::{
        observers::{Observe, ObserverMode},
        Error, Executor, Operator, State, KV,
    },
    solver::conjugategradient::ConjugateGradient,
};
use argmin_observer_slog::SlogLogger;
use indicatif::ProgressBar;
use nalgebra::DVector;
use nalgebra_sparse::{convert::serial::convert_csr_dense, CsrMatrix};

use crate::{
    config::SolverConfig,
    error::FieldSolverError,
    operator::{apply_operator, matrix_entry},
};

/// A linear-algebra package able to solve `Ax = b`
pub trait LinearBackend {
    fn name(&self) -> &'static str;

    /// Solves `a x = b`
    ///
    /// # Arguments
    /// * `a` - Square system matrix, reused across calls
    /// * `b` - Right-hand side
    /// * `initial_guess` - Starting point for iterative methods
    ///
    /// # Returns
    /// The solution vector, or a backend error when no solution was reached
    fn solve(
        &self,
        a: &CsrMatrix<f64>,
        b: &DVector<f64>,
        initial_guess: &DVector<f64>,
    ) -> Result<DVector<f64>, FieldSolverError>;
}

fn check_dimensions(a: &CsrMatrix<f64>, b: &DVector<f64>, x: &DVector<f64>) -> Result<(), FieldSolverError> {
    if a.nrows() != a.ncols() {
        return Err(FieldSolverError::BackendAllocation(format!(
            "system matrix is {}x{}, expected square",
            a.nrows(),
            a.ncols()
        )));
    }
    if b.len() != a.nrows() || x.len() != a.nrows() {
        return Err(FieldSolverError::BackendAllocation(format!(
            "vector sizes {} (rhs) and {} (guess) do not match {} unknowns",
            b.len(),
            x.len(),
            a.nrows()
        )));
    }
    Ok(())
}

/// Runs multiplication for the conjugate gradient solver on the
/// diagonally scaled system `M S A M y = M S b`, where `S` flips rows with a
/// negative diagonal and `M = |diag(A)|^-1/2`
#[derive(Clone)]
struct ScaledOperator<'a> {
    a: &'a CsrMatrix<f64>,
    row_factor: Vec<f64>,
    col_factor: Vec<f64>,
}

impl<'a> ScaledOperator<'a> {
    /// # Returns
    /// The operator, or a solve error if a diagonal entry is zero
    fn new(a: &'a CsrMatrix<f64>) -> Result<ScaledOperator<'a>, FieldSolverError> {
        let mut row_factor = Vec::with_capacity(a.nrows());
        let mut col_factor = Vec::with_capacity(a.nrows());

        for row in 0..a.nrows() {
            let diagonal = matrix_entry(a, row, row);
            if diagonal == 0.0 || !diagonal.is_finite() {
                return Err(FieldSolverError::BackendSolve(format!(
                    "row {row} has diagonal {diagonal}, cannot scale the system"
                )));
            }
            let m = 1.0 / diagonal.abs().sqrt();
            row_factor.push(diagonal.signum() * m);
            col_factor.push(m);
        }

        Ok(ScaledOperator {
            a,
            row_factor,
            col_factor,
        })
    }

    fn scale_rhs(&self, b: &DVector<f64>) -> Vec<f64> {
        b.iter().zip(&self.row_factor).map(|(v, f)| v * f).collect()
    }

    fn to_scaled(&self, x: &DVector<f64>) -> Vec<f64> {
        x.iter().zip(&self.col_factor).map(|(v, m)| v / m).collect()
    }

    fn from_scaled(&self, y: &[f64]) -> DVector<f64> {
        DVector::from_iterator(y.len(), y.iter().zip(&self.col_factor).map(|(v, m)| v * m))
    }
}

impl<'a> Operator for ScaledOperator<'a> {
    type Param = Vec<f64>;
    type Output = Vec<f64>;

    fn apply(&self, y: &Self::Param) -> Result<Self::Output, Error> {
        let z: Vec<f64> = y.iter().zip(&self.col_factor).map(|(v, m)| v * m).collect();
        Ok(apply_operator(self.a, &z)
            .into_iter()
            .zip(&self.row_factor)
            .map(|(v, f)| v * f)
            .collect())
    }
}

fn l2_norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

fn residual_norm(op: &ScaledOperator, y: &[f64], rhs: &[f64]) -> Result<f64, FieldSolverError> {
    let ay = op
        .apply(&y.to_vec())
        .map_err(|err| FieldSolverError::BackendSolve(format!("operator application failed: {err}")))?;
    Ok(ay.iter().zip(rhs).map(|(l, r)| (l - r) * (l - r)).sum::<f64>().sqrt())
}

/// Observer bar for the argmin solver, filled as the residual drops from its
/// first value toward the target
struct ConjugateGradientObserverBar {
    bar: ProgressBar,
    start_mag: f64,
    final_mag: f64,
}

impl ConjugateGradientObserverBar {
    fn new(initial_residual: f64, target_residual: f64) -> ConjugateGradientObserverBar {
        ConjugateGradientObserverBar {
            bar: ProgressBar::new(1000),
            start_mag: initial_residual.log10(),
            final_mag: target_residual.log10(),
        }
    }
}

impl<I> Observe<I> for ConjugateGradientObserverBar
where
    I: State<Float = f64>,
{
    fn observe_init(&mut self, _name: &str, _state: &I, _kv: &KV) -> Result<(), Error> {
        Ok(())
    }

    fn observe_iter(&mut self, state: &I, _kv: &KV) -> Result<(), Error> {
        let cost = state.get_cost().sqrt();
        if !(cost.is_finite() && cost > 0.0) {
            return Ok(());
        }
        let span = self.start_mag - self.final_mag;
        if span <= 0.0 {
            return Ok(());
        }
        let progress = ((self.start_mag - cost.log10()) / span).clamp(0.0, 1.0);
        self.bar.set_position((progress * 1000.0) as u64);

        Ok(())
    }

    fn observe_final(&mut self, _state: &I) -> Result<(), Error> {
        self.bar.finish();
        Ok(())
    }
}

/// Default backend: conjugate gradient from argmin on the Jacobi-scaled
/// system.
///
/// The embedded-boundary operator has negative diagonal on Laplacian rows and
/// `+1` on pinned rows, with no coupling between the two groups, so the
/// sign-normalised scaled matrix is symmetric positive definite.
#[derive(Debug, Clone, Default)]
pub struct ConjugateGradientBackend {
    pub config: SolverConfig,
}

impl ConjugateGradientBackend {
    pub fn new(config: SolverConfig) -> ConjugateGradientBackend {
        ConjugateGradientBackend { config }
    }
}

impl LinearBackend for ConjugateGradientBackend {
    fn name(&self) -> &'static str {
        "conjugate gradient"
    }

    fn solve(
        &self,
        a: &CsrMatrix<f64>,
        b: &DVector<f64>,
        initial_guess: &DVector<f64>,
    ) -> Result<DVector<f64>, FieldSolverError> {
        check_dimensions(a, b, initial_guess)?;

        let operator = ScaledOperator::new(a)?;
        let rhs = operator.scale_rhs(b);
        let rhs_norm = l2_norm(&rhs);
        if rhs_norm == 0.0 {
            return Ok(DVector::zeros(b.len()));
        }

        let target_residual = f64::max(self.config.rtol * rhs_norm, self.config.atol);
        let guess = operator.to_scaled(initial_guess);
        let initial_residual = residual_norm(&operator, &guess, &rhs)?;
        if initial_residual <= target_residual {
            return Ok(initial_guess.clone());
        }

        let solver: ConjugateGradient<_, f64> = ConjugateGradient::new(rhs.clone());
        let max_iters = self.config.max_iterations;

        let mut executor = Executor::new(operator.clone(), solver).configure(|state| {
            state
                .param(guess)
                .max_iters(max_iters)
                // argmin reports the squared residual norm as cost
                .target_cost(target_residual * target_residual)
        });
        if self.config.progress {
            executor = executor.add_observer(
                ConjugateGradientObserverBar::new(initial_residual, target_residual),
                ObserverMode::Always,
            );
        }
        if self.config.log_iterations {
            executor = executor.add_observer(SlogLogger::term(), ObserverMode::Every(10));
        }

        let res = match executor.run() {
            Ok(r) => r,
            Err(err) => {
                return Err(FieldSolverError::BackendSolve(format!(
                    "Conjugate Gradient error: {err}"
                )))
            }
        };

        let best_param = match &res.state().best_param {
            Some(vec) => vec.clone(),
            None => {
                return Err(FieldSolverError::BackendSolve(
                    "Conjugate Gradient could not produce best parameter".to_owned(),
                ))
            }
        };

        let final_residual = residual_norm(&operator, &best_param, &rhs)?;
        if !final_residual.is_finite() || final_residual > target_residual {
            return Err(FieldSolverError::BackendSolve(format!(
                "Conjugate Gradient did not converge in {max_iters} iterations: \
                 relative residual {:e}, requested {:e}",
                final_residual / rhs_norm,
                self.config.rtol
            )));
        }

        Ok(operator.from_scaled(&best_param))
    }
}

/// Dense LU factorization for small systems and cross-checks
#[derive(Debug, Clone)]
pub struct DirectBackend {
    pub max_unknowns: usize,
}

impl Default for DirectBackend {
    fn default() -> DirectBackend {
        DirectBackend { max_unknowns: 4096 }
    }
}

impl LinearBackend for DirectBackend {
    fn name(&self) -> &'static str {
        "dense LU"
    }

    fn solve(
        &self,
        a: &CsrMatrix<f64>,
        b: &DVector<f64>,
        initial_guess: &DVector<f64>,
    ) -> Result<DVector<f64>, FieldSolverError> {
        check_dimensions(a, b, initial_guess)?;
        if a.nrows() > self.max_unknowns {
            return Err(FieldSolverError::BackendAllocation(format!(
                "dense LU limited to {} unknowns, system has {}",
                self.max_unknowns,
                a.nrows()
            )));
        }

        let dense = convert_csr_dense(a);
        match dense.lu().solve(b) {
            Some(x) => Ok(x),
            None => Err(FieldSolverError::BackendSolve("system matrix is singular".to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::{
        mesh::SpatialMesh,
        operator::construct_equation_matrix,
        region::{InnerRegion, InnerRegionsManager, Shape},
    };
    use nalgebra_sparse::CooMatrix;

    /// 1-D Laplacian rows with one pinned unknown in the middle
    fn pinned_chain() -> CsrMatrix<f64> {
        let mut coo = CooMatrix::new(5, 5);
        for (r, c, v) in [
            (0, 0, -2.0),
            (0, 1, 1.0),
            (1, 0, 1.0),
            (1, 1, -2.0),
            (2, 2, 1.0),
            (3, 3, -2.0),
            (3, 4, 1.0),
            (4, 3, 1.0),
            (4, 4, -2.0),
        ] {
            coo.push(r, c, v);
        }
        CsrMatrix::from(&coo)
    }

    #[test]
    fn conjugate_gradient_handles_pinned_rows() {
        let a = pinned_chain();
        let b = DVector::from_vec(vec![-1.0, -3.0, 4.0, 2.0, 0.5]);
        let backend = ConjugateGradientBackend::default();

        let x = backend.solve(&a, &b, &DVector::zeros(5)).unwrap();
        let expected = DirectBackend::default().solve(&a, &b, &DVector::zeros(5)).unwrap();

        for (got, want) in x.iter().zip(expected.iter()) {
            assert_relative_eq!(*got, *want, epsilon = 1e-9);
        }
        assert_relative_eq!(x[2], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn conjugate_gradient_reaches_default_tolerance_on_a_grid() {
        let mesh = SpatialMesh::new([7, 8, 6], [0.5, 0.25, 1.0]).unwrap();
        let shape = Shape::Sphere {
            origin_x: 1.5,
            origin_y: 0.75,
            origin_z: 2.5,
            radius: 0.6,
        };
        let regions = InnerRegionsManager::new(vec![InnerRegion::new("ball", 3.0, shape, None, &mesh).unwrap()]);
        let a = construct_equation_matrix(&mesh, &regions).unwrap();
        assert!(a.nrows() > 50);

        let b = DVector::from_fn(a.nrows(), |i, _| ((i * 7) % 11) as f64 - 5.0);
        let x = ConjugateGradientBackend::default()
            .solve(&a, &b, &DVector::zeros(a.nrows()))
            .unwrap();
        let expected = DirectBackend::default()
            .solve(&a, &b, &DVector::zeros(a.nrows()))
            .unwrap();

        for (got, want) in x.iter().zip(expected.iter()) {
            assert_relative_eq!(*got, *want, epsilon = 1e-8, max_relative = 1e-8);
        }
    }

    #[test]
    fn zero_rhs_gives_zero_solution() {
        let a = pinned_chain();
        let x = ConjugateGradientBackend::default()
            .solve(&a, &DVector::zeros(5), &DVector::from_element(5, 3.0))
            .unwrap();
        assert!(x.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn converged_guess_is_returned_unchanged() {
        let a = pinned_chain();
        let b = DVector::from_vec(vec![-1.0, -3.0, 4.0, 2.0, 0.5]);
        let exact = DirectBackend::default().solve(&a, &b, &DVector::zeros(5)).unwrap();
        let backend = ConjugateGradientBackend::new(SolverConfig {
            rtol: 1e-6,
            ..SolverConfig::default()
        });

        let x = backend.solve(&a, &b, &exact).unwrap();
        assert_eq!(x, exact);
    }

    #[test]
    fn zero_diagonal_is_a_solve_error() {
        let mut coo = CooMatrix::new(2, 2);
        coo.push(0, 1, 1.0);
        coo.push(1, 0, 1.0);
        let a = CsrMatrix::from(&coo);
        let err = ConjugateGradientBackend::default()
            .solve(&a, &DVector::from_element(2, 1.0), &DVector::zeros(2))
            .unwrap_err();
        assert!(matches!(err, FieldSolverError::BackendSolve(_)));
    }

    #[test]
    fn mismatched_sizes_are_allocation_errors() {
        let a = pinned_chain();
        let err = DirectBackend::default()
            .solve(&a, &DVector::zeros(4), &DVector::zeros(5))
            .unwrap_err();
        assert!(matches!(err, FieldSolverError::BackendAllocation(_)));

        let small = DirectBackend { max_unknowns: 2 };
        let err = small.solve(&a, &DVector::zeros(5), &DVector::zeros(5)).unwrap_err();
        assert!(matches!(err, FieldSolverError::BackendAllocation(_)));
    }

    #[test]
    fn non_convergence_is_reported() {
        let a = pinned_chain();
        let b = DVector::from_vec(vec![-1.0, -3.0, 4.0, 2.0, 0.5]);
        let backend = ConjugateGradientBackend::new(SolverConfig {
            max_iterations: 1,
            ..SolverConfig::default()
        });
        let err = backend.solve(&a, &b, &DVector::zeros(5)).unwrap_err();
        assert!(matches!(err, FieldSolverError::BackendSolve(_)));
    }
}
