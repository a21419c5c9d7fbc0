use thiserror::Error;

#[derive(Debug, Error)]
pub enum FieldSolverError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Index error: node ({i}, {j}, {k}) is not an interior node of a {nx}x{ny}x{nz} grid")]
    Index {
        i: usize,
        j: usize,
        k: usize,
        nx: usize,
        ny: usize,
        nz: usize,
    },
    #[error("Index error: unknown {index} is out of range for a system of {size} unknowns")]
    LinearIndex { index: usize, size: usize },
    #[error("Backend allocation error: {0}")]
    BackendAllocation(String),
    #[error("Backend solve error: {0}")]
    BackendSolve(String),
    #[error("Input error: {0}")]
    Input(String),
    #[error("Post Processor error: {0}")]
    PostProcessor(String),
}
