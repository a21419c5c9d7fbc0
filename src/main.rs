use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};

use field_solver::{
    backend::{ConjugateGradientBackend, DirectBackend, LinearBackend},
    config::{load_input_file, parse_input, SimulationConfig},
    error::FieldSolverError,
    post_processor,
    solver::FieldSolver,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    Cg,
    Direct,
}

/// Electrostatic potential and field around embedded conductors
#[derive(Debug, Parser)]
#[command(name = "field-solver", version)]
struct Args {
    /// Input json with mesh, boundary conditions and inner regions
    input_json: String,

    /// Directory receiving potential.csv and inner_regions.json
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = Backend::Cg)]
    backend: Backend,

    /// Show a progress bar while iterating
    #[arg(long)]
    progress: bool,

    /// Log conjugate gradient iterations
    #[arg(long)]
    log_iterations: bool,
}

fn solve_and_write<B: LinearBackend>(
    backend: B,
    conf: &SimulationConfig,
    output_dir: &Path,
) -> Result<(), FieldSolverError> {
    let mut mesh = conf.build_mesh()?;
    let regions = conf.build_regions(&mesh)?;

    let mut solver = FieldSolver::with_operator(backend, &mesh, &regions)?;
    solver.eval_potential(&mut mesh, &regions)?;
    solver.eval_fields_from_potential(&mut mesh);

    if let Err(err) = std::fs::create_dir_all(output_dir) {
        return Err(FieldSolverError::PostProcessor(format!(
            "Failed to create {}: {err}",
            output_dir.display()
        )));
    }
    let nodes_output = output_dir.join("potential.csv");
    let regions_output = output_dir.join("inner_regions.json");
    post_processor::csv_output(&mesh, &nodes_output.to_string_lossy())?;
    post_processor::write_regions(&regions, &regions_output.to_string_lossy())?;

    Ok(())
}

fn run(args: &Args) -> Result<(), FieldSolverError> {
    let start = std::time::Instant::now();

    let input_json = load_input_file(&args.input_json)?;
    let mut conf = parse_input(&input_json)?;
    conf.solver.progress |= args.progress;
    conf.solver.log_iterations |= args.log_iterations;

    match args.backend {
        Backend::Cg => solve_and_write(
            ConjugateGradientBackend::new(conf.solver.clone()),
            &conf,
            &args.output_dir,
        )?,
        Backend::Direct => solve_and_write(DirectBackend::default(), &conf, &args.output_dir)?,
    }

    let elapsed = (std::time::Instant::now() - start).as_secs_f32();
    println!("info: finished in {:.3} seconds", elapsed);
    Ok(())
}

fn main() {
    let args = Args::parse();

    if let Err(err) = run(&args) {
        println!("{err}");
        std::process::exit(1)
    }
}
