use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cavityflow::comm::run_on_mesh;
use cavityflow::error::SolverError;
use cavityflow::io::RunSummary;
use cavityflow::solver::cavity::LidDrivenCavity;

// Benchmark configuration; the first CLI argument overrides the process
// count (must be a perfect square).
const LX: f64 = 1.0;
const LY: f64 = 1.0;
const NX: usize = 101;
const NY: usize = 101;
const DT: f64 = 0.005;
const T_FINAL: f64 = 0.05;
const RE: f64 = 1000.0;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let nprocs = match std::env::args().nth(1) {
        Some(arg) => match arg.parse::<usize>() {
            Ok(n) => n,
            Err(_) => {
                error!("usage: cavityflow [nprocs]");
                return ExitCode::FAILURE;
            }
        },
        None => 1,
    };

    match run(nprocs) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(nprocs: usize) -> Result<(), SolverError> {
    let results = run_on_mesh(nprocs, |comm| -> Result<(), SolverError> {
        let (row, col) = comm.coords();
        let mut solver = LidDrivenCavity::new(comm);
        solver.set_domain_size(LX, LY);
        solver.set_grid_size(NX, NY);
        solver.set_time_step(DT);
        solver.set_final_time(T_FINAL);
        solver.set_reynolds_number(RE);

        solver.print_configuration()?;
        solver.initialise()?;
        solver.integrate()?;

        let path = if nprocs == 1 {
            PathBuf::from("cavity.dat")
        } else {
            PathBuf::from(format!("cavity.r{}c{}.dat", row, col))
        };
        solver.write_solution(&path)?;

        if solver.is_root() {
            let summary = RunSummary {
                nx: solver.nx(),
                ny: solver.ny(),
                dx: solver.dx(),
                dy: solver.dy(),
                lx: solver.lx(),
                ly: solver.ly(),
                dt: solver.dt(),
                steps: solver.num_steps(),
                re: solver.re(),
                solver: "preconditioned conjugate gradient",
            };
            summary.write_json(&PathBuf::from("cavity.json"))?;
            info!("run complete");
        }
        Ok(())
    })?;

    results.into_iter().collect()
}
