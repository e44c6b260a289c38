//! Output of the solved fields and the run configuration.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use nalgebra::DMatrix;
use serde::Serialize;
use tracing::info;

use crate::domain::grid2d::LocalGrid;

/// Write one process's slice of the solution as plain text.
///
/// One line per grid point with six whitespace-separated columns
/// `x y v s u w`, where `x` and `y` are the global coordinates of the point.
/// Lines of constant `x` are written contiguously, with a blank line after
/// each column block.
pub fn write_solution_file(
    path: &Path,
    grid: &LocalGrid,
    v: &DMatrix<f64>,
    s: &DMatrix<f64>,
    u0: &DMatrix<f64>,
    u1: &DMatrix<f64>,
) -> io::Result<()> {
    info!("Writing file {}", path.display());
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    for i in 0..grid.nx {
        for j in 0..grid.ny {
            let x = grid.global_i(i) as f64 * grid.dx;
            let y = grid.global_j(j) as f64 * grid.dy;
            writeln!(
                out,
                "{} {} {} {} {} {}",
                x,
                y,
                v[(i, j)],
                s[(i, j)],
                u0[(i, j)],
                u1[(i, j)]
            )?;
        }
        writeln!(out)?;
    }
    out.flush()
}

/// Configuration record written by the root process alongside the solution.
#[derive(Serialize, Debug, PartialEq)]
pub struct RunSummary {
    pub nx: usize,
    pub ny: usize,
    pub dx: f64,
    pub dy: f64,
    pub lx: f64,
    pub ly: f64,
    pub dt: f64,
    pub steps: usize,
    pub re: f64,
    pub solver: &'static str,
}

impl RunSummary {
    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        out.write_all(json.as_bytes())?;
        out.flush()
    }
}
