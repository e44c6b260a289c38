//! Time integration of the lid-driven cavity in streamfunction-vorticity
//! form.
//!
//! Each step imposes boundary vorticity from the streamfunction, rebuilds
//! interior vorticity from its discrete Laplacian, advances vorticity one
//! explicit Euler step of advection-diffusion, and recovers the
//! streamfunction by solving `-laplacian(s) = v` with the distributed CG
//! solver. The top wall moves with the lid; the other three walls are at
//! rest.

use std::path::Path;

use nalgebra::DMatrix;
use tracing::info;

use crate::comm::{CartComm, Direction, HaloExchange};
use crate::domain::grid2d::LocalGrid;
use crate::error::{ConfigError, SolverError};
use crate::io;
use crate::solver::cg::SolverCg;

/// Tangential velocity of the moving lid.
pub const LID_VELOCITY: f64 = 1.0;

/// Stability bound on `nu * dt / (dx * dy)` for the explicit step.
const CFL_LIMIT: f64 = 0.25;

const DEFAULT_GRID: usize = 9;

/// Whether local cell `(i, j)` of an `nx x ny` slab lies on the global
/// domain boundary.
fn at_global_boundary(comm: &CartComm, nx: usize, ny: usize, i: usize, j: usize) -> bool {
    (i == 0 && comm.at_boundary(Direction::Left))
        || (i + 1 == nx && comm.at_boundary(Direction::Right))
        || (j == 0 && comm.at_boundary(Direction::Down))
        || (j + 1 == ny && comm.at_boundary(Direction::Up))
}

/// Five-point neighbours `(west, east, south, north)` of a local cell,
/// falling back to the halo where the cell sits on a local edge.
fn neighbours(
    field: &DMatrix<f64>,
    halo: &HaloExchange,
    nx: usize,
    ny: usize,
    i: usize,
    j: usize,
) -> (f64, f64, f64, f64) {
    let west = if i > 0 { field[(i - 1, j)] } else { halo.left()[j] };
    let east = if i + 1 < nx { field[(i + 1, j)] } else { halo.right()[j] };
    let south = if j > 0 { field[(i, j - 1)] } else { halo.bottom()[i] };
    let north = if j + 1 < ny { field[(i, j + 1)] } else { halo.top()[i] };
    (west, east, south, north)
}

/// Visit every cell of the local perimeter exactly once. With `nx == 1` or
/// `ny == 1` this degenerates to visiting the whole slab.
fn for_each_perimeter(nx: usize, ny: usize, mut f: impl FnMut(usize, usize)) {
    for j in 0..ny {
        if j == 0 || j + 1 == ny {
            for i in 0..nx {
                f(i, j);
            }
        } else {
            f(0, j);
            if nx > 1 {
                f(nx - 1, j);
            }
        }
    }
}

/// The lid-driven cavity advancer: owns the vorticity and streamfunction
/// slabs of one process plus the Poisson solver that couples them.
#[derive(Debug)]
pub struct LidDrivenCavity {
    comm: CartComm,
    grid: LocalGrid,
    dt: f64,
    t_final: f64,
    re: f64,
    nu: f64,
    v: DMatrix<f64>,
    s: DMatrix<f64>,
    scratch: DMatrix<f64>,
    s_halo: HaloExchange,
    v_halo: HaloExchange,
    cg: Option<SolverCg>,
}

impl LidDrivenCavity {
    /// A solver bound to one process of the mesh, with default problem
    /// parameters. Call the setters, then `initialise`, then `integrate`.
    pub fn new(comm: CartComm) -> Self {
        let (row, col) = comm.coords();
        let grid = LocalGrid::new(DEFAULT_GRID, DEFAULT_GRID, 1.0, 1.0, comm.p(), row, col);
        Self {
            comm,
            grid,
            dt: 0.01,
            t_final: 1.0,
            re: 10.0,
            nu: 0.1,
            v: DMatrix::zeros(0, 0),
            s: DMatrix::zeros(0, 0),
            scratch: DMatrix::zeros(0, 0),
            s_halo: HaloExchange::new(0, 0),
            v_halo: HaloExchange::new(0, 0),
            cg: None,
        }
    }

    pub fn set_domain_size(&mut self, lx: f64, ly: f64) {
        let (row, col) = self.comm.coords();
        self.grid = LocalGrid::new(
            self.grid.global_nx,
            self.grid.global_ny,
            lx,
            ly,
            self.comm.p(),
            row,
            col,
        );
    }

    pub fn set_grid_size(&mut self, nx: usize, ny: usize) {
        let (row, col) = self.comm.coords();
        self.grid = LocalGrid::new(nx, ny, self.grid.lx, self.grid.ly, self.comm.p(), row, col);
    }

    pub fn set_time_step(&mut self, dt: f64) {
        self.dt = dt;
    }

    pub fn set_final_time(&mut self, t_final: f64) {
        self.t_final = t_final;
    }

    /// Sets the Reynolds number and the kinematic viscosity `nu = 1/Re`.
    pub fn set_reynolds_number(&mut self, re: f64) {
        self.re = re;
        self.nu = 1.0 / re;
    }

    pub fn grid(&self) -> &LocalGrid {
        &self.grid
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn final_time(&self) -> f64 {
        self.t_final
    }

    pub fn re(&self) -> f64 {
        self.re
    }

    pub fn nu(&self) -> f64 {
        self.nu
    }

    pub fn lid_velocity(&self) -> f64 {
        LID_VELOCITY
    }

    pub fn dx(&self) -> f64 {
        self.grid.dx
    }

    pub fn dy(&self) -> f64 {
        self.grid.dy
    }

    pub fn nx(&self) -> usize {
        self.grid.global_nx
    }

    pub fn ny(&self) -> usize {
        self.grid.global_ny
    }

    pub fn npts(&self) -> usize {
        self.grid.npts_global()
    }

    pub fn lx(&self) -> f64 {
        self.grid.lx
    }

    pub fn ly(&self) -> f64 {
        self.grid.ly
    }

    pub fn nx_local(&self) -> usize {
        self.grid.nx
    }

    pub fn ny_local(&self) -> usize {
        self.grid.ny
    }

    pub fn npts_local(&self) -> usize {
        self.grid.npts()
    }

    pub fn lx_local(&self) -> f64 {
        self.grid.lx_local()
    }

    pub fn ly_local(&self) -> f64 {
        self.grid.ly_local()
    }

    pub fn coords(&self) -> (usize, usize) {
        self.comm.coords()
    }

    pub fn is_root(&self) -> bool {
        self.comm.is_root()
    }

    /// Number of time steps `integrate` will run.
    pub fn num_steps(&self) -> usize {
        (self.t_final / self.dt).ceil() as usize
    }

    /// Allocate the fields and the Poisson solver for the current grid.
    /// Everything starts identically zero.
    pub fn initialise(&mut self) -> Result<(), ConfigError> {
        if self.grid.global_nx < 2 || self.grid.global_ny < 2 {
            return Err(ConfigError::InvalidGridSize(format!(
                "global grid {} x {} must be at least 2 x 2",
                self.grid.global_nx, self.grid.global_ny
            )));
        }
        if self.grid.nx == 0 || self.grid.ny == 0 {
            return Err(ConfigError::InvalidGridSize(format!(
                "{} x {} processes over a {} x {} grid leaves process {:?} empty",
                self.comm.p(),
                self.comm.p(),
                self.grid.global_nx,
                self.grid.global_ny,
                self.comm.coords()
            )));
        }
        let (nx, ny) = (self.grid.nx, self.grid.ny);
        self.v = DMatrix::zeros(nx, ny);
        self.s = DMatrix::zeros(nx, ny);
        self.scratch = DMatrix::zeros(nx, ny);
        self.s_halo = HaloExchange::new(nx, ny);
        self.v_halo = HaloExchange::new(nx, ny);
        self.cg = Some(SolverCg::new(nx, ny, self.grid.dx, self.grid.dy));
        Ok(())
    }

    fn check_time_step(&self) -> Result<(), ConfigError> {
        let courant = self.nu * self.dt / (self.grid.dx * self.grid.dy);
        if courant > CFL_LIMIT {
            return Err(ConfigError::TimeStep {
                max_dt: CFL_LIMIT * self.grid.dx * self.grid.dy / self.nu,
            });
        }
        Ok(())
    }

    /// The configuration block the root process prints.
    pub fn configuration_report(&self) -> String {
        format!(
            "Grid size: {} x {}\n\
             Spacing:   {} x {}\n\
             Length:    {} x {}\n\
             Grid pts:  {}\n\
             Timestep:  {}\n\
             Steps:     {}\n\
             Reynolds number: {}\n\
             Linear solver: preconditioned conjugate gradient\n",
            self.grid.global_nx,
            self.grid.global_ny,
            self.grid.dx,
            self.grid.dy,
            self.grid.lx,
            self.grid.ly,
            self.grid.npts_global(),
            self.dt,
            self.num_steps(),
            self.re,
        )
    }

    /// Print the configuration on the root process and verify the time-step
    /// restriction, failing with the maximum admissible `dt` if violated.
    pub fn print_configuration(&self) -> Result<(), ConfigError> {
        if self.comm.is_root() {
            println!("{}", self.configuration_report());
        }
        if let Err(e) = self.check_time_step() {
            if self.comm.is_root() {
                eprintln!("ERROR: {}", e);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Run `ceil(T / dt)` time steps.
    pub fn integrate(&mut self) -> Result<(), SolverError> {
        self.check_time_step()?;
        if self.cg.is_none() {
            return Err(ConfigError::InvalidParameter(
                "integrate() requires initialise()".to_string(),
            )
            .into());
        }
        let steps = self.num_steps();
        for step in 0..steps {
            if self.comm.is_root() {
                info!(step, time = step as f64 * self.dt, "time step");
            }
            self.advance()?;
        }
        Ok(())
    }

    /// One time step: vorticity from the streamfunction, explicit Euler
    /// transport, Poisson solve back to the streamfunction.
    fn advance(&mut self) -> Result<(), SolverError> {
        self.compute_vorticity()?;
        self.advect_vorticity()?;
        let cg = self
            .cg
            .as_mut()
            .ok_or_else(|| ConfigError::InvalidParameter("advance before initialise".to_string()))?;
        cg.solve(&self.comm, &self.v, &mut self.s)?;
        Ok(())
    }

    /// Rebuild `v` from `s`: the negative discrete Laplacian at every
    /// globally interior point, wall vorticity on the owned global edges.
    ///
    /// The halo exchange on `s` overlaps with the strict-interior sweep, and
    /// its buffers stay valid for the transport step that follows.
    fn compute_vorticity(&mut self) -> Result<(), SolverError> {
        let LocalGrid { nx, ny, dx, dy, .. } = self.grid;
        let dx2i = 1.0 / (dx * dx);
        let dy2i = 1.0 / (dy * dy);

        self.s_halo.begin(&self.comm, &self.s)?;

        {
            let s = &self.s;
            let v = &mut self.v;
            for j in 1..ny.max(1) - 1 {
                for i in 1..nx.max(1) - 1 {
                    v[(i, j)] = dx2i * (2.0 * s[(i, j)] - s[(i + 1, j)] - s[(i - 1, j)])
                        + dy2i * (2.0 * s[(i, j)] - s[(i, j + 1)] - s[(i, j - 1)]);
                }
            }
        }

        self.s_halo.finish(&self.comm)?;

        {
            let comm = &self.comm;
            let s = &self.s;
            let s_halo = &self.s_halo;
            let v = &mut self.v;
            for_each_perimeter(nx, ny, |i, j| {
                if at_global_boundary(comm, nx, ny, i, j) {
                    return;
                }
                let (west, east, south, north) = neighbours(s, s_halo, nx, ny, i, j);
                v[(i, j)] = dx2i * (2.0 * s[(i, j)] - east - west)
                    + dy2i * (2.0 * s[(i, j)] - north - south);
            });
        }

        self.boundary_vorticity();
        Ok(())
    }

    /// Wall vorticity on the global-boundary rows and columns this process
    /// owns, global corners excluded. The second streamfunction layer next
    /// to a wall is local except on a one-cell slab, where it is read from
    /// the exchanged halo.
    fn boundary_vorticity(&mut self) {
        let LocalGrid { nx, ny, dx, dy, .. } = self.grid;
        let dxi = 1.0 / dx;
        let dyi = 1.0 / dy;
        let dx2i = dxi * dxi;
        let dy2i = dyi * dyi;
        let comm = &self.comm;
        let s = &self.s;
        let s_halo = &self.s_halo;
        let v = &mut self.v;

        // Global corner columns/rows are excluded from the wall sweeps.
        let i_lo = usize::from(comm.at_boundary(Direction::Left));
        let i_hi = nx - usize::from(comm.at_boundary(Direction::Right));
        let j_lo = usize::from(comm.at_boundary(Direction::Down));
        let j_hi = ny - usize::from(comm.at_boundary(Direction::Up));

        if comm.at_boundary(Direction::Up) {
            for i in i_lo..i_hi {
                let inner = if ny > 1 { s[(i, ny - 2)] } else { s_halo.bottom()[i] };
                v[(i, ny - 1)] =
                    2.0 * dy2i * (s[(i, ny - 1)] - inner) - 2.0 * dyi * LID_VELOCITY;
            }
        }
        if comm.at_boundary(Direction::Down) {
            for i in i_lo..i_hi {
                let inner = if ny > 1 { s[(i, 1)] } else { s_halo.top()[i] };
                v[(i, 0)] = 2.0 * dy2i * (s[(i, 0)] - inner);
            }
        }
        if comm.at_boundary(Direction::Left) {
            for j in j_lo..j_hi {
                let inner = if nx > 1 { s[(1, j)] } else { s_halo.right()[j] };
                v[(0, j)] = 2.0 * dx2i * (s[(0, j)] - inner);
            }
        }
        if comm.at_boundary(Direction::Right) {
            for j in j_lo..j_hi {
                let inner = if nx > 1 { s[(nx - 2, j)] } else { s_halo.left()[j] };
                v[(nx - 1, j)] = 2.0 * dx2i * (s[(nx - 1, j)] - inner);
            }
        }
    }

    /// Advance vorticity one explicit Euler step of advection-diffusion at
    /// every globally interior point.
    ///
    /// The right-hand side is evaluated entirely on the pre-step vorticity:
    /// updates land in a scratch snapshot that is swapped in afterwards, so
    /// the sweep order and the process decomposition cannot leak into the
    /// result. Reads of `s` reuse the halo exchanged by `compute_vorticity`.
    fn advect_vorticity(&mut self) -> Result<(), SolverError> {
        let LocalGrid { nx, ny, dx, dy, .. } = self.grid;
        let dxi = 1.0 / dx;
        let dyi = 1.0 / dy;
        let dx2i = dxi * dxi;
        let dy2i = dyi * dyi;
        let dt = self.dt;
        let nu = self.nu;

        self.v_halo.begin(&self.comm, &self.v)?;
        self.scratch.copy_from(&self.v);

        {
            let s = &self.s;
            let v = &self.v;
            let scratch = &mut self.scratch;
            for j in 1..ny.max(1) - 1 {
                for i in 1..nx.max(1) - 1 {
                    let jx = (s[(i + 1, j)] - s[(i - 1, j)]) * 0.5 * dxi
                        * ((v[(i, j + 1)] - v[(i, j - 1)]) * 0.5 * dyi);
                    let jy = (s[(i, j + 1)] - s[(i, j - 1)]) * 0.5 * dyi
                        * ((v[(i + 1, j)] - v[(i - 1, j)]) * 0.5 * dxi);
                    let lxx = (v[(i + 1, j)] - 2.0 * v[(i, j)] + v[(i - 1, j)]) * dx2i;
                    let lyy = (v[(i, j + 1)] - 2.0 * v[(i, j)] + v[(i, j - 1)]) * dy2i;
                    scratch[(i, j)] = v[(i, j)] + dt * (jx - jy + nu * (lxx + lyy));
                }
            }
        }

        self.v_halo.finish(&self.comm)?;

        {
            let comm = &self.comm;
            let s = &self.s;
            let v = &self.v;
            let s_halo = &self.s_halo;
            let v_halo = &self.v_halo;
            let scratch = &mut self.scratch;
            for_each_perimeter(nx, ny, |i, j| {
                if at_global_boundary(comm, nx, ny, i, j) {
                    return;
                }
                let (s_w, s_e, s_s, s_n) = neighbours(s, s_halo, nx, ny, i, j);
                let (v_w, v_e, v_s, v_n) = neighbours(v, v_halo, nx, ny, i, j);
                let jx = (s_e - s_w) * 0.5 * dxi * ((v_n - v_s) * 0.5 * dyi);
                let jy = (s_n - s_s) * 0.5 * dyi * ((v_e - v_w) * 0.5 * dxi);
                let lxx = (v_e - 2.0 * v[(i, j)] + v_w) * dx2i;
                let lyy = (v_n - 2.0 * v[(i, j)] + v_s) * dy2i;
                scratch[(i, j)] = v[(i, j)] + dt * (jx - jy + nu * (lxx + lyy));
            });
        }

        std::mem::swap(&mut self.v, &mut self.scratch);
        Ok(())
    }

    /// Velocities derived from the streamfunction: `u = ds/dy`,
    /// `w = -ds/dx` with one-sided differences at strictly interior local
    /// points, and `u` pinned to the lid velocity on the global top row.
    fn derive_velocity(&self) -> (DMatrix<f64>, DMatrix<f64>) {
        let LocalGrid { nx, ny, dx, dy, .. } = self.grid;
        let mut u0 = DMatrix::zeros(nx, ny);
        let mut u1 = DMatrix::zeros(nx, ny);
        for i in 1..nx.max(1) - 1 {
            for j in 1..ny.max(1) - 1 {
                u0[(i, j)] = (self.s[(i, j + 1)] - self.s[(i, j)]) / dy;
                u1[(i, j)] = -(self.s[(i + 1, j)] - self.s[(i, j)]) / dx;
            }
        }
        if self.comm.at_boundary(Direction::Up) {
            for i in 0..nx {
                u0[(i, ny - 1)] = LID_VELOCITY;
            }
        }
        (u0, u1)
    }

    /// Copy the local vorticity and streamfunction into caller-provided
    /// buffers of length `npts_local()`. Requires `initialise()`.
    pub fn get_data(&self, v_out: &mut [f64], s_out: &mut [f64]) {
        debug_assert_eq!(v_out.len(), self.grid.npts());
        debug_assert_eq!(s_out.len(), self.grid.npts());
        v_out.copy_from_slice(self.v.as_slice());
        s_out.copy_from_slice(self.s.as_slice());
    }

    /// As [`LidDrivenCavity::get_data`], additionally deriving the velocity
    /// field the same way `write_solution` does.
    pub fn get_data_full(
        &self,
        v_out: &mut [f64],
        s_out: &mut [f64],
        u0_out: &mut [f64],
        u1_out: &mut [f64],
    ) {
        self.get_data(v_out, s_out);
        let (u0, u1) = self.derive_velocity();
        u0_out.copy_from_slice(u0.as_slice());
        u1_out.copy_from_slice(u1.as_slice());
    }

    /// Write this process's slice of the solution as plain text, six columns
    /// `x y v s u w` per grid point.
    pub fn write_solution<P: AsRef<Path>>(&self, path: P) -> Result<(), SolverError> {
        if self.cg.is_none() {
            return Err(ConfigError::InvalidParameter(
                "write_solution() requires initialise()".to_string(),
            )
            .into());
        }
        let (u0, u1) = self.derive_velocity();
        io::write_solution_file(path.as_ref(), &self.grid, &self.v, &self.s, &u0, &u1)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::run_on_mesh;
    use approx::assert_abs_diff_eq;
    use std::fs;
    use tempfile::tempdir;

    fn serial_solver() -> LidDrivenCavity {
        let comm = CartComm::mesh(1).unwrap().remove(0);
        LidDrivenCavity::new(comm)
    }

    fn configure(solver: &mut LidDrivenCavity) {
        solver.set_domain_size(1.0, 2.0);
        solver.set_grid_size(21, 11);
        solver.set_time_step(0.2);
        solver.set_final_time(5.1);
        solver.set_reynolds_number(100.0);
    }

    #[test]
    fn test_setters_update_derived_quantities() {
        let mut solver = serial_solver();
        configure(&mut solver);
        assert_eq!(solver.nx(), 21);
        assert_eq!(solver.ny(), 11);
        assert_eq!(solver.npts(), 231);
        assert_abs_diff_eq!(solver.dx(), 0.05, epsilon = 1e-12);
        assert_abs_diff_eq!(solver.dy(), 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(solver.lx(), 1.0);
        assert_abs_diff_eq!(solver.ly(), 2.0);
        // Serial: the local slab is the whole domain.
        assert_eq!(solver.nx_local(), 21);
        assert_eq!(solver.npts_local(), 231);
        assert_abs_diff_eq!(solver.lx_local(), 1.0);
        assert_abs_diff_eq!(solver.ly_local(), 2.0);
    }

    #[test]
    fn test_reynolds_number_sets_viscosity() {
        let mut solver = serial_solver();
        solver.set_reynolds_number(100.0);
        assert_abs_diff_eq!(solver.re(), 100.0);
        assert_abs_diff_eq!(solver.nu(), 0.01, epsilon = 1e-15);
        assert_abs_diff_eq!(solver.lid_velocity(), 1.0);
    }

    #[test]
    fn test_step_count_rounds_up() {
        let mut solver = serial_solver();
        solver.set_final_time(5.1);
        solver.set_time_step(0.2);
        assert_eq!(solver.num_steps(), 26);
        solver.set_final_time(1.0);
        solver.set_time_step(0.25);
        assert_eq!(solver.num_steps(), 4);
    }

    #[test]
    fn test_partition_reported_through_getters() {
        let reports = run_on_mesh(4, |comm| {
            let mut solver = LidDrivenCavity::new(comm);
            solver.set_domain_size(5.0, 1.0);
            solver.set_grid_size(100, 50);
            (
                solver.coords(),
                solver.nx_local(),
                solver.ny_local(),
                solver.lx_local(),
                solver.ly_local(),
            )
        })
        .unwrap();
        let mut nx_row0 = 0;
        let mut ny_col0 = 0;
        for ((row, col), nx, ny, lx_local, ly_local) in reports {
            assert_eq!((nx, ny), (50, 25));
            assert_abs_diff_eq!(lx_local, 2.5, epsilon = 1e-12);
            assert_abs_diff_eq!(ly_local, 0.5, epsilon = 1e-12);
            if row == 0 {
                nx_row0 += nx;
            }
            if col == 0 {
                ny_col0 += ny;
            }
        }
        assert_eq!(nx_row0, 100);
        assert_eq!(ny_col0, 50);
    }

    #[test]
    fn test_initialise_zeroes_fields_on_every_rank() {
        let all_zero = run_on_mesh(4, |comm| {
            let mut solver = LidDrivenCavity::new(comm);
            solver.set_grid_size(10, 10);
            solver.initialise().unwrap();
            let n = solver.npts_local();
            let mut v = vec![1.0; n];
            let mut s = vec![1.0; n];
            solver.get_data(&mut v, &mut s);
            v.iter().chain(s.iter()).all(|&x| x == 0.0)
        })
        .unwrap();
        assert!(all_zero.into_iter().all(|z| z));
    }

    #[test]
    fn test_configuration_report_contents() {
        let mut solver = serial_solver();
        configure(&mut solver);
        let report = solver.configuration_report();
        assert!(report.contains("Grid size: 21 x 11"));
        assert!(report.contains("Spacing:   0.05 x 0.2"));
        assert!(report.contains("Length:    1 x 2"));
        assert!(report.contains("Grid pts:  231"));
        assert!(report.contains("Timestep:  0.2"));
        assert!(report.contains("Steps:     26"));
        assert!(report.contains("Reynolds number: 100"));
        assert!(report.contains("Linear solver: preconditioned conjugate gradient"));
        // nu * dt / (dx * dy) = 0.2: within the stability bound.
        assert!(solver.print_configuration().is_ok());
    }

    #[test]
    fn test_time_step_restriction_rejected() {
        let mut solver = serial_solver();
        solver.set_domain_size(1.0, 1.0);
        solver.set_grid_size(21, 21);
        solver.set_reynolds_number(100.0);
        solver.set_time_step(0.2);
        // nu * dt / (dx * dy) = 0.8 > 0.25; max dt = 0.0625.
        let err = solver.print_configuration().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Time-step restriction not satisfied"));
        assert!(msg.contains("0.0625"));
        assert!(solver.integrate().is_err());
    }

    #[test]
    fn test_initialise_rejects_degenerate_grid() {
        let mut solver = serial_solver();
        solver.set_grid_size(1, 21);
        assert!(matches!(
            solver.initialise(),
            Err(ConfigError::InvalidGridSize(_))
        ));
    }

    #[test]
    fn test_initial_solution_file() {
        // Immediately after initialise the written field is all zero except
        // u = 1 on the lid row.
        let dir = tempdir().unwrap();
        let path = dir.path().join("initial.dat");
        let mut solver = serial_solver();
        configure(&mut solver);
        solver.initialise().unwrap();
        solver.write_solution(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let ly = solver.ly();
        let mut data_lines = 0;
        for line in content.lines() {
            if line.is_empty() {
                continue;
            }
            let cols: Vec<f64> = line
                .split_whitespace()
                .map(|c| c.parse().unwrap())
                .collect();
            assert_eq!(cols.len(), 6);
            let (y, v, s, u, w) = (cols[1], cols[2], cols[3], cols[4], cols[5]);
            assert_eq!(v, 0.0);
            assert_eq!(s, 0.0);
            if (y - ly).abs() < 1e-6 {
                assert_eq!(u, 1.0);
            } else {
                assert_eq!(u, 0.0);
            }
            assert_eq!(w, 0.0);
            data_lines += 1;
        }
        assert_eq!(data_lines, 21 * 11);
        dir.close().unwrap();
    }

    #[test]
    fn test_integration_runs_and_preserves_dirichlet() {
        let mut solver = serial_solver();
        solver.set_domain_size(1.0, 1.0);
        solver.set_grid_size(17, 17);
        solver.set_time_step(0.005);
        solver.set_final_time(0.01);
        solver.set_reynolds_number(100.0);
        solver.initialise().unwrap();
        solver.integrate().unwrap();

        let n = solver.npts_local();
        let mut v = vec![0.0; n];
        let mut s = vec![0.0; n];
        solver.get_data(&mut v, &mut s);
        let nx = solver.nx_local();
        let ny = solver.ny_local();
        // Streamfunction is pinned to zero on the cavity walls.
        for i in 0..nx {
            assert_eq!(s[i], 0.0);
            assert_eq!(s[(ny - 1) * nx + i], 0.0);
        }
        for j in 0..ny {
            assert_eq!(s[j * nx], 0.0);
            assert_eq!(s[j * nx + nx - 1], 0.0);
        }
        // The lid has stirred the flow: vorticity is no longer zero.
        assert!(v.iter().any(|&x| x != 0.0));
    }

    #[test]
    fn test_distributed_trajectory_matches_serial() {
        let nx = 17;
        let steps_config = |solver: &mut LidDrivenCavity| {
            solver.set_domain_size(1.0, 1.0);
            solver.set_grid_size(nx, nx);
            solver.set_time_step(0.005);
            solver.set_final_time(0.025);
            solver.set_reynolds_number(100.0);
        };

        let mut serial = serial_solver();
        steps_config(&mut serial);
        assert_eq!(serial.num_steps(), 5);
        serial.initialise().unwrap();
        serial.integrate().unwrap();
        let n = serial.npts_local();
        let mut v_ref = vec![0.0; n];
        let mut s_ref = vec![0.0; n];
        let mut u_ref = vec![0.0; n];
        let mut w_ref = vec![0.0; n];
        serial.get_data_full(&mut v_ref, &mut s_ref, &mut u_ref, &mut w_ref);

        let slabs = run_on_mesh(4, |comm| {
            let mut solver = LidDrivenCavity::new(comm);
            steps_config(&mut solver);
            solver.initialise().unwrap();
            solver.integrate().unwrap();
            let n = solver.npts_local();
            let mut v = vec![0.0; n];
            let mut s = vec![0.0; n];
            solver.get_data(&mut v, &mut s);
            (*solver.grid(), v, s)
        })
        .unwrap();

        // Both trajectories stop each Poisson solve at the same residual
        // threshold; the wall-vorticity second difference amplifies that
        // floor, hence the looser bound on v.
        for (grid, v, s) in &slabs {
            for j in 0..grid.ny {
                for i in 0..grid.nx {
                    let k_local = j * grid.nx + i;
                    let k_global = grid.global_j(j) * nx + grid.global_i(i);
                    assert_abs_diff_eq!(s[k_local], s_ref[k_global], epsilon = 5e-6);
                    assert_abs_diff_eq!(v[k_local], v_ref[k_global], epsilon = 5e-3);
                }
            }
        }
    }

    #[test]
    fn test_derived_velocity_is_one_sided() {
        let mut solver = serial_solver();
        solver.set_domain_size(1.0, 1.0);
        solver.set_grid_size(8, 8);
        solver.initialise().unwrap();
        // s = y on the interior: u = ds/dy = 1 there, w = 0.
        let dy = solver.dy();
        for j in 0..8 {
            for i in 0..8 {
                solver.s[(i, j)] = j as f64 * dy;
            }
        }
        let (u0, u1) = solver.derive_velocity();
        for j in 1..7 {
            for i in 1..7 {
                assert_abs_diff_eq!(u0[(i, j)], 1.0, epsilon = 1e-12);
                assert_abs_diff_eq!(u1[(i, j)], 0.0, epsilon = 1e-12);
            }
        }
        // The lid overrides the top row.
        for i in 0..8 {
            assert_abs_diff_eq!(u0[(i, 7)], 1.0);
        }
        // Local edges below the lid stay zero by construction.
        assert_eq!(u0[(0, 3)], 0.0);
    }
}
