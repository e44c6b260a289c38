//! Distributed preconditioned conjugate gradient for the Poisson problem
//! `-laplacian(x) = b` with homogeneous Dirichlet conditions on the global
//! domain boundary.
//!
//! Every inner product is formed locally and summed across the full process
//! group before any division: alpha and beta numerators and denominators are
//! reduced separately, never assembled from locally divided quotients.

use nalgebra::DMatrix;
use tracing::{debug, error};

use crate::comm::CartComm;
use crate::error::SolverError;
use crate::solver::stencil::StencilOp;

/// Residual tolerance. Convergence compares the residual 2-norm against the
/// square of this value, matching the behaviour of the solver this one is
/// validated against; effectively a tighter tolerance than the name
/// suggests.
pub const TOLERANCE: f64 = 1e-3;

/// Iteration cap; exceeding it is a fatal error.
pub const MAX_ITERATIONS: usize = 5000;

/// Conjugate-gradient state for one process's slab: the stencil operator and
/// the four working vectors, reused across solves.
#[derive(Debug)]
pub struct SolverCg {
    nx: usize,
    ny: usize,
    dx: f64,
    dy: f64,
    op: StencilOp,
    r: DMatrix<f64>,
    p: DMatrix<f64>,
    z: DMatrix<f64>,
    t: DMatrix<f64>,
}

impl SolverCg {
    /// A solver for the local `nx x ny` slab. Spacings are the global grid
    /// spacings; the domain is assumed already partitioned.
    pub fn new(nx: usize, ny: usize, dx: f64, dy: f64) -> Self {
        Self {
            nx,
            ny,
            dx,
            dy,
            op: StencilOp::new(nx, ny, dx, dy),
            r: DMatrix::zeros(nx, ny),
            p: DMatrix::zeros(nx, ny),
            z: DMatrix::zeros(nx, ny),
            t: DMatrix::zeros(nx, ny),
        }
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn dx(&self) -> f64 {
        self.dx
    }

    pub fn dy(&self) -> f64 {
        self.dy
    }

    /// Solve `-laplacian(x) = b` for the local slab of `x`, returning the
    /// iteration count. `x` doubles as the initial guess.
    ///
    /// If the global 2-norm of `b` is already below the convergence
    /// threshold the solution is identically zero and no iteration runs.
    pub fn solve(
        &mut self,
        comm: &CartComm,
        b: &DMatrix<f64>,
        x: &mut DMatrix<f64>,
    ) -> Result<usize, SolverError> {
        debug_assert_eq!(b.shape(), (self.nx, self.ny));
        debug_assert_eq!(x.shape(), (self.nx, self.ny));

        let norm_b = comm.allreduce_sum(b.norm_squared()).sqrt();
        if norm_b < TOLERANCE * TOLERANCE {
            x.fill(0.0);
            if comm.is_root() {
                debug!(norm = norm_b, "right-hand side is numerically zero");
            }
            return Ok(0);
        }

        // r = b - A x, with the Dirichlet rows of b zeroed before the
        // subtraction so the residual stays in the operator's subspace.
        self.op.apply_laplacian(comm, x, &mut self.t)?;
        self.r.copy_from(b);
        self.op.impose_bc(comm, &mut self.r);
        self.r -= &self.t;

        self.op.precondition(comm, &self.r, &mut self.z);
        self.p.copy_from(&self.z);

        let mut k = 0;
        let mut converged = false;
        while k < MAX_ITERATIONS {
            k += 1;

            self.op.apply_laplacian(comm, &self.p, &mut self.t)?;

            let alpha_den = comm.allreduce_sum(self.t.dot(&self.p));
            let alpha_num = comm.allreduce_sum(self.r.dot(&self.z));
            let alpha = alpha_num / alpha_den;

            for (xi, pi) in x.as_mut_slice().iter_mut().zip(self.p.as_slice()) {
                *xi += alpha * pi;
            }
            for (ri, ti) in self.r.as_mut_slice().iter_mut().zip(self.t.as_slice()) {
                *ri -= alpha * ti;
            }

            let eps = comm.allreduce_sum(self.r.norm_squared()).sqrt();
            if eps < TOLERANCE * TOLERANCE {
                if comm.is_root() {
                    debug!(iterations = k, residual = eps, "conjugate gradient converged");
                }
                converged = true;
                break;
            }

            // beta's denominator is the pre-update r.z, already reduced.
            let rho_old = alpha_num;
            self.op.precondition(comm, &self.r, &mut self.z);
            let beta = comm.allreduce_sum(self.r.dot(&self.z)) / rho_old;

            for (pi, zi) in self.p.as_mut_slice().iter_mut().zip(self.z.as_slice()) {
                *pi = zi + beta * *pi;
            }
        }

        if !converged {
            if comm.is_root() {
                error!("FAILED TO CONVERGE");
            }
            return Err(SolverError::NonConvergence(MAX_ITERATIONS));
        }
        Ok(k)
    }
}
