//! Distributed five-point stencil operators on the local field slab.
//!
//! All three operators treat the global domain boundary through the
//! neighbour sentinels: a local edge whose neighbour is [`Neighbor::Boundary`]
//! carries boundary conditions handled by the caller, so the negative
//! Laplacian is never evaluated there, the Jacobi preconditioner degenerates
//! to the identity there, and `impose_bc` zeroes exactly those edges.
//!
//! [`Neighbor::Boundary`]: crate::comm::Neighbor::Boundary

use nalgebra::DMatrix;

use crate::comm::{CartComm, Direction, HaloExchange};
use crate::error::CommError;

/// Stencil operator over one `nx x ny` slab, owning the halo buffers its
/// operator application fills.
#[derive(Debug)]
pub struct StencilOp {
    nx: usize,
    ny: usize,
    dx2i: f64,
    dy2i: f64,
    /// Diagonal of the negative Laplacian at interior points.
    factor: f64,
    halo: HaloExchange,
}

impl StencilOp {
    pub fn new(nx: usize, ny: usize, dx: f64, dy: f64) -> Self {
        let dx2i = 1.0 / (dx * dx);
        let dy2i = 1.0 / (dy * dy);
        Self {
            nx,
            ny,
            dx2i,
            dy2i,
            factor: 2.0 * (dx2i + dy2i),
            halo: HaloExchange::new(nx, ny),
        }
    }

    /// Whether local cell `(i, j)` sits on the global domain boundary.
    fn on_global_boundary(&self, comm: &CartComm, i: usize, j: usize) -> bool {
        (i == 0 && comm.at_boundary(Direction::Left))
            || (i + 1 == self.nx && comm.at_boundary(Direction::Right))
            || (j == 0 && comm.at_boundary(Direction::Down))
            || (j + 1 == self.ny && comm.at_boundary(Direction::Up))
    }

    /// `out = -laplacian(input)` at every locally held, globally interior
    /// point. Entries of `out` on the global boundary are left untouched.
    ///
    /// The exchange is overlapped with computation: the four edge sends are
    /// posted first, the strict interior (which needs no halo data) is
    /// computed while the messages are in flight, and only then does the
    /// exchange complete and the local perimeter get filled in.
    pub fn apply_laplacian(
        &mut self,
        comm: &CartComm,
        input: &DMatrix<f64>,
        out: &mut DMatrix<f64>,
    ) -> Result<(), CommError> {
        let (nx, ny) = (self.nx, self.ny);
        self.halo.begin(comm, input)?;

        for j in 1..ny.max(1) - 1 {
            for i in 1..nx.max(1) - 1 {
                out[(i, j)] = (2.0 * input[(i, j)] - input[(i - 1, j)] - input[(i + 1, j)])
                    * self.dx2i
                    + (2.0 * input[(i, j)] - input[(i, j - 1)] - input[(i, j + 1)]) * self.dy2i;
            }
        }

        self.halo.finish(comm)?;

        // Local perimeter, each cell visited once. With nx == 1 or ny == 1
        // the interior above was empty and every cell lands here, reading
        // both opposing halos where it has no local neighbour.
        for j in 0..ny {
            if j == 0 || j + 1 == ny {
                for i in 0..nx {
                    self.perimeter_cell(comm, input, out, i, j);
                }
            } else {
                self.perimeter_cell(comm, input, out, 0, j);
                if nx > 1 {
                    self.perimeter_cell(comm, input, out, nx - 1, j);
                }
            }
        }
        Ok(())
    }

    fn perimeter_cell(
        &self,
        comm: &CartComm,
        input: &DMatrix<f64>,
        out: &mut DMatrix<f64>,
        i: usize,
        j: usize,
    ) {
        if self.on_global_boundary(comm, i, j) {
            return;
        }
        let west = if i > 0 { input[(i - 1, j)] } else { self.halo.left()[j] };
        let east = if i + 1 < self.nx { input[(i + 1, j)] } else { self.halo.right()[j] };
        let south = if j > 0 { input[(i, j - 1)] } else { self.halo.bottom()[i] };
        let north = if j + 1 < self.ny { input[(i, j + 1)] } else { self.halo.top()[i] };
        let centre = input[(i, j)];
        out[(i, j)] =
            (2.0 * centre - west - east) * self.dx2i + (2.0 * centre - south - north) * self.dy2i;
    }

    /// Point-Jacobi preconditioner: divide by `2(dx^-2 + dy^-2)` at points
    /// strictly interior to the global domain, copy on the global boundary
    /// where the operator's diagonal is 1.
    pub fn precondition(&self, comm: &CartComm, input: &DMatrix<f64>, out: &mut DMatrix<f64>) {
        for j in 0..self.ny {
            for i in 0..self.nx {
                out[(i, j)] = if self.on_global_boundary(comm, i, j) {
                    input[(i, j)]
                } else {
                    input[(i, j)] / self.factor
                };
            }
        }
    }

    /// Zero every entry on the global domain boundary: the homogeneous
    /// Dirichlet condition on the residual.
    pub fn impose_bc(&self, comm: &CartComm, field: &mut DMatrix<f64>) {
        let (nx, ny) = (self.nx, self.ny);
        if comm.at_boundary(Direction::Down) {
            for i in 0..nx {
                field[(i, 0)] = 0.0;
            }
        }
        if comm.at_boundary(Direction::Up) {
            for i in 0..nx {
                field[(i, ny - 1)] = 0.0;
            }
        }
        if comm.at_boundary(Direction::Left) {
            for j in 0..ny {
                field[(0, j)] = 0.0;
            }
        }
        if comm.at_boundary(Direction::Right) {
            for j in 0..ny {
                field[(nx - 1, j)] = 0.0;
            }
        }
    }
}
