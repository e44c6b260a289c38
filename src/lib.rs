//! Distributed solver for the lid-driven cavity problem.
//!
//! The incompressible Navier-Stokes equations are integrated in
//! streamfunction-vorticity form on a uniform Cartesian grid with
//! second-order central differences. The domain is decomposed over a square
//! process mesh; each process advances its slab, exchanging one-cell halos
//! with its four neighbours and recovering the streamfunction every step
//! with a distributed Jacobi-preconditioned conjugate-gradient Poisson
//! solve.

pub mod comm;
pub mod domain;
pub mod error;
pub mod io;
pub mod solver;
