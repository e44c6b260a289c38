pub mod cavity;
pub mod cg;
pub mod stencil;
