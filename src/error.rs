use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("process count {0} is not a perfect square")]
    NotSquare(usize),

    #[error("invalid grid size: {0}")]
    InvalidGridSize(String),

    #[error("Time-step restriction not satisfied! Maximum time-step is {max_dt}")]
    TimeStep { max_dt: f64 },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

#[derive(Error, Debug, Clone)]
pub enum CommError {
    #[error("neighbour channel closed while sending {0}")]
    SendFailed(&'static str),

    #[error("neighbour channel closed while receiving {0}")]
    RecvFailed(&'static str),
}

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("conjugate gradient failed to converge within {0} iterations")]
    NonConvergence(usize),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("communication error: {0}")]
    Comm(#[from] CommError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
