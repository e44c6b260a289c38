//! Process mesh and nearest-neighbour communication.
//!
//! The solver runs as `p*p` cooperating processes arranged in a square
//! Cartesian grid, one OS thread per process. Each process holds a
//! [`CartComm`]: its coordinates, a sentinel-aware handle for each of the
//! four neighbours, and membership in the global reduction group.
//!
//! Point-to-point links are `mpsc` channels with one dedicated channel per
//! direction, so a message "from below" can never be confused with one "from
//! the left" no matter how sends and receives interleave. Sends are
//! non-blocking; completion is observed on the receive side, which lets the
//! stencil layer overlap the exchange with interior computation.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use nalgebra::DMatrix;

use crate::error::{CommError, ConfigError};

/// The four neighbour directions of the process grid. `Up` is towards
/// larger `y` (larger process row), `Right` towards larger `x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    fn index(self) -> usize {
        match self {
            Direction::Up => 0,
            Direction::Down => 1,
            Direction::Left => 2,
            Direction::Right => 3,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

/// A neighbour handle: either a real process or the sentinel marking that
/// the local edge coincides with the global domain boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neighbor {
    Rank(usize),
    Boundary,
}

impl Neighbor {
    pub fn is_boundary(self) -> bool {
        matches!(self, Neighbor::Boundary)
    }
}

/// Deterministic all-reduce over the full process group.
///
/// Every rank deposits its local value in its own slot, the group meets at a
/// barrier, and each rank then sums the slots in rank order. Summing in a
/// fixed order makes the reduced value bit-identical on every rank and
/// independent of thread scheduling. A second barrier keeps the slots from
/// being overwritten before everyone has read them.
#[derive(Debug)]
struct Collective {
    rank: usize,
    slots: Arc<Mutex<Vec<f64>>>,
    barrier: Arc<Barrier>,
}

impl Collective {
    fn group(nprocs: usize) -> Vec<Collective> {
        let slots = Arc::new(Mutex::new(vec![0.0; nprocs]));
        let barrier = Arc::new(Barrier::new(nprocs));
        (0..nprocs)
            .map(|rank| Collective {
                rank,
                slots: Arc::clone(&slots),
                barrier: Arc::clone(&barrier),
            })
            .collect()
    }

    fn sum(&self, local: f64) -> f64 {
        {
            let mut slots = self.slots.lock().unwrap();
            slots[self.rank] = local;
        }
        self.barrier.wait();
        let total = {
            let slots = self.slots.lock().unwrap();
            slots.iter().sum()
        };
        self.barrier.wait();
        total
    }
}

/// Per-process view of the Cartesian process grid: coordinates, neighbour
/// handles, the channel endpoints behind them, and the reduction group.
#[derive(Debug)]
pub struct CartComm {
    p: usize,
    row: usize,
    col: usize,
    neighbors: [Neighbor; 4],
    tx: [Option<Sender<Vec<f64>>>; 4],
    rx: [Option<Receiver<Vec<f64>>>; 4],
    collective: Collective,
}

impl CartComm {
    /// Build the communication fabric for `nprocs` processes and return one
    /// `CartComm` per rank, in rank order (`rank = row * p + col`).
    ///
    /// `nprocs` must be a perfect square.
    pub fn mesh(nprocs: usize) -> Result<Vec<CartComm>, ConfigError> {
        let p = (nprocs as f64).sqrt().round() as usize;
        if nprocs == 0 || p * p != nprocs {
            return Err(ConfigError::NotSquare(nprocs));
        }

        let mut tx: Vec<[Option<Sender<Vec<f64>>>; 4]> =
            (0..nprocs).map(|_| [None, None, None, None]).collect();
        let mut rx: Vec<[Option<Receiver<Vec<f64>>>; 4]> =
            (0..nprocs).map(|_| [None, None, None, None]).collect();

        // Wire each interior face once, in both directions. A message sent
        // "up" by rank r arrives at the neighbour above as its Down receive,
        // and symmetrically for the other three faces.
        for row in 0..p {
            for col in 0..p {
                let rank = row * p + col;
                if row + 1 < p {
                    let above = (row + 1) * p + col;
                    let (t, r) = channel();
                    tx[rank][Direction::Up.index()] = Some(t);
                    rx[above][Direction::Down.index()] = Some(r);
                    let (t, r) = channel();
                    tx[above][Direction::Down.index()] = Some(t);
                    rx[rank][Direction::Up.index()] = Some(r);
                }
                if col + 1 < p {
                    let right = row * p + col + 1;
                    let (t, r) = channel();
                    tx[rank][Direction::Right.index()] = Some(t);
                    rx[right][Direction::Left.index()] = Some(r);
                    let (t, r) = channel();
                    tx[right][Direction::Left.index()] = Some(t);
                    rx[rank][Direction::Right.index()] = Some(r);
                }
            }
        }

        let collectives = Collective::group(nprocs);
        let mut comms = Vec::with_capacity(nprocs);
        for (rank, collective) in collectives.into_iter().enumerate() {
            let (row, col) = (rank / p, rank % p);
            let neighbor = |r: isize, c: isize| -> Neighbor {
                if r < 0 || r >= p as isize || c < 0 || c >= p as isize {
                    Neighbor::Boundary
                } else {
                    Neighbor::Rank(r as usize * p + c as usize)
                }
            };
            comms.push(CartComm {
                p,
                row,
                col,
                neighbors: [
                    neighbor(row as isize + 1, col as isize),
                    neighbor(row as isize - 1, col as isize),
                    neighbor(row as isize, col as isize - 1),
                    neighbor(row as isize, col as isize + 1),
                ],
                tx: tx[rank].each_mut().map(Option::take),
                rx: rx[rank].each_mut().map(Option::take),
                collective,
            });
        }
        Ok(comms)
    }

    /// Side length of the process grid.
    pub fn p(&self) -> usize {
        self.p
    }

    /// This process's `(row, col)` coordinates.
    pub fn coords(&self) -> (usize, usize) {
        (self.row, self.col)
    }

    /// Linear rank, `row * p + col`.
    pub fn rank(&self) -> usize {
        self.row * self.p + self.col
    }

    /// Whether this is the root process `(0, 0)`, the only one that prints.
    pub fn is_root(&self) -> bool {
        self.row == 0 && self.col == 0
    }

    pub fn neighbor(&self, dir: Direction) -> Neighbor {
        self.neighbors[dir.index()]
    }

    /// True iff the local edge in `dir` coincides with the global boundary.
    pub fn at_boundary(&self, dir: Direction) -> bool {
        self.neighbors[dir.index()].is_boundary()
    }

    /// Non-blocking send towards `dir`. Sending towards the sentinel
    /// completes immediately without transferring anything.
    pub fn send(&self, dir: Direction, payload: Vec<f64>) -> Result<(), CommError> {
        match &self.tx[dir.index()] {
            Some(tx) => tx
                .send(payload)
                .map_err(|_| CommError::SendFailed(dir.name())),
            None => Ok(()),
        }
    }

    /// Blocking receive of the message the neighbour in `dir` sent towards
    /// us. Returns `None` at the sentinel.
    pub fn recv(&self, dir: Direction) -> Result<Option<Vec<f64>>, CommError> {
        match &self.rx[dir.index()] {
            Some(rx) => rx
                .recv()
                .map(Some)
                .map_err(|_| CommError::RecvFailed(dir.name())),
            None => Ok(None),
        }
    }

    /// Sum `local` over all processes. Acts as a synchronising barrier.
    pub fn allreduce_sum(&self, local: f64) -> f64 {
        self.collective.sum(local)
    }
}

/// The four halo buffers of one field, plus the begin/finish exchange pair.
///
/// `top`/`bottom` hold a neighbour row of length `nx`, `left`/`right` a
/// neighbour column of length `ny`. Buffers for sentinel directions stay
/// zero and are never read by the stencil code.
#[derive(Debug)]
pub struct HaloExchange {
    nx: usize,
    ny: usize,
    top: Vec<f64>,
    bottom: Vec<f64>,
    left: Vec<f64>,
    right: Vec<f64>,
}

impl HaloExchange {
    pub fn new(nx: usize, ny: usize) -> Self {
        Self {
            nx,
            ny,
            top: vec![0.0; nx],
            bottom: vec![0.0; nx],
            left: vec![0.0; ny],
            right: vec![0.0; ny],
        }
    }

    /// Post the four edge sends for `field`. The top and bottom rows are
    /// contiguous in the column-major layout; the side columns are gathered
    /// with stride `nx` into the outgoing message.
    pub fn begin(&self, comm: &CartComm, field: &DMatrix<f64>) -> Result<(), CommError> {
        let (nx, ny) = (self.nx, self.ny);
        debug_assert_eq!(field.nrows(), nx);
        debug_assert_eq!(field.ncols(), ny);
        let data = field.as_slice();

        if !comm.at_boundary(Direction::Up) {
            comm.send(Direction::Up, data[nx * (ny - 1)..].to_vec())?;
        }
        if !comm.at_boundary(Direction::Down) {
            comm.send(Direction::Down, data[..nx].to_vec())?;
        }
        if !comm.at_boundary(Direction::Left) {
            comm.send(Direction::Left, (0..ny).map(|j| data[j * nx]).collect())?;
        }
        if !comm.at_boundary(Direction::Right) {
            comm.send(
                Direction::Right,
                (0..ny).map(|j| data[j * nx + nx - 1]).collect(),
            )?;
        }
        Ok(())
    }

    /// Wait for the four incoming halos and store them. Must follow a
    /// matching [`HaloExchange::begin`] on every participating process.
    pub fn finish(&mut self, comm: &CartComm) -> Result<(), CommError> {
        if let Some(data) = comm.recv(Direction::Up)? {
            debug_assert_eq!(data.len(), self.nx);
            self.top.copy_from_slice(&data);
        }
        if let Some(data) = comm.recv(Direction::Down)? {
            debug_assert_eq!(data.len(), self.nx);
            self.bottom.copy_from_slice(&data);
        }
        if let Some(data) = comm.recv(Direction::Left)? {
            debug_assert_eq!(data.len(), self.ny);
            self.left.copy_from_slice(&data);
        }
        if let Some(data) = comm.recv(Direction::Right)? {
            debug_assert_eq!(data.len(), self.ny);
            self.right.copy_from_slice(&data);
        }
        Ok(())
    }

    /// Begin and immediately complete an exchange.
    pub fn exchange(&mut self, comm: &CartComm, field: &DMatrix<f64>) -> Result<(), CommError> {
        self.begin(comm, field)?;
        self.finish(comm)
    }

    pub fn top(&self) -> &[f64] {
        &self.top
    }

    pub fn bottom(&self) -> &[f64] {
        &self.bottom
    }

    pub fn left(&self) -> &[f64] {
        &self.left
    }

    pub fn right(&self) -> &[f64] {
        &self.right
    }
}

/// Spawn one thread per rank of a `sqrt(nprocs)`-sided process grid, run `f`
/// on each, and collect the results in rank order.
///
/// This is the host-side glue the solver core expects: it validates the
/// process count, builds the channel fabric and joins the workers. A panic
/// in any worker is resumed on the caller.
pub fn run_on_mesh<T, F>(nprocs: usize, f: F) -> Result<Vec<T>, ConfigError>
where
    F: Fn(CartComm) -> T + Sync,
    T: Send,
{
    let mut comms = CartComm::mesh(nprocs)?;
    if comms.len() == 1 {
        // Serial run: no threads, no channels.
        let comm = comms.remove(0);
        return Ok(vec![f(comm)]);
    }
    let f = &f;
    Ok(thread::scope(|scope| {
        let workers: Vec<_> = comms
            .into_iter()
            .map(|comm| scope.spawn(move || f(comm)))
            .collect();
        workers
            .into_iter()
            .map(|w| match w.join() {
                Ok(value) => value,
                Err(payload) => std::panic::resume_unwind(payload),
            })
            .collect()
    }))
}
