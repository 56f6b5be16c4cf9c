//! Explicit cluster context for distributed tessellations.
//!
//! Every distributed operation takes a [`Communicator`] instead of relying on a
//! global communicator. Messages are flat `f64` buffers exchanged between pairs
//! of ranks; all collective operations must be entered by every rank in the
//! same order.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::{
    errors::{TessResult, TessellationError},
    processor::ProcessorTessellation,
};

/// The domain decomposition and communicator of a distributed run.
#[derive(Clone, Copy)]
pub struct ClusterContext<'a> {
    pub procs: &'a ProcessorTessellation,
    pub comm: &'a dyn Communicator,
}

pub trait Communicator: Send {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn send(&self, to: usize, data: Vec<f64>) -> TessResult<()>;

    /// Blocks until a message from `from` arrives.
    fn recv(&self, from: usize) -> TessResult<Vec<f64>>;

    /// Send `outgoing[r]` to every rank `r` and receive one message from each.
    ///
    /// Pairs are visited in increasing rank order, the lower rank of a pair
    /// sends first. The message to self is passed through.
    fn exchange(&self, mut outgoing: Vec<Vec<f64>>) -> TessResult<Vec<Vec<f64>>> {
        let rank = self.rank();
        outgoing.resize(self.size(), vec![]);
        let mut incoming = vec![vec![]; self.size()];
        for (partner, data) in outgoing.into_iter().enumerate() {
            incoming[partner] = if partner == rank {
                data
            } else if rank < partner {
                self.send(partner, data)?;
                self.recv(partner)?
            } else {
                let received = self.recv(partner)?;
                self.send(partner, data)?;
                received
            };
        }
        Ok(incoming)
    }

    fn all_gather(&self, data: Vec<f64>) -> TessResult<Vec<Vec<f64>>> {
        self.exchange(vec![data; self.size()])
    }

    fn all_reduce_max(&self, value: f64) -> TessResult<f64> {
        Ok(self
            .all_gather(vec![value])?
            .iter()
            .flatten()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max))
    }
}

/// The communicator of a run on a single rank.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, to: usize, _data: Vec<f64>) -> TessResult<()> {
        Err(TessellationError::communication(0, to))
    }

    fn recv(&self, from: usize) -> TessResult<Vec<f64>> {
        Err(TessellationError::communication(0, from))
    }
}

/// One rank of a [`ThreadCluster`].
#[derive(Debug)]
pub struct ThreadCommunicator {
    rank: usize,
    size: usize,
    senders: Vec<Sender<Vec<f64>>>,
    receivers: Vec<Receiver<Vec<f64>>>,
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, to: usize, data: Vec<f64>) -> TessResult<()> {
        self.senders[to]
            .send(data)
            .map_err(|_| TessellationError::communication(self.rank, to))
    }

    fn recv(&self, from: usize) -> TessResult<Vec<f64>> {
        self.receivers[from]
            .recv()
            .map_err(|_| TessellationError::communication(self.rank, from))
    }
}

/// Ranks running as threads of one process, connected by channels.
pub struct ThreadCluster;

impl ThreadCluster {
    /// A fully connected set of `size` communicators.
    pub fn communicators(size: usize) -> Vec<ThreadCommunicator> {
        // channels[from][to]
        let channels: Vec<Vec<(Sender<Vec<f64>>, Receiver<Vec<f64>>)>> =
            (0..size).map(|_| (0..size).map(|_| unbounded()).collect()).collect();
        (0..size)
            .map(|rank| ThreadCommunicator {
                rank,
                size,
                senders: (0..size).map(|to| channels[rank][to].0.clone()).collect(),
                receivers: (0..size).map(|from| channels[from][rank].1.clone()).collect(),
            })
            .collect()
    }

    /// Run `f` on `size` ranks in parallel and collect the results by rank.
    pub fn run<T, F>(size: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(ThreadCommunicator) -> T + Sync,
    {
        let f = &f;
        std::thread::scope(|scope| {
            let handles: Vec<_> = Self::communicators(size)
                .into_iter()
                .map(|comm| scope.spawn(move || f(comm)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        })
    }
}
