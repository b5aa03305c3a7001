//! Process communicator used for halo exchange and global reductions.
//!
//! The communicator is always passed explicitly (through
//! [`LduMesh`](crate::mesh::LduMesh)); there is no global world. Two
//! implementations are provided:
//!
//! * [`SerialComm`] -- a single process. Collectives are the identity.
//! * [`ThreadComm`] -- `n` in-process ranks connected by unbounded
//!   `crossbeam` channels, one rank per thread. Used to run decomposed
//!   solves without an MPI runtime.
//!
//! # Message ordering
//!
//! Sends never block. Receives block until a message with the requested
//! `(source, tag)` arrives; messages with other keys that arrive first are
//! stashed in FIFO order. Halo exchanges therefore post every send first and
//! then receive, which cannot deadlock.
//!
//! # Determinism
//!
//! Every collective is built on an all-gather and reduced in rank order, so
//! all ranks compute bit-identical results and take identical convergence
//! decisions.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::error::CommError;

/// Tag reserved for collectives; interface tags must differ from it.
pub const COLLECTIVE_TAG: u32 = u32::MAX;

/// Default time a [`ThreadComm`] receive waits before reporting a timeout.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// Message body exchanged between ranks.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Field values (halo data, reduction operands).
    Scalars(Vec<f64>),
    /// Integer labels (restrict addressing, cell counts).
    Labels(Vec<usize>),
}

impl Payload {
    fn kind(&self) -> &'static str {
        match self {
            Payload::Scalars(_) => "scalars",
            Payload::Labels(_) => "labels",
        }
    }
}

// ---------------------------------------------------------------------------
// Communicator
// ---------------------------------------------------------------------------

/// Point-to-point messaging plus the collectives the solvers need.
///
/// Implementors provide [`rank`](Self::rank), [`n_procs`](Self::n_procs),
/// [`send`](Self::send) and [`recv`](Self::recv); every collective has a
/// provided implementation on top of them.
pub trait Communicator: Send + Sync + fmt::Debug {
    /// This process's rank in `0..n_procs`.
    fn rank(&self) -> usize;

    /// Number of processes in the world.
    fn n_procs(&self) -> usize;

    /// Post a non-blocking send.
    fn send(&self, to: usize, tag: u32, payload: Payload) -> Result<(), CommError>;

    /// Block until the message `(from, tag)` arrives.
    fn recv(&self, from: usize, tag: u32) -> Result<Payload, CommError>;

    /// Whether more than one process takes part.
    fn is_parallel(&self) -> bool {
        self.n_procs() > 1
    }

    /// Receive a scalar payload, rejecting labels.
    fn recv_scalars(&self, from: usize, tag: u32) -> Result<Vec<f64>, CommError> {
        match self.recv(from, tag)? {
            Payload::Scalars(values) => Ok(values),
            other => Err(CommError::UnexpectedPayload {
                peer: from,
                tag,
                detail: format!("expected scalars, got {}", other.kind()),
            }),
        }
    }

    /// Receive a label payload, rejecting scalars.
    fn recv_labels(&self, from: usize, tag: u32) -> Result<Vec<usize>, CommError> {
        match self.recv(from, tag)? {
            Payload::Labels(values) => Ok(values),
            other => Err(CommError::UnexpectedPayload {
                peer: from,
                tag,
                detail: format!("expected labels, got {}", other.kind()),
            }),
        }
    }

    /// Gather every rank's scalars, indexed by rank.
    fn all_gather_scalars(&self, local: &[f64]) -> Result<Vec<Vec<f64>>, CommError> {
        let (rank, n_procs) = (self.rank(), self.n_procs());
        for peer in (0..n_procs).filter(|&p| p != rank) {
            self.send(peer, COLLECTIVE_TAG, Payload::Scalars(local.to_vec()))?;
        }
        (0..n_procs)
            .map(|peer| {
                if peer == rank {
                    Ok(local.to_vec())
                } else {
                    self.recv_scalars(peer, COLLECTIVE_TAG)
                }
            })
            .collect()
    }

    /// Gather every rank's labels, indexed by rank.
    fn all_gather_labels(&self, local: &[usize]) -> Result<Vec<Vec<usize>>, CommError> {
        let (rank, n_procs) = (self.rank(), self.n_procs());
        for peer in (0..n_procs).filter(|&p| p != rank) {
            self.send(peer, COLLECTIVE_TAG, Payload::Labels(local.to_vec()))?;
        }
        (0..n_procs)
            .map(|peer| {
                if peer == rank {
                    Ok(local.to_vec())
                } else {
                    self.recv_labels(peer, COLLECTIVE_TAG)
                }
            })
            .collect()
    }

    /// Element-wise global sum of several values in one round.
    fn sum_many(&self, local: &[f64]) -> Result<Vec<f64>, CommError> {
        if !self.is_parallel() {
            return Ok(local.to_vec());
        }
        let gathered = self.all_gather_scalars(local)?;
        let mut total = vec![0.0; local.len()];
        for contribution in &gathered {
            for (t, v) in total.iter_mut().zip(contribution) {
                *t += v;
            }
        }
        Ok(total)
    }

    /// Global sum.
    fn sum(&self, local: f64) -> Result<f64, CommError> {
        Ok(self.sum_many(&[local])?[0])
    }

    /// Global maximum.
    fn max(&self, local: f64) -> Result<f64, CommError> {
        if !self.is_parallel() {
            return Ok(local);
        }
        let gathered = self.all_gather_scalars(&[local])?;
        Ok(gathered.iter().map(|v| v[0]).fold(f64::NEG_INFINITY, f64::max))
    }

    /// Global sum of a count.
    fn sum_label(&self, local: usize) -> Result<usize, CommError> {
        if !self.is_parallel() {
            return Ok(local);
        }
        let gathered = self.all_gather_labels(&[local])?;
        Ok(gathered.iter().map(|v| v[0]).sum())
    }

    /// Whether a flag is set on any rank.
    fn any(&self, local: bool) -> Result<bool, CommError> {
        Ok(self.sum_label(usize::from(local))? > 0)
    }
}

// ---------------------------------------------------------------------------
// SerialComm
// ---------------------------------------------------------------------------

/// Single-process communicator.
///
/// Messages addressed to rank 0 are queued in a loopback mailbox; any other
/// peer is an [`CommError::InvalidRank`].
#[derive(Debug, Default)]
pub struct SerialComm {
    loopback: Mutex<HashMap<u32, VecDeque<Payload>>>,
}

impl SerialComm {
    /// Create a serial communicator.
    pub fn new() -> Self {
        Self::default()
    }

    fn check_peer(peer: usize) -> Result<(), CommError> {
        if peer == 0 {
            Ok(())
        } else {
            Err(CommError::InvalidRank {
                rank: peer,
                n_procs: 1,
            })
        }
    }
}

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn n_procs(&self) -> usize {
        1
    }

    fn send(&self, to: usize, tag: u32, payload: Payload) -> Result<(), CommError> {
        Self::check_peer(to)?;
        self.loopback.lock().entry(tag).or_default().push_back(payload);
        Ok(())
    }

    fn recv(&self, from: usize, tag: u32) -> Result<Payload, CommError> {
        Self::check_peer(from)?;
        self.loopback
            .lock()
            .get_mut(&tag)
            .and_then(VecDeque::pop_front)
            .ok_or(CommError::Disconnected { peer: from })
    }
}

// ---------------------------------------------------------------------------
// ThreadComm
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Envelope {
    from: usize,
    tag: u32,
    payload: Payload,
}

/// One rank of an in-process world; see [`ThreadComm::world`].
#[derive(Debug)]
pub struct ThreadComm {
    rank: usize,
    senders: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    pending: Mutex<HashMap<(usize, u32), VecDeque<Payload>>>,
    timeout: Duration,
}

impl ThreadComm {
    /// Build a fully connected world of `n_procs` ranks.
    ///
    /// Move each returned communicator into its own thread.
    pub fn world(n_procs: usize) -> Vec<ThreadComm> {
        Self::world_with_timeout(n_procs, DEFAULT_RECV_TIMEOUT)
    }

    /// Like [`world`](Self::world) with a custom receive timeout.
    pub fn world_with_timeout(n_procs: usize, timeout: Duration) -> Vec<ThreadComm> {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..n_procs).map(|_| channel::unbounded()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| ThreadComm {
                rank,
                senders: senders.clone(),
                inbox,
                pending: Mutex::new(HashMap::new()),
                timeout,
            })
            .collect()
    }

    fn check_peer(&self, peer: usize) -> Result<(), CommError> {
        if peer < self.senders.len() {
            Ok(())
        } else {
            Err(CommError::InvalidRank {
                rank: peer,
                n_procs: self.senders.len(),
            })
        }
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn n_procs(&self) -> usize {
        self.senders.len()
    }

    fn send(&self, to: usize, tag: u32, payload: Payload) -> Result<(), CommError> {
        self.check_peer(to)?;
        self.senders[to]
            .send(Envelope {
                from: self.rank,
                tag,
                payload,
            })
            .map_err(|_| CommError::Disconnected { peer: to })
    }

    fn recv(&self, from: usize, tag: u32) -> Result<Payload, CommError> {
        self.check_peer(from)?;
        let mut pending = self.pending.lock();
        if let Some(payload) = pending.get_mut(&(from, tag)).and_then(VecDeque::pop_front) {
            return Ok(payload);
        }
        loop {
            let envelope = self.inbox.recv_timeout(self.timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => CommError::Timeout { peer: from, tag },
                RecvTimeoutError::Disconnected => CommError::Disconnected { peer: from },
            })?;
            if envelope.from == from && envelope.tag == tag {
                return Ok(envelope.payload);
            }
            pending
                .entry((envelope.from, envelope.tag))
                .or_default()
                .push_back(envelope.payload);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
