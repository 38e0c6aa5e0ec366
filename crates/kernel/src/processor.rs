//! Snapshot Processor - the single kernel worker
//!
//! Snapshots are queued by any number of producers (RPC, tests) and applied
//! to the kernel one at a time in arrival order. Every outcome is broadcast
//! to subscribers. A fatal kernel error stops the worker.

use crate::error::KernelError;
use crate::node::{Kernel, KernelReader};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use kernel_common::{Hash, Snapshot, Transaction};
use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::sync::broadcast;

/// Result of applying one queued snapshot
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SnapshotOutcome {
    pub snapshot: Hash,
    pub node_id: Hash,
    pub round_number: u64,
    /// Topological order assigned when the snapshot was finalized
    pub topological_order: Option<u64>,
    pub membership_epoch: u64,
    /// Rejection reason
    pub error: Option<String>,
}

impl SnapshotOutcome {
    pub fn is_accepted(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    /// Queue poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Maximum snapshots applied per poll
    pub max_batch: usize,
    pub queue_capacity: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            max_batch: 256,
            queue_capacity: 1024,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("snapshot queue is full")]
    QueueFull,

    #[error("snapshot processor stopped")]
    Stopped,
}

struct Submission {
    snapshot: Snapshot,
    transaction: Option<Transaction>,
}

/// Handle for queueing snapshots
#[derive(Clone)]
pub struct SnapshotSender {
    sender: Sender<Submission>,
}

impl SnapshotSender {
    /// Queue a snapshot, optionally with the transaction it references
    pub fn send(&self, snapshot: Snapshot, transaction: Option<Transaction>) -> Result<(), SubmitError> {
        self.sender
            .try_send(Submission { snapshot, transaction })
            .map_err(|e| match e {
                TrySendError::Full(_) => SubmitError::QueueFull,
                TrySendError::Disconnected(_) => SubmitError::Stopped,
            })
    }
}

pub struct SnapshotProcessor {
    kernel: Kernel,
    receiver: Receiver<Submission>,
    sender: Sender<Submission>,
    update_sender: broadcast::Sender<SnapshotOutcome>,
    config: ProcessorConfig,
    running: Arc<AtomicBool>,
}

impl SnapshotProcessor {
    pub fn new(kernel: Kernel, config: ProcessorConfig) -> Self {
        let (sender, receiver) = bounded(config.queue_capacity);
        let (update_sender, _) = broadcast::channel(64);

        Self {
            kernel,
            receiver,
            sender,
            update_sender,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn snapshot_sender(&self) -> SnapshotSender {
        SnapshotSender {
            sender: self.sender.clone(),
        }
    }

    /// Subscribe to snapshot outcomes
    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotOutcome> {
        self.update_sender.subscribe()
    }

    pub fn reader(&self) -> KernelReader {
        self.kernel.reader()
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Flag that stops [`SnapshotProcessor::run_async`] when cleared
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Apply one submission. Only fatal errors are returned; rejections
    /// become outcomes.
    fn process(&mut self, submission: Submission) -> Result<SnapshotOutcome, KernelError> {
        let snapshot = submission.snapshot;
        let mut outcome = SnapshotOutcome {
            snapshot: snapshot.hash(),
            node_id: snapshot.node_id,
            round_number: snapshot.round_number,
            topological_order: None,
            membership_epoch: self.kernel.membership_epoch(),
            error: None,
        };

        let result = match &submission.transaction {
            Some(tx) => self.kernel.submit_transaction(tx).map(|_| ()),
            None => Ok(()),
        };
        let order = self.kernel.next_topological_order();
        let result = result.and_then(|_| self.kernel.process_snapshot(&snapshot));

        match result {
            Ok(()) => {
                outcome.topological_order = Some(order);
                outcome.membership_epoch = self.kernel.membership_epoch();
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!("Rejected snapshot {}: {}", outcome.snapshot, e);
                outcome.error = Some(e.to_string());
            }
        }

        let _ = self.update_sender.send(outcome.clone());
        Ok(outcome)
    }

    /// Apply up to `max_batch` queued snapshots
    pub fn drain(&mut self) -> Result<Vec<SnapshotOutcome>, KernelError> {
        let mut outcomes = Vec::new();
        while outcomes.len() < self.config.max_batch {
            match self.receiver.try_recv() {
                Ok(submission) => outcomes.push(self.process(submission)?),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(outcomes)
    }

    /// Run the worker until stopped or a fatal error occurs
    pub async fn run_async(mut self) -> Result<(), KernelError> {
        self.running.store(true, Ordering::SeqCst);

        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let mut interval = tokio::time::interval(poll);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            "Snapshot processor started ({}ms poll, batch {})",
            self.config.poll_interval_ms,
            self.config.max_batch
        );

        while self.running.load(Ordering::SeqCst) {
            interval.tick().await;
            let tick_start = Instant::now();

            let outcomes = match self.drain() {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    tracing::error!("Kernel halted: {}", e);
                    self.running.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            };

            let elapsed = tick_start.elapsed();
            if !outcomes.is_empty() {
                tracing::debug!(
                    "Applied {} snapshots ({} rejected) in {:.2}ms",
                    outcomes.len(),
                    outcomes.iter().filter(|o| !o.is_accepted()).count(),
                    elapsed.as_secs_f64() * 1000.0
                );
            }
            if elapsed > poll {
                tracing::warn!(
                    "Snapshot batch took {:.2}ms (poll: {}ms)",
                    elapsed.as_secs_f64() * 1000.0,
                    self.config.poll_interval_ms
                );
            }
        }

        tracing::info!("Snapshot processor stopped at epoch {}", self.kernel.membership_epoch());
        Ok(())
    }
}
