//! Parallel transaction executor with retry-on-abort.

use crate::{Transaction, TxnRuntime, TxnStatus};
use crossbeam::channel::{unbounded, Sender};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use tracing::warn;

enum Job {
    Run(Transaction, u64),
    Stop,
}

/// Runs a batch of transactions across a pool of threads. A transaction
/// that aborts on a lock conflict is re-enqueued after a yield until it
/// commits; logical failures are terminal.
pub struct TransactionWorker {
    rt: TxnRuntime,
    threads: usize,
    pending: Vec<Transaction>,
    handles: Vec<JoinHandle<()>>,
    committed: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
}

impl TransactionWorker {
    pub fn new(rt: TxnRuntime, threads: usize) -> Self {
        Self {
            rt,
            threads: threads.max(1),
            pending: Vec::new(),
            handles: Vec::new(),
            committed: Arc::new(AtomicUsize::new(0)),
            failed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn add(&mut self, txn: Transaction) {
        self.pending.push(txn);
    }

    /// Spawn the worker threads and hand them the queued transactions.
    pub fn run(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let (sender, receiver) = unbounded::<Job>();
        let outstanding = Arc::new(AtomicUsize::new(self.pending.len()));

        for txn in self.pending.drain(..) {
            let _ = sender.send(Job::Run(txn, 0));
        }

        for _ in 0..self.threads {
            let rt = self.rt.clone();
            let receiver = receiver.clone();
            let sender = sender.clone();
            let outstanding = outstanding.clone();
            let committed = self.committed.clone();
            let failed = self.failed.clone();
            let threads = self.threads;

            self.handles.push(thread::spawn(move || {
                while let Ok(job) = receiver.recv() {
                    let (mut txn, retries) = match job {
                        Job::Stop => break,
                        Job::Run(txn, retries) => (txn, retries),
                    };
                    match txn.run(&rt) {
                        TxnStatus::Committed => {
                            committed.fetch_add(1, Ordering::Relaxed);
                            finish_one(&outstanding, &sender, threads);
                        }
                        TxnStatus::Failed => {
                            failed.fetch_add(1, Ordering::Relaxed);
                            finish_one(&outstanding, &sender, threads);
                        }
                        TxnStatus::Aborted => {
                            if retries > 0 && retries % 10_000 == 0 {
                                warn!(retries, "transaction still aborting on conflicts");
                            }
                            thread::yield_now();
                            let _ = sender.send(Job::Run(txn, retries + 1));
                        }
                    }
                }
            }));
        }
    }

    /// Wait for every queued transaction to commit or fail.
    pub fn join(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    pub fn committed(&self) -> usize {
        self.committed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }
}

fn finish_one(outstanding: &AtomicUsize, sender: &Sender<Job>, threads: usize) {
    if outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
        for _ in 0..threads {
            let _ = sender.send(Job::Stop);
        }
    }
}
