/// Background fan-out for events whose follower count exceeds the inline bound
use crate::kv::KvStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What to do to every feed of a job
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FanoutOp {
    Insert { score: f64 },
    Remove,
}

/// One event applied to a batch of follower feeds
#[derive(Debug, Clone)]
pub struct FanoutJob {
    pub event_key: String,
    pub feeds: Vec<String>,
    pub op: FanoutOp,
}

/// Producer side of the fan-out channel
#[derive(Clone)]
pub struct FanoutQueue {
    sender: mpsc::Sender<FanoutJob>,
}

impl FanoutQueue {
    /// Hand a job to the worker; gives the job back when the channel is full or closed
    pub fn try_enqueue(&self, job: FanoutJob) -> Result<(), FanoutJob> {
        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) | mpsc::error::TrySendError::Closed(job) => job,
        })
    }
}

/// Consumer draining fan-out jobs into the store
pub struct FanoutWorker {
    kv: Arc<dyn KvStore>,
    receiver: mpsc::Receiver<FanoutJob>,
}

impl FanoutWorker {
    /// Start the worker on the current runtime
    pub fn spawn(kv: Arc<dyn KvStore>, capacity: usize) -> (FanoutQueue, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let worker = Self { kv, receiver };
        let handle = tokio::spawn(worker.run());
        info!(capacity, "fan-out worker started");
        (FanoutQueue { sender }, handle)
    }

    async fn run(mut self) {
        while let Some(job) = self.receiver.recv().await {
            apply(self.kv.as_ref(), &job).await;
        }
        debug!("fan-out channel closed, worker exiting");
    }
}

/// Apply a job feed by feed; failed feeds are logged and skipped
pub async fn apply(kv: &dyn KvStore, job: &FanoutJob) -> usize {
    let mut failed = 0;
    for feed in &job.feeds {
        let result = match job.op {
            FanoutOp::Insert { score } => kv.zadd(feed, &[(score, job.event_key.clone())]).await,
            FanoutOp::Remove => kv.zrem(feed, &[job.event_key.clone()]).await.map(|_| ()),
        };
        if let Err(e) = result {
            failed += 1;
            warn!(feed = %feed, event = %job.event_key, "fan-out write failed: {}", e);
        }
    }
    failed
}
