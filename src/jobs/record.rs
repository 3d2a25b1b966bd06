//! Job record: the scheduling state of one live job.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::jobs::queue::JobReadQueue;
use crate::stream::{CommandCode, Stream};

/// Queue of streams feeding one job.
pub type StreamQueue = JobReadQueue<Stream>;

/// What a job accepts beyond direct replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCapabilities {
    /// Any stream addressed to the job lands on its primary queue.
    pub capture_incoming_streams: bool,
    /// Node-to-node streams addressed to the job land on its N2N queue.
    pub receive_n2n: bool,
    /// The job receives script-channel broadcasts.
    pub script_forwarding: bool,
}

impl JobCapabilities {
    pub fn capturing() -> Self {
        Self {
            capture_incoming_streams: true,
            ..Self::default()
        }
    }

    pub fn with_n2n(mut self) -> Self {
        self.receive_n2n = true;
        self
    }

    pub fn with_script_forwarding(mut self) -> Self {
        self.script_forwarding = true;
        self
    }
}

/// Cooperative cancellation signal shared by a record and its worker.
///
/// Cancelling sets the flag and closes both of the job's queues, so a worker
/// blocked in `wait_pop` wakes up and sees `None`.
#[derive(Debug, Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    primary: Arc<StreamQueue>,
    n2n: Arc<StreamQueue>,
}

impl CancelToken {
    fn new(primary: Arc<StreamQueue>, n2n: Arc<StreamQueue>) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            primary,
            n2n,
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.primary.close();
        self.n2n.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One executing unit of work.
///
/// The worker handle is owned exclusively by the record until the record is
/// removed from the registry, at which point whoever removed it joins it.
#[derive(Debug)]
pub struct JobRecord {
    pub job_id: u64,
    pub cmd_ident: u64,
    pub cmd_code: CommandCode,
    pub capabilities: JobCapabilities,
    pub started_at: DateTime<Utc>,
    primary: Arc<StreamQueue>,
    n2n: Arc<StreamQueue>,
    cancel: CancelToken,
    worker: Option<JoinHandle<()>>,
}

impl JobRecord {
    pub fn new(
        job_id: u64,
        cmd_ident: u64,
        cmd_code: CommandCode,
        capabilities: JobCapabilities,
    ) -> Self {
        let primary = Arc::new(StreamQueue::new());
        let n2n = Arc::new(StreamQueue::new());
        let cancel = CancelToken::new(Arc::clone(&primary), Arc::clone(&n2n));
        Self {
            job_id,
            cmd_ident,
            cmd_code,
            capabilities,
            started_at: Utc::now(),
            primary,
            n2n,
            cancel,
            worker: None,
        }
    }

    pub fn primary_queue(&self) -> &Arc<StreamQueue> {
        &self.primary
    }

    pub fn n2n_queue(&self) -> &Arc<StreamQueue> {
        &self.n2n
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Attach the spawned worker thread.
    pub fn attach_worker(&mut self, handle: JoinHandle<()>) {
        self.worker = Some(handle);
    }

    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    /// True once the worker thread has returned from its body.
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().is_some_and(JoinHandle::is_finished)
    }

    /// Hand the worker handle over for joining.
    pub fn take_worker(&mut self) -> Option<JoinHandle<()>> {
        self.worker.take()
    }

    /// A cloned view usable after the registry guard is released.
    pub fn handle(&self) -> JobHandle {
        JobHandle {
            job_id: self.job_id,
            cmd_ident: self.cmd_ident,
            cmd_code: self.cmd_code,
            capabilities: self.capabilities,
            primary: Arc::clone(&self.primary),
            n2n: Arc::clone(&self.n2n),
            cancel: self.cancel.clone(),
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.job_id,
            cmd_ident: self.cmd_ident,
            cmd_code: self.cmd_code,
            started_at: self.started_at,
        }
    }
}

/// Borrow-free view of a live job.
///
/// Holding a handle does not keep the job registered; pushing to a handle
/// whose job has been removed only feeds a queue nobody reads.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job_id: u64,
    pub cmd_ident: u64,
    pub cmd_code: CommandCode,
    pub capabilities: JobCapabilities,
    primary: Arc<StreamQueue>,
    n2n: Arc<StreamQueue>,
    cancel: CancelToken,
}

impl JobHandle {
    pub fn push_primary(&self, stream: Stream) {
        self.primary.push(stream);
    }

    pub fn push_n2n(&self, stream: Stream) {
        self.n2n.push(stream);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn primary_len(&self) -> usize {
        self.primary.len()
    }

    pub fn n2n_len(&self) -> usize {
        self.n2n.len()
    }
}

/// One row of the running-jobs report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: u64,
    pub cmd_ident: u64,
    pub cmd_code: CommandCode,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn cancel_closes_both_queues() {
        let record = JobRecord::new(1, 10, CommandCode::Wait, JobCapabilities::capturing());
        let token = record.cancel_token().clone();
        assert!(!token.is_cancelled());

        token.cancel();

        assert!(token.is_cancelled());
        assert!(record.primary_queue().is_closed());
        assert!(record.n2n_queue().is_closed());
        assert_eq!(record.primary_queue().wait_pop(), None);
    }

    #[test]
    fn handle_pushes_reach_record_queues() {
        let caps = JobCapabilities::default().with_n2n();
        let record = JobRecord::new(3, 0, CommandCode::N2nRelay, caps);
        let handle = record.handle();

        handle.push_n2n(Stream::command(CommandCode::N2nRelay, 0, json!("hop")));

        assert_eq!(record.n2n_queue().len(), 1);
        assert!(record.primary_queue().is_empty());
    }

    #[test]
    fn no_worker_means_not_finished() {
        let record = JobRecord::new(2, 0, CommandCode::Echo, JobCapabilities::default());
        assert!(!record.has_worker());
        assert!(!record.is_finished());
    }

    #[test]
    fn capability_builders() {
        let caps = JobCapabilities::capturing().with_script_forwarding();
        assert!(caps.capture_incoming_streams);
        assert!(caps.script_forwarding);
        assert!(!caps.receive_n2n);
    }
}
