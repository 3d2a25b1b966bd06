//! Job controller: starts, reaps and kills job worker threads.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::json;

use crate::error::JobError;
use crate::jobs::handler::{HandlerRegistry, JobHandler, Outbox, WorkerContext};
use crate::jobs::record::{JobHandle, JobRecord, JobSummary};
use crate::jobs::registry::JobRegistry;
use crate::stream::{CommandCode, Stream};

/// Owns the job registry and the worker thread lifecycle.
pub struct JobController {
    registry: Arc<JobRegistry>,
    handlers: Arc<HandlerRegistry>,
    outbox: Outbox,
    exec_timeout: Duration,
}

impl JobController {
    pub fn new(
        registry: Arc<JobRegistry>,
        handlers: Arc<HandlerRegistry>,
        outbox: Outbox,
        exec_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            handlers,
            outbox,
            exec_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Start a new job running `cmd_code`.
    ///
    /// The record is registered before the worker body begins, so a lookup of
    /// the returned id succeeds immediately. Nothing is left registered when
    /// this fails.
    pub fn start_job(
        &self,
        cmd_code: CommandCode,
        initial: Option<&Stream>,
    ) -> Result<u64, JobError> {
        let handler = self
            .handlers
            .get(cmd_code)
            .ok_or(JobError::UnknownCommand { code: cmd_code })?;

        if self.registry.len() >= self.registry.max_jobs() {
            return Err(JobError::MaxJobsExceeded {
                max: self.registry.max_jobs(),
            });
        }

        let job_id = self.registry.allocate_id();
        let cmd_ident = initial.map(Stream::cmd_ident).unwrap_or(0);
        let mut record = JobRecord::new(job_id, cmd_ident, cmd_code, handler.capabilities());

        let ctx = WorkerContext::new(
            job_id,
            cmd_ident,
            cmd_code,
            initial.cloned(),
            self.exec_timeout,
            Arc::clone(record.primary_queue()),
            Arc::clone(record.n2n_queue()),
            record.cancel_token().clone(),
            self.outbox.clone(),
        );

        let (gate_tx, gate_rx) = mpsc::channel::<bool>();
        let worker = thread::Builder::new()
            .name(format!("job-{job_id}-{cmd_code}"))
            .spawn(move || {
                // Wait until the record is registered (or the launch aborted).
                if gate_rx.recv() != Ok(true) {
                    return;
                }
                run_worker(handler, ctx);
            })
            .map_err(|e| JobError::SpawnFailed {
                id: job_id,
                reason: e.to_string(),
            })?;

        record.attach_worker(worker);

        if let Err((err, mut rejected)) = self.registry.insert(record) {
            let _ = gate_tx.send(false);
            rejected.cancel_token().cancel();
            if let Some(worker) = rejected.take_worker() {
                join_worker(job_id, worker);
            }
            return Err(err);
        }

        // The receiver only drops once the worker exits, which it cannot do
        // before this send.
        let _ = gate_tx.send(true);

        tracing::info!(job_id, cmd_code = %cmd_code, cmd_ident, "Job started");
        Ok(job_id)
    }

    /// Join and unregister every job whose worker has returned.
    ///
    /// Returns how many jobs were reaped. Calling it again with nothing new
    /// finished is a no-op.
    pub fn process_completed_jobs(&self) -> usize {
        let finished = self.registry.take_finished();
        let count = finished.len();
        for mut record in finished {
            if let Some(worker) = record.take_worker() {
                join_worker(record.job_id, worker);
            }
            tracing::debug!(job_id = record.job_id, cmd_code = %record.cmd_code, "Reaped job");
        }
        count
    }

    /// Cancel one job and wait for its worker to exit.
    pub fn kill_job_by_id(&self, job_id: u64) -> bool {
        match self.registry.remove(job_id) {
            Some(record) => {
                terminate(record);
                true
            }
            None => {
                tracing::debug!(job_id, "Kill requested for unknown job");
                false
            }
        }
    }

    /// Cancel every job running `cmd_code`.
    pub fn kill_job_by_cmd_code(&self, cmd_code: CommandCode) -> bool {
        let records = self.registry.take_by_cmd_code(cmd_code);
        if records.is_empty() {
            tracing::debug!(cmd_code = %cmd_code, "Kill requested but no job matched");
            return false;
        }
        terminate_all(records);
        true
    }

    /// Cancel every live job and wait for all of their workers.
    pub fn kill_all_jobs(&self) {
        let records = self.registry.drain();
        if records.is_empty() {
            return;
        }
        tracing::info!(count = records.len(), "Killing all jobs");
        terminate_all(records);
    }

    pub fn find(&self, job_id: u64) -> Option<JobHandle> {
        self.registry.find(job_id)
    }

    pub fn running_jobs(&self) -> Vec<JobSummary> {
        self.registry.snapshot()
    }

    pub fn running_count(&self) -> usize {
        self.registry.len()
    }
}

impl Drop for JobController {
    fn drop(&mut self) {
        self.kill_all_jobs();
    }
}

/// Run a job body. A job killed before its body started still runs it; the
/// body observes the cancellation at its first wait or poll.
fn run_worker(handler: Arc<dyn JobHandler>, ctx: WorkerContext) {
    tracing::debug!(job_id = ctx.job_id, cmd_code = %ctx.cmd_code, "Job body running");

    match handler.run(&ctx) {
        Ok(()) => {
            tracing::info!(job_id = ctx.job_id, cmd_code = %ctx.cmd_code, "Job finished");
        }
        Err(JobError::Cancelled { .. }) => {
            tracing::info!(job_id = ctx.job_id, cmd_code = %ctx.cmd_code, "Job cancelled");
        }
        Err(e) if ctx.is_cancelled() => {
            tracing::info!(job_id = ctx.job_id, error = %e, "Job cancelled");
        }
        Err(e) => {
            tracing::warn!(job_id = ctx.job_id, cmd_code = %ctx.cmd_code, error = %e, "Job failed");
            ctx.reply(json!({ "error": e.to_string() }));
        }
    }
}

/// Cancel first so every worker starts winding down, then join.
fn terminate_all(records: Vec<JobRecord>) {
    for record in &records {
        record.cancel_token().cancel();
    }
    for record in records {
        terminate(record);
    }
}

fn terminate(mut record: JobRecord) {
    record.cancel_token().cancel();
    if let Some(worker) = record.take_worker() {
        join_worker(record.job_id, worker);
    }
    tracing::info!(job_id = record.job_id, cmd_code = %record.cmd_code, "Job killed");
}

fn join_worker(job_id: u64, worker: JoinHandle<()>) {
    if worker.join().is_err() {
        tracing::warn!(job_id, "Job worker panicked");
    }
}
