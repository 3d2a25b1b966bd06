//! Node: process-wide job host state.
//!
//! Built once by the entry point and shared by handle with whatever feeds it
//! streams. Inbound streams are either control commands serviced here, job
//! traffic handed to the [`Router`], or new commands that start a job.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use serde_json::json;

use crate::config::NodeConfig;
use crate::error::{JobError, Result};
use crate::jobs::{
    HandlerRegistry, JobController, JobHandle, JobReadQueue, JobRegistry, Outbox, RouteOutcome,
    Router, build_running_jobs_report,
};
use crate::stream::{CommandCode, Stream, StreamHeader};

/// What `handle_inbound` did with a stream.
#[derive(Debug)]
pub enum Dispatch {
    /// A new job was started.
    Started { job_id: u64 },
    /// The stream was routed to existing jobs (or dropped).
    Routed(RouteOutcome),
    /// A control command was serviced and answered.
    Control,
    /// The command could not be started; an error reply was written.
    Rejected(JobError),
}

/// Process-wide job host.
pub struct Node {
    config: NodeConfig,
    controller: JobController,
    router: Router,
    inbound: JobReadQueue<Stream>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    pub fn new(config: NodeConfig, handlers: HandlerRegistry) -> Self {
        let registry = Arc::new(JobRegistry::new(config.max_jobs));
        let controller = JobController::new(
            Arc::clone(&registry),
            Arc::new(handlers),
            Outbox::new(),
            config.exec_timeout,
        );
        let router = Router::new(registry);
        Self {
            config,
            controller,
            router,
            inbound: JobReadQueue::new(),
            dispatcher: Mutex::new(None),
        }
    }

    /// Replace the predicate selecting script-broadcast recipients.
    pub fn with_script_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&JobHandle) -> bool + Send + Sync + 'static,
    {
        self.router = self.router.with_script_filter(filter);
        self
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn controller(&self) -> &JobController {
        &self.controller
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Write queue every job reply lands on.
    pub fn outbox(&self) -> &Outbox {
        self.controller.outbox()
    }

    /// Service one inbound stream on the calling thread.
    pub fn handle_inbound(&self, stream: Stream) -> Dispatch {
        let header = stream.header;
        let flags = header.flags;

        if flags.script || flags.n2n || flags.report || header.job_id != 0 {
            return Dispatch::Routed(self.router.route(stream));
        }

        match header.cmd_code {
            CommandCode::RunningJobs => {
                self.outbox().push(self.build_running_jobs_report(&header));
                Dispatch::Control
            }
            CommandCode::KillJobId => {
                let killed = match stream.require_u64("job_id") {
                    Ok(job_id) => self.kill_job_by_id(job_id),
                    Err(e) => {
                        tracing::warn!(error = %e, "Malformed kill request");
                        false
                    }
                };
                self.reply(&header, json!({ "killed": killed }));
                Dispatch::Control
            }
            CommandCode::KillJobsByCmdCode => {
                let target = stream
                    .payload
                    .get("cmd_code")
                    .cloned()
                    .and_then(|v| serde_json::from_value::<CommandCode>(v).ok());
                let killed = match target {
                    Some(code) => self.kill_job_by_cmd_code(code),
                    None => {
                        tracing::warn!("Malformed kill-by-code request");
                        false
                    }
                };
                self.reply(&header, json!({ "killed": killed }));
                Dispatch::Control
            }
            code => match self.start_job(code, Some(&stream)) {
                Ok(job_id) => Dispatch::Started { job_id },
                Err(e) => {
                    tracing::warn!(cmd_code = %code, error = %e, "Failed to start job");
                    self.reply(&header, json!({ "error": e.to_string() }));
                    Dispatch::Rejected(e)
                }
            },
        }
    }

    fn reply(&self, request: &StreamHeader, payload: serde_json::Value) {
        self.outbox().push(Stream::new(request.reply(), payload));
    }

    /// Queue a stream for the dispatch thread. Never blocks.
    pub fn submit(&self, stream: Stream) {
        self.inbound.push(stream);
    }

    /// Start the dispatch thread. The node keeps its handle and joins it in
    /// [`shutdown`](Self::shutdown); a second call is a no-op.
    pub fn spawn_dispatcher(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            tracing::warn!(node = %self.config.name, "Dispatch thread already running");
            return Ok(());
        }
        let node = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("dispatch".to_string())
            .spawn(move || node.run_dispatch_loop())?;
        *slot = Some(handle);
        Ok(())
    }

    /// Service submitted streams and reap finished jobs until the inbound
    /// queue is closed, then service whatever was submitted before the close.
    pub fn run_dispatch_loop(&self) {
        tracing::info!(node = %self.config.name, "Dispatch loop started");
        let interval = self.config.reap_interval;
        let mut last_reap = Instant::now();

        loop {
            let wait = interval.saturating_sub(last_reap.elapsed());
            match self.inbound.wait_pop_timeout(wait) {
                Some(stream) => {
                    self.handle_inbound(stream);
                }
                None if self.inbound.is_closed() => break,
                None => {}
            }

            if last_reap.elapsed() >= interval {
                let reaped = self.process_completed_jobs();
                if reaped > 0 {
                    tracing::debug!(reaped, "Reaped completed jobs");
                }
                last_reap = Instant::now();
            }
        }

        self.drain_inbound();
        tracing::info!(node = %self.config.name, "Dispatch loop stopped");
    }

    /// Handle every stream still queued on the inbound queue.
    fn drain_inbound(&self) {
        let mut handled = 0usize;
        while let Some(stream) = self.inbound.try_pop() {
            self.handle_inbound(stream);
            handled += 1;
        }
        if handled > 0 {
            tracing::info!(handled, "Handled streams queued before shutdown");
        }
    }

    /// Stop accepting streams, finish handling those already submitted, then
    /// kill every job and close the write queue.
    pub fn shutdown(&self) {
        self.inbound.close();
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(dispatcher) = dispatcher {
            if dispatcher.join().is_err() {
                tracing::warn!("Dispatch thread panicked");
            }
        }
        // Covers a node that never ran a dispatch thread.
        self.drain_inbound();
        self.kill_all_jobs();
        self.outbox().close();
        tracing::info!(node = %self.config.name, "Node shut down");
    }

    pub fn start_job(
        &self,
        cmd_code: CommandCode,
        initial: Option<&Stream>,
    ) -> std::result::Result<u64, JobError> {
        self.controller.start_job(cmd_code, initial)
    }

    pub fn process_completed_jobs(&self) -> usize {
        self.controller.process_completed_jobs()
    }

    pub fn kill_job_by_id(&self, job_id: u64) -> bool {
        self.controller.kill_job_by_id(job_id)
    }

    pub fn kill_job_by_cmd_code(&self, cmd_code: CommandCode) -> bool {
        self.controller.kill_job_by_cmd_code(cmd_code)
    }

    pub fn kill_all_jobs(&self) {
        self.controller.kill_all_jobs();
    }

    pub fn build_running_jobs_report(&self, request: &StreamHeader) -> Stream {
        build_running_jobs_report(self.controller.registry(), &self.config.name, request)
    }

    pub fn forward_to_script_jobs(&self, stream: Stream) -> RouteOutcome {
        self.router.forward_to_script_jobs(stream)
    }

    pub fn forward_n2n(&self, stream: Stream) -> RouteOutcome {
        self.router.forward_n2n(stream)
    }
}

/// Current working directory of the node process.
pub fn working_directory() -> Result<PathBuf> {
    Ok(std::env::current_dir()?)
}
