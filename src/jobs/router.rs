//! Inbound stream routing.
//!
//! Decides which job queue an arriving stream belongs to. Routing only ever
//! pushes, so the receiving thread is never blocked by a busy job.

use std::sync::Arc;

use crate::jobs::record::JobHandle;
use crate::jobs::registry::JobRegistry;
use crate::stream::Stream;

/// Which of a job's queues received a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Primary,
    N2n,
}

/// Why a stream was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No live job has the target id.
    NoSuchJob,
    /// The job exists but does not accept this kind of stream.
    NotAccepted,
}

/// Result of routing one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered { job_id: u64, queue: QueueKind },
    Broadcast { delivered: usize },
    Dropped(DropReason),
}

/// Predicate selecting the jobs that receive script-channel broadcasts.
pub type ScriptFilter = Arc<dyn Fn(&JobHandle) -> bool + Send + Sync>;

/// Routes inbound streams to job queues.
#[derive(Clone)]
pub struct Router {
    registry: Arc<JobRegistry>,
    script_filter: ScriptFilter,
}

impl Router {
    /// Router selecting script jobs by their `script_forwarding` capability.
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self {
            registry,
            script_filter: Arc::new(|job: &JobHandle| job.capabilities.script_forwarding),
        }
    }

    /// Replace the predicate deciding which jobs count as script jobs.
    pub fn with_script_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&JobHandle) -> bool + Send + Sync + 'static,
    {
        self.script_filter = Arc::new(filter);
        self
    }

    /// Route a stream according to its header.
    pub fn route(&self, stream: Stream) -> RouteOutcome {
        let flags = stream.header.flags;
        if flags.script {
            return self.forward_to_script_jobs(stream);
        }
        if flags.n2n {
            return self.forward_n2n(stream);
        }
        self.route_to_job(stream)
    }

    /// Deliver a copy of `stream` to every script job.
    pub fn forward_to_script_jobs(&self, stream: Stream) -> RouteOutcome {
        let targets = self.registry.find_matching(|job| (self.script_filter)(job));

        if targets.is_empty() {
            tracing::warn!(
                cmd_code = %stream.cmd_code(),
                cmd_ident = stream.cmd_ident(),
                "No script jobs to forward stream to"
            );
            return RouteOutcome::Broadcast { delivered: 0 };
        }

        let delivered = targets.len();
        for job in &targets {
            job.push_primary(stream.clone());
        }

        tracing::debug!(delivered, "Forwarded stream to script jobs");
        RouteOutcome::Broadcast { delivered }
    }

    /// Deliver a node-to-node stream to its target job's N2N queue, falling
    /// back to ordinary routing when the job does not take N2N traffic.
    pub fn forward_n2n(&self, stream: Stream) -> RouteOutcome {
        let job_id = stream.job_id();
        match self.registry.find(job_id) {
            Some(job) if job.capabilities.receive_n2n => {
                job.push_n2n(stream);
                RouteOutcome::Delivered {
                    job_id,
                    queue: QueueKind::N2n,
                }
            }
            Some(job) => self.deliver_primary(job, stream),
            None => Self::drop_missing(stream),
        }
    }

    fn route_to_job(&self, stream: Stream) -> RouteOutcome {
        match self.registry.find(stream.job_id()) {
            Some(job) => self.deliver_primary(job, stream),
            None => Self::drop_missing(stream),
        }
    }

    fn deliver_primary(&self, job: JobHandle, stream: Stream) -> RouteOutcome {
        let is_reply =
            stream.header.flags.report && stream.cmd_ident() == job.cmd_ident;

        if job.capabilities.capture_incoming_streams || is_reply {
            job.push_primary(stream);
            return RouteOutcome::Delivered {
                job_id: job.job_id,
                queue: QueueKind::Primary,
            };
        }

        tracing::warn!(
            job_id = job.job_id,
            cmd_code = %stream.cmd_code(),
            cmd_ident = stream.cmd_ident(),
            "Job does not accept stream, dropping"
        );
        RouteOutcome::Dropped(DropReason::NotAccepted)
    }

    fn drop_missing(stream: Stream) -> RouteOutcome {
        tracing::warn!(
            job_id = stream.job_id(),
            cmd_code = %stream.cmd_code(),
            cmd_ident = stream.cmd_ident(),
            "No job for inbound stream, dropping"
        );
        RouteOutcome::Dropped(DropReason::NoSuchJob)
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").finish_non_exhaustive()
    }
}
