//! Job system: per-node scheduling of command jobs.
//!
//! Core components:
//! - `queue`: blocking FIFO feeding a worker thread
//! - `record`: job record, capabilities, cancellation token
//! - `registry`: every live job record behind one guard
//! - `router`: routes inbound streams to job queues
//! - `handler`: job body trait, handler registry, worker context
//! - `controller`: start, reap and kill
//! - `report`: running-jobs report
//! - `builtin`: built-in job handlers

pub mod builtin;
pub mod controller;
pub mod handler;
pub mod queue;
pub mod record;
pub mod registry;
pub mod report;
pub mod router;

pub use controller::JobController;
pub use handler::{HandlerRegistry, JobHandler, Outbox, WorkerContext};
pub use queue::JobReadQueue;
pub use record::{CancelToken, JobCapabilities, JobHandle, JobRecord, JobSummary};
pub use registry::JobRegistry;
pub use report::build_running_jobs_report;
pub use router::{DropReason, QueueKind, RouteOutcome, Router};
