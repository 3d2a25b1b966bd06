//! Relay jobs: long-lived jobs that forward what they receive to the
//! node's write queue until killed.

use serde_json::json;

use crate::error::JobError;
use crate::jobs::handler::{JobHandler, WorkerContext};
use crate::jobs::record::JobCapabilities;
use crate::stream::CommandCode;

/// Receives script-channel broadcasts and anything addressed to it.
#[derive(Debug, Default)]
pub struct ScriptRelayJob;

impl JobHandler for ScriptRelayJob {
    fn cmd_code(&self) -> CommandCode {
        CommandCode::ScriptRelay
    }

    fn capabilities(&self) -> JobCapabilities {
        JobCapabilities::capturing().with_script_forwarding()
    }

    fn run(&self, ctx: &WorkerContext) -> Result<(), JobError> {
        ctx.reply(json!({ "job_id": ctx.job_id, "status": "listening" }));
        while let Some(stream) = ctx.wait_primary() {
            ctx.reply(json!({
                "from_cmd_code": stream.cmd_code(),
                "from_cmd_ident": stream.cmd_ident(),
                "payload": stream.payload,
            }));
        }
        Err(JobError::Cancelled { id: ctx.job_id })
    }
}

/// Receives node-to-node streams and passes them on unchanged.
#[derive(Debug, Default)]
pub struct N2nRelayJob;

impl JobHandler for N2nRelayJob {
    fn cmd_code(&self) -> CommandCode {
        CommandCode::N2nRelay
    }

    fn capabilities(&self) -> JobCapabilities {
        JobCapabilities::default().with_n2n()
    }

    fn run(&self, ctx: &WorkerContext) -> Result<(), JobError> {
        while let Some(stream) = ctx.wait_n2n() {
            tracing::debug!(
                job_id = ctx.job_id,
                cmd_ident = stream.cmd_ident(),
                "Relaying node-to-node stream"
            );
            ctx.send(stream);
        }
        Err(JobError::Cancelled { id: ctx.job_id })
    }
}
