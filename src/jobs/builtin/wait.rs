//! Wait job: captures inbound streams until one says it is done.

use serde_json::json;

use crate::error::JobError;
use crate::jobs::handler::{JobHandler, WorkerContext};
use crate::jobs::record::JobCapabilities;
use crate::stream::CommandCode;

/// Counts the streams routed to it. A stream with payload `{"done": true}`
/// ends the job with a reply carrying the count.
#[derive(Debug, Default)]
pub struct WaitJob;

impl JobHandler for WaitJob {
    fn cmd_code(&self) -> CommandCode {
        CommandCode::Wait
    }

    fn capabilities(&self) -> JobCapabilities {
        JobCapabilities::capturing()
    }

    fn run(&self, ctx: &WorkerContext) -> Result<(), JobError> {
        let mut received = 0u64;
        while let Some(stream) = ctx.wait_primary() {
            if stream.payload.get("done").and_then(|v| v.as_bool()) == Some(true) {
                ctx.reply(json!({ "received": received }));
                return Ok(());
            }
            received += 1;
        }
        Err(JobError::Cancelled { id: ctx.job_id })
    }
}
