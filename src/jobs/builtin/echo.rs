//! Echo job: replies with its initial payload.

use crate::error::JobError;
use crate::jobs::handler::{JobHandler, WorkerContext};
use crate::stream::CommandCode;

#[derive(Debug, Default)]
pub struct EchoJob;

impl JobHandler for EchoJob {
    fn cmd_code(&self) -> CommandCode {
        CommandCode::Echo
    }

    fn run(&self, ctx: &WorkerContext) -> Result<(), JobError> {
        ctx.reply(ctx.initial_payload().clone());
        Ok(())
    }
}
