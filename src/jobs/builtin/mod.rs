//! Built-in job handlers.

pub mod echo;
pub mod exec;
pub mod relay;
pub mod wait;

use std::sync::Arc;

use crate::error::JobError;
use crate::jobs::handler::HandlerRegistry;

pub use echo::EchoJob;
pub use exec::ExecJob;
pub use relay::{N2nRelayJob, ScriptRelayJob};
pub use wait::WaitJob;

/// Handler registry populated with every built-in job.
pub fn default_handlers() -> Result<HandlerRegistry, JobError> {
    let mut handlers = HandlerRegistry::new();
    handlers.register(Arc::new(EchoJob))?;
    handlers.register(Arc::new(ExecJob))?;
    handlers.register(Arc::new(ScriptRelayJob))?;
    handlers.register(Arc::new(N2nRelayJob))?;
    handlers.register(Arc::new(WaitJob))?;
    Ok(handlers)
}
