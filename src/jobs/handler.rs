//! Job handlers: the command-specific body each worker thread runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::JobError;
use crate::jobs::record::{CancelToken, JobCapabilities, StreamQueue};
use crate::stream::{CommandCode, Stream, StreamHeader};

/// Body of a job, executed on the job's own worker thread.
pub trait JobHandler: Send + Sync + std::fmt::Debug {
    /// Command code this handler serves.
    fn cmd_code(&self) -> CommandCode;

    /// Queue capabilities of jobs started with this handler.
    fn capabilities(&self) -> JobCapabilities {
        JobCapabilities::default()
    }

    /// Run the job to completion.
    ///
    /// Implementations must return promptly once `ctx.is_cancelled()` turns
    /// true or a queue wait yields `None`.
    fn run(&self, ctx: &WorkerContext) -> Result<(), JobError>;
}

/// Outbound write queue shared by every job on the node.
#[derive(Debug, Clone)]
pub struct Outbox {
    queue: Arc<StreamQueue>,
}

impl Outbox {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(StreamQueue::new()),
        }
    }

    pub fn push(&self, stream: Stream) {
        self.queue.push(stream);
    }

    /// Next outbound stream, waiting up to `timeout`.
    pub fn next_timeout(&self, timeout: Duration) -> Option<Stream> {
        self.queue.wait_pop_timeout(timeout)
    }

    pub fn try_next(&self) -> Option<Stream> {
        self.queue.try_pop()
    }

    /// Block until a stream is written or the outbox is closed.
    pub fn wait_next(&self) -> Option<Stream> {
        self.queue.wait_pop()
    }

    pub fn close(&self) {
        self.queue.close();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a running job can see.
#[derive(Debug)]
pub struct WorkerContext {
    pub job_id: u64,
    pub cmd_ident: u64,
    pub cmd_code: CommandCode,
    /// The stream that started the job, if any.
    pub initial: Option<Stream>,
    /// Upper bound for external processes spawned by the job.
    pub exec_timeout: Duration,
    primary: Arc<StreamQueue>,
    n2n: Arc<StreamQueue>,
    cancel: CancelToken,
    outbox: Outbox,
}

impl WorkerContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        job_id: u64,
        cmd_ident: u64,
        cmd_code: CommandCode,
        initial: Option<Stream>,
        exec_timeout: Duration,
        primary: Arc<StreamQueue>,
        n2n: Arc<StreamQueue>,
        cancel: CancelToken,
        outbox: Outbox,
    ) -> Self {
        Self {
            job_id,
            cmd_ident,
            cmd_code,
            initial,
            exec_timeout,
            primary,
            n2n,
            cancel,
            outbox,
        }
    }

    /// Block on the primary queue. `None` means the job was cancelled.
    pub fn wait_primary(&self) -> Option<Stream> {
        self.primary.wait_pop()
    }

    /// Block on the N2N queue. `None` means the job was cancelled.
    pub fn wait_n2n(&self) -> Option<Stream> {
        self.n2n.wait_pop()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Header replies are correlated with.
    pub fn reply_header(&self) -> StreamHeader {
        let mut header = StreamHeader::new(self.cmd_code, self.cmd_ident);
        header.job_id = self.job_id;
        header.reply()
    }

    /// Push a reply correlated to the originating command.
    pub fn reply(&self, payload: serde_json::Value) {
        self.outbox.push(Stream::new(self.reply_header(), payload));
    }

    /// Push an arbitrary stream to the node's write queue.
    pub fn send(&self, stream: Stream) {
        self.outbox.push(stream);
    }

    /// Payload of the initial stream, or `Null`.
    pub fn initial_payload(&self) -> &serde_json::Value {
        self.initial
            .as_ref()
            .map(|s| &s.payload)
            .unwrap_or(&serde_json::Value::Null)
    }
}

/// Maps command codes to job handlers.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<CommandCode, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Control commands and duplicate codes are rejected.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) -> Result<(), JobError> {
        let code = handler.cmd_code();
        if code.is_control() {
            tracing::warn!(cmd_code = %code, "Rejected handler for control command");
            return Err(JobError::ReservedCommand { code });
        }
        if self.handlers.contains_key(&code) {
            tracing::warn!(cmd_code = %code, "Rejected duplicate job handler");
            return Err(JobError::DuplicateHandler { code });
        }
        self.handlers.insert(code, handler);
        tracing::debug!(cmd_code = %code, "Registered job handler");
        Ok(())
    }

    pub fn get(&self, code: CommandCode) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&code).cloned()
    }

    pub fn has(&self, code: CommandCode) -> bool {
        self.handlers.contains_key(&code)
    }

    pub fn count(&self) -> usize {
        self.handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct MockJob {
        code: CommandCode,
    }

    impl JobHandler for MockJob {
        fn cmd_code(&self) -> CommandCode {
            self.code
        }

        fn run(&self, _ctx: &WorkerContext) -> Result<(), JobError> {
            Ok(())
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(Arc::new(MockJob {
                code: CommandCode::Echo,
            }))
            .unwrap();

        assert!(registry.has(CommandCode::Echo));
        assert!(!registry.has(CommandCode::Exec));
        assert_eq!(registry.get(CommandCode::Echo).unwrap().cmd_code(), CommandCode::Echo);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn duplicate_rejected() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(Arc::new(MockJob {
                code: CommandCode::Wait,
            }))
            .unwrap();
        let result = registry.register(Arc::new(MockJob {
            code: CommandCode::Wait,
        }));
        assert!(matches!(result, Err(JobError::DuplicateHandler { .. })));
    }

    #[test]
    fn control_codes_cannot_be_jobs() {
        let mut registry = HandlerRegistry::new();
        let result = registry.register(Arc::new(MockJob {
            code: CommandCode::RunningJobs,
        }));
        assert!(matches!(
            result,
            Err(JobError::ReservedCommand {
                code: CommandCode::RunningJobs
            })
        ));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn outbox_fifo() {
        let outbox = Outbox::new();
        outbox.push(Stream::command(CommandCode::Echo, 1, serde_json::json!(1)));
        outbox.push(Stream::command(CommandCode::Echo, 2, serde_json::json!(2)));
        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox.try_next().unwrap().cmd_ident(), 1);
        assert_eq!(outbox.next_timeout(Duration::from_millis(10)).unwrap().cmd_ident(), 2);
        assert!(outbox.is_empty());
    }
}
