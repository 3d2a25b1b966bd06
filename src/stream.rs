//! Stream: the unit of data exchanged between nodes and jobs.
//!
//! The job core only relies on the header's routing fields, `Clone` for
//! non-destructive peeks and plain moves for ownership transfer. The payload is
//! opaque JSON.

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Command codes understood by this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandCode {
    /// Reply with the initial payload.
    Echo,
    /// Run a shell command.
    Exec,
    /// Long-lived job receiving script/extension broadcasts.
    ScriptRelay,
    /// Long-lived job receiving node-to-node forwarded streams.
    N2nRelay,
    /// Capture inbound streams until told to finish.
    Wait,
    /// Report the jobs currently running on this node.
    RunningJobs,
    /// Kill one job by id.
    KillJobId,
    /// Kill every job running a given command code.
    KillJobsByCmdCode,
}

impl CommandCode {
    /// Control commands are serviced by the node itself and never become jobs.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Self::RunningJobs | Self::KillJobId | Self::KillJobsByCmdCode
        )
    }

    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Echo => "echo",
            Self::Exec => "exec",
            Self::ScriptRelay => "script_relay",
            Self::N2nRelay => "n2n_relay",
            Self::Wait => "wait",
            Self::RunningJobs => "running_jobs",
            Self::KillJobId => "kill_job_id",
            Self::KillJobsByCmdCode => "kill_jobs_by_cmd_code",
        }
    }
}

impl std::fmt::Display for CommandCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing flags carried in a stream header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFlags {
    /// Reply correlated to a request by `cmd_ident`.
    #[serde(default)]
    pub report: bool,
    /// Node-to-node forwarded traffic.
    #[serde(default)]
    pub n2n: bool,
    /// Addressed to the script/extension channel.
    #[serde(default)]
    pub script: bool,
}

/// Header of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHeader {
    pub cmd_code: CommandCode,
    /// Target job on this node; 0 when the stream is not addressed to a job.
    #[serde(default)]
    pub job_id: u64,
    /// Identifier of the originating command instance.
    #[serde(default)]
    pub cmd_ident: u64,
    #[serde(default)]
    pub flags: StreamFlags,
}

impl StreamHeader {
    pub fn new(cmd_code: CommandCode, cmd_ident: u64) -> Self {
        Self {
            cmd_code,
            job_id: 0,
            cmd_ident,
            flags: StreamFlags::default(),
        }
    }

    /// Header for a reply to `self`: same code and ident, flagged as report.
    pub fn reply(&self) -> Self {
        Self {
            cmd_code: self.cmd_code,
            job_id: self.job_id,
            cmd_ident: self.cmd_ident,
            flags: StreamFlags {
                report: true,
                ..StreamFlags::default()
            },
        }
    }
}

/// A self-describing message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub header: StreamHeader,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Stream {
    pub fn new(header: StreamHeader, payload: serde_json::Value) -> Self {
        Self { header, payload }
    }

    /// A command stream with no routing flags.
    pub fn command(cmd_code: CommandCode, cmd_ident: u64, payload: serde_json::Value) -> Self {
        Self::new(StreamHeader::new(cmd_code, cmd_ident), payload)
    }

    /// Address this stream to a job on this node.
    pub fn addressed_to(mut self, job_id: u64) -> Self {
        self.header.job_id = job_id;
        self
    }

    pub fn flagged_report(mut self) -> Self {
        self.header.flags.report = true;
        self
    }

    pub fn flagged_n2n(mut self) -> Self {
        self.header.flags.n2n = true;
        self
    }

    pub fn flagged_script(mut self) -> Self {
        self.header.flags.script = true;
        self
    }

    pub fn cmd_code(&self) -> CommandCode {
        self.header.cmd_code
    }

    pub fn job_id(&self) -> u64 {
        self.header.job_id
    }

    pub fn cmd_ident(&self) -> u64 {
        self.header.cmd_ident
    }

    /// Decode one JSON line.
    pub fn from_json_line(line: &str) -> Result<Self, StreamError> {
        serde_json::from_str(line.trim()).map_err(StreamError::Decode)
    }

    /// Encode as one JSON line (no trailing newline).
    pub fn to_json_line(&self) -> Result<String, StreamError> {
        serde_json::to_string(self).map_err(StreamError::Encode)
    }

    /// Read a required unsigned integer field from the payload.
    pub fn require_u64(&self, field: &str) -> Result<u64, StreamError> {
        self.payload
            .get(field)
            .and_then(|v| v.as_u64())
            .ok_or_else(|| StreamError::MissingField(field.to_string()))
    }

    /// Read a required string field from the payload.
    pub fn require_str(&self, field: &str) -> Result<&str, StreamError> {
        self.payload
            .get(field)
            .and_then(|v| v.as_str())
            .ok_or_else(|| StreamError::MissingField(field.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_minimal_line() {
        let stream = Stream::from_json_line(r#"{"header":{"cmd_code":"echo"}}"#).unwrap();
        assert_eq!(stream.cmd_code(), CommandCode::Echo);
        assert_eq!(stream.job_id(), 0);
        assert_eq!(stream.header.flags, StreamFlags::default());
        assert!(stream.payload.is_null());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            Stream::from_json_line("not json"),
            Err(StreamError::Decode(_))
        ));
    }

    #[test]
    fn reply_header_echoes_ident() {
        let header = StreamHeader::new(CommandCode::Exec, 42);
        let reply = header.reply();
        assert_eq!(reply.cmd_ident, 42);
        assert_eq!(reply.cmd_code, CommandCode::Exec);
        assert!(reply.flags.report);
        assert!(!reply.flags.n2n);
    }

    #[test]
    fn payload_field_access() {
        let stream = Stream::command(CommandCode::KillJobId, 1, json!({"job_id": 7}));
        assert_eq!(stream.require_u64("job_id").unwrap(), 7);
        assert!(matches!(
            stream.require_str("command"),
            Err(StreamError::MissingField(f)) if f == "command"
        ));
    }

    #[test]
    fn control_codes() {
        assert!(CommandCode::RunningJobs.is_control());
        assert!(CommandCode::KillJobsByCmdCode.is_control());
        assert!(!CommandCode::Exec.is_control());
        assert_eq!(CommandCode::N2nRelay.to_string(), "n2n_relay");
    }
}
