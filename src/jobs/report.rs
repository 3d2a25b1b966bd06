//! Running-jobs status report.

use serde_json::json;

use crate::jobs::registry::JobRegistry;
use crate::stream::{Stream, StreamHeader};

/// Build the reply to a running-jobs request.
///
/// The payload lists every live job as `{job_id, cmd_ident, cmd_code,
/// started_at}`; the header echoes the request's command code and ident.
pub fn build_running_jobs_report(
    registry: &JobRegistry,
    node_name: &str,
    request: &StreamHeader,
) -> Stream {
    let jobs = registry.snapshot();
    tracing::debug!(count = jobs.len(), cmd_ident = request.cmd_ident, "Built running jobs report");

    let mut header = request.reply();
    header.job_id = 0;
    Stream::new(header, json!({ "node": node_name, "jobs": jobs }))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::jobs::record::{JobCapabilities, JobRecord};
    use crate::stream::CommandCode;

    #[test]
    fn report_lists_every_job() {
        let registry = JobRegistry::new(8);
        registry
            .insert(JobRecord::new(1, 0xa, CommandCode::Exec, JobCapabilities::default()))
            .unwrap();
        registry
            .insert(JobRecord::new(2, 0xb, CommandCode::Wait, JobCapabilities::capturing()))
            .unwrap();

        let request = StreamHeader::new(CommandCode::RunningJobs, 555);
        let report = build_running_jobs_report(&registry, "node-a", &request);

        assert_eq!(report.cmd_ident(), 555);
        assert_eq!(report.cmd_code(), CommandCode::RunningJobs);
        assert!(report.header.flags.report);
        assert_eq!(report.payload["node"], "node-a");

        let entries: HashSet<(u64, u64, String)> = report.payload["jobs"]
            .as_array()
            .unwrap()
            .iter()
            .map(|j| {
                (
                    j["job_id"].as_u64().unwrap(),
                    j["cmd_ident"].as_u64().unwrap(),
                    j["cmd_code"].as_str().unwrap().to_string(),
                )
            })
            .collect();
        let expected: HashSet<(u64, u64, String)> = [
            (1, 0xa, "exec".to_string()),
            (2, 0xb, "wait".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(entries, expected);
    }

    #[test]
    fn empty_registry_gives_empty_list() {
        let registry = JobRegistry::new(8);
        let request = StreamHeader::new(CommandCode::RunningJobs, 1);
        let report = build_running_jobs_report(&registry, "n", &request);
        assert_eq!(report.payload["jobs"].as_array().unwrap().len(), 0);
    }
}
