//! Job registry: every live job record on this node.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::JobError;
use crate::jobs::record::{JobHandle, JobRecord, JobSummary};
use crate::stream::CommandCode;

/// Owns all job records behind a single guard.
///
/// Lookups return [`JobHandle`] clones so callers never hold the registry
/// guard while touching a job's queues.
pub struct JobRegistry {
    records: Mutex<HashMap<u64, JobRecord>>,
    next_id: AtomicU64,
    max_jobs: usize,
}

impl JobRegistry {
    pub fn new(max_jobs: usize) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_jobs,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, JobRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate an id not used by any live job. Never returns 0.
    pub fn allocate_id(&self) -> u64 {
        let records = self.lock();
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 && !records.contains_key(&id) {
                return id;
            }
        }
    }

    /// Add a record. Fails if the id is taken or the node is at capacity.
    pub fn insert(&self, record: JobRecord) -> Result<(), (JobError, JobRecord)> {
        let mut records = self.lock();
        if records.contains_key(&record.job_id) {
            let id = record.job_id;
            return Err((JobError::DuplicateJobId { id }, record));
        }
        if records.len() >= self.max_jobs {
            return Err((JobError::MaxJobsExceeded { max: self.max_jobs }, record));
        }
        records.insert(record.job_id, record);
        Ok(())
    }

    /// Remove a record, handing its ownership to the caller.
    pub fn remove(&self, job_id: u64) -> Option<JobRecord> {
        self.lock().remove(&job_id)
    }

    pub fn find(&self, job_id: u64) -> Option<JobHandle> {
        self.lock().get(&job_id).map(JobRecord::handle)
    }

    pub fn find_all_by_cmd_code(&self, cmd_code: CommandCode) -> Vec<JobHandle> {
        self.lock()
            .values()
            .filter(|r| r.cmd_code == cmd_code)
            .map(JobRecord::handle)
            .collect()
    }

    /// Handles of every job satisfying `predicate`.
    ///
    /// The predicate runs after the guard is released, so it may call back
    /// into the registry.
    pub fn find_matching<F>(&self, predicate: F) -> Vec<JobHandle>
    where
        F: Fn(&JobHandle) -> bool,
    {
        let handles: Vec<JobHandle> = self.lock().values().map(JobRecord::handle).collect();
        handles.into_iter().filter(|h| predicate(h)).collect()
    }

    /// Point-in-time view of every live job, ordered by id.
    pub fn snapshot(&self) -> Vec<JobSummary> {
        let mut jobs: Vec<JobSummary> = self.lock().values().map(JobRecord::summary).collect();
        jobs.sort_by_key(|j| j.job_id);
        jobs
    }

    /// Remove every record whose worker has returned.
    pub fn take_finished(&self) -> Vec<JobRecord> {
        let mut records = self.lock();
        let finished: Vec<u64> = records
            .values()
            .filter(|r| r.is_finished())
            .map(|r| r.job_id)
            .collect();
        finished
            .into_iter()
            .filter_map(|id| records.remove(&id))
            .collect()
    }

    /// Remove the records of every job running `cmd_code`.
    pub fn take_by_cmd_code(&self, cmd_code: CommandCode) -> Vec<JobRecord> {
        let mut records = self.lock();
        let matching: Vec<u64> = records
            .values()
            .filter(|r| r.cmd_code == cmd_code)
            .map(|r| r.job_id)
            .collect();
        matching
            .into_iter()
            .filter_map(|id| records.remove(&id))
            .collect()
    }

    /// Remove every record.
    pub fn drain(&self) -> Vec<JobRecord> {
        self.lock().drain().map(|(_, record)| record).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn max_jobs(&self) -> usize {
        self.max_jobs
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::record::JobCapabilities;

    fn record(registry: &JobRegistry, code: CommandCode) -> JobRecord {
        JobRecord::new(registry.allocate_id(), 0, code, JobCapabilities::default())
    }

    #[test]
    fn insert_find_remove() {
        let registry = JobRegistry::new(8);
        let rec = record(&registry, CommandCode::Echo);
        let id = rec.job_id;
        registry.insert(rec).unwrap();

        let handle = registry.find(id).unwrap();
        assert_eq!(handle.job_id, id);
        assert_eq!(handle.cmd_code, CommandCode::Echo);

        let removed = registry.remove(id).unwrap();
        assert_eq!(removed.job_id, id);
        assert!(registry.find(id).is_none());
        assert!(registry.remove(id).is_none());
    }

    #[test]
    fn duplicate_id_rejected() {
        let registry = JobRegistry::new(8);
        registry
            .insert(JobRecord::new(5, 0, CommandCode::Echo, JobCapabilities::default()))
            .unwrap();
        let result =
            registry.insert(JobRecord::new(5, 0, CommandCode::Exec, JobCapabilities::default()));

        match result {
            Err((JobError::DuplicateJobId { id }, rejected)) => {
                assert_eq!(id, 5);
                assert_eq!(rejected.cmd_code, CommandCode::Exec);
            }
            other => panic!("expected duplicate rejection, got {other:?}"),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn capacity_enforced() {
        let registry = JobRegistry::new(1);
        registry.insert(record(&registry, CommandCode::Wait)).unwrap();
        let result = registry.insert(record(&registry, CommandCode::Wait));
        assert!(matches!(result, Err((JobError::MaxJobsExceeded { max: 1 }, _))));
    }

    #[test]
    fn allocate_skips_live_ids() {
        let registry = JobRegistry::new(8);
        registry
            .insert(JobRecord::new(1, 0, CommandCode::Echo, JobCapabilities::default()))
            .unwrap();
        let id = registry.allocate_id();
        assert_ne!(id, 1);
        assert_ne!(id, 0);
    }

    #[test]
    fn find_and_take_by_cmd_code() {
        let registry = JobRegistry::new(8);
        registry.insert(record(&registry, CommandCode::Wait)).unwrap();
        registry.insert(record(&registry, CommandCode::Wait)).unwrap();
        registry.insert(record(&registry, CommandCode::Exec)).unwrap();

        assert_eq!(registry.find_all_by_cmd_code(CommandCode::Wait).len(), 2);
        assert!(registry.find_all_by_cmd_code(CommandCode::Echo).is_empty());

        let taken = registry.take_by_cmd_code(CommandCode::Wait);
        assert_eq!(taken.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn snapshot_is_ordered() {
        let registry = JobRegistry::new(8);
        for code in [CommandCode::Exec, CommandCode::Echo, CommandCode::Wait] {
            registry.insert(record(&registry, code)).unwrap();
        }
        let ids: Vec<u64> = registry.snapshot().iter().map(|j| j.job_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn find_matching_predicate_may_reenter_registry() {
        let registry = JobRegistry::new(8);
        registry.insert(record(&registry, CommandCode::Wait)).unwrap();
        registry.insert(record(&registry, CommandCode::Echo)).unwrap();

        // Locking again inside the predicate must not deadlock.
        let matched = registry.find_matching(|job| {
            registry.len() == 2 && registry.find(job.job_id).is_some()
        });
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn records_without_workers_are_not_reaped() {
        let registry = JobRegistry::new(8);
        registry.insert(record(&registry, CommandCode::Echo)).unwrap();
        assert!(registry.take_finished().is_empty());
        assert_eq!(registry.drain().len(), 1);
        assert!(registry.is_empty());
    }
}
