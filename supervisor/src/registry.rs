use crate::types::{DatasetId, JobRecord};
use std::collections::HashMap;

/// In-memory index of launched inference workers, one per dataset.
///
/// A plain data holder: it never talks to the OS, so every entry may point
/// at a process that has since exited. Exclusive access comes from ownership,
/// the supervisor actor is the only owner.
#[derive(Debug, Default)]
pub struct Registry {
    jobs: HashMap<DatasetId, JobRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, returning whatever was tracked for the dataset before.
    pub fn put(&mut self, record: JobRecord) -> Option<JobRecord> {
        self.jobs.insert(record.dataset_id.clone(), record)
    }

    pub fn get(&self, dataset_id: &str) -> Option<&JobRecord> {
        self.jobs.get(dataset_id)
    }

    pub fn get_mut(&mut self, dataset_id: &str) -> Option<&mut JobRecord> {
        self.jobs.get_mut(dataset_id)
    }

    pub fn remove(&mut self, dataset_id: &str) -> Option<JobRecord> {
        self.jobs.remove(dataset_id)
    }

    /// Snapshot of every record, ordered by dataset id.
    pub fn list_all(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self.jobs.values().cloned().collect();
        records.sort_by(|a, b| a.dataset_id.cmp(&b.dataset_id));
        records
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
