//! Job persistence contract and the in-memory reference store.
//!
//! Records are plain JSON documents keyed by [`JobId`]. Writers send patches
//! holding only the attributes they changed, so two workers holding the same
//! job never clobber each other's fields.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use agendum_core::JobId;

use crate::attrs::keys;

/// A stored job record.
pub type JobDocument = Map<String, Value>;

/// Result of an upsert: the durable key and the record as stored afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredJob {
    pub id: JobId,
    pub document: JobDocument,
}

/// Job store abstraction.
///
/// Patch semantics everywhere: a `null` value unsets the key, any other value
/// overwrites it, keys not in the patch are left alone.
pub trait JobStore: Send + Sync {
    /// Insert a new record; the store assigns the id.
    fn insert(&self, document: JobDocument) -> Result<JobId, JobStoreError>;

    /// Apply a patch to an existing record.
    fn update(&self, id: JobId, patch: &JobDocument) -> Result<(), JobStoreError>;

    /// Upsert the single job named `name` (type `single`).
    ///
    /// `set` is applied in both cases; `set_on_insert` only when no record
    /// exists yet.
    fn upsert_single(
        &self,
        name: &str,
        set: &JobDocument,
        set_on_insert: &JobDocument,
    ) -> Result<StoredJob, JobStoreError>;

    /// Upsert the record matching `query` (dotted paths reach into nested
    /// values). With `insert_only`, an existing match is returned untouched.
    fn upsert_unique(
        &self,
        query: &JobDocument,
        document: &JobDocument,
        insert_only: bool,
    ) -> Result<StoredJob, JobStoreError>;

    /// Conditionally lock a record: succeeds only if it is enabled and its
    /// `lockedAt` is absent or not after `stale_before`.
    fn claim(
        &self,
        id: JobId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, JobStoreError>;

    /// Get a record by id.
    fn get(&self, id: JobId) -> Result<Option<JobDocument>, JobStoreError>;

    /// Delete a record. Returns whether it existed.
    fn remove(&self, id: JobId) -> Result<bool, JobStoreError>;

    /// Enabled, unlocked (or stale-locked) records with `nextRunAt <= now`,
    /// highest priority first, then earliest `nextRunAt`.
    fn due(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<JobDocument>, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobDocument>>,
    writes: AtomicU64,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of write operations applied so far (inserts, updates, upserts,
    /// claims, removals).
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.jobs.read().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> JobStoreError {
        JobStoreError::Storage("job store lock poisoned".to_string())
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn insert_locked(
        jobs: &mut HashMap<JobId, JobDocument>,
        mut document: JobDocument,
    ) -> StoredJob {
        let id = JobId::new();
        document.retain(|_, v| !v.is_null());
        document.insert(keys::ID.to_string(), Value::String(id.to_string()));
        jobs.insert(id, document.clone());
        StoredJob { id, document }
    }
}

fn apply_patch(document: &mut JobDocument, patch: &JobDocument) {
    for (key, value) in patch {
        if key == keys::ID {
            continue;
        }
        if value.is_null() {
            document.remove(key);
        } else {
            document.insert(key.clone(), value.clone());
        }
    }
}

fn lookup<'a>(document: &'a JobDocument, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn matches_query(document: &JobDocument, query: &JobDocument) -> bool {
    query
        .iter()
        .all(|(path, expected)| lookup(document, path) == Some(expected))
}

fn timestamp(document: &JobDocument, key: &str) -> Option<DateTime<Utc>> {
    document
        .get(key)
        .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v.clone()).ok())
}

fn is_disabled(document: &JobDocument) -> bool {
    document
        .get(keys::DISABLED)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn is_claimable(document: &JobDocument, stale_before: DateTime<Utc>) -> bool {
    !is_disabled(document)
        && timestamp(document, keys::LOCKED_AT).map_or(true, |locked| locked <= stale_before)
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, document: JobDocument) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        if let Some(id) = document
            .get(keys::ID)
            .and_then(|v| serde_json::from_value::<JobId>(v.clone()).ok())
        {
            if jobs.contains_key(&id) {
                return Err(JobStoreError::AlreadyExists(id));
            }
        }
        let stored = Self::insert_locked(&mut jobs, document);
        self.record_write();
        Ok(stored.id)
    }

    fn update(&self, id: JobId, patch: &JobDocument) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        let document = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        apply_patch(document, patch);
        self.record_write();
        Ok(())
    }

    fn upsert_single(
        &self,
        name: &str,
        set: &JobDocument,
        set_on_insert: &JobDocument,
    ) -> Result<StoredJob, JobStoreError> {
        let mut query = JobDocument::new();
        query.insert(keys::NAME.to_string(), Value::from(name));
        query.insert(keys::TYPE.to_string(), Value::from("single"));

        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        self.record_write();

        if let Some((id, document)) = jobs
            .iter_mut()
            .find(|(_, document)| matches_query(document, &query))
        {
            apply_patch(document, set);
            return Ok(StoredJob {
                id: *id,
                document: document.clone(),
            });
        }

        let mut document = set_on_insert.clone();
        apply_patch(&mut document, set);
        document.extend(query);
        Ok(Self::insert_locked(&mut jobs, document))
    }

    fn upsert_unique(
        &self,
        query: &JobDocument,
        document: &JobDocument,
        insert_only: bool,
    ) -> Result<StoredJob, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;

        if let Some((id, existing)) = jobs
            .iter_mut()
            .find(|(_, existing)| matches_query(existing, query))
        {
            if !insert_only {
                apply_patch(existing, document);
                self.record_write();
            }
            return Ok(StoredJob {
                id: *id,
                document: existing.clone(),
            });
        }

        self.record_write();
        Ok(Self::insert_locked(&mut jobs, document.clone()))
    }

    fn claim(
        &self,
        id: JobId,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        let document = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        if !is_claimable(document, stale_before) {
            return Ok(false);
        }
        let locked_at = serde_json::to_value(now)
            .map_err(|e| JobStoreError::Storage(format!("encode lockedAt: {e}")))?;
        document.insert(keys::LOCKED_AT.to_string(), locked_at);
        self.record_write();
        Ok(true)
    }

    fn get(&self, id: JobId) -> Result<Option<JobDocument>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        Ok(jobs.get(&id).cloned())
    }

    fn remove(&self, id: JobId) -> Result<bool, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        let existed = jobs.remove(&id).is_some();
        if existed {
            self.record_write();
        }
        Ok(existed)
    }

    fn due(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<JobDocument>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        let mut candidates: Vec<(i64, DateTime<Utc>, &JobDocument)> = jobs
            .values()
            .filter(|document| is_claimable(document, stale_before))
            .filter_map(|document| {
                let next_run_at = timestamp(document, keys::NEXT_RUN_AT)?;
                let priority = document
                    .get(keys::PRIORITY)
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                (next_run_at <= now).then_some((priority, next_run_at, document))
            })
            .collect();

        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        candidates.truncate(limit);
        Ok(candidates.into_iter().map(|(_, _, d)| d.clone()).collect())
    }
}
