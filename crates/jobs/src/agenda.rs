//! The owner of jobs: definitions, store, clock and configuration.
//!
//! Jobs keep an `Arc<Agenda>` to look up their handler and reach the store. The
//! reference lives beside the attributes, never inside them, so it is neither
//! tracked nor persisted.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use agendum_core::{Clock, JobId, SystemClock};

use crate::attrs::{JobAttrs, JobType, keys};
use crate::config::AgendaConfig;
use crate::error::JobResult;
use crate::events::{EventFanout, JobEvent, Subscription};
use crate::job::{Job, JobOptions};
use crate::priority::{PriorityValue, normalize_priority};
use crate::store::JobStore;

/// Job handler function type.
///
/// Receives the running job; an `Err` (or a panic) is recorded with `fail`.
pub type JobHandler = Arc<dyn Fn(&mut Job) -> anyhow::Result<()> + Send + Sync>;

/// Per-definition options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefinitionOptions {
    /// Priority given to jobs made with [`Agenda::create`].
    pub priority: Option<PriorityValue>,
    /// Overrides [`AgendaConfig::default_lock_lifetime`] for this job name.
    pub lock_lifetime: Option<Duration>,
}

impl DefinitionOptions {
    pub fn with_priority(mut self, priority: impl Into<PriorityValue>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    pub fn with_lock_lifetime(mut self, lifetime: Duration) -> Self {
        self.lock_lifetime = Some(lifetime);
        self
    }
}

struct JobDefinition {
    options: DefinitionOptions,
    handler: JobHandler,
}

/// Scheduler-side owner of jobs.
pub struct Agenda {
    config: AgendaConfig,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    definitions: RwLock<HashMap<String, JobDefinition>>,
    events: EventFanout,
}

impl std::fmt::Debug for Agenda {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let definitions: Vec<String> = self
            .definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("Agenda")
            .field("config", &self.config)
            .field("definitions", &definitions)
            .finish_non_exhaustive()
    }
}

/// Oldest `lockedAt` that still counts as a live claim.
pub(crate) fn stale_before(now: DateTime<Utc>, lifetime: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lifetime)
        .ok()
        .and_then(|lifetime| now.checked_sub_signed(lifetime))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl Agenda {
    /// Create an owner that reads wall-clock time.
    pub fn new(store: Arc<dyn JobStore>, config: AgendaConfig) -> Arc<Self> {
        Self::with_clock(store, Arc::new(SystemClock), config)
    }

    /// Create an owner with an injected clock.
    pub fn with_clock(
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
        config: AgendaConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            clock,
            definitions: RwLock::new(HashMap::new()),
            events: EventFanout::default(),
        })
    }

    pub fn config(&self) -> &AgendaConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Register the handler for jobs called `name`.
    pub fn define<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&mut Job) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.define_with(name, DefinitionOptions::default(), handler);
    }

    /// Register a handler with options. Redefining a name replaces it.
    pub fn define_with<F>(&self, name: impl Into<String>, options: DefinitionOptions, handler: F)
    where
        F: Fn(&mut Job) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(job_name = %name, "defining job");
        self.definitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                name,
                JobDefinition {
                    options,
                    handler: Arc::new(handler),
                },
            );
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub(crate) fn handler(&self, name: &str) -> Option<JobHandler> {
        self.definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|d| Arc::clone(&d.handler))
    }

    /// Lock lifetime for jobs called `name`.
    pub fn lock_lifetime(&self, name: &str) -> Duration {
        self.definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .and_then(|d| d.options.lock_lifetime)
            .unwrap_or(self.config.default_lock_lifetime)
    }

    /// Build a job from caller-supplied attributes.
    pub fn job(self: &Arc<Self>, options: JobOptions) -> Job {
        Job::new(Arc::clone(self), options)
    }

    /// New `normal` job carrying `data`, prioritized by its definition.
    pub fn create(self: &Arc<Self>, name: impl Into<String>, data: Value) -> Job {
        let name = name.into();
        let priority = self
            .definitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name)
            .and_then(|d| d.options.priority.clone())
            .map(|p| normalize_priority(Some(&p)))
            .unwrap_or(self.config.default_priority);

        self.job(
            JobOptions::named(name)
                .with_type(JobType::Normal)
                .with_priority(priority)
                .with_data(data),
        )
    }

    /// Rehydrate a stored job. Returns `None` when no record exists.
    pub fn load(self: &Arc<Self>, id: JobId) -> JobResult<Option<Job>> {
        let Some(document) = self.store.get(id)? else {
            return Ok(None);
        };
        let attrs = JobAttrs::from_document(document)?;
        Ok(Some(Job::rehydrate(Arc::clone(self), attrs)))
    }

    /// Jobs that are due now, highest priority first.
    ///
    /// Locks older than the default lock lifetime count as abandoned. Records
    /// that cannot be decoded are logged and left out.
    pub fn due(self: &Arc<Self>, limit: usize) -> JobResult<Vec<Job>> {
        let now = self.now();
        let documents = self.store.due(
            now,
            stale_before(now, self.config.default_lock_lifetime),
            limit,
        )?;
        let jobs: Vec<Job> = documents
            .into_iter()
            .filter_map(|document| {
                let id = document.get(keys::ID).cloned().unwrap_or(Value::Null);
                match JobAttrs::from_document(document) {
                    Ok(attrs) => Some(Job::rehydrate(Arc::clone(self), attrs)),
                    Err(e) => {
                        warn!(job_id = %id, error = %e, "skipping undecodable job record");
                        None
                    }
                }
            })
            .collect();
        info!(count = jobs.len(), "found due jobs");
        Ok(jobs)
    }

    /// Subscribe to lifecycle events of every job run through this owner.
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: JobEvent) {
        debug!(event = event.kind(), job_name = %event.name(), "job event");
        self.events.publish(event);
    }
}
