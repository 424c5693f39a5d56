//! The job entity.
//!
//! A [`Job`] owns its [`TrackedAttrs`] and a reference to its [`Agenda`]. Every
//! lifecycle operation mutates attributes through the tracker, so `save` can
//! send only what changed.

use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use agendum_core::{DomainResult, JobId};

use crate::agenda::{Agenda, stale_before};
use crate::attrs::{JobAttrs, JobType, TrackedAttrs, UniqueOptions, keys};
use crate::error::{JobError, JobResult};
use crate::events::JobEvent;
use crate::interval::{RepeatInterval, parse_timezone};
use crate::priority::{PriorityValue, normalize_priority};
use crate::store::JobDocument;
use crate::when::{ScheduleAt, next_time_of_day, parse_time_of_day};

/// Caller-supplied attributes for a new job. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub job_type: Option<JobType>,
    #[serde(default)]
    pub priority: Option<PriorityValue>,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub repeat_interval: Option<String>,
    #[serde(default)]
    pub repeat_timezone: Option<String>,
    #[serde(default)]
    pub repeat_at: Option<String>,
    #[serde(default)]
    pub locked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub disabled: Option<bool>,
    #[serde(default)]
    pub unique: Option<Map<String, Value>>,
    #[serde(default)]
    pub unique_opts: Option<UniqueOptions>,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fail_reason: Option<String>,
    #[serde(default)]
    pub fail_count: Option<u32>,
    #[serde(default)]
    pub data: Option<Value>,
    /// Arbitrary data fields stored beside the modelled attributes.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, job_type: JobType) -> Self {
        self.job_type = Some(job_type);
        self
    }

    pub fn with_priority(mut self, priority: impl Into<PriorityValue>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    pub fn with_next_run_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_run_at = Some(at);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Options for [`Job::repeat_every`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepeatOptions {
    /// IANA zone in which cron fields and times of day are read.
    pub timezone: Option<String>,
    /// Compute the next run right away instead of running at the current `nextRunAt`.
    pub skip_immediate: bool,
}

impl RepeatOptions {
    pub fn in_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn skip_immediate(mut self) -> Self {
        self.skip_immediate = true;
        self
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed { reason: String },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded)
    }
}

/// A persistable unit of scheduled work.
#[derive(Debug)]
pub struct Job {
    agenda: Arc<Agenda>,
    attrs: TrackedAttrs,
    removed: bool,
}

impl Job {
    /// Build a new job: priority is normalized, `nextRunAt` defaults to now and
    /// `type` to `once`. Every supplied attribute starts out dirty.
    pub(crate) fn new(agenda: Arc<Agenda>, options: JobOptions) -> Self {
        let now = agenda.now();
        let mut attrs = TrackedAttrs::clean(JobAttrs::named(String::new()));

        attrs.set_name(options.name);
        attrs.set_priority(Some(normalize_priority(options.priority.as_ref())));
        attrs.set_next_run_at(Some(options.next_run_at.unwrap_or(now)));
        attrs.set_job_type(Some(options.job_type.unwrap_or_default()));

        if options.last_run_at.is_some() {
            attrs.set_last_run_at(options.last_run_at);
        }
        if options.last_finished_at.is_some() {
            attrs.set_last_finished_at(options.last_finished_at);
        }
        if options.repeat_interval.is_some() {
            attrs.set_repeat_interval(options.repeat_interval);
        }
        if options.repeat_timezone.is_some() {
            attrs.set_repeat_timezone(options.repeat_timezone);
        }
        if options.repeat_at.is_some() {
            attrs.set_repeat_at(options.repeat_at);
        }
        if options.locked_at.is_some() {
            attrs.set_locked_at(options.locked_at);
        }
        if let Some(disabled) = options.disabled {
            attrs.set_disabled(disabled);
        }
        if options.unique.is_some() {
            attrs.set_unique(options.unique);
        }
        if options.unique_opts.is_some() {
            attrs.set_unique_opts(options.unique_opts);
        }
        if options.failed_at.is_some() {
            attrs.set_failed_at(options.failed_at);
        }
        if options.fail_reason.is_some() {
            attrs.set_fail_reason(options.fail_reason);
        }
        if let Some(count) = options.fail_count {
            attrs.set_fail_count(count);
        }
        if let Some(data) = options.data {
            attrs.set_data(data);
        }
        for (key, value) in options.extra {
            if let Err(e) = attrs.set(&key, value) {
                warn!(field = %key, error = %e, "ignoring job field");
            }
        }

        Self {
            agenda,
            attrs,
            removed: false,
        }
    }

    /// Restore a stored job verbatim, with an empty change-set.
    pub(crate) fn rehydrate(agenda: Arc<Agenda>, attrs: JobAttrs) -> Self {
        Self {
            agenda,
            attrs: TrackedAttrs::clean(attrs),
            removed: false,
        }
    }

    pub fn id(&self) -> Option<JobId> {
        self.attrs.attrs().id
    }

    pub fn name(&self) -> &str {
        &self.attrs.attrs().name
    }

    pub fn attrs(&self) -> &JobAttrs {
        self.attrs.attrs()
    }

    /// Tracked attributes, for direct assignment.
    pub fn attrs_mut(&mut self) -> &mut TrackedAttrs {
        &mut self.attrs
    }

    pub fn tracked(&self) -> &TrackedAttrs {
        &self.attrs
    }

    pub fn changed_props(&self) -> Vec<&str> {
        self.attrs.changed_props()
    }

    pub fn agenda(&self) -> &Arc<Agenda> {
        &self.agenda
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    fn ensure_live(&self) -> JobResult<()> {
        if self.removed {
            return Err(JobError::Removed(self.id()));
        }
        Ok(())
    }

    /// Set `nextRunAt` from an instant or a time expression. Does not save.
    pub fn schedule(&mut self, when: impl Into<ScheduleAt>) -> DomainResult<&mut Self> {
        let tz = parse_timezone(self.attrs().repeat_timezone.as_deref())?;
        let at = when.into().resolve(self.agenda.now(), tz)?;
        self.attrs.set_next_run_at(Some(at));
        Ok(self)
    }

    /// Repeat on a cron expression or human interval.
    pub fn repeat_every(
        &mut self,
        interval: impl Into<String>,
        options: RepeatOptions,
    ) -> &mut Self {
        self.attrs.set_repeat_interval(Some(interval.into()));
        self.attrs.set_repeat_timezone(options.timezone);

        if options.skip_immediate {
            let previous = self.attrs().last_run_at;
            self.attrs.set_last_run_at(Some(self.agenda.now()));
            self.compute_next_run_at();
            self.attrs.set_last_run_at(previous);
        }
        self
    }

    /// Repeat daily at a time of day (`"3:30pm"`, `"noon"`, `"15:00"`).
    pub fn repeat_at(&mut self, time: impl Into<String>) -> &mut Self {
        self.attrs.set_repeat_at(Some(time.into()));
        self
    }

    /// Recompute `nextRunAt` from the recurrence rule.
    ///
    /// The reference point is `lastRunAt`, or now when the job never ran. A rule
    /// that cannot be evaluated clears `nextRunAt` and fails the job.
    /// Non-recurring jobs are left untouched.
    pub fn compute_next_run_at(&mut self) -> &mut Self {
        let attrs = self.attrs();
        let reference = attrs.last_run_at.unwrap_or_else(|| self.agenda.now());

        let next = if let Some(interval) = attrs.repeat_interval.clone() {
            next_from_interval(&interval, attrs.repeat_timezone.as_deref(), reference)
        } else if let Some(time) = attrs.repeat_at.clone() {
            next_from_repeat_at(&time, attrs.repeat_timezone.as_deref(), reference)
        } else {
            return self;
        };

        match next {
            Ok(at) => {
                debug!(
                    job_id = ?self.id(),
                    job_name = %self.name(),
                    next_run_at = %at,
                    "computed next run"
                );
                self.attrs.set_next_run_at(Some(at));
            }
            Err(reason) => {
                warn!(
                    job_id = ?self.id(),
                    job_name = %self.name(),
                    reason = %reason,
                    "cannot compute next run"
                );
                self.attrs.set_next_run_at(None);
                self.fail(reason);
            }
        }
        self
    }

    /// Record a uniqueness constraint for the next insert.
    pub fn unique(&mut self, query: Map<String, Value>, options: UniqueOptions) -> &mut Self {
        self.attrs.set_unique(Some(query));
        self.attrs.set_unique_opts(Some(options));
        self
    }

    pub fn priority(&mut self, value: impl Into<PriorityValue>) -> &mut Self {
        let value = value.into();
        self.attrs.set_priority(Some(normalize_priority(Some(&value))));
        self
    }

    pub fn disable(&mut self) -> &mut Self {
        self.attrs.set_disabled(true);
        self
    }

    pub fn enable(&mut self) -> &mut Self {
        self.attrs.set_disabled(false);
        self
    }

    /// Record a failure. Never fails itself.
    pub fn fail(&mut self, reason: impl Display) -> &mut Self {
        let mut reason = reason.to_string();
        if reason.trim().is_empty() {
            reason = "unknown failure".to_string();
        }
        let now = self.agenda.now();
        let count = self.attrs().fail_count.saturating_add(1);

        self.attrs.set_fail_reason(Some(reason.clone()));
        self.attrs.set_fail_count(count);
        self.attrs.set_failed_at(Some(now));
        self.attrs.set_last_finished_at(Some(now));

        debug!(
            job_id = ?self.id(),
            job_name = %self.name(),
            fail_count = count,
            reason = %reason,
            "job failed"
        );
        self
    }

    /// Whether a run started and has not finished yet.
    pub fn is_running(&self) -> bool {
        match (self.attrs().last_run_at, self.attrs().last_finished_at) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(started), Some(finished)) => started > finished,
        }
    }

    /// Take the lock on this job if no live claim exists. Saves first when the
    /// job has never been stored.
    pub fn claim(&mut self) -> JobResult<bool> {
        self.ensure_live()?;
        if self.id().is_none() {
            self.save()?;
        }
        let Some(id) = self.id() else {
            return Ok(false);
        };

        let now = self.agenda.now();
        let lifetime = self.agenda.lock_lifetime(self.name());
        let claimed = self
            .agenda
            .store()
            .claim(id, now, stale_before(now, lifetime))?;

        if claimed {
            self.attrs.apply_persisted(|attrs| attrs.locked_at = Some(now));
            debug!(job_id = %id, job_name = %self.name(), "claimed job");
        }
        Ok(claimed)
    }

    /// Execute the job's handler and persist the bookkeeping around it.
    ///
    /// Handler errors, panics and a missing definition end in `fail`; only
    /// store failures are returned as `Err`.
    pub fn run(&mut self) -> JobResult<RunOutcome> {
        self.ensure_live()?;
        let agenda = Arc::clone(&self.agenda);

        self.attrs.set_last_run_at(Some(agenda.now()));
        if self.attrs().is_recurring() {
            self.compute_next_run_at();
        } else {
            self.attrs.set_next_run_at(None);
        }
        self.save()?;

        let id = self.id();
        let name = self.name().to_string();
        agenda.publish(JobEvent::Start {
            id,
            name: name.clone(),
        });

        let result = match agenda.handler(&name) {
            None => Err(format!("undefined job: no definition for {name:?}")),
            Some(handler) => match panic::catch_unwind(AssertUnwindSafe(|| handler(self))) {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(format!("{err:#}")),
                Err(payload) => Err(panic_reason(payload.as_ref())),
            },
        };

        let outcome = match result {
            Ok(()) => {
                self.attrs.set_last_finished_at(Some(agenda.now()));
                RunOutcome::Succeeded
            }
            Err(reason) => {
                warn!(job_id = ?id, job_name = %name, reason = %reason, "job run failed");
                self.fail(&reason);
                RunOutcome::Failed { reason }
            }
        };

        self.attrs.set_locked_at(None);
        let saved = if self.removed { Ok(()) } else { self.save() };

        match &outcome {
            RunOutcome::Succeeded => agenda.publish(JobEvent::Success {
                id,
                name: name.clone(),
            }),
            RunOutcome::Failed { reason } => agenda.publish(JobEvent::Fail {
                id,
                name: name.clone(),
                reason: reason.clone(),
            }),
        }
        agenda.publish(JobEvent::Complete { id, name });

        saved?;
        Ok(outcome)
    }

    /// Persist changed attributes.
    ///
    /// A stored job sends only its dirty attributes. A new job is inserted, or
    /// upserted when it is `single` or carries a unique constraint. Saving a
    /// stored job with nothing dirty does not touch the store.
    pub fn save(&mut self) -> JobResult<()> {
        self.ensure_live()?;

        if let Some(id) = self.id() {
            if !self.attrs.is_dirty() {
                debug!(job_id = %id, "nothing to save");
                return Ok(());
            }
            self.stamp_modified_by();
            let changes = self.attrs.take_changes();
            let patch = without_constraints(self.attrs.patch_for(&changes));

            if let Err(e) = self.agenda.store().update(id, &patch) {
                error!(job_id = %id, error = %e, "failed to save job");
                self.attrs.restore_changes(changes);
                return Err(e.into());
            }
            debug!(job_id = %id, fields = ?changes, "saved job changes");
            return Ok(());
        }

        self.stamp_modified_by();
        let now = self.agenda.now();
        let store = Arc::clone(self.agenda.store());
        let attrs = self.attrs();
        let mut document = without_constraints(attrs.to_document());

        let stored = if attrs.job_type() == JobType::Single {
            let mut set_on_insert = JobDocument::new();
            if attrs.next_run_at.is_some_and(|at| at <= now) {
                if let Some(next) = document.remove(keys::NEXT_RUN_AT) {
                    set_on_insert.insert(keys::NEXT_RUN_AT.to_string(), next);
                }
            }
            Some(store.upsert_single(&attrs.name, &document, &set_on_insert))
        } else if let Some(query) = attrs.unique.as_ref() {
            let insert_only = attrs.unique_opts.as_ref().is_some_and(|o| o.insert_only);
            Some(store.upsert_unique(query, &document, insert_only))
        } else {
            None
        };

        match stored {
            Some(result) => {
                let stored = result.inspect_err(|e| {
                    error!(job_name = %self.name(), error = %e, "failed to save job")
                })?;
                let mut adopted = JobAttrs::from_document(stored.document)?;
                adopted.unique = self.attrs().unique.clone();
                adopted.unique_opts = self.attrs().unique_opts.clone();
                self.attrs.apply_persisted(|attrs| *attrs = adopted);
            }
            None => {
                let id = store
                    .insert(document)
                    .inspect_err(|e| {
                        error!(job_name = %self.name(), error = %e, "failed to save job")
                    })?;
                self.attrs.apply_persisted(|attrs| attrs.id = Some(id));
            }
        }

        self.attrs.clear_changes();
        info!(job_id = ?self.id(), job_name = %self.name(), "stored new job");
        Ok(())
    }

    /// Delete the stored record. The job stays readable but can no longer be
    /// saved or run.
    pub fn remove(&mut self) -> JobResult<bool> {
        let existed = match self.id() {
            Some(id) => self.agenda.store().remove(id)?,
            None => false,
        };
        self.removed = true;
        info!(job_id = ?self.id(), job_name = %self.name(), existed, "removed job");
        Ok(existed)
    }

    /// Renew the lock so the job is not taken over as abandoned.
    pub fn touch(&mut self) -> JobResult<()> {
        self.ensure_live()?;
        self.attrs.set_locked_at(Some(self.agenda.now()));
        self.save()
    }

    /// Plain snapshot of every persisted attribute.
    pub fn to_json(&self) -> Value {
        Value::Object(self.attrs().to_document())
    }

    fn stamp_modified_by(&mut self) {
        if let Some(name) = self.agenda.config().name.clone() {
            self.attrs.set_last_modified_by(Some(name));
        }
    }
}

/// Unique constraints steer the insert; they are not stored on the record.
fn without_constraints(mut document: JobDocument) -> JobDocument {
    document.remove(keys::UNIQUE);
    document.remove(keys::UNIQUE_OPTS);
    document
}

fn next_from_interval(
    interval: &str,
    timezone: Option<&str>,
    reference: DateTime<Utc>,
) -> Result<DateTime<Utc>, String> {
    let tz = parse_timezone(timezone)
        .map_err(|e| format!("failed to calculate nextRunAt due to invalid timezone: {e}"))?;
    RepeatInterval::parse(interval)
        .ok()
        .and_then(|interval| interval.next_after(reference, tz))
        .ok_or_else(|| {
            format!("failed to calculate nextRunAt due to invalid repeat interval {interval:?}")
        })
}

fn next_from_repeat_at(
    time: &str,
    timezone: Option<&str>,
    reference: DateTime<Utc>,
) -> Result<DateTime<Utc>, String> {
    let tz = parse_timezone(timezone)
        .map_err(|e| format!("failed to calculate repeatAt time due to invalid timezone: {e}"))?;
    parse_time_of_day(time)
        .ok()
        .and_then(|time| next_time_of_day(time, reference, tz))
        .ok_or_else(|| format!("failed to calculate repeatAt time due to invalid format {time:?}"))
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("handler panicked: {message}")
}
