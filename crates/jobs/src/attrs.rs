//! Job attributes and dirty-attribute tracking.
//!
//! [`JobAttrs`] is the persisted shape of a job. [`TrackedAttrs`] owns it and
//! records the wire name of every attribute written through it, so a save can
//! send only the touched fields.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use agendum_core::{DomainError, DomainResult, JobId};

/// Wire names of the persisted attributes.
pub mod keys {
    pub const ID: &str = "id";
    pub const NAME: &str = "name";
    pub const TYPE: &str = "type";
    pub const PRIORITY: &str = "priority";
    pub const NEXT_RUN_AT: &str = "nextRunAt";
    pub const LAST_RUN_AT: &str = "lastRunAt";
    pub const LAST_FINISHED_AT: &str = "lastFinishedAt";
    pub const REPEAT_INTERVAL: &str = "repeatInterval";
    pub const REPEAT_TIMEZONE: &str = "repeatTimezone";
    pub const REPEAT_AT: &str = "repeatAt";
    pub const LOCKED_AT: &str = "lockedAt";
    pub const DISABLED: &str = "disabled";
    pub const UNIQUE: &str = "unique";
    pub const UNIQUE_OPTS: &str = "uniqueOpts";
    pub const FAILED_AT: &str = "failedAt";
    pub const FAIL_REASON: &str = "failReason";
    pub const FAIL_COUNT: &str = "failCount";
    pub const DATA: &str = "data";
    pub const LAST_MODIFIED_BY: &str = "lastModifiedBy";
}

/// How a job relates to other jobs of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// One-shot job.
    #[default]
    Once,
    /// At most one stored job per name; saves upsert onto it.
    Single,
    /// Regular job, any number per name.
    Normal,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Once => "once",
            JobType::Single => "single",
            JobType::Normal => "normal",
        }
    }
}

impl core::fmt::Display for JobType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options attached to a uniqueness constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniqueOptions {
    /// Only write the job when no match exists; never update a matching job.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub insert_only: bool,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// Persisted attributes of a job.
///
/// Keys not modelled here are kept in `extra` and written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAttrs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JobId>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<JobType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_opts: Option<UniqueOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub fail_count: u32,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobAttrs {
    /// Empty attribute set for a job called `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            job_type: None,
            priority: None,
            next_run_at: None,
            last_run_at: None,
            last_finished_at: None,
            repeat_interval: None,
            repeat_timezone: None,
            repeat_at: None,
            locked_at: None,
            disabled: false,
            unique: None,
            unique_opts: None,
            failed_at: None,
            fail_reason: None,
            fail_count: 0,
            data: Value::Null,
            last_modified_by: None,
            extra: Map::new(),
        }
    }

    /// Decode a stored record.
    pub fn from_document(doc: Map<String, Value>) -> DomainResult<Self> {
        serde_json::from_value(Value::Object(doc))
            .map_err(|e| DomainError::validation(format!("job record: {e}")))
    }

    /// Plain attribute snapshot; absent attributes are omitted.
    pub fn to_document(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Job type; a record stored without one behaves as `once`.
    pub fn job_type(&self) -> JobType {
        self.job_type.unwrap_or_default()
    }

    /// Priority; a record stored without one behaves as `0`.
    pub fn priority(&self) -> i32 {
        self.priority.unwrap_or(0)
    }

    /// Whether a recurrence rule drives `nextRunAt`.
    pub fn is_recurring(&self) -> bool {
        self.repeat_interval.is_some() || self.repeat_at.is_some()
    }
}

/// Attribute bag that records which attributes were written.
///
/// Reads never mark anything; every write marks its key, even when the value is
/// unchanged. The change-set is a list of candidates to persist, not a diff.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedAttrs {
    attrs: JobAttrs,
    changed: BTreeSet<String>,
}

macro_rules! tracked_setters {
    ($($setter:ident($field:ident: $ty:ty) => $key:expr;)*) => {
        impl TrackedAttrs {
            $(
                pub fn $setter(&mut self, value: $ty) {
                    self.changed.insert($key.to_string());
                    self.attrs.$field = value;
                }
            )*
        }
    };
}

tracked_setters! {
    set_name(name: String) => keys::NAME;
    set_job_type(job_type: Option<JobType>) => keys::TYPE;
    set_priority(priority: Option<i32>) => keys::PRIORITY;
    set_next_run_at(next_run_at: Option<DateTime<Utc>>) => keys::NEXT_RUN_AT;
    set_last_run_at(last_run_at: Option<DateTime<Utc>>) => keys::LAST_RUN_AT;
    set_last_finished_at(last_finished_at: Option<DateTime<Utc>>) => keys::LAST_FINISHED_AT;
    set_repeat_interval(repeat_interval: Option<String>) => keys::REPEAT_INTERVAL;
    set_repeat_timezone(repeat_timezone: Option<String>) => keys::REPEAT_TIMEZONE;
    set_repeat_at(repeat_at: Option<String>) => keys::REPEAT_AT;
    set_locked_at(locked_at: Option<DateTime<Utc>>) => keys::LOCKED_AT;
    set_disabled(disabled: bool) => keys::DISABLED;
    set_unique(unique: Option<Map<String, Value>>) => keys::UNIQUE;
    set_unique_opts(unique_opts: Option<UniqueOptions>) => keys::UNIQUE_OPTS;
    set_failed_at(failed_at: Option<DateTime<Utc>>) => keys::FAILED_AT;
    set_fail_reason(fail_reason: Option<String>) => keys::FAIL_REASON;
    set_fail_count(fail_count: u32) => keys::FAIL_COUNT;
    set_data(data: Value) => keys::DATA;
    set_last_modified_by(last_modified_by: Option<String>) => keys::LAST_MODIFIED_BY;
}

impl TrackedAttrs {
    /// Wrap attributes with an empty change-set (rehydration).
    pub fn clean(attrs: JobAttrs) -> Self {
        Self {
            attrs,
            changed: BTreeSet::new(),
        }
    }

    /// Read view.
    pub fn attrs(&self) -> &JobAttrs {
        &self.attrs
    }

    /// Current value of the attribute named `key`, if present.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.attrs.to_document().remove(key)
    }

    /// Write the attribute named `key` from a JSON value.
    ///
    /// Works for modelled attributes and arbitrary data fields alike. The value
    /// must decode into the attribute's type. The durable key is not writable.
    pub fn set(&mut self, key: &str, value: Value) -> DomainResult<()> {
        if key == keys::ID {
            return Err(DomainError::validation("the job id is assigned by the store"));
        }
        let mut doc = self.attrs.to_document();
        if value.is_null() {
            doc.remove(key);
        } else {
            doc.insert(key.to_string(), value);
        }
        self.attrs = JobAttrs::from_document(doc)?;
        self.changed.insert(key.to_string());
        Ok(())
    }

    /// Names of attributes written since the last clear.
    pub fn changed_props(&self) -> Vec<&str> {
        self.changed.iter().map(String::as_str).collect()
    }

    pub fn is_dirty(&self) -> bool {
        !self.changed.is_empty()
    }

    pub fn clear_changes(&mut self) {
        self.changed.clear();
    }

    /// Return the change-set and leave it empty.
    pub fn take_changes(&mut self) -> BTreeSet<String> {
        std::mem::take(&mut self.changed)
    }

    /// Patch holding the current value of each key in `changed`; attributes
    /// that are now absent appear as `null` (unset).
    pub fn patch_for(&self, changed: &BTreeSet<String>) -> Map<String, Value> {
        let mut doc = self.attrs.to_document();
        changed
            .iter()
            .filter(|key| key.as_str() != keys::ID)
            .map(|key| (key.clone(), doc.remove(key).unwrap_or(Value::Null)))
            .collect()
    }

    /// Put back changes whose write failed so the next save retries them.
    pub(crate) fn restore_changes(&mut self, changes: BTreeSet<String>) {
        self.changed.extend(changes);
    }

    /// Apply a mutation that the store already holds; nothing is marked.
    pub(crate) fn apply_persisted(&mut self, f: impl FnOnce(&mut JobAttrs)) {
        f(&mut self.attrs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn sample() -> TrackedAttrs {
        TrackedAttrs::clean(JobAttrs::named("email"))
    }

    #[test]
    fn reads_never_dirty() {
        let attrs = sample();
        let _ = attrs.attrs().name.clone();
        let _ = attrs.get(keys::NAME);
        let _ = attrs.get("missing");
        assert!(attrs.changed_props().is_empty());
    }

    #[test]
    fn writes_mark_their_key_once() {
        let mut attrs = sample();
        attrs.set_priority(Some(10));
        attrs.set_priority(Some(10));
        attrs.set_disabled(true);

        assert_eq!(attrs.changed_props(), vec![keys::DISABLED, keys::PRIORITY]);
    }

    #[test]
    fn clearing_keeps_values() {
        let mut attrs = sample();
        attrs.set_priority(Some(-5));
        attrs.clear_changes();

        assert!(!attrs.is_dirty());
        assert_eq!(attrs.attrs().priority(), -5);
        assert_eq!(attrs.get(keys::PRIORITY), Some(Value::from(-5)));
    }

    #[test]
    fn generic_set_handles_modelled_and_extra_keys() {
        let mut attrs = sample();
        attrs.set(keys::PRIORITY, Value::from(7)).unwrap();
        attrs.set("tenant", Value::from("acme")).unwrap();

        assert_eq!(attrs.attrs().priority(), 7);
        assert_eq!(attrs.attrs().extra.get("tenant"), Some(&Value::from("acme")));
        assert_eq!(attrs.changed_props(), vec![keys::PRIORITY, "tenant"]);
    }

    #[test]
    fn generic_set_rejects_mistyped_values_and_the_id() {
        let mut attrs = sample();
        assert!(attrs.set(keys::PRIORITY, Value::from("high")).is_err());
        assert!(attrs.set(keys::ID, Value::from("x")).is_err());
        assert!(!attrs.is_dirty());
        assert_eq!(attrs.attrs().priority(), 0);
    }

    #[test]
    fn patch_unsets_cleared_attributes() {
        let mut attrs = sample();
        attrs.set_locked_at(Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        attrs.clear_changes();
        attrs.set_locked_at(None);
        attrs.set_fail_count(2);

        let changes = attrs.take_changes();
        let patch = attrs.patch_for(&changes);

        assert_eq!(patch.get(keys::LOCKED_AT), Some(&Value::Null));
        assert_eq!(patch.get(keys::FAIL_COUNT), Some(&Value::from(2)));
        assert_eq!(patch.len(), 2);
        assert!(!attrs.is_dirty());
    }

    #[test]
    fn document_uses_wire_names_and_omits_absent_fields() {
        let mut attrs = JobAttrs::named("report");
        attrs.next_run_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap());
        attrs.job_type = Some(JobType::Single);
        attrs.data = serde_json::json!({"to": "ops"});

        let doc = attrs.to_document();
        assert_eq!(doc.get("type"), Some(&Value::from("single")));
        assert!(doc.contains_key("nextRunAt"));
        assert!(!doc.contains_key("lockedAt"));
        assert!(!doc.contains_key("disabled"));
        assert!(!doc.contains_key("failCount"));

        let back = JobAttrs::from_document(doc).unwrap();
        assert_eq!(back, attrs);
    }

    #[test]
    fn unknown_stored_keys_survive_rehydration() {
        let mut doc = Map::new();
        doc.insert("name".into(), Value::from("sync"));
        doc.insert("legacyFlag".into(), Value::from(true));

        let attrs = JobAttrs::from_document(doc).unwrap();
        assert_eq!(attrs.extra.get("legacyFlag"), Some(&Value::from(true)));
        assert!(attrs.to_document().contains_key("legacyFlag"));
    }

    proptest! {
        /// Property: the change-set is exactly the set of written keys.
        #[test]
        fn change_set_tracks_written_keys(writes in prop::collection::vec(0usize..4, 0..16)) {
            let mut attrs = sample();
            let mut expected = BTreeSet::new();
            for w in writes {
                match w {
                    0 => { attrs.set_priority(Some(1)); expected.insert(keys::PRIORITY); }
                    1 => { attrs.set_disabled(true); expected.insert(keys::DISABLED); }
                    2 => {
                        attrs.set_repeat_at(Some("noon".into()));
                        expected.insert(keys::REPEAT_AT);
                    }
                    _ => { let _ = attrs.get(keys::NAME); }
                }
            }
            let got: BTreeSet<&str> = attrs.changed_props().into_iter().collect();
            prop_assert_eq!(got, expected);
        }
    }
}
