//! Persistent job scheduling: the job entity, its recurrence rules and the
//! store it is saved to.
//!
//! An [`Agenda`] owns handler definitions, a [`JobStore`] and a clock. Jobs
//! created from it track which attributes changed so saves are partial.

pub mod agenda;
pub mod attrs;
pub mod config;
pub mod error;
pub mod events;
pub mod interval;
pub mod job;
pub mod priority;
pub mod store;
pub mod when;

pub use agenda::{Agenda, DefinitionOptions, JobHandler};
pub use attrs::{JobAttrs, JobType, TrackedAttrs, UniqueOptions, keys};
pub use config::AgendaConfig;
pub use error::{JobError, JobResult};
pub use events::{JobEvent, Subscription};
pub use interval::RepeatInterval;
pub use job::{Job, JobOptions, RepeatOptions, RunOutcome};
pub use priority::PriorityValue;
pub use store::{InMemoryJobStore, JobDocument, JobStore, JobStoreError, StoredJob};
pub use when::ScheduleAt;
