//! `agendum-core`: primitives shared by the job system.
//!
//! This crate is **pure**: identifiers, the injectable time source and the
//! configuration error model. No storage or runtime concerns live here.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::JobId;
