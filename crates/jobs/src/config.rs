//! Owner configuration.

use std::time::Duration;

use tracing::warn;

use crate::priority::NORMAL;

pub const DEFAULT_LOCK_LIFETIME: Duration = Duration::from_secs(10 * 60);

/// Configuration of an [`Agenda`](crate::Agenda).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgendaConfig {
    /// Written as `lastModifiedBy` on every save.
    pub name: Option<String>,
    /// How long a claim holds before other workers may take the job over.
    pub default_lock_lifetime: Duration,
    /// Priority for jobs created from a definition that sets none.
    pub default_priority: i32,
}

impl Default for AgendaConfig {
    fn default() -> Self {
        Self {
            name: None,
            default_lock_lifetime: DEFAULT_LOCK_LIFETIME,
            default_priority: NORMAL,
        }
    }
}

impl AgendaConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_lock_lifetime(mut self, lifetime: Duration) -> Self {
        self.default_lock_lifetime = lifetime;
        self
    }

    pub fn with_default_priority(mut self, priority: i32) -> Self {
        self.default_priority = priority;
        self
    }

    /// Read `AGENDUM_NAME` and `AGENDUM_LOCK_LIFETIME_MS` from the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(name) = lookup("AGENDUM_NAME").filter(|n| !n.trim().is_empty()) {
            config.name = Some(name);
        }

        if let Some(raw) = lookup("AGENDUM_LOCK_LIFETIME_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.default_lock_lifetime = Duration::from_millis(ms),
                _ => warn!(
                    value = %raw,
                    "AGENDUM_LOCK_LIFETIME_MS is not a positive integer; using default"
                ),
            }
        }

        config
    }
}
