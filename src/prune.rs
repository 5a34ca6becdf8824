use crate::error::{ConfigError, StorageError};
use crate::store::RecordStore;
use crate::types::WebhookCall;
use chrono::{DateTime, TimeDelta, Utc};

/// How long webhook calls are kept. Validated once when the pruner is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    days: u32,
}

impl RetentionPolicy {
    pub fn new(days: u32) -> Self {
        Self { days }
    }

    /// Validate the raw `delete_after_days` setting.
    pub fn from_setting(value: Option<&toml::Value>) -> Result<Self, ConfigError> {
        match value {
            Some(toml::Value::Integer(days)) => u32::try_from(*days)
                .map(Self::new)
                .map_err(|_| ConfigError::InvalidPrunable(days.to_string())),
            Some(other) => Err(ConfigError::InvalidPrunable(other.to_string())),
            None => Err(ConfigError::InvalidPrunable("nothing".to_string())),
        }
    }

    pub fn days(&self) -> u32 {
        self.days
    }
}

/// Matches calls created before a cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneSelector {
    pub cutoff: DateTime<Utc>,
}

impl PruneSelector {
    pub fn matches(&self, call: &WebhookCall) -> bool {
        call.created_at() < self.cutoff
    }
}

pub struct Pruner {
    policy: RetentionPolicy,
}

impl Pruner {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self { policy }
    }

    /// A window reaching past the earliest representable time matches nothing.
    pub fn select_prunable(&self, now: DateTime<Utc>) -> PruneSelector {
        let cutoff = TimeDelta::try_days(i64::from(self.policy.days))
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        PruneSelector { cutoff }
    }

    /// Delete every call older than the retention window.
    ///
    /// Attachment blobs referenced by the deleted calls are left in place.
    pub fn prune(&self, records: &mut dyn RecordStore, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let selector = self.select_prunable(now);
        let deleted = records.delete_older_than(selector.cutoff)?;
        tracing::info!(deleted, cutoff = %selector.cutoff, "pruned webhook calls");
        Ok(deleted)
    }
}
