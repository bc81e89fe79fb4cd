use chrono::{DateTime, Months, Utc};
use custodian_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

use crate::resource::validated_token;

/// Longest supported retention duration.
pub const RETENTION_MAX_YEARS: u16 = 100;

/// Retention class tag, for example `clinical-adult`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct RetentionClass(String);

impl RetentionClass {
    /// Creates a validated retention class.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        validated_token("retention class", value.into(), 64, false).map(Self)
    }

    /// Returns the class tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for RetentionClass {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Terminal handling applied when retention elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispositionAction {
    /// Irreversible deletion from the resource store.
    Delete,
    /// Move to cold, append-only archival storage.
    Archive,
}

impl DispositionAction {
    /// Returns a stable storage value for this action.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Archive => "archive",
        }
    }

    /// Parses a storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "delete" => Ok(Self::Delete),
            "archive" => Ok(Self::Archive),
            _ => Err(AppError::Validation(format!(
                "unknown disposition action '{value}'"
            ))),
        }
    }
}

/// One immutable version of a retention policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    class: RetentionClass,
    version: u32,
    duration_years: u16,
    disposition: DispositionAction,
    effective_from: DateTime<Utc>,
}

impl RetentionPolicy {
    /// Creates a validated policy version.
    pub fn new(
        class: RetentionClass,
        version: u32,
        duration_years: u16,
        disposition: DispositionAction,
        effective_from: DateTime<Utc>,
    ) -> AppResult<Self> {
        if version == 0 {
            return Err(AppError::Validation(
                "retention policy version must start at 1".to_owned(),
            ));
        }

        if duration_years == 0 || duration_years > RETENTION_MAX_YEARS {
            return Err(AppError::Validation(format!(
                "retention duration must be between 1 and {RETENTION_MAX_YEARS} years"
            )));
        }

        Ok(Self {
            class,
            version,
            duration_years,
            disposition,
            effective_from,
        })
    }

    /// Returns the retention class.
    #[must_use]
    pub fn class(&self) -> &RetentionClass {
        &self.class
    }

    /// Returns the policy version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Returns the retention duration in years.
    #[must_use]
    pub fn duration_years(&self) -> u16 {
        self.duration_years
    }

    /// Returns the disposition action.
    #[must_use]
    pub fn disposition(&self) -> DispositionAction {
        self.disposition
    }

    /// Returns when this version takes effect.
    #[must_use]
    pub fn effective_from(&self) -> DateTime<Utc> {
        self.effective_from
    }

    /// Returns the instant at which a resource created at `created_at` becomes eligible.
    #[must_use]
    pub fn eligible_at(&self, created_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        created_at.checked_add_months(Months::new(u32::from(self.duration_years) * 12))
    }

    /// Returns whether the retention period has fully elapsed at `now`.
    #[must_use]
    pub fn has_elapsed(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.eligible_at(created_at)
            .is_some_and(|eligible_at| now >= eligible_at)
    }

    /// Selects the version of `class` in effect at `at`.
    ///
    /// The latest version whose `effective_from` is not in the future wins.
    #[must_use]
    pub fn in_effect<'a>(
        policies: &'a [RetentionPolicy],
        class: &RetentionClass,
        at: DateTime<Utc>,
    ) -> Option<&'a RetentionPolicy> {
        policies
            .iter()
            .filter(|policy| &policy.class == class && policy.effective_from <= at)
            .max_by_key(|policy| policy.version)
    }
}

/// Retention applied to the audit trail itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRetentionPolicy {
    /// Years audit records are kept.
    pub retention_years: u16,
    /// Days audit records stay in the hot tier.
    pub hot_tier_days: u16,
}

impl AuditRetentionPolicy {
    /// Validates that audit retention outlives every resource policy it documents.
    pub fn validate_against(&self, policies: &[RetentionPolicy]) -> AppResult<()> {
        if self.hot_tier_days == 0 {
            return Err(AppError::Validation(
                "audit hot tier window must be greater than zero".to_owned(),
            ));
        }

        let longest = policies
            .iter()
            .map(RetentionPolicy::duration_years)
            .max()
            .unwrap_or(0);
        if self.retention_years < longest {
            return Err(AppError::Validation(format!(
                "audit retention of {} year(s) is shorter than the longest resource retention of {longest} year(s)",
                self.retention_years
            )));
        }

        Ok(())
    }

    /// Returns the instant before which audit records have expired.
    #[must_use]
    pub fn expiry_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        now.checked_sub_months(Months::new(u32::from(self.retention_years) * 12))
    }

    /// Returns the instant before which audit records belong in the cold tier.
    #[must_use]
    pub fn hot_tier_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::days(i64::from(self.hot_tier_days))
    }
}

impl Default for AuditRetentionPolicy {
    fn default() -> Self {
        Self {
            retention_years: 10,
            hot_tier_days: 90,
        }
    }
}
