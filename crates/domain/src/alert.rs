use chrono::{DateTime, Utc};
use custodian_core::{AppError, AppResult, CorrelationId, NonEmptyString, PrincipalId};
use serde::{Deserialize, Serialize};

use crate::audit::AuditRecord;
use crate::resource::ResourceRef;
use crate::retention::RetentionClass;
use crate::security::AccessAction;

/// Observable outcome kind a rule can match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Completed operations.
    Success,
    /// Allowed operations that did not complete.
    Failure,
    /// Refused operations.
    Denied,
}

impl OutcomeKind {
    /// Returns whether a record's outcome matches this kind.
    #[must_use]
    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.as_str() == record.entry().outcome().as_str()
    }

    /// Returns a stable value for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Denied => "denied",
        }
    }
}

/// Pattern a rule watches for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertRuleKind {
    /// Repeated records with the given outcome by one principal.
    OutcomeBurst {
        /// Outcome to count.
        outcome: OutcomeKind,
    },
    /// Repeated uses of one action by one principal, for example bulk export.
    ActionBurst {
        /// Action to count.
        action: AccessAction,
    },
    /// Any use of an action by a principal other than the allowed identity.
    ActionOutsideIdentity {
        /// Watched action.
        action: AccessAction,
        /// Only identity allowed to perform the action.
        allowed_principal: PrincipalId,
    },
    /// Access volume above a multiple of the principal's rolling baseline.
    VolumeAboveBaseline {
        /// Multiplier applied to the baseline, in percent.
        multiplier_percent: u32,
        /// Minimum events in the window before the rule can fire.
        min_events: u32,
    },
}

/// Declarative alerting rule: pattern plus threshold plus window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRule {
    name: NonEmptyString,
    #[serde(flatten)]
    kind: AlertRuleKind,
    threshold: u32,
    window_seconds: u32,
}

impl AlertRule {
    /// Creates a validated rule.
    pub fn new(
        name: NonEmptyString,
        kind: AlertRuleKind,
        threshold: u32,
        window_seconds: u32,
    ) -> AppResult<Self> {
        let rule = Self {
            name,
            kind,
            threshold,
            window_seconds,
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Validates thresholds and windows, including rules loaded from files.
    pub fn validate(&self) -> AppResult<()> {
        if self.threshold == 0 {
            return Err(AppError::Validation(format!(
                "alert rule '{}' threshold must be greater than zero",
                self.name.as_str()
            )));
        }

        if self.window_seconds == 0 {
            return Err(AppError::Validation(format!(
                "alert rule '{}' window must be greater than zero",
                self.name.as_str()
            )));
        }

        if let AlertRuleKind::VolumeAboveBaseline {
            multiplier_percent, ..
        } = self.kind
            && multiplier_percent <= 100
        {
            return Err(AppError::Validation(format!(
                "alert rule '{}' multiplier must exceed 100 percent",
                self.name.as_str()
            )));
        }

        Ok(())
    }

    /// Returns the rule name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the watched pattern.
    #[must_use]
    pub fn kind(&self) -> &AlertRuleKind {
        &self.kind
    }

    /// Returns the event count that fires the rule.
    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Returns the sliding window length.
    #[must_use]
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.window_seconds))
    }

    /// Returns whether a record counts towards this rule.
    #[must_use]
    pub fn matches(&self, record: &AuditRecord) -> bool {
        let entry = record.entry();
        match &self.kind {
            AlertRuleKind::OutcomeBurst { outcome } => outcome.matches(record),
            AlertRuleKind::ActionBurst { action } => entry.action() == *action,
            AlertRuleKind::ActionOutsideIdentity {
                action,
                allowed_principal,
            } => entry.action() == *action && entry.principal_id() != *allowed_principal,
            AlertRuleKind::VolumeAboveBaseline { .. } => entry.action().required_permission().is_some(),
        }
    }
}

/// Alert raised by a rule. Carries only references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessAlert {
    /// Rule that fired.
    pub rule: String,
    /// Principal the window belongs to.
    pub principal_id: PrincipalId,
    /// Matching events in the window.
    pub event_count: u32,
    /// First matching record in the window.
    pub window_start: DateTime<Utc>,
    /// Record that crossed the threshold.
    pub trigger_record_id: u64,
    /// Resource of the triggering record.
    pub resource: ResourceRef,
}

/// Operational condition escalated to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationalEvent {
    /// Bounded retries could not persist an audit record.
    AuditWriteFailed {
        /// Resource of the lost record.
        resource: ResourceRef,
        /// Correlation id of the failed call.
        correlation_id: CorrelationId,
    },
    /// A resource references a retention class without a policy.
    PolicyNotFound {
        /// Resource skipped by the scheduler.
        resource: ResourceRef,
        /// Class with no policy in effect.
        retention_class: RetentionClass,
    },
    /// A legal hold's review date has passed while it still blocks disposition.
    LegalHoldPastReview {
        /// Held resource.
        resource: ResourceRef,
        /// Review date of the hold.
        review_at: DateTime<Utc>,
    },
    /// A write completed but could not be audited or rolled back.
    ReconciliationRequired {
        /// Resource of the unaudited write.
        resource: ResourceRef,
        /// Correlation id of the call.
        correlation_id: CorrelationId,
    },
}

impl OperationalEvent {
    /// Returns a stable event code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuditWriteFailed { .. } => "AUDIT_WRITE_FAILED",
            Self::PolicyNotFound { .. } => "POLICY_NOT_FOUND",
            Self::LegalHoldPastReview { .. } => "LEGAL_HOLD_PAST_REVIEW",
            Self::ReconciliationRequired { .. } => "RECONCILIATION_REQUIRED",
        }
    }

    /// Returns the resource the event concerns.
    #[must_use]
    pub fn resource(&self) -> &ResourceRef {
        match self {
            Self::AuditWriteFailed { resource, .. }
            | Self::PolicyNotFound { resource, .. }
            | Self::LegalHoldPastReview { resource, .. }
            | Self::ReconciliationRequired { resource, .. } => resource,
        }
    }
}
