//! Audit entries and sealed audit records.
//!
//! `AuditEntry` is the only input the audit recorder accepts. Every field is a
//! validated identifier or an enum, so resource content has nowhere to go.

use chrono::{DateTime, Utc};
use custodian_core::{AppError, AppResult, ChannelTag, CorrelationId, PrincipalId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::resource::ResourceRef;
use crate::retention::{DispositionAction, RetentionClass};
use crate::role::RoleVersionRef;
use crate::security::AccessAction;

/// Hash that precedes the first record of every resource stream.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Structured failure detail attached to non-successful outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    /// The principal is not known to the directory.
    PrincipalUnknown,
    /// The principal has been deactivated.
    PrincipalInactive,
    /// No role grants the permission the action requires.
    NotPermitted,
    /// The resource is missing or already disposed.
    ResourceUnavailable,
    /// The mediated operation returned an error.
    OperationFailed,
    /// The mediated operation did not finish in time.
    Timeout,
    /// The caller went away before the operation finished.
    Cancelled,
    /// Principal, policy or resource lookups failed before a decision.
    DecisionUnavailable,
}

impl FailureCode {
    /// Returns a stable storage value for this code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrincipalUnknown => "PRINCIPAL_UNKNOWN",
            Self::PrincipalInactive => "PRINCIPAL_INACTIVE",
            Self::NotPermitted => "NOT_PERMITTED",
            Self::ResourceUnavailable => "RESOURCE_UNAVAILABLE",
            Self::OperationFailed => "OPERATION_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::DecisionUnavailable => "DECISION_UNAVAILABLE",
        }
    }

    /// Parses a storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "PRINCIPAL_UNKNOWN" => Ok(Self::PrincipalUnknown),
            "PRINCIPAL_INACTIVE" => Ok(Self::PrincipalInactive),
            "NOT_PERMITTED" => Ok(Self::NotPermitted),
            "RESOURCE_UNAVAILABLE" => Ok(Self::ResourceUnavailable),
            "OPERATION_FAILED" => Ok(Self::OperationFailed),
            "TIMEOUT" => Ok(Self::Timeout),
            "CANCELLED" => Ok(Self::Cancelled),
            "DECISION_UNAVAILABLE" => Ok(Self::DecisionUnavailable),
            _ => Err(AppError::Validation(format!(
                "unknown failure code '{value}'"
            ))),
        }
    }
}

/// Outcome of one audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", content = "code", rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The operation completed.
    Success,
    /// The operation was allowed but did not complete.
    Failure(FailureCode),
    /// The operation was refused before it ran.
    Denied(FailureCode),
}

impl AuditOutcome {
    /// Returns a stable storage value for the outcome kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure(_) => "failure",
            Self::Denied(_) => "denied",
        }
    }

    /// Returns the failure code, if any.
    #[must_use]
    pub fn failure_code(&self) -> Option<FailureCode> {
        match self {
            Self::Success => None,
            Self::Failure(code) | Self::Denied(code) => Some(*code),
        }
    }

    /// Rebuilds an outcome from its storage columns.
    pub fn from_parts(status: &str, failure_code: Option<&str>) -> AppResult<Self> {
        let code = failure_code.map(FailureCode::parse).transpose()?;
        match (status, code) {
            ("success", None) => Ok(Self::Success),
            ("failure", Some(code)) => Ok(Self::Failure(code)),
            ("denied", Some(code)) => Ok(Self::Denied(code)),
            _ => Err(AppError::Validation(format!(
                "inconsistent audit outcome '{status}'"
            ))),
        }
    }
}

/// Why the scheduler disposed of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispositionJustification {
    /// The resource's own retention period elapsed.
    RetentionElapsed,
    /// The resource only existed to support a disposed parent.
    CascadeFromParent {
        /// Disposed parent resource.
        parent: ResourceRef,
    },
}

/// Deletion record detail captured immediately before disposition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispositionDetail {
    /// Retention class evaluated.
    pub retention_class: RetentionClass,
    /// Policy version applied.
    pub policy_version: u32,
    /// Terminal action performed.
    pub disposition: DispositionAction,
    /// Justification for the action.
    pub justification: DispositionJustification,
}

/// Content-free description of one audited operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    principal_id: PrincipalId,
    roles: Vec<RoleVersionRef>,
    action: AccessAction,
    resource: ResourceRef,
    outcome: AuditOutcome,
    channel: ChannelTag,
    correlation_id: CorrelationId,
    disposition: Option<DispositionDetail>,
}

impl AuditEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(
        principal_id: PrincipalId,
        roles: Vec<RoleVersionRef>,
        action: AccessAction,
        resource: ResourceRef,
        outcome: AuditOutcome,
        channel: ChannelTag,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            principal_id,
            roles,
            action,
            resource,
            outcome,
            channel,
            correlation_id,
            disposition: None,
        }
    }

    /// Attaches deletion record detail.
    #[must_use]
    pub fn with_disposition(mut self, disposition: DispositionDetail) -> Self {
        self.disposition = Some(disposition);
        self
    }

    /// Replaces the role versions held at action time.
    #[must_use]
    pub fn with_roles(mut self, roles: Vec<RoleVersionRef>) -> Self {
        self.roles = roles;
        self
    }

    /// Replaces the outcome.
    #[must_use]
    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Returns the acting principal.
    #[must_use]
    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    /// Returns the role versions held at action time.
    #[must_use]
    pub fn roles(&self) -> &[RoleVersionRef] {
        &self.roles
    }

    /// Returns the action.
    #[must_use]
    pub fn action(&self) -> AccessAction {
        self.action
    }

    /// Returns the resource reference.
    #[must_use]
    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    /// Returns the outcome.
    #[must_use]
    pub fn outcome(&self) -> AuditOutcome {
        self.outcome
    }

    /// Returns the channel tag.
    #[must_use]
    pub fn channel(&self) -> &ChannelTag {
        &self.channel
    }

    /// Returns the correlation identifier.
    #[must_use]
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Returns the deletion record detail.
    #[must_use]
    pub fn disposition(&self) -> Option<&DispositionDetail> {
        self.disposition.as_ref()
    }

    /// Returns whether `other` can be a retried append of this entry.
    ///
    /// A correlation id reused by a different principal, action or resource
    /// is a different call and must not be absorbed as a replay.
    #[must_use]
    pub fn is_replayed_by(&self, other: &AuditEntry) -> bool {
        self.correlation_id == other.correlation_id
            && self.principal_id == other.principal_id
            && self.action == other.action
            && self.resource == other.resource
    }
}

/// Storage tier of an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditTier {
    /// Recent records served to the scheduler and monitor.
    Hot,
    /// Remainder of the legally required window.
    Cold,
}

/// Sealed, immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    record_id: u64,
    sequence: u64,
    recorded_at: DateTime<Utc>,
    entry: AuditEntry,
    previous_hash: String,
    hash: String,
}

#[derive(Serialize)]
struct HashInput<'a> {
    record_id: u64,
    sequence: u64,
    recorded_at: &'a DateTime<Utc>,
    entry: &'a AuditEntry,
    previous_hash: &'a str,
}

impl AuditRecord {
    /// Seals an entry at the given stream position and computes its hash.
    pub fn seal(
        record_id: u64,
        sequence: u64,
        recorded_at: DateTime<Utc>,
        entry: AuditEntry,
        previous_hash: String,
    ) -> AppResult<Self> {
        if record_id == 0 || sequence == 0 {
            return Err(AppError::Validation(
                "audit record id and sequence start at 1".to_owned(),
            ));
        }

        let hash = compute_hash(record_id, sequence, &recorded_at, &entry, &previous_hash)?;
        Ok(Self {
            record_id,
            sequence,
            recorded_at,
            entry,
            previous_hash,
            hash,
        })
    }

    /// Rebuilds a record from storage without recomputing its hash.
    #[must_use]
    pub fn restore(
        record_id: u64,
        sequence: u64,
        recorded_at: DateTime<Utc>,
        entry: AuditEntry,
        previous_hash: String,
        hash: String,
    ) -> Self {
        Self {
            record_id,
            sequence,
            recorded_at,
            entry,
            previous_hash,
            hash,
        }
    }

    /// Returns the globally unique, monotonic record identifier.
    #[must_use]
    pub fn record_id(&self) -> u64 {
        self.record_id
    }

    /// Returns the position within the resource stream, starting at 1.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns when the record was written.
    #[must_use]
    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    /// Returns the sealed entry.
    #[must_use]
    pub fn entry(&self) -> &AuditEntry {
        &self.entry
    }

    /// Returns the hash of the preceding record in the stream.
    #[must_use]
    pub fn previous_hash(&self) -> &str {
        self.previous_hash.as_str()
    }

    /// Returns this record's hash.
    #[must_use]
    pub fn hash(&self) -> &str {
        self.hash.as_str()
    }

    /// Returns whether the stored hash matches the record contents.
    #[must_use]
    pub fn verify_hash(&self) -> bool {
        compute_hash(
            self.record_id,
            self.sequence,
            &self.recorded_at,
            &self.entry,
            &self.previous_hash,
        )
        .is_ok_and(|hash| hash == self.hash)
    }

    /// Returns whether this record directly follows `previous` in its stream.
    #[must_use]
    pub fn follows(&self, previous: &AuditRecord) -> bool {
        self.entry.resource == previous.entry.resource
            && self.sequence == previous.sequence.saturating_add(1)
            && self.previous_hash == previous.hash
    }
}

fn compute_hash(
    record_id: u64,
    sequence: u64,
    recorded_at: &DateTime<Utc>,
    entry: &AuditEntry,
    previous_hash: &str,
) -> AppResult<String> {
    let input = serde_json::to_vec(&HashInput {
        record_id,
        sequence,
        recorded_at,
        entry,
        previous_hash,
    })
    .map_err(|error| AppError::Internal(format!("failed to encode audit record: {error}")))?;

    Ok(hex::encode(Sha256::digest(input)))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use custodian_core::{ChannelTag, CorrelationId, PrincipalId};

    use super::{AuditEntry, AuditOutcome, AuditRecord, FailureCode, GENESIS_HASH};
    use crate::resource::ResourceRef;
    use crate::security::AccessAction;

    fn entry() -> AuditEntry {
        let resource = match ResourceRef::parse("patient_record", "pr-7") {
            Ok(resource) => resource,
            Err(error) => panic!("invalid resource: {error}"),
        };
        let channel = match ChannelTag::new("web") {
            Ok(channel) => channel,
            Err(error) => panic!("invalid channel: {error}"),
        };
        AuditEntry::new(
            PrincipalId::new(),
            Vec::new(),
            AccessAction::PhiRead,
            resource,
            AuditOutcome::Denied(FailureCode::NotPermitted),
            channel,
            CorrelationId::new(),
        )
    }

    fn seal(record_id: u64, sequence: u64, previous_hash: &str) -> AuditRecord {
        match AuditRecord::seal(
            record_id,
            sequence,
            Utc::now(),
            entry(),
            previous_hash.to_owned(),
        ) {
            Ok(record) => record,
            Err(error) => panic!("failed to seal: {error}"),
        }
    }

    #[test]
    fn sealed_record_verifies_and_detects_tampering() {
        let record = seal(1, 1, GENESIS_HASH);
        assert!(record.verify_hash());

        let tampered = AuditRecord::restore(
            record.record_id(),
            record.sequence(),
            record.recorded_at(),
            record
                .entry()
                .clone()
                .with_outcome(AuditOutcome::Success),
            record.previous_hash().to_owned(),
            record.hash().to_owned(),
        );
        assert!(!tampered.verify_hash());
    }

    #[test]
    fn outcome_storage_columns_roundtrip() {
        let outcome = AuditOutcome::Failure(FailureCode::Timeout);
        let restored = AuditOutcome::from_parts(
            outcome.as_str(),
            outcome.failure_code().map(|code| code.as_str()),
        );
        assert!(matches!(restored, Ok(value) if value == outcome));
        assert!(AuditOutcome::from_parts("success", Some("TIMEOUT")).is_err());
    }

    #[test]
    fn sequence_zero_is_rejected() {
        let result = AuditRecord::seal(1, 0, Utc::now(), entry(), GENESIS_HASH.to_owned());
        assert!(result.is_err());
    }

    #[test]
    fn reused_correlation_id_on_another_resource_is_not_a_replay() {
        let original = entry();
        let other_resource = match ResourceRef::parse("patient_record", "pr-8") {
            Ok(resource) => resource,
            Err(error) => panic!("invalid resource: {error}"),
        };
        let other_call = AuditEntry::new(
            original.principal_id(),
            Vec::new(),
            original.action(),
            other_resource,
            original.outcome(),
            original.channel().clone(),
            original.correlation_id(),
        );

        assert!(original.is_replayed_by(&original.clone().with_outcome(AuditOutcome::Success)));
        assert!(!original.is_replayed_by(&other_call));
    }
}
