//! Protected resource references and lifecycle metadata.
//!
//! The engine never sees resource content. Everything here is a reference
//! or metadata owned by the engine itself.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use custodian_core::{AppError, AppResult, NonEmptyString, PrincipalId};
use serde::{Deserialize, Serialize};

use crate::retention::RetentionClass;

/// Validates an identifier token made of ASCII letters, digits and `-_.:`.
pub(crate) fn validated_token(
    kind: &str,
    value: String,
    max_length: usize,
    allow_uppercase: bool,
) -> AppResult<String> {
    if value.is_empty() || value.len() > max_length {
        return Err(AppError::Validation(format!(
            "{kind} must be between 1 and {max_length} characters"
        )));
    }

    let is_valid = value.chars().all(|character| {
        character.is_ascii_lowercase()
            || character.is_ascii_digit()
            || (allow_uppercase && character.is_ascii_uppercase())
            || matches!(character, '-' | '_' | '.' | ':')
    });
    if !is_valid {
        return Err(AppError::Validation(format!(
            "{kind} contains unsupported characters"
        )));
    }

    Ok(value)
}

/// Resource type token, for example `patient_record`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct ResourceType(String);

impl ResourceType {
    /// Creates a validated resource type.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        validated_token("resource type", value.into(), 64, false).map(Self)
    }

    /// Returns the type token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for ResourceType {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// External identifier of a protected resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct ResourceId(String);

impl ResourceId {
    /// Creates a validated resource identifier.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        validated_token("resource id", value.into(), 128, true).map(Self)
    }

    /// Returns the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for ResourceId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Opaque reference to one protected resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    resource_type: ResourceType,
    resource_id: ResourceId,
}

impl ResourceRef {
    /// Creates a reference from validated parts.
    #[must_use]
    pub fn new(resource_type: ResourceType, resource_id: ResourceId) -> Self {
        Self {
            resource_type,
            resource_id,
        }
    }

    /// Parses a reference from raw transport values.
    pub fn parse(resource_type: &str, resource_id: &str) -> AppResult<Self> {
        Ok(Self::new(
            ResourceType::new(resource_type)?,
            ResourceId::new(resource_id)?,
        ))
    }

    /// Builds a reference to a configuration object, for example a role or a
    /// principal. Configuration targets live under the `config.` type prefix.
    pub fn configuration(kind: &str, id: &str) -> AppResult<Self> {
        Self::parse(format!("config.{kind}").as_str(), id)
    }

    /// Returns the resource type.
    #[must_use]
    pub fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    /// Returns the resource identifier.
    #[must_use]
    pub fn resource_id(&self) -> &ResourceId {
        &self.resource_id
    }
}

impl Display for ResourceRef {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}/{}", self.resource_type.as_str(), self.resource_id.as_str())
    }
}

/// Logical field name of a protected resource, for example `date_of_birth`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct FieldName(String);

impl FieldName {
    /// Creates a validated field name.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        validated_token("field name", value.into(), 64, false).map(Self)
    }

    /// Returns the field name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<String> for FieldName {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Ordered set of field names.
pub type FieldSet = BTreeSet<FieldName>;

/// Administrative hold that overrides retention-based disposition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalHold {
    reason: NonEmptyString,
    placed_by: PrincipalId,
    placed_at: DateTime<Utc>,
    review_at: Option<DateTime<Utc>>,
}

impl LegalHold {
    /// Creates a hold. `review_at` is a review date, not an automatic lift.
    #[must_use]
    pub fn new(
        reason: NonEmptyString,
        placed_by: PrincipalId,
        placed_at: DateTime<Utc>,
        review_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            reason,
            placed_by,
            placed_at,
            review_at,
        }
    }

    /// Returns the recorded reason.
    #[must_use]
    pub fn reason(&self) -> &NonEmptyString {
        &self.reason
    }

    /// Returns the principal that placed the hold.
    #[must_use]
    pub fn placed_by(&self) -> PrincipalId {
        self.placed_by
    }

    /// Returns when the hold was placed.
    #[must_use]
    pub fn placed_at(&self) -> DateTime<Utc> {
        self.placed_at
    }

    /// Returns the review date, if any.
    #[must_use]
    pub fn review_at(&self) -> Option<DateTime<Utc>> {
        self.review_at
    }

    /// Returns whether the review date has passed.
    #[must_use]
    pub fn is_past_review(&self, now: DateTime<Utc>) -> bool {
        self.review_at.is_some_and(|review_at| review_at <= now)
    }
}

/// Lifecycle state of a protected resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispositionState {
    /// Within its retention window.
    Active,
    /// Retention elapsed; awaiting disposition.
    EligibleForDisposition,
    /// Claimed by the scheduler; no new legal hold may be placed.
    DispositionInProgress,
    /// Moved to cold archival storage.
    Archived,
    /// Irreversibly deleted.
    Deleted,
}

impl DispositionState {
    /// Returns a stable storage value for this state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::EligibleForDisposition => "eligible_for_disposition",
            Self::DispositionInProgress => "disposition_in_progress",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
        }
    }

    /// Parses a storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "active" => Ok(Self::Active),
            "eligible_for_disposition" => Ok(Self::EligibleForDisposition),
            "disposition_in_progress" => Ok(Self::DispositionInProgress),
            "archived" => Ok(Self::Archived),
            "deleted" => Ok(Self::Deleted),
            _ => Err(AppError::Validation(format!(
                "unknown disposition state '{value}'"
            ))),
        }
    }

    /// Returns whether the state is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Archived | Self::Deleted)
    }

    /// Returns whether `next` is a legal successor of this state.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::EligibleForDisposition)
                | (Self::EligibleForDisposition, Self::DispositionInProgress)
                | (Self::DispositionInProgress, Self::Archived)
                | (Self::DispositionInProgress, Self::Deleted)
        )
    }
}

/// Metadata the engine keeps for one protected resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    reference: ResourceRef,
    created_at: DateTime<Utc>,
    owner: Option<PrincipalId>,
    retention_class: RetentionClass,
    legal_hold: Option<LegalHold>,
    parent: Option<ResourceRef>,
    state: DispositionState,
}

impl ResourceMetadata {
    /// Creates metadata for a newly registered, active resource.
    #[must_use]
    pub fn new(
        reference: ResourceRef,
        created_at: DateTime<Utc>,
        owner: Option<PrincipalId>,
        retention_class: RetentionClass,
        parent: Option<ResourceRef>,
    ) -> Self {
        Self {
            reference,
            created_at,
            owner,
            retention_class,
            legal_hold: None,
            parent,
            state: DispositionState::Active,
        }
    }

    /// Rebuilds metadata from persisted values.
    #[must_use]
    pub fn restore(
        reference: ResourceRef,
        created_at: DateTime<Utc>,
        owner: Option<PrincipalId>,
        retention_class: RetentionClass,
        legal_hold: Option<LegalHold>,
        parent: Option<ResourceRef>,
        state: DispositionState,
    ) -> Self {
        Self {
            reference,
            created_at,
            owner,
            retention_class,
            legal_hold,
            parent,
            state,
        }
    }

    /// Returns the resource reference.
    #[must_use]
    pub fn reference(&self) -> &ResourceRef {
        &self.reference
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the owning principal, when the resource has a subject.
    #[must_use]
    pub fn owner(&self) -> Option<PrincipalId> {
        self.owner
    }

    /// Returns the retention class tag.
    #[must_use]
    pub fn retention_class(&self) -> &RetentionClass {
        &self.retention_class
    }

    /// Returns the current legal hold.
    #[must_use]
    pub fn legal_hold(&self) -> Option<&LegalHold> {
        self.legal_hold.as_ref()
    }

    /// Returns whether a legal hold is in place.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.legal_hold.is_some()
    }

    /// Returns the resource this one exists to support.
    #[must_use]
    pub fn parent(&self) -> Option<&ResourceRef> {
        self.parent.as_ref()
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> DispositionState {
        self.state
    }

    /// Returns whether the resource has been archived or deleted.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.state.is_terminal()
    }

    /// Moves the resource to the next lifecycle state.
    pub fn transition_to(&mut self, next: DispositionState) -> AppResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(AppError::Conflict(format!(
                "resource '{}' cannot move from '{}' to '{}'",
                self.reference,
                self.state.as_str(),
                next.as_str()
            )));
        }

        if self.legal_hold.is_some()
            && (next.is_terminal() || next == DispositionState::DispositionInProgress)
        {
            return Err(AppError::RetentionBlocked(format!(
                "resource '{}' is under legal hold",
                self.reference
            )));
        }

        self.state = next;
        Ok(())
    }

    /// Places a legal hold. A resource carries at most one hold.
    pub fn place_legal_hold(&mut self, hold: LegalHold) -> AppResult<()> {
        if self.is_disposed() {
            return Err(AppError::Conflict(format!(
                "resource '{}' has already been disposed",
                self.reference
            )));
        }

        if self.state == DispositionState::DispositionInProgress {
            return Err(AppError::Conflict(format!(
                "resource '{}' is being disposed",
                self.reference
            )));
        }

        if self.legal_hold.is_some() {
            return Err(AppError::Conflict(format!(
                "resource '{}' is already under legal hold",
                self.reference
            )));
        }

        self.legal_hold = Some(hold);
        Ok(())
    }

    /// Lifts the current legal hold and returns it.
    pub fn lift_legal_hold(&mut self) -> AppResult<LegalHold> {
        self.legal_hold.take().ok_or_else(|| {
            AppError::Conflict(format!(
                "resource '{}' is not under legal hold",
                self.reference
            ))
        })
    }

    /// Detaches the resource from its parent.
    pub fn detach_from_parent(&mut self) -> Option<ResourceRef> {
        self.parent.take()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use custodian_core::{NonEmptyString, PrincipalId};

    use super::{DispositionState, LegalHold, ResourceId, ResourceMetadata, ResourceRef};
    use crate::retention::RetentionClass;

    fn metadata() -> ResourceMetadata {
        let reference = match ResourceRef::parse("patient_record", "pr-1") {
            Ok(reference) => reference,
            Err(error) => panic!("invalid reference: {error}"),
        };
        let class = match RetentionClass::new("clinical") {
            Ok(class) => class,
            Err(error) => panic!("invalid class: {error}"),
        };
        ResourceMetadata::new(reference, Utc::now(), None, class, None)
    }

    fn hold() -> LegalHold {
        let reason = match NonEmptyString::new("litigation") {
            Ok(reason) => reason,
            Err(error) => panic!("invalid reason: {error}"),
        };
        LegalHold::new(reason, PrincipalId::new(), Utc::now(), None)
    }

    #[test]
    fn resource_id_rejects_spaces() {
        assert!(ResourceId::new("John Smith").is_err());
        assert!(ResourceId::new("MRN-00042").is_ok());
    }

    #[test]
    fn state_machine_only_moves_forward() {
        let mut resource = metadata();
        assert!(resource.transition_to(DispositionState::Deleted).is_err());
        assert!(
            resource
                .transition_to(DispositionState::EligibleForDisposition)
                .is_ok()
        );
        assert!(resource.transition_to(DispositionState::Archived).is_err());
        assert!(
            resource
                .transition_to(DispositionState::DispositionInProgress)
                .is_ok()
        );
        assert!(resource.transition_to(DispositionState::Archived).is_ok());
        assert!(resource.transition_to(DispositionState::Deleted).is_err());
    }

    #[test]
    fn held_resource_cannot_be_claimed_for_disposition() {
        let mut resource = metadata();
        assert!(
            resource
                .transition_to(DispositionState::EligibleForDisposition)
                .is_ok()
        );
        assert!(resource.place_legal_hold(hold()).is_ok());

        let result = resource.transition_to(DispositionState::DispositionInProgress);
        assert!(matches!(
            result,
            Err(custodian_core::AppError::RetentionBlocked(_))
        ));
        assert_eq!(resource.state(), DispositionState::EligibleForDisposition);

        assert!(resource.lift_legal_hold().is_ok());
        assert!(
            resource
                .transition_to(DispositionState::DispositionInProgress)
                .is_ok()
        );
        assert!(resource.transition_to(DispositionState::Deleted).is_ok());
    }

    #[test]
    fn hold_is_refused_while_disposition_is_in_progress() {
        let mut resource = metadata();
        for next in [
            DispositionState::EligibleForDisposition,
            DispositionState::DispositionInProgress,
        ] {
            assert!(resource.transition_to(next).is_ok());
        }

        assert!(matches!(
            resource.place_legal_hold(hold()),
            Err(custodian_core::AppError::Conflict(_))
        ));
        assert!(!resource.is_held());
    }

    #[test]
    fn second_hold_conflicts() {
        let mut resource = metadata();
        assert!(resource.place_legal_hold(hold()).is_ok());
        assert!(resource.place_legal_hold(hold()).is_err());
    }

    #[test]
    fn configuration_targets_use_reserved_prefix() {
        let reference = ResourceRef::configuration("role", "nurse");
        assert!(matches!(
            reference,
            Ok(ref value) if value.resource_type().as_str() == "config.role"
        ));
        assert!(ResourceRef::configuration("role", "Head Nurse").is_err());
    }
}
