use std::str::FromStr;

use custodian_core::AppError;
use serde::{Deserialize, Serialize};

/// Permissions bundled into roles and enforced by the decision engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Permission {
    /// Allows reading summary fields of patient records.
    ReadPatientSummary,
    /// Allows writing patient records.
    WritePatientRecord,
    /// Allows deleting patient records.
    DeletePatientRecord,
    /// Allows exporting patient records in bulk.
    ExportPatientRecord,
    /// Allows reading the audit trail.
    ViewAuditTrail,
    /// Allows placing and lifting legal holds.
    ManageLegalHold,
    /// Allows appending role and retention policy versions.
    ManagePolicy,
    /// Allows deactivating principals.
    ManagePrincipal,
}

impl Permission {
    /// Returns a stable storage value for this permission.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadPatientSummary => "read-patient-summary",
            Self::WritePatientRecord => "write-patient-record",
            Self::DeletePatientRecord => "delete-patient-record",
            Self::ExportPatientRecord => "export-patient-record",
            Self::ViewAuditTrail => "view-audit-trail",
            Self::ManageLegalHold => "manage-legal-hold",
            Self::ManagePolicy => "manage-policy",
            Self::ManagePrincipal => "manage-principal",
        }
    }

    /// Returns all known permissions.
    #[must_use]
    pub fn all() -> &'static [Self] {
        const ALL: &[Permission] = &[
            Permission::ReadPatientSummary,
            Permission::WritePatientRecord,
            Permission::DeletePatientRecord,
            Permission::ExportPatientRecord,
            Permission::ViewAuditTrail,
            Permission::ManageLegalHold,
            Permission::ManagePolicy,
            Permission::ManagePrincipal,
        ];

        ALL
    }
}

impl FromStr for Permission {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|permission| permission.as_str() == value)
            .ok_or_else(|| AppError::Validation(format!("unknown permission value '{value}'")))
    }
}

/// Actions recorded in the audit trail.
///
/// Mediated actions map to the permission they require. System actions are
/// emitted only by the retention scheduler and have no permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessAction {
    /// Read of protected content.
    PhiRead,
    /// Write of protected content.
    PhiWrite,
    /// Deletion of protected content by a caller.
    PhiDelete,
    /// Bulk export of protected content.
    PhiExport,
    /// Read of the audit trail.
    AuditTrailView,
    /// Legal hold placed on a resource.
    LegalHoldPlace,
    /// Legal hold lifted from a resource.
    LegalHoldLift,
    /// Principal deactivated.
    PrincipalDeactivate,
    /// Role version appended.
    RolePolicyUpdate,
    /// Retention policy version appended.
    RetentionPolicyUpdate,
    /// Resource irreversibly deleted by the scheduler.
    RecordDisposed,
    /// Resource moved to cold archival storage by the scheduler.
    RecordArchived,
    /// Dependent resource detached from a disposed parent.
    RecordReparented,
}

impl AccessAction {
    /// Returns a stable storage value for this action.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PhiRead => "phi-read",
            Self::PhiWrite => "phi-write",
            Self::PhiDelete => "phi-delete",
            Self::PhiExport => "phi-export",
            Self::AuditTrailView => "audit-trail-view",
            Self::LegalHoldPlace => "legal-hold-place",
            Self::LegalHoldLift => "legal-hold-lift",
            Self::PrincipalDeactivate => "principal-deactivate",
            Self::RolePolicyUpdate => "role-policy-update",
            Self::RetentionPolicyUpdate => "retention-policy-update",
            Self::RecordDisposed => "record-disposed",
            Self::RecordArchived => "record-archived",
            Self::RecordReparented => "record-reparented",
        }
    }

    /// Returns all known actions.
    #[must_use]
    pub fn all() -> &'static [Self] {
        const ALL: &[AccessAction] = &[
            AccessAction::PhiRead,
            AccessAction::PhiWrite,
            AccessAction::PhiDelete,
            AccessAction::PhiExport,
            AccessAction::AuditTrailView,
            AccessAction::LegalHoldPlace,
            AccessAction::LegalHoldLift,
            AccessAction::PrincipalDeactivate,
            AccessAction::RolePolicyUpdate,
            AccessAction::RetentionPolicyUpdate,
            AccessAction::RecordDisposed,
            AccessAction::RecordArchived,
            AccessAction::RecordReparented,
        ];

        ALL
    }

    /// Returns the permission a caller needs for this action.
    #[must_use]
    pub fn required_permission(&self) -> Option<Permission> {
        match self {
            Self::PhiRead => Some(Permission::ReadPatientSummary),
            Self::PhiWrite => Some(Permission::WritePatientRecord),
            Self::PhiDelete => Some(Permission::DeletePatientRecord),
            Self::PhiExport => Some(Permission::ExportPatientRecord),
            Self::AuditTrailView => Some(Permission::ViewAuditTrail),
            Self::LegalHoldPlace | Self::LegalHoldLift => Some(Permission::ManageLegalHold),
            Self::PrincipalDeactivate => Some(Permission::ManagePrincipal),
            Self::RolePolicyUpdate | Self::RetentionPolicyUpdate => Some(Permission::ManagePolicy),
            Self::RecordDisposed | Self::RecordArchived | Self::RecordReparented => None,
        }
    }

    /// Returns whether the action targets a live protected resource.
    ///
    /// Such actions are denied when the resource metadata is missing or the
    /// resource has already been disposed.
    #[must_use]
    pub fn requires_live_resource(&self) -> bool {
        matches!(
            self,
            Self::PhiRead
                | Self::PhiWrite
                | Self::PhiDelete
                | Self::PhiExport
                | Self::LegalHoldPlace
                | Self::LegalHoldLift
        )
    }

    /// Returns whether the action reads protected fields and is therefore
    /// subject to the minimum-necessary filter.
    #[must_use]
    pub fn reads_fields(&self) -> bool {
        matches!(self, Self::PhiRead | Self::PhiExport)
    }
}

impl FromStr for AccessAction {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|action| action.as_str() == value)
            .ok_or_else(|| AppError::Validation(format!("unknown access action '{value}'")))
    }
}
