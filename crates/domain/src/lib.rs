//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod alert;
mod audit;
mod principal;
mod resource;
mod retention;
mod role;
mod security;

pub use alert::{AccessAlert, AlertRule, AlertRuleKind, OperationalEvent, OutcomeKind};
pub use audit::{
    AuditEntry, AuditOutcome, AuditRecord, AuditTier, DispositionDetail,
    DispositionJustification, FailureCode, GENESIS_HASH,
};
pub use principal::Principal;
pub use resource::{
    DispositionState, FieldName, FieldSet, LegalHold, ResourceId, ResourceMetadata, ResourceRef,
    ResourceType,
};
pub use retention::{
    AuditRetentionPolicy, DispositionAction, RETENTION_MAX_YEARS, RetentionClass,
    RetentionPolicy,
};
pub use role::{RoleName, RoleVersion, RoleVersionRef};
pub use security::{AccessAction, Permission};
