//! Application services and ports.

#![forbid(unsafe_code)]

mod access_mediator;
mod administration_service;
mod alert_monitor;
mod alert_ports;
mod audit_ports;
mod audit_query_service;
mod audit_recorder;
mod authorization_service;
mod lease_ports;
mod policy_cache;
mod policy_ports;
mod resource_ports;
mod retention_scheduler;

#[cfg(test)]
mod test_fakes;

pub use access_mediator::{
    AccessMediator, DeleteOperation, FnOperation, ReadOperation, ResourceOperation,
    RollbackOutcome, WriteOperation,
};
pub use administration_service::{
    AdministrationService, AppendRetentionPolicyInput, AppendRoleVersionInput,
    PlaceLegalHoldInput,
};
pub use alert_monitor::{AlertMonitor, PollReport};
pub use alert_ports::{AlertEvent, AlertNotifier};
pub use audit_ports::{
    AuditLogStore, AuditPage, AuditQuery, AuditReceipt, AuditTierStore,
};
pub use audit_query_service::{
    AUDIT_PAGE_LIMIT_MAX, AuditQueryService, ChainBreak, ChainBreakKind, ChainVerification,
    audit_record_stream, verify_chain,
};
pub use audit_recorder::{AuditRecorder, AuditRetryPolicy};
pub use authorization_service::{
    AccessGrant, AccessRequest, AuthorizationDecision, AuthorizationService, evaluate,
};
pub use lease_ports::{SchedulerLease, SchedulerLeaseCoordinator};
pub use policy_cache::PolicyCache;
pub use policy_ports::{PolicyRepository, PolicySnapshot, PrincipalDirectory};
pub use resource_ports::{
    ReconciliationItem, ReconciliationQueue, ResourceMetadataRepository, ResourcePayload,
    ResourceStore, WriteReceipt,
};
pub use retention_scheduler::{
    AuditMaintenanceReport, RetentionScheduler, RetentionSchedulerConfig, ScanReport,
};
