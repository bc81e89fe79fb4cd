//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod http_alert_notifier;
mod http_resource_store;
mod in_memory_audit_log_store;
mod in_memory_policy_repository;
mod in_memory_reconciliation_queue;
mod in_memory_resource_metadata_repository;
mod in_memory_resource_store;
mod postgres_audit_log_store;
mod postgres_policy_repository;
mod postgres_resource_metadata_repository;
mod redis_scheduler_lease_coordinator;
mod tracing_alert_notifier;

pub use http_alert_notifier::HttpAlertNotifier;
pub use http_resource_store::HttpResourceStore;
pub use in_memory_audit_log_store::InMemoryAuditLogStore;
pub use in_memory_policy_repository::{InMemoryPolicyRepository, InMemoryPrincipalDirectory};
pub use in_memory_reconciliation_queue::InMemoryReconciliationQueue;
pub use in_memory_resource_metadata_repository::InMemoryResourceMetadataRepository;
pub use in_memory_resource_store::InMemoryResourceStore;
pub use postgres_audit_log_store::PostgresAuditLogStore;
pub use postgres_policy_repository::PostgresPolicyRepository;
pub use postgres_resource_metadata_repository::PostgresResourceMetadataRepository;
pub use redis_scheduler_lease_coordinator::RedisSchedulerLeaseCoordinator;
pub use tracing_alert_notifier::TracingAlertNotifier;
