use chrono::{DateTime, Utc};
use custodian_application::AuditPage;
use custodian_domain::{
    AuditRecord, DispositionDetail, LegalHold, Principal, RetentionPolicy, RoleVersion,
};
use serde::{Deserialize, Serialize};

/// Page size used when a caller does not choose one.
pub const DEFAULT_PAGE_LIMIT: usize = 100;

#[derive(Debug, Serialize)]
pub struct HealthDependencyStatus {
    pub status: &'static str,
    /// Fixed category only; driver errors go to the log.
    pub detail: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub ready: bool,
    pub postgres: HealthDependencyStatus,
    pub redis: HealthDependencyStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub cursor: Option<u64>,
    pub limit: Option<usize>,
}

impl PageQuery {
    pub fn limit_or_default(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_LIMIT)
    }
}

#[derive(Debug, Deserialize)]
pub struct TimeRangeQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub cursor: Option<u64>,
    pub limit: Option<usize>,
}

/// Audit record as exposed to reviewers. Failure codes are structured.
#[derive(Debug, Serialize)]
pub struct AuditRecordResponse {
    pub record_id: u64,
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    pub principal_id: String,
    pub roles: Vec<String>,
    pub action: &'static str,
    pub resource_type: String,
    pub resource_id: String,
    pub outcome: &'static str,
    pub failure_code: Option<&'static str>,
    pub channel: String,
    pub correlation_id: String,
    pub disposition: Option<DispositionDetail>,
    pub previous_hash: String,
    pub hash: String,
}

impl From<&AuditRecord> for AuditRecordResponse {
    fn from(record: &AuditRecord) -> Self {
        let entry = record.entry();
        let outcome = entry.outcome();
        Self {
            record_id: record.record_id(),
            sequence: record.sequence(),
            recorded_at: record.recorded_at(),
            principal_id: entry.principal_id().to_string(),
            roles: entry.roles().iter().map(ToString::to_string).collect(),
            action: entry.action().as_str(),
            resource_type: entry.resource().resource_type().as_str().to_owned(),
            resource_id: entry.resource().resource_id().as_str().to_owned(),
            outcome: outcome.as_str(),
            failure_code: outcome.failure_code().map(|code| code.as_str()),
            channel: entry.channel().as_str().to_owned(),
            correlation_id: entry.correlation_id().to_string(),
            disposition: entry.disposition().cloned(),
            previous_hash: record.previous_hash().to_owned(),
            hash: record.hash().to_owned(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuditPageResponse {
    pub records: Vec<AuditRecordResponse>,
    pub next_cursor: Option<u64>,
}

impl From<AuditPage> for AuditPageResponse {
    fn from(page: AuditPage) -> Self {
        Self {
            records: page.records.iter().map(AuditRecordResponse::from).collect(),
            next_cursor: page.next_cursor,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LegalHoldResponse {
    pub reason: String,
    pub placed_by: String,
    pub placed_at: DateTime<Utc>,
    pub review_at: Option<DateTime<Utc>>,
}

impl From<LegalHold> for LegalHoldResponse {
    fn from(hold: LegalHold) -> Self {
        Self {
            reason: hold.reason().as_str().to_owned(),
            placed_by: hold.placed_by().to_string(),
            placed_at: hold.placed_at(),
            review_at: hold.review_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PrincipalResponse {
    pub id: String,
    pub handle: String,
    pub active: bool,
    pub roles: Vec<String>,
}

impl From<Principal> for PrincipalResponse {
    fn from(principal: Principal) -> Self {
        Self {
            id: principal.id().to_string(),
            handle: principal.handle().to_owned(),
            active: principal.is_active(),
            roles: principal
                .roles()
                .iter()
                .map(|role| role.as_str().to_owned())
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RoleVersionResponse {
    pub name: String,
    pub version: u32,
    pub permissions: Vec<&'static str>,
}

impl From<RoleVersion> for RoleVersionResponse {
    fn from(role: RoleVersion) -> Self {
        Self {
            name: role.name().as_str().to_owned(),
            version: role.version(),
            permissions: role
                .permissions()
                .iter()
                .map(|permission| permission.as_str())
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RetentionPolicyResponse {
    pub retention_class: String,
    pub version: u32,
    pub duration_years: u16,
    pub disposition: &'static str,
    pub effective_from: DateTime<Utc>,
}

impl From<RetentionPolicy> for RetentionPolicyResponse {
    fn from(policy: RetentionPolicy) -> Self {
        Self {
            retention_class: policy.class().as_str().to_owned(),
            version: policy.version(),
            duration_years: policy.duration_years(),
            disposition: policy.disposition().as_str(),
            effective_from: policy.effective_from(),
        }
    }
}
