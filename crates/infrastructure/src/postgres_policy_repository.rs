use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use custodian_application::{PolicyRepository, PolicySnapshot, PrincipalDirectory};
use custodian_core::{AppError, AppResult, NonEmptyString, PrincipalId};
use custodian_domain::{
    AccessAction, AuditRetentionPolicy, DispositionAction, FieldSet, Permission, Principal,
    ResourceType, RetentionClass, RetentionPolicy, RoleName, RoleVersion,
};
use sqlx::{FromRow, PgPool};

/// PostgreSQL-backed versioned policy tables and principal directory.
#[derive(Clone)]
pub struct PostgresPolicyRepository {
    pool: PgPool,
}

impl PostgresPolicyRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct RoleVersionRow {
    name: String,
    version: i32,
    permissions: serde_json::Value,
    field_entitlements: serde_json::Value,
}

#[derive(Debug, FromRow)]
struct RetentionPolicyRow {
    retention_class: String,
    version: i32,
    duration_years: i16,
    disposition: String,
    effective_from: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct AuditRetentionRow {
    retention_years: i16,
    hot_tier_days: i16,
}

#[derive(Debug, FromRow)]
struct PrincipalRow {
    id: uuid::Uuid,
    handle: String,
    active: bool,
    roles: serde_json::Value,
}

fn storage_error(context: &str) -> impl FnOnce(sqlx::Error) -> AppError + '_ {
    move |error| AppError::Unavailable(format!("{context}: {error}"))
}

fn map_version_conflict(error: sqlx::Error, label: String) -> AppError {
    if let sqlx::Error::Database(database_error) = &error
        && database_error.code().as_deref() == Some("23505")
    {
        return AppError::Conflict(format!("{label} already exists"));
    }

    AppError::Internal(format!("failed to append {label}: {error}"))
}

fn malformed(label: &str) -> impl FnOnce(serde_json::Error) -> AppError + '_ {
    move |error| AppError::Internal(format!("stored {label} is malformed: {error}"))
}

fn stored_version(value: i32, label: &str) -> AppResult<u32> {
    u32::try_from(value).map_err(|_| AppError::Internal(format!("stored {label} is negative")))
}

impl TryFrom<RoleVersionRow> for RoleVersion {
    type Error = AppError;

    fn try_from(row: RoleVersionRow) -> Result<Self, Self::Error> {
        let permissions: BTreeSet<Permission> =
            serde_json::from_value(row.permissions).map_err(malformed("role permissions"))?;
        let field_entitlements: BTreeMap<ResourceType, FieldSet> =
            serde_json::from_value(row.field_entitlements)
                .map_err(malformed("role field entitlements"))?;

        RoleVersion::new(
            RoleName::new(row.name)?,
            stored_version(row.version, "role version")?,
            permissions,
            field_entitlements,
        )
    }
}

impl TryFrom<RetentionPolicyRow> for RetentionPolicy {
    type Error = AppError;

    fn try_from(row: RetentionPolicyRow) -> Result<Self, Self::Error> {
        let duration_years = u16::try_from(row.duration_years)
            .map_err(|_| AppError::Internal("stored retention duration is negative".to_owned()))?;

        RetentionPolicy::new(
            RetentionClass::new(row.retention_class)?,
            stored_version(row.version, "retention policy version")?,
            duration_years,
            DispositionAction::parse(row.disposition.as_str())?,
            row.effective_from,
        )
    }
}

impl TryFrom<PrincipalRow> for Principal {
    type Error = AppError;

    fn try_from(row: PrincipalRow) -> Result<Self, Self::Error> {
        let roles: BTreeSet<RoleName> =
            serde_json::from_value(row.roles).map_err(malformed("principal roles"))?;

        Ok(Principal::restore(
            PrincipalId::from_uuid(row.id),
            NonEmptyString::new(row.handle)?,
            row.active,
            roles,
        ))
    }
}

#[async_trait]
impl PolicyRepository for PostgresPolicyRepository {
    async fn load_snapshot(&self) -> AppResult<PolicySnapshot> {
        let roles = sqlx::query_as::<_, RoleVersionRow>(
            r#"
            SELECT name, version, permissions, field_entitlements
            FROM role_versions
            ORDER BY name, version
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error("failed to load role versions"))?
        .into_iter()
        .map(RoleVersion::try_from)
        .collect::<AppResult<Vec<_>>>()?;

        let retention_policies = sqlx::query_as::<_, RetentionPolicyRow>(
            r#"
            SELECT retention_class, version, duration_years, disposition, effective_from
            FROM retention_policies
            ORDER BY retention_class, version
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error("failed to load retention policies"))?
        .into_iter()
        .map(RetentionPolicy::try_from)
        .collect::<AppResult<Vec<_>>>()?;

        let direct_subject_actions = sqlx::query_scalar::<_, String>(
            "SELECT action FROM direct_subject_actions",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error("failed to load direct subject actions"))?
        .iter()
        .map(|action| action.parse::<AccessAction>())
        .collect::<AppResult<BTreeSet<_>>>()?;

        let audit_retention = sqlx::query_as::<_, AuditRetentionRow>(
            "SELECT retention_years, hot_tier_days FROM audit_retention_settings",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error("failed to load audit retention"))?
        .map(|row| -> AppResult<AuditRetentionPolicy> {
            Ok(AuditRetentionPolicy {
                retention_years: u16::try_from(row.retention_years).map_err(|_| {
                    AppError::Internal("stored audit retention is negative".to_owned())
                })?,
                hot_tier_days: u16::try_from(row.hot_tier_days).map_err(|_| {
                    AppError::Internal("stored hot tier window is negative".to_owned())
                })?,
            })
        })
        .transpose()?
        .unwrap_or_default();

        Ok(PolicySnapshot::new(
            roles,
            retention_policies,
            direct_subject_actions,
            audit_retention,
        ))
    }

    async fn append_role_version(&self, role: RoleVersion) -> AppResult<()> {
        let permissions = serde_json::to_value(role.permissions()).map_err(|error| {
            AppError::Internal(format!("failed to encode role permissions: {error}"))
        })?;
        let field_entitlements =
            serde_json::to_value(role.field_entitlements()).map_err(|error| {
                AppError::Internal(format!("failed to encode field entitlements: {error}"))
            })?;
        let version = i32::try_from(role.version())
            .map_err(|_| AppError::Validation("role version exceeds storage range".to_owned()))?;

        sqlx::query(
            r#"
            INSERT INTO role_versions (name, version, permissions, field_entitlements)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(role.name().as_str())
        .bind(version)
        .bind(permissions)
        .bind(field_entitlements)
        .execute(&self.pool)
        .await
        .map_err(|error| map_version_conflict(error, format!("role version '{}'", role.version_ref())))?;

        Ok(())
    }

    async fn append_retention_policy(&self, policy: RetentionPolicy) -> AppResult<()> {
        let version = i32::try_from(policy.version()).map_err(|_| {
            AppError::Validation("retention policy version exceeds storage range".to_owned())
        })?;
        let duration_years = i16::try_from(policy.duration_years()).map_err(|_| {
            AppError::Validation("retention duration exceeds storage range".to_owned())
        })?;

        sqlx::query(
            r#"
            INSERT INTO retention_policies (
                retention_class,
                version,
                duration_years,
                disposition,
                effective_from
            )
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(policy.class().as_str())
        .bind(version)
        .bind(duration_years)
        .bind(policy.disposition().as_str())
        .bind(policy.effective_from())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            map_version_conflict(
                error,
                format!(
                    "retention policy '{}' version {}",
                    policy.class().as_str(),
                    policy.version()
                ),
            )
        })?;

        Ok(())
    }
}

#[async_trait]
impl PrincipalDirectory for PostgresPolicyRepository {
    async fn find_principal(&self, principal_id: PrincipalId) -> AppResult<Option<Principal>> {
        let row = sqlx::query_as::<_, PrincipalRow>(
            "SELECT id, handle, active, roles FROM principals WHERE id = $1",
        )
        .bind(principal_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error("failed to find principal"))?;

        row.map(Principal::try_from).transpose()
    }

    async fn save_principal(&self, principal: Principal) -> AppResult<()> {
        let roles = serde_json::to_value(principal.roles()).map_err(|error| {
            AppError::Internal(format!("failed to encode principal roles: {error}"))
        })?;

        // Deactivation is permanent.
        sqlx::query(
            r#"
            INSERT INTO principals (id, handle, active, roles)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET
                handle = EXCLUDED.handle,
                active = principals.active AND EXCLUDED.active,
                roles = EXCLUDED.roles
            "#,
        )
        .bind(principal.id().as_uuid())
        .bind(principal.handle())
        .bind(principal.is_active())
        .bind(roles)
        .execute(&self.pool)
        .await
        .map_err(storage_error("failed to save principal"))?;

        Ok(())
    }
}
