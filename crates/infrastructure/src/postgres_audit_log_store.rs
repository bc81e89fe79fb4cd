use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use custodian_application::{
    AuditLogStore, AuditPage, AuditQuery, AuditReceipt, AuditTierStore,
};
use custodian_core::{AppError, AppResult, ChannelTag, CorrelationId, PrincipalId};
use custodian_domain::{
    AccessAction, AuditEntry, AuditOutcome, AuditRecord, DispositionDetail, GENESIS_HASH,
    ResourceRef, RoleVersionRef,
};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

/// PostgreSQL-backed append-only audit log with hot and cold tables.
#[derive(Clone)]
pub struct PostgresAuditLogStore {
    pool: PgPool,
}

impl PostgresAuditLogStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const RECORD_COLUMNS: &str = r#"
    record_id,
    sequence,
    recorded_at,
    principal_id,
    roles,
    action,
    resource_type,
    resource_id,
    outcome_status,
    outcome_code,
    channel,
    correlation_id,
    disposition,
    previous_hash,
    hash
"#;

#[derive(Debug, FromRow)]
struct AuditRecordRow {
    record_id: i64,
    sequence: i64,
    recorded_at: DateTime<Utc>,
    principal_id: uuid::Uuid,
    roles: serde_json::Value,
    action: String,
    resource_type: String,
    resource_id: String,
    outcome_status: String,
    outcome_code: Option<String>,
    channel: String,
    correlation_id: uuid::Uuid,
    disposition: Option<serde_json::Value>,
    previous_hash: String,
    hash: String,
}

#[derive(Debug, FromRow)]
struct StreamHeadRow {
    last_sequence: i64,
    last_hash: String,
}

fn to_i64(value: u64, label: &str) -> AppResult<i64> {
    i64::try_from(value).map_err(|_| AppError::Internal(format!("{label} exceeds storage range")))
}

fn to_u64(value: i64, label: &str) -> AppResult<u64> {
    u64::try_from(value)
        .map_err(|_| AppError::Internal(format!("stored {label} '{value}' is negative")))
}

fn storage_error(context: &str) -> impl FnOnce(sqlx::Error) -> AppError + '_ {
    move |error| AppError::Unavailable(format!("{context}: {error}"))
}

impl TryFrom<AuditRecordRow> for AuditRecord {
    type Error = AppError;

    fn try_from(row: AuditRecordRow) -> Result<Self, Self::Error> {
        let roles: Vec<RoleVersionRef> = serde_json::from_value(row.roles).map_err(|error| {
            AppError::Internal(format!("stored audit roles are malformed: {error}"))
        })?;
        let disposition: Option<DispositionDetail> = row
            .disposition
            .map(serde_json::from_value)
            .transpose()
            .map_err(|error| {
                AppError::Internal(format!("stored disposition detail is malformed: {error}"))
            })?;

        let mut entry = AuditEntry::new(
            PrincipalId::from_uuid(row.principal_id),
            roles,
            row.action.parse::<AccessAction>()?,
            ResourceRef::parse(row.resource_type.as_str(), row.resource_id.as_str())?,
            AuditOutcome::from_parts(row.outcome_status.as_str(), row.outcome_code.as_deref())?,
            ChannelTag::new(row.channel)?,
            CorrelationId::from_uuid(row.correlation_id),
        );
        if let Some(disposition) = disposition {
            entry = entry.with_disposition(disposition);
        }

        Ok(AuditRecord::restore(
            to_u64(row.record_id, "record id")?,
            to_u64(row.sequence, "sequence")?,
            row.recorded_at,
            entry,
            row.previous_hash,
            row.hash,
        ))
    }
}

async fn find_existing(
    transaction: &mut Transaction<'_, Postgres>,
    correlation_id: CorrelationId,
) -> AppResult<Option<AuditRecord>> {
    let row = sqlx::query_as::<_, AuditRecordRow>(&format!(
        r#"
        SELECT {RECORD_COLUMNS} FROM audit_records WHERE correlation_id = $1
        UNION ALL
        SELECT {RECORD_COLUMNS} FROM audit_records_cold WHERE correlation_id = $1
        LIMIT 1
        "#
    ))
    .bind(correlation_id.as_uuid())
    .fetch_optional(&mut **transaction)
    .await
    .map_err(storage_error("failed to look up audit correlation id"))?;

    row.map(AuditRecord::try_from).transpose()
}

#[async_trait]
impl AuditLogStore for PostgresAuditLogStore {
    async fn append(&self, entry: AuditEntry) -> AppResult<AuditReceipt> {
        let resource = entry.resource().clone();
        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(storage_error("failed to begin audit transaction"))?;

        sqlx::query(
            r#"
            INSERT INTO audit_streams (resource_type, resource_id, last_sequence, last_hash)
            VALUES ($1, $2, 0, $3)
            ON CONFLICT (resource_type, resource_id) DO NOTHING
            "#,
        )
        .bind(resource.resource_type().as_str())
        .bind(resource.resource_id().as_str())
        .bind(GENESIS_HASH)
        .execute(&mut *transaction)
        .await
        .map_err(storage_error("failed to open audit stream"))?;

        let head = sqlx::query_as::<_, StreamHeadRow>(
            r#"
            SELECT last_sequence, last_hash
            FROM audit_streams
            WHERE resource_type = $1 AND resource_id = $2
            FOR UPDATE
            "#,
        )
        .bind(resource.resource_type().as_str())
        .bind(resource.resource_id().as_str())
        .fetch_one(&mut *transaction)
        .await
        .map_err(storage_error("failed to lock audit stream"))?;

        if let Some(existing) = find_existing(&mut transaction, entry.correlation_id()).await? {
            if !existing.entry().is_replayed_by(&entry) {
                return Err(AppError::Conflict(format!(
                    "correlation id '{}' already identifies a different audited call",
                    entry.correlation_id()
                )));
            }
            return Ok(AuditReceipt::for_record(&existing));
        }

        let record_id: i64 = sqlx::query_scalar("SELECT nextval('audit_record_id_seq')")
            .fetch_one(&mut *transaction)
            .await
            .map_err(storage_error("failed to allocate audit record id"))?;

        // TIMESTAMPTZ keeps microseconds; the hash must cover the stored value.
        let recorded_at = Utc::now().trunc_subsecs(6);
        let record = AuditRecord::seal(
            to_u64(record_id, "record id")?,
            to_u64(head.last_sequence, "sequence")? + 1,
            recorded_at,
            entry,
            head.last_hash,
        )?;
        let stored = record.entry();
        let roles = serde_json::to_value(stored.roles()).map_err(|error| {
            AppError::Internal(format!("failed to encode audit roles: {error}"))
        })?;
        let disposition = stored
            .disposition()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|error| {
                AppError::Internal(format!("failed to encode disposition detail: {error}"))
            })?;
        let sequence = to_i64(record.sequence(), "sequence")?;

        sqlx::query(
            r#"
            INSERT INTO audit_records (
                record_id,
                sequence,
                recorded_at,
                principal_id,
                roles,
                action,
                resource_type,
                resource_id,
                outcome_status,
                outcome_code,
                channel,
                correlation_id,
                disposition,
                previous_hash,
                hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(record_id)
        .bind(sequence)
        .bind(record.recorded_at())
        .bind(stored.principal_id().as_uuid())
        .bind(roles)
        .bind(stored.action().as_str())
        .bind(resource.resource_type().as_str())
        .bind(resource.resource_id().as_str())
        .bind(stored.outcome().as_str())
        .bind(stored.outcome().failure_code().map(|code| code.as_str()))
        .bind(stored.channel().as_str())
        .bind(stored.correlation_id().as_uuid())
        .bind(disposition)
        .bind(record.previous_hash())
        .bind(record.hash())
        .execute(&mut *transaction)
        .await
        .map_err(storage_error("failed to insert audit record"))?;

        sqlx::query(
            r#"
            UPDATE audit_streams
            SET last_sequence = $3, last_hash = $4
            WHERE resource_type = $1 AND resource_id = $2
            "#,
        )
        .bind(resource.resource_type().as_str())
        .bind(resource.resource_id().as_str())
        .bind(sequence)
        .bind(record.hash())
        .execute(&mut *transaction)
        .await
        .map_err(storage_error("failed to advance audit stream"))?;

        transaction
            .commit()
            .await
            .map_err(storage_error("failed to commit audit record"))?;

        Ok(AuditReceipt::for_record(&record))
    }

    async fn query(
        &self,
        query: &AuditQuery,
        cursor: Option<u64>,
        limit: usize,
    ) -> AppResult<AuditPage> {
        let after = to_i64(cursor.unwrap_or(0), "cursor")?;
        let capped_limit = i64::try_from(limit.max(1)).unwrap_or(i64::MAX);
        let statement = |filter: &str| {
            format!(
                r#"
                SELECT {RECORD_COLUMNS} FROM (
                    SELECT {RECORD_COLUMNS} FROM audit_records
                    UNION ALL
                    SELECT {RECORD_COLUMNS} FROM audit_records_cold
                ) AS records
                WHERE record_id > $1 AND {filter}
                ORDER BY record_id
                LIMIT $2
                "#
            )
        };

        let rows = match query {
            AuditQuery::ByResource(resource) => {
                let sql = statement("resource_type = $3 AND resource_id = $4");
                sqlx::query_as::<_, AuditRecordRow>(&sql)
                    .bind(after)
                    .bind(capped_limit)
                    .bind(resource.resource_type().as_str())
                    .bind(resource.resource_id().as_str())
                    .fetch_all(&self.pool)
                    .await
            }
            AuditQuery::ByPrincipal(principal_id) => {
                let sql = statement("principal_id = $3");
                sqlx::query_as::<_, AuditRecordRow>(&sql)
                    .bind(after)
                    .bind(capped_limit)
                    .bind(principal_id.as_uuid())
                    .fetch_all(&self.pool)
                    .await
            }
            AuditQuery::ByTimeRange { from, to } => {
                let sql = statement("recorded_at >= $3 AND recorded_at < $4");
                sqlx::query_as::<_, AuditRecordRow>(&sql)
                    .bind(after)
                    .bind(capped_limit)
                    .bind(*from)
                    .bind(*to)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(storage_error("failed to query audit records"))?;

        let records = rows
            .into_iter()
            .map(AuditRecord::try_from)
            .collect::<AppResult<Vec<_>>>()?;
        let next_cursor = (records.len() == limit)
            .then(|| records.last().map(AuditRecord::record_id))
            .flatten();

        Ok(AuditPage {
            records,
            next_cursor,
        })
    }

    async fn find_by_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> AppResult<Option<AuditRecord>> {
        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(storage_error("failed to begin audit lookup"))?;
        let record = find_existing(&mut transaction, correlation_id).await?;
        transaction
            .commit()
            .await
            .map_err(storage_error("failed to finish audit lookup"))?;
        Ok(record)
    }

    async fn list_hot_after(
        &self,
        cursor: Option<u64>,
        limit: usize,
    ) -> AppResult<Vec<AuditRecord>> {
        let rows = sqlx::query_as::<_, AuditRecordRow>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM audit_records
            WHERE record_id > $1
            ORDER BY record_id
            LIMIT $2
            "#
        ))
        .bind(to_i64(cursor.unwrap_or(0), "cursor")?)
        .bind(i64::try_from(limit.max(1)).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error("failed to list hot audit records"))?;

        rows.into_iter().map(AuditRecord::try_from).collect()
    }
}

#[async_trait]
impl AuditTierStore for PostgresAuditLogStore {
    async fn transition_to_cold(&self, before: DateTime<Utc>) -> AppResult<u64> {
        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(storage_error("failed to begin tier transition"))?;

        sqlx::query("SET LOCAL custodian.audit_maintenance = 'on'")
            .execute(&mut *transaction)
            .await
            .map_err(storage_error("failed to enter audit maintenance"))?;

        let moved = sqlx::query(&format!(
            r#"
            WITH moved AS (
                DELETE FROM audit_records
                WHERE recorded_at < $1
                RETURNING {RECORD_COLUMNS}
            )
            INSERT INTO audit_records_cold ({RECORD_COLUMNS})
            SELECT {RECORD_COLUMNS} FROM moved
            "#
        ))
        .bind(before)
        .execute(&mut *transaction)
        .await
        .map_err(storage_error("failed to move audit records to cold tier"))?
        .rows_affected();

        transaction
            .commit()
            .await
            .map_err(storage_error("failed to commit tier transition"))?;

        Ok(moved)
    }

    async fn purge_expired(
        &self,
        before: DateTime<Utc>,
        retained: &[ResourceRef],
    ) -> AppResult<u64> {
        let retained_types: Vec<String> = retained
            .iter()
            .map(|reference| reference.resource_type().as_str().to_owned())
            .collect();
        let retained_ids: Vec<String> = retained
            .iter()
            .map(|reference| reference.resource_id().as_str().to_owned())
            .collect();

        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(storage_error("failed to begin audit purge"))?;

        sqlx::query("SET LOCAL custodian.audit_maintenance = 'on'")
            .execute(&mut *transaction)
            .await
            .map_err(storage_error("failed to enter audit maintenance"))?;

        let purged = sqlx::query(
            r#"
            DELETE FROM audit_records_cold AS records
            WHERE records.recorded_at < $1
                AND NOT EXISTS (
                    SELECT 1
                    FROM unnest($2::TEXT[], $3::TEXT[]) AS held(resource_type, resource_id)
                    WHERE held.resource_type = records.resource_type
                        AND held.resource_id = records.resource_id
                )
            "#,
        )
        .bind(before)
        .bind(retained_types)
        .bind(retained_ids)
        .execute(&mut *transaction)
        .await
        .map_err(storage_error("failed to purge expired audit records"))?
        .rows_affected();

        transaction
            .commit()
            .await
            .map_err(storage_error("failed to commit audit purge"))?;

        Ok(purged)
    }
}
