use async_trait::async_trait;
use chrono::{DateTime, Utc};
use custodian_application::{
    ReconciliationItem, ReconciliationQueue, ResourceMetadataRepository,
};
use custodian_core::{AppError, AppResult, NonEmptyString, PrincipalId};
use custodian_domain::{
    DispositionState, LegalHold, ResourceMetadata, ResourceRef, RetentionClass,
};
use sqlx::{FromRow, PgPool};

/// PostgreSQL-backed resource metadata and reconciliation queue.
#[derive(Clone)]
pub struct PostgresResourceMetadataRepository {
    pool: PgPool,
}

impl PostgresResourceMetadataRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const METADATA_COLUMNS: &str = r#"
    resource_type,
    resource_id,
    created_at,
    owner_id,
    retention_class,
    parent_type,
    parent_id,
    state,
    hold_reason,
    hold_placed_by,
    hold_placed_at,
    hold_review_at
"#;

#[derive(Debug, FromRow)]
struct ResourceMetadataRow {
    resource_type: String,
    resource_id: String,
    created_at: DateTime<Utc>,
    owner_id: Option<uuid::Uuid>,
    retention_class: String,
    parent_type: Option<String>,
    parent_id: Option<String>,
    state: String,
    hold_reason: Option<String>,
    hold_placed_by: Option<uuid::Uuid>,
    hold_placed_at: Option<DateTime<Utc>>,
    hold_review_at: Option<DateTime<Utc>>,
}

impl TryFrom<ResourceMetadataRow> for ResourceMetadata {
    type Error = AppError;

    fn try_from(row: ResourceMetadataRow) -> Result<Self, Self::Error> {
        let parent = match (row.parent_type, row.parent_id) {
            (Some(parent_type), Some(parent_id)) => Some(ResourceRef::parse(
                parent_type.as_str(),
                parent_id.as_str(),
            )?),
            _ => None,
        };

        let legal_hold = match (row.hold_reason, row.hold_placed_by, row.hold_placed_at) {
            (Some(reason), Some(placed_by), Some(placed_at)) => Some(LegalHold::new(
                NonEmptyString::new(reason)?,
                PrincipalId::from_uuid(placed_by),
                placed_at,
                row.hold_review_at,
            )),
            (None, _, _) => None,
            _ => {
                return Err(AppError::Internal(format!(
                    "legal hold on '{}/{}' is incomplete",
                    row.resource_type, row.resource_id
                )));
            }
        };

        Ok(ResourceMetadata::restore(
            ResourceRef::parse(row.resource_type.as_str(), row.resource_id.as_str())?,
            row.created_at,
            row.owner_id.map(PrincipalId::from_uuid),
            RetentionClass::new(row.retention_class)?,
            legal_hold,
            parent,
            DispositionState::parse(row.state.as_str())?,
        ))
    }
}

fn storage_error(context: &str) -> impl FnOnce(sqlx::Error) -> AppError + '_ {
    move |error| AppError::Unavailable(format!("{context}: {error}"))
}

fn rows_to_metadata(rows: Vec<ResourceMetadataRow>) -> AppResult<Vec<ResourceMetadata>> {
    rows.into_iter().map(ResourceMetadata::try_from).collect()
}

#[async_trait]
impl ResourceMetadataRepository for PostgresResourceMetadataRepository {
    async fn find_metadata(&self, reference: &ResourceRef) -> AppResult<Option<ResourceMetadata>> {
        let row = sqlx::query_as::<_, ResourceMetadataRow>(&format!(
            r#"
            SELECT {METADATA_COLUMNS}
            FROM resource_metadata
            WHERE resource_type = $1 AND resource_id = $2
            "#
        ))
        .bind(reference.resource_type().as_str())
        .bind(reference.resource_id().as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error("failed to find resource metadata"))?;

        row.map(ResourceMetadata::try_from).transpose()
    }

    async fn save_metadata(&self, metadata: ResourceMetadata) -> AppResult<()> {
        let reference = metadata.reference();
        let hold = metadata.legal_hold();
        let parent = metadata.parent();

        sqlx::query(
            r#"
            INSERT INTO resource_metadata (
                resource_type,
                resource_id,
                created_at,
                owner_id,
                retention_class,
                parent_type,
                parent_id,
                state,
                hold_reason,
                hold_placed_by,
                hold_placed_at,
                hold_review_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (resource_type, resource_id) DO UPDATE
            SET
                parent_type = EXCLUDED.parent_type,
                parent_id = EXCLUDED.parent_id,
                state = EXCLUDED.state,
                hold_reason = EXCLUDED.hold_reason,
                hold_placed_by = EXCLUDED.hold_placed_by,
                hold_placed_at = EXCLUDED.hold_placed_at,
                hold_review_at = EXCLUDED.hold_review_at,
                updated_at = now()
            "#,
        )
        .bind(reference.resource_type().as_str())
        .bind(reference.resource_id().as_str())
        .bind(metadata.created_at())
        .bind(metadata.owner().map(|owner| owner.as_uuid()))
        .bind(metadata.retention_class().as_str())
        .bind(parent.map(|parent| parent.resource_type().as_str().to_owned()))
        .bind(parent.map(|parent| parent.resource_id().as_str().to_owned()))
        .bind(metadata.state().as_str())
        .bind(hold.map(|hold| hold.reason().as_str().to_owned()))
        .bind(hold.map(|hold| hold.placed_by().as_uuid()))
        .bind(hold.map(LegalHold::placed_at))
        .bind(hold.and_then(LegalHold::review_at))
        .execute(&self.pool)
        .await
        .map_err(storage_error("failed to save resource metadata"))?;

        Ok(())
    }

    async fn replace_metadata(
        &self,
        expected: &ResourceMetadata,
        metadata: ResourceMetadata,
    ) -> AppResult<bool> {
        let reference = metadata.reference();
        let hold = metadata.legal_hold();
        let parent = metadata.parent();
        let expected_hold = expected.legal_hold();
        let expected_parent = expected.parent();

        let result = sqlx::query(
            r#"
            UPDATE resource_metadata
            SET
                parent_type = $3,
                parent_id = $4,
                state = $5,
                hold_reason = $6,
                hold_placed_by = $7,
                hold_placed_at = $8,
                hold_review_at = $9,
                updated_at = now()
            WHERE resource_type = $1
              AND resource_id = $2
              AND state = $10
              AND hold_placed_by IS NOT DISTINCT FROM $11
              AND hold_placed_at IS NOT DISTINCT FROM $12
              AND parent_type IS NOT DISTINCT FROM $13
              AND parent_id IS NOT DISTINCT FROM $14
            "#,
        )
        .bind(reference.resource_type().as_str())
        .bind(reference.resource_id().as_str())
        .bind(parent.map(|parent| parent.resource_type().as_str().to_owned()))
        .bind(parent.map(|parent| parent.resource_id().as_str().to_owned()))
        .bind(metadata.state().as_str())
        .bind(hold.map(|hold| hold.reason().as_str().to_owned()))
        .bind(hold.map(|hold| hold.placed_by().as_uuid()))
        .bind(hold.map(LegalHold::placed_at))
        .bind(hold.and_then(LegalHold::review_at))
        .bind(expected.state().as_str())
        .bind(expected_hold.map(|hold| hold.placed_by().as_uuid()))
        .bind(expected_hold.map(LegalHold::placed_at))
        .bind(expected_parent.map(|parent| parent.resource_type().as_str().to_owned()))
        .bind(expected_parent.map(|parent| parent.resource_id().as_str().to_owned()))
        .execute(&self.pool)
        .await
        .map_err(storage_error("failed to replace resource metadata"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_metadata_batch(
        &self,
        after: Option<&ResourceRef>,
        limit: usize,
    ) -> AppResult<Vec<ResourceMetadata>> {
        let rows = sqlx::query_as::<_, ResourceMetadataRow>(&format!(
            r#"
            SELECT {METADATA_COLUMNS}
            FROM resource_metadata
            WHERE $1::TEXT IS NULL OR (resource_type, resource_id) > ($1, $2)
            ORDER BY resource_type, resource_id
            LIMIT $3
            "#
        ))
        .bind(after.map(|after| after.resource_type().as_str().to_owned()))
        .bind(after.map(|after| after.resource_id().as_str().to_owned()))
        .bind(i64::try_from(limit.max(1)).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error("failed to list resource metadata"))?;

        rows_to_metadata(rows)
    }

    async fn list_dependents(&self, parent: &ResourceRef) -> AppResult<Vec<ResourceMetadata>> {
        let rows = sqlx::query_as::<_, ResourceMetadataRow>(&format!(
            r#"
            SELECT {METADATA_COLUMNS}
            FROM resource_metadata
            WHERE parent_type = $1 AND parent_id = $2
            ORDER BY resource_type, resource_id
            "#
        ))
        .bind(parent.resource_type().as_str())
        .bind(parent.resource_id().as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error("failed to list dependent resources"))?;

        rows_to_metadata(rows)
    }

    async fn list_held_references(&self) -> AppResult<Vec<ResourceRef>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT resource_type, resource_id
            FROM resource_metadata
            WHERE hold_reason IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error("failed to list held resources"))?;

        rows.into_iter()
            .map(|(resource_type, resource_id)| {
                ResourceRef::parse(resource_type.as_str(), resource_id.as_str())
            })
            .collect()
    }
}

#[async_trait]
impl ReconciliationQueue for PostgresResourceMetadataRepository {
    async fn enqueue(&self, item: ReconciliationItem) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reconciliation_items (
                resource_type,
                resource_id,
                action,
                principal_id,
                correlation_id,
                flagged_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (correlation_id) DO NOTHING
            "#,
        )
        .bind(item.resource.resource_type().as_str())
        .bind(item.resource.resource_id().as_str())
        .bind(item.action.as_str())
        .bind(item.principal_id.as_uuid())
        .bind(item.correlation_id.as_uuid())
        .bind(item.flagged_at)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to enqueue reconciliation item: {error}"))
        })?;

        tracing::error!(
            resource = %item.resource,
            correlation_id = %item.correlation_id,
            "operation flagged for reconciliation"
        );
        Ok(())
    }
}
