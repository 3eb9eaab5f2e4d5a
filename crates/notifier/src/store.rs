//! Permanent notification storage.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use herald_common::types::NotificationRecord;

use crate::error::NotifierResult;

/// Postgres caps a statement at 65535 bind parameters.
const MAX_BIND_PARAMS: usize = 65_535;
const COLUMNS: usize = 13;

/// Outcome of an unordered bulk insert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertSummary {
    /// Rows written. Records whose id already exists are skipped, not counted.
    pub inserted: u64,
    /// Records that could not be written.
    pub failed: Vec<Uuid>,
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert a batch without ordering: one bad record must not block the rest.
    ///
    /// Returns `Err` only when nothing could be written at all.
    async fn insert_many(&self, records: &[NotificationRecord]) -> NotifierResult<InsertSummary>;

    /// Insert a single record directly.
    async fn create(&self, record: &NotificationRecord) -> NotifierResult<()>;
}

/// Postgres `notifications` table.
#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_chunk(&self, records: &[NotificationRecord]) -> Result<u64, sqlx::Error> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO notifications (id, title, description, category, recipient_type, \
             student, institution, branch, institution_admin, metadata, read, created_at, updated_at) ",
        );
        builder.push_values(records, |mut row, record| {
            row.push_bind(record.id)
                .push_bind(&record.payload.title)
                .push_bind(&record.payload.description)
                .push_bind(&record.payload.category)
                .push_bind(&record.payload.recipient_type)
                .push_bind(&record.payload.student)
                .push_bind(&record.payload.institution)
                .push_bind(&record.payload.branch)
                .push_bind(&record.payload.institution_admin)
                .push_bind(&record.payload.metadata)
                .push_bind(record.read)
                .push_bind(record.created_at)
                .push_bind(record.updated_at);
        });
        builder.push(" ON CONFLICT (id) DO NOTHING");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn insert_many(&self, records: &[NotificationRecord]) -> NotifierResult<InsertSummary> {
        let mut summary = InsertSummary::default();
        let mut last_error = None;

        for chunk in records.chunks(MAX_BIND_PARAMS / COLUMNS) {
            match self.insert_chunk(chunk).await {
                Ok(rows) => summary.inserted += rows,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        batch = chunk.len(),
                        "Bulk insert failed, retrying row by row"
                    );
                    for record in chunk {
                        match self.insert_chunk(std::slice::from_ref(record)).await {
                            Ok(rows) => summary.inserted += rows,
                            Err(e) => {
                                tracing::error!(id = %record.id, error = %e, "Failed to insert notification");
                                summary.failed.push(record.id);
                                last_error = Some(e);
                            }
                        }
                    }
                }
            }
        }

        match last_error {
            Some(e) if summary.failed.len() == records.len() => Err(e.into()),
            _ => Ok(summary),
        }
    }

    async fn create(&self, record: &NotificationRecord) -> NotifierResult<()> {
        self.insert_chunk(std::slice::from_ref(record)).await?;
        Ok(())
    }
}
