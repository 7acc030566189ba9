use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::IncidentId;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    IdempotencyKey, Result, SagaId, SagaRecord, SagaState, StepRecord, StepState, StepStoreError,
    Version,
    store::{IdempotencyStore, validate_record_for_append},
};

/// PostgreSQL-backed idempotency store.
///
/// Survives process restarts, which is what makes a retried task safe when
/// the first attempt died half-way through a saga.
#[derive(Clone)]
pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    /// Creates a new PostgreSQL idempotency store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_record(row: PgRow) -> Result<StepRecord> {
        let state: String = row.try_get("state")?;
        Ok(StepRecord {
            saga_id: SagaId::new(row.try_get::<String, _>("saga_id")?),
            sequence: Version::new(row.try_get("sequence")?),
            step_name: row.try_get("step_name")?,
            idempotency_key: IdempotencyKey::from_raw(
                row.try_get::<String, _>("idempotency_key")?,
            ),
            state: state
                .parse::<StepState>()
                .map_err(StepStoreError::InvalidRecord)?,
            result_payload: row.try_get("result_payload")?,
            error: row.try_get("error")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }

    fn row_to_saga(row: PgRow) -> Result<SagaRecord> {
        let state: String = row.try_get("state")?;
        Ok(SagaRecord {
            saga_id: SagaId::new(row.try_get::<String, _>("saga_id")?),
            saga_type: row.try_get("saga_type")?,
            state: state
                .parse::<SagaState>()
                .map_err(StepStoreError::InvalidRecord)?,
            failed_step: row.try_get("failed_step")?,
            failure_reason: row.try_get("failure_reason")?,
            incident_id: row
                .try_get::<Option<Uuid>, _>("incident_id")?
                .map(IncidentId::from_uuid),
            result: row.try_get("result")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    async fn append(&self, mut record: StepRecord, expected_version: Version) -> Result<Version> {
        validate_record_for_append(&record)?;

        let saga_id = record.saga_id.clone();
        let mut tx = self.pool.begin().await?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(sequence) FROM saga_step_records WHERE saga_id = $1")
                .bind(saga_id.as_str())
                .fetch_one(&mut *tx)
                .await?;

        let actual = Version::new(current_version.unwrap_or(0));
        if actual != expected_version {
            return Err(StepStoreError::ConcurrencyConflict {
                saga_id,
                expected: expected_version,
                actual,
            });
        }

        let next = actual.next();
        record.sequence = next;

        sqlx::query(
            r#"
            INSERT INTO saga_step_records
                (saga_id, sequence, idempotency_key, step_name, state, result_payload, error, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.saga_id.as_str())
        .bind(record.sequence.as_i64())
        .bind(record.idempotency_key.as_str())
        .bind(&record.step_name)
        .bind(record.state.as_str())
        .bind(&record.result_payload)
        .bind(&record.error)
        .bind(record.recorded_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            // A racing writer inserted the same sequence between our read and insert
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_saga_sequence")
            {
                return StepStoreError::ConcurrencyConflict {
                    saga_id: saga_id.clone(),
                    expected: expected_version,
                    actual: next,
                };
            }
            StepStoreError::Database(e)
        })?;

        tx.commit().await?;
        tracing::debug!(
            saga_id = %record.saga_id,
            step = %record.step_name,
            state = %record.state,
            sequence = %next,
            "step record appended"
        );
        Ok(next)
    }

    async fn records_for_saga(&self, saga_id: &SagaId) -> Result<Vec<StepRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT saga_id, sequence, idempotency_key, step_name, state, result_payload, error, recorded_at
            FROM saga_step_records
            WHERE saga_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(saga_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn latest(&self, key: &IdempotencyKey) -> Result<Option<StepRecord>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT saga_id, sequence, idempotency_key, step_name, state, result_payload, error, recorded_at
            FROM saga_step_records
            WHERE idempotency_key = $1
            ORDER BY sequence DESC
            LIMIT 1
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn journal_version(&self, saga_id: &SagaId) -> Result<Version> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(sequence) FROM saga_step_records WHERE saga_id = $1")
                .bind(saga_id.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(version.map(Version::new).unwrap_or(Version::initial()))
    }

    async fn save_saga(&self, saga: SagaRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sagas
                (saga_id, saga_type, state, failed_step, failure_reason, incident_id, result, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (saga_id) DO UPDATE SET
                saga_type = EXCLUDED.saga_type,
                state = EXCLUDED.state,
                failed_step = EXCLUDED.failed_step,
                failure_reason = EXCLUDED.failure_reason,
                incident_id = EXCLUDED.incident_id,
                result = EXCLUDED.result,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(saga.saga_id.as_str())
        .bind(&saga.saga_type)
        .bind(saga.state.as_str())
        .bind(&saga.failed_step)
        .bind(&saga.failure_reason)
        .bind(saga.incident_id.map(|id| id.as_uuid()))
        .bind(&saga.result)
        .bind(saga.created_at)
        .bind(saga.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_saga(&self, saga_id: &SagaId) -> Result<Option<SagaRecord>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT saga_id, saga_type, state, failed_step, failure_reason, incident_id, result, created_at, updated_at
            FROM sagas
            WHERE saga_id = $1
            "#,
        )
        .bind(saga_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_saga).transpose()
    }
}
