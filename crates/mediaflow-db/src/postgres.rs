use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediaflow_core::{ProcessingRecord, ProcessingStatus, QualityTier, Variant};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::error::RepositoryError;
use crate::repository::ProcessingRecordRepository;

/// Apply pending schema migrations from the workspace `migrations/` directory.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}

/// PostgreSQL-backed processing record repository
#[derive(Clone)]
pub struct PgProcessingRecordRepository {
    pool: PgPool,
}

impl PgProcessingRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_variants(&self, record_id: i64) -> Result<Vec<Variant>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, processing_record_id, quality_tier, storage_key, byte_size,
                   width, height, duration_seconds, bitrate_kbps
            FROM processing_variants
            WHERE processing_record_id = $1
            "#,
        )
        .bind(record_id)
        .fetch_all(&self.pool)
        .await?;

        let mut variants = rows
            .iter()
            .map(variant_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        variants.sort_by_key(|v| v.quality_tier);
        Ok(variants)
    }

    async fn write_variants(
        tx: &mut Transaction<'_, Postgres>,
        record: &ProcessingRecord,
    ) -> Result<(), RepositoryError> {
        let keep: Vec<i64> = record.variants.iter().map(|v| v.id).collect();

        // Last write wins: rows not in the new set are dropped, rows already
        // present are left untouched.
        sqlx::query(
            r#"
            DELETE FROM processing_variants
            WHERE processing_record_id = $1 AND NOT (id = ANY($2))
            "#,
        )
        .bind(record.id)
        .bind(&keep)
        .execute(&mut **tx)
        .await?;

        for variant in &record.variants {
            sqlx::query(
                r#"
                INSERT INTO processing_variants (
                    id, processing_record_id, quality_tier, storage_key, byte_size,
                    width, height, duration_seconds, bitrate_kbps
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(variant.id)
            .bind(record.id)
            .bind(variant.quality_tier.as_str())
            .bind(&variant.storage_key)
            .bind(variant.byte_size)
            .bind(variant.width.and_then(|w| i32::try_from(w).ok()))
            .bind(variant.height.and_then(|h| i32::try_from(h).ok()))
            .bind(variant.duration_seconds)
            .bind(variant.bitrate_kbps.and_then(|b| i32::try_from(b).ok()))
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl ProcessingRecordRepository for PgProcessingRecordRepository {
    async fn create(&self, record: &ProcessingRecord) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO processing_records (
                id, source_media_id, upload_key, status, original_file_url,
                error_message, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.source_media_id)
        .bind(&record.upload_key)
        .bind(record.status.as_str())
        .bind(&record.original_file_url)
        .bind(&record.error_message)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                RepositoryError::Duplicate(format!("source media {}", record.source_media_id)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_source_media_id(
        &self,
        source_media_id: i64,
    ) -> Result<Option<ProcessingRecord>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, source_media_id, upload_key, status, original_file_url,
                   error_message, created_at, updated_at
            FROM processing_records
            WHERE source_media_id = $1
            "#,
        )
        .bind(source_media_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut record = record_from_row(&row)?;
        record.variants = self.load_variants(record.id).await?;
        Ok(Some(record))
    }

    async fn update(&self, record: &ProcessingRecord) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let stored: Option<String> = sqlx::query_scalar(
            r#"
            SELECT status FROM processing_records
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(record.id)
        .fetch_optional(&mut *tx)
        .await?;

        let stored = stored.ok_or(RepositoryError::NotFound(record.source_media_id))?;
        let stored: ProcessingStatus = parse_column(&stored)?;
        stored.check_transition(record.status)?;

        sqlx::query(
            r#"
            UPDATE processing_records
            SET status = $2, original_file_url = $3, error_message = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(record.status.as_str())
        .bind(&record.original_file_url)
        .bind(&record.error_message)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;

        Self::write_variants(&mut tx, record).await?;

        tx.commit().await?;

        tracing::debug!(
            record_id = record.id,
            source_media_id = record.source_media_id,
            status = %record.status,
            variant_count = record.variants.len(),
            "Processing record updated"
        );

        Ok(())
    }
}

fn record_from_row(row: &PgRow) -> Result<ProcessingRecord, RepositoryError> {
    let status: String = row.try_get("status")?;
    Ok(ProcessingRecord {
        id: row.try_get("id")?,
        source_media_id: row.try_get("source_media_id")?,
        upload_key: row.try_get("upload_key")?,
        status: parse_column(&status)?,
        original_file_url: row.try_get("original_file_url")?,
        variants: Vec::new(),
        error_message: row.try_get("error_message")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn variant_from_row(row: &PgRow) -> Result<Variant, RepositoryError> {
    let tier: String = row.try_get("quality_tier")?;
    let width: Option<i32> = row.try_get("width")?;
    let height: Option<i32> = row.try_get("height")?;
    let bitrate: Option<i32> = row.try_get("bitrate_kbps")?;

    Ok(Variant {
        id: row.try_get("id")?,
        processing_record_id: row.try_get("processing_record_id")?,
        quality_tier: parse_column::<QualityTier>(&tier)?,
        storage_key: row.try_get("storage_key")?,
        byte_size: row.try_get("byte_size")?,
        width: width.and_then(|w| u32::try_from(w).ok()),
        height: height.and_then(|h| u32::try_from(h).ok()),
        duration_seconds: row.try_get("duration_seconds")?,
        bitrate_kbps: bitrate.and_then(|b| u32::try_from(b).ok()),
    })
}

fn parse_column<T>(raw: &str) -> Result<T, RepositoryError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| RepositoryError::Decode(e.to_string()))
}
