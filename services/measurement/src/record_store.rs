use crate::config::DatabaseConfig;
use crate::error::{Result, ServiceError};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Stored measurement record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    /// Store-assigned identifier
    pub id: Uuid,
    pub product_name: String,
    pub description: String,
    /// Submitting user, not unique across records
    pub owner_id: String,
    /// Locator of the image file in the blob store
    pub blob_path: String,
    /// The same image, base64 encoded
    pub blob_inline: String,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the record was last written
    pub updated_at: DateTime<Utc>,
}

/// A fully populated measurement that has not been committed yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewMeasurement {
    pub product_name: String,
    pub description: String,
    pub owner_id: String,
    pub blob_path: String,
    pub blob_inline: String,
}

/// Document store holding one record per measurement.
///
/// Every method is a single store operation; nothing spans more than one
/// statement.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Commit a new record, assigning its id and timestamps
    async fn insert(&self, record: NewMeasurement) -> Result<Measurement>;

    /// Every record, in no guaranteed order
    async fn find_all(&self) -> Result<Vec<Measurement>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Measurement>>;

    /// All records for an owner; an empty result is not an error here
    async fn find_by_owner(&self, owner_id: &str) -> Result<Vec<Measurement>>;

    /// The first record for an owner, used by owner-scoped updates
    async fn find_one_by_owner(&self, owner_id: &str) -> Result<Option<Measurement>>;

    /// Overwrite the mutable fields of an existing record in place
    async fn update(&self, record: &Measurement) -> Result<Measurement>;

    /// Delete every record for an owner, returning how many went away
    async fn delete_by_owner(&self, owner_id: &str) -> Result<u64>;

    /// Connectivity check for readiness probes
    async fn ping(&self) -> Result<()>;
}

/// Record store backed by PostgreSQL
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Create a new record store with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .as_deref()
            .context("database.url is not configured")?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    #[instrument(skip(self, record), fields(owner_id = %record.owner_id))]
    async fn insert(&self, record: NewMeasurement) -> Result<Measurement> {
        let inserted = sqlx::query_as::<_, Measurement>(
            r#"
            INSERT INTO measurements (
                id, product_name, description, owner_id,
                blob_path, blob_inline, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, NOW(), NOW()
            )
            RETURNING id, product_name, description, owner_id,
                      blob_path, blob_inline, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&record.product_name)
        .bind(&record.description)
        .bind(&record.owner_id)
        .bind(&record.blob_path)
        .bind(&record.blob_inline)
        .fetch_one(&self.pool)
        .await?;

        debug!(id = %inserted.id, "Measurement inserted");

        Ok(inserted)
    }

    async fn find_all(&self) -> Result<Vec<Measurement>> {
        let records = sqlx::query_as::<_, Measurement>(
            r#"
            SELECT id, product_name, description, owner_id,
                   blob_path, blob_inline, created_at, updated_at
            FROM measurements
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Measurement>> {
        let record = sqlx::query_as::<_, Measurement>(
            r#"
            SELECT id, product_name, description, owner_id,
                   blob_path, blob_inline, created_at, updated_at
            FROM measurements
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    #[instrument(skip(self))]
    async fn find_by_owner(&self, owner_id: &str) -> Result<Vec<Measurement>> {
        let records = sqlx::query_as::<_, Measurement>(
            r#"
            SELECT id, product_name, description, owner_id,
                   blob_path, blob_inline, created_at, updated_at
            FROM measurements
            WHERE owner_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    #[instrument(skip(self))]
    async fn find_one_by_owner(&self, owner_id: &str) -> Result<Option<Measurement>> {
        let record = sqlx::query_as::<_, Measurement>(
            r#"
            SELECT id, product_name, description, owner_id,
                   blob_path, blob_inline, created_at, updated_at
            FROM measurements
            WHERE owner_id = $1
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    #[instrument(skip(self, record), fields(id = %record.id))]
    async fn update(&self, record: &Measurement) -> Result<Measurement> {
        let updated = sqlx::query_as::<_, Measurement>(
            r#"
            UPDATE measurements
            SET product_name = $2,
                description = $3,
                blob_path = $4,
                blob_inline = $5,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, product_name, description, owner_id,
                      blob_path, blob_inline, created_at, updated_at
            "#,
        )
        .bind(record.id)
        .bind(&record.product_name)
        .bind(&record.description)
        .bind(&record.blob_path)
        .bind(&record.blob_inline)
        .fetch_optional(&self.pool)
        .await?;

        updated.ok_or(ServiceError::RecordNotFound(record.id))
    }

    #[instrument(skip(self))]
    async fn delete_by_owner(&self, owner_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM measurements WHERE owner_id = $1")
            .bind(owner_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// In-process record store keeping records in insertion order
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<Vec<Measurement>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, record: NewMeasurement) -> Result<Measurement> {
        let now = Utc::now();
        let inserted = Measurement {
            id: Uuid::new_v4(),
            product_name: record.product_name,
            description: record.description,
            owner_id: record.owner_id,
            blob_path: record.blob_path,
            blob_inline: record.blob_inline,
            created_at: now,
            updated_at: now,
        };

        self.records.write().await.push(inserted.clone());
        Ok(inserted)
    }

    async fn find_all(&self) -> Result<Vec<Measurement>> {
        Ok(self.records.read().await.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Measurement>> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn find_by_owner(&self, owner_id: &str) -> Result<Vec<Measurement>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn find_one_by_owner(&self, owner_id: &str) -> Result<Option<Measurement>> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.owner_id == owner_id).cloned())
    }

    async fn update(&self, record: &Measurement) -> Result<Measurement> {
        let mut records = self.records.write().await;
        let existing = records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or(ServiceError::RecordNotFound(record.id))?;

        existing.product_name = record.product_name.clone();
        existing.description = record.description.clone();
        existing.blob_path = record.blob_path.clone();
        existing.blob_inline = record.blob_inline.clone();
        existing.updated_at = Utc::now();

        Ok(existing.clone())
    }

    async fn delete_by_owner(&self, owner_id: &str) -> Result<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.owner_id != owner_id);
        Ok((before - records.len()) as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
