//! Measurement ingestion and owner-scoped handlers
//!
//! A submission is persisted twice: the image bytes go to the blob store and
//! a base64 copy travels inside the record. The blob is always written before
//! the record is committed, so a failed blob write never leaves a record
//! behind. The reverse is not true:
//!
//! - a blob write followed by a failed record commit, on create or on update,
//!   leaves an orphaned file;
//! - replacing the image on update leaves the superseded file on disk;
//! - deleting an owner's records leaves their files on disk.
//!
//! All three are accepted gaps. Deleting the fresh blob when the commit fails
//! would close the first one.

use crate::blob_store::BlobStore;
use crate::error::{Result, ServiceError};
use crate::record_store::{Measurement, NewMeasurement, RecordStore};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;
use std::io;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// An uploaded file: its bytes and the name the client gave it
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Structured fields of a new submission
#[derive(Debug, Clone, Default)]
pub struct SubmissionFields {
    pub product_name: Option<String>,
    pub description: Option<String>,
    pub owner_id: Option<String>,
}

/// Replacement fields for an owner-scoped update
#[derive(Debug, Clone, Default)]
pub struct UpdateFields {
    pub product_name: Option<String>,
    pub description: Option<String>,
}

/// Result of comparing a record's file against its inline copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub id: Uuid,
    pub blob_path: String,
    pub file_exists: bool,
    pub inline_decodes: bool,
    pub consistent: bool,
}

/// Orchestrates the blob store and record store for every measurement operation
pub struct MeasurementService {
    blob_store: Arc<dyn BlobStore>,
    record_store: Arc<dyn RecordStore>,
}

impl MeasurementService {
    pub fn new(blob_store: Arc<dyn BlobStore>, record_store: Arc<dyn RecordStore>) -> Self {
        Self {
            blob_store,
            record_store,
        }
    }

    /// Validate a submission, store its image, and commit a new record
    #[instrument(skip_all, fields(owner_id = ?fields.owner_id))]
    pub async fn ingest(
        &self,
        fields: SubmissionFields,
        upload: Option<Upload>,
    ) -> Result<Measurement> {
        let product_name = require("productName", fields.product_name)?;
        let description = require("description", fields.description)?;
        let owner_id = require("ownerId", fields.owner_id)?;
        let upload = upload.ok_or(ServiceError::Validation { field: "image" })?;

        let (blob_path, blob_inline) = self.persist_blob(&upload).await?;

        let record = NewMeasurement {
            product_name,
            description,
            owner_id,
            blob_path,
            blob_inline,
        };
        let locator = record.blob_path.clone();

        let created = match self.record_store.insert(record).await {
            Ok(created) => created,
            Err(e) => {
                warn!(locator = %locator, error = %e, "Record commit failed, blob left orphaned");
                metrics::counter!("measurements.orphaned_blobs").increment(1);
                return Err(e);
            }
        };

        metrics::counter!("measurements.created").increment(1);
        info!(
            id = %created.id,
            owner_id = %created.owner_id,
            locator = %created.blob_path,
            size_bytes = upload.data.len(),
            "Measurement created"
        );

        Ok(created)
    }

    /// Overwrite the first record of an owner, optionally replacing its image
    #[instrument(skip(self, fields, upload))]
    pub async fn update_by_owner(
        &self,
        owner_id: &str,
        fields: UpdateFields,
        upload: Option<Upload>,
    ) -> Result<Measurement> {
        let product_name = require("productName", fields.product_name)?;
        let description = require("description", fields.description)?;
        let owner_id = require("ownerId", Some(owner_id.to_string()))?;

        let mut record = self
            .record_store
            .find_one_by_owner(&owner_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound {
                owner_id: owner_id.clone(),
            })?;

        record.product_name = product_name;
        record.description = description;

        let upload_written = upload.is_some();
        if let Some(upload) = upload {
            let (blob_path, blob_inline) = self.persist_blob(&upload).await?;
            debug!(superseded = %record.blob_path, locator = %blob_path, "Replacing image, previous blob retained");
            record.blob_path = blob_path;
            record.blob_inline = blob_inline;
        }

        let updated = match self.record_store.update(&record).await {
            Ok(updated) => updated,
            Err(e) => {
                if upload_written {
                    warn!(locator = %record.blob_path, error = %e, "Record update failed, blob left orphaned");
                    metrics::counter!("measurements.orphaned_blobs").increment(1);
                }
                return Err(e);
            }
        };

        metrics::counter!("measurements.updated").increment(1);
        info!(id = %updated.id, owner_id = %owner_id, "Measurement updated");

        Ok(updated)
    }

    /// Every record, unfiltered
    pub async fn list_all(&self) -> Result<Vec<Measurement>> {
        self.record_store.find_all().await
    }

    /// All records of an owner; an owner without records is `NotFound`
    #[instrument(skip(self))]
    pub async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Measurement>> {
        let owner_id = require("ownerId", Some(owner_id.to_string()))?;

        let records = self.record_store.find_by_owner(&owner_id).await?;
        if records.is_empty() {
            return Err(ServiceError::NotFound { owner_id });
        }

        Ok(records)
    }

    /// Delete every record of an owner; deleting nothing is `NotFound`
    #[instrument(skip(self))]
    pub async fn delete_by_owner(&self, owner_id: &str) -> Result<u64> {
        let owner_id = require("ownerId", Some(owner_id.to_string()))?;

        let deleted = self.record_store.delete_by_owner(&owner_id).await?;
        if deleted == 0 {
            return Err(ServiceError::NotFound { owner_id });
        }

        metrics::counter!("measurements.deleted").increment(deleted);
        info!(owner_id = %owner_id, deleted = deleted, "Measurements deleted");

        Ok(deleted)
    }

    pub async fn get(&self, id: Uuid) -> Result<Measurement> {
        self.record_store
            .find_by_id(id)
            .await?
            .ok_or(ServiceError::RecordNotFound(id))
    }

    /// Check that a record's file still matches its inline copy. Read-only.
    #[instrument(skip(self))]
    pub async fn verify(&self, id: Uuid) -> Result<ReconciliationReport> {
        let record = self.get(id).await?;

        let file_exists = match self.blob_store.exists(&record.blob_path).await {
            Ok(exists) => exists,
            Err(ServiceError::Io(e)) if e.kind() == io::ErrorKind::InvalidInput => false,
            Err(e) => return Err(e),
        };
        let file = if file_exists {
            Some(self.blob_store.read(&record.blob_path).await?)
        } else {
            None
        };
        let inline = STANDARD.decode(&record.blob_inline).ok();

        let consistent = matches!((&file, &inline), (Some(f), Some(i)) if f == i);
        if !consistent {
            error!(id = %id, locator = %record.blob_path, "Blob and inline copy disagree");
        }

        Ok(ReconciliationReport {
            id,
            blob_path: record.blob_path,
            file_exists,
            inline_decodes: inline.is_some(),
            consistent,
        })
    }

    /// Readiness of the underlying record store
    pub async fn ping(&self) -> Result<()> {
        self.record_store.ping().await
    }

    /// Write the image and produce its `(locator, base64)` pair
    async fn persist_blob(&self, upload: &Upload) -> Result<(String, String)> {
        let locator = self
            .blob_store
            .store(&upload.data, &upload.filename)
            .await
            .map_err(|e| {
                error!(filename = %upload.filename, error = %e, "Blob write failed");
                e
            })?;

        Ok((locator, STANDARD.encode(&upload.data)))
    }
}

/// A required text field: present and non-empty
fn require(field: &'static str, value: Option<String>) -> Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ServiceError::Validation { field }),
    }
}
