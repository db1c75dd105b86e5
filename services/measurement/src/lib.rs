//! Measurement Service
//!
//! Record service for product measurements. Clients submit a measurement
//! (product name, description, owner) together with an image; the service
//! writes the image to a content directory, embeds a base64 copy of it in the
//! record, and commits the record to PostgreSQL. Records can then be listed,
//! filtered by owner, updated by owner, or deleted by owner.
//!
//! ## Architecture
//!
//! ```text
//!   HTTP (axum)                                     ┌──────────────┐
//! ┌──────────────┐        ┌──────────────┐  write  │ Blob Store   │
//! │ /api/...     │───────▶│ Measurement  │────────▶│ media/       │
//! │ multipart +  │        │ Service      │         │ <ts>_<rnd>_… │
//! │ query        │◀───────│ (pipeline)   │         └──────────────┘
//! └──────────────┘        └──────────────┘
//!                                │ commit          ┌──────────────┐
//!                                └────────────────▶│ Record Store │
//!                                                  │ measurements │
//!                                                  └──────────────┘
//! ```
//!
//! The blob is written before the record is committed; see [`pipeline`] for
//! the consistency gaps this ordering leaves open.

pub mod api;
pub mod blob_store;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod record_store;

pub use api::{create_router, AppState};
pub use blob_store::{BlobStore, LocalBlobStore};
pub use config::{Config, StoreBackend};
pub use error::{Result, ServiceError};
pub use pipeline::{MeasurementService, ReconciliationReport, SubmissionFields, Upload, UpdateFields};
pub use record_store::{Measurement, MemoryRecordStore, NewMeasurement, PgRecordStore, RecordStore};
