//! Image metadata persistence
//!
//! The service records one [`ImageMetadata`] document per handled upload and
//! one [`Folder`] document per vendor folder. Persistence sits behind the [`MetadataStore`] trait so the request path
//! never depends on a particular database:
//!
//! - [`InMemoryMetadataStore`] is used when no `MONGODB_URI` is configured
//! - `MongoMetadataStore` (feature `mongodb`) writes to the
//!   `vendor_images` and `vendor_folders` collections
//!
//! Writes from the request path go through [`MetadataWriter`], a background
//! task fed by a bounded channel, so a slow or failing store never delays a
//! response.

pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;
pub mod writer;

pub use self::memory::InMemoryMetadataStore;
#[cfg(feature = "mongodb")]
pub use self::mongo::MongoMetadataStore;
pub use self::writer::{MetadataWriter, RetryPolicy, WriterStats};

use crate::config::ServiceConfig;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Metadata recorded for one handled upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub id: Uuid,
    pub vendor_id: String,
    pub folder_id: Option<String>,
    /// Filename supplied by the client, if any
    pub filename: String,
    pub fingerprint: Fingerprint,
    /// Whether the background was removed (false for passthrough uploads)
    pub processed: bool,
    pub content_type: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// A named folder owned by one vendor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: Uuid,
    pub vendor_id: String,
    pub folder_name: String,
    pub created_at: DateTime<Utc>,
}

impl Folder {
    #[must_use]
    pub fn new<V: Into<String>, N: Into<String>>(vendor_id: V, folder_name: N) -> Self {
        Self {
            id: Uuid::new_v4(),
            vendor_id: vendor_id.into(),
            folder_name: folder_name.into(),
            created_at: Utc::now(),
        }
    }
}

/// Storage backend for image metadata
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Backend identifier for logs and health output
    fn backend_name(&self) -> &str;

    /// Persist a record
    async fn insert(&self, record: ImageMetadata) -> Result<()>;

    /// Look up a record by id
    async fn get(&self, id: Uuid) -> Result<Option<ImageMetadata>>;

    /// All records of a vendor, oldest first
    async fn list_by_vendor(&self, vendor_id: &str) -> Result<Vec<ImageMetadata>>;

    /// Records of a vendor within one folder, oldest first
    async fn list_by_folder(&self, vendor_id: &str, folder_id: &str)
        -> Result<Vec<ImageMetadata>>;

    /// Delete a record; returns whether it existed
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Persist a folder
    async fn create_folder(&self, folder: Folder) -> Result<()>;

    /// Look up a folder by id
    async fn get_folder(&self, id: Uuid) -> Result<Option<Folder>>;

    /// Folders of a vendor, oldest first
    async fn list_folders(&self, vendor_id: &str) -> Result<Vec<Folder>>;

    /// Delete a folder together with the image records filed under it;
    /// returns the number of image records removed, or `None` if the folder
    /// did not exist
    async fn delete_folder(&self, id: Uuid) -> Result<Option<u64>>;

    /// Check that the backend is reachable
    async fn ping(&self) -> Result<()>;
}

/// Open the metadata store selected by the configuration
///
/// `MONGODB_URI` selects MongoDB when the `mongodb` feature is enabled;
/// otherwise records are kept in memory.
///
/// # Errors
/// - `Storage` if the MongoDB connection cannot be established
pub async fn store_from_config(config: &ServiceConfig) -> Result<Arc<dyn MetadataStore>> {
    match &config.mongodb_uri {
        #[cfg(feature = "mongodb")]
        Some(uri) => {
            let store = MongoMetadataStore::connect(uri, &config.mongodb_database).await?;
            Ok(Arc::new(store))
        },
        #[cfg(not(feature = "mongodb"))]
        Some(_) => {
            tracing::warn!(
                "MONGODB_URI is set but the mongodb feature is disabled; keeping metadata in memory"
            );
            Ok(Arc::new(InMemoryMetadataStore::new()))
        },
        None => {
            tracing::info!("MONGODB_URI not set; keeping metadata in memory");
            Ok(Arc::new(InMemoryMetadataStore::new()))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_store_is_in_memory() {
        let store = store_from_config(&ServiceConfig::default()).await.unwrap();
        assert_eq!(store.backend_name(), "memory");
        assert!(store.ping().await.is_ok());
    }

    #[test]
    fn test_new_folder_has_fresh_id() {
        let a = Folder::new("acme", "summer");
        let b = Folder::new("acme", "summer");
        assert_ne!(a.id, b.id);
        assert_eq!(a.folder_name, "summer");
    }
}
