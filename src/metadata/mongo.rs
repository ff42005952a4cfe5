//! MongoDB metadata store
//!
//! Image records live in the `vendor_images` collection and folders in
//! `vendor_folders`, both keyed by their id (as a string `_id`) with a
//! secondary index on `vendor_id`. Documents are written field by field;
//! there is no ODM layer.

use super::{Folder, ImageMetadata, MetadataStore};
use crate::error::{Result, ServiceError};
use crate::fingerprint::Fingerprint;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::{Client, Collection, Database, IndexModel};
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

const IMAGES_COLLECTION: &str = "vendor_images";
const FOLDERS_COLLECTION: &str = "vendor_folders";

fn storage_error(operation: &str, error: &mongodb::error::Error) -> ServiceError {
    ServiceError::storage(format!("MongoDB {} failed: {}", operation, error))
}

/// Metadata store backed by a MongoDB database
#[derive(Debug, Clone)]
pub struct MongoMetadataStore {
    database: Database,
    images: Collection<Document>,
    folders: Collection<Document>,
}

fn malformed(field: &str, error: impl std::fmt::Display) -> ServiceError {
    ServiceError::storage(format!("Malformed metadata document field '{}': {}", field, error))
}

fn parse_created_at(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| malformed("created_at", e))
}

impl MongoMetadataStore {
    /// Connect and make sure the `vendor_id` index exists
    ///
    /// # Errors
    /// - `Storage` if the URI is invalid or the index cannot be created
    pub async fn connect(uri: &SecretString, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri.expose_secret())
            .await
            .map_err(|e| storage_error("connect", &e))?;
        let database = client.database(database);
        let images = database.collection::<Document>(IMAGES_COLLECTION);
        let folders = database.collection::<Document>(FOLDERS_COLLECTION);

        for collection in [&images, &folders] {
            collection
                .create_index(IndexModel::builder().keys(doc! { "vendor_id": 1 }).build())
                .await
                .map_err(|e| storage_error("create_index", &e))?;
        }

        tracing::info!(
            database = database.name(),
            images = IMAGES_COLLECTION,
            folders = FOLDERS_COLLECTION,
            "connected to MongoDB metadata store"
        );
        Ok(Self {
            database,
            images,
            folders,
        })
    }

    fn to_document(record: &ImageMetadata) -> Document {
        doc! {
            "_id": record.id.to_string(),
            "vendor_id": record.vendor_id.as_str(),
            "folder_id": record.folder_id.clone(),
            "filename": record.filename.as_str(),
            "fingerprint": record.fingerprint.as_str(),
            "processed": record.processed,
            "content_type": record.content_type.as_str(),
            "size_bytes": i64::try_from(record.size_bytes).unwrap_or(i64::MAX),
            "created_at": record.created_at.to_rfc3339(),
        }
    }

    fn from_document(document: &Document) -> Result<ImageMetadata> {
        let field = |name: &str| document.get_str(name).map_err(|e| malformed(name, e));

        let id = Uuid::parse_str(field("_id")?).map_err(|e| malformed("_id", e))?;
        let created_at = parse_created_at(field("created_at")?)?;

        Ok(ImageMetadata {
            id,
            vendor_id: field("vendor_id")?.to_string(),
            folder_id: document.get_str("folder_id").ok().map(str::to_string),
            filename: field("filename")?.to_string(),
            fingerprint: Fingerprint::from_hex(field("fingerprint")?)?,
            processed: document.get_bool("processed").unwrap_or(false),
            content_type: field("content_type")?.to_string(),
            size_bytes: document
                .get_i64("size_bytes")
                .ok()
                .and_then(|n| u64::try_from(n).ok())
                .unwrap_or(0),
            created_at,
        })
    }

    async fn find_all(&self, filter: Document) -> Result<Vec<ImageMetadata>> {
        let documents: Vec<Document> = self
            .images
            .find(filter)
            .sort(doc! { "created_at": 1 })
            .await
            .map_err(|e| storage_error("find", &e))?
            .try_collect()
            .await
            .map_err(|e| storage_error("cursor", &e))?;
        documents.iter().map(Self::from_document).collect()
    }

    fn folder_to_document(folder: &Folder) -> Document {
        doc! {
            "_id": folder.id.to_string(),
            "vendor_id": folder.vendor_id.as_str(),
            "folder_name": folder.folder_name.as_str(),
            "created_at": folder.created_at.to_rfc3339(),
        }
    }

    fn folder_from_document(document: &Document) -> Result<Folder> {
        let field = |name: &str| document.get_str(name).map_err(|e| malformed(name, e));

        Ok(Folder {
            id: Uuid::parse_str(field("_id")?).map_err(|e| malformed("_id", e))?,
            vendor_id: field("vendor_id")?.to_string(),
            folder_name: field("folder_name")?.to_string(),
            created_at: parse_created_at(field("created_at")?)?,
        })
    }
}

#[async_trait]
impl MetadataStore for MongoMetadataStore {
    fn backend_name(&self) -> &str {
        "mongodb"
    }

    async fn insert(&self, record: ImageMetadata) -> Result<()> {
        self.images
            .replace_one(doc! { "_id": record.id.to_string() }, Self::to_document(&record))
            .upsert(true)
            .await
            .map_err(|e| storage_error("insert", &e))?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ImageMetadata>> {
        self.images
            .find_one(doc! { "_id": id.to_string() })
            .await
            .map_err(|e| storage_error("find_one", &e))?
            .as_ref()
            .map(Self::from_document)
            .transpose()
    }

    async fn list_by_vendor(&self, vendor_id: &str) -> Result<Vec<ImageMetadata>> {
        self.find_all(doc! { "vendor_id": vendor_id }).await
    }

    async fn list_by_folder(
        &self,
        vendor_id: &str,
        folder_id: &str,
    ) -> Result<Vec<ImageMetadata>> {
        self.find_all(doc! { "vendor_id": vendor_id, "folder_id": folder_id })
            .await
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = self
            .images
            .delete_one(doc! { "_id": id.to_string() })
            .await
            .map_err(|e| storage_error("delete", &e))?;
        Ok(result.deleted_count > 0)
    }

    async fn create_folder(&self, folder: Folder) -> Result<()> {
        self.folders
            .replace_one(
                doc! { "_id": folder.id.to_string() },
                Self::folder_to_document(&folder),
            )
            .upsert(true)
            .await
            .map_err(|e| storage_error("create_folder", &e))?;
        Ok(())
    }

    async fn get_folder(&self, id: Uuid) -> Result<Option<Folder>> {
        self.folders
            .find_one(doc! { "_id": id.to_string() })
            .await
            .map_err(|e| storage_error("find_one", &e))?
            .as_ref()
            .map(Self::folder_from_document)
            .transpose()
    }

    async fn list_folders(&self, vendor_id: &str) -> Result<Vec<Folder>> {
        let documents: Vec<Document> = self
            .folders
            .find(doc! { "vendor_id": vendor_id })
            .sort(doc! { "created_at": 1 })
            .await
            .map_err(|e| storage_error("find", &e))?
            .try_collect()
            .await
            .map_err(|e| storage_error("cursor", &e))?;
        documents.iter().map(Self::folder_from_document).collect()
    }

    async fn delete_folder(&self, id: Uuid) -> Result<Option<u64>> {
        let key = id.to_string();
        let removed = self
            .folders
            .delete_one(doc! { "_id": key.as_str() })
            .await
            .map_err(|e| storage_error("delete_folder", &e))?;
        if removed.deleted_count == 0 {
            return Ok(None);
        }

        let images = self
            .images
            .delete_many(doc! { "folder_id": key.as_str() })
            .await
            .map_err(|e| storage_error("delete_many", &e))?;
        Ok(Some(images.deleted_count))
    }

    async fn ping(&self) -> Result<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| storage_error("ping", &e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_mapping() {
        let record = ImageMetadata {
            id: Uuid::new_v4(),
            vendor_id: "acme".to_string(),
            folder_id: Some("f1".to_string()),
            filename: "lamp.png".to_string(),
            fingerprint: Fingerprint::of(b"lamp"),
            processed: true,
            content_type: "image/png".to_string(),
            size_bytes: 1234,
            created_at: Utc::now(),
        };

        let document = MongoMetadataStore::to_document(&record);
        assert_eq!(document.get_str("vendor_id").unwrap(), "acme");
        let parsed = MongoMetadataStore::from_document(&document).unwrap();
        assert_eq!(parsed.id, record.id);
        assert_eq!(parsed.folder_id.as_deref(), Some("f1"));
        assert_eq!(parsed.size_bytes, 1234);
        assert_eq!(parsed.fingerprint, record.fingerprint);
    }

    #[test]
    fn test_folder_document_mapping() {
        let folder = Folder::new("acme", "summer");
        let document = MongoMetadataStore::folder_to_document(&folder);
        assert_eq!(document.get_str("folder_name").unwrap(), "summer");
        assert_eq!(
            MongoMetadataStore::folder_from_document(&document).unwrap().id,
            folder.id
        );
    }

    #[test]
    fn test_malformed_document_is_storage_error() {
        let document = doc! { "_id": "not-a-uuid" };
        assert!(matches!(
            MongoMetadataStore::from_document(&document),
            Err(ServiceError::Storage(_))
        ));
        assert!(matches!(
            MongoMetadataStore::folder_from_document(&document),
            Err(ServiceError::Storage(_))
        ));
    }
}
