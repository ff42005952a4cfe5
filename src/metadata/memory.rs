//! In-process metadata store

use super::{Folder, ImageMetadata, MetadataStore};
use crate::error::{Result, ServiceError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Metadata store kept in memory; contents are lost on restart
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    records: RwLock<Vec<ImageMetadata>>,
    folders: RwLock<Vec<Folder>>,
    /// Number of upcoming inserts that fail (test hook)
    failing_inserts: AtomicUsize,
}

impl InMemoryMetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` inserts fail with a storage error
    pub fn fail_next_inserts(&self, count: usize) {
        self.failing_inserts.store(count, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn insert(&self, record: ImageMetadata) -> Result<()> {
        if self
            .failing_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ServiceError::storage(format!(
                "Simulated insert failure for record {}",
                record.id
            )));
        }

        let mut records = self.records.write().await;
        if let Some(existing) = records.iter_mut().find(|r| r.id == record.id) {
            *existing = record;
        } else {
            records.push(record);
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ImageMetadata>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn list_by_vendor(&self, vendor_id: &str) -> Result<Vec<ImageMetadata>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.vendor_id == vendor_id)
            .cloned()
            .collect())
    }

    async fn list_by_folder(
        &self,
        vendor_id: &str,
        folder_id: &str,
    ) -> Result<Vec<ImageMetadata>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.vendor_id == vendor_id && r.folder_id.as_deref() == Some(folder_id))
            .cloned()
            .collect())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() != before)
    }

    async fn create_folder(&self, folder: Folder) -> Result<()> {
        let mut folders = self.folders.write().await;
        if let Some(existing) = folders.iter_mut().find(|f| f.id == folder.id) {
            *existing = folder;
        } else {
            folders.push(folder);
        }
        Ok(())
    }

    async fn get_folder(&self, id: Uuid) -> Result<Option<Folder>> {
        Ok(self
            .folders
            .read()
            .await
            .iter()
            .find(|f| f.id == id)
            .cloned())
    }

    async fn list_folders(&self, vendor_id: &str) -> Result<Vec<Folder>> {
        Ok(self
            .folders
            .read()
            .await
            .iter()
            .filter(|f| f.vendor_id == vendor_id)
            .cloned()
            .collect())
    }

    async fn delete_folder(&self, id: Uuid) -> Result<Option<u64>> {
        let mut folders = self.folders.write().await;
        let before = folders.len();
        folders.retain(|f| f.id != id);
        if folders.len() == before {
            return Ok(None);
        }

        let key = id.to_string();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.folder_id.as_deref() != Some(key.as_str()));
        Ok(Some((before - records.len()) as u64))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
