//! Request orchestration
//!
//! [`RemovalService`] owns every shared component (result cache, worker pool,
//! temp file manager, engine, metadata writer) and drives one upload through
//! the request state machine:
//!
//! ```text
//! Received -> Fingerprinted -> CacheHit                          (done)
//!                           -> CacheMiss -> SlotAcquired -> Processing -> Succeeded
//!                                                                      -> Failed
//! ```
//!
//! Successful outputs are cached under the input fingerprint; failures never
//! create a cache entry. The worker slot and the job's temp file move into
//! the blocking engine task, so both are released when the engine call ends,
//! even if the caller stopped waiting for it.

use crate::cache::{CacheStats, CachedOutput, ResultCache};
use crate::config::{OutputFormat, ServiceConfig};
use crate::engine::{BackgroundRemover, BorderKeyEngine};
use crate::error::{Result, ServiceError};
use crate::fingerprint::Fingerprint;
use crate::job::{Job, RequestStage};
use crate::metadata::{
    Folder, ImageMetadata, InMemoryMetadataStore, MetadataStore, MetadataWriter, RetryPolicy, WriterStats,
};
use crate::pool::{PoolStats, WorkerPool, WorkerSlot};
use crate::services::{ImageIOService, OutputFormatHandler};
use crate::temp_files::{TempFile, TempFileManager};
use chrono::Utc;
use image::ImageFormat;
use instant::{Duration, Instant};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// How long a health check waits for the metadata store
const HEALTH_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// One upload to process
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub data: Vec<u8>,
    pub filename: Option<String>,
    pub vendor_id: String,
    pub folder_id: Option<String>,
    /// When false the upload is returned unchanged
    pub remove_background: bool,
}

impl UploadRequest {
    #[must_use]
    pub fn new<S: Into<String>>(vendor_id: S, data: Vec<u8>) -> Self {
        Self {
            data,
            filename: None,
            vendor_id: vendor_id.into(),
            folder_id: None,
            remove_background: true,
        }
    }

    #[must_use]
    pub fn with_filename<S: Into<String>>(mut self, filename: S) -> Self {
        self.filename = Some(filename.into());
        self
    }

    #[must_use]
    pub fn with_folder<S: Into<String>>(mut self, folder_id: S) -> Self {
        self.folder_id = Some(folder_id.into());
        self
    }

    #[must_use]
    pub fn remove_background(mut self, remove: bool) -> Self {
        self.remove_background = remove;
        self
    }
}

/// Where the response bytes came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheStatus {
    /// Served from the result cache
    Hit,
    /// Produced by the engine
    Miss,
    /// Background removal was not requested
    Bypass,
}

impl CacheStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Bypass => "BYPASS",
        }
    }
}

/// Result of a successfully handled upload
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub job: Job,
    /// Id of the metadata record written for this upload
    pub image_id: Uuid,
    pub data: Arc<[u8]>,
    pub content_type: &'static str,
    pub cache: CacheStatus,
    pub processing_time: Duration,
}

/// Service health snapshot
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `ok`, `degraded` (metadata store unreachable) or `shutting_down`
    pub status: &'static str,
    pub engine: String,
    pub metadata_backend: String,
    pub metadata_reachable: bool,
    pub cache: CacheStats,
    pub cache_hit_ratio: f64,
    pub pool: PoolStats,
    pub metadata_writer: WriterStats,
    pub temp_files_live: usize,
    pub uptime_secs: u64,
}

/// Builder for [`RemovalService`]
pub struct RemovalServiceBuilder {
    config: ServiceConfig,
    engine: Option<Arc<dyn BackgroundRemover>>,
    store: Option<Arc<dyn MetadataStore>>,
    retry_policy: RetryPolicy,
    writer_capacity: usize,
}

impl RemovalServiceBuilder {
    /// Use a specific removal engine (default: border keying)
    #[must_use]
    pub fn engine(mut self, engine: Arc<dyn BackgroundRemover>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Use a specific metadata store (default: in-memory)
    #[must_use]
    pub fn metadata_store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    #[must_use]
    pub fn writer_capacity(mut self, capacity: usize) -> Self {
        self.writer_capacity = capacity;
        self
    }

    /// Build the service; must run inside a Tokio runtime
    ///
    /// # Errors
    /// - `InvalidConfig` from configuration validation
    /// - I/O errors creating the temp directory
    pub fn build(self) -> Result<RemovalService> {
        let config = self.config;
        config.validate()?;

        let engine = self.engine.unwrap_or_else(|| {
            Arc::new(BorderKeyEngine::new(config.engine_tolerance)) as Arc<dyn BackgroundRemover>
        });
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryMetadataStore::new()) as Arc<dyn MetadataStore>);

        let cache = ResultCache::new(config.cache_size).with_ttl(config.cache_ttl);
        let pool = WorkerPool::new(config.max_workers, config.queue_capacity)?
            .with_queue_timeout(config.queue_timeout);
        let temp_files = TempFileManager::new(&config.temp_dir, config.keep_temp_files)?;
        let metadata = MetadataWriter::spawn(store, self.writer_capacity, self.retry_policy);

        OutputFormatHandler::validate_for_background_removal(config.output_format);
        tracing::info!(
            engine = engine.name(),
            metadata_backend = metadata.store().backend_name(),
            cache_size = config.cache_size,
            max_workers = config.max_workers,
            queue_capacity = config.queue_capacity,
            output_format = %config.output_format,
            temp_dir = %config.temp_dir.display(),
            keep_temp_files = config.keep_temp_files,
            "removal service ready"
        );

        Ok(RemovalService {
            config: Arc::new(config),
            cache: Arc::new(cache),
            pool: Arc::new(pool),
            temp_files,
            engine,
            metadata,
            started_at: Instant::now(),
        })
    }
}

/// Background removal request handler
pub struct RemovalService {
    config: Arc<ServiceConfig>,
    cache: Arc<ResultCache>,
    pool: Arc<WorkerPool>,
    temp_files: TempFileManager,
    engine: Arc<dyn BackgroundRemover>,
    metadata: MetadataWriter,
    started_at: Instant,
}

impl RemovalService {
    #[must_use]
    pub fn builder(config: ServiceConfig) -> RemovalServiceBuilder {
        RemovalServiceBuilder {
            config,
            engine: None,
            store: None,
            retry_policy: RetryPolicy::default(),
            writer_capacity: crate::metadata::writer::DEFAULT_WRITER_CAPACITY,
        }
    }

    /// Service with the default engine and in-memory metadata
    ///
    /// # Errors
    /// - See [`RemovalServiceBuilder::build`]
    pub fn new(config: ServiceConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    #[must_use]
    pub fn temp_files(&self) -> &TempFileManager {
        &self.temp_files
    }

    #[must_use]
    pub fn metadata_store(&self) -> &Arc<dyn MetadataStore> {
        self.metadata.store()
    }

    #[must_use]
    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Handle one upload
    ///
    /// # Errors
    /// - `Input` / `UnsupportedFormat` for unusable uploads
    /// - `NotFound` if the target folder does not exist for this vendor
    /// - `ResourceExhausted` when no worker slot can be obtained
    /// - `Engine` / `EngineTimeout` when processing fails
    /// - `Storage` when the temp file cannot be created
    #[instrument(
        skip(self, request),
        fields(
            vendor_id = %request.vendor_id,
            input_bytes = request.data.len(),
            job_id = tracing::field::Empty,
        )
    )]
    pub async fn process(&self, mut request: UploadRequest) -> Result<ProcessOutcome> {
        let started = Instant::now();
        if request.vendor_id.trim().is_empty() {
            return Err(ServiceError::input("vendor_id must not be empty"));
        }
        if request.data.is_empty() {
            return Err(ServiceError::input("Uploaded image is empty"));
        }
        if let Some(folder_id) = &request.folder_id {
            self.vendor_folder(&request.vendor_id, folder_id).await?;
        }

        let fingerprint = Fingerprint::of(&request.data);
        let mut job = Job::new(fingerprint.clone(), request.data.len());
        tracing::Span::current().record("job_id", tracing::field::display(job.id));

        if !request.remove_background {
            return self.pass_through(job, request, started);
        }

        if let Some(hit) = self.cache.get(&fingerprint) {
            job.complete_from_cache()?;
            let content_type = OutputFormatHandler::content_type(hit.format);
            return Ok(self.finish(job, &request, hit.data, content_type, CacheStatus::Hit, started));
        }
        job.enter(RequestStage::CacheMiss);

        // Reject undecodable uploads before they occupy a worker slot
        let input_format = match ImageIOService::sniff_format(&request.data) {
            Ok(format) => format,
            Err(e) => return Err(Self::reject(&mut job, e)),
        };

        let slot = match self.pool.acquire().await {
            Ok(slot) => slot,
            Err(e) => return Err(Self::reject(&mut job, e)),
        };
        job.enter(RequestStage::SlotAcquired);
        job.start()?;

        let temp = match self.temp_files.allocate(job.id, extension_for(input_format)) {
            Ok(temp) => temp,
            Err(e) => return Err(Self::reject(&mut job, e)),
        };

        let data = std::mem::take(&mut request.data);
        match self.run_engine(slot, temp, data).await {
            Ok(output) => {
                self.cache.put(fingerprint, output.clone());
                job.succeed()?;
                let content_type = OutputFormatHandler::content_type(output.format);
                Ok(self.finish(job, &request, output.data, content_type, CacheStatus::Miss, started))
            },
            Err(e) => Err(Self::reject(&mut job, e)),
        }
    }

    fn pass_through(
        &self,
        mut job: Job,
        request: UploadRequest,
        started: Instant,
    ) -> Result<ProcessOutcome> {
        let format = match ImageIOService::sniff_format(&request.data) {
            Ok(format) => format,
            Err(e) => return Err(Self::reject(&mut job, e)),
        };
        job.complete_bypassed()?;
        let data: Arc<[u8]> = Arc::from(request.data.as_slice());
        Ok(self.finish(
            job,
            &request,
            data,
            format.to_mime_type(),
            CacheStatus::Bypass,
            started,
        ))
    }

    /// Run the engine on the blocking pool
    ///
    /// The slot and temp file are owned by the blocking task. On timeout the
    /// task keeps running and releases both when the engine returns.
    async fn run_engine(
        &self,
        slot: WorkerSlot,
        temp: TempFile,
        data: Vec<u8>,
    ) -> Result<CachedOutput> {
        let engine = Arc::clone(&self.engine);
        let format = self.config.output_format;
        let quality = self.config.output_quality;

        let task = tokio::task::spawn_blocking(move || {
            let outcome = execute(engine.as_ref(), &temp, &data, format, quality);
            let released = temp.release();
            tracing::trace!(?released, held_ms = slot.held_for().as_millis() as u64, "engine task finished");
            slot.release();
            outcome
        });

        let joined = match self.config.engine_timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = limit.as_millis() as u64,
                        "engine call timed out; it will release its slot when it finishes"
                    );
                    return Err(ServiceError::EngineTimeout(limit));
                },
            },
            None => task.await,
        };

        joined.map_err(|e| {
            if e.is_panic() {
                ServiceError::engine("Background removal engine panicked")
            } else {
                ServiceError::internal(format!("Engine task failed: {}", e))
            }
        })?
    }

    fn reject(job: &mut Job, error: ServiceError) -> ServiceError {
        if let Err(transition) = job.fail(&error) {
            tracing::warn!(error = %transition, "could not mark job failed");
        }
        if error.is_client_error() {
            tracing::info!(job_id = %job.id, error = %error, "request rejected");
        } else {
            tracing::warn!(job_id = %job.id, error = %error, "request failed");
        }
        error
    }

    fn finish(
        &self,
        job: Job,
        request: &UploadRequest,
        data: Arc<[u8]>,
        content_type: &'static str,
        cache: CacheStatus,
        started: Instant,
    ) -> ProcessOutcome {
        let record = ImageMetadata {
            id: job.id,
            vendor_id: request.vendor_id.clone(),
            folder_id: request.folder_id.clone(),
            filename: request.filename.clone().unwrap_or_default(),
            fingerprint: job.fingerprint.clone(),
            processed: cache != CacheStatus::Bypass,
            content_type: content_type.to_string(),
            size_bytes: data.len() as u64,
            created_at: Utc::now(),
        };
        let image_id = record.id;
        self.metadata.submit(record);

        let processing_time = started.elapsed();
        tracing::info!(
            job_id = %job.id,
            fingerprint = job.fingerprint.short(),
            cache = cache.as_str(),
            output_bytes = data.len(),
            duration_ms = processing_time.as_millis() as u64,
            "request completed"
        );

        ProcessOutcome {
            job,
            image_id,
            data,
            content_type,
            cache,
            processing_time,
        }
    }

    /// Metadata records of a vendor
    ///
    /// # Errors
    /// - `Storage` if the metadata store fails
    pub async fn vendor_images(&self, vendor_id: &str) -> Result<Vec<ImageMetadata>> {
        self.metadata.store().list_by_vendor(vendor_id).await
    }

    /// Metadata records of one vendor folder
    ///
    /// # Errors
    /// - `NotFound` if the folder does not exist for this vendor
    /// - `Storage` if the metadata store fails
    pub async fn folder_images(
        &self,
        vendor_id: &str,
        folder_id: &str,
    ) -> Result<(Folder, Vec<ImageMetadata>)> {
        let folder = self.vendor_folder(vendor_id, folder_id).await?;
        let images = self
            .metadata
            .store()
            .list_by_folder(vendor_id, folder_id)
            .await?;
        Ok((folder, images))
    }

    /// Folder `folder_id` if it exists and belongs to `vendor_id`
    async fn vendor_folder(&self, vendor_id: &str, folder_id: &str) -> Result<Folder> {
        let not_found = || ServiceError::not_found(format!("folder {}", folder_id));
        let id = Uuid::parse_str(folder_id).map_err(|_| not_found())?;
        match self.metadata.store().get_folder(id).await? {
            Some(folder) if folder.vendor_id == vendor_id => Ok(folder),
            _ => Err(not_found()),
        }
    }

    /// Create a folder for a vendor
    ///
    /// # Errors
    /// - `Input` if the vendor id or folder name is blank
    /// - `Storage` if the metadata store fails
    pub async fn create_folder(&self, vendor_id: &str, folder_name: &str) -> Result<Folder> {
        if vendor_id.trim().is_empty() {
            return Err(ServiceError::input("vendor_id must not be empty"));
        }
        let folder_name = folder_name.trim();
        if folder_name.is_empty() {
            return Err(ServiceError::input("folder_name must not be empty"));
        }

        let folder = Folder::new(vendor_id, folder_name);
        self.metadata.store().create_folder(folder.clone()).await?;
        tracing::info!(folder_id = %folder.id, vendor_id, folder_name, "folder created");
        Ok(folder)
    }

    /// Folders of a vendor
    ///
    /// # Errors
    /// - `Storage` if the metadata store fails
    pub async fn list_folders(&self, vendor_id: &str) -> Result<Vec<Folder>> {
        self.metadata.store().list_folders(vendor_id).await
    }

    /// Delete a folder and the image records filed under it
    ///
    /// Pending metadata writes are flushed first so records of uploads that
    /// already completed are removed too. Returns the number of image
    /// records deleted.
    ///
    /// # Errors
    /// - `NotFound` if no folder has this id
    /// - `Storage` if the metadata store fails
    pub async fn delete_folder(&self, folder_id: Uuid) -> Result<u64> {
        if let Err(e) = self.metadata.flush().await {
            tracing::warn!(error = %e, "could not flush metadata before folder delete");
        }
        match self.metadata.store().delete_folder(folder_id).await? {
            Some(images) => {
                tracing::info!(%folder_id, images, "folder deleted");
                Ok(images)
            },
            None => Err(ServiceError::not_found(format!("folder {}", folder_id))),
        }
    }

    /// Delete a metadata record
    ///
    /// # Errors
    /// - `NotFound` if no record has this id
    /// - `Storage` if the metadata store fails
    pub async fn delete_image(&self, image_id: Uuid) -> Result<()> {
        if self.metadata.store().delete(image_id).await? {
            tracing::info!(%image_id, "image metadata deleted");
            Ok(())
        } else {
            Err(ServiceError::not_found(format!("image {}", image_id)))
        }
    }

    /// Wait until queued metadata writes have been attempted
    ///
    /// # Errors
    /// - `Storage` if the writer has stopped
    pub async fn flush_metadata(&self) -> Result<()> {
        self.metadata.flush().await
    }

    /// Health snapshot of every component
    pub async fn health(&self) -> HealthReport {
        let store = self.metadata.store();
        let metadata_reachable = matches!(
            tokio::time::timeout(HEALTH_PING_TIMEOUT, store.ping()).await,
            Ok(Ok(()))
        );
        let pool = self.pool.stats();
        let status = if !pool.accepting {
            "shutting_down"
        } else if metadata_reachable {
            "ok"
        } else {
            "degraded"
        };

        HealthReport {
            status,
            engine: self.engine.name().to_string(),
            metadata_backend: store.backend_name().to_string(),
            metadata_reachable,
            cache: self.cache.stats(),
            cache_hit_ratio: self.cache.hit_ratio(),
            pool,
            metadata_writer: self.metadata.stats(),
            temp_files_live: self.temp_files.live_count(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    /// Stop accepting work, wait for in-flight jobs, remove leftover temp
    /// files and flush metadata
    pub async fn shutdown(&self) {
        tracing::info!(in_flight = self.pool.stats().in_flight, "removal service shutting down");
        self.pool.close();
        self.pool.drain().await;
        let swept = self.temp_files.sweep();
        self.metadata.shutdown().await;
        tracing::info!(
            swept_temp_files = swept,
            cache_entries = self.cache.len(),
            "removal service stopped"
        );
    }
}

impl std::fmt::Debug for RemovalService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemovalService")
            .field("engine", &self.engine.name())
            .field("cache", &self.cache.stats())
            .field("pool", &self.pool.stats())
            .finish_non_exhaustive()
    }
}

fn extension_for(format: ImageFormat) -> &'static str {
    format.extensions_str().first().copied().unwrap_or("img")
}

/// Decode, remove the background and encode; runs on the blocking pool
fn execute(
    engine: &dyn BackgroundRemover,
    temp: &TempFile,
    data: &[u8],
    format: OutputFormat,
    quality: u8,
) -> Result<CachedOutput> {
    temp.write_all(data)?;
    let image = ImageIOService::load_image(temp.path())?;
    let rgba = engine.process(&image)?;
    let (width, height) = rgba.dimensions();
    let encoded = OutputFormatHandler::encode(rgba, format, quality)?;
    Ok(CachedOutput::new(encoded, format, width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn png(seed: u8) -> Vec<u8> {
        let image = RgbaImage::from_pixel(6, 6, Rgba([seed, 255 - seed, 7, 255]));
        let mut buffer = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    fn service(dir: &TempDir, engine: MockEngine) -> RemovalService {
        let config = ServiceConfig::builder()
            .temp_dir(dir.path().join("scratch"))
            .max_workers(2)
            .cache_size(8)
            .build()
            .unwrap();
        RemovalService::builder(config)
            .engine(Arc::new(engine))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let dir = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let service = service(&dir, engine.clone());

        let first = service.process(UploadRequest::new("acme", png(1))).await.unwrap();
        let second = service.process(UploadRequest::new("acme", png(1))).await.unwrap();

        assert_eq!(first.cache, CacheStatus::Miss);
        assert_eq!(second.cache, CacheStatus::Hit);
        assert_eq!(first.data, second.data);
        assert_eq!(first.content_type, "image/png");
        assert_eq!(engine.call_count(), 1);
        assert!(second.job.cache_hit);
        assert!(!second.job.reached(RequestStage::SlotAcquired));
    }

    #[tokio::test]
    async fn test_passthrough_returns_input_unchanged() {
        let dir = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let service = service(&dir, engine.clone());
        let input = png(2);

        let outcome = service
            .process(UploadRequest::new("acme", input.clone()).remove_background(false))
            .await
            .unwrap();

        assert_eq!(outcome.cache, CacheStatus::Bypass);
        assert_eq!(&*outcome.data, input.as_slice());
        assert_eq!(engine.call_count(), 0);
        assert!(service.cache().is_empty());

        service.flush_metadata().await.unwrap();
        let records = service.vendor_images("acme").await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].processed);
    }

    #[tokio::test]
    async fn test_invalid_upload_never_reaches_engine() {
        let dir = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let service = service(&dir, engine.clone());

        let err = service
            .process(UploadRequest::new("acme", b"not an image".to_vec()))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Input(_)));
        assert_eq!(engine.call_count(), 0);
        assert_eq!(service.pool().stats().completed, 0);
    }

    #[tokio::test]
    async fn test_missing_vendor_is_input_error() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, MockEngine::new());
        let err = service
            .process(UploadRequest::new("  ", png(3)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Input(_)));
    }

    #[tokio::test]
    async fn test_engine_failure_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, MockEngine::new_failing());

        let err = service
            .process(UploadRequest::new("acme", png(4)))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Engine(_)));
        assert!(service.cache().is_empty());
        assert_eq!(service.pool().stats().in_flight, 0);
        assert_eq!(service.temp_files().live_count(), 0);
        let leftovers = std::fs::read_dir(service.temp_files().root()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_upload_into_foreign_folder_is_not_found() {
        let dir = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let service = service(&dir, engine.clone());
        let folder = service.create_folder("globex", "summer").await.unwrap();

        for folder_id in [folder.id.to_string(), Uuid::new_v4().to_string(), "summer".to_string()] {
            let err = service
                .process(UploadRequest::new("acme", png(7)).with_folder(folder_id))
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::NotFound(_)));
        }
        assert_eq!(engine.call_count(), 0);

        let outcome = service
            .process(UploadRequest::new("globex", png(7)).with_folder(folder.id.to_string()))
            .await
            .unwrap();
        assert_eq!(outcome.cache, CacheStatus::Miss);
    }

    #[tokio::test]
    async fn test_delete_folder_removes_pending_records() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, MockEngine::new());
        let folder = service.create_folder("acme", " summer ").await.unwrap();
        assert_eq!(folder.folder_name, "summer");

        service
            .process(UploadRequest::new("acme", png(8)).with_folder(folder.id.to_string()))
            .await
            .unwrap();

        assert_eq!(service.delete_folder(folder.id).await.unwrap(), 1);
        assert!(service.vendor_images("acme").await.unwrap().is_empty());
        assert!(service.list_folders("acme").await.unwrap().is_empty());
        assert!(matches!(
            service.delete_folder(folder.id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            service.create_folder("acme", "   ").await,
            Err(ServiceError::Input(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_unknown_image_is_not_found() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, MockEngine::new());
        assert!(matches!(
            service.delete_image(Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_health_and_shutdown() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir, MockEngine::new());
        service.process(UploadRequest::new("acme", png(5))).await.unwrap();

        let health = service.health().await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.engine, "mock");
        assert_eq!(health.cache.entries, 1);

        service.shutdown().await;
        assert_eq!(service.health().await.status, "shutting_down");
        assert!(matches!(
            service.process(UploadRequest::new("acme", png(6))).await,
            Err(ServiceError::ResourceExhausted(_))
        ));
    }
}
