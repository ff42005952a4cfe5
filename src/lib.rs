#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Background Removal Service
//!
//! An HTTP service that removes image backgrounds, built around three bounded
//! resources:
//!
//! - **Result cache**: processed outputs keyed by the SHA-256 fingerprint of
//!   the uploaded bytes, LRU eviction at `CACHE_SIZE` entries, optional TTL
//! - **Worker pool**: at most `MAX_WORKERS` concurrent engine calls and a
//!   bounded wait queue; excess requests are rejected with backpressure
//! - **Temp files**: one scratch file per job under `TEMP_DIR`, deleted when
//!   the job ends unless `KEEP_TEMP_FILES` is set
//!
//! The removal model sits behind the [`BackgroundRemover`] trait. The default
//! [`BorderKeyEngine`] is a pure-Rust heuristic for plain backdrops; other
//! engines plug in through [`RemovalService::builder`].
//!
//! ## Features
//!
//! - **Format Support**: JPEG, PNG, WebP, BMP, TIFF input; PNG, JPEG or WebP output
//! - **Metadata**: per-upload records in memory or MongoDB (`mongodb` feature),
//!   written asynchronously with retries
//! - **Observability**: `tracing` spans on every request, JSON logs with
//!   `tracing-json`, rolling log files with `tracing-files`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bgremove_service::{RemovalService, ServiceConfig, UploadRequest};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ServiceConfig::builder()
//!     .cache_size(500)
//!     .max_workers(2)
//!     .temp_dir("/var/tmp/bgremove")
//!     .build()?;
//! let service = RemovalService::new(config)?;
//!
//! let bytes = std::fs::read("product.jpg")?;
//! let outcome = service
//!     .process(UploadRequest::new("vendor-42", bytes).with_filename("product.jpg"))
//!     .await?;
//! std::fs::write("product.png", &*outcome.data)?;
//!
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Serving HTTP
//!
//! ```rust,no_run
//! use bgremove_service::{api, RemovalService, ServiceConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ServiceConfig::from_env()?;
//! let addr = format!("{}:{}", config.host, config.port);
//! let service = Arc::new(RemovalService::new(config)?);
//! let app = api::router(api::AppState::new(Arc::clone(&service)));
//!
//! let listener = tokio::net::TcpListener::bind(addr).await?;
//! axum::serve(listener, app).await?;
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `webp-support` (default): WebP input and output
//! - `mongodb`: MongoDB metadata store
//! - `tracing-json`: JSON log output
//! - `tracing-files`: log files via `tracing-appender`

pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod job;
pub mod metadata;
pub mod pool;
pub mod service;
pub mod services;
pub mod temp_files;
pub mod tracing_config;

pub use cache::{CacheStats, CachedOutput, ResultCache};
pub use config::{OutputFormat, ServiceConfig, ServiceConfigBuilder};
pub use engine::{BackgroundRemover, BorderKeyEngine, EngineError};
pub use error::{Exhaustion, Result, ServiceError};
pub use fingerprint::Fingerprint;
pub use job::{Job, JobStatus, RequestStage};
pub use metadata::{Folder, ImageMetadata, InMemoryMetadataStore, MetadataStore, MetadataWriter};
pub use pool::{PoolStats, WorkerPool, WorkerSlot};
pub use service::{
    CacheStatus, HealthReport, ProcessOutcome, RemovalService, RemovalServiceBuilder,
    UploadRequest,
};
pub use temp_files::{ReleaseOutcome, TempFile, TempFileManager};
