//! HTTP surface of the service
//!
//! A fixed set of axum routes over [`RemovalService`](crate::service::RemovalService):
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | GET | `/` | service info and route list |
//! | GET | `/health` | readiness plus cache, pool and writer statistics |
//! | POST | `/remove-background` | multipart upload, returns the processed image |
//! | GET | `/vendor-images/{vendor_id}` | metadata records of a vendor |
//! | GET | `/vendor-images/{vendor_id}/{folder_id}` | records of one vendor folder |
//! | DELETE | `/images/{image_id}` | delete a metadata record |
//! | POST | `/vendor-folders/{vendor_id}` | create a folder |
//! | GET | `/vendor-folders/{vendor_id}` | folders of a vendor |
//! | DELETE | `/folders/{folder_id}` | delete a folder and its image records |

pub mod error;
pub mod handlers;
pub mod state;

pub use self::error::{ApiError, ApiResult};
pub use self::state::AppState;

use axum::extract::{DefaultBodyLimit, Request};
use axum::http::HeaderName;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::tracing_config::spans;

/// Room for multipart boundaries and part headers on top of the image limit
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the application router with its middleware stack
pub fn router(state: AppState) -> Router {
    let body_limit = state
        .service
        .config()
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            handlers::X_FINGERPRINT,
            handlers::X_CACHE,
            handlers::X_JOB_ID,
            handlers::X_IMAGE_ID,
            handlers::X_PROCESSING_TIME,
        ]);

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/remove-background", post(handlers::remove_background))
        .route("/vendor-images/{vendor_id}", get(handlers::vendor_images))
        .route(
            "/vendor-images/{vendor_id}/{folder_id}",
            get(handlers::folder_images),
        )
        .route("/images/{image_id}", delete(handlers::delete_image))
        .route(
            "/vendor-folders/{vendor_id}",
            get(handlers::list_folders).post(handlers::create_folder),
        )
        .route("/folders/{folder_id}", delete(handlers::delete_folder))
        // -- Middleware stack (applied bottom-up) --
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(CatchPanicLayer::new())
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request| {
                    let request_id = request
                        .headers()
                        .get(REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-");
                    spans::http_request(request.method(), request.uri(), request_id)
                })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(state)
}
