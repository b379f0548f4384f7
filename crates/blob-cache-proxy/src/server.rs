//! HTTP server for blob endpoints
//!
//! Provides /health, /blob?uri= (GET, HEAD, PUT, DELETE) and /blobs?prefix=.

use crate::error::Result;
use crate::types::{BlobQuery, HealthResponse, ListQuery, ListResponse};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use cached_blob_store::{BlobId, CachedConnection, Hints};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Shared state for the HTTP server
pub struct ServerState {
    pub connection: CachedConnection,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(connection: CachedConnection) -> Self {
        Self {
            connection,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/blob",
            get(get_blob)
                .head(head_blob)
                .put(put_blob)
                .delete(delete_blob),
        )
        .route("/blobs", get(list_blobs))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let cache_stats = state.connection.cache_stats().await;
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache: cache_stats,
    })
}

/// Read a blob, from the cache when it holds a copy
async fn get_blob(
    State(state): State<SharedState>,
    Query(query): Query<BlobQuery>,
) -> Result<Response> {
    let id = BlobId::parse(&query.uri)?;
    let blob = state.connection.get_blob(Some(&id), &Hints::new()).await?;

    let mut reader = state.connection.open_input_stream(&blob).await?;
    let mut data = Vec::new();
    reader.read_to_end(&mut data).await?;

    let cache_header = if blob.is_cached() { "HIT" } else { "MISS" };
    debug!(id = %id, size = data.len(), cache = cache_header, "Served blob");

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (X_CACHE, cache_header),
        ],
        data,
    )
        .into_response())
}

async fn head_blob(
    State(state): State<SharedState>,
    Query(query): Query<BlobQuery>,
) -> Result<StatusCode> {
    let id = BlobId::parse(&query.uri)?;
    let blob = state.connection.get_blob(Some(&id), &Hints::new()).await?;

    Ok(if blob.exists().await? {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    })
}

/// Write a blob to the remote store. Never populates the cache.
async fn put_blob(
    State(state): State<SharedState>,
    Query(query): Query<BlobQuery>,
    body: Bytes,
) -> Result<StatusCode> {
    let id = BlobId::parse(&query.uri)?;

    let mut writer = state
        .connection
        .open_output_stream(&id, query.overwrite)
        .await?;
    writer.write_all(&body).await?;
    writer.shutdown().await?;

    info!(id = %id, size = body.len(), "Stored blob");
    Ok(StatusCode::CREATED)
}

async fn delete_blob(
    State(state): State<SharedState>,
    Query(query): Query<BlobQuery>,
) -> Result<StatusCode> {
    let id = BlobId::parse(&query.uri)?;
    let blob = state.connection.get_blob(Some(&id), &Hints::new()).await?;
    state.connection.delete(&blob).await?;

    info!(id = %id, "Deleted blob");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_blobs(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>> {
    let ids = state
        .connection
        .list_blob_ids(query.prefix.as_deref())
        .await?;

    Ok(Json(ListResponse {
        ids: ids.into_iter().map(|id| id.to_string()).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use cached_blob_store::{CachedBlobStore, MountedStore, StoreConfig};
    use std::path::Path;
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;
    use url::Url;

    const THUMB: &str = "hdfs://store/demo:1/TN/TN.0";
    const DC: &str = "hdfs://store/demo:1/DC/DC.0";

    struct Fixture {
        _dir: TempDir,
        state: SharedState,
    }

    impl Fixture {
        fn cache_dir(&self) -> &Path {
            self.state.connection.cache().cache_dir()
        }
    }

    async fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let remote_root = dir.path().join("remote");
        std::fs::create_dir_all(&remote_root).unwrap();

        let config = StoreConfig::new(Url::parse("hdfs://store").unwrap())
            .with_cache_dir(dir.path().join("cache"));
        let store = CachedBlobStore::with_config(config, Arc::new(MountedStore::new(remote_root)));
        let connection = store.open_connection(None, &Hints::new()).await.unwrap();

        Fixture {
            _dir: dir,
            state: Arc::new(ServerState::new(connection)),
        }
    }

    fn blob_uri(id: &str) -> String {
        format!("/blob?uri={}", urlencoding::encode(id))
    }

    async fn send(state: &SharedState, method: Method, uri: &str, body: &[u8]) -> Response {
        create_router(state.clone())
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::from(body.to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let fx = fixture().await;

        let response = send(&fx.state, Method::GET, "/health", b"").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["uptime_secs"].as_u64().is_some());
        assert!(json["cache"]["entries"].as_u64().is_some());
    }

    #[tokio::test]
    async fn test_get_missing_blob() {
        let fx = fixture().await;

        let response = send(&fx.state, Method::GET, &blob_uri(THUMB), b"").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&fx.state, Method::HEAD, &blob_uri(THUMB), b"").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_put_then_get_thumbnail_is_cached() {
        let fx = fixture().await;

        let response = send(&fx.state, Method::PUT, &blob_uri(THUMB), b"jpeg").await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(std::fs::read_dir(fx.cache_dir()).unwrap().count(), 0);

        let response = send(&fx.state, Method::GET, &blob_uri(THUMB), b"").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-cache"], "HIT");
        assert_eq!(body_bytes(response).await, b"jpeg");
        assert_eq!(std::fs::read_dir(fx.cache_dir()).unwrap().count(), 1);

        let response = send(&fx.state, Method::HEAD, &blob_uri(THUMB), b"").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_overwrite_serves_new_content() {
        let fx = fixture().await;

        send(&fx.state, Method::PUT, &blob_uri(THUMB), b"old").await;
        send(&fx.state, Method::GET, &blob_uri(THUMB), b"").await;
        assert_eq!(std::fs::read_dir(fx.cache_dir()).unwrap().count(), 1);

        let uri = format!("{}&overwrite=true", blob_uri(THUMB));
        let response = send(&fx.state, Method::PUT, &uri, b"new").await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(std::fs::read_dir(fx.cache_dir()).unwrap().count(), 0);

        let response = send(&fx.state, Method::GET, &blob_uri(THUMB), b"").await;
        assert_eq!(response.headers()["x-cache"], "HIT");
        assert_eq!(body_bytes(response).await, b"new");
    }

    #[tokio::test]
    async fn test_non_thumbnail_is_not_cached() {
        let fx = fixture().await;

        send(&fx.state, Method::PUT, &blob_uri(DC), b"<dc/>").await;
        let response = send(&fx.state, Method::GET, &blob_uri(DC), b"").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-cache"], "MISS");
        assert_eq!(body_bytes(response).await, b"<dc/>");
        assert_eq!(std::fs::read_dir(fx.cache_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_put_duplicate_conflicts() {
        let fx = fixture().await;

        send(&fx.state, Method::PUT, &blob_uri(DC), b"one").await;
        let response = send(&fx.state, Method::PUT, &blob_uri(DC), b"two").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let uri = format!("{}&overwrite=true", blob_uri(DC));
        let response = send(&fx.state, Method::PUT, &uri, b"two").await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_foreign_scheme_is_bad_request() {
        let fx = fixture().await;

        let response = send(&fx.state, Method::GET, &blob_uri("s3://x"), b"").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&fx.state, Method::GET, &blob_uri("not a uri"), b"").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_removes_cache_entry_and_blob() {
        let fx = fixture().await;

        send(&fx.state, Method::PUT, &blob_uri(THUMB), b"jpeg").await;
        send(&fx.state, Method::GET, &blob_uri(THUMB), b"").await;
        assert!(fx.state.connection.cache().contains(THUMB).await);

        let response = send(&fx.state, Method::DELETE, &blob_uri(THUMB), b"").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        assert!(!fx.state.connection.cache().contains(THUMB).await);
        let response = send(&fx.state, Method::GET, &blob_uri(THUMB), b"").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_blobs() {
        let fx = fixture().await;

        send(&fx.state, Method::PUT, &blob_uri(THUMB), b"jpeg").await;
        send(&fx.state, Method::PUT, &blob_uri(DC), b"<dc/>").await;
        send(&fx.state, Method::PUT, &blob_uri("hdfs://store/other/DC/DC.0"), b"x").await;

        let uri = format!("/blobs?prefix={}", urlencoding::encode("hdfs://store/demo:1/"));
        let response = send(&fx.state, Method::GET, &uri, b"").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        let ids: Vec<&str> = json["ids"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(ids, vec![DC, THUMB]);
    }
}
