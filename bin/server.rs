// TrackerID - Web Server
// JSON API over the dataset repository with Axum

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trackerid::{
    export_filename, render, result_summary, Config, DatasetRepository, Error, ExportFormat,
    HttpFetcher, ImportSummary, LoadSource, LookupEngine, ParkDescriptor, ParkRegistry,
    RefreshOutcome, SqlitePackStore, TrackerRecord,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    repo: DatasetRepository,
    registry: Arc<ParkRegistry>,
}

impl AppState {
    fn park(&self, id: &str) -> trackerid::Result<&ParkDescriptor> {
        self.registry.get(id)
    }

    /// Display name of the active park, falling back to its id
    fn active_name(&self, park_id: &str) -> String {
        self.registry
            .get(park_id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|_| park_id.to_string())
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: (),
            error: Some(message.into()),
        }
    }
}

/// Library error → HTTP status + error envelope
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::UnknownPark(_) => StatusCode::NOT_FOUND,
            Error::NoActivePark => StatusCode::CONFLICT,
            Error::MalformedImport(_) | Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::Refresh { .. } | Error::Fetch { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self.0, "request failed");
        }
        (status, Json(ApiResponse::err(self.0.to_string()))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

fn not_found(what: String) -> Response {
    (StatusCode::NOT_FOUND, Json(ApiResponse::err(what))).into_response()
}

#[derive(Serialize)]
struct ParkResponse {
    id: String,
    name: String,
    data_location: String,
    active: bool,
}

#[derive(Serialize)]
struct LoadResponse {
    park_id: String,
    source: LoadSource,
    trackers: usize,
}

/// One lookup hit with the copy-ready summary
#[derive(Serialize)]
struct TrackerResponse {
    #[serde(flatten)]
    record: TrackerRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    matched_string: Option<String>,
    summary: String,
}

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
}

#[derive(Deserialize)]
struct ImportParams {
    format: Option<String>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/parks - Parks from the registry
async fn get_parks(State(state): State<AppState>) -> impl IntoResponse {
    let active = state.repo.active_park_id();
    let parks: Vec<ParkResponse> = state
        .registry
        .parks()
        .iter()
        .map(|p| ParkResponse {
            id: p.id.clone(),
            name: p.name.clone(),
            data_location: p.data_location.clone(),
            active: active.as_deref() == Some(p.id.as_str()),
        })
        .collect();

    Json(ApiResponse::ok(parks))
}

/// POST /api/parks/:id/load - Activate a park (cache first)
async fn load_park(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<LoadResponse> {
    let park = state.park(&id)?;
    let outcome = state.repo.load_park(park).await?;

    // The background refresh keeps running after the response
    Ok(Json(ApiResponse::ok(LoadResponse {
        park_id: outcome.park_id,
        source: outcome.source,
        trackers: outcome.trackers,
    })))
}

/// POST /api/parks/:id/refresh - Foreground network refresh
async fn refresh_park(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<RefreshOutcome> {
    let park = state.park(&id)?;
    let outcome = state.repo.refresh(&park.id, &park.data_location).await?;
    Ok(Json(ApiResponse::ok(outcome)))
}

/// DELETE /api/parks/:id/cache - Drop the cached pack
async fn forget_park(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<String> {
    let park = state.park(&id)?;
    state.repo.forget(&park.id).await?;
    Ok(Json(ApiResponse::ok(park.id.clone())))
}

/// POST /api/parks/:id/reset - Replace the dataset with an empty pack
async fn reset_park(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<String> {
    let park = state.park(&id)?;
    let pack = state.repo.reset_empty(&park.id).await?;
    Ok(Json(ApiResponse::ok(pack.updated.clone())))
}

/// GET /api/trackers?q= - Active dataset, optionally filtered
async fn search_trackers(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Vec<TrackerRecord>> {
    let pack = state.repo.active_pack()?;
    let engine = LookupEngine::new(&pack);
    let records = engine
        .filter_by_text(params.q.as_deref().unwrap_or(""))
        .into_iter()
        .cloned()
        .collect();
    Ok(Json(ApiResponse::ok(records)))
}

/// GET /api/trackers/:tk - Lookup by TK number
async fn get_tracker(
    State(state): State<AppState>,
    Path(tk): Path<i64>,
) -> std::result::Result<Response, ApiError> {
    let active = state.repo.active().ok_or(Error::NoActivePark)?;
    let engine = LookupEngine::new(&active.pack);

    Ok(match engine.find_by_tk(tk) {
        Some(record) => Json(ApiResponse::ok(TrackerResponse {
            record: record.clone(),
            matched_string: None,
            summary: result_summary(&state.active_name(&active.park_id), record, None),
        }))
        .into_response(),
        None => not_found(format!("TK {} not found", tk)),
    })
}

/// GET /api/controlbox/:platform/:id - Lookup by platform + ControlBox id
async fn get_by_controlbox(
    State(state): State<AppState>,
    Path((platform, controlbox_id)): Path<(i64, i64)>,
) -> std::result::Result<Response, ApiError> {
    let active = state.repo.active().ok_or(Error::NoActivePark)?;
    let engine = LookupEngine::new(&active.pack);

    Ok(match engine.find_by_platform_and_controlbox(platform, controlbox_id) {
        Some(record) => Json(ApiResponse::ok(TrackerResponse {
            record: record.clone(),
            matched_string: None,
            summary: result_summary(&state.active_name(&active.park_id), record, None),
        }))
        .into_response(),
        None => not_found(format!(
            "Platform {} / ControlBox {} not found",
            platform, controlbox_id
        )),
    })
}

/// GET /api/strings/:id - Lookup by composite string id
async fn get_by_string(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> std::result::Result<Response, ApiError> {
    let active = state.repo.active().ok_or(Error::NoActivePark)?;
    let engine = LookupEngine::new(&active.pack);

    Ok(match engine.find_by_composite_id(&raw) {
        Some(hit) => {
            let summary = result_summary(
                &state.active_name(&active.park_id),
                hit.record,
                Some(hit.normalized_query.as_str()),
            );
            Json(ApiResponse::ok(TrackerResponse {
                record: hit.record.clone(),
                matched_string: Some(hit.normalized_query),
                summary,
            }))
            .into_response()
        }
        None => not_found(format!("String {} not found", raw.trim())),
    })
}

/// POST /api/import?format=json|csv - Import the request body into the active park
async fn import_dataset(
    State(state): State<AppState>,
    Query(params): Query<ImportParams>,
    body: String,
) -> ApiResult<ImportSummary> {
    let park_id = state.repo.active_park_id().ok_or(Error::NoActivePark)?;
    let format: ExportFormat = params.format.as_deref().unwrap_or("json").parse()?;

    let summary = match format {
        ExportFormat::Json => state.repo.import_json_text(&park_id, &body).await?,
        ExportFormat::Csv => state.repo.import_csv_text(&park_id, &body).await?,
    };
    Ok(Json(ApiResponse::ok(summary)))
}

/// GET /api/export/:format - Download the active dataset
async fn export_dataset(
    State(state): State<AppState>,
    Path(format): Path<String>,
) -> std::result::Result<Response, ApiError> {
    let format: ExportFormat = format.parse()?;
    let active = state.repo.active().ok_or(Error::NoActivePark)?;
    let text = render(&active.pack, format)?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        export_filename(&active.park_id, format)
    );
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        text,
    )
        .into_response())
}

fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/parks", get(get_parks))
        .route("/parks/:id/load", post(load_park))
        .route("/parks/:id/refresh", post(refresh_park))
        .route("/parks/:id/cache", delete(forget_park))
        .route("/parks/:id/reset", post(reset_park))
        .route("/trackers", get(search_trackers))
        .route("/trackers/:tk", get(get_tracker))
        .route("/controlbox/:platform/:id", get(get_by_controlbox))
        .route("/strings/:id", get(get_by_string))
        .route("/import", post(import_dataset))
        .route("/export/:format", get(export_dataset))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("🌐 TrackerID - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config_file = std::env::var_os("TRACKERID_CONFIG").map(PathBuf::from);
    let config = Config::load(config_file.as_deref()).context("Failed to load config")?;

    let store = SqlitePackStore::open(&config.database)
        .with_context(|| format!("Failed to open cache {}", config.database.display()))?;
    println!("✓ Cache opened: {:?}", config.database);

    let fetcher = HttpFetcher::new(config.fetch_timeout())?;
    let registry = ParkRegistry::load_with_fallback(&fetcher, &store, &config.parks)
        .await
        .with_context(|| format!("Failed to load park registry {}", config.parks))?;
    println!("✓ {} parks from {}", registry.parks().len(), config.parks);

    let repo = DatasetRepository::new(Arc::new(store), Arc::new(fetcher));

    // Restore the last park, like a reopened field session
    if let Some(park) = registry.default_park(repo.last_park().await?.as_deref()) {
        match repo.load_park(park).await {
            Ok(outcome) => info!(park = %park.id, trackers = outcome.trackers, "restored park"),
            Err(e) => warn!(park = %park.id, error = %e, "could not restore park"),
        }
    }

    let app = build_router(AppState {
        repo,
        registry: Arc::new(registry),
    });

    let listener = tokio::net::TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server_addr))?;

    println!("\n🚀 Server running on http://{}", config.server_addr);
    println!("   API: http://{}/api/trackers", config.server_addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;
    use trackerid::MemoryPackStore;

    const PACK: &str = r#"{
        "version": 1,
        "updated": "2024-05-05",
        "trackers": [
            {"tk": 141, "plataforma": 3, "controlbox_id": 4, "channel": 50,
             "strings": ["01_02_03", "01_02_04"], "string_orders": [1, 2]},
            {"tk": 7, "plataforma": 1, "controlbox_id": 65, "channel": 2}
        ]
    }"#;

    fn test_state(dir: &tempfile::TempDir) -> AppState {
        let data = dir.path().join("norte.json");
        std::fs::write(&data, PACK).unwrap();

        let registry = ParkRegistry::new(vec![ParkDescriptor {
            id: "norte".to_string(),
            name: "Parque Norte".to_string(),
            data_location: data.to_str().unwrap().to_string(),
        }]);
        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();

        AppState {
            repo: DatasetRepository::new(Arc::new(MemoryPackStore::new()), Arc::new(fetcher)),
            registry: Arc::new(registry),
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn json(body: &str) -> Value {
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn test_lookup_requires_active_park() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir));

        let (status, body) = send(&app, "GET", "/api/trackers/141", "").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json(&body)["success"], false);
    }

    #[tokio::test]
    async fn test_load_then_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir));

        let (status, body) = send(&app, "POST", "/api/parks/norte/load", "").await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["data"]["source"], "network");
        assert_eq!(body["data"]["trackers"], 2);

        let (status, body) = send(&app, "GET", "/api/trackers/141", "").await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["data"]["plataforma"], 3);
        assert!(body["data"]["summary"]
            .as_str()
            .unwrap()
            .starts_with("Parque Norte\nTK141 (Físico 141)"));

        let (status, body) = send(&app, "GET", "/api/controlbox/1/65", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["data"]["tk"], 7);

        let (status, body) = send(&app, "GET", "/api/strings/1-2-4", "").await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["data"]["tk"], 141);
        assert_eq!(body["data"]["matched_string"], "01_02_04");

        let (status, _) = send(&app, "GET", "/api/trackers/999", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_park() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir));

        let (status, _) = send(&app, "POST", "/api/parks/sur/load", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_import_and_export_csv() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir));
        send(&app, "POST", "/api/parks/norte/load", "").await;

        let csv = "TK;Plataforma;ControlBox_ID;Channel;Strings\n9;2;11;5;1-1-1";
        let (status, body) = send(&app, "POST", "/api/import?format=csv", csv).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["data"]["trackers"], 1);

        let (status, body) = send(&app, "GET", "/api/export/csv", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            "TK,Plataforma,ControlBox_ID,Channel,Strings\n9,2,11,5,\"01_01_01\""
        );

        let (status, _) = send(&app, "GET", "/api/export/xml", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_import_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir));
        send(&app, "POST", "/api/parks/norte/load", "").await;

        let (status, body) = send(&app, "POST", "/api/import", r#"{"version": 1}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["success"], false);

        // Dataset untouched
        let (_, body) = send(&app, "GET", "/api/trackers", "").await;
        assert_eq!(json(&body)["data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_search_and_parks() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir));
        send(&app, "POST", "/api/parks/norte/load", "").await;

        let (_, body) = send(&app, "GET", "/api/trackers?q=id04", "").await;
        let hits = json(&body)["data"].as_array().unwrap().clone();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["tk"], 141);

        let (_, body) = send(&app, "GET", "/api/parks", "").await;
        assert_eq!(json(&body)["data"][0]["active"], true);
    }
}
