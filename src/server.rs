use crate::api::{ApiClient, ApiError};
use crate::binning::{ColorStop, RegionFilter};
use crate::config::AppConfig;
use crate::layers::{self, LayerSpec, Legend, MapInit, SourceSpec, Theme};
use crate::regional::RegionalLayer;
use crate::study_view::{self, MapView, StudyDetail, StudyError};
use crate::table::StudyTable;
use crate::types::{Schema, Study, StudyKey};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

pub struct AppState {
    pub config: AppConfig,
    pub api: ApiClient,
    pub regional: Option<RegionalLayer>,
}

impl AppState {
    /// Builds the state, loading the regional asset. A missing or broken
    /// asset only disables the regional routes.
    pub fn new(config: AppConfig) -> Self {
        let regional = match RegionalLayer::load(&config.regional.geojson, &config.regional.region_property) {
            Ok(layer) => Some(layer),
            Err(e) => {
                tracing::error!("Error loading regional GeoJSON: {:#}", e);
                None
            }
        };
        let api = ApiClient::new(&config.api.base_url);
        Self { config, api, regional }
    }
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Unavailable(String),
    Upstream(ApiError),
}

impl From<ApiError> for AppError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Invalid(msg) => AppError::BadRequest(msg),
            ApiError::Status { status: 404, body } => AppError::NotFound(body),
            other => AppError::Upstream(other),
        }
    }
}

impl From<StudyError> for AppError {
    fn from(err: StudyError) -> Self {
        match err {
            StudyError::NotFound => AppError::NotFound(err.to_string()),
            StudyError::NotShared => AppError::Forbidden(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, m),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            AppError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            AppError::Upstream(e) => {
                tracing::error!("Upstream request failed: {}", e);
                (StatusCode::BAD_GATEWAY, e.to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, AppError>;

fn parse_schema(raw: &str) -> std::result::Result<Schema, AppError> {
    raw.parse::<Schema>().map_err(|e| AppError::BadRequest(e.to_string()))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let static_dir = ServeDir::new(&state.config.server.static_dir);

    Router::new()
        .route("/api/map/config", get(map_config_handler))
        .route("/api/regional/meta", get(regional_meta_handler))
        .route("/api/regional/layer", get(regional_layer_handler))
        .route("/api/regional/query", get(regional_query_handler))
        .route("/api/studies/:username/:schema", get(list_studies_handler))
        .route(
            "/api/studies/:username/:schema/:study",
            get(study_detail_handler).delete(delete_handler),
        )
        .route("/api/studies/:username/:schema/:study/map", get(study_map_handler))
        .route("/api/studies/:username/:schema/:study/geoms", get(study_geoms_handler))
        .route("/api/studies/:username/:schema/:study/share", post(share_handler))
        .route("/api/studies/:username/:schema/:study/rename", post(rename_handler))
        .fallback_service(static_dir)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: AppConfig) -> Result<()> {
    let port = config.server.port;
    let state = Arc::new(AppState::new(config));
    let app = build_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Deserialize)]
pub struct ThemeQuery {
    #[serde(default)]
    theme: Theme,
}

async fn map_config_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ThemeQuery>,
) -> Json<MapInit> {
    Json(MapInit::new(&state.config.map, params.theme))
}

#[derive(Serialize)]
pub struct RegionalMeta {
    regions: Vec<String>,
    attributes: Vec<String>,
    legend: Legend,
    source: SourceSpec,
}

fn regional(state: &AppState) -> std::result::Result<&RegionalLayer, AppError> {
    state
        .regional
        .as_ref()
        .ok_or_else(|| AppError::Unavailable("Regional data unavailable".to_string()))
}

async fn regional_meta_handler(State(state): State<Arc<AppState>>) -> Json<RegionalMeta> {
    let cfg = &state.config.regional;
    let mut regions = vec![cfg.all_regions_label.clone()];
    match (&state.regional, cfg.regions.is_empty()) {
        (Some(layer), true) => regions.extend(layer.regions()),
        _ => regions.extend(cfg.regions.iter().cloned()),
    }

    let data_url = cfg
        .geojson
        .file_name()
        .map(|name| format!("/{}", name.to_string_lossy()))
        .unwrap_or_else(|| "/for_mapbox.geojson".to_string());

    Json(RegionalMeta {
        regions,
        attributes: cfg.attributes.clone(),
        legend: Legend::new(&cfg.palette),
        source: layers::regional_source(&data_url),
    })
}

#[derive(Deserialize)]
pub struct BandsQuery {
    attribute: String,
    region: Option<String>,
}

#[derive(Serialize)]
pub struct RegionalBands {
    attribute: String,
    region: String,
    stops: Vec<ColorStop>,
    max: Option<f64>,
    layer: LayerSpec,
}

async fn regional_layer_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BandsQuery>,
) -> ApiResult<RegionalBands> {
    let layer_data = regional(&state)?;
    let cfg = &state.config.regional;

    if !cfg.attributes.contains(&params.attribute) && !layer_data.has_attribute(&params.attribute) {
        return Err(AppError::BadRequest(format!("Unknown attribute '{}'", params.attribute)));
    }

    let filter = RegionFilter::from_label(params.region.as_deref(), &cfg.all_regions_label);
    let stops = layer_data.bands(&params.attribute, &filter, &cfg.palette);
    let max = layer_data.attribute_max(&params.attribute, &filter);
    let region = match &filter {
        RegionFilter::All => None,
        RegionFilter::Only(label) => Some(label.as_str()),
    };
    let layer = layers::regional_line_layer(
        &params.attribute,
        &stops,
        &cfg.region_property,
        region,
        cfg.fallback_color(),
    );

    Ok(Json(RegionalBands {
        attribute: params.attribute.clone(),
        region: region.unwrap_or(&cfg.all_regions_label).to_string(),
        stops,
        max,
        layer,
    }))
}

#[derive(Deserialize)]
pub struct PointQuery {
    lat: f64,
    lon: f64,
}

#[derive(Serialize)]
pub struct RegionalHit {
    region: String,
    lines: Vec<String>,
}

async fn regional_query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PointQuery>,
) -> ApiResult<Option<RegionalHit>> {
    let layer_data = regional(&state)?;
    let tolerance = state.config.regional.line_tolerance;
    let hit = layer_data.feature_at(params.lon, params.lat, tolerance).map(|f| RegionalHit {
        region: f.region.clone(),
        lines: f.popup_lines(),
    });
    Ok(Json(hit))
}

async fn list_studies_handler(
    State(state): State<Arc<AppState>>,
    Path((username, schema)): Path<(String, String)>,
) -> ApiResult<StudyTable> {
    let schema = parse_schema(&schema)?;
    let studies = match state.api.list_studies(&username, schema).await {
        Ok(studies) => studies,
        Err(e) => {
            tracing::error!("Error fetching data: {}", e);
            Vec::new()
        }
    };
    Ok(Json(StudyTable::build(
        &studies,
        schema,
        &state.config.server.public_link_prefix,
    )))
}

#[derive(Serialize)]
pub struct SharedStudyResponse {
    study: Study,
    detail: StudyDetail,
}

async fn study_detail_handler(
    State(state): State<Arc<AppState>>,
    Path((username, schema, study)): Path<(String, String, String)>,
) -> ApiResult<SharedStudyResponse> {
    let key = StudyKey::new(username, parse_schema(&schema)?, study);
    let study = study_view::resolve_shared_study(&state.api, &key).await?;
    let detail = StudyDetail::new(&study, key.schema);
    Ok(Json(SharedStudyResponse { study, detail }))
}

async fn study_map_handler(
    State(state): State<Arc<AppState>>,
    Path((username, schema, study)): Path<(String, String, String)>,
    Query(params): Query<ThemeQuery>,
) -> ApiResult<MapView> {
    let key = StudyKey::new(username, parse_schema(&schema)?, study);
    let geoms = state.api.study_geoms(&key).await?;
    let view = MapView::for_study(&state.config.map, params.theme, key.schema, &geoms)?;
    Ok(Json(view))
}

async fn study_geoms_handler(
    State(state): State<Arc<AppState>>,
    Path((username, schema, study)): Path<(String, String, String)>,
) -> ApiResult<Value> {
    let key = StudyKey::new(username, parse_schema(&schema)?, study);
    Ok(Json(state.api.study_geoms(&key).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameBody {
    new_name: String,
}

async fn rename_handler(
    State(state): State<Arc<AppState>>,
    Path((username, schema, study)): Path<(String, String, String)>,
    Json(body): Json<RenameBody>,
) -> ApiResult<Value> {
    let schema = parse_schema(&schema)?;
    let reply = state
        .api
        .rename_study(&username, schema, &study, &body.new_name)
        .await?;
    Ok(Json(reply))
}

#[derive(Deserialize)]
pub struct ShareRequest {
    shared: bool,
}

async fn share_handler(
    State(state): State<Arc<AppState>>,
    Path((username, schema, study)): Path<(String, String, String)>,
    Json(body): Json<ShareRequest>,
) -> std::result::Result<StatusCode, AppError> {
    let key = StudyKey::new(username, parse_schema(&schema)?, study);
    state.api.set_shared(&key, body.shared).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Path((username, schema, study)): Path<(String, String, String)>,
) -> std::result::Result<StatusCode, AppError> {
    let key = StudyKey::new(username, parse_schema(&schema)?, study);
    state.api.delete_study(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}
