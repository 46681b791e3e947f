//! HTTP request handlers for the REST API.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use weblogview_k8s::ContextInfo;

use crate::error::{ApiError, ApiResult};
use crate::settings::{Settings, SettingsUpdate};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Connected WebSocket sessions
    pub sessions: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    fn ok() -> Json<Self> {
        Json(Self { status: "ok" })
    }
}

/// Preferences shown to the UI; the recent lists have their own endpoints
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    pub tail_lines: usize,
    pub render_ansi_top_pane: bool,
    pub render_ansi_bottom_pane: bool,
    pub polling_interval_ms: u64,
}

impl From<Settings> for SettingsResponse {
    fn from(settings: Settings) -> Self {
        Self {
            tail_lines: settings.tail_lines,
            render_ansi_top_pane: settings.render_ansi_top_pane,
            render_ansi_bottom_pane: settings.render_ansi_bottom_pane,
            polling_interval_ms: settings.polling_interval_ms,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SwitchContextRequest {
    #[serde(default)]
    pub context: String,
}

#[derive(Debug, Deserialize)]
pub struct PodsQuery {
    pub namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContainersQuery {
    pub namespace: Option<String>,
    pub pod: Option<String>,
}

fn required_param(value: Option<String>, name: &str) -> ApiResult<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{} query parameter is required", name)))
}

/// GET /api/health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.registry().len(),
    })
}

/// GET /api/settings
pub async fn get_settings(State(state): State<Arc<AppState>>) -> Json<SettingsResponse> {
    Json(state.settings().get().into())
}

/// POST /api/settings
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(update): Json<SettingsUpdate>,
) -> ApiResult<Json<StatusResponse>> {
    state.settings().update(update)?;
    Ok(StatusResponse::ok())
}

/// GET /api/recent-files
pub async fn recent_files(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.settings().recent_files())
}

/// GET /api/recent-namespaces
pub async fn recent_namespaces(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.settings().recent_namespaces())
}

/// GET /api/k8s/contexts
pub async fn list_contexts(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<ContextInfo>>> {
    state
        .kube()
        .get_contexts()
        .map(Json)
        .map_err(|e| ApiError::kubernetes("Failed to list contexts", e))
}

/// POST /api/k8s/switch-context
pub async fn switch_context(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SwitchContextRequest>,
) -> ApiResult<Json<StatusResponse>> {
    if request.context.is_empty() {
        return Err(ApiError::BadRequest("context is required".to_string()));
    }

    state
        .kube()
        .switch_context(&request.context)
        .map_err(|e| ApiError::kubernetes("Failed to switch context", e))?;
    info!(context = %request.context, "Active context changed via API");
    Ok(StatusResponse::ok())
}

/// GET /api/k8s/namespaces
pub async fn list_namespaces(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<String>>> {
    let namespaces = state
        .kube()
        .get_namespaces()
        .await
        .map_err(|e| ApiError::kubernetes("Failed to list namespaces", e))?;
    Ok(Json(namespaces.into_iter().map(|ns| ns.name).collect()))
}

/// GET /api/k8s/pods?namespace=
pub async fn list_pods(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PodsQuery>,
) -> ApiResult<Json<Vec<String>>> {
    let namespace = required_param(query.namespace, "namespace")?;
    let pods = state
        .kube()
        .get_pods(&namespace)
        .await
        .map_err(|e| ApiError::kubernetes("Failed to list pods", e))?;
    Ok(Json(pods.into_iter().map(|pod| pod.name).collect()))
}

/// GET /api/k8s/containers?namespace=&pod=
pub async fn list_containers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ContainersQuery>,
) -> ApiResult<Json<Vec<String>>> {
    let namespace = required_param(query.namespace, "namespace")?;
    let pod = required_param(query.pod, "pod")?;
    let containers = state
        .kube()
        .get_containers(&namespace, &pod)
        .await
        .map_err(|e| ApiError::kubernetes("Failed to list containers", e))?;
    Ok(Json(containers.into_iter().map(|c| c.name).collect()))
}
