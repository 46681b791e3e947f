//! Route configuration for the viewer API.

use std::sync::Arc;

use axum::routing::{get, post, Router};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::handlers::{
    get_settings, health_check, list_containers, list_contexts, list_namespaces, list_pods,
    recent_files, recent_namespaces, switch_context, update_settings,
};
use crate::state::AppState;
use crate::websocket::ws_upgrade;

/// Create the viewer router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let static_dir = state.config().static_dir.clone();

    let api_routes = Router::new()
        .route("/health", get(health_check))
        // Preferences
        .route("/settings", get(get_settings).post(update_settings))
        .route("/recent-files", get(recent_files))
        .route("/recent-namespaces", get(recent_namespaces))
        // Cluster metadata
        .route("/k8s/contexts", get(list_contexts))
        .route("/k8s/switch-context", post(switch_context))
        .route("/k8s/namespaces", get(list_namespaces))
        .route("/k8s/pods", get(list_pods))
        .route("/k8s/containers", get(list_containers));

    let mut router = Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws_upgrade));

    if let Some(dir) = static_dir {
        // Unknown paths fall through to index.html so the UI can route itself
        let index = ServeFile::new(dir.join("index.html"));
        router = router.fallback_service(ServeDir::new(dir).fallback(index));
    }

    router.with_state(state).layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::config::ServerConfig;
    use crate::settings::SettingsStore;

    fn test_router(config: ServerConfig) -> Router {
        let state = AppState::new(config, Arc::new(SettingsStore::ephemeral()));
        create_router(Arc::new(state))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = test_router(ServerConfig::default());

        let response = router
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["sessions"], 0);
    }

    #[tokio::test]
    async fn test_settings_roundtrip() {
        let state = Arc::new(AppState::new(
            ServerConfig::default(),
            Arc::new(SettingsStore::ephemeral()),
        ));

        let response = create_router(Arc::clone(&state))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/settings")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"tailLines":250,"pollingIntervalMs":0}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");

        let response = create_router(state)
            .oneshot(Request::builder().uri("/api/settings").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["tailLines"], 250);
        assert_eq!(json["pollingIntervalMs"], 500);
        assert_eq!(json["renderAnsiTopPane"], true);
        assert!(json.get("recentFiles").is_none());
    }

    #[tokio::test]
    async fn test_recent_files_empty() {
        let router = test_router(ServerConfig::default());

        let response = router
            .oneshot(Request::builder().uri("/api/recent-files").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_pods_requires_namespace() {
        let router = test_router(ServerConfig::default());

        let response = router
            .oneshot(Request::builder().uri("/api/k8s/pods").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "invalid_request");
        assert_eq!(json["message"], "namespace query parameter is required");
    }

    #[tokio::test]
    async fn test_containers_requires_pod() {
        let router = test_router(ServerConfig::default());

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/k8s/containers?namespace=default")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["message"],
            "pod query parameter is required"
        );
    }

    #[tokio::test]
    async fn test_switch_context_requires_name() {
        let router = test_router(ServerConfig::default());

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/k8s/switch-context")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["message"], "context is required");
    }

    #[tokio::test]
    async fn test_unknown_route_without_static_dir() {
        let router = test_router(ServerConfig::default());

        let response = router
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ws_requires_upgrade() {
        let router = test_router(ServerConfig::default());

        let response = router
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_static_fallback_serves_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>viewer</html>").unwrap();
        std::fs::write(dir.path().join("app.js"), "console.log(1)").unwrap();

        let state = Arc::new(AppState::new(
            ServerConfig::default().with_static_dir(dir.path()),
            Arc::new(SettingsStore::ephemeral()),
        ));

        let response = create_router(Arc::clone(&state))
            .oneshot(Request::builder().uri("/app.js").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"console.log(1)");

        let response = create_router(state)
            .oneshot(Request::builder().uri("/some/ui/route").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"<html>viewer</html>");

        // API routes still win over the fallback
        let response = create_router(Arc::new(AppState::new(
            ServerConfig::default().with_static_dir(dir.path()),
            Arc::new(SettingsStore::ephemeral()),
        )))
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
        assert_eq!(body_json(response).await["status"], "ok");
    }
}
