//! `/api/config`: upstream configuration check.

use axum::Json;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{info, warn};

use mockvox_providers::{UpstreamSettings, validate_upstream};

fn bad_request(error: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": error.into() }))).into_response()
}

pub async fn validate_config(body: Bytes) -> Response {
    let settings: UpstreamSettings = match serde_json::from_slice(&body) {
        Ok(s) => s,
        Err(e) => {
            warn!(%e, "Invalid configuration payload");
            return bad_request(format!("Invalid request body: {e}"));
        }
    };

    if let Some(field) = settings.missing_field() {
        return bad_request(format!("{field} must not be empty"));
    }

    match validate_upstream(&settings).await {
        Ok(models) => {
            info!(models, "Upstream configuration verified");
            Json(json!({ "success": true, "message": "Configuration verified" })).into_response()
        }
        Err(e) => {
            warn!(error = %e, "Upstream configuration rejected");
            bad_request(e.to_string())
        }
    }
}

pub async fn config_status() -> impl IntoResponse {
    Json(json!({ "message": "Configuration service is running" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new().route("/api/config", get(config_status).post(validate_config))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(body: &str) -> Request<Body> {
        Request::post("/api/config")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_status() {
        let response = app()
            .oneshot(Request::get("/api/config").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["message"], "Configuration service is running");
    }

    #[tokio::test]
    async fn test_missing_field() {
        let response = app()
            .oneshot(post(r#"{"apiKey":"sk","baseUrl":"http://localhost/v1"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "model must not be empty");
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let response = app().oneshot(post("{nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_unreachable_upstream() {
        let response = app()
            .oneshot(post(
                r#"{"apiKey":"sk","model":"m","baseUrl":"http://127.0.0.1:1/v1"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().starts_with("Cannot reach the model service"));
    }
}
