//! HTTP surface and router assembly.

pub mod auth;
pub mod billing;
pub mod signals;

use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde_json::json;

use crate::auth::require_auth;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/signals", get(signals::get_signals))
        .route("/signals-quota/check", post(signals::check_quota))
        .route("/billing/create-checkout", post(billing::create_checkout))
        .route("/billing/status", get(billing::status))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/billing/webhook", post(billing::webhook))
        .merge(protected)
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "status": "online",
        "message": "Trading Signals API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn webhook_request(payload: &str, signature: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/billing/webhook")
            .header("stripe-signature", signature)
            .body(Body::from(payload.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_router(AppState::for_tests());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_root_reports_service_metadata() {
        let app = create_router(AppState::for_tests());
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "online");
        assert!(body["version"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_protected_route_rejects_missing_token() {
        let app = create_router(AppState::for_tests());
        let response = app
            .oneshot(Request::builder().uri("/signals").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_protected_route_rejects_garbage_token() {
        let app = create_router(AppState::for_tests());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/signals")
                    .header("authorization", "Bearer not.a.jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_webhook_duplicate_delivery_roundtrip() {
        let state = AppState::for_tests();
        let account_id = Uuid::new_v4();
        state.ledger.register_account(account_id).await;
        state
            .ledger
            .set_customer_ref(account_id, "cus_mock_alice")
            .await
            .unwrap();

        let payload = r#"{
            "id": "evt_http_1",
            "type": "checkout.session.completed",
            "data": {"object": {"customer": "cus_mock_alice"}}
        }"#;

        let app = create_router(state.clone());
        let first = app
            .clone()
            .oneshot(webhook_request(payload, "mock-signature"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let body = body_json(first).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["event_type"], "checkout.session.completed");
        assert!(state.ledger.is_paid(account_id).await.unwrap());

        let second = app
            .oneshot(webhook_request(payload, "mock-signature"))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(body_json(second).await["status"], "already_processed");
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_signature() {
        let app = create_router(AppState::for_tests());
        let response = app
            .oneshot(webhook_request(r#"{"id":"evt_x","type":"y"}"#, "forged"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_webhook_rejects_missing_signature_header() {
        let app = create_router(AppState::for_tests());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/billing/webhook")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
