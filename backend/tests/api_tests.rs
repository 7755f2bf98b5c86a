//! HTTP API tests
//!
//! Drives the full router in-process: login, bearer-token gating, shipment
//! recording and report export.

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use produce_ledger::{create_app, init_state, AppState, Config};
use serde_json::{json, Value};
use shared::models::NewUser;
use shared::types::{Role, Session, UserId};
use tower::ServiceExt;

const ADMIN_PASSWORD: &str = "change-me-now";

async fn test_app() -> (Router, AppState) {
    let state = init_state(Config::in_memory("api-test-secret"))
        .await
        .unwrap()
        .with_bcrypt_cost(4);
    state
        .auth
        .ensure_bootstrap_admin("admin", ADMIN_PASSWORD)
        .await
        .unwrap();
    (create_app(state.clone()), state)
}

async fn send(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, token, body).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn login(app: &Router, username: &str, password: &str) -> String {
    let (status, body) = send_json(
        app,
        Method::POST,
        "/api/v1/auth/login",
        None,
        Some(json!({ "username": username, "password": password })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {}", body);
    body["access_token"].as_str().unwrap().to_string()
}

// ============================================================================
// Authentication Tests
// ============================================================================

#[cfg(test)]
mod auth_api_tests {
    use super::*;

    #[tokio::test]
    async fn test_health_is_public() {
        let (app, _) = test_app().await;
        let (status, body) = send_json(&app, Method::GET, "/api/v1/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized() {
        let (app, _) = test_app().await;
        let (status, body) = send_json(
            &app,
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "username": "admin", "password": "guess-again" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let (app, _) = test_app().await;
        let (status, body) = send_json(&app, Method::GET, "/api/v1/products", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_viewer_cannot_create_products() {
        let (app, state) = test_app().await;
        let admin = Session::new(UserId(1), "admin", Role::Admin);
        state
            .auth
            .create_user(
                &admin,
                NewUser {
                    username: "auditor".to_string(),
                    password: "read-only-pass".to_string(),
                    role: Role::Viewer,
                },
            )
            .await
            .unwrap();
        let token = login(&app, "auditor", "read-only-pass").await;

        let (status, body) = send_json(
            &app,
            Method::POST,
            "/api/v1/products",
            Some(&token),
            Some(json!({ "name": "Tomato" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "PERMISSION_DENIED");

        let (status, _) = send_json(&app, Method::GET, "/api/v1/products", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
    }
}

// ============================================================================
// Ledger API Tests
// ============================================================================

#[cfg(test)]
mod ledger_api_tests {
    use super::*;

    async fn create(app: &Router, token: &str, uri: &str, name: &str) -> i64 {
        let (status, body) =
            send_json(app, Method::POST, uri, Some(token), Some(json!({ "name": name }))).await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["id"].as_i64().unwrap()
    }

    fn tomato_shipment(tomato: i64, a: i64, b: i64, second_share: i64) -> Value {
        json!({
            "notes": "Monday delivery",
            "line_items": [{
                "product_id": tomato,
                "unit_price": "50",
                "quantity": 100,
                "allocations": [
                    { "farmer_id": a, "quantity": 60, "unit_price": "65" },
                    { "farmer_id": b, "quantity": second_share, "unit_price": "70" }
                ]
            }]
        })
    }

    #[tokio::test]
    async fn test_record_shipment_and_read_back() {
        let (app, _) = test_app().await;
        let token = login(&app, "admin", ADMIN_PASSWORD).await;
        let tomato = create(&app, &token, "/api/v1/products", "Tomato").await;
        let a = create(&app, &token, "/api/v1/farmers", "A").await;
        let b = create(&app, &token, "/api/v1/farmers", "B").await;

        let (status, detail) = send_json(
            &app,
            Method::POST,
            "/api/v1/shipments",
            Some(&token),
            Some(tomato_shipment(tomato, a, b, 40)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", detail);
        assert_eq!(detail["purchase_total"], "5000.00");
        assert_eq!(detail["sales_total"], "6700.00");
        let shipment_id = detail["shipment"]["id"].as_i64().unwrap();

        let (status, fetched) = send_json(
            &app,
            Method::GET,
            &format!("/api/v1/shipments/{}", shipment_id),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["allocations"].as_array().unwrap().len(), 2);

        let (status, stock) = send_json(
            &app,
            Method::GET,
            &format!("/api/v1/products/{}/stock", tomato),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stock["current_stock"], 0);
        assert_eq!(stock["total_sold"], 100);
    }

    #[tokio::test]
    async fn test_incomplete_shipment_reports_remaining() {
        let (app, _) = test_app().await;
        let token = login(&app, "admin", ADMIN_PASSWORD).await;
        let tomato = create(&app, &token, "/api/v1/products", "Tomato").await;
        let a = create(&app, &token, "/api/v1/farmers", "A").await;
        let b = create(&app, &token, "/api/v1/farmers", "B").await;
        let draft = tomato_shipment(tomato, a, b, 30);

        let (status, report) = send_json(
            &app,
            Method::POST,
            "/api/v1/shipments/validate",
            Some(&token),
            Some(draft.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["ready"], false);
        assert_eq!(report["line_items"][0]["remaining"], 10);

        let (status, body) =
            send_json(&app, Method::POST, "/api/v1/shipments", Some(&token), Some(draft)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "INCOMPLETE_ALLOCATION");

        let (_, shipments) =
            send_json(&app, Method::GET, "/api/v1/shipments", Some(&token), None).await;
        assert!(shipments.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_product_is_conflict() {
        let (app, _) = test_app().await;
        let token = login(&app, "admin", ADMIN_PASSWORD).await;
        create(&app, &token, "/api/v1/products", "Tomato").await;

        let (status, body) = send_json(
            &app,
            Method::POST,
            "/api/v1/products",
            Some(&token),
            Some(json!({ "name": "TOMATO" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "DUPLICATE_ERROR");
        assert_eq!(body["error"]["field"], "name");
    }

    #[tokio::test]
    async fn test_stock_report_as_csv() {
        let (app, _) = test_app().await;
        let token = login(&app, "admin", ADMIN_PASSWORD).await;
        create(&app, &token, "/api/v1/products", "Onion").await;

        let (status, bytes) = send(
            &app,
            Method::GET,
            "/api/v1/reports/stock?format=csv",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let csv = String::from_utf8(bytes).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("product_id,product,total_bought,total_sold,total_returned,current_stock")
        );
        assert_eq!(lines.next(), Some("1,Onion,0,0,0,0"));
    }

    #[tokio::test]
    async fn test_valuation_report_json() {
        let (app, _) = test_app().await;
        let token = login(&app, "admin", ADMIN_PASSWORD).await;
        create(&app, &token, "/api/v1/products", "Onion").await;

        let (status, body) =
            send_json(&app, Method::GET, "/api/v1/reports/valuation", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["currency"], "DA");
        assert_eq!(body["total_value"], "0.00");
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
    }
}
