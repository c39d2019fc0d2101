mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use common::*;
use farmadis_api::entities::batch::BatchStatus;
use farmadis_api::{app_router, config::AppConfig, events::EventSender, AppState};

async fn test_app() -> (axum::Router, std::sync::Arc<sea_orm::DatabaseConnection>) {
    let conn = test_db().await;
    let db = std::sync::Arc::new(conn);
    let cfg: AppConfig = serde_json::from_value(json!({
        "database_url": "sqlite::memory:"
    }))
    .unwrap();
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(farmadis_api::events::process_events(rx));
    let state = AppState {
        db: db.clone(),
        config: cfg,
        event_sender: EventSender::new(tx),
    };
    (app_router(state), db)
}

fn post_json(uri: &str, fx: &Fixture, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-tenant-id", fx.tenant_id.to_string())
        .header("x-user-id", fx.user_id.to_string())
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoint_reports_database() {
    let (app, _db) = test_app().await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "up");
}

#[tokio::test]
async fn movements_require_tenant_headers() {
    let (app, _db) = test_app().await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/stock/movements")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_vec(&json!({
                "movement_type": "IN",
                "product_id": Uuid::new_v4(),
                "to_location_id": Uuid::new_v4(),
                "quantity": "10",
            }))
            .unwrap(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn movement_roundtrip_and_balance_listing() {
    let (app, db) = test_app().await;
    let fx = Fixture::new();
    let product = seed_product(&db, fx.tenant_id, "AMOX-500").await;
    let (_, loc) = seed_site(&db, fx.tenant_id, "LA PAZ").await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/stock/movements",
            &fx,
            json!({
                "movement_type": "IN",
                "product_id": product.id,
                "to_location_id": loc.id,
                "quantity": "100",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["movement"]["number"], 1);
    assert_eq!(body["to_balance"]["quantity"], "100");

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/stock/balances?product_id={}", product.id))
                .header("x-tenant-id", fx.tenant_id.to_string())
                .header("x-user-id", fx.user_id.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["balances"][0]["available"], "100");
}

#[tokio::test]
async fn expired_batch_surfaces_coded_conflict() {
    let (app, db) = test_app().await;
    let fx = Fixture::new();
    let product = seed_product(&db, fx.tenant_id, "PARA-500").await;
    let (_, loc) = seed_site(&db, fx.tenant_id, "LA PAZ").await;
    let expired = seed_batch(
        &db,
        fx.tenant_id,
        product.id,
        "L-OLD",
        Some(days_from_today(-3)),
        BatchStatus::Released,
    )
    .await;
    receive_stock(&db, &fx, product.id, Some(expired.id), loc.id, dec!(50)).await;

    let response = app
        .oneshot(post_json(
            "/api/v1/stock/movements",
            &fx,
            json!({
                "movement_type": "OUT",
                "product_id": product.id,
                "batch_id": expired.id,
                "from_location_id": loc.id,
                "quantity": "10",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["code"], "BATCH_EXPIRED");
    assert_eq!(body["meta"]["batchNumber"], "L-OLD");
}

#[tokio::test]
async fn order_lifecycle_over_http() {
    let (app, db) = test_app().await;
    let fx = Fixture::new();
    let product = seed_product(&db, fx.tenant_id, "IBU-400").await;
    let (_, loc) = seed_site(&db, fx.tenant_id, "LA PAZ").await;
    let batch = seed_batch(
        &db,
        fx.tenant_id,
        product.id,
        "L-OK",
        Some(days_from_today(60)),
        BatchStatus::Released,
    )
    .await;
    receive_stock(&db, &fx, product.id, Some(batch.id), loc.id, dec!(100)).await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/sales-orders",
            &fx,
            json!({
                "customer_name": "Farmacia Central",
                "payment_mode": "CREDIT_30",
                "lines": [{
                    "product_id": product.id,
                    "quantity": "30",
                    "unit_price": "4.50",
                }],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    let order_id = body["order"]["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/sales-orders/{}/confirm", order_id),
            &fx,
            json!({ "version": 1 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["reservations"], 1);

    // Stale version conflicts.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/sales-orders/{}/deliver", order_id),
            &fx,
            json!({ "version": 1 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .oneshot(post_json(
            &format!("/api/v1/sales-orders/{}/deliver", order_id),
            &fx,
            json!({ "version": 2 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["order"]["status"], "FULFILLED");
    assert!(body["payment_due_at"].is_string());
}
