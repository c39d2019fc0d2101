use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use sea_orm::TransactionTrait;
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::events::Event;
use crate::handlers::{audit_blocked_expiry, TenantContext};
use crate::services::sales_orders::{self, NewOrderLine, NewSalesOrder};
use crate::AppState;

pub fn sales_orders_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders).post(create_order))
        .route("/:id", get(get_order))
        .route("/:id/confirm", post(confirm_order))
        .route("/:id/fulfill", post(fulfill_order))
        .route("/:id/deliver", post(deliver_order))
        .route("/:id/cancel", post(cancel_order))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderLineRequest {
    pub product_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub customer_name: String,
    /// "CASH" or "CREDIT_<days>"
    pub payment_mode: String,
    pub preferred_city: Option<String>,
    pub lines: Vec<CreateOrderLineRequest>,
}

/// Optimistic concurrency: every transition presents the version the caller
/// last saw.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TransitionRequest {
    pub version: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FulfillRequest {
    pub version: i32,
    pub from_location_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DeliverRequest {
    pub version: i32,
    /// Required only when the order has no active reservations.
    pub from_location_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    pub status: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

pub async fn create_order(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let txn = state.db.begin().await?;
    let (order, lines) = sales_orders::create_order(
        &txn,
        ctx.tenant_id,
        ctx.user_id,
        NewSalesOrder {
            customer_name: payload.customer_name,
            payment_mode: payload.payment_mode,
            preferred_city: payload.preferred_city,
            lines: payload
                .lines
                .into_iter()
                .map(|l| NewOrderLine {
                    product_id: l.product_id,
                    batch_id: l.batch_id,
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                })
                .collect(),
        },
    )
    .await?;
    txn.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "order": order, "lines": lines })),
    ))
}

pub async fn list_orders(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(query): Query<OrderListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let (orders, total) = sales_orders::list_orders(
        &*state.db,
        ctx.tenant_id,
        query.status.as_deref(),
        page,
        limit,
    )
    .await?;
    Ok(Json(json!({
        "orders": orders,
        "total": total,
        "page": page,
        "limit": limit,
    })))
}

pub async fn get_order(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let db = &*state.db;
    let order = sales_orders::get_order(db, ctx.tenant_id, id).await?;
    let lines = sales_orders::order_lines(db, ctx.tenant_id, id).await?;
    let reservations = sales_orders::order_reservations(db, ctx.tenant_id, id).await?;
    Ok(Json(json!({
        "order": order,
        "lines": lines,
        "reservations": reservations,
    })))
}

/// DRAFT -> CONFIRMED; reserves stock FEFO-wise, tolerating shortfalls.
#[utoipa::path(
    post,
    path = "/api/v1/sales-orders/{id}/confirm",
    request_body = TransitionRequest,
    responses(
        (status = 200, description = "Order confirmed and stock reserved"),
        (status = 404, description = "Order missing", body = crate::errors::ErrorResponse),
        (status = 409, description = "Version or state conflict", body = crate::errors::ErrorResponse),
    ),
    tag = "sales-orders"
)]
pub async fn confirm_order(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransitionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let txn = state.db.begin().await?;
    let outcome = sales_orders::confirm_order(&txn, ctx.tenant_id, id, payload.version).await?;
    txn.commit().await?;

    state
        .event_sender
        .send_best_effort(Event::OrderConfirmed {
            order_id: id,
            tenant_id: ctx.tenant_id,
            reserved_line_count: outcome.takes.len(),
        })
        .await;

    Ok(Json(json!({
        "order": outcome.order,
        "reservations": outcome.takes.len(),
    })))
}

pub async fn fulfill_order(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<FulfillRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let txn = state.db.begin().await?;
    let outcome = match sales_orders::fulfill_order(
        &txn,
        ctx.tenant_id,
        ctx.user_id,
        id,
        payload.version,
        payload.from_location_id,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            audit_blocked_expiry(&state, ctx.tenant_id, &err).await;
            return Err(err);
        }
    };
    txn.commit().await?;

    state
        .event_sender
        .send_best_effort(Event::OrderFulfilled {
            order_id: id,
            tenant_id: ctx.tenant_id,
        })
        .await;

    Ok(Json(json!({
        "order": outcome.order,
        "movements": outcome.movements,
    })))
}

/// Consumes the order's reservations (or falls back to direct picking) and
/// schedules the payment-due notification from the payment mode.
#[utoipa::path(
    post,
    path = "/api/v1/sales-orders/{id}/deliver",
    request_body = DeliverRequest,
    responses(
        (status = 200, description = "Order delivered"),
        (status = 404, description = "Order missing", body = crate::errors::ErrorResponse),
        (status = 409, description = "Version/state conflict, expired batch or insufficient stock", body = crate::errors::ErrorResponse),
    ),
    tag = "sales-orders"
)]
pub async fn deliver_order(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<DeliverRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let txn = state.db.begin().await?;
    let outcome = match sales_orders::deliver_order(
        &txn,
        ctx.tenant_id,
        ctx.user_id,
        id,
        payload.version,
        payload.from_location_id,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            audit_blocked_expiry(&state, ctx.tenant_id, &err).await;
            return Err(err);
        }
    };
    txn.commit().await?;

    let delivered_at = outcome
        .order
        .delivered_at
        .expect("delivered order carries delivered_at");
    state
        .event_sender
        .send_best_effort(Event::OrderDelivered {
            order_id: id,
            tenant_id: ctx.tenant_id,
            delivered_at,
        })
        .await;
    state
        .event_sender
        .send_best_effort(Event::PaymentDueScheduled {
            order_id: id,
            tenant_id: ctx.tenant_id,
            due_at: outcome.payment_due_at,
        })
        .await;

    Ok(Json(json!({
        "order": outcome.order,
        "movements": outcome.movements,
        "payment_due_at": outcome.payment_due_at,
    })))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransitionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let txn = state.db.begin().await?;
    let order = sales_orders::cancel_order(&txn, ctx.tenant_id, id, payload.version).await?;
    txn.commit().await?;

    state
        .event_sender
        .send_best_effort(Event::OrderCancelled {
            order_id: id,
            tenant_id: ctx.tenant_id,
        })
        .await;

    Ok(Json(json!({ "order": order })))
}
