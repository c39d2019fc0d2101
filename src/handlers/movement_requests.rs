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
use crate::services::movement_requests::{
    self, FulfillLine, NewMovementRequest, NewRequestItem,
};
use crate::AppState;

pub fn movement_requests_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_requests).post(create_request))
        .route("/:id", get(get_request))
        .route("/:id/plan", get(plan_request))
        .route("/:id/fulfill", post(fulfill_request))
        .route("/:id/send", post(send_request))
        .route("/:id/confirm", post(confirm_request))
        .route("/:id/cancel", post(cancel_request))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRequestItemRequest {
    pub product_id: Uuid,
    /// e.g. "BOX_10"; omitted means base units.
    pub presentation: Option<String>,
    #[serde(default = "one")]
    pub units_per_presentation: Decimal,
    pub quantity: Decimal,
}

fn one() -> Decimal {
    Decimal::ONE
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRequestRequest {
    pub requested_city: String,
    pub note: Option<String>,
    pub items: Vec<CreateRequestItemRequest>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FulfillLineRequest {
    pub item_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub presentation: Option<String>,
    pub batch_id: Option<Uuid>,
    /// Base units.
    pub quantity: Decimal,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FulfillRequestRequest {
    pub from_location_id: Uuid,
    pub to_location_id: Uuid,
    pub lines: Vec<FulfillLineRequest>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmRequestRequest {
    pub accept: bool,
}

#[derive(Debug, Deserialize)]
pub struct RequestListQuery {
    pub status: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PlanQuery {
    pub origin_location_id: Uuid,
}

/// Open a branch request for stock. Item quantities arrive in presentations
/// and are stored in base units.
#[utoipa::path(
    post,
    path = "/api/v1/movement-requests",
    request_body = CreateRequestRequest,
    responses(
        (status = 201, description = "Request opened"),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse),
    ),
    tag = "movement-requests"
)]
pub async fn create_request(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(payload): Json<CreateRequestRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let txn = state.db.begin().await?;
    let (request, items) = movement_requests::create_request(
        &txn,
        ctx.tenant_id,
        ctx.user_id,
        NewMovementRequest {
            requested_city: payload.requested_city,
            note: payload.note,
            items: payload
                .items
                .into_iter()
                .map(|i| NewRequestItem {
                    product_id: i.product_id,
                    presentation: i.presentation,
                    units_per_presentation: i.units_per_presentation,
                    quantity: i.quantity,
                })
                .collect(),
        },
    )
    .await?;
    txn.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "request": request, "items": items })),
    ))
}

pub async fn list_requests(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(query): Query<RequestListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let (requests, total) = movement_requests::list_requests(
        &*state.db,
        ctx.tenant_id,
        query.status.as_deref(),
        page,
        limit,
    )
    .await?;
    Ok(Json(json!({
        "requests": requests,
        "total": total,
        "page": page,
        "limit": limit,
    })))
}

pub async fn get_request(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let db = &*state.db;
    let request = movement_requests::get_request(db, ctx.tenant_id, id).await?;
    let items = movement_requests::request_items(db, ctx.tenant_id, id).await?;
    Ok(Json(json!({ "request": request, "items": items })))
}

/// Read-only fulfillment suggestion from one origin location.
pub async fn plan_request(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Query(query): Query<PlanQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let plan =
        movement_requests::plan_request(&*state.db, ctx.tenant_id, id, query.origin_location_id)
            .await?;
    let items: Vec<serde_json::Value> = plan
        .into_iter()
        .map(|item| {
            json!({
                "item_id": item.item_id,
                "product_id": item.product_id,
                "remaining_quantity": item.remaining_quantity,
                "suggestions": item
                    .suggestions
                    .into_iter()
                    .map(|s| json!({
                        "balance_id": s.balance_id,
                        "batch_id": s.batch_id,
                        "batch_number": s.batch_number,
                        "expires_at": s.expires_at,
                        "quantity": s.quantity,
                    }))
                    .collect::<Vec<_>>(),
            })
        })
        .collect();
    Ok(Json(json!({ "items": items })))
}

/// Ship against the request, possibly partially. Remaining quantities are
/// decremented under a conditional update; a racing fulfillment surfaces as
/// a 409 and rolls the whole call back.
#[utoipa::path(
    post,
    path = "/api/v1/movement-requests/{id}/fulfill",
    request_body = FulfillRequestRequest,
    responses(
        (status = 200, description = "Fulfillment posted"),
        (status = 400, description = "Line exceeds remaining quantity", body = crate::errors::ErrorResponse),
        (status = 409, description = "Concurrent fulfillment, stock or expiry conflict", body = crate::errors::ErrorResponse),
    ),
    tag = "movement-requests"
)]
pub async fn fulfill_request(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<FulfillRequestRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let txn = state.db.begin().await?;
    let outcome = match movement_requests::fulfill_request(
        &txn,
        ctx.tenant_id,
        ctx.user_id,
        id,
        payload.from_location_id,
        payload.to_location_id,
        payload
            .lines
            .into_iter()
            .map(|l| FulfillLine {
                item_id: l.item_id,
                product_id: l.product_id,
                presentation: l.presentation,
                batch_id: l.batch_id,
                quantity: l.quantity,
            })
            .collect(),
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

    if outcome.fulfilled {
        state
            .event_sender
            .send_best_effort(Event::RequestFulfilled {
                request_id: id,
                tenant_id: ctx.tenant_id,
            })
            .await;
    }

    Ok(Json(json!({
        "request": outcome.request,
        "movements": outcome.movements,
        "fulfilled": outcome.fulfilled,
    })))
}

pub async fn send_request(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let txn = state.db.begin().await?;
    let request = movement_requests::mark_sent(&txn, ctx.tenant_id, id).await?;
    txn.commit().await?;
    Ok(Json(json!({ "request": request })))
}

pub async fn confirm_request(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<ConfirmRequestRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let txn = state.db.begin().await?;
    let request =
        movement_requests::confirm_request(&txn, ctx.tenant_id, ctx.user_id, id, payload.accept)
            .await?;
    txn.commit().await?;
    Ok(Json(json!({ "request": request })))
}

pub async fn cancel_request(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let txn = state.db.begin().await?;
    let request = movement_requests::cancel_request(&txn, ctx.tenant_id, id).await?;
    txn.commit().await?;
    Ok(Json(json!({ "request": request })))
}
