use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{
    inventory_balance::{self, Entity as InventoryBalanceEntity},
    stock_movement::{self, Entity as StockMovementEntity, MovementType},
};
use crate::errors::ServiceError;
use crate::events::Event;
use crate::handlers::{audit_blocked_expiry, TenantContext};
use crate::services::stock_movements::{self, NewStockMovement};
use crate::AppState;

pub fn stock_router() -> Router<AppState> {
    Router::new()
        .route("/movements", get(list_movements).post(post_movement))
        .route("/balances", get(list_balances))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateMovementRequest {
    /// IN, OUT, TRANSFER or ADJUSTMENT
    pub movement_type: String,
    pub product_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub from_location_id: Option<Uuid>,
    pub to_location_id: Option<Uuid>,
    pub quantity: Decimal,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema, utoipa::IntoParams)]
pub struct MovementFilters {
    pub product_id: Option<Uuid>,
    pub batch_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub movement_type: Option<String>,
    pub reference_type: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize, ToSchema, utoipa::IntoParams)]
pub struct BalanceFilters {
    pub product_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub batch_id: Option<Uuid>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

/// Post a stock movement. The whole operation is one transaction: balance
/// mutation, movement record and sequence allocation commit together or not
/// at all.
#[utoipa::path(
    post,
    path = "/api/v1/stock/movements",
    request_body = CreateMovementRequest,
    responses(
        (status = 201, description = "Movement posted"),
        (status = 400, description = "Invalid movement shape", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product, batch or location missing", body = crate::errors::ErrorResponse),
        (status = 409, description = "Insufficient stock or expired batch", body = crate::errors::ErrorResponse),
    ),
    tag = "stock"
)]
pub async fn post_movement(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(payload): Json<CreateMovementRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let movement_type = MovementType::from_str(&payload.movement_type).ok_or_else(|| {
        ServiceError::InvalidRequest(format!(
            "Unknown movement type {}",
            payload.movement_type
        ))
    })?;

    let txn = state.db.begin().await?;
    let outcome = match stock_movements::create_stock_movement(
        &txn,
        NewStockMovement {
            tenant_id: ctx.tenant_id,
            user_id: ctx.user_id,
            movement_type,
            product_id: payload.product_id,
            batch_id: payload.batch_id,
            from_location_id: payload.from_location_id,
            to_location_id: payload.to_location_id,
            quantity: payload.quantity,
            reference_type: payload.reference_type,
            reference_id: payload.reference_id,
            note: payload.note,
        },
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

    let movement = &outcome.movement;
    state
        .event_sender
        .send_best_effort(Event::MovementPosted {
            movement_id: movement.id,
            tenant_id: ctx.tenant_id,
            movement_type: movement.movement_type.clone(),
            product_id: movement.product_id,
            batch_id: movement.batch_id,
            from_location_id: movement.from_location_id,
            to_location_id: movement.to_location_id,
            quantity: movement.quantity,
            number: movement.number,
        })
        .await;
    for balance in [&outcome.from_balance, &outcome.to_balance]
        .into_iter()
        .flatten()
    {
        state
            .event_sender
            .send_best_effort(Event::BalanceChanged {
                balance_id: balance.id,
                tenant_id: ctx.tenant_id,
                location_id: balance.location_id,
                product_id: balance.product_id,
                quantity: balance.quantity,
                reserved_quantity: balance.reserved_quantity,
                version: balance.version,
            })
            .await;
    }
    for auto in &outcome.auto_applied {
        state
            .event_sender
            .send_best_effort(Event::RequestAutoApplied {
                request_id: auto.request_id,
                tenant_id: ctx.tenant_id,
                product_id: movement.product_id,
                quantity: auto.quantity,
            })
            .await;
    }

    let body = json!({
        "movement": outcome.movement,
        "from_balance": outcome.from_balance,
        "to_balance": outcome.to_balance,
    });
    Ok((StatusCode::CREATED, Json(body)))
}

#[utoipa::path(
    get,
    path = "/api/v1/stock/movements",
    params(MovementFilters),
    responses(
        (status = 200, description = "Movement ledger page"),
    ),
    tag = "stock"
)]
pub async fn list_movements(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(filters): Query<MovementFilters>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = filters.page.unwrap_or(1).max(1);
    let limit = filters.limit.unwrap_or(50).clamp(1, 500);

    let mut query = StockMovementEntity::find()
        .filter(stock_movement::Column::TenantId.eq(ctx.tenant_id))
        .order_by_desc(stock_movement::Column::CreatedAt);
    if let Some(product_id) = filters.product_id {
        query = query.filter(stock_movement::Column::ProductId.eq(product_id));
    }
    if let Some(batch_id) = filters.batch_id {
        query = query.filter(stock_movement::Column::BatchId.eq(batch_id));
    }
    if let Some(location_id) = filters.location_id {
        query = query.filter(
            stock_movement::Column::FromLocationId
                .eq(location_id)
                .or(stock_movement::Column::ToLocationId.eq(location_id)),
        );
    }
    if let Some(movement_type) = &filters.movement_type {
        query = query.filter(stock_movement::Column::MovementType.eq(movement_type.as_str()));
    }
    if let Some(reference_type) = &filters.reference_type {
        query = query.filter(stock_movement::Column::ReferenceType.eq(reference_type.as_str()));
    }

    let paginator = query.paginate(&*state.db, limit);
    let total = paginator.num_items().await?;
    let movements = paginator.fetch_page(page - 1).await?;

    Ok(Json(json!({
        "movements": movements,
        "total": total,
        "page": page,
        "limit": limit,
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/stock/balances",
    params(BalanceFilters),
    responses(
        (status = 200, description = "Balance page"),
    ),
    tag = "stock"
)]
pub async fn list_balances(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(filters): Query<BalanceFilters>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = filters.page.unwrap_or(1).max(1);
    let limit = filters.limit.unwrap_or(50).clamp(1, 500);

    let mut query = InventoryBalanceEntity::find()
        .filter(inventory_balance::Column::TenantId.eq(ctx.tenant_id))
        .order_by_desc(inventory_balance::Column::UpdatedAt);
    if let Some(product_id) = filters.product_id {
        query = query.filter(inventory_balance::Column::ProductId.eq(product_id));
    }
    if let Some(location_id) = filters.location_id {
        query = query.filter(inventory_balance::Column::LocationId.eq(location_id));
    }
    if let Some(batch_id) = filters.batch_id {
        query = query.filter(inventory_balance::Column::BatchId.eq(batch_id));
    }

    let paginator = query.paginate(&*state.db, limit);
    let total = paginator.num_items().await?;
    let balances: Vec<BalanceView> = paginator
        .fetch_page(page - 1)
        .await?
        .into_iter()
        .map(BalanceView::from)
        .collect();

    Ok(Json(json!({
        "balances": balances,
        "total": total,
        "page": page,
        "limit": limit,
    })))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BalanceView {
    pub id: Uuid,
    pub location_id: Uuid,
    pub product_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub quantity: Decimal,
    pub reserved_quantity: Decimal,
    pub available: Decimal,
    pub version: i32,
}

impl From<inventory_balance::Model> for BalanceView {
    fn from(model: inventory_balance::Model) -> Self {
        let available = model.available();
        Self {
            id: model.id,
            location_id: model.location_id,
            product_id: model.product_id,
            batch_id: model.batch_id,
            quantity: model.quantity,
            reserved_quantity: model.reserved_quantity,
            available,
            version: model.version,
        }
    }
}
