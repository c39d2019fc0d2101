use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, TransactionTrait};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::batch::{self, Entity as BatchEntity};
use crate::errors::ServiceError;
use crate::events::Event;
use crate::handlers::TenantContext;
use crate::services::batches::{self, NewBatch};
use crate::AppState;

pub fn batches_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_batches).post(create_batch))
        .route("/:id/release", post(release_batch))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateBatchRequest {
    pub product_id: Uuid,
    pub batch_number: String,
    pub expires_at: Option<NaiveDate>,
    /// Skip quarantine, e.g. for pre-released supplier stock.
    #[serde(default)]
    pub released: bool,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchListQuery {
    pub product_id: Option<Uuid>,
    pub status: Option<String>,
}

pub async fn create_batch(
    State(state): State<AppState>,
    ctx: TenantContext,
    Json(payload): Json<CreateBatchRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let txn = state.db.begin().await?;
    let batch = batches::create_batch(
        &txn,
        NewBatch {
            tenant_id: ctx.tenant_id,
            product_id: payload.product_id,
            batch_number: payload.batch_number,
            expires_at: payload.expires_at,
            released: payload.released,
            source_type: payload.source_type,
            source_id: payload.source_id,
        },
    )
    .await?;
    txn.commit().await?;
    Ok((StatusCode::CREATED, Json(json!({ "batch": batch }))))
}

pub async fn list_batches(
    State(state): State<AppState>,
    ctx: TenantContext,
    Query(query): Query<BatchListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let mut find = BatchEntity::find()
        .filter(batch::Column::TenantId.eq(ctx.tenant_id))
        .order_by_asc(batch::Column::ExpiresAt);
    if let Some(product_id) = query.product_id {
        find = find.filter(batch::Column::ProductId.eq(product_id));
    }
    if let Some(status) = &query.status {
        find = find.filter(batch::Column::Status.eq(status.as_str()));
    }
    let batches = find.all(&*state.db).await?;
    Ok(Json(json!({ "batches": batches })))
}

/// QC release: QUARANTINE -> RELEASED, one-way.
pub async fn release_batch(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let txn = state.db.begin().await?;
    let batch = batches::release_batch(&txn, ctx.tenant_id, ctx.user_id, id).await?;
    txn.commit().await?;

    state
        .event_sender
        .send_best_effort(Event::BatchReleased {
            batch_id: id,
            tenant_id: ctx.tenant_id,
        })
        .await;

    Ok(Json(json!({ "batch": batch })))
}
