//! Branch-to-branch stock requests: OPEN -> (partial fulfillments) ->
//! FULFILLED -> branch acknowledgment. Each item tracks a remaining
//! quantity in base units, decremented with a conditional update so two
//! racing fulfillments cannot over-ship.

use std::collections::{HashMap, HashSet};

use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::{
    batch::{self, Entity as BatchEntity},
    inventory_balance::{self, Entity as InventoryBalanceEntity},
    location::{self, Entity as LocationEntity},
    stock_movement::{self, Entity as StockMovementEntity, MovementType},
    stock_movement_request::{
        self, ConfirmationStatus, Entity as RequestEntity, RequestStatus,
    },
    stock_movement_request_item::{self, Entity as RequestItemEntity},
    warehouse::{self, Entity as WarehouseEntity},
};
use crate::errors::ServiceError;
use crate::services::{sequences, stock_movements};

/// Decimal dust below this counts as fully fulfilled.
const REMAINING_EPSILON: Decimal = dec!(0.000000001);

#[derive(Debug, Clone)]
pub struct NewRequestItem {
    pub product_id: Uuid,
    pub presentation: Option<String>,
    /// Base units per presentation; 1 when the item is requested in base units.
    pub units_per_presentation: Decimal,
    /// Quantity in presentations; converted to base units at creation.
    pub quantity: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewMovementRequest {
    pub requested_city: String,
    pub note: Option<String>,
    pub items: Vec<NewRequestItem>,
}

#[derive(Debug, Clone)]
pub struct FulfillLine {
    /// Target item, either directly or by product + presentation.
    pub item_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub presentation: Option<String>,
    pub batch_id: Option<Uuid>,
    /// Base units to ship.
    pub quantity: Decimal,
}

#[derive(Debug)]
pub struct FulfillOutcome {
    pub request: stock_movement_request::Model,
    pub movements: Vec<stock_movement::Model>,
    pub fulfilled: bool,
}

/// One opportunistic decrement applied by an ordinary transfer.
#[derive(Debug, Clone)]
pub struct AutoApplied {
    pub request_id: Uuid,
    pub item_id: Uuid,
    pub quantity: Decimal,
}

#[derive(Debug, Clone)]
pub struct PlanSuggestion {
    pub balance_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub batch_number: Option<String>,
    pub expires_at: Option<NaiveDate>,
    pub quantity: Decimal,
}

#[derive(Debug, Clone)]
pub struct PlanItem {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub remaining_quantity: Decimal,
    pub suggestions: Vec<PlanSuggestion>,
}

pub fn document_number(request: &stock_movement_request::Model) -> String {
    format!("MR-{}-{}", request.number_year, request.number)
}

pub async fn create_request<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    user_id: Uuid,
    input: NewMovementRequest,
) -> Result<
    (
        stock_movement_request::Model,
        Vec<stock_movement_request_item::Model>,
    ),
    ServiceError,
> {
    if input.requested_city.trim().is_empty() {
        return Err(ServiceError::InvalidRequest(
            "Requested city must not be empty".to_string(),
        ));
    }
    if input.items.is_empty() {
        return Err(ServiceError::InvalidRequest(
            "Request requires at least one item".to_string(),
        ));
    }
    for item in &input.items {
        if item.quantity <= Decimal::ZERO || item.units_per_presentation <= Decimal::ZERO {
            return Err(ServiceError::InvalidRequest(
                "Item quantities must be positive".to_string(),
            ));
        }
    }

    let now = Utc::now();
    let year = now.year();
    let number =
        sequences::next_sequence(conn, tenant_id, year, sequences::MOVEMENT_REQUEST_KEY).await?;

    let request = stock_movement_request::ActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: Set(tenant_id),
        number: Set(number),
        number_year: Set(year),
        requested_city: Set(input.requested_city),
        status: Set(RequestStatus::Open.as_str().to_string()),
        confirmation_status: Set(ConfirmationStatus::Pending.as_str().to_string()),
        note: Set(input.note),
        created_by: Set(user_id),
        fulfilled_at: Set(None),
        fulfilled_by: Set(None),
        confirmed_at: Set(None),
        confirmed_by: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };
    let request = request.insert(conn).await?;

    let mut items = Vec::with_capacity(input.items.len());
    for item in input.items {
        let base_units = item.quantity * item.units_per_presentation;
        let row = stock_movement_request_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            request_id: Set(request.id),
            product_id: Set(item.product_id),
            presentation: Set(item.presentation),
            units_per_presentation: Set(item.units_per_presentation),
            requested_quantity: Set(base_units),
            remaining_quantity: Set(base_units),
            created_at: Set(now),
        };
        items.push(row.insert(conn).await?);
    }

    info!(request_id = %request.id, number = request.number, "movement request created");
    Ok((request, items))
}

pub async fn get_request<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    request_id: Uuid,
) -> Result<stock_movement_request::Model, ServiceError> {
    RequestEntity::find_by_id(request_id)
        .filter(stock_movement_request::Column::TenantId.eq(tenant_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Movement request {} not found", request_id)))
}

pub async fn request_items<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    request_id: Uuid,
) -> Result<Vec<stock_movement_request_item::Model>, ServiceError> {
    Ok(RequestItemEntity::find()
        .filter(stock_movement_request_item::Column::TenantId.eq(tenant_id))
        .filter(stock_movement_request_item::Column::RequestId.eq(request_id))
        .order_by_asc(stock_movement_request_item::Column::CreatedAt)
        .all(conn)
        .await?)
}

pub async fn list_requests<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    status: Option<&str>,
    page: u64,
    limit: u64,
) -> Result<(Vec<stock_movement_request::Model>, u64), ServiceError> {
    let mut query = RequestEntity::find()
        .filter(stock_movement_request::Column::TenantId.eq(tenant_id))
        .order_by_desc(stock_movement_request::Column::CreatedAt);
    if let Some(status) = status {
        query = query.filter(stock_movement_request::Column::Status.eq(status));
    }
    let paginator = query.paginate(conn, limit.max(1));
    let total = paginator.num_items().await?;
    let requests = paginator.fetch_page(page.saturating_sub(1)).await?;
    Ok((requests, total))
}

async fn lock_request<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    request_id: Uuid,
) -> Result<stock_movement_request::Model, ServiceError> {
    RequestEntity::find_by_id(request_id)
        .filter(stock_movement_request::Column::TenantId.eq(tenant_id))
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Movement request {} not found", request_id)))
}

/// Decrements an item's remaining quantity, failing when a concurrent
/// fulfillment raced ahead. The predicate carries the guard: the update only
/// lands while `remaining_quantity >= quantity`.
async fn decrement_remaining<C: ConnectionTrait>(
    conn: &C,
    item_id: Uuid,
    quantity: Decimal,
) -> Result<(), ServiceError> {
    let result = RequestItemEntity::update_many()
        .col_expr(
            stock_movement_request_item::Column::RemainingQuantity,
            Expr::col(stock_movement_request_item::Column::RemainingQuantity).sub(quantity),
        )
        .filter(stock_movement_request_item::Column::Id.eq(item_id))
        .filter(stock_movement_request_item::Column::RemainingQuantity.gte(quantity))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        return Err(ServiceError::VersionConflict(format!(
            "Request item {} was fulfilled concurrently",
            item_id
        )));
    }
    Ok(())
}

async fn total_remaining<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    request_id: Uuid,
) -> Result<Decimal, ServiceError> {
    let items = request_items(conn, tenant_id, request_id).await?;
    Ok(items.iter().map(|i| i.remaining_quantity).sum())
}

async fn mark_fulfilled<C: ConnectionTrait>(
    conn: &C,
    request: stock_movement_request::Model,
    user_id: Uuid,
) -> Result<stock_movement_request::Model, ServiceError> {
    let now = Utc::now();
    let mut active: stock_movement_request::ActiveModel = request.into();
    active.status = Set(RequestStatus::Fulfilled.as_str().to_string());
    active.fulfilled_at = Set(Some(now));
    active.fulfilled_by = Set(Some(user_id));
    active.updated_at = Set(now);
    Ok(active.update(conn).await?)
}

/// Ships against a request, possibly partially. Every line resolves to an
/// item, decrements its remaining under the conditional guard and posts a
/// TRANSFER tagged MOVEMENT_REQUEST (which opts out of auto-apply). The
/// request flips to FULFILLED once the items' remaining drains to ~zero.
#[instrument(skip(conn, lines), fields(request_id = %request_id))]
pub async fn fulfill_request<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    user_id: Uuid,
    request_id: Uuid,
    from_location_id: Uuid,
    to_location_id: Uuid,
    lines: Vec<FulfillLine>,
) -> Result<FulfillOutcome, ServiceError> {
    if lines.is_empty() {
        return Err(ServiceError::InvalidRequest(
            "Fulfillment requires at least one line".to_string(),
        ));
    }

    let request = lock_request(conn, tenant_id, request_id).await?;
    match RequestStatus::from_str(&request.status) {
        Some(RequestStatus::Open) | Some(RequestStatus::Sent) => {}
        _ => {
            return Err(ServiceError::StateConflict(format!(
                "Movement request {} is {} and cannot be fulfilled",
                request.id, request.status
            )))
        }
    }

    let items = request_items(conn, tenant_id, request_id).await?;
    // Track remaining locally so several lines against one item validate
    // against what this call has already consumed.
    let mut local_remaining: HashMap<Uuid, Decimal> = items
        .iter()
        .map(|i| (i.id, i.remaining_quantity))
        .collect();

    let mut movements = Vec::with_capacity(lines.len());
    for line in lines {
        if line.quantity <= Decimal::ZERO {
            return Err(ServiceError::InvalidRequest(
                "Line quantity must be positive".to_string(),
            ));
        }
        let item = items
            .iter()
            .find(|i| match line.item_id {
                Some(id) => i.id == id,
                None => {
                    Some(i.product_id) == line.product_id && i.presentation == line.presentation
                }
            })
            .ok_or_else(|| {
                ServiceError::NotFound("No matching request item for line".to_string())
            })?;

        let remaining = local_remaining[&item.id];
        if line.quantity > remaining {
            return Err(ServiceError::InvalidRequest(format!(
                "Line quantity {} exceeds remaining {} for item {}",
                line.quantity, remaining, item.id
            )));
        }

        decrement_remaining(conn, item.id, line.quantity).await?;
        local_remaining.insert(item.id, remaining - line.quantity);

        let outcome = stock_movements::create_stock_movement(
            conn,
            stock_movements::NewStockMovement {
                tenant_id,
                user_id,
                movement_type: MovementType::Transfer,
                product_id: item.product_id,
                batch_id: line.batch_id,
                from_location_id: Some(from_location_id),
                to_location_id: Some(to_location_id),
                quantity: line.quantity,
                reference_type: Some(stock_movements::reference::MOVEMENT_REQUEST.to_string()),
                reference_id: Some(document_number(&request)),
                note: None,
            },
        )
        .await?;
        movements.push(outcome.movement);
    }

    let remaining_total = total_remaining(conn, tenant_id, request_id).await?;
    let fulfilled = remaining_total <= REMAINING_EPSILON;
    let request = if fulfilled {
        mark_fulfilled(conn, request, user_id).await?
    } else {
        request
    };

    info!(
        request_id = %request_id,
        movements = movements.len(),
        fulfilled,
        "movement request fulfillment posted"
    );
    Ok(FulfillOutcome {
        request,
        movements,
        fulfilled,
    })
}

/// Read-only fulfillment plan for one origin location. Candidates are ranked
/// opened-lot-first (batches something already shipped from), then soonest
/// expiry, then batch number, then balance id; a shared availability pool per
/// product keeps two items from double-claiming the same unit.
#[instrument(skip(conn), fields(request_id = %request_id))]
pub async fn plan_request<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    request_id: Uuid,
    origin_location_id: Uuid,
) -> Result<Vec<PlanItem>, ServiceError> {
    let _request = get_request(conn, tenant_id, request_id).await?;
    let items = request_items(conn, tenant_id, request_id).await?;
    let product_ids: HashSet<Uuid> = items.iter().map(|i| i.product_id).collect();
    if product_ids.is_empty() {
        return Ok(Vec::new());
    }

    let balances = InventoryBalanceEntity::find()
        .filter(inventory_balance::Column::TenantId.eq(tenant_id))
        .filter(inventory_balance::Column::LocationId.eq(origin_location_id))
        .filter(inventory_balance::Column::ProductId.is_in(product_ids.iter().copied()))
        .filter(inventory_balance::Column::Quantity.gt(Decimal::ZERO))
        .all(conn)
        .await?;

    let batch_ids: Vec<Uuid> = balances.iter().filter_map(|b| b.batch_id).collect();
    let batch_map: HashMap<Uuid, batch::Model> = if batch_ids.is_empty() {
        HashMap::new()
    } else {
        BatchEntity::find()
            .filter(batch::Column::TenantId.eq(tenant_id))
            .filter(batch::Column::Id.is_in(batch_ids.clone()))
            .all(conn)
            .await?
            .into_iter()
            .map(|b| (b.id, b))
            .collect()
    };

    // A lot counts as opened once anything has shipped out of it here.
    let opened: HashSet<Uuid> = if batch_ids.is_empty() {
        HashSet::new()
    } else {
        StockMovementEntity::find()
            .filter(stock_movement::Column::TenantId.eq(tenant_id))
            .filter(stock_movement::Column::FromLocationId.eq(origin_location_id))
            .filter(stock_movement::Column::BatchId.is_in(batch_ids))
            .all(conn)
            .await?
            .into_iter()
            .filter_map(|m| m.batch_id)
            .collect()
    };

    let today = Utc::now().date_naive();
    // Ranked candidates per product over the shared pool.
    let mut per_product: HashMap<Uuid, Vec<&inventory_balance::Model>> = HashMap::new();
    for balance in &balances {
        if let Some(batch_id) = balance.batch_id {
            match batch_map.get(&batch_id) {
                Some(b) if b.is_released() && !b.is_expired_at(today) => {}
                _ => continue,
            }
        }
        per_product.entry(balance.product_id).or_default().push(balance);
    }
    for candidates in per_product.values_mut() {
        candidates.sort_by_key(|b| {
            let (opened_rank, expires_at, batch_number) = match b.batch_id {
                Some(batch_id) => {
                    let batch = &batch_map[&batch_id];
                    (
                        if opened.contains(&batch_id) { 0u8 } else { 1u8 },
                        batch.expires_at.unwrap_or(NaiveDate::MAX),
                        batch.batch_number.clone(),
                    )
                }
                None => (1u8, NaiveDate::MAX, String::new()),
            };
            (opened_rank, expires_at, batch_number, b.id)
        });
    }

    let mut pool: HashMap<Uuid, Decimal> = balances
        .iter()
        .map(|b| (b.id, b.available()))
        .collect();

    let mut plan = Vec::with_capacity(items.len());
    for item in &items {
        let mut needed = item.remaining_quantity;
        let mut suggestions = Vec::new();
        if let Some(candidates) = per_product.get(&item.product_id) {
            for balance in candidates {
                if needed <= Decimal::ZERO {
                    break;
                }
                let available = pool.get(&balance.id).copied().unwrap_or(Decimal::ZERO);
                let take = available.min(needed);
                if take <= Decimal::ZERO {
                    continue;
                }
                let (batch_number, expires_at) = match balance.batch_id {
                    Some(batch_id) => {
                        let b = &batch_map[&batch_id];
                        (Some(b.batch_number.clone()), b.expires_at)
                    }
                    None => (None, None),
                };
                suggestions.push(PlanSuggestion {
                    balance_id: balance.id,
                    batch_id: balance.batch_id,
                    batch_number,
                    expires_at,
                    quantity: take,
                });
                pool.insert(balance.id, available - take);
                needed -= take;
            }
        }
        plan.push(PlanItem {
            item_id: item.id,
            product_id: item.product_id,
            remaining_quantity: item.remaining_quantity,
            suggestions,
        });
    }
    Ok(plan)
}

/// Called by the movement engine after an ordinary TRANSFER commits its
/// balance changes: arriving stock drains OPEN requests of the destination
/// city FIFO by request creation, then item creation. Explicitly tagged
/// request fulfillments never reach this path.
pub async fn auto_apply_transfer<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    user_id: Uuid,
    product_id: Uuid,
    to_location_id: Uuid,
    quantity: Decimal,
) -> Result<Vec<AutoApplied>, ServiceError> {
    let Some(location) = LocationEntity::find_by_id(to_location_id)
        .filter(location::Column::TenantId.eq(tenant_id))
        .one(conn)
        .await?
    else {
        return Ok(Vec::new());
    };
    let Some(wh) = WarehouseEntity::find_by_id(location.warehouse_id)
        .filter(warehouse::Column::TenantId.eq(tenant_id))
        .one(conn)
        .await?
    else {
        return Ok(Vec::new());
    };

    let open_requests = RequestEntity::find()
        .filter(stock_movement_request::Column::TenantId.eq(tenant_id))
        .filter(stock_movement_request::Column::Status.eq(RequestStatus::Open.as_str()))
        .order_by_asc(stock_movement_request::Column::CreatedAt)
        .all(conn)
        .await?;

    let mut applied = Vec::new();
    let mut arriving = quantity;
    for request in open_requests {
        if arriving <= Decimal::ZERO {
            break;
        }
        if !request.requested_city.eq_ignore_ascii_case(&wh.city) {
            continue;
        }
        let items = RequestItemEntity::find()
            .filter(stock_movement_request_item::Column::TenantId.eq(tenant_id))
            .filter(stock_movement_request_item::Column::RequestId.eq(request.id))
            .filter(stock_movement_request_item::Column::ProductId.eq(product_id))
            .filter(stock_movement_request_item::Column::RemainingQuantity.gt(Decimal::ZERO))
            .order_by_asc(stock_movement_request_item::Column::CreatedAt)
            .all(conn)
            .await?;

        let mut touched = false;
        for item in items {
            if arriving <= Decimal::ZERO {
                break;
            }
            let take = item.remaining_quantity.min(arriving);
            // A racing fulfillment may have shrunk remaining; skip quietly,
            // the next open item still gets its share.
            if decrement_remaining(conn, item.id, take).await.is_err() {
                continue;
            }
            arriving -= take;
            touched = true;
            applied.push(AutoApplied {
                request_id: request.id,
                item_id: item.id,
                quantity: take,
            });
        }

        if touched {
            let remaining_total = total_remaining(conn, tenant_id, request.id).await?;
            if remaining_total <= REMAINING_EPSILON {
                let request_id = request.id;
                mark_fulfilled(conn, request, user_id).await?;
                info!(request_id = %request_id, "movement request auto-fulfilled by transfer");
            }
        }
    }
    Ok(applied)
}

/// OPEN -> SENT: warehouse acknowledges it has dispatched the request.
#[instrument(skip(conn))]
pub async fn mark_sent<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    request_id: Uuid,
) -> Result<stock_movement_request::Model, ServiceError> {
    let request = lock_request(conn, tenant_id, request_id).await?;
    if request.status != RequestStatus::Open.as_str() {
        return Err(ServiceError::StateConflict(format!(
            "Movement request {} is {} and cannot be marked sent",
            request.id, request.status
        )));
    }
    let mut active: stock_movement_request::ActiveModel = request.into();
    active.status = Set(RequestStatus::Sent.as_str().to_string());
    active.updated_at = Set(Utc::now());
    Ok(active.update(conn).await?)
}

/// Branch-side acknowledgment after FULFILLED, independent of stock.
#[instrument(skip(conn))]
pub async fn confirm_request<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    user_id: Uuid,
    request_id: Uuid,
    accept: bool,
) -> Result<stock_movement_request::Model, ServiceError> {
    let request = lock_request(conn, tenant_id, request_id).await?;
    if request.status != RequestStatus::Fulfilled.as_str()
        || request.confirmation_status != ConfirmationStatus::Pending.as_str()
    {
        return Err(ServiceError::StateConflict(format!(
            "Movement request {} ({}, confirmation {}) cannot be confirmed",
            request.id, request.status, request.confirmation_status
        )));
    }
    let now = Utc::now();
    let status = if accept {
        ConfirmationStatus::Accepted
    } else {
        ConfirmationStatus::Rejected
    };
    let mut active: stock_movement_request::ActiveModel = request.into();
    active.confirmation_status = Set(status.as_str().to_string());
    active.confirmed_at = Set(Some(now));
    active.confirmed_by = Set(Some(user_id));
    active.updated_at = Set(now);
    Ok(active.update(conn).await?)
}

/// Cancellation is only possible while nothing has shipped: every item must
/// still have its full requested quantity remaining.
#[instrument(skip(conn))]
pub async fn cancel_request<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    request_id: Uuid,
) -> Result<stock_movement_request::Model, ServiceError> {
    let request = lock_request(conn, tenant_id, request_id).await?;
    if request.status != RequestStatus::Open.as_str() {
        return Err(ServiceError::StateConflict(format!(
            "Movement request {} is {} and cannot be cancelled",
            request.id, request.status
        )));
    }
    let items = request_items(conn, tenant_id, request_id).await?;
    if items
        .iter()
        .any(|i| i.remaining_quantity != i.requested_quantity)
    {
        return Err(ServiceError::StateConflict(format!(
            "Movement request {} is partially fulfilled and cannot be cancelled",
            request_id
        )));
    }
    let mut active: stock_movement_request::ActiveModel = request.into();
    active.status = Set(RequestStatus::Cancelled.as_str().to_string());
    active.updated_at = Set(Utc::now());
    Ok(active.update(conn).await?)
}
