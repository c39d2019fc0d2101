//! Sales order state machine: DRAFT -> CONFIRMED -> FULFILLED, with
//! CANCELLED terminal from the first two. Stock is reserved at confirmation,
//! not at creation; delivery consumes reservations or falls back to direct
//! FEFO picking.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect,
};
use std::collections::HashMap;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::{
    batch::{self, Entity as BatchEntity},
    inventory_balance::{self, Entity as InventoryBalanceEntity},
    sales_order::{self, Entity as SalesOrderEntity, OrderStatus},
    sales_order_line::{self, Entity as SalesOrderLineEntity},
    sales_order_reservation::{self, Entity as ReservationEntity},
    stock_movement::{self, MovementType},
};
use crate::errors::ServiceError;
use crate::services::{
    batches, reservations,
    reservations::ReservationLine,
    sequences,
    stock_movements::{self, create_stock_movement, lock_balance, NewStockMovement},
};

#[derive(Debug, Clone)]
pub struct NewOrderLine {
    pub product_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewSalesOrder {
    pub customer_name: String,
    pub payment_mode: String,
    pub preferred_city: Option<String>,
    pub lines: Vec<NewOrderLine>,
}

#[derive(Debug)]
pub struct ConfirmOutcome {
    pub order: sales_order::Model,
    pub takes: Vec<reservations::ReservationTake>,
}

#[derive(Debug)]
pub struct FulfillOutcome {
    pub order: sales_order::Model,
    pub movements: Vec<stock_movement::Model>,
}

#[derive(Debug)]
pub struct DeliverOutcome {
    pub order: sales_order::Model,
    pub movements: Vec<stock_movement::Model>,
    pub payment_due_at: DateTime<Utc>,
}

fn is_valid_payment_mode(mode: &str) -> bool {
    mode == "CASH"
        || mode
            .strip_prefix("CREDIT_")
            .map(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false)
}

/// Human-readable document number, e.g. "SO-2026-17".
pub fn document_number(order: &sales_order::Model) -> String {
    format!("SO-{}-{}", order.number_year, order.number)
}

pub async fn create_order<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    user_id: Uuid,
    input: NewSalesOrder,
) -> Result<(sales_order::Model, Vec<sales_order_line::Model>), ServiceError> {
    if input.lines.is_empty() {
        return Err(ServiceError::InvalidRequest(
            "Order requires at least one line".to_string(),
        ));
    }
    if !is_valid_payment_mode(&input.payment_mode) {
        return Err(ServiceError::InvalidRequest(format!(
            "Unknown payment mode {}",
            input.payment_mode
        )));
    }
    for line in &input.lines {
        if line.quantity <= Decimal::ZERO {
            return Err(ServiceError::InvalidRequest(
                "Line quantity must be positive".to_string(),
            ));
        }
    }

    let now = Utc::now();
    let year = now.year();
    let number =
        sequences::next_sequence(conn, tenant_id, year, sequences::SALES_ORDER_KEY).await?;

    let order = sales_order::ActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: Set(tenant_id),
        number: Set(number),
        number_year: Set(year),
        customer_name: Set(input.customer_name),
        status: Set(OrderStatus::Draft.as_str().to_string()),
        version: Set(1),
        payment_mode: Set(input.payment_mode),
        preferred_city: Set(input.preferred_city),
        delivered_at: Set(None),
        paid_at: Set(None),
        created_by: Set(user_id),
        created_at: Set(now),
        updated_at: Set(now),
    };
    let order = order.insert(conn).await?;

    let mut lines = Vec::with_capacity(input.lines.len());
    for line in input.lines {
        let row = sales_order_line::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            batch_id: Set(line.batch_id),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
            created_at: Set(now),
        };
        lines.push(row.insert(conn).await?);
    }

    info!(order_id = %order.id, number = order.number, "sales order created");
    Ok((order, lines))
}

pub async fn get_order<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    order_id: Uuid,
) -> Result<sales_order::Model, ServiceError> {
    SalesOrderEntity::find_by_id(order_id)
        .filter(sales_order::Column::TenantId.eq(tenant_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Sales order {} not found", order_id)))
}

pub async fn order_lines<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    order_id: Uuid,
) -> Result<Vec<sales_order_line::Model>, ServiceError> {
    Ok(SalesOrderLineEntity::find()
        .filter(sales_order_line::Column::TenantId.eq(tenant_id))
        .filter(sales_order_line::Column::OrderId.eq(order_id))
        .order_by_asc(sales_order_line::Column::CreatedAt)
        .all(conn)
        .await?)
}

pub async fn list_orders<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    status: Option<&str>,
    page: u64,
    limit: u64,
) -> Result<(Vec<sales_order::Model>, u64), ServiceError> {
    let mut query = SalesOrderEntity::find()
        .filter(sales_order::Column::TenantId.eq(tenant_id))
        .order_by_desc(sales_order::Column::CreatedAt);
    if let Some(status) = status {
        query = query.filter(sales_order::Column::Status.eq(status));
    }
    let paginator = query.paginate(conn, limit.max(1));
    let total = paginator.num_items().await?;
    let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
    Ok((orders, total))
}

/// Locks the order row and enforces the caller's optimistic version. Holding
/// the row lock serializes workflow transitions; the version check turns a
/// lost race into a 409 instead of a silent overwrite.
async fn load_order_checked<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    order_id: Uuid,
    expected_version: i32,
) -> Result<sales_order::Model, ServiceError> {
    let order = SalesOrderEntity::find_by_id(order_id)
        .filter(sales_order::Column::TenantId.eq(tenant_id))
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Sales order {} not found", order_id)))?;
    if order.version != expected_version {
        return Err(ServiceError::VersionConflict(format!(
            "Sales order {} is at version {}, expected {}",
            order_id, order.version, expected_version
        )));
    }
    Ok(order)
}

fn require_status(order: &sales_order::Model, required: OrderStatus) -> Result<(), ServiceError> {
    if order.status != required.as_str() {
        return Err(ServiceError::StateConflict(format!(
            "Sales order {} is {} but must be {}",
            order.id,
            order.status,
            required.as_str()
        )));
    }
    Ok(())
}

async fn transition<C: ConnectionTrait>(
    conn: &C,
    order: sales_order::Model,
    status: OrderStatus,
    delivered_at: Option<DateTime<Utc>>,
) -> Result<sales_order::Model, ServiceError> {
    let version = order.version + 1;
    let mut active: sales_order::ActiveModel = order.into();
    active.status = Set(status.as_str().to_string());
    active.version = Set(version);
    if let Some(at) = delivered_at {
        active.delivered_at = Set(Some(at));
    }
    active.updated_at = Set(Utc::now());
    Ok(active.update(conn).await?)
}

/// DRAFT -> CONFIRMED. This is the moment stock is reserved: the FEFO engine
/// soft-holds what it can for every line, tolerating shortfalls.
#[instrument(skip(conn))]
pub async fn confirm_order<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    order_id: Uuid,
    expected_version: i32,
) -> Result<ConfirmOutcome, ServiceError> {
    let order = load_order_checked(conn, tenant_id, order_id, expected_version).await?;
    require_status(&order, OrderStatus::Draft)?;

    let order = transition(conn, order, OrderStatus::Confirmed, None).await?;

    let lines = order_lines(conn, tenant_id, order_id).await?;
    let reservation_lines: Vec<ReservationLine> = lines
        .iter()
        .map(|l| ReservationLine {
            line_id: l.id,
            product_id: l.product_id,
            batch_id: l.batch_id,
            quantity: l.quantity,
        })
        .collect();
    let takes = reservations::reserve_for_order(
        conn,
        tenant_id,
        order_id,
        order.preferred_city.as_deref(),
        &reservation_lines,
    )
    .await?;

    info!(order_id = %order_id, takes = takes.len(), "sales order confirmed");
    Ok(ConfirmOutcome { order, takes })
}

/// FEFO pick at one location: the soonest-expiring eligible batch, then
/// dateless batches; `None` means the line ships from unbatched stock.
async fn pick_fefo_batch<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    product_id: Uuid,
    location_id: Uuid,
) -> Result<Option<Uuid>, ServiceError> {
    let balances = InventoryBalanceEntity::find()
        .filter(inventory_balance::Column::TenantId.eq(tenant_id))
        .filter(inventory_balance::Column::ProductId.eq(product_id))
        .filter(inventory_balance::Column::LocationId.eq(location_id))
        .filter(inventory_balance::Column::BatchId.is_not_null())
        .filter(inventory_balance::Column::Quantity.gt(Decimal::ZERO))
        .all(conn)
        .await?;
    if balances.is_empty() {
        return Ok(None);
    }

    let batch_ids: Vec<Uuid> = balances.iter().filter_map(|b| b.batch_id).collect();
    let loaded = BatchEntity::find()
        .filter(batch::Column::TenantId.eq(tenant_id))
        .filter(batch::Column::Id.is_in(batch_ids))
        .all(conn)
        .await?;

    let today = Utc::now().date_naive();
    let mut eligible: Vec<&batch::Model> = loaded
        .iter()
        .filter(|b| b.is_released() && !b.is_expired_at(today))
        .collect();
    eligible.sort_by_key(|b| (b.expires_at.unwrap_or(NaiveDate::MAX), b.batch_number.clone()));
    Ok(eligible.first().map(|b| b.id))
}

async fn post_out_movements<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    user_id: Uuid,
    order: &sales_order::Model,
    from_location_id: Uuid,
) -> Result<Vec<stock_movement::Model>, ServiceError> {
    let lines = order_lines(conn, tenant_id, order.id).await?;
    let mut movements = Vec::with_capacity(lines.len());
    for line in lines {
        let batch_id = match line.batch_id {
            Some(batch_id) => Some(batch_id),
            None => pick_fefo_batch(conn, tenant_id, line.product_id, from_location_id).await?,
        };
        let outcome = create_stock_movement(
            conn,
            NewStockMovement {
                tenant_id,
                user_id,
                movement_type: MovementType::Out,
                product_id: line.product_id,
                batch_id,
                from_location_id: Some(from_location_id),
                to_location_id: None,
                quantity: line.quantity,
                reference_type: Some(stock_movements::reference::SALES_ORDER.to_string()),
                reference_id: Some(document_number(order)),
                note: None,
            },
        )
        .await?;
        movements.push(outcome.movement);
    }
    Ok(movements)
}

/// Classic fulfillment: direct FEFO picking at one location, no reservation
/// required. Existing reservations are released first so their holds do not
/// linger on balances the picking is about to drain.
#[instrument(skip(conn))]
pub async fn fulfill_order<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    user_id: Uuid,
    order_id: Uuid,
    expected_version: i32,
    from_location_id: Uuid,
) -> Result<FulfillOutcome, ServiceError> {
    let order = load_order_checked(conn, tenant_id, order_id, expected_version).await?;
    require_status(&order, OrderStatus::Confirmed)?;

    reservations::release_reservations_for_order(conn, tenant_id, order_id).await?;
    let movements = post_out_movements(conn, tenant_id, user_id, &order, from_location_id).await?;
    let order = transition(conn, order, OrderStatus::Fulfilled, None).await?;

    info!(order_id = %order_id, movements = movements.len(), "sales order fulfilled");
    Ok(FulfillOutcome { order, movements })
}

/// Reservation-aware delivery. Consumes the order's active reservations:
/// each touched balance loses the reserved amount from both `quantity` and
/// `reserved_quantity`, a matching OUT movement is posted, and the
/// reservation rows are stamped released. Falls back to classic fulfillment
/// when no reservation is active (a from-location is then required).
#[instrument(skip(conn))]
pub async fn deliver_order<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    user_id: Uuid,
    order_id: Uuid,
    expected_version: i32,
    from_location_id: Option<Uuid>,
) -> Result<DeliverOutcome, ServiceError> {
    let order = load_order_checked(conn, tenant_id, order_id, expected_version).await?;
    require_status(&order, OrderStatus::Confirmed)?;

    let active = reservations::active_reservations_for_order(conn, tenant_id, order_id).await?;
    let now = Utc::now();

    let movements = if active.is_empty() {
        let from_location_id = from_location_id.ok_or_else(|| {
            ServiceError::InvalidRequest(
                "Delivery without reservations requires fromLocationId".to_string(),
            )
        })?;
        post_out_movements(conn, tenant_id, user_id, &order, from_location_id).await?
    } else {
        // Aggregate held quantity per balance; one OUT movement per balance.
        let mut per_balance: HashMap<Uuid, Decimal> = HashMap::new();
        for reservation in &active {
            *per_balance
                .entry(reservation.balance_id)
                .or_insert(Decimal::ZERO) += reservation.quantity;
        }
        let mut balance_ids: Vec<Uuid> = per_balance.keys().copied().collect();
        balance_ids.sort();

        let mut movements = Vec::with_capacity(balance_ids.len());
        for balance_id in balance_ids {
            let held = per_balance[&balance_id];
            let balance = lock_balance(conn, tenant_id, balance_id).await?;
            if let Some(batch_id) = balance.batch_id {
                let batch = batches::find_batch(conn, tenant_id, batch_id).await?;
                batches::assert_outbound(&batch)?;
            }

            let reserved = (balance.reserved_quantity - held).max(Decimal::ZERO);
            let version = balance.version + 1;
            let location_id = balance.location_id;
            let product_id = balance.product_id;
            let batch_id = balance.batch_id;
            let mut active_balance: inventory_balance::ActiveModel = balance.into();
            active_balance.reserved_quantity = Set(reserved);
            active_balance.version = Set(version);
            active_balance.updated_at = Set(now);
            active_balance.update(conn).await?;

            let outcome = create_stock_movement(
                conn,
                NewStockMovement {
                    tenant_id,
                    user_id,
                    movement_type: MovementType::Out,
                    product_id,
                    batch_id,
                    from_location_id: Some(location_id),
                    to_location_id: None,
                    quantity: held,
                    reference_type: Some(stock_movements::reference::SALES_ORDER.to_string()),
                    reference_id: Some(document_number(&order)),
                    note: None,
                },
            )
            .await?;
            movements.push(outcome.movement);
        }

        // Keep the rows as picking history; only stamp them consumed.
        for reservation in active {
            let mut released: sales_order_reservation::ActiveModel = reservation.into();
            released.released_at = Set(Some(now));
            released.update(conn).await?;
        }
        movements
    };

    let order = transition(conn, order, OrderStatus::Fulfilled, Some(now)).await?;
    let payment_due_at = now + Duration::days(order.credit_days());

    info!(
        order_id = %order_id,
        movements = movements.len(),
        payment_due_at = %payment_due_at,
        "sales order delivered"
    );
    Ok(DeliverOutcome {
        order,
        movements,
        payment_due_at,
    })
}

/// DRAFT/CONFIRMED -> CANCELLED; any active reservations are returned to
/// their balances.
#[instrument(skip(conn))]
pub async fn cancel_order<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    order_id: Uuid,
    expected_version: i32,
) -> Result<sales_order::Model, ServiceError> {
    let order = load_order_checked(conn, tenant_id, order_id, expected_version).await?;
    match OrderStatus::from_str(&order.status) {
        Some(OrderStatus::Draft) | Some(OrderStatus::Confirmed) => {}
        _ => {
            return Err(ServiceError::StateConflict(format!(
                "Sales order {} is {} and cannot be cancelled",
                order.id, order.status
            )))
        }
    }
    reservations::release_reservations_for_order(conn, tenant_id, order_id).await?;
    let order = transition(conn, order, OrderStatus::Cancelled, None).await?;
    info!(order_id = %order_id, "sales order cancelled");
    Ok(order)
}

/// Reservations of an order, including released history rows.
pub async fn order_reservations<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    order_id: Uuid,
) -> Result<Vec<sales_order_reservation::Model>, ServiceError> {
    Ok(ReservationEntity::find()
        .filter(sales_order_reservation::Column::TenantId.eq(tenant_id))
        .filter(sales_order_reservation::Column::OrderId.eq(order_id))
        .order_by_asc(sales_order_reservation::Column::CreatedAt)
        .all(conn)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_with_mode(mode: &str) -> sales_order::Model {
        let now = Utc::now();
        sales_order::Model {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            number: 1,
            number_year: now.year(),
            customer_name: "Farmacia Central".into(),
            status: OrderStatus::Confirmed.as_str().to_string(),
            version: 1,
            payment_mode: mode.to_string(),
            preferred_city: None,
            delivered_at: None,
            paid_at: None,
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }

    #[rstest::rstest]
    #[case("CASH", 0)]
    #[case("CREDIT_30", 30)]
    #[case("CREDIT_7", 7)]
    // Invalid encodings default to immediate payment.
    #[case("CREDIT_", 0)]
    #[case("CREDIT_abc", 0)]
    #[case("NET30", 0)]
    fn credit_days_parsing(#[case] mode: &str, #[case] expected: i64) {
        assert_eq!(order_with_mode(mode).credit_days(), expected);
    }

    #[test]
    fn payment_mode_validation() {
        assert!(is_valid_payment_mode("CASH"));
        assert!(is_valid_payment_mode("CREDIT_30"));
        assert!(!is_valid_payment_mode("CREDIT_"));
        assert!(!is_valid_payment_mode("CREDIT_3O"));
        assert!(!is_valid_payment_mode("cash"));
    }

    #[test]
    fn document_number_format() {
        let mut order = order_with_mode("CASH");
        order.number = 42;
        order.number_year = 2026;
        assert_eq!(document_number(&order), "SO-2026-42");
    }
}
