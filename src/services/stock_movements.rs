//! The stock movement engine: the single write path for on-hand quantity.
//!
//! Every workflow (sales fulfillment, movement requests, receipts,
//! adjustments) posts through [`create_stock_movement`], which locks the
//! affected balance rows, applies the delta, and appends an immutable
//! movement record under the caller's transaction.

use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QuerySelect,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::{
    inventory_balance::{self, Entity as InventoryBalanceEntity},
    location::{self, Entity as LocationEntity},
    product::{self, Entity as ProductEntity},
    stock_movement::{self, MovementType},
};
use crate::errors::ServiceError;
use crate::services::{batches, movement_requests, sequences};

/// Reference types correlating a movement to its originating document.
pub mod reference {
    pub const SALES_ORDER: &str = "SALES_ORDER";
    pub const MOVEMENT_REQUEST: &str = "MOVEMENT_REQUEST";
    pub const MOVEMENT_REQUEST_BULK: &str = "MOVEMENT_REQUEST_BULK";
    pub const RETURN: &str = "RETURN";
    pub const REPACK: &str = "REPACK";
}

#[derive(Debug, Clone)]
pub struct NewStockMovement {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub movement_type: MovementType,
    pub product_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub from_location_id: Option<Uuid>,
    pub to_location_id: Option<Uuid>,
    pub quantity: Decimal,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub note: Option<String>,
}

/// Post-mutation state returned for the caller's event/audit emission.
#[derive(Debug, Clone)]
pub struct StockMovementOutcome {
    pub movement: stock_movement::Model,
    pub from_balance: Option<inventory_balance::Model>,
    pub to_balance: Option<inventory_balance::Model>,
    /// Open movement requests opportunistically decremented by this transfer.
    pub auto_applied: Vec<movement_requests::AutoApplied>,
}

/// Which side subtracts and which side adds, per movement type. Ignored
/// locations are dropped rather than rejected.
fn resolve_sides(
    movement_type: MovementType,
    from: Option<Uuid>,
    to: Option<Uuid>,
) -> Result<(Option<Uuid>, Option<Uuid>), ServiceError> {
    match movement_type {
        MovementType::In => match to {
            Some(to) => Ok((None, Some(to))),
            None => Err(ServiceError::InvalidRequest(
                "IN movements require toLocationId".to_string(),
            )),
        },
        MovementType::Out => match from {
            Some(from) => Ok((Some(from), None)),
            None => Err(ServiceError::InvalidRequest(
                "OUT movements require fromLocationId".to_string(),
            )),
        },
        MovementType::Transfer => match (from, to) {
            (Some(from), Some(to)) if from != to => Ok((Some(from), Some(to))),
            (Some(_), Some(_)) => Err(ServiceError::InvalidRequest(
                "TRANSFER movements require distinct locations".to_string(),
            )),
            _ => Err(ServiceError::InvalidRequest(
                "TRANSFER movements require fromLocationId and toLocationId".to_string(),
            )),
        },
        MovementType::Adjustment => match (from, to) {
            (_, Some(to)) => Ok((None, Some(to))),
            (Some(from), None) => Ok((Some(from), None)),
            (None, None) => Err(ServiceError::InvalidRequest(
                "ADJUSTMENT movements require a location".to_string(),
            )),
        },
    }
}

async fn find_active_product<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    product_id: Uuid,
) -> Result<product::Model, ServiceError> {
    let found = ProductEntity::find_by_id(product_id)
        .filter(product::Column::TenantId.eq(tenant_id))
        .one(conn)
        .await?;
    match found {
        Some(p) if p.active => Ok(p),
        _ => Err(ServiceError::NotFound(format!(
            "Product {} not found",
            product_id
        ))),
    }
}

async fn find_active_location<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    location_id: Uuid,
) -> Result<location::Model, ServiceError> {
    let found = LocationEntity::find_by_id(location_id)
        .filter(location::Column::TenantId.eq(tenant_id))
        .one(conn)
        .await?;
    match found {
        Some(l) if l.active => Ok(l),
        _ => Err(ServiceError::NotFound(format!(
            "Location {} not found",
            location_id
        ))),
    }
}

/// Locks and re-reads a balance row by id. Used by the reservation and
/// delivery paths, which mutate `reserved_quantity` under the same lock
/// discipline as the engine.
pub async fn lock_balance<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    balance_id: Uuid,
) -> Result<inventory_balance::Model, ServiceError> {
    InventoryBalanceEntity::find_by_id(balance_id)
        .filter(inventory_balance::Column::TenantId.eq(tenant_id))
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Balance {} not found", balance_id)))
}

/// Locks the balance row for a stock key and applies `delta` to `quantity`.
/// The row is created lazily on a positive delta; a delta that would push
/// quantity below zero fails without touching anything.
async fn apply_balance_delta<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    location_id: Uuid,
    product_id: Uuid,
    batch_id: Option<Uuid>,
    delta: Decimal,
) -> Result<inventory_balance::Model, ServiceError> {
    let mut query = InventoryBalanceEntity::find()
        .filter(inventory_balance::Column::TenantId.eq(tenant_id))
        .filter(inventory_balance::Column::LocationId.eq(location_id))
        .filter(inventory_balance::Column::ProductId.eq(product_id));
    query = match batch_id {
        Some(batch_id) => query.filter(inventory_balance::Column::BatchId.eq(batch_id)),
        None => query.filter(inventory_balance::Column::BatchId.is_null()),
    };

    let existing = query.lock_exclusive().one(conn).await?;
    let now = Utc::now();

    match existing {
        Some(row) => {
            let next = row.quantity + delta;
            if next < Decimal::ZERO {
                return Err(ServiceError::InsufficientStock(format!(
                    "Insufficient stock for product {} at location {}: have {}, need {}",
                    product_id,
                    location_id,
                    row.quantity,
                    delta.abs()
                )));
            }
            let version = row.version + 1;
            let mut active: inventory_balance::ActiveModel = row.into();
            active.quantity = Set(next);
            active.version = Set(version);
            active.updated_at = Set(now);
            Ok(active.update(conn).await?)
        }
        None => {
            if delta < Decimal::ZERO {
                return Err(ServiceError::InsufficientStock(format!(
                    "No stock for product {} at location {}",
                    product_id, location_id
                )));
            }
            let row = inventory_balance::ActiveModel {
                id: Set(Uuid::new_v4()),
                tenant_id: Set(tenant_id),
                location_id: Set(location_id),
                product_id: Set(product_id),
                batch_id: Set(batch_id),
                quantity: Set(delta),
                reserved_quantity: Set(Decimal::ZERO),
                version: Set(1),
                created_at: Set(now),
                updated_at: Set(now),
            };
            Ok(row.insert(conn).await?)
        }
    }
}

/// Posts a stock movement atomically within the caller's transaction.
///
/// Locks are taken in stable order (from-side before to-side) so two
/// opposite-direction transfers cannot deadlock.
#[instrument(skip(conn, input), fields(movement_type = input.movement_type.as_str(), product_id = %input.product_id))]
pub async fn create_stock_movement<C: ConnectionTrait>(
    conn: &C,
    input: NewStockMovement,
) -> Result<StockMovementOutcome, ServiceError> {
    if input.quantity <= Decimal::ZERO {
        return Err(ServiceError::InvalidRequest(
            "Quantity must be positive".to_string(),
        ));
    }

    let (subtract_at, add_at) = resolve_sides(
        input.movement_type,
        input.from_location_id,
        input.to_location_id,
    )?;

    let product = find_active_product(conn, input.tenant_id, input.product_id).await?;

    // Expiry/status gate: only movements that decrease batch-bound stock.
    if let Some(batch_id) = input.batch_id {
        let batch = if subtract_at.is_some() {
            batches::load_outbound_batch(conn, input.tenant_id, batch_id).await?
        } else {
            batches::find_batch(conn, input.tenant_id, batch_id).await?
        };
        if batch.product_id != product.id {
            return Err(ServiceError::InvalidRequest(format!(
                "Batch {} does not belong to product {}",
                batch.batch_number, product.sku
            )));
        }
    }

    for location_id in [subtract_at, add_at].into_iter().flatten() {
        find_active_location(conn, input.tenant_id, location_id).await?;
    }

    let from_balance = match subtract_at {
        Some(location_id) => Some(
            apply_balance_delta(
                conn,
                input.tenant_id,
                location_id,
                input.product_id,
                input.batch_id,
                -input.quantity,
            )
            .await?,
        ),
        None => None,
    };
    let to_balance = match add_at {
        Some(location_id) => Some(
            apply_balance_delta(
                conn,
                input.tenant_id,
                location_id,
                input.product_id,
                input.batch_id,
                input.quantity,
            )
            .await?,
        ),
        None => None,
    };

    let year = Utc::now().year();
    let number =
        sequences::next_sequence(conn, input.tenant_id, year, sequences::MOVEMENT_KEY).await?;

    let movement = stock_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: Set(input.tenant_id),
        number: Set(number),
        number_year: Set(year),
        movement_type: Set(input.movement_type.as_str().to_string()),
        product_id: Set(input.product_id),
        batch_id: Set(input.batch_id),
        from_location_id: Set(subtract_at),
        to_location_id: Set(add_at),
        quantity: Set(input.quantity),
        reference_type: Set(input.reference_type.clone()),
        reference_id: Set(input.reference_id.clone()),
        note: Set(input.note.clone()),
        created_by: Set(input.user_id),
        created_at: Set(Utc::now()),
    };
    let movement = movement.insert(conn).await?;

    // Ordinary transfers landing in a requested city opportunistically drain
    // open movement requests; explicit request fulfillment opts out via its
    // reference type to avoid double-counting.
    let suppress_auto_apply = matches!(
        input.reference_type.as_deref(),
        Some(reference::MOVEMENT_REQUEST) | Some(reference::MOVEMENT_REQUEST_BULK)
    );
    let auto_applied = if input.movement_type == MovementType::Transfer && !suppress_auto_apply {
        movement_requests::auto_apply_transfer(
            conn,
            input.tenant_id,
            input.user_id,
            input.product_id,
            add_at.expect("transfer has a destination"),
            input.quantity,
        )
        .await?
    } else {
        Vec::new()
    };

    info!(
        number = movement.number,
        quantity = %movement.quantity,
        "stock movement posted"
    );

    Ok(StockMovementOutcome {
        movement,
        from_balance,
        to_balance,
        auto_applied,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn in_requires_destination() {
        let to = Uuid::new_v4();
        assert_eq!(
            resolve_sides(MovementType::In, None, Some(to)).unwrap(),
            (None, Some(to))
        );
        assert!(resolve_sides(MovementType::In, Some(Uuid::new_v4()), None).is_err());
    }

    #[test]
    fn in_ignores_origin() {
        let to = Uuid::new_v4();
        let (sub, add) = resolve_sides(MovementType::In, Some(Uuid::new_v4()), Some(to)).unwrap();
        assert_eq!(sub, None);
        assert_eq!(add, Some(to));
    }

    #[test]
    fn out_requires_origin() {
        let from = Uuid::new_v4();
        assert_eq!(
            resolve_sides(MovementType::Out, Some(from), None).unwrap(),
            (Some(from), None)
        );
        assert!(resolve_sides(MovementType::Out, None, Some(Uuid::new_v4())).is_err());
    }

    #[test]
    fn transfer_requires_distinct_pair() {
        let from = Uuid::new_v4();
        let to = Uuid::new_v4();
        assert_eq!(
            resolve_sides(MovementType::Transfer, Some(from), Some(to)).unwrap(),
            (Some(from), Some(to))
        );
        assert!(resolve_sides(MovementType::Transfer, Some(from), Some(from)).is_err());
        assert!(resolve_sides(MovementType::Transfer, Some(from), None).is_err());
    }

    #[test]
    fn adjustment_direction_follows_destination_presence() {
        let loc = Uuid::new_v4();
        assert_eq!(
            resolve_sides(MovementType::Adjustment, None, Some(loc)).unwrap(),
            (None, Some(loc))
        );
        assert_eq!(
            resolve_sides(MovementType::Adjustment, Some(loc), None).unwrap(),
            (Some(loc), None)
        );
        assert!(resolve_sides(MovementType::Adjustment, None, None).is_err());
    }

    #[test]
    fn decimal_quantities_stay_exact() {
        // 0.1 + 0.2 drifts in binary floats; decimals must not.
        let total = dec!(0.1) + dec!(0.2);
        assert_eq!(total, dec!(0.3));
    }
}
