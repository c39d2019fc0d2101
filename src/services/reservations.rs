//! FEFO reservation engine: soft-holds stock against confirmed sales orders.
//!
//! Candidates are walked same-city first, then any-city; within a tier,
//! batches expiring soonest come first, then dateless batches, then
//! unbatched stock. Reservation is always partial-tolerant: a shortfall
//! reserves what exists and raises no error.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::entities::{
    batch::{self, Entity as BatchEntity},
    inventory_balance::{self, Entity as InventoryBalanceEntity},
    location::{self, Entity as LocationEntity},
    sales_order_reservation::{self, Entity as ReservationEntity},
    warehouse::{self, Entity as WarehouseEntity},
};
use crate::errors::ServiceError;
use crate::services::stock_movements::lock_balance;

#[derive(Debug, Clone)]
pub struct ReservationLine {
    pub line_id: Uuid,
    pub product_id: Uuid,
    /// Pinned batch restricts candidates to that batch's balances.
    pub batch_id: Option<Uuid>,
    pub quantity: Decimal,
}

#[derive(Debug, Clone)]
pub struct ReservationTake {
    pub line_id: Uuid,
    pub balance_id: Uuid,
    pub quantity: Decimal,
}

struct Candidate {
    balance_id: Uuid,
    location_id: Uuid,
    rank: u8,
    expires_at: NaiveDate,
    batch_number: String,
}

/// Locations of the tenant whose warehouse sits in `city`, compared
/// case-insensitively.
async fn locations_in_city<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    city: &str,
) -> Result<HashSet<Uuid>, ServiceError> {
    let warehouses = WarehouseEntity::find()
        .filter(warehouse::Column::TenantId.eq(tenant_id))
        .all(conn)
        .await?;
    let matching: HashSet<Uuid> = warehouses
        .into_iter()
        .filter(|w| w.city.eq_ignore_ascii_case(city))
        .map(|w| w.id)
        .collect();
    if matching.is_empty() {
        return Ok(HashSet::new());
    }
    let locations = LocationEntity::find()
        .filter(location::Column::TenantId.eq(tenant_id))
        .filter(location::Column::WarehouseId.is_in(matching))
        .all(conn)
        .await?;
    Ok(locations.into_iter().map(|l| l.id).collect())
}

/// Ranks the eligible balances of one product FEFO-wise. Balances tied to
/// quarantined, rejected or expired batches are dropped here so no tier can
/// reserve them.
async fn ranked_candidates<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    product_id: Uuid,
    pinned_batch: Option<Uuid>,
) -> Result<Vec<Candidate>, ServiceError> {
    let mut query = InventoryBalanceEntity::find()
        .filter(inventory_balance::Column::TenantId.eq(tenant_id))
        .filter(inventory_balance::Column::ProductId.eq(product_id))
        .filter(inventory_balance::Column::Quantity.gt(Decimal::ZERO));
    if let Some(batch_id) = pinned_batch {
        query = query.filter(inventory_balance::Column::BatchId.eq(batch_id));
    }
    let balances = query.all(conn).await?;

    let batch_ids: Vec<Uuid> = balances.iter().filter_map(|b| b.batch_id).collect();
    let batches: HashMap<Uuid, batch::Model> = if batch_ids.is_empty() {
        HashMap::new()
    } else {
        BatchEntity::find()
            .filter(batch::Column::TenantId.eq(tenant_id))
            .filter(batch::Column::Id.is_in(batch_ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|b| (b.id, b))
            .collect()
    };

    let today = Utc::now().date_naive();
    let mut candidates = Vec::with_capacity(balances.len());
    for balance in balances {
        let candidate = match balance.batch_id {
            Some(batch_id) => {
                let Some(batch) = batches.get(&batch_id) else {
                    continue;
                };
                if !batch.is_released() || batch.is_expired_at(today) {
                    continue;
                }
                match batch.expires_at {
                    Some(expires_at) => Candidate {
                        balance_id: balance.id,
                        location_id: balance.location_id,
                        rank: 0,
                        expires_at,
                        batch_number: batch.batch_number.clone(),
                    },
                    None => Candidate {
                        balance_id: balance.id,
                        location_id: balance.location_id,
                        rank: 1,
                        expires_at: NaiveDate::MAX,
                        batch_number: batch.batch_number.clone(),
                    },
                }
            }
            None => Candidate {
                balance_id: balance.id,
                location_id: balance.location_id,
                rank: 2,
                expires_at: NaiveDate::MAX,
                batch_number: String::new(),
            },
        };
        candidates.push(candidate);
    }

    candidates.sort_by(|a, b| {
        (a.rank, a.expires_at, &a.batch_number, a.balance_id).cmp(&(
            b.rank,
            b.expires_at,
            &b.batch_number,
            b.balance_id,
        ))
    });
    Ok(candidates)
}

/// Reserves stock for every line of a confirmed order. Each take locks the
/// balance row, bumps `reserved_quantity` and records a reservation row; a
/// balance is never taken twice within one call even when it appears in both
/// city tiers.
#[instrument(skip(conn, lines), fields(order_id = %order_id))]
pub async fn reserve_for_order<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    order_id: Uuid,
    preferred_city: Option<&str>,
    lines: &[ReservationLine],
) -> Result<Vec<ReservationTake>, ServiceError> {
    let same_city = match preferred_city {
        Some(city) => locations_in_city(conn, tenant_id, city).await?,
        None => HashSet::new(),
    };

    let mut takes = Vec::new();
    for line in lines {
        if line.quantity <= Decimal::ZERO {
            continue;
        }
        let candidates = ranked_candidates(conn, tenant_id, line.product_id, line.batch_id).await?;

        let mut remaining = line.quantity;
        let mut visited: HashSet<Uuid> = HashSet::new();
        // Two passes over the ranked candidates: preferred city, then anywhere.
        for same_city_only in [true, false] {
            if remaining <= Decimal::ZERO {
                break;
            }
            for candidate in &candidates {
                if remaining <= Decimal::ZERO {
                    break;
                }
                if same_city_only && !same_city.contains(&candidate.location_id) {
                    continue;
                }
                if !visited.insert(candidate.balance_id) {
                    continue;
                }
                let balance = lock_balance(conn, tenant_id, candidate.balance_id).await?;
                let available = balance.available();
                let take = available.min(remaining);
                if take <= Decimal::ZERO {
                    continue;
                }

                let now = Utc::now();
                let reserved = balance.reserved_quantity + take;
                let version = balance.version + 1;
                let mut active: inventory_balance::ActiveModel = balance.into();
                active.reserved_quantity = Set(reserved);
                active.version = Set(version);
                active.updated_at = Set(now);
                active.update(conn).await?;

                let reservation = sales_order_reservation::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    tenant_id: Set(tenant_id),
                    order_id: Set(order_id),
                    order_line_id: Set(line.line_id),
                    balance_id: Set(candidate.balance_id),
                    quantity: Set(take),
                    released_at: Set(None),
                    created_at: Set(now),
                };
                reservation.insert(conn).await?;

                takes.push(ReservationTake {
                    line_id: line.line_id,
                    balance_id: candidate.balance_id,
                    quantity: take,
                });
                remaining -= take;
            }
        }
        if remaining > Decimal::ZERO {
            debug!(
                line_id = %line.line_id,
                shortfall = %remaining,
                "partial reservation; remainder left unreserved"
            );
        }
    }
    Ok(takes)
}

pub async fn active_reservations_for_order<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    order_id: Uuid,
) -> Result<Vec<sales_order_reservation::Model>, ServiceError> {
    Ok(ReservationEntity::find()
        .filter(sales_order_reservation::Column::TenantId.eq(tenant_id))
        .filter(sales_order_reservation::Column::OrderId.eq(order_id))
        .filter(sales_order_reservation::Column::ReleasedAt.is_null())
        .all(conn)
        .await?)
}

/// Releases every active reservation of an order: returns the held quantity
/// to the balances and stamps `released_at` (rows are kept as history).
pub async fn release_reservations_for_order<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    order_id: Uuid,
) -> Result<usize, ServiceError> {
    let reservations = active_reservations_for_order(conn, tenant_id, order_id).await?;
    let now = Utc::now();
    let count = reservations.len();

    for reservation in reservations {
        let balance = lock_balance(conn, tenant_id, reservation.balance_id).await?;
        let reserved = (balance.reserved_quantity - reservation.quantity).max(Decimal::ZERO);
        let version = balance.version + 1;
        let mut active: inventory_balance::ActiveModel = balance.into();
        active.reserved_quantity = Set(reserved);
        active.version = Set(version);
        active.updated_at = Set(now);
        active.update(conn).await?;

        let mut released: sales_order_reservation::ActiveModel = reservation.into();
        released.released_at = Set(Some(now));
        released.update(conn).await?;
    }
    Ok(count)
}
