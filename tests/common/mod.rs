//! Shared fixtures for integration tests: an in-memory SQLite database with
//! the full schema, plus seed helpers for the master data the ledger
//! references.

#![allow(dead_code)]

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DatabaseConnection};
use uuid::Uuid;

use farmadis_api::db;
use farmadis_api::entities::{batch, location, product, warehouse};
use farmadis_api::entities::batch::BatchStatus;
use farmadis_api::entities::stock_movement::MovementType;
use farmadis_api::services::stock_movements::{create_stock_movement, NewStockMovement};

pub async fn test_db() -> DatabaseConnection {
    let conn = db::establish_connection("sqlite::memory:")
        .await
        .expect("db connect");
    db::init_schema(&conn).await.expect("schema init");
    conn
}

pub struct Fixture {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            tenant_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        }
    }
}

pub async fn seed_product(conn: &DatabaseConnection, tenant_id: Uuid, sku: &str) -> product::Model {
    let now = Utc::now();
    product::ActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: Set(tenant_id),
        name: Set(format!("Product {}", sku)),
        sku: Set(sku.to_string()),
        active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await
    .expect("seed product")
}

pub async fn seed_warehouse(
    conn: &DatabaseConnection,
    tenant_id: Uuid,
    name: &str,
    city: &str,
) -> warehouse::Model {
    let now = Utc::now();
    warehouse::ActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: Set(tenant_id),
        name: Set(name.to_string()),
        city: Set(city.to_string()),
        active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await
    .expect("seed warehouse")
}

pub async fn seed_location(
    conn: &DatabaseConnection,
    tenant_id: Uuid,
    warehouse_id: Uuid,
    name: &str,
) -> location::Model {
    let now = Utc::now();
    location::ActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: Set(tenant_id),
        warehouse_id: Set(warehouse_id),
        name: Set(name.to_string()),
        active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await
    .expect("seed location")
}

/// Warehouse + single location in one step, for tests that only need a place
/// for stock to live.
pub async fn seed_site(
    conn: &DatabaseConnection,
    tenant_id: Uuid,
    city: &str,
) -> (warehouse::Model, location::Model) {
    let wh = seed_warehouse(conn, tenant_id, &format!("WH {}", city), city).await;
    let loc = seed_location(conn, tenant_id, wh.id, &format!("Main {}", city)).await;
    (wh, loc)
}

pub async fn seed_batch(
    conn: &DatabaseConnection,
    tenant_id: Uuid,
    product_id: Uuid,
    batch_number: &str,
    expires_at: Option<NaiveDate>,
    status: BatchStatus,
) -> batch::Model {
    let now = Utc::now();
    batch::ActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: Set(tenant_id),
        product_id: Set(product_id),
        batch_number: Set(batch_number.to_string()),
        expires_at: Set(expires_at),
        status: Set(status.as_str().to_string()),
        source_type: Set(None),
        source_id: Set(None),
        released_at: Set(matches!(status, BatchStatus::Released).then_some(now)),
        released_by: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await
    .expect("seed batch")
}

/// Receives stock via the movement engine, so the balance row exists the way
/// production creates it.
pub async fn receive_stock(
    conn: &DatabaseConnection,
    fx: &Fixture,
    product_id: Uuid,
    batch_id: Option<Uuid>,
    location_id: Uuid,
    quantity: Decimal,
) {
    create_stock_movement(
        conn,
        NewStockMovement {
            tenant_id: fx.tenant_id,
            user_id: fx.user_id,
            movement_type: MovementType::In,
            product_id,
            batch_id,
            from_location_id: None,
            to_location_id: Some(location_id),
            quantity,
            reference_type: None,
            reference_id: None,
            note: None,
        },
    )
    .await
    .expect("receive stock");
}

pub fn days_from_today(days: i64) -> NaiveDate {
    Utc::now().date_naive() + chrono::Duration::days(days)
}
