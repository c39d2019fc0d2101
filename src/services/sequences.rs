//! Per-tenant-per-year document counters ("MS", "SO", "MR").

use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QuerySelect,
};
use uuid::Uuid;

use crate::entities::document_sequence::{self, Entity as DocumentSequenceEntity};
use crate::errors::ServiceError;

pub const MOVEMENT_KEY: &str = "MS";
pub const SALES_ORDER_KEY: &str = "SO";
pub const MOVEMENT_REQUEST_KEY: &str = "MR";

/// Allocates the next number for (tenant, year, key) under the caller's
/// transaction. The counter row is locked before the increment so two
/// concurrent callers never observe the same number; a rollback may leave a
/// gap, which is tolerated. The unique index on the key serializes the
/// first-allocation race of a fresh (tenant, year, key).
pub async fn next_sequence<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    year: i32,
    key: &str,
) -> Result<i64, ServiceError> {
    let existing = DocumentSequenceEntity::find()
        .filter(document_sequence::Column::TenantId.eq(tenant_id))
        .filter(document_sequence::Column::Year.eq(year))
        .filter(document_sequence::Column::Key.eq(key))
        .lock_exclusive()
        .one(conn)
        .await?;

    match existing {
        Some(row) => {
            let next = row.value + 1;
            let mut active: document_sequence::ActiveModel = row.into();
            active.value = Set(next);
            active.update(conn).await?;
            Ok(next)
        }
        None => {
            let row = document_sequence::ActiveModel {
                id: Set(Uuid::new_v4()),
                tenant_id: Set(tenant_id),
                year: Set(year),
                key: Set(key.to_string()),
                value: Set(1),
            };
            row.insert(conn).await?;
            Ok(1)
        }
    }
}
