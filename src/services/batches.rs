//! Batch lookups, the outbound expiry/status gate, and QC release.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
};
use uuid::Uuid;

use crate::entities::batch::{self, BatchStatus, Entity as BatchEntity};
use crate::errors::ServiceError;

pub async fn find_batch<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    batch_id: Uuid,
) -> Result<batch::Model, ServiceError> {
    BatchEntity::find_by_id(batch_id)
        .filter(batch::Column::TenantId.eq(tenant_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Batch {} not found", batch_id)))
}

/// Gate applied to every stock-decreasing movement that names a batch:
/// the batch must be RELEASED and not expired (date-only, UTC).
pub async fn load_outbound_batch<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    batch_id: Uuid,
) -> Result<batch::Model, ServiceError> {
    let batch = find_batch(conn, tenant_id, batch_id).await?;
    assert_outbound(&batch)?;
    Ok(batch)
}

pub fn assert_outbound(batch: &batch::Model) -> Result<(), ServiceError> {
    let today = Utc::now().date_naive();
    if batch.is_expired_at(today) {
        return Err(ServiceError::BatchExpired {
            batch_id: batch.id,
            batch_number: batch.batch_number.clone(),
            expires_at: batch.expires_at.expect("expired implies a date"),
        });
    }
    if !batch.is_released() {
        return Err(ServiceError::StateConflict(format!(
            "Batch {} is {} and cannot ship",
            batch.batch_number, batch.status
        )));
    }
    Ok(())
}

pub struct NewBatch {
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub batch_number: String,
    pub expires_at: Option<chrono::NaiveDate>,
    pub released: bool,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
}

pub async fn create_batch<C: ConnectionTrait>(
    conn: &C,
    input: NewBatch,
) -> Result<batch::Model, ServiceError> {
    if input.batch_number.trim().is_empty() {
        return Err(ServiceError::InvalidRequest(
            "Batch number must not be empty".to_string(),
        ));
    }
    let now = Utc::now();
    let status = if input.released {
        BatchStatus::Released
    } else {
        BatchStatus::Quarantine
    };
    let model = batch::ActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: Set(input.tenant_id),
        product_id: Set(input.product_id),
        batch_number: Set(input.batch_number),
        expires_at: Set(input.expires_at),
        status: Set(status.as_str().to_string()),
        source_type: Set(input.source_type),
        source_id: Set(input.source_id),
        released_at: Set(input.released.then_some(now)),
        released_by: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };
    Ok(model.insert(conn).await?)
}

/// QC release: QUARANTINE -> RELEASED, one-way.
pub async fn release_batch<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    user_id: Uuid,
    batch_id: Uuid,
) -> Result<batch::Model, ServiceError> {
    let batch = find_batch(conn, tenant_id, batch_id).await?;
    if batch.status != BatchStatus::Quarantine.as_str() {
        return Err(ServiceError::StateConflict(format!(
            "Batch {} is {} and cannot be released",
            batch.batch_number, batch.status
        )));
    }
    let now = Utc::now();
    let mut active: batch::ActiveModel = batch.into();
    active.status = Set(BatchStatus::Released.as_str().to_string());
    active.released_at = Set(Some(now));
    active.released_by = Set(Some(user_id));
    active.updated_at = Set(now);
    Ok(active.update(conn).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn batch_with(expires_at: Option<NaiveDate>, status: BatchStatus) -> batch::Model {
        let now = Utc::now();
        batch::Model {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            batch_number: "L-001".into(),
            expires_at,
            status: status.as_str().to_string(),
            source_type: None,
            source_id: None,
            released_at: None,
            released_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn expired_batch_is_blocked_with_meta() {
        let yesterday = Utc::now().date_naive() - Duration::days(1);
        let batch = batch_with(Some(yesterday), BatchStatus::Released);
        match assert_outbound(&batch) {
            Err(ServiceError::BatchExpired {
                batch_number,
                expires_at,
                ..
            }) => {
                assert_eq!(batch_number, "L-001");
                assert_eq!(expires_at, yesterday);
            }
            other => panic!("expected BatchExpired, got {:?}", other.err()),
        }
    }

    #[test]
    fn batch_expiring_today_still_ships() {
        let today = Utc::now().date_naive();
        let batch = batch_with(Some(today), BatchStatus::Released);
        assert!(assert_outbound(&batch).is_ok());
    }

    #[test]
    fn dateless_batch_ships() {
        let batch = batch_with(None, BatchStatus::Released);
        assert!(assert_outbound(&batch).is_ok());
    }

    #[test]
    fn quarantined_batch_is_blocked() {
        let batch = batch_with(None, BatchStatus::Quarantine);
        assert!(matches!(
            assert_outbound(&batch),
            Err(ServiceError::StateConflict(_))
        ));
    }
}
