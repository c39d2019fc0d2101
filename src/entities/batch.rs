use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "batches")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub batch_number: String,
    /// Date-only expiry; stock cannot leave an expired batch.
    pub expires_at: Option<NaiveDate>,
    pub status: String,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub released_at: Option<DateTime<Utc>>,
    pub released_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    #[sea_orm(has_many = "super::inventory_balance::Entity")]
    InventoryBalances,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::inventory_balance::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InventoryBalances.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    Quarantine,
    Released,
    Rejected,
    Used,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Quarantine => "QUARANTINE",
            BatchStatus::Released => "RELEASED",
            BatchStatus::Rejected => "REJECTED",
            BatchStatus::Used => "USED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "QUARANTINE" => Some(BatchStatus::Quarantine),
            "RELEASED" => Some(BatchStatus::Released),
            "REJECTED" => Some(BatchStatus::Rejected),
            "USED" => Some(BatchStatus::Used),
            _ => None,
        }
    }
}

impl Model {
    /// Expired means a non-null expiry date strictly before today (UTC, date-only).
    pub fn is_expired_at(&self, today: NaiveDate) -> bool {
        matches!(self.expires_at, Some(d) if d < today)
    }

    pub fn is_released(&self) -> bool {
        self.status == BatchStatus::Released.as_str()
    }
}
