use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sales_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Per-tenant-per-year "SO" sequence.
    pub number: i64,
    pub number_year: i32,
    pub customer_name: String,
    pub status: String,
    /// Optimistic lock; every mutating endpoint must present the current value.
    pub version: i32,
    /// "CASH" or "CREDIT_<days>", e.g. "CREDIT_30".
    pub payment_mode: String,
    pub preferred_city: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sales_order_line::Entity")]
    Lines,
    #[sea_orm(has_many = "super::sales_order_reservation::Entity")]
    Reservations,
}

impl Related<super::sales_order_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lines.def()
    }
}

impl Related<super::sales_order_reservation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reservations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Draft,
    Confirmed,
    Fulfilled,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "DRAFT",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Fulfilled => "FULFILLED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(OrderStatus::Draft),
            "CONFIRMED" => Some(OrderStatus::Confirmed),
            "FULFILLED" => Some(OrderStatus::Fulfilled),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl Model {
    /// Days until payment is due after delivery. CASH pays immediately;
    /// "CREDIT_N" defers N days; unparseable encodings fall back to 0.
    pub fn credit_days(&self) -> i64 {
        if self.payment_mode == "CASH" {
            return 0;
        }
        self.payment_mode
            .strip_prefix("CREDIT_")
            .and_then(|n| n.parse::<i64>().ok())
            .filter(|n| *n >= 0)
            .unwrap_or(0)
    }
}
