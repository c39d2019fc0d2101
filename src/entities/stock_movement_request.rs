use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A branch's ask for stock from a warehouse, fulfilled by TRANSFER movements.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movement_requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Per-tenant-per-year "MR" sequence.
    pub number: i64,
    pub number_year: i32,
    /// Transfers arriving in this city may auto-apply against open items.
    pub requested_city: String,
    pub status: String,
    /// Branch-side acknowledgment after FULFILLED.
    pub confirmation_status: String,
    pub note: Option<String>,
    pub created_by: Uuid,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub fulfilled_by: Option<Uuid>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub confirmed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::stock_movement_request_item::Entity")]
    Items,
}

impl Related<super::stock_movement_request_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Open,
    Sent,
    Fulfilled,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Open => "OPEN",
            RequestStatus::Sent => "SENT",
            RequestStatus::Fulfilled => "FULFILLED",
            RequestStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(RequestStatus::Open),
            "SENT" => Some(RequestStatus::Sent),
            "FULFILLED" => Some(RequestStatus::Fulfilled),
            "CANCELLED" => Some(RequestStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfirmationStatus {
    Pending,
    Accepted,
    Rejected,
}

impl ConfirmationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationStatus::Pending => "PENDING",
            ConfirmationStatus::Accepted => "ACCEPTED",
            ConfirmationStatus::Rejected => "REJECTED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(ConfirmationStatus::Pending),
            "ACCEPTED" => Some(ConfirmationStatus::Accepted),
            "REJECTED" => Some(ConfirmationStatus::Rejected),
            _ => None,
        }
    }
}
