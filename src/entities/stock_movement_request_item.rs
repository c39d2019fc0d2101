use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One requested product line. Quantities are base units; a presentation
/// (e.g. a box of 10) is converted at request creation.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movement_request_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub request_id: Uuid,
    pub product_id: Uuid,
    pub presentation: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub units_per_presentation: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub requested_quantity: Decimal,
    /// Decremented as shipments post; non-increasing, never below zero.
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub remaining_quantity: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::stock_movement_request::Entity",
        from = "Column::RequestId",
        to = "super::stock_movement_request::Column::Id"
    )]
    Request,
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
}

impl Related<super::stock_movement_request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Request.def()
    }
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
