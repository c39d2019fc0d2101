//! SeaORM entities for the distribution core.

pub mod batch;
pub mod document_sequence;
pub mod inventory_balance;
pub mod location;
pub mod product;
pub mod sales_order;
pub mod sales_order_line;
pub mod sales_order_reservation;
pub mod stock_movement;
pub mod stock_movement_request;
pub mod stock_movement_request_item;
pub mod warehouse;
