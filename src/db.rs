use std::time::Duration;

use sea_orm::sea_query::Index;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::entities::{
    batch, document_sequence, inventory_balance, location, product, sales_order, sales_order_line,
    sales_order_reservation, stock_movement, stock_movement_request, stock_movement_request_item,
    warehouse,
};
use crate::errors::ServiceError;

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

pub async fn establish_connection(database_url: &str) -> Result<DbPool, ServiceError> {
    let config = DbConfig {
        url: database_url.to_string(),
        // In-memory SQLite gives every pooled connection its own database;
        // a single connection keeps dev/test state coherent.
        max_connections: if database_url.starts_with("sqlite") {
            1
        } else {
            10
        },
        ..Default::default()
    };

    establish_connection_with_config(&config).await
}

pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!("configuring database connection: {:?}", config);

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    let pool = Database::connect(opt).await?;
    info!(
        max_connections = config.max_connections,
        "database connection established"
    );
    Ok(pool)
}

pub async fn establish_connection_from_app_config(
    cfg: &AppConfig,
) -> Result<DbPool, ServiceError> {
    establish_connection(&cfg.database_url).await
}

/// Creates all tables and the uniqueness indexes the ledger relies on.
/// Idempotent; used at startup when `auto_migrate` is set and by tests.
pub async fn init_schema(db: &DatabaseConnection) -> Result<(), ServiceError> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    macro_rules! create_table {
        ($entity:expr) => {{
            let mut stmt = schema.create_table_from_entity($entity);
            stmt.if_not_exists();
            db.execute(backend.build(&stmt)).await?;
        }};
    }

    create_table!(product::Entity);
    create_table!(warehouse::Entity);
    create_table!(location::Entity);
    create_table!(batch::Entity);
    create_table!(inventory_balance::Entity);
    create_table!(stock_movement::Entity);
    create_table!(document_sequence::Entity);
    create_table!(sales_order::Entity);
    create_table!(sales_order_line::Entity);
    create_table!(sales_order_reservation::Entity);
    create_table!(stock_movement_request::Entity);
    create_table!(stock_movement_request_item::Entity);

    // Batchless rows carry NULL batch_id, which unique indexes treat as
    // distinct; the engine's lock-then-upsert keeps those rows singular.
    let balance_key = Index::create()
        .name("ux_inventory_balances_key")
        .table(inventory_balance::Entity)
        .col(inventory_balance::Column::TenantId)
        .col(inventory_balance::Column::LocationId)
        .col(inventory_balance::Column::ProductId)
        .col(inventory_balance::Column::BatchId)
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(backend.build(&balance_key)).await?;

    let sequence_key = Index::create()
        .name("ux_document_sequences_key")
        .table(document_sequence::Entity)
        .col(document_sequence::Column::TenantId)
        .col(document_sequence::Column::Year)
        .col(document_sequence::Column::Key)
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(backend.build(&sequence_key)).await?;

    let movement_lookup = Index::create()
        .name("ix_stock_movements_reference")
        .table(stock_movement::Entity)
        .col(stock_movement::Column::TenantId)
        .col(stock_movement::Column::ReferenceType)
        .col(stock_movement::Column::ReferenceId)
        .if_not_exists()
        .to_owned();
    db.execute(backend.build(&movement_lookup)).await?;

    info!("schema initialized");
    Ok(())
}

/// Cheap connectivity probe for the health endpoint.
pub async fn ping(db: &DatabaseConnection) -> Result<(), ServiceError> {
    db.ping().await.map_err(ServiceError::from)
}
