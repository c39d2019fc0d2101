//! OpenAPI document served at /api/v1/openapi.json.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::stock::post_movement,
        crate::handlers::stock::list_movements,
        crate::handlers::stock::list_balances,
        crate::handlers::sales_orders::confirm_order,
        crate::handlers::sales_orders::deliver_order,
        crate::handlers::movement_requests::create_request,
        crate::handlers::movement_requests::fulfill_request,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::handlers::stock::CreateMovementRequest,
        crate::handlers::stock::BalanceView,
        crate::handlers::sales_orders::CreateOrderRequest,
        crate::handlers::sales_orders::CreateOrderLineRequest,
        crate::handlers::sales_orders::TransitionRequest,
        crate::handlers::sales_orders::FulfillRequest,
        crate::handlers::sales_orders::DeliverRequest,
        crate::handlers::movement_requests::CreateRequestRequest,
        crate::handlers::movement_requests::CreateRequestItemRequest,
        crate::handlers::movement_requests::FulfillRequestRequest,
        crate::handlers::movement_requests::FulfillLineRequest,
        crate::handlers::movement_requests::ConfirmRequestRequest,
        crate::handlers::batches::CreateBatchRequest,
    )),
    tags(
        (name = "stock", description = "Stock movements and balances"),
        (name = "sales-orders", description = "Sales order workflow"),
        (name = "movement-requests", description = "Inter-branch movement requests"),
    ),
    info(
        title = "Farmadis API",
        description = "Pharmaceutical distribution inventory and order management"
    )
)]
pub struct ApiDoc;
