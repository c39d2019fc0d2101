mod common;

use assert_matches::assert_matches;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::*;
use farmadis_api::entities::batch::BatchStatus;
use farmadis_api::entities::stock_movement::MovementType;
use farmadis_api::entities::stock_movement_request::{ConfirmationStatus, RequestStatus};
use farmadis_api::errors::ServiceError;
use farmadis_api::services::movement_requests::{
    cancel_request, confirm_request, create_request, fulfill_request, plan_request, request_items,
    FulfillLine, NewMovementRequest, NewRequestItem,
};
use farmadis_api::services::stock_movements::{create_stock_movement, NewStockMovement};

fn boxed_item(product_id: Uuid, boxes: Decimal, units_per_box: Decimal) -> NewRequestItem {
    NewRequestItem {
        product_id,
        presentation: Some(format!("BOX_{}", units_per_box)),
        units_per_presentation: units_per_box,
        quantity: boxes,
    }
}

fn ship(item_id: Uuid, quantity: Decimal) -> FulfillLine {
    FulfillLine {
        item_id: Some(item_id),
        product_id: None,
        presentation: None,
        batch_id: None,
        quantity,
    }
}

#[tokio::test]
async fn partial_fulfillments_drain_remaining_until_fulfilled() {
    let conn = test_db().await;
    let fx = Fixture::new();
    let product = seed_product(&conn, fx.tenant_id, "AMOX-500").await;
    let (_, origin) = seed_site(&conn, fx.tenant_id, "SANTA CRUZ").await;
    let (_, destination) = seed_site(&conn, fx.tenant_id, "LA PAZ").await;
    receive_stock(&conn, &fx, product.id, None, origin.id, dec!(1000)).await;

    // 50 boxes of 10 -> 500 base units.
    let (request, items) = create_request(
        &conn,
        fx.tenant_id,
        fx.user_id,
        NewMovementRequest {
            requested_city: "LA PAZ".to_string(),
            note: None,
            items: vec![boxed_item(product.id, dec!(50), dec!(10))],
        },
    )
    .await
    .unwrap();
    assert_eq!(items[0].requested_quantity, dec!(500));
    assert_eq!(items[0].remaining_quantity, dec!(500));
    let item_id = items[0].id;

    let first = fulfill_request(
        &conn,
        fx.tenant_id,
        fx.user_id,
        request.id,
        origin.id,
        destination.id,
        vec![ship(item_id, dec!(200))],
    )
    .await
    .unwrap();
    assert!(!first.fulfilled);
    assert_eq!(first.request.status, RequestStatus::Open.as_str());

    let second = fulfill_request(
        &conn,
        fx.tenant_id,
        fx.user_id,
        request.id,
        origin.id,
        destination.id,
        vec![ship(item_id, dec!(150))],
    )
    .await
    .unwrap();
    assert!(!second.fulfilled);
    let remaining = request_items(&conn, fx.tenant_id, request.id).await.unwrap()[0]
        .remaining_quantity;
    assert_eq!(remaining, dec!(150));

    let third = fulfill_request(
        &conn,
        fx.tenant_id,
        fx.user_id,
        request.id,
        origin.id,
        destination.id,
        vec![ship(item_id, dec!(150))],
    )
    .await
    .unwrap();
    assert!(third.fulfilled);
    assert_eq!(third.request.status, RequestStatus::Fulfilled.as_str());
    assert!(third.request.fulfilled_at.is_some());

    // The shipments moved real stock.
    assert_eq!(third.movements.len(), 1);
    assert_eq!(third.movements[0].movement_type, "TRANSFER");
}

#[tokio::test]
async fn line_exceeding_remaining_is_rejected() {
    let conn = test_db().await;
    let fx = Fixture::new();
    let product = seed_product(&conn, fx.tenant_id, "IBU-400").await;
    let (_, origin) = seed_site(&conn, fx.tenant_id, "SANTA CRUZ").await;
    let (_, destination) = seed_site(&conn, fx.tenant_id, "LA PAZ").await;
    receive_stock(&conn, &fx, product.id, None, origin.id, dec!(1000)).await;

    let (request, items) = create_request(
        &conn,
        fx.tenant_id,
        fx.user_id,
        NewMovementRequest {
            requested_city: "LA PAZ".to_string(),
            note: None,
            items: vec![boxed_item(product.id, dec!(50), dec!(10))],
        },
    )
    .await
    .unwrap();

    let result = fulfill_request(
        &conn,
        fx.tenant_id,
        fx.user_id,
        request.id,
        origin.id,
        destination.id,
        vec![ship(items[0].id, dec!(600))],
    )
    .await;
    assert_matches!(result, Err(ServiceError::InvalidRequest(_)));

    let remaining = request_items(&conn, fx.tenant_id, request.id).await.unwrap()[0]
        .remaining_quantity;
    assert_eq!(remaining, dec!(500));
}

#[tokio::test]
async fn ordinary_transfer_auto_applies_to_open_requests() {
    let conn = test_db().await;
    let fx = Fixture::new();
    let product = seed_product(&conn, fx.tenant_id, "PARA-500").await;
    let (_, origin) = seed_site(&conn, fx.tenant_id, "SANTA CRUZ").await;
    let (_, destination) = seed_site(&conn, fx.tenant_id, "LA PAZ").await;
    receive_stock(&conn, &fx, product.id, None, origin.id, dec!(1000)).await;

    let (request, items) = create_request(
        &conn,
        fx.tenant_id,
        fx.user_id,
        NewMovementRequest {
            requested_city: "La Paz".to_string(),
            note: None,
            items: vec![boxed_item(product.id, dec!(50), dec!(10))],
        },
    )
    .await
    .unwrap();

    // An ad-hoc transfer into the requested city counts against the request.
    let outcome = create_stock_movement(
        &conn,
        NewStockMovement {
            tenant_id: fx.tenant_id,
            user_id: fx.user_id,
            movement_type: MovementType::Transfer,
            product_id: product.id,
            batch_id: None,
            from_location_id: Some(origin.id),
            to_location_id: Some(destination.id),
            quantity: dec!(200),
            reference_type: None,
            reference_id: None,
            note: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(outcome.auto_applied.len(), 1);
    assert_eq!(outcome.auto_applied[0].request_id, request.id);
    assert_eq!(outcome.auto_applied[0].quantity, dec!(200));

    let remaining = request_items(&conn, fx.tenant_id, request.id).await.unwrap()[0]
        .remaining_quantity;
    assert_eq!(remaining, dec!(300));

    // A transfer into another city leaves the request alone.
    let (_, elsewhere) = seed_site(&conn, fx.tenant_id, "COCHABAMBA").await;
    let unrelated = create_stock_movement(
        &conn,
        NewStockMovement {
            tenant_id: fx.tenant_id,
            user_id: fx.user_id,
            movement_type: MovementType::Transfer,
            product_id: product.id,
            batch_id: None,
            from_location_id: Some(origin.id),
            to_location_id: Some(elsewhere.id),
            quantity: dec!(100),
            reference_type: None,
            reference_id: None,
            note: None,
        },
    )
    .await
    .unwrap();
    assert!(unrelated.auto_applied.is_empty());

    // Explicit request fulfillment is tagged and must not double-count.
    let fulfill = fulfill_request(
        &conn,
        fx.tenant_id,
        fx.user_id,
        request.id,
        origin.id,
        destination.id,
        vec![ship(items[0].id, dec!(300))],
    )
    .await
    .unwrap();
    assert!(fulfill.fulfilled);
    assert!(fulfill
        .movements
        .iter()
        .all(|m| m.reference_type.as_deref() == Some("MOVEMENT_REQUEST")));
    let remaining = request_items(&conn, fx.tenant_id, request.id).await.unwrap()[0]
        .remaining_quantity;
    assert_eq!(remaining, Decimal::ZERO);
}

#[tokio::test]
async fn auto_apply_drains_requests_fifo() {
    let conn = test_db().await;
    let fx = Fixture::new();
    let product = seed_product(&conn, fx.tenant_id, "DICLO-50").await;
    let (_, origin) = seed_site(&conn, fx.tenant_id, "SANTA CRUZ").await;
    let (_, destination) = seed_site(&conn, fx.tenant_id, "LA PAZ").await;
    receive_stock(&conn, &fx, product.id, None, origin.id, dec!(1000)).await;

    let (older, older_items) = create_request(
        &conn,
        fx.tenant_id,
        fx.user_id,
        NewMovementRequest {
            requested_city: "LA PAZ".to_string(),
            note: None,
            items: vec![boxed_item(product.id, dec!(10), dec!(10))],
        },
    )
    .await
    .unwrap();
    let (newer, newer_items) = create_request(
        &conn,
        fx.tenant_id,
        fx.user_id,
        NewMovementRequest {
            requested_city: "LA PAZ".to_string(),
            note: None,
            items: vec![boxed_item(product.id, dec!(10), dec!(10))],
        },
    )
    .await
    .unwrap();
    assert_eq!(older_items[0].requested_quantity, dec!(100));
    assert_eq!(newer_items[0].requested_quantity, dec!(100));

    // 150 arriving: the older request drains fully and flips FULFILLED, the
    // newer takes the remainder.
    let outcome = create_stock_movement(
        &conn,
        NewStockMovement {
            tenant_id: fx.tenant_id,
            user_id: fx.user_id,
            movement_type: MovementType::Transfer,
            product_id: product.id,
            batch_id: None,
            from_location_id: Some(origin.id),
            to_location_id: Some(destination.id),
            quantity: dec!(150),
            reference_type: None,
            reference_id: None,
            note: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(outcome.auto_applied.len(), 2);
    assert_eq!(outcome.auto_applied[0].request_id, older.id);
    assert_eq!(outcome.auto_applied[0].quantity, dec!(100));
    assert_eq!(outcome.auto_applied[1].request_id, newer.id);
    assert_eq!(outcome.auto_applied[1].quantity, dec!(50));

    let older_now = farmadis_api::services::movement_requests::get_request(
        &conn,
        fx.tenant_id,
        older.id,
    )
    .await
    .unwrap();
    assert_eq!(older_now.status, RequestStatus::Fulfilled.as_str());
    let newer_remaining = request_items(&conn, fx.tenant_id, newer.id).await.unwrap()[0]
        .remaining_quantity;
    assert_eq!(newer_remaining, dec!(50));
}

#[tokio::test]
async fn plan_prefers_opened_lots_then_expiry() {
    let conn = test_db().await;
    let fx = Fixture::new();
    let product = seed_product(&conn, fx.tenant_id, "OMEP-20").await;
    let (_, origin) = seed_site(&conn, fx.tenant_id, "SANTA CRUZ").await;
    let fresh_soon = seed_batch(
        &conn,
        fx.tenant_id,
        product.id,
        "L-FRESH",
        Some(days_from_today(20)),
        BatchStatus::Released,
    )
    .await;
    let opened_later = seed_batch(
        &conn,
        fx.tenant_id,
        product.id,
        "L-OPENED",
        Some(days_from_today(60)),
        BatchStatus::Released,
    )
    .await;
    receive_stock(&conn, &fx, product.id, Some(fresh_soon.id), origin.id, dec!(100)).await;
    receive_stock(&conn, &fx, product.id, Some(opened_later.id), origin.id, dec!(100)).await;

    // Ship a little out of the later batch so it counts as opened.
    create_stock_movement(
        &conn,
        NewStockMovement {
            tenant_id: fx.tenant_id,
            user_id: fx.user_id,
            movement_type: MovementType::Out,
            product_id: product.id,
            batch_id: Some(opened_later.id),
            from_location_id: Some(origin.id),
            to_location_id: None,
            quantity: dec!(10),
            reference_type: None,
            reference_id: None,
            note: None,
        },
    )
    .await
    .unwrap();

    let (request, _) = create_request(
        &conn,
        fx.tenant_id,
        fx.user_id,
        NewMovementRequest {
            requested_city: "LA PAZ".to_string(),
            note: None,
            items: vec![boxed_item(product.id, dec!(12), dec!(10))],
        },
    )
    .await
    .unwrap();

    let plan = plan_request(&conn, fx.tenant_id, request.id, origin.id)
        .await
        .unwrap();
    assert_eq!(plan.len(), 1);
    let suggestions = &plan[0].suggestions;
    // Opened lot first despite its later expiry, then the fresh one.
    assert_eq!(suggestions[0].batch_id, Some(opened_later.id));
    assert_eq!(suggestions[0].quantity, dec!(90));
    assert_eq!(suggestions[1].batch_id, Some(fresh_soon.id));
    assert_eq!(suggestions[1].quantity, dec!(30));
}

#[tokio::test]
async fn plan_pool_is_shared_across_items_of_same_product() {
    let conn = test_db().await;
    let fx = Fixture::new();
    let product = seed_product(&conn, fx.tenant_id, "CEFTR-1G").await;
    let (_, origin) = seed_site(&conn, fx.tenant_id, "SANTA CRUZ").await;
    receive_stock(&conn, &fx, product.id, None, origin.id, dec!(100)).await;

    let (request, _) = create_request(
        &conn,
        fx.tenant_id,
        fx.user_id,
        NewMovementRequest {
            requested_city: "LA PAZ".to_string(),
            note: None,
            items: vec![
                boxed_item(product.id, dec!(8), dec!(10)),
                boxed_item(product.id, dec!(5), dec!(10)),
            ],
        },
    )
    .await
    .unwrap();

    let plan = plan_request(&conn, fx.tenant_id, request.id, origin.id)
        .await
        .unwrap();
    let first_total: Decimal = plan[0].suggestions.iter().map(|s| s.quantity).sum();
    let second_total: Decimal = plan[1].suggestions.iter().map(|s| s.quantity).sum();
    // 100 available: the first item claims 80, the second only gets 20 --
    // never the same units twice.
    assert_eq!(first_total, dec!(80));
    assert_eq!(second_total, dec!(20));
}

#[tokio::test]
async fn confirmation_requires_fulfilled_request() {
    let conn = test_db().await;
    let fx = Fixture::new();
    let product = seed_product(&conn, fx.tenant_id, "LORAT-10").await;
    let (_, origin) = seed_site(&conn, fx.tenant_id, "SANTA CRUZ").await;
    let (_, destination) = seed_site(&conn, fx.tenant_id, "LA PAZ").await;
    receive_stock(&conn, &fx, product.id, None, origin.id, dec!(100)).await;

    let (request, items) = create_request(
        &conn,
        fx.tenant_id,
        fx.user_id,
        NewMovementRequest {
            requested_city: "LA PAZ".to_string(),
            note: None,
            items: vec![boxed_item(product.id, dec!(5), dec!(10))],
        },
    )
    .await
    .unwrap();

    let early = confirm_request(&conn, fx.tenant_id, fx.user_id, request.id, true).await;
    assert_matches!(early, Err(ServiceError::StateConflict(_)));

    fulfill_request(
        &conn,
        fx.tenant_id,
        fx.user_id,
        request.id,
        origin.id,
        destination.id,
        vec![ship(items[0].id, dec!(50))],
    )
    .await
    .unwrap();

    let confirmed = confirm_request(&conn, fx.tenant_id, fx.user_id, request.id, true)
        .await
        .unwrap();
    assert_eq!(
        confirmed.confirmation_status,
        ConfirmationStatus::Accepted.as_str()
    );
    assert!(confirmed.confirmed_at.is_some());

    // Acknowledgment is one-shot.
    let again = confirm_request(&conn, fx.tenant_id, fx.user_id, request.id, false).await;
    assert_matches!(again, Err(ServiceError::StateConflict(_)));
}

#[tokio::test]
async fn cancel_only_before_any_fulfillment() {
    let conn = test_db().await;
    let fx = Fixture::new();
    let product = seed_product(&conn, fx.tenant_id, "AMOX-500").await;
    let (_, origin) = seed_site(&conn, fx.tenant_id, "SANTA CRUZ").await;
    let (_, destination) = seed_site(&conn, fx.tenant_id, "LA PAZ").await;
    receive_stock(&conn, &fx, product.id, None, origin.id, dec!(100)).await;

    let (untouched, _) = create_request(
        &conn,
        fx.tenant_id,
        fx.user_id,
        NewMovementRequest {
            requested_city: "LA PAZ".to_string(),
            note: None,
            items: vec![boxed_item(product.id, dec!(5), dec!(10))],
        },
    )
    .await
    .unwrap();
    let cancelled = cancel_request(&conn, fx.tenant_id, untouched.id).await.unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled.as_str());

    let (touched, items) = create_request(
        &conn,
        fx.tenant_id,
        fx.user_id,
        NewMovementRequest {
            requested_city: "LA PAZ".to_string(),
            note: None,
            items: vec![boxed_item(product.id, dec!(5), dec!(10))],
        },
    )
    .await
    .unwrap();
    fulfill_request(
        &conn,
        fx.tenant_id,
        fx.user_id,
        touched.id,
        origin.id,
        destination.id,
        vec![ship(items[0].id, dec!(10))],
    )
    .await
    .unwrap();

    let result = cancel_request(&conn, fx.tenant_id, touched.id).await;
    assert_matches!(result, Err(ServiceError::StateConflict(_)));
}
