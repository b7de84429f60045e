//! End-to-end tests for the order lifecycle: creation with catalog pricing,
//! the status machine, and per-customer scoping.

mod common;

use axum::{body, http::Method, response::Response};
use common::TestApp;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use storefront_api::entities::order::{OrderPaymentStatus, OrderStatus};
use storefront_api::errors::ServiceError;
use storefront_api::services::orders::{CreateOrderRequest, OrderItemRequest};
use uuid::Uuid;

async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

fn base_request(items: Vec<OrderItemRequest>) -> CreateOrderRequest {
    CreateOrderRequest {
        items,
        shipping_name: "Test Customer".to_string(),
        shipping_address: "1 Test Street".to_string(),
        shipping_city: "Testville".to_string(),
        shipping_postal_code: "12345".to_string(),
        shipping_country: "us".to_string(),
        notes: None,
    }
}

#[tokio::test]
async fn create_order_freezes_catalog_pricing() {
    let app = TestApp::new().await;

    let widget = app.seed_product("Widget", dec!(19.99)).await;
    let gadget = app.seed_product("Gadget", dec!(5.50)).await;

    let order = app.create_order(&[(widget.id, 2), (gadget.id, 1)]).await;

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, OrderPaymentStatus::Pending);
    assert_eq!(order.total_amount, dec!(45.48));
    assert_eq!(order.discount_amount, dec!(0));
    assert_eq!(order.tax_amount, dec!(0));
    assert_eq!(
        order.final_amount,
        order.total_amount - order.discount_amount + order.tax_amount
    );
    assert_eq!(order.currency, "USD");
    assert!(order.order_number.starts_with("ORD-"));
    assert_eq!(order.items.len(), 2);
    assert!(order.paid_at.is_none());

    let widget_line = order
        .items
        .iter()
        .find(|i| i.product_id == Some(widget.id))
        .expect("widget line present");
    assert_eq!(widget_line.product_name, "Widget");
    assert_eq!(widget_line.quantity, 2);
    assert_eq!(widget_line.price_per_unit, dec!(19.99));
    assert_eq!(widget_line.total_price, dec!(39.98));
}

#[tokio::test]
async fn create_order_normalizes_country_code() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(10.00)).await;

    let order = app
        .state
        .services
        .order
        .create_order(
            app.customer_id,
            base_request(vec![OrderItemRequest {
                product_id: product.id,
                quantity: 1,
            }]),
        )
        .await
        .expect("order created");

    assert_eq!(order.shipping_country, "US");
}

#[tokio::test]
async fn create_order_rejects_unknown_product() {
    let app = TestApp::new().await;

    let result = app
        .state
        .services
        .order
        .create_order(
            app.customer_id,
            base_request(vec![OrderItemRequest {
                product_id: Uuid::new_v4(),
                quantity: 1,
            }]),
        )
        .await;

    assert!(matches!(result, Err(ServiceError::ValidationError(_))));

    // Nothing was persisted by the failed attempt.
    let orders = app
        .state
        .services
        .order
        .list_orders(app.customer_id, 1, 10)
        .await
        .expect("list orders");
    assert_eq!(orders.total, 0);
}

#[tokio::test]
async fn create_order_reports_every_missing_product() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(10.00)).await;
    let first_missing = Uuid::new_v4();
    let second_missing = Uuid::new_v4();

    let result = app
        .state
        .services
        .order
        .create_order(
            app.customer_id,
            base_request(vec![
                OrderItemRequest {
                    product_id: product.id,
                    quantity: 1,
                },
                OrderItemRequest {
                    product_id: first_missing,
                    quantity: 1,
                },
                OrderItemRequest {
                    product_id: second_missing,
                    quantity: 2,
                },
            ]),
        )
        .await;

    // Both unresolved ids are named, not just the first one hit.
    match result {
        Err(ServiceError::ValidationError(message)) => {
            assert!(message.contains(&first_missing.to_string()));
            assert!(message.contains(&second_missing.to_string()));
            assert!(!message.contains(&product.id.to_string()));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn create_order_rejects_inactive_product() {
    use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait};
    use storefront_api::entities::product;

    let app = TestApp::new().await;
    let seeded = app.seed_product("Retired Widget", dec!(10.00)).await;

    let model = product::Entity::find_by_id(seeded.id)
        .one(&*app.state.db)
        .await
        .expect("query product")
        .expect("product exists");
    let mut active: product::ActiveModel = model.into();
    active.is_active = Set(false);
    active.update(&*app.state.db).await.expect("deactivate product");

    let result = app
        .state
        .services
        .order
        .create_order(
            app.customer_id,
            base_request(vec![OrderItemRequest {
                product_id: seeded.id,
                quantity: 1,
            }]),
        )
        .await;

    assert!(matches!(result, Err(ServiceError::ValidationError(_))));
}

#[tokio::test]
async fn create_order_rejects_zero_quantity() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(10.00)).await;

    let result = app
        .state
        .services
        .order
        .create_order(
            app.customer_id,
            base_request(vec![OrderItemRequest {
                product_id: product.id,
                quantity: 0,
            }]),
        )
        .await;

    assert!(matches!(result, Err(ServiceError::ValidationError(_))));
}

#[tokio::test]
async fn create_order_requires_items() {
    let app = TestApp::new().await;

    let result = app
        .state
        .services
        .order
        .create_order(app.customer_id, base_request(vec![]))
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn cancel_order_from_pending() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(10.00)).await;
    let order = app.create_order(&[(product.id, 1)]).await;

    let cancelled = app
        .state
        .services
        .order
        .cancel_order(app.customer_id, order.id, Some("changed my mind".to_string()))
        .await
        .expect("cancel pending order");
    assert_eq!(cancelled.status, OrderStatus::Cancelled);

    // Cancelled is terminal.
    let again = app
        .state
        .services
        .order
        .cancel_order(app.customer_id, order.id, None)
        .await;
    assert!(matches!(again, Err(ServiceError::InvalidTransition(_))));
}

#[tokio::test]
async fn ship_and_deliver_flow() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(10.00)).await;
    let order = app.create_order(&[(product.id, 1)]).await;

    let shipped = app
        .state
        .services
        .order
        .mark_shipped(order.id)
        .await
        .expect("ship pending order");
    assert_eq!(shipped.status, OrderStatus::Shipped);
    assert!(shipped.shipped_at.is_some());

    // Shipped orders can no longer be cancelled.
    let cancel = app
        .state
        .services
        .order
        .cancel_order(app.customer_id, order.id, None)
        .await;
    assert!(matches!(cancel, Err(ServiceError::InvalidTransition(_))));

    let delivered = app
        .state
        .services
        .order
        .mark_delivered(order.id)
        .await
        .expect("deliver shipped order");
    assert_eq!(delivered.status, OrderStatus::Delivered);
    assert!(delivered.delivered_at.is_some());
}

#[tokio::test]
async fn deliver_requires_shipped() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(10.00)).await;
    let order = app.create_order(&[(product.id, 1)]).await;

    let result = app.state.services.order.mark_delivered(order.id).await;
    assert!(matches!(result, Err(ServiceError::InvalidTransition(_))));
}

#[tokio::test]
async fn orders_are_scoped_to_their_customer() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(10.00)).await;
    let order = app.create_order(&[(product.id, 1)]).await;

    let stranger = Uuid::new_v4();

    let fetched = app
        .state
        .services
        .order
        .get_order(stranger, order.id)
        .await
        .expect("lookup succeeds");
    assert!(fetched.is_none());

    let cancel = app
        .state
        .services
        .order
        .cancel_order(stranger, order.id, None)
        .await;
    assert!(matches!(cancel, Err(ServiceError::NotFound(_))));

    let listed = app
        .state
        .services
        .order
        .list_orders(stranger, 1, 20)
        .await
        .expect("list succeeds");
    assert_eq!(listed.total, 0);
}

#[tokio::test]
async fn order_api_create_and_fetch() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(12.34)).await;

    let payload = json!({
        "items": [{ "product_id": product.id, "quantity": 3 }],
        "shipping_name": "Test Customer",
        "shipping_address": "1 Test Street",
        "shipping_city": "Testville",
        "shipping_postal_code": "12345",
        "shipping_country": "US"
    });

    let create = app
        .request_authenticated(Method::POST, "/api/v1/orders", Some(payload))
        .await;
    assert_eq!(create.status(), 201);

    let body = response_json(create).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["total_amount"], "37.02");
    let order_id = body["data"]["id"].as_str().expect("order id").to_string();

    let fetch = app
        .request_authenticated(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
        .await;
    assert_eq!(fetch.status(), 200);
    let fetched = response_json(fetch).await;
    assert_eq!(fetched["data"]["id"], order_id.as_str());
    assert_eq!(fetched["data"]["items"].as_array().map(|a| a.len()), Some(1));

    let list = app
        .request_authenticated(Method::GET, "/api/v1/orders?page=1&limit=10", None)
        .await;
    assert_eq!(list.status(), 200);
    let listed = response_json(list).await;
    assert_eq!(listed["data"]["total"], 1);
}

#[tokio::test]
async fn order_api_requires_authentication() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/orders", None, None).await;
    assert_eq!(response.status(), 401);

    let garbage = app
        .request(Method::GET, "/api/v1/orders", None, Some("not-a-token"))
        .await;
    assert_eq!(garbage.status(), 401);
}

#[tokio::test]
async fn order_api_lifecycle_endpoints() {
    let app = TestApp::new().await;
    let product = app.seed_product("Widget", dec!(10.00)).await;
    let order = app.create_order(&[(product.id, 1)]).await;

    let ship = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{}/ship", order.id),
            None,
        )
        .await;
    assert_eq!(ship.status(), 200);
    let shipped = response_json(ship).await;
    assert_eq!(shipped["data"]["status"], "shipped");

    let deliver = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{}/deliver", order.id),
            None,
        )
        .await;
    assert_eq!(deliver.status(), 200);

    // Delivered is terminal; the cancel endpoint must refuse.
    let cancel = app
        .request_authenticated(
            Method::POST,
            &format!("/api/v1/orders/{}/cancel", order.id),
            Some(json!({ "reason": "too late" })),
        )
        .await;
    assert_eq!(cancel.status(), 400);
}
