//! Tests for webhook ingestion: signature verification, event dedup, and the
//! provider-driven payment state changes.

mod common;

use axum::http::Method;
use common::TestApp;
use hmac::{Hmac, Mac};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;
use sha2::Sha256;
use storefront_api::entities::order::{OrderPaymentStatus, OrderStatus};
use storefront_api::entities::payment::PaymentStatus;
use storefront_api::entities::refund::RefundStatus;
use storefront_api::entities::webhook_event;
use storefront_api::provider::signature::parse_unverified;
use storefront_api::services::payments::{ConfirmPaymentRequest, CreatePaymentIntentRequest};
use storefront_api::services::refunds::CreateRefundRequest;
use storefront_api::services::webhooks::WebhookOutcome;

const WEBHOOK_URI: &str = "/api/v1/payments/webhook";

fn event_body(event_id: &str, event_type: &str, object: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "type": event_type,
        "data": { "object": object }
    }))
    .expect("serialize webhook body")
}

fn sign(body: &[u8], ts: i64, secret: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(ts.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    format!("t={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
}

/// Seed an order with an open payment intent, returning the intent response.
async fn pending_payment(
    app: &TestApp,
) -> storefront_api::services::payments::PaymentIntentResponse {
    let product = app.seed_product("Widget", dec!(10.00)).await;
    let order = app.create_order(&[(product.id, 2)]).await;
    app.state
        .services
        .payment
        .create_intent(
            app.customer_id,
            None,
            CreatePaymentIntentRequest { order_id: order.id },
        )
        .await
        .expect("create payment intent")
}

#[tokio::test]
async fn succeeded_webhook_settles_payment_and_order() {
    let app = TestApp::new().await;
    let intent = pending_payment(&app).await;

    let body = event_body(
        "evt_1",
        "payment_intent.succeeded",
        json!({ "id": intent.provider_intent_id, "latest_charge": "ch_wh_1" }),
    );
    let response = app.request_raw(Method::POST, WEBHOOK_URI, body, &[]).await;
    assert_eq!(response.status(), 200);

    let payment = app
        .state
        .services
        .payment
        .get_payment(app.customer_id, intent.payment_id)
        .await
        .expect("payment exists");
    assert_eq!(payment.status, PaymentStatus::Succeeded);

    let order = app
        .state
        .services
        .order
        .get_order(app.customer_id, intent.order_id)
        .await
        .expect("lookup")
        .expect("order exists");
    assert_eq!(order.payment_status, OrderPaymentStatus::Paid);
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert!(order.paid_at.is_some());
}

#[tokio::test]
async fn succeeded_webhook_never_marks_cancelled_order_paid() {
    let app = TestApp::new().await;
    let intent = pending_payment(&app).await;

    // The customer cancels while the intent is still open at the provider.
    app.state
        .services
        .order
        .cancel_order(app.customer_id, intent.order_id, None)
        .await
        .expect("cancel order");

    let body = event_body(
        "evt_late_settle",
        "payment_intent.succeeded",
        json!({ "id": intent.provider_intent_id, "latest_charge": "ch_late_1" }),
    );
    let response = app.request_raw(Method::POST, WEBHOOK_URI, body, &[]).await;
    assert_eq!(response.status(), 200);

    // The payment mirrors the provider, but the cancelled order is never paid.
    let payment = app
        .state
        .services
        .payment
        .get_payment(app.customer_id, intent.payment_id)
        .await
        .expect("payment exists");
    assert_eq!(payment.status, PaymentStatus::Succeeded);

    let order = app
        .state
        .services
        .order
        .get_order(app.customer_id, intent.order_id)
        .await
        .expect("lookup")
        .expect("order exists");
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.payment_status, OrderPaymentStatus::Pending);
    assert!(order.paid_at.is_none());
}

#[tokio::test]
async fn duplicate_deliveries_are_ignored() {
    let app = TestApp::new().await;
    let intent = pending_payment(&app).await;

    let body = event_body(
        "evt_dup",
        "payment_intent.succeeded",
        json!({ "id": intent.provider_intent_id, "latest_charge": "ch_wh_1" }),
    );
    let event = parse_unverified(&bytes::Bytes::from(body.clone())).expect("parse event");

    let first = app
        .state
        .services
        .webhook
        .ingest(event.clone())
        .await
        .expect("first ingest");
    assert_eq!(first, WebhookOutcome::Processed);

    let second = app
        .state
        .services
        .webhook
        .ingest(event)
        .await
        .expect("second ingest");
    assert_eq!(second, WebhookOutcome::Duplicate);

    // Redelivery over HTTP is also acknowledged.
    let response = app.request_raw(Method::POST, WEBHOOK_URI, body, &[]).await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn handler_failure_is_recorded_and_acknowledged() {
    let app = TestApp::new().await;

    let body = event_body(
        "evt_unknown_intent",
        "payment_intent.succeeded",
        json!({ "id": "pi_never_created" }),
    );
    let response = app.request_raw(Method::POST, WEBHOOK_URI, body, &[]).await;
    assert_eq!(response.status(), 200);

    let row = webhook_event::Entity::find()
        .filter(webhook_event::Column::ProviderEventId.eq("evt_unknown_intent"))
        .one(&*app.state.db)
        .await
        .expect("query webhook events")
        .expect("event recorded");
    assert!(!row.processed);
    assert!(row.processing_error.is_some());
    assert!(row.processed_at.is_none());
}

#[tokio::test]
async fn unknown_event_types_are_accepted() {
    let app = TestApp::new().await;

    let body = event_body("evt_other", "customer.created", json!({ "id": "cus_1" }));
    let response = app.request_raw(Method::POST, WEBHOOK_URI, body, &[]).await;
    assert_eq!(response.status(), 200);

    let row = webhook_event::Entity::find()
        .filter(webhook_event::Column::ProviderEventId.eq("evt_other"))
        .one(&*app.state.db)
        .await
        .expect("query webhook events")
        .expect("event recorded");
    assert!(row.processed);
    assert!(row.processing_error.is_none());
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let app = TestApp::new().await;

    let response = app
        .request_raw(Method::POST, WEBHOOK_URI, b"{\"type\":\"x\"}".to_vec(), &[])
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn failed_webhook_marks_payment_failed() {
    let app = TestApp::new().await;
    let intent = pending_payment(&app).await;

    let body = event_body(
        "evt_fail",
        "payment_intent.payment_failed",
        json!({
            "id": intent.provider_intent_id,
            "last_payment_error": { "message": "Insufficient funds." }
        }),
    );
    let response = app.request_raw(Method::POST, WEBHOOK_URI, body, &[]).await;
    assert_eq!(response.status(), 200);

    let payment = app
        .state
        .services
        .payment
        .get_payment(app.customer_id, intent.payment_id)
        .await
        .expect("payment exists");
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.error_message.as_deref(), Some("Insufficient funds."));

    let order = app
        .state
        .services
        .order
        .get_order(app.customer_id, intent.order_id)
        .await
        .expect("lookup")
        .expect("order exists");
    assert_eq!(order.payment_status, OrderPaymentStatus::Failed);
}

#[tokio::test]
async fn canceled_webhook_cancels_pending_order() {
    let app = TestApp::new().await;
    let intent = pending_payment(&app).await;

    let body = event_body(
        "evt_cancel",
        "payment_intent.canceled",
        json!({ "id": intent.provider_intent_id }),
    );
    let response = app.request_raw(Method::POST, WEBHOOK_URI, body, &[]).await;
    assert_eq!(response.status(), 200);

    let payment = app
        .state
        .services
        .payment
        .get_payment(app.customer_id, intent.payment_id)
        .await
        .expect("payment exists");
    assert_eq!(payment.status, PaymentStatus::Cancelled);

    let order = app
        .state
        .services
        .order
        .get_order(app.customer_id, intent.order_id)
        .await
        .expect("lookup")
        .expect("order exists");
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.payment_status, OrderPaymentStatus::Failed);
}

#[tokio::test]
async fn canceled_webhook_leaves_settled_payment_alone() {
    let app = TestApp::new().await;
    let intent = pending_payment(&app).await;
    app.provider
        .settle_intent(&intent.provider_intent_id, "ch_1");
    app.state
        .services
        .payment
        .confirm_payment(
            app.customer_id,
            ConfirmPaymentRequest {
                payment_id: intent.payment_id,
            },
        )
        .await
        .expect("confirm payment");

    let body = event_body(
        "evt_stray_cancel",
        "payment_intent.canceled",
        json!({ "id": intent.provider_intent_id }),
    );
    let response = app.request_raw(Method::POST, WEBHOOK_URI, body, &[]).await;
    assert_eq!(response.status(), 200);

    let payment = app
        .state
        .services
        .payment
        .get_payment(app.customer_id, intent.payment_id)
        .await
        .expect("payment exists");
    assert_eq!(payment.status, PaymentStatus::Succeeded);

    let order = app
        .state
        .services
        .order
        .get_order(app.customer_id, intent.order_id)
        .await
        .expect("lookup")
        .expect("order exists");
    assert_eq!(order.status, OrderStatus::Confirmed);
}

#[tokio::test]
async fn charge_refunded_webhook_settles_pending_refunds() {
    let app = TestApp::new().await;
    let intent = pending_payment(&app).await;
    app.provider
        .settle_intent(&intent.provider_intent_id, "ch_1");
    app.state
        .services
        .payment
        .confirm_payment(
            app.customer_id,
            ConfirmPaymentRequest {
                payment_id: intent.payment_id,
            },
        )
        .await
        .expect("confirm payment");

    // The provider leaves the refund in flight; the webhook settles it later.
    app.provider.set_refund_status("pending");
    let refund = app
        .state
        .services
        .refund
        .create_refund(
            app.customer_id,
            CreateRefundRequest {
                payment_id: intent.payment_id,
                amount: None,
                reason: None,
            },
        )
        .await
        .expect("create refund");
    assert_eq!(refund.status, RefundStatus::Pending);

    // The charge object carries the provider's refund list; a refund we
    // never issued rides along and must be ignored.
    let body = event_body(
        "evt_refund",
        "charge.refunded",
        json!({
            "id": "ch_1",
            "payment_intent": intent.provider_intent_id,
            "refunds": {
                "data": [
                    { "id": refund.provider_refund_id },
                    { "id": "re_never_issued" }
                ]
            }
        }),
    );
    let response = app.request_raw(Method::POST, WEBHOOK_URI, body, &[]).await;
    assert_eq!(response.status(), 200);

    let refunds = app
        .state
        .services
        .refund
        .list_refunds(app.customer_id, intent.payment_id)
        .await
        .expect("list refunds");
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].status, RefundStatus::Succeeded);
    assert!(refunds[0].refunded_at.is_some());

    let payment = app
        .state
        .services
        .payment
        .get_payment(app.customer_id, intent.payment_id)
        .await
        .expect("payment exists");
    assert_eq!(payment.status, PaymentStatus::Refunded);

    let order = app
        .state
        .services
        .order
        .get_order(app.customer_id, intent.order_id)
        .await
        .expect("lookup")
        .expect("order exists");
    assert_eq!(order.payment_status, OrderPaymentStatus::Refunded);
}

#[tokio::test]
async fn signed_webhook_with_valid_signature_is_accepted() {
    let secret = "whsec_integration_test";
    let app = TestApp::with_webhook_secret(secret).await;

    let body = event_body("evt_signed", "customer.created", json!({ "id": "cus_1" }));
    let signature = sign(&body, chrono::Utc::now().timestamp(), secret);

    let response = app
        .request_raw(
            Method::POST,
            WEBHOOK_URI,
            body,
            &[("Stripe-Signature", signature.as_str())],
        )
        .await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn signed_webhook_rejects_missing_header() {
    let app = TestApp::with_webhook_secret("whsec_integration_test").await;

    let body = event_body("evt_unsigned", "customer.created", json!({ "id": "cus_1" }));
    let response = app.request_raw(Method::POST, WEBHOOK_URI, body, &[]).await;
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn signed_webhook_rejects_bad_signature() {
    let secret = "whsec_integration_test";
    let app = TestApp::with_webhook_secret(secret).await;

    let body = event_body("evt_forged", "customer.created", json!({ "id": "cus_1" }));
    let signature = sign(&body, chrono::Utc::now().timestamp(), "whsec_wrong_secret");

    let response = app
        .request_raw(
            Method::POST,
            WEBHOOK_URI,
            body,
            &[("Stripe-Signature", signature.as_str())],
        )
        .await;
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn signed_webhook_rejects_stale_timestamp() {
    let secret = "whsec_integration_test";
    let app = TestApp::with_webhook_secret(secret).await;

    let body = event_body("evt_stale", "customer.created", json!({ "id": "cus_1" }));
    let stale = chrono::Utc::now().timestamp() - 86_400;
    let signature = sign(&body, stale, secret);

    let response = app
        .request_raw(
            Method::POST,
            WEBHOOK_URI,
            body,
            &[("Stripe-Signature", signature.as_str())],
        )
        .await;
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn event_ids_are_not_shared_across_types() {
    let app = TestApp::new().await;
    let intent = pending_payment(&app).await;

    let first = event_body(
        "evt_shared",
        "payment_intent.payment_failed",
        json!({ "id": intent.provider_intent_id }),
    );
    let response = app.request_raw(Method::POST, WEBHOOK_URI, first, &[]).await;
    assert_eq!(response.status(), 200);

    // Same id again, even with a different type, is a duplicate.
    let second = event_body(
        "evt_shared",
        "payment_intent.succeeded",
        json!({ "id": intent.provider_intent_id }),
    );
    let event = parse_unverified(&bytes::Bytes::from(second)).expect("parse event");
    let outcome = app
        .state
        .services
        .webhook
        .ingest(event)
        .await
        .expect("ingest duplicate id");
    assert_eq!(outcome, WebhookOutcome::Duplicate);
}
