use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.1.0",
        description = r#"
# Storefront API

Backend for a small web shop: catalog, orders, and the payment lifecycle
against an external card-payment provider.

## Authentication

All endpoints except the payment webhook require a JWT bearer token:

```
Authorization: Bearer <your-jwt-token>
```

The webhook endpoint is authenticated by provider signature instead.

## Error Handling

Errors use a consistent envelope with appropriate HTTP status codes:

```json
{
  "error": "Not found",
  "message": "Order not found",
  "timestamp": "2026-01-01T00:00:00Z"
}
```

## Pagination

List endpoints accept `page` (1-based) and `limit` query parameters.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Products", description = "Catalog endpoints"),
        (name = "Orders", description = "Order lifecycle endpoints"),
        (name = "Payments", description = "Payment, refund and webhook endpoints"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Products
        crate::handlers::products::create_product,
        crate::handlers::products::list_products,
        crate::handlers::products::get_product,

        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::ship_order,
        crate::handlers::orders::deliver_order,

        // Payments
        crate::handlers::payments::create_payment_intent,
        crate::handlers::payments::confirm_payment,
        crate::handlers::payments::get_payment,
        crate::handlers::payments::refund_payment,
        crate::handlers::payments::list_refunds,

        // Webhooks
        crate::handlers::payment_webhooks::payment_webhook,
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,
            crate::ListQuery,

            // Catalog types
            crate::services::catalog::CreateProductRequest,
            crate::services::catalog::ProductResponse,
            crate::services::catalog::ProductListResponse,

            // Order types
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::OrderItemRequest,
            crate::services::orders::OrderItemResponse,
            crate::services::orders::OrderResponse,
            crate::services::orders::OrderListResponse,
            crate::handlers::orders::CancelOrderBody,
            crate::entities::order::OrderStatus,
            crate::entities::order::OrderPaymentStatus,

            // Payment types
            crate::services::payments::CreatePaymentIntentRequest,
            crate::services::payments::ConfirmPaymentRequest,
            crate::services::payments::PaymentIntentResponse,
            crate::services::payments::PaymentResponse,
            crate::services::refunds::CreateRefundRequest,
            crate::services::refunds::RefundResponse,
            crate::entities::payment::PaymentStatus,
            crate::entities::refund::RefundStatus,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_covers_core_paths() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("Storefront API"));
        assert!(json.contains("/api/v1/orders"));
        assert!(json.contains("/api/v1/payments/webhook"));
    }
}
