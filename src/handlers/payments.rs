use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::errors::ServiceError;
use crate::services::payments::{
    ConfirmPaymentRequest, CreatePaymentIntentRequest, PaymentIntentResponse, PaymentResponse,
};
use crate::services::refunds::{CreateRefundRequest, RefundResponse};
use crate::{ApiResponse, AppState};

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/intent", post(create_payment_intent))
        .route("/confirm", post(confirm_payment))
        .route("/refund", post(refund_payment))
        .route("/:id", get(get_payment))
        .route("/:id/refunds", get(list_refunds))
}

/// Create a payment intent for an order
#[utoipa::path(
    post,
    path = "/api/v1/payments/intent",
    request_body = CreatePaymentIntentRequest,
    responses(
        (status = 201, description = "Payment intent created", body = ApiResponse<PaymentIntentResponse>),
        (status = 400, description = "Order cannot be paid", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already has a payment", body = crate::errors::ErrorResponse),
        (status = 502, description = "Provider error", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
async fn create_payment_intent(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreatePaymentIntentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentIntentResponse>>), ServiceError> {
    let intent = state
        .services
        .payment
        .create_intent(user.id, user.email.clone(), request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(intent))))
}

/// Confirm a payment against the provider
#[utoipa::path(
    post,
    path = "/api/v1/payments/confirm",
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 200, description = "Current payment state", body = ApiResponse<PaymentResponse>),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Provider error", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
async fn confirm_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<Json<ApiResponse<PaymentResponse>>, ServiceError> {
    let payment = state
        .services
        .payment
        .confirm_payment(user.id, request)
        .await?;
    Ok(Json(ApiResponse::success(payment)))
}

/// Get a payment
#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}",
    params(("id" = Uuid, Path, description = "Payment id")),
    responses(
        (status = 200, description = "Payment", body = ApiResponse<PaymentResponse>),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
async fn get_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<PaymentResponse>>, ServiceError> {
    let payment = state.services.payment.get_payment(user.id, id).await?;
    Ok(Json(ApiResponse::success(payment)))
}

/// Refund a settled payment, fully or in part
#[utoipa::path(
    post,
    path = "/api/v1/payments/refund",
    request_body = CreateRefundRequest,
    responses(
        (status = 201, description = "Refund created", body = ApiResponse<RefundResponse>),
        (status = 400, description = "Refund not allowed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Provider error", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
async fn refund_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateRefundRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RefundResponse>>), ServiceError> {
    let refund = state.services.refund.create_refund(user.id, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(refund))))
}

/// List refunds issued against a payment
#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}/refunds",
    params(("id" = Uuid, Path, description = "Payment id")),
    responses(
        (status = 200, description = "Refunds", body = ApiResponse<Vec<RefundResponse>>),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
async fn list_refunds(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<RefundResponse>>>, ServiceError> {
    let refunds = state.services.refund.list_refunds(user.id, id).await?;
    Ok(Json(ApiResponse::success(refunds)))
}
