use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use bytes::Bytes;
use tracing::warn;

use crate::provider::signature::{parse_unverified, verify_and_parse};
use crate::{errors::ServiceError, AppState};

/// Provider webhook sink. Signature-verified instead of bearer-authenticated;
/// a 200 here only means the delivery was recorded, not that the domain
/// handler succeeded.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let event = match &state.config.payment_webhook_secret {
        Some(secret) => {
            let signature = headers
                .get("Stripe-Signature")
                .and_then(|h| h.to_str().ok())
                .ok_or_else(|| {
                    warn!("Payment webhook without signature header");
                    ServiceError::Unauthorized("Missing webhook signature".to_string())
                })?;
            verify_and_parse(
                signature,
                &body,
                secret,
                state.config.payment_webhook_tolerance_secs,
            )?
        }
        None => parse_unverified(&body)?,
    };

    state.services.webhook.ingest(event).await?;
    Ok((StatusCode::OK, "ok"))
}
