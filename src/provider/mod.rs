/*!
 * Payment provider abstraction.
 *
 * Services talk to an `Arc<dyn PaymentProvider>` so tests can substitute a
 * scripted fake for the real Stripe-backed client in [`stripe`].
 */

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

pub mod signature;
pub mod stripe;

pub use signature::{verify_and_parse, ProviderEvent};
pub use stripe::StripeClient;

/// Provider-side view of a payment intent's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    Succeeded,
    Canceled,
    /// Status string this client does not recognize; kept verbatim for logs.
    Other(String),
}

impl IntentStatus {
    pub fn from_provider(s: &str) -> Self {
        match s {
            "requires_payment_method" => IntentStatus::RequiresPaymentMethod,
            "requires_confirmation" => IntentStatus::RequiresConfirmation,
            "requires_action" => IntentStatus::RequiresAction,
            "processing" => IntentStatus::Processing,
            "succeeded" => IntentStatus::Succeeded,
            "canceled" => IntentStatus::Canceled,
            other => IntentStatus::Other(other.to_string()),
        }
    }
}

/// Intent as returned by the provider.
#[derive(Debug, Clone)]
pub struct ProviderIntent {
    pub intent_id: String,
    pub client_secret: Option<String>,
    pub status: IntentStatus,
    /// Charge id once the intent has a settled charge attached.
    pub charge_id: Option<String>,
    /// Human-readable reason for the last payment failure, when the
    /// provider reports one.
    pub failure_message: Option<String>,
}

/// Customer record on the provider's side.
#[derive(Debug, Clone)]
pub struct ProviderCustomer {
    pub customer_id: String,
}

/// Refund as returned by the provider.
#[derive(Debug, Clone)]
pub struct ProviderRefund {
    pub refund_id: String,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct CreateIntentRequest {
    pub amount_minor: i64,
    pub currency: String,
    /// Stamped into provider metadata so webhooks can be traced back.
    pub order_id: String,
    /// Provider-side customer the intent is attached to.
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateRefundRequest {
    pub intent_id: String,
    /// None asks the provider for a full refund.
    pub amount_minor: Option<i64>,
    pub reason: Option<String>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_customer(
        &self,
        email: Option<String>,
        name: Option<String>,
    ) -> Result<ProviderCustomer, ServiceError>;

    async fn create_intent(
        &self,
        req: CreateIntentRequest,
    ) -> Result<ProviderIntent, ServiceError>;

    async fn retrieve_intent(&self, intent_id: &str) -> Result<ProviderIntent, ServiceError>;

    async fn create_refund(
        &self,
        req: CreateRefundRequest,
    ) -> Result<ProviderRefund, ServiceError>;
}

/// Convert a decimal major-unit amount to provider minor units (cents).
///
/// Amounts are validated to two decimal places well before this point, so a
/// remainder here means an arithmetic bug upstream, not bad user input.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    let scaled = amount * Decimal::from(100);
    if scaled.fract() != Decimal::ZERO {
        return Err(ServiceError::InternalError(format!(
            "Amount {} has sub-cent precision",
            amount
        )));
    }
    scaled
        .trunc()
        .try_into()
        .map_err(|_| ServiceError::InternalError(format!("Amount {} out of range", amount)))
}
