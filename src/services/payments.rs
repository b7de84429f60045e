use crate::{
    db::DbPool,
    entities::order::{
        self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
        OrderPaymentStatus, OrderStatus,
    },
    entities::payment::{
        self, ActiveModel as PaymentActiveModel, Entity as PaymentEntity, Model as PaymentModel,
        PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    provider::{to_minor_units, CreateIntentRequest, IntentStatus, PaymentProvider},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatePaymentIntentRequest {
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConfirmPaymentRequest {
    pub payment_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaymentIntentResponse {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub provider_intent_id: String,
    /// Handed to the browser payment form; never stored.
    pub client_secret: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub order_id: Uuid,
    pub provider_intent_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    /// Provider-reported reason for the last failure, if any.
    pub error_message: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Service coordinating payments with the external provider.
///
/// The provider is the source of truth for intent state; this service only
/// mirrors it locally, so confirmation always re-reads the intent rather
/// than trusting the client.
#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    provider: Arc<dyn PaymentProvider>,
}

impl PaymentService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        provider: Arc<dyn PaymentProvider>,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            provider,
        }
    }

    /// Creates a provider payment intent for a pending order. Each order
    /// gets at most one payment row; a second attempt is a conflict, not a
    /// retry.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, customer_id = %customer_id))]
    pub async fn create_intent(
        &self,
        customer_id: Uuid,
        customer_email: Option<String>,
        request: CreatePaymentIntentRequest,
    ) -> Result<PaymentIntentResponse, ServiceError> {
        let db = &*self.db_pool;

        let order_model = OrderEntity::find_by_id(request.order_id)
            .filter(order::Column::CustomerId.eq(customer_id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        if let Some(existing) = PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order_model.id))
            .one(db)
            .await?
        {
            return Err(ServiceError::Conflict(format!(
                "Order already has a payment in status {}",
                existing.status
            )));
        }

        if order_model.status != OrderStatus::Pending
            || order_model.payment_status != OrderPaymentStatus::Pending
        {
            return Err(ServiceError::InvalidOperation(format!(
                "Order in status {} with payment status {} cannot be paid",
                order_model.status, order_model.payment_status
            )));
        }

        let provider_customer_id = self
            .resolve_provider_customer(customer_id, customer_email.clone())
            .await?;

        let amount_minor = to_minor_units(order_model.final_amount)?;
        let intent = self
            .provider
            .create_intent(CreateIntentRequest {
                amount_minor,
                currency: order_model.currency.to_lowercase(),
                order_id: order_model.id.to_string(),
                customer_id: Some(provider_customer_id.clone()),
                customer_email,
            })
            .await?;

        let payment_id = Uuid::new_v4();
        let payment_model = PaymentActiveModel {
            id: Set(payment_id),
            order_id: Set(order_model.id),
            provider_intent_id: Set(intent.intent_id.clone()),
            provider_charge_id: Set(None),
            provider_customer_id: Set(Some(provider_customer_id)),
            amount: Set(order_model.final_amount),
            currency: Set(order_model.currency.clone()),
            status: Set(PaymentStatus::Pending),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order_model.id, "Failed to record payment");
            ServiceError::from_db_err(e, "Order already has a payment")
        })?;

        info!(payment_id = %payment_id, order_id = %order_model.id, "Payment intent created");
        self.emit(Event::PaymentIntentCreated {
            payment_id,
            order_id: order_model.id,
        })
        .await;

        Ok(PaymentIntentResponse {
            payment_id: payment_model.id,
            order_id: payment_model.order_id,
            provider_intent_id: payment_model.provider_intent_id,
            client_secret: intent.client_secret,
            amount: super::to_money(payment_model.amount),
            currency: payment_model.currency,
            status: payment_model.status,
        })
    }

    /// Confirms a payment by re-reading the intent from the provider and
    /// mirroring its state. Safe to call repeatedly; a payment that has
    /// already settled is reported as-is without touching the order again.
    #[instrument(skip(self, request), fields(payment_id = %request.payment_id, customer_id = %customer_id))]
    pub async fn confirm_payment(
        &self,
        customer_id: Uuid,
        request: ConfirmPaymentRequest,
    ) -> Result<PaymentResponse, ServiceError> {
        let db = &*self.db_pool;

        let (payment_model, order_model) = self
            .load_owned_payment(request.payment_id, customer_id)
            .await?;

        if payment_model.status == PaymentStatus::Succeeded
            || payment_model.status == PaymentStatus::Refunded
        {
            return Ok(Self::model_to_response(payment_model));
        }

        let intent = self
            .provider
            .retrieve_intent(&payment_model.provider_intent_id)
            .await?;

        match intent.status {
            IntentStatus::Succeeded => {
                let payment_id = payment_model.id;
                let order_id = order_model.id;
                let txn = db.begin().await?;
                let updated =
                    apply_success(&txn, payment_model, order_model, intent.charge_id).await?;
                txn.commit().await.map_err(|e| {
                    error!(error = %e, payment_id = %payment_id, "Failed to commit payment confirmation");
                    ServiceError::DatabaseError(e)
                })?;

                info!(payment_id = %payment_id, order_id = %order_id, "Payment confirmed");
                self.emit(Event::PaymentSucceeded {
                    payment_id,
                    order_id,
                })
                .await;
                Ok(Self::model_to_response(updated))
            }
            IntentStatus::Processing => {
                let updated = self
                    .set_payment_status(payment_model, PaymentStatus::Processing)
                    .await?;
                Ok(Self::model_to_response(updated))
            }
            IntentStatus::Canceled => {
                let payment_id = payment_model.id;
                let order_id = order_model.id;
                let reason = intent
                    .failure_message
                    .unwrap_or_else(|| "Payment intent was canceled".to_string());
                let updated = self
                    .apply_failure(payment_model, order_model, PaymentStatus::Cancelled, reason)
                    .await?;
                self.emit(Event::PaymentFailed {
                    payment_id,
                    order_id,
                })
                .await;
                Ok(Self::model_to_response(updated))
            }
            other => {
                let payment_id = payment_model.id;
                let order_id = order_model.id;
                let reason = intent
                    .failure_message
                    .unwrap_or_else(|| format!("Payment did not complete (status {:?})", other));
                info!(payment_id = %payment_id, status = ?other, reason = %reason, "Payment failed");
                let updated = self
                    .apply_failure(payment_model, order_model, PaymentStatus::Failed, reason)
                    .await?;
                self.emit(Event::PaymentFailed {
                    payment_id,
                    order_id,
                })
                .await;
                Ok(Self::model_to_response(updated))
            }
        }
    }

    #[instrument(skip(self), fields(payment_id = %payment_id, customer_id = %customer_id))]
    pub async fn get_payment(
        &self,
        customer_id: Uuid,
        payment_id: Uuid,
    ) -> Result<PaymentResponse, ServiceError> {
        let (payment_model, _) = self.load_owned_payment(payment_id, customer_id).await?;
        Ok(Self::model_to_response(payment_model))
    }

    /// Loads a payment together with its order, scoped to the customer.
    /// Foreign payments are reported as missing, not forbidden.
    async fn load_owned_payment(
        &self,
        payment_id: Uuid,
        customer_id: Uuid,
    ) -> Result<(PaymentModel, OrderModel), ServiceError> {
        let db = &*self.db_pool;

        let payment_model = PaymentEntity::find_by_id(payment_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Payment not found".to_string()))?;

        let order_model = OrderEntity::find_by_id(payment_model.order_id)
            .filter(order::Column::CustomerId.eq(customer_id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Payment not found".to_string()))?;

        Ok((payment_model, order_model))
    }

    async fn set_payment_status(
        &self,
        payment_model: PaymentModel,
        status: PaymentStatus,
    ) -> Result<PaymentModel, ServiceError> {
        let db = &*self.db_pool;
        let mut active: PaymentActiveModel = payment_model.into();
        active.status = Set(status);
        active.updated_at = Set(Some(Utc::now()));
        Ok(active.update(db).await?)
    }

    /// Marks the payment failed (or cancelled) and flips the order's payment
    /// status to failed so the storefront can offer a fresh checkout.
    async fn apply_failure(
        &self,
        payment_model: PaymentModel,
        order_model: OrderModel,
        status: PaymentStatus,
        reason: String,
    ) -> Result<PaymentModel, ServiceError> {
        let db = &*self.db_pool;
        let now = Utc::now();
        let txn = db.begin().await?;

        let mut payment_active: PaymentActiveModel = payment_model.into();
        payment_active.status = Set(status);
        payment_active.error_message = Set(Some(reason));
        payment_active.updated_at = Set(Some(now));
        let updated = payment_active.update(&txn).await?;

        let version = order_model.version;
        let mut order_active: OrderActiveModel = order_model.into();
        order_active.payment_status = Set(OrderPaymentStatus::Failed);
        order_active.updated_at = Set(Some(now));
        order_active.version = Set(version + 1);
        order_active.update(&txn).await?;

        txn.commit().await?;
        Ok(updated)
    }

    /// Finds the provider-side customer handle recorded on any earlier
    /// payment of this customer, creating one on the provider if this is
    /// their first payment.
    async fn resolve_provider_customer(
        &self,
        customer_id: Uuid,
        customer_email: Option<String>,
    ) -> Result<String, ServiceError> {
        let db = &*self.db_pool;

        let existing = PaymentEntity::find()
            .inner_join(OrderEntity)
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(payment::Column::ProviderCustomerId.is_not_null())
            .order_by_desc(payment::Column::CreatedAt)
            .one(db)
            .await?
            .and_then(|p| p.provider_customer_id);

        if let Some(handle) = existing {
            return Ok(handle);
        }

        let created = self.provider.create_customer(customer_email, None).await?;
        info!(customer_id = %customer_id, provider_customer_id = %created.customer_id, "Provider customer created");
        Ok(created.customer_id)
    }

    async fn emit(&self, event: Event) {
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, "Failed to send payment event");
            }
        }
    }

    fn model_to_response(model: PaymentModel) -> PaymentResponse {
        PaymentResponse {
            id: model.id,
            order_id: model.order_id,
            provider_intent_id: model.provider_intent_id,
            amount: super::to_money(model.amount),
            currency: model.currency,
            status: model.status,
            error_message: model.error_message,
            paid_at: model.paid_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Applies a settled intent to the payment and its order inside `txn`.
/// Idempotent: `paid_at` is stamped only once and the order is confirmed
/// only from pending, so webhook and confirm may both run this.
///
/// A cancelled order is never marked paid: the payment row mirrors the
/// provider (the charge did settle), but the order keeps its payment
/// status so the mismatch surfaces for a refund instead of reviving the
/// order.
pub(crate) async fn apply_success(
    txn: &DatabaseTransaction,
    payment_model: PaymentModel,
    order_model: OrderModel,
    charge_id: Option<String>,
) -> Result<PaymentModel, ServiceError> {
    let now = Utc::now();

    let payment_paid_at = payment_model.paid_at;
    let mut payment_active: PaymentActiveModel = payment_model.into();
    payment_active.status = Set(PaymentStatus::Succeeded);
    if let Some(charge_id) = charge_id {
        payment_active.provider_charge_id = Set(Some(charge_id));
    }
    if payment_paid_at.is_none() {
        payment_active.paid_at = Set(Some(now));
    }
    payment_active.updated_at = Set(Some(now));
    let updated_payment = payment_active.update(txn).await?;

    if order_model.status == OrderStatus::Cancelled {
        warn!(
            order_id = %order_model.id,
            payment_id = %updated_payment.id,
            "Payment settled for a cancelled order; charge needs a refund"
        );
        return Ok(updated_payment);
    }

    let order_status = order_model.status;
    let paid_at = order_model.paid_at;
    let version = order_model.version;
    let mut order_active: OrderActiveModel = order_model.into();
    order_active.payment_status = Set(OrderPaymentStatus::Paid);
    if paid_at.is_none() {
        order_active.paid_at = Set(Some(now));
    }
    if order_status == OrderStatus::Pending {
        order_active.status = Set(OrderStatus::Confirmed);
    }
    order_active.updated_at = Set(Some(now));
    order_active.version = Set(version + 1);
    order_active.update(txn).await?;

    Ok(updated_payment)
}
