use crate::{
    db::DbPool,
    entities::order::{
        self, ActiveModel as OrderActiveModel, Entity as OrderEntity, OrderPaymentStatus,
    },
    entities::payment::{
        ActiveModel as PaymentActiveModel, Entity as PaymentEntity, Model as PaymentModel,
        PaymentStatus,
    },
    entities::refund::{
        self, ActiveModel as RefundActiveModel, Entity as RefundEntity, Model as RefundModel,
        RefundStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    provider::{to_minor_units, CreateRefundRequest as ProviderRefundRequest, PaymentProvider},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateRefundRequest {
    pub payment_id: Uuid,
    /// Omitted means refund the full remaining balance.
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefundResponse {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub provider_refund_id: String,
    pub amount: Decimal,
    pub status: RefundStatus,
    pub reason: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Service issuing refunds against settled payments.
#[derive(Clone)]
pub struct RefundService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    provider: Arc<dyn PaymentProvider>,
}

impl RefundService {
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

    /// Issues a refund against one of the customer's payments. The requested
    /// amount is checked against the running balance of earlier refunds
    /// before the provider is called, so the sum of pending and succeeded
    /// refunds can never exceed the paid amount.
    #[instrument(skip(self, request), fields(payment_id = %request.payment_id, customer_id = %customer_id))]
    pub async fn create_refund(
        &self,
        customer_id: Uuid,
        request: CreateRefundRequest,
    ) -> Result<RefundResponse, ServiceError> {
        let db = &*self.db_pool;

        let payment_model = PaymentEntity::find_by_id(request.payment_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Payment not found".to_string()))?;

        // Foreign payments are reported as missing, not forbidden.
        OrderEntity::find_by_id(payment_model.order_id)
            .filter(order::Column::CustomerId.eq(customer_id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Payment not found".to_string()))?;

        if payment_model.status != PaymentStatus::Succeeded {
            return Err(ServiceError::InvalidOperation(format!(
                "Only succeeded payments can be refunded, payment is {}",
                payment_model.status
            )));
        }

        let held = self.held_amount(payment_model.id).await?;
        let remaining = payment_model.amount - held;
        let amount = request.amount.unwrap_or(remaining);

        if amount <= Decimal::ZERO {
            return Err(ServiceError::InvalidInput(
                "Refund amount must be positive".to_string(),
            ));
        }
        if amount.scale() > 2 {
            return Err(ServiceError::InvalidInput(
                "Refund amount cannot have more than two decimal places".to_string(),
            ));
        }
        if amount > remaining {
            return Err(ServiceError::InvalidOperation(format!(
                "Refund of {} exceeds remaining refundable balance of {}",
                amount, remaining
            )));
        }

        let provider_refund = self
            .provider
            .create_refund(ProviderRefundRequest {
                intent_id: payment_model.provider_intent_id.clone(),
                amount_minor: Some(to_minor_units(amount)?),
                reason: request.reason.clone(),
            })
            .await?;

        let status = match provider_refund.status.as_str() {
            "succeeded" => RefundStatus::Succeeded,
            "pending" => RefundStatus::Pending,
            "canceled" => RefundStatus::Cancelled,
            other => {
                warn!(payment_id = %payment_model.id, status = %other, "Provider reported unexpected refund status");
                RefundStatus::Failed
            }
        };
        let refunded_at = match status {
            RefundStatus::Succeeded => Some(Utc::now()),
            _ => None,
        };

        let refund_id = Uuid::new_v4();
        let txn = db.begin().await?;

        let refund_model = RefundActiveModel {
            id: Set(refund_id),
            payment_id: Set(payment_model.id),
            provider_refund_id: Set(provider_refund.refund_id),
            amount: Set(amount),
            status: Set(status),
            reason: Set(request.reason),
            refunded_at: Set(refunded_at),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, payment_id = %payment_model.id, "Failed to record refund");
            ServiceError::from_db_err(e, "Refund already recorded")
        })?;

        // Flip payment and order once the full amount is spoken for.
        if status.holds_balance() && held + amount == payment_model.amount {
            mark_fully_refunded(&txn, &payment_model).await?;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, refund_id = %refund_id, "Failed to commit refund");
            ServiceError::DatabaseError(e)
        })?;

        info!(refund_id = %refund_id, payment_id = %payment_model.id, amount = %amount, "Refund created");
        self.emit(Event::RefundCreated {
            refund_id,
            payment_id: payment_model.id,
        })
        .await;

        Ok(Self::model_to_response(refund_model))
    }

    /// Lists refunds for one of the customer's payments, oldest first.
    #[instrument(skip(self), fields(payment_id = %payment_id, customer_id = %customer_id))]
    pub async fn list_refunds(
        &self,
        customer_id: Uuid,
        payment_id: Uuid,
    ) -> Result<Vec<RefundResponse>, ServiceError> {
        let db = &*self.db_pool;

        let payment_model = PaymentEntity::find_by_id(payment_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Payment not found".to_string()))?;

        OrderEntity::find_by_id(payment_model.order_id)
            .filter(order::Column::CustomerId.eq(customer_id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Payment not found".to_string()))?;

        let refunds = RefundEntity::find()
            .filter(refund::Column::PaymentId.eq(payment_id))
            .order_by_asc(refund::Column::CreatedAt)
            .all(db)
            .await?;

        Ok(refunds.into_iter().map(Self::model_to_response).collect())
    }

    /// Sum of refund amounts currently counting against the payment.
    async fn held_amount(&self, payment_id: Uuid) -> Result<Decimal, ServiceError> {
        let db = &*self.db_pool;
        let refunds = RefundEntity::find()
            .filter(refund::Column::PaymentId.eq(payment_id))
            .all(db)
            .await?;
        Ok(refunds
            .iter()
            .filter(|r| r.status.holds_balance())
            .map(|r| r.amount)
            .sum())
    }

    async fn emit(&self, event: Event) {
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, "Failed to send refund event");
            }
        }
    }

    fn model_to_response(model: RefundModel) -> RefundResponse {
        RefundResponse {
            id: model.id,
            payment_id: model.payment_id,
            provider_refund_id: model.provider_refund_id,
            amount: super::to_money(model.amount),
            status: model.status,
            reason: model.reason,
            refunded_at: model.refunded_at,
            created_at: model.created_at,
        }
    }
}

/// Marks a payment and its order as fully refunded inside `txn`.
pub(crate) async fn mark_fully_refunded<C>(
    txn: &C,
    payment_model: &PaymentModel,
) -> Result<(), ServiceError>
where
    C: sea_orm::ConnectionTrait,
{
    let now = Utc::now();

    let mut payment_active: PaymentActiveModel = payment_model.clone().into();
    payment_active.status = Set(PaymentStatus::Refunded);
    payment_active.updated_at = Set(Some(now));
    payment_active.update(txn).await?;

    if let Some(order_model) = OrderEntity::find_by_id(payment_model.order_id)
        .one(txn)
        .await?
    {
        let version = order_model.version;
        let mut order_active: OrderActiveModel = order_model.into();
        order_active.payment_status = Set(OrderPaymentStatus::Refunded);
        order_active.updated_at = Set(Some(now));
        order_active.version = Set(version + 1);
        order_active.update(txn).await?;
    }

    Ok(())
}
