use crate::{
    db::DbPool,
    entities::order::{
        ActiveModel as OrderActiveModel, Entity as OrderEntity, OrderPaymentStatus, OrderStatus,
    },
    entities::payment::{
        self, ActiveModel as PaymentActiveModel, Entity as PaymentEntity, Model as PaymentModel,
        PaymentStatus,
    },
    entities::refund::{self, ActiveModel as RefundActiveModel, Entity as RefundEntity, RefundStatus},
    entities::webhook_event::{ActiveModel as WebhookEventActiveModel, Entity as WebhookEventEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    provider::ProviderEvent,
    services::payments::apply_success,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set, SqlErr,
    TransactionTrait,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// What ingestion did with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// First time we saw this event id; the handler ran.
    Processed,
    /// Redelivery of an already-recorded event; nothing ran.
    Duplicate,
}

/// Service consuming verified provider webhook events.
///
/// Every delivery is recorded before its handler runs, and the unique index
/// on the provider event id turns redeliveries into no-ops. Handler failures
/// are stored on the recorded row instead of propagating, so the provider
/// sees a 2xx; the row stays unprocessed so the failure can be replayed or
/// inspected later.
#[derive(Clone)]
pub struct WebhookService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl WebhookService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self, event), fields(provider_event_id = %event.id, event_type = %event.event_type))]
    pub async fn ingest(&self, event: ProviderEvent) -> Result<WebhookOutcome, ServiceError> {
        let db = &*self.db_pool;
        let row_id = Uuid::new_v4();

        let inserted = WebhookEventActiveModel {
            id: Set(row_id),
            provider_event_id: Set(event.id.clone()),
            event_type: Set(event.event_type.clone()),
            payload: Set(event.payload.clone()),
            processed: Set(false),
            processing_error: Set(None),
            processed_at: Set(None),
            ..Default::default()
        }
        .insert(db)
        .await;

        if let Err(e) = inserted {
            if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                info!(provider_event_id = %event.id, "Webhook event already processed");
                return Ok(WebhookOutcome::Duplicate);
            }
            error!(error = %e, provider_event_id = %event.id, "Failed to record webhook event");
            return Err(ServiceError::DatabaseError(e));
        }

        let result = self.dispatch(&event).await;

        let mut row: WebhookEventActiveModel = WebhookEventEntity::find_by_id(row_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError("Webhook event row vanished".to_string())
            })?
            .into();
        match &result {
            Ok(()) => {
                row.processed = Set(true);
                row.processed_at = Set(Some(Utc::now()));
            }
            Err(e) => {
                error!(error = %e, provider_event_id = %event.id, "Webhook handler failed");
                row.processing_error = Set(Some(e.to_string()));
            }
        }
        row.update(db).await?;

        self.emit(Event::WebhookReceived {
            provider_event_id: event.id,
            event_type: event.event_type,
        })
        .await;

        Ok(WebhookOutcome::Processed)
    }

    async fn dispatch(&self, event: &ProviderEvent) -> Result<(), ServiceError> {
        match event.event_type.as_str() {
            "payment_intent.succeeded" => self.handle_intent_succeeded(&event.object).await,
            "payment_intent.payment_failed" => self.handle_intent_failed(&event.object).await,
            "payment_intent.canceled" => self.handle_intent_canceled(&event.object).await,
            "charge.refunded" => self.handle_charge_refunded(&event.object).await,
            other => {
                info!(event_type = %other, "Unhandled webhook event type");
                Ok(())
            }
        }
    }

    async fn handle_intent_succeeded(&self, object: &Value) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let intent_id = required_str(object, "id")?;
        let charge_id = object
            .get("latest_charge")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let txn = db.begin().await?;
        let payment_model = find_payment_by_intent(&txn, intent_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No payment recorded for intent {}", intent_id))
            })?;

        if payment_model.status == PaymentStatus::Succeeded
            || payment_model.status == PaymentStatus::Refunded
        {
            return Ok(());
        }

        let order_model = OrderEntity::find_by_id(payment_model.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Payment {} references missing order",
                    payment_model.id
                ))
            })?;

        let payment_id = payment_model.id;
        let order_id = order_model.id;
        let updated = apply_success(&txn, payment_model, order_model, charge_id).await?;
        txn.commit().await?;

        info!(payment_id = %updated.id, "Payment settled via webhook");
        self.emit(Event::PaymentSucceeded {
            payment_id,
            order_id,
        })
        .await;
        Ok(())
    }

    async fn handle_intent_failed(&self, object: &Value) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let intent_id = required_str(object, "id")?;
        let reason = object
            .get("last_payment_error")
            .and_then(|v| v.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("Payment failed")
            .to_string();

        let txn = db.begin().await?;
        // The provider may reference a payment this system never created.
        let Some(payment_model) = find_payment_by_intent(&txn, intent_id).await? else {
            info!(intent_id, "Failure webhook for unknown intent ignored");
            return Ok(());
        };
        if !matches!(
            payment_model.status,
            PaymentStatus::Pending | PaymentStatus::Processing
        ) {
            return Ok(());
        }

        let payment_id = payment_model.id;
        let order_id = payment_model.order_id;
        let mut active: PaymentActiveModel = payment_model.into();
        active.status = Set(PaymentStatus::Failed);
        active.error_message = Set(Some(reason));
        active.updated_at = Set(Some(Utc::now()));
        active.update(&txn).await?;

        mark_order_payment_failed(&txn, order_id).await?;
        txn.commit().await?;

        warn!(payment_id = %payment_id, "Payment failed via webhook");
        self.emit(Event::PaymentFailed {
            payment_id,
            order_id,
        })
        .await;
        Ok(())
    }

    async fn handle_intent_canceled(&self, object: &Value) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let intent_id = required_str(object, "id")?;

        let txn = db.begin().await?;
        let Some(payment_model) = find_payment_by_intent(&txn, intent_id).await? else {
            info!(intent_id, "Cancellation webhook for unknown intent ignored");
            return Ok(());
        };
        if !matches!(
            payment_model.status,
            PaymentStatus::Pending | PaymentStatus::Processing
        ) {
            return Ok(());
        }

        let order_id = payment_model.order_id;
        let mut active: PaymentActiveModel = payment_model.into();
        active.status = Set(PaymentStatus::Cancelled);
        active.error_message = Set(Some("Payment intent was canceled".to_string()));
        active.updated_at = Set(Some(Utc::now()));
        active.update(&txn).await?;

        // An abandoned intent also abandons the order, but only while it is
        // still waiting; a confirmed order survives a stray cancellation.
        let mut order_cancelled = false;
        if let Some(order_model) = OrderEntity::find_by_id(order_id).one(&txn).await? {
            let version = order_model.version;
            order_cancelled = order_model.status == OrderStatus::Pending;
            let mut order_active: OrderActiveModel = order_model.into();
            order_active.payment_status = Set(OrderPaymentStatus::Failed);
            if order_cancelled {
                order_active.status = Set(OrderStatus::Cancelled);
            }
            order_active.updated_at = Set(Some(Utc::now()));
            order_active.version = Set(version + 1);
            order_active.update(&txn).await?;
        }

        txn.commit().await?;
        if order_cancelled {
            self.emit(Event::OrderCancelled(order_id)).await;
        }
        Ok(())
    }

    /// Settles refunds the charge reports. The charge object carries the
    /// provider's refund ids; only refunds we already issued and can match
    /// by id are flipped, unknown ids are ignored rather than synthesized.
    async fn handle_charge_refunded(&self, object: &Value) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let charge_id = required_str(object, "id")?;

        let txn = db.begin().await?;
        let payment_model = PaymentEntity::find()
            .filter(payment::Column::ProviderChargeId.eq(charge_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No payment recorded for charge {}", charge_id))
            })?;

        let provider_refund_ids: Vec<&str> = object
            .get("refunds")
            .and_then(|v| v.get("data"))
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("id").and_then(|v| v.as_str()))
                    .collect()
            })
            .unwrap_or_default();

        let mut settled = 0usize;
        for provider_refund_id in provider_refund_ids {
            let refund_model = RefundEntity::find()
                .filter(refund::Column::PaymentId.eq(payment_model.id))
                .filter(refund::Column::ProviderRefundId.eq(provider_refund_id))
                .one(&txn)
                .await?;
            let Some(refund_model) = refund_model else {
                warn!(provider_refund_id, "Charge reports a refund we never issued");
                continue;
            };
            if refund_model.status != RefundStatus::Pending {
                continue;
            }
            let now = Utc::now();
            let mut active: RefundActiveModel = refund_model.into();
            active.status = Set(RefundStatus::Succeeded);
            active.refunded_at = Set(Some(now));
            active.updated_at = Set(Some(now));
            active.update(&txn).await?;
            settled += 1;
        }

        txn.commit().await?;
        info!(payment_id = %payment_model.id, settled, "Refunds settled via webhook");
        Ok(())
    }

    async fn emit(&self, event: Event) {
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, "Failed to send webhook event");
            }
        }
    }
}

fn required_str<'a>(object: &'a Value, key: &str) -> Result<&'a str, ServiceError> {
    object
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ServiceError::InvalidInput(format!("Event object missing {}", key)))
}

async fn mark_order_payment_failed<C>(db: &C, order_id: Uuid) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    if let Some(order_model) = OrderEntity::find_by_id(order_id).one(db).await? {
        let version = order_model.version;
        let mut order_active: OrderActiveModel = order_model.into();
        order_active.payment_status = Set(OrderPaymentStatus::Failed);
        order_active.updated_at = Set(Some(Utc::now()));
        order_active.version = Set(version + 1);
        order_active.update(db).await?;
    }
    Ok(())
}

async fn find_payment_by_intent<C>(
    db: &C,
    intent_id: &str,
) -> Result<Option<PaymentModel>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(PaymentEntity::find()
        .filter(payment::Column::ProviderIntentId.eq(intent_id))
        .one(db)
        .await?)
}
