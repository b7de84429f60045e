pub mod orders;
pub mod payment_webhooks;
pub mod payments;
pub mod products;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::provider::PaymentProvider;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<crate::services::catalog::CatalogService>,
    pub order: Arc<crate::services::orders::OrderService>,
    pub payment: Arc<crate::services::payments::PaymentService>,
    pub refund: Arc<crate::services::refunds::RefundService>,
    pub webhook: Arc<crate::services::webhooks::WebhookService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        provider: Arc<dyn PaymentProvider>,
        currency: String,
    ) -> Self {
        let catalog = Arc::new(crate::services::catalog::CatalogService::new(
            db_pool.clone(),
        ));
        let order = Arc::new(crate::services::orders::OrderService::new(
            db_pool.clone(),
            Some(event_sender.clone()),
            currency,
        ));
        let payment = Arc::new(crate::services::payments::PaymentService::new(
            db_pool.clone(),
            Some(event_sender.clone()),
            provider.clone(),
        ));
        let refund = Arc::new(crate::services::refunds::RefundService::new(
            db_pool.clone(),
            Some(event_sender.clone()),
            provider,
        ));
        let webhook = Arc::new(crate::services::webhooks::WebhookService::new(
            db_pool,
            Some(event_sender),
        ));

        Self {
            catalog,
            order,
            payment,
            refund,
            webhook,
        }
    }
}
