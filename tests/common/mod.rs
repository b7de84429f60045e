use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use rust_decimal::Decimal;
use serde_json::Value;
use storefront_api::errors::ServiceError;
use storefront_api::{
    auth::issue_token,
    config::AppConfig,
    db,
    events::{self, EventSender},
    handlers::AppServices,
    provider::{
        CreateIntentRequest, CreateRefundRequest, IntentStatus, PaymentProvider, ProviderCustomer,
        ProviderIntent, ProviderRefund,
    },
    services::catalog::{CreateProductRequest, ProductResponse},
    services::orders::{CreateOrderRequest, OrderItemRequest, OrderResponse},
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Scripted stand-in for the payment provider. Intents start out awaiting a
/// payment method; tests drive them to their final state before confirming.
pub struct FakeProvider {
    intents: Mutex<HashMap<String, ProviderIntent>>,
    refund_status: Mutex<String>,
    counter: AtomicU64,
    calls: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            intents: Mutex::new(HashMap::new()),
            refund_status: Mutex::new("succeeded".to_string()),
            counter: AtomicU64::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    /// Calls made so far, in order.
    #[allow(dead_code)]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Mark an intent as succeeded with a settled charge attached.
    #[allow(dead_code)]
    pub fn settle_intent(&self, intent_id: &str, charge_id: &str) {
        let mut intents = self.intents.lock().unwrap();
        if let Some(intent) = intents.get_mut(intent_id) {
            intent.status = IntentStatus::Succeeded;
            intent.charge_id = Some(charge_id.to_string());
        }
    }

    #[allow(dead_code)]
    pub fn set_intent_status(&self, intent_id: &str, status: IntentStatus) {
        let mut intents = self.intents.lock().unwrap();
        if let Some(intent) = intents.get_mut(intent_id) {
            intent.status = status;
        }
    }

    /// Status stamped on refunds created from here on.
    #[allow(dead_code)]
    pub fn set_refund_status(&self, status: &str) {
        *self.refund_status.lock().unwrap() = status.to_string();
    }

    /// Attach a failure reason to an intent, as the provider would after a
    /// declined attempt.
    #[allow(dead_code)]
    pub fn set_failure_message(&self, intent_id: &str, message: &str) {
        let mut intents = self.intents.lock().unwrap();
        if let Some(intent) = intents.get_mut(intent_id) {
            intent.failure_message = Some(message.to_string());
        }
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    async fn create_customer(
        &self,
        _email: Option<String>,
        _name: Option<String>,
    ) -> Result<ProviderCustomer, ServiceError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let customer_id = format!("cus_test_{}", n);
        self.record(format!("create_customer {}", customer_id));
        Ok(ProviderCustomer { customer_id })
    }

    async fn create_intent(
        &self,
        req: CreateIntentRequest,
    ) -> Result<ProviderIntent, ServiceError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let intent_id = format!("pi_test_{}", n);
        self.record(format!(
            "create_intent {} {} {}",
            intent_id, req.amount_minor, req.currency
        ));
        let intent = ProviderIntent {
            intent_id: intent_id.clone(),
            client_secret: Some(format!("{}_secret_{}", intent_id, n)),
            status: IntentStatus::RequiresPaymentMethod,
            charge_id: None,
            failure_message: None,
        };
        self.intents
            .lock()
            .unwrap()
            .insert(intent_id, intent.clone());
        Ok(intent)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<ProviderIntent, ServiceError> {
        self.record(format!("retrieve_intent {}", intent_id));
        self.intents
            .lock()
            .unwrap()
            .get(intent_id)
            .cloned()
            .ok_or_else(|| ServiceError::ProviderError(format!("No such intent: {}", intent_id)))
    }

    async fn create_refund(
        &self,
        req: CreateRefundRequest,
    ) -> Result<ProviderRefund, ServiceError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let refund_id = format!("re_test_{}", n);
        self.record(format!("create_refund {} {}", req.intent_id, refund_id));
        Ok(ProviderRefund {
            refund_id,
            status: self.refund_status.lock().unwrap().clone(),
        })
    }
}

/// Helper harness spinning up application state against a throwaway SQLite
/// file and the scripted provider.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub provider: Arc<FakeProvider>,
    pub customer_id: Uuid,
    token: String,
    _db_dir: tempfile::TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::build(None).await
    }

    /// Same as [`TestApp::new`] but with webhook signature verification on.
    #[allow(dead_code)]
    pub async fn with_webhook_secret(secret: &str) -> Self {
        Self::build(Some(secret.to_string())).await
    }

    async fn build(webhook_secret: Option<String>) -> Self {
        let db_dir = tempfile::tempdir().expect("create temp dir for test database");
        let db_file = db_dir.path().join("storefront_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_file.display()),
            "redis://127.0.0.1:6379".to_string(),
            "test_secret_key_for_testing_purposes_only_32chars".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.payment_webhook_secret = webhook_secret;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::ensure_schema(&pool)
            .await
            .expect("failed to create schema in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let provider = Arc::new(FakeProvider::new());
        let services = AppServices::new(
            db_arc.clone(),
            Arc::new(event_sender.clone()),
            provider.clone(),
            cfg.default_currency.clone(),
        );

        let redis_client = Arc::new(
            redis::Client::open(cfg.redis_url.clone()).expect("invalid redis url for tests"),
        );

        let state = AppState {
            db: db_arc,
            config: cfg.clone(),
            event_sender,
            services,
            redis: redis_client,
        };

        let customer_id = Uuid::new_v4();
        let token = issue_token(
            &cfg.jwt_secret,
            customer_id,
            Some("test@example.com".to_string()),
            Some("Test Customer".to_string()),
            60,
        )
        .expect("issue access token for tests");

        let router = Router::new()
            .nest("/api/v1", storefront_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            provider,
            customer_id,
            token,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    /// Access the bearer token for the default test customer.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Convenience helper for authenticated JSON requests.
    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(self.token())).await
    }

    /// Raw-body request with custom headers, for webhook deliveries.
    #[allow(dead_code)]
    pub async fn request_raw(
        &self,
        method: Method,
        uri: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        builder = builder.header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let request = builder
            .body(Body::from(body))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_product(&self, name: &str, price: Decimal) -> ProductResponse {
        self.state
            .services
            .catalog
            .create_product(CreateProductRequest {
                name: name.to_string(),
                description: Some("Seeded for integration tests".to_string()),
                price,
            })
            .await
            .expect("seed product for tests")
    }

    /// Create an order for the default test customer through the service.
    pub async fn create_order(&self, items: &[(Uuid, i32)]) -> OrderResponse {
        self.state
            .services
            .order
            .create_order(
                self.customer_id,
                CreateOrderRequest {
                    items: items
                        .iter()
                        .map(|(product_id, quantity)| OrderItemRequest {
                            product_id: *product_id,
                            quantity: *quantity,
                        })
                        .collect(),
                    shipping_name: "Test Customer".to_string(),
                    shipping_address: "1 Test Street".to_string(),
                    shipping_city: "Testville".to_string(),
                    shipping_postal_code: "12345".to_string(),
                    shipping_country: "US".to_string(),
                    notes: None,
                },
            )
            .await
            .expect("create order for tests")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}
