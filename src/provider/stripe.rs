use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, instrument};

use crate::errors::ServiceError;

use super::{
    CreateIntentRequest, CreateRefundRequest, IntentStatus, PaymentProvider, ProviderCustomer,
    ProviderIntent, ProviderRefund,
};

/// Thin Stripe REST client. Only the calls the payment services need;
/// everything else the integration does flows in through webhooks.
#[derive(Debug, Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl StripeClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }

    async fn check(&self, resp: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<StripeErrorEnvelope>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        error!("Stripe call failed: status={} detail={}", status, detail);
        Err(ServiceError::ProviderError(format!(
            "Provider returned {}: {}",
            status, detail
        )))
    }
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct IntentBody {
    id: String,
    status: String,
    client_secret: Option<String>,
    latest_charge: Option<String>,
    last_payment_error: Option<LastPaymentError>,
}

#[derive(Debug, Deserialize)]
struct LastPaymentError {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CustomerBody {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RefundBody {
    id: String,
    status: String,
}

impl From<IntentBody> for ProviderIntent {
    fn from(body: IntentBody) -> Self {
        ProviderIntent {
            status: IntentStatus::from_provider(&body.status),
            intent_id: body.id,
            client_secret: body.client_secret,
            charge_id: body.latest_charge,
            failure_message: body.last_payment_error.and_then(|e| e.message),
        }
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    #[instrument(skip(self, email, name))]
    async fn create_customer(
        &self,
        email: Option<String>,
        name: Option<String>,
    ) -> Result<ProviderCustomer, ServiceError> {
        let mut form: Vec<(&str, String)> = Vec::new();
        if let Some(email) = email {
            form.push(("email", email));
        }
        if let Some(name) = name {
            form.push(("name", name));
        }

        let resp = self
            .http
            .post(format!("{}/customers", self.base_url))
            .basic_auth(&self.api_key, None::<&str>)
            .form(&form)
            .send()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("Provider unreachable: {}", e)))?;

        let body: CustomerBody = self
            .check(resp)
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("Malformed provider reply: {}", e)))?;
        Ok(ProviderCustomer {
            customer_id: body.id,
        })
    }

    #[instrument(skip(self), fields(order_id = %req.order_id))]
    async fn create_intent(
        &self,
        req: CreateIntentRequest,
    ) -> Result<ProviderIntent, ServiceError> {
        let amount = req.amount_minor.to_string();
        let mut form: Vec<(&str, &str)> = vec![
            ("amount", amount.as_str()),
            ("currency", req.currency.as_str()),
            ("automatic_payment_methods[enabled]", "true"),
            ("metadata[order_id]", req.order_id.as_str()),
        ];
        if let Some(customer) = req.customer_id.as_deref() {
            form.push(("customer", customer));
        }
        if let Some(email) = req.customer_email.as_deref() {
            form.push(("receipt_email", email));
        }

        let resp = self
            .http
            .post(format!("{}/payment_intents", self.base_url))
            .basic_auth(&self.api_key, None::<&str>)
            .form(&form)
            .send()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("Provider unreachable: {}", e)))?;

        let body: IntentBody = self
            .check(resp)
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("Malformed provider reply: {}", e)))?;
        Ok(body.into())
    }

    #[instrument(skip(self))]
    async fn retrieve_intent(&self, intent_id: &str) -> Result<ProviderIntent, ServiceError> {
        let resp = self
            .http
            .get(format!("{}/payment_intents/{}", self.base_url, intent_id))
            .basic_auth(&self.api_key, None::<&str>)
            .send()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("Provider unreachable: {}", e)))?;

        let body: IntentBody = self
            .check(resp)
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("Malformed provider reply: {}", e)))?;
        Ok(body.into())
    }

    #[instrument(skip(self))]
    async fn create_refund(
        &self,
        req: CreateRefundRequest,
    ) -> Result<ProviderRefund, ServiceError> {
        let mut form: Vec<(&str, String)> =
            vec![("payment_intent", req.intent_id.clone())];
        if let Some(amount) = req.amount_minor {
            form.push(("amount", amount.to_string()));
        }
        if let Some(reason) = req.reason {
            form.push(("reason", reason));
        }

        let resp = self
            .http
            .post(format!("{}/refunds", self.base_url))
            .basic_auth(&self.api_key, None::<&str>)
            .form(&form)
            .send()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("Provider unreachable: {}", e)))?;

        let body: RefundBody = self
            .check(resp)
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::ProviderError(format!("Malformed provider reply: {}", e)))?;
        Ok(ProviderRefund {
            refund_id: body.id,
            status: body.status,
        })
    }
}
