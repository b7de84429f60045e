use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// Events emitted after state changes commit. Consumers must tolerate loss;
// the channel is not durable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated(Uuid),
    OrderCancelled(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },

    // Payment events
    PaymentIntentCreated {
        payment_id: Uuid,
        order_id: Uuid,
    },
    PaymentSucceeded {
        payment_id: Uuid,
        order_id: Uuid,
    },
    PaymentFailed {
        payment_id: Uuid,
        order_id: Uuid,
    },

    // Refund events
    RefundCreated {
        refund_id: Uuid,
        payment_id: Uuid,
    },

    // Webhook events
    WebhookReceived {
        provider_event_id: String,
        event_type: String,
    },

    // Generic event for custom messages
    Generic {
        message: String,
        timestamp: DateTime<Utc>,
        metadata: serde_json::Value,
    },
}

impl Event {
    /// Create a generic event with string data
    pub fn with_data(data: String) -> Self {
        Event::Generic {
            message: data,
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
}

// Drains the event channel and logs each event. Side effects beyond logging
// (notification emails, analytics) hang off this loop.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!("Order created: {}", order_id);
            }
            Event::OrderCancelled(order_id) => {
                info!("Order cancelled: {}", order_id);
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(
                    "Order {} status changed: {} -> {}",
                    order_id, old_status, new_status
                );
            }
            Event::PaymentIntentCreated {
                payment_id,
                order_id,
            } => {
                info!(
                    "Payment intent created: payment={} order={}",
                    payment_id, order_id
                );
            }
            Event::PaymentSucceeded {
                payment_id,
                order_id,
            } => {
                info!(
                    "Payment succeeded: payment={} order={}",
                    payment_id, order_id
                );
            }
            Event::PaymentFailed {
                payment_id,
                order_id,
            } => {
                warn!("Payment failed: payment={} order={}", payment_id, order_id);
            }
            Event::RefundCreated {
                refund_id,
                payment_id,
            } => {
                info!(
                    "Refund created: refund={} payment={}",
                    refund_id, payment_id
                );
            }
            Event::WebhookReceived {
                provider_event_id,
                event_type,
            } => {
                info!(
                    "Webhook received: event={} type={}",
                    provider_event_id, event_type
                );
            }
            _ => {
                info!("No specific handler for event: {:?}", event);
            }
        }
    }

    warn!("Event processing loop has ended");
}
