use crate::{
    db::DbPool,
    entities::order::{
        self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
        OrderPaymentStatus, OrderStatus,
    },
    entities::order_item::{
        self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity,
        Model as OrderItemModel,
    },
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Request/Response types for the order service
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<OrderItemRequest>,
    #[validate(length(min = 1, max = 255, message = "Shipping name is required"))]
    pub shipping_name: String,
    #[validate(length(min = 1, max = 255, message = "Shipping address is required"))]
    pub shipping_address: String,
    #[validate(length(min = 1, max = 100, message = "Shipping city is required"))]
    pub shipping_city: String,
    #[validate(length(min = 1, max = 20, message = "Shipping postal code is required"))]
    pub shipping_postal_code: String,
    #[validate(length(min = 2, max = 2, message = "Shipping country must be a 2-letter code"))]
    pub shipping_country: String,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItemRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Option<Uuid>,
    pub product_name: String,
    pub quantity: i32,
    pub price_per_unit: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: OrderPaymentStatus,
    pub total_amount: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    /// Amount actually charged: total - discount + tax.
    pub final_amount: Decimal,
    pub currency: String,
    pub shipping_name: String,
    pub shipping_address: String,
    pub shipping_city: String,
    pub shipping_postal_code: String,
    pub shipping_country: String,
    pub notes: Option<String>,
    pub items: Vec<OrderItemResponse>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Service for managing the order lifecycle.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    currency: String,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        currency: String,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            currency,
        }
    }

    /// Creates an order for the customer, pricing every line from the
    /// current catalog and freezing name and unit price onto the items.
    #[instrument(skip(self, request), fields(customer_id = %customer_id))]
    pub async fn create_order(
        &self,
        customer_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;
        for item in &request.items {
            if item.quantity < 1 {
                return Err(ServiceError::ValidationError(
                    "Item quantity must be at least 1".to_string(),
                ));
            }
        }

        let db = &*self.db_pool;
        let order_id = Uuid::new_v4();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        // Resolve every product up front so a single bad line fails the
        // whole order before anything is written.
        let product_ids: Vec<Uuid> = request.items.iter().map(|i| i.product_id).collect();
        let products: HashMap<Uuid, product::Model> = ProductEntity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .filter(product::Column::IsActive.eq(true))
            .all(&txn)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let missing: BTreeSet<Uuid> = request
            .items
            .iter()
            .map(|i| i.product_id)
            .filter(|id| !products.contains_key(id))
            .collect();
        if !missing.is_empty() {
            let ids: Vec<String> = missing.iter().map(Uuid::to_string).collect();
            return Err(ServiceError::ValidationError(format!(
                "Products not found or not available: {}",
                ids.join(", ")
            )));
        }

        let mut total_amount = Decimal::ZERO;
        let mut item_models: Vec<OrderItemActiveModel> = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let product = products.get(&item.product_id).ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Product {} not found or not available",
                    item.product_id
                ))
            })?;
            let line_total = product.price * Decimal::from(item.quantity);
            total_amount += line_total;

            item_models.push(OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(Some(product.id)),
                product_name: Set(product.name.clone()),
                quantity: Set(item.quantity),
                price_per_unit: Set(product.price),
                total_price: Set(line_total),
                ..Default::default()
            });
        }

        // No promotions or tax computation yet, so the adjustment columns
        // are zero and the charged amount equals the item total.
        let discount_amount = Decimal::ZERO;
        let tax_amount = Decimal::ZERO;
        let final_amount = total_amount - discount_amount + tax_amount;

        let order_active_model = OrderActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number()),
            customer_id: Set(customer_id),
            status: Set(OrderStatus::Pending),
            payment_status: Set(OrderPaymentStatus::Pending),
            total_amount: Set(total_amount),
            discount_amount: Set(discount_amount),
            tax_amount: Set(tax_amount),
            final_amount: Set(final_amount),
            currency: Set(self.currency.clone()),
            shipping_name: Set(request.shipping_name),
            shipping_address: Set(request.shipping_address),
            shipping_city: Set(request.shipping_city),
            shipping_postal_code: Set(request.shipping_postal_code),
            shipping_country: Set(request.shipping_country.to_uppercase()),
            notes: Set(request.notes),
            ..Default::default()
        };

        let order_model = order_active_model.insert(&txn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to create order");
            ServiceError::from_db_err(e, "Order number already in use")
        })?;

        let mut items: Vec<OrderItemModel> = Vec::with_capacity(item_models.len());
        for item_model in item_models {
            items.push(item_model.insert(&txn).await?);
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit order creation");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, customer_id = %customer_id, total = %total_amount, "Order created");
        self.emit(Event::OrderCreated(order_id)).await;

        Ok(Self::model_to_response(order_model, items))
    }

    /// Retrieves one of the customer's orders with its items.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(
        &self,
        customer_id: Uuid,
        order_id: Uuid,
    ) -> Result<Option<OrderResponse>, ServiceError> {
        let db = &*self.db_pool;

        let order = OrderEntity::find_by_id(order_id)
            .filter(order::Column::CustomerId.eq(customer_id))
            .one(db)
            .await?;

        match order {
            Some(order_model) => {
                let items = self.load_items(order_model.id).await?;
                Ok(Some(Self::model_to_response(order_model, items)))
            }
            None => Ok(None),
        }
    }

    /// Lists the customer's orders with pagination, newest first.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn list_orders(
        &self,
        customer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let db = &*self.db_pool;

        let paginator = OrderEntity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        let mut order_responses = Vec::with_capacity(orders.len());
        for order_model in orders {
            let items = self.load_items(order_model.id).await?;
            order_responses.push(Self::model_to_response(order_model, items));
        }

        Ok(OrderListResponse {
            orders: order_responses,
            total,
            page,
            per_page,
        })
    }

    /// Cancels one of the customer's orders. Only reachable before shipping.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        customer_id: Uuid,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        let response = self
            .transition_order(order_id, Some(customer_id), OrderStatus::Cancelled, reason)
            .await?;
        self.emit(Event::OrderCancelled(order_id)).await;
        Ok(response)
    }

    /// Marks an order as shipped, stamping `shipped_at`.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_shipped(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        self.transition_order(order_id, None, OrderStatus::Shipped, None)
            .await
    }

    /// Marks a shipped order as delivered, stamping `delivered_at`.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_delivered(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        self.transition_order(order_id, None, OrderStatus::Delivered, None)
            .await
    }

    /// Shared status-machine transition. When `customer_id` is given the
    /// order must belong to that customer; absent rows and foreign rows are
    /// indistinguishable to the caller.
    async fn transition_order(
        &self,
        order_id: Uuid,
        customer_id: Option<Uuid>,
        new_status: OrderStatus,
        notes: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db_pool;
        let now = Utc::now();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to start transaction for status update");
            ServiceError::DatabaseError(e)
        })?;

        let mut query = OrderEntity::find_by_id(order_id);
        if let Some(customer_id) = customer_id {
            query = query.filter(order::Column::CustomerId.eq(customer_id));
        }
        let order_model = query.one(&txn).await?.ok_or_else(|| {
            warn!(order_id = %order_id, "Order not found for status update");
            ServiceError::NotFound("Order not found".to_string())
        })?;

        let old_status = order_model.status;
        if !old_status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidTransition(format!(
                "Cannot move order from {} to {}",
                old_status, new_status
            )));
        }

        let version = order_model.version;
        let mut order_active_model: OrderActiveModel = order_model.into();
        order_active_model.status = Set(new_status);
        order_active_model.updated_at = Set(Some(now));
        order_active_model.version = Set(version + 1);
        match new_status {
            OrderStatus::Shipped => order_active_model.shipped_at = Set(Some(now)),
            OrderStatus::Delivered => order_active_model.delivered_at = Set(Some(now)),
            _ => {}
        }
        if let Some(notes) = notes {
            order_active_model.notes = Set(Some(notes));
        }

        let updated_order = order_active_model.update(&txn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to update order status");
            ServiceError::DatabaseError(e)
        })?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to commit status update");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, old_status = %old_status, new_status = %new_status, "Order status updated");
        self.emit(Event::OrderStatusChanged {
            order_id,
            old_status: old_status.to_string(),
            new_status: new_status.to_string(),
        })
        .await;

        let items = self.load_items(order_id).await?;
        Ok(Self::model_to_response(updated_order, items))
    }

    async fn load_items(&self, order_id: Uuid) -> Result<Vec<OrderItemModel>, ServiceError> {
        let db = &*self.db_pool;
        Ok(OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(db)
            .await?)
    }

    async fn emit(&self, event: Event) {
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, "Failed to send order event");
            }
        }
    }

    fn model_to_response(model: OrderModel, items: Vec<OrderItemModel>) -> OrderResponse {
        OrderResponse {
            id: model.id,
            order_number: model.order_number,
            customer_id: model.customer_id,
            status: model.status,
            payment_status: model.payment_status,
            total_amount: super::to_money(model.total_amount),
            discount_amount: super::to_money(model.discount_amount),
            tax_amount: super::to_money(model.tax_amount),
            final_amount: super::to_money(model.final_amount),
            currency: model.currency,
            shipping_name: model.shipping_name,
            shipping_address: model.shipping_address,
            shipping_city: model.shipping_city,
            shipping_postal_code: model.shipping_postal_code,
            shipping_country: model.shipping_country,
            notes: model.notes,
            items: items
                .into_iter()
                .map(|item| OrderItemResponse {
                    id: item.id,
                    product_id: item.product_id,
                    product_name: item.product_name,
                    quantity: item.quantity,
                    price_per_unit: super::to_money(item.price_per_unit),
                    total_price: super::to_money(item.total_price),
                })
                .collect(),
            paid_at: model.paid_at,
            shipped_at: model.shipped_at,
            delivered_at: model.delivered_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Order numbers look like "ORD-20260829-4F2A1C". The random suffix keeps
/// them non-guessable; the unique index catches the rare collision.
fn generate_order_number() -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix: String = Uuid::new_v4().simple().to_string()[..6].to_uppercase();
    format!("ORD-{}-{}", date, suffix)
}
