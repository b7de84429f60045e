pub mod order;
pub mod order_item;
pub mod payment;
pub mod product;
pub mod refund;
pub mod webhook_event;
