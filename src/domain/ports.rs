use super::order::{NewOrder, Order, OrderStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Message subjects this service listens on and calls out to. The names are
/// the contract with the gateway, the catalog and the payment provider.
pub mod subject {
    pub const CREATE_ORDER: &str = "create_order";
    pub const FIND_ALL_ORDERS: &str = "find_all_orders";
    pub const FIND_ORDER: &str = "find_order";
    pub const FIND_ORDERS_BY_STATUS: &str = "find_orders_by_status";
    pub const CHANGE_ORDER_STATUS: &str = "change_order_status";
    pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";
    pub const VALIDATE_PRODUCTS: &str = "validate_products";
    pub const CREATE_PAYMENT_SESSION: &str = "create.payment.session";
}

/// One message as delivered by the bus. `reply_to` is set for request/reply
/// deliveries; replying means publishing to that subject.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub subject: String,
    pub payload: Vec<u8>,
    pub reply_to: Option<String>,
}

/// Error reply envelope used on request/reply subjects, in both directions:
/// the listener serializes failures into it and outbound requests detect it
/// in collaborator replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub status: u16,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("no responders on {0}")]
    NoResponders(String),

    #[error("request on {0} timed out")]
    Timeout(String),

    #[error("empty reply on {0}")]
    EmptyReply(String),

    #[error("bus is closed")]
    Closed,

    #[error("transport failure on {subject}")]
    Transport {
        subject: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Broker abstraction the orchestrator and listener run on.
///
/// `request` is the synchronous leg: send one message, await exactly one
/// reply or fail. `publish`/`subscribe` are fire-and-forget events with
/// at-least-once, unordered delivery; subscribers must tolerate duplicates.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn request(&self, subject: &str, payload: Vec<u8>) -> Result<Vec<u8>, BusError>;

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;

    async fn subscribe(&self, subject: &str) -> Result<BoxStream<'static, Delivery>, BusError>;

    /// Flushes in-flight messages and tears the connection down.
    async fn close(&self) -> Result<(), BusError>;
}

pub type SharedBus = Arc<dyn MessageBus>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("order {0} not found")]
    NotFound(String),

    /// Compare-and-swap failure: the order's status moved between the
    /// caller's read and this write.
    #[error("order {id} status changed concurrently")]
    StatusRaced { id: String },

    /// The order is already paid under a different provider charge id.
    #[error("order {id} already settled with charge {charge_id}")]
    AlreadySettled { id: String, charge_id: String },

    #[error("order record codec failure")]
    Codec(#[from] serde_json::Error),

    #[error("storage backend failure")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Outcome of a settle call. `already_settled` marks a duplicate delivery of
/// the same payment notification, applied as a no-op.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub order: Order,
    pub already_settled: bool,
}

/// Persistence for orders and their line items.
///
/// Implementations guarantee per-order atomicity only: `create` writes the
/// order and all items in one shot, `update_status` and `settle` are atomic
/// read-modify-write on a single order. Nothing spans orders or services.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new order with its items, assigning id and timestamps.
    async fn create(&self, order: NewOrder) -> Result<Order, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Order>, StoreError>;

    async fn count(&self, status: Option<OrderStatus>) -> Result<u64, StoreError>;

    /// Lists orders in creation order, optionally filtered by status,
    /// sliced by offset/limit.
    async fn list(
        &self,
        status: Option<OrderStatus>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Order>, StoreError>;

    /// Conditional status update: succeeds only while the stored status
    /// still equals `expected`.
    async fn update_status(
        &self,
        id: &str,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order, StoreError>;

    /// Marks the order paid and creates its receipt in one atomic update.
    /// Idempotent on `charge_id`: a repeat of the same charge returns the
    /// stored order with `already_settled` set instead of re-applying.
    async fn settle(
        &self,
        id: &str,
        charge_id: &str,
        receipt_url: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<Settlement, StoreError>;
}

pub type SharedOrderStore = Arc<dyn OrderStore>;
