use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an order.
///
/// Only `Pending` and `Paid` are driven by this service; `Delivered` and
/// `Cancelled` exist so callers can move orders through the rest of the
/// lifecycle via `change_order_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Delivered,
    Cancelled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// A line item as requested by the caller, before pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedItem {
    pub product_id: i64,
    pub quantity: u32,
}

/// A persisted line item. The price is snapshotted at creation time and
/// never re-read from the catalog; the display name is deliberately NOT
/// stored and gets re-joined from the catalog on every read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: i64,
    pub quantity: u32,
    pub price: Decimal,
}

impl OrderItem {
    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

/// One element of the catalog's `validate_products` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub id: i64,
    pub name: String,
    pub price: Decimal,
}

/// Receipt sub-record, created exactly once at settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub receipt_url: String,
    pub created_at: DateTime<Utc>,
}

/// The order record as the store keeps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    #[serde(rename = "orderItems")]
    pub items: Vec<OrderItem>,
    pub total_amount: Decimal,
    pub total_items: u32,
    pub status: OrderStatus,
    pub paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub provider_charge_id: Option<String>,
    pub receipt: Option<Receipt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the orchestrator hands to the store: priced items plus the totals
/// fixed at creation time. The store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub items: Vec<OrderItem>,
    pub total_amount: Decimal,
    pub total_items: u32,
}

impl NewOrder {
    /// Prices the requested items against a catalog reply and computes the
    /// totals. Returns the offending product id when the reply does not
    /// cover a requested item; the caller treats that as a data-integrity
    /// failure since the reply is untrusted.
    pub fn price(requested: &[RequestedItem], catalog: &[CatalogProduct]) -> Result<Self, i64> {
        let mut items = Vec::with_capacity(requested.len());
        for line in requested {
            let product = catalog
                .iter()
                .find(|p| p.id == line.product_id)
                .ok_or(line.product_id)?;
            items.push(OrderItem {
                product_id: line.product_id,
                quantity: line.quantity,
                price: product.price,
            });
        }
        let total_amount = items.iter().map(OrderItem::line_total).sum();
        let total_items = items.iter().map(|i| i.quantity).sum();
        Ok(Self {
            items,
            total_amount,
            total_items,
        })
    }
}

/// A line item enriched with its current display name for replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricedItem {
    pub product_id: i64,
    pub quantity: u32,
    pub price: Decimal,
    pub name: String,
}

/// Read model returned by create and find_order: the order with display
/// names joined in from the catalog. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetails {
    pub id: String,
    #[serde(rename = "orderItems")]
    pub items: Vec<PricedItem>,
    pub total_amount: Decimal,
    pub total_items: u32,
    pub status: OrderStatus,
    pub paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub provider_charge_id: Option<String>,
    pub receipt: Option<Receipt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderDetails {
    /// Joins display names onto a stored order. Returns the product id that
    /// the catalog reply failed to cover, if any.
    pub fn join(order: Order, catalog: &[CatalogProduct]) -> Result<Self, i64> {
        let mut items = Vec::with_capacity(order.items.len());
        for item in &order.items {
            let product = catalog
                .iter()
                .find(|p| p.id == item.product_id)
                .ok_or(item.product_id)?;
            items.push(PricedItem {
                product_id: item.product_id,
                quantity: item.quantity,
                price: item.price,
                name: product.name.clone(),
            });
        }
        Ok(Self {
            id: order.id,
            items,
            total_amount: order.total_amount,
            total_items: order.total_items,
            status: order.status,
            paid: order.paid,
            paid_at: order.paid_at,
            provider_charge_id: order.provider_charge_id,
            receipt: order.receipt,
            created_at: order.created_at,
            updated_at: order.updated_at,
        })
    }
}
