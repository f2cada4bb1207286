//! Wire shapes for the inbound subjects. Field names are camelCase to match
//! the gateway and the payment provider.

use crate::domain::order::{OrderStatus, RequestedItem};
use crate::pagination::PageRequest;
use serde::{Deserialize, Serialize};

/// `create_order` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub items: Vec<RequestedItem>,
}

/// `find_all_orders` and `find_orders_by_status` payload: pagination plus an
/// optional status filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPagination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
}

impl OrderPagination {
    pub fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}

/// `change_order_status` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeOrderStatus {
    pub id: String,
    pub status: OrderStatus,
}

/// `payment.succeeded` event payload from the payment provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSucceeded {
    pub order_id: String,
    pub provider_charge_id: String,
    pub receipt_url: String,
}
