use crate::domain::order::{
    CatalogProduct, NewOrder, Order, OrderDetails, OrderStatus, RequestedItem,
};
use crate::domain::ports::{
    subject, BusError, ErrorReply, MessageBus, OrderStore, SharedBus, SharedOrderStore,
    Settlement, StoreError,
};
use crate::error::{OrderError, Result};
use crate::pagination::{PageRequest, Paged};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Reply to a successful create: the enriched order plus the provider's
/// payment session object, passed through verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedOrder {
    pub order: OrderDetails,
    pub payment_session: serde_json::Value,
}

/// Payload for `create.payment.session`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentSessionRequest {
    order_id: String,
    currency: String,
    items: Vec<PaymentSessionItem>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PaymentSessionItem {
    name: String,
    price: Decimal,
    quantity: u32,
}

/// Coordinates the order workflow across the catalog, the order store and
/// the payment provider.
///
/// The collaborators are long-lived handles passed in at construction; the
/// orchestrator itself holds no connection state and no locks.
pub struct OrderOrchestrator {
    store: SharedOrderStore,
    bus: SharedBus,
}

impl OrderOrchestrator {
    pub fn new(store: SharedOrderStore, bus: SharedBus) -> Self {
        Self { store, bus }
    }

    /// Creates an order from the requested items and opens a payment
    /// session for it.
    ///
    /// The catalog prices every item; totals are fixed here and never
    /// recomputed. The order and its items are persisted in one atomic
    /// write before the payment provider is involved, so a session failure
    /// leaves a PENDING order behind; that case surfaces as
    /// [`OrderError::PaymentSessionFailed`] naming the persisted order
    /// rather than rolling anything back.
    pub async fn create(&self, items: Vec<RequestedItem>) -> Result<CreatedOrder> {
        let product_ids = dedupe_product_ids(&items);
        let catalog = self.validate_products(product_ids).await?;

        let new_order = NewOrder::price(&items, &catalog)
            .map_err(|product_id| OrderError::DataIntegrity { product_id })?;

        let order = self.store.create(new_order).await.map_err(storage)?;
        info!(order_id = %order.id, total_amount = %order.total_amount, "order created");

        let details = OrderDetails::join(order, &catalog)
            .map_err(|product_id| OrderError::DataIntegrity { product_id })?;

        let payment_session = match self.open_payment_session(&details).await {
            Ok(session) => session,
            Err(source) => {
                return Err(OrderError::PaymentSessionFailed {
                    order_id: details.id.clone(),
                    source: Box::new(source),
                });
            }
        };

        Ok(CreatedOrder {
            order: details,
            payment_session,
        })
    }

    /// Fetches one order and joins current display names from the catalog.
    ///
    /// The join is a live read against the catalog, so this fails with an
    /// upstream error when the catalog is unreachable even though the order
    /// itself is intact. That coupling is confined to the read paths that
    /// actually need names.
    pub async fn find_one(&self, id: &str) -> Result<OrderDetails> {
        let order = self
            .store
            .get(id)
            .await
            .map_err(storage)?
            .ok_or_else(|| OrderError::NotFound(id.to_string()))?;
        self.attach_names(order).await
    }

    pub async fn find_all(
        &self,
        page: PageRequest,
        status: Option<OrderStatus>,
    ) -> Result<Paged<Order>> {
        let total_items = self.store.count(status).await.map_err(storage)?;
        let data = self
            .store
            .list(status, page.offset(), page.limit())
            .await
            .map_err(storage)?;
        Ok(page.paged(data, total_items))
    }

    /// Thin alias of [`find_all`](Self::find_all); the status filter does
    /// the work.
    pub async fn find_by_status(
        &self,
        page: PageRequest,
        status: Option<OrderStatus>,
    ) -> Result<Paged<Order>> {
        self.find_all(page, status).await
    }

    /// Moves an order to a caller-supplied status.
    ///
    /// Requesting the status the order already has is a conflict. The write
    /// is a compare-and-swap against the status read here, so a concurrent
    /// transition fails instead of being silently overwritten. No catalog
    /// round-trip happens on this path; a status change must not depend on
    /// the catalog being up.
    pub async fn change_status(&self, id: &str, status: OrderStatus) -> Result<Order> {
        let order = self
            .store
            .get(id)
            .await
            .map_err(storage)?
            .ok_or_else(|| OrderError::NotFound(id.to_string()))?;

        if order.status == status {
            return Err(OrderError::Conflict {
                id: id.to_string(),
                status,
            });
        }

        let updated = self
            .store
            .update_status(id, order.status, status)
            .await
            .map_err(storage)?;
        info!(order_id = %id, status = %updated.status, "order status changed");
        Ok(updated)
    }

    /// Applies a payment-succeeded notification.
    ///
    /// Invoked from the event path, so there is no caller to answer to; the
    /// listener logs failures. Settlement is idempotent on the provider
    /// charge id: at-least-once delivery means the same notification can
    /// arrive twice, and the repeat is a no-op.
    pub async fn settle(
        &self,
        order_id: &str,
        provider_charge_id: &str,
        receipt_url: &str,
    ) -> Result<Settlement> {
        info!(order_id, provider_charge_id, "processing payment notification");

        let settlement = self
            .store
            .settle(order_id, provider_charge_id, receipt_url, Utc::now())
            .await
            .map_err(storage)?;

        if settlement.already_settled {
            info!(order_id, provider_charge_id, "duplicate payment notification ignored");
        } else {
            info!(order_id, provider_charge_id, "order settled");
        }
        Ok(settlement)
    }

    async fn attach_names(&self, order: Order) -> Result<OrderDetails> {
        let product_ids = order.items.iter().map(|i| i.product_id).collect::<Vec<_>>();
        let catalog = self.validate_products(dedupe(product_ids)).await?;
        OrderDetails::join(order, &catalog)
            .map_err(|product_id| OrderError::DataIntegrity { product_id })
    }

    /// Round-trip to the catalog. An empty reply means one or more products
    /// are unavailable and is rejected here for every caller.
    async fn validate_products(&self, product_ids: Vec<i64>) -> Result<Vec<CatalogProduct>> {
        let catalog: Vec<CatalogProduct> = self
            .request_json(subject::VALIDATE_PRODUCTS, &product_ids)
            .await?;
        if catalog.is_empty() {
            return Err(OrderError::UpstreamInvalid {
                subject: subject::VALIDATE_PRODUCTS.to_string(),
                message: "one or more products are unavailable".to_string(),
            });
        }
        Ok(catalog)
    }

    async fn open_payment_session(&self, order: &OrderDetails) -> Result<serde_json::Value> {
        let request = PaymentSessionRequest {
            order_id: order.id.clone(),
            currency: "usd".to_string(),
            items: order
                .items
                .iter()
                .map(|item| PaymentSessionItem {
                    name: item.name.clone(),
                    price: item.price,
                    quantity: item.quantity,
                })
                .collect(),
        };
        self.request_json(subject::CREATE_PAYMENT_SESSION, &request)
            .await
    }

    /// Serializes, sends, and decodes one request/reply round-trip.
    ///
    /// Transport failures (timeout, no responders, broken connection) all
    /// surface as `UpstreamUnavailable`; an error envelope in the reply
    /// surfaces as `UpstreamInvalid` carrying the collaborator's message.
    async fn request_json<Req, Resp>(&self, subj: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(request).map_err(|source| OrderError::Codec {
            subject: subj.to_string(),
            source,
        })?;

        let reply = self.bus.request(subj, payload).await.map_err(|err| match err {
            BusError::EmptyReply(_) => OrderError::UpstreamInvalid {
                subject: subj.to_string(),
                message: "empty reply".to_string(),
            },
            other => OrderError::UpstreamUnavailable {
                subject: subj.to_string(),
                source: other,
            },
        })?;

        if let Ok(envelope) = serde_json::from_slice::<ErrorReply>(&reply) {
            return Err(OrderError::UpstreamInvalid {
                subject: subj.to_string(),
                message: envelope.message,
            });
        }

        serde_json::from_slice(&reply).map_err(|source| OrderError::Codec {
            subject: subj.to_string(),
            source,
        })
    }
}

fn dedupe_product_ids(items: &[RequestedItem]) -> Vec<i64> {
    dedupe(items.iter().map(|i| i.product_id).collect())
}

fn dedupe(mut ids: Vec<i64>) -> Vec<i64> {
    ids.sort_unstable();
    ids.dedup();
    ids
}

fn storage(err: StoreError) -> OrderError {
    match err {
        StoreError::NotFound(id) => OrderError::NotFound(id),
        StoreError::StatusRaced { id } => OrderError::ConcurrentUpdate { id },
        other => OrderError::Storage(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_product_ids() {
        let items = [
            RequestedItem {
                product_id: 3,
                quantity: 1,
            },
            RequestedItem {
                product_id: 1,
                quantity: 2,
            },
            RequestedItem {
                product_id: 3,
                quantity: 5,
            },
        ];
        assert_eq!(dedupe_product_ids(&items), vec![1, 3]);
    }

    #[test]
    fn test_storage_mapping_preserves_not_found() {
        let err = storage(StoreError::NotFound("o-1".to_string()));
        assert!(matches!(err, OrderError::NotFound(id) if id == "o-1"));

        let err = storage(StoreError::StatusRaced {
            id: "o-2".to_string(),
        });
        assert!(matches!(err, OrderError::ConcurrentUpdate { id } if id == "o-2"));
    }
}
