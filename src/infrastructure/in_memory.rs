use crate::domain::order::{NewOrder, Order, OrderStatus, Receipt};
use crate::domain::ports::{
    BusError, Delivery, MessageBus, OrderStore, Settlement, StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// A thread-safe in-memory order store.
///
/// Orders live in a map guarded by one `RwLock`; holding the write guard
/// across a whole read-modify-write gives the per-order atomicity the
/// orchestrator relies on. Insertion order is tracked separately so listing
/// is deterministic.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    inner: Arc<RwLock<OrderTable>>,
}

#[derive(Default)]
struct OrderTable {
    orders: HashMap<String, Order>,
    insertion: Vec<String>,
}

impl InMemoryOrderStore {
    /// Creates a new, empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, order: NewOrder) -> Result<Order, StoreError> {
        let now = Utc::now();
        let record = Order {
            id: Uuid::new_v4().to_string(),
            items: order.items,
            total_amount: order.total_amount,
            total_items: order.total_items,
            status: OrderStatus::Pending,
            paid: false,
            paid_at: None,
            provider_charge_id: None,
            receipt: None,
            created_at: now,
            updated_at: now,
        };

        let mut table = self.inner.write().await;
        table.insertion.push(record.id.clone());
        table.orders.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<Order>, StoreError> {
        let table = self.inner.read().await;
        Ok(table.orders.get(id).cloned())
    }

    async fn count(&self, status: Option<OrderStatus>) -> Result<u64, StoreError> {
        let table = self.inner.read().await;
        let count = table
            .orders
            .values()
            .filter(|o| status.is_none_or(|s| o.status == s))
            .count();
        Ok(count as u64)
    }

    async fn list(
        &self,
        status: Option<OrderStatus>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Order>, StoreError> {
        let table = self.inner.read().await;
        let page = table
            .insertion
            .iter()
            .filter_map(|id| table.orders.get(id))
            .filter(|o| status.is_none_or(|s| o.status == s))
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(page)
    }

    async fn update_status(
        &self,
        id: &str,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order, StoreError> {
        let mut table = self.inner.write().await;
        let order = table
            .orders
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if order.status != expected {
            return Err(StoreError::StatusRaced { id: id.to_string() });
        }

        order.status = next;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn settle(
        &self,
        id: &str,
        charge_id: &str,
        receipt_url: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<Settlement, StoreError> {
        let mut table = self.inner.write().await;
        let order = table
            .orders
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if order.paid {
            // At-least-once delivery: the same charge arriving again is a
            // no-op, a different charge on a paid order is a hard fault.
            return match &order.provider_charge_id {
                Some(existing) if existing == charge_id => Ok(Settlement {
                    order: order.clone(),
                    already_settled: true,
                }),
                Some(existing) => Err(StoreError::AlreadySettled {
                    id: id.to_string(),
                    charge_id: existing.clone(),
                }),
                None => Err(StoreError::Backend(
                    format!("order {id} is paid but has no charge id").into(),
                )),
            };
        }

        order.status = OrderStatus::Paid;
        order.paid = true;
        order.paid_at = Some(paid_at);
        order.provider_charge_id = Some(charge_id.to_string());
        order.receipt = Some(Receipt {
            receipt_url: receipt_url.to_string(),
            created_at: paid_at,
        });
        order.updated_at = paid_at;

        Ok(Settlement {
            order: order.clone(),
            already_settled: false,
        })
    }
}

/// An in-process message bus over tokio channels.
///
/// Fan-out per subject mirrors broker semantics closely enough for tests and
/// single-process runs: `publish` delivers to every subscriber with no reply
/// expected, `request` delivers with a private `_INBOX.n` reply subject and
/// awaits the first reply within a bounded timeout.
pub struct InMemoryBus {
    topics: Arc<RwLock<HashMap<String, Vec<mpsc::UnboundedSender<Delivery>>>>>,
    inbox_seq: AtomicU64,
    request_timeout: Duration,
    closed: AtomicBool,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_request_timeout(Duration::from_secs(2))
    }

    pub fn with_request_timeout(request_timeout: Duration) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            inbox_seq: AtomicU64::new(0),
            request_timeout,
            closed: AtomicBool::new(false),
        }
    }

    async fn deliver(&self, subject: &str, delivery: Delivery) -> usize {
        let mut topics = self.topics.write().await;
        match topics.get_mut(subject) {
            Some(subscribers) => {
                // Drop subscribers whose receiving side is gone.
                subscribers.retain(|tx| tx.send(delivery.clone()).is_ok());
                subscribers.len()
            }
            None => 0,
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn request(&self, subject: &str, payload: Vec<u8>) -> Result<Vec<u8>, BusError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(BusError::Closed);
        }

        let reply_subject = format!(
            "_INBOX.{}",
            self.inbox_seq.fetch_add(1, Ordering::Relaxed)
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.topics
            .write()
            .await
            .insert(reply_subject.clone(), vec![tx]);

        let delivered = self
            .deliver(
                subject,
                Delivery {
                    subject: subject.to_string(),
                    payload,
                    reply_to: Some(reply_subject.clone()),
                },
            )
            .await;

        let outcome = if delivered == 0 {
            Err(BusError::NoResponders(subject.to_string()))
        } else {
            match tokio::time::timeout(self.request_timeout, rx.recv()).await {
                Err(_) => Err(BusError::Timeout(subject.to_string())),
                Ok(None) => Err(BusError::Closed),
                Ok(Some(reply)) if reply.payload.is_empty() => {
                    Err(BusError::EmptyReply(subject.to_string()))
                }
                Ok(Some(reply)) => Ok(reply.payload),
            }
        };

        self.topics.write().await.remove(&reply_subject);
        outcome
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(BusError::Closed);
        }
        // Fire-and-forget: delivering to nobody is not an error.
        self.deliver(
            subject,
            Delivery {
                subject: subject.to_string(),
                payload,
                reply_to: None,
            },
        )
        .await;
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<BoxStream<'static, Delivery>, BusError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(BusError::Closed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .write()
            .await
            .entry(subject.to_string())
            .or_default()
            .push(tx);

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (delivery, rx))
        });
        Ok(stream.boxed())
    }

    async fn close(&self) -> Result<(), BusError> {
        self.closed.store(true, Ordering::Relaxed);
        self.topics.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_order(quantity: u32) -> NewOrder {
        use crate::domain::order::OrderItem;
        let items = vec![OrderItem {
            product_id: 1,
            quantity,
            price: dec!(10),
        }];
        let total_amount = items.iter().map(OrderItem::line_total).sum();
        NewOrder {
            items,
            total_amount,
            total_items: quantity,
        }
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_pending_status() {
        let store = InMemoryOrderStore::new();
        let order = store.create(sample_order(2)).await.unwrap();

        assert!(!order.id.is_empty());
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(!order.paid);
        assert_eq!(order.total_amount, dec!(20));

        let fetched = store.get(&order.id).await.unwrap().unwrap();
        assert_eq!(fetched, order);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = InMemoryOrderStore::new();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_preserves_creation_order_and_slices() {
        let store = InMemoryOrderStore::new();
        let mut ids = Vec::new();
        for i in 1..=5 {
            ids.push(store.create(sample_order(i)).await.unwrap().id);
        }

        let page = store.list(None, 1, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, ids[1]);
        assert_eq!(page[1].id, ids[2]);

        let past_the_end = store.list(None, 10, 2).await.unwrap();
        assert!(past_the_end.is_empty());
    }

    #[tokio::test]
    async fn test_count_and_list_filter_by_status() {
        let store = InMemoryOrderStore::new();
        let first = store.create(sample_order(1)).await.unwrap();
        store.create(sample_order(1)).await.unwrap();
        store
            .settle(&first.id, "ch_1", "https://r.example/1", Utc::now())
            .await
            .unwrap();

        assert_eq!(store.count(None).await.unwrap(), 2);
        assert_eq!(store.count(Some(OrderStatus::Paid)).await.unwrap(), 1);
        assert_eq!(store.count(Some(OrderStatus::Pending)).await.unwrap(), 1);

        let paid = store
            .list(Some(OrderStatus::Paid), 0, 10)
            .await
            .unwrap();
        assert_eq!(paid.len(), 1);
        assert_eq!(paid[0].id, first.id);
    }

    #[tokio::test]
    async fn test_update_status_is_conditional() {
        let store = InMemoryOrderStore::new();
        let order = store.create(sample_order(1)).await.unwrap();

        let updated = store
            .update_status(&order.id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Cancelled);

        // Second writer still expecting PENDING loses the race.
        let raced = store
            .update_status(&order.id, OrderStatus::Pending, OrderStatus::Delivered)
            .await;
        assert!(matches!(raced, Err(StoreError::StatusRaced { .. })));
    }

    #[tokio::test]
    async fn test_update_status_missing_order() {
        let store = InMemoryOrderStore::new();
        let result = store
            .update_status("missing", OrderStatus::Pending, OrderStatus::Paid)
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_settle_writes_everything_once() {
        let store = InMemoryOrderStore::new();
        let order = store.create(sample_order(3)).await.unwrap();
        let paid_at = Utc::now();

        let settlement = store
            .settle(&order.id, "ch_1", "https://r.example/1", paid_at)
            .await
            .unwrap();
        assert!(!settlement.already_settled);

        let paid = settlement.order;
        assert_eq!(paid.status, OrderStatus::Paid);
        assert!(paid.paid);
        assert_eq!(paid.paid_at, Some(paid_at));
        assert_eq!(paid.provider_charge_id.as_deref(), Some("ch_1"));
        assert_eq!(
            paid.receipt.as_ref().map(|r| r.receipt_url.as_str()),
            Some("https://r.example/1")
        );
    }

    #[tokio::test]
    async fn test_settle_same_charge_twice_is_noop() {
        let store = InMemoryOrderStore::new();
        let order = store.create(sample_order(1)).await.unwrap();
        let first_paid_at = Utc::now();

        store
            .settle(&order.id, "ch_1", "https://r.example/1", first_paid_at)
            .await
            .unwrap();
        let repeat = store
            .settle(&order.id, "ch_1", "https://r.example/other", Utc::now())
            .await
            .unwrap();

        assert!(repeat.already_settled);
        // First write wins: timestamp and receipt are untouched.
        assert_eq!(repeat.order.paid_at, Some(first_paid_at));
        assert_eq!(
            repeat.order.receipt.as_ref().map(|r| r.receipt_url.as_str()),
            Some("https://r.example/1")
        );
    }

    #[tokio::test]
    async fn test_settle_different_charge_fails() {
        let store = InMemoryOrderStore::new();
        let order = store.create(sample_order(1)).await.unwrap();
        store
            .settle(&order.id, "ch_1", "https://r.example/1", Utc::now())
            .await
            .unwrap();

        let conflicting = store
            .settle(&order.id, "ch_2", "https://r.example/2", Utc::now())
            .await;
        assert!(matches!(
            conflicting,
            Err(StoreError::AlreadySettled { .. })
        ));
    }

    #[tokio::test]
    async fn test_settle_missing_order_is_explicit() {
        let store = InMemoryOrderStore::new();
        let result = store
            .settle("missing", "ch_1", "https://r.example/1", Utc::now())
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_bus_request_reply_roundtrip() {
        let bus = Arc::new(InMemoryBus::new());

        let mut deliveries = bus.subscribe("echo").await.unwrap();
        let responder_bus = bus.clone();
        tokio::spawn(async move {
            while let Some(delivery) = deliveries.next().await {
                if let Some(reply_to) = delivery.reply_to {
                    responder_bus
                        .publish(&reply_to, delivery.payload)
                        .await
                        .unwrap();
                }
            }
        });

        let reply = bus.request("echo", b"ping".to_vec()).await.unwrap();
        assert_eq!(reply, b"ping");
    }

    #[tokio::test]
    async fn test_bus_request_without_responder() {
        let bus = InMemoryBus::new();
        let result = bus.request("nobody-home", b"x".to_vec()).await;
        assert!(matches!(result, Err(BusError::NoResponders(_))));
    }

    #[tokio::test]
    async fn test_bus_request_times_out_on_silent_responder() {
        let bus = Arc::new(InMemoryBus::with_request_timeout(Duration::from_millis(50)));
        let _deliveries = bus.subscribe("slow").await.unwrap();

        let result = bus.request("slow", b"x".to_vec()).await;
        assert!(matches!(result, Err(BusError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_bus_empty_reply_is_an_error() {
        let bus = Arc::new(InMemoryBus::new());

        let mut deliveries = bus.subscribe("empty").await.unwrap();
        let responder_bus = bus.clone();
        tokio::spawn(async move {
            while let Some(delivery) = deliveries.next().await {
                if let Some(reply_to) = delivery.reply_to {
                    responder_bus.publish(&reply_to, Vec::new()).await.unwrap();
                }
            }
        });

        let result = bus.request("empty", b"x".to_vec()).await;
        assert!(matches!(result, Err(BusError::EmptyReply(_))));
    }

    #[tokio::test]
    async fn test_bus_publish_fans_out_to_all_subscribers() {
        let bus = InMemoryBus::new();
        let mut first = bus.subscribe("events").await.unwrap();
        let mut second = bus.subscribe("events").await.unwrap();

        bus.publish("events", b"hello".to_vec()).await.unwrap();

        assert_eq!(first.next().await.unwrap().payload, b"hello");
        assert_eq!(second.next().await.unwrap().payload, b"hello");
    }

    #[tokio::test]
    async fn test_bus_publish_without_subscribers_is_fine() {
        let bus = InMemoryBus::new();
        bus.publish("void", b"x".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn test_bus_rejects_use_after_close() {
        let bus = InMemoryBus::new();
        bus.close().await.unwrap();
        assert!(matches!(
            bus.publish("x", Vec::new()).await,
            Err(BusError::Closed)
        ));
        assert!(matches!(
            bus.request("x", Vec::new()).await,
            Err(BusError::Closed)
        ));
    }
}
