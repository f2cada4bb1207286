use crate::domain::order::{NewOrder, Order, OrderStatus, Receipt};
use crate::domain::ports::{OrderStore, Settlement, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Column Family for storing order records.
pub const CF_ORDERS: &str = "orders";

/// A persistent order store backed by RocksDB.
///
/// Each order is one serialized record under its id, so the order and its
/// line items land in a single `put`; that is the per-order atomic write
/// the orchestrator depends on. Read-modify-write mutations serialize on an
/// internal lock, keeping the compare-and-swap and settlement semantics of
/// the port. Listing reads the whole column family and sorts by creation
/// time, which is fine at the scale a single fulfillment service sees.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDbOrderStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDbOrderStore {
    /// Opens or creates a RocksDB instance at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_orders = ColumnFamilyDescriptor::new(CF_ORDERS, Options::default());
        let db = DB::open_cf_descriptors(&opts, path, vec![cf_orders])
            .map_err(|e| StoreError::Backend(Box::new(e)))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn orders_cf(&self) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(CF_ORDERS)
            .ok_or_else(|| StoreError::Backend("orders column family not found".into()))
    }

    fn read(&self, id: &str) -> Result<Option<Order>, StoreError> {
        let cf = self.orders_cf()?;
        let bytes = self
            .db
            .get_cf(cf, id.as_bytes())
            .map_err(|e| StoreError::Backend(Box::new(e)))?;
        match bytes {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write(&self, order: &Order) -> Result<(), StoreError> {
        let cf = self.orders_cf()?;
        let value = serde_json::to_vec(order)?;
        self.db
            .put_cf(cf, order.id.as_bytes(), value)
            .map_err(|e| StoreError::Backend(Box::new(e)))
    }

    fn scan(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, StoreError> {
        let cf = self.orders_cf()?;
        let mut orders = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item.map_err(|e| StoreError::Backend(Box::new(e)))?;
            let order: Order = serde_json::from_slice(&value)?;
            if status.is_none_or(|s| order.status == s) {
                orders.push(order);
            }
        }
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(orders)
    }
}

#[async_trait]
impl OrderStore for RocksDbOrderStore {
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
        self.write(&record)?;
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<Order>, StoreError> {
        self.read(id)
    }

    async fn count(&self, status: Option<OrderStatus>) -> Result<u64, StoreError> {
        Ok(self.scan(status)?.len() as u64)
    }

    async fn list(
        &self,
        status: Option<OrderStatus>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Order>, StoreError> {
        let orders = self.scan(status)?;
        Ok(orders
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn update_status(
        &self,
        id: &str,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut order = self
            .read(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if order.status != expected {
            return Err(StoreError::StatusRaced { id: id.to_string() });
        }

        order.status = next;
        order.updated_at = Utc::now();
        self.write(&order)?;
        Ok(order)
    }

    async fn settle(
        &self,
        id: &str,
        charge_id: &str,
        receipt_url: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<Settlement, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut order = self
            .read(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if order.paid {
            return match order.provider_charge_id.clone() {
                Some(existing) if existing == charge_id => Ok(Settlement {
                    order,
                    already_settled: true,
                }),
                Some(existing) => Err(StoreError::AlreadySettled {
                    id: id.to_string(),
                    charge_id: existing,
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
        self.write(&order)?;

        Ok(Settlement {
            order,
            already_settled: false,
        })
    }
}
