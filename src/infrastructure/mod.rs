//! Concrete adapters behind the domain ports: storage backends and bus
//! transports.

pub mod in_memory;
pub mod nats;

#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
