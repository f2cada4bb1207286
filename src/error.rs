use crate::domain::order::OrderStatus;
use crate::domain::ports::{BusError, StoreError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrderError>;

/// Failure taxonomy surfaced by the order orchestrator.
///
/// Every public operation maps internal and upstream failures into one of
/// these kinds. The root cause is kept as a wrapped `source` so that log
/// output and diagnostics retain the full chain instead of a flattened
/// message.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("order {0} not found")]
    NotFound(String),

    #[error("order {id} is already {status}")]
    Conflict { id: String, status: OrderStatus },

    #[error("order {id} was modified concurrently")]
    ConcurrentUpdate { id: String },

    /// The catalog or payment collaborator rejected the request or returned
    /// an empty result.
    #[error("{subject} rejected the request: {message}")]
    UpstreamInvalid { subject: String, message: String },

    /// Transport-level failure: timeout, no responders, or a broken
    /// connection. All three look the same to the caller.
    #[error("{subject} is unreachable")]
    UpstreamUnavailable {
        subject: String,
        #[source]
        source: BusError,
    },

    /// The catalog reply did not cover a product id we asked about. The
    /// reply is untrusted input, so this is checked even though the catalog
    /// is supposed to reject unknown ids itself.
    #[error("catalog reply is missing product {product_id}")]
    DataIntegrity { product_id: i64 },

    /// The order was persisted but the payment session could not be opened.
    /// The order stays PENDING with no session; callers see which order is
    /// affected instead of a silently half-finished workflow.
    #[error("order {order_id} was created but the payment session failed")]
    PaymentSessionFailed {
        order_id: String,
        #[source]
        source: Box<OrderError>,
    },

    #[error("malformed payload on {subject}")]
    Validation {
        subject: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("message codec failure on {subject}")]
    Codec {
        subject: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("order storage failed")]
    Storage(#[source] StoreError),
}

impl OrderError {
    /// Status code carried in the error reply envelope, mirroring what the
    /// HTTP gateway turns these into.
    pub fn wire_status(&self) -> u16 {
        match self {
            OrderError::NotFound(_) => 404,
            OrderError::Conflict { .. } | OrderError::ConcurrentUpdate { .. } => 409,
            OrderError::UpstreamInvalid { .. }
            | OrderError::DataIntegrity { .. }
            | OrderError::Validation { .. } => 400,
            OrderError::UpstreamUnavailable { .. } => 503,
            OrderError::PaymentSessionFailed { .. } => 502,
            OrderError::Codec { .. } | OrderError::Storage(_) => 500,
        }
    }

    /// The display chain including wrapped causes, joined for wire messages
    /// and log lines.
    pub fn full_message(&self) -> String {
        let mut out = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            out.push_str(": ");
            out.push_str(&err.to_string());
            cause = std::error::Error::source(err);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_message_includes_cause_chain() {
        let err = OrderError::UpstreamUnavailable {
            subject: "validate_products".to_string(),
            source: BusError::Timeout("validate_products".to_string()),
        };
        let msg = err.full_message();
        assert!(msg.contains("validate_products is unreachable"));
        assert!(msg.contains("timed out"));
    }

    #[test]
    fn test_wire_status_mapping() {
        assert_eq!(OrderError::NotFound("x".into()).wire_status(), 404);
        assert_eq!(
            OrderError::Conflict {
                id: "x".into(),
                status: OrderStatus::Pending
            }
            .wire_status(),
            409
        );
        assert_eq!(
            OrderError::DataIntegrity { product_id: 7 }.wire_status(),
            400
        );
    }
}
