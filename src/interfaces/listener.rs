use crate::application::orchestrator::OrderOrchestrator;
use crate::domain::ports::{subject, BusError, Delivery, ErrorReply, MessageBus, SharedBus};
use crate::error::OrderError;
use crate::interfaces::messages::{
    ChangeOrderStatus, CreateOrderRequest, OrderPagination, PaymentSucceeded,
};
use futures::stream::select_all;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Broker-facing dispatcher.
///
/// Subscribes to the five request/reply subjects and the payment event
/// subject, then routes each delivery to the orchestrator on its own task.
/// Request handlers answer on the delivery's reply subject, either with the
/// success JSON or with the error envelope; the event handler has nobody to
/// answer and logs every failure instead.
pub struct OrderListener {
    orchestrator: Arc<OrderOrchestrator>,
    bus: SharedBus,
}

impl OrderListener {
    pub fn new(orchestrator: Arc<OrderOrchestrator>, bus: SharedBus) -> Self {
        Self { orchestrator, bus }
    }

    /// Runs until the bus closes its subscription streams.
    pub async fn run(&self) -> Result<(), BusError> {
        let subjects = [
            subject::CREATE_ORDER,
            subject::FIND_ALL_ORDERS,
            subject::FIND_ORDER,
            subject::FIND_ORDERS_BY_STATUS,
            subject::CHANGE_ORDER_STATUS,
            subject::PAYMENT_SUCCEEDED,
        ];

        let mut streams = Vec::with_capacity(subjects.len());
        for subj in subjects {
            streams.push(self.bus.subscribe(subj).await?);
        }
        let mut merged = select_all(streams);
        info!("subscribed to order subjects");

        while let Some(delivery) = merged.next().await {
            let orchestrator = self.orchestrator.clone();
            let bus = self.bus.clone();
            tokio::spawn(async move {
                dispatch(orchestrator, bus, delivery).await;
            });
        }

        info!("subscription streams ended, listener stopping");
        Ok(())
    }
}

async fn dispatch(orchestrator: Arc<OrderOrchestrator>, bus: SharedBus, delivery: Delivery) {
    match delivery.subject.as_str() {
        subject::CREATE_ORDER => {
            let result = match decode::<CreateOrderRequest>(&delivery) {
                Ok(req) => orchestrator.create(req.items).await.and_then(to_value),
                Err(err) => Err(err),
            };
            respond(bus.as_ref(), &delivery, result).await;
        }
        subject::FIND_ALL_ORDERS => {
            let result = match decode::<OrderPagination>(&delivery) {
                Ok(q) => orchestrator
                    .find_all(q.page_request(), q.status)
                    .await
                    .and_then(to_value),
                Err(err) => Err(err),
            };
            respond(bus.as_ref(), &delivery, result).await;
        }
        subject::FIND_ORDERS_BY_STATUS => {
            let result = match decode::<OrderPagination>(&delivery) {
                Ok(q) => orchestrator
                    .find_by_status(q.page_request(), q.status)
                    .await
                    .and_then(to_value),
                Err(err) => Err(err),
            };
            respond(bus.as_ref(), &delivery, result).await;
        }
        subject::FIND_ORDER => {
            // The payload is the bare order id as a JSON string.
            let result = match decode::<String>(&delivery) {
                Ok(id) => orchestrator.find_one(&id).await.and_then(to_value),
                Err(err) => Err(err),
            };
            respond(bus.as_ref(), &delivery, result).await;
        }
        subject::CHANGE_ORDER_STATUS => {
            let result = match decode::<ChangeOrderStatus>(&delivery) {
                Ok(req) => orchestrator
                    .change_status(&req.id, req.status)
                    .await
                    .and_then(to_value),
                Err(err) => Err(err),
            };
            respond(bus.as_ref(), &delivery, result).await;
        }
        subject::PAYMENT_SUCCEEDED => settle_event(orchestrator, &delivery).await,
        other => warn!(subject = other, "delivery on unexpected subject"),
    }
}

/// Event-path handler. There is no reply channel here, so failures are
/// logged with the identifiers needed to replay the notification by hand.
async fn settle_event(orchestrator: Arc<OrderOrchestrator>, delivery: &Delivery) {
    let event: PaymentSucceeded = match decode(delivery) {
        Ok(event) => event,
        Err(err) => {
            error!(
                subject = %delivery.subject,
                error = %err.full_message(),
                "discarding malformed payment notification"
            );
            return;
        }
    };

    if let Err(err) = orchestrator
        .settle(
            &event.order_id,
            &event.provider_charge_id,
            &event.receipt_url,
        )
        .await
    {
        error!(
            order_id = %event.order_id,
            provider_charge_id = %event.provider_charge_id,
            error = %err.full_message(),
            "failed to settle order"
        );
    }
}

async fn respond(
    bus: &dyn MessageBus,
    delivery: &Delivery,
    result: Result<serde_json::Value, OrderError>,
) {
    let Some(reply_to) = delivery.reply_to.as_deref() else {
        warn!(subject = %delivery.subject, "request delivery without reply subject");
        return;
    };

    let payload = match result {
        Ok(value) => value,
        Err(err) => {
            let status = err.wire_status();
            if status >= 500 {
                error!(subject = %delivery.subject, error = %err.full_message(), "request failed");
            } else {
                warn!(subject = %delivery.subject, error = %err.full_message(), "request rejected");
            }
            to_value(ErrorReply {
                status,
                message: err.full_message(),
            })
            .unwrap_or_else(|_| serde_json::json!({"status": 500, "message": "internal error"}))
        }
    };

    let bytes = serde_json::to_vec(&payload).unwrap_or_default();
    if let Err(err) = bus.publish(reply_to, bytes).await {
        error!(subject = %delivery.subject, error = %err, "failed to publish reply");
    }
}

fn decode<T: DeserializeOwned>(delivery: &Delivery) -> Result<T, OrderError> {
    serde_json::from_slice(&delivery.payload).map_err(|source| OrderError::Validation {
        subject: delivery.subject.clone(),
        source,
    })
}

fn to_value<T: Serialize>(value: T) -> Result<serde_json::Value, OrderError> {
    serde_json::to_value(value).map_err(|source| OrderError::Codec {
        subject: "reply".to_string(),
        source,
    })
}
