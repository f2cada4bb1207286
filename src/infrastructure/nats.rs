use crate::domain::ports::{BusError, Delivery, MessageBus};
use async_nats::client::RequestErrorKind;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// NATS transport behind the [`MessageBus`] port.
///
/// Request/reply rides on NATS inboxes; the client-level request timeout
/// bounds every round-trip, and both a timeout and a no-responders error
/// surface as transport unavailability to callers. Plain publish/subscribe
/// maps directly onto core NATS subjects, which means at-least-once,
/// unordered delivery from the subscriber's point of view.
pub struct NatsBus {
    client: async_nats::Client,
}

impl NatsBus {
    /// Connects to one or more NATS servers.
    pub async fn connect(urls: &[String]) -> Result<Self, BusError> {
        let addrs = urls.join(",");
        let client = async_nats::ConnectOptions::new()
            .request_timeout(Some(DEFAULT_REQUEST_TIMEOUT))
            .connect(addrs)
            .await
            .map_err(|err| BusError::Transport {
                subject: "connect".to_string(),
                source: Box::new(err),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn request(&self, subject: &str, payload: Vec<u8>) -> Result<Vec<u8>, BusError> {
        let message = self
            .client
            .request(subject.to_string(), payload.into())
            .await
            .map_err(|err| match err.kind() {
                RequestErrorKind::TimedOut => BusError::Timeout(subject.to_string()),
                RequestErrorKind::NoResponders => BusError::NoResponders(subject.to_string()),
                RequestErrorKind::Other => BusError::Transport {
                    subject: subject.to_string(),
                    source: Box::new(err),
                },
            })?;

        if message.payload.is_empty() {
            return Err(BusError::EmptyReply(subject.to_string()));
        }
        Ok(message.payload.to_vec())
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|err| BusError::Transport {
                subject: subject.to_string(),
                source: Box::new(err),
            })
    }

    async fn subscribe(&self, subject: &str) -> Result<BoxStream<'static, Delivery>, BusError> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|err| BusError::Transport {
                subject: subject.to_string(),
                source: Box::new(err),
            })?;

        let stream = subscriber.map(|message| Delivery {
            subject: message.subject.to_string(),
            payload: message.payload.to_vec(),
            reply_to: message.reply.map(|subject| subject.to_string()),
        });
        Ok(stream.boxed())
    }

    async fn close(&self) -> Result<(), BusError> {
        self.client.flush().await.map_err(|err| BusError::Transport {
            subject: "flush".to_string(),
            source: Box::new(err),
        })
    }
}
