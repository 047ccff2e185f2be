use crate::engine::Engine;
use crate::error::{EngineError, TransportError};
use crate::profile::ParticipantId;
use crate::session::CorrelationEntry;
use crate::transport::{ChatPayload, DeliveredMessageId, Transport};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

/// Transport-side identity of the inbound message, kept for correlation.
#[derive(Debug, Clone, Copy)]
pub struct MessageOrigin {
    pub message_id: i64,
    pub chat_id: i64,
}

/// Forwards payloads between the two sides of an active session.
///
/// Partner resolution happens under the engine lock; the delivery itself
/// runs outside it, serialized per session by the session's relay gate so
/// the correlation log stays in delivery order. A failed or timed-out
/// delivery is reported to the sender and leaves the session untouched.
pub struct RelayForwarder {
    engine: Arc<Engine>,
    transport: Arc<dyn Transport>,
    delivery_timeout: Duration,
}

impl RelayForwarder {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(engine: Arc<Engine>, transport: Arc<dyn Transport>) -> Self {
        Self::with_timeout(engine, transport, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        engine: Arc<Engine>,
        transport: Arc<dyn Transport>,
        delivery_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            transport,
            delivery_timeout,
        }
    }

    pub async fn relay(
        &self,
        sender: ParticipantId,
        origin: MessageOrigin,
        payload: ChatPayload,
    ) -> Result<DeliveredMessageId, EngineError> {
        let (partner, key, gate) = self.engine.relay_context(sender).await?;

        let _ordered = gate.lock().await;

        let delivered = match timeout(
            self.delivery_timeout,
            self.transport.deliver_payload(partner, &payload),
        )
        .await
        {
            Ok(Ok(message_id)) => message_id,
            Ok(Err(e)) => {
                warn!("Delivery from {} to {} failed: {}", sender, partner, e);
                return Err(EngineError::DeliveryFailed(e));
            }
            Err(_) => {
                warn!(
                    "Delivery from {} to {} timed out after {:?}",
                    sender, partner, self.delivery_timeout
                );
                return Err(EngineError::DeliveryFailed(TransportError::Timeout));
            }
        };

        self.engine
            .record_relay(
                key,
                CorrelationEntry {
                    origin_message_id: origin.message_id,
                    origin_chat_id: origin.chat_id,
                    delivered_message_id: delivered,
                    timestamp: Utc::now(),
                },
            )
            .await;

        Ok(delivered)
    }
}
