use crate::error::TransportError;
use crate::profile::ParticipantId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A payload relayed between partners. Media variants carry the transport's
/// opaque file handle; the core never looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatPayload {
    Text(String),
    Photo {
        file_id: String,
        caption: Option<String>,
    },
    Video {
        file_id: String,
        caption: Option<String>,
    },
    Audio {
        file_id: String,
        caption: Option<String>,
    },
    Voice {
        file_id: String,
    },
    Document {
        file_id: String,
        caption: Option<String>,
    },
}

/// Transport-assigned id of a delivered copy, recorded for correlation.
pub type DeliveredMessageId = i64;

/// Outbound side of the transport collaborator. The engine sends plain-text
/// notices through `notify` and the relay hands payloads to
/// `deliver_payload`; inbound events arrive through the interface layer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn notify(&self, recipient: ParticipantId, text: &str) -> Result<(), TransportError>;

    async fn deliver_payload(
        &self,
        recipient: ParticipantId,
        payload: &ChatPayload,
    ) -> Result<DeliveredMessageId, TransportError>;
}
