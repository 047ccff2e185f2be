use thiserror::Error;

/// Errors surfaced by the matchmaking engine and relay.
///
/// None of these are fatal: the interface layer translates them into replies
/// to the participant that triggered the operation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid profile field: {0}")]
    Validation(String),

    #[error("profile setup is not complete")]
    ProfileIncomplete,

    #[error("already searching for a partner")]
    AlreadySearching,

    #[error("already in an active chat")]
    AlreadyChatting,

    #[error("not in an active chat")]
    NotInChat,

    #[error("no partner link found for an active chat")]
    PartnerUnresolved,

    #[error("delivery to partner failed: {0}")]
    DeliveryFailed(#[from] TransportError),

    #[error("profile store error: {0}")]
    Store(anyhow::Error),
}

/// Errors raised by the transport collaborator when sending to a recipient.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("recipient unreachable")]
    Unreachable,

    #[error("delivery timed out")]
    Timeout,

    #[error("transport api error: {0}")]
    Api(String),
}
