//! Error taxonomy for the relay core.
//!
//! None of these ever abort the process. The lifecycle controller turns
//! each one into a notice for the connection that caused it, or drops it.

use crate::registry::ConnId;

/// Rejection from [`Registry::admit`](crate::registry::Registry::admit).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmitError {
    #[error("name '{0}' is already in use")]
    NameTaken(String),
    #[error("connection {0} already has a registered name")]
    AlreadyAdmitted(ConnId),
}

/// Why a join request did not make the connection active.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("{0}")]
    InvalidName(String),
    #[error("name '{0}' is already in use")]
    NameTaken(String),
    #[error("you have already joined the chat")]
    AlreadyJoined,
    #[error("connection {0} is not open")]
    UnknownConnection(ConnId),
    #[error("connection {0} has been retired")]
    Retired(ConnId),
}

impl From<AdmitError> for JoinError {
    fn from(e: AdmitError) -> Self {
        match e {
            AdmitError::NameTaken(name) => JoinError::NameTaken(name),
            AdmitError::AlreadyAdmitted(_) => JoinError::AlreadyJoined,
        }
    }
}

/// Failure to route a public or private message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("sender {0} has not joined the chat")]
    SenderUnknown(ConnId),
    #[error("user not found")]
    RecipientUnknown(ConnId),
    #[error("{0}")]
    InvalidBody(String),
}

/// A send that could not be handed to the connection's writer.
///
/// Callers treat both variants as a no-op: the relay is best-effort and
/// the reconciler cleans up connections that stay unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection {0} is unreachable")]
    Unreachable(ConnId),
    #[error("send queue for connection {0} is full")]
    QueueFull(ConnId),
}
