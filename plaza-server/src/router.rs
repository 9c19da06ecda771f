//! Message routing by identity.
//!
//! The router never talks to sockets. It resolves sender and recipient
//! through the registry, builds the message, and says who should get it.
//! The caller hands the [`Delivery`] to the transport.

use std::sync::Arc;

use crate::clock::Clock;
use crate::error::RouteError;
use crate::protocol::ChatMessage;
use crate::registry::{ConnId, Registry};

/// A routed message and the connections it goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message: ChatMessage,
    pub recipients: Vec<ConnId>,
}

pub struct MessageRouter {
    registry: Arc<Registry>,
    clock: Arc<dyn Clock>,
    max_message_len: usize,
}

impl MessageRouter {
    pub fn new(registry: Arc<Registry>, clock: Arc<dyn Clock>, max_message_len: usize) -> Self {
        Self {
            registry,
            clock,
            max_message_len,
        }
    }

    /// Route a message to everyone currently joined.
    ///
    /// The audience is read from the registry now, so users who join later
    /// never see it.
    pub fn route_public(&self, sender: ConnId, body: &str) -> Result<Delivery, RouteError> {
        let from = self
            .registry
            .lookup(sender)
            .ok_or(RouteError::SenderUnknown(sender))?;
        self.check_body(body)?;

        let recipients = self.registry.connection_ids();
        tracing::debug!(conn = %sender, name = %from.name, recipients = recipients.len(), "Public message");
        Ok(Delivery {
            message: ChatMessage::public(from.name, body, self.clock.now()),
            recipients,
        })
    }

    /// Route a message to one user, echoing it back to the sender.
    ///
    /// Nobody else is ever a recipient. A user writing to themselves gets a
    /// single copy.
    pub fn route_private(
        &self,
        sender: ConnId,
        recipient: ConnId,
        body: &str,
    ) -> Result<Delivery, RouteError> {
        let from = self
            .registry
            .lookup(sender)
            .ok_or(RouteError::SenderUnknown(sender))?;
        let to = self
            .registry
            .lookup(recipient)
            .ok_or(RouteError::RecipientUnknown(recipient))?;
        self.check_body(body)?;

        let recipients = if sender == recipient {
            vec![sender]
        } else {
            vec![recipient, sender]
        };
        tracing::debug!(conn = %sender, from = %from.name, to = %to.name, "Private message");
        Ok(Delivery {
            message: ChatMessage::private(from.name, to.name, body, self.clock.now()),
            recipients,
        })
    }

    fn check_body(&self, body: &str) -> Result<(), RouteError> {
        if body.trim().is_empty() {
            return Err(RouteError::InvalidBody("message is empty".to_string()));
        }
        if body.chars().count() > self.max_message_len {
            return Err(RouteError::InvalidBody(format!(
                "message is longer than {} characters",
                self.max_message_len
            )));
        }
        Ok(())
    }
}
