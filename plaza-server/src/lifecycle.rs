//! Session lifecycle: what happens when connections come, join, talk and go.
//!
//! Every connection walks `Unregistered -> Active -> Retired`. Only a
//! successful admit makes it `Active`; `Retired` is terminal. The transport
//! layer feeds [`ConnectionEvent`]s in and the controller pushes
//! [`OutboundEvent`]s back out through the [`Transport`].
//!
//! Join and leave go through one transition lock: the registry mutation and
//! the queueing of the presence broadcasts it causes happen together, so
//! every client sees presence changes in the order the registry applied
//! them. Sends never block and no lock is held across an `.await`.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::error::{JoinError, RouteError};
use crate::protocol::{ChatMessage, ClientEvent, OutboundEvent, SYSTEM_SENDER};
use crate::registry::{ConnId, Registry, UserRecord};
use crate::router::MessageRouter;
use crate::transport::Transport;

/// Where a connection is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    Active,
    Retired,
}

/// Everything the transport layer reports about a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connect(ConnId),
    Message(ConnId, ClientEvent),
    Disconnect(ConnId),
}

/// How a session came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireReason {
    /// The transport reported the close.
    Disconnected,
    /// The reconciler found the connection dead.
    Evicted,
}

/// Input limits applied to names and message bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_name_len: usize,
    pub max_message_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_name_len: 32,
            max_message_len: 2000,
        }
    }
}

pub struct SessionController {
    registry: Arc<Registry>,
    router: MessageRouter,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    limits: Limits,
    sessions: Mutex<HashMap<ConnId, SessionState>>,
    /// Serializes join/leave so broadcasts leave in mutation order.
    transitions: Mutex<()>,
}

impl SessionController {
    pub fn new(
        registry: Arc<Registry>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        limits: Limits,
    ) -> Self {
        let router = MessageRouter::new(registry.clone(), clock.clone(), limits.max_message_len);
        Self {
            registry,
            router,
            transport,
            clock,
            limits,
            sessions: Mutex::new(HashMap::new()),
            transitions: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Whether the transport still holds `conn` open.
    pub fn is_live(&self, conn: ConnId) -> bool {
        self.transport.is_connected(conn)
    }

    pub fn session_state(&self, conn: ConnId) -> Option<SessionState> {
        self.sessions.lock().get(&conn).copied()
    }

    /// Dispatch one transport event. Failures are reported to the
    /// originating connection only.
    pub fn handle(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connect(conn) => self.connect(conn),
            ConnectionEvent::Message(conn, ClientEvent::Join(name)) => {
                if let Err(e) = self.join(conn, &name) {
                    self.report_join_error(conn, e);
                }
            }
            ConnectionEvent::Message(conn, ClientEvent::PublicMessage(body)) => {
                match self.router.route_public(conn, &body) {
                    Ok(delivery) => self
                        .transport
                        .broadcast(&delivery.recipients, &OutboundEvent::PublicMessage(delivery.message)),
                    Err(e) => self.report_route_error(conn, e),
                }
            }
            ConnectionEvent::Message(conn, ClientEvent::PrivateMessage(req)) => {
                match self.router.route_private(conn, req.to, &req.message) {
                    Ok(delivery) => self
                        .transport
                        .broadcast(&delivery.recipients, &OutboundEvent::PrivateMessage(delivery.message)),
                    Err(e) => self.report_route_error(conn, e),
                }
            }
            ConnectionEvent::Disconnect(conn) => {
                self.retire(conn, RetireReason::Disconnected);
            }
        }
    }

    /// Start tracking a new connection and tell it its id.
    pub fn connect(&self, conn: ConnId) {
        match self.sessions.lock().entry(conn) {
            Entry::Vacant(slot) => {
                slot.insert(SessionState::Unregistered);
            }
            Entry::Occupied(_) => {
                tracing::warn!(%conn, "Duplicate connect ignored");
                return;
            }
        }
        tracing::debug!(%conn, "Connection opened");
        self.send(conn, OutboundEvent::Connected { id: conn });
    }

    /// Try to move `conn` from `Unregistered` to `Active` under `raw_name`.
    ///
    /// On success the joiner gets the full user list, everyone gets the
    /// new presence list and a system notice. On failure nothing is
    /// broadcast.
    pub fn join(&self, conn: ConnId, raw_name: &str) -> Result<UserRecord, JoinError> {
        let name = validate_name(raw_name, self.limits.max_name_len)?;

        let _transition = self.transitions.lock();
        match self.session_state(conn) {
            None => return Err(JoinError::UnknownConnection(conn)),
            Some(SessionState::Active) => return Err(JoinError::AlreadyJoined),
            Some(SessionState::Retired) => return Err(JoinError::Retired(conn)),
            Some(SessionState::Unregistered) => {}
        }

        let admission = self.registry.admit(conn, name)?;
        self.sessions.lock().insert(conn, SessionState::Active);
        tracing::info!(%conn, name = %admission.record.name, online = admission.snapshot.len(), "User joined");

        let audience: Vec<ConnId> = admission.snapshot.iter().map(|u| u.id).collect();
        self.send(
            conn,
            OutboundEvent::UserJoined {
                users: admission.snapshot.clone(),
            },
        );
        self.transport
            .broadcast(&audience, &OutboundEvent::UsersUpdate(admission.snapshot));
        let notice = ChatMessage::system(format!("{name} joined the chat"), self.clock.now());
        self.transport
            .broadcast(&audience, &OutboundEvent::PublicMessage(notice));

        Ok(admission.record)
    }

    /// End `conn`'s session. Returns the user it had, if it had joined.
    ///
    /// Safe to call more than once and from both the disconnect path and
    /// the reconciler; only the first call that finds a user broadcasts.
    pub fn retire(&self, conn: ConnId, reason: RetireReason) -> Option<UserRecord> {
        let _transition = self.transitions.lock();
        // Terminal either way; prune_sessions drops the entry once the
        // transport has let go of the connection.
        if let Some(state) = self.sessions.lock().get_mut(&conn) {
            *state = SessionState::Retired;
        }

        let Some(retirement) = self.registry.retire(conn) else {
            tracing::debug!(%conn, ?reason, "Connection closed before joining");
            return None;
        };
        let name = &retirement.record.name;
        tracing::info!(%conn, %name, ?reason, online = retirement.snapshot.len(), "User left");

        let audience: Vec<ConnId> = retirement.snapshot.iter().map(|u| u.id).collect();
        self.transport
            .broadcast(&audience, &OutboundEvent::UsersUpdate(retirement.snapshot.clone()));
        let notice = ChatMessage::system(format!("{name} left the chat"), self.clock.now());
        self.transport
            .broadcast(&audience, &OutboundEvent::PublicMessage(notice));

        Some(retirement.record)
    }

    /// Drop bookkeeping for connections that never joined (or were
    /// already retired) and whose transport is gone. Returns how many were
    /// dropped.
    pub fn prune_sessions(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|conn, state| {
            *state == SessionState::Active || self.transport.is_connected(*conn)
        });
        before - sessions.len()
    }

    fn send(&self, conn: ConnId, event: OutboundEvent) {
        if let Err(e) = self.transport.send(conn, event) {
            tracing::debug!(%conn, "Send skipped: {e}");
        }
    }

    fn report_join_error(&self, conn: ConnId, e: JoinError) {
        match e {
            JoinError::NameTaken(name) => {
                tracing::info!(%conn, %name, "Join rejected: name taken");
                self.send(conn, OutboundEvent::UsernameTaken);
            }
            JoinError::InvalidName(reason) => {
                tracing::debug!(%conn, %reason, "Join rejected: invalid name");
                self.send(conn, OutboundEvent::InvalidName { reason });
            }
            JoinError::AlreadyJoined => {
                self.send(conn, OutboundEvent::Error(e.to_string()));
            }
            JoinError::UnknownConnection(_) | JoinError::Retired(_) => {
                tracing::debug!(%conn, "Join ignored: {e}");
            }
        }
    }

    fn report_route_error(&self, conn: ConnId, e: RouteError) {
        match e {
            RouteError::SenderUnknown(_) => {
                tracing::debug!(%conn, "Message dropped: {e}");
            }
            RouteError::RecipientUnknown(_) | RouteError::InvalidBody(_) => {
                tracing::debug!(%conn, "Message rejected: {e}");
                self.send(conn, OutboundEvent::Error(e.to_string()));
            }
        }
    }
}

/// Trim and check a proposed display name.
fn validate_name(raw: &str, max_len: usize) -> Result<&str, JoinError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(JoinError::InvalidName("name must not be empty".to_string()));
    }
    if name.chars().count() > max_len {
        return Err(JoinError::InvalidName(format!(
            "name must be at most {max_len} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(JoinError::InvalidName(
            "name must not contain control characters".to_string(),
        ));
    }
    if name.eq_ignore_ascii_case(SYSTEM_SENDER) {
        return Err(JoinError::InvalidName(format!("'{name}' is reserved")));
    }
    Ok(name)
}
