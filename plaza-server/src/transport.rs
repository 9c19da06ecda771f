//! The seam between the relay core and the sockets.
//!
//! The core only ever talks to connections through [`Transport`]: push an
//! event to one connection, push one to many, or ask whether a connection
//! is still there. [`ConnectionTable`] is the implementation the WebSocket
//! layer uses: one bounded queue per connection, drained by that
//! connection's writer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::TransportError;
use crate::protocol::OutboundEvent;
use crate::registry::ConnId;

pub trait Transport: Send + Sync {
    /// Queue `event` for `conn` without waiting.
    fn send(&self, conn: ConnId, event: OutboundEvent) -> Result<(), TransportError>;

    /// Whether `conn` still has a live writer.
    fn is_connected(&self, conn: ConnId) -> bool;

    /// Queue `event` for every target. Targets that cannot take it are
    /// skipped; delivery is best-effort.
    fn broadcast(&self, targets: &[ConnId], event: &OutboundEvent) {
        for &conn in targets {
            if let Err(e) = self.send(conn, event.clone()) {
                tracing::debug!(%conn, event = event.name(), "Broadcast skipped: {e}");
            }
        }
    }
}

/// Per-connection outbound queues, keyed by connection id.
pub struct ConnectionTable {
    next_id: AtomicU64,
    queue_capacity: usize,
    connections: Mutex<HashMap<ConnId, mpsc::Sender<OutboundEvent>>>,
}

impl ConnectionTable {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh id and the receiving end of its queue.
    pub fn open(&self) -> (ConnId, mpsc::Receiver<OutboundEvent>) {
        let conn = ConnId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.connections.lock().insert(conn, tx);
        (conn, rx)
    }

    /// Forget `conn`. Returns false if it was already gone.
    pub fn close(&self, conn: ConnId) -> bool {
        self.connections.lock().remove(&conn).is_some()
    }

    /// Number of open connections, joined or not.
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Transport for ConnectionTable {
    fn send(&self, conn: ConnId, event: OutboundEvent) -> Result<(), TransportError> {
        let connections = self.connections.lock();
        let Some(tx) = connections.get(&conn) else {
            return Err(TransportError::Unreachable(conn));
        };
        match tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                tracing::warn!(%conn, event = event.name(), "Send queue full, dropping event");
                Err(TransportError::QueueFull(conn))
            }
            Err(TrySendError::Closed(_)) => Err(TransportError::Unreachable(conn)),
        }
    }

    fn is_connected(&self, conn: ConnId) -> bool {
        self.connections
            .lock()
            .get(&conn)
            .is_some_and(|tx| !tx.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_never_reused() {
        let table = ConnectionTable::new(4);
        let (a, _rx_a) = table.open();
        table.close(a);
        let (b, _rx_b) = table.open();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn send_reaches_the_queue_in_order() {
        let table = ConnectionTable::new(4);
        let (conn, mut rx) = table.open();
        table.send(conn, OutboundEvent::UsernameTaken).unwrap();
        table.send(conn, OutboundEvent::Error("x".into())).unwrap();
        assert_eq!(rx.try_recv().unwrap(), OutboundEvent::UsernameTaken);
        assert_eq!(rx.try_recv().unwrap(), OutboundEvent::Error("x".into()));
    }

    #[test]
    fn closed_or_unknown_connections_are_unreachable() {
        let table = ConnectionTable::new(4);
        let (conn, rx) = table.open();
        assert!(table.is_connected(conn));

        // Writer went away without the table hearing about it.
        drop(rx);
        assert!(!table.is_connected(conn));
        assert_eq!(
            table.send(conn, OutboundEvent::UsernameTaken),
            Err(TransportError::Unreachable(conn))
        );

        let ghost = ConnId::new(999);
        assert!(!table.is_connected(ghost));
        assert_eq!(
            table.send(ghost, OutboundEvent::UsernameTaken),
            Err(TransportError::Unreachable(ghost))
        );
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let table = ConnectionTable::new(1);
        let (conn, mut rx) = table.open();
        table.send(conn, OutboundEvent::UsernameTaken).unwrap();
        assert_eq!(
            table.send(conn, OutboundEvent::Error("dropped".into())),
            Err(TransportError::QueueFull(conn))
        );
        // Still connected: a slow reader is not a dead one.
        assert!(table.is_connected(conn));
        assert_eq!(rx.try_recv().unwrap(), OutboundEvent::UsernameTaken);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_skips_unreachable_targets() {
        let table = ConnectionTable::new(4);
        let (a, mut rx_a) = table.open();
        let (b, rx_b) = table.open();
        drop(rx_b);

        table.broadcast(&[a, b, ConnId::new(500)], &OutboundEvent::UsernameTaken);
        assert_eq!(rx_a.try_recv().unwrap(), OutboundEvent::UsernameTaken);
        assert!(!table.is_connected(b));
    }

    #[test]
    fn close_removes_the_connection() {
        let table = ConnectionTable::new(4);
        let (conn, _rx) = table.open();
        assert_eq!(table.len(), 1);
        assert!(table.close(conn));
        assert!(!table.close(conn));
        assert!(table.is_empty());
        assert!(!table.is_connected(conn));
    }
}
