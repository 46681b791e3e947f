//! Per-connection outbound queue.
//!
//! Sources push into a bounded channel without ever waiting; the WebSocket
//! writer drains it. When the writer falls behind the newest live message is
//! dropped. A snapshot is sent through a slot reserved before its source
//! starts, so it is never the message that gets dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::{self, OwnedPermit, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::ServerMessage;

/// Producer side of a connection's outbound queue
#[derive(Clone, Debug)]
pub struct OutboundSender {
    tx: mpsc::Sender<ServerMessage>,
    dropped: Arc<AtomicU64>,
    session: Uuid,
    deliver_timeout: Duration,
}

/// Create a queue holding at most `capacity` messages
///
/// `deliver_timeout` bounds how long [`OutboundSender::deliver`] waits for
/// room.
pub fn channel(
    capacity: usize,
    session: Uuid,
    deliver_timeout: Duration,
) -> (OutboundSender, mpsc::Receiver<ServerMessage>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sender = OutboundSender {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
        session,
        deliver_timeout,
    };
    (sender, rx)
}

impl OutboundSender {
    /// Queue `message` if there is room, otherwise drop it
    ///
    /// Never blocks. Returns whether the message was queued.
    pub fn offer(&self, message: ServerMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.record_drop();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Queue `message`, waiting up to the delivery timeout for room
    pub async fn deliver(&self, message: ServerMessage) -> bool {
        match tokio::time::timeout(self.deliver_timeout, self.tx.send(message)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => false,
            Err(_) => {
                self.record_drop();
                false
            }
        }
    }

    /// Hold one queue slot, waiting up to the delivery timeout for room
    ///
    /// Returns `None` when the queue stayed full or the connection is gone.
    pub async fn reserve(&self) -> Option<OwnedPermit<ServerMessage>> {
        match tokio::time::timeout(self.deliver_timeout, self.tx.clone().reserve_owned()).await {
            Ok(Ok(permit)) => Some(permit),
            Ok(Err(_)) => None,
            Err(_) => {
                self.record_drop();
                None
            }
        }
    }

    /// Messages dropped so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn record_drop(&self) {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if total == 1 {
            warn!(session = %self.session, "Outbound queue full, dropping messages");
        } else {
            debug!(session = %self.session, dropped = total, "Dropped outbound message");
        }
    }
}
