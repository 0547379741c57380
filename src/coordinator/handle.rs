//! Typed mailbox of the coordinator context.

use tokio::sync::{mpsc, oneshot};

use crate::error::ChannelError;
use crate::messages::{CoordinatorMessage, CoordinatorReply};

const COORDINATOR_TARGET: &str = "coordinator";

/// One inbound message, with a reply slot when the sender waits for an answer
#[derive(Debug)]
pub struct Envelope {
    pub message: CoordinatorMessage,
    pub reply: Option<oneshot::Sender<CoordinatorReply>>,
}

pub type Inbox = mpsc::UnboundedReceiver<Envelope>;

/// Cloneable sender side of the coordinator inbox
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl CoordinatorHandle {
    pub fn channel() -> (Self, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Fire-and-forget delivery.
    pub fn notify(&self, message: CoordinatorMessage) -> Result<(), ChannelError> {
        self.tx
            .send(Envelope {
                message,
                reply: None,
            })
            .map_err(|_| ChannelError::Disconnected {
                target: COORDINATOR_TARGET.to_string(),
            })
    }

    /// Deliver and wait for the coordinator's reply.
    pub async fn request(&self, message: CoordinatorMessage) -> Result<CoordinatorReply, ChannelError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                message,
                reply: Some(reply_tx),
            })
            .map_err(|_| ChannelError::Disconnected {
                target: COORDINATOR_TARGET.to_string(),
            })?;
        reply_rx.await.map_err(|_| ChannelError::Disconnected {
            target: COORDINATOR_TARGET.to_string(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
