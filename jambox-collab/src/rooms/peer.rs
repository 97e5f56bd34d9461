use std::{sync::Arc, time::Instant};

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use jambox_core::Id;

use crate::{Author, RoomId, SessionToken};

pub type PeerId = Id<Peer>;

/// What a peer is allowed to do in a room.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(into = "u8")]
pub enum Permission {
    #[default]
    Guest = 1,
    Owner = 7,
}

impl From<Permission> for u8 {
    fn from(permission: Permission) -> Self {
        permission as u8
    }
}

/// Why a message could not be handed to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Undelivered {
    /// The outbound buffer is full
    SlowConsumer,
    /// The connection stopped reading
    Disconnected,
}

/// One connected participant in a room. Owned by the room's hub.
#[derive(Debug)]
pub struct Peer {
    pub id: PeerId,
    pub name: String,
    pub permission: Permission,
    pub room_id: RoomId,
    pub token: SessionToken,
    joined_at: Instant,
    outbound: mpsc::Sender<Arc<str>>,
}

impl Peer {
    /// Creates a peer along with the receiving end of its outbound buffer.
    pub fn new(
        id: PeerId,
        name: impl Into<String>,
        permission: Permission,
        room_id: RoomId,
        token: SessionToken,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (outbound, receiver) = mpsc::channel(capacity.max(1));

        let peer = Self {
            id,
            name: name.into(),
            permission,
            room_id,
            token,
            joined_at: Instant::now(),
            outbound,
        };

        (peer, receiver)
    }

    pub fn author(&self) -> Author {
        Author {
            id: self.id,
            name: self.name.clone(),
        }
    }

    pub fn joined_at(&self) -> Instant {
        self.joined_at
    }

    /// Queues an encoded message without waiting.
    pub fn send(&self, message: Arc<str>) -> Result<(), Undelivered> {
        self.outbound.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => Undelivered::SlowConsumer,
            TrySendError::Closed(_) => Undelivered::Disconnected,
        })
    }
}
