mod connection;
mod hub;
mod peer;
mod playlist;

use std::collections::HashMap;

use log::info;
use thiserror::Error;

use jambox_core::QueueError;

use crate::{util::random_string, CollabContext, PeerEntry, RoomEvent, RoomId, RoomMessage};

pub use connection::*;
pub use hub::*;
pub use peer::*;
pub use playlist::*;

const ROOM_ID_LENGTH: usize = 22;

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Room does not exist")]
    NotFound,
    #[error("Session does not exist or has expired")]
    SessionNotFound,
    #[error("Only the host can do this")]
    NotHost,
    #[error("This session already created a room that nobody has joined")]
    AlreadyCreated,
    #[error("This peer is already connected")]
    AlreadyConnected,
    #[error("Display names must be between 1 and {0} characters")]
    InvalidName(usize),
    #[error("Not a valid url")]
    InvalidUrl,
    #[error("Nothing is playing")]
    NoTrack,
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Creates rooms and lets peers into them.
pub struct RoomManager {
    context: CollabContext,
}

impl RoomManager {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Creates a room for the given session. The room is destroyed again
    /// if nobody joins it within the grace period.
    pub fn create_room(&self, token: &str) -> Result<RoomId, RoomError> {
        let context = &self.context;

        if context.sessions.get(token).is_none() {
            return Err(RoomError::SessionNotFound);
        }

        let room_id = random_string(ROOM_ID_LENGTH);
        let hub = Hub::spawn(
            room_id.clone(),
            context.registry.clone(),
            &context.config,
            context.audio_pool.clone(),
            context.extractor.clone(),
        );

        if let Err(e) = context
            .registry
            .insert_room(room_id.clone(), hub.clone(), &token.to_string())
        {
            hub.shutdown();
            return Err(e);
        }

        if !context
            .sessions
            .assign_room(token, room_id.clone(), Permission::Owner)
        {
            // The session expired in the meantime
            hub.shutdown();
            return Err(RoomError::SessionNotFound);
        }

        info!("Created room {}", room_id);
        Ok(room_id)
    }

    pub fn room_exists(&self, room_id: &str) -> bool {
        self.context
            .registry
            .room(room_id)
            .is_some_and(|hub| !hub.is_closed())
    }

    /// Turns a session into a connected peer of the room it points at.
    /// The session can't be used to connect again afterwards.
    pub fn connect(&self, token: &str) -> Result<PeerConnection, RoomError> {
        let context = &self.context;

        let profile = context
            .sessions
            .take(token)
            .ok_or(RoomError::SessionNotFound)?;

        let room_id = profile.room_id.ok_or(RoomError::NotFound)?;
        let hub = context
            .registry
            .room(&room_id)
            .filter(|hub| !hub.is_closed())
            .ok_or(RoomError::NotFound)?;

        let (peer, outbound) = Peer::new(
            profile.peer_id,
            profile.name,
            profile.permission,
            room_id.clone(),
            token.to_string(),
            context.config.peer_send_capacity,
        );

        let entry = PeerEntry {
            id: peer.id,
            name: peer.name.clone(),
            room_id,
        };

        context.registry.insert_peer(entry, token.to_string())?;

        // Everyone already in the room hears about the newcomer, the newcomer does not
        hub.broadcast(RoomMessage::room_event(peer.author(), RoomEvent::Join));

        let id = peer.id;
        hub.register(peer);

        Ok(PeerConnection::new(id, hub, outbound, &context.config))
    }

    /// Finds the connected peer a token belongs to, along with its room.
    pub fn peer_by_token(&self, token: &str) -> Result<(PeerEntry, HubHandle), RoomError> {
        let registry = &self.context.registry;

        let peer = registry
            .peer_by_token(token)
            .ok_or(RoomError::SessionNotFound)?;
        let hub = registry.room(&peer.room_id).ok_or(RoomError::NotFound)?;

        Ok((peer, hub))
    }

    /// Lists the members of the caller's room by their id.
    pub async fn users(&self, token: &str) -> Result<HashMap<PeerId, MemberInfo>, RoomError> {
        let (_, hub) = self.peer_by_token(token)?;

        let members = hub
            .members()
            .await
            .into_iter()
            .map(|member| (member.id, member))
            .collect();

        Ok(members)
    }

    /// Stops every room.
    pub fn shutdown_all(&self) {
        for hub in self.context.registry.rooms() {
            hub.shutdown();
        }
    }
}
