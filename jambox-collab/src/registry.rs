use std::collections::HashMap;

use log::debug;
use parking_lot::RwLock;

use crate::{Author, HubHandle, PeerId, RoomError};

pub type RoomId = String;
pub type SessionToken = String;

/// A connected peer as seen from outside its hub.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub id: PeerId,
    pub name: String,
    pub room_id: RoomId,
}

impl PeerEntry {
    pub fn author(&self) -> Author {
        Author {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

#[derive(Default)]
struct Members {
    peers: HashMap<PeerId, PeerEntry>,
    tokens: HashMap<SessionToken, PeerId>,
}

#[derive(Default)]
struct Rooms {
    hubs: HashMap<RoomId, HubHandle>,
    /// Rooms nobody has joined yet, by the session that created them
    unclaimed: HashMap<SessionToken, RoomId>,
}

/// The process-wide lookup tables for peers, sessions, and rooms.
///
/// Peers and their tokens are always changed together under one lock, so a
/// peer is never visible in one table but not the other. A peer is only added
/// while its room is listed, and the room table stays read-locked until the
/// peer is in, so removing a room always sees every peer it had. When both
/// locks are held, the room table is taken first.
#[derive(Default)]
pub struct Registry {
    members: RwLock<Members>,
    rooms: RwLock<Rooms>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a room created by the given session.
    pub fn insert_room(
        &self,
        room_id: RoomId,
        hub: HubHandle,
        creator: &SessionToken,
    ) -> Result<(), RoomError> {
        let mut rooms = self.rooms.write();

        if rooms.unclaimed.contains_key(creator) {
            return Err(RoomError::AlreadyCreated);
        }

        rooms.unclaimed.insert(creator.clone(), room_id.clone());
        rooms.hubs.insert(room_id, hub);

        Ok(())
    }

    pub fn room(&self, room_id: &str) -> Option<HubHandle> {
        self.rooms.read().hubs.get(room_id).cloned()
    }

    /// Marks a room as joined, letting its creator create another one.
    pub fn claim_room(&self, room_id: &str) {
        self.rooms
            .write()
            .unclaimed
            .retain(|_, id| id.as_str() != room_id);
    }

    pub fn is_unclaimed(&self, room_id: &str) -> bool {
        self.rooms
            .read()
            .unclaimed
            .values()
            .any(|id| id == room_id)
    }

    /// Forgets a room and every peer that was in it.
    pub fn remove_room(&self, room_id: &str) {
        {
            let mut rooms = self.rooms.write();
            rooms.hubs.remove(room_id);
            rooms.unclaimed.retain(|_, id| id.as_str() != room_id);
        }

        let mut members = self.members.write();
        let Members { peers, tokens } = &mut *members;

        peers.retain(|_, peer| peer.room_id != room_id);
        tokens.retain(|_, id| peers.contains_key(id));

        debug!("Removed room {} from the registry", room_id);
    }

    /// Adds a peer to its room. Fails if the room was removed in the meantime.
    pub fn insert_peer(&self, entry: PeerEntry, token: SessionToken) -> Result<(), RoomError> {
        let rooms = self.rooms.read();

        if !rooms.hubs.contains_key(&entry.room_id) {
            return Err(RoomError::NotFound);
        }

        let mut members = self.members.write();

        if members.tokens.contains_key(&token) || members.peers.contains_key(&entry.id) {
            return Err(RoomError::AlreadyConnected);
        }

        members.tokens.insert(token, entry.id);
        members.peers.insert(entry.id, entry);

        Ok(())
    }

    pub fn remove_peer(&self, id: PeerId, token: &str) {
        let mut members = self.members.write();

        members.peers.remove(&id);
        members.tokens.remove(token);
    }

    pub fn peer(&self, id: PeerId) -> Option<PeerEntry> {
        self.members.read().peers.get(&id).cloned()
    }

    pub fn peer_by_token(&self, token: &str) -> Option<PeerEntry> {
        let members = self.members.read();

        members
            .tokens
            .get(token)
            .and_then(|id| members.peers.get(id))
            .cloned()
    }

    pub fn rooms(&self) -> Vec<HubHandle> {
        self.rooms.read().hubs.values().cloned().collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().hubs.len()
    }

    pub fn peer_count(&self) -> usize {
        self.members.read().peers.len()
    }
}
