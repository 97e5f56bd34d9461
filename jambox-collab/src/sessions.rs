use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use log::debug;

use crate::{util::random_string, PeerId, Permission, RoomId, SessionToken};

const TOKEN_LENGTH: usize = 32;

/// Who a session belongs to, kept until the session connects.
#[derive(Debug, Clone)]
pub struct Profile {
    pub peer_id: PeerId,
    pub name: String,
    pub room_id: Option<RoomId>,
    pub permission: Permission,
}

/// Short-lived sessions issued before a peer connects.
///
/// Every session expires after the grace period unless it is taken first.
pub struct Sessions {
    profiles: Arc<DashMap<SessionToken, Profile>>,
    grace_period: Duration,
}

impl Sessions {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            profiles: Default::default(),
            grace_period,
        }
    }

    /// Issues a token for a new peer. Must be called from within a runtime.
    pub fn open(&self, name: impl Into<String>, room_id: Option<RoomId>) -> SessionToken {
        let token = random_string(TOKEN_LENGTH);
        let profile = Profile {
            peer_id: PeerId::new(),
            name: name.into(),
            room_id,
            permission: Permission::Guest,
        };

        self.profiles.insert(token.clone(), profile);

        let profiles = self.profiles.clone();
        let expiring = token.clone();
        let grace_period = self.grace_period;

        tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;

            if profiles.remove(&expiring).is_some() {
                debug!("Session for {} expired", expiring);
            }
        });

        token
    }

    pub fn get(&self, token: &str) -> Option<Profile> {
        self.profiles.get(token).map(|p| p.clone())
    }

    /// Points a session at a room. Returns false if the session is gone.
    pub fn assign_room(&self, token: &str, room_id: RoomId, permission: Permission) -> bool {
        match self.profiles.get_mut(token) {
            Some(mut profile) => {
                profile.room_id = Some(room_id);
                profile.permission = permission;
                true
            }
            None => false,
        }
    }

    /// Consumes a session.
    pub fn take(&self, token: &str) -> Option<Profile> {
        self.profiles.remove(token).map(|(_, profile)| profile)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
