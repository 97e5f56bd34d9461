use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};

use jambox_core::{CorrelationId, Metadata, TrackId};

use crate::PeerId;

/// The kind of a message, sent as a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Debug = 0,
    Room = 1,
    Peer = 2,
    Playlist = 3,
    Player = 4,
}

impl Serialize for MsgType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(*self as u8)
    }
}

/// The peer a message originated from.
#[derive(Debug, Clone)]
pub struct Author {
    pub id: PeerId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomEvent {
    Join,
    Left,
    Host,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistCommand {
    Add,
    Remove,
    Move,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaylistUpdate {
    #[serde(rename = "ID")]
    pub id: TrackId,
    pub cmd: PlaylistCommand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moved_to: Option<TrackId>,
    #[serde(flatten)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Ok,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum TaskCommand {
    Update,
}

/// Progress of a request, sent only to the peer that made it.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    #[serde(rename = "Cmd")]
    cmd: TaskCommand,
    #[serde(rename = "TaskID")]
    pub task_id: CorrelationId,
    #[serde(rename = "Status")]
    pub status: TaskState,
}

/// Tells the host whether the next track can be streamed.
#[derive(Debug, Clone, Serialize)]
pub struct PlayerStatus {
    #[serde(rename = "NextID")]
    pub next_id: TrackId,
    #[serde(rename = "OK")]
    pub ok: bool,
}

/// Everything a hub sends to its members.
#[derive(Debug, Clone)]
pub enum RoomMessage {
    Room {
        from: Author,
        event: RoomEvent,
    },
    /// Signaling data passed through untouched
    Peer {
        from: Author,
        to: Option<PeerId>,
        data: String,
    },
    Playlist {
        from: Author,
        update: PlaylistUpdate,
    },
    TaskStatus(TaskStatus),
    PlayerStatus(PlayerStatus),
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Wire<'a, T> {
    msg_type: MsgType,
    #[serde(rename = "UID", skip_serializing_if = "Option::is_none")]
    uid: Option<PeerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    to: Option<PeerId>,
    data: T,
}

impl<'a, T> Wire<'a, T> {
    fn authored(msg_type: MsgType, author: &'a Author, data: T) -> Self {
        Self {
            msg_type,
            uid: Some(author.id),
            username: Some(&author.name),
            to: None,
            data,
        }
    }

    fn direct(msg_type: MsgType, data: T) -> Self {
        Self {
            msg_type,
            uid: None,
            username: None,
            to: None,
            data,
        }
    }
}

impl Serialize for RoomMessage {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Room { from, event } => {
                Wire::authored(MsgType::Room, from, event).serialize(serializer)
            }
            Self::Peer { from, to, data } => {
                let wire = Wire {
                    to: *to,
                    ..Wire::authored(MsgType::Peer, from, data)
                };

                wire.serialize(serializer)
            }
            Self::Playlist { from, update } => {
                Wire::authored(MsgType::Playlist, from, update).serialize(serializer)
            }
            Self::TaskStatus(status) => {
                Wire::direct(MsgType::Playlist, status).serialize(serializer)
            }
            Self::PlayerStatus(status) => {
                Wire::direct(MsgType::Player, status).serialize(serializer)
            }
        }
    }
}

impl RoomMessage {
    pub fn room_event(from: Author, event: RoomEvent) -> Self {
        Self::Room { from, event }
    }

    pub fn task_status(task_id: CorrelationId, status: TaskState) -> Self {
        Self::TaskStatus(TaskStatus {
            cmd: TaskCommand::Update,
            task_id,
            status,
        })
    }

    pub fn player_status(next_id: TrackId, ok: bool) -> Self {
        Self::PlayerStatus(PlayerStatus { next_id, ok })
    }

    pub fn msg_type(&self) -> MsgType {
        match self {
            Self::Room { .. } => MsgType::Room,
            Self::Peer { .. } => MsgType::Peer,
            Self::Playlist { .. } | Self::TaskStatus(_) => MsgType::Playlist,
            Self::PlayerStatus(_) => MsgType::Player,
        }
    }

    /// Serializes the message once so every recipient can share it.
    pub fn encode(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}

/// What a peer sends over its connection. Only the target is looked at,
/// the rest is relayed as is.
#[derive(Debug, Deserialize)]
pub struct InboundSignal {
    #[serde(rename = "To", default)]
    to: Option<String>,
}

impl InboundSignal {
    /// The peer this signal is meant for, if it names one.
    /// A target that can't be parsed never matches a member.
    pub fn target(&self) -> Option<PeerId> {
        match self.to.as_deref() {
            None | Some("") => None,
            Some(to) => Some(to.parse().unwrap_or_else(|_| PeerId::none())),
        }
    }
}

#[cfg(test)]
mod test {
    use serde_json::{json, Value};

    use super::*;

    fn author() -> Author {
        Author {
            id: PeerId::from_value(7),
            name: "ana".to_string(),
        }
    }

    fn to_value(message: &RoomMessage) -> Value {
        serde_json::from_str(&message.encode().unwrap()).unwrap()
    }

    #[test]
    fn test_room_event_shape() {
        let message = RoomMessage::room_event(author(), RoomEvent::Host);

        assert_eq!(
            to_value(&message),
            json!({ "MsgType": 1, "UID": "7", "Username": "ana", "Data": "host" })
        );
    }

    #[test]
    fn test_peer_relay_shape() {
        let message = RoomMessage::Peer {
            from: author(),
            to: Some(PeerId::from_value(9)),
            data: r#"{"To":"9"}"#.to_string(),
        };

        assert_eq!(
            to_value(&message),
            json!({ "MsgType": 2, "UID": "7", "Username": "ana", "To": "9", "Data": "{\"To\":\"9\"}" })
        );
    }

    #[test]
    fn test_playlist_update_flattens_metadata() {
        let message = RoomMessage::Playlist {
            from: author(),
            update: PlaylistUpdate {
                id: 3,
                cmd: PlaylistCommand::Add,
                moved_to: None,
                metadata: Some(Metadata {
                    title: "Song".to_string(),
                    uploader: "Someone".to_string(),
                    thumbnail: "t.jpg".to_string(),
                    duration: 61,
                }),
            },
        };

        let value = to_value(&message);

        assert_eq!(value["MsgType"], 3);
        assert_eq!(value["Data"]["ID"], 3);
        assert_eq!(value["Data"]["Cmd"], "add");
        assert_eq!(value["Data"]["FullTitle"], "Song");
        assert_eq!(value["Data"]["Duration"], 61);
        assert!(value["Data"].get("MovedTo").is_none());
    }

    #[test]
    fn test_direct_messages_carry_no_author() {
        let status = to_value(&RoomMessage::player_status(4, true));
        assert_eq!(status, json!({ "MsgType": 4, "Data": { "NextID": 4, "OK": true } }));

        let message = RoomMessage::task_status(CorrelationId::from_value(12), TaskState::Timeout);
        let status = to_value(&message);

        assert_eq!(status["MsgType"], 3);
        assert_eq!(status["Data"]["Cmd"], "update");
        assert_eq!(status["Data"]["Status"], "timeout");
        assert!(status.get("UID").is_none());
    }

    #[test]
    fn test_inbound_targets() {
        let parse = |text: &str| serde_json::from_str::<InboundSignal>(text).unwrap().target();

        assert_eq!(parse(r#"{"Data":"offer"}"#), None);
        assert_eq!(parse(r#"{"To":"","Data":"offer"}"#), None);
        assert_eq!(parse(r#"{"To":"5"}"#), Some(PeerId::from_value(5)));
        assert!(parse(r#"{"To":"nobody"}"#).unwrap().is_none());
    }
}
