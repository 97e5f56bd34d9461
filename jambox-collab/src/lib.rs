mod messages;
mod registry;
mod rooms;
mod sessions;
mod util;

use std::sync::Arc;

use jambox_core::{Config, DispatchPool, Extractor};

pub use messages::*;
pub use registry::*;
pub use rooms::*;
pub use sessions::*;
pub use util::normalize_source_url;

const MAX_NAME_LENGTH: usize = 32;

/// The jambox collab system, facilitating sessions, rooms, and playlists.
pub struct Collab {
    context: CollabContext,

    pub rooms: RoomManager,
}

/// A type passed to various components of the collab system, to access shared state.
#[derive(Clone)]
pub struct CollabContext {
    pub config: Config,
    pub registry: Arc<Registry>,
    pub sessions: Arc<Sessions>,
    pub extractor: Arc<dyn Extractor>,
    pub metadata_pool: Arc<DispatchPool>,
    pub audio_pool: Arc<DispatchPool>,
}

impl Collab {
    /// Creates the collab system and starts its dispatch pools.
    /// Must be called from within a runtime.
    pub fn new(config: Config, extractor: Arc<dyn Extractor>) -> Self {
        let metadata_pool = Arc::new(DispatchPool::new("metadata", &config));
        let audio_pool = Arc::new(DispatchPool::new("audio", &config));

        metadata_pool.run();
        audio_pool.run();

        let context = CollabContext {
            registry: Default::default(),
            sessions: Arc::new(Sessions::new(config.session_grace_period)),
            config,
            extractor,
            metadata_pool,
            audio_pool,
        };

        let rooms = RoomManager::new(&context);

        Self { context, rooms }
    }

    /// Starts a session for someone about to create or join a room.
    pub fn open_session(
        &self,
        name: &str,
        room_id: Option<RoomId>,
    ) -> Result<SessionToken, RoomError> {
        let name = name.trim();

        if name.is_empty() || name.chars().count() > MAX_NAME_LENGTH {
            return Err(RoomError::InvalidName(MAX_NAME_LENGTH));
        }

        Ok(self.context.sessions.open(name, room_id))
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.context.registry
    }

    pub fn sessions(&self) -> &Arc<Sessions> {
        &self.context.sessions
    }

    /// Stops every room and waits for the pools to finish what they are doing.
    pub async fn shutdown(&self) {
        self.rooms.shutdown_all();

        self.context.metadata_pool.join().await;
        self.context.audio_pool.join().await;
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::Value;
    use tokio::time::timeout;

    use jambox_core::{ExtractError, Metadata, QueueError, Submission};

    use super::*;

    struct StaticExtractor;

    #[async_trait]
    impl Extractor for StaticExtractor {
        async fn metadata(&self, url: &str) -> Result<Metadata, ExtractError> {
            if url.contains("missing") {
                return Err(ExtractError::Failed("Resource was not found".to_string()));
            }

            Ok(Metadata {
                title: "A Song".to_string(),
                uploader: "Someone".to_string(),
                thumbnail: "t.jpg".to_string(),
                duration: 212,
            })
        }

        async fn audio(&self, _: &str) -> Result<Bytes, ExtractError> {
            Ok(Bytes::from_static(b"audio"))
        }
    }

    fn collab() -> Collab {
        Collab::new(Config::default(), Arc::new(StaticExtractor))
    }

    async fn next_message(connection: &mut PeerConnection) -> Value {
        let message = timeout(Duration::from_secs(1), connection.next_outbound())
            .await
            .expect("no message arrived")
            .expect("outbound buffer closed");

        serde_json::from_str(&message).unwrap()
    }

    /// Creates a room and connects its creator.
    fn open_room(collab: &Collab) -> (SessionToken, RoomId, PeerConnection) {
        let token = collab.open_session("host", None).unwrap();
        let room_id = collab.rooms.create_room(&token).unwrap();
        let connection = collab.rooms.connect(&token).unwrap();

        (token, room_id, connection)
    }

    #[tokio::test]
    async fn test_names_are_validated() {
        let collab = collab();

        assert!(collab.open_session("  ", None).is_err());
        assert!(collab.open_session(&"x".repeat(33), None).is_err());
        assert!(collab.open_session(" ana ", None).is_ok());
    }

    #[tokio::test]
    async fn test_join_and_list_users() {
        let collab = collab();
        let (host_token, room_id, mut host) = open_room(&collab);

        let guest_token = collab.open_session("guest", Some(room_id)).unwrap();
        let guest = collab.rooms.connect(&guest_token).unwrap();

        let joined = next_message(&mut host).await;
        assert_eq!(joined["Data"], "join");
        assert_eq!(joined["UID"], guest.peer_id().to_string());

        let users = collab.rooms.users(&guest_token).await.unwrap();
        assert_eq!(users.len(), 2);
        assert!(users[&host.peer_id()].host);
        assert!(!users[&guest.peer_id()].host);
        assert_eq!(users[&guest.peer_id()].permission, Permission::Guest);
        assert_eq!(users[&host.peer_id()].permission, Permission::Owner);

        // Sessions are single use
        let again = collab.rooms.connect(&host_token);
        assert!(matches!(again, Err(RoomError::SessionNotFound)));
    }

    #[tokio::test]
    async fn test_only_one_unjoined_room_per_session() {
        let collab = collab();
        let token = collab.open_session("host", None).unwrap();

        collab.rooms.create_room(&token).unwrap();
        let again = collab.rooms.create_room(&token);

        assert!(matches!(again, Err(RoomError::AlreadyCreated)));
        assert_eq!(collab.registry().room_count(), 1);
    }

    #[tokio::test]
    async fn test_requested_track_becomes_streamable() {
        let collab = collab();
        let (token, _, mut host) = open_room(&collab);

        let Submission::Accepted(task_id) = collab
            .rooms
            .request_track(&token, "youtu.be/abc")
            .unwrap()
        else {
            panic!("request was not accepted");
        };

        let status = next_message(&mut host).await;
        assert_eq!(status["MsgType"], 3);
        assert_eq!(status["Data"]["TaskID"], task_id.value());
        assert_eq!(status["Data"]["Status"], "ok");

        let added = next_message(&mut host).await;
        assert_eq!(added["Data"]["Cmd"], "add");
        assert_eq!(added["Data"]["FullTitle"], "A Song");

        let loaded = next_message(&mut host).await;
        assert_eq!(loaded["MsgType"], 4);
        assert_eq!(loaded["Data"]["OK"], true);

        let audio = collab.rooms.stream(&token).await.unwrap();
        assert_eq!(audio.as_ref(), b"audio");

        let playlist = collab.rooms.playlist(&token).unwrap();
        assert_eq!(playlist.len(), 1);
        assert_eq!(playlist[0].source_url, "https://youtu.be/abc");
    }

    #[tokio::test]
    async fn test_failed_request_is_reported() {
        let collab = collab();
        let (token, _, mut host) = open_room(&collab);

        let submission = collab.rooms.request_track(&token, "missing.example/x");
        assert!(matches!(submission, Ok(Submission::Accepted(_))));

        let status = next_message(&mut host).await;
        assert_eq!(status["Data"]["Status"], "failed");
        assert!(collab.rooms.playlist(&token).unwrap().is_empty());

        let invalid = collab.rooms.request_track(&token, "not a url");
        assert!(matches!(invalid, Err(RoomError::InvalidUrl)));
    }

    #[tokio::test]
    async fn test_editing_unknown_tracks_fails() {
        let collab = collab();
        let (token, _, _host) = open_room(&collab);

        let removed = collab
            .rooms
            .edit_queue(&token, QueueAction::Remove { id: 42 });

        assert!(matches!(
            removed,
            Err(RoomError::Queue(QueueError::NotFound(42)))
        ));
    }

    #[tokio::test]
    async fn test_only_the_host_controls_playback() {
        let collab = collab();
        let (host_token, room_id, _host) = open_room(&collab);

        let guest_token = collab.open_session("guest", Some(room_id)).unwrap();
        let _guest = collab.rooms.connect(&guest_token).unwrap();

        let skipped = collab.rooms.stream_end(&guest_token).await;
        assert!(matches!(skipped, Err(RoomError::NotHost)));

        assert!(collab.rooms.stream_end(&host_token).await.is_ok());
        assert!(collab.rooms.stream_preload(&host_token).await.is_ok());

        // Nothing was queued, so the skip resolves to nothing
        let stream = collab.rooms.stream(&host_token).await;
        assert!(matches!(stream, Err(RoomError::NoTrack)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_room_leaves_nothing_behind() {
        let collab = collab();
        let token = collab.open_session("host", None).unwrap();
        let room_id = collab.rooms.create_room(&token).unwrap();

        let hub = collab.registry().room(&room_id).unwrap();
        timeout(Duration::from_secs(11), hub.closed()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(!collab.rooms.room_exists(&room_id));
        assert!(collab.registry().room(&room_id).is_none());
        assert!(!collab.registry().is_unclaimed(&room_id));
        assert!(collab.registry().peer_by_token(&token).is_none());
        assert!(collab.sessions().get(&token).is_none());
        assert!(matches!(
            collab.rooms.connect(&token),
            Err(RoomError::SessionNotFound)
        ));
    }
}
