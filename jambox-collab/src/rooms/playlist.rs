use bytes::Bytes;
use log::{debug, info, warn};
use serde::Deserialize;

use jambox_core::{
    CorrelationId, Deadline, FetchTask, Metadata, Submission, TaskError, TaskHandle, Track,
    TrackId,
};

use crate::{
    util::normalize_source_url, Author, HubHandle, PlaylistCommand, PlaylistUpdate, RoomMessage,
    TaskState,
};

use super::{RoomError, RoomManager};

/// A change to a room's queue requested by one of its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "Cmd", rename_all = "lowercase")]
pub enum QueueAction {
    Remove {
        #[serde(rename = "NodeID")]
        id: TrackId,
    },
    Move {
        #[serde(rename = "NodeID")]
        id: TrackId,
        #[serde(rename = "Before")]
        before: TrackId,
    },
}

impl RoomManager {
    /// The current track followed by everything queued after it.
    pub fn playlist(&self, token: &str) -> Result<Vec<Track>, RoomError> {
        let (_, hub) = self.peer_by_token(token)?;

        Ok(hub.player().tracks())
    }

    /// Asks for a track to be added to the caller's room.
    ///
    /// The metadata is fetched in the background. The caller is told how that
    /// went through a task status message carrying the returned correlation id.
    pub fn request_track(&self, token: &str, url: &str) -> Result<Submission, RoomError> {
        let (peer, hub) = self.peer_by_token(token)?;
        let url = normalize_source_url(url).ok_or(RoomError::InvalidUrl)?;

        let context = &self.context;
        let deadline = Deadline::after(context.config.metadata_timeout);
        let (task, handle) =
            FetchTask::<Metadata>::new(context.extractor.clone(), url.clone(), deadline.clone());

        let submission = context.metadata_pool.submit(task, &deadline);

        match submission {
            Submission::Accepted(task_id) => {
                debug!("{} requested {} as task {}", peer.name, url, task_id);

                let request = TrackRequest {
                    hub,
                    requester: peer.author(),
                    url,
                    task_id,
                };

                tokio::spawn(request.complete(handle, deadline));
            }
            Submission::Rejected => info!("Rejected a track request from {}", peer.name),
            Submission::TimedOut => info!("Track request from {} timed out", peer.name),
        }

        Ok(submission)
    }

    /// Removes or moves a queued track and tells the room about it.
    pub fn edit_queue(&self, token: &str, action: QueueAction) -> Result<(), RoomError> {
        let (peer, hub) = self.peer_by_token(token)?;
        let queue = hub.player().queue();

        let update = match action {
            QueueAction::Remove { id } => {
                queue.remove(id)?;

                PlaylistUpdate {
                    id,
                    cmd: PlaylistCommand::Remove,
                    moved_to: None,
                    metadata: None,
                }
            }
            QueueAction::Move { id, before } => {
                queue.move_before(id, before)?;

                PlaylistUpdate {
                    id,
                    cmd: PlaylistCommand::Move,
                    moved_to: Some(before),
                    metadata: None,
                }
            }
        };

        hub.broadcast(RoomMessage::Playlist {
            from: peer.author(),
            update,
        });

        Ok(())
    }

    /// The audio of the current track. If the host just skipped, this waits
    /// for the track that replaces it.
    pub async fn stream(&self, token: &str) -> Result<Bytes, RoomError> {
        let (_, hub) = self.peer_by_token(token)?;

        // Taken before waiting so a later skip can't swap it out from under us
        let pending = hub.player().current_track();

        pending
            .wait()
            .await
            .filter(Track::has_audio)
            .and_then(|track| track.audio())
            .ok_or(RoomError::NoTrack)
    }

    /// Ends the current track and moves on to the next one.
    pub async fn stream_end(&self, token: &str) -> Result<(), RoomError> {
        let hub = self.host_room(token).await?;

        hub.player().next();
        Ok(())
    }

    /// Starts downloading the next track ahead of time.
    pub async fn stream_preload(&self, token: &str) -> Result<(), RoomError> {
        let hub = self.host_room(token).await?;

        hub.player().preload();
        Ok(())
    }

    async fn host_room(&self, token: &str) -> Result<HubHandle, RoomError> {
        let (peer, hub) = self.peer_by_token(token)?;

        if hub.host().await != Some(peer.id) {
            return Err(RoomError::NotHost);
        }

        Ok(hub)
    }
}

/// A metadata fetch that was accepted and still has to be answered.
struct TrackRequest {
    hub: HubHandle,
    requester: Author,
    url: String,
    task_id: CorrelationId,
}

impl TrackRequest {
    async fn complete(self, handle: TaskHandle<Metadata>, deadline: Deadline) {
        let status = match handle.result_within(&deadline).await {
            Ok(metadata) => return self.enqueue(metadata),
            Err(TaskError::TimedOut | TaskError::Cancelled) => TaskState::Timeout,
            Err(e) => {
                warn!("Could not resolve {}: {}", self.url, e);
                TaskState::Failed
            }
        };

        self.report(status);
    }

    fn enqueue(self, metadata: Metadata) {
        let player = self.hub.player();

        if player.is_shut_down() {
            debug!("Room {} closed before {} resolved", self.hub.room_id(), self.url);
            return;
        }

        let track = Track::new(self.url.clone(), metadata.clone());

        let id = match player.queue().enqueue(track) {
            Ok(id) => id,
            Err(e) => {
                let room_id = self.hub.room_id();
                warn!("Could not add {} to room {}: {}", self.url, room_id, e);
                return self.report(TaskState::Failed);
            }
        };

        info!(
            "{} added {} to room {}",
            self.requester.name,
            metadata.title,
            self.hub.room_id()
        );

        self.report(TaskState::Ok);
        self.hub.broadcast(RoomMessage::Playlist {
            from: self.requester.clone(),
            update: PlaylistUpdate {
                id,
                cmd: PlaylistCommand::Add,
                moved_to: None,
                metadata: Some(metadata),
            },
        });

        player.added_song();
    }

    fn report(&self, status: TaskState) {
        let message = RoomMessage::task_status(self.task_id, status);
        self.hub.direct(self.requester.id, message);
    }
}
