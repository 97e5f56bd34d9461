use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::TrackId;

pub type EventSender = UnboundedSender<PlayerEvent>;
pub type EventReceiver = UnboundedReceiver<PlayerEvent>;

/// Describes the events that can be emitted by a player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// An audio fetch for a track finished. The room's host is told about it.
    TrackLoaded {
        track_id: TrackId,
        /// Whether the audio is now available
        ok: bool,
    },
}
