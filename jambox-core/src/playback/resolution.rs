use tokio::sync::watch;

use crate::Track;

type Slot = Option<Option<Track>>;

/// Settles a [PendingTrack] with whatever became the current track.
pub struct Resolver {
    sender: watch::Sender<Slot>,
}

/// The result of one advance of a player. Readers take it once and wait on it.
#[derive(Clone)]
pub struct PendingTrack {
    receiver: watch::Receiver<Slot>,
}

/// Creates an unsettled pair.
pub fn pending() -> (Resolver, PendingTrack) {
    let (sender, receiver) = watch::channel(None);
    (Resolver { sender }, PendingTrack { receiver })
}

/// Creates a track that is already known.
pub fn settled(track: Option<Track>) -> PendingTrack {
    let (sender, receiver) = watch::channel(Some(track));
    drop(sender);

    PendingTrack { receiver }
}

impl Resolver {
    pub fn settle(self, track: Option<Track>) {
        self.sender.send_replace(Some(track));
    }
}

impl PendingTrack {
    /// Waits until the advance this was taken from is resolved.
    /// A resolver dropped without settling counts as no track.
    pub async fn wait(mut self) -> Option<Track> {
        match self.receiver.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone().flatten(),
            Err(_) => None,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.receiver.borrow().is_some()
    }
}
