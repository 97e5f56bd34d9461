use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use crossbeam::atomic::AtomicCell;
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use crate::{
    Config, Deadline, DispatchPool, EventSender, Extractor, FetchTask, OrderedQueue, PlayerEvent,
    Submission, TaskError, Track,
};

use super::resolution::{self, PendingTrack, Resolver};

/// Where a player is in its lifecycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// Nothing is current. The queue may still have tracks in it.
    #[default]
    Idle,
    /// A track was picked and its audio is being fetched.
    Fetching,
    /// The current track has audio and can be streamed.
    Ready,
    /// The current track was discarded and the next one is being promoted.
    Advancing,
}

enum PlayerSignal {
    AddedSong,
    NextSong(Resolver),
    Preload,
}

/// Sequences the tracks of a room: fetches the head of the queue, promotes it
/// to the current track, and notifies the host when audio becomes available.
pub struct Player {
    queue: Arc<OrderedQueue<Track>>,
    state: AtomicCell<PlayerState>,
    current: Mutex<Option<Track>>,
    /// The most recent advance, awaited by readers that want the current audio
    pending: Mutex<PendingTrack>,
    /// Shared by the transition path and preloading so a track is never fetched twice at once
    fetch_lock: AsyncMutex<()>,
    signals: mpsc::UnboundedSender<PlayerSignal>,
    events: EventSender,
    pool: Arc<DispatchPool>,
    extractor: Arc<dyn Extractor>,
    audio_timeout: Duration,
    shutdown: CancellationToken,
}

impl Player {
    /// Creates a player with an empty queue and starts processing its signals.
    pub fn spawn(
        config: &Config,
        pool: Arc<DispatchPool>,
        extractor: Arc<dyn Extractor>,
        events: EventSender,
    ) -> Arc<Self> {
        let (signals, receiver) = mpsc::unbounded_channel();

        let player = Arc::new(Self {
            queue: Arc::new(OrderedQueue::new(config.playlist_capacity)),
            state: Default::default(),
            current: Default::default(),
            pending: Mutex::new(resolution::settled(None)),
            fetch_lock: Default::default(),
            signals,
            events,
            pool,
            extractor,
            audio_timeout: config.audio_timeout,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(player.clone().run(receiver));
        player
    }

    /// Tells the player that a track was added to the queue.
    pub fn added_song(&self) {
        self.signal(PlayerSignal::AddedSong);
    }

    /// Discards the current track and promotes the next one.
    /// Readers that ask for the current track after this returns will see the new one.
    pub fn next(&self) {
        let (resolver, pending) = resolution::pending();
        *self.pending.lock() = pending;

        self.signal(PlayerSignal::NextSong(resolver));
    }

    /// Fetches the audio of the queue's head in the background.
    pub fn preload(&self) {
        self.signal(PlayerSignal::Preload);
    }

    /// Returns the current track once the latest advance has resolved.
    pub fn current_track(&self) -> PendingTrack {
        self.pending.lock().clone()
    }

    /// Returns the current track as it is right now.
    pub fn current(&self) -> Option<Track> {
        self.current.lock().clone()
    }

    /// Returns the current track followed by everything in the queue.
    pub fn tracks(&self) -> Vec<Track> {
        self.current()
            .into_iter()
            .chain(self.queue.items())
            .collect()
    }

    pub fn queue(&self) -> &Arc<OrderedQueue<Track>> {
        &self.queue
    }

    pub fn state(&self) -> PlayerState {
        self.state.load()
    }

    /// Stops the player and drops everything in its queue.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn signal(&self, signal: PlayerSignal) {
        // After shutdown nobody is listening, which is fine
        self.signals.send(signal).ok();
    }

    async fn run(self: Arc<Self>, mut receiver: mpsc::UnboundedReceiver<PlayerSignal>) {
        loop {
            let signal = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                signal = receiver.recv() => signal,
            };

            let Some(signal) = signal else {
                break;
            };

            match signal {
                PlayerSignal::AddedSong => self.on_added_song().await,
                PlayerSignal::NextSong(resolver) => self.on_next_song(resolver).await,
                PlayerSignal::Preload => self.on_preload(),
            }
        }

        self.queue.clear();
        self.state.store(PlayerState::Idle);
        *self.current.lock() = None;

        debug!("Player stopped");
    }

    async fn on_added_song(&self) {
        let _guard = self.fetch_lock.lock().await;

        // New arrivals only matter when nothing is current
        if self.state() != PlayerState::Idle {
            return;
        }

        let Some(head) = self.queue.peek() else {
            debug!("Received a new track signal but the queue is empty");
            return;
        };

        // An unsettled promise belongs to a queued skip, which decides what readers get
        let resolver = {
            let mut current = self.pending.lock();

            if current.is_settled() {
                let (resolver, pending) = resolution::pending();
                *current = pending;
                Some(resolver)
            } else {
                None
            }
        };

        let track = self.promote(head).await;

        if let Some(resolver) = resolver {
            resolver.settle(track);
        }
    }

    async fn on_next_song(&self, resolver: Resolver) {
        let _guard = self.fetch_lock.lock().await;

        *self.current.lock() = None;
        self.state.store(PlayerState::Advancing);

        let track = match self.queue.peek() {
            Some(head) => self.promote(head).await,
            None => {
                self.state.store(PlayerState::Idle);
                None
            }
        };

        resolver.settle(track);
    }

    fn on_preload(self: &Arc<Self>) {
        let player = self.clone();

        tokio::spawn(async move {
            let _guard = player.fetch_lock.lock().await;

            let Some(head) = player.queue.peek() else {
                return;
            };

            if head.has_audio() {
                return;
            }

            match player.fetch_audio(&head).await {
                Ok(audio) => {
                    if player.is_shut_down() {
                        return;
                    }

                    match player.queue.update(head.id, |t| t.attach_audio(audio)) {
                        Ok(()) => player.emit(PlayerEvent::TrackLoaded {
                            track_id: head.id,
                            ok: true,
                        }),
                        Err(e) => debug!("Preloaded track is gone: {}", e),
                    }
                }
                Err(e) => debug!("Preloading track {} failed: {}", head.id, e),
            }
        });
    }

    /// Makes the given queue head the current track, fetching its audio first if needed.
    async fn promote(&self, mut head: Track) -> Option<Track> {
        let fetched = !head.has_audio();

        if fetched {
            self.state.store(PlayerState::Fetching);

            match self.fetch_audio(&head).await {
                Ok(audio) => head.attach_audio(audio),
                Err(e) => {
                    warn!("Fetching audio for track {} failed: {}", head.id, e);

                    self.state.store(PlayerState::Idle);
                    self.emit(PlayerEvent::TrackLoaded {
                        track_id: head.id,
                        ok: false,
                    });

                    return None;
                }
            }

            if self.is_shut_down() {
                return None;
            }
        }

        // The track may have been removed by a user while it was fetching
        let mut track = match self.queue.remove(head.id) {
            Ok(track) => track,
            Err(e) => {
                info!("Track {} was removed before it could play: {}", head.id, e);
                self.state.store(PlayerState::Idle);
                return None;
            }
        };

        if !track.has_audio() {
            if let Some(audio) = head.audio() {
                track.attach_audio(audio);
            }
        }

        *self.current.lock() = Some(track.clone());
        self.state.store(PlayerState::Ready);

        if fetched {
            self.emit(PlayerEvent::TrackLoaded {
                track_id: track.id,
                ok: true,
            });
        }

        info!("Now playing track {}: {}", track.id, track.metadata.title);
        Some(track)
    }

    async fn fetch_audio(&self, track: &Track) -> Result<Bytes, TaskError> {
        let deadline = Deadline::with_token(self.shutdown.child_token(), self.audio_timeout);
        let (task, handle) =
            FetchTask::<Bytes>::new(self.extractor.clone(), &track.source_url, deadline.clone());

        match self.pool.submit(task, &deadline) {
            Submission::Accepted(id) => {
                debug!("Fetching audio for track {} as task {}", track.id, id);
                handle.result_within(&deadline).await
            }
            Submission::Rejected => Err(TaskError::Rejected),
            Submission::TimedOut => Err(TaskError::TimedOut),
        }
    }

    fn emit(&self, event: PlayerEvent) {
        self.events.send(event).ok();
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use tokio::sync::mpsc::unbounded_channel;

    use crate::{EventReceiver, ExtractError, Metadata};

    use super::*;

    /// Fails audio fetches until told otherwise.
    #[derive(Default)]
    struct FlakyExtractor {
        working: AtomicBool,
    }

    #[async_trait]
    impl Extractor for FlakyExtractor {
        async fn metadata(&self, url: &str) -> Result<Metadata, ExtractError> {
            Ok(Metadata {
                title: url.to_string(),
                ..Default::default()
            })
        }

        async fn audio(&self, url: &str) -> Result<Bytes, ExtractError> {
            if self.working.load(Ordering::SeqCst) {
                Ok(Bytes::from(format!("audio of {}", url)))
            } else {
                Err(ExtractError::Failed("Video unavailable".to_string()))
            }
        }
    }

    fn setup() -> (Arc<Player>, Arc<FlakyExtractor>, EventReceiver) {
        let config = Config::default();
        let pool = Arc::new(DispatchPool::new("audio", &config));
        let extractor = Arc::new(FlakyExtractor::default());
        let (events, receiver) = unbounded_channel();

        pool.run();

        let player = Player::spawn(&config, pool, extractor.clone(), events);
        (player, extractor, receiver)
    }

    fn enqueue(player: &Player, url: &str) -> u64 {
        player
            .queue()
            .enqueue(Track::new(url, Metadata::default()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_failed_fetch_stays_idle_and_retries() {
        let (player, extractor, mut events) = setup();

        let id = enqueue(&player, "first");
        player.added_song();

        assert_eq!(
            events.recv().await,
            Some(PlayerEvent::TrackLoaded {
                track_id: id,
                ok: false
            })
        );
        assert_eq!(player.state(), PlayerState::Idle);
        assert!(player.current().is_none());
        assert_eq!(player.queue().ids(), vec![id]);

        extractor.working.store(true, Ordering::SeqCst);
        player.added_song();

        assert_eq!(
            events.recv().await,
            Some(PlayerEvent::TrackLoaded {
                track_id: id,
                ok: true
            })
        );

        let current = player.current_track().wait().await.unwrap();
        assert_eq!(current.id, id);
        assert_eq!(current.audio().unwrap(), Bytes::from("audio of first"));
        assert_eq!(player.state(), PlayerState::Ready);
        assert!(player.queue().is_empty());
    }

    #[tokio::test]
    async fn test_added_song_while_ready_keeps_current() {
        let (player, extractor, mut events) = setup();
        extractor.working.store(true, Ordering::SeqCst);

        let first = enqueue(&player, "first");
        player.added_song();
        events.recv().await;

        let second = enqueue(&player, "second");
        player.added_song();

        let current = player.current_track().wait().await.unwrap();
        assert_eq!(current.id, first);
        assert_eq!(player.queue().ids(), vec![second]);
    }

    #[tokio::test]
    async fn test_next_song_waits_for_new_track() {
        let (player, extractor, mut events) = setup();
        extractor.working.store(true, Ordering::SeqCst);

        enqueue(&player, "first");
        player.added_song();
        events.recv().await;

        let second = enqueue(&player, "second");

        player.next();
        let pending = player.current_track();

        let current = pending.wait().await.unwrap();
        assert_eq!(current.id, second);
        assert_eq!(player.tracks().len(), 1);
    }

    #[tokio::test]
    async fn test_skip_queued_behind_added_song_wins() {
        let (player, extractor, mut events) = setup();
        extractor.working.store(true, Ordering::SeqCst);

        let first = enqueue(&player, "first");
        player.added_song();
        player.next();

        let pending = player.current_track();

        // The added song is promoted first, then skipped
        assert_eq!(
            events.recv().await,
            Some(PlayerEvent::TrackLoaded {
                track_id: first,
                ok: true
            })
        );

        assert!(pending.wait().await.is_none());
        assert!(player.current_track().wait().await.is_none());
        assert!(player.current().is_none());
        assert_eq!(player.state(), PlayerState::Idle);
    }

    #[tokio::test]
    async fn test_skip_queued_behind_added_song_serves_next_track() {
        let (player, extractor, _events) = setup();
        extractor.working.store(true, Ordering::SeqCst);

        enqueue(&player, "first");
        let second = enqueue(&player, "second");
        player.added_song();
        player.next();

        let current = player.current_track().wait().await.unwrap();
        assert_eq!(current.id, second);
        assert_eq!(player.current().map(|t| t.id), Some(second));
        assert!(player.queue().is_empty());
    }

    #[tokio::test]
    async fn test_next_song_on_empty_queue_goes_idle() {
        let (player, extractor, mut events) = setup();
        extractor.working.store(true, Ordering::SeqCst);

        enqueue(&player, "only");
        player.added_song();
        events.recv().await;

        player.next();

        assert!(player.current_track().wait().await.is_none());
        assert_eq!(player.state(), PlayerState::Idle);
    }

    #[tokio::test]
    async fn test_preload_reuses_payload() {
        let (player, extractor, mut events) = setup();
        extractor.working.store(true, Ordering::SeqCst);

        enqueue(&player, "first");
        player.added_song();
        events.recv().await;

        let second = enqueue(&player, "second");
        player.preload();

        assert_eq!(
            events.recv().await,
            Some(PlayerEvent::TrackLoaded {
                track_id: second,
                ok: true
            })
        );
        assert!(player.queue().peek().unwrap().has_audio());

        // Promoting the preloaded track doesn't fetch it again
        extractor.working.store(false, Ordering::SeqCst);
        player.next();

        let current = player.current_track().wait().await.unwrap();
        assert_eq!(current.id, second);
        assert!(current.has_audio());
    }

    #[tokio::test]
    async fn test_shutdown_clears_queue() {
        let (player, _, _events) = setup();

        enqueue(&player, "first");
        player.shutdown();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !player.queue().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        // Signals after shutdown are ignored
        player.added_song();
        assert_eq!(player.state(), PlayerState::Idle);
    }
}
