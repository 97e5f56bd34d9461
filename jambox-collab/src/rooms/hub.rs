use std::{collections::VecDeque, sync::Arc};

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use jambox_core::{Config, DispatchPool, EventReceiver, Extractor, Player, PlayerEvent};

use crate::{Peer, PeerId, Permission, Registry, RoomEvent, RoomId, RoomMessage, Undelivered};

/// Everything a hub reacts to, handled one at a time in the order received.
pub enum HubEvent {
    Register(Peer),
    Unregister(PeerId),
    Broadcast(RoomMessage),
    Direct {
        to: PeerId,
        message: RoomMessage,
    },
    Relay {
        from: PeerId,
        to: Option<PeerId>,
        data: String,
    },
    Members(oneshot::Sender<Vec<MemberInfo>>),
    GraceExpired,
    Shutdown,
}

/// A snapshot of one member of a room.
#[derive(Debug, Clone, Serialize)]
pub struct MemberInfo {
    #[serde(skip)]
    pub id: PeerId,
    pub name: String,
    #[serde(skip)]
    pub permission: Permission,
    pub host: bool,
}

#[derive(Debug, Clone, Copy)]
enum Departure {
    Left,
    Evicted(Undelivered),
}

/// A cheap handle for sending events to a room's hub.
///
/// Once the hub has stopped, everything sent through it is ignored.
#[derive(Clone)]
pub struct HubHandle {
    room_id: RoomId,
    mailbox: mpsc::UnboundedSender<HubEvent>,
    player: Arc<Player>,
    closed: CancellationToken,
}

/// Owns the members of a room and serializes everything that happens to them.
pub struct Hub {
    room_id: RoomId,
    members: Vec<Peer>,
    /// Always a current member, looked up again every time it is used
    host: Option<PeerId>,
    registry: Arc<Registry>,
    player: Arc<Player>,
    closed: CancellationToken,
}

impl Hub {
    /// Starts a hub and its player. If nobody registers within the grace
    /// period the hub stops by itself.
    pub fn spawn(
        room_id: RoomId,
        registry: Arc<Registry>,
        config: &Config,
        pool: Arc<DispatchPool>,
        extractor: Arc<dyn Extractor>,
    ) -> HubHandle {
        let (events, player_events) = mpsc::unbounded_channel();
        let (mailbox, receiver) = mpsc::unbounded_channel();

        let player = Player::spawn(config, pool, extractor, events);
        let closed = CancellationToken::new();

        let hub = Self {
            room_id: room_id.clone(),
            members: Vec::new(),
            host: None,
            registry,
            player: player.clone(),
            closed: closed.clone(),
        };

        let handle = HubHandle {
            room_id,
            mailbox,
            player,
            closed,
        };

        tokio::spawn(hub.run(receiver, player_events));
        handle.start_grace_timer(config);

        handle
    }

    async fn run(
        mut self,
        mut mailbox: mpsc::UnboundedReceiver<HubEvent>,
        mut player_events: EventReceiver,
    ) {
        debug!("Room {} started", self.room_id);

        loop {
            let keep_running = tokio::select! {
                biased;
                event = mailbox.recv() => match event {
                    Some(event) => self.handle(event),
                    None => false,
                },
                Some(event) = player_events.recv() => self.on_player_event(event),
            };

            if !keep_running {
                break;
            }
        }

        self.teardown();
    }

    /// Returns false when the hub should stop.
    fn handle(&mut self, event: HubEvent) -> bool {
        match event {
            HubEvent::Register(peer) => {
                self.register(peer);
                true
            }
            HubEvent::Unregister(id) => self.remove_members([(id, Departure::Left)]),
            HubEvent::Broadcast(message) => {
                let undelivered = self.deliver(&message, None);
                self.remove_members(undelivered)
            }
            HubEvent::Direct { to, message } => {
                let undelivered = self.deliver_to(to, &message);
                self.remove_members(undelivered)
            }
            HubEvent::Relay { from, to, data } => self.relay(from, to, data),
            HubEvent::Members(reply) => {
                reply.send(self.member_list()).ok();
                true
            }
            HubEvent::GraceExpired => {
                if self.members.is_empty() {
                    info!("Nobody joined room {} in time", self.room_id);
                    return false;
                }

                true
            }
            HubEvent::Shutdown => false,
        }
    }

    fn on_player_event(&mut self, event: PlayerEvent) -> bool {
        match event {
            PlayerEvent::TrackLoaded { track_id, ok } => {
                let Some(host) = self.host() else {
                    debug!("Track {} loaded but room {} has no host", track_id, self.room_id);
                    return true;
                };

                let message = RoomMessage::player_status(track_id, ok);
                let undelivered = self.deliver_to(host.id, &message);

                self.remove_members(undelivered)
            }
        }
    }

    fn register(&mut self, peer: Peer) {
        if self.member(peer.id).is_some() {
            warn!("Peer {} is already in room {}", peer.id, self.room_id);
            return;
        }

        info!("{} joined room {}", peer.name, self.room_id);

        if self.host().is_none() {
            info!("{} is now the host of room {}", peer.name, self.room_id);
            self.host = Some(peer.id);
        }

        self.registry.claim_room(&self.room_id);
        self.members.push(peer);
    }

    fn relay(&mut self, from: PeerId, to: Option<PeerId>, data: String) -> bool {
        let Some(sender) = self.member(from) else {
            debug!("Dropped a relay from {}, not a member of {}", from, self.room_id);
            return true;
        };

        let message = RoomMessage::Peer {
            from: sender.author(),
            to,
            data,
        };

        let undelivered = match to {
            Some(to) => self.deliver_to(to, &message),
            None => self.deliver(&message, Some(from)),
        };

        self.remove_members(undelivered)
    }

    /// Sends a message to every member, except one if given.
    fn deliver(
        &self,
        message: &RoomMessage,
        except: Option<PeerId>,
    ) -> Vec<(PeerId, Departure)> {
        let Some(encoded) = encode(message) else {
            return Vec::new();
        };

        self.members
            .iter()
            .filter(|peer| Some(peer.id) != except)
            .filter_map(|peer| {
                peer.send(encoded.clone())
                    .err()
                    .map(|reason| (peer.id, Departure::Evicted(reason)))
            })
            .collect()
    }

    fn deliver_to(&self, to: PeerId, message: &RoomMessage) -> Vec<(PeerId, Departure)> {
        let Some(peer) = self.member(to) else {
            // The peer left between the send and now
            debug!("Dropped a message for {}, not a member of {}", to, self.room_id);
            return Vec::new();
        };

        let Some(encoded) = encode(message) else {
            return Vec::new();
        };

        match peer.send(encoded) {
            Ok(()) => Vec::new(),
            Err(reason) => vec![(peer.id, Departure::Evicted(reason))],
        }
    }

    /// Removes members, telling everyone else and picking a new host when needed.
    /// Announcements can evict more members, which are handled in the same pass.
    /// Returns false once the room is empty.
    fn remove_members<I>(&mut self, departures: I) -> bool
    where
        I: IntoIterator<Item = (PeerId, Departure)>,
    {
        let mut pending: VecDeque<_> = departures.into_iter().collect();

        while let Some((id, departure)) = pending.pop_front() {
            let Some(index) = self.members.iter().position(|p| p.id == id) else {
                continue;
            };

            // Dropping the peer closes its outbound buffer
            let peer = self.members.remove(index);
            self.registry.remove_peer(peer.id, &peer.token);

            match departure {
                Departure::Left => info!("{} left room {}", peer.name, self.room_id),
                Departure::Evicted(Undelivered::SlowConsumer) => {
                    warn!("Evicted {} from room {}, it is not keeping up", peer.name, self.room_id)
                }
                Departure::Evicted(Undelivered::Disconnected) => {
                    info!("{} disconnected from room {}", peer.name, self.room_id)
                }
            }

            if self.members.is_empty() {
                self.host = None;
                info!("Room {} is empty", self.room_id);
                return false;
            }

            let left = RoomMessage::room_event(peer.author(), RoomEvent::Left);
            pending.extend(self.deliver(&left, None));

            if self.host == Some(peer.id) {
                pending.extend(self.elect_host());
            }
        }

        true
    }

    /// The member that joined earliest becomes host. Members that joined at
    /// the same instant are ordered by when they were registered.
    fn elect_host(&mut self) -> Vec<(PeerId, Departure)> {
        self.host = self
            .members
            .iter()
            .min_by_key(|peer| peer.joined_at())
            .map(|peer| peer.id);

        let Some(successor) = self.host() else {
            return Vec::new();
        };

        info!("{} is now the host of room {}", successor.name, self.room_id);

        let message = RoomMessage::room_event(successor.author(), RoomEvent::Host);
        self.deliver(&message, None)
    }

    fn host(&self) -> Option<&Peer> {
        self.host.and_then(|id| self.member(id))
    }

    fn member(&self, id: PeerId) -> Option<&Peer> {
        self.members.iter().find(|peer| peer.id == id)
    }

    fn member_list(&self) -> Vec<MemberInfo> {
        let host = self.host().map(|peer| peer.id);

        self.members
            .iter()
            .map(|peer| MemberInfo {
                id: peer.id,
                name: peer.name.clone(),
                permission: peer.permission,
                host: Some(peer.id) == host,
            })
            .collect()
    }

    fn teardown(&mut self) {
        self.registry.remove_room(&self.room_id);
        self.player.shutdown();
        self.members.clear();
        self.host = None;
        self.closed.cancel();

        info!("Room {} was destroyed", self.room_id);
    }
}

fn encode(message: &RoomMessage) -> Option<Arc<str>> {
    match message.encode() {
        Ok(encoded) => Some(encoded),
        Err(e) => {
            error!("Failed to encode {:?} message: {}", message.msg_type(), e);
            None
        }
    }
}

impl HubHandle {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn player(&self) -> &Arc<Player> {
        &self.player
    }

    pub fn register(&self, peer: Peer) {
        self.send(HubEvent::Register(peer));
    }

    pub fn unregister(&self, id: PeerId) {
        self.send(HubEvent::Unregister(id));
    }

    pub fn broadcast(&self, message: RoomMessage) {
        self.send(HubEvent::Broadcast(message));
    }

    pub fn direct(&self, to: PeerId, message: RoomMessage) {
        self.send(HubEvent::Direct { to, message });
    }

    pub fn relay(&self, from: PeerId, to: Option<PeerId>, data: String) {
        self.send(HubEvent::Relay { from, to, data });
    }

    pub fn shutdown(&self) {
        self.send(HubEvent::Shutdown);
    }

    /// Lists the members in the order they joined. Empty once the hub has stopped.
    pub async fn members(&self) -> Vec<MemberInfo> {
        let (reply, receiver) = oneshot::channel();
        self.send(HubEvent::Members(reply));

        receiver.await.unwrap_or_default()
    }

    pub async fn host(&self) -> Option<PeerId> {
        self.members()
            .await
            .into_iter()
            .find(|member| member.host)
            .map(|member| member.id)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Waits until the hub has stopped and left the registry.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    fn start_grace_timer(&self, config: &Config) {
        let handle = self.clone();
        let grace_period = config.room_grace_period;

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(grace_period) => handle.send(HubEvent::GraceExpired),
                _ = handle.closed() => {}
            }
        });
    }

    fn send(&self, event: HubEvent) {
        if self.mailbox.send(event).is_err() {
            debug!("Room {} has stopped, dropping event", self.room_id);
        }
    }
}
