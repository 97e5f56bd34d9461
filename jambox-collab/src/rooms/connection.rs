use std::{fmt::Display, sync::Arc, time::Duration};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use tokio::{
    sync::mpsc,
    time::{interval_at, timeout, Instant},
};

use jambox_core::Config;

use crate::{HubHandle, InboundSignal, PeerId};

/// A transport-independent websocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    read_limit: usize,
    write_wait: Duration,
    pong_wait: Duration,
    ping_period: Duration,
}

/// A peer that passed the handshake, ready to be attached to a transport.
pub struct PeerConnection {
    peer_id: PeerId,
    hub: HubHandle,
    /// Taken once the connection is attached to a transport
    outbound: Option<mpsc::Receiver<Arc<str>>>,
    timing: Timing,
}

impl PeerConnection {
    pub(crate) fn new(
        peer_id: PeerId,
        hub: HubHandle,
        outbound: mpsc::Receiver<Arc<str>>,
        config: &Config,
    ) -> Self {
        Self {
            peer_id,
            hub,
            outbound: Some(outbound),
            timing: Timing {
                read_limit: config.read_limit,
                write_wait: config.write_wait,
                pong_wait: config.pong_wait,
                ping_period: config.ping_period(),
            },
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn room_id(&self) -> &str {
        self.hub.room_id()
    }

    #[cfg(test)]
    pub(crate) async fn next_outbound(&mut self) -> Option<Arc<str>> {
        self.outbound.as_mut()?.recv().await
    }

    /// Pumps frames between the transport and the hub until either side is done.
    /// The peer is unregistered exactly once when this returns. A connection
    /// that is dropped without being run unregisters its peer as well.
    pub async fn run<R, W, E>(mut self, reader: R, writer: W)
    where
        R: Stream<Item = Result<Frame, E>> + Unpin,
        W: Sink<Frame> + Unpin,
        W::Error: Display,
        E: Display,
    {
        let Some(outbound) = self.outbound.take() else {
            return;
        };

        let peer_id = self.peer_id;
        let timing = self.timing;
        let hub = &self.hub;

        let reading = read_loop(peer_id, hub, reader, timing);
        let writing = write_loop(peer_id, outbound, writer, timing);
        tokio::pin!(reading, writing);

        let reader_finished = tokio::select! {
            _ = &mut reading => true,
            _ = &mut writing => false,
        };

        hub.unregister(peer_id);

        if reader_finished {
            // The hub closes the buffer, which lets the writer say goodbye
            timeout(timing.write_wait, writing).await.ok();
        }

        debug!("Connection of peer {} closed", peer_id);
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        if self.outbound.is_some() {
            debug!("Peer {} never attached to a transport", self.peer_id);
            self.hub.unregister(self.peer_id);
        }
    }
}

async fn read_loop<R, E>(peer_id: PeerId, hub: &HubHandle, mut reader: R, timing: Timing)
where
    R: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    loop {
        let frame = match timeout(timing.pong_wait, reader.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                warn!("Failed to read from peer {}: {}", peer_id, e);
                return;
            }
            Ok(None) => return,
            Err(_) => {
                info!("Peer {} stopped responding", peer_id);
                return;
            }
        };

        match frame {
            Frame::Text(text) => {
                if text.len() > timing.read_limit {
                    warn!(
                        "Dropped a {} byte message from peer {}, over the limit",
                        text.len(),
                        peer_id
                    );
                    continue;
                }

                match serde_json::from_str::<InboundSignal>(&text) {
                    Ok(signal) => hub.relay(peer_id, signal.target(), text),
                    Err(e) => warn!("Dropped a malformed message from peer {}: {}", peer_id, e),
                }
            }
            Frame::Close => return,
            Frame::Ping(_) | Frame::Pong(_) => {}
        }
    }
}

async fn write_loop<W>(
    peer_id: PeerId,
    mut outbound: mpsc::Receiver<Arc<str>>,
    mut writer: W,
    timing: Timing,
) where
    W: Sink<Frame> + Unpin,
    W::Error: Display,
{
    let mut ping = interval_at(Instant::now() + timing.ping_period, timing.ping_period);

    loop {
        let frame = tokio::select! {
            message = outbound.recv() => match message {
                Some(message) => Frame::Text(message.to_string()),
                None => {
                    timeout(timing.write_wait, writer.send(Frame::Close)).await.ok();
                    return;
                }
            },
            _ = ping.tick() => Frame::Ping(Vec::new()),
        };

        match timeout(timing.write_wait, writer.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Failed to write to peer {}: {}", peer_id, e);
                return;
            }
            Err(_) => {
                warn!("Writing to peer {} took too long", peer_id);
                return;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::convert::Infallible;

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::{sink, stream};

    use jambox_core::{DispatchPool, ExtractError, Extractor, Metadata};

    use crate::{Hub, Peer, Permission, Registry};

    use super::*;

    struct NoExtractor;

    #[async_trait]
    impl Extractor for NoExtractor {
        async fn metadata(&self, _: &str) -> Result<Metadata, ExtractError> {
            Err(ExtractError::Failed("unused".to_string()))
        }

        async fn audio(&self, _: &str) -> Result<Bytes, ExtractError> {
            Err(ExtractError::Failed("unused".to_string()))
        }
    }

    type Reader = std::pin::Pin<Box<dyn Stream<Item = Result<Frame, Infallible>> + Send>>;
    type Writer = std::pin::Pin<Box<dyn Sink<Frame, Error = String> + Send>>;

    /// A transport made of channels, one end for each direction.
    fn transport() -> (
        mpsc::UnboundedSender<Frame>,
        Reader,
        Writer,
        mpsc::UnboundedReceiver<Frame>,
    ) {
        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound) = mpsc::unbounded_channel();

        let reader = stream::unfold(inbound_rx, |mut rx| async move {
            rx.recv().await.map(|frame| (Ok::<_, Infallible>(frame), rx))
        });

        let writer = sink::unfold(
            outbound_tx,
            |tx: mpsc::UnboundedSender<Frame>, frame: Frame| async move {
                tx.send(frame).map_err(|e| e.to_string())?;
                Ok::<_, String>(tx)
            },
        );

        (inbound, Box::pin(reader), Box::pin(writer), outbound)
    }

    fn connect(hub: &HubHandle, config: &Config, name: &str) -> (PeerConnection, PeerId) {
        let (peer, receiver) = Peer::new(
            PeerId::new(),
            name,
            Permission::Guest,
            hub.room_id().to_string(),
            format!("token-{}", name),
            config.peer_send_capacity,
        );

        let id = peer.id;
        hub.register(peer);

        (PeerConnection::new(id, hub.clone(), receiver, config), id)
    }

    fn spawn_hub(config: &Config) -> HubHandle {
        let pool = Arc::new(DispatchPool::new("test", config));

        Hub::spawn(
            "room".to_string(),
            Arc::new(Registry::new()),
            config,
            pool,
            Arc::new(NoExtractor),
        )
    }

    async fn next(frames: &mut mpsc::UnboundedReceiver<Frame>) -> Frame {
        timeout(Duration::from_secs(1), frames.recv())
            .await
            .expect("no frame arrived")
            .expect("transport closed")
    }

    #[tokio::test]
    async fn test_frames_are_relayed_between_peers() {
        let config = Config::default();
        let hub = spawn_hub(&config);

        let (a, _) = connect(&hub, &config, "a");
        let (b, _) = connect(&hub, &config, "b");

        let (a_in, a_reader, a_writer, _a_out) = transport();
        let (_b_in, b_reader, b_writer, mut b_out) = transport();

        tokio::spawn(a.run(a_reader, a_writer));
        tokio::spawn(b.run(b_reader, b_writer));

        let offer = r#"{"Data":"offer"}"#.to_string();
        a_in.send(Frame::Text(offer)).unwrap();
        a_in.send(Frame::Text("not json".to_string())).unwrap();

        let Frame::Text(text) = next(&mut b_out).await else {
            panic!("expected a text frame");
        };

        let message: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(message["MsgType"], 2);
        assert_eq!(message["Data"], r#"{"Data":"offer"}"#);
    }

    #[tokio::test]
    async fn test_closing_unregisters_once() {
        let config = Config::default();
        let hub = spawn_hub(&config);

        let (a, a_id) = connect(&hub, &config, "a");
        let (b, _) = connect(&hub, &config, "b");

        let (a_in, a_reader, a_writer, mut a_out) = transport();
        let (_b_in, b_reader, b_writer, mut b_out) = transport();

        let a_task = tokio::spawn(a.run(a_reader, a_writer));
        tokio::spawn(b.run(b_reader, b_writer));

        a_in.send(Frame::Close).unwrap();
        a_task.await.unwrap();

        // The departing peer's writer closes its side
        assert_eq!(next(&mut a_out).await, Frame::Close);

        let Frame::Text(text) = next(&mut b_out).await else {
            panic!("expected a text frame");
        };

        let message: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(message["Data"], "left");
        assert_eq!(message["UID"], a_id.to_string());

        let members = hub.members().await;
        assert_eq!(members.len(), 1);
        assert!(members[0].host);
    }

    #[tokio::test]
    async fn test_unused_connection_unregisters_on_drop() {
        let config = Config::default();
        let hub = spawn_hub(&config);

        let (a, a_id) = connect(&hub, &config, "a");
        let (b, b_id) = connect(&hub, &config, "b");

        // The transport for b never came up
        drop(b);

        let members = hub.members().await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, a_id);
        assert!(members.iter().all(|member| member.id != b_id));

        drop(a);
        timeout(Duration::from_secs(1), hub.closed()).await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_messages_are_dropped() {
        let config = Config {
            read_limit: 16,
            ..Default::default()
        };
        let hub = spawn_hub(&config);

        let (a, _) = connect(&hub, &config, "a");
        let (b, _) = connect(&hub, &config, "b");

        let (a_in, a_reader, a_writer, _a_out) = transport();
        let (_b_in, b_reader, b_writer, mut b_out) = transport();

        tokio::spawn(a.run(a_reader, a_writer));
        tokio::spawn(b.run(b_reader, b_writer));

        let oversized = format!(r#"{{"Data":"{}"}}"#, "x".repeat(32));
        a_in.send(Frame::Text(oversized)).unwrap();
        a_in.send(Frame::Text("{}".to_string())).unwrap();

        let Frame::Text(text) = next(&mut b_out).await else {
            panic!("expected a text frame");
        };

        let message: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(message["Data"], "{}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_times_out() {
        let config = Config::default();
        let hub = spawn_hub(&config);

        let (a, _) = connect(&hub, &config, "a");
        let (_a_in, a_reader, a_writer, mut a_out) = transport();

        let started = Instant::now();
        a.run(a_reader, a_writer).await;

        assert!(started.elapsed() >= config.pong_wait);

        // A ping went out before the deadline, then the goodbye
        assert_eq!(a_out.recv().await, Some(Frame::Ping(Vec::new())));
        assert_eq!(a_out.recv().await, Some(Frame::Close));

        timeout(Duration::from_secs(1), hub.closed()).await.unwrap();
    }
}
