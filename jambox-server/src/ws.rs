use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
};
use futures_util::{future, SinkExt, StreamExt};
use log::debug;

use jambox_collab::{Frame, PeerConnection};

use crate::{auth::SessionId, context::ServerContext, errors::ServerResult, Router};

/// Admits the session's peer into its room, then hands the socket to the connection.
async fn connect(
    State(context): State<ServerContext>,
    SessionId(token): SessionId,
    upgrade: WebSocketUpgrade,
) -> ServerResult<Response> {
    let connection = context.collab.rooms.connect(&token)?;

    Ok(upgrade.on_upgrade(move |socket| attach(socket, connection)))
}

async fn attach(socket: WebSocket, connection: PeerConnection) {
    let peer_id = connection.peer_id();
    let (sink, stream) = socket.split();

    let reader = stream.map(|result| result.map(into_frame));
    let writer = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(into_message(frame))));

    connection.run(reader, writer).await;
    debug!("Socket for peer {} closed", peer_id);
}

fn into_frame(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text),
        Message::Binary(data) => Frame::Text(String::from_utf8_lossy(&data).into_owned()),
        Message::Ping(data) => Frame::Ping(data),
        Message::Pong(data) => Frame::Pong(data),
        Message::Close(_) => Frame::Close,
    }
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close => Message::Close(None),
    }
}

pub fn router() -> Router {
    Router::new().route("/ws", get(connect))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_binary_frames_become_text() {
        let frame = into_frame(Message::Binary(b"{\"To\":\"\"}".to_vec()));

        assert_eq!(frame, Frame::Text("{\"To\":\"\"}".to_string()));
    }

    #[test]
    fn test_close_maps_both_ways() {
        assert_eq!(into_frame(Message::Close(None)), Frame::Close);
        assert!(matches!(into_message(Frame::Close), Message::Close(None)));
        assert!(matches!(
            into_message(Frame::Ping(vec![1])),
            Message::Ping(data) if data == vec![1]
        ));
    }
}
