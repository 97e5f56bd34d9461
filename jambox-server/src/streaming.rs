use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::Response,
    routing::get,
};

use crate::{
    auth::SessionId,
    context::ServerContext,
    errors::{ServerError, ServerResult},
    Router,
};

/// Serves the audio of the room's current track.
async fn stream_audio(
    State(context): State<ServerContext>,
    SessionId(token): SessionId,
) -> ServerResult<Response<Body>> {
    let audio = context.collab.rooms.stream(&token).await?;
    let content_type = sniff_content_type(&audio);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from(audio))
        .map_err(|e| ServerError::Unknown(e.to_string()))
}

async fn stream_end(
    State(context): State<ServerContext>,
    SessionId(token): SessionId,
) -> ServerResult<StatusCode> {
    context.collab.rooms.stream_end(&token).await?;

    Ok(StatusCode::OK)
}

async fn stream_preload(
    State(context): State<ServerContext>,
    SessionId(token): SessionId,
) -> ServerResult<StatusCode> {
    context.collab.rooms.stream_preload(&token).await?;

    Ok(StatusCode::OK)
}

/// Guesses the container from the first bytes of the payload.
fn sniff_content_type(audio: &[u8]) -> &'static str {
    match audio {
        [0x1A, 0x45, 0xDF, 0xA3, ..] => "audio/webm",
        [b'O', b'g', b'g', b'S', ..] => "audio/ogg",
        [b'I', b'D', b'3', ..] | [0xFF, 0xFB | 0xF3 | 0xF2, ..] => "audio/mpeg",
        [_, _, _, _, b'f', b't', b'y', b'p', ..] => "audio/mp4",
        [b'R', b'I', b'F', b'F', ..] => "audio/wav",
        _ => "application/octet-stream",
    }
}

pub fn router() -> Router {
    Router::new()
        .route("/stream", get(stream_audio))
        .route("/streamend", get(stream_end))
        .route("/streampreload", get(stream_preload))
}
